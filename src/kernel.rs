use std::{
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Virtual memory page size of the computer. This is usually 4096.
/// This value should be a constant, but we can't do that since we
/// don't know the value at compile time, so it is queried once and cached.
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// How strictly a mapping has to honor the address hint it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The mapping must start exactly at the hint. If something already lives
    /// there the request fails instead of clobbering it.
    Exact,
    /// The hint is only a suggestion, the OS picks the address.
    Anywhere,
}

/// Zero sized handle for the platform-dependant memory primitives.
pub(crate) struct Kernel;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this, has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
trait PlatformMemory {
    /// Request a memory region of size `len` at `hint`. It returns a pointer
    /// to the mapped location or None if the underlying syscall fails or, for
    /// [`Placement::Exact`], if the mapping could not land on `hint`.
    unsafe fn request_memory(hint: *mut u8, len: usize, placement: Placement) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    unsafe fn return_memory(addr: *mut u8, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

/// Wrapper to calculate the computer's page size.
#[inline]
pub fn page_size() -> usize {
    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let size = unsafe { Kernel::page_size() };
            PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        size => size,
    }
}

/// Wrapper to use [`Kernel::request_memory`].
///
/// **SAFETY**: `len` must be a non zero multiple of [`page_size`]. The returned
/// memory is owned by the caller until handed back with [`unmap_pages`].
#[inline]
pub unsafe fn map_pages(hint: *mut u8, len: usize, placement: Placement) -> Option<NonNull<u8>> {
    unsafe { Kernel::request_memory(hint, len, placement) }
}

/// Wrapper to use [`Kernel::return_memory`]. The allocator never calls this
/// itself, it is meant for whoever tears the heap down.
///
/// **SAFETY**: `addr..addr + len` must have been obtained from [`map_pages`]
/// and nothing may reference it afterwards.
#[inline]
pub unsafe fn unmap_pages(addr: *mut u8, len: usize) {
    unsafe { Kernel::return_memory(addr, len) }
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, Placement, PlatformMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    /// Refuse to replace an existing mapping when placing at the hint.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    const NO_REPLACE: c_int = libc::MAP_FIXED_NOREPLACE;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    const NO_REPLACE: c_int = 0;

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(hint: *mut u8, len: usize, placement: Placement) -> Option<NonNull<u8>> {
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            let flags = match placement {
                Placement::Exact if hint.is_null() => return None,
                Placement::Exact => FLAGS | NO_REPLACE,
                Placement::Anywhere => FLAGS,
            };

            unsafe {
                let addr = mmap(hint.cast::<c_void>(), len as size_t, PROT, flags, FD, OFFSET);

                if addr == libc::MAP_FAILED {
                    return None;
                }

                // Kernels without MAP_FIXED_NOREPLACE treat the hint as a
                // suggestion, so an exact request may still land elsewhere.
                if placement == Placement::Exact && addr.cast::<u8>() != hint {
                    munmap(addr, len as size_t);
                    return None;
                }

                NonNull::new(addr.cast::<u8>())
            }
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) {
            if unsafe { munmap(addr.cast::<c_void>(), len as size_t) } != 0 {
                log::warn!("could not release mapping at {addr:p}: {}", std::io::Error::last_os_error());
            }
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use crate::kernel::{Kernel, Placement, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(hint: *mut u8, len: usize, placement: Placement) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            let address = match placement {
                Placement::Exact if hint.is_null() => return None,
                Placement::Exact => Some(hint as *const c_void),
                Placement::Anywhere => None,
            };

            unsafe {
                let addr = Memory::VirtualAlloc(address, len, flags, protection);

                // VirtualAlloc rounds the address down to the allocation
                // granularity, which is not the placement we asked for.
                if placement == Placement::Exact && !addr.is_null() && addr.cast::<u8>() != hint {
                    if let Err(err) = Memory::VirtualFree(addr, 0, Memory::MEM_RELEASE) {
                        log::warn!("could not release misplaced mapping at {addr:p}: {err}");
                    }
                    return None;
                }

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: *mut u8, _len: usize) {
            unsafe {
                if let Err(err) = Memory::VirtualFree(addr as *mut c_void, 0, Memory::MEM_RELEASE) {
                    log::warn!("could not release mapping at {addr:p}: {err}");
                }
            }
        }

        unsafe fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}
