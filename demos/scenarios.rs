//! Walks through the classic heap scenarios and prints the heap after each
//! interesting step. Run with `cargo run --example scenarios`.

use std::{process, ptr::NonNull};

use blockheap::{
    BlockRef, Heap, HeapConfig,
    kernel::{self, Placement},
};

const HEAP_INIT_SIZE: usize = 4096;

fn fail(test: usize, heap: Option<&Heap>, message: &str) -> ! {
    if let Some(heap) = heap {
        eprintln!("{}", heap.dump());
    }
    eprintln!("Failed test {test}: {message}");
    process::exit(1);
}

/// Every scenario gets a fresh heap at its own base.
fn new_heap(test: usize) -> Heap {
    let config = HeapConfig::default().with_base(HeapConfig::default().base + test * 0x0100_0000);

    match Heap::with_config(HEAP_INIT_SIZE, config) {
        Ok(heap) => heap,
        Err(err) => fail(test, None, &err.to_string()),
    }
}

fn header(heap: &Heap, ptr: NonNull<u8>) -> BlockRef<'_> {
    unsafe { heap.block_of(ptr) }
}

fn heap_creation() {
    let heap = new_heap(0);
    println!("Heap final:\n{}", heap.dump());
}

fn malloc() {
    let mut heap = new_heap(1);

    let Ok(ptr) = heap.allocate(HEAP_INIT_SIZE / 2) else {
        fail(1, Some(&heap), "couldn't allocate memory");
    };
    println!("Heap before freeing:\n{}", heap.dump());

    unsafe { heap.deallocate(ptr.as_ptr()) };
    println!("Heap after freeing:\n{}", heap.dump());

    if heap.blocks().count() != 1 {
        fail(1, Some(&heap), "freed block was not merged back");
    }
}

fn free_one_region() {
    let mut heap = new_heap(2);

    let (Ok(first), Ok(second)) = (heap.allocate(1024), heap.allocate(1024)) else {
        fail(2, Some(&heap), "couldn't allocate memory");
    };
    unsafe { second.as_ptr().write_bytes(0x5A, 1024) };
    println!("Heap before freeing:\n{}", heap.dump());

    unsafe { heap.deallocate(first.as_ptr()) };
    let intact = (0..1024).all(|i| unsafe { second.as_ptr().add(i).read() } == 0x5A);
    if header(&heap, second).is_free() || !intact {
        fail(2, Some(&heap), "freeing one region damages the other");
    }

    unsafe { heap.deallocate(second.as_ptr()) };
    println!("Heap after freeing:\n{}", heap.dump());
}

fn reaches(from: BlockRef<'_>, target: BlockRef<'_>) -> bool {
    let mut current = from.next();
    while let Some(block) = current {
        if block == target {
            return true;
        }
        current = block.next();
    }
    false
}

fn mem_end() {
    let mut heap = new_heap(3);

    let (Ok(first), Ok(second)) = (heap.allocate(HEAP_INIT_SIZE), heap.allocate(HEAP_INIT_SIZE)) else {
        fail(3, Some(&heap), "couldn't allocate memory");
    };
    if !reaches(header(&heap, first), header(&heap, second)) {
        fail(3, Some(&heap), "headers are not linked");
    }

    unsafe {
        heap.deallocate(first.as_ptr());
        heap.deallocate(second.as_ptr());
    }
}

fn several_blocks() {
    let mut heap = new_heap(4);
    println!("Heap before allocating:\n{}", heap.dump());

    let (Ok(first), Ok(second)) = (heap.allocate(HEAP_INIT_SIZE), heap.allocate(HEAP_INIT_SIZE * 4)) else {
        fail(4, Some(&heap), "couldn't allocate memory");
    };
    println!("Heap after allocating:\n{}", heap.dump());

    if !reaches(header(&heap, first), header(&heap, second)) {
        fail(4, Some(&heap), "blocks damaged or not linked");
    }

    unsafe {
        heap.deallocate(first.as_ptr());
        heap.deallocate(second.as_ptr());
    }
}

fn another_heap() {
    let mut heap = new_heap(5);

    let Ok(first) = heap.allocate(HEAP_INIT_SIZE * 3) else {
        fail(5, Some(&heap), "first allocation went wrong");
    };
    println!("Heap after allocating:\n{}", heap.dump());

    let Some((tail_end, tail_capacity)) = heap
        .blocks()
        .last()
        .map(|tail| (tail.after() as *mut u8, tail.capacity().0))
    else {
        fail(5, Some(&heap), "heap has no blocks");
    };
    let len = kernel::page_size();
    let Some(foreign) = (unsafe { kernel::map_pages(tail_end, len, Placement::Anywhere) }) else {
        fail(5, Some(&heap), "couldn't map region");
    };
    println!("Mapped foreign region at {foreign:p}");

    let Ok(second) = heap.allocate(tail_capacity + HEAP_INIT_SIZE) else {
        fail(5, Some(&heap), "second allocation went wrong");
    };
    println!("Heap after growing around it:\n{}", heap.dump());

    let foreign_start = foreign.as_ptr() as usize;
    let overlaps = heap
        .blocks()
        .any(|block| (block.addr() as usize) < foreign_start + len && block.after() as usize > foreign_start);
    if overlaps {
        fail(5, Some(&heap), "heap grew over a foreign mapping");
    }

    unsafe {
        heap.deallocate(first.as_ptr());
        heap.deallocate(second.as_ptr());
        kernel::unmap_pages(foreign.as_ptr(), len);
    }
}

fn main() {
    let scenarios: [(&str, fn()); 6] = [
        ("heap creation", heap_creation),
        ("malloc", malloc),
        ("free one region", free_one_region),
        ("mem end", mem_end),
        ("several blocks", several_blocks),
        ("another heap", another_heap),
    ];

    for (test, (name, scenario)) in scenarios.into_iter().enumerate() {
        println!("Running test {test} ({name})");
        scenario();
        println!("Test {test} succeed");
        println!("===============");
    }
}
