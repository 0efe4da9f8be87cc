//! Helper functions that don't particularly belong to any concrete module of the allocator.

/// Rounds `to_be_aligned` up to the next multiple of `alignment`.
///
/// Used both to round region sizes up to whole pages (see
/// [`crate::kernel::page_size`]) and to round requested capacities up to the
/// machine word, so every header we write inside a region is naturally
/// aligned. `alignment` must be a power of two.
#[inline]
pub fn align(to_be_aligned: usize, alignment: usize) -> usize {
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn align_pointer_size() {
        let word = mem::size_of::<usize>();
        let alignments = vec![
            (1..=word, word),
            (word + 1..=2 * word, 2 * word),
            (2 * word + 1..=3 * word, 3 * word),
        ];

        for (sizes, expected) in alignments {
            for size in sizes {
                assert_eq!(expected, align(size, word));
            }
        }
    }

    #[test]
    fn align_page_size() {
        // For testing purposes we are assuming the page size is 4096
        let alignments = vec![(1..=4096, 4096), (4097..=8192, 8192)];

        for (sizes, expected) in alignments {
            for size in sizes {
                assert_eq!(expected, align(size, 4096))
            }
        }
    }

    #[test]
    fn aligned_values_are_unchanged() {
        assert_eq!(0, align(0, 8));
        assert_eq!(24, align(24, 8));
        assert_eq!(8192, align(8192, 4096));
    }
}
