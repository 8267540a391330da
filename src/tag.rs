//! Monotonic wrap-around tag generator (spec §4.2).

use std::sync::atomic::{AtomicU32, Ordering};

use crate::net::Tag;

/// Thread-safe, best-effort monotonic tag generator over `[0, max_tag]`.
///
/// Two successive calls return distinct tags when they fit in the range;
/// once the counter reaches `max_tag` the next call wraps to 0. Wrap-around
/// may hand out a tag still in use by an extremely long-lived exchange; per
/// spec §4.2 this is accepted as a practical trade-off, not a bug.
pub struct TagAllocator {
    counter: AtomicU32,
    max_tag: Tag,
}

impl TagAllocator {
    pub fn new(max_tag: Tag) -> Self {
        Self {
            counter: AtomicU32::new(0),
            max_tag,
        }
    }

    /// Generate the next tag.
    pub fn next(&self) -> Tag {
        // Mirrors the original `hg_gen_request_tag`: CAS from max_tag back
        // to 0 first; if that doesn't apply, increment and use the new
        // value. Using `compare_exchange` keeps this correct under
        // concurrent callers without a mutex.
        match self
            .counter
            .compare_exchange(self.max_tag, 0, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => 0,
            Err(_) => self.counter.fetch_add(1, Ordering::AcqRel).wrapping_add(1),
        }
    }

    pub fn max_tag(&self) -> Tag {
        self.max_tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_in_range_and_distinct_until_wrap() {
        let alloc = TagAllocator::new(3);
        let tags: Vec<Tag> = (0..5).map(|_| alloc.next()).collect();
        assert_eq!(tags, vec![1, 2, 3, 0, 1]);
        for &t in &tags {
            assert!(t <= 3);
        }
    }

    #[test]
    fn many_calls_stay_in_bounds() {
        let alloc = TagAllocator::new(7);
        let mut prev = None;
        for _ in 0..100 {
            let t = alloc.next();
            assert!(t <= 7);
            if let Some(p) = prev {
                assert_ne!(p, t);
            }
            prev = Some(t);
        }
    }
}
