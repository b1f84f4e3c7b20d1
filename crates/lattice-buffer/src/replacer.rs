//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Trait for page replacement algorithms.
///
/// Eviction candidates are filtered through a `can_evict` predicate so
/// the pool can veto pinned or empty frames without the replacer
/// tracking pin state itself.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Selects a victim frame for eviction.
    ///
    /// Returns None if no frame passes `can_evict`.
    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId>;

    /// Forgets a frame's access history (frame returned to the free list).
    fn remove(&self, frame_id: FrameId);
}

/// Clock replacement algorithm.
///
/// Keeps one reference bit per frame, set on access. The clock hand
/// sweeps frames; a frame with its bit set gets a second chance, a
/// frame with the bit clear that passes the predicate is the victim.
pub struct ClockReplacer {
    /// Number of frames.
    num_frames: usize,
    /// Reference bits for each frame (atomic for lock-free access).
    reference_bits: Vec<AtomicBool>,
    /// Current clock hand position.
    clock_hand: Mutex<usize>,
}

impl ClockReplacer {
    /// Creates a new clock replacer for the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        let reference_bits = (0..num_frames).map(|_| AtomicBool::new(false)).collect();

        Self {
            num_frames,
            reference_bits,
            clock_hand: Mutex::new(0),
        }
    }

    /// Returns the total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_frames
    }
}

impl Replacer for ClockReplacer {
    #[inline]
    fn record_access(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(true, Ordering::Relaxed);
        }
    }

    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId> {
        let mut hand = self.clock_hand.lock();

        // At most two full rotations: the first clears reference bits,
        // the second must then find any evictable frame.
        for _ in 0..(2 * self.num_frames) {
            let idx = *hand;
            let frame_id = FrameId(idx as u32);
            *hand = (idx + 1) % self.num_frames;

            if !can_evict(frame_id) {
                continue;
            }

            if self.reference_bits[idx].load(Ordering::Relaxed) {
                // Second chance.
                self.reference_bits[idx].store(false, Ordering::Relaxed);
            } else {
                return Some(frame_id);
            }
        }

        None
    }

    fn remove(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(false, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_replacer_new() {
        let replacer = ClockReplacer::new(10);
        assert_eq!(replacer.capacity(), 10);
    }

    #[test]
    fn test_clock_replacer_evict_none_evictable() {
        let replacer = ClockReplacer::new(10);
        assert!(replacer.evict(&|_| false).is_none());
    }

    #[test]
    fn test_clock_replacer_evict_single() {
        let replacer = ClockReplacer::new(10);

        let victim = replacer.evict(&|fid| fid == FrameId(5));
        assert_eq!(victim, Some(FrameId(5)));
    }

    #[test]
    fn test_clock_replacer_second_chance() {
        let replacer = ClockReplacer::new(3);

        // Frames 0 and 1 were accessed; frame 2 was not.
        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));

        let victim = replacer.evict(&|_| true);
        assert_eq!(victim, Some(FrameId(2)));
    }

    #[test]
    fn test_clock_replacer_evict_all_referenced() {
        let replacer = ClockReplacer::new(3);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.record_access(FrameId(2));

        // All bits set: first rotation clears them, second finds a victim.
        assert!(replacer.evict(&|_| true).is_some());
    }

    #[test]
    fn test_clock_replacer_remove_clears_bit() {
        let replacer = ClockReplacer::new(3);

        replacer.record_access(FrameId(0));
        replacer.remove(FrameId(0));

        // Bit cleared, so frame 0 is immediately evictable.
        let victim = replacer.evict(&|fid| fid == FrameId(0));
        assert_eq!(victim, Some(FrameId(0)));
    }

    #[test]
    fn test_clock_replacer_skips_vetoed_frames() {
        let replacer = ClockReplacer::new(4);

        // Only frame 3 is evictable.
        for _ in 0..8 {
            let victim = replacer.evict(&|fid| fid == FrameId(3));
            assert_eq!(victim, Some(FrameId(3)));
        }
    }

    #[test]
    fn test_clock_replacer_out_of_bounds() {
        let replacer = ClockReplacer::new(5);

        // These should not panic.
        replacer.record_access(FrameId(100));
        replacer.remove(FrameId(100));
    }
}
