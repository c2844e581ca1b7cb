//! Fixed arena of reusable capture buffers.
//!
//! The device side appends PCM bytes into submitted slots in ring order;
//! the capture loop pops completed slots, drains them into chunks, and
//! resubmits.  Each slot carries an explicit state:
//!
//! ```text
//!            submit                    write fills slot
//!   Free ──────────────▶ Submitted ─────────────────────▶ Done
//!    ▲                                                      │
//!    └──────────────────────────────────────────────────────┘
//!                        pop_done / drain
//! ```
//!
//! The pool never allocates after construction and never blocks: when every
//! slot is full the device side drops samples and counts the overrun.
//! Diagnostic counters are owned by the pool instance, so they reset
//! naturally with each session.

// ---------------------------------------------------------------------------
// SlotState
// ---------------------------------------------------------------------------

/// Lifecycle state of one pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Drained and waiting to be resubmitted.
    Free,
    /// Queued for the device to fill.
    Submitted,
    /// Filled to capacity; waiting for the capture loop.
    Done,
}

struct Slot {
    data: Vec<u8>,
    fill: usize,
    state: SlotState,
}

// ---------------------------------------------------------------------------
// BufferPool
// ---------------------------------------------------------------------------

/// Arena of `slot_count` reusable buffers of `slot_bytes` each.
///
/// Not internally synchronized; the device callback and the capture loop
/// share it behind a `Mutex`, and every method returns quickly.
pub struct BufferPool {
    slots: Vec<Slot>,
    /// Submission order: front slot is the one currently being filled.
    submit_queue: std::collections::VecDeque<usize>,
    /// Completion order: front slot is the oldest filled buffer.
    done_queue: std::collections::VecDeque<usize>,
    /// Total bytes accepted since construction.
    bytes_written: u64,
    /// Bytes dropped because no submitted slot was available.
    overrun_bytes: u64,
}

impl BufferPool {
    /// Create a pool with all slots submitted and ready to fill.
    ///
    /// # Panics
    ///
    /// Panics if `slot_count` or `slot_bytes` is zero.
    pub fn new(slot_count: usize, slot_bytes: usize) -> Self {
        assert!(slot_count > 0, "BufferPool needs at least one slot");
        assert!(slot_bytes > 0, "BufferPool slots need a non-zero size");

        let slots = (0..slot_count)
            .map(|_| Slot {
                data: vec![0u8; slot_bytes],
                fill: 0,
                state: SlotState::Submitted,
            })
            .collect();

        Self {
            slots,
            submit_queue: (0..slot_count).collect(),
            done_queue: std::collections::VecDeque::with_capacity(slot_count),
            bytes_written: 0,
            overrun_bytes: 0,
        }
    }

    /// Append `bytes` into submitted slots in ring order (device side).
    ///
    /// A slot that reaches capacity moves to `Done`; writing continues into
    /// the next submitted slot.  Bytes that do not fit anywhere are dropped
    /// and counted as overrun.  Returns the number of bytes accepted.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let mut remaining = bytes;
        let mut accepted = 0usize;

        while !remaining.is_empty() {
            let Some(&idx) = self.submit_queue.front() else {
                break;
            };
            let slot = &mut self.slots[idx];
            let room = slot.data.len() - slot.fill;
            let take = room.min(remaining.len());
            slot.data[slot.fill..slot.fill + take].copy_from_slice(&remaining[..take]);
            slot.fill += take;
            accepted += take;
            remaining = &remaining[take..];

            if slot.fill == slot.data.len() {
                slot.state = SlotState::Done;
                self.submit_queue.pop_front();
                self.done_queue.push_back(idx);
            }
        }

        self.bytes_written += accepted as u64;
        self.overrun_bytes += remaining.len() as u64;
        accepted
    }

    /// Pop the oldest completed slot (capture-loop side).
    ///
    /// Returns the slot index and its bytes; the slot becomes `Free` and
    /// must be passed back through [`resubmit`](Self::resubmit) to keep the
    /// ring running.
    pub fn pop_done(&mut self) -> Option<(usize, Vec<u8>)> {
        let idx = self.done_queue.pop_front()?;
        let slot = &mut self.slots[idx];
        let bytes = slot.data[..slot.fill].to_vec();
        slot.fill = 0;
        slot.state = SlotState::Free;
        Some((idx, bytes))
    }

    /// Queue a drained slot for filling again.
    pub fn resubmit(&mut self, idx: usize) {
        let slot = &mut self.slots[idx];
        debug_assert_eq!(slot.state, SlotState::Free);
        slot.fill = 0;
        slot.state = SlotState::Submitted;
        self.submit_queue.push_back(idx);
    }

    /// Final drain: take the bytes of the partially filled front slot, if
    /// any, and free every still-submitted slot without resubmission.
    pub fn drain_partial(&mut self) -> Option<Vec<u8>> {
        let mut partial = None;
        while let Some(idx) = self.submit_queue.pop_front() {
            let slot = &mut self.slots[idx];
            if slot.fill > 0 && partial.is_none() {
                partial = Some(slot.data[..slot.fill].to_vec());
            }
            slot.fill = 0;
            slot.state = SlotState::Free;
        }
        partial
    }

    /// `true` once every slot is back in `Free` (cleanup precondition).
    pub fn all_reclaimed(&self) -> bool {
        self.slots.iter().all(|s| s.state == SlotState::Free)
    }

    /// Total bytes accepted by [`write`](Self::write).
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Bytes dropped because the ring was full.
    pub fn overrun_bytes(&self) -> u64 {
        self.overrun_bytes
    }

    /// Size of each slot in bytes.
    pub fn slot_bytes(&self) -> usize {
        self.slots[0].data.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- fill and pop ------------------------------------------------------

    #[test]
    fn write_fills_slots_in_order() {
        let mut pool = BufferPool::new(3, 4);
        assert_eq!(pool.write(&[1, 2, 3, 4, 5, 6]), 6);

        let (idx, bytes) = pool.pop_done().expect("first slot complete");
        assert_eq!(idx, 0);
        assert_eq!(bytes, vec![1, 2, 3, 4]);
        // Second slot is only half full, not yet Done.
        assert!(pool.pop_done().is_none());
    }

    #[test]
    fn partial_write_completes_later() {
        let mut pool = BufferPool::new(2, 4);
        pool.write(&[1, 2]);
        assert!(pool.pop_done().is_none());
        pool.write(&[3, 4]);
        let (_, bytes) = pool.pop_done().unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn done_slots_pop_in_completion_order() {
        let mut pool = BufferPool::new(3, 2);
        pool.write(&[10, 11, 20, 21, 30, 31]);

        assert_eq!(pool.pop_done().unwrap().1, vec![10, 11]);
        assert_eq!(pool.pop_done().unwrap().1, vec![20, 21]);
        assert_eq!(pool.pop_done().unwrap().1, vec![30, 31]);
        assert!(pool.pop_done().is_none());
    }

    // ---- overrun -----------------------------------------------------------

    #[test]
    fn full_ring_drops_and_counts_overrun() {
        let mut pool = BufferPool::new(2, 2);
        assert_eq!(pool.write(&[1, 2, 3, 4, 5, 6]), 4);
        assert_eq!(pool.overrun_bytes(), 2);
        assert_eq!(pool.bytes_written(), 4);
    }

    #[test]
    fn resubmit_restores_capacity() {
        let mut pool = BufferPool::new(1, 2);
        pool.write(&[1, 2]);
        let (idx, _) = pool.pop_done().unwrap();
        pool.resubmit(idx);
        assert_eq!(pool.write(&[3, 4]), 2);
        assert_eq!(pool.pop_done().unwrap().1, vec![3, 4]);
    }

    // ---- final drain and reclamation ---------------------------------------

    #[test]
    fn drain_partial_returns_trailing_bytes() {
        let mut pool = BufferPool::new(2, 4);
        pool.write(&[1, 2, 3, 4, 5]);
        let (_, full) = pool.pop_done().unwrap();
        assert_eq!(full, vec![1, 2, 3, 4]);

        let partial = pool.drain_partial().expect("half-filled slot");
        assert_eq!(partial, vec![5]);
        assert!(pool.all_reclaimed());
    }

    #[test]
    fn drain_partial_on_empty_ring_is_none() {
        let mut pool = BufferPool::new(2, 4);
        assert!(pool.drain_partial().is_none());
        assert!(pool.all_reclaimed());
    }

    #[test]
    fn reclaimed_only_after_all_slots_freed() {
        let mut pool = BufferPool::new(2, 2);
        pool.write(&[1, 2]);
        assert!(!pool.all_reclaimed()); // one Done, one Submitted
        pool.pop_done().unwrap();
        assert!(!pool.all_reclaimed()); // one still Submitted
        pool.drain_partial();
        assert!(pool.all_reclaimed());
    }

    #[test]
    fn writes_after_drain_are_dropped() {
        let mut pool = BufferPool::new(2, 2);
        pool.drain_partial();
        assert_eq!(pool.write(&[9, 9]), 0);
        assert_eq!(pool.overrun_bytes(), 2);
    }

    // ---- construction guards -----------------------------------------------

    #[test]
    #[should_panic(expected = "at least one slot")]
    fn zero_slots_panics() {
        BufferPool::new(0, 4);
    }

    #[test]
    #[should_panic(expected = "non-zero size")]
    fn zero_slot_size_panics() {
        BufferPool::new(4, 0);
    }
}
