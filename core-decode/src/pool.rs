//! # Fixed-Capacity Buffer Pool
//!
//! An arena of N preallocated slots with a LIFO free-list of slot indices.
//! Every slot carries a [`SlotState`] so that ownership can be reconciled
//! at any time: each slot is in exactly one bucket (free, checked out by a
//! producer, queued, held by the worker, or held by a consumer).
//!
//! The pool itself is not synchronized. The pipeline keeps both pools and
//! the queues behind one mutex. Each slot has its own mutex for the
//! contents; the pool only ever `try_lock`s it, so pool operations never
//! wait on a caller still holding a slot guard.
//!
//! Handing a slot out stamps a fresh lease into the slot and recycles its
//! contents in the same critical section. Taking a slot back clears the
//! lease, which revokes every outstanding handle for it.

use crate::buffer::{PooledBuffer, Recycle, Slot, SlotCell};
use crate::error::{PipelineError, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Which of the two pools a buffer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferFamily {
    Input,
    Output,
}

impl fmt::Display for BufferFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferFamily::Input => f.write_str("input"),
            BufferFamily::Output => f.write_str("output"),
        }
    }
}

/// Ownership state of a single slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// On the free-list.
    Available,
    /// Handed to a producer under the given lease.
    CheckedOut(u64),
    /// Waiting in the input or output FIFO.
    Queued,
    /// Held by the decode worker.
    InFlight,
    /// Handed to a consumer under the given lease.
    ConsumerHeld(u64),
}

/// Per-bucket slot counts for one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolCounts {
    pub capacity: usize,
    pub available: usize,
    pub checked_out: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub consumer_held: usize,
}

impl PoolCounts {
    /// Sum over every bucket.
    pub fn total(&self) -> usize {
        self.available + self.checked_out + self.queued + self.in_flight + self.consumer_held
    }

    /// Returns `true` if the buckets account for exactly `capacity` slots.
    pub fn is_balanced(&self) -> bool {
        self.total() == self.capacity
    }
}

pub struct BufferPool<T> {
    family: BufferFamily,
    owner_id: u64,
    slots: Vec<SlotCell<T>>,
    states: Vec<SlotState>,
    free: Vec<usize>,
    next_lease: u64,
}

impl<T: Recycle> BufferPool<T> {
    /// Preallocate `capacity` slots using `make`.
    pub fn new(
        family: BufferFamily,
        owner_id: u64,
        capacity: usize,
        mut make: impl FnMut() -> T,
    ) -> Self {
        let slots = (0..capacity)
            .map(|_| Arc::new(Slot::new(make())))
            .collect();
        // Reverse so the first acquire hands out slot 0.
        let free = (0..capacity).rev().collect();

        Self {
            family,
            owner_id,
            slots,
            states: vec![SlotState::Available; capacity],
            free,
            next_lease: 0,
        }
    }

    pub fn family(&self) -> BufferFamily {
        self.family
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn state(&self, slot: usize) -> Option<SlotState> {
        self.states.get(slot).copied()
    }

    /// Storage of a slot handed out by this pool.
    pub(crate) fn cell(&self, slot: usize) -> SlotCell<T> {
        self.slots[slot].clone()
    }

    /// Pop a free slot for the worker. Never blocks.
    pub fn acquire(&mut self) -> Option<usize> {
        let slot = self.take_free(0)?;
        self.states[slot] = SlotState::InFlight;
        Some(slot)
    }

    /// Pop a free slot and hand it to a producer. Never blocks.
    pub fn checkout(&mut self) -> Option<PooledBuffer<T>> {
        let lease = self.issue_lease();
        let slot = self.take_free(lease)?;
        self.states[slot] = SlotState::CheckedOut(lease);
        Some(self.handle(slot, lease))
    }

    /// Hand a slot (normally just popped from the output queue) to a consumer.
    ///
    /// Queued slots have no live handles and the worker has finished with
    /// them, so nothing else can be touching the contents.
    pub fn hand_over(&mut self, slot: usize) -> PooledBuffer<T> {
        let lease = self.issue_lease();
        self.slots[slot].set_lease(lease);
        self.states[slot] = SlotState::ConsumerHeld(lease);
        self.handle(slot, lease)
    }

    /// Pop the most recently freed slot whose storage is not locked, stamp
    /// `lease` into it and recycle its contents.
    ///
    /// A slot still locked through a revoked handle is skipped and stays on
    /// the free-list until that guard is dropped.
    fn take_free(&mut self, lease: u64) -> Option<usize> {
        let position = self.free.iter().rposition(|&slot| {
            let cell = &self.slots[slot];
            let Some(mut data) = cell.data.try_lock() else {
                return false;
            };
            cell.set_lease(lease);
            data.recycle();
            true
        })?;
        Some(self.free.remove(position))
    }

    fn handle(&self, slot: usize, lease: u64) -> PooledBuffer<T> {
        PooledBuffer::new(
            self.owner_id,
            self.family,
            slot,
            lease,
            self.slots[slot].clone(),
        )
    }

    /// Return a slot to the free-list.
    ///
    /// Releasing a slot that is already available is rejected, so the
    /// free-list can never grow past capacity.
    pub fn release(&mut self, slot: usize) -> Result<()> {
        match self.states.get(slot) {
            Some(SlotState::Available) | None => Err(self.not_owned(slot)),
            Some(_) => {
                self.revoke(slot);
                self.states[slot] = SlotState::Available;
                self.free.push(slot);
                Ok(())
            }
        }
    }

    /// Move a slot between the non-free buckets. Leaving a caller-held
    /// state revokes that caller's handle.
    pub fn set_state(&mut self, slot: usize, state: SlotState) {
        debug_assert_ne!(state, SlotState::Available, "use release() to free a slot");
        let Some(current) = self.states.get(slot).copied() else {
            return;
        };
        if matches!(current, SlotState::CheckedOut(_) | SlotState::ConsumerHeld(_)) {
            self.revoke(slot);
        }
        self.states[slot] = state;
    }

    /// Check that `buffer` is a live producer lease on this pool.
    pub fn verify_checked_out(&self, buffer: &PooledBuffer<T>) -> Result<usize> {
        self.verify(buffer, SlotState::CheckedOut(buffer.lease()))
    }

    /// Check that `buffer` is a live consumer lease on this pool.
    pub fn verify_consumer_held(&self, buffer: &PooledBuffer<T>) -> Result<usize> {
        self.verify(buffer, SlotState::ConsumerHeld(buffer.lease()))
    }

    fn verify(&self, buffer: &PooledBuffer<T>, expected: SlotState) -> Result<usize> {
        let slot = buffer.slot();
        if buffer.pipeline_id() != self.owner_id || self.state(slot) != Some(expected) {
            return Err(self.not_owned(slot));
        }
        Ok(slot)
    }

    /// Return every producer-held slot to the free-list. Outstanding
    /// handles for those slots become stale.
    pub fn reclaim_checked_out(&mut self) -> usize {
        let mut reclaimed = 0;
        for slot in 0..self.states.len() {
            if let SlotState::CheckedOut(_) = self.states[slot] {
                self.revoke(slot);
                self.states[slot] = SlotState::Available;
                self.free.push(slot);
                reclaimed += 1;
            }
        }
        reclaimed
    }

    pub fn counts(&self) -> PoolCounts {
        let mut counts = PoolCounts {
            capacity: self.capacity(),
            ..Default::default()
        };
        for state in &self.states {
            match state {
                SlotState::Available => counts.available += 1,
                SlotState::CheckedOut(_) => counts.checked_out += 1,
                SlotState::Queued => counts.queued += 1,
                SlotState::InFlight => counts.in_flight += 1,
                SlotState::ConsumerHeld(_) => counts.consumer_held += 1,
            }
        }
        counts
    }

    fn issue_lease(&mut self) -> u64 {
        self.next_lease = self.next_lease.wrapping_add(1);
        if self.next_lease == 0 {
            self.next_lease = 1;
        }
        self.next_lease
    }

    /// Clear the slot's lease. Outstanding handles fail their next `lock()`.
    fn revoke(&self, slot: usize) {
        self.slots[slot].set_lease(0);
    }

    fn not_owned(&self, slot: usize) -> PipelineError {
        PipelineError::BufferNotOwned {
            family: self.family,
            slot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Recycle for Vec<u8> {
        fn recycle(&mut self) {
            self.clear();
        }
    }

    fn pool(capacity: usize) -> BufferPool<Vec<u8>> {
        BufferPool::new(BufferFamily::Input, 1, capacity, || Vec::with_capacity(8))
    }

    #[test]
    fn test_checkout_until_empty() {
        let mut pool = pool(3);
        let a = pool.checkout().unwrap();
        let b = pool.checkout().unwrap();
        let c = pool.checkout().unwrap();

        assert_eq!((a.slot(), b.slot(), c.slot()), (0, 1, 2));
        assert!(pool.checkout().is_none());
        assert!(pool.acquire().is_none());

        let counts = pool.counts();
        assert_eq!(counts.checked_out, 3);
        assert_eq!(counts.available, 0);
        assert!(counts.is_balanced());
    }

    #[test]
    fn test_release_rejects_available_slot() {
        let mut pool = pool(2);
        let slot = pool.acquire().unwrap();
        pool.release(slot).unwrap();

        let err = pool.release(slot).unwrap_err();
        assert_eq!(
            err,
            PipelineError::BufferNotOwned {
                family: BufferFamily::Input,
                slot
            }
        );
        assert_eq!(pool.available(), 2);
        assert!(pool.release(99).is_err());
    }

    #[test]
    fn test_verify_rejects_stale_lease() {
        let mut pool = pool(1);
        let first = pool.checkout().unwrap();
        assert_eq!(pool.verify_checked_out(&first).unwrap(), 0);

        assert_eq!(pool.reclaim_checked_out(), 1);
        assert!(pool.verify_checked_out(&first).is_err());

        // Same slot handed out again under a new lease.
        let second = pool.checkout().unwrap();
        assert_eq!(second.slot(), first.slot());
        assert!(pool.verify_checked_out(&first).is_err());
        assert!(pool.verify_checked_out(&second).is_ok());
    }

    #[test]
    fn test_verify_rejects_foreign_pool() {
        let mut ours = pool(1);
        let mut theirs: BufferPool<Vec<u8>> =
            BufferPool::new(BufferFamily::Input, 2, 1, Vec::new);

        let foreign = theirs.checkout().unwrap();
        let _own = ours.checkout().unwrap();
        assert!(ours.verify_checked_out(&foreign).is_err());
    }

    #[test]
    fn test_consumer_lease_is_distinct_from_checkout() {
        let mut pool: BufferPool<Vec<u8>> =
            BufferPool::new(BufferFamily::Output, 1, 2, Vec::new);
        let slot = pool.acquire().unwrap();
        pool.set_state(slot, SlotState::Queued);

        let handle = pool.hand_over(slot);
        assert!(pool.verify_checked_out(&handle).is_err());
        assert_eq!(pool.verify_consumer_held(&handle).unwrap(), slot);

        let counts = pool.counts();
        assert_eq!(counts.consumer_held, 1);
        assert_eq!(counts.available, 1);
        assert!(counts.is_balanced());
    }

    #[test]
    fn test_handles_share_slot_storage() {
        let mut pool = pool(1);
        let handle = pool.checkout().unwrap();
        handle.lock().unwrap().extend_from_slice(b"abc");

        let cell = pool.cell(handle.slot());
        assert_eq!(cell.data.lock().as_slice(), b"abc");
    }

    #[test]
    fn test_reclaimed_handle_cannot_lock() {
        let mut pool = pool(1);
        let stale = pool.checkout().unwrap();
        stale.lock().unwrap().extend_from_slice(b"old");

        pool.reclaim_checked_out();
        assert!(!stale.is_live());
        assert!(stale.lock().is_err());

        let fresh = pool.checkout().unwrap();
        assert_eq!(fresh.slot(), stale.slot());
        // Reissued storage starts out recycled.
        assert!(fresh.lock().unwrap().is_empty());
        fresh.lock().unwrap().extend_from_slice(b"new");
        assert!(stale.lock().is_err());
        assert_eq!(pool.cell(0).data.lock().as_slice(), b"new");
    }

    #[test]
    fn test_checkout_skips_slot_locked_by_stale_guard() {
        let mut pool = pool(2);
        let stale = pool.checkout().unwrap();
        let guard = stale.lock().unwrap();

        pool.reclaim_checked_out();
        assert_eq!(pool.available(), 2);

        let other = pool.checkout().unwrap();
        assert_ne!(other.slot(), stale.slot());
        assert!(pool.checkout().is_none());
        assert!(pool.acquire().is_none());

        drop(guard);
        let reissued = pool.checkout().unwrap();
        assert_eq!(reissued.slot(), stale.slot());
        assert!(stale.lock().is_err());
    }

    #[test]
    fn test_worker_states_revoke_handles() {
        let mut pool = pool(1);
        let handle = pool.checkout().unwrap();
        pool.set_state(handle.slot(), SlotState::Queued);
        assert!(handle.lock().is_err());

        let consumer = pool.hand_over(handle.slot());
        assert!(consumer.lock().is_ok());
        pool.release(consumer.slot()).unwrap();
        assert!(consumer.lock().is_err());
    }
}
