//! # Reusable Pipeline Buffers
//!
//! Each pipeline preallocates a fixed set of input and output buffers and
//! recycles them for its whole lifetime. Callers never own buffer storage
//! directly; they hold a [`PooledBuffer`] handle naming a pool slot and lock
//! the slot to read or write its contents.
//!
//! Each slot stores the lease of its current holder next to the contents.
//! Locking through a handle whose lease has been revoked (for example by a
//! flush) fails instead of reaching the storage a new holder now owns.
//!
//! ## Usage
//!
//! ```rust,no_run
//! # use core_decode::DecodePipeline;
//! # fn feed(pipeline: &DecodePipeline) -> core_decode::Result<()> {
//! if let Some(buffer) = pipeline.dequeue_input()? {
//!     {
//!         let mut input = buffer.lock()?;
//!         input.set_payload(&[0x82, 0x49, 0x83]);
//!         input.timestamp_us = 33_333;
//!     }
//!     pipeline.queue_input(buffer)?;
//! }
//! # Ok(())
//! # }
//! ```

use bytes::BytesMut;
use crate::error::{PipelineError, Result};
use crate::pool::BufferFamily;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// Flags
// ============================================================================

/// Per-buffer flag set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BufferFlags(u32);

impl BufferFlags {
    /// No flags set.
    pub const NONE: BufferFlags = BufferFlags(0);
    /// The last buffer of the stream. Input buffers carrying this flag are
    /// not decoded; the matching output buffer is marked instead.
    pub const END_OF_STREAM: BufferFlags = BufferFlags(1 << 2);
    /// The input must be decoded but its output must never reach the
    /// consumer.
    pub const DECODE_ONLY: BufferFlags = BufferFlags(1 << 31);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: BufferFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: BufferFlags) {
        self.0 &= !other.0;
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn is_end_of_stream(self) -> bool {
        self.contains(Self::END_OF_STREAM)
    }

    pub const fn is_decode_only(self) -> bool {
        self.contains(Self::DECODE_ONLY)
    }
}

impl BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: BufferFlags) {
        self.0 |= rhs.0;
    }
}

// ============================================================================
// Output Mode
// ============================================================================

/// Pixel layout the codec should write decoded frames in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Decode without producing pixel data (e.g. rendering to a surface).
    None,
    /// Planar YUV 4:2:0.
    #[default]
    Yuv,
    /// Packed RGB.
    Rgb,
}

// ============================================================================
// Buffer Contents
// ============================================================================

/// Contents of an input buffer: one encoded sample.
#[derive(Debug, Default)]
pub struct InputData {
    /// Encoded sample bytes. Capacity is preallocated and kept across reuse.
    pub payload: BytesMut,
    pub flags: BufferFlags,
    /// Presentation timestamp, carried over to the output buffer.
    pub timestamp_us: i64,
    pub width: u32,
    pub height: u32,
}

impl InputData {
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            payload: BytesMut::with_capacity(bytes),
            ..Default::default()
        }
    }

    /// Clear everything except the allocated payload capacity.
    pub fn reset(&mut self) {
        self.payload.clear();
        self.flags.clear();
        self.timestamp_us = 0;
        self.width = 0;
        self.height = 0;
    }

    /// Replace the payload with `bytes`.
    pub fn set_payload(&mut self, bytes: &[u8]) {
        self.payload.clear();
        self.payload.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Contents of an output buffer: one decoded frame.
#[derive(Debug, Default)]
pub struct OutputData {
    /// Decoded frame bytes in the layout given by `mode`.
    pub frame: BytesMut,
    pub mode: OutputMode,
    pub timestamp_us: i64,
    pub flags: BufferFlags,
    pub width: u32,
    pub height: u32,
}

impl OutputData {
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            frame: BytesMut::with_capacity(bytes),
            ..Default::default()
        }
    }

    pub fn reset(&mut self) {
        self.frame.clear();
        self.mode = OutputMode::default();
        self.timestamp_us = 0;
        self.flags.clear();
        self.width = 0;
        self.height = 0;
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.is_end_of_stream()
    }
}

/// Buffer contents that can be wiped for reuse while keeping allocations.
pub trait Recycle {
    fn recycle(&mut self);
}

impl Recycle for InputData {
    fn recycle(&mut self) {
        self.reset();
    }
}

impl Recycle for OutputData {
    fn recycle(&mut self) {
        self.reset();
    }
}

// ============================================================================
// Slots
// ============================================================================

/// Storage for one pool slot: the contents plus the lease of whoever may
/// currently touch them. A lease of `0` means no caller holds the slot.
///
/// The lease is only changed by the pool under the pipeline lock. It is
/// stamped while holding `data` so a slot is never reissued under a live
/// guard, and cleared without `data` so revoking never waits.
#[derive(Debug)]
pub(crate) struct Slot<T> {
    lease: AtomicU64,
    pub(crate) data: Mutex<T>,
}

impl<T> Slot<T> {
    pub(crate) fn new(data: T) -> Self {
        Self {
            lease: AtomicU64::new(0),
            data: Mutex::new(data),
        }
    }

    pub(crate) fn lease(&self) -> u64 {
        self.lease.load(Ordering::Acquire)
    }

    pub(crate) fn set_lease(&self, lease: u64) {
        self.lease.store(lease, Ordering::Release);
    }
}

pub(crate) type SlotCell<T> = Arc<Slot<T>>;

// ============================================================================
// Handles
// ============================================================================

/// Move-only handle to a pool slot checked out by a caller.
///
/// The handle is not `Clone`, so a buffer can be handed back to the pipeline
/// at most once. Dropping a handle without handing it back leaves the slot
/// checked out until the next flush reclaims it. Once reclaimed, the handle
/// is stale and [`lock`](Self::lock) refuses it.
pub struct PooledBuffer<T> {
    pipeline_id: u64,
    family: BufferFamily,
    slot: usize,
    lease: u64,
    cell: SlotCell<T>,
}

/// Handle to an input buffer obtained from `dequeue_input`.
pub type InputBuffer = PooledBuffer<InputData>;

/// Handle to an output buffer obtained from `dequeue_output`.
pub type OutputBuffer = PooledBuffer<OutputData>;

impl<T> PooledBuffer<T> {
    pub(crate) fn new(
        pipeline_id: u64,
        family: BufferFamily,
        slot: usize,
        lease: u64,
        cell: SlotCell<T>,
    ) -> Self {
        Self {
            pipeline_id,
            family,
            slot,
            lease,
            cell,
        }
    }

    /// Pool slot this handle refers to.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Lock the slot's contents.
    ///
    /// Fails with [`PipelineError::BufferNotOwned`] once the slot has been
    /// taken back from this handle. Drop the guard before handing the buffer
    /// back to the pipeline.
    pub fn lock(&self) -> Result<MutexGuard<'_, T>> {
        let guard = self.cell.data.lock();
        if !self.is_live() {
            return Err(PipelineError::BufferNotOwned {
                family: self.family,
                slot: self.slot,
            });
        }
        Ok(guard)
    }

    /// Returns `true` while the slot is still leased to this handle.
    pub fn is_live(&self) -> bool {
        self.cell.lease() == self.lease
    }

    pub(crate) fn pipeline_id(&self) -> u64 {
        self.pipeline_id
    }

    pub(crate) fn lease(&self) -> u64 {
        self.lease
    }
}

impl<T> fmt::Debug for PooledBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("pipeline_id", &self.pipeline_id)
            .field("family", &self.family)
            .field("slot", &self.slot)
            .field("lease", &self.lease)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_combine_and_clear() {
        let mut flags = BufferFlags::END_OF_STREAM | BufferFlags::DECODE_ONLY;
        assert!(flags.is_end_of_stream());
        assert!(flags.is_decode_only());

        flags.remove(BufferFlags::END_OF_STREAM);
        assert!(!flags.is_end_of_stream());
        assert!(flags.is_decode_only());

        flags.clear();
        assert!(flags.is_empty());
        assert_eq!(flags, BufferFlags::NONE);
    }

    #[test]
    fn test_input_reset_keeps_capacity() {
        let mut input = InputData::with_capacity(4096);
        input.set_payload(&[1, 2, 3, 4]);
        input.flags.insert(BufferFlags::DECODE_ONLY);
        input.timestamp_us = 1_000;
        input.width = 640;

        input.reset();

        assert!(input.is_empty());
        assert!(input.flags.is_empty());
        assert_eq!(input.timestamp_us, 0);
        assert_eq!(input.width, 0);
        assert!(input.payload.capacity() >= 4096);
    }

    #[test]
    fn test_output_reset_restores_default_mode() {
        let mut output = OutputData::with_capacity(16);
        output.frame.extend_from_slice(&[9; 16]);
        output.mode = OutputMode::Rgb;
        output.flags.insert(BufferFlags::END_OF_STREAM);

        output.reset();

        assert!(output.frame.is_empty());
        assert_eq!(output.mode, OutputMode::Yuv);
        assert!(!output.is_end_of_stream());
    }

    #[test]
    fn test_output_mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&OutputMode::Rgb).unwrap(), "\"rgb\"");
        let mode: OutputMode = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(mode, OutputMode::None);
    }

    #[test]
    fn test_handle_debug_omits_contents() {
        let cell = Arc::new(Slot::new(InputData::default()));
        let handle = PooledBuffer::new(7, BufferFamily::Input, 2, 11, cell);
        let debug = format!("{:?}", handle);
        assert!(debug.contains("slot: 2"));
        assert!(debug.contains("lease: 11"));
        assert!(!debug.contains("payload"));
    }

    #[test]
    fn test_lock_rejects_revoked_lease() {
        let cell = Arc::new(Slot::new(InputData::default()));
        cell.set_lease(3);
        let handle = PooledBuffer::new(1, BufferFamily::Input, 0, 3, cell.clone());

        handle.lock().unwrap().set_payload(b"live");
        assert!(handle.is_live());

        cell.set_lease(4);
        let err = handle.lock().unwrap_err();
        assert_eq!(
            err,
            PipelineError::BufferNotOwned {
                family: BufferFamily::Input,
                slot: 0
            }
        );
        assert!(!handle.is_live());
        assert_eq!(&cell.data.lock().payload[..], b"live");
    }
}
