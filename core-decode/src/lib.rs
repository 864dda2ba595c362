//! # Core Decode Module
//!
//! Buffered decode pipeline: decouples a single blocking codec call from the
//! threads that feed encoded samples and the threads that drain decoded
//! frames.
//!
//! ## Overview
//!
//! - **Buffers** ([`buffer`]): reusable input/output storage and move-only
//!   handles to pool slots.
//! - **Pools** ([`pool`]): fixed-capacity arenas with a free-list and
//!   per-slot ownership tracking.
//! - **Decoder** ([`traits`]): the codec collaborator driven by the worker.
//! - **Pipeline** ([`pipeline`]): non-blocking controller with flush,
//!   release and a latched first error.
//!
//! ## Data Flow
//!
//! ```text
//! producer: dequeue_input -> fill -> queue_input ──┐
//!                                                  ▼
//!                          worker: decode(input, output) ── publish / discard
//!                                                  │
//! consumer: dequeue_output -> read -> release_output ◄┘
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod latch;
pub mod pipeline;
pub mod pool;
pub mod traits;
mod worker;

pub use buffer::{
    BufferFlags, InputBuffer, InputData, OutputBuffer, OutputData, OutputMode, PooledBuffer,
    Recycle,
};
pub use config::{PipelineConfig, PipelineStats, WorkerState};
pub use error::{DecodeError, PipelineError, Result};
pub use latch::ErrorLatch;
pub use pipeline::{DecodePipeline, PipelineSnapshot};
pub use pool::{BufferFamily, BufferPool, PoolCounts, SlotState};
pub use traits::{DecodeOutcome, FrameDecoder};
