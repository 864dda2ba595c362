//! # Decode Pipeline Controller
//!
//! Public, non-blocking operations for producers and consumers, plus the
//! state they share with the decode worker.
//!
//! ## Design
//!
//! - **One lock**: both pools, both FIFOs, the error latch, the flush
//!   generation and the released flag live in a single [`PipelineState`]
//!   behind one `parking_lot::Mutex`.
//! - **One condvar**: only the worker ever waits on it. Producers and
//!   consumers return `Ok(None)` instead of blocking.
//! - **Flush generation**: incremented by every flush. The worker samples it
//!   when it starts a decode and drops the result if it changed.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use core_decode::{DecodePipeline, FrameDecoder, PipelineConfig};
//!
//! fn run(decoder: impl FrameDecoder, samples: &[Vec<u8>]) -> core_decode::Result<()> {
//!     let pipeline = DecodePipeline::new(PipelineConfig::default(), decoder)?;
//!
//!     for sample in samples {
//!         if let Some(buffer) = pipeline.dequeue_input()? {
//!             buffer.lock()?.set_payload(sample);
//!             pipeline.queue_input(buffer)?;
//!         }
//!         while let Some(frame) = pipeline.dequeue_output()? {
//!             println!("frame @ {}us", frame.lock()?.timestamp_us);
//!             pipeline.release_output(frame)?;
//!         }
//!     }
//!
//!     pipeline.release();
//!     Ok(())
//! }
//! ```

use crate::buffer::{InputBuffer, InputData, OutputBuffer, OutputData, OutputMode};
use crate::config::{PipelineConfig, PipelineStats, WorkerState};
use crate::error::{DecodeError, PipelineError, Result};
use crate::latch::ErrorLatch;
use crate::pool::{BufferFamily, BufferPool, PoolCounts, SlotState};
use crate::traits::FrameDecoder;
use crate::worker::DecodeWorker;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, instrument, warn};

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Shared State
// ============================================================================

/// Everything guarded by the pipeline lock.
pub(crate) struct PipelineState {
    pub(crate) input: BufferPool<InputData>,
    pub(crate) output: BufferPool<OutputData>,
    pub(crate) queued_input: VecDeque<usize>,
    pub(crate) queued_output: VecDeque<usize>,
    pub(crate) latch: ErrorLatch,
    pub(crate) released: bool,
    pub(crate) flush_generation: u64,
    pub(crate) output_mode: OutputMode,
    pub(crate) worker_state: WorkerState,
    pub(crate) stats: PipelineStats,
}

impl PipelineState {
    /// The worker can make progress: an input is queued and an output
    /// buffer is free to decode into.
    pub(crate) fn has_work(&self) -> bool {
        !self.queued_input.is_empty() && self.output.available() > 0
    }

    /// Latched error first, then released.
    fn check(&self) -> Result<()> {
        self.latch.check()?;
        if self.released {
            return Err(PipelineError::Released);
        }
        Ok(())
    }
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<PipelineState>,
    pub(crate) work_ready: Condvar,
}

impl Shared {
    /// Wake the worker only if it could actually do something.
    fn maybe_notify(&self, state: &PipelineState) {
        if state.has_work() {
            self.work_ready.notify_one();
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Consistent view of buffer ownership, taken under the pipeline lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineSnapshot {
    pub input: PoolCounts,
    pub output: PoolCounts,
    pub worker_state: WorkerState,
    pub flush_generation: u64,
}

impl PipelineSnapshot {
    /// Every slot of both pools is in exactly one bucket.
    pub fn is_balanced(&self) -> bool {
        self.input.is_balanced() && self.output.is_balanced()
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Buffered decode pipeline with a single background decode worker.
///
/// All methods take `&self`; share the pipeline across producer and
/// consumer threads with an `Arc`.
pub struct DecodePipeline {
    id: u64,
    config: PipelineConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DecodePipeline {
    /// Validate `config`, preallocate both pools and start the worker.
    #[instrument(skip(config, decoder), fields(input_buffers = config.input_buffers, output_buffers = config.output_buffers))]
    pub fn new<D: FrameDecoder>(config: PipelineConfig, decoder: D) -> Result<Self> {
        config.validate().map_err(PipelineError::InvalidConfig)?;

        let id = NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed);
        let input_bytes = config.input_buffer_bytes;
        let output_bytes = config.output_buffer_bytes;

        let state = PipelineState {
            input: BufferPool::new(BufferFamily::Input, id, config.input_buffers, || {
                InputData::with_capacity(input_bytes)
            }),
            output: BufferPool::new(BufferFamily::Output, id, config.output_buffers, || {
                OutputData::with_capacity(output_bytes)
            }),
            queued_input: VecDeque::with_capacity(config.input_buffers),
            queued_output: VecDeque::with_capacity(config.output_buffers),
            latch: ErrorLatch::new(),
            released: false,
            flush_generation: 0,
            output_mode: config.output_mode,
            worker_state: WorkerState::Waiting,
            stats: PipelineStats::default(),
        };

        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            work_ready: Condvar::new(),
        });

        let handle = DecodeWorker::new(id, shared.clone(), decoder)
            .spawn(&config.worker_thread_name)
            .map_err(|e| PipelineError::WorkerSpawn(e.to_string()))?;

        info!(pipeline = id, "Decode pipeline started");

        Ok(Self {
            id,
            config,
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Take a free input buffer, or `Ok(None)` if all are in use.
    ///
    /// The buffer comes back empty: no payload, no flags, zero timestamp.
    /// A slot still locked through a handle revoked by [`flush`](Self::flush)
    /// is not handed out until that guard is dropped.
    pub fn dequeue_input(&self) -> Result<Option<InputBuffer>> {
        let mut state = self.shared.state.lock();
        state.check()?;
        Ok(state.input.checkout())
    }

    /// Submit a filled input buffer for decoding, in FIFO order.
    ///
    /// Fails with [`PipelineError::BufferNotOwned`] if `buffer` was not
    /// checked out from this pipeline, or was reclaimed by a flush since.
    pub fn queue_input(&self, buffer: InputBuffer) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.check()?;

        let slot = state.input.verify_checked_out(&buffer).map_err(|e| {
            warn!(pipeline = self.id, slot = buffer.slot(), "Rejected input buffer not checked out");
            e
        })?;

        state.input.set_state(slot, SlotState::Queued);
        state.queued_input.push_back(slot);
        state.stats.inputs_queued += 1;
        self.shared.maybe_notify(&state);
        Ok(())
    }

    /// Take the oldest decoded frame, or `Ok(None)` if none is ready.
    pub fn dequeue_output(&self) -> Result<Option<OutputBuffer>> {
        let mut state = self.shared.state.lock();
        state.check()?;

        let Some(slot) = state.queued_output.pop_front() else {
            return Ok(None);
        };
        Ok(Some(state.output.hand_over(slot)))
    }

    /// Give a consumed output buffer back to the pool.
    pub fn release_output(&self, buffer: OutputBuffer) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.check()?;

        let slot = state.output.verify_consumer_held(&buffer).map_err(|e| {
            warn!(pipeline = self.id, slot = buffer.slot(), "Rejected output buffer not held by consumer");
            e
        })?;

        state.output.release(slot)?;
        self.shared.maybe_notify(&state);
        Ok(())
    }

    /// Drop all pending work.
    ///
    /// Reclaims every checked-out input, queued input and queued output.
    /// A decode already running is not interrupted; its result is discarded.
    /// Output buffers held by consumers are left alone. Never fails.
    pub fn flush(&self) {
        let mut state = self.shared.state.lock();
        state.flush_generation += 1;

        let PipelineState {
            input,
            output,
            queued_input,
            queued_output,
            ..
        } = &mut *state;

        let queued_inputs = queued_input.len();
        let queued_outputs = queued_output.len();
        for slot in queued_input.drain(..) {
            if let Err(e) = input.release(slot) {
                warn!(pipeline = self.id, slot, "Queued input could not be reclaimed: {}", e);
            }
        }
        for slot in queued_output.drain(..) {
            if let Err(e) = output.release(slot) {
                warn!(pipeline = self.id, slot, "Queued output could not be reclaimed: {}", e);
            }
        }
        let checked_out = input.reclaim_checked_out();

        state.stats.flushes += 1;
        debug!(
            pipeline = self.id,
            generation = state.flush_generation,
            queued_inputs,
            queued_outputs,
            checked_out,
            "Pipeline flushed"
        );
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// Once this returns the decoder has been closed and will never be
    /// called again. Safe to call more than once and from several threads.
    pub fn release(&self) {
        {
            let mut state = self.shared.state.lock();
            if !state.released {
                state.released = true;
                debug!(pipeline = self.id, "Releasing decode pipeline");
            }
            self.shared.work_ready.notify_all();
        }

        // Held across the join so concurrent callers also wait for exit.
        let mut worker = self.worker.lock();
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                warn!(pipeline = self.id, "Decode worker panicked during shutdown");
            }
            info!(pipeline = self.id, "Decode pipeline released");
        }
    }

    /// Output mode for decodes started after this call.
    pub fn set_output_mode(&self, mode: OutputMode) {
        self.shared.state.lock().output_mode = mode;
    }

    pub fn output_mode(&self) -> OutputMode {
        self.shared.state.lock().output_mode
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        let state = self.shared.state.lock();
        PipelineSnapshot {
            input: state.input.counts(),
            output: state.output.counts(),
            worker_state: state.worker_state,
            flush_generation: state.flush_generation,
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.state.lock().stats.clone()
    }

    pub fn worker_state(&self) -> WorkerState {
        self.shared.state.lock().worker_state
    }

    /// The latched decode error, if the worker has failed.
    pub fn latched_error(&self) -> Option<DecodeError> {
        self.shared.state.lock().latch.get().cloned()
    }

    /// Returns `true` once the worker thread has terminated, for any reason.
    pub fn worker_finished(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    pub fn is_released(&self) -> bool {
        self.shared.state.lock().released
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl Drop for DecodePipeline {
    fn drop(&mut self) {
        self.release();
    }
}
