//! # Decode Worker
//!
//! The single background thread that drains queued inputs through the
//! decoder. State machine:
//!
//! ```text
//! Waiting -> Decoding -> { Publishing | Discarding } -> Waiting
//!                     \-> Error (terminal)
//! Waiting -> Released (terminal)
//! ```
//!
//! `Waiting` is the only place the worker blocks. The decoder runs with the
//! pipeline lock released.

use crate::buffer::{BufferFlags, InputData, OutputData, OutputMode, SlotCell};
use crate::config::WorkerState;
use crate::error::DecodeError;
use crate::pipeline::{PipelineState, Shared};
use crate::pool::SlotState;
use crate::traits::{DecodeOutcome, FrameDecoder};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info_span, trace, warn};

/// One unit of work taken off the input queue.
struct Job {
    input_slot: usize,
    output_slot: usize,
    input: SlotCell<InputData>,
    output: SlotCell<OutputData>,
    generation: u64,
    mode: OutputMode,
}

/// What happened to a job once the decoder returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Frame,
    NoFrame,
    EndOfStream,
}

/// Outcome of the unlocked half of a job.
struct DecodeReport {
    result: Result<Completion, DecodeError>,
    decode_only: bool,
    /// `None` when the decoder was not called.
    elapsed: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
enum Discard {
    Stale,
    DecodeOnly,
    NoFrame,
}

pub(crate) struct DecodeWorker<D> {
    pipeline_id: u64,
    shared: Arc<Shared>,
    decoder: D,
}

impl<D: FrameDecoder> DecodeWorker<D> {
    pub(crate) fn new(pipeline_id: u64, shared: Arc<Shared>, decoder: D) -> Self {
        Self {
            pipeline_id,
            shared,
            decoder,
        }
    }

    pub(crate) fn spawn(self, name: &str) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        let span = info_span!("decode_worker", pipeline = self.pipeline_id);
        let _enter = span.enter();
        debug!("Decode worker started");

        while let Some(job) = self.next_job() {
            if !self.process(job) {
                break;
            }
        }

        self.shutdown();
    }

    /// Block until there is work, or return `None` once released.
    fn next_job(&self) -> Option<Job> {
        let mut state = self.shared.state.lock();
        loop {
            if state.released {
                return None;
            }

            if state.has_work() {
                if let Some(job) = Self::take_job(&mut state) {
                    state.worker_state = WorkerState::Decoding;
                    return Some(job);
                }
            }

            state.worker_state = WorkerState::Waiting;
            trace!("Waiting for work");
            self.shared.work_ready.wait(&mut state);
        }
    }

    fn take_job(state: &mut PipelineState) -> Option<Job> {
        let input_slot = state.queued_input.pop_front()?;
        let Some(output_slot) = state.output.acquire() else {
            state.queued_input.push_front(input_slot);
            return None;
        };
        state.input.set_state(input_slot, SlotState::InFlight);

        Some(Job {
            input_slot,
            output_slot,
            input: state.input.cell(input_slot),
            output: state.output.cell(output_slot),
            generation: state.flush_generation,
            mode: state.output_mode,
        })
    }

    /// Run one job to completion. Returns `false` if the worker must stop.
    fn process(&mut self, job: Job) -> bool {
        let report = self.decode(&job);

        let mut state = self.shared.state.lock();
        if let Some(elapsed) = report.elapsed {
            state.stats.record_decode_time(elapsed);
        }

        let completion = match report.result {
            Ok(completion) => completion,
            Err(err) => {
                error!(slot = job.input_slot, "Decoding error: {}", err);
                state.latch.latch(err);
                state.worker_state = WorkerState::Error;
                return false;
            }
        };

        let stale = job.generation != state.flush_generation;
        let discard = if stale {
            Some(Discard::Stale)
        } else if report.decode_only {
            Some(Discard::DecodeOnly)
        } else if completion == Completion::NoFrame {
            Some(Discard::NoFrame)
        } else {
            None
        };

        match completion {
            Completion::Frame => state.stats.frames_decoded += 1,
            Completion::NoFrame => {}
            Completion::EndOfStream => state.stats.end_of_stream_seen += 1,
        }

        if let Err(e) = state.input.release(job.input_slot) {
            warn!(slot = job.input_slot, "Input slot could not be recycled: {}", e);
        }

        match discard {
            Some(reason) => {
                state.worker_state = WorkerState::Discarding;
                match reason {
                    Discard::Stale => state.stats.frames_dropped_flush += 1,
                    Discard::DecodeOnly => state.stats.frames_dropped_decode_only += 1,
                    Discard::NoFrame => state.stats.frames_without_output += 1,
                }
                if let Err(e) = state.output.release(job.output_slot) {
                    warn!(slot = job.output_slot, "Output slot could not be recycled: {}", e);
                }
                trace!(slot = job.output_slot, ?reason, "Output discarded");
            }
            None => {
                state.worker_state = WorkerState::Publishing;
                state.output.set_state(job.output_slot, SlotState::Queued);
                state.queued_output.push_back(job.output_slot);
                state.stats.frames_published += 1;
                trace!(slot = job.output_slot, "Output published");
            }
        }

        true
    }

    /// Decode outside the pipeline lock.
    ///
    /// Both slots are held by the worker alone: no caller handle carries
    /// their lease and the output was recycled when it was acquired.
    fn decode(&mut self, job: &Job) -> DecodeReport {
        let input = job.input.data.lock();
        let mut output = job.output.data.lock();

        output.mode = job.mode;
        output.timestamp_us = input.timestamp_us;
        output.width = input.width;
        output.height = input.height;

        let decode_only = input.flags.is_decode_only();

        if input.flags.is_end_of_stream() {
            output.flags.insert(BufferFlags::END_OF_STREAM);
            return DecodeReport {
                result: Ok(Completion::EndOfStream),
                decode_only,
                elapsed: None,
            };
        }

        let started = Instant::now();
        let decoder = &mut self.decoder;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            decoder.decode(&input.payload, &mut output)
        }))
        .unwrap_or_else(|payload| Err(DecodeError::Internal(panic_message(payload))));
        let elapsed = started.elapsed();

        DecodeReport {
            result: result.map(|outcome| match outcome {
                DecodeOutcome::Frame => Completion::Frame,
                DecodeOutcome::NoFrame => Completion::NoFrame,
            }),
            decode_only,
            elapsed: Some(elapsed),
        }
    }

    fn shutdown(mut self) {
        let decoder = &mut self.decoder;
        if panic::catch_unwind(AssertUnwindSafe(|| decoder.close())).is_err() {
            error!("Decoder panicked while closing");
        }

        let mut state = self.shared.state.lock();
        if state.worker_state != WorkerState::Error {
            state.worker_state = WorkerState::Released;
        }
        debug!(state = ?state.worker_state, "Decode worker stopped");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("decoder panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("decoder panicked: {}", message)
    } else {
        "decoder panicked".to_string()
    }
}
