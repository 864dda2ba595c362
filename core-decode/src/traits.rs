//! # Decoder Collaborator
//!
//! The pipeline does not decode anything itself. It drives a [`FrameDecoder`]
//! supplied by the host: an opaque, possibly slow call that turns one encoded
//! sample into at most one decoded frame.
//!
//! ## Threading Model
//!
//! The decoder is moved onto the pipeline's worker thread at construction and
//! is only ever called from there, so it must be `Send` but need not be
//! `Sync`. No pipeline lock is held while [`FrameDecoder::decode`] runs.
//!
//! ## Example
//!
//! ```rust
//! use core_decode::{DecodeError, DecodeOutcome, FrameDecoder, OutputData};
//!
//! /// Treats every sample as an already-decoded frame.
//! struct Passthrough;
//!
//! impl FrameDecoder for Passthrough {
//!     fn decode(
//!         &mut self,
//!         payload: &[u8],
//!         output: &mut OutputData,
//!     ) -> Result<DecodeOutcome, DecodeError> {
//!         if payload.is_empty() {
//!             return Ok(DecodeOutcome::NoFrame);
//!         }
//!         output.frame.extend_from_slice(payload);
//!         Ok(DecodeOutcome::Frame)
//!     }
//! }
//! ```

use crate::buffer::OutputData;
use crate::error::DecodeError;

/// Result of a successful decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// `output` holds a frame ready for the consumer.
    Frame,
    /// The sample was consumed but produced no displayable frame.
    NoFrame,
}

/// Codec driven by the decode worker.
pub trait FrameDecoder: Send + 'static {
    /// Decode one sample into `output`.
    ///
    /// `output` has been reset and stamped with the output mode and
    /// timestamp for this decode. An error is fatal: the pipeline latches it
    /// and stops decoding.
    fn decode(&mut self, payload: &[u8], output: &mut OutputData)
        -> Result<DecodeOutcome, DecodeError>;

    /// Release codec resources. Called exactly once, on the worker thread,
    /// when the worker exits.
    fn close(&mut self) {}
}

impl<D: FrameDecoder + ?Sized> FrameDecoder for Box<D> {
    fn decode(
        &mut self,
        payload: &[u8],
        output: &mut OutputData,
    ) -> Result<DecodeOutcome, DecodeError> {
        (**self).decode(payload, output)
    }

    fn close(&mut self) {
        (**self).close()
    }
}
