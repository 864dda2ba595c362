//! # Decode Pipeline Error Types
//!
//! Two layers of errors flow through the pipeline:
//!
//! - [`DecodeError`] is raised by the [`FrameDecoder`](crate::FrameDecoder)
//!   collaborator. It is fatal to the decode worker and is latched so that
//!   every later controller call replays it.
//! - [`PipelineError`] is what controller operations return: a replayed
//!   decode error, buffer misuse, or use after release.

use crate::pool::BufferFamily;
use thiserror::Error;

/// Errors reported by the codec collaborator.
///
/// `Clone` is required because the first error is kept by the pipeline and
/// handed to every subsequent caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The encoded sample is malformed.
    #[error("Corrupted sample: {0}")]
    Corrupted(String),

    /// The bitstream uses a feature the codec does not support.
    #[error("Unsupported bitstream: {0}")]
    Unsupported(String),

    /// The underlying codec library returned an error code.
    #[error("Codec error {code}: {message}")]
    Codec { code: i32, message: String },

    /// Decoder internal error (including a panic inside the decode call).
    #[error("Decoder internal error: {0}")]
    Internal(String),
}

/// Errors returned by [`DecodePipeline`](crate::DecodePipeline) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The decode worker hit a fatal error. Replayed until the pipeline is
    /// recreated.
    #[error("Decoder failed: {0}")]
    Decode(#[from] DecodeError),

    /// A buffer was queued or released that the caller does not currently
    /// own: it came from another pipeline, was already reclaimed by a flush,
    /// or is in the wrong state.
    #[error("{family} buffer in slot {slot} is not checked out by the caller")]
    BufferNotOwned { family: BufferFamily, slot: usize },

    /// The pipeline has been released; no further decoding will happen.
    #[error("Pipeline has been released")]
    Released,

    /// Pipeline configuration failed validation.
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// The OS refused to start the decode worker thread.
    #[error("Failed to spawn decode worker: {0}")]
    WorkerSpawn(String),
}

impl PipelineError {
    /// Returns `true` if the pipeline can never make progress again and
    /// must be recreated.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Decode(_) | PipelineError::Released)
    }

    /// Returns `true` if this error reports a programming error on the
    /// caller's side rather than a runtime condition.
    pub fn is_misuse(&self) -> bool {
        matches!(self, PipelineError::BufferNotOwned { .. })
    }

    /// The replayed decoder error, if this is one.
    pub fn decode_error(&self) -> Option<&DecodeError> {
        match self {
            PipelineError::Decode(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_converts_into_pipeline_error() {
        let err: PipelineError = DecodeError::Corrupted("bad frame header".into()).into();
        assert!(err.is_fatal());
        assert!(!err.is_misuse());
        assert_eq!(
            err.decode_error(),
            Some(&DecodeError::Corrupted("bad frame header".into()))
        );
    }

    #[test]
    fn test_misuse_is_not_fatal() {
        let err = PipelineError::BufferNotOwned {
            family: BufferFamily::Input,
            slot: 3,
        };
        assert!(err.is_misuse());
        assert!(!err.is_fatal());
        assert_eq!(
            err.to_string(),
            "input buffer in slot 3 is not checked out by the caller"
        );
    }

    #[test]
    fn test_codec_error_display() {
        let err = DecodeError::Codec {
            code: -7,
            message: "VPX_CODEC_CORRUPT_FRAME".into(),
        };
        assert_eq!(err.to_string(), "Codec error -7: VPX_CODEC_CORRUPT_FRAME");
        assert!(PipelineError::Released.is_fatal());
    }
}
