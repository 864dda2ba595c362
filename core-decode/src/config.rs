//! # Pipeline Configuration
//!
//! Configuration, worker state and statistics types for the decode pipeline.

use crate::buffer::OutputMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Decode pipeline configuration.
///
/// Controls pool sizes, per-buffer preallocation and the worker thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of input buffers in the input pool.
    ///
    /// Default: 16.
    #[serde(default = "default_input_buffers")]
    pub input_buffers: usize,

    /// Number of output buffers in the output pool.
    ///
    /// Bounds how many decoded frames can wait for the consumer before the
    /// worker stops decoding.
    ///
    /// Default: 16.
    #[serde(default = "default_output_buffers")]
    pub output_buffers: usize,

    /// Payload capacity preallocated for each input buffer (in bytes).
    ///
    /// Larger samples still fit; the payload grows on demand.
    ///
    /// Default: 768 KB.
    #[serde(default = "default_input_buffer_bytes")]
    pub input_buffer_bytes: usize,

    /// Frame capacity preallocated for each output buffer (in bytes).
    ///
    /// Default: 0 (grow on first decode, frame size is unknown up front).
    #[serde(default)]
    pub output_buffer_bytes: usize,

    /// Output mode used until [`set_output_mode`] changes it.
    ///
    /// [`set_output_mode`]: crate::DecodePipeline::set_output_mode
    #[serde(default)]
    pub output_mode: OutputMode,

    /// Name of the decode worker thread.
    ///
    /// Default: `"decode-worker"`.
    #[serde(default = "default_worker_thread_name")]
    pub worker_thread_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_buffers: default_input_buffers(),
            output_buffers: default_output_buffers(),
            input_buffer_bytes: default_input_buffer_bytes(),
            output_buffer_bytes: 0,
            output_mode: OutputMode::default(),
            worker_thread_name: default_worker_thread_name(),
        }
    }
}

impl PipelineConfig {
    /// Create a configuration for memory-constrained hosts.
    ///
    /// - Few buffers in flight
    /// - Small input preallocation
    pub fn low_memory() -> Self {
        Self {
            input_buffers: 4,
            output_buffers: 4,
            input_buffer_bytes: 128 * 1024, // 128 KB
            ..Default::default()
        }
    }

    /// Create a configuration that tolerates a bursty consumer.
    ///
    /// - Deep pools on both sides
    /// - Room for large keyframes without regrowth
    pub fn high_throughput() -> Self {
        Self {
            input_buffers: 32,
            output_buffers: 32,
            input_buffer_bytes: 2 * 1024 * 1024, // 2 MB
            ..Default::default()
        }
    }

    pub fn with_buffers(mut self, input: usize, output: usize) -> Self {
        self.input_buffers = input;
        self.output_buffers = output;
        self
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    pub fn with_worker_thread_name(mut self, name: impl Into<String>) -> Self {
        self.worker_thread_name = name.into();
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.input_buffers == 0 {
            return Err("input_buffers must be > 0".to_string());
        }

        if self.output_buffers == 0 {
            return Err("output_buffers must be > 0".to_string());
        }

        if self.worker_thread_name.is_empty() {
            return Err("worker_thread_name cannot be empty".to_string());
        }

        if self.worker_thread_name.contains('\0') {
            return Err("worker_thread_name cannot contain NUL bytes".to_string());
        }

        Ok(())
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_input_buffers() -> usize {
    16
}

fn default_output_buffers() -> usize {
    16
}

fn default_input_buffer_bytes() -> usize {
    768 * 1024
}

fn default_worker_thread_name() -> String {
    "decode-worker".to_string()
}

// ============================================================================
// Worker State
// ============================================================================

/// Current state of the decode worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Parked until there is work or the pipeline is released.
    Waiting,
    /// Inside the decoder call, no lock held.
    Decoding,
    /// Appending a decoded frame to the output queue.
    Publishing,
    /// Recycling an output that must not reach the consumer.
    Discarding,
    /// A decode error was latched; the worker has stopped.
    Error,
    /// The pipeline was released and the worker has exited.
    Released,
}

impl WorkerState {
    /// Returns `true` once the worker will never decode again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error | Self::Released)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters describing pipeline activity since construction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    /// Input buffers accepted by `queue_input`.
    pub inputs_queued: u64,
    /// Decoder calls that produced a frame.
    pub frames_decoded: u64,
    /// Outputs appended to the output queue.
    pub frames_published: u64,
    /// Results discarded because a flush happened during the decode.
    pub frames_dropped_flush: u64,
    /// Results discarded because the input was decode-only.
    pub frames_dropped_decode_only: u64,
    /// Decoder calls that produced no frame.
    pub frames_without_output: u64,
    /// End-of-stream inputs processed.
    pub end_of_stream_seen: u64,
    /// Number of `flush` calls.
    pub flushes: u64,
    /// Total decoder calls.
    pub decode_calls: u64,
    /// Average decoder call duration in milliseconds.
    pub avg_decode_time_ms: f64,
}

impl PipelineStats {
    /// Fold one decoder call duration into the running average.
    pub fn record_decode_time(&mut self, elapsed: Duration) {
        self.decode_calls += 1;
        let sample = elapsed.as_secs_f64() * 1000.0;
        self.avg_decode_time_ms += (sample - self.avg_decode_time_ms) / self.decode_calls as f64;
    }

    /// Outputs discarded for any reason.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped_flush + self.frames_dropped_decode_only + self.frames_without_output
    }

    /// Fraction of processed inputs whose output never reached the
    /// consumer (0.0 to 1.0).
    pub fn drop_ratio(&self) -> f64 {
        let processed = self.frames_published + self.frames_dropped();
        if processed == 0 {
            return 0.0;
        }
        self.frames_dropped() as f64 / processed as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.input_buffers, 16);
        assert_eq!(config.output_buffers, 16);
        assert_eq!(config.input_buffer_bytes, 786_432);
        assert_eq!(config.output_mode, OutputMode::Yuv);
        assert_eq!(config.worker_thread_name, "decode-worker");
    }

    #[test]
    fn test_presets() {
        let low = PipelineConfig::low_memory();
        let high = PipelineConfig::high_throughput();
        assert!(low.validate().is_ok());
        assert!(high.validate().is_ok());
        assert!(low.input_buffers < PipelineConfig::default().input_buffers);
        assert!(high.output_buffers > PipelineConfig::default().output_buffers);
    }

    #[test]
    fn test_config_validation() {
        let mut config = PipelineConfig::default();

        config.input_buffers = 0;
        assert!(config.validate().is_err());
        config.input_buffers = 2;

        config.output_buffers = 0;
        assert!(config.validate().is_err());
        config.output_buffers = 2;

        config.worker_thread_name = String::new();
        assert!(config.validate().is_err());

        config.worker_thread_name = "bad\0name".to_string();
        assert!(config.validate().is_err());

        config.worker_thread_name = "vp9-decode".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"input_buffers": 2, "output_mode": "rgb"}"#).unwrap();
        assert_eq!(config.input_buffers, 2);
        assert_eq!(config.output_buffers, 16);
        assert_eq!(config.output_mode, OutputMode::Rgb);
        assert_eq!(config.worker_thread_name, "decode-worker");
    }

    #[test]
    fn test_worker_state() {
        assert!(WorkerState::Error.is_terminal());
        assert!(WorkerState::Released.is_terminal());
        assert!(!WorkerState::Waiting.is_terminal());
        assert!(!WorkerState::Decoding.is_terminal());
    }

    #[test]
    fn test_pipeline_stats() {
        let mut stats = PipelineStats::default();
        assert_eq!(stats.drop_ratio(), 0.0);

        stats.record_decode_time(Duration::from_millis(2));
        stats.record_decode_time(Duration::from_millis(4));
        assert!((stats.avg_decode_time_ms - 3.0).abs() < 0.01);
        assert_eq!(stats.decode_calls, 2);

        stats.frames_published = 3;
        stats.frames_dropped_decode_only = 1;
        assert!((stats.drop_ratio() - 0.25).abs() < 0.001);
    }
}
