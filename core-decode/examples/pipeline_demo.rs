//! Decode pipeline demonstration
//!
//! Runs a producer and a consumer thread against a synthetic decoder, with a
//! flush halfway through the stream.
//!
//! Run with:
//! ```bash
//! cargo run -p core-decode --example pipeline_demo
//!
//! # JSON logs with worker tracing
//! cargo run -p core-decode --example pipeline_demo -- json "core_decode=trace"
//! ```

use core_decode::{
    BufferFlags, DecodeError, DecodeOutcome, DecodePipeline, FrameDecoder, OutputData,
    OutputMode, PipelineConfig,
};
use core_runtime::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

const SAMPLES: i64 = 120;
const FRAME_INTERVAL_US: i64 = 33_333;

/// Pretends to decode: every tenth sample is a non-displayable frame, the
/// rest expand to a fake 16x16 YUV plane.
struct SyntheticDecoder {
    decoded: u64,
}

impl FrameDecoder for SyntheticDecoder {
    fn decode(
        &mut self,
        payload: &[u8],
        output: &mut OutputData,
    ) -> Result<DecodeOutcome, DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::Corrupted("empty sample".into()));
        }

        thread::sleep(Duration::from_millis(2));
        self.decoded += 1;

        if payload[0] % 10 == 9 {
            return Ok(DecodeOutcome::NoFrame);
        }

        output.width = 16;
        output.height = 16;
        let plane = match output.mode {
            OutputMode::None => 0,
            OutputMode::Yuv => 16 * 16 * 3 / 2,
            OutputMode::Rgb => 16 * 16 * 3,
        };
        output.frame.resize(plane, payload[0]);
        Ok(DecodeOutcome::Frame)
    }

    fn close(&mut self) {
        info!(decoded = self.decoded, "Synthetic decoder closed");
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();

    let format = match args.get(1).map(String::as_str) {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::default(),
    };

    let mut config = LoggingConfig::default()
        .with_format(format)
        .with_level(LogLevel::Debug)
        .with_thread_info(true);
    if let Some(filter) = args.get(2) {
        config = config.with_filter(filter.clone());
    }

    if let Err(e) = init_logging(config) {
        eprintln!("Failed to initialize logging: {}", e);
        return;
    }

    let pipeline = match DecodePipeline::new(
        PipelineConfig::low_memory(),
        SyntheticDecoder { decoded: 0 },
    ) {
        Ok(pipeline) => Arc::new(pipeline),
        Err(e) => {
            warn!("Failed to start pipeline: {}", e);
            return;
        }
    };

    let producer = {
        let pipeline = pipeline.clone();
        thread::spawn(move || -> core_decode::Result<()> {
            for ts in 0..=SAMPLES {
                let buffer = loop {
                    match pipeline.dequeue_input()? {
                        Some(buffer) => break buffer,
                        None => thread::sleep(Duration::from_millis(1)),
                    }
                };
                {
                    let mut input = buffer.lock()?;
                    input.set_payload(&[(ts % 256) as u8; 64]);
                    input.timestamp_us = ts * FRAME_INTERVAL_US;
                    if ts == SAMPLES {
                        input.flags.insert(BufferFlags::END_OF_STREAM);
                    } else if ts % 25 == 0 {
                        input.flags.insert(BufferFlags::DECODE_ONLY);
                    }
                }
                pipeline.queue_input(buffer)?;

                if ts == SAMPLES / 2 {
                    info!("Seeking: flushing pipeline");
                    pipeline.flush();
                    pipeline.set_output_mode(OutputMode::Rgb);
                }
            }
            Ok(())
        })
    };

    let consumer = {
        let pipeline = pipeline.clone();
        thread::spawn(move || -> core_decode::Result<u64> {
            let mut frames = 0;
            loop {
                let Some(output) = pipeline.dequeue_output()? else {
                    thread::sleep(Duration::from_millis(1));
                    continue;
                };
                let eos = output.lock()?.is_end_of_stream();
                if !eos {
                    frames += 1;
                }
                pipeline.release_output(output)?;
                if eos {
                    return Ok(frames);
                }
            }
        })
    };

    match producer.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Producer stopped: {}", e),
        Err(_) => warn!("Producer panicked"),
    }
    match consumer.join() {
        Ok(Ok(frames)) => info!(frames, "Consumer reached end of stream"),
        Ok(Err(e)) => warn!("Consumer stopped: {}", e),
        Err(_) => warn!("Consumer panicked"),
    }

    pipeline.release();

    let stats = pipeline.stats();
    info!(
        published = stats.frames_published,
        dropped_flush = stats.frames_dropped_flush,
        dropped_decode_only = stats.frames_dropped_decode_only,
        without_output = stats.frames_without_output,
        avg_decode_ms = stats.avg_decode_time_ms,
        drop_ratio = stats.drop_ratio(),
        "Pipeline finished"
    );
}
