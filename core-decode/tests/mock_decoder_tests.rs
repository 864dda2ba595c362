//! Pipeline behavior against `mockall`-generated decoders

use core_decode::{
    BufferFlags, DecodeError, DecodeOutcome, DecodePipeline, FrameDecoder, OutputData,
    PipelineConfig, PipelineError, WorkerState,
};
use mockall::mock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

mock! {
    pub Decoder {}

    impl FrameDecoder for Decoder {
        fn decode(&mut self, payload: &[u8], output: &mut OutputData) -> Result<DecodeOutcome, DecodeError>;
        fn close(&mut self);
    }
}

fn config() -> PipelineConfig {
    PipelineConfig::low_memory().with_buffers(2, 2)
}

fn submit(pipeline: &DecodePipeline, payload: &[u8]) {
    let buffer = pipeline.dequeue_input().unwrap().expect("input available");
    buffer.lock().unwrap().set_payload(payload);
    pipeline.queue_input(buffer).unwrap();
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within timeout");
        thread::sleep(Duration::from_millis(1));
    }
}

fn counting_close(mock: &mut MockDecoder) -> Arc<AtomicUsize> {
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = closes.clone();
    mock.expect_close().returning(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    closes
}

#[test]
fn test_no_frame_decoder_publishes_nothing() {
    let mut mock = MockDecoder::new();
    mock.expect_decode()
        .times(3)
        .returning(|_, _| Ok(DecodeOutcome::NoFrame));
    let closes = counting_close(&mut mock);

    let pipeline = DecodePipeline::new(config(), mock).unwrap();
    for _ in 0..3 {
        wait_until(|| pipeline.snapshot().input.available > 0);
        submit(&pipeline, b"delta");
    }
    wait_until(|| pipeline.stats().frames_without_output == 3);

    assert!(pipeline.dequeue_output().unwrap().is_none());
    assert_eq!(pipeline.stats().decode_calls, 3);

    pipeline.release();
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_decoder_receives_payload_and_fills_output() {
    let mut mock = MockDecoder::new();
    mock.expect_decode()
        .withf(|payload, _| payload.to_vec() == b"keyframe".to_vec())
        .times(1)
        .returning(|payload, output| {
            output.frame.extend_from_slice(&payload[..3]);
            output.width = 320;
            output.height = 240;
            Ok(DecodeOutcome::Frame)
        });
    let _closes = counting_close(&mut mock);

    let pipeline = DecodePipeline::new(config(), mock).unwrap();
    submit(&pipeline, b"keyframe");

    let mut output = None;
    wait_until(|| {
        output = pipeline.dequeue_output().unwrap();
        output.is_some()
    });
    let output = output.unwrap();
    {
        let frame = output.lock().unwrap();
        assert_eq!(&frame.frame[..], b"key");
        assert_eq!((frame.width, frame.height), (320, 240));
    }
    pipeline.release_output(output).unwrap();
    assert_eq!(pipeline.stats().frames_decoded, 1);
}

#[test]
fn test_codec_error_is_latched() {
    let mut mock = MockDecoder::new();
    mock.expect_decode().times(1).returning(|_, _| {
        Err(DecodeError::Codec {
            code: -7,
            message: "corrupt frame".into(),
        })
    });
    let closes = counting_close(&mut mock);

    let pipeline = DecodePipeline::new(config(), mock).unwrap();
    submit(&pipeline, b"broken");
    wait_until(|| pipeline.worker_finished());

    let err = pipeline.dequeue_input().unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(
        err,
        PipelineError::Decode(DecodeError::Codec {
            code: -7,
            message: "corrupt frame".into()
        })
    );
    assert_eq!(pipeline.worker_state(), WorkerState::Error);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_end_of_stream_never_reaches_decoder() {
    let mut mock = MockDecoder::new();
    mock.expect_decode().never();
    let closes = counting_close(&mut mock);

    let pipeline = DecodePipeline::new(config(), mock).unwrap();
    let buffer = pipeline.dequeue_input().unwrap().unwrap();
    buffer.lock().unwrap().flags = BufferFlags::END_OF_STREAM;
    pipeline.queue_input(buffer).unwrap();

    wait_until(|| pipeline.stats().end_of_stream_seen == 1);
    let output = pipeline.dequeue_output().unwrap().expect("end-of-stream output");
    assert!(output.lock().unwrap().is_end_of_stream());
    assert_eq!(pipeline.stats().decode_calls, 0);

    drop(output);
    drop(pipeline);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_boxed_decoder_is_accepted() {
    let mut mock = MockDecoder::new();
    mock.expect_decode()
        .returning(|_, _| Ok(DecodeOutcome::Frame));
    let closes = counting_close(&mut mock);

    let boxed: Box<dyn FrameDecoder> = Box::new(mock);
    let pipeline = DecodePipeline::new(config(), boxed).unwrap();
    submit(&pipeline, b"frame");
    wait_until(|| pipeline.stats().frames_published == 1);

    pipeline.release();
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}
