//! Audio capture via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not**:
//! - Allocate heap memory (beyond a reused mixdown scratch buffer)
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! The callback therefore only downmixes to mono and writes into an SPSC
//! ring buffer whose `push_slice` is lock-free. A dedicated consumer thread
//! drains the ring, resamples to the model rate, and hands owned chunks to
//! the caller-supplied sink.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio
//! on macOS). The stream is therefore created inside the consumer thread
//! and dropped there; `start()` blocks on a sync channel until the device
//! is confirmed streaming.

pub mod playback;
pub mod resample;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, SampleFormat, SampleRate, StreamConfig, SupportedStreamConfig,
};
use tracing::{debug, error, info, warn};

use crate::{
    buffering::{create_capture_ring, CaptureConsumer, CaptureProducer, Consumer, Producer},
    error::{Result, VoxaError},
};
use resample::RateConverter;

/// Samples drained from the ring per consumer iteration.
const DRAIN_CHUNK: usize = 2048;

/// Consumer sleep when the ring is empty. Short enough to keep detection
/// latency negligible, long enough not to burn a core.
const IDLE_SLEEP: Duration = Duration::from_micros(100);

/// Consumer sleep while capture is paused.
const PAUSED_SLEEP: Duration = Duration::from_millis(10);

/// Overflow drops are logged every Nth occurrence to avoid log floods.
const DROP_LOG_INTERVAL: u64 = 100;

/// Ceiling when joining the consumer thread on `stop()`.
const JOIN_CEILING: Duration = Duration::from_secs(2);

/// Microphone capture with pause/resume and device-rate resampling.
pub struct AudioCapture {
    target_sample_rate: u32,
    /// Taken by `start()`; present only before the first start.
    sink: Option<Box<dyn FnMut(&[f32]) + Send>>,
    /// `false` while paused — the callback discards input and the consumer
    /// sleeps. Shared with the orchestrator for half-duplex gating.
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    dropped_chunks: Arc<AtomicU64>,
    device_sample_rate: u32,
    worker: Option<thread::JoinHandle<()>>,
}

impl AudioCapture {
    /// Create a capturer delivering resampled chunks to `sink`.
    ///
    /// Nothing is opened until `start()`.
    pub fn new<F>(target_sample_rate: u32, sink: F) -> Self
    where
        F: FnMut(&[f32]) + Send + 'static,
    {
        Self {
            target_sample_rate,
            sink: Some(Box::new(sink)),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            dropped_chunks: Arc::new(AtomicU64::new(0)),
            device_sample_rate: 0,
            worker: None,
        }
    }

    /// Open the default input device and start delivering samples.
    ///
    /// Requests the model sample rate; when the device negotiates another
    /// rate, a resampler is installed and both rates are logged. Returns
    /// once the device is confirmed streaming.
    ///
    /// # Errors
    /// `VoxaError::NoDefaultInputDevice` when no microphone exists, or
    /// `VoxaError::AudioStream`/`AudioDevice` when cpal fails to open it.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(VoxaError::AlreadyRunning);
        }
        let sink = self.sink.take().ok_or(VoxaError::AlreadyRunning)?;

        let (producer, consumer) = create_capture_ring();
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        let running = Arc::clone(&self.running);
        let shutdown = Arc::clone(&self.shutdown);
        let dropped = Arc::clone(&self.dropped_chunks);
        let target = self.target_sample_rate;

        self.running.store(true, Ordering::SeqCst);

        let worker = thread::Builder::new()
            .name("voxa-capture".into())
            .spawn(move || {
                // The stream must be created and dropped on this thread.
                let (stream, device_rate) =
                    match open_input_stream(target, producer, Arc::clone(&running), dropped) {
                        Ok(opened) => {
                            let _ = open_tx.send(Ok(opened.1));
                            opened
                        }
                        Err(e) => {
                            let _ = open_tx.send(Err(e));
                            return;
                        }
                    };

                consume_loop(consumer, device_rate, target, sink, running, shutdown);

                // Releases the device on the owning thread.
                drop(stream);
            })?;

        match open_rx.recv() {
            Ok(Ok(device_rate)) => {
                self.device_sample_rate = device_rate;
                self.worker = Some(worker);
                info!(device_rate, target = self.target_sample_rate, "capture started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                Err(VoxaError::AudioStream(
                    "capture thread died while opening the device".into(),
                ))
            }
        }
    }

    /// Temporarily stop delivering samples. The device stays open.
    pub fn pause(&self) {
        self.running.store(false, Ordering::SeqCst);
        debug!("capture paused");
    }

    /// Resume after `pause()`. No-op once shut down.
    pub fn resume(&self) {
        if !self.shutdown.load(Ordering::SeqCst) {
            self.running.store(true, Ordering::SeqCst);
            debug!("capture resumed");
        }
    }

    /// Shared pause/resume flag, read by the audio callback and the
    /// consumer. The orchestrator flips it in half-duplex mode.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Chunks rejected because the ring was full.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks.load(Ordering::Relaxed)
    }

    /// Rate the device actually negotiated. Zero before `start()`.
    pub fn device_sample_rate(&self) -> u32 {
        self.device_sample_rate
    }

    /// Stop capture, join the consumer and close the device.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);

        if let Some(worker) = self.worker.take() {
            let deadline = Instant::now() + JOIN_CEILING;
            while !worker.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if worker.is_finished() {
                if worker.join().is_err() {
                    warn!("capture worker panicked");
                }
            } else {
                warn!("capture worker did not stop in time");
            }
            info!("capture stopped");
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Push a chunk, counting it as dropped when the ring cannot take it all.
/// Safe from the audio callback: no locks, no allocation.
fn push_or_count(producer: &mut CaptureProducer, samples: &[f32], dropped: &AtomicU64) {
    let written = producer.push_slice(samples);
    if written < samples.len() {
        let count = dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if count % DROP_LOG_INTERVAL == 0 {
            warn!(dropped_chunks = count, "capture ring full, dropping audio");
        }
    }
}

/// Open the default input device, preferring the requested rate.
fn open_input_stream(
    target_rate: u32,
    producer: CaptureProducer,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(VoxaError::NoDefaultInputDevice)?;

    info!(
        device = device.name().unwrap_or_else(|_| "unknown".into()).as_str(),
        "opening input device"
    );

    let supported = select_input_config(&device, target_rate)?;
    let device_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;

    if device_rate != target_rate {
        info!(
            device_rate,
            target_rate, "device rate differs from model rate, resampling will be applied"
        );
    }
    debug!(
        device_rate,
        channels,
        format = ?supported.sample_format(),
        "input config selected"
    );

    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: BufferSize::Default,
    };

    let err_fn = |err| error!("input stream error: {err}");

    let stream = match supported.sample_format() {
        SampleFormat::F32 => {
            let mut producer = producer;
            let mut mix_buf: Vec<f32> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    if channels == 1 {
                        push_or_count(&mut producer, data, &dropped);
                        return;
                    }
                    let frames = data.len() / channels;
                    mix_buf.resize(frames, 0.0);
                    for (frame, out) in data.chunks_exact(channels).zip(mix_buf.iter_mut()) {
                        *out = frame.iter().sum::<f32>() / channels as f32;
                    }
                    push_or_count(&mut producer, &mix_buf, &dropped);
                },
                err_fn,
                None,
            )
        }

        SampleFormat::I16 => {
            let mut producer = producer;
            let mut mix_buf: Vec<f32> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    let frames = data.len() / channels;
                    mix_buf.resize(frames, 0.0);
                    if channels == 1 {
                        for (sample, out) in data.iter().zip(mix_buf.iter_mut()) {
                            *out = *sample as f32 / 32_768.0;
                        }
                    } else {
                        for (frame, out) in data.chunks_exact(channels).zip(mix_buf.iter_mut()) {
                            *out = frame
                                .iter()
                                .map(|s| *s as f32 / 32_768.0)
                                .sum::<f32>()
                                / channels as f32;
                        }
                    }
                    push_or_count(&mut producer, &mix_buf, &dropped);
                },
                err_fn,
                None,
            )
        }

        other => {
            return Err(VoxaError::AudioStream(format!(
                "unsupported sample format: {other:?}"
            )))
        }
    }
    .map_err(|e| VoxaError::AudioStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| VoxaError::AudioStream(e.to_string()))?;

    Ok((stream, device_rate))
}

/// Prefer a mono/stereo f32 or i16 config that can express `target_rate`
/// directly; otherwise accept whatever the device negotiates by default.
fn select_input_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<SupportedStreamConfig> {
    let wanted = SampleRate(target_rate);

    if let Ok(ranges) = device.supported_input_configs() {
        for range in ranges {
            let format_ok = matches!(range.sample_format(), SampleFormat::F32 | SampleFormat::I16);
            if format_ok
                && range.channels() <= 2
                && range.min_sample_rate() <= wanted
                && wanted <= range.max_sample_rate()
            {
                return Ok(range.with_sample_rate(wanted));
            }
        }
    }

    device
        .default_input_config()
        .map_err(|e| VoxaError::AudioDevice(e.to_string()))
}

/// Drain the ring, resample, and deliver owned chunks to the sink.
fn consume_loop(
    mut consumer: CaptureConsumer,
    device_rate: u32,
    target_rate: u32,
    mut sink: Box<dyn FnMut(&[f32]) + Send>,
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
) {
    let mut converter = RateConverter::new(device_rate, target_rate);
    if !converter.is_passthrough() {
        info!(device_rate, target_rate, "capture resampling enabled");
    }

    let mut scratch = vec![0f32; DRAIN_CHUNK];

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("capture consumer shutting down");
            return;
        }
        if !running.load(Ordering::Relaxed) {
            thread::sleep(PAUSED_SLEEP);
            continue;
        }

        let n = consumer.pop_slice(&mut scratch);
        if n == 0 {
            thread::sleep(IDLE_SLEEP);
            continue;
        }

        let resampled = converter.process(&scratch[..n]);
        if !resampled.is_empty() {
            sink(resampled.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    #[test]
    fn push_or_count_accounts_for_every_chunk() {
        let (mut producer, mut consumer) = create_capture_ring();
        let dropped = AtomicU64::new(0);
        let chunk = vec![0.1f32; 10_000];

        // 7 chunks of 10 000 against a 65 536 ring: the 7th overflows.
        for _ in 0..7 {
            push_or_count(&mut producer, &chunk, &dropped);
        }
        assert_eq!(dropped.load(Ordering::Relaxed), 1);

        let mut sink = vec![0f32; 70_000];
        let delivered = consumer.pop_slice(&mut sink);
        assert_eq!(delivered, crate::buffering::CAPTURE_RING_CAPACITY);
    }

    #[test]
    fn pause_resume_is_idempotent_until_stopped() {
        let mut capture = AudioCapture::new(16_000, |_samples| {});
        let running = capture.running_flag();

        capture.pause();
        capture.pause();
        capture.resume();
        assert!(running.load(Ordering::SeqCst));

        capture.stop();
        capture.resume();
        assert!(
            !running.load(Ordering::SeqCst),
            "resume is a no-op after stop"
        );
    }

    #[test]
    fn consumer_delivers_passthrough_chunks() {
        let (mut producer, consumer) = create_capture_ring();
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink_store = Arc::clone(&collected);

        let running = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker = {
            let running = Arc::clone(&running);
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || {
                consume_loop(
                    consumer,
                    16_000,
                    16_000,
                    Box::new(move |samples| sink_store.lock().extend_from_slice(samples)),
                    running,
                    shutdown,
                )
            })
        };

        let input: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.01).sin()).collect();
        producer.push_slice(&input);

        let deadline = Instant::now() + Duration::from_secs(1);
        while collected.lock().len() < input.len() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        shutdown.store(true, Ordering::SeqCst);
        worker.join().unwrap();

        assert_eq!(&*collected.lock(), &input);
    }

    #[test]
    fn paused_consumer_delivers_nothing() {
        let (mut producer, consumer) = create_capture_ring();
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink_store = Arc::clone(&collected);

        let running = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker = {
            let running = Arc::clone(&running);
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || {
                consume_loop(
                    consumer,
                    16_000,
                    16_000,
                    Box::new(move |samples: &[f32]| sink_store.lock().extend_from_slice(samples)),
                    running,
                    shutdown,
                )
            })
        };

        producer.push_slice(&vec![0.3f32; 1024]);
        thread::sleep(Duration::from_millis(50));
        assert!(collected.lock().is_empty(), "paused consumer must not deliver");

        // Resuming drains what accumulated while paused.
        running.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(1);
        while collected.lock().len() < 1024 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(collected.lock().len(), 1024);

        shutdown.store(true, Ordering::SeqCst);
        worker.join().unwrap();
    }

    #[test]
    fn consumer_resamples_device_rate_to_model_rate() {
        let (mut producer, consumer) = create_capture_ring();
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink_store = Arc::clone(&collected);

        let running = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker = {
            let running = Arc::clone(&running);
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || {
                consume_loop(
                    consumer,
                    48_000,
                    16_000,
                    Box::new(move |samples: &[f32]| sink_store.lock().extend_from_slice(samples)),
                    running,
                    shutdown,
                )
            })
        };

        // One second at 48 kHz arrives as ~16 000 samples at the model rate.
        let input = vec![0.1f32; 48_000];
        assert_eq!(producer.push_slice(&input), input.len());

        let deadline = Instant::now() + Duration::from_secs(2);
        while collected.lock().len() < 15_500 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        shutdown.store(true, Ordering::SeqCst);
        worker.join().unwrap();

        // Per-chunk flooring trims a few samples depending on how the
        // consumer happened to slice the stream.
        let produced = collected.lock().len();
        assert!(
            (15_500..=16_100).contains(&produced),
            "expected ≈16 000 samples, got {produced}"
        );
    }
}
