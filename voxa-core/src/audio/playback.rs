//! Audio playback with a persistent device and a lock-free ring.
//!
//! The output stream is opened once and runs for the life of the player,
//! emitting silence whenever the ring is starved — the device never stalls.
//! The callback takes no locks: it pops samples from the SPSC ring, checks
//! the interrupt flags once per block, and on interruption advances the
//! read side past all queued audio so in-flight sound stops within one
//! callback period.
//!
//! As with capture, `cpal::Stream` is `!Send`, so the stream lives on a
//! dedicated thread; construction blocks until the device is confirmed
//! open.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, SampleFormat, StreamConfig,
};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use super::resample::RateConverter;
use crate::buffering::{
    create_playback_ring, Consumer, Observer, PlaybackProducer, Producer,
};
use crate::error::{Result, VoxaError};

/// Device period when the caller passes 0: tolerant of Bluetooth links.
const DEFAULT_PERIOD_MS: u32 = 100;

/// Slack added to the buffer duration before `play` gives up waiting.
const PLAY_SAFETY_MARGIN: Duration = Duration::from_secs(2);

/// How often a blocked `play` re-checks the interrupt flags.
const COMPLETION_POLL: Duration = Duration::from_millis(50);

/// Ceiling for draining the ring after an interrupt.
const INTERRUPT_DRAIN_CEILING: Duration = Duration::from_millis(250);

/// Ceiling when joining the stream-owning thread on close.
const JOIN_CEILING: Duration = Duration::from_secs(2);

/// Anything that can play audio and be pre-empted. The orchestrator's
/// speech worker talks to this seam so tests can substitute a fake.
pub trait AudioSink: Send + Sync {
    /// Block until the buffer played out, the sink was interrupted, or a
    /// duration-derived safety ceiling elapsed. Returns `true` only on
    /// uninterrupted completion.
    fn play(&self, samples: &[f32], sample_rate: u32) -> bool;

    /// Stop current playback and discard queued audio.
    fn interrupt(&self);
}

/// Speaker output with instant pre-emption.
pub struct AudioPlayer {
    producer: Mutex<PlaybackProducer>,
    converter: Mutex<RateConverter>,
    device_sample_rate: u32,
    /// Internal interrupt, reset by each `play`.
    interrupt: Arc<AtomicBool>,
    /// Shared interrupt raised when the user speaks over a reply. Absent in
    /// half-duplex (wait) mode, where the microphone is gated instead.
    external_interrupt: Option<Arc<AtomicBool>>,
    playing: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    done_lock: Arc<Mutex<()>>,
    done: Arc<Condvar>,
    dropped_samples: AtomicU64,
    worker: Option<thread::JoinHandle<()>>,
}

impl AudioPlayer {
    /// Open the default output device.
    ///
    /// `input_sample_rate` is the rate of the audio handed to `play`
    /// (typically the synthesizer's). `period_ms` sets the device period;
    /// 0 selects the Bluetooth-friendly default of 100 ms.
    pub fn new(
        input_sample_rate: u32,
        period_ms: u32,
        external_interrupt: Option<Arc<AtomicBool>>,
    ) -> Result<Self> {
        let period_ms = if period_ms == 0 {
            DEFAULT_PERIOD_MS
        } else {
            period_ms
        };

        let (producer, consumer) = create_playback_ring();

        let interrupt = Arc::new(AtomicBool::new(false));
        let playing = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let done_lock = Arc::new(Mutex::new(()));
        let done = Arc::new(Condvar::new());

        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        let worker = {
            let interrupt = Arc::clone(&interrupt);
            let external = external_interrupt.clone();
            let playing = Arc::clone(&playing);
            let shutdown = Arc::clone(&shutdown);
            let done = Arc::clone(&done);
            thread::Builder::new()
                .name("voxa-playback".into())
                .spawn(move || {
                    // The stream must be created and dropped on this thread.
                    let (stream, device_rate) = match open_output_stream(
                        consumer, period_ms, interrupt, external, playing, done,
                    ) {
                        Ok(opened) => {
                            let _ = open_tx.send(Ok(opened.1));
                            opened
                        }
                        Err(e) => {
                            let _ = open_tx.send(Err(e));
                            return;
                        }
                    };

                    while !shutdown.load(Ordering::Relaxed) {
                        thread::park_timeout(Duration::from_millis(200));
                    }
                    drop(stream);
                })?
        };

        let device_sample_rate = match open_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                return Err(VoxaError::AudioStream(
                    "playback thread died while opening the device".into(),
                ))
            }
        };

        info!(
            input_sample_rate,
            device_sample_rate, period_ms, "playback device started"
        );

        Ok(Self {
            producer: Mutex::new(producer),
            converter: Mutex::new(RateConverter::new(input_sample_rate, device_sample_rate)),
            device_sample_rate,
            interrupt,
            external_interrupt,
            playing,
            shutdown,
            done_lock,
            done,
            dropped_samples: AtomicU64::new(0),
            worker: Some(worker),
        })
    }

    /// Queue a buffer and block until it played, was interrupted, or the
    /// safety ceiling (buffer duration + 2 s) elapsed.
    ///
    /// Returns `true` only for uninterrupted completion.
    pub fn play(&self, samples: &[f32], sample_rate: u32) -> bool {
        if samples.is_empty() {
            return true;
        }

        self.interrupt.store(false, Ordering::SeqCst);

        let resampled: Vec<f32> = {
            let mut converter = self.converter.lock();
            if converter.input_rate() != sample_rate {
                *converter = RateConverter::new(sample_rate, self.device_sample_rate);
            }
            converter.process(samples).into_owned()
        };

        let queued = {
            let mut producer = self.producer.lock();
            let written = producer.push_slice(&resampled);
            if written < resampled.len() {
                let lost = (resampled.len() - written) as u64;
                let total = self.dropped_samples.fetch_add(lost, Ordering::Relaxed) + lost;
                warn!(lost, total, "playback ring overflow, dropping samples");
            }
            written
        };
        if queued == 0 {
            return !self.is_interrupted();
        }

        self.playing.store(true, Ordering::SeqCst);
        debug!(
            samples = queued,
            device_rate = self.device_sample_rate,
            "playback queued"
        );

        let ceiling = Duration::from_secs_f64(queued as f64 / self.device_sample_rate as f64)
            + PLAY_SAFETY_MARGIN;
        let deadline = Instant::now() + ceiling;

        while self.playing.load(Ordering::Relaxed) {
            if self.is_interrupted() {
                debug!("playback interrupted");
                self.playing.store(false, Ordering::SeqCst);
                return false;
            }
            if Instant::now() >= deadline {
                warn!("playback safety ceiling exceeded");
                self.interrupt.store(true, Ordering::SeqCst);
                self.playing.store(false, Ordering::SeqCst);
                return false;
            }

            let mut guard = self.done_lock.lock();
            if self.playing.load(Ordering::Relaxed) {
                let _ = self.done.wait_for(&mut guard, COMPLETION_POLL);
            }
        }

        !self.is_interrupted()
    }

    /// Stop current playback and discard all queued audio.
    ///
    /// Blocks briefly until the callback has observed the flag and drained
    /// the ring, so a follow-up `play` starts from silence.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
        self.done.notify_all();

        let deadline = Instant::now() + INTERRUPT_DRAIN_CEILING;
        while !self.producer.lock().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Samples discarded because the ring was full.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples.load(Ordering::Relaxed)
    }

    /// Native rate of the output device.
    pub fn device_sample_rate(&self) -> u32 {
        self.device_sample_rate
    }

    /// Interrupt, stop the stream and release the device.
    pub fn close(&mut self) {
        if self.worker.is_none() {
            return;
        }
        self.interrupt();
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            let deadline = Instant::now() + JOIN_CEILING;
            while !worker.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if worker.is_finished() {
                if worker.join().is_err() {
                    warn!("playback worker panicked");
                }
            } else {
                warn!("playback worker did not stop in time");
            }
        }
        info!("playback closed");
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
            || self
                .external_interrupt
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.close();
    }
}

impl AudioSink for AudioPlayer {
    fn play(&self, samples: &[f32], sample_rate: u32) -> bool {
        AudioPlayer::play(self, samples, sample_rate)
    }

    fn interrupt(&self) {
        AudioPlayer::interrupt(self)
    }
}

/// Open the default output device and start the silence-filling stream.
fn open_output_stream(
    mut consumer: crate::buffering::PlaybackConsumer,
    period_ms: u32,
    interrupt: Arc<AtomicBool>,
    external: Option<Arc<AtomicBool>>,
    playing: Arc<AtomicBool>,
    done: Arc<Condvar>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(VoxaError::NoDefaultOutputDevice)?;

    info!(
        device = device.name().unwrap_or_else(|_| "unknown".into()).as_str(),
        "opening output device"
    );

    let supported = device
        .default_output_config()
        .map_err(|e| VoxaError::AudioDevice(e.to_string()))?;

    if supported.sample_format() != SampleFormat::F32 {
        return Err(VoxaError::AudioStream(format!(
            "unsupported output sample format: {:?}",
            supported.sample_format()
        )));
    }

    let device_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let period_frames = device_rate * period_ms / 1000;

    let err_fn = |err| error!("output stream error: {err}");

    let callback = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        let interrupted = interrupt.load(Ordering::Relaxed)
            || external.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed));

        if interrupted {
            // Drop in-flight audio: advance the read side past everything
            // queued. Wait-free, so legal on the audio thread.
            let _ = consumer.clear();
        }

        for frame in data.chunks_mut(channels) {
            let sample = if interrupted {
                0.0
            } else {
                consumer.try_pop().unwrap_or(0.0)
            };
            for out in frame.iter_mut() {
                *out = sample;
            }
        }

        if (interrupted || consumer.is_empty()) && playing.swap(false, Ordering::SeqCst) {
            // Waiters poll with a timeout, so notifying without holding
            // their mutex is fine — and keeps this callback lock-free.
            done.notify_all();
        }
    };

    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: BufferSize::Fixed(period_frames),
    };
    debug!(device_rate, channels, period_frames, "output config selected");

    let stream = device
        .build_output_stream(&config, callback, err_fn, None)
        .map_err(|e| VoxaError::AudioStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| VoxaError::AudioStream(e.to_string()))?;

    Ok((stream, device_rate))
}
