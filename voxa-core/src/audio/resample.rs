//! Audio sample-rate conversion.
//!
//! ## Design
//!
//! `cpal` captures at the device's native rate (commonly 48 kHz) while the
//! recognizer requires 16 kHz mono f32, and synthesized audio (24 kHz) must
//! reach the output device at its native rate. `RateConverter` bridges both
//! gaps on non-RT threads, where allocation is allowed.
//!
//! Downsampling runs a 64-tap windowed-sinc FIR with the cutoff at the
//! output Nyquist frequency; aliasing above that band would otherwise
//! corrupt the activity detector. The last 64 input samples are kept as
//! history so the filter stays continuous across calls. Upsampling uses
//! linear interpolation with a one-sample carry — information is only being
//! fabricated, so a cheap kernel is adequate.
//!
//! When the two rates match, `process` is a zero-copy passthrough.

use std::borrow::Cow;

/// FIR filter length for the downsampling path.
const FILTER_TAPS: usize = 64;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    input_rate: u32,
    output_rate: u32,
    /// `output_rate / input_rate`.
    ratio: f64,
    /// Low-pass coefficients; `None` unless downsampling.
    filter: Option<Vec<f32>>,
    /// Last `FILTER_TAPS` input samples, carried across calls (downsampling).
    history: Vec<f32>,
    /// Last input sample, carried across calls (upsampling).
    carry: f32,
}

impl RateConverter {
    /// Create a converter from `input_rate` to `output_rate` (both in Hz).
    pub fn new(input_rate: u32, output_rate: u32) -> Self {
        let ratio = output_rate as f64 / input_rate as f64;

        let filter = (ratio < 1.0).then(|| {
            // Windowed-sinc low-pass with cutoff at the output Nyquist,
            // expressed as a fraction of the input rate.
            let cutoff = ratio * 0.5;
            let mut taps = vec![0f32; FILTER_TAPS];
            let center = (FILTER_TAPS - 1) as f64 / 2.0;
            for (i, tap) in taps.iter_mut().enumerate() {
                let n = i as f64 - center;
                *tap = if n == 0.0 {
                    (2.0 * cutoff) as f32
                } else {
                    let sinc = (2.0 * std::f64::consts::PI * cutoff * n).sin()
                        / (std::f64::consts::PI * n);
                    let hamming = 0.54
                        - 0.46
                            * (2.0 * std::f64::consts::PI * i as f64 / (FILTER_TAPS - 1) as f64)
                                .cos();
                    (sinc * hamming) as f32
                };
            }
            // Normalize to unity DC gain.
            let sum: f32 = taps.iter().sum();
            for tap in &mut taps {
                *tap /= sum;
            }
            taps
        });

        Self {
            input_rate,
            output_rate,
            ratio,
            filter,
            history: vec![0f32; FILTER_TAPS],
            carry: 0.0,
        }
    }

    /// Sample rate this converter consumes.
    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    /// Sample rate this converter produces.
    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Returns `true` when input rate == output rate (no conversion occurs).
    pub fn is_passthrough(&self) -> bool {
        self.input_rate == self.output_rate
    }

    /// Convert a chunk of samples.
    ///
    /// Output length is `⌊input.len() · ratio⌋` per call. In passthrough
    /// mode the input slice is returned unchanged, without copying.
    pub fn process<'a>(&mut self, input: &'a [f32]) -> Cow<'a, [f32]> {
        if self.is_passthrough() || input.is_empty() {
            return Cow::Borrowed(input);
        }

        if self.ratio > 1.0 {
            Cow::Owned(self.upsample(input))
        } else {
            Cow::Owned(self.downsample(input))
        }
    }

    fn downsample(&mut self, input: &[f32]) -> Vec<f32> {
        let filter = self.filter.as_deref().unwrap_or(&[]);
        let out_len = (input.len() as f64 * self.ratio) as usize;
        let mut output = vec![0f32; out_len];

        // The filter window may reach back before the current chunk; the
        // history buffer supplies those samples.
        let mut combined = Vec::with_capacity(self.history.len() + input.len());
        combined.extend_from_slice(&self.history);
        combined.extend_from_slice(input);

        for (i, out) in output.iter_mut().enumerate() {
            let src_pos = i as f64 / self.ratio;
            let src_idx = src_pos as usize + self.history.len();

            let mut acc = 0f32;
            for (j, tap) in filter.iter().enumerate() {
                let idx = src_idx + j;
                if let Some(sample) = idx
                    .checked_sub(FILTER_TAPS / 2)
                    .and_then(|idx| combined.get(idx))
                {
                    acc += sample * tap;
                }
            }
            *out = acc;
        }

        // Keep the last FILTER_TAPS input samples for the next call.
        if input.len() >= FILTER_TAPS {
            self.history.copy_from_slice(&input[input.len() - FILTER_TAPS..]);
        } else {
            let shift = FILTER_TAPS - input.len();
            self.history.copy_within(input.len().., 0);
            self.history[shift..].copy_from_slice(input);
        }

        output
    }

    fn upsample(&mut self, input: &[f32]) -> Vec<f32> {
        let out_len = (input.len() as f64 * self.ratio) as usize;
        let mut output = vec![0f32; out_len];

        for (i, out) in output.iter_mut().enumerate() {
            let src_pos = i as f64 / self.ratio;
            let src_idx = src_pos as usize;
            let frac = (src_pos - src_idx as f64) as f32;

            let a = input.get(src_idx).copied().unwrap_or(self.carry);
            let b = input
                .get(src_idx + 1)
                .or_else(|| input.last())
                .copied()
                .unwrap_or(a);

            *out = a + (b - a) * frac;
        }

        if let Some(&last) = input.last() {
            self.carry = last;
        }

        output
    }
}
