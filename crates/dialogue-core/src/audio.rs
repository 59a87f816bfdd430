//! Interleaved PCM buffers and the sample-level operations the assembler needs.

use crate::error::{DialogueError, DialogueResult};
use std::f32::consts::FRAC_PI_4;
use std::io::Read;
use std::path::Path;

/// Interleaved `f32` PCM audio
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl PcmBuffer {
    /// Wrap interleaved samples
    ///
    /// # Errors
    ///
    /// Returns an error for a zero sample rate, zero channels, or a sample
    /// count that is not a whole number of frames.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> DialogueResult<Self> {
        if sample_rate == 0 {
            return Err(DialogueError::invalid_input("Sample rate cannot be zero"));
        }
        if channels == 0 {
            return Err(DialogueError::invalid_input("Channel count cannot be zero"));
        }
        if samples.len() % usize::from(channels) != 0 {
            return Err(DialogueError::invalid_input(format!(
                "{} samples is not a whole number of {channels}-channel frames",
                samples.len()
            )));
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Mono buffer from samples
    #[must_use]
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    /// A run of silent frames
    #[must_use]
    pub fn silence(frames: usize, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: vec![0.0; frames * usize::from(channels)],
            sample_rate,
            channels,
        }
    }

    /// Silence lasting exactly `duration_ms * sample_rate / 1000` frames
    #[must_use]
    pub fn silence_ms(duration_ms: u64, sample_rate: u32, channels: u16) -> Self {
        Self::silence(frames_for_ms(duration_ms, sample_rate), sample_rate, channels)
    }

    /// Empty buffer
    #[must_use]
    pub fn empty(sample_rate: u32, channels: u16) -> Self {
        Self::silence(0, sample_rate, channels)
    }

    /// Interleaved samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Consume the buffer and return its samples
    #[must_use]
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count
    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    /// Whether the buffer has no frames
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Duration in whole milliseconds, rounded down
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        self.frames() as u64 * 1000 / u64::from(self.sample_rate)
    }

    /// Largest absolute sample value
    #[must_use]
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
    }

    /// Multiply every sample by a linear factor
    pub fn scale(&mut self, factor: f32) {
        if (factor - 1.0).abs() > f32::EPSILON {
            for sample in &mut self.samples {
                *sample *= factor;
            }
        }
    }

    /// Apply gain in dB
    pub fn apply_gain_db(&mut self, gain_db: f32) {
        if gain_db != 0.0 {
            self.scale(db_to_linear(gain_db));
        }
    }

    /// Linear-interpolation resample to `target_rate`
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn resample(&self, target_rate: u32) -> Self {
        if target_rate == self.sample_rate || self.is_empty() {
            return Self {
                samples: self.samples.clone(),
                sample_rate: target_rate,
                channels: self.channels,
            };
        }

        let channels = usize::from(self.channels);
        let in_frames = self.frames();
        let out_frames =
            ((in_frames as u64 * u64::from(target_rate)) / u64::from(self.sample_rate)).max(1) as usize;
        let step = f64::from(self.sample_rate) / f64::from(target_rate);

        let mut samples = Vec::with_capacity(out_frames * channels);
        for frame in 0..out_frames {
            let position = frame as f64 * step;
            let left = (position.floor() as usize).min(in_frames - 1);
            let right = (left + 1).min(in_frames - 1);
            let t = (position - left as f64) as f32;
            for ch in 0..channels {
                let a = self.samples[left * channels + ch];
                let b = self.samples[right * channels + ch];
                samples.push(a + (b - a) * t);
            }
        }

        Self {
            samples,
            sample_rate: target_rate,
            channels: self.channels,
        }
    }

    /// Average all channels into one
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_mono(&self) -> Self {
        if self.channels == 1 {
            return self.clone();
        }
        let channels = usize::from(self.channels);
        let samples = self
            .samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();
        Self::mono(samples, self.sample_rate)
    }

    /// Place the buffer in a stereo field with the constant-power pan law
    ///
    /// Mono input is spread to both channels; stereo input has each channel
    /// scaled by the matching gain.
    ///
    /// # Errors
    ///
    /// Returns an assembly error for more than two channels.
    pub fn to_stereo(&self, pan: f32) -> DialogueResult<Self> {
        let (gain_l, gain_r) = pan_gains(pan);
        let samples = match self.channels {
            1 => self
                .samples
                .iter()
                .flat_map(|&s| [s * gain_l, s * gain_r])
                .collect(),
            2 => self
                .samples
                .chunks_exact(2)
                .flat_map(|frame| [frame[0] * gain_l, frame[1] * gain_r])
                .collect(),
            n => {
                return Err(DialogueError::assembly(format!(
                    "Cannot pan {n}-channel audio"
                )))
            }
        };
        Ok(Self {
            samples,
            sample_rate: self.sample_rate,
            channels: 2,
        })
    }

    /// Append another buffer with the same format
    ///
    /// # Errors
    ///
    /// Returns an assembly error if the formats differ.
    pub fn append(&mut self, other: &Self) -> DialogueResult<()> {
        self.check_format(other)?;
        self.samples.extend_from_slice(&other.samples);
        Ok(())
    }

    /// Append another buffer, overlapping up to `fade_frames` with a linear crossfade
    ///
    /// The window is clamped to the length of both buffers.
    ///
    /// # Errors
    ///
    /// Returns an assembly error if the formats differ.
    #[allow(clippy::cast_precision_loss)]
    pub fn crossfade_append(&mut self, other: &Self, fade_frames: usize) -> DialogueResult<()> {
        self.check_format(other)?;
        let fade = fade_frames.min(self.frames()).min(other.frames());
        if fade == 0 {
            self.samples.extend_from_slice(&other.samples);
            return Ok(());
        }

        let channels = usize::from(self.channels);
        let start = (self.frames() - fade) * channels;
        for frame in 0..fade {
            let t = (frame + 1) as f32 / (fade + 1) as f32;
            for ch in 0..channels {
                let i = frame * channels + ch;
                let tail = &mut self.samples[start + i];
                *tail = *tail * (1.0 - t) + other.samples[i] * t;
            }
        }
        self.samples.extend_from_slice(&other.samples[fade * channels..]);
        Ok(())
    }

    fn check_format(&self, other: &Self) -> DialogueResult<()> {
        if self.sample_rate != other.sample_rate || self.channels != other.channels {
            return Err(DialogueError::assembly(format!(
                "Cannot join {} Hz/{}ch audio with {} Hz/{}ch audio",
                self.sample_rate, self.channels, other.sample_rate, other.channels
            )));
        }
        Ok(())
    }

    /// Decode a WAV stream of any integer or float sample format
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not valid WAV.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_wav_reader<R: Read>(reader: hound::WavReader<R>) -> DialogueResult<Self> {
        let spec = reader.spec();
        let samples = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|s| s as f32 * scale))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        Self::new(samples, spec.sample_rate, spec.channels)
    }

    /// Decode WAV bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not valid WAV.
    pub fn from_wav_bytes(bytes: &[u8]) -> DialogueResult<Self> {
        Self::from_wav_reader(hound::WavReader::new(std::io::Cursor::new(bytes))?)
    }

    /// Decode a WAV file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or decoded.
    pub fn from_wav_file<P: AsRef<Path>>(path: P) -> DialogueResult<Self> {
        Self::from_wav_reader(hound::WavReader::open(path)?)
    }
}

/// Constant-power pan gains: `θ = (pan + 1)·π/4`, `(cos θ, sin θ)`
///
/// Pan is clamped to -1.0..=1.0.
#[must_use]
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let theta = (pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
    (theta.cos(), theta.sin())
}

/// Convert decibels to a linear amplitude factor
#[must_use]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert a linear amplitude to decibels
#[must_use]
pub fn linear_to_db(linear: f32) -> f32 {
    20.0 * linear.max(f32::MIN_POSITIVE).log10()
}

/// Frames in `duration_ms` at `sample_rate`, rounded down
///
/// Saturates at `usize::MAX`; callers bound durations before allocating.
#[must_use]
pub fn frames_for_ms(duration_ms: u64, sample_rate: u32) -> usize {
    let frames = u128::from(duration_ms) * u128::from(sample_rate) / 1000;
    usize::try_from(frames).unwrap_or(usize::MAX)
}
