//! Deterministic mixdown of a [`Timeline`] into one buffer.
//!
//! Entries are rendered in script order and joined with a fixed gap, or with
//! a crossfade when the gap is zero and both neighbours are speech. Sentences
//! inside a speech entry are joined with a short breath and a crossfade.
//! Normalization runs once over the finished buffer.

use crate::audio::{frames_for_ms, PcmBuffer};
use crate::error::{DialogueError, DialogueResult};
use crate::loudness::Normalization;
use crate::script::Event;
use crate::timeline::{Resolution, Segment, Timeline, TimelineEntry};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Mixdown settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyOptions {
    /// Output sample rate; every input must already match it
    pub sample_rate: u32,
    /// Produce two channels and apply pan
    pub stereo: bool,
    /// Silence between timeline entries
    pub gap_ms: u64,
    /// Crossfade length between sentences, and between entries when `gap_ms` is 0
    pub crossfade_ms: u64,
    /// Pause inserted between sentences of one speech line
    pub breath_ms: u64,
    /// Silence rendered in place of a failed speech line
    pub failure_silence_ms: u64,
    /// Output normalization
    pub normalization: Normalization,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            sample_rate: crate::DEFAULT_SAMPLE_RATE,
            stereo: false,
            gap_ms: crate::DEFAULT_GAP_MS,
            crossfade_ms: crate::DEFAULT_CROSSFADE_MS,
            breath_ms: crate::DEFAULT_BREATH_MS,
            failure_silence_ms: 1000,
            normalization: Normalization::default(),
        }
    }
}

impl AssemblyOptions {
    /// Set stereo output
    #[must_use]
    pub const fn with_stereo(mut self, stereo: bool) -> Self {
        self.stereo = stereo;
        self
    }

    /// Set the inter-entry gap
    #[must_use]
    pub const fn with_gap_ms(mut self, gap_ms: u64) -> Self {
        self.gap_ms = gap_ms;
        self
    }

    /// Set the normalization mode
    #[must_use]
    pub const fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    /// Output channel count
    #[must_use]
    pub const fn channels(&self) -> u16 {
        if self.stereo {
            2
        } else {
            1
        }
    }

    /// Validate assembly options
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unsupported sample rate, a
    /// non-finite normalization target, or a duration above
    /// [`crate::MAX_SILENCE_MS`].
    pub fn validate(&self) -> DialogueResult<()> {
        if !(8000..=192_000).contains(&self.sample_rate) {
            return Err(DialogueError::configuration(format!(
                "Sample rate must be between 8000 and 192000 Hz, got {}",
                self.sample_rate
            )));
        }
        match self.normalization {
            Normalization::Peak(target) if !target.is_finite() || target > 0.0 => {
                return Err(DialogueError::configuration(format!(
                    "Peak target must be at most 0 dBFS, got {target}"
                )))
            }
            Normalization::Loudness(target) if !target.is_finite() || target > 0.0 => {
                return Err(DialogueError::configuration(format!(
                    "Loudness target must be below 0 LUFS, got {target}"
                )))
            }
            _ => {}
        }
        for (name, duration_ms) in [
            ("gap_ms", self.gap_ms),
            ("crossfade_ms", self.crossfade_ms),
            ("breath_ms", self.breath_ms),
            ("failure_silence_ms", self.failure_silence_ms),
        ] {
            if duration_ms > crate::MAX_SILENCE_MS {
                return Err(DialogueError::configuration(format!(
                    "{name} must be at most {} ms, got {duration_ms}",
                    crate::MAX_SILENCE_MS
                )));
            }
        }
        Ok(())
    }
}

/// Mix a timeline into a single buffer
///
/// # Errors
///
/// Returns a configuration error for invalid options, and an assembly error
/// if any audio has the wrong sample rate or more than two channels or a
/// silence is longer than [`crate::MAX_SILENCE_MS`].
pub fn assemble(timeline: &Timeline, options: &AssemblyOptions) -> DialogueResult<PcmBuffer> {
    options.validate()?;
    let mixer = Mixer::new(options);
    let mut output = PcmBuffer::empty(options.sample_rate, options.channels());
    let mut previous_speech: Option<bool> = None;

    for entry in timeline.entries() {
        let Some(rendered) = mixer.render(entry)? else {
            continue;
        };
        let is_speech = matches!(entry.result.resolution, Resolution::Speech(_));

        match previous_speech {
            None => output.append(&rendered)?,
            Some(_) if options.gap_ms > 0 => {
                output.append(&mixer.silence(options.gap_ms)?)?;
                output.append(&rendered)?;
            }
            Some(true) if is_speech => output.crossfade_append(&rendered, mixer.crossfade_frames)?,
            Some(_) => output.append(&rendered)?,
        }
        previous_speech = Some(is_speech);
    }

    options.normalization.apply(&mut output);
    debug!(
        "Assembled {} entries into {:.2}s of {}-channel audio",
        timeline.len(),
        output.duration_secs(),
        output.channels()
    );
    Ok(output)
}

struct Mixer<'a> {
    options: &'a AssemblyOptions,
    crossfade_frames: usize,
}

impl<'a> Mixer<'a> {
    fn new(options: &'a AssemblyOptions) -> Self {
        Self {
            options,
            crossfade_frames: frames_for_ms(options.crossfade_ms, options.sample_rate),
        }
    }

    fn silence(&self, duration_ms: u64) -> DialogueResult<PcmBuffer> {
        if duration_ms > crate::MAX_SILENCE_MS {
            return Err(DialogueError::assembly(format!(
                "Silence of {duration_ms} ms exceeds the {} ms limit",
                crate::MAX_SILENCE_MS
            )));
        }
        Ok(PcmBuffer::silence_ms(duration_ms, self.options.sample_rate, self.options.channels()))
    }

    /// Render one entry, or `None` when it contributes nothing
    fn render(&self, entry: &TimelineEntry) -> DialogueResult<Option<PcmBuffer>> {
        match (&entry.result.resolution, &entry.event) {
            (Resolution::Speech(segments), _) => {
                let (gain_db, pan) = entry.voice.as_ref().map_or((0.0, 0.0), |v| (v.gain_db, v.pan));
                self.render_speech(segments, gain_db, pan).map(Some)
            }
            (Resolution::Failed(_), _) => self.silence(self.options.failure_silence_ms).map(Some),
            (Resolution::Silence { duration_ms }, _) => self.silence(*duration_ms).map(Some),
            (Resolution::Clip(clip), Event::SoundEffect { volume_db, pan, .. }) => {
                self.place(clip, *volume_db, *pan).map(Some)
            }
            (Resolution::Clip(clip), _) => self.place(clip, 0.0, 0.0).map(Some),
            (Resolution::MissingClip { .. }, _) => Ok(None),
        }
    }

    fn render_speech(&self, segments: &[Segment], gain_db: f32, pan: f32) -> DialogueResult<PcmBuffer> {
        let mut joined = PcmBuffer::empty(self.options.sample_rate, self.options.channels());
        for (i, segment) in segments.iter().enumerate() {
            let placed = self.place(&segment.audio, gain_db, pan)?;
            if i == 0 {
                joined.append(&placed)?;
            } else {
                joined.append(&self.silence(self.options.breath_ms)?)?;
                joined.crossfade_append(&placed, self.crossfade_frames)?;
            }
        }
        Ok(joined)
    }

    /// Apply gain and pan and convert to the output channel layout
    fn place(&self, audio: &PcmBuffer, gain_db: f32, pan: f32) -> DialogueResult<PcmBuffer> {
        if audio.sample_rate() != self.options.sample_rate {
            return Err(DialogueError::assembly(format!(
                "Segment is {} Hz but output is {} Hz",
                audio.sample_rate(),
                self.options.sample_rate
            )));
        }
        if audio.channels() > 2 {
            return Err(DialogueError::assembly(format!(
                "Segment has {} channels; at most 2 are supported",
                audio.channels()
            )));
        }

        let mut placed = if self.options.stereo {
            audio.to_stereo(pan)?
        } else {
            audio.to_mono()
        };
        placed.apply_gain_db(gain_db);
        Ok(placed)
    }
}
