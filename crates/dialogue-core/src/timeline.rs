//! Fully resolved script: every event paired with its audio or failure.

use crate::audio::PcmBuffer;
use crate::error::{DialogueError, DialogueResult};
use crate::script::Event;
use crate::voice::VoiceConfig;
use std::path::PathBuf;
use std::sync::Arc;

/// One synthesized sentence
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Synthesized audio, before gain and pan
    pub audio: PcmBuffer,
    /// Backend that produced the audio
    pub backend: String,
    /// Whether the backend was not the voice's primary
    pub fallback: bool,
    /// Whether the audio came from the cache
    pub cached: bool,
}

/// A speech event that could not be synthesized
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisFailure {
    /// Last error seen
    pub error: DialogueError,
    /// Backend calls made across all backends
    pub attempts: u32,
}

/// What an event resolved to
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Speech audio, one segment per sentence
    Speech(Vec<Segment>),
    /// Silence directive
    Silence {
        /// Duration in milliseconds
        duration_ms: u64,
    },
    /// Decoded sound effect at the output sample rate
    Clip(PcmBuffer),
    /// Sound effect that could not be loaded
    MissingClip {
        /// Why loading failed
        reason: String,
    },
    /// Speech whose synthesis failed after retries and fallbacks
    Failed(SynthesisFailure),
}

/// Result for the event at `index`
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResult {
    /// Position of the event in the script
    pub index: usize,
    /// Resolved audio or failure
    pub resolution: Resolution,
}

/// A non-fatal problem surfaced alongside the output
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// A speech line failed and was replaced by silence
    SynthesisFailed {
        /// Script line
        line: usize,
        /// Final error
        error: DialogueError,
    },
    /// A speech line was produced by a non-primary backend
    BackendFallback {
        /// Script line
        line: usize,
        /// Backend that produced the audio
        backend: String,
    },
    /// A label matched nothing and used the default speaker
    DefaultSpeaker {
        /// Label as written
        label: String,
        /// Speaker used instead
        default: String,
    },
    /// A sound effect could not be loaded and was skipped
    MissingSoundEffect {
        /// Script line
        line: usize,
        /// Path from the directive
        path: PathBuf,
        /// Why loading failed
        reason: String,
    },
    /// Synthesized audio could not be written to the cache
    CacheWrite {
        /// Cache error message
        message: String,
    },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SynthesisFailed { line, error } => {
                write!(f, "line {line}: synthesis failed, inserted silence ({error})")
            }
            Self::BackendFallback { line, backend } => {
                write!(f, "line {line}: synthesized by fallback backend '{backend}'")
            }
            Self::DefaultSpeaker { label, default } => {
                write!(f, "speaker '{label}' not configured, using '{default}'")
            }
            Self::MissingSoundEffect { line, path, reason } => {
                write!(f, "line {line}: sound effect {} skipped ({reason})", path.display())
            }
            Self::CacheWrite { message } => write!(f, "cache write failed: {message}"),
        }
    }
}

/// An event with its voice and result
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    /// Parsed event
    pub event: Event,
    /// Voice for speech events
    pub voice: Option<Arc<VoiceConfig>>,
    /// What the event resolved to
    pub result: SynthesisResult,
}

/// Script-ordered, fully resolved events
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
}

impl Timeline {
    /// Zip events, voices and results into a timeline
    ///
    /// # Errors
    ///
    /// Returns an assembly error if the lengths differ or a result is out of place.
    pub fn new(
        events: Vec<Event>,
        voices: Vec<Option<Arc<VoiceConfig>>>,
        results: Vec<SynthesisResult>,
    ) -> DialogueResult<Self> {
        if events.len() != results.len() || events.len() != voices.len() {
            return Err(DialogueError::assembly(format!(
                "Timeline has {} events, {} voices and {} results",
                events.len(),
                voices.len(),
                results.len()
            )));
        }

        let entries = events
            .into_iter()
            .zip(voices)
            .zip(results)
            .enumerate()
            .map(|(i, ((event, voice), result))| {
                if result.index == i {
                    Ok(TimelineEntry { event, voice, result })
                } else {
                    Err(DialogueError::assembly(format!(
                        "Result for event {} found at position {i}",
                        result.index
                    )))
                }
            })
            .collect::<DialogueResult<Vec<_>>>()?;

        Ok(Self { entries })
    }

    /// Entries in script order
    #[must_use]
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the timeline is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Failures, fallbacks and missing clips, in script order
    #[must_use]
    pub fn warnings(&self) -> Vec<Warning> {
        let mut warnings = Vec::new();
        for entry in &self.entries {
            let line = entry.event.line_number();
            match &entry.result.resolution {
                Resolution::Failed(failure) => warnings.push(Warning::SynthesisFailed {
                    line,
                    error: failure.error.clone(),
                }),
                Resolution::Speech(segments) => {
                    let mut seen: Vec<&str> = Vec::new();
                    for segment in segments.iter().filter(|s| s.fallback) {
                        if !seen.contains(&segment.backend.as_str()) {
                            seen.push(&segment.backend);
                            warnings.push(Warning::BackendFallback {
                                line,
                                backend: segment.backend.clone(),
                            });
                        }
                    }
                }
                Resolution::MissingClip { reason } => {
                    if let Event::SoundEffect { path, .. } = &entry.event {
                        warnings.push(Warning::MissingSoundEffect {
                            line,
                            path: path.clone(),
                            reason: reason.clone(),
                        });
                    }
                }
                Resolution::Silence { .. } | Resolution::Clip(_) => {}
            }
        }
        warnings
    }
}
