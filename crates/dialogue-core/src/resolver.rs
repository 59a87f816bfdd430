//! Speaker label to voice resolution.

use crate::error::{DialogueError, DialogueResult};
use crate::script::Event;
use crate::timeline::Warning;
use crate::voice::{SpeakerConfig, VoiceConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// How a label was matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// The label is a speaker id
    Exact,
    /// The label is one of a speaker's aliases
    Alias,
    /// Nothing matched; the configured default speaker was used
    Default,
}

/// A resolved speaker
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSpeaker {
    /// Canonical speaker id after any custom-name remapping
    pub speaker_id: String,
    /// Voice to synthesize with
    pub voice: Arc<VoiceConfig>,
    /// How the label was matched
    pub matched_by: MatchKind,
}

#[derive(Debug, Clone)]
struct ResolvedEntry {
    id: String,
    voice: Arc<VoiceConfig>,
}

/// Maps script labels to voices: exact id, then alias, then default speaker
#[derive(Debug, Clone)]
pub struct SpeakerResolver {
    entries: Vec<ResolvedEntry>,
    exact: HashMap<String, usize>,
    aliases: HashMap<String, usize>,
    default: Option<usize>,
}

impl SpeakerResolver {
    /// Build a resolver from a speaker configuration
    ///
    /// Custom names are bound to speakers in the map's declaration order: the
    /// i-th name becomes the id of the i-th speaker and its old id stays
    /// resolvable as an alias.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the map is invalid, there are more
    /// custom names than speakers, or the default speaker does not exist.
    pub fn new(config: &SpeakerConfig) -> DialogueResult<Self> {
        config.map.validate()?;

        if config.custom_names.len() > config.map.len() {
            return Err(DialogueError::configuration(format!(
                "{} custom names given for {} speakers",
                config.custom_names.len(),
                config.map.len()
            )));
        }

        let mut entries = Vec::with_capacity(config.map.len());
        let mut exact = HashMap::new();
        let mut aliases = HashMap::new();

        for (index, (id, entry)) in config.map.iter().enumerate() {
            let canonical = match config.custom_names.get(index) {
                Some(name) if !name.trim().is_empty() => {
                    let name = name.trim().to_string();
                    if name != id {
                        aliases.insert(id.to_string(), index);
                    }
                    name
                }
                _ => id.to_string(),
            };

            if exact.insert(canonical.clone(), index).is_some() {
                return Err(DialogueError::configuration(format!(
                    "Speaker name '{canonical}' is used twice"
                )));
            }
            for alias in &entry.aliases {
                aliases.entry(alias.clone()).or_insert(index);
            }

            entries.push(ResolvedEntry {
                id: canonical,
                voice: Arc::new(entry.voice.clone()),
            });
        }

        let default = match config.default_speaker.as_deref() {
            None => None,
            Some(label) => Some(
                exact
                    .get(label)
                    .or_else(|| aliases.get(label))
                    .copied()
                    .ok_or_else(|| {
                        DialogueError::configuration(format!("Default speaker '{label}' is not in the speaker map"))
                    })?,
            ),
        };

        Ok(Self {
            entries,
            exact,
            aliases,
            default,
        })
    }

    /// Resolve a single label
    ///
    /// # Errors
    ///
    /// Returns `UnknownSpeaker` if nothing matches and there is no default.
    pub fn resolve(&self, label: &str, line: usize) -> DialogueResult<ResolvedSpeaker> {
        let (index, matched_by) = if let Some(&index) = self.exact.get(label) {
            (index, MatchKind::Exact)
        } else if let Some(&index) = self.aliases.get(label) {
            (index, MatchKind::Alias)
        } else if let Some(index) = self.default {
            (index, MatchKind::Default)
        } else {
            return Err(DialogueError::unknown_speaker(label, line));
        };

        let entry = &self.entries[index];
        Ok(ResolvedSpeaker {
            speaker_id: entry.id.clone(),
            voice: Arc::clone(&entry.voice),
            matched_by,
        })
    }

    /// Resolve every speech event before any synthesis starts
    ///
    /// Returns one slot per event (`None` for directives) and a
    /// `DefaultSpeaker` warning for each distinct label that fell back.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSpeaker` for the first unresolvable label.
    pub fn resolve_events(&self, events: &[Event]) -> DialogueResult<(Vec<Option<Arc<VoiceConfig>>>, Vec<Warning>)> {
        let mut voices = Vec::with_capacity(events.len());
        let mut warnings = Vec::new();
        let mut warned: Vec<&str> = Vec::new();

        for event in events {
            let Event::Speech {
                speaker_id,
                line_number,
                ..
            } = event
            else {
                voices.push(None);
                continue;
            };

            let resolved = self.resolve(speaker_id, *line_number)?;
            if resolved.matched_by == MatchKind::Default && !warned.contains(&speaker_id.as_str()) {
                debug!("Label '{}' falls back to default speaker '{}'", speaker_id, resolved.speaker_id);
                warned.push(speaker_id.as_str());
                warnings.push(Warning::DefaultSpeaker {
                    label: speaker_id.clone(),
                    default: resolved.speaker_id.clone(),
                });
            }
            voices.push(Some(resolved.voice));
        }

        Ok((voices, warnings))
    }

    /// Canonical speaker ids in declaration order
    pub fn speaker_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.id.as_str())
    }
}
