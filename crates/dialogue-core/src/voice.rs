//! Voice configuration and speaker maps.
//!
//! A [`SpeakerMap`] binds each script speaker id to a [`VoiceConfig`]. It can be
//! built in code, loaded from a TOML document, or parsed from inline voice
//! specs of the form `A="SunHi,rate=180,pan=-0.3,gain=0"`.

use crate::error::{DialogueError, DialogueResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default speaking rate in words per minute
pub const DEFAULT_RATE_WPM: u32 = 180;

/// Default synthesis engine identifier
pub const DEFAULT_ENGINE: &str = "edge";

/// Default voice locale
pub const DEFAULT_LANGUAGE: &str = "ko-KR";

/// Speaking rate, either absolute or relative to the voice's default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RateRepr", into = "RateRepr")]
pub enum Rate {
    /// Words per minute
    Wpm(u32),
    /// Percent change from the voice default, e.g. `-10` for 10% slower
    Percent(i32),
}

impl Default for Rate {
    fn default() -> Self {
        Self::Wpm(DEFAULT_RATE_WPM)
    }
}

impl std::fmt::Display for Rate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wpm(wpm) => write!(f, "{wpm}"),
            Self::Percent(pct) => write!(f, "{pct:+}%"),
        }
    }
}

impl std::str::FromStr for Rate {
    type Err = DialogueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(pct) = s.strip_suffix('%') {
            let pct: i32 = pct
                .trim()
                .parse()
                .map_err(|_| DialogueError::configuration(format!("Invalid rate percentage: {s}")))?;
            if !(-90..=300).contains(&pct) {
                return Err(DialogueError::configuration(format!(
                    "Rate percentage must be between -90% and +300%, got {pct}%"
                )));
            }
            return Ok(Self::Percent(pct));
        }

        let wpm: u32 = s
            .parse()
            .map_err(|_| DialogueError::configuration(format!("Invalid rate: {s}")))?;
        if !(40..=600).contains(&wpm) {
            return Err(DialogueError::configuration(format!(
                "Rate must be between 40 and 600 words per minute, got {wpm}"
            )));
        }
        Ok(Self::Wpm(wpm))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RateRepr {
    Wpm(u32),
    Text(String),
}

impl TryFrom<RateRepr> for Rate {
    type Error = DialogueError;

    fn try_from(repr: RateRepr) -> Result<Self, Self::Error> {
        match repr {
            RateRepr::Wpm(wpm) => wpm.to_string().parse(),
            RateRepr::Text(text) => text.parse(),
        }
    }
}

impl From<Rate> for RateRepr {
    fn from(rate: Rate) -> Self {
        match rate {
            Rate::Wpm(wpm) => Self::Wpm(wpm),
            Rate::Percent(_) => Self::Text(rate.to_string()),
        }
    }
}

/// Resolved synthesis parameters for one speaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Synthesis engine identifier, matched against backend names
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Backend-specific voice name
    pub voice_name: String,
    /// Speaking rate
    #[serde(default)]
    pub rate: Rate,
    /// Gain applied to this speaker's audio, in dB
    #[serde(default)]
    pub gain_db: f32,
    /// Stereo position, -1.0 (left) to 1.0 (right)
    #[serde(default)]
    pub pan: f32,
    /// Language / locale, e.g. "ko-KR"
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_engine() -> String {
    DEFAULT_ENGINE.to_string()
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

impl VoiceConfig {
    /// Create a voice with default engine, rate, gain, pan and language
    #[must_use]
    pub fn new<S: Into<String>>(voice_name: S) -> Self {
        Self {
            engine: default_engine(),
            voice_name: voice_name.into(),
            rate: Rate::default(),
            gain_db: 0.0,
            pan: 0.0,
            language: default_language(),
        }
    }

    /// Set the engine identifier
    #[must_use]
    pub fn with_engine<S: Into<String>>(mut self, engine: S) -> Self {
        self.engine = engine.into();
        self
    }

    /// Set the speaking rate
    #[must_use]
    pub const fn with_rate(mut self, rate: Rate) -> Self {
        self.rate = rate;
        self
    }

    /// Set the gain in dB
    #[must_use]
    pub const fn with_gain_db(mut self, gain_db: f32) -> Self {
        self.gain_db = gain_db;
        self
    }

    /// Set the stereo position
    ///
    /// # Errors
    ///
    /// Returns an error if pan is not in the valid range (-1.0 to 1.0)
    pub fn with_pan(mut self, pan: f32) -> DialogueResult<Self> {
        if !(-1.0..=1.0).contains(&pan) {
            return Err(DialogueError::configuration(format!(
                "Pan must be between -1.0 and 1.0, got {pan}"
            )));
        }
        self.pan = pan;
        Ok(self)
    }

    /// Set the language / locale
    #[must_use]
    pub fn with_language<S: Into<String>>(mut self, language: S) -> Self {
        self.language = language.into();
        self
    }

    /// Validate voice configuration
    ///
    /// # Errors
    ///
    /// Returns an error for empty names, out-of-range pan or non-finite gain.
    pub fn validate(&self) -> DialogueResult<()> {
        if self.voice_name.trim().is_empty() {
            return Err(DialogueError::configuration("Voice name cannot be empty"));
        }

        if self.engine.trim().is_empty() {
            return Err(DialogueError::configuration("Engine identifier cannot be empty"));
        }

        if !(-1.0..=1.0).contains(&self.pan) {
            return Err(DialogueError::configuration(format!(
                "Pan must be between -1.0 and 1.0, got {}",
                self.pan
            )));
        }

        if !self.gain_db.is_finite() || self.gain_db.abs() > 48.0 {
            return Err(DialogueError::configuration(format!(
                "Gain must be within ±48 dB, got {}",
                self.gain_db
            )));
        }

        Ok(())
    }
}

/// One speaker's voice plus the alternative labels it answers to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerEntry {
    /// Voice used for this speaker
    pub voice: VoiceConfig,
    /// Other labels that resolve to this speaker (case-sensitive)
    pub aliases: Vec<String>,
}

impl SpeakerEntry {
    /// Create an entry without aliases
    #[must_use]
    pub const fn new(voice: VoiceConfig) -> Self {
        Self {
            voice,
            aliases: Vec::new(),
        }
    }

    /// Add aliases
    #[must_use]
    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }
}

/// Speaker id to voice mapping that keeps declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeakerMap {
    entries: Vec<(String, SpeakerEntry)>,
}

impl SpeakerMap {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a speaker, keeping its original position when replaced
    #[must_use]
    pub fn with_speaker<S: Into<String>>(mut self, id: S, entry: SpeakerEntry) -> Self {
        self.insert(id, entry);
        self
    }

    /// Add or replace a speaker, keeping its original position when replaced
    pub fn insert<S: Into<String>>(&mut self, id: S, entry: SpeakerEntry) {
        let id = id.into();
        if let Some(slot) = self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            slot.1 = entry;
        } else {
            self.entries.push((id, entry));
        }
    }

    /// Look up a speaker by exact id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&SpeakerEntry> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, entry)| entry)
    }

    /// Speaker ids in declaration order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    /// Entries in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SpeakerEntry)> {
        self.entries.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    /// Number of speakers
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no speakers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a map from inline voice specs like `A="SunHi,rate=180,pan=-0.3"`
    ///
    /// # Errors
    ///
    /// Returns a configuration error for the first malformed spec.
    pub fn from_voice_specs<I, S>(specs: I) -> DialogueResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = Self::new();
        for spec in specs {
            let (id, entry) = parse_voice_spec(spec.as_ref())?;
            map.insert(id, entry);
        }
        Ok(map)
    }

    /// Validate every voice and check that ids and aliases are unambiguous
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first problem found.
    pub fn validate(&self) -> DialogueResult<()> {
        let mut seen: Vec<&str> = Vec::new();
        for (id, entry) in &self.entries {
            if id.trim().is_empty() {
                return Err(DialogueError::configuration("Speaker id cannot be empty"));
            }
            entry
                .voice
                .validate()
                .map_err(|e| DialogueError::configuration(format!("Speaker '{id}': {e}")))?;

            for label in std::iter::once(id.as_str()).chain(entry.aliases.iter().map(String::as_str)) {
                if seen.contains(&label) && label != id {
                    return Err(DialogueError::configuration(format!(
                        "Label '{label}' is claimed by more than one speaker"
                    )));
                }
                seen.push(label);
            }
        }
        Ok(())
    }
}

/// Parse one inline voice spec: `<speaker>=<voice>[,key=value...]`
///
/// The first bare token is the voice name; `hint:name` sets both language and
/// voice name. Recognized keys: `voice`, `rate`, `pan`, `gain`, `lang`,
/// `engine`, `aliases` (`|`-separated).
///
/// # Errors
///
/// Returns a configuration error if the spec is malformed.
pub fn parse_voice_spec(spec: &str) -> DialogueResult<(String, SpeakerEntry)> {
    let (speaker, params) = spec
        .split_once('=')
        .ok_or_else(|| DialogueError::configuration(format!("Voice spec needs speaker=params: {spec}")))?;

    let speaker = speaker.trim();
    if speaker.is_empty() {
        return Err(DialogueError::configuration(format!("Voice spec has no speaker: {spec}")));
    }

    let params = params.trim().trim_matches(|c| c == '"' || c == '\'');
    let mut voice = VoiceConfig::new(String::new());
    let mut aliases = Vec::new();

    for param in params.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some((key, value)) = param.split_once('=') {
            let value = value.trim();
            match key.trim() {
                "voice" => voice.voice_name = value.to_string(),
                "rate" => voice.rate = value.parse()?,
                "pan" => {
                    let pan: f32 = value
                        .parse()
                        .map_err(|_| DialogueError::configuration(format!("Invalid pan `{value}` for {speaker}")))?;
                    voice = voice.with_pan(pan)?;
                }
                "gain" | "gain_db" => {
                    voice.gain_db = value
                        .parse()
                        .map_err(|_| DialogueError::configuration(format!("Invalid gain `{value}` for {speaker}")))?;
                }
                "lang" | "language" => voice.language = value.to_string(),
                "engine" => voice.engine = value.to_string(),
                "aliases" => aliases.extend(value.split('|').map(str::trim).filter(|a| !a.is_empty()).map(String::from)),
                other => {
                    return Err(DialogueError::configuration(format!(
                        "Unknown voice parameter `{other}` for {speaker}"
                    )))
                }
            }
        } else if let Some((hint, name)) = param.split_once(':') {
            voice.language = hint.trim().replace('_', "-");
            voice.voice_name = name.trim().to_string();
        } else {
            voice.voice_name = param.to_string();
        }
    }

    if voice.voice_name.is_empty() {
        return Err(DialogueError::configuration(format!("Voice spec for {speaker} has no voice name")));
    }
    voice.validate()?;

    Ok((speaker.to_string(), SpeakerEntry::new(voice).with_aliases(aliases)))
}

/// Complete speaker setup for one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeakerConfig {
    /// Speaker id to voice mapping
    pub map: SpeakerMap,
    /// Speaker used for labels that match nothing else
    pub default_speaker: Option<String>,
    /// Replacement names bound positionally to the map's speakers
    pub custom_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SpeakerDocument {
    #[serde(default)]
    default_speaker: Option<String>,
    #[serde(default)]
    custom_names: Vec<String>,
    #[serde(default, rename = "speaker")]
    speakers: Vec<SpeakerRecord>,
}

#[derive(Debug, Deserialize)]
struct SpeakerRecord {
    id: String,
    #[serde(alias = "voice_name")]
    voice: String,
    #[serde(default = "default_engine")]
    engine: String,
    #[serde(default, alias = "rate_wpm")]
    rate: Rate,
    #[serde(default)]
    gain_db: f32,
    #[serde(default)]
    pan: f32,
    #[serde(default = "default_language", alias = "lang")]
    language: String,
    #[serde(default)]
    aliases: Vec<String>,
}

impl SpeakerConfig {
    /// Create a config from a speaker map
    #[must_use]
    pub fn new(map: SpeakerMap) -> Self {
        Self {
            map,
            default_speaker: None,
            custom_names: Vec::new(),
        }
    }

    /// Set the fallback speaker
    #[must_use]
    pub fn with_default_speaker<S: Into<String>>(mut self, speaker: S) -> Self {
        self.default_speaker = Some(speaker.into());
        self
    }

    /// Set custom display names bound to speakers in declaration order
    #[must_use]
    pub fn with_custom_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.custom_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Parse a TOML speaker document
    ///
    /// ```toml
    /// default_speaker = "A"
    ///
    /// [[speaker]]
    /// id = "A"
    /// voice = "SunHi"
    /// rate = 180
    /// pan = -0.3
    /// aliases = ["화자A"]
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid TOML or invalid voices.
    pub fn from_toml_str(source: &str) -> DialogueResult<Self> {
        let document: SpeakerDocument = toml::from_str(source)?;

        let mut map = SpeakerMap::new();
        for record in document.speakers {
            let voice = VoiceConfig {
                engine: record.engine,
                voice_name: record.voice,
                rate: record.rate,
                gain_db: record.gain_db,
                pan: record.pan,
                language: record.language,
            };
            if map.get(&record.id).is_some() {
                return Err(DialogueError::configuration(format!(
                    "Speaker '{}' is declared twice",
                    record.id
                )));
            }
            map.insert(record.id, SpeakerEntry::new(voice).with_aliases(record.aliases));
        }
        map.validate()?;

        Ok(Self {
            map,
            default_speaker: document.default_speaker,
            custom_names: document.custom_names,
        })
    }

    /// Load a TOML speaker document from disk
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load<P: AsRef<Path>>(path: P) -> DialogueResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| DialogueError::file(format!("Failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }
}
