//! Dialog script parsing.
//!
//! A script is UTF-8 text with one unit per line:
//!
//! ```text
//! # comment
//! A: 안녕하세요.
//! B： 반갑습니다.
//! [silence=1s]
//! [sfx=door.wav vol=-6 pan=+0.3]
//! ```
//!
//! Lines wrapped in `[...]` are directives and are never turned into speech.
//! Anything that is neither blank, a comment, a directive nor a speaker line is
//! a parse error; nothing is dropped silently.

use crate::error::{DialogueError, DialogueResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use unicode_normalization::UnicodeNormalization;

/// `<label><: or ：><text>`; the label stops at the first colon of either kind.
static SPEAKER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<label>[^:：]+)[:：](?P<text>.*)$").expect("speaker line pattern is valid")
});

/// Integer milliseconds, or seconds with an optional fraction.
static DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<value>\d+(?:\.\d+)?)(?P<unit>ms|s)?$").expect("duration pattern is valid")
});

static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.?!？！…]+").expect("sentence pattern is valid"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// One parsed unit of a dialog script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A line spoken by a speaker
    Speech {
        /// Speaker label as written in the script
        speaker_id: String,
        /// Text to synthesize, trimmed
        text: String,
        /// 1-based script line
        line_number: usize,
    },
    /// An explicit pause
    Silence {
        /// Pause length in milliseconds
        duration_ms: u64,
        /// 1-based script line
        line_number: usize,
    },
    /// A sound effect clip mixed into the timeline
    SoundEffect {
        /// Clip path as written in the directive
        path: PathBuf,
        /// Volume adjustment in dB
        volume_db: f32,
        /// Stereo position, -1.0 (left) to 1.0 (right)
        pan: f32,
        /// 1-based script line
        line_number: usize,
    },
}

impl Event {
    /// Script line this event came from
    #[must_use]
    pub const fn line_number(&self) -> usize {
        match self {
            Self::Speech { line_number, .. }
            | Self::Silence { line_number, .. }
            | Self::SoundEffect { line_number, .. } => *line_number,
        }
    }

    /// Whether this event needs a synthesis backend
    #[must_use]
    pub const fn is_speech(&self) -> bool {
        matches!(self, Self::Speech { .. })
    }

    /// Short human-readable description for progress messages
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Speech { speaker_id, text, .. } => {
                let preview: String = text.chars().take(40).collect();
                format!("{speaker_id}: {preview}")
            }
            Self::Silence { duration_ms, .. } => format!("[silence {duration_ms}ms]"),
            Self::SoundEffect { path, .. } => format!("[sfx {}]", path.display()),
        }
    }
}

/// A dialog script that can be iterated lazily, any number of times
#[derive(Debug, Clone, Copy)]
pub struct Script<'a> {
    source: &'a str,
}

impl<'a> Script<'a> {
    /// Wrap script text. A leading byte-order mark is ignored.
    #[must_use]
    pub fn new(source: &'a str) -> Self {
        Self {
            source: source.strip_prefix('\u{feff}').unwrap_or(source),
        }
    }

    /// Iterate the script's events from the first line
    #[must_use]
    pub fn events(&self) -> Events<'a> {
        Events {
            lines: self.source.lines().enumerate(),
        }
    }

    /// Parse every line, stopping at the first error
    ///
    /// # Errors
    ///
    /// Returns [`DialogueError::Parse`] for the first malformed line.
    pub fn parse(&self) -> DialogueResult<Vec<Event>> {
        self.events().collect()
    }

    /// Distinct speaker labels in order of first appearance
    ///
    /// # Errors
    ///
    /// Returns [`DialogueError::Parse`] for the first malformed line.
    pub fn speakers(&self) -> DialogueResult<Vec<String>> {
        let mut speakers: Vec<String> = Vec::new();
        for event in self.events() {
            if let Event::Speech { speaker_id, .. } = event? {
                if !speakers.contains(&speaker_id) {
                    speakers.push(speaker_id);
                }
            }
        }
        Ok(speakers)
    }
}

/// Lazy event iterator over a [`Script`]
#[derive(Debug, Clone)]
pub struct Events<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
}

impl Iterator for Events<'_> {
    type Item = DialogueResult<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        for (index, raw) in self.lines.by_ref() {
            if let Some(result) = parse_line(raw, index + 1) {
                return Some(result);
            }
        }
        None
    }
}

/// Parse a whole script into events
///
/// # Errors
///
/// Returns [`DialogueError::Parse`] for the first malformed line.
pub fn parse_script(source: &str) -> DialogueResult<Vec<Event>> {
    Script::new(source).parse()
}

/// Parse one line; `None` means the line produces no event.
fn parse_line(raw: &str, line_number: usize) -> Option<DialogueResult<Event>> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if line.starts_with('[') {
        return Some(parse_directive(line, raw, line_number));
    }

    let Some(captures) = SPEAKER_LINE.captures(line) else {
        return Some(Err(DialogueError::parse(
            line_number,
            raw,
            "expected `speaker: text`, a [directive], or a # comment",
        )));
    };

    let label = captures["label"].trim();
    if label.is_empty() {
        return Some(Err(DialogueError::parse(line_number, raw, "empty speaker label")));
    }

    let text = captures["text"].trim();
    if text.is_empty() {
        return None;
    }

    Some(Ok(Event::Speech {
        speaker_id: label.to_string(),
        text: text.to_string(),
        line_number,
    }))
}

fn parse_directive(line: &str, raw: &str, line_number: usize) -> DialogueResult<Event> {
    let content = line
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| DialogueError::parse(line_number, raw, "unterminated directive"))?
        .trim();

    let mut tokens = content.split_whitespace();
    let head = tokens
        .next()
        .ok_or_else(|| DialogueError::parse(line_number, raw, "empty directive"))?;
    let (key, value) = head
        .split_once('=')
        .ok_or_else(|| DialogueError::parse(line_number, raw, "directive must be key=value"))?;

    match key.trim() {
        "silence" => {
            if let Some(extra) = tokens.next() {
                return Err(DialogueError::parse(
                    line_number,
                    raw,
                    format!("unexpected silence parameter `{extra}`"),
                ));
            }
            let duration_ms = parse_duration_ms(value.trim())
                .ok_or_else(|| DialogueError::parse(line_number, raw, format!("invalid duration `{value}`")))?;
            if duration_ms > crate::MAX_SILENCE_MS {
                return Err(DialogueError::parse(
                    line_number,
                    raw,
                    format!("silence of {duration_ms} ms exceeds the {} ms limit", crate::MAX_SILENCE_MS),
                ));
            }
            Ok(Event::Silence {
                duration_ms,
                line_number,
            })
        }
        "sfx" => {
            let path = value.trim();
            if path.is_empty() {
                return Err(DialogueError::parse(line_number, raw, "sfx directive needs a path"));
            }

            let mut volume_db = 0.0_f32;
            let mut pan = 0.0_f32;
            for token in tokens {
                let (param, val) = token.split_once('=').ok_or_else(|| {
                    DialogueError::parse(line_number, raw, format!("expected param=value, got `{token}`"))
                })?;
                let number: f32 = val.parse().map_err(|_| {
                    DialogueError::parse(line_number, raw, format!("`{param}` is not a number: `{val}`"))
                })?;
                if !number.is_finite() {
                    return Err(DialogueError::parse(line_number, raw, format!("`{param}` must be finite")));
                }
                match param.to_ascii_lowercase().as_str() {
                    "vol" => volume_db = number,
                    "pan" => pan = number.clamp(-1.0, 1.0),
                    other => {
                        return Err(DialogueError::parse(
                            line_number,
                            raw,
                            format!("unknown sfx parameter `{other}`"),
                        ))
                    }
                }
            }

            Ok(Event::SoundEffect {
                path: PathBuf::from(path),
                volume_db,
                pan,
                line_number,
            })
        }
        other => Err(DialogueError::parse(
            line_number,
            raw,
            format!("unknown directive `{other}`"),
        )),
    }
}

/// Parse `400`, `400ms`, `1s` or `1.5s` into milliseconds.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn parse_duration_ms(value: &str) -> Option<u64> {
    let captures = DURATION.captures(value)?;
    let number = &captures["value"];
    let unit = captures
        .name("unit")
        .map(|m| m.as_str().to_ascii_lowercase());

    match unit.as_deref() {
        Some("s") => {
            let seconds: f64 = number.parse().ok()?;
            Some((seconds * 1000.0).round() as u64)
        }
        // milliseconds must be whole
        _ => number.parse().ok(),
    }
}

/// Normalize text for synthesis and cache keys: NFC, collapsed whitespace.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let composed: String = text.nfc().collect();
    WHITESPACE.replace_all(composed.trim(), " ").into_owned()
}

/// Split text after sentence-ending punctuation, keeping the punctuation.
///
/// Text without any terminator comes back as a single sentence.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for terminator in SENTENCE_END.find_iter(text) {
        let sentence = text[start..terminator.end()].trim();
        if !sentence.is_empty() && sentence.chars().any(char::is_alphanumeric) {
            sentences.push(sentence.to_string());
        } else if let Some(last) = sentences.last_mut() {
            // stray punctuation belongs to the previous sentence
            last.push_str(sentence);
        }
        start = terminator.end();
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }

    if sentences.is_empty() {
        vec![text.trim().to_string()]
    } else {
        sentences
    }
}
