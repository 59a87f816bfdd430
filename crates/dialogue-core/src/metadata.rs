//! JSON sidecar describing how a composition was produced.

use crate::dispatcher::DispatchStats;
use crate::engine::Composition;
use crate::error::{DialogueError, DialogueResult};
use crate::voice::{SpeakerConfig, VoiceConfig};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

/// One configured speaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerMetadata {
    /// Speaker id
    pub id: String,
    /// Voice parameters
    pub voice: VoiceConfig,
    /// Alternative labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

/// Description of a finished composition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionMetadata {
    /// Library version that produced the audio
    pub generator: String,
    /// SHA-256 of the script text
    pub script_sha256: String,
    /// Speakers in declaration order
    pub speakers: Vec<SpeakerMetadata>,
    /// Output length in seconds
    pub duration_secs: f64,
    /// Output sample rate
    pub sample_rate: u32,
    /// Output channel count
    pub channels: u16,
    /// Human-readable warnings
    pub warnings: Vec<String>,
    /// Dispatch counters
    pub stats: DispatchStats,
}

impl CompositionMetadata {
    /// Describe `composition`, produced from `script` with `speakers`
    #[must_use]
    pub fn new(script: &str, speakers: &SpeakerConfig, composition: &Composition) -> Self {
        let script_sha256 = hex::encode(Sha256::digest(script.as_bytes()));

        Self {
            generator: format!("dialogue-core {}", crate::VERSION),
            script_sha256,
            speakers: speakers
                .map
                .iter()
                .map(|(id, entry)| SpeakerMetadata {
                    id: id.to_string(),
                    voice: entry.voice.clone(),
                    aliases: entry.aliases.clone(),
                })
                .collect(),
            duration_secs: composition.audio.duration_secs(),
            sample_rate: composition.audio.sample_rate(),
            channels: composition.audio.channels(),
            warnings: composition.warnings.iter().map(ToString::to_string).collect(),
            stats: composition.stats,
        }
    }

    /// Pretty-printed JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> DialogueResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse metadata JSON
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not describe a composition.
    pub fn from_json(json: &str) -> DialogueResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the JSON sidecar
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn write<P: AsRef<Path>>(&self, path: P) -> DialogueResult<()> {
        let path = path.as_ref();
        tokio::fs::write(path, self.to_json()?)
            .await
            .map_err(|e| DialogueError::file(format!("Failed to write {}: {e}", path.display())))?;
        info!("Wrote composition metadata to {}", path.display());
        Ok(())
    }
}
