//! Sound-effect clip loading.

use crate::audio::PcmBuffer;
use crate::error::{DialogueError, DialogueResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Decodes sound-effect files referenced by `[sfx=...]` directives
#[async_trait]
pub trait ClipLoader: Send + Sync {
    /// Load and decode a clip
    ///
    /// # Errors
    ///
    /// Returns an error if the clip is missing or cannot be decoded.
    async fn load(&self, path: &Path) -> DialogueResult<PcmBuffer>;
}

/// Loads WAV clips, resolving relative paths against a base directory
#[derive(Debug, Clone, Default)]
pub struct WavClipLoader {
    base_dir: Option<PathBuf>,
}

impl WavClipLoader {
    /// Loader resolving relative paths against the working directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative paths against `base_dir`, usually the script's directory
    #[must_use]
    pub fn with_base_dir<P: Into<PathBuf>>(mut self, base_dir: P) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl ClipLoader for WavClipLoader {
    async fn load(&self, path: &Path) -> DialogueResult<PcmBuffer> {
        let path = self.resolve(path);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| DialogueError::file(format!("Cannot read {}: {e}", path.display())))?;
        let clip = PcmBuffer::from_wav_bytes(&bytes)?;
        debug!(
            "Loaded clip {} ({} Hz, {} ch, {:.2}s)",
            path.display(),
            clip.sample_rate(),
            clip.channels(),
            clip.duration_secs()
        );
        Ok(clip)
    }
}
