//! Content-addressed synthesis cache.
//!
//! Keys are SHA-256 digests of the normalized text, every voice parameter and
//! the output sample rate, so identical requests always map to the same entry.
//! Entries are never evicted.

use crate::audio::PcmBuffer;
use crate::error::{DialogueError, DialogueResult};
use crate::script::normalize_text;
use crate::voice::VoiceConfig;
use crate::writer::{AudioWriter, EncodingSettings};
use async_trait::async_trait;
use directories::ProjectDirs;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Bumped whenever the key encoding or stored audio format changes
const CACHE_KEY_VERSION: &str = "dialogue-cache-v1";

/// Hex SHA-256 identifying one synthesized segment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for `text` spoken by `voice` at `sample_rate`
    #[must_use]
    pub fn new(text: &str, voice: &VoiceConfig, sample_rate: u32) -> Self {
        let mut hasher = Sha256::new();
        // Length-prefixed fields so no two field sequences share an encoding
        let mut field = |value: &[u8]| {
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value);
        };
        field(CACHE_KEY_VERSION.as_bytes());
        field(normalize_text(text).as_bytes());
        field(voice.engine.as_bytes());
        field(voice.voice_name.as_bytes());
        field(voice.rate.to_string().as_bytes());
        field(&voice.gain_db.to_bits().to_le_bytes());
        field(&voice.pan.to_bits().to_le_bytes());
        field(voice.language.as_bytes());
        field(&sample_rate.to_le_bytes());

        Self(hex::encode(hasher.finalize()))
    }

    /// Hex digest
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One cached segment
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    audio: PcmBuffer,
}

impl CacheEntry {
    /// Wrap synthesized audio
    #[must_use]
    pub const fn new(audio: PcmBuffer) -> Self {
        Self { audio }
    }

    /// Cached audio
    #[must_use]
    pub const fn audio(&self) -> &PcmBuffer {
        &self.audio
    }
}

/// Storage for synthesized segments, shared by all dispatcher workers
#[async_trait]
pub trait SynthesisCache: Send + Sync {
    /// Look up an entry
    ///
    /// # Errors
    ///
    /// Returns a cache error if the store cannot be read.
    async fn get(&self, key: &CacheKey) -> DialogueResult<Option<Arc<CacheEntry>>>;

    /// Store an entry; a concurrent put for the same key wins or loses whole
    ///
    /// # Errors
    ///
    /// Returns a cache error if the entry cannot be stored.
    async fn put(&self, key: &CacheKey, entry: CacheEntry) -> DialogueResult<()>;

    /// Remove every entry
    ///
    /// # Errors
    ///
    /// Returns a cache error if entries cannot be removed.
    async fn clear(&self) -> DialogueResult<()>;

    /// Number of entries
    async fn len(&self) -> usize;

    /// Whether the cache holds no entries
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// In-process cache
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
}

impl MemoryCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SynthesisCache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> DialogueResult<Option<Arc<CacheEntry>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &CacheKey, entry: CacheEntry) -> DialogueResult<()> {
        self.entries.write().insert(key.clone(), Arc::new(entry));
        Ok(())
    }

    async fn clear(&self) -> DialogueResult<()> {
        self.entries.write().clear();
        Ok(())
    }

    async fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Cache of float WAV files named `<key>.wav` in one directory
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    /// Open (and create) a cache directory
    ///
    /// # Errors
    ///
    /// Returns a cache error if the directory cannot be created.
    pub fn new<P: Into<PathBuf>>(dir: P) -> DialogueResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| DialogueError::cache(format!("Failed to create cache dir {}: {e}", dir.display())))?;
        debug!("Disk cache at {}", dir.display());
        Ok(Self { dir })
    }

    /// Platform cache directory for synthesized segments
    #[must_use]
    pub fn default_dir() -> Option<PathBuf> {
        ProjectDirs::from("ai", "Dialogue", "dialogue").map(|dirs| dirs.cache_dir().join("synthesis"))
    }

    /// Cache directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.wav"))
    }

    async fn entry_files(&self) -> DialogueResult<Vec<(PathBuf, u64)>> {
        let mut files = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| DialogueError::cache(format!("Failed to read cache dir {}: {e}", self.dir.display())))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| DialogueError::cache(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("wav") {
                let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                files.push((path, size));
            }
        }
        Ok(files)
    }

    /// Total size of cached audio in bytes
    ///
    /// # Errors
    ///
    /// Returns a cache error if the directory cannot be listed.
    pub async fn size_bytes(&self) -> DialogueResult<u64> {
        Ok(self.entry_files().await?.iter().map(|(_, size)| size).sum())
    }
}

#[async_trait]
impl SynthesisCache for DiskCache {
    async fn get(&self, key: &CacheKey) -> DialogueResult<Option<Arc<CacheEntry>>> {
        let path = self.entry_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DialogueError::cache(format!("Failed to read {}: {e}", path.display()))),
        };

        match PcmBuffer::from_wav_bytes(&bytes) {
            Ok(audio) => Ok(Some(Arc::new(CacheEntry::new(audio)))),
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &CacheKey, entry: CacheEntry) -> DialogueResult<()> {
        let bytes = AudioWriter::with_settings(EncodingSettings::float32())
            .encode(entry.audio())
            .map_err(|e| DialogueError::cache(e.to_string()))?;

        let path = self.entry_path(key);
        let temp = self.dir.join(format!(".{key}.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|e| DialogueError::cache(format!("Failed to write {}: {e}", temp.display())))?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(DialogueError::cache(format!("Failed to store {}: {e}", path.display())));
        }
        debug!("Cached segment {}", key);
        Ok(())
    }

    async fn clear(&self) -> DialogueResult<()> {
        for (path, _) in self.entry_files().await? {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| DialogueError::cache(format!("Failed to remove {}: {e}", path.display())))?;
        }
        Ok(())
    }

    async fn len(&self) -> usize {
        self.entry_files().await.map(|files| files.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::Rate;
    use tempfile::TempDir;

    fn tone() -> PcmBuffer {
        PcmBuffer::mono(vec![0.1, 0.2, -0.3, 0.4], 24_000)
    }

    #[test]
    fn test_key_is_deterministic() {
        let voice = VoiceConfig::new("SunHi");
        let a = CacheKey::new("안녕하세요", &voice, 24_000);
        let b = CacheKey::new("안녕하세요", &voice, 24_000);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_key_ignores_whitespace_differences() {
        let voice = VoiceConfig::new("SunHi");
        assert_eq!(
            CacheKey::new("Hello   there ", &voice, 24_000),
            CacheKey::new("Hello there", &voice, 24_000)
        );
    }

    #[test]
    fn test_key_covers_every_voice_field() {
        let base = VoiceConfig::new("SunHi");
        let key = CacheKey::new("text", &base, 24_000);

        let variants = [
            base.clone().with_engine("http"),
            VoiceConfig::new("InJoon"),
            base.clone().with_rate(Rate::Percent(10)),
            base.clone().with_gain_db(1.0),
            base.clone().with_pan(0.5).unwrap(),
            base.clone().with_language("en-US"),
        ];
        for variant in &variants {
            assert_ne!(CacheKey::new("text", variant, 24_000), key, "{variant:?}");
        }
        assert_ne!(CacheKey::new("text", &base, 48_000), key);
        assert_ne!(CacheKey::new("other", &base, 24_000), key);
    }

    #[tokio::test]
    async fn test_memory_cache() {
        let cache = MemoryCache::new();
        let key = CacheKey::new("a", &VoiceConfig::new("v"), 24_000);
        assert!(cache.get(&key).await.unwrap().is_none());
        assert!(cache.is_empty().await);

        cache.put(&key, CacheEntry::new(tone())).await.unwrap();
        cache.put(&key, CacheEntry::new(tone())).await.unwrap();
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get(&key).await.unwrap().unwrap().audio(), &tone());

        cache.clear().await.unwrap();
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_disk_cache_roundtrip() {
        let temp_dir = TempDir::new().expect("Should create temp dir");
        let cache = DiskCache::new(temp_dir.path().join("cache")).unwrap();
        let key = CacheKey::new("a", &VoiceConfig::new("v"), 24_000);

        assert!(cache.get(&key).await.unwrap().is_none());
        cache.put(&key, CacheEntry::new(tone())).await.unwrap();

        let entry = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(entry.audio(), &tone());
        assert_eq!(cache.len().await, 1);
        assert!(cache.size_bytes().await.unwrap() > 0);
        assert!(cache.dir().join(format!("{key}.wav")).exists());

        cache.clear().await.unwrap();
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_disk_cache_concurrent_writers_same_key() {
        let temp_dir = TempDir::new().expect("Should create temp dir");
        let cache = Arc::new(DiskCache::new(temp_dir.path()).unwrap());
        let key = CacheKey::new("race", &VoiceConfig::new("v"), 24_000);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                cache.put(&key, CacheEntry::new(tone())).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get(&key).await.unwrap().unwrap().audio(), &tone());
    }

    #[tokio::test]
    async fn test_disk_cache_ignores_corrupt_entry() {
        let temp_dir = TempDir::new().expect("Should create temp dir");
        let cache = DiskCache::new(temp_dir.path()).unwrap();
        let key = CacheKey::new("x", &VoiceConfig::new("v"), 24_000);
        std::fs::write(temp_dir.path().join(format!("{key}.wav")), b"not a wav").unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());
    }
}
