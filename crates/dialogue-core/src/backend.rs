//! Text-to-speech backends and backend selection.

use crate::audio::PcmBuffer;
use crate::error::{DialogueError, DialogueResult};
use crate::voice::VoiceConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A text-to-speech engine
///
/// Implementations must be safe to call concurrently from several workers.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Identifier matched against [`VoiceConfig::engine`]
    fn name(&self) -> &str;

    /// Synthesize one piece of text
    ///
    /// # Errors
    ///
    /// Returns a retriable error (`Synthesis`, `Network`, `Timeout`) for
    /// transient failures and any other variant for permanent ones.
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> DialogueResult<PcmBuffer>;
}

/// Which backends a voice may fall back to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Only the voice's own engine is tried
    PrimaryOnly,
    /// The voice's engine first, then every other backend in declared order
    #[default]
    Sequential,
}

/// Prioritized set of backends plus a fallback policy
#[derive(Clone)]
pub struct BackendChain {
    backends: Vec<Arc<dyn SynthesisBackend>>,
    policy: FallbackPolicy,
}

impl std::fmt::Debug for BackendChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendChain")
            .field("backends", &self.names())
            .field("policy", &self.policy)
            .finish()
    }
}

impl BackendChain {
    /// Create a chain from backends in priority order
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no backend is given or two share a name.
    pub fn new(backends: Vec<Arc<dyn SynthesisBackend>>, policy: FallbackPolicy) -> DialogueResult<Self> {
        if backends.is_empty() {
            return Err(DialogueError::configuration("At least one synthesis backend is required"));
        }
        for (i, backend) in backends.iter().enumerate() {
            if backends[..i].iter().any(|b| b.name() == backend.name()) {
                return Err(DialogueError::configuration(format!(
                    "Duplicate backend name '{}'",
                    backend.name()
                )));
            }
        }
        Ok(Self { backends, policy })
    }

    /// Chain with a single backend
    #[must_use]
    pub fn single(backend: Arc<dyn SynthesisBackend>) -> Self {
        Self {
            backends: vec![backend],
            policy: FallbackPolicy::PrimaryOnly,
        }
    }

    /// Fallback policy
    #[must_use]
    pub const fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    /// Backend names in declared order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Backends to try for a voice, primary first
    ///
    /// The primary is the backend named by `voice.engine`, or the first
    /// registered backend when none matches.
    #[must_use]
    pub fn plan(&self, voice: &VoiceConfig) -> Vec<Arc<dyn SynthesisBackend>> {
        let primary = self
            .backends
            .iter()
            .position(|b| b.name() == voice.engine)
            .unwrap_or(0);

        let mut plan = vec![Arc::clone(&self.backends[primary])];
        if self.policy == FallbackPolicy::Sequential {
            plan.extend(
                self.backends
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != primary)
                    .map(|(_, b)| Arc::clone(b)),
            );
        }
        plan
    }
}

/// Request body sent by [`HttpBackend`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpSynthesisRequest {
    /// Text to speak
    pub text: String,
    /// Voice name
    pub voice: String,
    /// Rate as words per minute (`"180"`) or percent (`"+10%"`)
    pub rate: String,
    /// Language / locale
    pub language: String,
    /// Requested output sample rate
    pub sample_rate: u32,
}

/// Backend that POSTs JSON to an HTTP endpoint and receives WAV
#[derive(Debug, Clone)]
pub struct HttpBackend {
    name: String,
    endpoint: String,
    sample_rate: u32,
    client: reqwest::Client,
}

impl HttpBackend {
    /// Default per-request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a backend for `endpoint`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new<N: Into<String>, E: Into<String>>(name: N, endpoint: E, sample_rate: u32) -> DialogueResult<Self> {
        Self::with_timeout(name, endpoint, sample_rate, Self::DEFAULT_TIMEOUT)
    }

    /// Create a backend with a custom request timeout
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn with_timeout<N: Into<String>, E: Into<String>>(
        name: N,
        endpoint: E,
        sample_rate: u32,
        timeout: Duration,
    ) -> DialogueResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DialogueError::configuration(format!("Failed to build HTTP client: {e}")))?;
        let backend = Self {
            name: name.into(),
            endpoint: endpoint.into(),
            sample_rate,
            client,
        };
        info!("HTTP synthesis backend '{}' -> {}", backend.name, backend.endpoint);
        Ok(backend)
    }

    fn request_for(&self, text: &str, voice: &VoiceConfig) -> HttpSynthesisRequest {
        HttpSynthesisRequest {
            text: text.to_string(),
            voice: voice.voice_name.clone(),
            rate: voice.rate.to_string(),
            language: voice.language.clone(),
            sample_rate: self.sample_rate,
        }
    }
}

#[async_trait]
impl SynthesisBackend for HttpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> DialogueResult<PcmBuffer> {
        debug!("POST {} ({} chars, voice {})", self.endpoint, text.chars().count(), voice.voice_name);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.request_for(text, voice))
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(DialogueError::network(format!("{} returned {status}", self.endpoint)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DialogueError::invalid_input(format!(
                "{} rejected request ({status}): {}",
                self.endpoint,
                body.trim()
            )));
        }

        let bytes = response.bytes().await?;
        PcmBuffer::from_wav_bytes(&bytes)
            .map_err(|e| DialogueError::invalid_input(format!("{} returned undecodable audio: {e}", self.endpoint)))
    }
}
