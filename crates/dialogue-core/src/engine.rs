//! Top-level composition: parse, resolve, dispatch, assemble.

use crate::assembler::{assemble, AssemblyOptions};
use crate::audio::PcmBuffer;
use crate::backend::{BackendChain, SynthesisBackend};
use crate::cache::{DiskCache, SynthesisCache};
use crate::clip::{ClipLoader, WavClipLoader};
use crate::config::EngineConfig;
use crate::dispatcher::{CancellationToken, DispatchStats, Dispatcher, ProgressSink};
use crate::error::{DialogueError, DialogueResult};
use crate::resolver::SpeakerResolver;
use crate::script::{parse_script, Event};
use crate::timeline::Warning;
use crate::voice::SpeakerConfig;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a composition
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    /// Mixed output audio
    pub audio: PcmBuffer,
    /// Non-fatal problems, speaker fallbacks first, then in script order
    pub warnings: Vec<Warning>,
    /// Dispatch counters
    pub stats: DispatchStats,
}

/// Turns dialog scripts into mixed audio
pub struct DialogueEngine {
    config: EngineConfig,
    backends: BackendChain,
    cache: Option<Arc<dyn SynthesisCache>>,
    clips: Arc<dyn ClipLoader>,
}

impl std::fmt::Debug for DialogueEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogueEngine")
            .field("config", &self.config)
            .field("backends", &self.backends)
            .field("cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl DialogueEngine {
    /// Create an engine without a cache
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the configuration is invalid or no
    /// backend is given.
    pub fn new(config: EngineConfig, backends: Vec<Arc<dyn SynthesisBackend>>) -> DialogueResult<Self> {
        config.validate()?;
        let backends = BackendChain::new(backends, config.dispatch.fallback)?;
        info!(
            "Dialogue engine ready: backends {:?}, {} workers",
            backends.names(),
            config.dispatch.workers
        );
        Ok(Self {
            config,
            backends,
            cache: None,
            clips: Arc::new(WavClipLoader::new()),
        })
    }

    /// Use `cache` for synthesized segments
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn SynthesisCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Open the disk cache described by the `[cache]` section, if enabled
    ///
    /// # Errors
    ///
    /// Returns a cache error if the directory cannot be created.
    pub fn with_configured_cache(mut self) -> DialogueResult<Self> {
        if let Some(dir) = self.config.cache_dir() {
            self.cache = Some(Arc::new(DiskCache::new(dir)?));
        }
        Ok(self)
    }

    /// Use `clips` to load sound effects
    #[must_use]
    pub fn with_clip_loader(mut self, clips: Arc<dyn ClipLoader>) -> Self {
        self.clips = clips;
        self
    }

    /// Engine configuration
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compose a script
    ///
    /// # Errors
    ///
    /// See [`DialogueEngine::compose_with_cancel`].
    pub async fn compose(
        &self,
        script: &str,
        speakers: &SpeakerConfig,
        options: &AssemblyOptions,
        progress: &ProgressSink,
    ) -> DialogueResult<Composition> {
        self.compose_with_cancel(script, speakers, options, progress, &CancellationToken::new())
            .await
    }

    /// Compose a script, stopping early if `cancel` fires
    ///
    /// Parse errors, unknown speakers and invalid options fail before any
    /// synthesis starts. Failed lines do not fail the call; they become
    /// silence plus a warning.
    ///
    /// # Errors
    ///
    /// Returns `Parse`, `UnknownSpeaker` or `Configuration` errors for a
    /// malformed request, `Cancelled` if cancelled, and `Assembly` if
    /// synthesized audio does not match the output format.
    pub async fn compose_with_cancel(
        &self,
        script: &str,
        speakers: &SpeakerConfig,
        options: &AssemblyOptions,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> DialogueResult<Composition> {
        options.validate()?;

        let events = parse_script(script)?;
        check_text_lengths(&events)?;

        let resolver = SpeakerResolver::new(speakers)?;
        let (voices, mut warnings) = resolver.resolve_events(&events)?;

        info!(
            "Composing {} events for {} speakers ({} Hz, {})",
            events.len(),
            speakers.map.len(),
            options.sample_rate,
            if options.stereo { "stereo" } else { "mono" }
        );

        let mut dispatch_options = self.config.dispatch_options();
        dispatch_options.sample_rate = options.sample_rate;
        let dispatcher = Dispatcher::new(
            self.backends.clone(),
            self.cache.clone(),
            Arc::clone(&self.clips),
            dispatch_options,
        );

        let output = dispatcher.dispatch(events, voices, progress, cancel).await?;
        let audio = assemble(&output.timeline, options)?;

        warnings.extend(output.timeline.warnings());
        warnings.extend(output.warnings);
        for warning in &warnings {
            warn!("{}", warning);
        }

        info!(
            "Composed {:.2}s of audio with {} warnings",
            audio.duration_secs(),
            warnings.len()
        );

        Ok(Composition {
            audio,
            warnings,
            stats: output.stats,
        })
    }
}

fn check_text_lengths(events: &[Event]) -> DialogueResult<()> {
    for event in events {
        if let Event::Speech { text, line_number, .. } = event {
            let length = text.chars().count();
            if length > crate::MAX_TEXT_LENGTH {
                let preview: String = text.chars().take(40).collect();
                return Err(DialogueError::parse(
                    *line_number,
                    preview,
                    format!("line is {length} characters; the limit is {}", crate::MAX_TEXT_LENGTH),
                ));
            }
        }
    }
    Ok(())
}

/// Compose a script with default engine settings
///
/// # Errors
///
/// See [`DialogueEngine::compose_with_cancel`].
pub async fn compose(
    script: &str,
    speakers: &SpeakerConfig,
    backends: Vec<Arc<dyn SynthesisBackend>>,
    cache: Option<Arc<dyn SynthesisCache>>,
    options: &AssemblyOptions,
    progress: &ProgressSink,
) -> DialogueResult<Composition> {
    let mut engine = DialogueEngine::new(EngineConfig::default(), backends)?;
    if let Some(cache) = cache {
        engine = engine.with_cache(cache);
    }
    engine.compose(script, speakers, options, progress).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::{SpeakerEntry, SpeakerMap, VoiceConfig};
    use async_trait::async_trait;

    struct Constant;

    #[async_trait]
    impl SynthesisBackend for Constant {
        fn name(&self) -> &str {
            "edge"
        }

        async fn synthesize(&self, _text: &str, _voice: &VoiceConfig) -> DialogueResult<PcmBuffer> {
            Ok(PcmBuffer::mono(vec![0.2; 240], 24_000))
        }
    }

    fn speakers() -> SpeakerConfig {
        SpeakerConfig::new(SpeakerMap::new().with_speaker("A", SpeakerEntry::new(VoiceConfig::new("SunHi"))))
    }

    fn engine() -> DialogueEngine {
        DialogueEngine::new(EngineConfig::default(), vec![Arc::new(Constant) as Arc<dyn SynthesisBackend>]).unwrap()
    }

    #[tokio::test]
    async fn test_parse_error_fails_fast() {
        let err = engine()
            .compose("A: 안녕\n이건 잘못된 줄", &speakers(), &AssemblyOptions::default(), &ProgressSink::None)
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::Parse { line: 2, .. }));
    }

    #[tokio::test]
    async fn test_overlong_line_is_rejected() {
        let script = format!("A: {}", "가".repeat(crate::MAX_TEXT_LENGTH + 1));
        let err = engine()
            .compose(&script, &speakers(), &AssemblyOptions::default(), &ProgressSink::None)
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::Parse { line: 1, .. }));
    }

    #[tokio::test]
    async fn test_oversized_silence_fails_before_synthesis() {
        for script in [
            "A: 안녕\n[silence=18446744073709551615]",
            "A: 안녕\n[silence=99999999999999999999999999s]",
        ] {
            let err = engine()
                .compose(script, &speakers(), &AssemblyOptions::default(), &ProgressSink::None)
                .await
                .unwrap_err();
            assert!(matches!(err, DialogueError::Parse { line: 2, .. }));
        }
    }

    #[tokio::test]
    async fn test_oversized_gap_rejected() {
        let options = AssemblyOptions::default().with_gap_ms(u64::MAX);
        let err = engine()
            .compose("A: 안녕\nA: 또 만나요", &speakers(), &options, &ProgressSink::None)
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let options = AssemblyOptions {
            sample_rate: 0,
            ..AssemblyOptions::default()
        };
        let err = engine()
            .compose("A: 안녕", &speakers(), &options, &ProgressSink::None)
            .await
            .unwrap_err();
        assert!(matches!(err, DialogueError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_empty_script_gives_empty_audio() {
        let composition = engine()
            .compose("# nothing here\n\n", &speakers(), &AssemblyOptions::default(), &ProgressSink::None)
            .await
            .unwrap();
        assert!(composition.audio.is_empty());
        assert!(composition.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_free_compose_function() {
        let composition = compose(
            "A: 안녕하세요",
            &speakers(),
            vec![Arc::new(Constant) as Arc<dyn SynthesisBackend>],
            None,
            &AssemblyOptions::default(),
            &ProgressSink::None,
        )
        .await
        .unwrap();
        assert_eq!(composition.audio.frames(), 240);
        assert_eq!(composition.stats.backend_calls, 1);
    }

    #[test]
    fn test_engine_rejects_no_backends() {
        assert!(DialogueEngine::new(EngineConfig::default(), Vec::new()).is_err());
    }
}
