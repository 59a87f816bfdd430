//! # Dialogue Core
//!
//! Multi-speaker dialog composition: turns a speaker-labelled script into one
//! mixed audio buffer with a distinct voice per speaker.
//!
//! ## Features
//!
//! - Script parsing with `[silence=...]` and `[sfx=...]` directives
//! - Speaker resolution with aliases, a default speaker and custom names
//! - Concurrent synthesis with retry, backend fallback and a content-addressed cache
//! - Deterministic mixdown with gaps, crossfades, constant-power panning and
//!   peak or BS.1770 loudness normalization
//! - WAV output and a JSON metadata sidecar
//!
//! ## Example
//!
//! ```rust,no_run
//! use dialogue_core::{
//!     AssemblyOptions, DialogueEngine, EngineConfig, HttpBackend, ProgressSink, SpeakerConfig,
//!     SpeakerMap, SynthesisBackend, AudioWriter,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> dialogue_core::DialogueResult<()> {
//!     let speakers = SpeakerConfig::new(SpeakerMap::from_voice_specs([
//!         r#"A="SunHi,rate=180,pan=-0.3""#,
//!         r#"B="InJoon,rate=180,pan=0.3""#,
//!     ])?);
//!     let backend: Arc<dyn SynthesisBackend> =
//!         Arc::new(HttpBackend::new("edge", "http://localhost:5002/tts", 24_000)?);
//!     let engine = DialogueEngine::new(EngineConfig::default(), vec![backend])?;
//!
//!     let options = AssemblyOptions::default().with_stereo(true);
//!     let script = "A: 안녕하세요.\n[silence=1s]\nB: 반갑습니다!";
//!     let composition = engine.compose(script, &speakers, &options, &ProgressSink::None).await?;
//!
//!     AudioWriter::new().write_file(&composition.audio, "dialog.wav").await?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod assembler;
pub mod audio;
pub mod backend;
pub mod cache;
pub mod clip;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod loudness;
pub mod metadata;
pub mod resolver;
pub mod script;
pub mod timeline;
pub mod voice;
pub mod writer;

// Re-export main types for convenience
pub use assembler::{assemble, AssemblyOptions};
pub use audio::{pan_gains, PcmBuffer};
pub use backend::{BackendChain, FallbackPolicy, HttpBackend, SynthesisBackend};
pub use cache::{CacheEntry, CacheKey, DiskCache, MemoryCache, SynthesisCache};
pub use clip::{ClipLoader, WavClipLoader};
pub use config::EngineConfig;
pub use dispatcher::{
    CancellationToken, DispatchOptions, DispatchStats, Dispatcher, ProgressEvent, ProgressSink, RetryPolicy,
};
pub use engine::{compose, Composition, DialogueEngine};
pub use error::{DialogueError, DialogueResult};
pub use loudness::{integrated_loudness, Normalization};
pub use metadata::CompositionMetadata;
pub use resolver::SpeakerResolver;
pub use script::{parse_script, Event, Script};
pub use timeline::{Resolution, SynthesisResult, Timeline, Warning};
pub use voice::{parse_voice_spec, Rate, SpeakerConfig, SpeakerEntry, SpeakerMap, VoiceConfig};
pub use writer::{AudioFormat, AudioWriter, EncodingSettings};

/// Version information for the dialogue-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default output sample rate (24 kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Default number of output channels (mono)
pub const DEFAULT_CHANNELS: u16 = 1;

/// Default silence between script entries in milliseconds
pub const DEFAULT_GAP_MS: u64 = 250;

/// Default crossfade length in milliseconds
pub const DEFAULT_CROSSFADE_MS: u64 = 20;

/// Default pause between sentences of one line in milliseconds
pub const DEFAULT_BREATH_MS: u64 = 80;

/// Default number of concurrent synthesis workers
pub const DEFAULT_WORKERS: usize = 3;

/// Maximum characters in one speech line
pub const MAX_TEXT_LENGTH: usize = 5_000;

/// Longest silence a directive or assembly option may ask for (10 minutes)
pub const MAX_SILENCE_MS: u64 = 600_000;
