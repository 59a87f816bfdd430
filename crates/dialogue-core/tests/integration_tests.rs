//! Integration tests for dialogue-core crate

use async_trait::async_trait;
use dialogue_core::{
    parse_script, AssemblyOptions, AudioWriter, BackendChain, CancellationToken, CompositionMetadata,
    DialogueEngine, DialogueError, DialogueResult, DiskCache, DispatchOptions, Dispatcher, EngineConfig, Event,
    MemoryCache, Normalization, PcmBuffer, ProgressEvent, ProgressSink, Resolution, RetryPolicy, SpeakerConfig,
    SpeakerEntry, SpeakerMap, SpeakerResolver, SynthesisBackend, SynthesisCache, VoiceConfig, WavClipLoader,
    Warning,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const RATE: u32 = 24_000;
const SEGMENT_FRAMES: usize = 2_400;

/// Backend returning a constant-valued 100 ms segment per call
#[derive(Default)]
struct MockBackend {
    name: &'static str,
    calls: AtomicUsize,
    values: HashMap<&'static str, f32>,
    delays: HashMap<&'static str, Duration>,
    failing: Vec<&'static str>,
    finished: Mutex<Vec<String>>,
}

impl MockBackend {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    fn with_value(mut self, text: &'static str, value: f32) -> Self {
        self.values.insert(text, value);
        self
    }

    fn with_delay(mut self, text: &'static str, delay: Duration) -> Self {
        self.delays.insert(text, delay);
        self
    }

    fn failing_on(mut self, text: &'static str) -> Self {
        self.failing.push(text);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SynthesisBackend for MockBackend {
    fn name(&self) -> &str {
        self.name
    }

    async fn synthesize(&self, text: &str, _voice: &VoiceConfig) -> DialogueResult<PcmBuffer> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(text) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.iter().any(|t| *t == text) {
            return Err(DialogueError::invalid_input(format!("refused: {text}")));
        }
        self.finished.lock().push(text.to_string());
        let value = self.values.get(text).copied().unwrap_or(0.1);
        Ok(PcmBuffer::mono(vec![value; SEGMENT_FRAMES], RATE))
    }
}

/// Backend that never answers in time
struct StalledBackend;

#[async_trait]
impl SynthesisBackend for StalledBackend {
    fn name(&self) -> &str {
        "edge"
    }

    async fn synthesize(&self, _text: &str, _voice: &VoiceConfig) -> DialogueResult<PcmBuffer> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(PcmBuffer::empty(RATE, 1))
    }
}

fn speakers() -> SpeakerConfig {
    SpeakerConfig::new(
        SpeakerMap::new()
            .with_speaker("A", SpeakerEntry::new(VoiceConfig::new("SunHi")))
            .with_speaker("B", SpeakerEntry::new(VoiceConfig::new("InJoon"))),
    )
}

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.dispatch.max_retries = 0;
    config.dispatch.base_delay_ms = 0;
    config.dispatch.max_delay_ms = 0;
    config
}

/// No gap, no crossfade, no normalization: every frame is predictable
fn plain_options() -> AssemblyOptions {
    AssemblyOptions {
        gap_ms: 0,
        crossfade_ms: 0,
        normalization: Normalization::None,
        ..AssemblyOptions::default()
    }
}

fn engine_with(backend: Arc<MockBackend>) -> DialogueEngine {
    DialogueEngine::new(fast_config(), vec![backend as Arc<dyn SynthesisBackend>]).expect("Should create engine")
}

#[tokio::test]
async fn test_korean_dialog_with_exact_silence() {
    let backend = Arc::new(MockBackend::new("edge"));
    let engine = engine_with(Arc::clone(&backend));
    let script = "A: 안녕하세요.\n[silence=1s]\nB: 반갑습니다!";

    let composition = engine
        .compose(script, &speakers(), &plain_options(), &ProgressSink::None)
        .await
        .expect("Should compose");

    let audio = &composition.audio;
    assert_eq!(audio.sample_rate(), RATE);
    assert_eq!(audio.channels(), 1);
    assert_eq!(audio.frames(), SEGMENT_FRAMES + 24_000 + SEGMENT_FRAMES);

    let samples = audio.samples();
    assert!(samples[..SEGMENT_FRAMES].iter().all(|&s| (s - 0.1).abs() < 1e-6));
    assert!(samples[SEGMENT_FRAMES..SEGMENT_FRAMES + 24_000].iter().all(|&s| s == 0.0));
    assert!(samples[SEGMENT_FRAMES + 24_000..].iter().all(|&s| (s - 0.1).abs() < 1e-6));

    assert!(composition.warnings.is_empty());
    assert_eq!(backend.calls(), 2);
    assert_eq!(composition.stats.jobs, 2);
}

const EXAMPLE_SCRIPT: &str = "A: 안녕하세요.\nB: 반갑습니다.\n[silence=1s]\nA: 좋은 하루 되세요!";

fn panned_speakers() -> SpeakerConfig {
    SpeakerConfig::new(
        SpeakerMap::from_voice_specs([r#"A="SunHi,pan=-0.3""#, r#"B="InJoon,pan=0.3""#])
            .expect("Should parse voice specs"),
    )
}

#[tokio::test]
async fn test_example_scenario_timeline_order() {
    let speakers = panned_speakers();
    let events = parse_script(EXAMPLE_SCRIPT).unwrap();
    let (voices, warnings) = SpeakerResolver::new(&speakers).unwrap().resolve_events(&events).unwrap();
    assert!(warnings.is_empty());

    let backend = Arc::new(MockBackend::new("edge"));
    let dispatcher = Dispatcher::new(
        BackendChain::single(backend),
        None,
        Arc::new(WavClipLoader::new()),
        DispatchOptions {
            retry: RetryPolicy::none(),
            ..DispatchOptions::default()
        },
    );
    let output = dispatcher
        .dispatch(events, voices, &ProgressSink::None, &CancellationToken::new())
        .await
        .unwrap();

    let entries = output.timeline.entries();
    assert_eq!(entries.len(), 4);
    let speaker = |i: usize| match &entries[i].event {
        Event::Speech { speaker_id, .. } => Some(speaker_id.as_str()),
        _ => None,
    };
    assert_eq!(speaker(0), Some("A"));
    assert_eq!(speaker(1), Some("B"));
    assert!(matches!(
        entries[2].result.resolution,
        Resolution::Silence { duration_ms: 1000 }
    ));
    assert_eq!(speaker(3), Some("A"));
    for i in [0, 1, 3] {
        assert!(matches!(entries[i].result.resolution, Resolution::Speech(_)));
    }
    assert!((entries[0].voice.as_ref().unwrap().pan + 0.3).abs() < 1e-6);
    assert!((entries[1].voice.as_ref().unwrap().pan - 0.3).abs() < 1e-6);
}

#[tokio::test]
async fn test_example_scenario_silence_is_exact_with_gap_and_crossfade() {
    let backend = Arc::new(MockBackend::new("edge"));
    let engine = engine_with(backend);
    let speakers = panned_speakers();

    // (gap_ms, first silent frame): with a gap the silence sits between two
    // 6000-frame gaps; without one, A and B crossfade over 480 frames
    for (gap_ms, zeros_start, zeros_len) in [
        (250_u64, 2 * SEGMENT_FRAMES + 6_000, 6_000 + 24_000 + 6_000),
        (0, 2 * SEGMENT_FRAMES - 480, 24_000),
    ] {
        let options = AssemblyOptions {
            gap_ms,
            crossfade_ms: 20,
            ..AssemblyOptions::default().with_stereo(true)
        };
        let composition = engine
            .compose(EXAMPLE_SCRIPT, &speakers, &options, &ProgressSink::None)
            .await
            .unwrap();

        let audio = &composition.audio;
        assert_eq!(audio.channels(), 2);
        assert_eq!(audio.frames(), zeros_start + zeros_len + SEGMENT_FRAMES);

        let frame = |f: usize| &audio.samples()[2 * f..2 * f + 2];
        let zeros_end = zeros_start + zeros_len;
        assert!(frame(zeros_start - 1).iter().all(|&s| s != 0.0));
        assert!((zeros_start..zeros_end).all(|f| frame(f) == [0.0, 0.0]));
        assert!(frame(zeros_end).iter().all(|&s| s != 0.0));

        // the silence directive itself contributes exactly 1000 ms
        let gaps = if gap_ms > 0 { 2 * 6_000 } else { 0 };
        assert_eq!(zeros_len - gaps, 24_000);
    }
}

#[tokio::test]
async fn test_gap_between_entries() {
    let backend = Arc::new(MockBackend::new("edge"));
    let engine = engine_with(backend);
    let options = AssemblyOptions {
        gap_ms: 250,
        ..plain_options()
    };

    let composition = engine
        .compose("A: 하나.\nB: 둘.\nA: 셋.", &speakers(), &options, &ProgressSink::None)
        .await
        .unwrap();

    // three segments and two 250 ms gaps
    assert_eq!(composition.audio.frames(), 3 * SEGMENT_FRAMES + 2 * 6_000);
}

#[tokio::test]
async fn test_partial_failure_becomes_silence() {
    let backend = Arc::new(MockBackend::new("edge").failing_on("실패합니다."));
    let engine = engine_with(Arc::clone(&backend));
    let script = "A: 첫 줄.\nB: 실패합니다.\nA: 셋째 줄.\nB: 넷째 줄.";

    let composition = engine
        .compose(script, &speakers(), &plain_options(), &ProgressSink::None)
        .await
        .expect("A failed line should not fail the composition");

    let failures: Vec<_> = composition
        .warnings
        .iter()
        .filter(|w| matches!(w, Warning::SynthesisFailed { .. }))
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], Warning::SynthesisFailed { line: 2, .. }));
    assert_eq!(composition.stats.failures, 1);

    // the failed line is one second of silence
    assert_eq!(composition.audio.frames(), 3 * SEGMENT_FRAMES + 24_000);
    let samples = composition.audio.samples();
    assert!(samples[SEGMENT_FRAMES..SEGMENT_FRAMES + 24_000].iter().all(|&s| s == 0.0));
}

#[tokio::test]
async fn test_warm_cache_skips_backend() {
    let backend = Arc::new(MockBackend::new("edge"));
    let cache: Arc<dyn SynthesisCache> = Arc::new(MemoryCache::new());
    let engine = engine_with(Arc::clone(&backend)).with_cache(Arc::clone(&cache));
    let script = "A: 안녕하세요. 오늘 날씨 좋네요.\nB: 그러네요!";

    let cold = engine
        .compose(script, &speakers(), &plain_options(), &ProgressSink::None)
        .await
        .unwrap();
    let cold_calls = backend.calls();
    assert_eq!(cold_calls, 3);
    assert_eq!(cold.stats.cache_misses, 3);
    assert_eq!(cache.len().await, 3);

    let warm = engine
        .compose(script, &speakers(), &plain_options(), &ProgressSink::None)
        .await
        .unwrap();
    assert_eq!(backend.calls(), cold_calls);
    assert_eq!(warm.stats.backend_calls, 0);
    assert_eq!(warm.stats.cache_hits, 3);
    assert_eq!(warm.audio, cold.audio);
}

#[tokio::test]
async fn test_out_of_order_completion_keeps_script_order() {
    let backend = Arc::new(
        MockBackend::new("edge")
            .with_value("하나.", 0.1)
            .with_value("둘.", 0.2)
            .with_value("셋.", 0.3)
            .with_delay("하나.", Duration::from_millis(120))
            .with_delay("둘.", Duration::from_millis(60)),
    );
    let engine = engine_with(Arc::clone(&backend));

    let composition = engine
        .compose("A: 하나.\nB: 둘.\nA: 셋.", &speakers(), &plain_options(), &ProgressSink::None)
        .await
        .unwrap();

    assert_eq!(*backend.finished.lock(), vec!["셋.", "둘.", "하나."]);

    let samples = composition.audio.samples();
    assert_eq!(samples.len(), 3 * SEGMENT_FRAMES);
    for (index, expected) in [0.1_f32, 0.2, 0.3].into_iter().enumerate() {
        let start = index * SEGMENT_FRAMES;
        assert!(samples[start..start + SEGMENT_FRAMES]
            .iter()
            .all(|&s| (s - expected).abs() < 1e-6));
    }
}

#[tokio::test]
async fn test_cancellation_stops_composition() {
    let engine =
        DialogueEngine::new(fast_config(), vec![Arc::new(StalledBackend) as Arc<dyn SynthesisBackend>]).unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let speakers = speakers();
    let options = plain_options();
    let compose = engine.compose_with_cancel(
        "A: 하나.\nB: 둘.\nA: 셋.\nB: 넷.",
        &speakers,
        &options,
        &ProgressSink::None,
        &cancel,
    );
    let canceller = async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    };

    let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(compose, canceller) })
        .await
        .expect("Cancellation should return promptly");
    assert_eq!(result.unwrap_err(), DialogueError::Cancelled);
}

#[tokio::test]
async fn test_unknown_speaker_fails_before_synthesis() {
    let backend = Arc::new(MockBackend::new("edge"));
    let engine = engine_with(Arc::clone(&backend));

    let err = engine
        .compose("A: 안녕.\nC: 누구세요?", &speakers(), &plain_options(), &ProgressSink::None)
        .await
        .unwrap_err();

    assert!(matches!(err, DialogueError::UnknownSpeaker { ref label, line: 2 } if label == "C"));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_default_speaker_and_custom_names() {
    let backend = Arc::new(MockBackend::new("edge"));
    let engine = engine_with(backend);
    let speakers = speakers()
        .with_custom_names(["민수", "지영"])
        .with_default_speaker("민수");

    let composition = engine
        .compose("민수: 안녕.\n지영: 안녕!\nC: 저도요.", &speakers, &plain_options(), &ProgressSink::None)
        .await
        .unwrap();

    assert_eq!(
        composition.warnings,
        vec![Warning::DefaultSpeaker {
            label: "C".into(),
            default: "민수".into(),
        }]
    );
    assert_eq!(composition.audio.frames(), 3 * SEGMENT_FRAMES);
}

#[tokio::test]
async fn test_stereo_pan_endpoints() {
    let backend = Arc::new(MockBackend::new("edge").with_value("왼쪽.", 0.5).with_value("오른쪽.", 0.5));
    let engine = engine_with(backend);
    let speakers = SpeakerConfig::new(
        SpeakerMap::new()
            .with_speaker("L", SpeakerEntry::new(VoiceConfig::new("SunHi").with_pan(-1.0).unwrap()))
            .with_speaker("R", SpeakerEntry::new(VoiceConfig::new("InJoon").with_pan(1.0).unwrap())),
    );
    let options = plain_options().with_stereo(true);

    let composition = engine
        .compose("L: 왼쪽.\nR: 오른쪽.", &speakers, &options, &ProgressSink::None)
        .await
        .unwrap();

    let audio = &composition.audio;
    assert_eq!(audio.channels(), 2);
    assert_eq!(audio.frames(), 2 * SEGMENT_FRAMES);

    let samples = audio.samples();
    let (left_half, right_half) = samples.split_at(SEGMENT_FRAMES * 2);
    for frame in left_half.chunks_exact(2) {
        assert!((frame[0] - 0.5).abs() < 1e-6);
        assert!(frame[1].abs() < 1e-6);
    }
    for frame in right_half.chunks_exact(2) {
        assert!(frame[0].abs() < 1e-6);
        assert!((frame[1] - 0.5).abs() < 1e-6);
    }
}

#[tokio::test]
async fn test_progress_reports_every_event() {
    let backend = Arc::new(MockBackend::new("edge"));
    let engine = engine_with(backend);
    let seen: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let seen = Arc::clone(&seen);
        ProgressSink::callback(move |event| seen.lock().push(event.clone()))
    };

    engine
        .compose("A: 하나.\n[silence=200ms]\nB: 둘.\nA: 셋.", &speakers(), &plain_options(), &sink)
        .await
        .unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 4);
    for (i, event) in seen.iter().enumerate() {
        assert_eq!(event.completed, i + 1);
        assert_eq!(event.total, 4);
        assert!(!event.message.is_empty());
    }
}

#[tokio::test]
async fn test_progress_over_channel() {
    let backend = Arc::new(MockBackend::new("edge"));
    let engine = engine_with(backend);
    let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();

    engine
        .compose("A: 하나.\nB: 둘.", &speakers(), &plain_options(), &ProgressSink::Channel(sender))
        .await
        .unwrap();

    let mut completed = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        completed.push(event.completed);
    }
    assert_eq!(completed, vec![1, 2]);
}

#[tokio::test]
async fn test_fallback_backend_is_reported() {
    let primary = Arc::new(MockBackend::new("edge").failing_on("안녕."));
    let secondary = Arc::new(MockBackend::new("local"));
    let engine = DialogueEngine::new(
        fast_config(),
        vec![
            Arc::clone(&primary) as Arc<dyn SynthesisBackend>,
            Arc::clone(&secondary) as Arc<dyn SynthesisBackend>,
        ],
    )
    .unwrap();

    let composition = engine
        .compose("A: 안녕.", &speakers(), &plain_options(), &ProgressSink::None)
        .await
        .unwrap();

    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 1);
    assert_eq!(composition.stats.fallbacks, 1);
    assert_eq!(
        composition.warnings,
        vec![Warning::BackendFallback {
            line: 1,
            backend: "local".into(),
        }]
    );
    assert_eq!(composition.audio.frames(), SEGMENT_FRAMES);
}

#[tokio::test]
async fn test_sound_effects() {
    let temp_dir = TempDir::new().expect("Should create temp dir");
    // 0.5 s clip at 48 kHz becomes 0.5 s at the output rate
    let clip = PcmBuffer::mono(vec![0.25; 24_000], 48_000);
    AudioWriter::new()
        .write_file(&clip, temp_dir.path().join("door.wav"))
        .await
        .unwrap();

    let backend = Arc::new(MockBackend::new("edge"));
    let engine =
        engine_with(backend).with_clip_loader(Arc::new(WavClipLoader::new().with_base_dir(temp_dir.path())));

    let composition = engine
        .compose(
            "A: 들어오세요.\n[sfx=door.wav vol=-6]\n[sfx=missing.wav]\nB: 실례합니다.",
            &speakers(),
            &plain_options(),
            &ProgressSink::None,
        )
        .await
        .unwrap();

    // the missing clip adds nothing
    assert_eq!(composition.audio.frames(), 2 * SEGMENT_FRAMES + 12_000);
    assert_eq!(composition.warnings.len(), 1);
    assert!(matches!(
        composition.warnings[0],
        Warning::MissingSoundEffect { line: 3, .. }
    ));

    // -6 dB on a 16-bit clip of 0.25
    let clip_sample = composition.audio.samples()[SEGMENT_FRAMES + 100];
    assert!((clip_sample - 0.125).abs() < 0.01);
}

#[tokio::test]
async fn test_disk_cache_survives_engine_restart() {
    let temp_dir = TempDir::new().expect("Should create temp dir");
    let script = "A: 안녕하세요.\nB: 반갑습니다.";

    let first = Arc::new(MockBackend::new("edge"));
    let cold = engine_with(Arc::clone(&first))
        .with_cache(Arc::new(DiskCache::new(temp_dir.path()).unwrap()))
        .compose(script, &speakers(), &plain_options(), &ProgressSink::None)
        .await
        .unwrap();
    assert_eq!(first.calls(), 2);

    let stored = std::fs::read_dir(temp_dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("wav"))
        .count();
    assert_eq!(stored, 2);

    let second = Arc::new(MockBackend::new("edge"));
    let warm = engine_with(Arc::clone(&second))
        .with_cache(Arc::new(DiskCache::new(temp_dir.path()).unwrap()))
        .compose(script, &speakers(), &plain_options(), &ProgressSink::None)
        .await
        .unwrap();
    assert_eq!(second.calls(), 0);
    assert_eq!(warm.stats.cache_hits, 2);
    assert_eq!(warm.audio, cold.audio);
}

#[tokio::test]
async fn test_output_wav_and_metadata() {
    let temp_dir = TempDir::new().expect("Should create temp dir");
    let backend = Arc::new(MockBackend::new("edge"));
    let engine = engine_with(backend);
    let speakers = speakers();
    let script = "A: 안녕하세요.\n[silence=500ms]\nB: 반갑습니다!";
    let options = AssemblyOptions::default().with_stereo(true);

    let composition = engine
        .compose(script, &speakers, &options, &ProgressSink::None)
        .await
        .unwrap();

    let wav_path = temp_dir.path().join("out").join("dialog.wav");
    AudioWriter::new().write_file(&composition.audio, &wav_path).await.unwrap();
    let decoded = PcmBuffer::from_wav_file(&wav_path).unwrap();
    assert_eq!(decoded.frames(), composition.audio.frames());
    assert_eq!(decoded.channels(), 2);
    assert_eq!(decoded.sample_rate(), RATE);

    // peak normalization to -1 dBFS by default
    let peak = composition.audio.peak();
    assert!((peak - 10.0_f32.powf(-1.0 / 20.0)).abs() < 1e-3);

    let metadata = CompositionMetadata::new(script, &speakers, &composition);
    let json_path = temp_dir.path().join("out").join("dialog.json");
    metadata.write(&json_path).await.unwrap();
    let loaded = CompositionMetadata::from_json(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(loaded.channels, 2);
    assert_eq!(loaded.speakers.len(), 2);
    assert_eq!(loaded.stats.jobs, 2);
}

#[tokio::test]
async fn test_engine_config_file_drives_composition() {
    let config = EngineConfig::from_toml_str(
        r#"
        [dispatch]
        workers = 2
        max_retries = 0
        base_delay_ms = 0
        max_delay_ms = 0

        [cache]
        enabled = false
        "#,
    )
    .unwrap();
    let backend = Arc::new(MockBackend::new("edge"));
    let engine = DialogueEngine::new(config, vec![Arc::clone(&backend) as Arc<dyn SynthesisBackend>])
        .unwrap()
        .with_configured_cache()
        .unwrap();

    let composition = engine
        .compose("A: 하나.\nB: 둘.\nA: 셋.", &speakers(), &plain_options(), &ProgressSink::None)
        .await
        .unwrap();
    assert_eq!(composition.stats.workers, 2);
    assert_eq!(composition.stats.cache_hits + composition.stats.cache_misses, 0);
}
