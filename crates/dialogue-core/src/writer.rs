//! WAV output for composed audio.
//!
//! Only WAV is produced here; other containers are left to an external
//! encoder fed with the PCM from [`PcmBuffer::samples`].

use crate::audio::PcmBuffer;
use crate::error::{DialogueError, DialogueResult};
use std::io::{Seek, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Supported audio output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    /// WAV format (uncompressed)
    Wav,
}

impl AudioFormat {
    /// Get file extension for the format
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
        }
    }

    /// Get MIME type for the format
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
        }
    }

    /// Detect format from file extension
    ///
    /// # Errors
    ///
    /// Returns an error if the extension is not supported
    pub fn from_extension(extension: &str) -> DialogueResult<Self> {
        match extension.to_lowercase().as_str() {
            "wav" => Ok(Self::Wav),
            _ => Err(DialogueError::invalid_input(format!(
                "Unsupported audio format: {extension} (encode WAV output externally)"
            ))),
        }
    }

    /// Detect format from file path
    ///
    /// # Errors
    ///
    /// Returns an error if the file has no extension or unsupported extension
    pub fn from_path<P: AsRef<Path>>(path: P) -> DialogueResult<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| {
                DialogueError::invalid_input(format!(
                    "No file extension found in path: {}",
                    path.display()
                ))
            })?;

        Self::from_extension(extension)
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension().to_uppercase())
    }
}

/// WAV sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingSettings {
    /// Bits per sample: 16, 24 or 32
    pub bit_depth: u16,
    /// Write IEEE float samples (requires 32 bits)
    pub float: bool,
}

impl Default for EncodingSettings {
    fn default() -> Self {
        Self {
            bit_depth: 16,
            float: false,
        }
    }
}

impl EncodingSettings {
    /// 32-bit float samples, lossless for `f32` PCM
    #[must_use]
    pub const fn float32() -> Self {
        Self {
            bit_depth: 32,
            float: true,
        }
    }

    /// Set integer bit depth
    #[must_use]
    pub const fn with_bit_depth(mut self, bit_depth: u16) -> Self {
        self.bit_depth = bit_depth;
        self.float = false;
        self
    }

    /// Validate encoding settings
    ///
    /// # Errors
    ///
    /// Returns an error for unsupported bit depths or float at a depth other than 32.
    pub fn validate(&self) -> DialogueResult<()> {
        if !matches!(self.bit_depth, 16 | 24 | 32) {
            return Err(DialogueError::invalid_input(format!(
                "Bit depth must be 16, 24, or 32, got {}",
                self.bit_depth
            )));
        }
        if self.float && self.bit_depth != 32 {
            return Err(DialogueError::invalid_input("Float samples require a bit depth of 32"));
        }
        Ok(())
    }
}

/// Writes [`PcmBuffer`]s as WAV
#[derive(Debug, Default)]
pub struct AudioWriter {
    settings: EncodingSettings,
}

impl AudioWriter {
    /// Create a writer producing 16-bit PCM
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with custom encoding settings
    #[must_use]
    pub const fn with_settings(settings: EncodingSettings) -> Self {
        Self { settings }
    }

    /// Encoding settings in use
    #[must_use]
    pub const fn settings(&self) -> EncodingSettings {
        self.settings
    }

    /// Encode audio as an in-memory WAV file
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are invalid or a sample is not finite.
    pub fn encode(&self, audio: &PcmBuffer) -> DialogueResult<Vec<u8>> {
        let mut bytes = Vec::with_capacity(44 + audio.samples().len() * usize::from(self.settings.bit_depth / 8));
        self.encode_into(audio, std::io::Cursor::new(&mut bytes))?;
        Ok(bytes)
    }

    /// Write audio to a WAV file, creating parent directories
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The path does not have a `.wav` extension
    /// - The file cannot be created or written to
    /// - The audio data or settings are invalid
    pub async fn write_file<P: AsRef<Path>>(&self, audio: &PcmBuffer, path: P) -> DialogueResult<()> {
        let path = path.as_ref();
        AudioFormat::from_path(path)?;

        info!(
            "Writing {} frames ({:.2}s) to {}",
            audio.frames(),
            audio.duration_secs(),
            path.display()
        );

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DialogueError::file(format!("Failed to create directory {}: {e}", parent.display()))
            })?;
        }

        let bytes = self.encode(audio)?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| DialogueError::file(format!("Failed to write {}: {e}", path.display())))?;

        info!("Successfully wrote audio file: {}", path.display());
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_into<W: Write + Seek>(&self, audio: &PcmBuffer, sink: W) -> DialogueResult<()> {
        self.settings.validate()?;
        if let Some((i, sample)) = audio.samples().iter().enumerate().find(|(_, s)| !s.is_finite()) {
            return Err(DialogueError::invalid_input(format!(
                "Invalid audio sample at index {i}: {sample}"
            )));
        }
        if !self.settings.float && audio.peak() > 1.0 {
            warn!("Audio exceeds [-1.0, 1.0] (peak {:.3}); clipping", audio.peak());
        }

        debug!(
            "Encoding WAV: {} Hz, {} ch, {} bit{}",
            audio.sample_rate(),
            audio.channels(),
            self.settings.bit_depth,
            if self.settings.float { " float" } else { "" }
        );

        let spec = hound::WavSpec {
            channels: audio.channels(),
            sample_rate: audio.sample_rate(),
            bits_per_sample: self.settings.bit_depth,
            sample_format: if self.settings.float {
                hound::SampleFormat::Float
            } else {
                hound::SampleFormat::Int
            },
        };
        let mut writer = hound::WavWriter::new(sink, spec)?;

        match (self.settings.bit_depth, self.settings.float) {
            (32, true) => {
                for &sample in audio.samples() {
                    writer.write_sample(sample)?;
                }
            }
            (16, _) => {
                for &sample in audio.samples() {
                    writer.write_sample((sample.clamp(-1.0, 1.0) * 32767.0) as i16)?;
                }
            }
            (24, _) => {
                for &sample in audio.samples() {
                    writer.write_sample((sample.clamp(-1.0, 1.0) * 8_388_607.0) as i32)?;
                }
            }
            _ => {
                for &sample in audio.samples() {
                    writer.write_sample((f64::from(sample.clamp(-1.0, 1.0)) * 2_147_483_647.0) as i32)?;
                }
            }
        }

        writer.finalize()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[test]
    fn test_audio_format_from_path() {
        assert_eq!(AudioFormat::from_path("out/dialog.WAV").unwrap(), AudioFormat::Wav);
        assert!(AudioFormat::from_path("dialog.mp3").is_err());
        assert!(AudioFormat::from_path("dialog").is_err());
        assert_eq!(AudioFormat::Wav.to_string(), "WAV");
        assert_eq!(AudioFormat::Wav.mime_type(), "audio/wav");
    }

    #[rstest]
    #[case(EncodingSettings::default(), true)]
    #[case(EncodingSettings::default().with_bit_depth(24), true)]
    #[case(EncodingSettings::float32(), true)]
    #[case(EncodingSettings::default().with_bit_depth(8), false)]
    #[case(EncodingSettings { bit_depth: 16, float: true }, false)]
    fn test_encoding_settings_validation(#[case] settings: EncodingSettings, #[case] valid: bool) {
        assert_eq!(settings.validate().is_ok(), valid);
    }

    #[test]
    fn test_encode_float_is_lossless() {
        let audio = PcmBuffer::new(vec![0.125, -0.5, 1.5, 0.0], 24_000, 2).unwrap();
        let bytes = AudioWriter::with_settings(EncodingSettings::float32()).encode(&audio).unwrap();
        let decoded = PcmBuffer::from_wav_bytes(&bytes).unwrap();
        assert_eq!(decoded, audio);
    }

    #[test]
    fn test_encode_rejects_non_finite() {
        let audio = PcmBuffer::mono(vec![0.0, f32::NAN], 24_000);
        assert!(AudioWriter::new().encode(&audio).is_err());
    }

    #[tokio::test]
    async fn test_write_file_creates_parent_dirs() {
        let temp_dir = TempDir::new().expect("Should create temp dir");
        let path = temp_dir.path().join("nested").join("dialog.wav");
        let audio = PcmBuffer::silence_ms(100, 24_000, 1);

        AudioWriter::new().write_file(&audio, &path).await.unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 24_000);
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.len(), 2400);
    }
}
