//! # Transcription Engine
//!
//! Wires audio decoding and the Whisper model together behind the
//! [`Transcriber`] trait the HTTP layer depends on.
//!
//! ## Key Responsibilities:
//! - **Model ownership**: Loaded once at startup, shared by every request
//! - **Audio-to-text conversion**: Decode the file, run the model, time it
//! - **Serialisation**: Only one decode runs on the model at a time

use crate::audio::decoder;
use crate::config::ModelConfig;
use crate::device::{DeviceManager, DevicePreference};
use crate::transcription::model::{self, ModelSource, WhisperModel};
use crate::transcription::{Transcriber, TranscriptionResult};
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tokenizers::Tokenizer;

/// Whisper-backed [`Transcriber`].
///
/// ## Thread Safety:
/// The model mutates its attention cache while decoding, so it sits behind a
/// `Mutex`. Concurrent requests wait for each other at the lock; the
/// tokenizer copy kept outside the lock answers language queries without
/// waiting for inference to finish.
pub struct WhisperTranscriber {
    model: Mutex<WhisperModel>,
    tokenizer: Tokenizer,
    model_name: String,
    device_name: String,
}

impl WhisperTranscriber {
    /// Download (if needed) and load the configured model.
    ///
    /// `language` is the language requests will use by default; loading fails
    /// if the model cannot produce it.
    pub async fn load(config: &ModelConfig, language: &str) -> Result<Self> {
        let preference: DevicePreference = config.device.parse().map_err(|e: String| anyhow!(e))?;
        let device = DeviceManager::get_device(preference);

        let source = ModelSource {
            repo_id: config.resolve_repo()?,
            cache_dir: config.cache_dir.as_ref().map(PathBuf::from),
        };

        let whisper = WhisperModel::load(&source, device).await?;
        let transcriber = Self::new(whisper);

        if !transcriber.supports_language(language) {
            return Err(anyhow!(
                "Model {} does not support language {:?}",
                transcriber.model_name,
                language
            ));
        }

        tracing::info!(
            model = %transcriber.model_name,
            device = %transcriber.device_name,
            language,
            "Transcription engine ready"
        );

        Ok(transcriber)
    }

    pub fn new(model: WhisperModel) -> Self {
        Self {
            tokenizer: model.tokenizer().clone(),
            model_name: model.repo_id().to_string(),
            device_name: DeviceManager::get_device_info(model.device()),
            model: Mutex::new(model),
        }
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, audio_path: &Path, language: &str) -> Result<TranscriptionResult> {
        let start_time = Instant::now();

        let audio = decoder::decode_file(audio_path)?;
        let audio_duration_seconds = audio.duration_seconds();

        let (text, segments) = {
            let mut model = self
                .model
                .lock()
                .map_err(|_| anyhow!("Whisper model lock poisoned by an earlier panic"))?;
            model.transcribe(&audio.samples, language)?
        };

        let processing_time_ms = start_time.elapsed().as_millis() as u64;

        tracing::info!(
            audio_secs = audio_duration_seconds,
            chars = text.chars().count(),
            segments,
            processing_time_ms,
            language,
            "Transcription completed"
        );

        Ok(TranscriptionResult {
            text,
            language: language.to_string(),
            audio_duration_seconds,
            processing_time_ms,
            segments,
            model: self.model_name.clone(),
        })
    }

    fn supports_language(&self, language: &str) -> bool {
        model::language_token(&self.tokenizer, language).is_some()
    }

    fn model_name(&self) -> String {
        self.model_name.clone()
    }

    fn device_name(&self) -> String {
        self.device_name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoder::tests::{tone, wav_bytes};
    use crate::config::AppConfig;
    use std::io::Write;

    /// Downloads openai/whisper-tiny; run with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn test_transcribe_with_real_model() {
        let mut config = AppConfig::default().model;
        config.whisper_model = "tiny".to_string();
        config.device = "cpu".to_string();

        let transcriber = WhisperTranscriber::load(&config, "en").await.unwrap();
        assert!(transcriber.supports_language("zh"));
        assert!(!transcriber.supports_language("xx"));

        let mut file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        file.write_all(&wav_bytes(&tone(16_000, 2.0), 16_000, 1)).unwrap();

        let result = transcriber.transcribe(file.path(), "en").unwrap();
        assert_eq!(result.segments, 1);
        assert_eq!(result.language, "en");
        assert!((result.audio_duration_seconds - 2.0).abs() < 1e-6);
    }
}
