//! # Transcription Module
//!
//! Handles speech-to-text transcription using Whisper models via the Candle-rs framework.
//! This module provides a pure Rust implementation without requiring FFI bindings to whisper.cpp.
//!
//! ## Key Components:
//! - **Transcriber**: The capability the HTTP layer depends on: audio file + language in, text out
//! - **Model**: Whisper weight loading and greedy decoding
//! - **Mel**: Log-mel filter bank construction
//! - **Engine**: Wires decoding, features and model together behind [`Transcriber`]
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest but least accurate
//! - **base**: ~74MB, the default
//! - **small**: ~244MB, better accuracy
//! - **medium**: ~769MB, good technical vocabulary
//! - **large**: ~1550MB, best accuracy but slowest

pub mod engine;
pub mod mel;
pub mod model;

pub use engine::WhisperTranscriber;

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

/// Outcome of transcribing one audio file.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionResult {
    /// The recognised text
    pub text: String,

    /// Language the model was asked to transcribe in
    pub language: String,

    /// Duration of the decoded audio (seconds)
    pub audio_duration_seconds: f64,

    /// Time taken for decoding and inference (milliseconds)
    pub processing_time_ms: u64,

    /// Number of 30 second windows decoded
    pub segments: usize,

    /// Model that produced the text
    pub model: String,
}

/// A loaded speech-to-text capability.
///
/// ## Threading:
/// Implementations are shared between HTTP workers behind an `Arc` and
/// called from the blocking thread pool, so `transcribe` may block for as
/// long as inference takes.
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio file at `audio_path` in `language`.
    fn transcribe(&self, audio_path: &Path, language: &str) -> Result<TranscriptionResult>;

    /// Whether the model can be asked to transcribe in `language`.
    fn supports_language(&self, language: &str) -> bool;

    /// Name of the loaded model, for health reporting.
    fn model_name(&self) -> String;

    /// Compute device the model runs on.
    fn device_name(&self) -> String;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Records every call and answers with a fixed text.
    ///
    /// Reads the file it is handed so tests can check what reached the model.
    #[derive(Default)]
    pub(crate) struct FakeTranscriber {
        pub text: String,
        pub fail_with: Option<fn() -> anyhow::Error>,
        pub calls: Mutex<Vec<FakeCall>>,
    }

    #[derive(Debug, Clone)]
    pub(crate) struct FakeCall {
        pub path: PathBuf,
        pub language: String,
        pub contents: Vec<u8>,
    }

    impl FakeTranscriber {
        pub(crate) fn answering(text: &str) -> Self {
            Self {
                text: text.to_string(),
                ..Default::default()
            }
        }

        pub(crate) fn failing(make_error: fn() -> anyhow::Error) -> Self {
            Self {
                fail_with: Some(make_error),
                ..Default::default()
            }
        }

        pub(crate) fn calls(&self) -> Vec<FakeCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Transcriber for FakeTranscriber {
        fn transcribe(&self, audio_path: &Path, language: &str) -> Result<TranscriptionResult> {
            let contents = std::fs::read(audio_path)?;
            self.calls.lock().unwrap().push(FakeCall {
                path: audio_path.to_path_buf(),
                language: language.to_string(),
                contents,
            });

            if let Some(make_error) = self.fail_with {
                return Err(make_error());
            }

            Ok(TranscriptionResult {
                text: self.text.clone(),
                language: language.to_string(),
                audio_duration_seconds: 1.0,
                processing_time_ms: 1,
                segments: 1,
                model: self.model_name(),
            })
        }

        fn supports_language(&self, language: &str) -> bool {
            matches!(language, "zh" | "en")
        }

        fn model_name(&self) -> String {
            "fake".to_string()
        }

        fn device_name(&self) -> String {
            "CPU".to_string()
        }
    }
}
