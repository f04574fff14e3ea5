//! # Scoped Temporary Audio Files
//!
//! The transcription model reads audio from a path, so every upload is
//! written to its own temporary file first. The file is created with a
//! random name (never shared between requests) and removed when the
//! [`TemporaryAudioFile`] is dropped, whether transcription succeeded or not.

use crate::audio::upload::UploadedAudio;
use crate::config::UploadConfig;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

const FILE_PREFIX: &str = "upload-";

/// Exclusively owned temporary copy of one upload.
#[derive(Debug)]
pub struct TemporaryAudioFile {
    file: NamedTempFile,
}

impl TemporaryAudioFile {
    /// Write `upload` to a fresh temporary file.
    ///
    /// Blocking; call from a blocking context.
    pub fn create(upload: &UploadedAudio, config: &UploadConfig) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(FILE_PREFIX).suffix(&config.temp_suffix);

        let mut file = match config.temp_dir.as_deref() {
            Some(dir) => builder
                .tempfile_in(dir)
                .with_context(|| format!("creating temporary audio file in {}", dir))?,
            None => builder.tempfile().context("creating temporary audio file")?,
        };

        file.write_all(&upload.bytes)
            .context("writing temporary audio file")?;
        file.flush().context("flushing temporary audio file")?;

        tracing::debug!(
            path = %file.path().display(),
            bytes = upload.len(),
            "Upload written to temporary file"
        );

        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn upload(bytes: &[u8]) -> UploadedAudio {
        UploadedAudio {
            bytes: bytes.to_vec(),
            filename: Some("audio.wav".to_string()),
            content_type: Some("audio/wav".to_string()),
        }
    }

    #[test]
    fn test_file_holds_upload_and_is_removed_on_drop() {
        let config = AppConfig::default().upload;
        let temp = TemporaryAudioFile::create(&upload(b"RIFF...."), &config).unwrap();
        let path = temp.path().to_path_buf();

        assert_eq!(std::fs::read(&path).unwrap(), b"RIFF....");
        assert!(path.extension().is_some_and(|ext| ext == "wav"));
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(FILE_PREFIX)));

        drop(temp);
        assert!(!path.exists());
    }

    #[test]
    fn test_each_upload_gets_its_own_file() {
        let config = AppConfig::default().upload;
        let a = TemporaryAudioFile::create(&upload(b"a"), &config).unwrap();
        let b = TemporaryAudioFile::create(&upload(b"b"), &config).unwrap();

        assert_ne!(a.path(), b.path());
        assert_eq!(std::fs::read(a.path()).unwrap(), b"a");
        assert_eq!(std::fs::read(b.path()).unwrap(), b"b");
    }

    #[test]
    fn test_configured_directory_and_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default().upload;
        config.temp_dir = Some(dir.path().to_string_lossy().into_owned());
        config.temp_suffix = ".m4a".to_string();

        let temp = TemporaryAudioFile::create(&upload(b"data"), &config).unwrap();
        assert_eq!(temp.path().parent(), Some(dir.path()));
        assert!(temp.path().to_string_lossy().ends_with(".m4a"));
    }

    #[test]
    fn test_missing_directory_fails() {
        let mut config = AppConfig::default().upload;
        config.temp_dir = Some("/nonexistent/for/sure".to_string());
        assert!(TemporaryAudioFile::create(&upload(b"data"), &config).is_err());
    }
}
