//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` environment variables (deployment platforms)
//! 2. Environment variables (APP_SERVER__HOST, APP_TRANSCRIPTION__LANGUAGE, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Environment Variable Naming:
//! Sections and keys are joined with a double underscore so that keys which
//! themselves contain underscores survive the mapping:
//! - `APP_SERVER__PORT=9000` → `server.port`
//! - `APP_UPLOAD__MAX_BYTES=1048576` → `upload.max_bytes`
//! - `APP_CORS__ALLOWED_ORIGINS=https://a.example,https://b.example` → `cors.allowed_origins`

use crate::device::DevicePreference;
use crate::transcription::model::ModelSize;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, model, transcription,
/// upload, cors) keeps each concern small and lets runtime updates touch
/// only the groups that are safe to change while the server is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub transcription: TranscriptionConfig,
    pub upload: UploadConfig,
    pub cors: CorsConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address to bind to. `0.0.0.0` listens on all interfaces.
/// - `port`: TCP port number to listen on (1-65535)
/// - `workers`: Number of HTTP worker threads; `None` lets actix pick one per core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

/// Speech recognition model settings.
///
/// ## Fields:
/// - `whisper_model`: Whisper size to load ("tiny", "base", "small", "medium", "large")
/// - `repo_id`: Explicit HuggingFace repository, overrides the one implied by `whisper_model`
/// - `device`: Compute device preference ("auto", "cpu", "cuda", "metal")
/// - `cache_dir`: Where downloaded model files are kept; falls back to HF_HUB_CACHE / HF_HOME
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub whisper_model: String,
    pub repo_id: Option<String>,
    pub device: String,
    pub cache_dir: Option<String>,
}

/// Transcription behaviour.
///
/// `language` is the ISO 639-1 code handed to the model with every request
/// (Whisper also knows a few three-letter codes such as "haw" and "yue").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub language: String,
}

/// Upload handling for `POST /transcribe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Multipart field carrying the audio file
    pub field_name: String,
    /// Largest accepted upload in bytes
    pub max_bytes: usize,
    /// Suffix of the temporary file the upload is written to
    pub temp_suffix: String,
    /// Directory for temporary files; the OS temp dir when unset
    pub temp_dir: Option<String>,
}

/// Cross-origin access policy.
///
/// An empty list allows no cross-origin requests. A single `"*"` entry opens
/// the service to any origin, method and header.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    /// Whether the wildcard origin has been configured.
    pub fn is_permissive(&self) -> bool {
        self.allowed_origins.iter().any(|origin| origin.trim() == "*")
    }
}

impl ModelConfig {
    /// HuggingFace repository the model weights are fetched from.
    pub fn resolve_repo(&self) -> Result<String> {
        if let Some(repo) = self.repo_id.as_deref().filter(|r| !r.trim().is_empty()) {
            return Ok(repo.trim().to_string());
        }
        let size: ModelSize = self.whisper_model.parse()?;
        Ok(size.repo_name().to_string())
    }
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start even if no configuration file exists.
/// They mirror the service's long-standing behaviour: the `base` model, Chinese
/// as the target language, all interfaces on port 8000.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                workers: None,
            },
            model: ModelConfig {
                whisper_model: "base".to_string(),
                repo_id: None,
                device: "auto".to_string(),
                cache_dir: None,
            },
            transcription: TranscriptionConfig {
                language: "zh".to_string(),
            },
            upload: UploadConfig {
                field_name: "file".to_string(),
                max_bytes: 50 * 1024 * 1024, // 50MB
                temp_suffix: ".wav".to_string(),
                temp_dir: None,
            },
            cors: CorsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cors.allowed_origins")
                    .try_parsing(true),
            );

        // Deployment platforms commonly inject these without a prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## Why validate:
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what's wrong. The model in
    /// particular takes a while to download, so a typo should fail first.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }

        if self.server.workers == Some(0) {
            return Err(anyhow!("Server workers must be greater than 0"));
        }

        if self.model.repo_id.is_none() {
            self.model.whisper_model.parse::<ModelSize>()?;
        }

        self.model
            .device
            .parse::<DevicePreference>()
            .map_err(|e| anyhow!(e))?;

        validate_language(&self.transcription.language)?;

        if self.upload.field_name.trim().is_empty() {
            return Err(anyhow!("Upload field name cannot be empty"));
        }

        if self.upload.max_bytes == 0 {
            return Err(anyhow!("Upload size limit must be greater than 0"));
        }

        let suffix = &self.upload.temp_suffix;
        if !suffix.starts_with('.') || suffix.len() < 2 || suffix.contains(['/', '\\']) {
            return Err(anyhow!("Temporary file suffix must look like \".wav\", got {:?}", suffix));
        }

        for origin in &self.cors.allowed_origins {
            let origin = origin.trim();
            let has_scheme = origin.starts_with("http://") || origin.starts_with("https://");
            if origin != "*" && (!has_scheme || origin.ends_with('/')) {
                return Err(anyhow!(
                    "CORS origin must be \"*\" or a scheme and host like \"https://app.example\", got {:?}",
                    origin
                ));
            }
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the settings that can change under a running server are accepted:
    /// `transcription.language` and `upload.max_bytes`. For example,
    /// `{"transcription": {"language": "en"}}` switches the target language
    /// for every request that follows.
    ///
    /// Unknown keys, wrongly typed values and settings that are fixed at
    /// startup are rejected. Nothing is changed unless the whole update is valid.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let update: RuntimeUpdate = serde_json::from_str(json_str)
            .map_err(|e| anyhow!("Invalid configuration update: {}", e))?;

        let mut candidate = self.clone();

        if let Some(language) = update.transcription.and_then(|t| t.language) {
            candidate.transcription.language = language.trim().to_lowercase();
        }

        if let Some(max_bytes) = update.upload.and_then(|u| u.max_bytes) {
            candidate.upload.max_bytes = usize::try_from(max_bytes)
                .map_err(|_| anyhow!("Upload size limit {} is out of range", max_bytes))?;
        }

        candidate.validate()?;
        *self = candidate;
        Ok(())
    }
}

/// Shape of a runtime configuration update.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuntimeUpdate {
    transcription: Option<TranscriptionUpdate>,
    upload: Option<UploadUpdate>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TranscriptionUpdate {
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UploadUpdate {
    max_bytes: Option<u64>,
}

fn validate_language(language: &str) -> Result<()> {
    let well_formed = (2..=3).contains(&language.len())
        && language.chars().all(|c| c.is_ascii_lowercase());
    if !well_formed {
        return Err(anyhow!(
            "Transcription language must be a lowercase language code like \"zh\" or \"en\", got {:?}",
            language
        ));
    }
    Ok(())
}
