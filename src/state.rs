//! # Application State Management
//!
//! This module manages shared state that needs to be accessed by multiple HTTP request handlers
//! simultaneously.
//!
//! ## What lives here:
//! - **Configuration**: Readable by every request, updatable at runtime (`PUT /api/v1/config`)
//! - **Metrics**: Request and transcription counters updated by middleware and handlers
//! - **Transcriber**: The speech-to-text model, loaded once at startup and never replaced
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (every actix worker holds a clone of `AppState`)
//! - **RwLock**: Multiple readers OR one writer
//!
//! Locks are only held for the few instructions it takes to copy or bump a
//! value, so a panic while holding one cannot leave the data half-written;
//! a poisoned lock is therefore recovered instead of propagated.

use crate::config::AppConfig;
use crate::transcription::Transcriber;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Performance metrics (constantly being updated by requests)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Loaded speech-to-text model
    pub transcriber: Arc<dyn Transcriber>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of 4xx/5xx responses since server start
    pub error_count: u64,

    /// Uploads currently being written out or transcribed
    pub in_flight_transcriptions: u32,

    /// Transcriptions that produced text
    pub transcriptions_completed: u64,

    /// Transcriptions that ended in an error
    pub transcriptions_failed: u64,

    /// Seconds of audio successfully transcribed
    pub audio_seconds_processed: f64,

    /// Detailed metrics for each API endpoint
    /// Key: endpoint name (e.g., "POST /transcribe")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

/// Marks one transcription as in flight until dropped.
///
/// Returned by [`AppState::begin_transcription`]; dropping it on any path
/// (success, error, or a cancelled request future) releases the slot.
pub struct InFlightGuard {
    metrics: Arc<RwLock<AppMetrics>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.in_flight_transcriptions = metrics.in_flight_transcriptions.saturating_sub(1);
    }
}

impl AppState {
    pub fn new(config: AppConfig, transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            transcriber,
            start_time: Instant::now(),
        }
    }

    fn read_metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a copy of the current configuration.
    ///
    /// ## Why clone:
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Apply a partial JSON update to the live configuration.
    ///
    /// The update is applied and validated under one write lock, so
    /// concurrent updates never overwrite each other. Besides the structural
    /// checks, the configured language must be one the loaded model can
    /// transcribe. Returns the configuration now in effect.
    pub fn apply_config_update(&self, json_str: &str) -> Result<AppConfig, String> {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);

        let mut candidate = config.clone();
        candidate.update_from_json(json_str).map_err(|e| e.to_string())?;

        let language = &candidate.transcription.language;
        if !self.transcriber.supports_language(language) {
            return Err(format!(
                "Model {} does not support language {:?}",
                self.transcriber.model_name(),
                language
            ));
        }

        *config = candidate.clone();
        Ok(candidate)
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count a transcription as started; the returned guard ends it.
    pub fn begin_transcription(&self) -> InFlightGuard {
        self.write_metrics().in_flight_transcriptions += 1;
        InFlightGuard {
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Record the outcome of a finished transcription.
    pub fn record_transcription(&self, audio_seconds: Option<f64>) {
        let mut metrics = self.write_metrics();
        match audio_seconds {
            Some(seconds) => {
                metrics.transcriptions_completed += 1;
                metrics.audio_seconds_processed += seconds;
            }
            None => metrics.transcriptions_failed += 1,
        }
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.read_metrics().clone()
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    /// Fraction of requests that ended in an error (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    /// Calculate the average response time for this endpoint.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Calculate the error rate for this endpoint (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
