//! # Transcription Endpoint
//!
//! `POST /transcribe` takes a `multipart/form-data` upload, stores it in a
//! per-request temporary file, runs the loaded model over it and answers with
//! `{"text": "..."}`.
//!
//! ## Request Flow:
//! 1. Buffer the upload field in memory (size capped by `upload.max_bytes`)
//! 2. On the blocking pool: write the temporary file, transcribe, drop the file
//! 3. Record metrics and respond
//!
//! The temporary file never outlives the blocking closure, so it is gone
//! before the response is sent whether transcription worked or not.

use crate::audio::{read_upload, TemporaryAudioFile};
use crate::error::{AppError, AppResult};
use crate::middleware::logging::RequestId;
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// Response body: just the recognised text.
#[derive(Debug, Serialize)]
pub struct TranscribeResponse {
    pub text: String,
}

pub async fn transcribe_audio(
    req: HttpRequest,
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.to_string())
        .unwrap_or_default();

    let config = state.get_config();
    let upload = read_upload(&mut payload, &config.upload).await?;

    info!(
        request_id = %request_id,
        bytes = upload.len(),
        filename = upload.filename.as_deref().unwrap_or("-"),
        content_type = upload.content_type.as_deref().unwrap_or("-"),
        "Audio upload received"
    );

    let _in_flight = state.begin_transcription();

    let transcriber = Arc::clone(&state.transcriber);
    let language = config.transcription.language;
    let upload_config = config.upload;

    let outcome = web::block(move || {
        let temp_file = TemporaryAudioFile::create(&upload, &upload_config)?;
        transcriber
            .transcribe(temp_file.path(), &language)
            .context("transcribing uploaded audio")
    })
    .await
    .map_err(|e| AppError::Internal(format!("Transcription task failed: {}", e)))?;

    match outcome {
        Ok(result) => {
            state.record_transcription(Some(result.audio_duration_seconds));
            Ok(HttpResponse::Ok().json(TranscribeResponse { text: result.text }))
        }
        Err(err) => {
            state.record_transcription(None);
            error!(request_id = %request_id, "Transcription failed: {:#}", err);
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoder::AudioDecodeError;
    use crate::config::AppConfig;
    use crate::transcription::testing::FakeTranscriber;
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use serde_json::Value;

    const BOUNDARY: &str = "transcribe-test-boundary";

    fn multipart_body(field: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload_request(field: &str, bytes: &[u8]) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/transcribe")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(multipart_body(field, "clip.wav", bytes))
    }

    fn state_with(fake: Arc<FakeTranscriber>, config: AppConfig) -> AppState {
        AppState::new(config, fake)
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .configure(crate::handlers::configure_routes),
            )
            .await
        };
    }

    fn is_json(resp: &actix_web::dev::ServiceResponse) -> bool {
        resp.headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"))
    }

    #[actix_web::test]
    async fn test_returns_text_as_json() {
        let fake = Arc::new(FakeTranscriber::answering("你好"));
        let state = state_with(fake.clone(), AppConfig::default());
        let app = app!(state);

        let resp = test::call_service(&app, upload_request("file", b"RIFFaudio").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(is_json(&resp));

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, serde_json::json!({ "text": "你好" }));

        let calls = fake.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].contents, b"RIFFaudio");
        assert_eq!(calls[0].language, "zh");
        assert!(calls[0].path.to_string_lossy().ends_with(".wav"));

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.transcriptions_completed, 1);
        assert_eq!(metrics.in_flight_transcriptions, 0);
    }

    #[actix_web::test]
    async fn test_temp_file_removed_after_request() {
        let fake = Arc::new(FakeTranscriber::answering("ok"));
        let app = app!(state_with(fake.clone(), AppConfig::default()));

        let resp = test::call_service(&app, upload_request("file", b"abc").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!fake.calls()[0].path.exists());

        let failing = Arc::new(FakeTranscriber::failing(|| anyhow::anyhow!("model crashed")));
        let app = app!(state_with(failing.clone(), AppConfig::default()));

        let resp = test::call_service(&app, upload_request("file", b"abc").to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!failing.calls()[0].path.exists());
    }

    #[actix_web::test]
    async fn test_concurrent_requests_get_their_own_files() {
        let fake = Arc::new(FakeTranscriber::answering("ok"));
        let app = app!(state_with(fake.clone(), AppConfig::default()));

        let (first, second) = futures_util::future::join(
            test::call_service(&app, upload_request("file", b"first clip").to_request()),
            test::call_service(&app, upload_request("file", b"second clip").to_request()),
        )
        .await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);

        let calls = fake.calls();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].path, calls[1].path);

        let mut contents: Vec<Vec<u8>> = calls.iter().map(|c| c.contents.clone()).collect();
        contents.sort();
        assert_eq!(contents, vec![b"first clip".to_vec(), b"second clip".to_vec()]);
    }

    #[actix_web::test]
    async fn test_uses_configured_language() {
        let fake = Arc::new(FakeTranscriber::answering("hello"));
        let mut config = AppConfig::default();
        config.transcription.language = "en".to_string();
        let app = app!(state_with(fake.clone(), config));

        let resp = test::call_service(&app, upload_request("file", b"abc").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(fake.calls()[0].language, "en");
    }

    #[actix_web::test]
    async fn test_empty_upload_is_bad_request() {
        let fake = Arc::new(FakeTranscriber::answering("unused"));
        let app = app!(state_with(fake.clone(), AppConfig::default()));

        let resp = test::call_service(&app, upload_request("file", b"").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(is_json(&resp));

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "bad_request");
        assert!(fake.calls().is_empty());
    }

    #[actix_web::test]
    async fn test_missing_field_is_bad_request() {
        let fake = Arc::new(FakeTranscriber::answering("unused"));
        let app = app!(state_with(fake.clone(), AppConfig::default()));

        let resp = test::call_service(&app, upload_request("audio", b"abc").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(fake.calls().is_empty());
    }

    #[actix_web::test]
    async fn test_non_multipart_body_is_rejected() {
        let fake = Arc::new(FakeTranscriber::answering("unused"));
        let app = app!(state_with(fake.clone(), AppConfig::default()));

        let req = test::TestRequest::post()
            .uri("/transcribe")
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload("{}")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_client_error());
        assert!(fake.calls().is_empty());
    }

    #[actix_web::test]
    async fn test_oversized_upload_is_rejected() {
        let fake = Arc::new(FakeTranscriber::answering("unused"));
        let mut config = AppConfig::default();
        config.upload.max_bytes = 16;
        let app = app!(state_with(fake.clone(), config));

        let resp = test::call_service(&app, upload_request("file", &[7u8; 32]).to_request()).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(fake.calls().is_empty());
    }

    #[actix_web::test]
    async fn test_undecodable_audio_is_unprocessable() {
        let fake = Arc::new(FakeTranscriber::failing(|| {
            anyhow::Error::new(AudioDecodeError::new("no suitable format reader found"))
        }));
        let state = state_with(fake, AppConfig::default());
        let app = app!(state);

        let resp = test::call_service(&app, upload_request("file", b"not audio").to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(is_json(&resp));

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "unsupported_audio");

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.transcriptions_failed, 1);
        assert_eq!(metrics.in_flight_transcriptions, 0);
    }

    #[actix_web::test]
    async fn test_model_failure_is_internal_error() {
        let fake = Arc::new(FakeTranscriber::failing(|| anyhow::anyhow!("out of memory")));
        let app = app!(state_with(fake, AppConfig::default()));

        let resp = test::call_service(&app, upload_request("file", b"abc").to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "internal_error");
        assert!(body["error"]["message"]
            .as_str()
            .is_some_and(|m| m.contains("out of memory")));
    }
}
