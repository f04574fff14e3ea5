use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "in_flight_transcriptions": metrics.in_flight_transcriptions
        },
        "memory": get_memory_info(),
        "model": {
            "name": state.transcriber.model_name(),
            "device": state.transcriber.device_name(),
            "language": config.transcription.language,
            "status": "loaded"
        }
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "transcriptions": {
            "in_flight": metrics.in_flight_transcriptions,
            "completed": metrics.transcriptions_completed,
            "failed": metrics.transcriptions_failed,
            "audio_seconds_processed": metrics.audio_seconds_processed
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info()
    }))
}

#[cfg(target_os = "linux")]
fn get_memory_info() -> serde_json::Value {
    let status = match std::fs::read_to_string(format!("/proc/{}/status", std::process::id())) {
        Ok(status) => status,
        Err(_) => return unavailable_memory_info("Could not read /proc status"),
    };

    let kb_field = |name: &str| -> u64 {
        status
            .lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .unwrap_or(0)
            * 1024
    };

    json!({
        "resident_memory_bytes": kb_field("VmRSS:"),
        "virtual_memory_bytes": kb_field("VmSize:"),
        "available": true
    })
}

#[cfg(not(target_os = "linux"))]
fn get_memory_info() -> serde_json::Value {
    unavailable_memory_info("Memory info not available on this platform")
}

fn unavailable_memory_info(note: &str) -> serde_json::Value {
    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": note
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::transcription::testing::FakeTranscriber;
    use actix_web::{test, App};
    use serde_json::Value;
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_health_reports_model() {
        let state = AppState::new(AppConfig::default(), Arc::new(FakeTranscriber::answering("ok")));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(crate::handlers::configure_routes),
        )
        .await;

        for uri in ["/health", "/api/v1/health"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let body: Value = test::call_and_read_body_json(&app, req).await;
            assert_eq!(body["status"], "healthy");
            assert_eq!(body["model"]["name"], "fake");
            assert_eq!(body["model"]["language"], "zh");
            assert_eq!(body["service"]["port"], 8000);
        }
    }

    #[actix_web::test]
    async fn test_metrics_include_transcriptions() {
        let state = AppState::new(AppConfig::default(), Arc::new(FakeTranscriber::answering("ok")));
        state.record_transcription(Some(3.0));
        state.record_transcription(None);
        state.record_endpoint_request("POST /transcribe", 40, false);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(crate::handlers::configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/metrics").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["transcriptions"]["completed"], 1);
        assert_eq!(body["transcriptions"]["failed"], 1);
        assert_eq!(body["transcriptions"]["audio_seconds_processed"], 3.0);
        assert_eq!(body["endpoints"][0]["endpoint"], "POST /transcribe");
    }
}
