use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config
    })))
}

/// Apply a partial update of the runtime-tunable settings.
///
/// Accepts `{"transcription": {"language": ..}, "upload": {"max_bytes": ..}}`;
/// either group may be omitted.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let current_config = state
        .apply_config_update(&json_str)
        .map_err(AppError::ValidationError)?;

    tracing::info!(
        language = %current_config.transcription.language,
        max_bytes = current_config.upload.max_bytes,
        "Configuration updated"
    );

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": {
            "transcription": current_config.transcription,
            "upload": {
                "max_bytes": current_config.upload.max_bytes
            }
        }
    })))
}
