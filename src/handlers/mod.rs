pub mod config;
pub mod transcribe;

pub use self::config::{get_config, update_config};
pub use self::transcribe::transcribe_audio;

use crate::health;
use actix_web::web;

/// Register every route the service exposes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/transcribe", web::post().to(transcribe_audio))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health::health_check))
                .route("/metrics", web::get().to(health::detailed_metrics))
                .route("/config", web::get().to(get_config))
                .route("/config", web::put().to(update_config)),
        )
        // Also provide health check at root level for convenience
        .route("/health", web::get().to(health::health_check));
}
