use crate::config::CorsConfig;
use actix_cors::Cors;

/// Build the CORS policy from configuration.
///
/// - no origins: cross-origin requests are refused
/// - `"*"`: any origin, method and header
/// - otherwise: the listed origins, with any method and header
pub fn build_cors(config: &CorsConfig) -> Cors {
    if config.is_permissive() {
        return Cors::default()
            .allow_any_origin()
            .send_wildcard()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);
    }

    config
        .allowed_origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin.trim()))
        .allow_any_method()
        .allow_any_header()
        .max_age(3600)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header;
    use actix_web::{test, web, App, HttpResponse};

    async fn allow_origin_for(config: CorsConfig, origin: &str) -> Option<String> {
        let app = test::init_service(
            App::new()
                .wrap(build_cors(&config))
                .route("/health", web::get().to(HttpResponse::Ok)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/health")
            .insert_header((header::ORIGIN, origin))
            .to_request();
        let resp = test::call_service(&app, req).await;
        resp.headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    fn origins(list: &[&str]) -> CorsConfig {
        CorsConfig {
            allowed_origins: list.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[actix_web::test]
    async fn test_default_allows_no_cross_origin() {
        assert_eq!(allow_origin_for(origins(&[]), "https://app.example").await, None);
    }

    #[actix_web::test]
    async fn test_listed_origin_allowed() {
        let config = origins(&["https://app.example"]);
        assert_eq!(
            allow_origin_for(config.clone(), "https://app.example").await.as_deref(),
            Some("https://app.example")
        );
        assert_eq!(allow_origin_for(config, "https://evil.example").await, None);
    }

    #[actix_web::test]
    async fn test_wildcard_allows_any_origin() {
        let allowed = allow_origin_for(origins(&["*"]), "https://anything.example").await;
        assert_eq!(allowed.as_deref(), Some("*"));
    }

    #[actix_web::test]
    async fn test_same_origin_requests_unaffected() {
        let app = test::init_service(
            App::new()
                .wrap(build_cors(&origins(&[])))
                .route("/health", web::get().to(HttpResponse::Ok)),
        )
        .await;

        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert!(resp.status().is_success());
    }
}
