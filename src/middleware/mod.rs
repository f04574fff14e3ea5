pub mod cors;
pub mod logging;
pub mod metrics;

pub use cors::build_cors;
pub use logging::RequestLogging;
pub use metrics::MetricsMiddleware;
