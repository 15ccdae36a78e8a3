pub mod api;
pub mod config;
pub mod infrastructure;
pub mod services;

use crate::config::ConverterConfig;
use crate::services::conversion::ConversionService;
use crate::services::runner::CommandRunner;
use crate::services::upload::UploadIngestor;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware::from_fn,
    routing::{any, get},
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::convert::convert_video,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::convert::ConvertForm,
            api::handlers::convert::ErrorResponse,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "convert", description = "Video conversion endpoints"),
        (name = "system", description = "Service status")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<UploadIngestor>,
    pub conversion: Arc<ConversionService>,
    pub config: ConverterConfig,
}

impl AppState {
    pub fn new(config: ConverterConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            ingestor: Arc::new(UploadIngestor::from_config(&config)),
            conversion: Arc::new(ConversionService::new(runner, config.upload_dir.clone())),
            config,
        }
    }
}

fn cors_layer(config: &ConverterConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([header::CONTENT_DISPOSITION, header::CONTENT_LENGTH])
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/api/convert",
            any(api::handlers::convert::convert_video).layer(
                axum::extract::DefaultBodyLimit::max(state.config.body_limit()),
            ),
        )
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(cors_layer(&state.config))
        .with_state(state)
}
