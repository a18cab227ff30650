use axum::{extract::DefaultBodyLimit, http::HeaderValue, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::config::Settings;
use crate::domain::extraction::ExtractionRecord;
use crate::domain::ProcessingJob;
use crate::middleware::request_id_layer;
use crate::pipeline::{
    AnalyzerConfig, ExtractionOrchestrator, OrchestratorConfig, PdfAnalyzer, Pipeline, PipelineConfig, ServiceMapper,
};
use crate::routes;
use crate::services::{CompletionClient, ExtractionRepository, MemoryStore, Store};

/// Multipart framing on top of the file itself
const UPLOAD_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub pipeline: Pipeline,
    pub completion: Arc<dyn CompletionClient>,
}

impl AppState {
    /// Wire the pipeline from settings around the given collaborators.
    pub fn new(
        settings: Settings,
        completion: Arc<dyn CompletionClient>,
        jobs: Arc<dyn Store<ProcessingJob>>,
    ) -> Arc<Self> {
        let analyzer = PdfAnalyzer::new(AnalyzerConfig {
            max_file_bytes: settings.max_upload_bytes,
            max_pages: settings.max_pages,
        });

        let orchestrator = ExtractionOrchestrator::new(
            completion.clone(),
            OrchestratorConfig {
                model: settings.completion_model.clone(),
                max_tokens: settings.completion_max_tokens,
                max_retries: settings.completion_max_retries,
                server_retry_delay: Duration::from_secs(settings.completion_server_retry_seconds),
                debug_dir: settings.debug_dir(),
                cost_alert_usd: settings.extraction_cost_alert_usd,
            },
        );

        let extractions = ExtractionRepository::new(
            Arc::new(MemoryStore::<ExtractionRecord>::new()),
            settings.extraction_dir(),
        );

        let pipeline = Pipeline::new(
            analyzer,
            orchestrator,
            ServiceMapper::new(settings.review_threshold),
            jobs,
            extractions,
            PipelineConfig {
                upload_dir: settings.upload_dir(),
                sections_dir: settings.sections_dir(),
                split_sections: settings.split_sections,
                job_ttl: settings.job_ttl(),
            },
        );

        Arc::new(Self {
            settings,
            pipeline,
            completion,
        })
    }
}

/// Build the complete application with all middleware
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.settings);

    // DEBUG spans keep per-request overhead low at INFO
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    let (set_request_id, propagate_request_id) = request_id_layer();

    let body_limit = usize::try_from(state.settings.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(UPLOAD_OVERHEAD_BYTES);

    Router::new()
        .merge(routes::api_router())
        // Middleware stack (applied bottom-up)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(propagate_request_id)
        .layer(trace_layer)
        .layer(set_request_id)
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_allow_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let max_age = if settings.env.is_dev() {
        Duration::from_secs(86400)
    } else {
        Duration::from_secs(3600)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::list([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::HeaderName::from_static("x-request-id"),
        ]))
        .max_age(max_age)
}
