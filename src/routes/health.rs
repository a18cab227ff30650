use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::app::AppState;
use crate::pipeline::service_mapper::MapperStats;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub services: ServiceHealth,
    /// Mapper counters since startup
    pub mapping: MapperStats,
}

#[derive(Serialize)]
pub struct ServiceHealth {
    pub completion: String,
    pub job_store: String,
    pub storage: String,
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let (completion_result, jobs_result, storage_result) = tokio::join!(
        state.completion.health_check(),
        state.pipeline.jobs().health_check(),
        storage_check(state.pipeline.extractions().dir()),
    );

    let label = |ok: bool| if ok { "ok" } else { "error" }.to_string();

    // Extractions cannot be kept without storage or the job registry
    let status = if completion_result.is_ok() && jobs_result.is_ok() && storage_result.is_ok() {
        "healthy"
    } else if jobs_result.is_ok() && storage_result.is_ok() {
        "degraded"
    } else {
        "unhealthy"
    };

    let status_code = if status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            services: ServiceHealth {
                completion: label(completion_result.is_ok()),
                job_store: label(jobs_result.is_ok()),
                storage: label(storage_result.is_ok()),
            },
            mapping: state.pipeline.mapper().stats(),
        }),
    )
}

async fn storage_check(dir: &Path) -> anyhow::Result<()> {
    let metadata = tokio::fs::metadata(dir).await?;
    anyhow::ensure!(metadata.is_dir(), "{} is not a directory", dir.display());
    anyhow::ensure!(!metadata.permissions().readonly(), "{} is read-only", dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::domain::ProcessingJob;
    use crate::pipeline::orchestrator::tests::ScriptedClient;
    use crate::services::MemoryStore;

    fn state(dir: &Path) -> Arc<AppState> {
        AppState::new(
            Settings::for_tests(dir),
            Arc::new(ScriptedClient::new(vec![])),
            Arc::new(MemoryStore::<ProcessingJob>::new()),
        )
    }

    #[tokio::test]
    async fn healthy_when_storage_is_writable() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        std::fs::create_dir_all(state.settings.extraction_dir()).unwrap();

        let (status, Json(body)) = health_check(State(state)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "healthy");
        assert_eq!(body.services.storage, "ok");
        assert_eq!(body.mapping.mapped, 0);
    }

    #[tokio::test]
    async fn unavailable_without_storage() {
        let dir = tempfile::tempdir().unwrap();

        let (status, Json(body)) = health_check(State(state(dir.path()))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, "unhealthy");
        assert_eq!(body.services.storage, "error");
        assert_eq!(body.services.completion, "ok");
    }
}
