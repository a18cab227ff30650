//! RFP intake routes
//!
//! Upload a solicitation PDF, poll its job, read or correct the extraction,
//! and download the results bundle.

use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::io::{Cursor, Write};
use std::sync::Arc;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::api::{Accepted, DataResponse};
use crate::app::AppState;
use crate::domain::extraction::{CorrectionRequest, ExtractionRecord};
use crate::domain::{JobStatus, JobStatusResponse, ProcessingJob, UploadAccepted};
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequestIdExt;
use crate::services::store::CorrectionError;

const PDF_MAGIC: &[u8] = b"%PDF";

/// Accept a PDF upload and start processing it in the background.
///
/// POST /rfp/upload
pub async fn upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Accepted<UploadAccepted>> {
    let max_bytes = state.settings.max_upload_bytes;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(display_name)
            .unwrap_or_else(|| "upload.pdf".to_string());
        let content_type = field.content_type().map(|s| s.to_string());

        let data = field.bytes().await.map_err(multipart_error)?;

        if data.is_empty() {
            return Err(ApiError::bad_request("Uploaded file is empty"));
        }
        if data.len() as u64 > max_bytes {
            return Err(ApiError::PayloadTooLarge(format!(
                "File is {} bytes; the limit is {} bytes",
                data.len(),
                max_bytes
            )));
        }

        let declared_pdf = content_type.as_deref() == Some("application/pdf")
            || filename.to_lowercase().ends_with(".pdf");
        if !declared_pdf || !data.starts_with(PDF_MAGIC) {
            return Err(ApiError::UnsupportedMediaType("Only PDF files are accepted".to_string()));
        }

        let job_id = Uuid::new_v4();
        let upload_dir = state.settings.upload_dir();
        tokio::fs::create_dir_all(&upload_dir).await.map_err(anyhow::Error::from)?;
        let upload_path = upload_dir.join(format!("{}.pdf", job_id));
        tokio::fs::write(&upload_path, &data).await.map_err(anyhow::Error::from)?;

        let job = ProcessingJob::new(job_id, filename, upload_path, data.len() as u64);
        let status = job.status;

        tracing::info!(
            job_id = %job_id,
            filename = %job.filename,
            bytes = data.len(),
            request_id = headers.request_id().unwrap_or("-"),
            "Upload accepted"
        );

        state.pipeline.submit(job).await?;

        return Ok(Accepted(UploadAccepted { job_id, status }));
    }

    Err(ApiError::bad_request("Missing multipart field 'file'"))
}

/// GET /rfp/jobs/:job_id
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<DataResponse<JobStatusResponse>> {
    let job = find_job(&state, job_id).await?;
    Ok(DataResponse::new(job.into()))
}

/// GET /rfp/extractions/:extraction_id
pub async fn get_extraction(
    State(state): State<Arc<AppState>>,
    Path(extraction_id): Path<Uuid>,
) -> ApiResult<DataResponse<ExtractionRecord>> {
    let record = find_extraction(&state, extraction_id).await?;
    Ok(DataResponse::new(record))
}

/// Apply a reviewer's correction and mark the extraction verified.
///
/// POST /rfp/extractions/:extraction_id/verify
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Path(extraction_id): Path<Uuid>,
    Json(correction): Json<CorrectionRequest>,
) -> ApiResult<DataResponse<ExtractionRecord>> {
    let record = state
        .pipeline
        .extractions()
        .apply_correction(extraction_id, correction)
        .await
        .map_err(|e| match e {
            CorrectionError::NotFound(id) => ApiError::not_found(format!("Extraction {} not found", id)),
            CorrectionError::Invalid(msg) => ApiError::bad_request(msg),
            CorrectionError::Storage(e) => ApiError::Internal(e),
        })?;

    Ok(DataResponse::new(record))
}

/// GET /rfp/jobs/:job_id/download
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Response> {
    let job = find_job(&state, job_id).await?;

    let extraction_id = match (job.status, job.extraction_id) {
        (JobStatus::Completed, Some(id)) => id,
        _ => {
            return Err(ApiError::Conflict(format!(
                "Job {} is {}; results are available once it completes",
                job_id, job.status
            )))
        }
    };

    let record = find_extraction(&state, extraction_id).await?;
    let archive = build_archive(&record)?;

    tracing::info!(job_id = %job_id, extraction_id = %extraction_id, bytes = archive.len(), "Results downloaded");

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"rfp-{}.zip\"", job_id),
        )
        .body(Body::from(archive))
        .map_err(anyhow::Error::from)?;

    Ok(response.into_response())
}

async fn find_job(state: &AppState, job_id: Uuid) -> ApiResult<ProcessingJob> {
    state
        .pipeline
        .jobs()
        .get(job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Job {} not found", job_id)))
}

async fn find_extraction(state: &AppState, extraction_id: Uuid) -> ApiResult<ExtractionRecord> {
    state
        .pipeline
        .extractions()
        .get(extraction_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Extraction {} not found", extraction_id)))
}

fn build_archive(record: &ExtractionRecord) -> anyhow::Result<Vec<u8>> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    zip.start_file(format!("extraction-{}.json", record.id), options)?;
    zip.write_all(&serde_json::to_vec_pretty(record)?)?;

    let mapping = serde_json::json!({
        "report": record.mapping_report,
        "mappings": record.service_mappings,
        "skipped": record.skipped_services,
    });
    zip.start_file("mapping-report.json", options)?;
    zip.write_all(&serde_json::to_vec_pretty(&mapping)?)?;

    Ok(zip.finish()?.into_inner())
}

/// Last path component of a client-supplied filename
fn display_name(raw: &str) -> String {
    raw.rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("upload.pdf")
        .to_string()
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::bad_request(format!("Failed to read upload: {}", e.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::create_app;
    use crate::config::Settings;
    use crate::pipeline::orchestrator::tests::{full_extraction, reply, ScriptedClient};
    use crate::pipeline::pdf_analyzer::tests::write_pdf;
    use crate::services::MemoryStore;
    use axum::{http::Request, Router};
    use serde_json::{json, Value};
    use std::io::Read;
    use std::path::PathBuf;
    use tower::ServiceExt;

    const BOUNDARY: &str = "rfp-test-boundary";

    fn test_app(dir: &std::path::Path) -> (Arc<AppState>, Router) {
        let state = AppState::new(
            Settings::for_tests(dir),
            Arc::new(ScriptedClient::new(vec![reply(full_extraction().to_string())])),
            Arc::new(MemoryStore::<ProcessingJob>::new()),
        );
        (state.clone(), create_app(state))
    }

    fn upload_request(filename: &str, content_type: &str, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/rfp/upload")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn sample_pdf(dir: &std::path::Path) -> Vec<u8> {
        let path: PathBuf = dir.join("source.pdf");
        write_pdf(
            &path,
            "Request for Proposal - Generator Maintenance",
            &["Request for Proposal 24-117", "Scope of Work", "Payment Terms"],
        );
        std::fs::read(path).unwrap()
    }

    async fn wait_for_terminal(app: &Router, job_id: &str) -> Value {
        for _ in 0..250 {
            let response = app.clone().oneshot(get(&format!("/rfp/jobs/{job_id}"))).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            let status = body["data"]["status"].as_str().unwrap().to_string();
            if status == "completed" || status == "failed" {
                return body["data"].clone();
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("job {job_id} never finished");
    }

    #[tokio::test]
    async fn upload_runs_to_completion_and_downloads_a_zip() {
        let dir = tempfile::tempdir().unwrap();
        let (_state, app) = test_app(dir.path());
        let pdf = sample_pdf(dir.path());

        let response = app
            .clone()
            .oneshot(upload_request("harbor-rfp.pdf", "application/pdf", &pdf))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let accepted = json_body(response).await;
        assert_eq!(accepted["data"]["status"], "uploaded");
        let job_id = accepted["data"]["jobId"].as_str().unwrap().to_string();

        let job = wait_for_terminal(&app, &job_id).await;
        assert_eq!(job["status"], "completed", "job failed: {}", job["error"]);
        assert_eq!(job["progress"], 100);
        let extraction_id = job["extractionId"].as_str().unwrap().to_string();

        let response = app.clone().oneshot(get(&format!("/rfp/jobs/{job_id}/download"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        assert_eq!(archive.len(), 2);

        let mut extraction = String::new();
        archive
            .by_name(&format!("extraction-{extraction_id}.json"))
            .unwrap()
            .read_to_string(&mut extraction)
            .unwrap();
        let extraction: Value = serde_json::from_str(&extraction).unwrap();
        assert_eq!(extraction["source"]["filename"], "harbor-rfp.pdf");

        let mut mapping = String::new();
        archive.by_name("mapping-report.json").unwrap().read_to_string(&mut mapping).unwrap();
        let mapping: Value = serde_json::from_str(&mapping).unwrap();
        assert_eq!(mapping["mappings"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn verify_patches_extraction_and_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let (state, app) = test_app(dir.path());
        let record = crate::services::store::tests::sample_record();
        state.pipeline.extractions().save(record.clone()).await.unwrap();

        let verify = |body: Value| {
            Request::builder()
                .method("POST")
                .uri(format!("/rfp/extractions/{}/verify", record.id))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap()
        };

        let response = app
            .clone()
            .oneshot(verify(json!({ "fields": { "bidPrice": 100 } })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(verify(json!({ "fields": { "contactInfo": { "name": "Pat Lee" } } })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"]["verified"], true);
        assert_eq!(body["data"]["data"]["contactInfo"]["name"], "Pat Lee");

        let response = app.oneshot(get(&format!("/rfp/extractions/{}", record.id))).await.unwrap();
        let body = json_body(response).await;
        assert_eq!(body["data"]["corrections"], json!(["contactInfo"]));
    }

    #[tokio::test]
    async fn non_pdf_upload_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let (_state, app) = test_app(dir.path());

        let response = app
            .oneshot(upload_request("notes.txt", "text/plain", b"scope of work"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let body = json_body(response).await;
        assert_eq!(body["code"], "UNSUPPORTED_MEDIA_TYPE");
    }

    #[tokio::test]
    async fn pdf_name_without_pdf_content_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let (_state, app) = test_app(dir.path());

        let response = app
            .oneshot(upload_request("renamed.pdf", "application/pdf", b"PK\x03\x04 zip bytes"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn oversize_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (_state, app) = test_app(dir.path());
        let mut data = b"%PDF-1.7\n".to_vec();
        data.resize(1024 * 1024 + 512 * 1024, b' ');

        let response = app
            .oneshot(upload_request("big.pdf", "application/pdf", &data))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (_state, app) = test_app(dir.path());

        let response = app
            .clone()
            .oneshot(get(&format!("/rfp/jobs/{}", Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(get(&format!("/rfp/jobs/{}/download", Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn download_of_unfinished_job_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let (state, app) = test_app(dir.path());
        let job = ProcessingJob::new(Uuid::new_v4(), "pending.pdf".into(), dir.path().join("pending.pdf"), 10);
        state.pipeline.jobs().put(job.clone()).await.unwrap();

        let response = app.oneshot(get(&format!("/rfp/jobs/{}/download", job.id))).await.unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn display_name_strips_client_paths() {
        assert_eq!(display_name("C:\\Users\\dana\\rfp.pdf"), "rfp.pdf");
        assert_eq!(display_name("../../etc/rfp.pdf"), "rfp.pdf");
        assert_eq!(display_name("dir/"), "upload.pdf");
    }
}
