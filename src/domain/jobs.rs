//! Processing job domain types
//!
//! Types for tracking an uploaded solicitation through the intake pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Processing job status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Uploaded,
    Extracting,
    Mapping,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Uploaded => write!(f, "uploaded"),
            JobStatus::Extracting => write!(f, "extracting"),
            JobStatus::Mapping => write!(f, "mapping"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Pipeline stage keys
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Upload,
    Analysis,
    Splitting,
    Extraction,
    Mapping,
    Persist,
    Done,
}

impl Stage {
    /// Human-readable label and progress percentage when the stage starts
    pub fn label_and_progress(self) -> (&'static str, u8) {
        match self {
            Stage::Upload => ("Uploaded", 5),
            Stage::Analysis => ("Analyzing document", 10),
            Stage::Splitting => ("Splitting sections", 25),
            Stage::Extraction => ("Extracting data", 35),
            Stage::Mapping => ("Mapping services", 80),
            Stage::Persist => ("Saving results", 95),
            Stage::Done => ("Completed", 100),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Upload => write!(f, "upload"),
            Stage::Analysis => write!(f, "analysis"),
            Stage::Splitting => write!(f, "splitting"),
            Stage::Extraction => write!(f, "extraction"),
            Stage::Mapping => write!(f, "mapping"),
            Stage::Persist => write!(f, "persist"),
            Stage::Done => write!(f, "done"),
        }
    }
}

/// Orchestration state, mutated only by the pipeline driver
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingJob {
    pub id: Uuid,
    pub filename: String,
    pub upload_path: PathBuf,
    pub byte_size: u64,
    pub status: JobStatus,
    pub stage: Stage,
    pub stage_label: String,
    pub progress: u8,
    pub error: Option<String>,
    pub extraction_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessingJob {
    pub fn new(id: Uuid, filename: String, upload_path: PathBuf, byte_size: u64) -> Self {
        let now = Utc::now();
        let (label, progress) = Stage::Upload.label_and_progress();
        Self {
            id,
            filename,
            upload_path,
            byte_size,
            status: JobStatus::Uploaded,
            stage: Stage::Upload,
            stage_label: label.to_string(),
            progress,
            error: None,
            extraction_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn advance(&mut self, status: JobStatus, stage: Stage) {
        let (label, progress) = stage.label_and_progress();
        self.status = status;
        self.stage = stage;
        self.stage_label = label.to_string();
        self.progress = progress;
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self, extraction_id: Uuid) {
        self.advance(JobStatus::Completed, Stage::Done);
        self.extraction_id = Some(extraction_id);
        self.completed_at = Some(self.updated_at);
    }

    /// Stage and progress stay where the failure happened
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
        self.completed_at = Some(self.updated_at);
    }
}

/// Status surface returned to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub filename: String,
    pub status: JobStatus,
    pub stage: Stage,
    pub stage_label: String,
    pub progress: u8,
    pub error: Option<String>,
    pub extraction_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProcessingJob> for JobStatusResponse {
    fn from(job: ProcessingJob) -> Self {
        Self {
            job_id: job.id,
            filename: job.filename,
            status: job.status,
            stage: job.stage,
            stage_label: job.stage_label,
            progress: job.progress,
            error: job.error,
            extraction_id: job.extraction_id,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Returned by the upload endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAccepted {
    pub job_id: Uuid,
    pub status: JobStatus,
}
