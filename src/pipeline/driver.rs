//! Job driver.
//!
//! Runs one upload through analysis, optional splitting, extraction and
//! mapping, strictly in that order, recording progress on the job after each
//! stage. Jobs run as independent tasks; a failure marks only its own job.
//! There is no cancellation: a job runs until it completes or fails.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::domain::extraction::ExtractionRecord;
use crate::domain::{AnalysisReport, JobStatus, ProcessingJob, Stage};
use crate::pipeline::orchestrator::ExtractionOrchestrator;
use crate::pipeline::pdf_analyzer::PdfAnalyzer;
use crate::pipeline::prompt::DocumentContext;
use crate::pipeline::service_mapper::ServiceMapper;
use crate::services::store::{ExtractionRepository, Store};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub upload_dir: PathBuf,
    pub sections_dir: PathBuf,
    pub split_sections: bool,
    pub job_ttl: Duration,
}

#[derive(Clone)]
pub struct Pipeline {
    analyzer: Arc<PdfAnalyzer>,
    orchestrator: Arc<ExtractionOrchestrator>,
    mapper: Arc<ServiceMapper>,
    jobs: Arc<dyn Store<ProcessingJob>>,
    extractions: ExtractionRepository,
    config: PipelineConfig,
}

/// Outcome of one purge pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub jobs: usize,
    pub extractions: usize,
    /// Uploads and section directories removed
    pub artifacts: usize,
}

impl Pipeline {
    pub fn new(
        analyzer: PdfAnalyzer,
        orchestrator: ExtractionOrchestrator,
        mapper: ServiceMapper,
        jobs: Arc<dyn Store<ProcessingJob>>,
        extractions: ExtractionRepository,
        config: PipelineConfig,
    ) -> Self {
        Self {
            analyzer: Arc::new(analyzer),
            orchestrator: Arc::new(orchestrator),
            mapper: Arc::new(mapper),
            jobs,
            extractions,
            config,
        }
    }

    pub fn jobs(&self) -> &Arc<dyn Store<ProcessingJob>> {
        &self.jobs
    }

    pub fn extractions(&self) -> &ExtractionRepository {
        &self.extractions
    }

    pub fn mapper(&self) -> &ServiceMapper {
        &self.mapper
    }

    /// Register the job and process it in the background.
    pub async fn submit(&self, job: ProcessingJob) -> anyhow::Result<()> {
        self.jobs.put(job.clone()).await?;

        let pipeline = self.clone();
        let span = tracing::info_span!("job", job_id = %job.id);
        tokio::spawn(async move { pipeline.run(job).await }.instrument(span));

        Ok(())
    }

    /// Drive a job to completion or failure. Never panics on stage errors.
    pub async fn run(&self, mut job: ProcessingJob) -> ProcessingJob {
        info!(job_id = %job.id, filename = %job.filename, "Job started");

        match self.process(&mut job).await {
            Ok(extraction_id) => {
                job.complete(extraction_id);
                info!(job_id = %job.id, extraction_id = %extraction_id, "Job completed");
            }
            Err(message) => {
                error!(job_id = %job.id, stage = %job.stage, error = %message, "Job failed");
                job.fail(message);
            }
        }

        self.record(&job).await;
        job
    }

    async fn process(&self, job: &mut ProcessingJob) -> Result<Uuid, String> {
        // Analysis
        self.advance(job, JobStatus::Extracting, Stage::Analysis).await;
        let analyzer = self.analyzer.clone();
        let path = job.upload_path.clone();
        let mut report: AnalysisReport = tokio::task::spawn_blocking(move || analyzer.analyze(&path))
            .await
            .map_err(|e| format!("analysis task failed: {}", e))?;

        if !report.success {
            return Err(report.error.unwrap_or_else(|| "document analysis failed".to_string()));
        }

        // Splitting
        if self.config.split_sections {
            self.advance(job, JobStatus::Extracting, Stage::Splitting).await;
            let analyzer = self.analyzer.clone();
            let path = job.upload_path.clone();
            let output_dir = self.config.sections_dir.join(job.id.to_string());
            let sections = std::mem::take(&mut report.sections);

            report.sections = tokio::task::spawn_blocking(move || analyzer.split_by_sections(&path, sections, &output_dir))
                .await
                .map_err(|e| format!("split task failed: {}", e))?;

            let failed = report.sections.iter().filter(|s| s.error.is_some()).count();
            if failed > 0 {
                warn!(job_id = %job.id, failed = failed, total = report.sections.len(), "Some sections could not be split");
            }
        }

        // Extraction
        self.advance(job, JobStatus::Extracting, Stage::Extraction).await;
        let page_count = report.document.as_ref().map(|d| d.page_count);
        let context = DocumentContext {
            filename: Some(job.filename.clone()),
            page_count,
            document_type: Some(report.classification.document_type),
        };
        let mut record: ExtractionRecord = self
            .orchestrator
            .extract(&report.text, &context)
            .await
            .map_err(|e| e.to_string())?;

        // Mapping
        self.advance(job, JobStatus::Mapping, Stage::Mapping).await;
        let batch = self.mapper.map_services(&record.data.services);
        let mapping_report = ServiceMapper::generate_mapping_report(&batch.mappings);
        info!(
            job_id = %job.id,
            mapped = mapping_report.total,
            requires_review = mapping_report.requires_review,
            skipped = batch.skipped.len(),
            "Services mapped"
        );

        record.service_mappings = batch.mappings;
        record.skipped_services = batch.skipped;
        record.mapping_report = Some(mapping_report);
        record.source.job_id = Some(job.id);
        record.source.filename = Some(job.filename.clone());
        record.source.page_count = page_count;
        record.source.classification = Some(report.classification);
        record.source.sections = report.sections;

        // Persist
        self.advance(job, JobStatus::Mapping, Stage::Persist).await;
        let extraction_id = record.id;
        self.extractions
            .save(record)
            .await
            .map_err(|e| format!("failed to persist extraction: {}", e))?;

        Ok(extraction_id)
    }

    async fn advance(&self, job: &mut ProcessingJob, status: JobStatus, stage: Stage) {
        job.advance(status, stage);
        self.record(job).await;
    }

    async fn record(&self, job: &ProcessingJob) {
        if let Err(e) = self.jobs.put(job.clone()).await {
            warn!(job_id = %job.id, error = %e, "Failed to record job state");
        }
    }

    /// Purge jobs and in-memory extraction records older than the job TTL,
    /// along with the uploads and split sections of jobs no longer known.
    pub async fn sweep(&self) -> SweepOutcome {
        let ttl = chrono::Duration::from_std(self.config.job_ttl).unwrap_or_else(|_| chrono::Duration::weeks(52));
        let cutoff = Utc::now() - ttl;
        let mut outcome = SweepOutcome::default();

        match self.jobs.sweep(cutoff).await {
            Ok(count) => outcome.jobs = count,
            Err(e) => warn!(error = %e, "Job sweep failed"),
        }
        match self.extractions.sweep_memory(cutoff).await {
            Ok(count) => outcome.extractions = count,
            Err(e) => warn!(error = %e, "Extraction sweep failed"),
        }
        match self.sweep_artifacts(cutoff).await {
            Ok(count) => outcome.artifacts = count,
            Err(e) => warn!(error = %e, "Artifact sweep failed"),
        }

        if outcome != SweepOutcome::default() {
            info!(
                jobs = outcome.jobs,
                extractions = outcome.extractions,
                artifacts = outcome.artifacts,
                "Expired records purged"
            );
        }
        outcome
    }

    /// Entries are named by job id: `uploads/<id>.pdf` and `sections/<id>/`.
    async fn sweep_artifacts(&self, cutoff: DateTime<Utc>) -> anyhow::Result<usize> {
        let mut removed = 0;

        for dir in [&self.config.upload_dir, &self.config.sections_dir] {
            let mut entries = match tokio::fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let Some(job_id) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| Uuid::parse_str(s).ok())
                else {
                    continue;
                };

                let metadata = entry.metadata().await?;
                let modified: DateTime<Utc> = metadata.modified()?.into();
                if modified >= cutoff || self.jobs.get(job_id).await?.is_some() {
                    continue;
                }

                if metadata.is_dir() {
                    tokio::fs::remove_dir_all(&path).await?;
                } else {
                    tokio::fs::remove_file(&path).await?;
                }
                debug!(job_id = %job_id, path = %path.display(), "Job artifact removed");
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Start the periodic purge task
    pub fn start_sweeper(self, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; nothing is stale at startup
            ticker.tick().await;

            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}
