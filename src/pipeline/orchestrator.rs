//! Structured extraction through the completion service.
//!
//! One request per document. Rate limits back off exponentially, server
//! errors wait a fixed interval, anything else fails at once. Output that
//! cannot be read as JSON is saved to the debug directory before failing.

use backoff::backoff::Constant;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::extraction::{
    ExtractedData, ExtractionRecord, QualityReport, QualityTier, RetryRecord, SourceSummary, UsageMetadata,
    REQUIRED_KEYS, SEQUENCE_KEYS,
};
use crate::pipeline::prompt::{self, DocumentContext};
use crate::services::completion::{CompletionClient, CompletionError, CompletionRequest, CompletionResponse, TokenUsage};

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("Invalid fenced JSON regex"));

/// Sections whose field fill rate feeds the confidence score
const COVERAGE_SECTIONS: &[&str] = &["contactInfo", "projectDetails", "schedule", "paymentTerms"];
/// Sequences that add a flat bonus when non-empty
const COVERAGE_SEQUENCES: &[&str] = &["services", "stipulations"];
/// Sections checked for missing fields in the quality report
const REVIEWED_SECTIONS: &[&str] = &[
    "contactInfo",
    "projectDetails",
    "schedule",
    "paymentTerms",
    "bondRequirements",
    "insuranceRequirements",
];

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("completion service rate limit persisted after {attempts} attempts: {message}")]
    RateLimited { attempts: u32, message: String },

    #[error("completion service unavailable after {attempts} attempts: {message}")]
    TransientServerError { attempts: u32, message: String },

    #[error("completion service rejected the request ({status}): {message}")]
    ClientError { status: u16, message: String },

    #[error("completion output is not valid JSON ({})", debug_note(.debug_path))]
    ParseFailure { debug_path: Option<PathBuf> },

    #[error("completion output does not match the extraction schema: {0}")]
    SchemaViolation(String),
}

fn debug_note(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!("raw response saved to {}", path.display()),
        None => "raw response not saved".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub model: String,
    pub max_tokens: u32,
    /// Total attempts, including the first
    pub max_retries: u32,
    pub server_retry_delay: Duration,
    pub debug_dir: PathBuf,
    pub cost_alert_usd: Decimal,
}

pub struct ExtractionOrchestrator {
    client: Arc<dyn CompletionClient>,
    config: OrchestratorConfig,
}

impl ExtractionOrchestrator {
    pub fn new(client: Arc<dyn CompletionClient>, config: OrchestratorConfig) -> Self {
        Self { client, config }
    }

    #[instrument(skip(self, text, context), fields(chars = text.len(), filename = ?context.filename))]
    pub async fn extract(&self, text: &str, context: &DocumentContext) -> Result<ExtractionRecord, ExtractionError> {
        let request = CompletionRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: 0.0,
            system: prompt::system_blocks(),
            user_content: prompt::user_message(text, context),
        };

        let started = Instant::now();
        let (response, attempts, retries) = self.complete_with_retry(&request).await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let Some(value) = parse_response(&response.text) else {
            let debug_path = self.save_debug(&response.text).await;
            warn!(debug_path = ?debug_path, "Completion output could not be parsed");
            return Err(ExtractionError::ParseFailure { debug_path });
        };

        let (data, ambiguities) = validate(value)?;
        let data_value = serde_json::to_value(&data).unwrap_or_default();
        let confidence = coverage_confidence(&data_value);
        let quality_report = quality_report(&data_value, ambiguities, confidence);

        let model = if response.model.is_empty() {
            request.model.clone()
        } else {
            response.model.clone()
        };
        let usage = usage_metadata(model, &response.usage, latency_ms, attempts, retries);

        if usage.cost_usd > self.config.cost_alert_usd {
            warn!(
                cost_usd = %usage.cost_usd,
                alert_usd = %self.config.cost_alert_usd,
                "Extraction cost above alert threshold"
            );
        }

        info!(
            confidence = confidence,
            services = data.services.len(),
            attempts = attempts,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cache_hit = usage.cache_hit,
            cost_usd = %usage.cost_usd,
            latency_ms = latency_ms,
            "Extraction completed"
        );

        let now = Utc::now();
        Ok(ExtractionRecord {
            id: Uuid::new_v4(),
            data,
            confidence,
            quality_report,
            usage,
            source: SourceSummary {
                filename: context.filename.clone(),
                page_count: context.page_count,
                ..Default::default()
            },
            service_mappings: Vec::new(),
            skipped_services: Vec::new(),
            mapping_report: None,
            verified: false,
            corrections: Vec::new(),
            verified_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Call the completion service, retrying transient failures serially.
    async fn complete_with_retry(
        &self,
        request: &CompletionRequest,
    ) -> Result<(CompletionResponse, u32, Vec<RetryRecord>), ExtractionError> {
        let attempts = AtomicU32::new(0);
        let retries = parking_lot::Mutex::new(Vec::new());
        let max_attempts = self.config.max_retries.max(1);
        let server_delay = self.config.server_retry_delay;

        let client = &self.client;
        let attempts_ref = &attempts;

        let operation = move || async move {
            let attempt = attempts_ref.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(attempt = attempt, "Calling completion service");

            client.complete(request).await.map_err(|e| match retry_delay(&e, attempt, server_delay) {
                Some(delay) if attempt < max_attempts => backoff::Error::retry_after(e, delay),
                _ => backoff::Error::permanent(e),
            })
        };

        let notify = |e: CompletionError, delay: Duration| {
            let attempt = attempts.load(Ordering::SeqCst);
            warn!(
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Completion attempt failed, retrying"
            );
            retries.lock().push(RetryRecord {
                attempt,
                reason: e.to_string(),
                delay_ms: delay.as_millis() as u64,
            });
        };

        let result = backoff::future::retry_notify(Constant::new(server_delay), operation, notify).await;
        let attempts = attempts.load(Ordering::SeqCst);
        let retries = retries.into_inner();

        result
            .map(|response| (response, attempts, retries))
            .map_err(|e| match e {
                CompletionError::RateLimited { message } => ExtractionError::RateLimited { attempts, message },
                CompletionError::Server { .. } | CompletionError::Transport(_) => ExtractionError::TransientServerError {
                    attempts,
                    message: e.to_string(),
                },
                CompletionError::Client { status, message } => ExtractionError::ClientError { status, message },
            })
    }

    async fn save_debug(&self, raw: &str) -> Option<PathBuf> {
        let path = self.config.debug_dir.join(format!(
            "extraction-debug-{}-{}.txt",
            Utc::now().format("%Y%m%dT%H%M%S"),
            Uuid::new_v4()
        ));

        let written = async {
            tokio::fs::create_dir_all(&self.config.debug_dir).await?;
            tokio::fs::write(&path, raw).await
        }
        .await;

        match written {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(error = %e, "Failed to save debug artifact");
                None
            }
        }
    }
}

/// Wait before the next attempt, or None when the error is not transient.
fn retry_delay(error: &CompletionError, attempt: u32, server_delay: Duration) -> Option<Duration> {
    match error {
        CompletionError::RateLimited { .. } => Some(Duration::from_secs(2u64.saturating_pow(attempt))),
        CompletionError::Server { .. } | CompletionError::Transport(_) => Some(server_delay),
        CompletionError::Client { .. } => None,
    }
}

/// Direct JSON, then a fenced block, then the outermost brace span.
pub(crate) fn parse_response(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(captures) = FENCED_JSON.captures(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(&captures[1]) {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if start >= end {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

/// Check required keys and sequence shapes, then decode into the typed schema.
/// Returns the model's own ambiguity notes alongside.
pub(crate) fn validate(value: Value) -> Result<(ExtractedData, Vec<String>), ExtractionError> {
    let Value::Object(map) = &value else {
        return Err(ExtractionError::SchemaViolation("top-level value is not an object".into()));
    };

    let missing: Vec<&str> = REQUIRED_KEYS.iter().copied().filter(|k| !map.contains_key(*k)).collect();
    if !missing.is_empty() {
        return Err(ExtractionError::SchemaViolation(format!(
            "missing required keys: {}",
            missing.join(", ")
        )));
    }

    for key in SEQUENCE_KEYS {
        if !map.get(*key).is_some_and(Value::is_array) {
            return Err(ExtractionError::SchemaViolation(format!("{} must be an array", key)));
        }
    }

    let ambiguities = map
        .get("qualityReport")
        .and_then(|q| q.get("ambiguities"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let data = serde_json::from_value(value).map_err(|e| ExtractionError::SchemaViolation(e.to_string()))?;
    Ok((data, ambiguities))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn fill_fraction(section: Option<&Value>) -> f64 {
    match section {
        Some(Value::Object(fields)) if !fields.is_empty() => {
            let filled = fields.values().filter(|v| !is_blank(v)).count();
            filled as f64 / fields.len() as f64
        }
        _ => 0.0,
    }
}

/// Mean field fill rate over the contact, project, schedule and payment
/// sections, plus one point each for non-empty services and stipulations.
/// Measures coverage only; a populated field may still be wrong.
pub(crate) fn coverage_confidence(data: &Value) -> f64 {
    let sections = COVERAGE_SECTIONS.iter().map(|key| fill_fraction(data.get(*key)));
    let sequences = COVERAGE_SEQUENCES
        .iter()
        .map(|key| if data.get(*key).is_some_and(|v| !is_blank(v)) { 1.0 } else { 0.0 });

    let scores: Vec<f64> = sections.chain(sequences).collect();
    scores.iter().sum::<f64>() / scores.len() as f64
}

pub(crate) fn quality_report(data: &Value, ambiguities: Vec<String>, confidence: f64) -> QualityReport {
    let mut fields_extracted = 0usize;
    let mut fields_needing_review = Vec::new();

    for key in REVIEWED_SECTIONS {
        if let Some(Value::Object(fields)) = data.get(*key) {
            for (field, value) in fields {
                if is_blank(value) {
                    fields_needing_review.push(format!("{}.{}", key, field));
                } else {
                    fields_extracted += 1;
                }
            }
        }
    }

    for key in SEQUENCE_KEYS {
        match data.get(*key).and_then(Value::as_array) {
            Some(items) if !items.is_empty() => fields_extracted += items.len(),
            _ => fields_needing_review.push((*key).to_string()),
        }
    }

    QualityReport {
        fields_extracted,
        fields_needing_review,
        ambiguities,
        quality_tier: QualityTier::from_confidence(confidence),
    }
}

/// USD cost from per-token rates: fresh input $3/M, output $15/M, cache
/// reads $0.30/M. Cache writes are billed as fresh input.
pub(crate) fn estimate_cost(usage: &TokenUsage) -> Decimal {
    let input_rate = Decimal::new(3, 6);
    let output_rate = Decimal::new(15, 6);
    let cache_read_rate = Decimal::new(3, 7);

    let cost = Decimal::from(usage.input_tokens + usage.cache_creation_input_tokens) * input_rate
        + Decimal::from(usage.output_tokens) * output_rate
        + Decimal::from(usage.cache_read_input_tokens) * cache_read_rate;
    cost.round_dp(6)
}

fn usage_metadata(
    model: String,
    usage: &TokenUsage,
    latency_ms: u64,
    attempts: u32,
    retries: Vec<RetryRecord>,
) -> UsageMetadata {
    UsageMetadata {
        model,
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cache_read_tokens: usage.cache_read_input_tokens,
        cache_creation_tokens: usage.cache_creation_input_tokens,
        cache_hit: usage.cache_read_input_tokens > 0,
        cost_usd: estimate_cost(usage),
        latency_ms,
        attempts,
        retries,
    }
}
