//! Extraction domain types
//!
//! The fixed schema the completion service is asked to fill in, plus the
//! record that wraps it with confidence, usage and review state.
//!
//! Every leaf is optional: an absent value is a normal extraction outcome and
//! feeds the coverage-based confidence score. Top-level sections are not
//! optional; the orchestrator rejects output that omits them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::domain::documents::{Classification, Section};
use crate::domain::mapping::{MappingReport, ServiceMapping, SkippedService};

/// Accepts strings, numbers and booleans for text fields; models are not
/// consistent about quoting values like "30" or true.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

// ============================================================================
// Schema sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub organization: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetails {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub solicitation_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub issuing_agency: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub site_count: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub equipment_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    #[serde(default, deserialize_with = "lenient_string")]
    pub issue_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub questions_deadline: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub pre_bid_meeting: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub proposal_due_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub contract_start_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub contract_term: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDetails {
    #[serde(default, deserialize_with = "lenient_string")]
    pub equipment: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub quantity: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub notes: Option<String>,
}

/// One free-text service requirement; consumed, never altered, by mapping
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedService {
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub frequency: Option<String>,
    #[serde(default)]
    pub details: ServiceDetails,
    #[serde(default, deserialize_with = "lenient_string")]
    pub raw_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stipulation {
    #[serde(default, deserialize_with = "lenient_string")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub requirement: Option<String>,
    #[serde(default)]
    pub mandatory: Option<bool>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub source_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTerms {
    #[serde(default, deserialize_with = "lenient_string")]
    pub terms: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub invoicing_frequency: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub net_days: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub retainage: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BondRequirements {
    #[serde(default, deserialize_with = "lenient_string")]
    pub bid_bond: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub performance_bond: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub payment_bond: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InsuranceRequirements {
    #[serde(default, deserialize_with = "lenient_string")]
    pub general_liability: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub auto_liability: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub workers_compensation: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub umbrella: Option<String>,
    #[serde(default)]
    pub additional_insured: Option<bool>,
}

/// Quality tier derived from extraction confidence
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    High,
    Medium,
    Low,
}

impl QualityTier {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.8 {
            Self::High
        } else if confidence >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub fields_extracted: usize,
    pub fields_needing_review: Vec<String>,
    pub ambiguities: Vec<String>,
    pub quality_tier: QualityTier,
}

/// The typed extraction schema
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedData {
    pub contact_info: ContactInfo,
    pub project_details: ProjectDetails,
    pub schedule: Schedule,
    pub services: Vec<ExtractedService>,
    pub stipulations: Vec<Stipulation>,
    pub payment_terms: PaymentTerms,
    pub bond_requirements: BondRequirements,
    pub required_documents: Vec<String>,
    #[serde(default)]
    pub insurance_requirements: InsuranceRequirements,
}

/// Top-level keys that must be present in completion output
pub const REQUIRED_KEYS: &[&str] = &[
    "contactInfo",
    "projectDetails",
    "schedule",
    "services",
    "stipulations",
    "paymentTerms",
    "bondRequirements",
    "requiredDocuments",
];

/// Top-level keys that must hold arrays
pub const SEQUENCE_KEYS: &[&str] = &["services", "stipulations", "requiredDocuments"];

/// Keys a correction patch may touch
pub const PATCHABLE_KEYS: &[&str] = &[
    "contactInfo",
    "projectDetails",
    "schedule",
    "services",
    "stipulations",
    "paymentTerms",
    "bondRequirements",
    "requiredDocuments",
    "insuranceRequirements",
];

// ============================================================================
// Usage
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryRecord {
    pub attempt: u32,
    pub reason: String,
    pub delay_ms: u64,
}

/// Token, cost and retry accounting for one extraction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_hit: bool,
    pub cost_usd: Decimal,
    pub latency_ms: u64,
    pub attempts: u32,
    pub retries: Vec<RetryRecord>,
}

// ============================================================================
// Record
// ============================================================================

/// Where the record came from
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceSummary {
    pub job_id: Option<Uuid>,
    pub filename: Option<String>,
    pub page_count: Option<u32>,
    pub classification: Option<Classification>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

/// Structured result of one extraction, amended only by corrections
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRecord {
    pub id: Uuid,
    pub data: ExtractedData,
    /// Field-coverage proxy in 0.0-1.0, not a correctness measure
    pub confidence: f64,
    pub quality_report: QualityReport,
    pub usage: UsageMetadata,
    #[serde(default)]
    pub source: SourceSummary,
    #[serde(default)]
    pub service_mappings: Vec<ServiceMapping>,
    #[serde(default)]
    pub skipped_services: Vec<SkippedService>,
    pub mapping_report: Option<MappingReport>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub corrections: Vec<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial overwrite of extracted data submitted by a reviewer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRequest {
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lenient_fields_accept_numbers_and_booleans() {
        let terms: PaymentTerms = serde_json::from_value(json!({
            "terms": "Net 30",
            "netDays": 30,
            "retainage": false
        }))
        .unwrap();

        assert_eq!(terms.net_days.as_deref(), Some("30"));
        assert_eq!(terms.retainage.as_deref(), Some("false"));
        assert_eq!(terms.invoicing_frequency, None);
    }

    #[test]
    fn insurance_section_is_optional() {
        let data: ExtractedData = serde_json::from_value(json!({
            "contactInfo": {},
            "projectDetails": {},
            "schedule": {},
            "services": [],
            "stipulations": [],
            "paymentTerms": {},
            "bondRequirements": {},
            "requiredDocuments": []
        }))
        .unwrap();

        assert_eq!(data.insurance_requirements, InsuranceRequirements::default());
    }

    #[test]
    fn quality_tier_boundaries() {
        assert_eq!(QualityTier::from_confidence(0.8), QualityTier::High);
        assert_eq!(QualityTier::from_confidence(0.5), QualityTier::Medium);
        assert_eq!(QualityTier::from_confidence(0.49), QualityTier::Low);
    }
}
