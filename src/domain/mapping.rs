//! Service mapping domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical service codes; `ServiceK` is the custom catch-all
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceCode {
    ServiceA,
    ServiceB,
    ServiceC,
    ServiceD,
    ServiceE,
    ServiceF,
    ServiceG,
    ServiceH,
    ServiceI,
    ServiceJ,
    ServiceK,
}

impl ServiceCode {
    pub const CUSTOM: ServiceCode = ServiceCode::ServiceK;

    pub fn is_custom(self) -> bool {
        self == Self::CUSTOM
    }
}

impl std::fmt::Display for ServiceCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Same text as the serde representation
        write!(f, "{:?}", self)
    }
}

/// Per-signal sub-scores, each in 0.0-1.0
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SignalScores {
    pub keyword: f64,
    pub alias: f64,
    pub frequency: f64,
    pub context: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MappingAlternative {
    pub code: ServiceCode,
    pub name: String,
    pub confidence: f64,
    /// Sub-scores, damped when the entry was penalized
    #[serde(default)]
    pub scores: SignalScores,
    /// Why the entry could not win, if it was penalized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub penalty: Option<String>,
}

/// Result of mapping one extracted service onto the taxonomy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMapping {
    pub original_text: String,
    pub mapped_to: ServiceCode,
    pub mapped_name: String,
    pub confidence: f64,
    pub scores: SignalScores,
    pub alternatives: Vec<MappingAlternative>,
    pub requires_review: bool,
    pub rationale: String,
}

/// An extracted service the mapper could not take
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SkippedService {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MappingBatch {
    pub mappings: Vec<ServiceMapping>,
    pub skipped: Vec<SkippedService>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceTiers {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MappingReport {
    pub total: usize,
    pub requires_review: usize,
    pub average_confidence: f64,
    pub by_tier: ConfidenceTiers,
    pub by_code: BTreeMap<ServiceCode, usize>,
}
