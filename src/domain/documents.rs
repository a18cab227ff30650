//! Document domain types
//!
//! Structural facts about an uploaded solicitation PDF: metadata, document
//! classification and the section layout produced by the analyzer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

// ============================================================================
// Documents
// ============================================================================

/// Metadata read from the PDF Info dictionary
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
}

/// An uploaded PDF, immutable once loaded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    pub filename: String,
    pub byte_size: u64,
    pub page_count: u32,
    pub metadata: DocumentMetadata,
    pub loaded_at: DateTime<Utc>,
}

/// Full text pulled out of a PDF
#[derive(Debug, Clone)]
pub struct TextExtraction {
    pub text: String,
    pub page_count: u32,
}

// ============================================================================
// Classification
// ============================================================================

/// Solicitation document type, in tie-break order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DocumentType {
    #[serde(rename = "RFP")]
    Rfp,
    #[serde(rename = "RFQ")]
    Rfq,
    #[serde(rename = "IFB")]
    Ifb,
    #[serde(rename = "RFI")]
    Rfi,
    #[serde(rename = "SOW")]
    Sow,
    Unknown,
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentType::Rfp => write!(f, "RFP"),
            DocumentType::Rfq => write!(f, "RFQ"),
            DocumentType::Ifb => write!(f, "IFB"),
            DocumentType::Rfi => write!(f, "RFI"),
            DocumentType::Sow => write!(f, "SOW"),
            DocumentType::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub document_type: DocumentType,
    /// 0-100
    pub confidence: u32,
    pub raw_score: u32,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            document_type: DocumentType::Unknown,
            confidence: 0,
            raw_score: 0,
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SectionType {
    Cover,
    TableOfContents,
    Instructions,
    Specifications,
    BidForm,
    Terms,
    Insurance,
    Certification,
    Attachments,
    /// Fallback when no section markers exist
    Complete,
}

impl std::fmt::Display for SectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SectionType::Cover => write!(f, "cover"),
            SectionType::TableOfContents => write!(f, "table_of_contents"),
            SectionType::Instructions => write!(f, "instructions"),
            SectionType::Specifications => write!(f, "specifications"),
            SectionType::BidForm => write!(f, "bid_form"),
            SectionType::Terms => write!(f, "terms"),
            SectionType::Insurance => write!(f, "insurance"),
            SectionType::Certification => write!(f, "certification"),
            SectionType::Attachments => write!(f, "attachments"),
            SectionType::Complete => write!(f, "complete"),
        }
    }
}

/// A contiguous, 1-based inclusive page range of the source document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub title: String,
    pub section_type: SectionType,
    pub start_page: u32,
    pub end_page: u32,
    pub page_count: u32,
    pub output_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl Section {
    pub fn new(title: impl Into<String>, section_type: SectionType, start_page: u32, end_page: u32) -> Self {
        Self {
            title: title.into(),
            section_type,
            start_page,
            end_page,
            page_count: end_page.saturating_sub(start_page) + 1,
            output_path: None,
            error: None,
        }
    }
}

// ============================================================================
// Analysis
// ============================================================================

/// Result of `PdfAnalyzer::analyze`; failures are carried, never raised
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub success: bool,
    pub document: Option<Document>,
    pub metadata: DocumentMetadata,
    pub classification: Classification,
    pub sections: Vec<Section>,
    pub text_length: usize,
    pub processing_time_ms: u64,
    pub error: Option<String>,
    /// Full text handed to the extraction stage; not persisted
    #[serde(skip)]
    pub text: String,
}
