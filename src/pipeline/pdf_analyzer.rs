//! Deterministic structural analysis of solicitation PDFs.
//!
//! Loads a PDF with lopdf, pulls metadata and full text, classifies the
//! solicitation type from keyword evidence and splits the document into
//! typed sections. Nothing here calls a model.
//!
//! Section page numbers are estimated from character position assuming text
//! is spread evenly over pages. Text extraction does not keep per-page
//! offsets, so pages with unusually dense or sparse text shift the estimate.

use chrono::Utc;
use lopdf::Object;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    AnalysisReport, Classification, Document, DocumentMetadata, DocumentType, Section, SectionType,
    TextExtraction,
};

/// Characters from the start of the text considered for classification
const CLASSIFY_WINDOW: usize = 5_000;
const TITLE_HIT: u32 = 10;
const BODY_HIT: u32 = 2;
const SECTION_TITLE_MAX_CHARS: usize = 80;

/// Declaration order is the tie-break order.
const DOCUMENT_TYPE_KEYWORDS: &[(DocumentType, &[&str])] = &[
    (
        DocumentType::Rfp,
        &["request for proposal", "rfp", "proposal submission", "proposer", "technical proposal"],
    ),
    (
        DocumentType::Rfq,
        &["request for quote", "request for quotation", "rfq", "quotation", "quoter"],
    ),
    (
        DocumentType::Ifb,
        &["invitation for bid", "invitation to bid", "ifb", "sealed bid", "bid opening"],
    ),
    (
        DocumentType::Rfi,
        &["request for information", "rfi", "for information purposes", "market research"],
    ),
    (
        DocumentType::Sow,
        &["statement of work", "scope of work", "sow", "deliverables"],
    ),
];

/// The first type whose keyword appears in a line wins.
const SECTION_KEYWORDS: &[(SectionType, &[&str])] = &[
    (
        SectionType::Cover,
        &["request for proposal", "request for quotation", "invitation for bid", "solicitation no", "solicitation number"],
    ),
    (SectionType::TableOfContents, &["table of contents"]),
    (
        SectionType::Instructions,
        &["instructions to bidders", "instructions to proposers", "submission instructions", "proposal instructions"],
    ),
    (
        SectionType::Specifications,
        &["scope of work", "statement of work", "technical specifications", "specifications"],
    ),
    (
        SectionType::BidForm,
        &["bid form", "pricing form", "price proposal form", "bid schedule", "cost proposal"],
    ),
    (
        SectionType::Terms,
        &["terms and conditions", "general conditions", "special conditions", "contract terms"],
    ),
    (
        SectionType::Insurance,
        &["insurance requirements", "certificate of insurance", "insurance"],
    ),
    (
        SectionType::Certification,
        &["certification", "affidavit", "non-collusion", "debarment"],
    ),
    (SectionType::Attachments, &["attachment", "exhibit", "appendix"]),
];

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("file is {size} bytes, limit is {max}")]
    FileTooLarge { size: u64, max: u64 },

    #[error("document has {pages} pages, limit is {max}")]
    PageLimitExceeded { pages: u32, max: u32 },

    #[error("document could not be parsed: {0}")]
    CorruptDocument(String),

    #[error("text extraction failed: {0}")]
    TextExtractionFailed(String),

    #[error("section output failed: {0}")]
    SectionWrite(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub max_file_bytes: u64,
    pub max_pages: u32,
}

#[derive(Debug, Clone)]
pub struct PdfAnalyzer {
    config: AnalyzerConfig,
}

impl PdfAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Load a PDF and read its metadata, enforcing size and page ceilings.
    pub fn load(&self, path: &Path) -> Result<Document, AnalyzerError> {
        self.open(path).map(|(_, document)| document)
    }

    fn open(&self, path: &Path) -> Result<(lopdf::Document, Document), AnalyzerError> {
        let byte_size = std::fs::metadata(path)?.len();
        if byte_size > self.config.max_file_bytes {
            return Err(AnalyzerError::FileTooLarge {
                size: byte_size,
                max: self.config.max_file_bytes,
            });
        }

        let pdf = lopdf::Document::load(path).map_err(|e| AnalyzerError::CorruptDocument(e.to_string()))?;

        // Encrypted files are read as-is; most solicitations only restrict editing
        if pdf.trailer.has(b"Encrypt") {
            debug!(path = %path.display(), "Document is encrypted, continuing");
        }

        let page_count = pdf.get_pages().len() as u32;
        if page_count > self.config.max_pages {
            return Err(AnalyzerError::PageLimitExceeded {
                pages: page_count,
                max: self.config.max_pages,
            });
        }

        let document = Document {
            id: Uuid::new_v4(),
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            byte_size,
            page_count,
            metadata: read_metadata(&pdf),
            loaded_at: Utc::now(),
        };

        Ok((pdf, document))
    }

    /// Extract the full text of a PDF. Empty text is a valid result.
    pub fn extract_text(&self, path: &Path) -> Result<TextExtraction, AnalyzerError> {
        let pdf = lopdf::Document::load(path).map_err(|e| AnalyzerError::TextExtractionFailed(e.to_string()))?;
        text_of(&pdf)
    }

    /// Score each solicitation type by keyword evidence in the title and the
    /// opening text. No evidence at all yields `Unknown` with confidence 0.
    pub fn classify(&self, text: &str, metadata: &DocumentMetadata) -> Classification {
        let title = metadata.title.as_deref().unwrap_or_default().to_lowercase();
        let head: String = text.chars().take(CLASSIFY_WINDOW).collect::<String>().to_lowercase();

        let mut best: Option<(DocumentType, u32)> = None;
        for (document_type, keywords) in DOCUMENT_TYPE_KEYWORDS {
            let score: u32 = keywords
                .iter()
                .map(|keyword| {
                    let title_score = if title.contains(keyword) { TITLE_HIT } else { 0 };
                    title_score + BODY_HIT * head.matches(keyword).count() as u32
                })
                .sum();

            // Strictly greater: earlier types win ties
            if score > best.map_or(0, |(_, s)| s) {
                best = Some((*document_type, score));
            }
        }

        match best {
            Some((document_type, raw_score)) => Classification {
                document_type,
                confidence: (raw_score * 10 / 5).min(100),
                raw_score,
            },
            None => Classification::unknown(),
        }
    }

    /// Find section boundaries. Always returns at least one section, and the
    /// sections cover pages 1..=page_count without gaps or overlap.
    pub fn identify_sections(&self, text: &str, page_count: u32) -> Vec<Section> {
        let pages = page_count.max(1);
        let total_chars = text.chars().count();
        if total_chars == 0 {
            return vec![complete_document(pages)];
        }

        let chars_per_page = total_chars as f64 / pages as f64;
        let mut consumed = 0usize;
        let mut starts: Vec<(SectionType, String, u32)> = Vec::new();

        for line in text.lines() {
            consumed += line.chars().count() + 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let lower = trimmed.to_lowercase();
            let Some(section_type) = SECTION_KEYWORDS
                .iter()
                .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
                .map(|(section_type, _)| *section_type)
            else {
                continue;
            };

            let page = ((consumed as f64 / chars_per_page).ceil() as u32).clamp(1, pages);

            if let Some((last_type, _, last_page)) = starts.last() {
                // Consecutive duplicates collapse; a page opens at most one section
                if *last_type == section_type || *last_page == page {
                    continue;
                }
            }

            starts.push((section_type, section_title(trimmed), page));
        }

        if starts.is_empty() {
            return vec![complete_document(pages)];
        }

        // Pages before the first marker belong to the first section
        starts[0].2 = 1;

        let mut sections = Vec::with_capacity(starts.len());
        for (i, (section_type, title, start)) in starts.iter().enumerate() {
            let end = starts.get(i + 1).map_or(pages, |(_, _, next)| next - 1);
            sections.push(Section::new(title.clone(), *section_type, *start, end));
        }

        debug!(count = sections.len(), pages = pages, "Sections identified");
        sections
    }

    /// Write each section's page range to its own PDF. A section that fails
    /// keeps `error` set and no output path; the others are still written.
    #[instrument(skip(self, sections), fields(sections = sections.len()))]
    pub fn split_by_sections(&self, path: &Path, sections: Vec<Section>, output_dir: &Path) -> Vec<Section> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());

        match LopdfSectionWriter::open(path) {
            Ok(writer) => split_with(&writer, sections, output_dir, &stem),
            Err(e) => {
                warn!(error = %e, "Source document could not be reopened for splitting");
                let reason = e.to_string();
                sections
                    .into_iter()
                    .map(|mut section| {
                        section.output_path = None;
                        section.error = Some(reason.clone());
                        section
                    })
                    .collect()
            }
        }
    }

    /// Load, extract, classify and segment. Failures are reported in the
    /// result, never raised.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn analyze(&self, path: &Path) -> AnalysisReport {
        let started = Instant::now();

        let outcome = self
            .open(path)
            .and_then(|(pdf, document)| text_of(&pdf).map(|extraction| (document, extraction)));

        match outcome {
            Ok((document, extraction)) => {
                let classification = self.classify(&extraction.text, &document.metadata);
                let sections = self.identify_sections(&extraction.text, extraction.page_count);
                let processing_time_ms = started.elapsed().as_millis() as u64;

                info!(
                    pages = document.page_count,
                    document_type = %classification.document_type,
                    confidence = classification.confidence,
                    sections = sections.len(),
                    processing_time_ms = processing_time_ms,
                    "Document analyzed"
                );

                AnalysisReport {
                    success: true,
                    metadata: document.metadata.clone(),
                    document: Some(document),
                    classification,
                    sections,
                    text_length: extraction.text.chars().count(),
                    processing_time_ms,
                    error: None,
                    text: extraction.text,
                }
            }
            Err(e) => {
                warn!(error = %e, "Document analysis failed");
                AnalysisReport {
                    success: false,
                    document: None,
                    metadata: DocumentMetadata::default(),
                    classification: Classification::unknown(),
                    sections: Vec::new(),
                    text_length: 0,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    error: Some(e.to_string()),
                    text: String::new(),
                }
            }
        }
    }
}

fn complete_document(pages: u32) -> Section {
    Section::new("Complete Document", SectionType::Complete, 1, pages)
}

fn section_title(line: &str) -> String {
    line.chars().take(SECTION_TITLE_MAX_CHARS).collect::<String>().trim_end().to_string()
}

fn text_of(pdf: &lopdf::Document) -> Result<TextExtraction, AnalyzerError> {
    let page_numbers: Vec<u32> = pdf.get_pages().keys().copied().collect();
    let page_count = page_numbers.len() as u32;

    if page_numbers.is_empty() {
        return Ok(TextExtraction {
            text: String::new(),
            page_count,
        });
    }

    match pdf.extract_text(&page_numbers) {
        Ok(text) => Ok(TextExtraction { text, page_count }),
        Err(whole_doc_error) => {
            // Salvage what we can page by page
            let mut text = String::new();
            let mut failed = 0usize;
            for number in &page_numbers {
                match pdf.extract_text(&[*number]) {
                    Ok(page_text) => {
                        if !text.is_empty() && !text.ends_with('\n') {
                            text.push('\n');
                        }
                        text.push_str(&page_text);
                    }
                    Err(_) => failed += 1,
                }
            }

            if failed == page_numbers.len() {
                return Err(AnalyzerError::TextExtractionFailed(whole_doc_error.to_string()));
            }

            warn!(failed_pages = failed, "Text extracted with unreadable pages skipped");
            Ok(TextExtraction { text, page_count })
        }
    }
}

fn read_metadata(pdf: &lopdf::Document) -> DocumentMetadata {
    let Some(info) = info_dictionary(pdf) else {
        return DocumentMetadata::default();
    };

    DocumentMetadata {
        title: text_field(info, b"Title"),
        author: text_field(info, b"Author"),
        creator: text_field(info, b"Creator"),
        producer: text_field(info, b"Producer"),
        creation_date: text_field(info, b"CreationDate"),
        modification_date: text_field(info, b"ModDate"),
    }
}

fn info_dictionary(pdf: &lopdf::Document) -> Option<&lopdf::Dictionary> {
    match pdf.trailer.get(b"Info").ok()? {
        Object::Reference(id) => pdf.get_object(*id).ok()?.as_dict().ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

fn text_field(dict: &lopdf::Dictionary, key: &[u8]) -> Option<String> {
    match dict.get(key).ok()? {
        Object::String(bytes, _) => decode_pdf_string(bytes),
        _ => None,
    }
}

/// UTF-16BE when BOM-prefixed, otherwise PDFDocEncoding read as Latin-1.
fn decode_pdf_string(bytes: &[u8]) -> Option<String> {
    let text = if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    };

    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// ============================================================================
// Section output
// ============================================================================

/// Writes one section's page range to a file.
pub trait SectionWriter {
    fn write_section(&self, section: &Section, output: &Path) -> Result<(), AnalyzerError>;
}

pub struct LopdfSectionWriter {
    source: lopdf::Document,
}

impl LopdfSectionWriter {
    pub fn open(path: &Path) -> Result<Self, AnalyzerError> {
        let source = lopdf::Document::load(path).map_err(|e| AnalyzerError::CorruptDocument(e.to_string()))?;
        Ok(Self { source })
    }
}

impl SectionWriter for LopdfSectionWriter {
    fn write_section(&self, section: &Section, output: &Path) -> Result<(), AnalyzerError> {
        let mut doc = self.source.clone();
        let all_pages: Vec<u32> = doc.get_pages().keys().copied().collect();

        if section.start_page < 1 || section.end_page as usize > all_pages.len() {
            return Err(AnalyzerError::SectionWrite(format!(
                "pages {}-{} outside document of {} pages",
                section.start_page,
                section.end_page,
                all_pages.len()
            )));
        }

        let outside: Vec<u32> = all_pages
            .into_iter()
            .filter(|page| *page < section.start_page || *page > section.end_page)
            .collect();

        doc.delete_pages(&outside);
        doc.prune_objects();
        doc.compress();
        doc.save(output)
            .map_err(|e| AnalyzerError::SectionWrite(format!("{}: {}", output.display(), e)))?;

        Ok(())
    }
}

/// Drive a `SectionWriter` over every section, recording per-section failures.
pub fn split_with<W: SectionWriter>(
    writer: &W,
    sections: Vec<Section>,
    output_dir: &Path,
    stem: &str,
) -> Vec<Section> {
    if let Err(e) = std::fs::create_dir_all(output_dir) {
        let reason = format!("cannot create {}: {}", output_dir.display(), e);
        return sections
            .into_iter()
            .map(|mut section| {
                section.output_path = None;
                section.error = Some(reason.clone());
                section
            })
            .collect();
    }

    let mut written = 0usize;
    let total = sections.len();
    let result: Vec<Section> = sections
        .into_iter()
        .enumerate()
        .map(|(i, mut section)| {
            let output: PathBuf =
                output_dir.join(format!("{}_{:02}_{}.pdf", stem, i + 1, section.section_type));

            match writer.write_section(&section, &output) {
                Ok(()) => {
                    written += 1;
                    section.output_path = Some(output);
                    section.error = None;
                }
                Err(e) => {
                    warn!(
                        section = %section.section_type,
                        start_page = section.start_page,
                        end_page = section.end_page,
                        error = %e,
                        "Section split failed"
                    );
                    section.output_path = None;
                    section.error = Some(e.to_string());
                }
            }
            section
        })
        .collect();

    info!(written = written, total = total, "Sections split");
    result
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Stream};

    fn analyzer() -> PdfAnalyzer {
        PdfAnalyzer::new(AnalyzerConfig {
            max_file_bytes: 10 * 1024 * 1024,
            max_pages: 100,
        })
    }

    /// Build a PDF with one line of text per page and an Info title.
    pub(crate) fn write_pdf(path: &Path, title: &str, page_texts: &[&str]) {
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for text in page_texts {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal(title),
            "Author" => Object::string_literal("Facilities Procurement"),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);
        doc.save(path).unwrap();
    }

    fn metadata_with_title(title: &str) -> DocumentMetadata {
        DocumentMetadata {
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn classifies_rfp_from_title_and_body() {
        let text = "Proposal submission deadline is March 3.\nLate proposal submission will not be accepted.";
        let classification = analyzer().classify(text, &metadata_with_title("Request for Proposal - Generator Maintenance"));

        assert_eq!(classification.document_type, DocumentType::Rfp);
        assert!(classification.confidence > 0);
        // 10 for the title plus 2 per body occurrence
        assert_eq!(classification.raw_score, 14);
        assert_eq!(classification.confidence, 28);
    }

    #[test]
    fn no_keywords_classifies_as_unknown() {
        let classification = analyzer().classify("Annual picnic menu and seating chart", &DocumentMetadata::default());
        assert_eq!(classification, Classification::unknown());
    }

    #[test]
    fn ties_go_to_the_earlier_type() {
        // One body hit each for RFP and RFQ
        let classification = analyzer().classify("rfp / rfq", &DocumentMetadata::default());
        assert_eq!(classification.document_type, DocumentType::Rfp);
        assert_eq!(classification.raw_score, 2);
    }

    #[test]
    fn confidence_caps_at_one_hundred() {
        let text = "request for proposal ".repeat(200);
        let classification = analyzer().classify(&text, &metadata_with_title("RFP"));
        assert_eq!(classification.confidence, 100);
    }

    #[test]
    fn sections_fall_back_to_complete_document() {
        let sections = analyzer().identify_sections("Nothing that looks like a heading here.", 7);

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].section_type, SectionType::Complete);
        assert_eq!((sections[0].start_page, sections[0].end_page), (1, 7));
    }

    #[test]
    fn empty_text_still_yields_one_section() {
        let sections = analyzer().identify_sections("", 3);
        assert_eq!(sections, vec![complete_document(3)]);
    }

    #[test]
    fn sections_cover_every_page_in_order() {
        let filler = "Lorem ipsum dolor sit amet consectetur.\n".repeat(20);
        let text = format!(
            "REQUEST FOR PROPOSAL No. 24-117\n{filler}TABLE OF CONTENTS\n{filler}INSTRUCTIONS TO PROPOSERS\n{filler}\
             SCOPE OF WORK\n{filler}Scope of work continued\n{filler}INSURANCE REQUIREMENTS\n{filler}ATTACHMENT A\n{filler}"
        );
        let sections = analyzer().identify_sections(&text, 12);

        assert!(!sections.is_empty());
        assert_eq!(sections[0].start_page, 1);
        assert_eq!(sections.last().unwrap().end_page, 12);
        for section in &sections {
            assert!(section.start_page <= section.end_page);
            assert_eq!(section.page_count, section.end_page - section.start_page + 1);
        }
        for pair in sections.windows(2) {
            assert_eq!(pair[1].start_page, pair[0].end_page + 1);
            assert_ne!(pair[0].section_type, pair[1].section_type);
        }

        let types: Vec<SectionType> = sections.iter().map(|s| s.section_type).collect();
        assert_eq!(
            types,
            vec![
                SectionType::Cover,
                SectionType::TableOfContents,
                SectionType::Instructions,
                SectionType::Specifications,
                SectionType::Insurance,
                SectionType::Attachments,
            ]
        );
    }

    #[test]
    fn markers_on_the_same_page_keep_the_first() {
        let text = "Request for Proposal\nTable of Contents\nBid Form\n";
        let sections = analyzer().identify_sections(text, 1);

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].section_type, SectionType::Cover);
        assert_eq!((sections[0].start_page, sections[0].end_page), (1, 1));
    }

    #[test]
    fn decodes_utf16_metadata_strings() {
        let bytes = [0xFE, 0xFF, 0x00, b'R', 0x00, b'F', 0x00, b'P'];
        assert_eq!(decode_pdf_string(&bytes).as_deref(), Some("RFP"));
        assert_eq!(decode_pdf_string(b"  ").as_deref(), None);
    }

    #[test]
    fn load_reads_metadata_and_enforces_limits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solicitation.pdf");
        write_pdf(&path, "Request for Proposal - Generator Maintenance", &["one", "two", "three"]);

        let document = analyzer().load(&path).unwrap();
        assert_eq!(document.page_count, 3);
        assert_eq!(document.filename, "solicitation.pdf");
        assert_eq!(
            document.metadata.title.as_deref(),
            Some("Request for Proposal - Generator Maintenance")
        );
        assert_eq!(document.metadata.author.as_deref(), Some("Facilities Procurement"));

        let strict_pages = PdfAnalyzer::new(AnalyzerConfig {
            max_file_bytes: 10 * 1024 * 1024,
            max_pages: 2,
        });
        assert!(matches!(
            strict_pages.load(&path),
            Err(AnalyzerError::PageLimitExceeded { pages: 3, max: 2 })
        ));

        let strict_size = PdfAnalyzer::new(AnalyzerConfig {
            max_file_bytes: 16,
            max_pages: 100,
        });
        assert!(matches!(strict_size.load(&path), Err(AnalyzerError::FileTooLarge { .. })));
    }

    #[test]
    fn garbage_bytes_are_a_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"this is not a pdf at all").unwrap();

        assert!(matches!(analyzer().load(&path), Err(AnalyzerError::CorruptDocument(_))));
        assert!(matches!(
            analyzer().extract_text(&path),
            Err(AnalyzerError::TextExtractionFailed(_))
        ));
    }

    #[test]
    fn analyze_reports_failure_instead_of_raising() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4 truncated").unwrap();

        let report = analyzer().analyze(&path);

        assert!(!report.success);
        assert!(report.error.is_some());
        assert!(report.sections.is_empty());
    }

    #[test]
    fn analyze_composes_the_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rfp.pdf");
        write_pdf(
            &path,
            "Request for Proposal - Generator Maintenance",
            &["Request for Proposal 24-117", "Scope of Work", "Insurance Requirements"],
        );

        let report = analyzer().analyze(&path);

        assert!(report.success, "{:?}", report.error);
        assert_eq!(report.classification.document_type, DocumentType::Rfp);
        assert_eq!(report.document.as_ref().unwrap().page_count, 3);
        assert!(!report.sections.is_empty());
        assert_eq!(report.sections.last().unwrap().end_page, 3);
    }

    #[test]
    fn split_writes_each_page_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rfp.pdf");
        write_pdf(&path, "RFP", &["cover", "scope", "scope continued"]);
        let sections = vec![
            Section::new("Cover", SectionType::Cover, 1, 1),
            Section::new("Scope of Work", SectionType::Specifications, 2, 3),
        ];

        let out = dir.path().join("sections");
        let split = analyzer().split_by_sections(&path, sections, &out);

        assert!(split.iter().all(|s| s.error.is_none()));
        let first = lopdf::Document::load(split[0].output_path.as_ref().unwrap()).unwrap();
        let second = lopdf::Document::load(split[1].output_path.as_ref().unwrap()).unwrap();
        assert_eq!(first.get_pages().len(), 1);
        assert_eq!(second.get_pages().len(), 2);
    }

    struct FailingWriter {
        fail_on: SectionType,
    }

    impl SectionWriter for FailingWriter {
        fn write_section(&self, section: &Section, output: &Path) -> Result<(), AnalyzerError> {
            if section.section_type == self.fail_on {
                return Err(AnalyzerError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "disk refused write",
                )));
            }
            std::fs::write(output, b"%PDF-1.5")?;
            Ok(())
        }
    }

    #[test]
    fn one_failed_section_does_not_abort_the_split() {
        let dir = tempfile::tempdir().unwrap();
        let sections = vec![
            Section::new("Cover", SectionType::Cover, 1, 1),
            Section::new("Terms", SectionType::Terms, 2, 4),
            Section::new("Attachments", SectionType::Attachments, 5, 6),
        ];

        let split = split_with(&FailingWriter { fail_on: SectionType::Terms }, sections, dir.path(), "rfp");

        assert_eq!(split.len(), 3);
        assert!(split[1].output_path.is_none());
        assert!(split[1].error.as_deref().unwrap().contains("disk refused write"));
        for section in [&split[0], &split[2]] {
            assert!(section.error.is_none());
            assert!(section.output_path.as_ref().unwrap().exists());
        }
    }
}
