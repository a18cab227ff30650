//! Document intake pipeline.
//!
//! analyzer → orchestrator → mapper, driven per job by `driver`.

pub mod driver;
pub mod orchestrator;
pub mod pdf_analyzer;
pub mod prompt;
pub mod service_mapper;
pub mod taxonomy;

pub use driver::{Pipeline, PipelineConfig};
pub use orchestrator::{ExtractionOrchestrator, OrchestratorConfig};
pub use pdf_analyzer::{AnalyzerConfig, PdfAnalyzer};
pub use service_mapper::ServiceMapper;
