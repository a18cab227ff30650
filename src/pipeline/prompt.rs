//! Extraction prompt construction.
//!
//! The schema instruction and the worked example are static and marked
//! cacheable; only the user message changes between documents. The whole
//! document goes into one request, and anything past the model's input limit
//! is cut off by the completion service.

use crate::domain::DocumentType;
use crate::services::completion::PromptBlock;

const SYSTEM_INSTRUCTION: &str = r#"You extract structured data from public-sector solicitation documents (RFP, RFQ, IFB, RFI, SOW) for generator maintenance services.

Respond with a single JSON object and nothing else. Use exactly these top-level keys:

{
  "contactInfo": {"name": string|null, "title": string|null, "organization": string|null, "email": string|null, "phone": string|null, "address": string|null},
  "projectDetails": {"title": string|null, "solicitationNumber": string|null, "issuingAgency": string|null, "location": string|null, "description": string|null, "siteCount": string|null, "equipmentSummary": string|null},
  "schedule": {"issueDate": string|null, "questionsDeadline": string|null, "preBidMeeting": string|null, "proposalDueDate": string|null, "contractStartDate": string|null, "contractTerm": string|null},
  "services": [{"description": string, "frequency": string|null, "details": {"equipment": string|null, "quantity": string|null, "location": string|null, "notes": string|null}, "rawText": string|null}],
  "stipulations": [{"category": string|null, "requirement": string, "mandatory": boolean|null, "sourceText": string|null}],
  "paymentTerms": {"terms": string|null, "invoicingFrequency": string|null, "netDays": string|null, "retainage": string|null},
  "bondRequirements": {"bidBond": string|null, "performanceBond": string|null, "paymentBond": string|null},
  "requiredDocuments": [string],
  "insuranceRequirements": {"generalLiability": string|null, "autoLiability": string|null, "workersCompensation": string|null, "umbrella": string|null, "additionalInsured": boolean|null},
  "qualityReport": {"ambiguities": [string]}
}

Rules:
- Use null for anything the document does not state. Never guess or invent values.
- Copy dates, amounts and identifiers exactly as written.
- List every distinct maintenance service as its own entry in "services". Put the sentence it came from in "rawText".
- "frequency" is the service interval as written (for example "annual", "quarterly", "once/year").
- "stipulations" are contractual conditions a bidder must meet: licensing, prevailing wage, response times, site access, safety.
- "requiredDocuments" lists forms and attachments that must be submitted with the bid.
- Record conflicting or unclear statements in "qualityReport.ambiguities".
- Every key above must be present, even when its value is null or an empty list."#;

const FEW_SHOT_EXAMPLE: &str = r#"Example.

Document excerpt:
"INVITATION FOR BID No. 2024-061. Facilities Division, County of Alder. Questions to J. Ruiz, Buyer II, jruiz@alder.gov, by May 3. Bids due May 20, 2:00 PM. Contractor shall perform annual oil and filter change and quarterly inspections on four (4) standby diesel generators. A 5% bid bond is required. Submit Form B-1 Bid Sheet and a W-9. Payment Net 30."

Output:
{"contactInfo":{"name":"J. Ruiz","title":"Buyer II","organization":"County of Alder","email":"jruiz@alder.gov","phone":null,"address":null},"projectDetails":{"title":null,"solicitationNumber":"2024-061","issuingAgency":"Facilities Division, County of Alder","location":null,"description":"Maintenance of standby diesel generators","siteCount":null,"equipmentSummary":"4 standby diesel generators"},"schedule":{"issueDate":null,"questionsDeadline":"May 3","preBidMeeting":null,"proposalDueDate":"May 20, 2:00 PM","contractStartDate":null,"contractTerm":null},"services":[{"description":"Oil and filter change","frequency":"annual","details":{"equipment":"standby diesel generator","quantity":"4","location":null,"notes":null},"rawText":"annual oil and filter change"},{"description":"Inspection","frequency":"quarterly","details":{"equipment":"standby diesel generator","quantity":"4","location":null,"notes":null},"rawText":"quarterly inspections on four (4) standby diesel generators"}],"stipulations":[],"paymentTerms":{"terms":"Net 30","invoicingFrequency":null,"netDays":"30","retainage":null},"bondRequirements":{"bidBond":"5%","performanceBond":null,"paymentBond":null},"requiredDocuments":["Form B-1 Bid Sheet","W-9"],"insuranceRequirements":{"generalLiability":null,"autoLiability":null,"workersCompensation":null,"umbrella":null,"additionalInsured":null},"qualityReport":{"ambiguities":[]}}"#;

/// What the orchestrator knows about the document besides its text
#[derive(Debug, Clone, Default)]
pub struct DocumentContext {
    pub filename: Option<String>,
    pub page_count: Option<u32>,
    pub document_type: Option<DocumentType>,
}

/// Static, cacheable system blocks
pub fn system_blocks() -> Vec<PromptBlock> {
    vec![
        PromptBlock {
            text: SYSTEM_INSTRUCTION.to_string(),
            cacheable: true,
        },
        PromptBlock {
            text: FEW_SHOT_EXAMPLE.to_string(),
            cacheable: true,
        },
    ]
}

pub fn user_message(text: &str, context: &DocumentContext) -> String {
    let mut message = String::with_capacity(text.len() + 256);

    message.push_str("Extract the solicitation data from the document below.\n\n");
    if let Some(filename) = &context.filename {
        message.push_str(&format!("Filename: {}\n", filename));
    }
    if let Some(pages) = context.page_count {
        message.push_str(&format!("Pages: {}\n", pages));
    }
    if let Some(document_type) = context.document_type.filter(|t| *t != DocumentType::Unknown) {
        message.push_str(&format!("Detected type: {}\n", document_type));
    }

    message.push_str("\n<document>\n");
    message.push_str(text);
    message.push_str("\n</document>");
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::extraction::REQUIRED_KEYS;

    #[test]
    fn system_prompt_names_every_required_key() {
        let blocks = system_blocks();
        assert!(blocks.iter().all(|b| b.cacheable));
        for key in REQUIRED_KEYS {
            assert!(blocks[0].text.contains(&format!("\"{}\"", key)), "missing {}", key);
        }
    }

    #[test]
    fn worked_example_is_valid_json() {
        let json_start = FEW_SHOT_EXAMPLE.find("Output:\n").unwrap() + "Output:\n".len();
        let value: serde_json::Value = serde_json::from_str(&FEW_SHOT_EXAMPLE[json_start..]).unwrap();
        for key in REQUIRED_KEYS {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
    }

    #[test]
    fn user_message_carries_context_and_full_text() {
        let context = DocumentContext {
            filename: Some("alder-ifb.pdf".into()),
            page_count: Some(14),
            document_type: Some(DocumentType::Ifb),
        };
        let text = "word ".repeat(50_000);
        let message = user_message(&text, &context);

        assert!(message.contains("Filename: alder-ifb.pdf"));
        assert!(message.contains("Pages: 14"));
        assert!(message.contains("Detected type: IFB"));
        assert!(message.contains(&text));
    }

    #[test]
    fn unknown_type_is_not_announced() {
        let context = DocumentContext {
            document_type: Some(DocumentType::Unknown),
            ..Default::default()
        };
        assert!(!user_message("text", &context).contains("Detected type"));
    }
}
