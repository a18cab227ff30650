//! Multi-signal mapping of free-text service descriptions onto the taxonomy.
//!
//! Every entry is scored on four signals (keyword, alias, frequency,
//! context). Entries whose required keywords are absent, or whose excluded
//! keywords are present, keep their damped sub-scores for diagnostics but
//! cannot win. Weak best matches fall back to the custom service code.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

use crate::domain::extraction::{ExtractedService, ServiceDetails};
use crate::domain::{
    ConfidenceTiers, MappingAlternative, MappingBatch, MappingReport, ServiceCode, ServiceMapping, SignalScores,
    SkippedService,
};
use crate::pipeline::taxonomy::{self, Phrase, TaxonomyEntry, GENERIC_ANNUAL};

/// Best totals below this degrade to the custom code
pub const MATCH_FLOOR: f64 = 0.3;
/// Custom mappings are reviewed unless at least this confident
pub const CUSTOM_AUTO_ACCEPT: f64 = 0.8;

const WHOLE_WORD_HIT: f64 = 1.5;
const SUBSTRING_HIT: f64 = 1.0;
const REQUIRES_PENALTY: f64 = 0.3;
const EXCLUDES_PENALTY: f64 = 0.5;
const GENERIC_ANNUAL_SCORE: f64 = 0.8;
const CHARACTERISTIC_HIT: f64 = 0.25;
const EQUIPMENT_BONUS: f64 = 0.2;
const MAX_ALTERNATIVES: usize = 3;

#[derive(Debug, Error, PartialEq)]
pub enum MappingError {
    #[error("service description is missing")]
    MissingDescription,

    #[error("mapping referenced undeclared service code {0}")]
    TaxonomyViolation(ServiceCode),
}

/// Score of one taxonomy entry against one description.
#[derive(Debug, Clone)]
pub(crate) struct EntryScore {
    pub entry: &'static TaxonomyEntry,
    pub scores: SignalScores,
    /// Weighted total used for ranking; zero when penalized
    pub total: f64,
    pub confidence: f64,
    pub penalty: Option<&'static str>,
}

impl EntryScore {
    /// Weighted sub-scores over the entry's maximum, ignoring the ranking
    /// zero applied to penalized entries.
    fn signal(&self) -> f64 {
        let w = &self.entry.weights;
        let weighted = self.scores.keyword * w.keyword
            + self.scores.alias * w.alias
            + self.scores.frequency * w.frequency
            + self.scores.context * w.context;
        (weighted / w.sum()).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Default)]
struct Counters {
    mapped: AtomicU64,
    custom: AtomicU64,
    flagged: AtomicU64,
    skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MapperStats {
    pub mapped: u64,
    pub custom: u64,
    pub flagged: u64,
    pub skipped: u64,
}

#[derive(Debug)]
pub struct ServiceMapper {
    review_threshold: f64,
    counters: Counters,
}

impl ServiceMapper {
    pub fn new(review_threshold: f64) -> Self {
        Self {
            review_threshold,
            counters: Counters::default(),
        }
    }

    /// Map one description. Errors only when the description is missing.
    pub fn map_service(
        &self,
        description: &str,
        frequency: Option<&str>,
        details: &ServiceDetails,
    ) -> Result<ServiceMapping, MappingError> {
        if description.trim().is_empty() {
            return Err(MappingError::MissingDescription);
        }

        let text = taxonomy::normalize(description);
        let frequency = taxonomy::normalize(frequency.unwrap_or_default());
        let context = taxonomy::normalize(&format!(
            "{} {} {}",
            description,
            details.notes.as_deref().unwrap_or_default(),
            details.equipment.as_deref().unwrap_or_default()
        ));
        let equipment = details.equipment.as_deref().map(taxonomy::normalize);

        let scored: Vec<EntryScore> = taxonomy::entries()
            .iter()
            .map(|entry| score_entry(entry, &text, &frequency, &context, equipment.as_deref()))
            .collect();

        // Strictly greater: declaration order breaks ties
        let mut best = &scored[0];
        for candidate in &scored[1..] {
            if candidate.total > best.total {
                best = candidate;
            }
        }

        let best_name = best.entry.name;
        let best_total = best.total;

        let (winner, rationale) = if best_total < MATCH_FLOOR {
            let custom = scored
                .iter()
                .find(|s| s.entry.code == ServiceCode::CUSTOM)
                .ok_or(MappingError::TaxonomyViolation(ServiceCode::CUSTOM))?;
            let rationale = format!(
                "No service reached the {:.2} match floor (best: {} at {:.2}); assigned to {}",
                MATCH_FLOOR, best_name, best_total, custom.entry.name
            );
            (custom, rationale)
        } else {
            (best, describe(best))
        };

        if taxonomy::entry(winner.entry.code).is_none() {
            return Err(MappingError::TaxonomyViolation(winner.entry.code));
        }

        let is_custom = winner.entry.code.is_custom();
        let requires_review =
            winner.confidence < self.review_threshold || (is_custom && winner.confidence < CUSTOM_AUTO_ACCEPT);

        // Penalized entries rank after eligible ones but stay visible
        let mut others: Vec<&EntryScore> = scored
            .iter()
            .filter(|s| s.entry.code != winner.entry.code && s.signal() > 0.0)
            .collect();
        others.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| b.signal().total_cmp(&a.signal()))
        });
        let alternatives = others
            .into_iter()
            .take(MAX_ALTERNATIVES)
            .map(|s| MappingAlternative {
                code: s.entry.code,
                name: s.entry.name.to_string(),
                confidence: s.confidence,
                scores: s.scores,
                penalty: s.penalty.map(str::to_string),
            })
            .collect();

        self.counters.mapped.fetch_add(1, Ordering::Relaxed);
        if is_custom {
            self.counters.custom.fetch_add(1, Ordering::Relaxed);
        }
        if requires_review {
            self.counters.flagged.fetch_add(1, Ordering::Relaxed);
        }

        debug!(
            mapped_to = %winner.entry.code,
            confidence = winner.confidence,
            requires_review = requires_review,
            "Service mapped"
        );

        Ok(ServiceMapping {
            original_text: description.to_string(),
            mapped_to: winner.entry.code,
            mapped_name: winner.entry.name.to_string(),
            confidence: winner.confidence,
            scores: winner.scores,
            alternatives,
            requires_review,
            rationale,
        })
    }

    /// Map each service independently and in order. Entries that cannot be
    /// mapped are recorded as skipped next to the successful mappings.
    pub fn map_services(&self, services: &[ExtractedService]) -> MappingBatch {
        let mut batch = MappingBatch::default();

        for (index, service) in services.iter().enumerate() {
            let description = service.description.as_deref().unwrap_or_default();
            match self.map_service(description, service.frequency.as_deref(), &service.details) {
                Ok(mapping) => batch.mappings.push(mapping),
                Err(e) => {
                    self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                    batch.skipped.push(SkippedService {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        batch
    }

    /// Summarize already-computed mappings by confidence tier and code.
    pub fn generate_mapping_report(mappings: &[ServiceMapping]) -> MappingReport {
        let mut by_tier = ConfidenceTiers::default();
        let mut by_code: BTreeMap<ServiceCode, usize> = BTreeMap::new();

        for mapping in mappings {
            if mapping.confidence >= 0.8 {
                by_tier.high += 1;
            } else if mapping.confidence >= 0.5 {
                by_tier.medium += 1;
            } else {
                by_tier.low += 1;
            }
            *by_code.entry(mapping.mapped_to).or_default() += 1;
        }

        let average_confidence = if mappings.is_empty() {
            0.0
        } else {
            mappings.iter().map(|m| m.confidence).sum::<f64>() / mappings.len() as f64
        };

        MappingReport {
            total: mappings.len(),
            requires_review: mappings.iter().filter(|m| m.requires_review).count(),
            average_confidence,
            by_tier,
            by_code,
        }
    }

    pub fn stats(&self) -> MapperStats {
        MapperStats {
            mapped: self.counters.mapped.load(Ordering::Relaxed),
            custom: self.counters.custom.load(Ordering::Relaxed),
            flagged: self.counters.flagged.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn score_entry(
    entry: &'static TaxonomyEntry,
    text: &str,
    frequency: &str,
    context: &str,
    equipment: Option<&str>,
) -> EntryScore {
    let mut scores = SignalScores {
        keyword: phrase_score(&entry.keywords, text),
        alias: phrase_score(&entry.aliases, text),
        frequency: frequency_score(entry, frequency),
        context: context_score(entry, context, equipment),
    };

    let mut penalty = None;
    let mut damping = 1.0;
    if !entry.requires.is_empty() && !entry.requires.iter().any(|p| p.whole_word(text)) {
        damping *= REQUIRES_PENALTY;
        penalty = Some("required keyword absent");
    }
    if entry.excludes.iter().any(|p| p.whole_word(text)) {
        damping *= EXCLUDES_PENALTY;
        penalty = Some("excluded keyword present");
    }

    let total = if penalty.is_some() {
        scores.keyword *= damping;
        scores.alias *= damping;
        scores.frequency *= damping;
        scores.context *= damping;
        0.0
    } else {
        let w = &entry.weights;
        scores.keyword * w.keyword + scores.alias * w.alias + scores.frequency * w.frequency + scores.context * w.context
    };

    EntryScore {
        entry,
        scores,
        total,
        confidence: (total / entry.weights.sum()).clamp(0.0, 1.0),
        penalty,
    }
}

fn phrase_score(phrases: &[Phrase], text: &str) -> f64 {
    if phrases.is_empty() {
        return 0.0;
    }

    let hits: f64 = phrases
        .iter()
        .map(|p| {
            if p.whole_word(text) {
                WHOLE_WORD_HIT
            } else if p.substring(text) {
                SUBSTRING_HIT
            } else {
                0.0
            }
        })
        .sum();

    (hits / phrases.len() as f64).min(1.0)
}

fn frequency_score(entry: &TaxonomyEntry, frequency: &str) -> f64 {
    if frequency.is_empty() {
        return 0.0;
    }
    if entry.frequencies.iter().any(|f| frequency.contains(f.as_str())) {
        1.0
    } else if entry.annual && GENERIC_ANNUAL.iter().any(|f| frequency.contains(f)) {
        GENERIC_ANNUAL_SCORE
    } else {
        0.0
    }
}

fn context_score(entry: &TaxonomyEntry, context: &str, equipment: Option<&str>) -> f64 {
    let matched = entry
        .characteristics
        .iter()
        .filter(|c| context.contains(c.as_str()))
        .count();

    let mut score = matched as f64 * CHARACTERISTIC_HIT;
    if equipment.is_some_and(|hint| overlaps_name(hint, entry.name)) {
        score += EQUIPMENT_BONUS;
    }
    score.min(1.0)
}

/// Any significant word shared between the equipment hint and the entry name.
fn overlaps_name(hint: &str, name: &str) -> bool {
    let name = taxonomy::normalize(name);
    let name_words: Vec<&str> = name.split(' ').collect();
    hint.split(' ')
        .filter(|word| word.len() >= 3)
        .any(|word| name_words.contains(&word))
}

fn describe(score: &EntryScore) -> String {
    format!(
        "Matched {} (keyword {:.2}, alias {:.2}, frequency {:.2}, context {:.2})",
        score.entry.name, score.scores.keyword, score.scores.alias, score.scores.frequency, score.scores.context
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> ServiceMapper {
        ServiceMapper::new(0.75)
    }

    fn service(description: Option<&str>, frequency: Option<&str>) -> ExtractedService {
        ExtractedService {
            description: description.map(str::to_string),
            frequency: frequency.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn annual_oil_change_maps_to_oil_and_filter() {
        let mapping = mapper()
            .map_service("Annual oil change and filter replacement", Some("once/year"), &ServiceDetails::default())
            .unwrap();

        assert_eq!(mapping.mapped_to, ServiceCode::ServiceB);
        assert!(mapping.confidence >= 0.75, "confidence {}", mapping.confidence);
        assert!(!mapping.requires_review);
        assert_eq!(mapping.scores.frequency, 1.0);
    }

    #[test]
    fn quarterly_walk_around_maps_to_inspection() {
        let mapping = mapper()
            .map_service("Quarterly site walk-around inspection", Some("4 times/year"), &ServiceDetails::default())
            .unwrap();

        assert_eq!(mapping.mapped_to, ServiceCode::ServiceA);
    }

    #[test]
    fn vague_work_goes_to_custom_with_review() {
        let mapping = mapper()
            .map_service("Miscellaneous work as directed", None, &ServiceDetails::default())
            .unwrap();

        assert_eq!(mapping.mapped_to, ServiceCode::ServiceK);
        assert!(mapping.requires_review);
    }

    #[test]
    fn weak_matches_fall_below_the_floor() {
        let mapping = mapper()
            .map_service("Repaint the lobby ceiling", None, &ServiceDetails::default())
            .unwrap();

        assert_eq!(mapping.mapped_to, ServiceCode::CUSTOM);
        assert!(mapping.requires_review);
        assert!(mapping.rationale.contains("match floor"));
    }

    #[test]
    fn excluded_keyword_zeroes_the_entry() {
        let oil_filter = taxonomy::entry(ServiceCode::ServiceB).unwrap();
        let text = taxonomy::normalize("Oil sample analysis and oil change");
        let score = score_entry(oil_filter, &text, "annually", &text, None);

        assert_eq!(score.total, 0.0);
        assert!(score.scores.keyword > 0.0);
        assert_eq!(score.penalty, Some("excluded keyword present"));

        let mapping = mapper()
            .map_service("Oil sample analysis and oil change", Some("annually"), &ServiceDetails::default())
            .unwrap();
        assert_eq!(mapping.mapped_to, ServiceCode::ServiceD);
    }

    #[test]
    fn missing_required_keyword_keeps_damped_scores() {
        let load_bank = taxonomy::entry(ServiceCode::ServiceE).unwrap();
        let text = taxonomy::normalize("Annual bank reconciliation test");
        let score = score_entry(load_bank, &text, "annual", &text, None);

        assert_eq!(score.total, 0.0);
        assert_eq!(score.penalty, Some("required keyword absent"));
        assert!(score.scores.frequency > 0.0 && score.scores.frequency < 1.0);
    }

    #[test]
    fn equipment_hint_adds_context() {
        let details = ServiceDetails {
            equipment: Some("Automatic transfer switch".to_string()),
            ..Default::default()
        };
        let mapping = mapper().map_service("Annual ATS maintenance", None, &details).unwrap();

        assert_eq!(mapping.mapped_to, ServiceCode::ServiceI);
        assert!(mapping.scores.context > 0.9);
    }

    #[test]
    fn mapping_is_idempotent() {
        let m = mapper();
        let details = ServiceDetails {
            equipment: Some("500 kW diesel generator".to_string()),
            ..Default::default()
        };
        let first = m.map_service("Diesel engine tune-up", Some("every 3 years"), &details).unwrap();
        let second = m.map_service("Diesel engine tune-up", Some("every 3 years"), &details).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.mapped_to, ServiceCode::ServiceF);
    }

    #[test]
    fn alternatives_are_ranked_and_exclude_the_winner() {
        let mapping = mapper()
            .map_service("Annual load bank test and oil change", Some("annual"), &ServiceDetails::default())
            .unwrap();

        assert!(mapping.alternatives.len() <= 3);
        assert!(mapping.alternatives.iter().all(|a| a.code != mapping.mapped_to));
        for pair in mapping.alternatives.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
    }

    #[test]
    fn penalized_entries_stay_visible_as_alternatives() {
        let mapping = mapper()
            .map_service("Oil sample analysis and oil change", Some("annually"), &ServiceDetails::default())
            .unwrap();

        assert_eq!(mapping.mapped_to, ServiceCode::ServiceD);
        let oil_filter = mapping
            .alternatives
            .iter()
            .find(|a| a.code == ServiceCode::ServiceB)
            .expect("oil & filter listed as an alternative");
        assert_eq!(oil_filter.confidence, 0.0);
        assert!(oil_filter.scores.keyword > 0.0);
        assert_eq!(oil_filter.penalty.as_deref(), Some("excluded keyword present"));

        let json = serde_json::to_value(&mapping).unwrap();
        assert!(json["alternatives"]
            .as_array()
            .unwrap()
            .iter()
            .any(|a| a["penalty"] == "excluded keyword present"));
    }

    #[test]
    fn blank_description_is_rejected() {
        assert_eq!(
            mapper().map_service("   ", Some("annual"), &ServiceDetails::default()),
            Err(MappingError::MissingDescription)
        );
    }

    #[test]
    fn map_services_records_skipped_entries() {
        let m = mapper();
        let batch = m.map_services(&[
            service(Some("Annual oil change and filter replacement"), Some("once/year")),
            service(None, Some("annual")),
            service(Some("Infrared thermal imaging scan of switchgear"), Some("annual")),
        ]);

        assert_eq!(batch.mappings.len(), 2);
        assert_eq!(batch.skipped, vec![SkippedService { index: 1, reason: "service description is missing".into() }]);
        assert_eq!(batch.mappings[0].mapped_to, ServiceCode::ServiceB);

        let stats = m.stats();
        assert_eq!(stats.mapped, 2);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn report_counts_tiers_and_codes() {
        let m = mapper();
        let batch = m.map_services(&[
            service(Some("Annual oil change and filter replacement"), Some("once/year")),
            service(Some("Miscellaneous work as directed"), None),
            service(Some("Repaint the lobby ceiling"), None),
        ]);
        let report = ServiceMapper::generate_mapping_report(&batch.mappings);

        assert_eq!(report.total, 3);
        assert_eq!(report.by_tier.high + report.by_tier.medium + report.by_tier.low, 3);
        assert_eq!(report.by_code.get(&ServiceCode::ServiceB), Some(&1));
        assert_eq!(report.by_code.get(&ServiceCode::ServiceK), Some(&2));
        assert_eq!(report.requires_review, 2);
        assert!(report.average_confidence > 0.0 && report.average_confidence < 1.0);
    }

    #[test]
    fn empty_report_is_zeroed() {
        let report = ServiceMapper::generate_mapping_report(&[]);
        assert_eq!(report.total, 0);
        assert_eq!(report.average_confidence, 0.0);
        assert!(report.by_code.is_empty());
    }
}
