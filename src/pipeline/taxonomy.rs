//! Canonical generator-maintenance service taxonomy.
//!
//! Eleven fixed entries, `ServiceA` through `ServiceK`. Phrase lists are kept
//! in normalized form (lowercase, no punctuation other than `/` and `-`) and
//! compiled once into word-boundary patterns.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::ServiceCode;

/// Generic annual phrasing honoured by annual-tagged entries.
pub const GENERIC_ANNUAL: &[&str] = &[
    "annual",
    "annually",
    "yearly",
    "once a year",
    "once per year",
    "once/year",
    "1x/year",
    "every year",
];

const ANNUAL_FREQUENCIES: &[&str] = &["annual", "annually", "once/year", "1x/year", "yearly", "once per year"];

/// Per-signal weights of one taxonomy entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub keyword: f64,
    pub alias: f64,
    pub frequency: f64,
    pub context: f64,
}

impl Weights {
    const fn new(keyword: f64, alias: f64, frequency: f64, context: f64) -> Self {
        Self {
            keyword,
            alias,
            frequency,
            context,
        }
    }

    /// Highest weighted total the entry can reach
    pub fn sum(&self) -> f64 {
        self.keyword + self.alias + self.frequency + self.context
    }
}

/// A phrase with its precompiled whole-word pattern.
#[derive(Debug)]
pub struct Phrase {
    pub text: String,
    word: Regex,
}

impl Phrase {
    fn new(raw: &str) -> Self {
        let text = normalize(raw);
        let word = Regex::new(&format!(r"\b{}\b", regex::escape(&text))).expect("escaped phrase is a valid regex");
        Self { text, word }
    }

    pub fn whole_word(&self, haystack: &str) -> bool {
        self.word.is_match(haystack)
    }

    pub fn substring(&self, haystack: &str) -> bool {
        haystack.contains(&self.text)
    }
}

#[derive(Debug)]
pub struct TaxonomyEntry {
    pub code: ServiceCode,
    pub name: &'static str,
    pub keywords: Vec<Phrase>,
    pub aliases: Vec<Phrase>,
    pub frequencies: Vec<String>,
    pub characteristics: Vec<String>,
    /// At least one must appear as a whole word or the entry cannot win
    pub requires: Vec<Phrase>,
    /// Any whole-word hit disqualifies the entry
    pub excludes: Vec<Phrase>,
    pub weights: Weights,
    /// Honours generic annual phrasing as a partial frequency match
    pub annual: bool,
}

struct EntrySpec {
    code: ServiceCode,
    name: &'static str,
    keywords: &'static [&'static str],
    aliases: &'static [&'static str],
    frequencies: &'static [&'static str],
    characteristics: &'static [&'static str],
    requires: &'static [&'static str],
    excludes: &'static [&'static str],
    weights: Weights,
    annual: bool,
}

impl EntrySpec {
    fn build(&self) -> TaxonomyEntry {
        let phrases = |list: &[&str]| list.iter().map(|p| Phrase::new(p)).collect::<Vec<_>>();
        let plain = |list: &[&str]| list.iter().map(|p| normalize(p)).collect::<Vec<_>>();

        TaxonomyEntry {
            code: self.code,
            name: self.name,
            keywords: phrases(self.keywords),
            aliases: phrases(self.aliases),
            frequencies: plain(self.frequencies),
            characteristics: plain(self.characteristics),
            requires: phrases(self.requires),
            excludes: phrases(self.excludes),
            weights: self.weights,
            annual: self.annual,
        }
    }
}

const ENTRIES: &[EntrySpec] = &[
    EntrySpec {
        code: ServiceCode::ServiceA,
        name: "Comprehensive Inspection",
        keywords: &[
            "inspection",
            "walk-around",
            "walkthrough",
            "visual inspection",
            "comprehensive",
            "preventive maintenance",
            "pm service",
        ],
        aliases: &[
            "comprehensive inspection",
            "site inspection",
            "quarterly inspection",
            "pm inspection",
            "routine inspection",
        ],
        frequencies: &["quarterly", "4 times/year", "4x/year", "four times", "every 3 months"],
        characteristics: &["visual", "walk-around", "check", "site", "inspection", "gauges", "leaks"],
        requires: &[],
        excludes: &[],
        weights: Weights::new(0.35, 0.2, 0.3, 0.15),
        annual: false,
    },
    EntrySpec {
        code: ServiceCode::ServiceB,
        name: "Oil & Filter Service",
        keywords: &["oil", "filter", "oil change"],
        aliases: &["oil change", "oil and filter", "oil filter service", "lube service", "filter change"],
        frequencies: ANNUAL_FREQUENCIES,
        characteristics: &["oil", "filter", "lube", "drain", "replacement", "fluid"],
        requires: &["oil"],
        excludes: &["analysis", "sample", "sampling", "coolant"],
        weights: Weights::new(0.4, 0.2, 0.2, 0.2),
        annual: true,
    },
    EntrySpec {
        code: ServiceCode::ServiceC,
        name: "Coolant Service",
        keywords: &["coolant", "antifreeze", "radiator", "cooling system"],
        aliases: &["coolant flush", "coolant replacement", "cooling system service", "antifreeze service"],
        frequencies: ANNUAL_FREQUENCIES,
        characteristics: &["coolant", "flush", "radiator", "hoses", "belts", "antifreeze"],
        requires: &["coolant", "antifreeze", "radiator", "cooling"],
        excludes: &["analysis", "sample", "sampling"],
        weights: Weights::new(0.4, 0.2, 0.2, 0.2),
        annual: true,
    },
    EntrySpec {
        code: ServiceCode::ServiceD,
        name: "Oil & Fuel Analysis",
        keywords: &["oil analysis", "fuel analysis", "fluid analysis", "sampling", "sample", "laboratory"],
        aliases: &["oil sampling", "fuel sampling", "fluid sampling", "lab analysis", "coolant analysis"],
        frequencies: &["annual", "annually", "semi-annual", "semi-annually", "twice a year", "2x/year"],
        characteristics: &["sample", "lab", "analysis", "report", "contamination", "fuel"],
        requires: &["analysis", "sample", "sampling", "lab", "laboratory"],
        excludes: &[],
        weights: Weights::new(0.4, 0.25, 0.15, 0.2),
        annual: true,
    },
    EntrySpec {
        code: ServiceCode::ServiceE,
        name: "Load Bank Testing",
        keywords: &["load bank", "load test", "load testing", "resistive load"],
        aliases: &["load bank test", "annual load bank", "full load test"],
        frequencies: ANNUAL_FREQUENCIES,
        characteristics: &["load", "bank", "test", "kw", "hours", "resistive"],
        requires: &["load"],
        excludes: &[],
        weights: Weights::new(0.45, 0.2, 0.15, 0.2),
        annual: true,
    },
    EntrySpec {
        code: ServiceCode::ServiceF,
        name: "Engine Tune-Up (Diesel)",
        keywords: &["tune-up", "tune up", "diesel", "injector", "valve adjustment"],
        aliases: &["diesel tune-up", "engine tune-up", "injector service"],
        frequencies: &["every 2 years", "biennial", "every 3 years", "triennial"],
        characteristics: &["diesel", "injector", "valve", "engine", "belts", "hoses"],
        requires: &["tune-up", "tune up", "diesel", "injector", "valve"],
        excludes: &["natural gas", "spark plug", "propane"],
        weights: Weights::new(0.4, 0.25, 0.1, 0.25),
        annual: false,
    },
    EntrySpec {
        code: ServiceCode::ServiceG,
        name: "Gas Engine Tune-Up",
        keywords: &["gas engine", "spark plug", "ignition", "natural gas", "propane", "tune-up"],
        aliases: &["gas tune-up", "spark plug replacement", "ignition service"],
        frequencies: ANNUAL_FREQUENCIES,
        characteristics: &["spark", "ignition", "plug", "gas", "carburetor", "distributor"],
        requires: &["gas", "spark", "ignition", "propane", "lpg"],
        excludes: &["diesel"],
        weights: Weights::new(0.4, 0.25, 0.1, 0.25),
        annual: true,
    },
    EntrySpec {
        code: ServiceCode::ServiceH,
        name: "Generator Electrical Testing",
        keywords: &[
            "electrical testing",
            "insulation resistance",
            "megger",
            "winding",
            "voltage regulator",
            "breaker testing",
        ],
        aliases: &["electrical test", "generator electrical", "insulation test", "megger test"],
        frequencies: &["every 5 years", "every five years", "5 years", "five years"],
        characteristics: &["insulation", "winding", "resistance", "voltage", "breaker", "electrical"],
        requires: &["electrical", "insulation", "megger", "winding", "voltage", "breaker"],
        excludes: &[],
        weights: Weights::new(0.4, 0.2, 0.15, 0.25),
        annual: false,
    },
    EntrySpec {
        code: ServiceCode::ServiceI,
        name: "Transfer Switch Service",
        keywords: &["transfer switch", "ats", "automatic transfer", "switchgear"],
        aliases: &["ats service", "ats maintenance", "transfer switch inspection", "transfer switch maintenance"],
        frequencies: ANNUAL_FREQUENCIES,
        characteristics: &["transfer", "switch", "contacts", "ats", "exercise", "switchgear"],
        requires: &["transfer", "ats", "switchgear"],
        excludes: &[],
        weights: Weights::new(0.4, 0.25, 0.1, 0.25),
        annual: true,
    },
    EntrySpec {
        code: ServiceCode::ServiceJ,
        name: "Thermal Imaging Scan",
        keywords: &["thermal imaging", "infrared", "thermography", "thermal scan", "ir scan"],
        aliases: &["infrared scan", "thermographic survey", "thermal survey"],
        frequencies: ANNUAL_FREQUENCIES,
        characteristics: &["thermal", "infrared", "hot spot", "scan", "camera", "connections"],
        requires: &["thermal", "infrared", "thermograph", "thermographic", "thermography", "ir"],
        excludes: &[],
        weights: Weights::new(0.45, 0.2, 0.1, 0.25),
        annual: true,
    },
    EntrySpec {
        code: ServiceCode::ServiceK,
        name: "Custom Service",
        keywords: &[
            "custom",
            "miscellaneous",
            "as directed",
            "additional work",
            "other",
            "special",
            "time and materials",
        ],
        aliases: &["custom service", "misc work", "repairs as needed", "emergency service"],
        frequencies: &[],
        characteristics: &["repair", "emergency", "directed", "misc", "non-routine"],
        requires: &[],
        excludes: &[],
        weights: Weights::new(0.5, 0.2, 0.1, 0.2),
        annual: false,
    },
];

static TAXONOMY: Lazy<Vec<TaxonomyEntry>> = Lazy::new(|| ENTRIES.iter().map(EntrySpec::build).collect());

/// All entries in declaration order.
pub fn entries() -> &'static [TaxonomyEntry] {
    &TAXONOMY
}

pub fn entry(code: ServiceCode) -> Option<&'static TaxonomyEntry> {
    TAXONOMY.iter().find(|e| e.code == code)
}

/// Lowercase, replace punctuation other than `/` and `-` with spaces and
/// collapse whitespace.
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '/' || c == '-' {
                c
            } else {
                ' '
            }
        })
        .collect();

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn taxonomy_declares_every_code_once() {
        let codes: HashSet<ServiceCode> = entries().iter().map(|e| e.code).collect();
        assert_eq!(entries().len(), 11);
        assert_eq!(codes.len(), 11);
        assert!(entry(ServiceCode::CUSTOM).is_some());
    }

    #[test]
    fn weights_are_positive() {
        for entry in entries() {
            assert!(entry.weights.sum() > 0.0, "{}", entry.name);
        }
    }

    #[test]
    fn normalize_keeps_slashes_and_hyphens() {
        assert_eq!(normalize("  Oil & Filter,  once/year (walk-around)! "), "oil filter once/year walk-around");
    }

    #[test]
    fn phrases_distinguish_whole_words() {
        let phrase = Phrase::new("oil");
        assert!(phrase.whole_word("annual oil change"));
        assert!(!phrase.whole_word("boiler service"));
        assert!(phrase.substring("boiler service"));
    }
}
