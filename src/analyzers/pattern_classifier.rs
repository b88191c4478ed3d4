use log::{debug, info};
use regex::{Regex, RegexBuilder};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use scraper::{Html, Selector};

use crate::models::{FrequencyTable, Item, ItemRef, PatternTag};
use crate::utils::truncate_chars;

const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, Copy)]
enum Bound {
    AtLeast(i64),
    Above(i64),
}

/// One row of the pattern table, before compilation.
enum RuleDef {
    /// Case-insensitive regex over the raw page text.
    Text(PatternTag, &'static str),
    /// First number captured by the regex, checked against bands in order.
    Magnitude(&'static str, &'static [(PatternTag, Bound)]),
}

const PATTERN_TABLE: &[RuleDef] = &[
    RuleDef::Text(PatternTag::New, r"\bnew\b|\brecent\b|\blaunch\b"),
    RuleDef::Text(PatternTag::Volume, r"24h|volume|trading"),
    RuleDef::Text(PatternTag::Lock, r"lock|locked|freeze|frozen"),
    RuleDef::Text(PatternTag::Social, r"telegram|twitter|discord|instagram"),
    RuleDef::Text(PatternTag::Holders, r"\d+(?:,\d+)*\s+holders?"),
    RuleDef::Text(PatternTag::Rug, r"\brug\b|\bscam\b|\bhoneypot\b"),
    RuleDef::Text(PatternTag::Dip, r"\bdown\b|\bdip\b|\bcrash\b"),
    RuleDef::Text(PatternTag::Mcap, r"market\s+cap|mcap"),
    // Bands are mutually exclusive: highest threshold first, first hit wins.
    RuleDef::Magnitude(
        r"\+(\d+(?:\.\d+)?)\s*%",
        &[
            (PatternTag::MegaPump, Bound::AtLeast(50)),
            (PatternTag::Pump, Bound::AtLeast(20)),
            (PatternTag::Up, Bound::Above(0)),
        ],
    ),
    RuleDef::Magnitude(
        r"\$(\d[\d,]*(?:\.\d+)?)",
        &[(PatternTag::HighPrice, Bound::Above(1))],
    ),
];

#[derive(Debug, Clone, Copy)]
pub enum Threshold {
    AtLeast(Decimal),
    Above(Decimal),
}

/// A captured number. Values `Decimal` cannot hold without rounding
/// (beyond its range or precision) fall back to `f64`.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Magnitude {
    Exact(Decimal),
    Approx(f64),
}

impl Threshold {
    fn admits(&self, value: Magnitude) -> bool {
        match (self, value) {
            (Threshold::AtLeast(min), Magnitude::Exact(v)) => v >= *min,
            (Threshold::Above(min), Magnitude::Exact(v)) => v > *min,
            (Threshold::AtLeast(min), Magnitude::Approx(v)) => min.to_f64().is_some_and(|m| v >= m),
            (Threshold::Above(min), Magnitude::Approx(v)) => min.to_f64().is_some_and(|m| v > m),
        }
    }
}

impl From<Bound> for Threshold {
    fn from(bound: Bound) -> Self {
        match bound {
            Bound::AtLeast(v) => Threshold::AtLeast(Decimal::from(v)),
            Bound::Above(v) => Threshold::Above(Decimal::from(v)),
        }
    }
}

#[derive(Debug)]
pub enum DetectionRule {
    Matches {
        tag: PatternTag,
        pattern: Regex,
    },
    Magnitude {
        capture: Regex,
        bands: Vec<(PatternTag, Threshold)>,
    },
}

impl DetectionRule {
    fn detect(&self, text: &str) -> Option<PatternTag> {
        match self {
            DetectionRule::Matches { tag, pattern } => pattern.is_match(text).then_some(*tag),
            DetectionRule::Magnitude { capture, bands } => {
                let value = first_number(capture, text)?;
                bands
                    .iter()
                    .find(|(_, threshold)| threshold.admits(value))
                    .map(|(tag, _)| *tag)
            }
        }
    }
}

/// First capture of `capture` in `text`. Thousands separators are dropped;
/// anything that is not a number at all counts as absent.
fn first_number(capture: &Regex, text: &str) -> Option<Magnitude> {
    let raw = capture.captures(text)?.get(1)?.as_str().replace(',', "");
    if let Ok(value) = Decimal::from_str_exact(&raw) {
        return Some(Magnitude::Exact(value));
    }
    match raw.parse::<f64>() {
        Ok(value) => Some(Magnitude::Approx(value)),
        Err(e) => {
            debug!("Ignoring unparseable number {:?}: {}", raw, e);
            None
        }
    }
}

/// Scans detail pages against the pattern table.
pub struct PatternClassifier {
    rules: Vec<DetectionRule>,
}

impl PatternClassifier {
    pub fn new() -> Result<Self, regex::Error> {
        let mut rules = Vec::with_capacity(PATTERN_TABLE.len());

        for def in PATTERN_TABLE {
            let rule = match def {
                RuleDef::Text(tag, pattern) => DetectionRule::Matches {
                    tag: *tag,
                    pattern: RegexBuilder::new(pattern).case_insensitive(true).build()?,
                },
                RuleDef::Magnitude(pattern, bands) => DetectionRule::Magnitude {
                    capture: RegexBuilder::new(pattern).case_insensitive(true).build()?,
                    bands: bands.iter().map(|(tag, bound)| (*tag, Threshold::from(*bound))).collect(),
                },
            };
            rules.push(rule);
        }

        Ok(Self { rules })
    }

    /// Tags matched by `text`, each at most once, in table order.
    pub fn classify(&self, text: &str) -> Vec<PatternTag> {
        let mut tags = Vec::new();
        for rule in &self.rules {
            if let Some(tag) = rule.detect(text) {
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
        }
        tags
    }

    /// Classify one token page and count its tags into `frequency`.
    pub fn classify_item(&self, item: ItemRef, html: &str, frequency: &mut FrequencyTable) -> Item {
        let mut classified = Item::unclassified(item);

        if let Some(title) = page_title(html) {
            classified.name = title;
        }

        classified.matched_patterns = self.classify(html);
        for tag in &classified.matched_patterns {
            frequency.record(*tag);
        }

        if !classified.matched_patterns.is_empty() {
            let preview: Vec<String> = classified
                .matched_patterns
                .iter()
                .take(3)
                .map(PatternTag::label)
                .collect();
            info!("      ✅ #{} {}", classified.id, preview.join(", "));
        }

        classified
    }
}

/// Heading of a detail page: first `<h1>`, else `<title>`.
fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    ["h1", "title"].iter().find_map(|name| {
        let selector = Selector::parse(name).ok()?;
        let element = document.select(&selector).next()?;
        let text = element
            .text()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        (!text.is_empty()).then(|| truncate_chars(&text, TITLE_MAX_CHARS))
    })
}
