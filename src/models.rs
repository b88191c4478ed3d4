// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification labels attached to a token when its page matches a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternTag {
    New,
    Volume,
    Lock,
    Social,
    Holders,
    Rug,
    Dip,
    Mcap,
    Pump,
    MegaPump,
    Up,
    HighPrice,
}

impl PatternTag {
    pub const ALL: [PatternTag; 12] = [
        PatternTag::New,
        PatternTag::Volume,
        PatternTag::Lock,
        PatternTag::Social,
        PatternTag::Holders,
        PatternTag::Rug,
        PatternTag::Dip,
        PatternTag::Mcap,
        PatternTag::Pump,
        PatternTag::MegaPump,
        PatternTag::Up,
        PatternTag::HighPrice,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PatternTag::New => "NEW",
            PatternTag::Volume => "VOLUME",
            PatternTag::Lock => "LOCK",
            PatternTag::Social => "SOCIAL",
            PatternTag::Holders => "HOLDERS",
            PatternTag::Rug => "RUG",
            PatternTag::Dip => "DIP",
            PatternTag::Mcap => "MCAP",
            PatternTag::Pump => "PUMP",
            PatternTag::MegaPump => "MEGA_PUMP",
            PatternTag::Up => "UP",
            PatternTag::HighPrice => "HIGH_PRICE",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            PatternTag::New => "⏰",
            PatternTag::Volume => "📈",
            PatternTag::Lock => "🔒",
            PatternTag::Social => "📱",
            PatternTag::Holders => "👥",
            PatternTag::Rug => "🚨",
            PatternTag::Dip => "📉",
            PatternTag::Mcap => "💰",
            PatternTag::Pump => "🚀",
            PatternTag::MegaPump => "🚀",
            PatternTag::Up => "⬆️",
            PatternTag::HighPrice => "💵",
        }
    }

    /// Human-facing label, e.g. `🚀 MEGA_PUMP`.
    pub fn label(&self) -> String {
        format!("{} {}", self.emoji(), self.name())
    }
}

impl fmt::Display for PatternTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A token link discovered on the listing page, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRef {
    pub id: String,
    pub name: String,
    pub url: String,
}

/// A classified token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub url: String,
    pub matched_patterns: Vec<PatternTag>,
}

impl Item {
    pub fn unclassified(item: ItemRef) -> Self {
        Self {
            id: item.id,
            name: item.name,
            url: item.url,
            matched_patterns: Vec::new(),
        }
    }
}

/// Per-scan count of items exhibiting each tag, kept in first-detection order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrequencyTable {
    entries: Vec<(PatternTag, usize)>,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, tag: PatternTag) {
        match self.entries.iter_mut().find(|(t, _)| *t == tag) {
            Some((_, count)) => *count += 1,
            None => self.entries.push((tag, 1)),
        }
    }

    #[cfg(test)]
    pub fn count(&self, tag: PatternTag) -> usize {
        self.entries
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.entries.iter().map(|(_, count)| count).sum()
    }

    pub fn entries(&self) -> &[(PatternTag, usize)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Aggregated output of one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub timestamp: DateTime<Utc>,
    pub total_items_with_patterns: usize,
    pub total_pattern_occurrences: usize,
    pub ranked_patterns: Vec<(PatternTag, usize)>,
    pub items: Vec<Item>,
}

impl Report {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            total_items_with_patterns: 0,
            total_pattern_occurrences: 0,
            ranked_patterns: Vec::new(),
            items: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanTrigger {
    Timer,
    OnDemand,
    /// Loaded from the report store at startup.
    Restored,
}

impl ScanTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanTrigger::Timer => "timer",
            ScanTrigger::OnDemand => "on_demand",
            ScanTrigger::Restored => "restored",
        }
    }
}

/// How a scan ended. Every variant other than `Completed` carries an empty report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanOutcome {
    Completed,
    NoItems,
    ChallengePage,
    FetchFailed { reason: String },
}

impl ScanOutcome {
    /// Outcomes that count toward the consecutive-failure limit.
    pub fn is_failure(&self) -> bool {
        matches!(self, ScanOutcome::ChallengePage | ScanOutcome::FetchFailed { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanOutcome::Completed => "completed",
            ScanOutcome::NoItems => "no_items",
            ScanOutcome::ChallengePage => "challenge_page",
            ScanOutcome::FetchFailed { .. } => "fetch_failed",
        }
    }
}

/// A report together with the bookkeeping of the scan that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub report: Report,
    pub trigger: ScanTrigger,
    pub outcome: ScanOutcome,
    /// Candidates forwarded to classification, with or without matches.
    pub discovered: usize,
    pub failed_items: usize,
    pub duration_ms: u64,
}
