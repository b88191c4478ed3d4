use chrono::{DateTime, Utc};

use crate::models::{FrequencyTable, Item, Report};

/// Aggregate classified items and their tag counts into a report.
///
/// Items without patterns are dropped. Patterns are ranked by count, highest
/// first; equal counts keep the order in which the tags were first detected.
pub fn build_report(items: Vec<Item>, frequency: &FrequencyTable, timestamp: DateTime<Utc>) -> Report {
    let items: Vec<Item> = items
        .into_iter()
        .filter(|item| !item.matched_patterns.is_empty())
        .collect();

    if items.is_empty() || frequency.is_empty() {
        return Report::empty(timestamp);
    }

    let mut ranked_patterns = frequency.entries().to_vec();
    // sort_by is stable
    ranked_patterns.sort_by(|a, b| b.1.cmp(&a.1));

    Report {
        timestamp,
        total_items_with_patterns: items.len(),
        total_pattern_occurrences: frequency.total(),
        ranked_patterns,
        items,
    }
}
