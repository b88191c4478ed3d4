// The scan pipeline:
// render the listing -> pick out token links -> render each token page ->
// match the pattern table -> fold everything into one report.
// Nothing in here fails a whole scan; problems degrade to an empty report
// and are recorded in the outcome.

use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use super::extractor::LinkExtractor;
use crate::analyzers::{build_report, PatternClassifier};
use crate::browser::{PageRenderer, RenderProfile};
use crate::config::Config;
use crate::models::{FrequencyTable, Item, ItemRef, Report, ScanOutcome, ScanRecord, ScanTrigger};

pub struct CatapultScanner {
    renderer: Arc<dyn PageRenderer>,
    extractor: LinkExtractor,
    classifier: PatternClassifier,
    listing_url: String,
    listing_profile: RenderProfile,
    detail_profile: RenderProfile,
    item_pause: Duration,
}

impl CatapultScanner {
    pub fn new(config: &Config, renderer: Arc<dyn PageRenderer>) -> Result<Self> {
        Ok(Self {
            renderer,
            extractor: LinkExtractor::new(&config.site)?,
            classifier: PatternClassifier::new()?,
            listing_url: config.site.listing_url()?.to_string(),
            listing_profile: config.render.listing_profile(),
            detail_profile: config.render.detail_profile(),
            item_pause: config.schedule.item_pause,
        })
    }

    pub async fn scan(&self, trigger: ScanTrigger) -> ScanRecord {
        let started = Instant::now();
        info!("{}", "=".repeat(70));
        info!(
            "🔄 SCANNING CATAPULT ({}) via {} - {}",
            trigger.as_str(),
            self.renderer.name(),
            Utc::now().format("%H:%M:%S")
        );
        info!("{}", "=".repeat(70));

        let html = match self.renderer.render(&self.listing_url, &self.listing_profile).await {
            Ok(html) => html,
            Err(e) => {
                error!("❌ Failed to load listing: {}", e);
                let outcome = ScanOutcome::FetchFailed { reason: e.to_string() };
                return finish(trigger, started, Report::empty(Utc::now()), outcome, 0, 0);
            }
        };
        info!("✅ Listing loaded ({} bytes)", html.len());

        let extraction = self.extractor.extract(&html);
        if extraction.items.is_empty() {
            let outcome = if extraction.challenge_suspected {
                warn!("🛡️ Challenge page detected, no tokens extracted");
                ScanOutcome::ChallengePage
            } else {
                warn!("⚠️ No tokens found");
                ScanOutcome::NoItems
            };
            return finish(trigger, started, Report::empty(Utc::now()), outcome, 0, 0);
        }

        let discovered = extraction.items.len();
        if extraction.unique_links > discovered {
            info!("📊 Analyzing {} of {} tokens...", discovered, extraction.unique_links);
        } else {
            info!("📊 Analyzing {} tokens...", discovered);
        }

        let (items, frequency, failed_items) = self.classify_items(extraction.items).await;
        let report = build_report(items, &frequency, Utc::now());

        info!("{}", "=".repeat(70));
        info!("✅ Patterns: {}", report.total_pattern_occurrences);
        info!("📊 Tokens: {}", report.total_items_with_patterns);
        info!("{}", "=".repeat(70));

        finish(trigger, started, report, ScanOutcome::Completed, discovered, failed_items)
    }

    /// Visit token pages one at a time, in discovery order.
    async fn classify_items(&self, candidates: Vec<ItemRef>) -> (Vec<Item>, FrequencyTable, usize) {
        let mut frequency = FrequencyTable::new();
        let mut items = Vec::with_capacity(candidates.len());
        let mut failed = 0;

        for (idx, candidate) in candidates.into_iter().enumerate() {
            if idx > 0 && !self.item_pause.is_zero() {
                sleep(self.item_pause).await;
            }

            info!("   🔗 Token #{}", candidate.id);
            match self.renderer.render(&candidate.url, &self.detail_profile).await {
                Ok(html) => items.push(self.classifier.classify_item(candidate, &html, &mut frequency)),
                Err(e) => {
                    warn!("      ⚠️ Token #{} skipped: {}", candidate.id, e);
                    failed += 1;
                    items.push(Item::unclassified(candidate));
                }
            }
        }

        debug!("Classified {} tokens, {} failed", items.len(), failed);
        (items, frequency, failed)
    }
}

fn finish(
    trigger: ScanTrigger,
    started: Instant,
    report: Report,
    outcome: ScanOutcome,
    discovered: usize,
    failed_items: usize,
) -> ScanRecord {
    ScanRecord {
        report,
        trigger,
        outcome,
        discovered,
        failed_items,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}
