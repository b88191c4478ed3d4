// Pulls token links out of a rendered listing page.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

use crate::config::SiteConfig;
use crate::models::ItemRef;

/// Markers of an interstitial anti-bot page instead of real content.
const CHALLENGE_MARKERS: [&str; 2] = ["Just a moment", "Cloudflare"];

#[derive(Debug, Default)]
pub struct Extraction {
    /// Unique token links in discovery order, capped.
    pub items: Vec<ItemRef>,
    /// Unique token links before the cap was applied.
    pub unique_links: usize,
    pub challenge_suspected: bool,
}

pub struct LinkExtractor {
    base_url: Url,
    item_path: String,
    id_pattern: Regex,
    max_items: usize,
}

impl LinkExtractor {
    pub fn new(site: &SiteConfig) -> Result<Self> {
        let id_pattern = Regex::new(&format!(r"{}(\d+)", regex::escape(&site.item_path)))
            .with_context(|| format!("invalid item path {:?}", site.item_path))?;

        Ok(Self {
            base_url: site.base_url.clone(),
            item_path: site.item_path.clone(),
            id_pattern,
            max_items: site.max_items,
        })
    }

    pub fn extract(&self, html: &str) -> Extraction {
        let challenge_suspected = looks_like_challenge(html);
        if challenge_suspected {
            warn!("⚠️ Listing looks like a challenge page, trying to parse anyway");
        }

        let anchors = match Selector::parse("a[href]") {
            Ok(selector) => selector,
            Err(e) => {
                error!("❌ Failed to build anchor selector: {:?}", e);
                return Extraction {
                    challenge_suspected,
                    ..Extraction::default()
                };
            }
        };

        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for element in document.select(&anchors) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            if !href.contains(&self.item_path) || !seen.insert(href.to_string()) {
                continue;
            }

            let url = match self.resolve(href) {
                Some(url) => url,
                None => {
                    debug!("Skipping unresolvable link {:?}", href);
                    continue;
                }
            };

            let id = self
                .id_pattern
                .captures(href)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string());

            let text = element
                .text()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            let name = if text.is_empty() { format!("Item {}", id) } else { text };

            items.push(ItemRef { id, name, url });
        }

        let unique_links = items.len();
        items.truncate(self.max_items);

        info!("📊 Found {} token links, keeping {}", unique_links, items.len());

        Extraction {
            items,
            unique_links,
            challenge_suspected,
        }
    }

    fn resolve(&self, href: &str) -> Option<String> {
        if href.starts_with("http://") || href.starts_with("https://") {
            return Some(href.to_string());
        }
        self.base_url.join(href).ok().map(|u| u.to_string())
    }
}

pub fn looks_like_challenge(html: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|marker| html.contains(marker))
}
