// src/config.rs
// Everything the scanner needs to know about where to look, how patiently to
// render, and how often to run. Only the Telegram token is mandatory.

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use url::Url;

use crate::browser::RenderProfile;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct Config {
    // Telegram
    pub telegram_token: String,
    pub telegram: TelegramConfig,

    // Database (empty url disables the report store)
    pub database_url: Option<String>,

    pub site: SiteConfig,
    pub render: RenderConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Chat that receives the summary of every timer-triggered scan
    pub announce_chat_id: Option<i64>,

    /// Minimum spacing between consecutive outgoing messages
    pub message_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub base_url: Url,
    pub listing_path: String,
    /// Path fragment that marks a token link, followed by the numeric id
    pub item_path: String,
    /// Maximum number of tokens classified per scan
    pub max_items: usize,
}

impl SiteConfig {
    pub fn listing_url(&self) -> Result<Url> {
        self.base_url
            .join(&self.listing_path)
            .with_context(|| format!("invalid listing path {:?}", self.listing_path))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    Chromium,
    Http,
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub kind: RendererKind,
    pub chrome_path: Option<String>,
    pub user_agent: String,
    pub timeout: Duration,
    pub listing_settle: Duration,
    pub scroll_count: u32,
    pub scroll_pause: Duration,
    pub detail_settle: Duration,
}

impl RenderConfig {
    pub fn listing_profile(&self) -> RenderProfile {
        RenderProfile {
            settle: self.listing_settle,
            scrolls: self.scroll_count,
            scroll_pause: self.scroll_pause,
            timeout: self.timeout,
        }
    }

    pub fn detail_profile(&self) -> RenderProfile {
        RenderProfile {
            settle: self.detail_settle,
            scrolls: 0,
            scroll_pause: Duration::ZERO,
            timeout: self.timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub interval: Duration,
    /// Pause between two detail-page fetches
    pub item_pause: Duration,
    /// Consecutive failed scans before the process stops; 0 never stops
    pub max_consecutive_failures: u32,
}

/// Flat shape of the layered settings, one key per tunable.
#[derive(Debug, Deserialize)]
struct Settings {
    base_url: String,
    listing_path: String,
    item_path: String,
    max_items: usize,
    renderer: RendererKind,
    chrome_path: Option<String>,
    user_agent: String,
    render_timeout_secs: u64,
    listing_settle_secs: u64,
    scroll_count: u32,
    scroll_pause_ms: u64,
    detail_settle_ms: u64,
    item_pause_ms: u64,
    scan_interval_secs: u64,
    max_consecutive_failures: u32,
    message_delay_ms: u64,
    announce_chat_id: Option<i64>,
    database_url: String,
}

impl Config {
    /// Defaults, then an optional `scanner.toml`, then `SCANNER_*` variables.
    pub fn load() -> Result<Self> {
        let token = env::var("TELEGRAM_TOKEN").ok();

        let settings = Self::defaults()?
            .add_source(File::with_name("scanner").required(false))
            .add_source(Environment::with_prefix("SCANNER").try_parsing(true))
            .build()
            .context("failed to read scanner settings")?;

        Self::from_settings(token, settings)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        let builder = config::Config::builder()
            .set_default("base_url", "https://catapult.trade")?
            .set_default("listing_path", "/turbo/home?sort=deployed_at_desc")?
            .set_default("item_path", "/turbo/tokens/")?
            .set_default("max_items", 20_i64)?
            .set_default("renderer", "chromium")?
            .set_default("user_agent", DEFAULT_USER_AGENT)?
            .set_default("render_timeout_secs", 60_i64)?
            .set_default("listing_settle_secs", 15_i64)?
            .set_default("scroll_count", 8_i64)?
            .set_default("scroll_pause_ms", 1500_i64)?
            .set_default("detail_settle_ms", 2000_i64)?
            .set_default("item_pause_ms", 500_i64)?
            .set_default("scan_interval_secs", 600_i64)?
            .set_default("max_consecutive_failures", 5_i64)?
            .set_default("message_delay_ms", 250_i64)?
            .set_default("database_url", "sqlite:catapult_scanner.db?mode=rwc")?;

        Ok(builder)
    }

    fn from_settings(token: Option<String>, settings: config::Config) -> Result<Self> {
        let telegram_token = match token {
            Some(token) if !token.trim().is_empty() => token,
            _ => bail!("TELEGRAM_TOKEN environment variable is required"),
        };

        let raw: Settings = settings
            .try_deserialize()
            .context("invalid scanner settings")?;

        let base_url = Url::parse(&raw.base_url)
            .with_context(|| format!("invalid base_url {:?}", raw.base_url))?;

        if raw.max_items == 0 {
            bail!("max_items must be at least 1");
        }
        if raw.scan_interval_secs == 0 {
            bail!("scan_interval_secs must be at least 1");
        }
        if raw.item_path.trim().is_empty() {
            bail!("item_path must not be empty");
        }

        let database_url = Some(raw.database_url.trim().to_string()).filter(|url| !url.is_empty());

        let config = Config {
            telegram_token,
            telegram: TelegramConfig {
                announce_chat_id: raw.announce_chat_id,
                message_delay: Duration::from_millis(raw.message_delay_ms),
            },
            database_url,
            site: SiteConfig {
                base_url,
                listing_path: raw.listing_path,
                item_path: raw.item_path,
                max_items: raw.max_items,
            },
            render: RenderConfig {
                kind: raw.renderer,
                chrome_path: raw.chrome_path.filter(|p| !p.trim().is_empty()),
                user_agent: raw.user_agent,
                timeout: Duration::from_secs(raw.render_timeout_secs),
                listing_settle: Duration::from_secs(raw.listing_settle_secs),
                scroll_count: raw.scroll_count,
                scroll_pause: Duration::from_millis(raw.scroll_pause_ms),
                detail_settle: Duration::from_millis(raw.detail_settle_ms),
            },
            schedule: ScheduleConfig {
                interval: Duration::from_secs(raw.scan_interval_secs),
                item_pause: Duration::from_millis(raw.item_pause_ms),
                max_consecutive_failures: raw.max_consecutive_failures,
            },
        };

        Ok(config)
    }
}
