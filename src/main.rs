// src/main.rs
use anyhow::Result;
use log::{error, info};
use std::sync::Arc;

mod analyzers;
mod browser;
mod config;
mod database;
mod error;
mod models;
mod scanners;
mod telegram;
mod utils;

use config::Config;
use database::Database;
use scanners::{CatapultScanner, ScanService};
use telegram::TelegramBot;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("🚀 Starting Catapult Scanner");

    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };
    info!("✅ Configuration loaded");

    // Initialize report store
    let store = match &config.database_url {
        Some(url) => {
            let db = Database::new(url).await?;
            db.migrate().await?;
            info!("✅ Database initialized");
            Some(db)
        }
        None => {
            info!("Database disabled, reports are kept in memory only");
            None
        }
    };

    let renderer = browser::build_renderer(&config.render)?;
    info!("✅ Renderer ready: {}", renderer.name());

    let scanner = ScanService::new(
        CatapultScanner::new(&config, renderer)?,
        store,
        &config.schedule,
    );
    scanner.restore_latest().await;

    // Initialize Telegram bot
    let telegram = TelegramBot::new(&config.telegram_token).await?;
    info!("✅ Telegram bot initialized");

    // Create shared state
    let app_state = Arc::new(AppState {
        config,
        scanner,
        telegram,
    });

    info!("🔥 All services started! Bot is now running...");

    tokio::select! {
        result = app_state.scanner.start_scanning() => {
            if let Err(e) = result {
                error!("🛑 Scanner stopped: {}", e);
                std::process::exit(1);
            }
        }
        result = start_telegram_bot(app_state.clone()) => {
            if let Err(e) = result {
                error!("❌ Telegram bot error: {:#}", e);
                std::process::exit(1);
            }
            info!("👋 Telegram bot stopped, shutting down");
        }
    }

    Ok(())
}

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub scanner: ScanService,
    pub telegram: TelegramBot,
}

async fn start_telegram_bot(state: Arc<AppState>) -> Result<()> {
    let telegram = state.telegram.clone();
    telegram.start(state).await
}
