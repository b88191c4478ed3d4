// src/telegram.rs
use anyhow::Result;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use teloxide::{
    prelude::*,
    types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode},
    utils::command::BotCommands,
    utils::markdown::{bold, code_inline, escape},
    Bot,
};
use url::Url;

use crate::database::ScanSummary;
use crate::error::ScanError;
use crate::models::{Item, Report, ScanRecord, ScanTrigger};
use crate::scanners::{ScanState, ScanStatus};
use crate::utils::{format_duration, frequency_bar};
use crate::AppState;

const SHOW_ALL_ITEMS: &str = "show_all_items";
const SUMMARY_TOP_PATTERNS: usize = 5;
const REPORT_TOP_PATTERNS: usize = 10;
const BAR_WIDTH: usize = 15;
const HISTORY_LIMIT: i64 = 5;

#[derive(Clone)]
pub struct TelegramBot {
    bot: Bot,
}

/// Spaces outgoing messages so bursts stay under Telegram's flood limits.
pub struct MessagePacer {
    limiter: Option<DefaultDirectRateLimiter>,
}

impl MessagePacer {
    pub fn new(delay: Duration) -> Self {
        Self {
            limiter: Quota::with_period(delay).map(RateLimiter::direct),
        }
    }

    pub async fn wait(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

impl TelegramBot {
    pub async fn new(token: &str) -> Result<Self> {
        let bot = Bot::new(token);

        // Test the bot connection
        match bot.get_me().await {
            Ok(me) => {
                info!("✅ Telegram bot connected: @{}", me.username());
            }
            Err(e) => {
                error!("❌ Failed to connect to Telegram: {}", e);
                return Err(anyhow::anyhow!("Telegram connection failed: {}", e));
            }
        }

        Ok(Self { bot })
    }

    pub async fn start(&self, state: Arc<AppState>) -> Result<()> {
        info!("🤖 Starting Telegram bot service...");

        let pacer = Arc::new(MessagePacer::new(state.config.telegram.message_delay));

        if let Err(e) = self.bot.set_my_commands(Command::bot_commands()).await {
            warn!("Failed to register bot commands: {}", e);
        }

        if let Some(chat_id) = state.config.telegram.announce_chat_id.map(ChatId) {
            self.send_startup_message(chat_id, &state).await?;

            let state_for_announcements = state.clone();
            let bot_for_announcements = self.bot.clone();
            let pacer_for_announcements = pacer.clone();
            tokio::spawn(async move {
                announce_timer_scans(
                    bot_for_announcements,
                    chat_id,
                    state_for_announcements,
                    pacer_for_announcements,
                )
                .await;
            });
        }

        let handler = dptree::entry()
            .branch(
                Update::filter_message()
                    .filter_command::<Command>()
                    .endpoint(answer_command),
            )
            .branch(Update::filter_message().endpoint(answer_unknown))
            .branch(Update::filter_callback_query().endpoint(answer_callback));

        Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![state, pacer])
            .default_handler(|upd| async move {
                log::debug!("Unhandled update: {:?}", upd);
            })
            .error_handler(LoggingErrorHandler::with_custom_text(
                "An error has occurred in the dispatcher",
            ))
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        Ok(())
    }

    async fn send_startup_message(&self, chat_id: ChatId, state: &AppState) -> Result<()> {
        let message = format!(
            "🚀 {}\n\n{}\n{}\n\nUse /help for commands",
            bold(&escape("Catapult Scanner started!")),
            escape(&format!(
                "🔍 Scanning every {}s",
                state.config.schedule.interval.as_secs()
            )),
            escape(&format!("🌐 {}", state.config.site.base_url)),
        );

        self.bot
            .send_message(chat_id, message)
            .parse_mode(ParseMode::MarkdownV2)
            .await?;

        Ok(())
    }
}

/// Push the summary of every timer scan to the announcement chat.
async fn announce_timer_scans(bot: Bot, chat_id: ChatId, state: Arc<AppState>, pacer: Arc<MessagePacer>) {
    info!("📡 Announcing timer scans to {}", chat_id);
    let mut updates = state.scanner.subscribe();

    while updates.changed().await.is_ok() {
        let latest = updates.borrow_and_update().clone();
        let Some(record) = latest else {
            continue;
        };
        if record.trigger != ScanTrigger::Timer {
            continue;
        }

        pacer.wait().await;
        if let Err(e) = send_summary(&bot, chat_id, &record).await {
            error!("Failed to announce scan: {}", e);
        }
    }
}

async fn send_summary(bot: &Bot, chat_id: ChatId, record: &ScanRecord) -> ResponseResult<()> {
    let mut request = bot
        .send_message(chat_id, format_summary(&record.report))
        .parse_mode(ParseMode::MarkdownV2);
    if !record.report.is_empty() {
        request = request.reply_markup(items_keyboard(&record.report));
    }
    request.await?;
    Ok(())
}

/// One message per flagged token. A failed message is logged and skipped.
async fn send_items(bot: &Bot, chat_id: ChatId, items: &[Item], pacer: &MessagePacer) {
    for (idx, item) in items.iter().enumerate() {
        pacer.wait().await;

        let mut request = bot
            .send_message(chat_id, format_item(idx + 1, item))
            .parse_mode(ParseMode::MarkdownV2);
        if let Ok(url) = Url::parse(&item.url) {
            request = request.reply_markup(InlineKeyboardMarkup::new(vec![vec![
                InlineKeyboardButton::url("🔗 Catapult", url),
            ]]));
        }

        if let Err(e) = request.await {
            error!("❌ Token #{}: {}", idx + 1, e);
        }
    }
}

fn items_keyboard(report: &Report) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        format!("📋 {} tokens", report.total_items_with_patterns),
        SHOW_ALL_ITEMS,
    )]])
}

#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Catapult Scanner commands:")]
enum Command {
    #[command(description = "Welcome message")]
    Start,
    #[command(description = "Scan now")]
    Scan,
    #[command(description = "Last report")]
    Report,
    #[command(description = "Pattern statistics")]
    Patterns,
    #[command(description = "Scanner status")]
    Status,
    #[command(description = "Recent scans")]
    History,
    #[command(description = "Show this help message")]
    Help,
}

async fn answer_command(bot: Bot, msg: Message, cmd: Command, state: Arc<AppState>) -> ResponseResult<()> {
    let chat_id = msg.chat.id;
    info!("📩 {:?} from {}", cmd, chat_id);

    let response = match cmd {
        Command::Start => format_welcome(),
        Command::Help => format_help(),
        Command::Scan => return start_scan(bot, chat_id, state).await,
        Command::Report => match state.scanner.latest() {
            Some(record) => format_report(&record.report),
            None => escape("❌ No data yet. Run /scan first"),
        },
        Command::Patterns => match state.scanner.latest() {
            Some(record) => format_patterns(&record.report),
            None => escape("❌ No data yet"),
        },
        Command::Status => format_status(&state.scanner.status()),
        Command::History => match state.scanner.store() {
            Some(store) => match store.recent_scans(HISTORY_LIMIT).await {
                Ok(scans) => format_history(&scans),
                Err(e) => {
                    error!("Failed to load scan history: {}", e);
                    escape("❌ Failed to load scan history")
                }
            },
            None => escape("📭 History is disabled (no database configured)"),
        },
    };

    bot.send_message(chat_id, response)
        .parse_mode(ParseMode::MarkdownV2)
        .await?;

    Ok(())
}

/// Claim the scanner, acknowledge, and finish the scan in the background so
/// the dispatcher keeps serving other chats.
async fn start_scan(bot: Bot, chat_id: ChatId, state: Arc<AppState>) -> ResponseResult<()> {
    let permit = match state.scanner.try_begin(ScanTrigger::OnDemand) {
        Ok(permit) => permit,
        Err(e) => {
            bot.send_message(chat_id, format_busy(&e))
                .parse_mode(ParseMode::MarkdownV2)
                .await?;
            return Ok(());
        }
    };

    let progress = bot
        .send_message(chat_id, escape("🔄 Scanning..."))
        .parse_mode(ParseMode::MarkdownV2)
        .await?;

    tokio::spawn(async move {
        let record = state.scanner.run(permit).await;

        let mut edit = bot
            .edit_message_text(chat_id, progress.id, format_summary(&record.report))
            .parse_mode(ParseMode::MarkdownV2);
        if !record.report.is_empty() {
            edit = edit.reply_markup(items_keyboard(&record.report));
        }

        match edit.await {
            Ok(_) => info!("✅ /scan: report sent"),
            Err(e) => error!("❌ /scan: {}", e),
        }
    });

    Ok(())
}

async fn answer_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
    pacer: Arc<MessagePacer>,
) -> ResponseResult<()> {
    let chat_id = q.message.as_ref().map(|m| m.chat.id);
    info!("📩 callback {:?} from {}", q.data, q.from.id);

    if q.data.as_deref() != Some(SHOW_ALL_ITEMS) {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    }

    let record = state.scanner.latest().filter(|r| !r.report.is_empty());
    let (Some(chat_id), Some(record)) = (chat_id, record) else {
        bot.answer_callback_query(q.id)
            .text("❌ No data")
            .show_alert(true)
            .await?;
        return Ok(());
    };

    bot.answer_callback_query(q.id)
        .text(format!("📤 {} tokens...", record.report.items.len()))
        .await?;

    send_items(&bot, chat_id, &record.report.items, &pacer).await;
    Ok(())
}

async fn answer_unknown(bot: Bot, msg: Message) -> ResponseResult<()> {
    bot.send_message(msg.chat.id, "❓ /help").await?;
    Ok(())
}

fn format_welcome() -> String {
    format!(
        "🤖 {}\n\n{}\n\n{}\n{}",
        bold("Catapult Scanner"),
        escape("I scan new tokens on catapult.trade and flag patterns."),
        bold("Commands:"),
        command_list(),
    )
}

fn format_help() -> String {
    format!("{}\n\n{}", bold("HELP"), command_list())
}

fn command_list() -> String {
    escape(
        "/scan - Scan now\n\
         /report - Last report\n\
         /patterns - Pattern statistics\n\
         /status - Scanner status\n\
         /history - Recent scans\n\
         /help - Help",
    )
}

fn format_busy(err: &ScanError) -> String {
    escape(&format!("⏳ Scan already in progress: {}", err))
}

fn format_summary(report: &Report) -> String {
    if report.is_empty() {
        return format!("{}\n\n{}", bold("SCAN"), escape("❌ No tokens found"));
    }

    let mut text = format!(
        "{}\n\nTokens: {}\nPatterns: {}\n\n{}\n",
        bold("SCAN"),
        code_inline(&report.total_items_with_patterns.to_string()),
        code_inline(&report.total_pattern_occurrences.to_string()),
        bold("TOP PATTERNS:"),
    );
    for (tag, count) in report.ranked_patterns.iter().take(SUMMARY_TOP_PATTERNS) {
        text.push_str(&format!("{}: {}\n", escape(&tag.label()), code_inline(&count.to_string())));
    }
    text
}

fn format_report(report: &Report) -> String {
    let mut text = format!(
        "{}\n{}\n\nTokens: {}\nPatterns: {}\n\n{}\n",
        bold("REPORT"),
        escape(&report.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        code_inline(&report.total_items_with_patterns.to_string()),
        code_inline(&report.total_pattern_occurrences.to_string()),
        bold("TOP PATTERNS:"),
    );
    for (idx, (tag, count)) in report.ranked_patterns.iter().take(REPORT_TOP_PATTERNS).enumerate() {
        text.push_str(&format!(
            "{}\\. {}: {}\n",
            idx + 1,
            escape(&tag.label()),
            code_inline(&count.to_string())
        ));
    }
    text
}

fn format_patterns(report: &Report) -> String {
    if report.ranked_patterns.is_empty() {
        return format!("{}\n\n{}", bold("PATTERNS"), escape("📭 No patterns in the last scan"));
    }

    let mut text = format!("{}\n\n", bold("PATTERNS"));
    for (tag, count) in &report.ranked_patterns {
        text.push_str(&escape(&format!(
            "{}: {} ({})\n",
            tag.label(),
            frequency_bar(*count, BAR_WIDTH),
            count
        )));
    }
    text
}

fn format_item(position: usize, item: &Item) -> String {
    let patterns = if item.matched_patterns.is_empty() {
        escape("❌ No patterns")
    } else {
        let lines: Vec<String> = item.matched_patterns.iter().map(|t| escape(&t.label())).collect();
        format!("{}\n{}", bold("Patterns:"), lines.join("\n"))
    };

    format!(
        "{}\n\n{}",
        bold(&escape(&format!("#{}. {}", position, item.name))),
        patterns
    )
}

fn format_status(status: &ScanStatus) -> String {
    let state = match status.state {
        ScanState::Idle => "🟢 idle".to_string(),
        ScanState::Running { trigger, since } => format!(
            "🔄 running ({} since {})",
            trigger.as_str(),
            since.format("%H:%M:%S UTC")
        ),
    };

    let last = match &status.last {
        Some(record) => format!(
            "{} ({}, {})\nTokens checked: {}, flagged: {}, failed: {}\nDuration: {}",
            record.report.timestamp.format("%H:%M:%S UTC"),
            record.trigger.as_str(),
            record.outcome.as_str(),
            record.discovered,
            record.report.total_items_with_patterns,
            record.failed_items,
            format_duration(Duration::from_millis(record.duration_ms)),
        ),
        None => "never".to_string(),
    };

    let failures = if status.max_consecutive_failures == 0 {
        format!("{} (no limit)", status.consecutive_failures)
    } else {
        format!("{}/{}", status.consecutive_failures, status.max_consecutive_failures)
    };

    let body = format!(
        "State: {}\nLast scan: {}\nFailures in a row: {}\nInterval: {}s\nStorage: {}",
        state,
        last,
        failures,
        status.interval.as_secs(),
        if status.persistent { "sqlite" } else { "memory only" },
    );

    format!("{}\n\n{}", bold("STATUS"), escape(&body))
}

fn format_history(scans: &[ScanSummary]) -> String {
    if scans.is_empty() {
        return format!("{}\n\n{}", bold("HISTORY"), escape("📭 No scans stored yet"));
    }

    let mut text = format!("{}\n\n", bold("HISTORY"));
    for scan in scans {
        text.push_str(&escape(&format!(
            "{} {} ({}): {} flagged of {}, {} patterns\n",
            scan.finished_at.format("%m-%d %H:%M"),
            scan.outcome,
            scan.trigger,
            scan.total_items,
            scan.discovered,
            scan.total_occurrences,
        )));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PatternTag, ScanOutcome};
    use chrono::{TimeZone, Utc};

    fn report() -> Report {
        Report {
            timestamp: Utc.with_ymd_and_hms(2025, 5, 6, 14, 30, 0).unwrap(),
            total_items_with_patterns: 2,
            total_pattern_occurrences: 3,
            ranked_patterns: vec![(PatternTag::MegaPump, 2), (PatternTag::New, 1)],
            items: vec![
                Item {
                    id: "1".into(),
                    name: "Doge.X (v2)".into(),
                    url: "https://catapult.trade/turbo/tokens/1".into(),
                    matched_patterns: vec![PatternTag::MegaPump, PatternTag::New],
                },
                Item {
                    id: "2".into(),
                    name: "Pepe".into(),
                    url: "https://catapult.trade/turbo/tokens/2".into(),
                    matched_patterns: vec![PatternTag::MegaPump],
                },
            ],
        }
    }

    #[test]
    fn test_summary_lists_totals_and_escapes_labels() {
        let text = format_summary(&report());
        assert!(text.starts_with("*SCAN*"));
        assert!(text.contains("Tokens: `2`"));
        assert!(text.contains("Patterns: `3`"));
        assert!(text.contains("🚀 MEGA\\_PUMP: `2`"));
    }

    #[test]
    fn test_summary_of_empty_report() {
        let text = format_summary(&Report::empty(Utc::now()));
        assert!(text.contains("No tokens found"));
        assert!(!text.contains("TOP PATTERNS"));
    }

    #[test]
    fn test_report_numbers_patterns() {
        let text = format_report(&report());
        assert!(text.contains("1\\. 🚀 MEGA\\_PUMP: `2`"));
        assert!(text.contains("2\\. ⏰ NEW: `1`"));
        assert!(text.contains("2025\\-05\\-06 14:30:00 UTC"));
    }

    #[test]
    fn test_patterns_bar_is_capped() {
        let mut report = report();
        report.ranked_patterns = vec![(PatternTag::Social, 40)];
        let text = format_patterns(&report);
        assert!(text.contains(&"▪".repeat(BAR_WIDTH)));
        assert!(!text.contains(&"▪".repeat(BAR_WIDTH + 1)));
        assert!(text.contains("\\(40\\)"));
    }

    #[test]
    fn test_item_name_is_escaped() {
        let text = format_item(1, &report().items[0]);
        assert!(text.starts_with("*\\#1\\. Doge\\.X \\(v2\\)*"));
        assert!(text.contains("*Patterns:*"));
        assert!(text.contains("⏰ NEW"));
    }

    #[test]
    fn test_status_shows_state_and_last_outcome() {
        let record = ScanRecord {
            report: report(),
            trigger: ScanTrigger::Timer,
            outcome: ScanOutcome::Completed,
            discovered: 20,
            failed_items: 1,
            duration_ms: 42_100,
        };
        let status = ScanStatus {
            state: ScanState::Running {
                trigger: ScanTrigger::OnDemand,
                since: Utc.with_ymd_and_hms(2025, 5, 6, 15, 0, 0).unwrap(),
            },
            last: Some(Arc::new(record)),
            consecutive_failures: 0,
            max_consecutive_failures: 5,
            interval: Duration::from_secs(600),
            persistent: false,
        };

        let text = format_status(&status);
        assert!(text.contains("running \\(on\\_demand since 15:00:00 UTC\\)"));
        assert!(text.contains("timer, completed"));
        assert!(text.contains("Tokens checked: 20, flagged: 2, failed: 1"));
        assert!(text.contains("42\\.1s"));
        assert!(text.contains("0/5"));
        assert!(text.contains("memory only"));
    }

    #[test]
    fn test_status_before_first_scan() {
        let status = ScanStatus {
            state: ScanState::Idle,
            last: None,
            consecutive_failures: 0,
            max_consecutive_failures: 0,
            interval: Duration::from_secs(600),
            persistent: true,
        };
        let text = format_status(&status);
        assert!(text.contains("idle"));
        assert!(text.contains("Last scan: never"));
        assert!(text.contains("no limit"));
        assert!(text.contains("sqlite"));
    }

    #[test]
    fn test_busy_message_names_running_scan() {
        let err = ScanError::AlreadyRunning {
            trigger: ScanTrigger::Timer,
            since: Utc.with_ymd_and_hms(2025, 5, 6, 15, 0, 0).unwrap(),
        };
        let text = format_busy(&err);
        assert!(text.contains("already in progress"));
        assert!(text.contains("timer"));
    }

    #[test]
    fn test_history_lines() {
        let scans = vec![ScanSummary {
            id: 1,
            finished_at: Utc.with_ymd_and_hms(2025, 5, 6, 15, 0, 0).unwrap(),
            trigger: "timer".into(),
            outcome: "challenge_page".into(),
            discovered: 0,
            total_items: 0,
            total_occurrences: 0,
        }];
        let text = format_history(&scans);
        assert!(text.contains("05\\-06 15:00 challenge\\_page \\(timer\\)"));
        assert!(format_history(&[]).contains("No scans stored yet"));
    }

    #[test]
    fn test_command_list_is_escaped() {
        assert!(format_help().contains("/scan \\- Scan now"));
    }

    #[tokio::test]
    async fn test_pacer_without_delay_never_blocks() {
        let pacer = MessagePacer::new(Duration::ZERO);
        assert!(pacer.limiter.is_none());
        for _ in 0..3 {
            pacer.wait().await;
        }
    }

    #[tokio::test]
    async fn test_pacer_spaces_messages_by_delay() {
        let delay = Duration::from_millis(40);
        let pacer = MessagePacer::new(delay);
        assert!(pacer.limiter.is_some());

        let started = std::time::Instant::now();
        for _ in 0..3 {
            pacer.wait().await;
        }

        // First message goes out at once, the next two wait one delay each.
        assert!(started.elapsed() >= delay * 19 / 10, "elapsed {:?}", started.elapsed());
    }
}
