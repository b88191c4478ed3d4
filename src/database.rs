// src/database.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::info;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::models::ScanRecord;

/// One line of scan history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub id: i64,
    pub finished_at: DateTime<Utc>,
    pub trigger: String,
    pub outcome: String,
    pub discovered: usize,
    pub total_items: usize,
    pub total_occurrences: usize,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        info!("Connecting to database: {}", database_url);
        // Single connection: writes are rare and `sqlite::memory:` stays one database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        Ok(Database { pool })
    }

    /// Run database migrations to create tables
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations...");

        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS scan_reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                finished_at TEXT NOT NULL,
                trigger TEXT NOT NULL,
                outcome TEXT NOT NULL,
                discovered INTEGER NOT NULL,
                total_items INTEGER NOT NULL,
                total_occurrences INTEGER NOT NULL,
                payload TEXT NOT NULL
            )
        "#).execute(&self.pool).await?;

        sqlx::query(r#"
            CREATE INDEX IF NOT EXISTS idx_scan_reports_finished_at
            ON scan_reports (finished_at)
        "#).execute(&self.pool).await?;

        info!("✅ Database migrations completed");
        Ok(())
    }

    pub async fn save_scan(&self, record: &ScanRecord) -> Result<i64> {
        let payload = serde_json::to_string(record)?;

        let result = sqlx::query(r#"
            INSERT INTO scan_reports
            (finished_at, trigger, outcome, discovered, total_items, total_occurrences, payload)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#)
        .bind(record.report.timestamp.to_rfc3339())
        .bind(record.trigger.as_str())
        .bind(record.outcome.as_str())
        .bind(record.discovered as i64)
        .bind(record.report.total_items_with_patterns as i64)
        .bind(record.report.total_pattern_occurrences as i64)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn latest_scan(&self) -> Result<Option<ScanRecord>> {
        let row = sqlx::query(r#"
            SELECT payload FROM scan_reports ORDER BY id DESC LIMIT 1
        "#)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let payload: String = row.get("payload");
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    pub async fn recent_scans(&self, limit: i64) -> Result<Vec<ScanSummary>> {
        let rows = sqlx::query(r#"
            SELECT id, finished_at, trigger, outcome, discovered, total_items, total_occurrences
            FROM scan_reports
            ORDER BY id DESC
            LIMIT ?
        "#)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut scans = Vec::new();
        for row in rows {
            scans.push(ScanSummary {
                id: row.get("id"),
                finished_at: row.get::<String, _>("finished_at").parse()?,
                trigger: row.get("trigger"),
                outcome: row.get("outcome"),
                discovered: row.get::<i64, _>("discovered") as usize,
                total_items: row.get::<i64, _>("total_items") as usize,
                total_occurrences: row.get::<i64, _>("total_occurrences") as usize,
            });
        }

        Ok(scans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Item, PatternTag, Report, ScanOutcome, ScanTrigger};

    async fn memory_db() -> Database {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn record(outcome: ScanOutcome, items: usize) -> ScanRecord {
        let items: Vec<Item> = (0..items)
            .map(|i| Item {
                id: i.to_string(),
                name: format!("Token {}", i),
                url: format!("https://catapult.test/turbo/tokens/{}", i),
                matched_patterns: vec![PatternTag::New],
            })
            .collect();
        let report = Report {
            timestamp: Utc::now(),
            total_items_with_patterns: items.len(),
            total_pattern_occurrences: items.len(),
            ranked_patterns: if items.is_empty() { vec![] } else { vec![(PatternTag::New, items.len())] },
            items,
        };
        ScanRecord {
            report,
            trigger: ScanTrigger::Timer,
            outcome,
            discovered: 10,
            failed_items: 1,
            duration_ms: 1234,
        }
    }

    #[tokio::test]
    async fn test_empty_store_has_no_latest_scan() {
        let db = memory_db().await;
        assert!(db.latest_scan().await.unwrap().is_none());
        assert!(db.recent_scans(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latest_scan_is_the_last_saved() {
        let db = memory_db().await;
        db.save_scan(&record(ScanOutcome::Completed, 2)).await.unwrap();
        let last = record(ScanOutcome::Completed, 3);
        db.save_scan(&last).await.unwrap();

        let loaded = db.latest_scan().await.unwrap().unwrap();
        assert_eq!(loaded, last);
    }

    #[tokio::test]
    async fn test_recent_scans_newest_first_and_limited() {
        let db = memory_db().await;
        db.save_scan(&record(ScanOutcome::Completed, 1)).await.unwrap();
        db.save_scan(&record(ScanOutcome::ChallengePage, 0)).await.unwrap();
        db.save_scan(&record(ScanOutcome::FetchFailed { reason: "timeout".into() }, 0))
            .await
            .unwrap();

        let scans = db.recent_scans(2).await.unwrap();
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[0].outcome, "fetch_failed");
        assert_eq!(scans[1].outcome, "challenge_page");
        assert_eq!(scans[1].trigger, "timer");
        assert_eq!(scans[1].discovered, 10);
        assert_eq!(scans[1].total_items, 0);
    }
}
