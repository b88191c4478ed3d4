//! Runs scans one at a time and holds the most recent result.
//!
//! The scan lock is an explicit `Idle`/`Running` state. Acquiring it hands out
//! a [`ScanPermit`]; dropping the permit makes the scanner idle again. The
//! latest [`ScanRecord`] lives in a `watch` channel, so readers always see a
//! complete record and can also wait for the next one.

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

use super::catapult::CatapultScanner;
use crate::config::ScheduleConfig;
use crate::database::Database;
use crate::error::ScanError;
use crate::models::{ScanRecord, ScanTrigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Running {
        trigger: ScanTrigger,
        since: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct ScanStatus {
    pub state: ScanState,
    pub last: Option<Arc<ScanRecord>>,
    pub consecutive_failures: u32,
    pub max_consecutive_failures: u32,
    pub interval: Duration,
    pub persistent: bool,
}

/// Proof that the holder is the only scan in progress.
pub struct ScanPermit {
    state: Arc<Mutex<ScanState>>,
    trigger: ScanTrigger,
}

impl ScanPermit {
    pub fn trigger(&self) -> ScanTrigger {
        self.trigger
    }
}

impl Drop for ScanPermit {
    fn drop(&mut self) {
        *lock_state(&self.state) = ScanState::Idle;
    }
}

fn lock_state(state: &Mutex<ScanState>) -> MutexGuard<'_, ScanState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ScanService {
    scanner: CatapultScanner,
    store: Option<Database>,
    state: Arc<Mutex<ScanState>>,
    latest: watch::Sender<Option<Arc<ScanRecord>>>,
    consecutive_failures: AtomicU32,
    interval: Duration,
    max_consecutive_failures: u32,
}

impl ScanService {
    pub fn new(scanner: CatapultScanner, store: Option<Database>, schedule: &ScheduleConfig) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            scanner,
            store,
            state: Arc::new(Mutex::new(ScanState::Idle)),
            latest,
            consecutive_failures: AtomicU32::new(0),
            interval: schedule.interval,
            max_consecutive_failures: schedule.max_consecutive_failures,
        }
    }

    pub fn store(&self) -> Option<&Database> {
        self.store.as_ref()
    }

    /// Claim the scanner, or report who holds it.
    pub fn try_begin(&self, trigger: ScanTrigger) -> Result<ScanPermit, ScanError> {
        let mut state = lock_state(&self.state);
        if let ScanState::Running { trigger, since } = *state {
            return Err(ScanError::AlreadyRunning { trigger, since });
        }
        *state = ScanState::Running {
            trigger,
            since: Utc::now(),
        };

        Ok(ScanPermit {
            state: Arc::clone(&self.state),
            trigger,
        })
    }

    /// Run one scan under `permit` and publish its record.
    pub async fn run(&self, permit: ScanPermit) -> Arc<ScanRecord> {
        let record = self.scanner.scan(permit.trigger()).await;

        if record.outcome.is_failure() {
            let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            warn!("⚠️ Scan failed ({}), {} in a row", record.outcome.as_str(), failures);
        } else {
            self.consecutive_failures.store(0, Ordering::SeqCst);
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.save_scan(&record).await {
                warn!("Failed to store scan report: {}", e);
            }
        }

        let record = Arc::new(record);
        self.latest.send_replace(Some(Arc::clone(&record)));
        drop(permit);

        record
    }

    pub async fn scan_now(&self, trigger: ScanTrigger) -> Result<Arc<ScanRecord>, ScanError> {
        let permit = self.try_begin(trigger)?;
        Ok(self.run(permit).await)
    }

    /// Seed the latest slot from the store. Ignored once a scan has completed.
    pub async fn restore_latest(&self) {
        let Some(store) = &self.store else {
            return;
        };

        match store.latest_scan().await {
            Ok(Some(mut record)) => {
                record.trigger = ScanTrigger::Restored;
                let restored = self.latest.send_if_modified(|slot| {
                    if slot.is_some() {
                        return false;
                    }
                    *slot = Some(Arc::new(record));
                    true
                });
                if restored {
                    info!("♻️ Restored last stored report");
                }
            }
            Ok(None) => info!("No stored report to restore"),
            Err(e) => warn!("Failed to restore last report: {}", e),
        }
    }

    pub fn latest(&self) -> Option<Arc<ScanRecord>> {
        self.latest.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<ScanRecord>>> {
        self.latest.subscribe()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ScanStatus {
        ScanStatus {
            state: *lock_state(&self.state),
            last: self.latest(),
            consecutive_failures: self.consecutive_failures(),
            max_consecutive_failures: self.max_consecutive_failures,
            interval: self.interval,
            persistent: self.store.is_some(),
        }
    }

    /// Scan now and then every interval, forever. Returns only when too many
    /// scans in a row have failed; the caller is expected to exit.
    pub async fn start_scanning(&self) -> Result<(), ScanError> {
        info!("🔍 Starting background scanner (every {}s)...", self.interval.as_secs());

        loop {
            match self.try_begin(ScanTrigger::Timer) {
                Ok(permit) => {
                    let record = self.run(permit).await;
                    info!(
                        "✅ Background scan finished: {} ({} tokens)",
                        record.outcome.as_str(),
                        record.report.total_items_with_patterns
                    );
                }
                Err(e) => info!("⏭️ Skipping timer scan: {}", e),
            }

            let failures = self.consecutive_failures();
            if self.max_consecutive_failures > 0 && failures >= self.max_consecutive_failures {
                error!("🛑 {} consecutive scans failed, stopping so the supervisor can restart", failures);
                return Err(ScanError::FailStop { failures });
            }

            sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fixture::FixtureRenderer;
    use crate::config::tests::test_config;
    use crate::models::{PatternTag, ScanOutcome};

    const LISTING: &str = "https://catapult.test/turbo/home?sort=deployed_at_desc";
    const TOKEN: &str = "https://catapult.test/turbo/tokens/1";

    fn service(renderer: FixtureRenderer, max_failures: u32) -> ScanService {
        let mut config = test_config(20);
        config.schedule.interval = Duration::from_millis(1);
        config.schedule.max_consecutive_failures = max_failures;
        let scanner = CatapultScanner::new(&config, Arc::new(renderer)).unwrap();
        ScanService::new(scanner, None, &config.schedule)
    }

    fn healthy_site() -> FixtureRenderer {
        FixtureRenderer::new()
            .page(LISTING, r#"<a href="/turbo/tokens/1">One</a>"#)
            .page(TOKEN, "<h1>One</h1> new token")
    }

    #[tokio::test]
    async fn test_permit_drop_returns_to_idle() {
        let service = service(healthy_site(), 5);
        let permit = service.try_begin(ScanTrigger::OnDemand).unwrap();
        assert!(matches!(
            service.status().state,
            ScanState::Running { trigger: ScanTrigger::OnDemand, .. }
        ));
        assert!(service.try_begin(ScanTrigger::Timer).is_err());

        drop(permit);
        assert_eq!(service.status().state, ScanState::Idle);
        assert!(service.try_begin(ScanTrigger::Timer).is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_request_is_rejected_without_disturbing_scan() {
        let (renderer, gate, entered) = healthy_site().gated(LISTING);
        let service = Arc::new(service(renderer, 5));

        let background = Arc::clone(&service);
        let handle = tokio::spawn(async move { background.scan_now(ScanTrigger::Timer).await });

        entered.notified().await;
        match service.scan_now(ScanTrigger::OnDemand).await {
            Err(ScanError::AlreadyRunning { trigger, .. }) => assert_eq!(trigger, ScanTrigger::Timer),
            other => panic!("expected AlreadyRunning, got {:?}", other.map(|r| r.outcome.clone())),
        }
        assert!(service.latest().is_none());

        gate.add_permits(1);
        let record = handle.await.unwrap().unwrap();

        assert_eq!(record.outcome, ScanOutcome::Completed);
        assert_eq!(record.trigger, ScanTrigger::Timer);
        assert_eq!(record.report.items[0].matched_patterns, vec![PatternTag::New]);
        assert_eq!(service.status().state, ScanState::Idle);
        assert_eq!(service.latest().unwrap(), record);
    }

    #[tokio::test]
    async fn test_latest_is_replaced_and_announced() {
        let service = service(healthy_site(), 5);
        let mut rx = service.subscribe();

        let first = service.scan_now(ScanTrigger::OnDemand).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().trigger, ScanTrigger::OnDemand);

        let second = service.scan_now(ScanTrigger::Timer).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&service.latest().unwrap(), &second));
    }

    #[tokio::test]
    async fn test_failures_are_counted_and_reset() {
        let service = service(FixtureRenderer::new(), 5);
        service.scan_now(ScanTrigger::OnDemand).await.unwrap();
        service.scan_now(ScanTrigger::OnDemand).await.unwrap();
        assert_eq!(service.consecutive_failures(), 2);

        let recovered = self::service(healthy_site(), 5);
        recovered.consecutive_failures.store(4, Ordering::SeqCst);
        recovered.scan_now(ScanTrigger::OnDemand).await.unwrap();
        assert_eq!(recovered.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_empty_listing_is_not_a_failure() {
        let service = service(FixtureRenderer::new().page(LISTING, "<p>quiet day</p>"), 5);
        let record = service.scan_now(ScanTrigger::OnDemand).await.unwrap();
        assert_eq!(record.outcome, ScanOutcome::NoItems);
        assert_eq!(service.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_challenge_marker_with_tokens_completes_and_resets_failures() {
        let site = FixtureRenderer::new()
            .page(
                LISTING,
                r#"<footer>Performance & security by Cloudflare</footer><a href="/turbo/tokens/1">One</a>"#,
            )
            .page(TOKEN, "<h1>One</h1> new token");
        let service = service(site, 5);
        service.consecutive_failures.store(3, Ordering::SeqCst);

        let record = service.scan_now(ScanTrigger::Timer).await.unwrap();

        assert_eq!(record.outcome, ScanOutcome::Completed);
        assert_eq!(record.discovered, 1);
        assert_eq!(record.report.items[0].matched_patterns, vec![PatternTag::New]);
        assert_eq!(service.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_timer_loop_fails_stop_after_threshold() {
        let service = service(FixtureRenderer::new(), 3);
        match service.start_scanning().await {
            Err(ScanError::FailStop { failures }) => assert_eq!(failures, 3),
            other => panic!("expected FailStop, got {:?}", other),
        }
        let last = service.latest().unwrap();
        assert!(matches!(last.outcome, ScanOutcome::FetchFailed { .. }));
        assert!(last.report.is_empty());
    }

    #[tokio::test]
    async fn test_restore_seeds_empty_slot_from_store() {
        let config = test_config(20);
        let store = Database::new("sqlite::memory:").await.unwrap();
        store.migrate().await.unwrap();

        let seed = CatapultScanner::new(&config, Arc::new(healthy_site()))
            .unwrap()
            .scan(ScanTrigger::Timer)
            .await;
        store.save_scan(&seed).await.unwrap();

        let scanner = CatapultScanner::new(&config, Arc::new(healthy_site())).unwrap();
        let service = ScanService::new(scanner, Some(store), &config.schedule);
        service.restore_latest().await;

        let restored = service.latest().unwrap();
        assert_eq!(restored.trigger, ScanTrigger::Restored);
        assert_eq!(restored.report, seed.report);
        assert!(service.status().persistent);
    }
}
