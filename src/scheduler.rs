//! Top-level polling loop.
//!
//! One cycle walks `Idle → Authenticating → Polling(target_i) → Cooling`:
//! pick a credential, make sure a session is bound to it, fetch every target
//! in turn, and sleep. Failures route back to the account pool and session
//! manager; nothing short of cancellation ends the loop.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::error::{AuthError, ExtractionError, FetchError, PublishError, StoreError};
use crate::extractor::{Patterns, extract};
use crate::ledger::DedupLedger;
use crate::pool::{AccountPool, Credential, CredentialId};
use crate::publisher::{Publisher, deliver};
use crate::session::{PageFetcher, SessionError, SessionManager, SessionProvider};
use crate::store::SignalStore;
use crate::timing::sleep_or_cancel;
use crate::types::{AlertRecord, ContentItem, ExitSummary, Signal};
use crate::watermark::WatermarkMap;

/// Upper bound on the session teardown performed after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Authenticating,
    Polling(String),
    Cooling(Duration),
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Idle => f.write_str("idle"),
            SchedulerState::Authenticating => f.write_str("authenticating"),
            SchedulerState::Polling(target) => write!(f, "polling({target})"),
            SchedulerState::Cooling(d) => write!(f, "cooling({}s)", d.as_secs()),
        }
    }
}

/// How a single cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every target was attempted.
    Completed,
    /// A target fetch failed; the rest of the pass was abandoned.
    FetchFailed { target: String },
    /// No session could be obtained for the chosen credential.
    AuthFailed,
    /// Every credential is cooling.
    AllCooling,
    Cancelled,
}

/// What the scheduler watches and where discoveries go.
pub struct WatchPlan {
    pub targets: Vec<String>,
    pub patterns: Patterns,
    pub topic: String,
}

pub struct Scheduler<P: SessionProvider, F> {
    pool: AccountPool,
    sessions: SessionManager<P>,
    fetcher: F,
    publisher: Box<dyn Publisher>,
    ledger: Arc<DedupLedger>,
    store: Arc<dyn SignalStore>,
    watermarks: WatermarkMap,
    plan: WatchPlan,
    settings: Settings,
    state: SchedulerState,
    all_cooling_streak: u32,
    summary: ExitSummary,
}

impl<P, F> Scheduler<P, F>
where
    P: SessionProvider,
    F: PageFetcher<P::Session>,
{
    /// Build a scheduler, restoring persisted watermarks from `store`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: AccountPool,
        sessions: SessionManager<P>,
        fetcher: F,
        publisher: Box<dyn Publisher>,
        ledger: Arc<DedupLedger>,
        store: Arc<dyn SignalStore>,
        plan: WatchPlan,
        settings: Settings,
    ) -> Result<Self, StoreError> {
        let watermarks = WatermarkMap::from_map(store.load_watermarks()?);
        info!(
            "Scheduler ready: {} target(s), {} credential(s), {} keyword(s), {} watermark(s) restored",
            plan.targets.len(),
            pool.len(),
            plan.patterns.keyword_count(),
            watermarks.len()
        );
        Ok(Self {
            pool,
            sessions,
            fetcher,
            publisher,
            ledger,
            store,
            watermarks,
            plan,
            settings,
            state: SchedulerState::Idle,
            all_cooling_streak: 0,
            summary: ExitSummary::default(),
        })
    }

    pub fn pool(&self) -> &AccountPool {
        &self.pool
    }

    pub fn watermarks(&self) -> &WatermarkMap {
        &self.watermarks
    }

    pub fn summary(&self) -> &ExitSummary {
        &self.summary
    }

    /// Poll until `cancel` fires, then tear down the session and return the totals.
    pub async fn run(mut self, cancel: CancellationToken) -> ExitSummary {
        self.summary.started_at = Some(Utc::now());
        info!("Entering polling loop. Press Ctrl+C to stop.");

        while !cancel.is_cancelled() {
            if self.run_cycle(&cancel).await == CycleOutcome::Cancelled {
                break;
            }
        }
        info!("Shutdown signal received, stopping scheduler");

        // The run token is already cancelled; give teardown its own short window.
        let teardown = CancellationToken::new();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.sessions.invalidate(&teardown))
            .await
            .is_err()
        {
            warn!("Session teardown did not finish within {SHUTDOWN_GRACE:?}");
        }

        self.summary.stopped_at = Some(Utc::now());
        self.summary.seen_signals = self.ledger.len();
        self.summary
    }

    /// One full pass including the trailing sleep.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleOutcome {
        self.summary.cycles += 1;
        self.enter(SchedulerState::Idle, None);

        let Some(id) = self.pool.next() else {
            return self.wait_all_cooling(cancel).await;
        };
        self.all_cooling_streak = 0;
        let credential = self.pool.get(id).clone();

        self.enter(SchedulerState::Authenticating, Some(&credential));
        match self.sessions.ensure_session(id, &credential, cancel).await {
            Ok(_) => {}
            Err(SessionError::Cancelled) => return CycleOutcome::Cancelled,
            Err(SessionError::Auth(e)) => {
                warn!(credential = %credential.handle, error = %e, kind = "auth", "Authentication failed");
                self.summary.auth_failures += 1;
                self.pool.report_failure(id);
                return CycleOutcome::AuthFailed;
            }
        }

        let outcome = self.poll_targets(id, &credential, cancel).await;
        if outcome == CycleOutcome::Cancelled {
            return outcome;
        }

        let pause = self.settings.poll_interval.sample();
        self.enter(SchedulerState::Cooling(pause), Some(&credential));
        if !sleep_or_cancel(pause, cancel).await {
            return CycleOutcome::Cancelled;
        }
        outcome
    }

    async fn poll_targets(
        &mut self,
        id: CredentialId,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> CycleOutcome {
        let targets = self.plan.targets.clone();
        for (i, target) in targets.iter().enumerate() {
            if i > 0 && !sleep_or_cancel(self.settings.target_delay.sample(), cancel).await {
                return CycleOutcome::Cancelled;
            }
            self.enter(SchedulerState::Polling(target.clone()), Some(credential));

            let items = match self.fetch(id, credential, target, cancel).await {
                Ok(items) => items,
                Err(FetchStep::Cancelled) => return CycleOutcome::Cancelled,
                Err(FetchStep::Auth(e)) => {
                    warn!(credential = %credential.handle, error = %e, kind = "auth", "Re-authentication failed");
                    self.summary.auth_failures += 1;
                    self.pool.report_failure(id);
                    return CycleOutcome::AuthFailed;
                }
                Err(FetchStep::Failed(e)) => {
                    warn!(
                        credential = %credential.handle,
                        account = %target,
                        error = %e,
                        kind = "fetch",
                        "Fetch failed, abandoning this pass"
                    );
                    self.summary.targets_failed += 1;
                    self.pool.report_failure(id);
                    self.sessions.invalidate(cancel).await;
                    return CycleOutcome::FetchFailed {
                        target: target.clone(),
                    };
                }
            };
            self.pool.report_success(id);
            self.summary.targets_polled += 1;

            self.process_batch(target, &items, cancel).await;
            if cancel.is_cancelled() {
                return CycleOutcome::Cancelled;
            }
        }
        CycleOutcome::Completed
    }

    async fn fetch(
        &mut self,
        id: CredentialId,
        credential: &Credential,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ContentItem>, FetchStep> {
        let session = match self.sessions.ensure_session(id, credential, cancel).await {
            Ok(session) => session,
            Err(SessionError::Cancelled) => return Err(FetchStep::Cancelled),
            Err(SessionError::Auth(e)) => return Err(FetchStep::Auth(e)),
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(FetchStep::Cancelled),
            res = self.fetcher.fetch_recent(session, target, self.settings.batch_size) => {
                res.map_err(FetchStep::Failed)
            }
        }
    }

    /// Run every fetched item through the watermark, extractor, ledger and publisher.
    ///
    /// Items are compared against the watermark as it stood before the batch,
    /// so a newest-first batch does not hide its own older entries.
    async fn process_batch(&mut self, target: &str, items: &[ContentItem], cancel: &CancellationToken) {
        let floor = self.watermarks.clone();
        for item in items {
            match self.process_item(target, item, &floor, cancel).await {
                Ok(ItemStep::Done) => {}
                Ok(ItemStep::Interrupted) => {
                    debug!(account = %target, item_id = %item.id, "Item interrupted by shutdown");
                    return;
                }
                Err(e) => {
                    self.summary.items_skipped += 1;
                    warn!(account = %target, item_id = %item.id, error = %e, kind = "extraction", "Skipping item");
                }
            }
            if cancel.is_cancelled() {
                return;
            }
        }
    }

    /// An interrupted item is neither counted nor watermarked, and no signal
    /// is marked once shutdown has been observed.
    async fn process_item(
        &mut self,
        target: &str,
        item: &ContentItem,
        floor: &WatermarkMap,
        cancel: &CancellationToken,
    ) -> Result<ItemStep, ExtractionError> {
        let item_id = item.item_id()?;
        if !floor.is_new(target, &item_id) {
            debug!(account = %target, item_id = %item_id, "Already processed");
            return Ok(ItemStep::Done);
        }

        let mut interrupted = false;
        if item.is_repost && self.settings.skip_reposts {
            debug!(account = %target, item_id = %item_id, "Skipping repost");
        } else {
            let signals = extract(item, &self.plan.patterns);
            let mut fresh = Vec::new();
            for signal in &signals {
                if cancel.is_cancelled() {
                    interrupted = true;
                    break;
                }
                if !self.ledger.mark_new(signal).await? {
                    self.summary.signals_suppressed += 1;
                    continue;
                }
                fresh.push(signal);
                let event = signal.to_event(Utc::now());
                match deliver(
                    self.publisher.as_ref(),
                    &self.plan.topic,
                    &event,
                    self.settings.publish_timeout,
                    cancel,
                )
                .await
                {
                    Ok(()) => {
                        self.summary.signals_published += 1;
                        info!(account = %target, kind = %signal.kind, signal = %signal.value, "Published signal");
                    }
                    Err(e) => {
                        self.summary.publish_failures += 1;
                        warn!(
                            account = %target,
                            signal = %signal.value,
                            error = %e,
                            kind = "publish",
                            "Delivery failed; signal stays marked as seen"
                        );
                        if matches!(e, PublishError::Cancelled) {
                            interrupted = true;
                            break;
                        }
                    }
                }
            }
            if !fresh.is_empty() {
                self.record_alert(item, &fresh);
            }
        }
        if interrupted {
            return Ok(ItemStep::Interrupted);
        }

        self.summary.items_processed += 1;
        if self.watermarks.advance(target, &item_id) {
            if let Err(e) = self.store.save_watermark(target, &item_id) {
                warn!(account = %target, error = %e, "Failed to persist watermark");
            }
        }
        Ok(ItemStep::Done)
    }

    fn record_alert(&self, item: &ContentItem, fresh: &[&Signal<'_>]) {
        let alert = AlertRecord::from_signals(item, fresh, Utc::now());
        info!(
            account = %alert.target,
            permalink = %alert.permalink,
            published_at = ?alert.published_at,
            addresses = ?alert.addresses,
            keywords = ?alert.keywords,
            "ALERT: new signal(s) detected"
        );
        if let Err(e) = self.store.append_alert(&alert) {
            warn!(account = %alert.target, error = %e, "Failed to archive alert");
        }
    }

    async fn wait_all_cooling(&mut self, cancel: &CancellationToken) -> CycleOutcome {
        self.all_cooling_streak += 1;
        let now = Utc::now();
        let wait = self.settings.all_cooling_wait;
        if self.all_cooling_streak >= self.settings.storm_threshold {
            let cooling: Vec<String> = self
                .pool
                .cooling(now)
                .into_iter()
                .map(|(handle, left)| format!("{handle}:{}s", left.as_secs()))
                .collect();
            error!(
                streak = self.all_cooling_streak,
                ?cooling,
                "Cooldown storm: all credentials cooling for consecutive cycles; credentials may be invalid or rate limited"
            );
        } else {
            warn!(
                next_available = ?self.pool.earliest_available(now),
                "All credentials are in cooldown"
            );
        }
        self.enter(SchedulerState::Cooling(wait), None);
        if !sleep_or_cancel(wait, cancel).await {
            return CycleOutcome::Cancelled;
        }
        CycleOutcome::AllCooling
    }

    fn enter(&mut self, state: SchedulerState, credential: Option<&Credential>) {
        let handle = credential.map_or("-", |c| c.handle.as_str());
        debug!(from = %self.state, to = %state, credential = handle, "State transition");
        if let SchedulerState::Cooling(d) = &state {
            info!(credential = handle, "Waiting {}s before next cycle", d.as_secs());
        }
        self.state = state;
    }
}

enum ItemStep {
    Done,
    Interrupted,
}

enum FetchStep {
    Failed(FetchError),
    Auth(AuthError),
    Cancelled,
}
