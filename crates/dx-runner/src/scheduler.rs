//! Fixed-interval refresh loop.
//!
//! # States
//!
//! ```text
//! Idle ──(gateway Ready)──► Running ──(shutdown)──► Stopped
//!   └──(gateway Failed)──► error (fatal)
//! ```
//!
//! One cycle is `fetch → estimate → record → enumerate → status → fan out`,
//! followed by a sleep. Cycles run strictly one after another on a single task:
//! the next fetch starts only after the previous fan-out has returned. A
//! shutdown request is honored before a cycle starts and during the sleep; a
//! cycle that has started always runs to completion (each of its calls is
//! time-bounded).

use std::time::Duration;

use dx_cast::distributor::{self, CycleReport};
use dx_cast::gateway::{GatewayStatus, SessionInfo};
use dx_cast::{BroadcastSurface, targets};
use dx_core::Reading;
use dx_core::cache::ReadingCache;
use dx_core::display::{DisplayLabels, DisplayPayload};
use dx_core::error::{DxError, SourceError};
use dx_core::estimator;
use dx_feed::SnapshotSource;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

/// Loop settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Upper bound for one target's nickname write.
    pub write_timeout: Duration,
    /// Broadcast only to this guild.
    pub restrict_to: Option<u64>,
    pub labels: DisplayLabels,
}

/// What one cycle did.
#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub cycle: u64,
    pub fetch: Result<Reading, SourceError>,
    pub payload: DisplayPayload,
    pub targets: usize,
    pub status_written: bool,
    pub report: CycleReport,
}

pub struct Scheduler<S, B> {
    source: S,
    surface: B,
    config: SchedulerConfig,
    cache: ReadingCache,
    state: SchedulerState,
    cycles: u64,
}

impl<S, B> Scheduler<S, B>
where
    S: SnapshotSource,
    B: BroadcastSurface,
{
    pub fn new(source: S, surface: B, config: SchedulerConfig) -> Self {
        Self {
            source,
            surface,
            config,
            cache: ReadingCache::new(),
            state: SchedulerState::Idle,
            cycles: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn cache(&self) -> &ReadingCache {
        &self.cache
    }

    #[cfg(test)]
    pub fn surface(&self) -> &B {
        &self.surface
    }

    /// Wait for readiness, then loop until `shutdown` turns `true`.
    ///
    /// Returns an error only when the gateway reports an unrecoverable failure
    /// (or goes away) before becoming ready.
    pub async fn run(
        &mut self,
        mut ready: watch::Receiver<GatewayStatus>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), DxError> {
        let session = tokio::select! {
            res = wait_ready(&mut ready) => res?,
            _ = shutdown_requested(&mut shutdown) => {
                info!("shutdown before gateway became ready");
                self.state = SchedulerState::Stopped;
                return Ok(());
            }
        };

        self.state = SchedulerState::Running;
        info!(
            user_id = session.user_id,
            interval_secs = self.config.interval.as_secs(),
            restrict_to = ?self.config.restrict_to,
            "scheduler running"
        );

        while !*shutdown.borrow() {
            let summary = self.run_cycle(session.user_id).await;
            let delay = next_delay(self.config.interval, &summary.fetch);
            debug!(
                cycle = summary.cycle,
                name = %summary.payload.name,
                targets = summary.targets,
                failed = summary.report.failed(),
                status_written = summary.status_written,
                delay_secs = delay.as_secs(),
                "sleeping until next cycle"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        self.state = SchedulerState::Stopped;
        info!(cycles = self.cycles, "scheduler stopped");
        Ok(())
    }

    /// Run one full cycle.
    pub async fn run_cycle(&mut self, self_id: u64) -> CycleSummary {
        self.cycles += 1;
        let cycle = self.cycles;

        let fetch = match self.source.fetch().await {
            Ok(snapshot) => estimator::estimate(&snapshot),
            Err(e) => Err(e),
        };

        match &fetch {
            Ok(reading) => {
                self.cache.record_success(*reading);
                info!(cycle, value = reading.value, change = reading.change, "reading updated");
            }
            Err(e) => {
                self.cache.record_failure(e);
                warn!(
                    cycle,
                    source = self.source.name(),
                    kind = e.kind(),
                    error = %e,
                    has_fallback = self.cache.last_good().is_some(),
                    "fetch failed, using fallback"
                );
            }
        }

        let payload = DisplayPayload::render(self.cache.current_display(), &self.config.labels);
        let targets = targets::list_targets(&self.surface, self_id, self.config.restrict_to).await;
        let status_written = distributor::publish_status(&self.surface, &payload).await;
        let report = distributor::fan_out(&self.surface, &targets, &payload, self.config.write_timeout).await;

        info!(
            cycle,
            name = %payload.name,
            targets = targets.len(),
            updated = report.updated(),
            unchanged = report.unchanged(),
            skipped = report.skipped(),
            failed = report.failed(),
            status_written,
            "cycle complete"
        );

        CycleSummary {
            cycle,
            fetch,
            payload,
            targets: targets.len(),
            status_written,
            report,
        }
    }
}

/// Sleep before the next cycle: the interval, stretched to honor a longer
/// rate-limit back-off.
fn next_delay(interval: Duration, fetch: &Result<Reading, SourceError>) -> Duration {
    match fetch {
        Err(SourceError::RateLimited {
            retry_after: Some(retry),
        }) => interval.max(*retry),
        _ => interval,
    }
}

/// Block until the gateway is ready.
async fn wait_ready(rx: &mut watch::Receiver<GatewayStatus>) -> Result<SessionInfo, DxError> {
    loop {
        match &*rx.borrow_and_update() {
            GatewayStatus::Ready(info) => return Ok(info.clone()),
            GatewayStatus::Failed(reason) => return Err(DxError::Gateway(reason.clone())),
            GatewayStatus::Connecting => {}
        }
        if rx.changed().await.is_err() {
            return Err(DxError::Gateway("gateway session ended before ready".into()));
        }
    }
}

/// Resolve once shutdown is requested. A dropped sender never resolves.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use dx_cast::CastError;
    use dx_cast::Membership;
    use dx_cast::SelfRecord;
    use dx_cast::distributor::TargetOutcome;
    use dx_cast::memory::{MemoryGuild, MemorySurface};
    use dx_cast::targets::CHANGE_NICKNAME;
    use dx_core::display::Presence;
    use dx_core::{Freshness, MarketSnapshot};

    use super::*;

    const ME: u64 = 7;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        FetchStart,
        WriteStart(u64),
        WriteEnd(u64),
    }

    type Log = Arc<Mutex<Vec<Event>>>;

    fn push(log: &Log, e: Event) {
        log.lock().unwrap().push(e);
    }

    /// Returns scripted results in order, then `Unavailable`.
    struct ScriptedSource {
        results: Mutex<VecDeque<Result<MarketSnapshot, SourceError>>>,
        log: Log,
    }

    impl ScriptedSource {
        fn new(results: Vec<Result<MarketSnapshot, SourceError>>, log: Log) -> Self {
            Self {
                results: Mutex::new(results.into()),
                log,
            }
        }
    }

    #[async_trait]
    impl SnapshotSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch(&self) -> Result<MarketSnapshot, SourceError> {
            push(&self.log, Event::FetchStart);
            self.results.lock().unwrap().pop_front().unwrap_or(Err(SourceError::Unavailable {
                status: Some(503),
                reason: "script exhausted".into(),
            }))
        }
    }

    /// Delegates to a [`MemorySurface`], logging write boundaries.
    struct LoggingSurface {
        inner: MemorySurface,
        log: Log,
    }

    #[async_trait]
    impl BroadcastSurface for LoggingSurface {
        async fn list_memberships(&self) -> Result<Vec<Membership>, CastError> {
            self.inner.list_memberships().await
        }

        async fn own_record(&self, guild_id: u64, user_id: u64) -> Result<SelfRecord, CastError> {
            self.inner.own_record(guild_id, user_id).await
        }

        async fn set_display_name(&self, guild_id: u64, name: &str) -> Result<(), CastError> {
            push(&self.log, Event::WriteStart(guild_id));
            let res = self.inner.set_display_name(guild_id, name).await;
            push(&self.log, Event::WriteEnd(guild_id));
            res
        }

        async fn set_status(&self, text: &str, presence: Presence) -> Result<(), CastError> {
            self.inner.set_status(text, presence).await
        }
    }

    fn snapshot(asset: f64) -> MarketSnapshot {
        MarketSnapshot {
            asset_market_cap: asset,
            asset_change_pct: 10.0,
            aggregate_market_cap: 1000.0,
            aggregate_change_pct: 0.0,
            fetched_at_ms: 1,
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(300),
            write_timeout: Duration::from_secs(10),
            restrict_to: None,
            labels: DisplayLabels::default(),
        }
    }

    fn session() -> SessionInfo {
        SessionInfo {
            user_id: ME,
            username: "dx".into(),
            session_id: "s".into(),
            guild_count: 1,
        }
    }

    fn guilds() -> Vec<MemoryGuild> {
        vec![MemoryGuild::new(1, "alpha", CHANGE_NICKNAME), MemoryGuild::new(2, "beta", CHANGE_NICKNAME)]
    }

    #[tokio::test]
    async fn success_then_failure_shows_stale_reading() {
        let log = Log::default();
        let source = ScriptedSource::new(
            vec![
                Ok(snapshot(500.0)),
                Err(SourceError::Timeout(Duration::from_secs(10))),
            ],
            log,
        );
        let mut sched = Scheduler::new(source, MemorySurface::new(ME, guilds()), config());

        let first = sched.run_cycle(ME).await;
        assert!(first.fetch.is_ok());
        assert_eq!(first.payload.name, "BTC.D 50.00% ▲");
        assert_eq!(first.report.updated(), 2);

        let second = sched.run_cycle(ME).await;
        assert!(second.fetch.is_err());
        let (reading, freshness) = sched.cache().current_display().unwrap();
        assert_eq!(reading.value, 50.0);
        assert_eq!(freshness, Freshness::Stale);
        assert_eq!(second.payload.name, "BTC.D 50.00% ▲ (stale)");
        assert_eq!(sched.surface().nick(1).as_deref(), Some("BTC.D 50.00% ▲ (stale)"));
        assert_eq!(sched.surface().status().map(|s| s.1), Some(Presence::Idle));
    }

    #[tokio::test]
    async fn failure_before_any_success_renders_unavailable() {
        let source = ScriptedSource::new(
            vec![Err(SourceError::MalformedResponse("missing market_cap".into()))],
            Log::default(),
        );
        let mut sched = Scheduler::new(source, MemorySurface::new(ME, guilds()), config());

        let summary = sched.run_cycle(ME).await;
        assert!(sched.cache().current_display().is_none());
        assert_eq!(summary.payload.name, "BTC.D unavailable");
        assert_eq!(sched.surface().nick(2).as_deref(), Some("BTC.D unavailable"));
        assert_eq!(
            sched.surface().status(),
            Some(("BTC.D unavailable".to_string(), Presence::Idle))
        );
    }

    #[tokio::test]
    async fn estimator_rejection_is_a_failed_cycle() {
        let bad = MarketSnapshot {
            aggregate_market_cap: 0.0,
            ..snapshot(500.0)
        };
        let source = ScriptedSource::new(vec![Ok(snapshot(500.0)), Ok(bad)], Log::default());
        let mut sched = Scheduler::new(source, MemorySurface::new(ME, guilds()), config());

        sched.run_cycle(ME).await;
        let summary = sched.run_cycle(ME).await;
        assert!(matches!(summary.fetch, Err(SourceError::MalformedResponse(_))));
        assert_eq!(sched.cache().current_display().unwrap().1, Freshness::Stale);
    }

    #[tokio::test]
    async fn target_failures_do_not_abort_the_cycle() {
        let mut rejecting = MemoryGuild::new(2, "rejecting", CHANGE_NICKNAME);
        rejecting.write_error = Some(CastError::Forbidden {
            status: 403,
            message: "hierarchy".into(),
        });
        let surface = MemorySurface::new(
            ME,
            vec![MemoryGuild::new(1, "no-perm", 0), rejecting, MemoryGuild::new(3, "ok", CHANGE_NICKNAME)],
        );
        surface.fail_status(CastError::Gateway("not connected".into()));
        let source = ScriptedSource::new(vec![Ok(snapshot(500.0))], Log::default());
        let mut sched = Scheduler::new(source, surface, config());

        let summary = sched.run_cycle(ME).await;
        assert!(!summary.status_written);
        assert_eq!(summary.targets, 3);
        assert_eq!(summary.report.outcome(1), Some(&TargetOutcome::PermissionSkipped));
        assert!(matches!(summary.report.outcome(2), Some(TargetOutcome::PartialFailure(_))));
        assert_eq!(summary.report.outcome(3), Some(&TargetOutcome::Updated));
    }

    #[tokio::test(start_paused = true)]
    async fn cycles_never_overlap() {
        let log = Log::default();
        let mut slow = MemoryGuild::new(1, "slow", CHANGE_NICKNAME);
        slow.write_delay = Some(Duration::from_secs(5));
        let surface = LoggingSurface {
            inner: MemorySurface::new(ME, vec![slow, MemoryGuild::new(2, "fast", CHANGE_NICKNAME)]),
            log: log.clone(),
        };
        let source = ScriptedSource::new(vec![Ok(snapshot(500.0)), Ok(snapshot(510.0)), Ok(snapshot(520.0))], log.clone());
        let cfg = SchedulerConfig {
            interval: Duration::from_secs(1),
            ..config()
        };
        let mut sched = Scheduler::new(source, surface, cfg);

        let (_ready_tx, ready_rx) = watch::channel(GatewayStatus::Ready(session()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let stopper = async {
            loop {
                let fetches = log.lock().unwrap().iter().filter(|e| **e == Event::FetchStart).count();
                if fetches >= 3 {
                    let _ = shutdown_tx.send(true);
                    return;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        let (res, ()) = tokio::join!(sched.run(ready_rx, shutdown_rx), stopper);
        res.unwrap();
        assert_eq!(sched.state(), SchedulerState::Stopped);

        let events = log.lock().unwrap().clone();
        let fetch_positions: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| **e == Event::FetchStart)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(fetch_positions.len(), 3);

        for window in fetch_positions.windows(2) {
            let (prev, next) = (window[0], window[1]);
            let between = &events[prev..next];
            let starts = between.iter().filter(|e| matches!(e, Event::WriteStart(_))).count();
            let ends = between.iter().filter(|e| matches!(e, Event::WriteEnd(_))).count();
            assert_eq!(starts, 2, "both targets written in cycle");
            assert_eq!(ends, 2, "every write returned before the next fetch");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_until_ready() {
        let source = ScriptedSource::new(vec![Ok(snapshot(500.0))], Log::default());
        let mut sched = Scheduler::new(source, MemorySurface::new(ME, guilds()), config());
        let (ready_tx, ready_rx) = watch::channel(GatewayStatus::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let driver = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            let _ = ready_tx.send(GatewayStatus::Ready(session()));
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = shutdown_tx.send(true);
        };
        let (res, ()) = tokio::join!(sched.run(ready_rx, shutdown_rx), driver);
        res.unwrap();

        let calls = sched.surface().calls();
        assert!(!calls.is_empty());
        assert!(sched.cache().last_good().is_some());
        assert_eq!(sched.state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn gateway_failure_while_idle_is_fatal() {
        let source = ScriptedSource::new(vec![], Log::default());
        let mut sched = Scheduler::new(source, MemorySurface::new(ME, guilds()), config());
        let (_ready_tx, ready_rx) = watch::channel(GatewayStatus::Failed("close code 4004".into()));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let err = sched.run(ready_rx, shutdown_rx).await.unwrap_err();
        assert!(matches!(err, DxError::Gateway(_)));
        assert_eq!(sched.state(), SchedulerState::Idle);
        assert!(sched.surface().calls().is_empty());
    }

    #[tokio::test]
    async fn shutdown_while_idle_stops_cleanly() {
        let source = ScriptedSource::new(vec![], Log::default());
        let mut sched = Scheduler::new(source, MemorySurface::new(ME, guilds()), config());
        let (_ready_tx, ready_rx) = watch::channel(GatewayStatus::Connecting);
        let (_shutdown_tx, shutdown_rx) = watch::channel(true);

        sched.run(ready_rx, shutdown_rx).await.unwrap();
        assert_eq!(sched.state(), SchedulerState::Stopped);
        assert!(sched.surface().calls().is_empty());
    }

    #[test]
    fn rate_limit_stretches_the_delay() {
        let interval = Duration::from_secs(300);
        let long = Err(SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(900)),
        });
        let short = Err(SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        });
        assert_eq!(next_delay(interval, &long), Duration::from_secs(900));
        assert_eq!(next_delay(interval, &short), interval);
        assert_eq!(next_delay(interval, &Err(SourceError::Timeout(interval))), interval);
    }
}
