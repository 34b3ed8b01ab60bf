//! Per-cycle distribution of the rendered payload.
//!
//! Every target is written independently and concurrently; one target's
//! permission gap, rejection or timeout never affects another. Outcomes are
//! collected into a [`CycleReport`] and logged uniformly. The process-wide
//! status is written once per cycle, best-effort.

use std::time::Duration;

use dx_core::display::{DisplayPayload, truncate_name};
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::{BroadcastSurface, Target};

/// Result of applying the payload to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    /// The nickname write was accepted.
    Updated,
    /// The nickname already read as the payload; nothing was written.
    Unchanged,
    /// The process lacks the capability in this guild; nothing was written.
    PermissionSkipped,
    /// The write was attempted and rejected or timed out.
    PartialFailure(String),
}

/// Outcome for one target, tagged with its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetResult {
    pub guild_id: u64,
    pub guild_name: String,
    pub outcome: TargetOutcome,
}

/// Aggregated outcomes of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub results: Vec<TargetResult>,
}

impl CycleReport {
    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, TargetOutcome::Updated))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, TargetOutcome::Unchanged))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TargetOutcome::PermissionSkipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TargetOutcome::PartialFailure(_)))
    }

    pub fn outcome(&self, guild_id: u64) -> Option<&TargetOutcome> {
        self.results.iter().find(|r| r.guild_id == guild_id).map(|r| &r.outcome)
    }

    fn count(&self, pred: impl Fn(&TargetOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Apply the payload's name to one target.
pub async fn apply<S>(surface: &S, target: &Target, payload: &DisplayPayload) -> TargetOutcome
where
    S: BroadcastSurface + ?Sized,
{
    if !target.can_change_nickname {
        return TargetOutcome::PermissionSkipped;
    }

    let name = truncate_name(&payload.name);
    if target.current_nick.as_deref() == Some(name.as_str()) {
        return TargetOutcome::Unchanged;
    }
    match surface.set_display_name(target.guild_id, &name).await {
        Ok(()) => TargetOutcome::Updated,
        Err(e) => TargetOutcome::PartialFailure(e.to_string()),
    }
}

/// Apply the payload to every target concurrently, bounding each write by
/// `per_target`.
pub async fn fan_out<S>(surface: &S, targets: &[Target], payload: &DisplayPayload, per_target: Duration) -> CycleReport
where
    S: BroadcastSurface + ?Sized,
{
    let writes = targets.iter().map(|target| async move {
        let outcome = match tokio::time::timeout(per_target, apply(surface, target, payload)).await {
            Ok(outcome) => outcome,
            Err(_) => TargetOutcome::PartialFailure(format!("write timed out after {per_target:?}")),
        };
        log_outcome(target, &outcome);
        TargetResult {
            guild_id: target.guild_id,
            guild_name: target.name.clone(),
            outcome,
        }
    });

    CycleReport {
        results: join_all(writes).await,
    }
}

/// Write the process-wide status. Failures are logged and swallowed.
pub async fn publish_status<S>(surface: &S, payload: &DisplayPayload) -> bool
where
    S: BroadcastSurface + ?Sized,
{
    match surface.set_status(&payload.status, payload.presence).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "status update failed");
            false
        }
    }
}

fn log_outcome(target: &Target, outcome: &TargetOutcome) {
    match outcome {
        TargetOutcome::Updated => debug!(guild_id = target.guild_id, guild = %target.name, "nickname updated"),
        TargetOutcome::Unchanged => debug!(guild_id = target.guild_id, guild = %target.name, "nickname already current"),
        TargetOutcome::PermissionSkipped => {
            info!(guild_id = target.guild_id, guild = %target.name, "no nickname permission, skipped")
        }
        TargetOutcome::PartialFailure(reason) => {
            warn!(guild_id = target.guild_id, guild = %target.name, reason = %reason, "nickname update failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CastError;
    use crate::memory::{MemoryGuild, MemorySurface, SurfaceCall};
    use crate::targets::{CHANGE_NICKNAME, list_targets};
    use dx_core::display::Presence;

    const ME: u64 = 7;

    fn payload(name: &str) -> DisplayPayload {
        DisplayPayload {
            name: name.to_string(),
            status: "BTC Dominance: 52.34% ▲ +0.12pp 24h".into(),
            presence: Presence::Online,
        }
    }

    #[tokio::test]
    async fn one_failure_and_one_gap_do_not_block_the_third() {
        let mut rejecting = MemoryGuild::new(2, "rejecting", CHANGE_NICKNAME);
        rejecting.write_error = Some(CastError::Forbidden {
            status: 403,
            message: "Missing Permissions".into(),
        });
        let surface = MemorySurface::new(
            ME,
            vec![MemoryGuild::new(1, "no-perm", 0), rejecting, MemoryGuild::new(3, "ok", CHANGE_NICKNAME)],
        );

        let targets = list_targets(&surface, ME, None).await;
        let report = fan_out(&surface, &targets, &payload("BTC.D 52.34% ▲"), Duration::from_secs(5)).await;

        assert_eq!(report.outcome(1), Some(&TargetOutcome::PermissionSkipped));
        assert!(matches!(report.outcome(2), Some(TargetOutcome::PartialFailure(_))));
        assert_eq!(report.outcome(3), Some(&TargetOutcome::Updated));
        assert_eq!((report.updated(), report.skipped(), report.failed()), (1, 1, 1));
        assert_eq!(surface.nick(3).as_deref(), Some("BTC.D 52.34% ▲"));

        let writes: Vec<u64> = surface
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                SurfaceCall::SetDisplayName(id, _) => Some(id),
                _ => None,
            })
            .collect();
        assert!(!writes.contains(&1), "no write without capability");
        assert!(writes.contains(&2) && writes.contains(&3));
    }

    #[tokio::test]
    async fn overlong_name_is_truncated_before_write() {
        let surface = MemorySurface::new(ME, vec![MemoryGuild::new(1, "g", CHANGE_NICKNAME)]);
        let targets = list_targets(&surface, ME, None).await;
        let long = "X".repeat(50);
        let report = fan_out(&surface, &targets, &payload(&long), Duration::from_secs(5)).await;
        assert_eq!(report.updated(), 1);
        assert_eq!(surface.nick(1).unwrap().chars().count(), 32);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_target_times_out_alone() {
        let mut slow = MemoryGuild::new(1, "slow", CHANGE_NICKNAME);
        slow.write_delay = Some(Duration::from_secs(60));
        let surface = MemorySurface::new(ME, vec![slow, MemoryGuild::new(2, "fast", CHANGE_NICKNAME)]);
        let targets = list_targets(&surface, ME, None).await;

        let report = fan_out(&surface, &targets, &payload("BTC.D 52.34% ▲"), Duration::from_secs(10)).await;

        assert!(matches!(report.outcome(1), Some(TargetOutcome::PartialFailure(r)) if r.contains("timed out")));
        assert_eq!(report.outcome(2), Some(&TargetOutcome::Updated));
    }

    #[tokio::test]
    async fn identical_nickname_is_not_rewritten() {
        let mut current = MemoryGuild::new(1, "current", CHANGE_NICKNAME);
        current.nick = Some("BTC.D 52.34% ▲".into());
        let mut outdated = MemoryGuild::new(2, "outdated", CHANGE_NICKNAME);
        outdated.nick = Some("BTC.D 51.90% ▼".into());
        let surface = MemorySurface::new(ME, vec![current, outdated]);

        let targets = list_targets(&surface, ME, None).await;
        let report = fan_out(&surface, &targets, &payload("BTC.D 52.34% ▲"), Duration::from_secs(5)).await;

        assert_eq!(report.outcome(1), Some(&TargetOutcome::Unchanged));
        assert_eq!(report.outcome(2), Some(&TargetOutcome::Updated));
        assert_eq!(report.unchanged(), 1);
        assert!(!surface.calls().contains(&SurfaceCall::SetDisplayName(1, "BTC.D 52.34% ▲".into())));
        assert_eq!(surface.nick(2).as_deref(), Some("BTC.D 52.34% ▲"));
    }

    #[tokio::test]
    async fn status_failure_is_swallowed() {
        let surface = MemorySurface::new(ME, vec![]);
        assert!(publish_status(&surface, &payload("x")).await);
        surface.fail_status(CastError::Gateway("not connected".into()));
        assert!(!publish_status(&surface, &payload("x")).await);
    }

    #[tokio::test]
    async fn no_targets_is_an_empty_report() {
        let surface = MemorySurface::new(ME, vec![]);
        let report = fan_out(&surface, &[], &payload("x"), Duration::from_secs(1)).await;
        assert_eq!(report, CycleReport::default());
    }
}
