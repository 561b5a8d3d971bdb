//! Repeated probing until a freshly issued key becomes active.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tracing::info;

use crate::model::{ProbeOutcome, ProbeRequest};
use crate::probe::KeyProber;

/// Granularity at which cancellation is noticed while waiting between probes.
const CANCEL_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorReport {
    /// Outcome of the last probe performed.
    pub outcome: ProbeOutcome,
    pub attempts: u32,
    pub cancelled: bool,
    pub finished_at: DateTime<Utc>,
}

impl MonitorReport {
    pub fn is_active(&self) -> bool {
        self.outcome.is_active()
    }
}

/// Single check, no waiting.
pub async fn check_once(prober: &dyn KeyProber, request: &ProbeRequest) -> MonitorReport {
    let outcome = prober.probe(request).await;
    MonitorReport {
        outcome,
        attempts: 1,
        cancelled: false,
        finished_at: Utc::now(),
    }
}

pub async fn monitor_until_active<C>(
    prober: &dyn KeyProber,
    request: &ProbeRequest,
    interval: Duration,
    is_cancelled: C,
) -> MonitorReport
where
    C: Fn() -> bool,
{
    monitor_until_active_with(prober, request, interval, is_cancelled, |_, _| {}).await
}

/// Probe every `interval` until the key is active or `is_cancelled` returns true.
///
/// Cancellation is checked after each probe and while waiting, never during a
/// request. `on_attempt` sees every outcome, including the last one.
pub async fn monitor_until_active_with<C, F>(
    prober: &dyn KeyProber,
    request: &ProbeRequest,
    interval: Duration,
    is_cancelled: C,
    mut on_attempt: F,
) -> MonitorReport
where
    C: Fn() -> bool,
    F: FnMut(u32, &ProbeOutcome),
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let outcome = prober.probe(request).await;
        on_attempt(attempts, &outcome);

        if outcome.is_active() {
            info!(attempts, city = %request.city, "key is active");
            return MonitorReport {
                outcome,
                attempts,
                cancelled: false,
                finished_at: Utc::now(),
            };
        }

        if is_cancelled() || wait_unless_cancelled(interval, &is_cancelled).await {
            info!(attempts, "monitoring cancelled");
            return MonitorReport {
                outcome,
                attempts,
                cancelled: true,
                finished_at: Utc::now(),
            };
        }

        info!(attempts, next_in_secs = interval.as_secs(), "key not active yet");
    }
}

/// Sleep for `interval`; returns true as soon as cancellation is observed.
async fn wait_unless_cancelled<C>(interval: Duration, is_cancelled: &C) -> bool
where
    C: Fn() -> bool,
{
    let deadline = Instant::now() + interval;

    while Instant::now() < deadline {
        sleep_until(deadline.min(Instant::now() + CANCEL_POLL)).await;
        if is_cancelled() {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProbeSettings;
    use crate::probe::fake::{ScriptedProber, active, unauthorized};
    use std::cell::Cell;

    fn request() -> ProbeRequest {
        ProbeRequest::new("key", "London,uk", &ProbeSettings::default())
    }

    #[tokio::test]
    async fn cancellation_after_first_iteration_probes_once() {
        let prober = ScriptedProber::new(vec![unauthorized()]);

        let report =
            monitor_until_active(&prober, &request(), Duration::from_secs(300), || true).await;

        assert_eq!(prober.call_count(), 1);
        assert_eq!(report.attempts, 1);
        assert!(report.cancelled);
        assert_eq!(report.outcome, unauthorized());
    }

    #[tokio::test]
    async fn stops_when_key_becomes_active() {
        let prober = ScriptedProber::new(vec![unauthorized(), unauthorized(), active(12.0)]);

        let report = monitor_until_active(&prober, &request(), Duration::ZERO, || false).await;

        assert_eq!(prober.call_count(), 3);
        assert_eq!(report.attempts, 3);
        assert!(report.is_active());
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn active_on_first_probe_ignores_cancellation() {
        let prober = ScriptedProber::new(vec![active(5.0)]);

        let report = monitor_until_active(&prober, &request(), Duration::ZERO, || true).await;

        assert!(report.is_active());
        assert!(!report.cancelled);
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test]
    async fn observer_sees_every_attempt() {
        let prober = ScriptedProber::new(vec![unauthorized(), active(1.0)]);
        let mut seen = Vec::new();

        monitor_until_active_with(
            &prober,
            &request(),
            Duration::ZERO,
            || false,
            |attempt, outcome| seen.push((attempt, outcome.is_active())),
        )
        .await;

        assert_eq!(seen, [(1, false), (2, true)]);
    }

    #[tokio::test]
    async fn cancellation_during_wait_stops_before_next_probe() {
        let prober = ScriptedProber::new(vec![unauthorized()]);
        let checks = Cell::new(0);

        // First check (right after the probe) says keep going; the check
        // during the wait cancels.
        let report = monitor_until_active(&prober, &request(), Duration::from_millis(10), || {
            checks.set(checks.get() + 1);
            checks.get() > 1
        })
        .await;

        assert_eq!(prober.call_count(), 1);
        assert!(report.cancelled);
    }

    #[tokio::test]
    async fn check_once_probes_exactly_once() {
        let prober = ScriptedProber::new(vec![unauthorized()]);

        let report = check_once(&prober, &request()).await;

        assert_eq!(prober.call_count(), 1);
        assert_eq!(report.attempts, 1);
        assert!(!report.is_active());
    }
}
