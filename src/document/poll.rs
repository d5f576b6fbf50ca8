//! Bounded polling for work done by an external process.
//!
//! The converter's exit and the appearance of its output are not synchronized,
//! so completion is judged by probing rather than by waiting on the child.

use std::path::Path;
use std::time::Duration;

use tokio::time::{Instant, sleep};

/// Timing of a poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// Delay between probes.
    pub interval: Duration,
    /// Total time allowed, measured from the first probe.
    pub ceiling: Duration,
    /// Extra time granted after the producer stops, or after output appears,
    /// before the result is trusted.
    pub grace: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            ceiling: Duration::from_secs(60),
            grace: Duration::from_secs(15),
        }
    }
}

/// What a single probe observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// The awaited result is present.
    Ready,
    /// Not yet; the producer is still running.
    Pending,
    /// Not yet, and the producer has stopped.
    Stopped,
}

/// Tri-state result of [`poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Succeeded,
    /// The producer stopped and nothing showed up within the grace period.
    Failed,
    /// The ceiling elapsed first.
    TimedOut,
}

/// Probe every `interval` until the probe reports [`Probe::Ready`], the
/// producer has been stopped for `grace`, or `ceiling` elapses.
pub async fn poll<F>(schedule: &PollSchedule, mut probe: F) -> PollOutcome
where
    F: FnMut() -> Probe,
{
    let started = Instant::now();
    let mut stopped_at: Option<Instant> = None;

    loop {
        match probe() {
            Probe::Ready => return PollOutcome::Succeeded,
            Probe::Stopped => {
                let since = *stopped_at.get_or_insert_with(Instant::now);
                if since.elapsed() >= schedule.grace {
                    return PollOutcome::Failed;
                }
            }
            Probe::Pending => {}
        }

        if started.elapsed() >= schedule.ceiling {
            return PollOutcome::TimedOut;
        }
        sleep(schedule.interval).await;
    }
}

/// Wait, within `grace`, until `path` has a non-zero size that holds steady
/// across two probes. Returns whether the file ended up non-empty.
pub async fn settle_file(path: &Path, schedule: &PollSchedule) -> bool {
    let deadline = Instant::now() + schedule.grace;
    let mut last_size: Option<u64> = None;

    loop {
        let size = tokio::fs::metadata(path).await.map(|m| m.len()).ok();
        match (last_size, size) {
            (Some(prev), Some(now)) if prev == now && now > 0 => return true,
            _ => last_size = size,
        }
        if Instant::now() >= deadline {
            return size.is_some_and(|s| s > 0);
        }
        sleep(schedule.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> PollSchedule {
        PollSchedule {
            interval: Duration::from_millis(5),
            ceiling: Duration::from_millis(100),
            grace: Duration::from_millis(20),
        }
    }

    #[test]
    fn default_schedule() {
        let s = PollSchedule::default();
        assert_eq!(s.interval, Duration::from_secs(1));
        assert_eq!(s.ceiling, Duration::from_secs(60));
        assert_eq!(s.grace, Duration::from_secs(15));
    }

    #[tokio::test]
    async fn ready_after_a_few_probes() {
        let mut probes = 0;
        let outcome = poll(&fast(), || {
            probes += 1;
            if probes == 3 { Probe::Ready } else { Probe::Pending }
        })
        .await;
        assert_eq!(outcome, PollOutcome::Succeeded);
        assert_eq!(probes, 3);
    }

    #[tokio::test]
    async fn never_ready_times_out() {
        let outcome = poll(&fast(), || Probe::Pending).await;
        assert_eq!(outcome, PollOutcome::TimedOut);
    }

    #[tokio::test]
    async fn stopped_producer_fails_after_grace() {
        let started = Instant::now();
        let outcome = poll(&fast(), || Probe::Stopped).await;
        assert_eq!(outcome, PollOutcome::Failed);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn late_output_within_grace_still_succeeds() {
        let mut probes = 0;
        let outcome = poll(&fast(), || {
            probes += 1;
            if probes >= 2 { Probe::Ready } else { Probe::Stopped }
        })
        .await;
        assert_eq!(outcome, PollOutcome::Succeeded);
    }

    #[tokio::test]
    async fn settle_accepts_stable_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.pdf");
        std::fs::write(&path, b"%PDF").unwrap();
        assert!(settle_file(&path, &fast()).await);
    }

    #[tokio::test]
    async fn settle_rejects_missing_or_empty_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.pdf");
        assert!(!settle_file(&path, &fast()).await);
        std::fs::write(&path, b"").unwrap();
        assert!(!settle_file(&path, &fast()).await);
    }
}
