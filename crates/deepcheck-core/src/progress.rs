//! Synthetic progress shown while an analysis is in flight.
//!
//! The percentage follows a fixed time schedule and is unrelated to the real
//! request. It never reaches 100 on its own; completion comes from the
//! workflow when the verdict arrives. Each presenter belongs to one attempt
//! and is cancelled when that attempt is reset, superseded, or dropped.

use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Emit `percent` once `after` has elapsed since the attempt started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressStep {
    pub after: Duration,
    pub percent: u8,
}

impl ProgressStep {
    pub const fn at_millis(after_ms: u64, percent: u8) -> Self {
        Self {
            after: Duration::from_millis(after_ms),
            percent,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("progress step {percent}% must stay below 100%")]
    ReachesCompletion { percent: u8 },
    #[error("progress steps must be non-decreasing in time and percentage")]
    NotMonotonic,
}

/// Validated, ordered list of progress steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSchedule {
    steps: Vec<ProgressStep>,
}

impl ProgressSchedule {
    pub fn new(steps: Vec<ProgressStep>) -> Result<Self, ScheduleError> {
        if let Some(step) = steps.iter().find(|s| s.percent >= 100) {
            return Err(ScheduleError::ReachesCompletion {
                percent: step.percent,
            });
        }
        let monotonic = steps
            .windows(2)
            .all(|w| w[0].after <= w[1].after && w[0].percent <= w[1].percent);
        if !monotonic {
            return Err(ScheduleError::NotMonotonic);
        }
        Ok(Self { steps })
    }

    /// A schedule that never ticks.
    pub fn none() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn steps(&self) -> &[ProgressStep] {
        &self.steps
    }
}

impl Default for ProgressSchedule {
    /// 10% at 100ms, 30% at 500ms, 65% at 1s, 85% at 1.8s.
    fn default() -> Self {
        Self {
            steps: vec![
                ProgressStep::at_millis(100, 10),
                ProgressStep::at_millis(500, 30),
                ProgressStep::at_millis(1000, 65),
                ProgressStep::at_millis(1800, 85),
            ],
        }
    }
}

/// Owned timer set for one attempt.
pub struct ProgressPresenter {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ProgressPresenter {
    /// Start ticking. `emit` runs on the runtime for each step until the
    /// schedule ends or the presenter is cancelled.
    pub fn start<F>(schedule: &ProgressSchedule, mut emit: F) -> Self
    where
        F: FnMut(u8) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let steps = schedule.steps.clone();
        let started = Instant::now();

        let task = tokio::spawn(async move {
            for step in steps {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep_until(started + step.after) => {}
                }
                if token.is_cancelled() {
                    return;
                }
                tracing::trace!(percent = step.percent, "progress tick");
                emit(step.percent);
            }
        });

        Self { cancel, task }
    }

    /// Stop all pending ticks. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True once every step has fired or the presenter was cancelled and
    /// its task has wound down.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ProgressPresenter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<u8>>>, impl FnMut(u8) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |p| sink.lock().unwrap().push(p))
    }

    #[test]
    fn test_schedule_rejects_completion() {
        let err = ProgressSchedule::new(vec![ProgressStep::at_millis(10, 100)]).unwrap_err();
        assert_eq!(err, ScheduleError::ReachesCompletion { percent: 100 });
    }

    #[test]
    fn test_schedule_rejects_decreasing_steps() {
        let steps = vec![ProgressStep::at_millis(100, 50), ProgressStep::at_millis(200, 40)];
        assert_eq!(ProgressSchedule::new(steps).unwrap_err(), ScheduleError::NotMonotonic);
        let steps = vec![ProgressStep::at_millis(300, 10), ProgressStep::at_millis(200, 40)];
        assert_eq!(ProgressSchedule::new(steps).unwrap_err(), ScheduleError::NotMonotonic);
    }

    #[test]
    fn test_default_schedule_is_valid() {
        let default = ProgressSchedule::default();
        assert_eq!(ProgressSchedule::new(default.steps().to_vec()).unwrap(), default);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_follow_schedule() {
        let (seen, emit) = recorder();
        let presenter = ProgressPresenter::start(&ProgressSchedule::default(), emit);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*seen.lock().unwrap(), vec![10]);

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(*seen.lock().unwrap(), vec![10, 30, 65]);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(*seen.lock().unwrap(), vec![10, 30, 65, 85]);
        assert!(presenter.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_pending_ticks() {
        let (seen, emit) = recorder();
        let presenter = ProgressPresenter::start(&ProgressSchedule::default(), emit);

        tokio::time::sleep(Duration::from_millis(600)).await;
        presenter.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(*seen.lock().unwrap(), vec![10, 30]);
        assert!(presenter.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let (seen, emit) = recorder();
        drop(ProgressPresenter::start(&ProgressSchedule::default(), emit));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_emits_completion() {
        let (seen, emit) = recorder();
        let _presenter = ProgressPresenter::start(&ProgressSchedule::default(), emit);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(seen.lock().unwrap().iter().all(|&p| p < 100));
    }
}
