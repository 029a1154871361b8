//! Bounded-attempt polling primitive.
//!
//! A [`ReconciliationPoller`] owns at most one poll loop. The loop calls its
//! function immediately and then once per interval until the function reports
//! completion, the attempt budget runs out, or the poller is stopped.
//!
//! Every loop carries its own active flag. The flag is checked before each
//! invocation and after each wait, so a `stop` that lands while a tick is
//! already scheduled still prevents the next call.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::domain::models::PollingConfig;

/// Interval and attempt budget for one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollConfig {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl From<&PollingConfig> for PollConfig {
    fn from(config: &PollingConfig) -> Self {
        Self::new(config.interval(), config.max_attempts)
    }
}

/// How a poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The function reported completion.
    Done { attempts: u32 },
    /// The attempt budget ran out.
    Exhausted {
        attempts: u32,
        last_error: Option<String>,
    },
    /// `stop` was called, or a newer loop replaced this one.
    Stopped { attempts: u32 },
}

impl PollOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Done { attempts } | Self::Exhausted { attempts, .. } | Self::Stopped { attempts } => {
                *attempts
            }
        }
    }
}

struct LoopGuard {
    active: AtomicBool,
    wake: Notify,
}

impl LoopGuard {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            wake: Notify::new(),
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        // notify_one stores a permit, so a loop that is not yet waiting still wakes.
        self.wake.notify_one();
    }
}

/// Handle owning at most one poll loop.
#[derive(Clone, Default)]
pub struct ReconciliationPoller {
    current: Arc<Mutex<Option<Arc<LoopGuard>>>>,
}

/// A started poll loop.
pub struct PollRun {
    handle: JoinHandle<PollOutcome>,
}

impl PollRun {
    /// Wait for the loop to finish.
    pub async fn outcome(self) -> PollOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "poll loop task ended abnormally");
                PollOutcome::Stopped { attempts: 0 }
            }
        }
    }
}

impl ReconciliationPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start polling `f`, stopping any loop this handle already owns.
    ///
    /// `f` returns `Ok(true)` once the polled condition is finished. Errors
    /// are logged and count as attempts; they never end the loop alone.
    pub fn start<F, Fut, E>(&self, config: PollConfig, f: F) -> PollRun
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<bool, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let guard = Arc::new(LoopGuard::new());
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(&guard));
        if let Some(previous) = previous {
            previous.stop();
        }

        PollRun {
            handle: tokio::spawn(run_loop(guard, config, f)),
        }
    }

    /// Stop the current loop. Safe to call any number of times.
    pub fn stop(&self) {
        let current = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(guard) = current {
            guard.stop();
        }
    }

    pub fn is_active(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|guard| guard.is_active())
    }
}

async fn run_loop<F, Fut, E>(guard: Arc<LoopGuard>, config: PollConfig, mut f: F) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempts = 0;
    let mut last_error = None;

    loop {
        if !guard.is_active() {
            return PollOutcome::Stopped { attempts };
        }

        attempts += 1;
        match f().await {
            Ok(true) => {
                guard.active.store(false, Ordering::SeqCst);
                return PollOutcome::Done { attempts };
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(attempt = attempts, max_attempts, error = %err, "poll attempt failed");
                last_error = Some(err.to_string());
            }
        }

        if !guard.is_active() {
            return PollOutcome::Stopped { attempts };
        }
        if attempts >= max_attempts {
            guard.active.store(false, Ordering::SeqCst);
            return PollOutcome::Exhausted {
                attempts,
                last_error,
            };
        }

        tokio::select! {
            () = tokio::time::sleep(config.interval) => {}
            () = guard.wake.notified() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counting(
        calls: &Arc<AtomicU32>,
        done_at: Option<u32>,
    ) -> impl FnMut() -> std::future::Ready<Result<bool, String>> + Send + 'static {
        let calls = Arc::clone(calls);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(Ok(done_at.is_some_and(|d| n >= d)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_when_function_reports_finished() {
        let calls = Arc::new(AtomicU32::new(0));
        let poller = ReconciliationPoller::new();
        let run = poller.start(
            PollConfig::new(Duration::from_secs(1), 10),
            counting(&calls, Some(3)),
        );

        assert_eq!(run.outcome().await, PollOutcome::Done { attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!poller.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempt_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let poller = ReconciliationPoller::new();
        let run = poller.start(
            PollConfig::new(Duration::from_millis(1000), 5),
            counting(&calls, None),
        );

        let outcome = run.outcome().await;
        assert_eq!(
            outcome,
            PollOutcome::Exhausted {
                attempts: 5,
                last_error: None
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_do_not_stop_polling() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let poller = ReconciliationPoller::new();
        let run = poller.start(PollConfig::new(Duration::from_millis(50), 4), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 4 {
                    Err(format!("connection reset #{n}"))
                } else {
                    Ok(true)
                }
            }
        });

        assert_eq!(run.outcome().await, PollOutcome::Done { attempts: 4 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_error_reported_on_exhaustion() {
        let poller = ReconciliationPoller::new();
        let run = poller.start(PollConfig::new(Duration::from_millis(10), 2), || async {
            Err::<bool, _>("backend down")
        });

        match run.outcome().await {
            PollOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_error.as_deref(), Some("backend down"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_scheduled_tick() {
        let calls = Arc::new(AtomicU32::new(0));
        let poller = ReconciliationPoller::new();
        let run = poller.start(
            PollConfig::new(Duration::from_secs(1), 100),
            counting(&calls, None),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(poller.is_active());

        poller.stop();
        poller.stop();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(run.outcome().await, PollOutcome::Stopped { attempts: 1 });
        assert!(!poller.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_stops_previous_loop() {
        let first_calls = Arc::new(AtomicU32::new(0));
        let second_calls = Arc::new(AtomicU32::new(0));
        let poller = ReconciliationPoller::new();

        let first = poller.start(
            PollConfig::new(Duration::from_secs(1), 100),
            counting(&first_calls, None),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = poller.start(
            PollConfig::new(Duration::from_secs(1), 3),
            counting(&second_calls, None),
        );

        assert_eq!(first.outcome().await, PollOutcome::Stopped { attempts: 1 });
        assert_eq!(second.outcome().await.attempts(), 3);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_without_loop_is_noop() {
        let poller = ReconciliationPoller::new();
        poller.stop();
        assert!(!poller.is_active());
    }
}
