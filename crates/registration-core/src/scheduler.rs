//! Refresh scheduling
//!
//! The scheduler task sleeps until the [`RefreshTimer`] is due, re-arms it for
//! another period and launches a refresh cycle on its own task. Each cycle
//! re-arms the timer from its outcome when it finishes, so the period after a
//! success follows the accepted expiry and the period after a failure follows
//! the retry interval.
//!
//! Cycles never overlap. A timer or manual firing that finds a cycle still
//! running is dropped, not queued. The first firing after a start is the
//! exception: it waits for the previous stop's removal and for any cancelled
//! cycle to let go of the guard.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::agent::AgentShared;
use crate::attempt::CycleMode;
use crate::expiry::REGISTRATION_HEAD_TIME;
use crate::state::CycleOutcome;

/// Caller hook mapping the negotiated expiry to the delay before the next refresh, in seconds
///
/// Results below [`MIN_REFRESH_DELAY`] are raised to it.
pub type RefreshTimeFn = Arc<dyn Fn(u32) -> u32 + Send + Sync>;

/// Shortest delay between refreshes a [`RefreshTimeFn`] can choose, in seconds
pub const MIN_REFRESH_DELAY: u32 = 1;

/// What triggered a refresh cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Firing {
    /// First firing after `start`
    Start,
    /// Timer expiry or a manual refresh
    Refresh,
}

#[derive(Debug)]
struct TimerState {
    due: Instant,
    period: Duration,
}

/// Re-armable periodic timer
#[derive(Debug)]
pub(crate) struct RefreshTimer {
    state: Mutex<TimerState>,
    changed: Notify,
}

impl RefreshTimer {
    /// A timer that is due immediately and repeats every `period`
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            state: Mutex::new(TimerState {
                due: Instant::now(),
                period,
            }),
            changed: Notify::new(),
        }
    }

    pub(crate) fn due(&self) -> Instant {
        self.state.lock().due
    }

    pub(crate) fn period(&self) -> Duration {
        self.state.lock().period
    }

    /// Fire after `delay` and every `delay` after that
    pub(crate) fn change(&self, delay: Duration) {
        {
            let mut state = self.state.lock();
            state.due = Instant::now() + delay;
            state.period = delay;
        }
        self.changed.notify_one();
    }

    /// Fire right away, keeping the current period
    pub(crate) fn fire_now(&self) {
        self.state.lock().due = Instant::now();
        self.changed.notify_one();
    }

    fn advance(&self) {
        let mut state = self.state.lock();
        state.due = Instant::now() + state.period;
    }
}

/// A running scheduler task
pub(crate) struct SchedulerHandle {
    pub(crate) cancel: CancellationToken,
    pub(crate) timer: Arc<RefreshTimer>,
    _task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub(crate) fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

/// Spawn the scheduler loop with a timer that fires immediately
pub(crate) fn spawn_scheduler(
    runtime: &tokio::runtime::Handle,
    shared: Arc<AgentShared>,
    period: Duration,
) -> SchedulerHandle {
    let cancel = CancellationToken::new();
    let timer = Arc::new(RefreshTimer::new(period));

    let task = runtime.spawn(scheduler_loop(shared, timer.clone(), cancel.clone()));

    SchedulerHandle {
        cancel,
        timer,
        _task: task,
    }
}

async fn scheduler_loop(shared: Arc<AgentShared>, timer: Arc<RefreshTimer>, cancel: CancellationToken) {
    debug!(period = ?timer.period(), "refresh scheduler started");

    let mut firing = Firing::Start;
    loop {
        let due = timer.due();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = timer.changed.notified() => continue,
            _ = sleep_until(due) => {
                timer.advance();
                let shared = shared.clone();
                let timer = timer.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    run_refresh_cycle(&shared, &timer, &cancel, firing).await;
                });
                firing = Firing::Refresh;
            }
        }
    }

    debug!("refresh scheduler stopped");
}

/// Run one refresh cycle, then re-arm the timer
///
/// Returns `None` when the firing was dropped or the agent stopped before
/// the cycle could begin.
pub(crate) async fn run_refresh_cycle(
    shared: &AgentShared,
    timer: &RefreshTimer,
    cancel: &CancellationToken,
    firing: Firing,
) -> Option<CycleOutcome> {
    let guard = match firing {
        Firing::Start => {
            let removal = shared.removal.lock().take();
            tokio::select! {
                guard = async {
                    if let Some(removal) = removal {
                        debug!("waiting for previous registration removal");
                        let _ = removal.await;
                    }
                    shared.cycle_guard.lock().await
                } => guard,
                _ = cancel.cancelled() => return None,
            }
        }
        Firing::Refresh => match shared.cycle_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("refresh cycle already in progress, dropping timer firing");
                return None;
            }
        },
    };
    if cancel.is_cancelled() || shared.session.lock().is_stopping {
        return None;
    }

    let outcome = run_guarded_cycle(shared, CycleMode::Refresh, cancel).await;
    drop(guard);
    if outcome == CycleOutcome::Cancelled {
        return Some(outcome);
    }

    let (stopping, registered, expiry, expiry_pending) = {
        let session = shared.session.lock();
        (
            session.is_stopping,
            session.is_registered,
            session.requested_expiry,
            session.expiry_pending,
        )
    };

    if stopping {
        debug!("session is stopping, not scheduling another refresh");
        cancel.cancel();
        return Some(outcome);
    }

    if expiry_pending {
        debug!(expiry, "requested expiry changed during the cycle, refreshing now");
        timer.fire_now();
        return Some(outcome);
    }

    let delay = next_delay(
        registered,
        expiry,
        shared.refresh_time.as_ref(),
        shared.retry_interval,
    );
    debug!(registered, expiry, delay = ?delay, "next refresh scheduled");
    timer.change(delay);

    Some(outcome)
}

/// Enter a cycle and run it, treating a panic as a failed cycle
///
/// The caller must hold the cycle guard.
pub(crate) async fn run_guarded_cycle(
    shared: &AgentShared,
    mode: CycleMode,
    cancel: &CancellationToken,
) -> CycleOutcome {
    let coordinator = &shared.coordinator;
    coordinator.state().begin_cycle();

    match AssertUnwindSafe(coordinator.run_cycle(mode, cancel))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(panic = %message, "registration cycle panicked");
            coordinator
                .state()
                .temporary_failure(None, format!("internal error: {}", message))
                .await
        }
    }
}

/// Delay before the next cycle
fn next_delay(
    registered: bool,
    expiry: u32,
    refresh_time: Option<&RefreshTimeFn>,
    retry_interval: Duration,
) -> Duration {
    if !registered {
        return retry_interval;
    }
    let seconds = match refresh_time {
        Some(hook) => hook(expiry).max(MIN_REFRESH_DELAY),
        None => expiry.saturating_sub(REGISTRATION_HEAD_TIME),
    };
    Duration::from_secs(u64::from(seconds))
}
