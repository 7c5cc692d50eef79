//! Per-instance execution-budget watchdog.
//!
//! Each loaded instance gets a [`Watchdog`] armed with the wall-clock
//! execution budget. If the instance does not report `ready` before the
//! budget elapses, the watchdog injects `fatal("timeout")` into the
//! instance's event stream; the controller then tears the instance down.
//!
//! With a liveness window configured, reaching `ready` does not stop the
//! watchdog: it then expects a heartbeat at least once per window, so code
//! that starts looping after `ready` is still reported as a timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::models::event::{EventKind, InstanceId};

/// Reason reported when the execution budget is exceeded.
pub const TIMEOUT_REASON: &str = "timeout";

/// Builder for an execution-budget watchdog.
///
/// Call [`spawn`](Self::spawn) to start the timer.
pub struct Watchdog {
    instance_id: InstanceId,
    budget: Duration,
    liveness: Option<Duration>,
    fatal_tx: mpsc::Sender<EventKind>,
    cancel: CancellationToken,
}

impl Watchdog {
    /// Construct a watchdog (does not start the timer yet).
    #[must_use]
    pub fn new(
        instance_id: InstanceId,
        budget: Duration,
        fatal_tx: mpsc::Sender<EventKind>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            instance_id,
            budget,
            liveness: None,
            fatal_tx,
            cancel,
        }
    }

    /// Keep watching after `ready`, firing when no heartbeat arrives within
    /// `window`. `None` stops the watchdog at `ready`.
    #[must_use]
    pub fn with_liveness(mut self, window: Option<Duration>) -> Self {
        self.liveness = window;
        self
    }

    /// Spawn the timer task and return a handle for disarming it.
    #[must_use]
    pub fn spawn(self) -> WatchdogHandle {
        let signals = Arc::new(Signals::default());
        let cancel = self.cancel.child_token();

        let join_handle = tokio::spawn(
            Self::run(
                self.instance_id,
                self.budget,
                self.liveness,
                self.fatal_tx,
                cancel.clone(),
                Arc::clone(&signals),
            )
            .instrument(info_span!("watchdog", instance_id = %self.instance_id)),
        );

        WatchdogHandle {
            signals,
            join_handle: Some(join_handle),
            cancel,
        }
    }

    async fn run(
        instance_id: InstanceId,
        budget: Duration,
        liveness: Option<Duration>,
        fatal_tx: mpsc::Sender<EventKind>,
        cancel: CancellationToken,
        signals: Arc<Signals>,
    ) {
        // ── Initial execution: wait for `ready` within the budget ──
        let ready = tokio::select! {
            () = cancel.cancelled() => {
                debug!(%instance_id, "watchdog cancelled");
                return;
            }
            () = signals.ready.notified() => true,
            () = tokio::time::sleep(budget) => false,
        };
        if !ready {
            warn!(%instance_id, budget_ms = millis(budget), "execution budget exceeded");
            Self::fire(instance_id, &fatal_tx, &signals).await;
            return;
        }

        let Some(window) = liveness else {
            debug!(%instance_id, "watchdog disarmed");
            return;
        };
        debug!(%instance_id, window_ms = millis(window), "watchdog: ready, awaiting heartbeats");

        // ── Running: every window must see a heartbeat ──
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(%instance_id, "watchdog cancelled");
                    return;
                }
                () = signals.heartbeat.notified() => {}
                () = tokio::time::sleep(window) => {
                    warn!(%instance_id, window_ms = millis(window), "no heartbeat within liveness window");
                    Self::fire(instance_id, &fatal_tx, &signals).await;
                    return;
                }
            }
        }
    }

    async fn fire(instance_id: InstanceId, fatal_tx: &mpsc::Sender<EventKind>, signals: &Signals) {
        signals.expired.store(true, Ordering::SeqCst);
        let fatal = EventKind::Fatal {
            reason: TIMEOUT_REASON.into(),
        };
        if fatal_tx.send(fatal).await.is_err() {
            debug!(%instance_id, "watchdog: event stream already closed");
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Default)]
struct Signals {
    ready: Notify,
    heartbeat: Notify,
    expired: AtomicBool,
}

/// Handle returned from [`Watchdog::spawn`].
///
/// Dropping the handle stops the timer.
pub struct WatchdogHandle {
    signals: Arc<Signals>,
    join_handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl WatchdogHandle {
    /// Stop the budget timer without firing (call when `ready` arrives).
    /// With a liveness window the watchdog then waits for heartbeats.
    pub fn disarm(&self) {
        self.signals.ready.notify_one();
    }

    /// Restart the liveness window.
    pub fn heartbeat(&self) {
        self.signals.heartbeat.notify_one();
    }

    /// Whether the watchdog fired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.signals.expired.load(Ordering::SeqCst)
    }

    /// Stop the timer and wait for its task to exit.
    pub async fn await_completion(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}
