//! Scheduler - one independent timer actor per check target
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick ──┐
//!              ├─→ Check::run(target) ─→ (probe, apply, record, publish)
//! CheckNow ────┘
//!     ↑
//!     └─── Commands (CheckNow, Shutdown)
//! ```
//!
//! Every target gets its own actor and ticker, so timers never align across entities
//! and a slow check only delays its own target. The actor awaits each check before it
//! looks at the ticker again, and missed ticks are skipped rather than replayed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, ensure};
use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, instrument, trace, warn};

use super::messages::TimerCommand;
use crate::config::MAX_INTERVAL_SECS;
use crate::{CheckTarget, DeviceId};

/// The work a timer performs on every fire
#[async_trait]
pub trait Check: Send + Sync {
    async fn run(&self, target: CheckTarget);
}

/// Actor that fires the check of a single target
struct TimerActor {
    target: CheckTarget,
    period: Duration,
    check: Arc<dyn Check>,
    command_rx: mpsc::Receiver<TimerCommand>,
}

impl TimerActor {
    /// Run until a Shutdown command arrives or the handle is dropped
    #[instrument(skip(self), fields(target = %self.target, period = ?self.period))]
    async fn run(mut self) {
        debug!("starting timer");

        // first fire one full period after registration
        let Some(start) = Instant::now().checked_add(self.period) else {
            warn!("interval out of range, timer not started");
            return;
        };
        let mut ticker = interval_at(start, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(TimerCommand::CheckNow { respond_to }) => {
                            debug!("received CheckNow command");
                            self.check.run(self.target).await;
                            let _ = respond_to.send(());
                        }
                        Some(TimerCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }
                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    trace!("tick");
                    self.check.run(self.target).await;
                }
            }
        }

        debug!("timer stopped");
    }
}

/// Handle for controlling one timer actor
struct TimerHandle {
    sender: mpsc::Sender<TimerCommand>,
    join: JoinHandle<()>,
    period: Duration,
    check: Arc<dyn Check>,
}

impl TimerHandle {
    fn spawn(target: CheckTarget, period: Duration, check: Arc<dyn Check>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let actor = TimerActor {
            target,
            period,
            check: check.clone(),
            command_rx: cmd_rx,
        };

        Self {
            sender: cmd_tx,
            join: tokio::spawn(actor.run()),
            period,
            check,
        }
    }

    /// Stop the actor and wait for it, including any check it is running
    async fn stop(self) {
        let _ = self.sender.send(TimerCommand::Shutdown).await;
        if let Err(e) = self.join.await {
            warn!("timer task ended abnormally: {e}");
        }
    }
}

fn check_period(target: CheckTarget, period: Duration) -> Result<()> {
    ensure!(!period.is_zero(), "interval of {target} must be positive");
    ensure!(
        period <= Duration::from_secs(MAX_INTERVAL_SECS),
        "interval of {target} must not exceed {MAX_INTERVAL_SECS} seconds"
    );
    Ok(())
}

/// Owner of every timer, keyed by check target
///
/// Register, reschedule and unregister are atomic with respect to each other: the map
/// stays locked until the old actor has fully stopped.
#[derive(Default)]
pub struct Scheduler {
    timers: Mutex<HashMap<CheckTarget, TimerHandle>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a periodic timer for `target`, replacing an existing one
    pub async fn register(
        &self,
        target: CheckTarget,
        period: Duration,
        check: Arc<dyn Check>,
    ) -> Result<()> {
        check_period(target, period)?;

        let mut timers = self.timers.lock().await;
        if let Some(previous) = timers.remove(&target) {
            previous.stop().await;
        }
        timers.insert(target, TimerHandle::spawn(target, period, check));
        debug!(%target, ?period, "registered timer");
        Ok(())
    }

    /// Stop the timer of `target`
    ///
    /// Waits for an in-flight check; nothing fires for `target` once this returns.
    /// Returns whether a timer existed.
    pub async fn unregister(&self, target: CheckTarget) -> bool {
        let mut timers = self.timers.lock().await;
        match timers.remove(&target) {
            Some(handle) => {
                handle.stop().await;
                debug!(%target, "unregistered timer");
                true
            }
            None => false,
        }
    }

    /// Stop the ICMP timer and every service timer of a device
    pub async fn unregister_device(&self, device_id: DeviceId) -> usize {
        let mut timers = self.timers.lock().await;
        let targets: Vec<CheckTarget> = timers
            .keys()
            .filter(|t| t.device_id == device_id)
            .copied()
            .collect();

        let handles: Vec<TimerHandle> = targets
            .iter()
            .filter_map(|t| timers.remove(t))
            .collect();
        let count = handles.len();
        join_all(handles.into_iter().map(TimerHandle::stop)).await;

        debug!(device_id, count, "unregistered device timers");
        count
    }

    /// Restart the timer of `target` with a new period, dropping any pending fire
    ///
    /// Returns `Ok(false)` if `target` has no timer.
    pub async fn reschedule(&self, target: CheckTarget, period: Duration) -> Result<bool> {
        check_period(target, period)?;

        let mut timers = self.timers.lock().await;
        let Some(previous) = timers.remove(&target) else {
            return Ok(false);
        };
        let check = previous.check.clone();
        previous.stop().await;
        timers.insert(target, TimerHandle::spawn(target, period, check));
        debug!(%target, ?period, "rescheduled timer");
        Ok(true)
    }

    /// Run the check of `target` now, through its own timer actor
    ///
    /// Returns once the check has completed, or `false` if `target` has no timer.
    pub async fn trigger(&self, target: CheckTarget) -> bool {
        let sender = match self.timers.lock().await.get(&target) {
            Some(handle) => handle.sender.clone(),
            None => return false,
        };

        let (tx, rx) = oneshot::channel();
        if sender
            .send(TimerCommand::CheckNow { respond_to: tx })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.is_ok()
    }

    pub async fn is_registered(&self, target: CheckTarget) -> bool {
        self.timers.lock().await.contains_key(&target)
    }

    pub async fn interval_of(&self, target: CheckTarget) -> Option<Duration> {
        self.timers.lock().await.get(&target).map(|h| h.period)
    }

    pub async fn len(&self) -> usize {
        self.timers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.timers.lock().await.is_empty()
    }

    /// Stop every timer
    pub async fn shutdown_all(&self) {
        let mut timers = self.timers.lock().await;
        let handles: Vec<TimerHandle> = timers.drain().map(|(_, h)| h).collect();
        debug!("stopping {} timers", handles.len());
        join_all(handles.into_iter().map(TimerHandle::stop)).await;
    }
}

// ============================================================================
// Tests
// ============================================================================
