//! Timers driving a reconnection flow.
//!
//! The status poll is sequential: the next check is scheduled only after the
//! previous one finishes. QR requests run independently of it, so a slow check
//! never holds back a manual refresh. The QR refresh timer is armed only while
//! the flow is reconnecting and dropped as soon as it leaves that state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{CheckOutcome, ConnectionStatus, ReconnectionFlow};
use crate::client::ReconnectApi;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSchedule {
    pub poll_interval: Duration,
    pub qr_refresh_interval: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            qr_refresh_interval: Duration::from_secs(30),
        }
    }
}

/// Handle to a running flow. Dropping it stops both timers.
pub struct ReconnectTask {
    handle: JoinHandle<()>,
    refresh_tx: mpsc::Sender<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ReconnectTask {
    pub fn spawn<A>(flow: Arc<ReconnectionFlow<A>>, schedule: PollSchedule) -> Self
    where
        A: ReconnectApi + 'static,
    {
        let (refresh_tx, refresh_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run(flow, schedule, refresh_rx, shutdown_rx));

        Self {
            handle,
            refresh_tx,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Ask for a new QR code now. Extra requests while one is queued are dropped.
    pub fn refresh_qr(&self) {
        if self.refresh_tx.try_send(()).is_err() {
            debug!("Manual QR refresh already queued");
        }
    }

    /// Stop polling and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.handle).await;
    }
}

impl Drop for ReconnectTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn spawn_refresh<A>(requests: &mut JoinSet<()>, flow: &Arc<ReconnectionFlow<A>>)
where
    A: ReconnectApi + 'static,
{
    let flow = flow.clone();
    requests.spawn(async move {
        flow.refresh_qr().await;
    });
}

async fn run<A>(
    flow: Arc<ReconnectionFlow<A>>,
    schedule: PollSchedule,
    mut refresh_rx: mpsc::Receiver<()>,
    mut shutdown_rx: oneshot::Receiver<()>,
) where
    A: ReconnectApi + 'static,
{
    let poll = time::sleep(Duration::ZERO);
    tokio::pin!(poll);
    let mut qr_timer: Option<Interval> = None;

    // Checks and QR requests run beside the loop so neither waits on the
    // other. Dropping the sets aborts whatever is still in flight.
    let mut checks: JoinSet<CheckOutcome> = JoinSet::new();
    let mut qr_requests: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,

            () = &mut poll, if checks.is_empty() => {
                let flow = flow.clone();
                checks.spawn(async move { flow.check_status().await });
            }

            Some(outcome) = checks.join_next() => {
                match outcome {
                    Ok(CheckOutcome::Terminal) => {
                        info!("Instance identifier is unusable, polling stopped");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Status check task failed: {}", e),
                }
                poll.as_mut().reset(Instant::now() + schedule.poll_interval);
            }

            () = tick(&mut qr_timer) => {
                debug!("QR refresh timer fired");
                spawn_refresh(&mut qr_requests, &flow);
            }

            Some(()) = refresh_rx.recv() => {
                debug!("Manual QR refresh");
                spawn_refresh(&mut qr_requests, &flow);
            }

            Some(_) = qr_requests.join_next() => {}
        }

        // Keep the refresh timer in step with the status.
        if flow.status().await == ConnectionStatus::Reconnecting {
            if qr_timer.is_none() {
                let period = schedule.qr_refresh_interval;
                let mut interval = time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                qr_timer = Some(interval);
            }
        } else if qr_timer.take().is_some() {
            debug!("QR refresh timer stopped");
        }
    }
}
