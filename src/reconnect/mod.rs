//! Reconnection state machine.
//!
//! One `ReconnectionFlow` per instance session. Each status check asks the
//! gateway for the session state and, while the session is down, keeps a
//! pairing QR code on hand. Timers live in [`scheduler`].

mod scheduler;

pub use scheduler::{PollSchedule, ReconnectTask};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::client::{ClientError, GatewayState, QrPayload, ReconnectApi};
use crate::instance::InstanceId;

/// While reconnecting, a QR already on hand is regenerated every this many checks.
pub const QR_REGENERATE_EVERY: u64 = 6;

/// Connection status shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Checking,
    Reconnecting,
    Connected,
    Error,
}

/// Point-in-time view of a flow, what the presentation layer renders
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectSnapshot {
    pub instance: String,
    pub status: ConnectionStatus,
    pub qr: Option<QrPayload>,
    pub error: Option<String>,
    pub attempts: u64,
    pub checked_at: Option<DateTime<Utc>>,
}

/// Events published to subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReconnectEvent {
    Snapshot(ReconnectSnapshot),
    /// Fired once per session, the first time the instance reports open
    Connected { instance: String },
}

/// Result of one status check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Another check was in flight
    Skipped,
    /// The identifier is unusable, polling should stop
    Terminal,
    Completed(ConnectionStatus),
}

/// Result of one QR request
#[derive(Debug)]
pub enum QrRequest {
    Updated,
    /// Another QR request was in flight
    Skipped,
    Failed(ClientError),
}

#[derive(Debug)]
struct FlowState {
    status: ConnectionStatus,
    qr: Option<QrPayload>,
    error: Option<String>,
    attempts: u64,
    checked_at: Option<DateTime<Utc>>,
}

/// Releases an in-flight flag when dropped
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ReconnectionFlow<A> {
    api: A,
    instance: Option<InstanceId>,
    raw_instance: String,
    state: RwLock<FlowState>,
    checking: AtomicBool,
    requesting_qr: AtomicBool,
    connected_notified: AtomicBool,
    events: broadcast::Sender<ReconnectEvent>,
}

impl<A: ReconnectApi> ReconnectionFlow<A> {
    pub fn new(api: A, instance: &str) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            api,
            instance: InstanceId::parse(instance).filter(InstanceId::is_strict),
            raw_instance: instance.trim().to_string(),
            state: RwLock::new(FlowState {
                status: ConnectionStatus::Checking,
                qr: None,
                error: None,
                attempts: 0,
                checked_at: None,
            }),
            checking: AtomicBool::new(false),
            requesting_qr: AtomicBool::new(false),
            connected_notified: AtomicBool::new(false),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReconnectEvent> {
        self.events.subscribe()
    }

    /// Whether the identifier is blank or malformed, in which case nothing
    /// will ever be polled
    pub fn is_terminal(&self) -> bool {
        self.instance.is_none()
    }

    fn input_error(&self) -> ClientError {
        if self.raw_instance.is_empty() {
            ClientError::MissingInstance
        } else {
            ClientError::InvalidInstance
        }
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.state.read().await.status
    }

    pub async fn snapshot(&self) -> ReconnectSnapshot {
        let state = self.state.read().await;
        self.snapshot_of(&state)
    }

    fn snapshot_of(&self, state: &FlowState) -> ReconnectSnapshot {
        ReconnectSnapshot {
            instance: self.raw_instance.clone(),
            status: state.status,
            qr: state.qr.clone(),
            error: state.error.clone(),
            attempts: state.attempts,
            checked_at: state.checked_at,
        }
    }

    /// Apply `f` to the state and publish the resulting snapshot.
    async fn update<R>(&self, f: impl FnOnce(&mut FlowState) -> R) -> R {
        let (result, snapshot) = {
            let mut state = self.state.write().await;
            let result = f(&mut state);
            (result, self.snapshot_of(&state))
        };
        // No subscribers is fine
        let _ = self.events.send(ReconnectEvent::Snapshot(snapshot));
        result
    }

    async fn fail(&self, message: String) {
        self.update(|s| {
            s.status = ConnectionStatus::Error;
            s.error = Some(message);
        })
        .await;
    }

    /// Run one status check.
    ///
    /// A check that finds another one in flight returns `Skipped` without
    /// touching the gateway.
    pub async fn check_status(&self) -> CheckOutcome {
        let Some(_guard) = InFlight::try_acquire(&self.checking) else {
            debug!("Status check already in flight, skipping");
            return CheckOutcome::Skipped;
        };

        let Some(instance) = self.instance.clone() else {
            self.fail(self.input_error().to_string()).await;
            return CheckOutcome::Terminal;
        };

        let result = self.api.connection_state(instance.as_str()).await;
        let now = Utc::now();

        match result {
            Ok(GatewayState::Open) => {
                self.update(|s| {
                    s.status = ConnectionStatus::Connected;
                    s.error = None;
                    s.checked_at = Some(now);
                })
                .await;

                if !self.connected_notified.swap(true, Ordering::AcqRel) {
                    info!("Instance {} connected", instance);
                    let _ = self.events.send(ReconnectEvent::Connected {
                        instance: instance.to_string(),
                    });
                }
            }
            Ok(GatewayState::Close) | Ok(GatewayState::Connecting) => {
                let needs_qr = self
                    .update(|s| {
                        s.status = ConnectionStatus::Reconnecting;
                        s.error = None;
                        s.checked_at = Some(now);
                        s.attempts += 1;
                        s.qr.is_none() || s.attempts % QR_REGENERATE_EVERY == 0
                    })
                    .await;

                if needs_qr {
                    if let QrRequest::Failed(err) = self.request_qr(&instance).await {
                        self.fail(err.to_string()).await;
                    }
                }
            }
            Ok(GatewayState::Unknown(raw)) => {
                self.recover(&instance, ClientError::UnexpectedState(raw), now)
                    .await;
            }
            Err(err) => {
                warn!("Connection state check for {} failed: {}", instance, err);
                self.recover(&instance, err, now).await;
            }
        }

        CheckOutcome::Completed(self.status().await)
    }

    /// Best effort after a failed or unreadable check: without a QR on hand,
    /// try to get one before giving up.
    async fn recover(&self, instance: &InstanceId, cause: ClientError, now: DateTime<Utc>) {
        let has_qr = self
            .update(|s| {
                s.checked_at = Some(now);
                s.qr.is_some()
            })
            .await;

        if !has_qr {
            if let QrRequest::Updated = self.request_qr(instance).await {
                self.update(|s| {
                    s.status = ConnectionStatus::Reconnecting;
                    s.error = None;
                })
                .await;
                return;
            }
        }

        self.fail(cause.to_string()).await;
    }

    /// Fetch a new QR code and hold it. Rejected while another request is in flight.
    async fn request_qr(&self, instance: &InstanceId) -> QrRequest {
        let Some(_guard) = InFlight::try_acquire(&self.requesting_qr) else {
            debug!("QR request already in flight, skipping");
            return QrRequest::Skipped;
        };

        match self.api.connect(instance.as_str()).await {
            Ok(payload) => {
                debug!("Received QR code for {}", instance);
                self.update(|s| s.qr = Some(payload)).await;
                QrRequest::Updated
            }
            Err(err) => {
                warn!("QR request for {} failed: {}", instance, err);
                QrRequest::Failed(err)
            }
        }
    }

    /// Request a new QR code right away (manual refresh and the refresh timer).
    pub async fn refresh_qr(&self) -> QrRequest {
        let Some(instance) = self.instance.clone() else {
            return QrRequest::Failed(self.input_error());
        };

        let outcome = self.request_qr(&instance).await;
        if let QrRequest::Failed(err) = &outcome {
            self.fail(err.to_string()).await;
        }
        outcome
    }
}
