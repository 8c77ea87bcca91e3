//! `ConnectionManager`: owns the transport session and its lifecycle.
//!
//! ```text
//! Connecting ──handshake──▶ Active ──cancel──▶ Closing ──▶ Closed
//!     │                       │
//!     └──timeout / error──▶ Failed ◀──transport error / peer close
//!                             │
//!                             └──reconnect (opt-in)──▶ Connecting
//! ```
//!
//! Under the default policy `Failed` is terminal and surfaces as a fatal
//! [`ListenerError`]. With reconnects enabled the manager backs off,
//! re-establishes the session, re-issues the log subscription, replays the
//! outage window through a historical query and resumes live delivery.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use carbonwatch_core::{
    endpoint::EndpointConfig,
    error::{DecodeError, ListenerError, TransportError},
    event::{LogPosition, RawLogRecord},
};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ListenerConfig;
use crate::policy::RetryPolicy;
use crate::registry::{Dispatch, SubscriptionRegistry};
use crate::transport::{LogTransport, TransportEvent, TransportSession};

/// Lifecycle of the transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Metrics snapshot for the listener.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListenerMetrics {
    /// Records decoded and handed to subscribers
    pub events_decoded: u64,
    /// Records with no registered descriptor
    pub events_dropped: u64,
    /// Records that matched a descriptor but failed to decode
    pub decode_errors: u64,
    /// Individual sink deliveries that failed or panicked
    pub sink_errors: u64,
    /// Successful session re-establishments
    pub reconnections: u64,
    /// Records delivered from historical queries after a reconnect
    pub backfilled: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Live,
    Backfill,
}

/// Why the handshake did not produce a session.
enum HandshakeOutcome {
    Ready(Box<dyn TransportSession>),
    Cancelled,
}

/// Owns the transport session and drives delivery into the registry.
pub struct ConnectionManager {
    endpoint: EndpointConfig,
    config: ListenerConfig,
    transport: Arc<dyn LogTransport>,
    registry: SubscriptionRegistry,
    cancel: CancellationToken,
    state: watch::Sender<SessionState>,
    metrics: Arc<Mutex<ListenerMetrics>>,
    session: Option<Box<dyn TransportSession>>,
    /// Highest position handed to the registry
    last_seen: Option<LogPosition>,
    /// After a reconnect, live records at or below this were already replayed
    replay_limit: Option<LogPosition>,
}

impl ConnectionManager {
    pub fn new(
        endpoint: EndpointConfig,
        config: ListenerConfig,
        transport: Arc<dyn LogTransport>,
        registry: SubscriptionRegistry,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Connecting);
        Self {
            endpoint,
            config,
            transport,
            registry,
            cancel,
            state,
            metrics: Arc::new(Mutex::new(ListenerMetrics::default())),
            session: None,
            last_seen: None,
            replay_limit: None,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Returns a snapshot of current metrics.
    pub fn metrics(&self) -> ListenerMetrics {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Highest log position delivered so far.
    pub fn last_position(&self) -> Option<LogPosition> {
        self.last_seen
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = %prev, to = %next, "session state");
        }
    }

    fn record(&self, f: impl FnOnce(&mut ListenerMetrics)) {
        f(&mut self.metrics.lock().unwrap_or_else(|e| e.into_inner()));
    }

    /// Connect and attach the log subscription, bounded by the handshake
    /// timeout. On success the session is `Active`.
    pub async fn open(&mut self) -> Result<(), ListenerError> {
        match self.handshake(true).await? {
            HandshakeOutcome::Ready(session) => {
                self.session = Some(session);
                self.set_state(SessionState::Active);
                Ok(())
            }
            HandshakeOutcome::Cancelled => {
                self.set_state(SessionState::Closed);
                Ok(())
            }
        }
    }

    async fn handshake(&mut self, subscribe: bool) -> Result<HandshakeOutcome, ListenerError> {
        self.set_state(SessionState::Connecting);
        let url = self.endpoint.transport_url.clone();
        let address = self.endpoint.address;
        let limit = self.config.handshake_timeout();
        let transport = Arc::clone(&self.transport);
        let endpoint = self.endpoint.clone();

        let attempt = async move {
            let mut session = transport.connect(&endpoint).await?;
            if subscribe {
                session.subscribe_logs(address).await?;
            }
            Ok::<_, TransportError>(session)
        };

        let result = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(HandshakeOutcome::Cancelled),
            result = tokio::time::timeout(limit, attempt) => result,
        };
        match result {
            Ok(Ok(session)) => {
                info!(url = %url, %address, "session active");
                Ok(HandshakeOutcome::Ready(session))
            }
            Ok(Err(e)) => {
                self.set_state(SessionState::Failed);
                error!(url = %url, error = %e, "handshake failed");
                Err(ListenerError::Handshake { url, reason: e.to_string() })
            }
            Err(_) => {
                self.set_state(SessionState::Failed);
                error!(url = %url, timeout_ms = limit.as_millis() as u64, "handshake timed out");
                Err(ListenerError::HandshakeTimeout { url, ms: limit.as_millis() as u64 })
            }
        }
    }

    /// Graceful shutdown: `Active → Closing → Closed`.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            self.set_state(SessionState::Closing);
            match tokio::time::timeout(self.config.handshake_timeout(), session.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "error while closing session"),
                Err(_) => warn!("close acknowledgement timed out"),
            }
        }
        self.set_state(SessionState::Closed);
        info!(url = %self.endpoint.transport_url, "session closed");
    }

    /// Run until cancelled (`Ok`) or until the session fails and the policy
    /// does not allow recovery (`Err`).
    pub async fn run(&mut self) -> Result<(), ListenerError> {
        if self.session.is_none() {
            self.open().await?;
            if self.session.is_none() {
                return Ok(()); // cancelled during the handshake
            }
        }

        loop {
            let failure = match self.pump().await {
                Ok(()) => {
                    self.close().await;
                    return Ok(());
                }
                Err(e) => e,
            };

            self.session = None;
            self.set_state(SessionState::Failed);
            error!(url = %self.endpoint.transport_url, error = %failure, "transport failed");

            if !self.config.reconnect.enabled {
                return Err(ListenerError::Transport(failure));
            }
            if !self.reconnect(failure).await? {
                self.set_state(SessionState::Closed);
                return Ok(());
            }
        }
    }

    /// Deliver records until cancellation or transport failure.
    async fn pump(&mut self) -> Result<(), TransportError> {
        loop {
            let Some(session) = self.session.as_mut() else {
                return Err(TransportError::Protocol("no active session".into()));
            };
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                event = session.next_event() => event,
            };
            match event {
                TransportEvent::Log(raw) => self.handle_record(raw, Origin::Live),
                TransportEvent::Invalid(e) => {
                    warn!(error = %e, "dropping malformed record");
                    self.record(|m| m.decode_errors += 1);
                }
                TransportEvent::Closed { code, reason } => {
                    return Err(TransportError::ClosedByPeer { code, reason })
                }
                TransportEvent::Error(e) => return Err(e),
            }
        }
    }

    /// Back off and re-establish the session. Returns `Ok(false)` if
    /// cancelled while waiting.
    async fn reconnect(&mut self, cause: TransportError) -> Result<bool, ListenerError> {
        let policy = RetryPolicy::from(&self.config.reconnect);
        let mut last = cause.to_string();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let Some(delay) = policy.next_delay(attempt) else {
                error!(attempts = attempt - 1, last = %last, "giving up on reconnect");
                return Err(ListenerError::ReconnectExhausted { attempts: attempt - 1, last });
            };
            warn!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(delay) => {}
            }

            match self.handshake(true).await {
                Ok(HandshakeOutcome::Ready(session)) => {
                    self.session = Some(session);
                    self.record(|m| m.reconnections += 1);
                    self.set_state(SessionState::Active);
                    info!(attempt, subscriptions = self.registry.len(), "reconnected; subscriptions re-attached");
                    self.backfill().await;
                    return Ok(true);
                }
                Ok(HandshakeOutcome::Cancelled) => return Ok(false),
                Err(e) => last = e.to_string(),
            }
        }
    }

    /// Replay the outage window, skipping anything already delivered. Runs on
    /// the `Active` session before live delivery resumes; the query is bounded
    /// by the handshake timeout.
    async fn backfill(&mut self) {
        let Some(last) = self.last_seen else {
            return;
        };
        self.replay_limit = Some(last);
        if !self.config.reconnect.backfill {
            warn!(from_block = last.block_number, "backfill disabled; logs emitted during the outage may be missing");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.supports_history() {
            warn!(from_block = last.block_number, to_block = "latest", "transport has no historical query; logs emitted during the outage may be missing");
            return;
        }

        let limit = self.config.handshake_timeout();
        let query = session.fetch_logs(self.endpoint.address, last.block_number, None);
        let fetched = tokio::select! {
            _ = self.cancel.cancelled() => return,
            fetched = tokio::time::timeout(limit, query) => fetched,
        };
        let Ok(fetched) = fetched else {
            warn!(
                from_block = last.block_number,
                to_block = "latest",
                timeout_ms = limit.as_millis() as u64,
                "backfill query timed out; logs emitted during the outage may be missing"
            );
            return;
        };
        match fetched {
            Ok(mut logs) => {
                logs.sort_by_key(RawLogRecord::position);
                info!(from_block = last.block_number, count = logs.len(), "backfilling");
                for raw in logs {
                    self.handle_record(raw, Origin::Backfill);
                }
                self.replay_limit = self.last_seen;
            }
            Err(e) => {
                warn!(from_block = last.block_number, error = %e, "backfill query failed; logs emitted during the outage may be missing");
            }
        }
    }

    fn handle_record(&mut self, raw: RawLogRecord, origin: Origin) {
        let position = raw.position();
        if !raw.removed {
            if let Some(limit) = self.replay_limit {
                if position <= limit {
                    debug!(%position, "skipping already delivered record");
                    return;
                }
                if origin == Origin::Live {
                    self.replay_limit = None;
                }
            }
        }

        match self.registry.dispatch(&raw) {
            Ok(Dispatch::Delivered { event, failures, .. }) => {
                debug!(kind = %event.kind, %position, "delivered");
                self.record(|m| {
                    m.events_decoded += 1;
                    m.sink_errors += failures as u64;
                    if origin == Origin::Backfill {
                        m.backfilled += 1;
                    }
                });
            }
            Ok(Dispatch::Removed) => return,
            Err(e @ DecodeError::UnknownEvent { .. }) => {
                warn!(%position, error = %e, "dropping record");
                self.record(|m| m.events_dropped += 1);
            }
            Err(e) => {
                warn!(%position, error = %e, "dropping undecodable record");
                self.record(|m| m.decode_errors += 1);
            }
        }
        if self.last_seen.map_or(true, |seen| position > seen) {
            self.last_seen = Some(position);
        }
    }

    /// Historical report over `[from, to]` (`None` = latest): connect, query,
    /// dispatch in chain order, close. Returns the number of delivered events.
    pub async fn history(&mut self, from: u64, to: Option<u64>) -> Result<u64, ListenerError> {
        let mut session = match self.handshake(false).await? {
            HandshakeOutcome::Ready(session) => session,
            HandshakeOutcome::Cancelled => {
                self.set_state(SessionState::Closed);
                return Ok(0);
            }
        };
        self.set_state(SessionState::Active);

        let fetched = tokio::select! {
            _ = self.cancel.cancelled() => Ok(Vec::new()),
            fetched = session.fetch_logs(self.endpoint.address, from, to) => fetched,
        };
        self.session = Some(session);
        let mut logs = match fetched {
            Ok(logs) => logs,
            Err(e) => {
                self.session = None;
                self.set_state(SessionState::Failed);
                return Err(ListenerError::Transport(e));
            }
        };

        logs.sort_by_key(RawLogRecord::position);
        let before = self.metrics().events_decoded;
        for raw in logs {
            self.handle_record(raw, Origin::Live);
        }
        self.close().await;
        Ok(self.metrics().events_decoded - before)
    }
}

/// Convenience for tests and embedders: wait until `state` is reached.
pub async fn wait_for_state(
    rx: &mut watch::Receiver<SessionState>,
    state: SessionState,
    limit: Duration,
) -> bool {
    tokio::time::timeout(limit, rx.wait_for(|s| *s == state)).await.map_or(false, |r| r.is_ok())
}
