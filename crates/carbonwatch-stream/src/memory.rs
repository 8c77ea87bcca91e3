//! `MemoryTransport`: a channel-driven transport.
//!
//! Each `connect` consumes the next planned session. A live session is fed
//! through its [`MemoryFeed`]; refused and stalled sessions exercise the
//! handshake failure paths. Historical queries are answered from a shared
//! log list when one is configured.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use alloy_primitives::Address;
use async_trait::async_trait;
use carbonwatch_core::{endpoint::EndpointConfig, error::TransportError, event::RawLogRecord};
use tokio::sync::mpsc;

use crate::transport::{LogTransport, TransportEvent, TransportSession};

enum Planned {
    Live(mpsc::UnboundedReceiver<TransportEvent>),
    Refuse(String),
    Stall,
}

#[derive(Default)]
struct Inner {
    planned: VecDeque<Planned>,
    history: Option<Vec<RawLogRecord>>,
    history_stalled: bool,
    connects: u32,
    subscriptions: u32,
    history_queries: Vec<(u64, Option<u64>)>,
}

/// In-process transport. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<Inner>>,
}

/// Producer side of a planned live session.
#[derive(Clone)]
pub struct MemoryFeed {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl MemoryFeed {
    pub fn push(&self, raw: RawLogRecord) {
        let _ = self.tx.send(TransportEvent::Log(raw));
    }

    pub fn push_event(&self, event: TransportEvent) {
        let _ = self.tx.send(event);
    }

    /// Simulate a peer-initiated close.
    pub fn close(&self, code: Option<u16>, reason: &str) {
        let _ = self.tx.send(TransportEvent::Closed { code, reason: reason.to_string() });
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Plan a live session and return its feed.
    pub fn session(&self) -> MemoryFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().planned.push_back(Planned::Live(rx));
        MemoryFeed { tx }
    }

    /// Plan a session whose connect fails.
    pub fn refuse_next(&self, reason: &str) {
        self.lock().planned.push_back(Planned::Refuse(reason.to_string()));
    }

    /// Plan a session whose subscription is never acknowledged.
    pub fn stall_next(&self) {
        self.lock().planned.push_back(Planned::Stall);
    }

    /// Enable historical queries, answered from `logs`.
    pub fn set_history(&self, logs: Vec<RawLogRecord>) {
        self.lock().history = Some(logs);
    }

    /// Make every historical query hang without answering.
    pub fn stall_history(&self) {
        let mut inner = self.lock();
        inner.history.get_or_insert_with(Vec::new);
        inner.history_stalled = true;
    }

    pub fn connects(&self) -> u32 {
        self.lock().connects
    }

    /// Number of acknowledged log subscriptions across all sessions.
    pub fn subscriptions(&self) -> u32 {
        self.lock().subscriptions
    }

    /// `(from, to)` of every historical query served.
    pub fn history_queries(&self) -> Vec<(u64, Option<u64>)> {
        self.lock().history_queries.clone()
    }
}

#[async_trait]
impl LogTransport for MemoryTransport {
    async fn connect(
        &self,
        endpoint: &EndpointConfig,
    ) -> Result<Box<dyn TransportSession>, TransportError> {
        let planned = {
            let mut inner = self.lock();
            inner.connects += 1;
            inner.planned.pop_front()
        };
        let (events, stall) = match planned {
            Some(Planned::Live(rx)) => (Some(rx), false),
            Some(Planned::Stall) => (None, true),
            Some(Planned::Refuse(reason)) => {
                return Err(TransportError::ConnectionFailed {
                    url: endpoint.transport_url.clone(),
                    reason,
                })
            }
            None => {
                return Err(TransportError::ConnectionFailed {
                    url: endpoint.transport_url.clone(),
                    reason: "no session planned".into(),
                })
            }
        };
        Ok(Box::new(MemorySession { transport: self.clone(), events, stall }))
    }
}

struct MemorySession {
    transport: MemoryTransport,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    stall: bool,
}

#[async_trait]
impl TransportSession for MemorySession {
    async fn subscribe_logs(&mut self, _address: Address) -> Result<String, TransportError> {
        if self.stall {
            std::future::pending::<()>().await;
        }
        let mut inner = self.transport.lock();
        inner.subscriptions += 1;
        Ok(format!("0x{:x}", inner.subscriptions))
    }

    async fn next_event(&mut self) -> TransportEvent {
        let Some(events) = self.events.as_mut() else {
            return std::future::pending().await;
        };
        match events.recv().await {
            Some(event) => event,
            None => TransportEvent::Closed { code: None, reason: "feed dropped".into() },
        }
    }

    fn supports_history(&self) -> bool {
        self.transport.lock().history.is_some()
    }

    async fn fetch_logs(
        &mut self,
        address: Address,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<RawLogRecord>, TransportError> {
        let stalled = {
            let mut inner = self.transport.lock();
            inner.history_queries.push((from, to));
            inner.history_stalled
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        let inner = self.transport.lock();
        let history = inner.history.as_ref().ok_or(TransportError::Unsupported)?;
        let mut logs: Vec<RawLogRecord> = history
            .iter()
            .filter(|raw| raw.address == address)
            .filter(|raw| raw.block_number >= from && to.map_or(true, |to| raw.block_number <= to))
            .cloned()
            .collect();
        logs.sort_by_key(RawLogRecord::position);
        Ok(logs)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.events = None;
        Ok(())
    }
}
