//! `SubscriptionRegistry`: which event kinds are observed and who gets them.
//!
//! The registry outlives transport sessions: subscriptions registered once
//! stay attached across reconnects. It is cheap to clone; clones share the
//! same subscription table, so callers can subscribe or unsubscribe while a
//! connection manager is running.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
};

use alloy_primitives::B256;
use carbonwatch_core::{
    descriptor::EventDescriptor,
    error::{DecodeError, SchemaError, SinkError},
    event::{DecodedEvent, RawLogRecord},
};
use carbonwatch_evm::{fingerprint::topic_hash, ContractInterface, EvmDecoder};
use tracing::{debug, info, warn};

use crate::sink::EventSink;

/// Identifies one subscription. Returned by [`SubscriptionRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

struct Entry {
    handle: SubscriptionHandle,
    descriptor: Arc<EventDescriptor>,
    topic: B256,
    sink: Arc<dyn EventSink>,
}

#[derive(Default)]
struct Inner {
    /// In subscription order
    entries: Vec<Entry>,
}

/// Outcome of dispatching one raw record.
#[derive(Debug)]
pub enum Dispatch {
    /// Decoded and handed to every matching subscriber
    Delivered { event: DecodedEvent, deliveries: usize, failures: usize },
    /// The node flagged the log as reverted by a reorg
    Removed,
}

#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<Mutex<Inner>>,
    interface: Option<Arc<ContractInterface>>,
    decoder: EvmDecoder,
    next_id: Arc<AtomicU64>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that also checks every descriptor against the contract's ABI.
    pub fn with_interface(interface: ContractInterface) -> Self {
        Self { interface: Some(Arc::new(interface)), ..Self::default() }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `sink` for events matching `descriptor`.
    ///
    /// Rejected descriptors leave every other subscription untouched.
    pub fn subscribe(
        &self,
        descriptor: EventDescriptor,
        sink: impl EventSink + 'static,
    ) -> Result<SubscriptionHandle, SchemaError> {
        self.subscribe_shared(descriptor, Arc::new(sink))
    }

    /// Like [`subscribe`](Self::subscribe), for a sink shared between
    /// several subscriptions.
    pub fn subscribe_shared(
        &self,
        descriptor: EventDescriptor,
        sink: Arc<dyn EventSink>,
    ) -> Result<SubscriptionHandle, SchemaError> {
        descriptor.validate()?;
        if let Some(interface) = &self.interface {
            interface.check(&descriptor)?;
        }

        let mut inner = self.lock();
        if inner
            .entries
            .iter()
            .any(|e| e.descriptor.name == descriptor.name && !e.descriptor.same_shape(&descriptor))
        {
            return Err(SchemaError::DuplicateEvent { name: descriptor.name });
        }

        let handle = SubscriptionHandle(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let topic = topic_hash(&descriptor);
        info!(%handle, event = %descriptor.name, %topic, "subscribed");
        inner.entries.push(Entry { handle, descriptor: Arc::new(descriptor), topic, sink });
        Ok(handle)
    }

    /// Detach a subscription. Unknown or already-removed handles are a no-op.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.handle != handle);
        if inner.entries.len() != before {
            info!(%handle, "unsubscribed");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Decode `raw` and deliver it to every subscriber of its event kind, in
    /// subscription order. Sinks run outside the registry lock.
    pub fn dispatch(&self, raw: &RawLogRecord) -> Result<Dispatch, DecodeError> {
        if raw.removed {
            debug!(position = %raw.position(), "ignoring removed log");
            return Ok(Dispatch::Removed);
        }
        let topic0 = *raw.signature_topic().ok_or(DecodeError::MissingSignature)?;

        let targets: Vec<(Arc<EventDescriptor>, Arc<dyn EventSink>, SubscriptionHandle)> = self
            .lock()
            .entries
            .iter()
            .filter(|e| e.topic == topic0)
            .map(|e| (Arc::clone(&e.descriptor), Arc::clone(&e.sink), e.handle))
            .collect();

        // `subscribe` refuses a second shape under a registered name, so every
        // target of one topic0 decodes the same layout.
        if targets.is_empty() {
            return Err(DecodeError::UnknownEvent { topic: topic0.to_string() });
        }

        // Subscribers of the same shape may still differ in display hints,
        // so decode once per distinct descriptor.
        let mut decoded: Vec<(Arc<EventDescriptor>, DecodedEvent)> = Vec::new();
        let mut deliveries = 0;
        let mut failures = 0;
        for (descriptor, sink, handle) in &targets {
            let index = match decoded.iter().position(|(d, _)| d == descriptor) {
                Some(index) => index,
                None => {
                    decoded.push((Arc::clone(descriptor), self.decoder.decode(raw, descriptor)?));
                    decoded.len() - 1
                }
            };
            let event = &decoded[index].1;
            match deliver(sink.as_ref(), event) {
                Ok(()) => deliveries += 1,
                Err(e) => {
                    failures += 1;
                    warn!(%handle, event = %event.kind, position = %event.position(), error = %e, "sink failed; event lost for this subscriber");
                }
            }
        }

        let event = decoded
            .into_iter()
            .next()
            .map(|(_, event)| event)
            .ok_or_else(|| DecodeError::UnknownEvent { topic: topic0.to_string() })?;
        Ok(Dispatch::Delivered { event, deliveries, failures })
    }
}

/// Run a sink, turning a panic into a [`SinkError`].
fn deliver(sink: &dyn EventSink, event: &DecodedEvent) -> Result<(), SinkError> {
    match catch_unwind(AssertUnwindSafe(|| sink.consume(event))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            Err(SinkError::Panicked(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, U256};
    use carbonwatch_core::descriptor::EventCatalog;
    use std::sync::Mutex as StdMutex;

    fn issued(amount: U256, block: u64) -> RawLogRecord {
        let d = EventCatalog::carbon_credit().get("CreditsIssued").cloned().unwrap();
        let mut to = [0u8; 32];
        to[31] = 1;
        RawLogRecord {
            address: Address::ZERO,
            topics: vec![topic_hash(&d), B256::from(to)],
            data: Bytes::from(amount.to_be_bytes::<32>().to_vec()),
            transaction_hash: B256::repeat_byte(0xaa),
            block_number: block,
            log_index: 0,
            removed: false,
        }
    }

    fn recorder() -> (Arc<StdMutex<Vec<String>>>, impl EventSink + Clone) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink = move |e: &DecodedEvent| -> Result<(), SinkError> {
            sink_seen.lock().unwrap().push(e.to_string());
            Ok(())
        };
        (seen, sink)
    }

    #[test]
    fn delivers_to_matching_subscriber() {
        let registry = SubscriptionRegistry::new();
        let (seen, sink) = recorder();
        let catalog = EventCatalog::carbon_credit();
        registry.subscribe(catalog.get("CreditsIssued").cloned().unwrap(), sink).unwrap();

        let amount = U256::from(1000u64) * U256::from(10u64).pow(U256::from(18u64));
        let outcome = registry.dispatch(&issued(amount, 5)).unwrap();
        assert!(matches!(outcome, Dispatch::Delivered { deliveries: 1, failures: 0, .. }));
        let lines = seen.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("amount=1000.0"));
    }

    #[test]
    fn unmatched_topic_is_dropped() {
        let registry = SubscriptionRegistry::new();
        let (seen, sink) = recorder();
        let catalog = EventCatalog::carbon_credit();
        registry.subscribe(catalog.get("CreditsRetired").cloned().unwrap(), sink).unwrap();

        let result = registry.dispatch(&issued(U256::from(1u64), 1));
        assert!(matches!(result, Err(DecodeError::UnknownEvent { .. })));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn removed_logs_are_ignored() {
        let registry = SubscriptionRegistry::new();
        let (seen, sink) = recorder();
        let catalog = EventCatalog::carbon_credit();
        registry.subscribe(catalog.get("CreditsIssued").cloned().unwrap(), sink).unwrap();

        let mut raw = issued(U256::from(1u64), 1);
        raw.removed = true;
        assert!(matches!(registry.dispatch(&raw), Ok(Dispatch::Removed)));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn conflicting_shape_is_rejected_without_side_effects() {
        let registry = SubscriptionRegistry::new();
        let (_, sink) = recorder();
        let catalog = EventCatalog::carbon_credit();
        registry.subscribe(catalog.get("CreditsIssued").cloned().unwrap(), sink.clone()).unwrap();

        let conflicting =
            EventDescriptor::parse("event CreditsIssued(address to, uint256 indexed amount)").unwrap();
        assert!(matches!(
            registry.subscribe(conflicting, sink.clone()),
            Err(SchemaError::DuplicateEvent { .. })
        ));
        assert_eq!(registry.len(), 1);

        // Same shape twice is fine: two subscribers of one event kind
        registry.subscribe(catalog.get("CreditsIssued").cloned().unwrap(), sink).unwrap();
        assert_eq!(registry.len(), 2);

        // One layout per topic0: both subscribers get the same decode
        let outcome = registry.dispatch(&issued(U256::from(1u64), 1)).unwrap();
        assert!(matches!(outcome, Dispatch::Delivered { deliveries: 2, failures: 0, .. }));
    }

    #[test]
    fn subscribers_receive_in_subscription_order() {
        let registry = SubscriptionRegistry::new();
        let order = Arc::new(StdMutex::new(Vec::new()));
        let catalog = EventCatalog::carbon_credit();
        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            registry
                .subscribe(catalog.get("CreditsIssued").cloned().unwrap(), move |_: &DecodedEvent| -> Result<(), SinkError> {
                    order.lock().unwrap().push(tag);
                    Ok(())
                })
                .unwrap();
        }
        registry.dispatch(&issued(U256::from(1u64), 1)).unwrap();
        assert_eq!(*order.lock().unwrap(), ["first", "second", "third"]);
    }

    #[test]
    fn failing_and_panicking_sinks_are_isolated() {
        let registry = SubscriptionRegistry::new();
        let catalog = EventCatalog::carbon_credit();
        let d = catalog.get("CreditsIssued").cloned().unwrap();
        registry
            .subscribe(d.clone(), |_: &DecodedEvent| -> Result<(), SinkError> {
                Err(SinkError::Other("disk full".into()))
            })
            .unwrap();
        registry
            .subscribe(d.clone(), |_: &DecodedEvent| -> Result<(), SinkError> { panic!("boom") })
            .unwrap();
        let (seen, sink) = recorder();
        registry.subscribe(d, sink).unwrap();

        let outcome = registry.dispatch(&issued(U256::from(1u64), 1)).unwrap();
        assert!(matches!(outcome, Dispatch::Delivered { deliveries: 1, failures: 2, .. }));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let (seen, sink) = recorder();
        let catalog = EventCatalog::carbon_credit();
        let handle =
            registry.subscribe(catalog.get("CreditsIssued").cloned().unwrap(), sink).unwrap();
        registry.unsubscribe(handle);
        registry.unsubscribe(handle);
        assert!(registry.is_empty());
        assert!(registry.dispatch(&issued(U256::from(1u64), 1)).is_err());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn interface_rejects_layout_mismatch() {
        let abi = r#"[{"type":"event","name":"CreditsIssued","anonymous":false,"inputs":[
            {"name":"to","type":"address","indexed":true},
            {"name":"amount","type":"uint256","indexed":false}]}]"#;
        let registry =
            SubscriptionRegistry::with_interface(ContractInterface::from_json_str(abi).unwrap());
        let (_, sink) = recorder();
        let wrong = EventDescriptor::parse("event CreditsIssued(address to, uint256 amount)").unwrap();
        assert!(matches!(
            registry.subscribe(wrong, sink.clone()),
            Err(SchemaError::LayoutMismatch { .. })
        ));
        let catalog = EventCatalog::carbon_credit();
        registry.subscribe(catalog.get("CreditsIssued").cloned().unwrap(), sink).unwrap();
        assert_eq!(registry.len(), 1);
    }
}
