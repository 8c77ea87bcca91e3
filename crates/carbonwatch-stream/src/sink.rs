//! Event sinks: the consumers decoded events are handed to.

use std::io::Write;
use std::sync::Mutex;

use carbonwatch_core::{error::SinkError, event::DecodedEvent};
use tokio::sync::mpsc;

/// Receives decoded events in delivery order.
///
/// `consume` must not block indefinitely. An error (or a panic) loses this
/// one event; the listener keeps running.
pub trait EventSink: Send + Sync {
    fn consume(&self, event: &DecodedEvent) -> Result<(), SinkError>;
}

/// Blanket impl: closures can be used directly as sinks.
impl<F> EventSink for F
where
    F: Fn(&DecodedEvent) -> Result<(), SinkError> + Send + Sync,
{
    fn consume(&self, event: &DecodedEvent) -> Result<(), SinkError> {
        self(event)
    }
}

/// Output format of a [`LineSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineFormat {
    /// `[Kind] name=value ... tx=0x.. block=N`
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Writes one line per event to any writer (stdout, a file, a buffer).
pub struct LineSink<W> {
    writer: Mutex<W>,
    format: LineFormat,
}

impl<W: Write + Send> LineSink<W> {
    pub fn new(writer: W, format: LineFormat) -> Self {
        Self { writer: Mutex::new(writer), format }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl LineSink<std::io::Stdout> {
    pub fn stdout(format: LineFormat) -> Self {
        Self::new(std::io::stdout(), format)
    }
}

impl<W: Write + Send> EventSink for LineSink<W> {
    fn consume(&self, event: &DecodedEvent) -> Result<(), SinkError> {
        let line = match self.format {
            LineFormat::Text => event.to_string(),
            LineFormat::Json => serde_json::to_string(event)?,
        };
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

/// Forwards events into a bounded channel without waiting for capacity.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<DecodedEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver it feeds.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DecodedEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn consume(&self, event: &DecodedEvent) -> Result<(), SinkError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256};
    use indexmap::IndexMap;

    fn event(block: u64) -> DecodedEvent {
        DecodedEvent {
            kind: "CreditsRetired".into(),
            fields: IndexMap::new(),
            transaction_hash: B256::ZERO,
            block_number: block,
            log_index: 0,
            address: Address::ZERO,
        }
    }

    #[test]
    fn line_sink_writes_one_line_per_event() {
        let sink = LineSink::new(Vec::new(), LineFormat::Text);
        sink.consume(&event(1)).unwrap();
        sink.consume(&event(2)).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("[CreditsRetired] tx=0x"));
        assert!(lines[1].ends_with("block=2"));
    }

    #[test]
    fn json_lines_carry_kind_and_block() {
        let sink = LineSink::new(Vec::new(), LineFormat::Json);
        sink.consume(&event(7)).unwrap();
        let out = sink.into_inner();
        let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v["kind"], "CreditsRetired");
        assert_eq!(v["block"], 7);
    }

    #[test]
    fn full_channel_is_reported_not_awaited() {
        let (sink, mut rx) = ChannelSink::new(1);
        sink.consume(&event(1)).unwrap();
        assert!(matches!(sink.consume(&event(2)), Err(SinkError::Full)));
        assert_eq!(rx.try_recv().unwrap().block_number, 1);
        drop(rx);
        assert!(matches!(sink.consume(&event(3)), Err(SinkError::Closed)));
    }

    #[test]
    fn closures_are_sinks() {
        let sink = |e: &DecodedEvent| {
            if e.block_number == 0 {
                Err(SinkError::Other("genesis".into()))
            } else {
                Ok(())
            }
        };
        assert!(sink.consume(&event(1)).is_ok());
        assert!(sink.consume(&event(0)).is_err());
    }
}
