//! Transport adapter over the host message channel.
//!
//! Outbound commands are serialized to one JSON line each and posted through a
//! [`HostChannel`] in call order. Inbound messages are queued untouched in
//! arrival order; nothing is parsed here, so a malformed message reaches the
//! decoder as-is and is flagged there.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::Write;
use std::rc::Rc;

use playground_protocol::Command;
use serde_json::Value;

use crate::error::TransportError;

/// A message as delivered by the host, before any validation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawMessage {
    Text(String),
    /// Already-parsed value, as handed over by a webview `postMessage`.
    Json(Value),
}

impl RawMessage {
    pub fn byte_len(&self) -> usize {
        match self {
            RawMessage::Text(text) => text.len(),
            RawMessage::Json(value) => value.to_string().len(),
        }
    }
}

impl From<String> for RawMessage {
    fn from(text: String) -> Self {
        RawMessage::Text(text)
    }
}

impl From<&str> for RawMessage {
    fn from(text: &str) -> Self {
        RawMessage::Text(text.to_string())
    }
}

impl From<Value> for RawMessage {
    fn from(value: Value) -> Self {
        RawMessage::Json(value)
    }
}

/// Outbound side of the host channel.
pub trait HostChannel {
    fn post(&mut self, line: &str) -> std::io::Result<()>;
}

/// Records posted lines in memory. Clones share the same log, so a caller can
/// keep a handle after moving the channel into a panel.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    sent: Rc<RefCell<Vec<String>>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.borrow().clone()
    }

    /// Posted lines decoded back into commands. Lines that fail to decode are skipped.
    pub fn commands(&self) -> Vec<Command> {
        self.sent
            .borrow()
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl HostChannel for MemoryChannel {
    fn post(&mut self, line: &str) -> std::io::Result<()> {
        self.sent.borrow_mut().push(line.to_string());
        Ok(())
    }
}

/// Newline-delimited JSON over any writer.
pub struct WriterChannel<W: Write> {
    writer: W,
}

impl<W: Write> WriterChannel<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> HostChannel for WriterChannel<W> {
    fn post(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

pub struct Transport {
    channel: Box<dyn HostChannel>,
    inbound: VecDeque<RawMessage>,
    sent_count: u64,
}

impl Transport {
    pub fn new(channel: Box<dyn HostChannel>) -> Self {
        Self {
            channel,
            inbound: VecDeque::new(),
            sent_count: 0,
        }
    }

    pub fn send(&mut self, command: &Command) -> Result<(), TransportError> {
        let line = serde_json::to_string(command).map_err(|err| TransportError::Serialize {
            details: err.to_string(),
        })?;
        self.channel
            .post(&line)
            .map_err(|err| TransportError::ChannelClosed {
                details: err.to_string(),
            })?;
        self.sent_count += 1;
        tracing::debug!(kind = command.kind.as_str(), correlation_id = ?command.correlation_id, "Command sent");
        Ok(())
    }

    pub fn receive(&mut self, raw: RawMessage) {
        self.inbound.push_back(raw);
    }

    pub fn next_inbound(&mut self) -> Option<RawMessage> {
        self.inbound.pop_front()
    }

    pub fn pending_inbound(&self) -> usize {
        self.inbound.len()
    }

    pub fn sent_count(&self) -> u64 {
        self.sent_count
    }

    pub fn clear_inbound(&mut self) {
        self.inbound.clear();
    }
}
