//! Packet event sources
//!
//! Events enter the firewall through the [`EventSource`] trait. Input is
//! validated here, so the decision engine only ever sees well-formed keys.

mod line_source;

pub use line_source::LineSource;

use crate::dataplane::FlowKey;
use crate::{Error, Result};
use std::fmt;
use std::future::Future;

/// Connection-state tag carried by a packet event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTag {
    New,
    Established,
    Close,
    /// Any other tag; processed without a state transition
    Unrecognized(String),
}

impl ConnectionTag {
    /// Parse a tag (exact, lowercase match)
    pub fn parse(tag: &str) -> Self {
        match tag {
            "new" => ConnectionTag::New,
            "established" => ConnectionTag::Established,
            "close" => ConnectionTag::Close,
            other => ConnectionTag::Unrecognized(other.to_string()),
        }
    }
}

impl fmt::Display for ConnectionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionTag::New => f.write_str("new"),
            ConnectionTag::Established => f.write_str("established"),
            ConnectionTag::Close => f.write_str("close"),
            ConnectionTag::Unrecognized(tag) => f.write_str(tag),
        }
    }
}

/// One packet event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketEvent {
    pub key: FlowKey,
    pub tag: ConnectionTag,
}

impl PacketEvent {
    pub fn new(key: FlowKey, tag: ConnectionTag) -> Self {
        Self { key, tag }
    }

    /// Build an event from raw text fields
    pub fn from_fields(src: &str, dst: &str, port: &str, tag: &str) -> Result<Self> {
        let src = src.trim();
        let dst = dst.trim();
        if src.is_empty() {
            return Err(Error::InvalidInput("empty source address".into()));
        }
        if dst.is_empty() {
            return Err(Error::InvalidInput("empty destination address".into()));
        }

        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| Error::InvalidInput(format!("invalid destination port: {:?}", port)))?;

        Ok(Self::new(
            FlowKey::new(src, dst, port),
            ConnectionTag::parse(tag.trim()),
        ))
    }

    /// Parse a line of the form `<source> <destination> <port> <state>`
    pub fn parse_line(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [src, dst, port, tag] => Self::from_fields(src, dst, port, tag),
            _ => Err(Error::InvalidInput(format!(
                "expected 4 fields (source destination port state), got {}",
                fields.len()
            ))),
        }
    }
}

/// Source of packet events
///
/// Returns `Ok(None)` once the source is exhausted. An `InvalidInput` error
/// rejects one event only; the caller may keep pulling.
pub trait EventSource: Send {
    fn next_event(&mut self) -> impl Future<Output = Result<Option<PacketEvent>>> + Send;
}

/// Event source over an in-memory sequence
#[derive(Debug)]
pub struct IterSource<I> {
    events: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = PacketEvent> + Send,
{
    pub fn new(events: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            events: events.into_iter(),
        }
    }
}

impl<I> EventSource for IterSource<I>
where
    I: Iterator<Item = PacketEvent> + Send,
{
    async fn next_event(&mut self) -> Result<Option<PacketEvent>> {
        Ok(self.events.next())
    }
}
