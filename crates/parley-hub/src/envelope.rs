//! Wire envelope and protocol tags.

use crate::client::ClientId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag for a roster query.
pub const ROSTER_QUERY: &str = "0001";

/// Tag for a text broadcast.
pub const BROADCAST_TEXT: &str = "0002";

/// The unit exchanged with clients and passed through the hub.
///
/// The tag field is spelled `protocal` on the wire. Deployed clients depend
/// on that spelling, so only the Rust name is corrected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol tag.
    #[serde(rename = "protocal", default)]
    pub protocol: Protocol,
    /// Sender id. Always stamped by the server on outbound envelopes.
    #[serde(default)]
    pub id: ClientId,
    /// Protocol-dependent payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    /// Create an envelope from a sender.
    pub fn new(protocol: Protocol, id: ClientId, data: impl Into<serde_json::Value>) -> Self {
        Self {
            protocol,
            id,
            data: data.into(),
        }
    }

    /// Decode an envelope from raw frame bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Encode this envelope as a JSON string.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Known protocol tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Protocol {
    /// `0001`: list the users in the directory.
    RosterQuery,
    /// `0002`: relay text to every connected client.
    BroadcastText,
    /// Any other tag. Logged and ignored.
    Unknown(String),
}

impl Protocol {
    /// Parse a tag string.
    pub fn parse(tag: &str) -> Self {
        match tag {
            ROSTER_QUERY => Protocol::RosterQuery,
            BROADCAST_TEXT => Protocol::BroadcastText,
            other => Protocol::Unknown(other.to_string()),
        }
    }

    /// The tag as it appears on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            Protocol::RosterQuery => ROSTER_QUERY,
            Protocol::BroadcastText => BROADCAST_TEXT,
            Protocol::Unknown(tag) => tag,
        }
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Unknown(String::new())
    }
}

impl From<String> for Protocol {
    fn from(tag: String) -> Self {
        Protocol::parse(&tag)
    }
}

impl From<Protocol> for String {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Unknown(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize chat text: every newline becomes a space, then surrounding
/// whitespace is trimmed.
pub fn sanitize_text(text: &str) -> String {
    text.replace('\n', " ").trim().to_string()
}
