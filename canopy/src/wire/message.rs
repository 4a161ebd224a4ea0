use std::collections::BTreeMap;
use std::fmt;

use canopy_api::Value;
use serde::{Deserialize, Serialize};

/// A message envelope exchanged over a link.
///
/// Addresses travel in their textual form. `match_id` pairs a `Send` or
/// `ServiceLookup` with its `Reply` or `Error`; system messages use it only
/// within the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// A call to a concrete control address.
    Send {
        to: String,
        from: String,
        args: Vec<Value>,
        match_id: u64,
    },
    /// A call to a control of whichever component provides `service`.
    ServiceLookup {
        service: String,
        control: String,
        from: String,
        args: Vec<Value>,
        match_id: u64,
    },
    Reply { args: Vec<Value>, match_id: u64 },
    Error { args: Vec<Value>, match_id: u64 },
    /// Link management (handshake, goodbye).
    System {
        kind: String,
        data: BTreeMap<String, Value>,
        match_id: u64,
    },
}

impl Message {
    pub fn match_id(&self) -> u64 {
        match self {
            Message::Send { match_id, .. }
            | Message::ServiceLookup { match_id, .. }
            | Message::Reply { match_id, .. }
            | Message::Error { match_id, .. }
            | Message::System { match_id, .. } => *match_id,
        }
    }

    /// A system message with no auxiliary data.
    pub fn system(kind: &str, match_id: u64) -> Self {
        Message::System {
            kind: kind.to_string(),
            data: BTreeMap::new(),
            match_id,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Send { to, from, match_id, .. } => write!(f, "Send {from} -> {to} ({match_id})"),
            Message::ServiceLookup {
                service,
                control,
                from,
                match_id,
                ..
            } => write!(f, "ServiceLookup {from} -> {service}!{control} ({match_id})"),
            Message::Reply { match_id, .. } => write!(f, "Reply ({match_id})"),
            Message::Error { match_id, .. } => write!(f, "Error ({match_id})"),
            Message::System { kind, match_id, .. } => write!(f, "System {kind} ({match_id})"),
        }
    }
}
