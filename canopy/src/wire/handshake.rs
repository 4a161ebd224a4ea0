//! # Link Handshake
//!
//! The initiating side opens every link with `HELLO`, naming the services
//! it exposes to the peer. The accepting side answers `HELLO_OK` or
//! `HELLO_REFUSED`; no call traffic is accepted in either direction before
//! `HELLO_OK`. `GOODBYE` announces an orderly shutdown of the link.

use std::collections::BTreeMap;
use std::fmt;

use canopy_api::{ComponentAddress, Value};

use crate::error::HandshakeError;

use super::message::Message;

/// Key of the exposed services map in `HELLO`.
pub const KEY_SERVICES: &str = "services";
/// Key of the optional shared-directory URI in `HELLO`.
pub const KEY_SHARED_ROOT: &str = "shared-root";
/// Key of the optional auxiliary file-server port in `HELLO`.
pub const KEY_FILE_SERVER_PORT: &str = "file-server-port";
/// Key of the refusal reason in `HELLO_REFUSED`.
pub const KEY_REASON: &str = "reason";

/// Sub-types of system messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemKind {
    Hello,
    HelloOk,
    HelloRefused,
    Goodbye,
}

impl SystemKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            SystemKind::Hello => "HELLO",
            SystemKind::HelloOk => "HELLO_OK",
            SystemKind::HelloRefused => "HELLO_REFUSED",
            SystemKind::Goodbye => "GOODBYE",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "HELLO" => Some(SystemKind::Hello),
            "HELLO_OK" => Some(SystemKind::HelloOk),
            "HELLO_REFUSED" => Some(SystemKind::HelloRefused),
            "GOODBYE" => Some(SystemKind::Goodbye),
            _ => None,
        }
    }

    /// The sub-type of a system message; `None` for call traffic or
    /// unknown sub-types.
    pub fn of(message: &Message) -> Option<Self> {
        match message {
            Message::System { kind, .. } => Self::parse(kind),
            _ => None,
        }
    }

    /// A message of this sub-type with no data.
    pub fn message(self, match_id: u64) -> Message {
        Message::system(self.as_str(), match_id)
    }
}

impl fmt::Display for SystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contents of a `HELLO` message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hello {
    /// Service name to the address providing it on the initiating side
    pub services: BTreeMap<String, ComponentAddress>,
    /// URI of a directory both sides can reach
    pub shared_root: Option<String>,
    /// Port of the initiator's auxiliary file server
    pub file_server_port: Option<u16>,
}

impl Hello {
    pub fn to_message(&self, match_id: u64) -> Message {
        let mut data = BTreeMap::new();
        let services = self
            .services
            .iter()
            .map(|(name, address)| (name.clone(), Value::Text(address.to_string())))
            .collect();
        data.insert(KEY_SERVICES.to_string(), Value::Map(services));
        if let Some(shared_root) = &self.shared_root {
            data.insert(KEY_SHARED_ROOT.to_string(), Value::Text(shared_root.clone()));
        }
        if let Some(port) = self.file_server_port {
            data.insert(KEY_FILE_SERVER_PORT.to_string(), Value::Int(i64::from(port)));
        }
        Message::System {
            kind: SystemKind::Hello.as_str().to_string(),
            data,
            match_id,
        }
    }

    /// Parses a `HELLO` message.
    ///
    /// # Errors
    /// `UnexpectedKind` for any other message, `MalformedField` if a known
    /// key holds a value of the wrong shape.
    pub fn from_message(message: &Message) -> Result<Self, HandshakeError> {
        let data = expect_system(message, SystemKind::Hello)?;
        let mut hello = Hello::default();
        if let Some(services) = data.get(KEY_SERVICES) {
            let services = services
                .as_map()
                .ok_or(HandshakeError::MalformedField(KEY_SERVICES))?;
            for (name, address) in services {
                let address = address
                    .as_text()
                    .and_then(|text| text.parse::<ComponentAddress>().ok())
                    .ok_or(HandshakeError::MalformedField(KEY_SERVICES))?;
                hello.services.insert(name.clone(), address);
            }
        }
        if let Some(shared_root) = data.get(KEY_SHARED_ROOT) {
            let shared_root = shared_root
                .as_text()
                .ok_or(HandshakeError::MalformedField(KEY_SHARED_ROOT))?;
            hello.shared_root = Some(shared_root.to_string());
        }
        if let Some(port) = data.get(KEY_FILE_SERVER_PORT) {
            let port = port
                .as_int()
                .and_then(|port| u16::try_from(port).ok())
                .ok_or(HandshakeError::MalformedField(KEY_FILE_SERVER_PORT))?;
            hello.file_server_port = Some(port);
        }
        Ok(hello)
    }
}

/// A `HELLO_REFUSED` answer carrying `reason`.
pub fn refusal(reason: &str, match_id: u64) -> Message {
    let mut data = BTreeMap::new();
    data.insert(KEY_REASON.to_string(), Value::Text(reason.to_string()));
    Message::System {
        kind: SystemKind::HelloRefused.as_str().to_string(),
        data,
        match_id,
    }
}

/// Interprets the answer to a `HELLO`.
///
/// # Errors
/// `Refused` for `HELLO_REFUSED`, `UnexpectedKind` for anything but
/// `HELLO_OK`.
pub fn check_answer(message: &Message) -> Result<(), HandshakeError> {
    match message {
        Message::System { kind, data, .. } if kind == SystemKind::HelloRefused.as_str() => {
            let reason = data
                .get(KEY_REASON)
                .and_then(Value::as_text)
                .unwrap_or("no reason given");
            Err(HandshakeError::Refused(reason.to_string()))
        }
        other => expect_system(other, SystemKind::HelloOk).map(|_| ()),
    }
}

fn expect_system(message: &Message, expected: SystemKind) -> Result<&BTreeMap<String, Value>, HandshakeError> {
    match message {
        Message::System { kind, data, .. } if kind == expected.as_str() => Ok(data),
        Message::System { kind, .. } => Err(HandshakeError::UnexpectedKind {
            expected: expected.as_str(),
            found: kind.clone(),
        }),
        other => Err(HandshakeError::UnexpectedKind {
            expected: expected.as_str(),
            found: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_fields() {
        let mut hello = Hello {
            shared_root: Some("file:///srv/shared".to_string()),
            file_server_port: Some(8088),
            ..Hello::default()
        };
        hello
            .services
            .insert("log".to_string(), "/_sys/log".parse().unwrap());

        let message = hello.to_message(7);
        assert_eq!(message.match_id(), 7);
        assert_eq!(SystemKind::of(&message), Some(SystemKind::Hello));
        assert_eq!(Hello::from_message(&message).unwrap(), hello);
    }

    #[test]
    fn test_hello_without_optional_keys() {
        let message = Hello::default().to_message(1);
        let parsed = Hello::from_message(&message).unwrap();
        assert!(parsed.services.is_empty());
        assert_eq!(parsed.shared_root, None);
        assert_eq!(parsed.file_server_port, None);
    }

    #[test]
    fn test_malformed_port() {
        let mut data = BTreeMap::new();
        data.insert(KEY_FILE_SERVER_PORT.to_string(), Value::Int(70_000));
        let message = Message::System {
            kind: "HELLO".to_string(),
            data,
            match_id: 0,
        };
        assert_eq!(
            Hello::from_message(&message),
            Err(HandshakeError::MalformedField(KEY_FILE_SERVER_PORT))
        );
    }

    #[test]
    fn test_answers() {
        assert!(check_answer(&SystemKind::HelloOk.message(1)).is_ok());
        assert_eq!(
            check_answer(&refusal("parent already connected", 1)),
            Err(HandshakeError::Refused("parent already connected".to_string()))
        );
        assert!(matches!(
            check_answer(&SystemKind::Goodbye.message(1)),
            Err(HandshakeError::UnexpectedKind { expected: "HELLO_OK", .. })
        ));
    }
}
