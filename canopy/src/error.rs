use std::net::SocketAddr;
use std::time::Duration;

use canopy_api::{AddressError, CallError, ValueError};
use thiserror::Error;

use crate::root::RootState;

/// Errors related to the root lifecycle.
#[derive(Error, Debug)]
pub enum RootError {
    #[error("Root is in state {actual:?}, expected {expected:?}")]
    StateConflict { expected: RootState, actual: RootState },
    #[error("Invalid root id: {0}")]
    InvalidId(#[from] AddressError),
    #[error("Root activation failed: {0}")]
    ActivationFailed(String),
    #[error("Call processing failed: {0}")]
    ProcessingFailed(String),
    #[error("Bad call argument: {0}")]
    Argument(#[from] ValueError),
    #[error("Call protocol error: {0}")]
    Call(#[from] CallError),
    #[error("Root is not attached to a hub")]
    Detached,
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("Internal root error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Errors raised by the scheduling drivers.
#[derive(Error, Debug, Clone)]
pub enum SchedulerError {
    #[error("Failed to spawn scheduler thread: {0}")]
    ThreadSpawn(String),
    #[error("Scheduler has been shut down")]
    ShutDown,
}

/// Errors related to routing a call to its target root.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("No route to root: {0}")]
    UnknownRoot(String),
    #[error("Root {0} no longer accepts calls")]
    Rejected(String),
}

impl RouteError {
    /// Kind of the error record sent back to the caller.
    pub fn kind(&self) -> &'static str {
        match self {
            RouteError::UnknownRoot(_) => crate::kinds::UNKNOWN_ROOT,
            RouteError::Rejected(_) => crate::kinds::TERMINATED,
        }
    }
}

/// Errors related to the hub.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Root id already in use: {0}")]
    DuplicateRoot(String),
    #[error("Root not found: {0}")]
    RootNotFound(String),
    #[error("No factory registered for root type: {0}")]
    UnknownType(String),
    #[error("Invalid address: {0}")]
    Address(#[from] AddressError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Root error: {0}")]
    Root(#[from] RootError),
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("Failed to start the I/O runtime: {0}")]
    Runtime(String),
    #[error("Roots still running after {timeout:?}: {roots:?}")]
    ShutdownTimeout { timeout: Duration, roots: Vec<String> },
    #[error("Hub is shutting down")]
    ShuttingDown,
}

/// Errors raised while translating wire messages into local calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("Invalid address: {0}")]
    Address(#[from] AddressError),
}

impl DispatchError {
    /// Kind of the error record sent back to the peer.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::ServiceUnavailable(_) => crate::kinds::SERVICE_UNAVAILABLE,
            DispatchError::Address(_) => crate::kinds::UNKNOWN_ROOT,
        }
    }
}

/// Errors related to wire framing.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame of {len} bytes exceeds the maximum of {max} bytes")]
    Oversized { len: usize, max: usize },
    #[error("Failed to encode frame: {0}")]
    Encode(String),
    #[error("Failed to decode frame: {0}")]
    Decode(String),
}

/// Errors related to the link handshake.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("Expected a {expected} system message, got {found}")]
    UnexpectedKind { expected: &'static str, found: String },
    #[error("Malformed handshake field: {0}")]
    MalformedField(&'static str),
    #[error("Handshake refused: {0}")]
    Refused(String),
    #[error("Handshake timed out")]
    Timeout,
}

/// Errors related to network links.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: SocketAddr, reason: String },
    #[error("Failed to connect to {addr}: {reason}")]
    Connect { addr: SocketAddr, reason: String },
    #[error("Link I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Errors raised while launching a child process.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },
    #[error("Child process exited before announcing its port")]
    NoAnnouncement,
    #[error("Child process did not announce its port within {0:?}")]
    Timeout(Duration),
    #[error("Internal launcher error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Errors related to configuration values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("Invalid pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("Invalid network range: {0}")]
    InvalidRange(String),
}
