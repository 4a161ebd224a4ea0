//! Kinds carried by the structured error record of error replies.
//!
//! A caller can tell failures apart by kind; a synthesized timeout and an
//! error reported by a remote peer have the same shape.

/// No reply arrived within the call timeout.
pub const TIMEOUT: &str = "timeout";

/// The target root terminated before processing the call.
pub const TERMINATED: &str = "terminated";

/// A service name could not be resolved.
pub const SERVICE_UNAVAILABLE: &str = "service-unavailable";

/// The link to the remote peer could not be established.
pub const CONNECTION_FAILED: &str = "connection-failed";

/// No root is registered under the target root id.
pub const UNKNOWN_ROOT: &str = "unknown-root";

/// The target root has no such control.
pub const UNKNOWN_CONTROL: &str = "unknown-control";

/// The target failed while processing the call.
pub const PROCESSING_FAILED: &str = "processing-failed";

/// The message exceeded the frame limit of the link.
pub const MESSAGE_TOO_LARGE: &str = "message-too-large";

/// A root could not be installed.
pub const INSTALL_FAILED: &str = "install-failed";
