//! # Model Error Types
//!
//! Errors raised while constructing or inspecting the data model. Every
//! failure here is deterministic: invalid input is rejected, never repaired.
//!
//! ## Core Components
//!
//! - `AddressError`: malformed component or control addresses
//! - `CallError`: protocol misuse, such as replying to a reply
//! - `ValueError`: argument type mismatches

use thiserror::Error;

use crate::call::{CallId, CallType};

/// Errors raised while parsing or deriving addresses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// The input was empty.
    #[error("Address is empty")]
    Empty,

    /// The address did not start with `/`.
    #[error("Address must start with '/': {0}")]
    NotAbsolute(String),

    /// Two separators were adjacent, or the address ended with one.
    #[error("Address contains an empty segment: {0}")]
    EmptySegment(String),

    /// The first segment is not a legal root id.
    #[error("Invalid root id: {0}")]
    InvalidRootId(String),

    /// A child segment is not a legal component id.
    #[error("Invalid component id: {0}")]
    InvalidComponentId(String),

    /// The control part is not a legal control id.
    #[error("Invalid control id: {0}")]
    InvalidControlId(String),

    /// A control address was expected but no `!` separator was found.
    #[error("Control address is missing its control: {0}")]
    MissingControl(String),

    /// A component address contained a control separator.
    #[error("Unexpected control separator in component address: {0}")]
    UnexpectedControl(String),
}

/// Errors raised by call protocol operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Only INVOKE and INVOKE_QUIET calls can be answered.
    #[error("Call {id} of type {kind:?} is not a request and cannot be answered")]
    NotRequest { id: CallId, kind: CallType },
}

/// Errors raised when interpreting call arguments.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// The value had a different type than the one required.
    #[error("Expected {expected} but found {found}")]
    UnexpectedType {
        expected: &'static str,
        found: &'static str,
    },

    /// The argument list was shorter than required.
    #[error("Missing argument at index {0}")]
    MissingArgument(usize),
}
