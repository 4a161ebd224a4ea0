//! # Call Protocol
//!
//! A call is an immutable, addressed message between two controls. Four
//! variants make up the protocol:
//!
//! - `Invoke`: a request whose reply is mandatory
//! - `InvokeQuiet`: a request answered only on error
//! - `Return`: the successful answer to a request
//! - `Error`: the failed answer to a request
//!
//! ## Correlation
//! Every call gets a process-local id at creation. Requests carry their own
//! id as `match_id`; answers carry the id of the request they answer, and
//! swap its `to`/`from` addresses. The request's time code is carried into
//! the answer unchanged.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::address::ControlAddress;
use crate::errors::CallError;
use crate::types::{Args, Time};
use crate::value::Value;

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-local call identifier.
///
/// Ids increase monotonically, so they never repeat among live calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(u64);

impl CallId {
    /// Allocates the next id.
    pub fn next() -> Self {
        CallId(NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw id, e.g. one received as a wire correlation id.
    pub const fn from_raw(raw: u64) -> Self {
        CallId(raw)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The protocol variant of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    Invoke,
    InvokeQuiet,
    Return,
    Error,
}

impl CallType {
    /// True for `Invoke` and `InvokeQuiet`.
    pub const fn is_request(self) -> bool {
        matches!(self, CallType::Invoke | CallType::InvokeQuiet)
    }
}

/// An immutable, correlated message between two controls.
#[derive(Clone)]
pub struct Call {
    to: ControlAddress,
    from: ControlAddress,
    kind: CallType,
    args: Args,
    id: CallId,
    match_id: CallId,
    time_code: Time,
}

impl Call {
    /// Creates a request whose reply is mandatory.
    pub fn invoke(to: ControlAddress, from: ControlAddress, time_code: Time, args: Vec<Value>) -> Self {
        Self::request(CallType::Invoke, to, from, time_code, args)
    }

    /// Creates a request that is only answered on error.
    pub fn invoke_quiet(to: ControlAddress, from: ControlAddress, time_code: Time, args: Vec<Value>) -> Self {
        Self::request(CallType::InvokeQuiet, to, from, time_code, args)
    }

    fn request(kind: CallType, to: ControlAddress, from: ControlAddress, time_code: Time, args: Vec<Value>) -> Self {
        let id = CallId::next();
        Self {
            to,
            from,
            kind,
            args: Arc::from(args),
            id,
            match_id: id,
            time_code,
        }
    }

    /// Derives the successful answer to this request.
    pub fn reply(&self, args: Vec<Value>) -> Result<Call, CallError> {
        self.answer(CallType::Return, args)
    }

    /// Derives the failed answer to this request.
    pub fn error(&self, args: Vec<Value>) -> Result<Call, CallError> {
        self.answer(CallType::Error, args)
    }

    /// Derives an error answer carrying a structured error record.
    pub fn error_with(&self, kind: &str, message: impl Into<String>) -> Result<Call, CallError> {
        self.error(vec![Value::error_record(kind, message)])
    }

    fn answer(&self, kind: CallType, args: Vec<Value>) -> Result<Call, CallError> {
        if !self.kind.is_request() {
            return Err(CallError::NotRequest {
                id: self.id,
                kind: self.kind,
            });
        }
        Ok(Self {
            to: self.from.clone(),
            from: self.to.clone(),
            kind,
            args: Arc::from(args),
            id: CallId::next(),
            match_id: self.id,
            time_code: self.time_code,
        })
    }

    pub fn to(&self) -> &ControlAddress {
        &self.to
    }

    pub fn from(&self) -> &ControlAddress {
        &self.from
    }

    pub fn kind(&self) -> CallType {
        self.kind
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn match_id(&self) -> CallId {
        self.match_id
    }

    pub fn time_code(&self) -> Time {
        self.time_code
    }

    /// True if an answer must be sent even on success.
    pub fn requires_reply(&self) -> bool {
        self.kind == CallType::Invoke
    }

    /// True for `Invoke` and `InvokeQuiet`.
    pub fn is_request(&self) -> bool {
        self.kind.is_request()
    }

    /// True for `Return` and `Error`.
    pub fn is_reply_or_error(&self) -> bool {
        !self.kind.is_request()
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("kind", &self.kind)
            .field("to", &self.to.as_str())
            .field("from", &self.from.as_str())
            .field("id", &self.id.0)
            .field("match_id", &self.match_id.0)
            .field("time_code", &self.time_code)
            .field("args", &self.args.len())
            .finish()
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} -> {} (id {}, match {})",
            self.kind, self.from, self.to, self.id, self.match_id
        )
    }
}
