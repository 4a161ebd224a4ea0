use std::sync::Arc;

use crate::value::Value;

// Type aliases for common types

/// Immutable, cheaply clonable argument list of a call.
pub type Args = Arc<[Value]>;

/// Logical time in nanoseconds, relative to the hub clock origin.
pub type Time = i64;
