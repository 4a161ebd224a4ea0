//! # Canopy API
//!
//! Canopy runs a forest of independently scheduled actors ("roots") that
//! exchange calls with each other, locally or across process boundaries.
//! This crate holds the data model shared by every layer of the runtime.
//!
//! ## Core Components
//!
//! - **Addresses**: hierarchical component and control addresses with a
//!   slash-delimited textual form that round-trips exactly
//! - **Calls**: the four-variant request/reply protocol with correlation ids
//! - **Values**: the typed argument model carried by calls
//! - **Errors**: validation and protocol errors raised by the model
//!
//! ## Usage Example
//!
//! ```rust
//! use canopy_api::{Call, ControlAddress, Value};
//!
//! let to: ControlAddress = "/synth/osc1!frequency".parse().unwrap();
//! let from: ControlAddress = "/ui/panel!reply".parse().unwrap();
//!
//! let call = Call::invoke(to, from, 0, vec![Value::Number(440.0)]);
//! let reply = call.reply(vec![]).unwrap();
//!
//! assert_eq!(reply.match_id(), call.id());
//! assert_eq!(reply.to(), call.from());
//! ```
//!
//! ## Module Organization
//!
//! - [`address`]: component and control addresses
//! - [`call`]: calls, call types and call ids
//! - [`value`]: typed call arguments
//! - [`errors`]: error types
//! - [`types`]: common type aliases

pub mod address;
pub mod call;
pub mod errors;
pub mod types;
pub mod value;

pub use address::{ComponentAddress, ControlAddress};
pub use call::{Call, CallId, CallType};
pub use errors::{AddressError, CallError, ValueError};
pub use types::{Args, Time};
pub use value::Value;
