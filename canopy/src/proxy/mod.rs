//! # Proxy Roots
//!
//! Roots that stand for the other side of a link inside the local forest.
//!
//! ## Core Components
//!
//! - [`ClientProxy`]: reaches a peer (launching it first if configured),
//!   forwards calls for the roots placed there and relays root management
//! - [`ServerProxy`]: accepts a single parent link, exposes local services
//!   to it and forwards calls for unknown roots to the parent
//! - [`link`]: the TCP transport both roles run on
//! - [`launcher`]: child process startup
//!
//! Both roles hold a [`Dispatcher`](crate::dispatch::Dispatcher) and purge
//! it on their own cycle, so a dead link resolves every in-flight call
//! with a timeout error.

mod client;
pub mod launcher;
pub mod link;
mod server;

use std::time::Duration;

use canopy_api::{Call, Time};

use crate::clock::nanos;
use crate::dispatch::{Dispatcher, Inbound};
use crate::root::RootContext;
use crate::wire::Message;

pub use client::ClientProxy;
pub use launcher::{CommandLauncher, Launched, Launcher, ProcessHandle};
pub use link::{LinkEvent, LinkSender, PeerId};
pub use server::ServerProxy;

/// Runs a purge at most once per interval of root time.
#[derive(Debug)]
struct PurgeTimer {
    interval: Time,
    last: Option<Time>,
}

impl PurgeTimer {
    fn new(interval: Duration) -> Self {
        Self {
            interval: nanos(interval),
            last: None,
        }
    }

    fn due(&mut self, now: Time) -> bool {
        match self.last {
            Some(last) if now.saturating_sub(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Answers every request in `calls` with an error of `kind`.
fn fail_all(ctx: &RootContext<'_>, calls: impl IntoIterator<Item = Call>, kind: &str, message: &str) {
    for call in calls {
        ctx.fail(&call, kind, message);
    }
}

/// Sends answers synthesized by the dispatcher.
fn send_all(ctx: &RootContext<'_>, calls: Vec<Call>) {
    for call in calls {
        ctx.send(call);
    }
}

/// Answers messages the link handed back unwritten.
///
/// `sender` is the live link to the peer the messages were meant for, if
/// there still is one.
fn resolve_unsent(
    ctx: &RootContext<'_>,
    dispatcher: &mut Dispatcher,
    sender: Option<&LinkSender>,
    messages: Vec<Message>,
    reason: &str,
) {
    for message in messages {
        match dispatcher.handle_unsent(message, reason) {
            Inbound::Deliver(call) => ctx.send(call),
            Inbound::Respond(message) => {
                if let Some(sender) = sender {
                    sender.send(vec![message]);
                }
            }
            Inbound::System(_) | Inbound::Ignored => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purge_timer() {
        let mut timer = PurgeTimer::new(Duration::from_nanos(100));
        assert!(timer.due(0));
        assert!(!timer.due(50));
        assert!(timer.due(100));
        assert!(!timer.due(199));
        assert!(timer.due(250));
    }
}
