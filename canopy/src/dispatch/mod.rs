//! # Call Dispatch
//!
//! Makes roots on the other side of a link look like ordinary call
//! targets. A dispatcher belongs to exactly one proxy root and is only
//! touched from that root's update cycle.
//!
//! ## Key Concepts
//! - Sent calls: local requests forwarded to the peer, keyed by call id,
//!   completed by the peer's reply or error or by a synthesized timeout
//! - Received calls: peer messages turned into local requests, keyed by
//!   the local call id, answered back to the peer that sent them
//! - Address rewriting: system addresses crossing the link carry a
//!   remote-origin marker on this side
//!
//! ## Core Algorithm
//!
//! ```text
//! local call --handle_invoke--> Send{match_id = call id} --> peer
//! peer Reply{match_id} --handle_message--> sent[match_id].reply(args) --> caller
//!
//! peer Send{match_id} --handle_message--> local call c, received[c.id] = (msg, peer)
//! local answer to c --handle_response--> Reply{match_id} --> peer
//! ```

mod received;
pub mod rewrite;
mod sent;

use canopy_api::{Call, CallId, CallType, ComponentAddress, ControlAddress, Time, Value};
use tracing::{debug, trace};

use crate::error::DispatchError;
use crate::kinds;
use crate::proxy::PeerId;
use crate::wire::Message;

pub use received::{ReceivedCall, ReceivedCalls};
pub use sent::SentCalls;

/// What the owning proxy must do with an inbound peer message.
#[derive(Debug)]
pub enum Inbound {
    /// Route the call locally.
    Deliver(Call),
    /// Answer the sending peer directly.
    Respond(Message),
    /// A link management message for the proxy itself.
    System(Message),
    /// Nothing left to do.
    Ignored,
}

/// # Dispatcher
///
/// Correlation tables of one proxy root.
#[derive(Debug)]
pub struct Dispatcher {
    sent: SentCalls,
    received: ReceivedCalls,
    /// Age at which a sent call is resolved with a timeout error
    timeout: Time,
}

impl Dispatcher {
    /// # Arguments
    /// * `timeout` - Age, in root time, after which sent calls expire
    pub fn new(timeout: Time) -> Self {
        Self {
            sent: SentCalls::new(),
            received: ReceivedCalls::new(),
            timeout,
        }
    }

    // --- Outbound ---

    /// Turns a local request for a peer root into a `Send` message and
    /// records it until answered.
    pub fn handle_invoke(&mut self, call: Call, now: Time) -> Result<Message, DispatchError> {
        let to = rewrite::egress_control(call.to())?;
        let message = Message::Send {
            to: to.to_string(),
            from: call.from().to_string(),
            args: call.args().to_vec(),
            match_id: call.id().value(),
        };
        trace!(call = %call, "Forwarding call to peer");
        self.sent.insert(call, now);
        Ok(message)
    }

    /// Turns a local request into a `ServiceLookup` for `service`, keeping
    /// the control of the call's target.
    pub fn handle_service_invoke(&mut self, call: Call, service: &str, now: Time) -> Message {
        let message = Message::ServiceLookup {
            service: service.to_string(),
            control: call.to().control_id().to_string(),
            from: call.from().to_string(),
            args: call.args().to_vec(),
            match_id: call.id().value(),
        };
        trace!(call = %call, service, "Forwarding service call to peer");
        self.sent.insert(call, now);
        message
    }

    /// Translates a local answer into a message for the peer whose request
    /// it answers.
    ///
    /// # Returns
    /// `None` if the answer matches no received call (late or spurious).
    pub fn handle_response(&mut self, call: &Call) -> Option<(PeerId, Message)> {
        let Some(received) = self.received.take(call.match_id()) else {
            debug!(call = %call, "Answer matches no received call");
            return None;
        };
        let match_id = received.message.match_id();
        let args = call.args().to_vec();
        let message = match call.kind() {
            CallType::Return => Message::Reply { args, match_id },
            CallType::Error => Message::Error { args, match_id },
            CallType::Invoke | CallType::InvokeQuiet => return None,
        };
        Some((received.peer, message))
    }

    // --- Inbound ---

    /// Interprets a message received from `peer`.
    ///
    /// # Arguments
    /// * `message` - The decoded envelope
    /// * `peer` - The link it arrived on
    /// * `now` - Local time, used as the time code of created calls
    /// * `resolve` - Maps a service name to the local address providing it
    pub fn handle_message(
        &mut self,
        message: Message,
        peer: PeerId,
        now: Time,
        resolve: impl FnOnce(&str) -> Option<ComponentAddress>,
    ) -> Inbound {
        if matches!(message, Message::System { .. }) {
            return Inbound::System(message);
        }
        match &message {
            Message::Send { to, from, args, match_id } => {
                let created = to
                    .parse::<ControlAddress>()
                    .map_err(DispatchError::from)
                    .and_then(|to| self.incoming(to, from, args, now));
                self.admit(created, message.clone(), peer, *match_id)
            }
            Message::ServiceLookup {
                service,
                control,
                from,
                args,
                match_id,
            } => {
                let created = resolve(service)
                    .ok_or_else(|| DispatchError::ServiceUnavailable(service.clone()))
                    .and_then(|provider| Ok(provider.control(control)?))
                    .and_then(|to| self.incoming(to, from, args, now));
                self.admit(created, message.clone(), peer, *match_id)
            }
            Message::Reply { args, match_id } => self.complete(*match_id, args, false),
            Message::Error { args, match_id } => self.complete(*match_id, args, true),
            Message::System { .. } => Inbound::Ignored,
        }
    }

    fn incoming(&self, to: ControlAddress, from: &str, args: &[Value], now: Time) -> Result<Call, DispatchError> {
        let from = rewrite::ingress_control(&from.parse::<ControlAddress>()?)?;
        Ok(Call::invoke(to, from, now, args.to_vec()))
    }

    fn admit(&mut self, created: Result<Call, DispatchError>, message: Message, peer: PeerId, match_id: u64) -> Inbound {
        match created {
            Ok(call) => {
                self.received.insert(call.id(), message, peer);
                Inbound::Deliver(call)
            }
            Err(e) => {
                debug!(%peer, message = %message, error = %e, "Rejecting peer call");
                Inbound::Respond(Message::Error {
                    args: vec![Value::error_record(e.kind(), e.to_string())],
                    match_id,
                })
            }
        }
    }

    fn complete(&mut self, match_id: u64, args: &[Value], failed: bool) -> Inbound {
        let Some(original) = self.sent.take(CallId::from_raw(match_id)) else {
            debug!(match_id, "Peer answer matches no sent call");
            return Inbound::Ignored;
        };
        let answer = if failed {
            original.error(args.to_vec())
        } else if original.requires_reply() {
            original.reply(args.to_vec())
        } else {
            return Inbound::Ignored;
        };
        match answer {
            Ok(answer) => Inbound::Deliver(answer),
            Err(e) => {
                debug!(error = %e, "Cannot complete sent call");
                Inbound::Ignored
            }
        }
    }

    /// Resolves a message the link could not write.
    ///
    /// A request comes back to its local caller as a `message-too-large`
    /// error. A reply becomes a small error for the peer so its caller is
    /// not left waiting. Errors and system messages are dropped.
    pub fn handle_unsent(&mut self, message: Message, reason: &str) -> Inbound {
        match message {
            Message::Send { match_id, .. } | Message::ServiceLookup { match_id, .. } => {
                let Some(original) = self.sent.take(CallId::from_raw(match_id)) else {
                    return Inbound::Ignored;
                };
                match original.error_with(kinds::MESSAGE_TOO_LARGE, reason) {
                    Ok(error) => Inbound::Deliver(error),
                    Err(e) => {
                        debug!(error = %e, "Cannot fail unsent call");
                        Inbound::Ignored
                    }
                }
            }
            Message::Reply { match_id, .. } => Inbound::Respond(Message::Error {
                args: vec![Value::error_record(kinds::MESSAGE_TOO_LARGE, reason)],
                match_id,
            }),
            Message::Error { match_id, .. } | Message::System { match_id, .. } => {
                debug!(match_id, reason, "Dropping unsent message");
                Inbound::Ignored
            }
        }
    }

    // --- Expiry ---

    /// Resolves every sent call older than the timeout with a `Timeout`
    /// error, oldest first.
    pub fn purge(&mut self, now: Time) -> Vec<Call> {
        let cutoff = now.saturating_sub(self.timeout);
        let expired = self.sent.expire(cutoff);
        if !expired.is_empty() {
            debug!(count = expired.len(), "Sent calls timed out");
        }
        expired
            .iter()
            .filter_map(|call| call.error_with(kinds::TIMEOUT, "Timeout").ok())
            .collect()
    }

    /// Resolves every sent call with an error of `kind` and forgets all
    /// received calls.
    pub fn drain_all(&mut self, kind: &str, message: &str) -> Vec<Call> {
        self.received.clear();
        self.sent
            .drain()
            .iter()
            .filter_map(|call| call.error_with(kind, message).ok())
            .collect()
    }

    /// Forgets the calls received from a closed link.
    pub fn remove_peer(&mut self, peer: PeerId) {
        let removed = self.received.remove_peer(peer);
        if removed > 0 {
            debug!(%peer, removed, "Dropped received calls of closed link");
        }
    }

    pub fn pending_sent(&self) -> usize {
        self.sent.len()
    }

    pub fn pending_received(&self) -> usize {
        self.received.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn control(text: &str) -> ControlAddress {
        text.parse().unwrap()
    }

    fn invoke() -> Call {
        Call::invoke(
            control("/peer/osc1!frequency"),
            control("/local/ctl!out"),
            0,
            vec![Value::Number(440.0)],
        )
    }

    fn no_services(_: &str) -> Option<ComponentAddress> {
        None
    }

    #[test]
    fn test_reply_completes_original() {
        let mut dispatcher = Dispatcher::new(1_000);
        let call = invoke();
        let message = dispatcher.handle_invoke(call.clone(), 10).unwrap();
        assert_eq!(message.match_id(), call.id().value());

        let reply = Message::Reply {
            args: vec![Value::Int(1)],
            match_id: call.id().value(),
        };
        match dispatcher.handle_message(reply, Uuid::new_v4(), 20, no_services) {
            Inbound::Deliver(answer) => {
                assert_eq!(answer.kind(), CallType::Return);
                assert_eq!(answer.match_id(), call.id());
                assert_eq!(answer.to(), call.from());
                assert_eq!(answer.args(), &[Value::Int(1)]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(dispatcher.pending_sent(), 0);
    }

    #[test]
    fn test_unmatched_answer_ignored() {
        let mut dispatcher = Dispatcher::new(1_000);
        let error = Message::Error { args: vec![], match_id: 999_999 };
        assert!(matches!(
            dispatcher.handle_message(error, Uuid::new_v4(), 0, no_services),
            Inbound::Ignored
        ));
    }

    #[test]
    fn test_quiet_call_reply_dropped_but_error_delivered() {
        let mut dispatcher = Dispatcher::new(1_000);
        let quiet = Call::invoke_quiet(control("/peer/a!x"), control("/local/b!y"), 0, vec![]);
        dispatcher.handle_invoke(quiet.clone(), 0).unwrap();
        let reply = Message::Reply { args: vec![], match_id: quiet.id().value() };
        assert!(matches!(
            dispatcher.handle_message(reply, Uuid::new_v4(), 0, no_services),
            Inbound::Ignored
        ));

        let quiet = Call::invoke_quiet(control("/peer/a!x"), control("/local/b!y"), 0, vec![]);
        dispatcher.handle_invoke(quiet.clone(), 0).unwrap();
        let error = Message::Error { args: vec![], match_id: quiet.id().value() };
        assert!(matches!(
            dispatcher.handle_message(error, Uuid::new_v4(), 0, no_services),
            Inbound::Deliver(answer) if answer.kind() == CallType::Error
        ));
    }

    #[test]
    fn test_inbound_send_round_trip() {
        let mut dispatcher = Dispatcher::new(1_000);
        let peer = Uuid::new_v4();
        let send = Message::Send {
            to: "/synth/osc1!frequency".to_string(),
            from: "/_sys!add-root".to_string(),
            args: vec![],
            match_id: 42,
        };
        let Inbound::Deliver(call) = dispatcher.handle_message(send, peer, 5, no_services) else {
            panic!("expected a call");
        };
        assert_eq!(call.kind(), CallType::Invoke);
        assert_eq!(call.from().as_str(), "/_remote_sys!add-root");
        assert_eq!(call.time_code(), 5);

        let (to_peer, message) = dispatcher.handle_response(&call.reply(vec![]).unwrap()).unwrap();
        assert_eq!(to_peer, peer);
        assert_eq!(message, Message::Reply { args: vec![], match_id: 42 });
        assert!(dispatcher.handle_response(&call.reply(vec![]).unwrap()).is_none());
    }

    #[test]
    fn test_unresolved_service_answered_with_error() {
        let mut dispatcher = Dispatcher::new(1_000);
        let lookup = Message::ServiceLookup {
            service: "mixer".to_string(),
            control: "gain".to_string(),
            from: "/ui!out".to_string(),
            args: vec![],
            match_id: 7,
        };
        match dispatcher.handle_message(lookup, Uuid::new_v4(), 0, no_services) {
            Inbound::Respond(Message::Error { args, match_id }) => {
                assert_eq!(match_id, 7);
                assert_eq!(args[0].error_kind(), Some(kinds::SERVICE_UNAVAILABLE));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(dispatcher.pending_received(), 0);
    }

    #[test]
    fn test_service_lookup_resolved() {
        let mut dispatcher = Dispatcher::new(1_000);
        let lookup = Message::ServiceLookup {
            service: "mixer".to_string(),
            control: "gain".to_string(),
            from: "/ui!out".to_string(),
            args: vec![],
            match_id: 7,
        };
        let resolve = |service: &str| {
            assert_eq!(service, "mixer");
            "/audio/mixer".parse::<ComponentAddress>().ok()
        };
        let Inbound::Deliver(call) = dispatcher.handle_message(lookup, Uuid::new_v4(), 0, resolve) else {
            panic!("expected a call");
        };
        assert_eq!(call.to().as_str(), "/audio/mixer!gain");
    }

    #[test]
    fn test_egress_strips_marker() {
        let mut dispatcher = Dispatcher::new(1_000);
        let call = Call::invoke(control("/_remote_sys!add-root"), control("/local!out"), 0, vec![]);
        let Message::Send { to, .. } = dispatcher.handle_invoke(call, 0).unwrap() else {
            panic!("expected a send");
        };
        assert_eq!(to, "/_sys!add-root");
    }

    #[test]
    fn test_purge_order_and_cutoff() {
        let mut dispatcher = Dispatcher::new(100);
        let first = invoke();
        let second = invoke();
        dispatcher.handle_invoke(first.clone(), 0).unwrap();
        dispatcher.handle_invoke(second.clone(), 50).unwrap();

        assert!(dispatcher.purge(99).is_empty());
        let expired = dispatcher.purge(120);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].match_id(), first.id());
        assert_eq!(expired[0].args()[0].error_kind(), Some(kinds::TIMEOUT));
        assert_eq!(expired[0].args()[0].error_message(), Some("Timeout"));

        let expired = dispatcher.purge(150);
        assert_eq!(expired[0].match_id(), second.id());
        assert_eq!(dispatcher.pending_sent(), 0);
    }

    #[test]
    fn test_drain_all() {
        let mut dispatcher = Dispatcher::new(100);
        dispatcher.handle_invoke(invoke(), 0).unwrap();
        dispatcher.handle_service_invoke(invoke(), "root-manager", 0);
        let drained = dispatcher.drain_all(kinds::TERMINATED, "Proxy terminated");
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().all(|call| call.args()[0].error_kind() == Some(kinds::TERMINATED)));
    }

    #[test]
    fn test_unsent_request_fails_caller() {
        let mut dispatcher = Dispatcher::new(1_000);
        let call = invoke();
        let message = dispatcher.handle_invoke(call.clone(), 0).unwrap();

        match dispatcher.handle_unsent(message.clone(), "frame too large") {
            Inbound::Deliver(error) => {
                assert_eq!(error.kind(), CallType::Error);
                assert_eq!(error.match_id(), call.id());
                assert_eq!(error.to(), call.from());
                assert_eq!(error.args()[0].error_kind(), Some(kinds::MESSAGE_TOO_LARGE));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(dispatcher.pending_sent(), 0);
        assert!(dispatcher.purge(10_000).is_empty());
        assert!(matches!(dispatcher.handle_unsent(message, "again"), Inbound::Ignored));
    }

    #[test]
    fn test_unsent_reply_becomes_error_for_peer() {
        let mut dispatcher = Dispatcher::new(1_000);
        let reply = Message::Reply {
            args: vec![Value::Text("x".repeat(64))],
            match_id: 42,
        };
        match dispatcher.handle_unsent(reply, "frame too large") {
            Inbound::Respond(Message::Error { args, match_id }) => {
                assert_eq!(match_id, 42);
                assert_eq!(args[0].error_kind(), Some(kinds::MESSAGE_TOO_LARGE));
            }
            other => panic!("unexpected {other:?}"),
        }

        let error = Message::Error { args: vec![], match_id: 43 };
        assert!(matches!(dispatcher.handle_unsent(error, "frame too large"), Inbound::Ignored));
    }
}
