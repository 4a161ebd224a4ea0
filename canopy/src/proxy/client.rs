use std::collections::VecDeque;
use std::fmt;

use canopy_api::{Call, ComponentAddress, Time};
use flume::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::clock::nanos;
use crate::config::{ProxyConfig, ProxyRegistration, ProxyTarget};
use crate::dispatch::{Dispatcher, Inbound};
use crate::error::{HandshakeError, RootError};
use crate::hub::Hub;
use crate::kinds;
use crate::root::{RootBehavior, RootContext};
use crate::sys_root::{ADD_ROOT, REMOVE_ROOT, ROOT_MANAGER_SERVICE};
use crate::wire::handshake::check_answer;
use crate::wire::{Hello, Message, SystemKind};

use super::launcher::ProcessHandle;
use super::link::{self, LinkEvent, LinkSender, PeerId};
use super::{PurgeTimer, fail_all, resolve_unsent, send_all};

/// Match id of the `HELLO` sent by a client.
const HELLO_MATCH_ID: u64 = 1;

enum LinkState {
    /// No link; the next forwarded call starts one.
    Idle,
    /// Launching and/or connecting.
    Connecting,
    /// `HELLO` sent, waiting for the answer.
    Handshaking { sender: LinkSender, since: Time },
    /// Call traffic flows.
    Ready { sender: LinkSender },
}

impl LinkState {
    fn name(&self) -> &'static str {
        match self {
            LinkState::Idle => "idle",
            LinkState::Connecting => "connecting",
            LinkState::Handshaking { .. } => "handshaking",
            LinkState::Ready { .. } => "ready",
        }
    }

    fn sender(&self) -> Option<&LinkSender> {
        match self {
            LinkState::Handshaking { sender, .. } | LinkState::Ready { sender } => Some(sender),
            LinkState::Idle | LinkState::Connecting => None,
        }
    }
}

/// # Client Proxy
///
/// The root standing for a peer hub this process reaches out to. Roots
/// placed on the peer by its registration are routed here.
///
/// ## Key Responsibilities
/// - Connecting lazily on the first forwarded call, launching the peer
///   process first when the registration says so
/// - Holding calls back until the handshake has succeeded
/// - Turning `add-root` / `remove-root` on its own address into
///   `root-manager` service lookups on the peer
/// - Answering peer calls and claiming return routes for them
/// - Resolving stale calls with timeout errors
///
/// ## Link States
///
/// ```text
/// Idle --first call--> Connecting --Connected--> Handshaking --HELLO_OK--> Ready
///   ^                      |                          |                      |
///   +---- failure ---------+--------------------------+------ link lost -----+
/// ```
pub struct ClientProxy {
    registration: ProxyRegistration,
    config: ProxyConfig,
    dispatcher: Dispatcher,
    state: LinkState,
    /// Calls waiting for the handshake, in arrival order
    queued: VecDeque<Call>,
    events: Sender<LinkEvent>,
    inbox: Receiver<LinkEvent>,
    process: Option<ProcessHandle>,
    purge: PurgeTimer,
}

impl ClientProxy {
    pub fn new(registration: ProxyRegistration, config: ProxyConfig) -> Self {
        let (events, inbox) = flume::unbounded();
        Self {
            dispatcher: Dispatcher::new(nanos(config.call_timeout)),
            purge: PurgeTimer::new(config.purge_interval),
            registration,
            config,
            state: LinkState::Idle,
            queued: VecDeque::new(),
            events,
            inbox,
            process: None,
        }
    }

    fn hub(ctx: &RootContext<'_>) -> Result<std::sync::Arc<Hub>, RootError> {
        ctx.hub().ok_or(RootError::Detached)
    }

    /// Starts connecting in the background.
    fn connect(&mut self, ctx: &RootContext<'_>) -> Result<(), RootError> {
        let hub = Self::hub(ctx)?;
        let handle = hub.io_handle();
        let events = self.events.clone();
        match &self.registration.target {
            ProxyTarget::Connect(addr) => {
                debug!(proxy = %ctx.address(), %addr, "Connecting to peer");
                link::connect(&handle, *addr, self.config.connect_timeout, self.config.max_frame_len, events);
            }
            ProxyTarget::Launch(spec) => {
                debug!(proxy = %ctx.address(), program = %spec.program.display(), "Launching peer");
                link::launch_and_connect(
                    &handle,
                    hub.launcher(),
                    spec.clone(),
                    self.config.connect_timeout,
                    self.config.max_frame_len,
                    events,
                );
            }
        }
        self.state = LinkState::Connecting;
        Ok(())
    }

    /// Sends a request to the peer, or holds it until the link is ready.
    fn forward(&mut self, ctx: &RootContext<'_>, call: Call) -> Result<(), RootError> {
        match &self.state {
            LinkState::Ready { sender } => {
                let sender = sender.clone();
                self.transmit(ctx, &sender, call);
                Ok(())
            }
            LinkState::Idle => {
                self.queued.push_back(call);
                self.connect(ctx)
            }
            LinkState::Connecting | LinkState::Handshaking { .. } => {
                self.queued.push_back(call);
                Ok(())
            }
        }
    }

    fn transmit(&mut self, ctx: &RootContext<'_>, sender: &LinkSender, call: Call) {
        let now = ctx.time();
        let message = if call.to().root_id() == ctx.address().root_id() {
            self.dispatcher.handle_service_invoke(call, ROOT_MANAGER_SERVICE, now)
        } else {
            match self.dispatcher.handle_invoke(call.clone(), now) {
                Ok(message) => message,
                Err(e) => {
                    ctx.fail(&call, e.kind(), e.to_string());
                    return;
                }
            }
        };
        // A closed link surfaces as a Closed event; the call then times out.
        sender.send(vec![message]);
    }

    fn hello(&self, ctx: &RootContext<'_>) -> Hello {
        let mut hello = Hello {
            shared_root: self.config.shared_root.clone(),
            file_server_port: self.config.file_server_port,
            ..Hello::default()
        };
        if let Some(hub) = ctx.hub() {
            for service in &self.config.exposed_services {
                match hub.services().locate(service) {
                    Some(address) => {
                        hello.services.insert(service.clone(), address);
                    }
                    None => warn!(proxy = %ctx.address(), service, "Exposed service is not registered"),
                }
            }
        }
        hello
    }

    /// Drops the link and fails every held call.
    fn fail_link(&mut self, ctx: &RootContext<'_>, reason: &str) {
        warn!(proxy = %ctx.address(), state = self.state.name(), reason, "Link to peer failed");
        if let Some(sender) = self.state.sender() {
            sender.close();
        }
        self.state = LinkState::Idle;
        if let Some(mut process) = self.process.take() {
            process.kill();
        }
        let message = format!("Connection to {} failed: {reason}", self.registration.name);
        fail_all(ctx, self.queued.drain(..), kinds::CONNECTION_FAILED, &message);
    }

    fn on_event(&mut self, ctx: &mut RootContext<'_>, event: LinkEvent) {
        match event {
            LinkEvent::Launched(mut process) => {
                if matches!(self.state, LinkState::Connecting) {
                    self.process = Some(process);
                } else {
                    process.kill();
                }
            }
            LinkEvent::Connected { peer, addr, sender } => {
                if !matches!(self.state, LinkState::Connecting) {
                    sender.close();
                    return;
                }
                crate::log_link!(peer, "handshaking", %addr);
                sender.send(vec![self.hello(ctx).to_message(HELLO_MATCH_ID)]);
                self.state = LinkState::Handshaking {
                    sender,
                    since: ctx.time(),
                };
            }
            LinkEvent::ConnectFailed { reason } => {
                if matches!(self.state, LinkState::Connecting) {
                    self.fail_link(ctx, &reason);
                }
            }
            LinkEvent::Accepted { sender, .. } => sender.close(),
            LinkEvent::Messages { peer, messages } => {
                for message in messages {
                    self.on_message(ctx, peer, message);
                }
            }
            LinkEvent::Unsent { peer, messages, reason } => {
                let sender = self.state.sender().filter(|sender| sender.peer() == peer);
                resolve_unsent(ctx, &mut self.dispatcher, sender, messages, &reason);
            }
            LinkEvent::Closed { peer, reason } => {
                if self.state.sender().is_some_and(|sender| sender.peer() == peer) {
                    match self.state {
                        LinkState::Handshaking { .. } => self.fail_link(ctx, &reason),
                        _ => {
                            info!(proxy = %ctx.address(), %peer, reason, "Link to peer lost");
                            self.state = LinkState::Idle;
                            if let Some(mut process) = self.process.take() {
                                process.kill();
                            }
                        }
                    }
                }
                self.dispatcher.remove_peer(peer);
            }
        }
    }

    fn on_message(&mut self, ctx: &mut RootContext<'_>, peer: PeerId, message: Message) {
        let sender = match &self.state {
            LinkState::Handshaking { sender, .. } if sender.peer() == peer => {
                match check_answer(&message) {
                    Ok(()) => {
                        let sender = sender.clone();
                        crate::log_link!(peer, "ready");
                        self.state = LinkState::Ready { sender: sender.clone() };
                        let queued: Vec<Call> = self.queued.drain(..).collect();
                        for call in queued {
                            self.transmit(ctx, &sender, call);
                        }
                    }
                    Err(e @ HandshakeError::Refused(_)) => {
                        warn!(proxy = %ctx.address(), %peer, error = %e, "Peer refused the link");
                        self.fail_link(ctx, &e.to_string());
                    }
                    Err(e) => {
                        warn!(proxy = %ctx.address(), %peer, error = %e, "Unexpected message during handshake");
                        self.fail_link(ctx, &e.to_string());
                    }
                }
                return;
            }
            LinkState::Ready { sender } if sender.peer() == peer => sender.clone(),
            _ => {
                debug!(proxy = %ctx.address(), %peer, message = %message, "Dropping message from inactive link");
                return;
            }
        };

        let hub = ctx.hub();
        let exposed = &self.config.exposed_services;
        let resolve = |service: &str| -> Option<ComponentAddress> {
            if !exposed.iter().any(|name| name == service) {
                return None;
            }
            hub.as_ref()?.services().locate(service)
        };
        match self.dispatcher.handle_message(message, peer, ctx.time(), resolve) {
            Inbound::Deliver(call) => {
                if call.is_request() {
                    self.claim_return_route(ctx, &call);
                }
                ctx.send(call);
            }
            Inbound::Respond(message) => {
                sender.send(vec![message]);
            }
            Inbound::System(message) => match SystemKind::of(&message) {
                Some(SystemKind::Goodbye) => {
                    info!(proxy = %ctx.address(), %peer, "Peer said goodbye");
                    self.state = LinkState::Idle;
                    sender.close();
                    ctx.shutdown();
                }
                _ => debug!(proxy = %ctx.address(), message = %message, "Ignoring system message"),
            },
            Inbound::Ignored => {}
        }
    }

    /// Routes answers for a peer root through this proxy, unless the root
    /// id is already taken.
    fn claim_return_route(&self, ctx: &RootContext<'_>, call: &Call) {
        let Some(hub) = ctx.hub() else {
            return;
        };
        let root_id = call.from().root_id();
        if !hub.add_alias(root_id, &ctx.controller()) {
            debug!(proxy = %ctx.address(), root = root_id, "Return route already taken");
        }
    }
}

impl RootBehavior for ClientProxy {
    fn activate(&mut self, ctx: &mut RootContext<'_>) -> Result<(), RootError> {
        info!(proxy = %ctx.address(), registration = %self.registration.name, "Client proxy ready");
        Ok(())
    }

    fn process_call(&mut self, ctx: &mut RootContext<'_>, call: Call) -> Result<(), RootError> {
        if call.is_reply_or_error() {
            let response = self.dispatcher.handle_response(&call);
            if let (Some((peer, message)), LinkState::Ready { sender }) = (response, &self.state) {
                if sender.peer() == peer {
                    sender.send(vec![message]);
                }
            }
            return Ok(());
        }
        if call.to().root_id() == ctx.address().root_id() {
            let control = call.to().control_id();
            if control != ADD_ROOT && control != REMOVE_ROOT {
                ctx.fail(&call, kinds::UNKNOWN_CONTROL, format!("Unknown control: {control}"));
                return Ok(());
            }
        }
        self.forward(ctx, call)
    }

    fn update(&mut self, ctx: &mut RootContext<'_>) {
        while let Ok(event) = self.inbox.try_recv() {
            self.on_event(ctx, event);
        }
        let now = ctx.time();
        if let LinkState::Handshaking { since, .. } = self.state {
            if now.saturating_sub(since) > nanos(self.config.connect_timeout) {
                self.fail_link(ctx, &HandshakeError::Timeout.to_string());
            }
        }
        if self.purge.due(now) {
            send_all(ctx, self.dispatcher.purge(now));
        }
    }

    fn terminate(&mut self, ctx: &mut RootContext<'_>) {
        if let Some(sender) = self.state.sender() {
            sender.send(vec![SystemKind::Goodbye.message(0)]);
            sender.close();
        }
        self.state = LinkState::Idle;
        fail_all(ctx, self.queued.drain(..), kinds::TERMINATED, "Proxy terminated");
        send_all(ctx, self.dispatcher.drain_all(kinds::TERMINATED, "Proxy terminated"));
        if let Some(mut process) = self.process.take() {
            process.kill();
        }
        info!(proxy = %ctx.address(), "Client proxy stopped");
    }
}

impl fmt::Debug for ClientProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientProxy")
            .field("registration", &self.registration.name)
            .field("state", &self.state.name())
            .field("queued", &self.queued.len())
            .field("sent", &self.dispatcher.pending_sent())
            .finish()
    }
}
