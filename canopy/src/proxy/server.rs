use std::collections::HashMap;
use std::fmt;
use std::io::Write;

use canopy_api::{Call, ComponentAddress};
use flume::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::clock::nanos;
use crate::config::{ProxyConfig, ServerConfig};
use crate::dispatch::rewrite;
use crate::dispatch::{Dispatcher, Inbound};
use crate::error::{ConfigError, RootError};
use crate::kinds;
use crate::root::{RootBehavior, RootContext};
use crate::wire::handshake::refusal;
use crate::wire::{Hello, Message, NetworkPolicy, SystemKind};

use super::launcher::ANNOUNCEMENT;
use super::link::{self, LinkEvent, LinkSender, Listener, PeerId};
use super::{PurgeTimer, resolve_unsent, send_all};

/// The established parent link.
struct Parent {
    sender: LinkSender,
    /// Service name to the (ingress-rewritten) parent address it was
    /// registered under
    services: Vec<(String, ComponentAddress)>,
}

impl Parent {
    fn peer(&self) -> PeerId {
        self.sender.peer()
    }

    fn exposed(&self) -> Vec<ComponentAddress> {
        self.services.iter().map(|(_, address)| address.clone()).collect()
    }
}

/// # Server Proxy
///
/// The root standing for the parent hub that connected to this process.
///
/// ## Key Responsibilities
/// - Listening for links and admitting peers allowed by the network policy
/// - Accepting exactly one parent; later `HELLO`s are refused
/// - Registering the services the parent exposes
/// - Answering the parent's service lookups with local providers, never
///   with the parent's own addresses
/// - Forwarding calls for roots unknown to this hub to the parent (it is
///   the hub's fallback route)
/// - Terminating when the parent says goodbye or the link drops
pub struct ServerProxy {
    server: ServerConfig,
    config: ProxyConfig,
    policy: NetworkPolicy,
    dispatcher: Dispatcher,
    listener: Option<Listener>,
    /// Accepted links that have not completed the handshake
    pending: HashMap<PeerId, LinkSender>,
    parent: Option<Parent>,
    events: Sender<LinkEvent>,
    inbox: Receiver<LinkEvent>,
    purge: PurgeTimer,
}

impl ServerProxy {
    /// # Errors
    /// `InvalidRange` if an allowed range cannot be parsed.
    pub fn new(server: ServerConfig, config: ProxyConfig) -> Result<Self, ConfigError> {
        let policy = NetworkPolicy::parse(&server.allowed_ranges)?;
        let (events, inbox) = flume::unbounded();
        Ok(Self {
            dispatcher: Dispatcher::new(nanos(config.call_timeout)),
            purge: PurgeTimer::new(config.purge_interval),
            server,
            config,
            policy,
            listener: None,
            pending: HashMap::new(),
            parent: None,
            events,
            inbox,
        })
    }

    fn on_event(&mut self, ctx: &mut RootContext<'_>, event: LinkEvent) {
        match event {
            LinkEvent::Accepted { peer, addr, sender } => {
                debug!(proxy = %ctx.address(), %peer, %addr, "Link accepted; waiting for HELLO");
                self.pending.insert(peer, sender);
            }
            LinkEvent::Messages { peer, messages } => {
                for message in messages {
                    self.on_message(ctx, peer, message);
                }
            }
            LinkEvent::Unsent { peer, messages, reason } => {
                let sender = self
                    .parent
                    .as_ref()
                    .filter(|parent| parent.peer() == peer)
                    .map(|parent| &parent.sender);
                resolve_unsent(ctx, &mut self.dispatcher, sender, messages, &reason);
            }
            LinkEvent::Closed { peer, reason } => {
                self.pending.remove(&peer);
                self.dispatcher.remove_peer(peer);
                if self.parent.as_ref().is_some_and(|parent| parent.peer() == peer) {
                    info!(proxy = %ctx.address(), %peer, reason, "Parent link closed");
                    self.drop_parent(ctx);
                    ctx.shutdown();
                }
            }
            LinkEvent::Launched(mut process) => process.kill(),
            LinkEvent::Connected { sender, .. } => sender.close(),
            LinkEvent::ConnectFailed { .. } => {}
        }
    }

    fn on_message(&mut self, ctx: &mut RootContext<'_>, peer: PeerId, message: Message) {
        if let Some(sender) = self.pending.remove(&peer) {
            self.handshake(ctx, peer, sender, message);
            return;
        }
        let Some(parent) = self.parent.as_ref().filter(|parent| parent.peer() == peer) else {
            debug!(proxy = %ctx.address(), %peer, message = %message, "Dropping message from unknown link");
            return;
        };
        let sender = parent.sender.clone();
        let exposed = parent.exposed();
        let hub = ctx.hub();
        let resolve = |service: &str| hub.as_ref()?.services().locate_excluding(service, &exposed);
        match self.dispatcher.handle_message(message, peer, ctx.time(), resolve) {
            Inbound::Deliver(call) => ctx.send(call),
            Inbound::Respond(message) => {
                sender.send(vec![message]);
            }
            Inbound::System(message) => match SystemKind::of(&message) {
                Some(SystemKind::Goodbye) => {
                    info!(proxy = %ctx.address(), %peer, "Parent said goodbye");
                    sender.close();
                    self.drop_parent(ctx);
                    ctx.shutdown();
                }
                Some(SystemKind::Hello) => {
                    sender.send(vec![refusal("handshake already completed", message.match_id())]);
                }
                _ => debug!(proxy = %ctx.address(), message = %message, "Ignoring system message"),
            },
            Inbound::Ignored => {}
        }
    }

    /// Admits or refuses a link based on its first message.
    fn handshake(&mut self, ctx: &mut RootContext<'_>, peer: PeerId, sender: LinkSender, message: Message) {
        let hello = match Hello::from_message(&message) {
            Ok(hello) => hello,
            Err(e) => {
                warn!(proxy = %ctx.address(), %peer, error = %e, "Link did not open with a valid HELLO");
                sender.send(vec![refusal(&e.to_string(), message.match_id())]);
                sender.close();
                return;
            }
        };
        if self.parent.is_some() {
            warn!(proxy = %ctx.address(), %peer, "Refusing second parent link");
            sender.send(vec![refusal("parent already connected", message.match_id())]);
            sender.close();
            return;
        }

        let mut services = Vec::with_capacity(hello.services.len());
        if let Some(hub) = ctx.hub() {
            for (name, address) in &hello.services {
                match rewrite::ingress_component(address) {
                    Ok(address) => {
                        hub.services().register(name, address.clone());
                        services.push((name.clone(), address));
                    }
                    Err(e) => warn!(proxy = %ctx.address(), service = %name, error = %e, "Cannot register parent service"),
                }
            }
        }
        sender.send(vec![SystemKind::HelloOk.message(message.match_id())]);
        crate::log_link!(peer, "parent", services = services.len());
        info!(
            proxy = %ctx.address(),
            %peer,
            shared_root = ?hello.shared_root,
            file_server_port = ?hello.file_server_port,
            "Parent link established"
        );
        self.parent = Some(Parent { sender, services });
    }

    fn drop_parent(&mut self, ctx: &RootContext<'_>) {
        let Some(parent) = self.parent.take() else {
            return;
        };
        if let Some(hub) = ctx.hub() {
            for (name, address) in &parent.services {
                hub.services().unregister(name, address);
            }
        }
        self.dispatcher.remove_peer(parent.peer());
    }
}

impl RootBehavior for ServerProxy {
    fn activate(&mut self, ctx: &mut RootContext<'_>) -> Result<(), RootError> {
        let hub = ctx.hub().ok_or(RootError::Detached)?;
        let listener = link::listen(
            &hub.io_handle(),
            self.server.bind,
            self.policy.clone(),
            self.config.max_frame_len,
            self.events.clone(),
        )
        .map_err(|e| RootError::ActivationFailed(e.to_string()))?;
        let addr = listener.local_addr();
        if self.server.announce_port {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{ANNOUNCEMENT} {}", addr.port())
                .and_then(|_| stdout.flush())
                .map_err(|e| RootError::ActivationFailed(format!("Cannot announce port: {e}")))?;
        }
        hub.set_fallback(&ctx.controller());
        self.listener = Some(listener);
        info!(proxy = %ctx.address(), %addr, "Server proxy listening");
        Ok(())
    }

    fn process_call(&mut self, ctx: &mut RootContext<'_>, call: Call) -> Result<(), RootError> {
        if call.is_reply_or_error() {
            if let Some((peer, message)) = self.dispatcher.handle_response(&call) {
                match &self.parent {
                    Some(parent) if parent.peer() == peer => {
                        parent.sender.send(vec![message]);
                    }
                    _ => debug!(proxy = %ctx.address(), %peer, "Answer for a link that is gone"),
                }
            }
            return Ok(());
        }
        if call.to().root_id() == ctx.address().root_id() {
            let control = call.to().control_id();
            ctx.fail(&call, kinds::UNKNOWN_CONTROL, format!("Unknown control: {control}"));
            return Ok(());
        }
        let Some(sender) = self.parent.as_ref().map(|parent| parent.sender.clone()) else {
            let root = call.to().root_id().to_string();
            ctx.fail(&call, kinds::UNKNOWN_ROOT, format!("No route to root: {root}"));
            return Ok(());
        };
        match self.dispatcher.handle_invoke(call.clone(), ctx.time()) {
            Ok(message) => {
                sender.send(vec![message]);
            }
            Err(e) => ctx.fail(&call, e.kind(), e.to_string()),
        }
        Ok(())
    }

    fn update(&mut self, ctx: &mut RootContext<'_>) {
        while let Ok(event) = self.inbox.try_recv() {
            self.on_event(ctx, event);
        }
        let now = ctx.time();
        if self.purge.due(now) {
            send_all(ctx, self.dispatcher.purge(now));
        }
    }

    fn terminate(&mut self, ctx: &mut RootContext<'_>) {
        if let Some(listener) = self.listener.take() {
            listener.stop();
        }
        if let Some(parent) = &self.parent {
            parent.sender.send(vec![SystemKind::Goodbye.message(0)]);
            parent.sender.close();
        }
        self.drop_parent(ctx);
        for (_, sender) in self.pending.drain() {
            sender.close();
        }
        send_all(ctx, self.dispatcher.drain_all(kinds::TERMINATED, "Proxy terminated"));
        if let Some(hub) = ctx.hub() {
            hub.clear_fallback(&ctx.controller());
        }
        info!(proxy = %ctx.address(), "Server proxy stopped");
    }
}

impl fmt::Debug for ServerProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerProxy")
            .field("listening", &self.listener.as_ref().map(Listener::local_addr))
            .field("parent", &self.parent.as_ref().map(Parent::peer))
            .field("pending", &self.pending.len())
            .field("sent", &self.dispatcher.pending_sent())
            .finish()
    }
}
