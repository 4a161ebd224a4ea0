//! # System Root
//!
//! The `_sys` root present in every hub. It provides the `root-manager`
//! service through which roots are installed and removed, locally or on a
//! peer.
//!
//! ## Controls
//! - `add-root (id, type)`: installs a root; replies with the id
//! - `remove-root (id)`: shuts a root down; replies with the id
//!
//! A root placed on a peer is installed by relaying the call to the
//! management control of the owning client proxy. The peer's answer is
//! relayed back to the original caller.

use std::collections::HashMap;

use canopy_api::{Call, CallId, CallType, ComponentAddress, Value};
use tracing::{debug, warn};

use crate::error::RootError;
use crate::hub::Placement;
use crate::kinds;
use crate::root::{RootBehavior, RootContext};

/// Id of the system root.
pub const SYSTEM_ROOT_ID: &str = "_sys";
/// Service name of the root manager.
pub const ROOT_MANAGER_SERVICE: &str = "root-manager";
/// Control installing a root.
pub const ADD_ROOT: &str = "add-root";
/// Control removing a root.
pub const REMOVE_ROOT: &str = "remove-root";

/// What to do with the routing table once a relayed call succeeds.
#[derive(Debug)]
enum OnSuccess {
    /// Route the new remote root through its proxy.
    AddAlias { root_id: String, proxy: ComponentAddress },
    /// Forget the alias of a removed remote root.
    RemoveAlias { root_id: String, proxy: ComponentAddress },
}

#[derive(Debug)]
struct Relayed {
    original: Call,
    on_success: OnSuccess,
}

/// Behavior of the `_sys` root.
#[derive(Debug, Default)]
pub struct SystemRoot {
    /// Relayed call id to the call it answers
    relayed: HashMap<CallId, Relayed>,
}

impl SystemRoot {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_root(&mut self, ctx: &mut RootContext<'_>, call: Call) -> Result<(), RootError> {
        let id = Value::arg(call.args(), 0)?.expect_text()?.to_string();
        let type_name = Value::arg(call.args(), 1)?.expect_text()?.to_string();
        let Some(hub) = ctx.hub() else {
            return Err(RootError::Detached);
        };
        match hub.install(&id, &type_name) {
            Ok(Placement::Local(_)) => {
                ctx.reply(&call, vec![Value::Text(id)]);
            }
            Ok(Placement::Remote { proxy }) => {
                self.relay(ctx, call, &proxy, ADD_ROOT, OnSuccess::AddAlias {
                    root_id: id,
                    proxy: proxy.clone(),
                })?;
            }
            Err(e) => {
                warn!(root = %id, type_name, error = %e, "Cannot install root");
                ctx.fail(&call, kinds::INSTALL_FAILED, e.to_string());
            }
        }
        Ok(())
    }

    fn remove_root(&mut self, ctx: &mut RootContext<'_>, call: Call) -> Result<(), RootError> {
        let id = Value::arg(call.args(), 0)?.expect_text()?.to_string();
        let Some(hub) = ctx.hub() else {
            return Err(RootError::Detached);
        };
        match hub.controller(&id) {
            Some(controller) if controller.id() == id => {
                controller.shutdown();
                ctx.reply(&call, vec![Value::Text(id)]);
            }
            Some(proxy) => {
                let proxy = proxy.address().clone();
                self.relay(ctx, call, &proxy, REMOVE_ROOT, OnSuccess::RemoveAlias {
                    root_id: id,
                    proxy: proxy.clone(),
                })?;
            }
            None => ctx.fail(&call, kinds::UNKNOWN_ROOT, format!("Unknown root: {id}")),
        }
        Ok(())
    }

    /// Forwards `call` to a management control of `proxy`.
    fn relay(
        &mut self,
        ctx: &mut RootContext<'_>,
        call: Call,
        proxy: &ComponentAddress,
        control: &str,
        on_success: OnSuccess,
    ) -> Result<(), RootError> {
        let forwarded = Call::invoke(
            proxy.control(control)?,
            call.to().clone(),
            ctx.time(),
            call.args().to_vec(),
        );
        debug!(call = %call, via = %proxy, "Relaying root management call");
        self.relayed.insert(forwarded.id(), Relayed {
            original: call,
            on_success,
        });
        ctx.send(forwarded);
        Ok(())
    }

    fn complete(&mut self, ctx: &mut RootContext<'_>, answer: Call) -> Result<(), RootError> {
        let Some(relayed) = self.relayed.remove(&answer.match_id()) else {
            debug!(call = %answer, "No relayed call matches answer");
            return Ok(());
        };
        let succeeded = answer.kind() == CallType::Return;
        if succeeded {
            if let Some(hub) = ctx.hub() {
                match &relayed.on_success {
                    OnSuccess::AddAlias { root_id, proxy } => {
                        if let Some(controller) = hub.controller(proxy.root_id()) {
                            if !hub.add_alias(root_id, &controller) {
                                warn!(root = %root_id, "Root id already routed elsewhere");
                            }
                        }
                    }
                    OnSuccess::RemoveAlias { root_id, proxy } => {
                        if let Some(controller) = hub.controller(proxy.root_id()) {
                            hub.remove_alias(root_id, &controller);
                        }
                    }
                }
            }
        }
        if !succeeded {
            warn!(call = %relayed.original, answer = %answer, "Relayed root management call failed");
            if relayed.original.from().root_id() == ctx.address().root_id() {
                return Ok(());
            }
        }
        let args = answer.args().to_vec();
        let relayed_answer = if succeeded {
            relayed.original.reply(args)?
        } else {
            relayed.original.error(args)?
        };
        if succeeded && !relayed.original.requires_reply() {
            return Ok(());
        }
        ctx.send(relayed_answer);
        Ok(())
    }
}

impl RootBehavior for SystemRoot {
    fn process_call(&mut self, ctx: &mut RootContext<'_>, call: Call) -> Result<(), RootError> {
        if call.is_reply_or_error() {
            return self.complete(ctx, call);
        }
        match call.to().control_id() {
            ADD_ROOT => self.add_root(ctx, call),
            REMOVE_ROOT => self.remove_root(ctx, call),
            other => {
                ctx.fail(&call, kinds::UNKNOWN_CONTROL, format!("Unknown control: {other}"));
                Ok(())
            }
        }
    }

    fn terminate(&mut self, ctx: &mut RootContext<'_>) {
        for (_, relayed) in self.relayed.drain() {
            ctx.fail(&relayed.original, kinds::TERMINATED, "System root terminated");
        }
    }
}
