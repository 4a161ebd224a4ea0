//! # Hub
//!
//! The process-scoped registry every root is bound to. It is created once at
//! startup and handed to the components that need lookups; nothing in the
//! runtime lives in static mutable state.
//!
//! ## Key Concepts
//! - Routing table: root id to the controller receiving its calls; proxies
//!   add aliases for roots living on the other side of a link
//! - Fallback route: receives calls for unknown roots (the parent link of a
//!   server process)
//! - Service registry: symbolic service names to component addresses
//! - Root factories and proxy registrations: decide where a new root lives
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use canopy::{Hub, HubConfig};
//!
//! let hub = Hub::new(HubConfig::default()).unwrap();
//! // install roots, dispatch calls ...
//! hub.shutdown(Duration::from_secs(5)).unwrap();
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use canopy_api::{Call, ComponentAddress, Time, Value};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{DriverKind, HubConfig, ProxyConfig, ProxyMatcher, ProxyRegistration, ServerConfig};
use crate::error::{HubError, RouteError};
use crate::proxy::{ClientProxy, CommandLauncher, Launcher, ServerProxy};
use crate::root::{Controller, Root, RootBehavior};
use crate::scheduler::{Driver, SharedScheduler};
use crate::services::ServiceRegistry;
use crate::sys_root::{REMOVE_ROOT, ROOT_MANAGER_SERVICE, SYSTEM_ROOT_ID, SystemRoot};

/// Creates the behavior of a root installed by type name.
pub type RootFactory = Arc<dyn Fn(&str) -> Box<dyn RootBehavior> + Send + Sync>;

/// Root id of the server proxy installed by [`Hub::serve`].
pub const SERVER_ROOT_ID: &str = "_server";

/// Where an installed root ended up.
#[derive(Debug, Clone)]
pub enum Placement {
    /// Created in this process.
    Local(Controller),
    /// Owned by the peer behind the given client proxy.
    Remote { proxy: ComponentAddress },
}

struct ProxyRoute {
    matcher: ProxyMatcher,
    proxy: Controller,
}

enum IoRuntime {
    Owned {
        runtime: Mutex<Option<Runtime>>,
        handle: Handle,
    },
    Borrowed(Handle),
}

impl IoRuntime {
    fn handle(&self) -> Handle {
        match self {
            IoRuntime::Owned { handle, .. } => handle.clone(),
            IoRuntime::Borrowed(handle) => handle.clone(),
        }
    }

    fn shutdown(&self) {
        if let IoRuntime::Owned { runtime, .. } = self {
            if let Some(runtime) = runtime.lock().unwrap_or_else(PoisonError::into_inner).take() {
                runtime.shutdown_background();
            }
        }
    }
}

/// Builder for a [`Hub`] with non-default collaborators.
pub struct HubBuilder {
    config: HubConfig,
    clock: Option<Arc<dyn Clock>>,
    launcher: Option<Arc<dyn Launcher>>,
    io: Option<Handle>,
}

impl HubBuilder {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            clock: None,
            launcher: None,
            io: None,
        }
    }

    /// Replaces the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replaces the child-process launcher used by client proxies.
    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Runs network I/O on an existing tokio runtime instead of an owned one.
    pub fn io_handle(mut self, handle: Handle) -> Self {
        self.io = Some(handle);
        self
    }

    /// Starts the scheduler and installs the system root.
    pub fn build(self) -> Result<Arc<Hub>, HubError> {
        self.config.validate()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let scheduler = SharedScheduler::new(self.config.scheduler_threads, self.config.tick, Arc::clone(&clock))?;
        let io = match self.io {
            Some(handle) => IoRuntime::Borrowed(handle),
            None => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .thread_name("canopy-io")
                    .enable_all()
                    .build()
                    .map_err(|e| HubError::Runtime(e.to_string()))?;
                let handle = runtime.handle().clone();
                IoRuntime::Owned {
                    runtime: Mutex::new(Some(runtime)),
                    handle,
                }
            }
        };
        let launcher = self
            .launcher
            .unwrap_or_else(|| Arc::new(CommandLauncher::default()));

        let hub = Arc::new_cyclic(|self_ref| Hub {
            config: self.config,
            clock,
            roots: RwLock::new(HashMap::new()),
            fallback: RwLock::new(None),
            services: ServiceRegistry::new(),
            factories: RwLock::new(HashMap::new()),
            proxies: RwLock::new(Vec::new()),
            scheduler,
            io,
            launcher,
            shutting_down: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        });

        let system = hub.install_root(SYSTEM_ROOT_ID, Box::new(SystemRoot::new()), hub.default_driver())?;
        hub.services.register(ROOT_MANAGER_SERVICE, system.address().clone());
        info!(threads = hub.config.scheduler_threads, "Hub started");
        Ok(hub)
    }
}

/// # Hub
///
/// Routes calls between roots and owns the shared runtime resources.
pub struct Hub {
    config: HubConfig,
    clock: Arc<dyn Clock>,
    /// Root id to the controller receiving its calls
    roots: RwLock<HashMap<String, Controller>>,
    fallback: RwLock<Option<Controller>>,
    services: ServiceRegistry,
    factories: RwLock<HashMap<String, RootFactory>>,
    proxies: RwLock<Vec<ProxyRoute>>,
    scheduler: SharedScheduler,
    io: IoRuntime,
    launcher: Arc<dyn Launcher>,
    shutting_down: AtomicBool,
    self_ref: Weak<Hub>,
}

impl Hub {
    /// Creates a hub with the system clock and an owned I/O runtime.
    pub fn new(config: HubConfig) -> Result<Arc<Self>, HubError> {
        HubBuilder::new(config).build()
    }

    pub fn builder(config: HubConfig) -> HubBuilder {
        HubBuilder::new(config)
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Current hub time.
    pub fn now(&self) -> Time {
        self.clock.now()
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn scheduler(&self) -> &SharedScheduler {
        &self.scheduler
    }

    pub fn io_handle(&self) -> Handle {
        self.io.handle()
    }

    pub fn launcher(&self) -> Arc<dyn Launcher> {
        Arc::clone(&self.launcher)
    }

    /// The driver configured for roots installed without an explicit one.
    pub fn default_driver(&self) -> Driver {
        self.driver(&self.config.default_driver)
    }

    pub fn driver(&self, kind: &DriverKind) -> Driver {
        match kind {
            DriverKind::Shared => Driver::Shared(self.scheduler.clone()),
            DriverKind::Dedicated { tick } => Driver::Dedicated { tick: *tick },
            DriverKind::Manual => Driver::Manual,
        }
    }

    fn strong(&self) -> Result<Arc<Hub>, HubError> {
        self.self_ref.upgrade().ok_or(HubError::ShuttingDown)
    }

    // --- Routing ---

    /// Routes a call to its target root.
    ///
    /// A request that cannot be delivered is answered with an error reply;
    /// an undeliverable answer is dropped and logged.
    pub fn dispatch(&self, call: Call) {
        let Err(e) = self.route(&call) else {
            return;
        };
        if call.is_request() {
            debug!(call = %call, error = %e, "Answering undeliverable call with an error");
            match call.error_with(e.kind(), e.to_string()) {
                Ok(error) => self.dispatch(error),
                Err(e) => warn!(error = %e, "Cannot answer undeliverable call"),
            }
        } else {
            debug!(call = %call, error = %e, "Dropping undeliverable answer");
        }
    }

    /// Enqueues a call at the root owning its target address.
    pub fn route(&self, call: &Call) -> Result<(), RouteError> {
        let root_id = call.to().root_id();
        let target = self
            .roots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(root_id)
            .cloned()
            .or_else(|| self.fallback.read().unwrap_or_else(PoisonError::into_inner).clone())
            .ok_or_else(|| RouteError::UnknownRoot(root_id.to_string()))?;
        if target.submit_packet(call.clone()) {
            Ok(())
        } else {
            Err(RouteError::Rejected(target.id().to_string()))
        }
    }

    /// The controller receiving calls for `root_id`, without fallback.
    pub fn controller(&self, root_id: &str) -> Option<Controller> {
        self.roots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(root_id)
            .cloned()
    }

    /// Ids of the roots living in this process, sorted.
    pub fn root_ids(&self) -> Vec<String> {
        let roots = self.roots.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = roots
            .iter()
            .filter(|(id, controller)| controller.id() == id.as_str())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Routes calls for `root_id` to `controller` unless the id is taken.
    ///
    /// # Returns
    /// `true` if the alias now points at `controller`.
    pub fn add_alias(&self, root_id: &str, controller: &Controller) -> bool {
        let mut roots = self.roots.write().unwrap_or_else(PoisonError::into_inner);
        match roots.get(root_id) {
            Some(existing) => existing.same_root(controller),
            None => {
                debug!(root = root_id, via = %controller.address(), "Alias added");
                roots.insert(root_id.to_string(), controller.clone());
                true
            }
        }
    }

    /// Removes an alias if it points at `controller`.
    pub fn remove_alias(&self, root_id: &str, controller: &Controller) -> bool {
        let mut roots = self.roots.write().unwrap_or_else(PoisonError::into_inner);
        let matches = roots
            .get(root_id)
            .is_some_and(|existing| existing.same_root(controller) && existing.id() != root_id);
        if matches {
            roots.remove(root_id);
        }
        matches
    }

    /// Sends calls for unknown roots to `controller`.
    pub fn set_fallback(&self, controller: &Controller) {
        *self.fallback.write().unwrap_or_else(PoisonError::into_inner) = Some(controller.clone());
    }

    /// Clears the fallback route if it points at `controller`.
    pub fn clear_fallback(&self, controller: &Controller) {
        let mut fallback = self.fallback.write().unwrap_or_else(PoisonError::into_inner);
        if fallback.as_ref().is_some_and(|current| current.same_root(controller)) {
            *fallback = None;
        }
    }

    /// Forgets every route to a terminated root.
    pub(crate) fn unregister(&self, root_id: &str, root: &Arc<Root>) {
        {
            let mut roots = self.roots.write().unwrap_or_else(PoisonError::into_inner);
            roots.retain(|_, controller| !controller.is_root(root));
        }
        {
            let mut fallback = self.fallback.write().unwrap_or_else(PoisonError::into_inner);
            if fallback.as_ref().is_some_and(|current| current.is_root(root)) {
                *fallback = None;
            }
        }
        self.services.unregister_root(root_id);
        self.proxies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|route| !route.proxy.is_root(root));
        debug!(root = root_id, "Root unregistered");
    }

    // --- Installation ---

    /// Registers the factory used to install roots of `type_name`.
    pub fn register_factory(
        &self,
        type_name: &str,
        factory: impl Fn(&str) -> Box<dyn RootBehavior> + Send + Sync + 'static,
    ) {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(type_name.to_string(), Arc::new(factory));
    }

    /// Decides where a root of `type_name` lives and creates it if local.
    ///
    /// Proxy registrations are consulted first; a match places the root
    /// with the peer behind that proxy.
    pub fn install(&self, id: &str, type_name: &str) -> Result<Placement, HubError> {
        let remote = self
            .proxies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|route| route.matcher.matches(id, type_name))
            .map(|route| route.proxy.address().clone());
        if let Some(proxy) = remote {
            debug!(root = id, type_name, proxy = %proxy, "Root placed remotely");
            return Ok(Placement::Remote { proxy });
        }

        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
            .cloned()
            .ok_or_else(|| HubError::UnknownType(type_name.to_string()))?;
        let controller = self.install_root(id, factory(id), self.default_driver())?;
        Ok(Placement::Local(controller))
    }

    /// Initializes, registers and starts a root running `behavior`.
    pub fn install_root(&self, id: &str, behavior: Box<dyn RootBehavior>, driver: Driver) -> Result<Controller, HubError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(HubError::ShuttingDown);
        }
        if self.controller(id).is_some() {
            return Err(HubError::DuplicateRoot(id.to_string()));
        }
        let hub = self.strong()?;
        let root = Root::new(behavior);
        let controller = root.initialize(id, &hub)?;
        {
            let mut roots = self.roots.write().unwrap_or_else(PoisonError::into_inner);
            if roots.contains_key(id) {
                return Err(HubError::DuplicateRoot(id.to_string()));
            }
            roots.insert(id.to_string(), controller.clone());
        }
        if let Err(e) = controller.start(driver) {
            self.unregister(id, &root);
            return Err(e.into());
        }
        crate::log_lifecycle!(controller.address().as_str(), "installed");
        Ok(controller)
    }

    /// Shuts down a root living in this process, or asks the proxy owning
    /// a remote root to remove it.
    ///
    /// Remote removal completes asynchronously. The route to the root is
    /// dropped once the peer confirms; failures are logged by the system root.
    pub fn remove_root(&self, id: &str) -> Result<(), HubError> {
        let controller = self
            .controller(id)
            .ok_or_else(|| HubError::RootNotFound(id.to_string()))?;
        if controller.id() == id {
            controller.shutdown();
            return Ok(());
        }
        // The system root relays the removal and drops the alias once the
        // peer confirms it.
        let manager = ComponentAddress::root(SYSTEM_ROOT_ID)?.control(REMOVE_ROOT)?;
        self.dispatch(Call::invoke_quiet(
            manager.clone(),
            manager,
            self.now(),
            vec![Value::Text(id.to_string())],
        ));
        Ok(())
    }

    /// Installs the client proxy for `registration`.
    ///
    /// Roots matching the registration are placed with its peer from then
    /// on. The proxy connects on first use.
    pub fn register_proxy(&self, registration: ProxyRegistration, config: ProxyConfig) -> Result<Controller, HubError> {
        config.validate()?;
        let matcher = registration.compile()?;
        let proxy_id = registration.proxy_root_id();
        let behavior = ClientProxy::new(registration, config);
        let proxy = self.install_root(&proxy_id, Box::new(behavior), self.default_driver())?;
        self.proxies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ProxyRoute {
                matcher,
                proxy: proxy.clone(),
            });
        Ok(proxy)
    }

    /// Installs the server proxy accepting a parent link.
    pub fn serve(&self, server: ServerConfig, config: ProxyConfig) -> Result<Controller, HubError> {
        config.validate()?;
        let behavior = ServerProxy::new(server, config)?;
        self.install_root(SERVER_ROOT_ID, Box::new(behavior), self.default_driver())
    }

    // --- Shutdown ---

    /// Terminates every root, then stops the scheduler and I/O runtime.
    ///
    /// # Errors
    /// `ShutdownTimeout` naming the roots still running after `timeout`.
    pub fn shutdown(&self, timeout: Duration) -> Result<(), HubError> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Hub shutting down");
        let controllers: Vec<Controller> = {
            let roots = self.roots.read().unwrap_or_else(PoisonError::into_inner);
            roots
                .iter()
                .filter(|(id, controller)| controller.id() == id.as_str())
                .map(|(_, controller)| controller.clone())
                .collect()
        };
        for controller in &controllers {
            controller.shutdown();
        }

        let deadline = Instant::now() + timeout;
        let mut stuck = Vec::new();
        for controller in &controllers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !controller.await_termination(remaining) {
                stuck.push(controller.id().to_string());
            }
        }

        self.scheduler.shutdown();
        self.io.shutdown();
        if stuck.is_empty() {
            info!("Hub stopped");
            Ok(())
        } else {
            warn!(roots = ?stuck, "Roots did not terminate in time");
            Err(HubError::ShutdownTimeout { timeout, roots: stuck })
        }
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.scheduler.shutdown();
        self.io.shutdown();
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("roots", &self.root_ids())
            .field("services", &self.services.services())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
