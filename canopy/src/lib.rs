// Canopy Runtime
//
// The concurrency and messaging core of a forest of actors: roots that
// process calls serially on their own schedule, a hub routing calls between
// them, and proxies extending the forest across process boundaries.

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod kinds;
pub mod logging;
pub mod proxy;
pub mod root;
pub mod scheduler;
pub mod services;
pub mod sys_root;
pub mod wire;

// Re-export commonly used types
pub use canopy_api::{Call, CallId, CallType, ComponentAddress, ControlAddress, Time, Value};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DriverKind, HubConfig, LaunchSpec, ProxyConfig, ProxyRegistration, ProxyTarget, ServerConfig};
pub use error::{HubError, RootError};
pub use hub::{Hub, HubBuilder, Placement};
pub use root::{Controller, Delegate, RootBehavior, RootContext, RootState};
pub use scheduler::Driver;
