use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_MAX_FRAME_LEN: usize = 10 * 1024 * 1024;

// --- Driver Configuration ---

/// Determines how a newly installed root is driven.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverKind {
    /// Root is ticked by the hub's shared scheduler threads.
    Shared,
    /// Root runs on its own thread at the given tick.
    Dedicated { tick: Duration },
    /// Root is only driven by an attached delegate.
    Manual,
}

// --- Hub Configuration ---

/// Configuration for the `Hub`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// The number of worker threads in the shared scheduler.
    pub scheduler_threads: usize,

    /// Interval between two scheduled update cycles of a root.
    pub tick: Duration,

    /// How long an attached delegate may go without driving its root
    /// before the scheduler forces a cycle.
    pub delegate_grace: Duration,

    /// Maximum distance between a delegate-supplied time and hub time.
    pub max_clock_drift: Duration,

    /// The driver assigned to roots installed without an explicit one.
    pub default_driver: DriverKind,

    /// The timeout for hub shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            scheduler_threads: num_cpus::get(),
            tick: Duration::from_millis(5),
            delegate_grace: Duration::from_millis(200),
            max_clock_drift: Duration::from_millis(100),
            default_driver: DriverKind::Shared,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl HubConfig {
    /// Rejects values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler_threads == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduler_threads",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.tick.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "tick",
                reason: "must be non-zero".to_string(),
            });
        }
        if let DriverKind::Dedicated { tick } = &self.default_driver {
            if tick.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: "default_driver",
                    reason: "dedicated tick must be non-zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

// --- Proxy Configuration ---

/// Configuration shared by client and server proxies.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// How long a forwarded call may wait for its reply.
    pub call_timeout: Duration,

    /// How long connecting plus the handshake may take.
    pub connect_timeout: Duration,

    /// Interval between two purges of expired calls.
    pub purge_interval: Duration,

    /// Largest accepted frame payload in bytes.
    pub max_frame_len: usize,

    /// Names of local services exposed to the peer in the handshake.
    pub exposed_services: Vec<String>,

    /// Shared-filesystem root announced to the peer.
    pub shared_root: Option<String>,

    /// Auxiliary file-serving port announced to the peer.
    pub file_server_port: Option<u16>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            purge_interval: Duration::from_secs(1),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            exposed_services: Vec::new(),
            shared_root: None,
            file_server_port: None,
        }
    }
}

impl ProxyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_len == 0 || self.max_frame_len > u32::MAX as usize {
            return Err(ConfigError::InvalidValue {
                field: "max_frame_len",
                reason: format!("{} is outside 1..=u32::MAX", self.max_frame_len),
            });
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "call_timeout",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration of the accepting side of a link.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on; port 0 picks a free port.
    pub bind: SocketAddr,

    /// CIDR ranges peers may connect from. Empty allows loopback only.
    pub allowed_ranges: Vec<String>,

    /// Print `LISTENING <port>` on stdout once bound.
    pub announce_port: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            allowed_ranges: Vec::new(),
            announce_port: false,
        }
    }
}

// --- Proxy Registrations ---

/// How a client proxy reaches its peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyTarget {
    /// Connect to an already running peer.
    Connect(SocketAddr),
    /// Launch a child process and connect to the port it announces.
    Launch(LaunchSpec),
}

/// Child process launch parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Maps roots installed by id and type to a remote peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyRegistration {
    /// Registration name; the client proxy root is `_proxy-<name>`.
    pub name: String,
    /// Glob matched against the installed root id.
    pub root_pattern: String,
    /// Glob matched against the installed root type name.
    pub type_pattern: String,
    pub target: ProxyTarget,
}

impl ProxyRegistration {
    /// Root id of the client proxy serving this registration.
    pub fn proxy_root_id(&self) -> String {
        format!("_proxy-{}", self.name)
    }

    /// Compiles both patterns.
    pub fn compile(&self) -> Result<ProxyMatcher, ConfigError> {
        let compile = |pattern: &str| {
            Pattern::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
        };
        Ok(ProxyMatcher {
            root: compile(&self.root_pattern)?,
            type_name: compile(&self.type_pattern)?,
        })
    }
}

/// Compiled patterns of a [`ProxyRegistration`].
#[derive(Clone, Debug)]
pub struct ProxyMatcher {
    root: Pattern,
    type_name: Pattern,
}

impl ProxyMatcher {
    pub fn matches(&self, root_id: &str, type_name: &str) -> bool {
        self.root.matches(root_id) && self.type_name.matches(type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_hub_config_is_valid() {
        let config = HubConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_driver, DriverKind::Shared);
    }

    #[test]
    fn test_zero_threads_rejected() {
        let config = HubConfig {
            scheduler_threads: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "scheduler_threads", .. })
        ));
    }

    #[test]
    fn test_zero_tick_rejected() {
        let config = HubConfig {
            tick: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_registration_patterns() {
        let registration = ProxyRegistration {
            name: "audio".to_string(),
            root_pattern: "synth*".to_string(),
            type_pattern: "audio:*".to_string(),
            target: ProxyTarget::Connect("127.0.0.1:4000".parse().unwrap()),
        };
        let matcher = registration.compile().unwrap();
        assert!(matcher.matches("synth1", "audio:mixer"));
        assert!(!matcher.matches("video1", "audio:mixer"));
        assert!(!matcher.matches("synth1", "video:player"));
        assert_eq!(registration.proxy_root_id(), "_proxy-audio");
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let registration = ProxyRegistration {
            name: "bad".to_string(),
            root_pattern: "[".to_string(),
            type_pattern: "*".to_string(),
            target: ProxyTarget::Connect("127.0.0.1:4000".parse().unwrap()),
        };
        assert!(matches!(
            registration.compile(),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_proxy_config_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.call_timeout, Duration::from_secs(10));
        assert_eq!(config.max_frame_len, DEFAULT_MAX_FRAME_LEN);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_loads_from_json() {
        let config: HubConfig =
            serde_json::from_str(r#"{"scheduler_threads": 2, "default_driver": "Manual"}"#).unwrap();
        assert_eq!(config.scheduler_threads, 2);
        assert_eq!(config.default_driver, DriverKind::Manual);
        assert_eq!(config.tick, Duration::from_millis(5));
    }
}
