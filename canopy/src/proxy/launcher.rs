//! # Child Process Launcher
//!
//! Starts the process hosting a client proxy's peer. The child announces
//! the port its server proxy listens on with a single `LISTENING <port>`
//! line on stdout; everything else it prints is forwarded to the log.

use std::fmt;
use std::io::{BufRead, BufReader};
use std::net::{Ipv4Addr, SocketAddr};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::config::LaunchSpec;
use crate::error::LaunchError;
use crate::logging;

/// Prefix of the port announcement line.
pub const ANNOUNCEMENT: &str = "LISTENING";

/// Parses a `LISTENING <port>` line.
pub fn parse_announcement(line: &str) -> Option<u16> {
    let rest = line.trim().strip_prefix(ANNOUNCEMENT)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    rest.trim().parse().ok()
}

/// A launched peer: its process and where to connect.
#[derive(Debug)]
pub struct Launched {
    pub process: ProcessHandle,
    pub address: SocketAddr,
}

/// Starts peer processes.
pub trait Launcher: Send + Sync {
    /// Starts the process described by `spec` and waits for its address.
    fn launch(&self, spec: &LaunchSpec) -> Result<Launched, LaunchError>;
}

/// Ownership of a launched child process.
///
/// The process is killed when the handle is killed or dropped.
pub struct ProcessHandle {
    label: String,
    child: Option<Child>,
}

impl ProcessHandle {
    pub fn new(label: impl Into<String>, child: Child) -> Self {
        Self {
            label: label.into(),
            child: Some(child),
        }
    }

    /// A handle for a peer this hub does not own, e.g. one running in the
    /// same process in tests.
    pub fn detached(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            child: None,
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Kills and reaps the process. Idempotent.
    pub fn kill(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => debug!(process = %self.label, %status, "Child already exited"),
            _ => {
                if let Err(e) = child.kill() {
                    warn!(process = %self.label, error = %e, "Cannot kill child");
                }
                let _ = child.wait();
                info!(process = %self.label, "Child process stopped");
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.kill();
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("label", &self.label)
            .field("pid", &self.id())
            .finish()
    }
}

/// Launches peers as local child processes.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    /// How long a child may take to announce its port
    pub startup_timeout: Duration,
}

impl Default for CommandLauncher {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(10),
        }
    }
}

impl Launcher for CommandLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Launched, LaunchError> {
        let program = spec.program.display().to_string();
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| LaunchError::Spawn {
                program: program.clone(),
                reason: e.to_string(),
            })?;
        let label = format!("{program}[{}]", child.id());
        let stdout = child.stdout.take().context("child stdout was not captured");
        let mut process = ProcessHandle::new(label.clone(), child);
        let stdout = stdout?;

        let (tx, rx) = flume::bounded(1);
        let dispatch = logging::current_subscriber();
        let reader_label = label.clone();
        std::thread::Builder::new()
            .name(format!("canopy-launch-{}", process.id().unwrap_or_default()))
            .spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || {
                    let mut announced = false;
                    for line in BufReader::new(stdout).lines() {
                        let Ok(line) = line else { break };
                        if !announced {
                            if let Some(port) = parse_announcement(&line) {
                                announced = true;
                                let _ = tx.send(port);
                                continue;
                            }
                        }
                        debug!(process = %reader_label, "{line}");
                    }
                })
            })
            .context("cannot spawn child output reader")?;

        match rx.recv_timeout(self.startup_timeout) {
            Ok(port) => {
                let address = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
                info!(process = %label, %address, "Child process announced its port");
                Ok(Launched { process, address })
            }
            Err(flume::RecvTimeoutError::Timeout) => {
                process.kill();
                Err(LaunchError::Timeout(self.startup_timeout))
            }
            Err(flume::RecvTimeoutError::Disconnected) => {
                process.kill();
                Err(LaunchError::NoAnnouncement)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_announcement() {
        assert_eq!(parse_announcement("LISTENING 4711"), Some(4711));
        assert_eq!(parse_announcement("  LISTENING   80 \n"), Some(80));
        assert_eq!(parse_announcement("LISTENING4711"), None);
        assert_eq!(parse_announcement("LISTENING 70000"), None);
        assert_eq!(parse_announcement("starting up"), None);
    }

    #[test]
    fn test_missing_program() {
        let spec = LaunchSpec {
            program: "/nonexistent/canopy-peer".into(),
            ..LaunchSpec::default()
        };
        let result = CommandLauncher::default().launch(&spec);
        assert!(matches!(result, Err(LaunchError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_child_without_announcement() {
        let spec = LaunchSpec {
            program: "sh".into(),
            args: vec!["-c".to_string(), "echo hello".to_string()],
            ..LaunchSpec::default()
        };
        let result = CommandLauncher::default().launch(&spec);
        assert!(matches!(result, Err(LaunchError::NoAnnouncement)));
    }

    #[cfg(unix)]
    #[test]
    fn test_child_announces_port() {
        let spec = LaunchSpec {
            program: "sh".into(),
            args: vec!["-c".to_string(), "echo booting; echo LISTENING 4711; sleep 5".to_string()],
            ..LaunchSpec::default()
        };
        let mut launched = CommandLauncher::default().launch(&spec).unwrap();
        assert_eq!(launched.address.port(), 4711);
        assert!(launched.process.id().is_some());
        launched.process.kill();
        assert!(launched.process.id().is_none());
    }
}
