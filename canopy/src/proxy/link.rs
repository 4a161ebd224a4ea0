//! # Links
//!
//! TCP connections between two hubs, run as tokio tasks on the hub's I/O
//! runtime. Proxy roots never await: they receive [`LinkEvent`]s through a
//! flume channel they poll once per cycle, and hand outgoing messages to a
//! [`LinkSender`] without blocking.
//!
//! ## Tasks per link
//! - Reader: decodes frames and forwards message lists as events; a
//!   malformed or oversized frame closes the link
//! - Writer: encodes and writes outgoing message lists; hands a list that
//!   cannot be encoded back as [`LinkEvent::Unsent`]; stops the reader when
//!   the link is closed locally

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use flume::Sender;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::LaunchSpec;
use crate::error::LinkError;
use crate::wire::{FrameDecoder, Message, NetworkPolicy, encode_frame};

use super::launcher::{Launcher, ProcessHandle};

/// Identity of one link.
pub type PeerId = Uuid;

/// Something that happened on a link.
#[derive(Debug)]
pub enum LinkEvent {
    /// A child process was started for an outgoing link.
    Launched(ProcessHandle),
    /// An outgoing connection was established.
    Connected {
        peer: PeerId,
        addr: SocketAddr,
        sender: LinkSender,
    },
    /// An outgoing connection could not be established.
    ConnectFailed { reason: String },
    /// An incoming connection was accepted.
    Accepted {
        peer: PeerId,
        addr: SocketAddr,
        sender: LinkSender,
    },
    /// A frame arrived.
    Messages { peer: PeerId, messages: Vec<Message> },
    /// Outgoing messages were not written because they do not fit a frame.
    Unsent {
        peer: PeerId,
        messages: Vec<Message>,
        reason: String,
    },
    /// The link is gone.
    Closed { peer: PeerId, reason: String },
}

#[derive(Debug)]
enum Outbound {
    Messages(Vec<Message>),
    Close,
}

/// Non-blocking handle for writing to a link.
#[derive(Debug, Clone)]
pub struct LinkSender {
    peer: PeerId,
    tx: Sender<Outbound>,
}

impl LinkSender {
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Queues one frame holding `messages`.
    ///
    /// # Returns
    /// `false` if the link is already closed.
    pub fn send(&self, messages: Vec<Message>) -> bool {
        if messages.is_empty() {
            return true;
        }
        self.tx.send(Outbound::Messages(messages)).is_ok()
    }

    /// Closes the link once queued frames are written.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// A listening socket accepting links.
#[derive(Debug)]
pub struct Listener {
    addr: SocketAddr,
    task: AbortHandle,
}

impl Listener {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting. Established links are unaffected.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Connects to `addr` in the background.
///
/// Exactly one of `Connected` or `ConnectFailed` is reported on `events`.
pub fn connect(handle: &Handle, addr: SocketAddr, timeout: Duration, max_frame_len: usize, events: Sender<LinkEvent>) {
    let runtime = handle.clone();
    handle.spawn(async move {
        connect_task(runtime, addr, timeout, max_frame_len, events).await;
    });
}

/// Launches a child process, then connects to the address it announces.
///
/// `Launched` is reported before the connection outcome.
pub fn launch_and_connect(
    handle: &Handle,
    launcher: Arc<dyn Launcher>,
    spec: LaunchSpec,
    timeout: Duration,
    max_frame_len: usize,
    events: Sender<LinkEvent>,
) {
    let runtime = handle.clone();
    handle.spawn(async move {
        let program = spec.program.display().to_string();
        let launched = tokio::task::spawn_blocking(move || launcher.launch(&spec)).await;
        let addr = match launched {
            Ok(Ok(launched)) => {
                let addr = launched.address;
                if events.send(LinkEvent::Launched(launched.process)).is_err() {
                    return;
                }
                addr
            }
            Ok(Err(e)) => {
                let _ = events.send(LinkEvent::ConnectFailed { reason: e.to_string() });
                return;
            }
            Err(e) => {
                let _ = events.send(LinkEvent::ConnectFailed {
                    reason: format!("Launching {program} failed: {e}"),
                });
                return;
            }
        };
        connect_task(runtime, addr, timeout, max_frame_len, events).await;
    });
}

async fn connect_task(
    handle: Handle,
    addr: SocketAddr,
    timeout: Duration,
    max_frame_len: usize,
    events: Sender<LinkEvent>,
) {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            let reason = LinkError::Connect {
                addr,
                reason: e.to_string(),
            };
            let _ = events.send(LinkEvent::ConnectFailed {
                reason: reason.to_string(),
            });
            return;
        }
        Err(_) => {
            let _ = events.send(LinkEvent::ConnectFailed {
                reason: format!("Connecting to {addr} timed out after {timeout:?}"),
            });
            return;
        }
    };
    let peer = Uuid::new_v4();
    let _ = stream.set_nodelay(true);
    let (tx, rx) = flume::unbounded();
    let sender = LinkSender { peer, tx };
    if events.send(LinkEvent::Connected { peer, addr, sender }).is_err() {
        return;
    }
    crate::log_link!(peer, "connected", %addr);
    run(&handle, stream, peer, max_frame_len, rx, events);
}

/// Binds `bind` and accepts links from peers allowed by `policy`.
///
/// # Errors
/// `Bind` if the address cannot be bound.
pub fn listen(
    handle: &Handle,
    bind: SocketAddr,
    policy: NetworkPolicy,
    max_frame_len: usize,
    events: Sender<LinkEvent>,
) -> Result<Listener, LinkError> {
    let bind_error = |e: std::io::Error| LinkError::Bind {
        addr: bind,
        reason: e.to_string(),
    };
    let std_listener = std::net::TcpListener::bind(bind).map_err(bind_error)?;
    std_listener.set_nonblocking(true).map_err(bind_error)?;
    let addr = std_listener.local_addr()?;

    let runtime = handle.clone();
    let task = handle.spawn(async move {
        let listener = match TcpListener::from_std(std_listener) {
            Ok(listener) => listener,
            Err(e) => {
                warn!(%addr, error = %e, "Cannot register listener");
                return;
            }
        };
        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(%addr, error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
            };
            if !policy.allows(remote.ip()) {
                warn!(%remote, "Rejecting connection from address outside the allowed ranges");
                continue;
            }
            let peer = Uuid::new_v4();
            let _ = stream.set_nodelay(true);
            let (tx, rx) = flume::unbounded();
            let sender = LinkSender { peer, tx };
            if events
                .send(LinkEvent::Accepted {
                    peer,
                    addr: remote,
                    sender,
                })
                .is_err()
            {
                return;
            }
            crate::log_link!(peer, "accepted", %remote);
            run(&runtime, stream, peer, max_frame_len, rx, events.clone());
        }
    });
    debug!(%addr, "Listening for links");
    Ok(Listener {
        addr,
        task: task.abort_handle(),
    })
}

fn run(
    handle: &Handle,
    stream: TcpStream,
    peer: PeerId,
    max_frame_len: usize,
    outbound: flume::Receiver<Outbound>,
    events: Sender<LinkEvent>,
) {
    let (read, write) = stream.into_split();
    let reader = handle.spawn(read_loop(read, peer, max_frame_len, events.clone()));
    handle.spawn(write_loop(write, peer, max_frame_len, outbound, reader.abort_handle(), events));
}

async fn read_loop(mut read: OwnedReadHalf, peer: PeerId, max_frame_len: usize, events: Sender<LinkEvent>) {
    let mut decoder = FrameDecoder::new(max_frame_len);
    let mut chunk = vec![0u8; 64 * 1024];
    let reason = 'read: loop {
        let n = match read.read(&mut chunk).await {
            Ok(0) => break 'read "closed by peer".to_string(),
            Ok(n) => n,
            Err(e) => break 'read format!("read failed: {e}"),
        };
        decoder.feed(&chunk[..n]);
        loop {
            match decoder.next_frame() {
                Ok(Some(messages)) => {
                    if events.send(LinkEvent::Messages { peer, messages }).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(%peer, error = %e, "Malformed frame; closing link");
                    break 'read e.to_string();
                }
            }
        }
    };
    crate::log_link!(peer, "closed", reason = %reason);
    let _ = events.send(LinkEvent::Closed { peer, reason });
}

async fn write_loop(
    mut write: OwnedWriteHalf,
    peer: PeerId,
    max_frame_len: usize,
    outbound: flume::Receiver<Outbound>,
    reader: AbortHandle,
    events: Sender<LinkEvent>,
) {
    while let Ok(item) = outbound.recv_async().await {
        match item {
            Outbound::Messages(messages) => {
                let frame = match encode_frame(&messages, max_frame_len) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(%peer, error = %e, count = messages.len(), "Frame cannot be sent");
                        let _ = events.send(LinkEvent::Unsent {
                            peer,
                            messages,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };
                if let Err(e) = write.write_all(&frame).await {
                    debug!(%peer, error = %e, "Write failed");
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = write.shutdown().await;
    if !reader.is_finished() {
        reader.abort();
        let _ = events.send(LinkEvent::Closed {
            peer,
            reason: "closed locally".to_string(),
        });
    }
}
