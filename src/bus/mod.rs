//! Cross-surface settings bus
//!
//! Surfaces run as separate processes. Each one binds a datagram socket in a
//! shared runtime directory; publishing sends the encoded event to every other
//! socket found there. Delivery is best-effort and unordered: surfaces that are
//! not running simply miss the event and catch up on their next direct read.

use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

mod messages;
pub use messages::BusEvent;

use crate::constants::bus::{MAX_MESSAGE_SIZE, SOCKET_EXTENSION};
use crate::constants::paths::{APP_DIR, BUS_DIR};
use crate::types::SurfaceRole;

pub trait SettingsBus: Send + Sync {
    /// Send `event` to every other live surface. Returns how many received it.
    fn publish(&self, event: &BusEvent) -> Result<usize>;

    /// Start receiving events published by other surfaces
    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<BusEvent>>;
}

/// Get default bus directory (XDG_RUNTIME_DIR with fallback to cache)
pub fn default_bus_dir() -> Result<PathBuf> {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return Ok(PathBuf::from(runtime_dir).join(APP_DIR).join(BUS_DIR));
    }

    let cache = dirs::cache_dir()
        .context("Failed to determine cache directory (no XDG_RUNTIME_DIR or HOME)")?;
    Ok(cache.join(APP_DIR).join(BUS_DIR))
}

/// Datagram socket endpoint of one surface process
pub struct SocketBus {
    dir: PathBuf,
    socket_path: PathBuf,
    socket: UnixDatagram,
}

impl SocketBus {
    /// Join the bus in the default directory
    pub fn bind(role: SurfaceRole) -> Result<Self> {
        Self::bind_in(default_bus_dir()?, role)
    }

    /// Join the bus rooted at `dir`
    pub fn bind_in(dir: PathBuf, role: SurfaceRole) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .context(format!("Failed to create bus directory: {}", dir.display()))?;

        let socket_path = dir.join(format!("{}-{}.{}", role, std::process::id(), SOCKET_EXTENSION));
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)
                .context(format!("Failed to remove stale socket: {}", socket_path.display()))?;
        }

        let socket = UnixDatagram::bind(&socket_path)
            .context(format!("Failed to bind socket at {}", socket_path.display()))?;

        // Owner only
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o700))
                .context("Failed to set socket permissions")?;
        }

        info!(role = %role, path = %socket_path.display(), "Joined settings bus");
        Ok(Self {
            dir,
            socket_path,
            socket,
        })
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.socket_path
    }
}

/// Send `event` to every socket in `dir` except `own`. Sockets left behind by
/// surfaces that exited are removed.
fn send_to_peers(dir: &Path, own: Option<&Path>, event: &BusEvent) -> Result<usize> {
    let bytes = event.encode()?;
    let sender = UnixDatagram::unbound().context("Failed to create bus sender")?;
    sender
        .set_nonblocking(true)
        .context("Failed to make bus sender non-blocking")?;

    let entries = std::fs::read_dir(dir)
        .context(format!("Failed to list bus directory: {}", dir.display()))?;
    let peers = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == SOCKET_EXTENSION))
        .filter(|path| Some(path.as_path()) != own);

    let mut delivered = 0;
    for peer in peers {
        match sender.send_to(&bytes, &peer) {
            Ok(_) => {
                delivered += 1;
                trace!(peer = %peer.display(), "Delivered bus event");
            }
            Err(e) if matches!(e.kind(), ErrorKind::ConnectionRefused | ErrorKind::NotFound) => {
                debug!(peer = %peer.display(), "Removing dead bus socket");
                let _ = std::fs::remove_file(&peer);
            }
            Err(e) => {
                warn!(peer = %peer.display(), error = %e, "Failed to deliver bus event");
            }
        }
    }
    Ok(delivered)
}

/// Publish from a process that is not itself a surface
pub fn broadcast(event: &BusEvent) -> Result<usize> {
    let dir = default_bus_dir()?;
    if !dir.exists() {
        debug!(dir = %dir.display(), "No bus directory, no surfaces to notify");
        return Ok(0);
    }
    send_to_peers(&dir, None, event)
}

impl SettingsBus for SocketBus {
    fn publish(&self, event: &BusEvent) -> Result<usize> {
        send_to_peers(&self.dir, Some(&self.socket_path), event)
    }

    /// Must be called from within the tokio runtime
    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<BusEvent>> {
        let std_socket = self.socket.try_clone().context("Failed to clone bus socket")?;
        std_socket
            .set_nonblocking(true)
            .context("Failed to make bus socket non-blocking")?;
        let socket = tokio::net::UnixDatagram::from_std(std_socket)
            .context("Failed to register bus socket with runtime")?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
            loop {
                let len = match socket.recv(&mut buf).await {
                    Ok(len) => len,
                    Err(e) => {
                        warn!(error = %e, "Settings bus receive failed, stopping listener");
                        break;
                    }
                };
                match BusEvent::decode(&buf[..len]) {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!(error = ?e, "Dropping malformed bus event"),
                }
            }
        });
        Ok(rx)
    }
}

impl Drop for SocketBus {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}
