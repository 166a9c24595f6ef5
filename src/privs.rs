//! Privilege sequencing
//!
//! One-shot startup procedure: bind every configured listener socket while
//! the process may still hold elevated rights, and only once all binds have
//! succeeded drop to the configured unprivileged identity. A failed bind is
//! fatal and aborts before the drop, so the process can never end up with
//! privileges gone but a privileged listener missing.
//!
//! The resulting `PrivilegeState` is the single process-wide flag the
//! supervisor consults to decide whether a unit on a privileged port may
//! ever be restarted.

use std::net::{TcpListener, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};

use nix::unistd::{setgid, setuid, Uid, User};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::net;

/// Ports below this require elevated rights to bind
pub const PRIVILEGED_PORT_THRESHOLD: u16 = 1024;

pub fn is_privileged_port(port: u16) -> bool {
    port < PRIVILEGED_PORT_THRESHOLD
}

/// Process-wide privilege flag, `root -> dropped`, irreversible.
///
/// Written only by [`sequence`]; everyone else just reads it.
pub struct PrivilegeState {
    dropped: AtomicBool,
}

impl PrivilegeState {
    pub fn new() -> Self {
        Self {
            dropped: AtomicBool::new(false),
        }
    }

    pub fn dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    pub(crate) fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
    }
}

impl Default for PrivilegeState {
    fn default() -> Self {
        Self::new()
    }
}

/// Sockets bound during sequencing, handed to the supervised units
#[derive(Debug)]
pub struct BoundListeners {
    pub web: Option<TcpListener>,
    pub wol: Option<UdpSocket>,
}

fn bind_listeners(config: &AppConfig) -> Result<BoundListeners> {
    let web = if config.web.enabled {
        let addr = config.web_bind_addr()?;
        let listener =
            net::bind_tcp_listener(addr).map_err(|source| AppError::Bind { addr, source })?;
        info!("Bound web listener on {}", addr);
        Some(listener)
    } else {
        info!("Web interface disabled in configuration");
        None
    };

    let wol = if config.wol.enabled {
        let addr = config.wol_bind_addr()?;
        let socket =
            net::bind_udp_socket(addr).map_err(|source| AppError::Bind { addr, source })?;
        info!("Bound magic packet listener on {}", addr);
        Some(socket)
    } else {
        info!("Magic packet listener disabled in configuration");
        None
    };

    Ok(BoundListeners { web, wol })
}

fn drop_privileges(name: &str, state: &PrivilegeState) -> Result<()> {
    if !Uid::effective().is_root() {
        info!("Not running as root, no privileges to drop");
        return Ok(());
    }

    let user = User::from_name(name)
        .map_err(|e| AppError::Internal(format!("User lookup failed: {}", e)))?
        .ok_or_else(|| AppError::Config(format!("Unknown drop-to user: {}", name)))?;

    // Group first: once the uid is gone, setgid is no longer permitted
    if let Err(e) = setgid(user.gid) {
        warn!("Failed to set gid to {}: {}", user.gid, e);
        return Ok(());
    }
    if let Err(e) = setuid(user.uid) {
        warn!("Failed to set uid to {}: {}", user.uid, e);
        return Ok(());
    }

    state.mark_dropped();
    info!("Privileges dropped, now running as {}:{}", name, user.gid);
    Ok(())
}

/// Bind-then-drop startup sequence.
///
/// Errors out of the bind phase propagate without touching the privilege
/// state; the caller treats them as fatal.
pub fn sequence(config: &AppConfig, state: &PrivilegeState) -> Result<BoundListeners> {
    let listeners = bind_listeners(config)?;

    if config.security.drop_privs {
        drop_privileges(&config.security.user, state)?;
    }

    Ok(listeners)
}
