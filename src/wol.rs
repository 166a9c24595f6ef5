//! Magic packet listener
//!
//! UDP server for Wake-on-LAN style triggers. A valid magic packet is
//! 6 bytes of 0xFF followed by 16 repetitions of the target MAC address
//! (102 bytes total). There is no response channel: denied senders,
//! unknown MACs, malformed datagrams and rejected actions are all dropped
//! silently, debounced entirely by the state machine's cooldown.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::action::{ActionKind, ActionMachine, ActionRequest, TriggerSource};
use crate::error::{AppError, Result};
use crate::security::AccessPolicy;
use crate::targets::{MacAddr, TargetRegistry};

/// Classic WOL frame: 6-byte 0xFF header + 16 MAC repetitions
pub const MAGIC_PACKET_LEN: usize = 102;

/// Parse a datagram as a magic packet and extract the target MAC.
///
/// The full repeated-MAC pattern is required; a bare header with garbage
/// payload is not a recognizable magic packet.
pub fn parse_magic_packet(data: &[u8]) -> Result<MacAddr> {
    if data.len() < MAGIC_PACKET_LEN {
        return Err(AppError::MalformedPacket(format!(
            "datagram too short: {} bytes",
            data.len()
        )));
    }
    if data[..6] != [0xFF; 6] {
        return Err(AppError::MalformedPacket("bad header".to_string()));
    }

    let mac = &data[6..12];
    for rep in 1..16 {
        let offset = 6 + rep * 6;
        if &data[offset..offset + 6] != mac {
            return Err(AppError::MalformedPacket(format!(
                "MAC repetition {} does not match",
                rep
            )));
        }
    }

    let mut octets = [0u8; 6];
    octets.copy_from_slice(mac);
    Ok(MacAddr::from_octets(octets))
}

/// UDP magic packet listener unit
pub struct MagicPacketListener {
    socket: UdpSocket,
    policy: Arc<AccessPolicy>,
    registry: Arc<TargetRegistry>,
    machines: Arc<HashMap<String, Arc<ActionMachine>>>,
}

impl MagicPacketListener {
    /// Wrap a pre-bound socket (bound by the privilege sequencer, possibly
    /// while the process still held elevated rights)
    pub fn from_std(
        socket: std::net::UdpSocket,
        policy: Arc<AccessPolicy>,
        registry: Arc<TargetRegistry>,
        machines: Arc<HashMap<String, Arc<ActionMachine>>>,
    ) -> Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket: UdpSocket::from_std(socket)?,
            policy,
            registry,
            machines,
        })
    }

    /// Receive loop; only returns on a socket-level failure
    pub async fn run(self) {
        let local = self.socket.local_addr().ok();
        info!("Magic packet listener running on {:?}", local);

        let mut buf = [0u8; 512];
        loop {
            let (len, sender) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("Magic packet listener receive failed: {}", e);
                    return;
                }
            };
            self.handle_datagram(&buf[..len], sender);
        }
    }

    /// Validate and dispatch one datagram. Never fails the listener loop.
    fn handle_datagram(&self, data: &[u8], sender: SocketAddr) {
        debug!("Datagram from {} ({} bytes)", sender, data.len());

        if !self.policy.is_allowed(sender.ip()) {
            debug!("Sender {} blocked by policy, ignoring packet", sender.ip());
            return;
        }

        let mac = match parse_magic_packet(data) {
            Ok(mac) => mac,
            Err(e) => {
                debug!("Dropping datagram from {}: {}", sender, e);
                return;
            }
        };

        let Some(target) = self.registry.by_mac(&mac) else {
            debug!("No target matches MAC {}", mac);
            return;
        };
        let Some(machine) = self.machines.get(&target.id).cloned() else {
            debug!("Target {} has no action machine", target.id);
            return;
        };

        info!("Magic packet from {} matched target {}", sender, target.id);

        // The pulse holds its own task only; the receive loop stays free
        // for other targets' packets.
        let id = target.id.clone();
        tokio::spawn(async move {
            let request = ActionRequest {
                kind: ActionKind::Short,
                source: TriggerSource::Network,
            };
            // Fire-and-forget: the outcome is logged and discarded
            match machine.submit(request).await {
                Ok(()) => info!("Network trigger completed for {}", id),
                Err(e) => debug!("Network trigger for {} dropped: {}", id, e),
            }
        });
    }
}
