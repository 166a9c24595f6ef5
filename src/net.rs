//! Socket binding helpers.
//!
//! Listener sockets are bound through here by the privilege sequencer,
//! before any privilege drop. SO_REUSEADDR is always set; the UDP socket
//! also accepts broadcast datagrams, which is how magic packets usually
//! arrive on a flat lab network.

use std::io;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd};

use nix::sys::socket::{
    self, sockopt, AddressFamily, Backlog, SockFlag, SockProtocol, SockType, SockaddrIn,
    SockaddrIn6,
};

fn open_bound(
    addr: SocketAddr,
    ty: SockType,
    protocol: SockProtocol,
    broadcast: bool,
) -> io::Result<OwnedFd> {
    let domain = match addr {
        SocketAddr::V4(_) => AddressFamily::Inet,
        SocketAddr::V6(_) => AddressFamily::Inet6,
    };

    let fd = socket::socket(domain, ty, SockFlag::SOCK_CLOEXEC, protocol).map_err(io::Error::from)?;

    socket::setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(io::Error::from)?;
    if broadcast {
        socket::setsockopt(&fd, sockopt::Broadcast, &true).map_err(io::Error::from)?;
    }
    if matches!(addr, SocketAddr::V6(_)) {
        socket::setsockopt(&fd, sockopt::Ipv6V6Only, &true).map_err(io::Error::from)?;
    }

    match addr {
        SocketAddr::V4(v4) => {
            socket::bind(fd.as_raw_fd(), &SockaddrIn::from(v4)).map_err(io::Error::from)?;
        }
        SocketAddr::V6(v6) => {
            socket::bind(fd.as_raw_fd(), &SockaddrIn6::from(v6)).map_err(io::Error::from)?;
        }
    }

    Ok(fd)
}

/// Bind the web interface listener.
pub fn bind_tcp_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let fd = open_bound(addr, SockType::Stream, SockProtocol::Tcp, false)?;
    socket::listen(&fd, Backlog::MAXCONN).map_err(io::Error::from)?;

    let listener = unsafe { TcpListener::from_raw_fd(fd.into_raw_fd()) };
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Bind the magic packet listener socket, broadcast-capable.
pub fn bind_udp_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let fd = open_bound(addr, SockType::Datagram, SockProtocol::Udp, true)?;

    let socket = unsafe { UdpSocket::from_raw_fd(fd.into_raw_fd()) };
    socket.set_nonblocking(true)?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_tcp_ephemeral() {
        let listener = bind_tcp_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_bind_udp_ephemeral() {
        let socket = bind_udp_socket("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_tcp_port_conflict_fails() {
        let first = bind_tcp_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();
        assert!(bind_tcp_listener(addr).is_err());
    }
}
