use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::debug;

use crate::error::TransportError;

/// A single-owner UDP endpoint with kernel buffers tuned for bursts of
///  fragments.
///
/// The descriptor is acquired at construction and released on drop; the type
///  is deliberately not `Clone` - a copied endpoint would either double-close
///  the descriptor or let two owners race on the destination.
///
/// One endpoint serves exactly one role: `bind` for the receive side,
///  `set_destination` for the send side.
pub struct UdpEndpoint {
    socket: Socket,
    destination: Option<SocketAddr>,
}

impl UdpEndpoint {
    /// Opens the socket and requests `socket_buffer_bytes` of kernel send and
    ///  receive buffer. The OS caps the request silently, so a failed or
    ///  trimmed resize is logged rather than treated as fatal - the transport
    ///  works with small buffers, it just drops more under load.
    pub fn new(socket_buffer_bytes: usize) -> Result<UdpEndpoint, TransportError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(TransportError::SocketInit)?;

        if let Err(e) = socket.set_recv_buffer_size(socket_buffer_bytes) {
            debug!("kernel refused receive buffer of {} bytes: {}", socket_buffer_bytes, e);
        }
        if let Err(e) = socket.set_send_buffer_size(socket_buffer_bytes) {
            debug!("kernel refused send buffer of {} bytes: {}", socket_buffer_bytes, e);
        }
        // allow rebinding the port immediately after a crash
        socket
            .set_reuse_address(true)
            .map_err(TransportError::SocketInit)?;

        if let Ok(actual) = socket.recv_buffer_size() {
            debug!("kernel receive buffer: {} KiB", actual / 1024);
        }

        Ok(UdpEndpoint { socket, destination: None })
    }

    /// Receive role: listen on all interfaces on `port`. Port 0 asks the OS
    ///  for a free port.
    pub fn bind(&self, port: u16) -> Result<(), TransportError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        self.socket
            .bind(&SockAddr::from(addr))
            .map_err(|source| TransportError::BindFailed { port, source })
    }

    /// Send role: store the resolved destination for all future sends.
    pub fn set_destination(&mut self, ip: &str, port: u16) -> Result<(), TransportError> {
        let ip: Ipv4Addr = ip.parse().map_err(|_| TransportError::InvalidAddress {
            addr: format!("{ip}:{port}"),
        })?;
        self.destination = Some(SocketAddr::V4(SocketAddrV4::new(ip, port)));
        Ok(())
    }

    /// Bounds how long a blocking read may sleep, so a receive loop can
    ///  periodically recheck its running flag.
    pub fn set_recv_timeout(&self, timeout: Duration) -> Result<(), TransportError> {
        self.socket
            .set_read_timeout(Some(timeout))
            .map_err(TransportError::SocketInit)
    }

    pub fn destination(&self) -> Option<SocketAddr> {
        self.destination
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok().and_then(|addr| addr.as_socket())
    }
}

impl AsRawFd for UdpEndpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}
