//! UDP socket construction

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crate::error::NetworkError;

/// Options applied when creating a socket
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketOptions {
    /// Kernel receive buffer size, if it should be changed
    pub recv_buffer_size: Option<usize>,
    /// Blocking read timeout
    pub read_timeout: Option<Duration>,
}

/// Resolve `addr` to its first socket address
pub fn resolve(addr: &str) -> Result<SocketAddr, NetworkError> {
    addr.to_socket_addrs()
        .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", addr, e)))?
        .next()
        .ok_or_else(|| NetworkError::ConnectionFailed(format!("{}: no address", addr)))
}

/// Create a bound UDP socket
pub fn create_socket(bind_addr: SocketAddr, options: SocketOptions) -> Result<UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::for_address(bind_addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    if let Some(size) = options.recv_buffer_size {
        // The kernel may clamp this; a smaller buffer is not fatal
        if let Err(e) = socket.set_recv_buffer_size(size) {
            tracing::warn!("Could not set receive buffer to {} bytes: {}", size, e);
        }
    }

    socket
        .set_read_timeout(options.read_timeout)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    socket
        .bind(&bind_addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", bind_addr, e)))?;

    Ok(socket.into())
}

/// Create an unbound-port socket connected to `target`, for sending
pub fn connect_socket(target: SocketAddr) -> Result<UdpSocket, NetworkError> {
    let bind_addr = if target.is_ipv4() {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
    };

    let socket = create_socket(bind_addr, SocketOptions::default())?;
    socket
        .connect(target)
        .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", target, e)))?;
    Ok(socket)
}
