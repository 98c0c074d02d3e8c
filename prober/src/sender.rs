use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use log::info;
use pathwatch_core::{DatagramSender, FlowKey, SendError};
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SenderSetupError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: std::io::Error },
}

/// One kernel UDP socket per distinct source port of the run. The kernel
/// builds the IPv4/UDP headers; reuse flags let a rerun rebind ports still
/// in the close grace period. `UdpSocket::send_to` takes `&self`, so the
/// pool is shared across all dispatcher workers without extra locking.
pub struct UdpSenderPool {
    sockets: HashMap<u16, UdpSocket>,
}

impl UdpSenderPool {
    pub fn bind(source_addr: Ipv4Addr, source_ports: &[u16]) -> Result<Self, SenderSetupError> {
        let mut sockets = HashMap::with_capacity(source_ports.len());
        for &port in source_ports {
            let addr = SocketAddr::from(SocketAddrV4::new(source_addr, port));
            let socket = bind_reusable(addr).map_err(|source| SenderSetupError::Bind { addr, source })?;
            sockets.insert(port, socket);
        }
        info!("sender.event=bound sockets={} addr={}", sockets.len(), source_addr);
        Ok(Self { sockets })
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }
}

fn bind_reusable(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    socket.set_reuse_port(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

impl DatagramSender for UdpSenderPool {
    fn send(&self, key: &FlowKey, payload: &[u8]) -> Result<(), SendError> {
        let socket = self.sockets.get(&key.src_port).ok_or(SendError::UnboundSourcePort(key.src_port))?;
        socket.send_to(payload, SocketAddrV4::new(key.dst_addr, key.dst_port))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn free_port() -> u16 {
        UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
    }

    #[test]
    fn sends_from_the_requested_source_port() {
        let loopback = Ipv4Addr::LOCALHOST;
        let src_port = free_port();
        let pool = UdpSenderPool::bind(loopback, &[src_port]).unwrap();
        assert_eq!(pool.socket_count(), 1);

        let receiver = UdpSocket::bind((loopback, 0)).unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let dst_port = receiver.local_addr().unwrap().port();

        let key = FlowKey::new(loopback, loopback, src_port, dst_port);
        pool.send(&key, b"probe-payload").unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"probe-payload");
        assert_eq!(from.port(), src_port, "datagram must carry the job's source port");
    }

    #[test]
    fn unknown_source_port_is_a_send_error() {
        let loopback = Ipv4Addr::LOCALHOST;
        let pool = UdpSenderPool::bind(loopback, &[free_port()]).unwrap();
        let key = FlowKey::new(loopback, loopback, 1, 9);
        assert!(matches!(pool.send(&key, b"x"), Err(SendError::UnboundSourcePort(1))));
    }
}
