//! UDP multicast transport.

use super::{Result, Transport, TransportError};
use crate::protocol::MAX_FRAME_SIZE;
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// UDP socket joined to one IPv4 multicast group.
pub struct MulticastTransport {
    socket: UdpSocket,
    group: SocketAddrV4,
    receive_timeout: Duration,
}

impl MulticastTransport {
    /// Bind `0.0.0.0:port`, join `group` on `interface` and enable loopback.
    ///
    /// Address reuse is enabled so several coordinators on one host can share
    /// the group port. Must be called from within a tokio runtime.
    pub fn join(
        group: Ipv4Addr,
        port: u16,
        interface: Ipv4Addr,
        receive_timeout: Duration,
    ) -> Result<Self> {
        if !group.is_multicast() {
            return Err(TransportError::InvalidGroup(group));
        }

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(TransportError::Bind)?;
        socket
            .set_reuse_address(true)
            .map_err(TransportError::Bind)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket.set_reuse_port(true).map_err(TransportError::Bind)?;
        socket.set_nonblocking(true).map_err(TransportError::Bind)?;

        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        socket
            .bind(&bind_addr.into())
            .map_err(TransportError::Bind)?;

        socket
            .join_multicast_v4(&group, &interface)
            .map_err(|source| TransportError::Join { group, source })?;
        socket
            .set_multicast_loop_v4(true)
            .map_err(|source| TransportError::Join { group, source })?;

        let socket = UdpSocket::from_std(socket.into()).map_err(TransportError::Bind)?;

        info!(
            "Joined multicast group {}:{} on interface {}",
            group, port, interface
        );

        Ok(Self {
            socket,
            group: SocketAddrV4::new(group, port),
            receive_timeout,
        })
    }

    /// The group address datagrams are sent to.
    pub fn group(&self) -> SocketAddrV4 {
        self.group
    }
}

#[async_trait]
impl Transport for MulticastTransport {
    async fn send(&self, data: &[u8]) -> Result<()> {
        self.socket
            .send_to(data, self.group)
            .await
            .map_err(TransportError::Send)?;
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; MAX_FRAME_SIZE];

        match tokio::time::timeout(self.receive_timeout, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((len, src))) => {
                debug!("Received {} bytes from {}", len, src);
                buf.truncate(len);
                Ok(Some(buf))
            }
            Ok(Err(e)) => Err(TransportError::Receive(e)),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_unicast_group() {
        let result = MulticastTransport::join(
            Ipv4Addr::new(10, 0, 0, 1),
            4446,
            Ipv4Addr::UNSPECIFIED,
            Duration::from_millis(50),
        );
        assert!(matches!(result, Err(TransportError::InvalidGroup(_))));
    }

    #[tokio::test]
    #[ignore = "requires a multicast-capable network interface"]
    async fn test_loopback_delivery() {
        let group = Ipv4Addr::new(239, 255, 77, 78);
        let a = MulticastTransport::join(group, 44617, Ipv4Addr::UNSPECIFIED, Duration::from_millis(200))
            .expect("join a");
        let b = MulticastTransport::join(group, 44617, Ipv4Addr::UNSPECIFIED, Duration::from_millis(200))
            .expect("join b");

        a.send(b"hello group").await.expect("send");

        let mut received = None;
        for _ in 0..10 {
            if let Some(data) = b.receive().await.expect("receive") {
                received = Some(data);
                break;
            }
        }
        assert_eq!(received.as_deref(), Some(&b"hello group"[..]));
    }
}
