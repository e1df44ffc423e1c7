//! src/gossip/transport.rs
//!
//! Owns the UDP socket used for gossip datagrams. Generalizes the teacher's
//! `transport::Transport` actor shape (channel-based command/event interface
//! around an owned network handle) from QUIC connections to a single
//! non-blocking UDP socket, matching spec.md's "every send is best-effort
//! UDP; the socket is non-blocking; a background worker performs the tick +
//! receive loop."

use crate::error::Result;
use crate::gossip::wire::{self, GossipMessage};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::UdpSocket;

const MAX_DATAGRAM_SIZE: usize = 4096;

pub struct GossipTransport {
    socket: UdpSocket,
}

impl GossipTransport {
    pub fn bind(bind_addr: SocketAddr) -> Result<Self> {
        let socket = Socket::new(
            Domain::for_address(bind_addr),
            Type::DGRAM,
            Some(Protocol::UDP),
        )?;
        socket.set_reuse_address(true)?;
        socket.bind(&bind_addr.into())?;
        let std_socket: std::net::UdpSocket = socket.into();
        std_socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_socket)?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn send(&self, addr: SocketAddr, msg: &GossipMessage) -> Result<()> {
        let bytes = wire::encode(msg);
        self.socket.send_to(&bytes, addr).await?;
        Ok(())
    }

    /// Receives a single datagram. Malformed datagrams are reported as an
    /// `Err` to the caller, which logs and discards rather than propagating
    /// (gossip never tears down the socket over one bad peer).
    pub async fn recv(&self) -> Result<(SocketAddr, Result<GossipMessage>)> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (n, from) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((from, wire::decode(&buf)))
    }
}
