//! UDP transport: one datagram per packet, one listening port per channel.
//!
//! A host is either a bare name/IP, reached on the configured channel ports,
//! or `ip:port`, reached on `port` (peer), `port + 1` (ring) and `port + 2`
//! (catalog). The second form lets several nodes share one machine.

use async_trait::async_trait;
use ring_core::protocol::{self, Channel, Packet};
use ring_core::transport::{Result, Transport, TransportError};
use ring_core::{Node, PortConfig};
use ring_core::{FileStore, FileTransport};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{lookup_host, UdpSocket};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receive buffer, large enough for any UDP payload.
const RECV_BUFFER: usize = 65_536;

/// Offset of a channel's port from a host's base port.
fn channel_offset(channel: Channel) -> u16 {
    match channel {
        Channel::Peer => 0,
        Channel::Ring => 1,
        Channel::Catalog => 2,
    }
}

/// Ports a host listens on.
///
/// `ip:port` hosts use consecutive ports from `port`; bare hosts use `ports`.
pub fn ports_for(host: &str, ports: &PortConfig) -> PortConfig {
    match host.parse::<SocketAddr>() {
        Ok(addr) => {
            let base = addr.port();
            PortConfig {
                peer: base,
                ring: base.saturating_add(1),
                catalog: base.saturating_add(2),
            }
        }
        Err(_) => *ports,
    }
}

/// Address to send a channel's packets to.
pub async fn resolve(host: &str, channel: Channel, ports: &PortConfig) -> Result<SocketAddr> {
    if let Ok(addr) = host.parse::<SocketAddr>() {
        let port = addr.port().saturating_add(channel_offset(channel));
        return Ok(SocketAddr::new(addr.ip(), port));
    }

    let port = ports.port(channel);
    lookup_host((host, port))
        .await
        .map_err(|e| TransportError::UnknownHost(format!("{}: {}", host, e)))?
        .next()
        .ok_or_else(|| TransportError::UnknownHost(host.to_string()))
}

/// Sends packets from a single ephemeral socket.
pub struct UdpTransport {
    socket: UdpSocket,
    ports: PortConfig,
}

impl UdpTransport {
    /// Bind an ephemeral sending socket.
    pub async fn bind(ports: PortConfig) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        Ok(Self { socket, ports })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, host: &str, packet: Packet) -> Result<()> {
        let addr = resolve(host, packet.channel(), &self.ports).await?;
        let bytes = protocol::encode(&packet)?;
        self.socket
            .send_to(&bytes, addr)
            .await
            .map_err(|e| TransportError::SendFailed(format!("{}: {}", addr, e)))?;
        Ok(())
    }
}

/// Receives and decodes one channel's datagrams.
pub struct UdpListener {
    channel: Channel,
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpListener {
    /// Bind a channel's listening socket.
    pub async fn bind(addr: SocketAddr, channel: Channel) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("Listening for {} packets on {}", channel, socket.local_addr()?);
        Ok(Self {
            channel,
            socket,
            buf: vec![0u8; RECV_BUFFER],
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Next decodable packet. Undecodable datagrams are logged and skipped.
    pub async fn recv(&mut self) -> std::io::Result<(Packet, SocketAddr)> {
        loop {
            let (len, from) = self.socket.recv_from(&mut self.buf).await?;
            match protocol::decode(self.channel, &self.buf[..len]) {
                Ok(packet) => return Ok((packet, from)),
                Err(e) => warn!("Dropping {} byte datagram from {}: {}", len, from, e),
            }
        }
    }

    /// Feed every packet to `node`, each in its own task.
    pub fn spawn<T, F, S>(mut self, node: Arc<Node<T, F, S>>) -> JoinHandle<()>
    where
        T: Transport + 'static,
        F: FileTransport + 'static,
        S: FileStore + 'static,
    {
        tokio::spawn(async move {
            loop {
                match self.recv().await {
                    Ok((packet, from)) => {
                        debug!("{} packet from {}", self.channel, from);
                        let node = Arc::clone(&node);
                        tokio::spawn(async move { node.handle_packet(packet).await });
                    }
                    Err(e) => {
                        warn!("{} listener receive failed: {}", self.channel, e);
                    }
                }
            }
        })
    }
}
