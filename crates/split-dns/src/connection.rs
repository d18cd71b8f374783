use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context as _;
use split_dns_lib::ByteBuf;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpStream, UdpSocket};

use crate::DEFAULT_EDNS_BUF_CAPACITY;

/// Abstracts the transport, so that the server and the exchange client can share the framing logic
pub enum Connection {
    Tcp(TcpStream),
    /// A shared socket and the peer to answer to. `None` means the socket is connected.
    Udp(Arc<UdpSocket>, Option<SocketAddr>),
}

impl Connection {
    pub async fn send_encoded_packet(&mut self, src: &[u8]) -> anyhow::Result<()> {
        match self {
            Connection::Tcp(socket) => {
                let length = u16::try_from(src.len())
                    .context("TCP: packet doesn't fit into a single message")?
                    .to_be_bytes();
                socket
                    .write_all(&length)
                    .await
                    .context("TCP: error while sending packet's length")?;
                socket
                    .write_all(src)
                    .await
                    .context("TCP: error while sending a DNS packet")?;
            }
            Connection::Udp(socket, Some(addr)) => {
                socket
                    .send_to(src, *addr)
                    .await
                    .with_context(|| format!("UDP: error while sending a DNS packet to {}", addr))?;
            }
            Connection::Udp(socket, None) => {
                socket
                    .send(src)
                    .await
                    .context("UDP: error while sending a DNS packet")?;
            }
        };

        Ok(())
    }

    /// Reads a single DNS message into `dst`, which is resized to exactly fit it
    pub async fn read(&mut self, dst: &mut ByteBuf<'_>) -> anyhow::Result<usize> {
        let packet_length = match self {
            Connection::Tcp(socket) => {
                let length = socket
                    .read_u16()
                    .await
                    .context("TCP: error while reading packet's length")? as usize;
                if dst.len() < length {
                    dst.resize(length);
                }
                socket
                    .read_exact(&mut dst[..length])
                    .await
                    .context("TCP: error while reading a packet")?;
                length
            }
            Connection::Udp(socket, _) => {
                if dst.len() < DEFAULT_EDNS_BUF_CAPACITY {
                    dst.resize(DEFAULT_EDNS_BUF_CAPACITY);
                }
                socket.recv(dst).await.context("UDP: error while reading a packet")?
            }
        };
        dst.truncate(packet_length);
        dst.reset_pos();

        Ok(packet_length)
    }

    pub fn client_addr(&self) -> anyhow::Result<IpAddr> {
        match self {
            Connection::Tcp(socket) => socket
                .peer_addr()
                .map(|socket_addr| socket_addr.ip())
                .context("bug: TCP socket is not connected?"),
            Connection::Udp(socket, addr) => addr
                .map(|socket_addr| socket_addr.ip())
                .or_else(|| socket.peer_addr().ok().map(|socket_addr| socket_addr.ip()))
                .context("bug: UDP socket is not connected and explicit addr is missing?"),
        }
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self, Connection::Tcp(_))
    }
}
