use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use split_dns_lib::{ByteBuf, DnsPacket, FromBuf as _, QueryType, ResourceData, ResourceRecord};
use tokio::net::{TcpStream, UdpSocket};

use crate::{Connection, DEFAULT_EDNS_BUF_CAPACITY, MAX_STANDARD_DNS_MSG_SIZE};

/// Sends a query to a specific DNS server and returns its response
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn exchange(
        &self,
        query: &DnsPacket<'static>,
        server: SocketAddr,
    ) -> anyhow::Result<DnsPacket<'static>>;
}

/// Plain DNS over UDP with a TCP retry for truncated responses
#[derive(Debug, Clone)]
pub struct UdpExchange {
    timeout: Duration,
}

impl UdpExchange {
    pub fn new(timeout: Duration) -> Self {
        UdpExchange { timeout }
    }

    async fn roundtrip(
        &self,
        packet: &DnsPacket<'_>,
        server: SocketAddr,
        force_tcp: bool,
    ) -> anyhow::Result<(DnsPacket<'static>, bool)> {
        // No need to pass the size limit here, as we can just fall back to TCP if it's too big
        let mut buf = packet
            .encode(None)
            .context("error while encoding the DNS packet")?;

        let mut connection = if force_tcp || buf.len() > MAX_STANDARD_DNS_MSG_SIZE {
            Connection::Tcp(
                TcpStream::connect(server)
                    .await
                    .with_context(|| format!("TCP: error while connecting to {}", server))?,
            )
        } else {
            let bind_addr: SocketAddr = if server.is_ipv4() {
                ([0, 0, 0, 0], 0).into()
            } else {
                ([0u16; 8], 0).into()
            };
            let socket = UdpSocket::bind(bind_addr)
                .await
                .context("UDP: unable to bind a socket")?;
            socket
                .connect(server)
                .await
                .with_context(|| format!("UDP: error while connecting to {}", server))?;
            Connection::Udp(Arc::new(socket), None)
        };

        connection
            .send_encoded_packet(&buf)
            .await
            .context("error while sending the query")?;

        // The buf is reused for both sending and receiving
        buf.clear();
        connection
            .read(&mut buf)
            .await
            .context("error while reading the response")?;

        let response = DnsPacket::from_buf(&mut buf).context("error while decoding the response")?;
        Ok((response, connection.is_tcp()))
    }
}

/// Makes sure the query advertises the buffer size this client is able to receive
fn with_edns(query: &DnsPacket<'static>) -> DnsPacket<'static> {
    let mut packet = query.clone();
    match packet
        .additionals
        .iter_mut()
        .find(|rr| rr.resource_data.get_query_type() == QueryType::OPT)
    {
        Some(opt) => opt.class = DEFAULT_EDNS_BUF_CAPACITY as u16,
        None => packet.additionals.push(ResourceRecord::new(
            "",
            ResourceData::OPT { options: vec![] },
            Some(0),
            Some(DEFAULT_EDNS_BUF_CAPACITY as u16),
        )),
    }
    packet
}

#[async_trait]
impl Exchange for UdpExchange {
    async fn exchange(
        &self,
        query: &DnsPacket<'static>,
        server: SocketAddr,
    ) -> anyhow::Result<DnsPacket<'static>> {
        let packet = with_edns(query);

        let mut force_tcp = false;
        loop {
            let (response, over_tcp) = tokio::time::timeout(
                self.timeout,
                self.roundtrip(&packet, server, force_tcp),
            )
            .await
            .with_context(|| format!("no response from {} within {:?}", server, self.timeout))??;

            if response.header.id != packet.header.id {
                anyhow::bail!(
                    "response ID mismatch: expected {}, got {}",
                    packet.header.id,
                    response.header.id
                );
            }

            if response.header.truncation {
                if over_tcp {
                    anyhow::bail!("response truncation when using TCP");
                }
                tracing::debug!(server = %server, "Truncated response, retrying over TCP");
                force_tcp = true;
                continue;
            }

            break Ok(response);
        }
    }
}
