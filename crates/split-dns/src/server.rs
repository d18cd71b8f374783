use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use split_dns_lib::{ByteBuf, DnsHeader, DnsPacket, FromBuf as _, ResponseCode};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::handler::{Handler, ResponseWriter};
use crate::{Connection, RequestState, DEFAULT_EDNS_BUF_CAPACITY, MAX_STANDARD_DNS_MSG_SIZE};

type HandlerResult = anyhow::Result<()>;

pub struct DnsServer {
    udp_socket: Arc<UdpSocket>,
    tcp_listener: Arc<TcpListener>,
    chain: Arc<dyn Handler>,
    workers: JoinSet<HandlerResult>,
}

impl DnsServer {
    pub async fn new(bind_addr: SocketAddr, chain: Arc<dyn Handler>) -> anyhow::Result<Self> {
        let udp_socket = UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("error while binding a UDP socket to {}", bind_addr))?;
        // Same port for both transports, even if it was picked by the OS
        let bind_addr = udp_socket
            .local_addr()
            .context("error while getting the UDP socket's address")?;
        let tcp_listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("error while creating a TcpListener on {}", bind_addr))?;

        Ok(DnsServer {
            udp_socket: Arc::new(udp_socket),
            tcp_listener: Arc::new(tcp_listener),
            chain,
            workers: JoinSet::new(),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.udp_socket
            .local_addr()
            .context("error while getting the server's address")
    }

    pub fn add_workers(&mut self, n: u8) {
        for idx in 0..n {
            let udp_socket = self.udp_socket.clone();
            let tcp_listener = self.tcp_listener.clone();
            let chain = self.chain.clone();

            self.workers.spawn(
                handle_incoming_requests(udp_socket, tcp_listener, chain)
                    .instrument(tracing::trace_span!("worker", id = idx)),
            );
        }
    }

    pub async fn block_until_completion(mut self) -> anyhow::Result<()> {
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result.context("worker task failed to execute")? {
                tracing::error!("Error in a worker: {:#}", e);
            }
        }

        Ok(())
    }
}

async fn handle_incoming_requests(
    udp_socket: Arc<UdpSocket>,
    tcp_listener: Arc<TcpListener>,
    chain: Arc<dyn Handler>,
) -> HandlerResult {
    let mut recv = ByteBuf::new_from_vec(vec![0; DEFAULT_EDNS_BUF_CAPACITY]);
    let mut handlers: JoinSet<()> = JoinSet::new();
    loop {
        // TCP reads shrink the buffer to the message length
        recv.resize(DEFAULT_EDNS_BUF_CAPACITY);

        let connection = tokio::select! {
            Ok((length, from)) = udp_socket.recv_from(&mut recv) => {
                tracing::trace!(client = %from, "new UDP query");
                recv.truncate(length);

                Connection::Udp(udp_socket.clone(), Some(from))
            }
            Ok((stream, from)) = tcp_listener.accept() => {
                tracing::trace!(client = %from, "new TCP connection");

                let mut connection = Connection::Tcp(stream);
                if let Err(e) = connection.read(&mut recv).await {
                    tracing::debug!(client = %from, "Error while reading a TCP query: {:#}", e);
                    continue;
                }

                connection
            }
            Some(result) = handlers.join_next() => {
                result.context("query handling task failed to execute")?;
                continue;
            }
        };

        handlers.spawn(
            serve_query(chain.clone(), connection, parse_query(&recv)).in_current_span(),
        );
    }
}

/// Parses an inbound query. A malformed one yields the FORMERR response to send back instead.
fn parse_query(raw: &ByteBuf<'_>) -> Result<DnsPacket<'static>, DnsPacket<'static>> {
    let error = match DnsPacket::from_buf(&mut ByteBuf::new(raw)) {
        Ok(query) if query.header.is_response => anyhow::anyhow!("not a query"),
        Ok(query) if query.questions.len() != 1 => {
            anyhow::anyhow!("expected a single question, got {}", query.questions.len())
        }
        Ok(query) => return Ok(query),
        Err(e) => e,
    };
    tracing::debug!("Malformed query: {:#}", error);

    // Echo the ID if at least the header is readable
    let query = DnsPacket {
        header: DnsHeader::from_buf(&mut ByteBuf::new(raw)).unwrap_or_default(),
        ..Default::default()
    };
    Err(DnsPacket::new_response(&query, ResponseCode::FormatError))
}

async fn serve_query(
    chain: Arc<dyn Handler>,
    connection: Connection,
    query: Result<DnsPacket<'static>, DnsPacket<'static>>,
) {
    let client = match connection.client_addr() {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("Dropping a query: {:#}", e);
            return;
        }
    };
    let mut writer = ConnectionWriter::new(connection, query.as_ref().ok());

    let query = match query {
        Ok(query) => query,
        Err(formerr) => {
            if let Err(e) = writer.write_msg(formerr).await {
                tracing::error!(client = %client, "Error while sending a DNS response: {:#}", e);
            }
            return;
        }
    };

    let state = RequestState::new(query, client);
    let span = tracing::debug_span!("query", name = state.qname(), client = %state.client);
    let result = async {
        if let Err(e) = chain.serve_dns(&state, &mut writer).await {
            tracing::error!("Error while serving a query with '{}': {:#}", chain.name(), e);
            if !writer.written {
                let response = DnsPacket::new_response(&state.query, ResponseCode::ServerFailure);
                writer.write_msg(response).await?;
            }
        }
        anyhow::Ok(())
    }
    .instrument(span)
    .await;

    // Do not propagate the error, as it's per-client and thus recoverable
    if let Err(e) = result {
        tracing::error!("Error while sending a DNS response: {:#}", e);
    }
}

/// Sends the response back to the client, truncating it if it doesn't fit into a UDP datagram
struct ConnectionWriter {
    connection: Connection,
    max_size: Option<usize>,
    written: bool,
}

impl ConnectionWriter {
    fn new(connection: Connection, query: Option<&DnsPacket<'static>>) -> Self {
        let max_size = (!connection.is_tcp()).then(|| {
            query
                .and_then(DnsPacket::edns_data)
                .map(|edns| edns.udp_payload_size.max(MAX_STANDARD_DNS_MSG_SIZE))
                .unwrap_or(MAX_STANDARD_DNS_MSG_SIZE)
        });
        ConnectionWriter {
            connection,
            max_size,
            written: false,
        }
    }
}

#[async_trait]
impl ResponseWriter for ConnectionWriter {
    async fn write_msg(&mut self, msg: DnsPacket<'static>) -> anyhow::Result<()> {
        if self.written {
            anyhow::bail!("bug: response was written twice");
        }
        self.written = true;

        let encoded = msg
            .encode(self.max_size)
            .context("error while encoding the response")?;
        self.connection
            .send_encoded_packet(&encoded)
            .await
            .context("error while sending the response")
    }
}
