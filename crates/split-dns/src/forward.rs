use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use split_dns_lib::{DnsPacket, QueryType, ResponseCode};

use crate::exchange::Exchange;
use crate::handler::{Handler, ResponseWriter};
use crate::RequestState;

/// Last handler of the chain: asks the upstream resolver
pub struct Forward {
    upstream: SocketAddr,
    exchange: Arc<dyn Exchange>,
}

impl Forward {
    pub fn new(upstream: SocketAddr, exchange: Arc<dyn Exchange>) -> Self {
        Forward { upstream, exchange }
    }
}

#[async_trait]
impl Handler for Forward {
    fn name(&self) -> &'static str {
        "forward"
    }

    async fn serve_dns(
        &self,
        state: &RequestState,
        writer: &mut dyn ResponseWriter,
    ) -> anyhow::Result<()> {
        let response = match self.exchange.exchange(&state.query, self.upstream).await {
            Ok(mut response) => {
                response.header.id = state.query.header.id;
                // The upstream always speaks EDNS to us, the client may not
                if state.query.opt_record().is_none() {
                    response
                        .additionals
                        .retain(|rr| rr.resource_data.get_query_type() != QueryType::OPT);
                }
                response
            }
            Err(e) => {
                tracing::error!(
                    resolver = %self.upstream,
                    name = state.qname(),
                    "Error while forwarding a request to the upstream resolver: {:#}",
                    e
                );
                DnsPacket::new_response(&state.query, ResponseCode::ServerFailure)
            }
        };

        writer.write_msg(response).await
    }
}
