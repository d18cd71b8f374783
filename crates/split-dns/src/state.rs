use std::net::IpAddr;

use split_dns_lib::{normalize_name, DnsPacket};

/// Per-request data. Owned by the task serving the request and never shared.
#[derive(Debug, Clone)]
pub struct RequestState {
    /// Original query as received from the client
    pub query: DnsPacket<'static>,
    pub client: IpAddr,
    /// Set on internal lookups, so that their responses are never replaced by a fallback answer
    pub suppress_fallback: bool,
    /// Number of internal lookups this request is nested in
    pub depth: u8,
    qname: String,
}

impl RequestState {
    pub fn new(query: DnsPacket<'static>, client: IpAddr) -> Self {
        let qname = query
            .question()
            .map(|question| normalize_name(&question.qname))
            .unwrap_or_default();
        RequestState {
            query,
            client: client.to_canonical(),
            suppress_fallback: false,
            depth: 0,
            qname,
        }
    }

    /// Normalized name of the first question
    pub fn qname(&self) -> &str {
        &self.qname
    }

    /// State for an internal lookup issued on behalf of this request
    pub fn internal(&self) -> Self {
        RequestState {
            suppress_fallback: true,
            depth: self.depth.saturating_add(1),
            ..self.clone()
        }
    }

    /// Same client and flags, different query
    pub fn with_query(&self, query: DnsPacket<'static>) -> Self {
        RequestState {
            suppress_fallback: self.suppress_fallback,
            depth: self.depth,
            ..RequestState::new(query, self.client)
        }
    }
}
