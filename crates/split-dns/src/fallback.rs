use std::net::{IpAddr, SocketAddr};

use anyhow::Context as _;
use split_dns_lib::ResourceRecord;

use crate::exchange::Exchange;
use crate::rules::Rule;
use crate::RequestState;

pub const FALLBACK_PORT: u16 = 53;

/// Returns the fallback server to ask, if the filtered (and empty) answer of `state`
/// should be replaced with a fallback answer
pub fn fallback_target(rule: Option<&Rule>, state: &RequestState) -> Option<IpAddr> {
    let rule = rule?;
    if state.suppress_fallback {
        tracing::debug!(name = state.qname(), "No fallback requested");
        return None;
    }
    if rule.fallback.is_none() {
        tracing::debug!(name = state.qname(), "No fallback configured");
    }
    rule.fallback
}

/// Asks `fallback` the original question with a fresh transaction ID
pub async fn resolve_fallback(
    exchange: &dyn Exchange,
    state: &RequestState,
    fallback: IpAddr,
) -> anyhow::Result<Vec<ResourceRecord<'static>>> {
    let mut query = state.query.clone();
    query.header.id = fastrand::u16(..);
    let server = SocketAddr::new(fallback, FALLBACK_PORT);

    tracing::debug!(name = state.qname(), server = %server, "Querying fallback");
    let response = exchange
        .exchange(&query, server)
        .await
        .with_context(|| format!("error while querying fallback server {}", server))?;

    Ok(response.answers)
}
