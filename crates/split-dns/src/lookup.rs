use async_trait::async_trait;
use split_dns_lib::{DnsPacket, QueryType, Question};

use crate::handler::{BufferedWriter, Handler};
use crate::RequestState;

/// Max nesting of internal lookups, e.g. for a chain of CNAMEs
pub const MAX_LOOKUP_DEPTH: u8 = 8;

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("lookup depth limit of {limit} reached while resolving '{name}'")]
    DepthExceeded { name: String, limit: u8 },
    #[error("no response was written for '{0}'")]
    NoResponse(String),
}

/// Resolves a name on behalf of an in-flight request
#[async_trait]
pub trait Lookup: Send + Sync {
    async fn lookup(
        &self,
        state: &RequestState,
        name: &str,
        query_type: QueryType,
    ) -> anyhow::Result<DnsPacket<'static>>;
}

/// Serves a fresh query through a handler chain and captures whatever the chain writes.
pub struct ChainLookup<'h> {
    chain: &'h dyn Handler,
}

impl<'h> ChainLookup<'h> {
    pub fn new(chain: &'h dyn Handler) -> Self {
        ChainLookup { chain }
    }
}

#[async_trait]
impl Lookup for ChainLookup<'_> {
    async fn lookup(
        &self,
        state: &RequestState,
        name: &str,
        query_type: QueryType,
    ) -> anyhow::Result<DnsPacket<'static>> {
        let query = DnsPacket::new_query(
            fastrand::u16(..),
            Question::new(name.to_owned(), query_type, None),
        );
        let state = state.with_query(query);

        let mut writer = BufferedWriter::default();
        self.chain.serve_dns(&state, &mut writer).await?;

        Ok(writer
            .into_msg()
            .ok_or_else(|| LookupError::NoResponse(name.to_owned()))?)
    }
}

/// Re-resolves `target` with fallback suppressed, so that the inner filtering pass
/// never substitutes a fallback answer
pub async fn resolve_for_filter_check(
    lookup: &dyn Lookup,
    state: &RequestState,
    target: &str,
) -> anyhow::Result<DnsPacket<'static>> {
    if state.depth >= MAX_LOOKUP_DEPTH {
        return Err(LookupError::DepthExceeded {
            name: target.to_owned(),
            limit: MAX_LOOKUP_DEPTH,
        }
        .into());
    }

    tracing::debug!(name = target, depth = state.depth + 1, "Internally querying");
    lookup.lookup(&state.internal(), target, QueryType::A).await
}

/// Whether `target` still resolves to something the client of `state` may see.
/// Lookup failures count as "no".
pub async fn has_visible_answer(lookup: &dyn Lookup, state: &RequestState, target: &str) -> bool {
    match resolve_for_filter_check(lookup, state, target).await {
        Ok(response) if response.answers.is_empty() => {
            tracing::debug!(name = target, "No answers");
            false
        }
        Ok(_) => true,
        Err(e) => {
            tracing::error!(name = target, "Error while querying: {:#}", e);
            false
        }
    }
}
