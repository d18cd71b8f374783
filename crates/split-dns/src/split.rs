use std::sync::Arc;

use async_trait::async_trait;
use split_dns_lib::DnsPacket;

use crate::exchange::Exchange;
use crate::fallback::{fallback_target, resolve_fallback};
use crate::filter::{filter_answers, FilterOutcome};
use crate::handler::{Handler, ResponseWriter};
use crate::lookup::{ChainLookup, Lookup};
use crate::metrics::RequestCounter;
use crate::rules::{Rule, RuleTable};
use crate::RequestState;

/// Filters the answers written by `next` according to the rule matching the queried name
pub struct Split<N> {
    next: N,
    rules: Arc<RuleTable>,
    exchange: Arc<dyn Exchange>,
    metrics: Arc<RequestCounter>,
    /// Resolves indirection targets. Defaults to re-serving them through this handler.
    lookup: Option<Arc<dyn Lookup>>,
}

impl<N: Handler> Split<N> {
    pub fn new(
        next: N,
        rules: Arc<RuleTable>,
        exchange: Arc<dyn Exchange>,
        metrics: Arc<RequestCounter>,
    ) -> Self {
        Split {
            next,
            rules,
            exchange,
            metrics,
            lookup: None,
        }
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn Lookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }
}

#[async_trait]
impl<N: Handler> Handler for Split<N> {
    fn name(&self) -> &'static str {
        "split"
    }

    async fn serve_dns(
        &self,
        state: &RequestState,
        writer: &mut dyn ResponseWriter,
    ) -> anyhow::Result<()> {
        self.metrics.inc();

        let rule = self.rules.match_rule(state.qname());
        match rule {
            Some(rule) => tracing::debug!(name = state.qname(), zones = ?rule.zones, "Matched rule"),
            None => tracing::debug!(name = state.qname(), "No rule matched"),
        }

        let chain_lookup = ChainLookup::new(self);
        let lookup: &dyn Lookup = match &self.lookup {
            Some(lookup) => lookup.as_ref(),
            None => &chain_lookup,
        };

        let mut split_writer = SplitWriter {
            inner: writer,
            state,
            rule,
            lookup,
            exchange: self.exchange.as_ref(),
        };
        self.next.serve_dns(state, &mut split_writer).await
    }
}

/// Intercepts the response of the next handler and writes the filtered one instead
struct SplitWriter<'a> {
    inner: &'a mut dyn ResponseWriter,
    state: &'a RequestState,
    rule: Option<&'a Rule>,
    lookup: &'a dyn Lookup,
    exchange: &'a dyn Exchange,
}

#[async_trait]
impl ResponseWriter for SplitWriter<'_> {
    async fn write_msg(&mut self, mut msg: DnsPacket<'static>) -> anyhow::Result<()> {
        let Some(rule) = self.rule else {
            return self.inner.write_msg(msg).await;
        };

        let answers = std::mem::take(&mut msg.answers);
        let applied_rule = match filter_answers(rule, self.state, &answers, self.lookup).await {
            FilterOutcome::Filtered {
                answers,
                applied_rule,
            } => {
                msg.answers = answers;
                applied_rule
            }
            FilterOutcome::Unfiltered(query_type) => {
                tracing::debug!(
                    name = self.state.qname(),
                    qtype = %query_type,
                    "Unsupported record type, writing the original response"
                );
                msg.answers = answers;
                return self.inner.write_msg(msg).await;
            }
        };

        if msg.answers.is_empty() {
            if let Some(fallback) = fallback_target(applied_rule, self.state) {
                let answers = resolve_fallback(self.exchange, self.state, fallback).await?;
                msg.answers.extend(answers);
            }
        }

        self.inner.write_msg(msg).await
    }
}
