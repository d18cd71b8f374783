use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::task::JoinSet;

use crate::config::load_rules;
use crate::exchange::{Exchange, UdpExchange};
use crate::forward::Forward;
use crate::metrics::RequestCounter;
use crate::split::Split;
use crate::{Args, DnsServer};

const STATS_INTERVAL: Duration = Duration::from_secs(60);

pub struct App;

impl App {
    pub async fn run_until_completion(args: Args) -> anyhow::Result<()> {
        let dns_bind_addr = SocketAddr::new(args.host, args.port);
        let upstream_resolver_addr = SocketAddr::new(args.upstream_resolver, args.upstream_port);

        let rules = load_rules(&args.config)
            .await
            .context("failed to load the split rules")?;
        tracing::info!(
            path = %args.config.display(),
            rules = rules.len(),
            "Loaded split rules"
        );

        let exchange: Arc<dyn Exchange> =
            Arc::new(UdpExchange::new(Duration::from_millis(args.timeout_ms)));
        let metrics = Arc::new(RequestCounter::new(format!("dns://{}", dns_bind_addr)));
        let chain = Split::new(
            Forward::new(upstream_resolver_addr, exchange.clone()),
            Arc::new(rules),
            exchange,
            metrics.clone(),
        );

        let mut server = DnsServer::new(dns_bind_addr, Arc::new(chain))
            .await
            .context("failed to instantiate the DNS server")?;
        tracing::info!(
            addr = %dns_bind_addr,
            upstream = %upstream_resolver_addr,
            "Listening"
        );

        let mut tasks = JoinSet::new();
        server.add_workers(args.max_parallel_connections);
        tasks.spawn(server.block_until_completion());
        tasks.spawn(report_request_count(metrics));

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result.context("failed to execute a task")? {
                tracing::error!("Error: {:#}", e);
            }
        }

        Ok(())
    }
}

async fn report_request_count(metrics: Arc<RequestCounter>) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    // Skip the first immediate tick
    interval.tick().await;
    loop {
        interval.tick().await;
        tracing::info!(
            server = metrics.server(),
            requests = metrics.get(),
            "Request count"
        );
    }
}
