mod logging;
pub use logging::setup_logging;
mod cli;
pub use cli::Args;
mod app;
pub use app::App;
mod connection;
pub use connection::Connection;
mod server;
pub use server::DnsServer;
mod state;
pub use state::RequestState;

pub mod config;
pub mod exchange;
pub mod fallback;
pub mod filter;
pub mod forward;
pub mod handler;
pub mod lookup;
pub mod metrics;
pub mod rules;
pub mod split;

pub use split_dns_lib::MAX_STANDARD_DNS_MSG_SIZE;

/// Recommended EDNS buf size
pub const DEFAULT_EDNS_BUF_CAPACITY: usize = 1232;
