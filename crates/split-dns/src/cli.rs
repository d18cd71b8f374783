use std::net::IpAddr;
use std::path::{Path, PathBuf};

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, name = "split-dns")]
pub struct Args {
    /// Rule file
    #[arg(long, value_name = "PATH", default_value = "split.conf")]
    pub config: PathBuf,
    #[arg(long, value_name = "ADDR", default_value = "127.0.0.1")]
    pub host: IpAddr,
    #[arg(short('p'), long, value_name = "PORT", default_value_t = 53)]
    pub port: u16,
    #[arg(long, value_name = "ADDR", default_value = "1.1.1.1")]
    pub upstream_resolver: IpAddr,
    #[arg(long, value_name = "PORT", default_value_t = 53)]
    pub upstream_port: u16,
    #[arg(long, value_name = "CONNECTIONS", default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_parallel_connections: u8,
    /// I/O timeout of a single exchange with the upstream or a fallback server
    #[arg(long, value_name = "MS", default_value_t = 2000)]
    pub timeout_ms: u64,
    /// Detailed log output, filtered by SPLIT_DNS_LOG_FILE
    #[arg(long, value_name = "PATH", default_value = "debug.log")]
    pub log_file: PathBuf,
    #[arg(long, conflicts_with = "log_file")]
    pub no_log_file: bool,
}

impl Args {
    pub fn log_file(&self) -> Option<&Path> {
        (!self.no_log_file).then_some(self.log_file.as_path())
    }
}
