mod parse;

use std::path::{Path, PathBuf};

pub use parse::parse_rules;

use crate::rules::RuleTable;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("line {line}: invalid CIDR '{value}': {source}")]
    InvalidCidr {
        line: usize,
        value: String,
        source: ipnetwork::IpNetworkError,
    },
    #[error("line {line}: invalid IP address '{value}': {source}")]
    InvalidIp {
        line: usize,
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("line {line}: fallback is already set for this rule")]
    DuplicateFallback { line: usize },
    #[error("line {line}: unknown directive '{name}'")]
    UnknownDirective { line: usize, name: String },
    #[error("line {line}: '{directive}' expects {expected}, got {got} argument(s)")]
    WrongArgumentCount {
        line: usize,
        directive: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("line {line}: unexpected '{token}'")]
    UnexpectedToken { line: usize, token: String },
    #[error("unexpected end of file: missing '}}'")]
    UnexpectedEof,
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Reads and parses the rule file at `path`
pub async fn load_rules(path: &Path) -> Result<RuleTable, ConfigError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;

    let rules = parse_rules(&contents)?;
    for rule in &rules {
        tracing::debug!(
            zones = ?rule.zones,
            networks = rule.networks.len(),
            fallback = ?rule.fallback,
            "Loaded rule"
        );
    }

    Ok(RuleTable::new(rules))
}
