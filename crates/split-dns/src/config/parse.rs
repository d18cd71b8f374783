use std::net::IpAddr;

use ipnetwork::{IpNetwork, IpNetworkError};
use split_dns_lib::normalize_name;

use super::ConfigError;
use crate::rules::{NetworkPolicy, Rule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Token<'a> {
    text: &'a str,
    line: usize,
}

/// Splits the input into words, dropping comments. Braces are always separate tokens.
fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    for (idx, line) in input.lines().enumerate() {
        let content = line.split_once('#').map_or(line, |(content, _)| content);
        for word in content.split_whitespace() {
            let mut rest = word;
            while !rest.is_empty() {
                let end = match rest.find(['{', '}']) {
                    Some(0) => 1,
                    Some(pos) => pos,
                    None => rest.len(),
                };
                tokens.push(Token {
                    text: &rest[..end],
                    line: idx + 1,
                });
                rest = &rest[end..];
            }
        }
    }
    tokens
}

struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Parser {
            tokens: tokenize(input),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token<'a>> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn next_or_eof(&mut self) -> Result<Token<'a>, ConfigError> {
        self.next().ok_or(ConfigError::UnexpectedEof)
    }

    /// Consumes the remaining words on `line`, stopping at a brace
    fn line_args(&mut self, line: usize) -> Vec<Token<'a>> {
        let mut args = Vec::new();
        while let Some(token) = self.peek() {
            if token.line != line || token.text == "{" || token.text == "}" {
                break;
            }
            args.push(token);
            self.pos += 1;
        }
        args
    }

    fn consume_open_brace(&mut self) -> bool {
        if self.peek().is_some_and(|token| token.text == "{") {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}

fn parse_cidr(token: Token<'_>) -> Result<IpNetwork, ConfigError> {
    let invalid = |source| ConfigError::InvalidCidr {
        line: token.line,
        value: token.text.to_owned(),
        source,
    };
    if !token.text.contains('/') {
        return Err(invalid(IpNetworkError::InvalidCidrFormat(
            "missing prefix length".to_owned(),
        )));
    }
    let network: IpNetwork = token.text.parse().map_err(invalid)?;
    // Host bits are ignored: 10.0.0.5/24 is 10.0.0.0/24
    IpNetwork::new(network.network(), network.prefix()).map_err(invalid)
}

fn parse_ip(token: Token<'_>) -> Result<IpAddr, ConfigError> {
    token.text.parse().map_err(|source| ConfigError::InvalidIp {
        line: token.line,
        value: token.text.to_owned(),
        source,
    })
}

fn require_args(
    directive: &'static str,
    line: usize,
    args: &[Token<'_>],
    exactly_one: bool,
) -> Result<(), ConfigError> {
    let valid = if exactly_one {
        args.len() == 1
    } else {
        !args.is_empty()
    };
    if !valid {
        return Err(ConfigError::WrongArgumentCount {
            line,
            directive,
            expected: if exactly_one { "exactly one" } else { "at least one" },
            got: args.len(),
        });
    }
    Ok(())
}

/// Parses the contents of a rule file. Rules are returned in file order.
pub fn parse_rules(input: &str) -> Result<Vec<Rule>, ConfigError> {
    let mut parser = Parser::new(input);
    let mut rules = Vec::new();

    while let Some(token) = parser.next() {
        match token.text {
            "split" => {}
            "{" | "}" => {
                return Err(ConfigError::UnexpectedToken {
                    line: token.line,
                    token: token.text.to_owned(),
                })
            }
            name => {
                return Err(ConfigError::UnknownDirective {
                    line: token.line,
                    name: name.to_owned(),
                })
            }
        }

        let mut zones: Vec<String> = Vec::new();
        for zone in parser.line_args(token.line) {
            let zone = normalize_name(zone.text);
            if !zones.contains(&zone) {
                zones.push(zone);
            }
        }
        if zones.is_empty() {
            // Root zone
            zones.push(String::new());
        }

        // A rule without a body has nothing to enforce
        if !parser.consume_open_brace() {
            tracing::debug!(zones = ?zones, "Skipping a split rule without a body");
            continue;
        }

        rules.push(parse_rule_body(&mut parser, zones)?);
    }

    Ok(rules)
}

fn parse_rule_body(parser: &mut Parser<'_>, zones: Vec<String>) -> Result<Rule, ConfigError> {
    let mut rule = Rule {
        zones,
        ..Default::default()
    };

    loop {
        let token = parser.next_or_eof()?;
        match token.text {
            "}" => break,
            "net" => {
                let args = parser.line_args(token.line);
                require_args("net", token.line, &args, false)?;
                let record_networks = args
                    .into_iter()
                    .map(parse_cidr)
                    .collect::<Result<Vec<_>, _>>()?;

                let mut allowed = if parser.consume_open_brace() {
                    parse_allow_block(parser)?
                } else {
                    Vec::new()
                };
                if allowed.is_empty() {
                    allowed = record_networks.clone();
                }

                rule.networks.extend(
                    record_networks
                        .into_iter()
                        .map(|record_network| NetworkPolicy::new(record_network, allowed.clone())),
                );
            }
            "fallback" => {
                let args = parser.line_args(token.line);
                require_args("fallback", token.line, &args, true)?;
                if rule.fallback.is_some() {
                    return Err(ConfigError::DuplicateFallback { line: token.line });
                }
                rule.fallback = Some(parse_ip(args[0])?);
            }
            "{" => {
                return Err(ConfigError::UnexpectedToken {
                    line: token.line,
                    token: token.text.to_owned(),
                })
            }
            name => {
                return Err(ConfigError::UnknownDirective {
                    line: token.line,
                    name: name.to_owned(),
                })
            }
        }
    }

    Ok(rule)
}

fn parse_allow_block(parser: &mut Parser<'_>) -> Result<Vec<IpNetwork>, ConfigError> {
    let mut allowed: Vec<IpNetwork> = Vec::new();
    loop {
        let token = parser.next_or_eof()?;
        match token.text {
            "}" => break,
            "allow" => {
                let args = parser.line_args(token.line);
                require_args("allow", token.line, &args, false)?;
                for arg in args {
                    let network = parse_cidr(arg)?;
                    if allowed
                        .iter()
                        .any(|existing| existing.contains(network.network()))
                    {
                        continue;
                    }
                    allowed.push(network);
                }
            }
            "{" => {
                return Err(ConfigError::UnexpectedToken {
                    line: token.line,
                    token: token.text.to_owned(),
                })
            }
            name => {
                return Err(ConfigError::UnknownDirective {
                    line: token.line,
                    name: name.to_owned(),
                })
            }
        }
    }
    Ok(allowed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(cidr: &str) -> IpNetwork {
        cidr.parse().expect("valid CIDR")
    }

    #[test]
    fn tokenizer_splits_braces_and_drops_comments() {
        let tokens = tokenize("split example.org{ # a comment\n  net 10.0.0.0/8}");
        let texts: Vec<_> = tokens.iter().map(|token| (token.text, token.line)).collect();
        assert_eq!(
            texts,
            vec![
                ("split", 1),
                ("example.org", 1),
                ("{", 1),
                ("net", 2),
                ("10.0.0.0/8", 2),
                ("}", 2),
            ]
        );
    }

    #[test]
    fn full_rule() {
        let rules = parse_rules(
            r#"
            # internal services
            split Example.ORG. example.net example.org {
                net 10.0.0.0/24 {
                    allow 192.168.1.0/24
                    allow 192.168.2.0/24 192.168.1.128/25
                }
                fallback 8.8.8.8
            }
            "#,
        )
        .expect("shouldn't have failed");

        assert_eq!(
            rules,
            vec![Rule {
                zones: vec!["example.org".to_owned(), "example.net".to_owned()],
                networks: vec![NetworkPolicy::new(
                    net("10.0.0.0/24"),
                    vec![net("192.168.1.0/24"), net("192.168.2.0/24")],
                )],
                fallback: Some("8.8.8.8".parse().unwrap()),
            }]
        );
    }

    #[test]
    fn net_without_allow_allows_itself() {
        let rules = parse_rules("split {\n net 10.0.0.0/24 10.0.1.0/24\n}").expect("shouldn't have failed");
        let own = vec![net("10.0.0.0/24"), net("10.0.1.0/24")];
        assert_eq!(rules[0].zones, vec![String::new()]);
        assert_eq!(
            rules[0].networks,
            vec![
                NetworkPolicy::new(net("10.0.0.0/24"), own.clone()),
                NetworkPolicy::new(net("10.0.1.0/24"), own),
            ]
        );
        assert_eq!(rules[0].fallback, None);
    }

    #[test]
    fn host_bits_are_cleared() {
        let rules = parse_rules("split a.example {\n net 10.0.0.5/24 { \n allow 192.168.1.7/24 \n }\n}")
            .expect("shouldn't have failed");
        assert_eq!(
            rules[0].networks,
            vec![NetworkPolicy::new(net("10.0.0.0/24"), vec![net("192.168.1.0/24")])]
        );
    }

    #[test]
    fn rules_keep_file_order() {
        let rules = parse_rules(
            "split example.org {\n fallback 8.8.8.8\n}\nsplit {\n fallback 2001:4860:4860::8888\n}\nsplit bare.example\n",
        )
        .expect("shouldn't have failed");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].zones, vec!["example.org".to_owned()]);
        assert_eq!(rules[1].zones, vec![String::new()]);
        assert_eq!(rules[1].fallback, Some("2001:4860:4860::8888".parse().unwrap()));
    }

    #[test]
    fn errors() {
        let err = |input: &str| parse_rules(input).expect_err("should have failed");

        assert!(matches!(
            err("split {\n net 10.0.0.0/33\n}"),
            ConfigError::InvalidCidr { line: 2, .. }
        ));
        assert!(matches!(
            err("split {\n net 10.0.0.1\n}"),
            ConfigError::InvalidCidr { line: 2, .. }
        ));
        assert!(matches!(
            err("split {\n fallback dns.google\n}"),
            ConfigError::InvalidIp { line: 2, .. }
        ));
        assert!(matches!(
            err("split {\n fallback 8.8.8.8\n fallback 1.1.1.1\n}"),
            ConfigError::DuplicateFallback { line: 3 }
        ));
        assert!(matches!(
            err("split {\n fallback 8.8.8.8 1.1.1.1\n}"),
            ConfigError::WrongArgumentCount { line: 2, directive: "fallback", got: 2, .. }
        ));
        assert!(matches!(
            err("split {\n net\n}"),
            ConfigError::WrongArgumentCount { line: 2, directive: "net", got: 0, .. }
        ));
        assert!(matches!(
            err("split {\n net 10.0.0.0/8 {\n deny 10.0.0.0/8\n }\n}"),
            ConfigError::UnknownDirective { line: 3, .. }
        ));
        assert!(matches!(
            err("forward . 1.1.1.1"),
            ConfigError::UnknownDirective { line: 1, .. }
        ));
        assert!(matches!(err("split {\n net 10.0.0.0/8\n"), ConfigError::UnexpectedEof));
        assert!(matches!(
            err("}"),
            ConfigError::UnexpectedToken { line: 1, .. }
        ));
        assert!(matches!(
            err("split {\n {\n}"),
            ConfigError::UnexpectedToken { line: 2, .. }
        ));
    }

    #[test]
    fn error_messages_name_the_line() {
        let err = parse_rules("split {\n\n fallback nope\n}").expect_err("should have failed");
        assert!(err.to_string().starts_with("line 3: invalid IP address 'nope'"));
    }
}
