use std::net::IpAddr;

use ipnetwork::IpNetwork;
use split_dns_lib::{is_subdomain, normalize_name};

/// Governs answer addresses inside `record_network`: only sources from `allowed` may see them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPolicy {
    pub record_network: IpNetwork,
    pub allowed: Vec<IpNetwork>,
}

impl NetworkPolicy {
    pub fn new(record_network: IpNetwork, allowed: Vec<IpNetwork>) -> Self {
        NetworkPolicy {
            record_network,
            allowed,
        }
    }

    pub fn governs(&self, address: IpAddr) -> bool {
        self.record_network.contains(address)
    }

    pub fn allows(&self, source: IpAddr) -> bool {
        self.allowed.iter().any(|network| network.contains(source))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rule {
    /// Normalized zone names, the root zone being an empty string
    pub zones: Vec<String>,
    /// Consulted in declaration order, first match wins
    pub networks: Vec<NetworkPolicy>,
    pub fallback: Option<IpAddr>,
}

impl Rule {
    /// Whether `qname` is inside one of the zones of this rule
    pub fn matches(&self, qname: &str) -> bool {
        self.zones.iter().any(|zone| is_subdomain(qname, zone))
    }

    pub fn policy_for(&self, address: IpAddr) -> Option<&NetworkPolicy> {
        self.networks.iter().find(|policy| policy.governs(address))
    }
}

/// Rules in configuration order. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    pub fn new(rules: Vec<Rule>) -> Self {
        RuleTable { rules }
    }

    /// First rule having a zone that contains `qname`
    pub fn match_rule(&self, qname: &str) -> Option<&Rule> {
        let qname = normalize_name(qname);
        self.rules
            .iter()
            .find(|rule| rule.matches(&qname))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(zones: &[&str]) -> Rule {
        Rule {
            zones: zones.iter().map(|zone| normalize_name(zone)).collect(),
            ..Default::default()
        }
    }

    fn net(cidr: &str) -> IpNetwork {
        cidr.parse().expect("valid CIDR")
    }

    #[test]
    fn zone_suffix_match() {
        let rule = rule(&["example.org.", "sub.example.org."]);
        assert!(rule.matches("a.sub.example.org"));
        assert!(rule.matches("a.example.org"));
        assert!(rule.matches("example.org"));
        assert!(!rule.matches("example.net"));
        assert!(!rule.matches("badexample.org"));
    }

    #[test]
    fn first_matching_rule_wins() {
        let table = RuleTable::new(vec![
            Rule {
                fallback: Some("8.8.8.8".parse().unwrap()),
                ..rule(&["example.org"])
            },
            Rule {
                fallback: Some("1.1.1.1".parse().unwrap()),
                ..rule(&["a.example.org"])
            },
        ]);
        let matched = table.match_rule("A.Example.Org.").expect("should match");
        assert_eq!(matched.fallback, Some("8.8.8.8".parse().unwrap()));
        assert!(table.match_rule("example.com.").is_none());
    }

    #[test]
    fn root_zone_matches_everything() {
        let table = RuleTable::new(vec![rule(&["."])]);
        assert!(table.match_rule("anything.at.all.").is_some());
    }

    #[test]
    fn first_matching_network_wins() {
        let rule = Rule {
            networks: vec![
                NetworkPolicy::new(net("10.0.0.0/24"), vec![net("192.168.1.0/24")]),
                NetworkPolicy::new(net("10.0.0.0/8"), vec![net("192.168.2.0/24")]),
            ],
            ..rule(&["example.org"])
        };
        let policy = rule
            .policy_for("10.0.0.5".parse().unwrap())
            .expect("should match");
        assert_eq!(policy.record_network, net("10.0.0.0/24"));
        let policy = rule
            .policy_for("10.1.0.5".parse().unwrap())
            .expect("should match");
        assert_eq!(policy.record_network, net("10.0.0.0/8"));
        assert!(rule.policy_for("172.16.0.1".parse().unwrap()).is_none());
    }

    #[test]
    fn policy_allows_sources() {
        let policy = NetworkPolicy::new(net("10.0.0.0/24"), vec![net("192.168.1.0/24")]);
        assert!(policy.allows("192.168.1.10".parse().unwrap()));
        assert!(!policy.allows("192.168.2.1".parse().unwrap()));
        assert!(!policy.allows("::1".parse().unwrap()));
    }
}
