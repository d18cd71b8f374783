use std::net::IpAddr;

use split_dns_lib::{QueryType, ResourceData, ResourceRecord};

use crate::lookup::{has_visible_answer, Lookup};
use crate::rules::Rule;
use crate::RequestState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The address isn't in any network of the rule
    Unmatched,
    Allowed,
    Denied,
}

pub fn check_address(rule: &Rule, source: IpAddr, address: IpAddr) -> Verdict {
    match rule.policy_for(address) {
        None => Verdict::Unmatched,
        Some(policy) if policy.allows(source) => Verdict::Allowed,
        Some(_) => Verdict::Denied,
    }
}

#[derive(Debug, Default)]
pub struct FilteredAnswers {
    /// Everything the client may see
    pub visible: Vec<ResourceRecord<'static>>,
    /// Subset of `visible` that matched a network and was explicitly allowed
    pub restricted: Vec<ResourceRecord<'static>>,
}

impl FilteredAnswers {
    /// Explicitly allowed records take precedence over the ones that merely passed through
    pub fn into_answers(self) -> Vec<ResourceRecord<'static>> {
        if self.restricted.is_empty() {
            self.visible
        } else {
            self.restricted
        }
    }
}

#[derive(Debug)]
pub enum FilterOutcome<'r> {
    Filtered {
        answers: Vec<ResourceRecord<'static>>,
        /// Set once an A record was checked against the rule. Only then may the
        /// rule's fallback replace an empty answer.
        applied_rule: Option<&'r Rule>,
    },
    /// The answer section holds a record type the filter has no policy for
    Unfiltered(QueryType),
}

fn is_filterable(query_type: QueryType) -> bool {
    matches!(
        query_type,
        QueryType::A | QueryType::CNAME | QueryType::SRV | QueryType::PTR
    )
}

/// Drops every answer the client of `state` is not allowed to see under `rule`.
/// Indirection records are kept only if their target still resolves to something visible.
pub async fn filter_answers<'r>(
    rule: &'r Rule,
    state: &RequestState,
    answers: &[ResourceRecord<'static>],
    lookup: &dyn Lookup,
) -> FilterOutcome<'r> {
    if let Some(rr) = answers
        .iter()
        .find(|rr| !is_filterable(rr.resource_data.get_query_type()))
    {
        return FilterOutcome::Unfiltered(rr.resource_data.get_query_type());
    }

    let mut filtered = FilteredAnswers::default();
    let mut applied_rule = None;
    for rr in answers {
        match &rr.resource_data {
            ResourceData::A { address } => {
                applied_rule = Some(rule);
                match check_address(rule, state.client, IpAddr::V4(*address)) {
                    Verdict::Unmatched => filtered.visible.push(rr.clone()),
                    Verdict::Allowed => {
                        filtered.visible.push(rr.clone());
                        filtered.restricted.push(rr.clone());
                    }
                    Verdict::Denied => {
                        tracing::info!(
                            source = %state.client,
                            name = %rr.name,
                            address = %address,
                            "Filtered answer"
                        );
                    }
                }
            }
            data => {
                let Some(target) = data.target() else {
                    continue;
                };
                if has_visible_answer(lookup, state, target).await {
                    filtered.visible.push(rr.clone());
                }
            }
        }
    }

    FilterOutcome::Filtered {
        answers: filtered.into_answers(),
        applied_rule,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::NetworkPolicy;
    use async_trait::async_trait;
    use futures::executor::block_on;
    use ipnetwork::IpNetwork;
    use proptest::prelude::*;
    use split_dns_lib::{DnsPacket, Question, ResponseCode};
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    /// Answers from a fixed table; names missing from it fail the lookup
    #[derive(Default)]
    struct FakeLookup {
        answers: HashMap<String, usize>,
        queried: Mutex<Vec<(String, bool)>>,
    }

    impl FakeLookup {
        fn with(mut self, name: &str, answer_count: usize) -> Self {
            self.answers.insert(name.to_owned(), answer_count);
            self
        }
    }

    #[async_trait]
    impl Lookup for FakeLookup {
        async fn lookup(
            &self,
            state: &RequestState,
            name: &str,
            query_type: QueryType,
        ) -> anyhow::Result<DnsPacket<'static>> {
            assert_eq!(query_type, QueryType::A);
            self.queried
                .lock()
                .unwrap()
                .push((name.to_owned(), state.suppress_fallback));

            let count = *self
                .answers
                .get(name)
                .ok_or_else(|| anyhow::anyhow!("upstream unreachable"))?;
            let query = DnsPacket::new_query(1, Question::new(name.to_owned(), QueryType::A, None));
            let mut response = DnsPacket::new_response(&query, ResponseCode::Success);
            for idx in 0..count {
                response.answers.push(a_record(name, Ipv4Addr::new(10, 9, 9, idx as u8)));
            }
            Ok(response)
        }
    }

    fn net(cidr: &str) -> IpNetwork {
        cidr.parse().expect("valid CIDR")
    }

    fn example_rule() -> Rule {
        Rule {
            zones: vec!["example.org".to_owned()],
            networks: vec![NetworkPolicy::new(
                net("10.0.0.0/24"),
                vec![net("192.168.1.0/24")],
            )],
            fallback: None,
        }
    }

    fn a_record(name: &str, address: Ipv4Addr) -> ResourceRecord<'static> {
        ResourceRecord::new(name.to_owned(), ResourceData::A { address }, Some(60), None)
    }

    fn cname_record(name: &str, target: &str) -> ResourceRecord<'static> {
        ResourceRecord::new(
            name.to_owned(),
            ResourceData::CNAME {
                cname: target.to_owned().into(),
            },
            Some(60),
            None,
        )
    }

    fn state_from(source: &str) -> RequestState {
        let query = DnsPacket::new_query(
            1,
            Question::new("www.example.org", QueryType::A, None),
        );
        RequestState::new(query, source.parse().unwrap())
    }

    fn filtered(outcome: FilterOutcome<'_>) -> Vec<ResourceRecord<'static>> {
        match outcome {
            FilterOutcome::Filtered { answers, .. } => answers,
            FilterOutcome::Unfiltered(qtype) => panic!("unexpectedly unfiltered: {}", qtype),
        }
    }

    #[test]
    fn verdicts() {
        let rule = example_rule();
        let allowed_source = "192.168.1.10".parse().unwrap();
        let other_source = "192.168.2.1".parse().unwrap();
        let governed = "10.0.0.5".parse().unwrap();
        let outside = "172.16.0.1".parse().unwrap();

        assert_eq!(check_address(&rule, allowed_source, governed), Verdict::Allowed);
        assert_eq!(check_address(&rule, other_source, governed), Verdict::Denied);
        assert_eq!(check_address(&rule, other_source, outside), Verdict::Unmatched);
    }

    #[tokio::test]
    async fn allowed_subset_replaces_unmatched() {
        let rule = example_rule();
        let answers = vec![
            a_record("www.example.org", Ipv4Addr::new(172, 16, 0, 1)),
            a_record("www.example.org", Ipv4Addr::new(10, 0, 0, 5)),
        ];

        let result = filtered(
            filter_answers(&rule, &state_from("192.168.1.10"), &answers, &FakeLookup::default()).await,
        );
        assert_eq!(result, vec![answers[1].clone()]);

        let result = filtered(
            filter_answers(&rule, &state_from("192.168.2.1"), &answers, &FakeLookup::default()).await,
        );
        assert_eq!(result, vec![answers[0].clone()]);
    }

    #[tokio::test]
    async fn denied_only_is_empty() {
        let rule = example_rule();
        let answers = vec![a_record("www.example.org", Ipv4Addr::new(10, 0, 0, 5))];
        let result = filtered(
            filter_answers(&rule, &state_from("192.168.2.1"), &answers, &FakeLookup::default()).await,
        );
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn indirection_records_follow_their_target() {
        let rule = example_rule();
        let lookup = FakeLookup::default()
            .with("visible.example.org", 1)
            .with("hidden.example.org", 0);
        let answers = vec![
            cname_record("a.example.org", "visible.example.org"),
            cname_record("b.example.org", "hidden.example.org"),
            cname_record("c.example.org", "broken.example.org"),
            ResourceRecord::new(
                "_sip._tcp.example.org",
                ResourceData::SRV {
                    priority: 10,
                    weight: 5,
                    port: 5060,
                    target: "visible.example.org".into(),
                },
                Some(60),
                None,
            ),
            ResourceRecord::new(
                "5.0.0.10.in-addr.arpa",
                ResourceData::PTR {
                    ptr_domain_name: "hidden.example.org".into(),
                },
                Some(60),
                None,
            ),
        ];

        let result = filtered(
            filter_answers(&rule, &state_from("192.168.2.1"), &answers, &lookup).await,
        );
        assert_eq!(result, vec![answers[0].clone(), answers[3].clone()]);

        let queried = lookup.queried.lock().unwrap();
        assert_eq!(queried.len(), 5);
        assert!(queried.iter().all(|(_, suppressed)| *suppressed));
    }

    #[tokio::test]
    async fn rule_applies_only_after_an_a_record() {
        let rule = example_rule();
        let lookup = FakeLookup::default().with("hidden.example.org", 0);

        let outcome = filter_answers(
            &rule,
            &state_from("192.168.2.1"),
            &[cname_record("a.example.org", "hidden.example.org")],
            &lookup,
        )
        .await;
        assert!(matches!(
            outcome,
            FilterOutcome::Filtered { ref answers, applied_rule: None } if answers.is_empty()
        ));

        let outcome = filter_answers(&rule, &state_from("192.168.2.1"), &[], &lookup).await;
        assert!(matches!(outcome, FilterOutcome::Filtered { applied_rule: None, .. }));

        let answers = vec![a_record("www.example.org", Ipv4Addr::new(10, 0, 0, 5))];
        let outcome = filter_answers(&rule, &state_from("192.168.2.1"), &answers, &lookup).await;
        assert!(matches!(
            outcome,
            FilterOutcome::Filtered { ref answers, applied_rule: Some(_) } if answers.is_empty()
        ));
    }

    #[tokio::test]
    async fn unsupported_type_skips_filtering() {
        let rule = example_rule();
        let lookup = FakeLookup::default().with("visible.example.org", 1);
        let answers = vec![
            cname_record("a.example.org", "visible.example.org"),
            ResourceRecord::new(
                "www.example.org",
                ResourceData::AAAA {
                    address: "fd00::1".parse().unwrap(),
                },
                Some(60),
                None,
            ),
        ];

        let outcome = filter_answers(&rule, &state_from("192.168.2.1"), &answers, &lookup).await;
        assert!(matches!(outcome, FilterOutcome::Unfiltered(QueryType::AAAA)));
        // Nothing is resolved when the answer is going to be passed through anyway
        assert!(lookup.queried.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn self_allow_makes_networks_mutually_visible() {
        let rule = Rule {
            networks: vec![
                NetworkPolicy::new(net("10.0.0.0/24"), vec![net("10.0.0.0/24"), net("10.0.1.0/24")]),
                NetworkPolicy::new(net("10.0.1.0/24"), vec![net("10.0.0.0/24"), net("10.0.1.0/24")]),
            ],
            ..example_rule()
        };
        let answers = vec![a_record("www.example.org", Ipv4Addr::new(10, 0, 0, 5))];
        let result = filtered(
            filter_answers(&rule, &state_from("10.0.1.7"), &answers, &FakeLookup::default()).await,
        );
        assert_eq!(result, answers);
    }

    proptest! {
        #[test]
        fn unmatched_a_records_stay_visible(octets in any::<[u8; 4]>(), source in any::<[u8; 4]>()) {
            let address = Ipv4Addr::from(octets);
            prop_assume!(!net("10.0.0.0/24").contains(IpAddr::V4(address)));

            let rule = example_rule();
            let answers = vec![a_record("www.example.org", address)];
            let state = RequestState::new(
                DnsPacket::new_query(1, Question::new("www.example.org", QueryType::A, None)),
                IpAddr::V4(Ipv4Addr::from(source)),
            );
            let result = filtered(block_on(filter_answers(&rule, &state, &answers, &FakeLookup::default())));
            prop_assert_eq!(result, answers);
        }

        #[test]
        fn matched_a_records_visible_iff_allowed(host in any::<u8>(), source in any::<[u8; 4]>()) {
            let address = Ipv4Addr::new(10, 0, 0, host);
            let source = Ipv4Addr::from(source);
            let allowed = net("192.168.1.0/24").contains(IpAddr::V4(source));

            let rule = example_rule();
            let answers = vec![a_record("www.example.org", address)];
            let state = RequestState::new(
                DnsPacket::new_query(1, Question::new("www.example.org", QueryType::A, None)),
                IpAddr::V4(source),
            );
            let result = filtered(block_on(filter_answers(&rule, &state, &answers, &FakeLookup::default())));
            prop_assert_eq!(!result.is_empty(), allowed);
        }
    }
}
