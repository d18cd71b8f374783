use std::{
    borrow::Cow,
    net::{Ipv4Addr, Ipv6Addr},
};

use prop::strategy::Union;
use proptest::collection::vec;
use proptest::prelude::*;

use crate::{QueryType, Question, ResourceData, ResourceRecord};

pub fn arb_query_type() -> impl Strategy<Value = QueryType> {
    prop_oneof![
        Just(QueryType::A),
        Just(QueryType::NS),
        Just(QueryType::CNAME),
        Just(QueryType::PTR),
        Just(QueryType::AAAA),
        Just(QueryType::SRV),
        Just(QueryType::ANY),
        // Unassigned range, so it never collides with the known types
        (65280..65535u16).prop_map(QueryType::UNKNOWN),
    ]
}

prop_compose! {
    pub fn arb_question()(qname in arb_qname(), query_type in arb_query_type(), qclass: u16) -> Question<'static> {
        Question { qname, query_type, qclass }
    }
}

prop_compose! {
    pub fn arb_resource_record()(name in arb_qname(), resource_data in arb_resource_data(), class: u16, ttl: u32) -> ResourceRecord<'static> {
        ResourceRecord { name, class, ttl, resource_data }
    }
}

pub fn arb_resource_data() -> impl Strategy<Value = ResourceData<'static>> {
    let variants = vec![
        vec(any::<u8>(), 1..100)
            .prop_map(|rdata| ResourceData::UNKNOWN {
                qtype: 65535,
                rdata: Cow::Owned(rdata),
            })
            .boxed(),
        any::<Ipv4Addr>()
            .prop_map(|address| ResourceData::A { address })
            .boxed(),
        arb_qname()
            .prop_map(|ns_domain_name| ResourceData::NS { ns_domain_name })
            .boxed(),
        arb_qname()
            .prop_map(|cname| ResourceData::CNAME { cname })
            .boxed(),
        arb_qname()
            .prop_map(|ptr_domain_name| ResourceData::PTR { ptr_domain_name })
            .boxed(),
        any::<Ipv6Addr>()
            .prop_map(|address| ResourceData::AAAA { address })
            .boxed(),
        (any::<u16>(), any::<u16>(), any::<u16>(), arb_qname())
            .prop_map(|(priority, weight, port, target)| ResourceData::SRV {
                priority,
                weight,
                port,
                target,
            })
            .boxed(),
        vec((any::<u16>(), vec(any::<u8>(), 0..50)), 0..5)
            .prop_map(|options| ResourceData::OPT {
                options: options
                    .into_iter()
                    .map(|(code, data)| (code, Cow::Owned(data)))
                    .collect(),
            })
            .boxed(),
    ];

    Union::new(variants)
}

pub fn arb_qname() -> impl Strategy<Value = Cow<'static, str>> {
    proptest::string::string_regex(r"(([a-z0-9][a-z0-9-]{1,20}\.){1,4}[a-z]{2,10})|")
        .expect("regex should be valid")
        .prop_map(Cow::Owned)
}
