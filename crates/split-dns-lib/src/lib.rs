#[cfg(test)]
pub(crate) mod test_utils;

mod buf;
mod dns_header;
mod question;
mod resource_record;
mod utils;

pub use buf::{ByteBuf, EncodeToBuf, FromBuf};
pub use dns_header::{DnsHeader, QueryOpcode, ResponseCode};
pub use question::{QueryType, Question};
pub use resource_record::{EdnsData, ResourceData, ResourceRecord};
pub use utils::{is_subdomain, normalize_name};

use anyhow::Context;
use std::collections::HashMap;

pub const IN_CLASS: u16 = 1;
/// RFC1035
pub const MAX_STANDARD_DNS_MSG_SIZE: usize = 512;

#[derive(Debug, PartialEq, Eq, Default, Clone)]
pub struct DnsPacket<'a> {
    pub header: DnsHeader,
    pub questions: Vec<Question<'a>>,
    pub answers: Vec<ResourceRecord<'a>>,
    pub authorities: Vec<ResourceRecord<'a>>,
    pub additionals: Vec<ResourceRecord<'a>>,
}

impl<'a> DnsPacket<'a> {
    pub fn new() -> Self {
        DnsPacket::default()
    }

    /// A recursive query with a single question
    pub fn new_query(id: u16, question: Question<'a>) -> Self {
        let mut packet = DnsPacket::new();
        packet.header.id = id;
        packet.header.recursion_desired = true;
        packet.questions.push(question);
        packet
    }

    /// An empty response that mirrors the ID, opcode, RD bit and questions of `query`
    pub fn new_response(query: &DnsPacket<'a>, response_code: ResponseCode) -> Self {
        let mut packet = DnsPacket::new();
        packet.header.id = query.header.id;
        packet.header.opcode = query.header.opcode;
        packet.header.recursion_desired = query.header.recursion_desired;
        packet.header.recursion_available = true;
        packet.header.is_response = true;
        packet.header.response_code = response_code;
        packet.questions = query.questions.clone();
        packet
    }

    pub fn question(&self) -> Option<&Question<'a>> {
        self.questions.first()
    }

    pub fn opt_record(&self) -> Option<&ResourceRecord<'a>> {
        self.additionals
            .iter()
            .find(|rr| rr.resource_data.get_query_type() == QueryType::OPT)
    }

    pub fn edns_data(&self) -> Option<EdnsData> {
        self.opt_record().and_then(ResourceRecord::get_edns_data)
    }

    /// Encodes the packet. If it doesn't fit into `max_size`, all RRs except OPT are dropped
    /// and the truncation bit is set, so that the client retries over TCP.
    pub fn encode(&self, max_size: Option<usize>) -> anyhow::Result<ByteBuf<'static>> {
        let mut buf = ByteBuf::new_empty(max_size);
        self.encode_to_buf(&mut buf)
            .context("error while encoding the DNS packet")?;

        match max_size {
            Some(max_size) if buf.len() > max_size => {
                let truncated = DnsPacket {
                    header: DnsHeader {
                        truncation: true,
                        ..self.header.clone()
                    },
                    questions: self.questions.clone(),
                    additionals: self.opt_record().cloned().into_iter().collect(),
                    ..Default::default()
                };
                buf.clear();
                truncated
                    .encode_to_buf(&mut buf)
                    .context("error while encoding the truncated DNS packet")?;
                Ok(buf)
            }
            _ => Ok(buf),
        }
    }
}

impl FromBuf for DnsPacket<'static> {
    fn from_buf(buf: &mut ByteBuf) -> anyhow::Result<Self> {
        let header = DnsHeader::from_buf(buf).context("header parsing error")?;

        let questions = (0..header.question_count)
            .map(|idx| {
                Question::from_buf(buf)
                    .with_context(|| format!("question parsing error at idx {}", idx))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut read_section = |count: u16, section: &str| {
            (0..count)
                .map(|idx| {
                    ResourceRecord::from_buf(buf)
                        .with_context(|| format!("{} RR parsing error at idx {}", section, idx))
                })
                .collect::<anyhow::Result<Vec<_>>>()
        };
        let answers = read_section(header.answer_rr_count, "answer")?;
        let authorities = read_section(header.authority_rr_count, "authority")?;
        let additionals = read_section(header.additional_rr_count, "additional")?;

        if additionals
            .iter()
            .filter(|rr| rr.resource_data.get_query_type() == QueryType::OPT)
            .count()
            > 1
        {
            anyhow::bail!("multiple OPT records");
        }

        Ok(DnsPacket {
            header,
            questions,
            answers,
            authorities,
            additionals,
        })
    }
}

impl EncodeToBuf for DnsPacket<'_> {
    fn encode_to_buf_with_cache<'cache, 'r: 'cache>(
        &'r self,
        buf: &mut ByteBuf,
        mut label_cache: Option<&mut HashMap<&'cache str, usize>>,
    ) -> anyhow::Result<()> {
        let count = |len: usize, section: &str| {
            u16::try_from(len).with_context(|| format!("too many entries in the {} section", section))
        };
        let header = DnsHeader {
            question_count: count(self.questions.len(), "question")?,
            answer_rr_count: count(self.answers.len(), "answer")?,
            authority_rr_count: count(self.authorities.len(), "authority")?,
            additional_rr_count: count(self.additionals.len(), "additional")?,
            ..self.header.clone()
        };
        header.encode_to_buf(buf).context("writing header")?;

        for (idx, question) in self.questions.iter().enumerate() {
            question
                .encode_to_buf_with_cache(buf, label_cache.as_deref_mut())
                .with_context(|| format!("writing question at idx {}", idx))?;
        }

        let sections = [
            (&self.answers, "answer"),
            (&self.authorities, "authority"),
            (&self.additionals, "additional"),
        ];
        for (records, section) in sections {
            for (idx, rr) in records.iter().enumerate() {
                rr.encode_to_buf_with_cache(buf, label_cache.as_deref_mut())
                    .with_context(|| format!("writing {} RR at idx {}", section, idx))?;
            }
        }

        Ok(())
    }

    fn encode_to_buf(&self, buf: &mut ByteBuf) -> anyhow::Result<()> {
        let mut label_cache = HashMap::new();
        self.encode_to_buf_with_cache(buf, Some(&mut label_cache))
    }
}
