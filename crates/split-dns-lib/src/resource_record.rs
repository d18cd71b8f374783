use std::{
    borrow::Cow,
    collections::HashMap,
    net::{Ipv4Addr, Ipv6Addr},
    num::NonZero,
};

use anyhow::Context;

use crate::{ByteBuf, EncodeToBuf, FromBuf, QueryType, IN_CLASS};

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ResourceRecord<'a> {
    pub name: Cow<'a, str>,
    pub class: u16,
    pub ttl: u32,
    pub resource_data: ResourceData<'a>,
}

impl<'a> ResourceRecord<'a> {
    pub fn new(
        name: impl Into<Cow<'a, str>>,
        resource_data: ResourceData<'a>,
        ttl: Option<u32>,
        class: Option<u16>,
    ) -> Self {
        ResourceRecord {
            name: name.into(),
            ttl: ttl.unwrap_or_default(),
            class: class.unwrap_or(IN_CLASS),
            resource_data,
        }
    }

    pub fn get_edns_data(&self) -> Option<EdnsData> {
        match self.resource_data.get_query_type() {
            QueryType::OPT => {
                let ttl_bytes = self.ttl.to_be_bytes();
                Some(EdnsData {
                    udp_payload_size: self.class as usize,
                    extended_rcode: NonZero::new(ttl_bytes[0]),
                    version: ttl_bytes[1],
                    dnssec_ok_bit: ttl_bytes[2] & 0x80 == 0x80,
                })
            }
            _ => None,
        }
    }
}

impl FromBuf for ResourceRecord<'static> {
    fn from_buf(buf: &mut ByteBuf) -> anyhow::Result<Self> {
        let name = buf.read_qname().context("NAME is missing")?;
        let query_type: QueryType = buf.read_u16().context("TYPE is missing")?.into();
        let class = buf.read_u16().context("CLASS is missing")?;
        let ttl = buf.read_u32().context("TTL is missing")?;
        let resource_data =
            ResourceData::from_buf_with_type(buf, query_type).context("can't decode RDATA")?;
        Ok(ResourceRecord {
            name,
            class,
            ttl,
            resource_data,
        })
    }
}

impl EncodeToBuf for ResourceRecord<'_> {
    fn encode_to_buf_with_cache<'cache, 'r: 'cache>(
        &'r self,
        buf: &mut ByteBuf,
        mut label_cache: Option<&mut HashMap<&'cache str, usize>>,
    ) -> anyhow::Result<()> {
        buf.write_qname(&self.name, label_cache.as_deref_mut())
            .context("writing NAME")?;
        buf.write_u16(self.resource_data.get_query_type().into());
        buf.write_u16(self.class);
        buf.write_u32(self.ttl);

        self.resource_data
            .encode_to_buf_with_cache(buf, label_cache)
            .context("writing RDATA")
    }
}

#[derive(Debug)]
pub struct EdnsData {
    pub udp_payload_size: usize,
    pub extended_rcode: Option<NonZero<u8>>,
    /// Is set to `true` by DNSSEC-aware clients
    pub dnssec_ok_bit: bool,
    pub version: u8,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ResourceData<'a> {
    UNKNOWN {
        qtype: u16,
        rdata: Cow<'a, [u8]>,
    },
    A {
        address: Ipv4Addr,
    },
    NS {
        ns_domain_name: Cow<'a, str>,
    },
    CNAME {
        cname: Cow<'a, str>,
    },
    PTR {
        ptr_domain_name: Cow<'a, str>,
    },
    AAAA {
        address: Ipv6Addr,
    },
    SRV {
        priority: u16,
        weight: u16,
        port: u16,
        target: Cow<'a, str>,
    },
    OPT {
        options: Vec<(u16, Cow<'a, [u8]>)>,
    },
}

impl ResourceData<'_> {
    pub fn from_buf_with_type(
        buf: &mut ByteBuf,
        query_type: QueryType,
    ) -> anyhow::Result<ResourceData<'static>> {
        let rd_length = buf.read_u16().context("RDLENGTH is missing")? as usize;
        let rdata_start = buf.pos();

        let resource_data = match query_type {
            QueryType::UNKNOWN(qtype) => {
                let rdata = buf
                    .read_bytes(rd_length)
                    .context("UNKNOWN record: RDATA is missing")?;
                ResourceData::UNKNOWN {
                    qtype,
                    rdata: rdata.to_vec().into(),
                }
            }
            QueryType::A => {
                if rd_length != 4 {
                    anyhow::bail!("A record: unexpected RDLENGTH {}", rd_length);
                }
                let address = buf.read_u32().context("A record: ADDRESS is missing")?;
                ResourceData::A {
                    address: Ipv4Addr::from(address),
                }
            }
            QueryType::NS => ResourceData::NS {
                ns_domain_name: buf.read_qname().context("NS record: NSDNAME is missing")?,
            },
            QueryType::CNAME => ResourceData::CNAME {
                cname: buf.read_qname().context("CNAME record: CNAME is missing")?,
            },
            QueryType::PTR => ResourceData::PTR {
                ptr_domain_name: buf.read_qname().context("PTR record: PTRDNAME is missing")?,
            },
            QueryType::AAAA => {
                if rd_length != 16 {
                    anyhow::bail!("AAAA record: unexpected RDLENGTH {}", rd_length);
                }
                let raw = buf
                    .read_bytes(16)
                    .context("AAAA record: ADDRESS is missing")?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(raw);
                ResourceData::AAAA {
                    address: Ipv6Addr::from(octets),
                }
            }
            QueryType::SRV => ResourceData::SRV {
                priority: buf.read_u16().context("SRV record: PRIORITY is missing")?,
                weight: buf.read_u16().context("SRV record: WEIGHT is missing")?,
                port: buf.read_u16().context("SRV record: PORT is missing")?,
                target: buf.read_qname().context("SRV record: TARGET is missing")?,
            },
            QueryType::OPT => {
                let mut options = Vec::new();
                while buf.pos() < rdata_start + rd_length {
                    let code = buf
                        .read_u16()
                        .context("OPT record: option code is missing")?;
                    let length = buf.read_u16().with_context(|| {
                        format!("OPT record: option length is missing for option {}", code)
                    })?;
                    let data = buf.read_bytes(length as usize).with_context(|| {
                        format!(
                            "OPT record: option data of length {} is missing for option {}",
                            length, code
                        )
                    })?;
                    options.push((code, Cow::Owned(data.to_vec())));
                }
                ResourceData::OPT { options }
            }
            QueryType::ANY => anyhow::bail!("ANY record doesn't exist"),
        };

        if buf.pos() != rdata_start + rd_length {
            anyhow::bail!(
                "{} record: RDLENGTH {} doesn't match the decoded length {}",
                query_type,
                rd_length,
                buf.pos() - rdata_start
            );
        }

        Ok(resource_data)
    }

    pub fn get_query_type(&self) -> QueryType {
        match self {
            ResourceData::UNKNOWN { qtype, .. } => QueryType::UNKNOWN(*qtype),
            ResourceData::A { .. } => QueryType::A,
            ResourceData::NS { .. } => QueryType::NS,
            ResourceData::CNAME { .. } => QueryType::CNAME,
            ResourceData::PTR { .. } => QueryType::PTR,
            ResourceData::AAAA { .. } => QueryType::AAAA,
            ResourceData::SRV { .. } => QueryType::SRV,
            ResourceData::OPT { .. } => QueryType::OPT,
        }
    }

    /// Domain name this record points to, for records that alias or locate another name
    pub fn target(&self) -> Option<&str> {
        match self {
            ResourceData::CNAME { cname } => Some(cname.as_ref()),
            ResourceData::PTR { ptr_domain_name } => Some(ptr_domain_name.as_ref()),
            ResourceData::SRV { target, .. } => Some(target.as_ref()),
            _ => None,
        }
    }
}

impl EncodeToBuf for ResourceData<'_> {
    fn encode_to_buf_with_cache<'cache, 'r: 'cache>(
        &'r self,
        buf: &mut ByteBuf,
        label_cache: Option<&mut HashMap<&'cache str, usize>>,
    ) -> anyhow::Result<()> {
        // RDLENGTH isn't known for names in advance, so write a stub value and replace it later
        let rd_length_pos = buf.len();
        buf.write_u16(0);

        match self {
            ResourceData::UNKNOWN { rdata, .. } => buf.write_bytes(rdata),
            ResourceData::A { address } => buf.write_bytes(&address.octets()),
            ResourceData::NS { ns_domain_name } => {
                buf.write_qname(ns_domain_name, label_cache)
                    .context("NS record: writing NSDNAME")?;
            }
            ResourceData::CNAME { cname } => {
                buf.write_qname(cname, label_cache)
                    .context("CNAME record: writing CNAME")?;
            }
            ResourceData::PTR { ptr_domain_name } => {
                buf.write_qname(ptr_domain_name, label_cache)
                    .context("PTR record: writing PTRDNAME")?;
            }
            ResourceData::AAAA { address } => buf.write_bytes(&address.octets()),
            ResourceData::SRV {
                priority,
                weight,
                port,
                target,
            } => {
                buf.write_u16(*priority);
                buf.write_u16(*weight);
                buf.write_u16(*port);
                // RFC2782: no compression for the target
                buf.write_qname(target, None)
                    .context("SRV record: writing TARGET")?;
            }
            ResourceData::OPT { options } => {
                for (code, data) in options {
                    buf.write_u16(*code);
                    buf.write_u16(data.len() as u16);
                    buf.write_bytes(data);
                }
            }
        };

        let rd_length = buf.len() - rd_length_pos - 2;
        let rd_length = u16::try_from(rd_length)
            .with_context(|| format!("RDATA is too long: {} bytes", rd_length))?;
        buf.set_u16(rd_length_pos, rd_length)
            .context("writing RDLENGTH")
    }
}
