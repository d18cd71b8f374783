use std::collections::HashMap;

use anyhow::Context;

use crate::{ByteBuf, EncodeToBuf, FromBuf};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum QueryOpcode {
    /// Standard query
    #[default]
    QUERY,
    /// Inverse query
    IQUERY,
    /// Status request
    STATUS,
    /// 3-15 opcodes
    UNKNOWN,
}

impl From<u8> for QueryOpcode {
    fn from(value: u8) -> Self {
        match value {
            0 => QueryOpcode::QUERY,
            1 => QueryOpcode::IQUERY,
            2 => QueryOpcode::STATUS,
            _ => QueryOpcode::UNKNOWN,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum ResponseCode {
    #[default]
    Success,
    FormatError,
    ServerFailure,
    NameError,
    NotImplemented,
    Refused,
    // 6-15 codes
    Unknown,
}

impl From<u8> for ResponseCode {
    fn from(value: u8) -> Self {
        match value {
            0 => ResponseCode::Success,
            1 => ResponseCode::FormatError,
            2 => ResponseCode::ServerFailure,
            3 => ResponseCode::NameError,
            4 => ResponseCode::NotImplemented,
            5 => ResponseCode::Refused,
            _ => ResponseCode::Unknown,
        }
    }
}

/// DNS header. RR counts are filled in while parsing; when encoding a [`crate::DnsPacket`]
/// they are recomputed from its sections.
#[derive(Debug, PartialEq, Eq, Default, Clone)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct DnsHeader {
    /// A query and its response **must have the same ID**.
    pub id: u16,
    pub is_response: bool,
    pub opcode: QueryOpcode,
    pub is_authoritative: bool,
    /// Set when the message didn't fit into the transport
    pub truncation: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    /// Z, AD and CD bits
    pub z: [bool; 3],
    pub response_code: ResponseCode,
    pub question_count: u16,
    pub answer_rr_count: u16,
    pub authority_rr_count: u16,
    pub additional_rr_count: u16,
}

impl DnsHeader {
    pub fn new() -> Self {
        DnsHeader::default()
    }

    pub fn get_flags(&self) -> u16 {
        let first_byte = (self.is_response as u8) << 7
            | (self.opcode as u8) << 3
            | (self.is_authoritative as u8) << 2
            | (self.truncation as u8) << 1
            | self.recursion_desired as u8;
        let second_byte = (self.recursion_available as u8) << 7
            | (self.z[0] as u8) << 6
            | (self.z[1] as u8) << 5
            | (self.z[2] as u8) << 4
            | self.response_code as u8;
        (first_byte as u16) << 8 | (second_byte as u16)
    }

    fn set_flags(&mut self, flags: u16) {
        let bit = |shift: u16| (flags >> shift) & 1 == 1;
        self.is_response = bit(15);
        self.opcode = (((flags >> 11) & 0xF) as u8).into();
        self.is_authoritative = bit(10);
        self.truncation = bit(9);
        self.recursion_desired = bit(8);
        self.recursion_available = bit(7);
        self.z = [bit(6), bit(5), bit(4)];
        self.response_code = ((flags & 0xF) as u8).into();
    }
}

impl FromBuf for DnsHeader {
    fn from_buf(buf: &mut ByteBuf) -> anyhow::Result<Self> {
        let mut header = DnsHeader {
            id: buf.read_u16().context("id is missing")?,
            ..Default::default()
        };
        header.set_flags(buf.read_u16().context("flags are missing")?);
        header.question_count = buf.read_u16().context("question count is missing")?;
        header.answer_rr_count = buf.read_u16().context("answer RR count is missing")?;
        header.authority_rr_count = buf.read_u16().context("authority RR count is missing")?;
        header.additional_rr_count = buf.read_u16().context("additional RR count is missing")?;

        Ok(header)
    }
}

impl EncodeToBuf for DnsHeader {
    fn encode_to_buf_with_cache<'cache, 'r: 'cache>(
        &'r self,
        buf: &mut ByteBuf,
        _label_cache: Option<&mut HashMap<&'cache str, usize>>,
    ) -> anyhow::Result<()> {
        buf.write_u16(self.id);
        buf.write_u16(self.get_flags());
        buf.write_u16(self.question_count);
        buf.write_u16(self.answer_rr_count);
        buf.write_u16(self.authority_rr_count);
        buf.write_u16(self.additional_rr_count);

        Ok(())
    }
}
