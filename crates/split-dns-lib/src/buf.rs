use core::str;
use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use anyhow::Context;

/// Max number of compression pointers followed while reading a single name
const MAX_QNAME_JUMPS: usize = 64;

pub trait FromBuf: Sized {
    fn from_buf(buf: &mut ByteBuf) -> anyhow::Result<Self>;
}

pub trait EncodeToBuf {
    fn encode_to_buf_with_cache<'cache, 'r: 'cache>(
        &'r self,
        buf: &mut ByteBuf,
        label_cache: Option<&mut HashMap<&'cache str, usize>>,
    ) -> anyhow::Result<()>;

    fn encode_to_buf(&self, buf: &mut ByteBuf) -> anyhow::Result<()> {
        self.encode_to_buf_with_cache(buf, None)
    }
}

/// A byte buffer with a read cursor. Writes always append to the end.
pub struct ByteBuf<'a> {
    buf: Cow<'a, [u8]>,
    pos: usize,
}

impl Deref for ByteBuf<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.buf.as_ref()
    }
}

impl DerefMut for ByteBuf<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf.to_mut()
    }
}

impl AsRef<[u8]> for ByteBuf<'_> {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl<'a> ByteBuf<'a> {
    pub fn new(src: &'a impl AsRef<[u8]>) -> ByteBuf<'a> {
        ByteBuf {
            buf: Cow::Borrowed(src.as_ref()),
            pos: 0,
        }
    }

    pub fn new_from_vec(src: Vec<u8>) -> ByteBuf<'static> {
        ByteBuf {
            buf: Cow::Owned(src),
            pos: 0,
        }
    }

    pub fn new_empty(capacity: Option<usize>) -> ByteBuf<'static> {
        ByteBuf {
            buf: Cow::Owned(Vec::with_capacity(capacity.unwrap_or(512))),
            pos: 0,
        }
    }

    pub fn into_inner(self) -> Cow<'a, [u8]> {
        self.buf
    }

    pub fn clear(&mut self) {
        self.buf.to_mut().clear();
        self.pos = 0;
    }

    pub fn truncate(&mut self, len: usize) {
        self.buf.to_mut().truncate(len);
        self.pos = self.pos.min(len);
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn reset_pos(&mut self) {
        self.pos = 0;
    }

    pub fn resize(&mut self, new_len: usize) {
        self.buf.to_mut().resize(new_len, 0);
    }

    pub fn read_u8(&mut self) -> anyhow::Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn write_u8(&mut self, data: u8) {
        self.buf.to_mut().push(data);
    }

    pub fn read_u16(&mut self) -> anyhow::Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> anyhow::Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn write_u16(&mut self, data: u16) {
        self.write_bytes(&data.to_be_bytes());
    }

    pub fn write_u32(&mut self, data: u32) {
        self.write_bytes(&data.to_be_bytes());
    }

    /// Overwrites two bytes at `pos`, which must already be written
    pub fn set_u16(&mut self, pos: usize, data: u16) -> anyhow::Result<()> {
        self.ensure_length(2, Some(pos))?;
        self.buf.to_mut()[pos..pos + 2].copy_from_slice(&data.to_be_bytes());
        Ok(())
    }

    pub fn read_bytes(&mut self, n: usize) -> anyhow::Result<&[u8]> {
        self.ensure_length(n, None)?;
        let pos = self.pos;
        self.pos += n;
        Ok(&self.buf[pos..pos + n])
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.to_mut().extend_from_slice(data);
    }

    /// Reads a (possibly compressed) domain name at the current position.
    /// The returned name has no trailing dot; the root is an empty string.
    pub fn read_qname(&mut self) -> anyhow::Result<Cow<'static, str>> {
        let mut pos = self.pos;
        let mut jumps = 0;
        let mut labels: Vec<&str> = Vec::new();
        loop {
            self.ensure_length(1, Some(pos))
                .context("malformed packet: expected QNAME label length")?;
            let label_length = self.buf[pos];

            if label_length & 0xC0 == 0xC0 {
                self.ensure_length(2, Some(pos))
                    .context("malformed packet: expected second jump ptr byte in QNAME")?;
                // Clear two MSB bits of the first byte to get the offset
                let offset = (((label_length & 0x3F) as usize) << 8) | self.buf[pos + 1] as usize;
                if jumps == 0 {
                    // Continue parsing after the jump ptr once the name is read
                    self.pos = pos + 2;
                }
                jumps += 1;
                if jumps > MAX_QNAME_JUMPS {
                    anyhow::bail!("malformed packet: too many jump ptrs in QNAME");
                }
                pos = offset;
                continue;
            }

            pos += 1;
            if label_length == 0 {
                break;
            }

            let label = self
                .buf
                .get(pos..pos + label_length as usize)
                .with_context(|| {
                    format!(
                        "malformed packet: expected label of length {} at byte {}",
                        label_length, pos
                    )
                })?;
            let label = str::from_utf8(label).with_context(|| {
                format!("malformed packet: QNAME label at byte {} is not UTF-8", pos)
            })?;
            labels.push(label);
            pos += label_length as usize;
        }

        if jumps == 0 {
            self.pos = pos;
        }

        Ok(Cow::Owned(labels.join(".")))
    }

    /// Writes a domain name, pointing to an already written suffix if the cache has one.
    /// Returns the number of written bytes.
    pub fn write_qname<'cache, 'key: 'cache>(
        &mut self,
        qname: &'key str,
        mut label_cache: Option<&mut HashMap<&'cache str, usize>>,
    ) -> anyhow::Result<usize> {
        let start = self.buf.len();
        let mut remaining = qname.trim_end_matches('.');

        while !remaining.is_empty() {
            if let Some(offset) = label_cache
                .as_deref()
                .and_then(|cache| cache.get(remaining))
            {
                self.write_u16(0xC000 | *offset as u16);
                return Ok(self.buf.len() - start);
            }

            let (label, rest) = remaining.split_once('.').unwrap_or((remaining, ""));
            if label.is_empty() {
                anyhow::bail!("empty label in '{}'", qname);
            }
            if label.len() > 0x3F {
                anyhow::bail!("label is too long ({}): {}", label.len(), label);
            }

            // Only offsets that fit into 14 bits can be referenced later
            let label_pos = self.buf.len();
            if label_pos <= 0x3FFF {
                if let Some(cache) = label_cache.as_deref_mut() {
                    cache.insert(remaining, label_pos);
                }
            }

            self.write_u8(label.len() as u8);
            self.write_bytes(label.as_bytes());
            remaining = rest;
        }

        self.write_u8(0);
        Ok(self.buf.len() - start)
    }

    fn ensure_length(&self, n: usize, pos: Option<usize>) -> anyhow::Result<()> {
        if self.buf.len() < pos.unwrap_or(self.pos) + n {
            anyhow::bail!("underlying buffer is too small")
        }
        Ok(())
    }
}
