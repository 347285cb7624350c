//! Resource records with their rdata kept in two forms: the raw wire
//! bytes as parsed and the canonical presentation text. Types whose rdata
//! embeds domain names are re-encoded from the text on pack so that
//! compression pointers from the source buffer never leak into a new
//! message.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use super::enums::{RecordType, CLASS_IN};
use super::{wire, ProtoError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    pub rtype: RecordType,
    pub class: u16,
    pub ttl: u32,
    /// Presentation text of the rdata, e.g. `93.184.216.34` or
    /// `10 mail.example.com.`.
    pub data: String,
    /// Raw rdata bytes as seen on the wire; empty for records built
    /// programmatically.
    pub rdata: Vec<u8>,
}

impl Record {
    /// Build a record from presentation data, class IN.
    pub fn new(name: &str, rtype: RecordType, ttl: u32, data: &str) -> Self {
        Record {
            name: wire::fqdn(name),
            rtype,
            class: CLASS_IN,
            ttl,
            data: data.to_string(),
            rdata: Vec::new(),
        }
    }

    pub(super) fn pack(&self, out: &mut Vec<u8>) -> Result<(), ProtoError> {
        wire::write_name(out, &self.name)?;
        out.extend_from_slice(&u16::from(self.rtype).to_be_bytes());
        out.extend_from_slice(&self.class.to_be_bytes());
        out.extend_from_slice(&self.ttl.to_be_bytes());
        let rdata = self.encode_rdata()?;
        if rdata.len() > u16::MAX as usize {
            return Err(ProtoError::InvalidRecord);
        }
        out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        out.extend_from_slice(&rdata);
        Ok(())
    }

    fn encode_rdata(&self) -> Result<Vec<u8>, ProtoError> {
        if let Some(encoded) = self.rdata_from_text() {
            return Ok(encoded);
        }
        if !self.rdata.is_empty() {
            return Ok(self.rdata.clone());
        }
        if self.data.is_empty() {
            return Ok(Vec::new());
        }
        Err(ProtoError::InvalidRecord)
    }

    fn rdata_from_text(&self) -> Option<Vec<u8>> {
        let text = self.data.as_str();
        match self.rtype {
            RecordType::A => {
                let addr: Ipv4Addr = text.parse().ok()?;
                Some(addr.octets().to_vec())
            }
            RecordType::AAAA => {
                let addr: Ipv6Addr = text.parse().ok()?;
                Some(addr.octets().to_vec())
            }
            RecordType::NS | RecordType::CNAME | RecordType::PTR | RecordType::DNAME => {
                let mut out = Vec::new();
                wire::write_name(&mut out, &wire::fqdn(text)).ok()?;
                Some(out)
            }
            RecordType::MX => {
                let (pref, host) = text.split_once(' ')?;
                let mut out = pref.parse::<u16>().ok()?.to_be_bytes().to_vec();
                wire::write_name(&mut out, &wire::fqdn(host)).ok()?;
                Some(out)
            }
            RecordType::SOA => {
                let fields: Vec<&str> = text.split_whitespace().collect();
                if fields.len() != 7 {
                    return None;
                }
                let mut out = Vec::new();
                wire::write_name(&mut out, &wire::fqdn(fields[0])).ok()?;
                wire::write_name(&mut out, &wire::fqdn(fields[1])).ok()?;
                for field in &fields[2..] {
                    out.extend_from_slice(&field.parse::<u32>().ok()?.to_be_bytes());
                }
                Some(out)
            }
            RecordType::SRV => {
                let fields: Vec<&str> = text.split_whitespace().collect();
                if fields.len() != 4 {
                    return None;
                }
                let mut out = Vec::new();
                for field in &fields[..3] {
                    out.extend_from_slice(&field.parse::<u16>().ok()?.to_be_bytes());
                }
                wire::write_name(&mut out, &wire::fqdn(fields[3])).ok()?;
                Some(out)
            }
            RecordType::TXT => {
                let mut out = Vec::new();
                for chunk in split_char_strings(text) {
                    if chunk.len() > 255 {
                        return None;
                    }
                    out.push(chunk.len() as u8);
                    out.extend_from_slice(chunk.as_bytes());
                }
                Some(out)
            }
            _ => {
                // RFC 3597 generic form, used when no raw bytes are around.
                let rest = text.strip_prefix("\\# ")?;
                let (_len, hex) = rest.split_once(' ')?;
                decode_hex(hex)
            }
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\tIN\t{}\t{}",
            self.name, self.ttl, self.rtype, self.data
        )
    }
}

/// Decode the rdata at `rdata_start..rdata_start+rdlen` into presentation
/// text. The whole packet buffer is required because several rdata layouts
/// may contain compressed names.
pub(super) fn present_rdata(
    data: &[u8],
    rdata_start: usize,
    rdlen: usize,
    rtype: RecordType,
) -> Result<String, ProtoError> {
    let rdata_end = rdata_start + rdlen;
    if rdata_end > data.len() {
        return Err(ProtoError::UnexpectedEof);
    }
    let rdata = &data[rdata_start..rdata_end];

    let text = match rtype {
        RecordType::A => {
            if rdlen != 4 {
                return Err(ProtoError::InvalidRecord);
            }
            Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]).to_string()
        }
        RecordType::AAAA => {
            if rdlen != 16 {
                return Err(ProtoError::InvalidRecord);
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(rdata);
            Ipv6Addr::from(octets).to_string()
        }
        RecordType::NS | RecordType::CNAME | RecordType::PTR | RecordType::DNAME => {
            wire::read_name(data, rdata_start)?.0
        }
        RecordType::MX => {
            if rdlen < 3 {
                return Err(ProtoError::InvalidRecord);
            }
            let pref = u16::from_be_bytes([rdata[0], rdata[1]]);
            let (host, _) = wire::read_name(data, rdata_start + 2)?;
            format!("{} {}", pref, host)
        }
        RecordType::SOA => {
            let (mname, off) = wire::read_name(data, rdata_start)?;
            let (rname, off) = wire::read_name(data, off)?;
            if off + 20 > data.len() {
                return Err(ProtoError::UnexpectedEof);
            }
            let mut nums = [0u32; 5];
            for (i, num) in nums.iter_mut().enumerate() {
                let at = off + i * 4;
                *num = u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
            }
            format!(
                "{} {} {} {} {} {} {}",
                mname, rname, nums[0], nums[1], nums[2], nums[3], nums[4]
            )
        }
        RecordType::SRV => {
            if rdlen < 7 {
                return Err(ProtoError::InvalidRecord);
            }
            let priority = u16::from_be_bytes([rdata[0], rdata[1]]);
            let weight = u16::from_be_bytes([rdata[2], rdata[3]]);
            let port = u16::from_be_bytes([rdata[4], rdata[5]]);
            let (target, _) = wire::read_name(data, rdata_start + 6)?;
            format!("{} {} {} {}", priority, weight, port, target)
        }
        RecordType::TXT | RecordType::HINFO => {
            let mut chunks = Vec::new();
            let mut pos = 0;
            while pos < rdata.len() {
                let len = rdata[pos] as usize;
                pos += 1;
                if pos + len > rdata.len() {
                    return Err(ProtoError::InvalidRecord);
                }
                let chunk = String::from_utf8_lossy(&rdata[pos..pos + len]);
                chunks.push(format!("\"{}\"", chunk));
                pos += len;
            }
            chunks.join(" ")
        }
        RecordType::CAA => {
            if rdlen < 2 {
                return Err(ProtoError::InvalidRecord);
            }
            let flags = rdata[0];
            let tag_len = rdata[1] as usize;
            if 2 + tag_len > rdata.len() {
                return Err(ProtoError::InvalidRecord);
            }
            let tag = String::from_utf8_lossy(&rdata[2..2 + tag_len]);
            let value = String::from_utf8_lossy(&rdata[2 + tag_len..]);
            format!("{} {} \"{}\"", flags, tag, value)
        }
        _ => {
            // RFC 3597 generic presentation for anything else.
            format!("\\# {} {}", rdlen, encode_hex(rdata))
        }
    };

    Ok(text)
}

fn split_char_strings(text: &str) -> Vec<String> {
    if !text.contains('"') {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in text.chars() {
        if c == '"' {
            if in_quotes {
                chunks.push(std::mem::take(&mut current));
            }
            in_quotes = !in_quotes;
        } else if in_quotes {
            current.push(c);
        }
    }
    chunks
}

fn encode_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}
