//! Wire-level DNS message model: header, question and record sections,
//! the OPT pseudo-record, and pack/unpack with compression-pointer
//! support on the read side.

pub mod edns;
pub mod enums;
pub mod header;
pub mod json;
pub mod record;
pub mod wire;

pub use edns::{ClientSubnet, EdnsOpt, DEFAULT_UDP_PAYLOAD, EDNS0_SUBNET};
pub use enums::{RecordType, CLASS_IN};
pub use header::{Header, HEADER_LEN};
pub use record::Record;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    #[error("invalid DNS header")]
    InvalidHeader,
    #[error("invalid domain name")]
    InvalidName,
    #[error("invalid resource record")]
    InvalidRecord,
    #[error("unexpected end of packet")]
    UnexpectedEof,
}

impl From<std::io::Error> for ProtoError {
    fn from(_: std::io::Error) -> Self {
        ProtoError::UnexpectedEof
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub qtype: RecordType,
    pub qclass: u16,
}

/// A parsed DNS message. The OPT pseudo-record is lifted out of the
/// additional section into `edns` on unpack and re-appended on pack, so
/// `additionals` only ever holds real records.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
    pub edns: Option<EdnsOpt>,
}

impl Message {
    /// Build a recursion-desired query for `name`/`qtype`, class IN.
    /// The message ID is left at 0 for the caller to assign.
    pub fn query(name: &str, qtype: RecordType) -> Self {
        let mut msg = Message::default();
        msg.header.rd = true;
        msg.questions.push(Question {
            name: wire::fqdn(name),
            qtype,
            qclass: CLASS_IN,
        });
        msg
    }

    pub fn question(&self) -> Option<&Question> {
        self.questions.first()
    }

    pub fn unpack(data: &[u8]) -> Result<Self, ProtoError> {
        let header = Header::unpack(data)?;
        let mut offset = HEADER_LEN;

        let mut questions = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            let (name, next) = wire::read_name(data, offset)?;
            if next + 4 > data.len() {
                return Err(ProtoError::UnexpectedEof);
            }
            let qtype = u16::from_be_bytes([data[next], data[next + 1]]);
            let qclass = u16::from_be_bytes([data[next + 2], data[next + 3]]);
            questions.push(Question {
                name,
                qtype: qtype.into(),
                qclass,
            });
            offset = next + 4;
        }

        let mut msg = Message {
            header,
            questions,
            ..Message::default()
        };

        for section in 0..3 {
            let count = match section {
                0 => msg.header.ancount,
                1 => msg.header.nscount,
                _ => msg.header.arcount,
            };
            for _ in 0..count {
                let (name, next) = wire::read_name(data, offset)?;
                if next + 10 > data.len() {
                    return Err(ProtoError::UnexpectedEof);
                }
                let rtype = RecordType::from(u16::from_be_bytes([data[next], data[next + 1]]));
                let class = u16::from_be_bytes([data[next + 2], data[next + 3]]);
                let ttl = u32::from_be_bytes([
                    data[next + 4],
                    data[next + 5],
                    data[next + 6],
                    data[next + 7],
                ]);
                let rdlen = u16::from_be_bytes([data[next + 8], data[next + 9]]) as usize;
                let rdata_start = next + 10;
                if rdata_start + rdlen > data.len() {
                    return Err(ProtoError::UnexpectedEof);
                }

                if rtype == RecordType::OPT {
                    // Only the first OPT counts; duplicates are dropped.
                    if msg.edns.is_none() {
                        msg.edns = Some(EdnsOpt::parse(
                            class,
                            ttl,
                            &data[rdata_start..rdata_start + rdlen],
                        )?);
                    }
                } else {
                    let text = record::present_rdata(data, rdata_start, rdlen, rtype)?;
                    let rec = Record {
                        name,
                        rtype,
                        class,
                        ttl,
                        data: text,
                        rdata: data[rdata_start..rdata_start + rdlen].to_vec(),
                    };
                    match section {
                        0 => msg.answers.push(rec),
                        1 => msg.authorities.push(rec),
                        _ => msg.additionals.push(rec),
                    }
                }
                offset = rdata_start + rdlen;
            }
        }

        Ok(msg)
    }

    pub fn pack(&self) -> Result<Vec<u8>, ProtoError> {
        let mut out = Vec::with_capacity(512);

        let mut header = self.header.clone();
        header.qdcount = self.questions.len() as u16;
        header.ancount = self.answers.len() as u16;
        header.nscount = self.authorities.len() as u16;
        header.arcount = self.additionals.len() as u16 + self.edns.is_some() as u16;
        header.pack(&mut out)?;

        for question in &self.questions {
            wire::write_name(&mut out, &question.name)?;
            out.extend_from_slice(&u16::from(question.qtype).to_be_bytes());
            out.extend_from_slice(&question.qclass.to_be_bytes());
        }
        for record in self
            .answers
            .iter()
            .chain(&self.authorities)
            .chain(&self.additionals)
        {
            record.pack(&mut out)?;
        }

        if let Some(edns) = &self.edns {
            let (class, ttl, rdata) = edns.to_record_fields();
            wire::write_name(&mut out, ".")?;
            out.extend_from_slice(&u16::from(RecordType::OPT).to_be_bytes());
            out.extend_from_slice(&class.to_be_bytes());
            out.extend_from_slice(&ttl.to_be_bytes());
            out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
            out.extend_from_slice(&rdata);
        }

        Ok(out)
    }
}
