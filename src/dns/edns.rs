//! EDNS0 OPT pseudo-record (RFC 6891) and the Client-Subnet option
//! (RFC 7871).

use std::net::IpAddr;

use super::ProtoError;

/// UDP payload size advertised when the gateway synthesizes an OPT record.
pub const DEFAULT_UDP_PAYLOAD: u16 = 4096;

/// Option code for EDNS Client-Subnet.
pub const EDNS0_SUBNET: u16 = 8;

const DO_FLAG: u16 = 0x8000;

/// A single EDNS option as carried in OPT rdata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdnsOption {
    pub code: u16,
    pub data: Vec<u8>,
}

/// The OPT pseudo-record, decoded out of its abused header fields:
/// CLASS carries the UDP payload size and TTL carries
/// `extended-rcode | version | flags`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdnsOpt {
    pub udp_payload_size: u16,
    pub extended_rcode: u8,
    pub version: u8,
    pub flags: u16,
    pub options: Vec<EdnsOption>,
}

impl Default for EdnsOpt {
    fn default() -> Self {
        Self {
            udp_payload_size: DEFAULT_UDP_PAYLOAD,
            extended_rcode: 0,
            version: 0,
            flags: 0,
            options: Vec::new(),
        }
    }
}

impl EdnsOpt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn do_flag(&self) -> bool {
        (self.flags & DO_FLAG) != 0
    }

    pub fn set_do_flag(&mut self, value: bool) {
        if value {
            self.flags |= DO_FLAG;
        } else {
            self.flags &= !DO_FLAG;
        }
    }

    pub fn find_option(&self, code: u16) -> Option<&EdnsOption> {
        self.options.iter().find(|opt| opt.code == code)
    }

    /// Decode from the OPT record's class, ttl and rdata fields.
    pub fn parse(class: u16, ttl: u32, rdata: &[u8]) -> Result<Self, ProtoError> {
        let mut options = Vec::new();
        let mut pos = 0;
        while pos + 4 <= rdata.len() {
            let code = u16::from_be_bytes([rdata[pos], rdata[pos + 1]]);
            let len = u16::from_be_bytes([rdata[pos + 2], rdata[pos + 3]]) as usize;
            pos += 4;
            if pos + len > rdata.len() {
                return Err(ProtoError::InvalidRecord);
            }
            options.push(EdnsOption {
                code,
                data: rdata[pos..pos + len].to_vec(),
            });
            pos += len;
        }

        Ok(EdnsOpt {
            udp_payload_size: class,
            extended_rcode: ((ttl >> 24) & 0xFF) as u8,
            version: ((ttl >> 16) & 0xFF) as u8,
            flags: (ttl & 0xFFFF) as u16,
            options,
        })
    }

    /// Encode back into (class, ttl, rdata) record fields.
    pub fn to_record_fields(&self) -> (u16, u32, Vec<u8>) {
        let ttl = ((self.extended_rcode as u32) << 24)
            | ((self.version as u32) << 16)
            | (self.flags as u32);
        let mut rdata = Vec::new();
        for option in &self.options {
            rdata.extend_from_slice(&option.code.to_be_bytes());
            rdata.extend_from_slice(&(option.data.len() as u16).to_be_bytes());
            rdata.extend_from_slice(&option.data);
        }
        (self.udp_payload_size, ttl, rdata)
    }

    pub fn client_subnet(&self) -> Option<ClientSubnet> {
        self.find_option(EDNS0_SUBNET)
            .and_then(|opt| ClientSubnet::decode(&opt.data).ok())
    }

    pub fn set_client_subnet(&mut self, subnet: ClientSubnet) {
        self.options.push(EdnsOption {
            code: EDNS0_SUBNET,
            data: subnet.encode(),
        });
    }
}

/// EDNS Client-Subnet payload: family, source/scope prefix lengths and the
/// address truncated to the source prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientSubnet {
    pub family: u16,
    pub source_netmask: u8,
    pub scope_netmask: u8,
    pub address: IpAddr,
}

impl ClientSubnet {
    /// Build an option for `address`, defaulting the netmask to /24 for
    /// IPv4 and /56 for IPv6 when `netmask` is `None`.
    pub fn for_address(address: IpAddr, netmask: Option<u8>) -> Self {
        let (family, default_mask) = match address {
            IpAddr::V4(_) => (1, 24),
            IpAddr::V6(_) => (2, 56),
        };
        ClientSubnet {
            family,
            source_netmask: netmask.unwrap_or(default_mask),
            scope_netmask: 0,
            address,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let octets: Vec<u8> = match self.address {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        let full_len = ((self.source_netmask as usize) + 7) / 8;
        let mut addr = octets[..full_len.min(octets.len())].to_vec();
        // Zero any bits past the prefix in the final octet.
        let spare_bits = (8 * addr.len()).saturating_sub(self.source_netmask as usize);
        if spare_bits > 0 {
            if let Some(last) = addr.last_mut() {
                *last &= 0xFFu8 << spare_bits;
            }
        }

        let mut out = Vec::with_capacity(4 + addr.len());
        out.extend_from_slice(&self.family.to_be_bytes());
        out.push(self.source_netmask);
        out.push(self.scope_netmask);
        out.extend_from_slice(&addr);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        if data.len() < 4 {
            return Err(ProtoError::InvalidRecord);
        }
        let family = u16::from_be_bytes([data[0], data[1]]);
        let source_netmask = data[2];
        let scope_netmask = data[3];
        let addr_bytes = &data[4..];

        let address = match family {
            1 => {
                let mut octets = [0u8; 4];
                if addr_bytes.len() > 4 {
                    return Err(ProtoError::InvalidRecord);
                }
                octets[..addr_bytes.len()].copy_from_slice(addr_bytes);
                IpAddr::from(octets)
            }
            2 => {
                let mut octets = [0u8; 16];
                if addr_bytes.len() > 16 {
                    return Err(ProtoError::InvalidRecord);
                }
                octets[..addr_bytes.len()].copy_from_slice(addr_bytes);
                IpAddr::from(octets)
            }
            _ => return Err(ProtoError::InvalidRecord),
        };

        Ok(ClientSubnet {
            family,
            source_netmask,
            scope_netmask,
            address,
        })
    }
}
