use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};

use super::ProtoError;

/// Wire length of the fixed DNS header.
pub const HEADER_LEN: usize = 12;

/// The 12-byte DNS message header.
///
/// AD and CD get their own fields instead of living inside a 3-bit `z`
/// blob; the remaining reserved bit is kept verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: bool,
    pub ad: bool,
    pub cd: bool,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl Header {
    pub fn pack(&self, out: &mut Vec<u8>) -> Result<(), ProtoError> {
        let mut writer = BitWriter::<_, BigEndian>::new(out);
        writer.write_var::<u16>(16, self.id)?;
        writer.write_var::<u8>(1, self.qr as u8)?;
        writer.write_var::<u8>(4, self.opcode)?;
        writer.write_var::<u8>(1, self.aa as u8)?;
        writer.write_var::<u8>(1, self.tc as u8)?;
        writer.write_var::<u8>(1, self.rd as u8)?;
        writer.write_var::<u8>(1, self.ra as u8)?;
        writer.write_var::<u8>(1, self.z as u8)?;
        writer.write_var::<u8>(1, self.ad as u8)?;
        writer.write_var::<u8>(1, self.cd as u8)?;
        writer.write_var::<u8>(4, self.rcode)?;
        writer.write_var::<u16>(16, self.qdcount)?;
        writer.write_var::<u16>(16, self.ancount)?;
        writer.write_var::<u16>(16, self.nscount)?;
        writer.write_var::<u16>(16, self.arcount)?;
        Ok(())
    }

    pub fn unpack(data: &[u8]) -> Result<Self, ProtoError> {
        if data.len() < HEADER_LEN {
            return Err(ProtoError::InvalidHeader);
        }
        let mut reader = BitReader::<_, BigEndian>::new(&data[..HEADER_LEN]);
        Ok(Header {
            id: reader.read_var::<u16>(16)?,
            qr: reader.read_var::<u8>(1)? == 1,
            opcode: reader.read_var::<u8>(4)?,
            aa: reader.read_var::<u8>(1)? == 1,
            tc: reader.read_var::<u8>(1)? == 1,
            rd: reader.read_var::<u8>(1)? == 1,
            ra: reader.read_var::<u8>(1)? == 1,
            z: reader.read_var::<u8>(1)? == 1,
            ad: reader.read_var::<u8>(1)? == 1,
            cd: reader.read_var::<u8>(1)? == 1,
            rcode: reader.read_var::<u8>(4)?,
            qdcount: reader.read_var::<u16>(16)?,
            ancount: reader.read_var::<u16>(16)?,
            nscount: reader.read_var::<u16>(16)?,
            arcount: reader.read_var::<u16>(16)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = Header {
            id: 0xBEEF,
            qr: true,
            opcode: 0,
            aa: false,
            tc: true,
            rd: true,
            ra: true,
            z: false,
            ad: true,
            cd: false,
            rcode: 3,
            qdcount: 1,
            ancount: 2,
            nscount: 0,
            arcount: 1,
        };

        let mut wire = Vec::new();
        header.pack(&mut wire).unwrap();
        assert_eq!(wire.len(), HEADER_LEN);
        assert_eq!(Header::unpack(&wire).unwrap(), header);
    }

    #[test]
    fn flag_bits_land_in_the_right_places() {
        let mut header = Header::default();
        header.rd = true;
        header.cd = true;

        let mut wire = Vec::new();
        header.pack(&mut wire).unwrap();
        // RD is the low bit of byte 2, CD is bit 4 of byte 3.
        assert_eq!(wire[2] & 0x01, 0x01);
        assert_eq!(wire[3] & 0x10, 0x10);
    }

    #[test]
    fn short_buffer_is_an_error() {
        assert!(Header::unpack(&[0u8; 11]).is_err());
    }
}
