//! Byte-offset helpers for DNS names, including compression pointers.
//!
//! Readers take the whole packet buffer so a pointer can jump anywhere in
//! it; writers never emit pointers, which keeps repacking independent of
//! the buffer a message was parsed from.

use super::ProtoError;

const MAX_POINTER_JUMPS: usize = 5;
const MAX_LABEL_LEN: u8 = 63;

/// Read a domain name starting at `start`, following compression pointers.
///
/// Returns the fully-qualified name (always ending in `.`, `"."` for the
/// root) and the offset of the first byte after the name in the original
/// stream, i.e. after the first pointer if one was followed.
pub fn read_name(data: &[u8], start: usize) -> Result<(String, usize), ProtoError> {
    let mut name = String::new();
    let mut offset = start;
    let mut jumps = 0;
    let mut resume_at = None;

    loop {
        let len = *data.get(offset).ok_or(ProtoError::UnexpectedEof)?;

        if (len & 0xC0) == 0xC0 {
            if offset + 1 >= data.len() {
                return Err(ProtoError::UnexpectedEof);
            }
            if resume_at.is_none() {
                resume_at = Some(offset + 2);
            }
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return Err(ProtoError::InvalidName);
            }
            offset = u16::from_be_bytes([len & 0x3F, data[offset + 1]]) as usize;
            continue;
        }

        if len == 0 {
            offset += 1;
            break;
        }

        if len > MAX_LABEL_LEN {
            return Err(ProtoError::InvalidName);
        }

        let label_start = offset + 1;
        let label_end = label_start + len as usize;
        if label_end > data.len() {
            return Err(ProtoError::UnexpectedEof);
        }
        let label = std::str::from_utf8(&data[label_start..label_end])
            .map_err(|_| ProtoError::InvalidName)?;
        name.push_str(label);
        name.push('.');
        offset = label_end;
    }

    if name.is_empty() {
        name.push('.');
    }
    Ok((name, resume_at.unwrap_or(offset)))
}

/// Append the uncompressed wire form of a fully-qualified name.
pub fn write_name(out: &mut Vec<u8>, name: &str) -> Result<(), ProtoError> {
    for label in name.split('.').filter(|l| !l.is_empty()) {
        if label.len() > MAX_LABEL_LEN as usize {
            return Err(ProtoError::InvalidName);
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    Ok(())
}

/// Make a name fully qualified by appending the root dot when missing.
pub fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}
