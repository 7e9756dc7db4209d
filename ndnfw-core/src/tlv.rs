use bytes::{BufMut, Bytes};

use crate::error::Error;

/// TLV-TYPE numbers used by the forwarder.
pub mod tlv_types {
    pub const INTEREST: u32 = 0x05;
    pub const DATA: u32 = 0x06;
    pub const NAME: u32 = 0x07;
    pub const GENERIC_NAME_COMPONENT: u32 = 0x08;
    pub const IMPLICIT_SHA256_DIGEST_COMPONENT: u32 = 0x01;
    pub const NONCE: u32 = 0x0A;
    pub const INTEREST_LIFETIME: u32 = 0x0C;
    pub const MUST_BE_FRESH: u32 = 0x12;
    pub const META_INFO: u32 = 0x14;
    pub const CONTENT: u32 = 0x15;
    pub const SIGNATURE_INFO: u32 = 0x16;
    pub const SIGNATURE_VALUE: u32 = 0x17;
    pub const CONTENT_TYPE: u32 = 0x18;
    pub const FRESHNESS_PERIOD: u32 = 0x19;
    pub const FORWARDING_HINT: u32 = 0x1E;
    pub const CAN_BE_PREFIX: u32 = 0x21;
    pub const HOP_LIMIT: u32 = 0x22;
    pub const LP_FRAGMENT: u32 = 0x50;
    pub const LP_PIT_TOKEN: u32 = 0x62;
    pub const LP_PACKET: u32 = 0x64;
    pub const LP_NACK: u32 = 0xFD0320;
    pub const LP_NACK_REASON: u32 = 0xFD0321;
}

/// TLV element with a borrowed-by-refcount value.
///
/// Wire format (NDN-TLV):
/// - Type: VAR-NUMBER
/// - Length: VAR-NUMBER
/// - Value: `length` octets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvElement {
    pub type_: u32,
    pub value: Bytes,
}

impl TlvElement {
    /// Create a new TLV element
    pub fn new(type_: u32, value: impl Into<Bytes>) -> Self {
        Self {
            type_,
            value: value.into(),
        }
    }

    /// Get the total encoded length of this TLV element
    pub fn encoded_length(&self) -> usize {
        varnum_size(self.type_ as u64) + varnum_size(self.value.len() as u64) + self.value.len()
    }

    /// Encode this TLV element to a buffer
    pub fn encode_to<B: BufMut>(&self, buf: &mut B) {
        write_varnum(buf, self.type_ as u64);
        write_varnum(buf, self.value.len() as u64);
        buf.put_slice(&self.value);
    }

    /// Encode this TLV element to bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.encoded_length());
        self.encode_to(&mut buffer);
        buffer
    }

    /// Decode one TLV element from the front of `data`, sharing its storage.
    ///
    /// Returns the element and the number of octets consumed.
    pub fn decode(data: &Bytes) -> Result<(Self, usize), Error> {
        let (type_, type_len) = read_varnum(data)?;
        let (length, length_len) = read_varnum(&data[type_len..])?;
        let offset = type_len + length_len;
        let length = usize::try_from(length).map_err(|_| Error::Tlv("length overflow".into()))?;
        if data.len() - offset < length {
            return Err(Error::Tlv(format!(
                "TLV value requires {} octets but only {} available",
                length,
                data.len() - offset
            )));
        }
        let type_ = u32::try_from(type_).map_err(|_| Error::Tlv(format!("TLV-TYPE {type_} too large")))?;
        let value = data.slice(offset..offset + length);
        Ok((Self { type_, value }, offset + length))
    }

    /// Interpret the value as a NonNegativeInteger.
    pub fn nni(&self) -> Result<u64, Error> {
        decode_nni(&self.value)
    }
}

/// Iterator over consecutive TLV elements in a buffer.
pub struct TlvIter {
    rest: Bytes,
}

impl TlvIter {
    pub fn new(buf: Bytes) -> Self {
        Self { rest: buf }
    }
}

impl Iterator for TlvIter {
    type Item = Result<TlvElement, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        match TlvElement::decode(&self.rest) {
            Ok((element, consumed)) => {
                self.rest = self.rest.slice(consumed..);
                Some(Ok(element))
            }
            Err(e) => {
                self.rest = Bytes::new();
                Some(Err(e))
            }
        }
    }
}

/// Number of octets needed to encode `n` as a VAR-NUMBER.
pub fn varnum_size(n: u64) -> usize {
    if n < 253 {
        1
    } else if n <= 0xFFFF {
        3
    } else if n <= 0xFFFF_FFFF {
        5
    } else {
        9
    }
}

/// Write a VAR-NUMBER (big-endian, 1/3/5/9 octets).
pub fn write_varnum<B: BufMut>(buf: &mut B, n: u64) {
    if n < 253 {
        buf.put_u8(n as u8);
    } else if n <= 0xFFFF {
        buf.put_u8(0xFD);
        buf.put_u16(n as u16);
    } else if n <= 0xFFFF_FFFF {
        buf.put_u8(0xFE);
        buf.put_u32(n as u32);
    } else {
        buf.put_u8(0xFF);
        buf.put_u64(n);
    }
}

/// Encode a VAR-NUMBER into a fixed array; returns the array and used length.
pub fn varnum_bytes(n: u64) -> ([u8; 9], usize) {
    let mut out = [0u8; 9];
    let size = varnum_size(n);
    let mut slice = &mut out[..size];
    write_varnum(&mut slice, n);
    (out, size)
}

/// Read a VAR-NUMBER; returns the value and the octets consumed.
pub fn read_varnum(data: &[u8]) -> Result<(u64, usize), Error> {
    let first = *data.first().ok_or_else(|| Error::Tlv("buffer underflow in VAR-NUMBER".into()))?;
    let width = match first {
        0..=252 => return Ok((first as u64, 1)),
        0xFD => 2,
        0xFE => 4,
        0xFF => 8,
    };
    if data.len() < 1 + width {
        return Err(Error::Tlv(format!("buffer underflow in {width}-octet VAR-NUMBER")));
    }
    let n = data[1..1 + width]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64);
    Ok((n, 1 + width))
}

/// Encode a NonNegativeInteger using the shortest of 1/2/4/8 octets.
pub fn encode_nni(n: u64) -> Vec<u8> {
    if n <= 0xFF {
        vec![n as u8]
    } else if n <= 0xFFFF {
        (n as u16).to_be_bytes().to_vec()
    } else if n <= 0xFFFF_FFFF {
        (n as u32).to_be_bytes().to_vec()
    } else {
        n.to_be_bytes().to_vec()
    }
}

pub fn decode_nni(value: &[u8]) -> Result<u64, Error> {
    match value.len() {
        1 | 2 | 4 | 8 => Ok(value.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)),
        n => Err(Error::Tlv(format!("invalid NonNegativeInteger length {n}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varnum_widths() {
        for (n, size, marker) in [(100u64, 1, 100u8), (1000, 3, 0xFD), (100_000, 5, 0xFE), (1 << 40, 9, 0xFF)] {
            let mut buf = Vec::new();
            write_varnum(&mut buf, n);
            assert_eq!(buf.len(), size);
            assert_eq!(buf[0], marker);
            assert_eq!(read_varnum(&buf).unwrap(), (n, size));
        }
    }

    #[test]
    fn test_varnum_underflow() {
        assert!(read_varnum(&[]).is_err());
        assert!(read_varnum(&[0xFD, 0x01]).is_err());
    }

    #[test]
    fn test_element_decode_shares_value() {
        let element = TlvElement::new(tlv_types::CONTENT, b"abc".to_vec());
        let wire = Bytes::from(element.encode());
        assert_eq!(wire.len(), element.encoded_length());
        let (decoded, consumed) = TlvElement::decode(&wire).unwrap();
        assert_eq!(consumed, 5);
        assert_eq!(decoded, element);
    }

    #[test]
    fn test_element_truncated_value() {
        let wire = Bytes::from_static(&[0x15, 0x05, b'a']);
        assert!(matches!(TlvElement::decode(&wire), Err(Error::Tlv(_))));
    }

    #[test]
    fn test_multi_octet_type() {
        let element = TlvElement::new(tlv_types::LP_NACK, Vec::new());
        let wire = Bytes::from(element.encode());
        assert_eq!(&wire[..], &[0xFE, 0x00, 0xFD, 0x03, 0x20, 0x00]);
        assert_eq!(TlvElement::decode(&wire).unwrap().0.type_, tlv_types::LP_NACK);
    }

    #[test]
    fn test_nni() {
        assert_eq!(encode_nni(5), vec![5]);
        assert_eq!(encode_nni(300), vec![1, 44]);
        assert_eq!(decode_nni(&encode_nni(70_000)).unwrap(), 70_000);
        assert!(decode_nni(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_iter_stops_on_error() {
        let mut wire = TlvElement::new(0x08, b"a".to_vec()).encode();
        wire.extend_from_slice(&[0x08, 0x09]);
        let items: Vec<_> = TlvIter::new(Bytes::from(wire)).collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }
}
