use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::error::Error;
use crate::tlv::{self, tlv_types, TlvElement, TlvIter};

/// Maximum number of components in a name.
pub const MAX_NAME_COMPONENTS: usize = 64;

/// Maximum octets of a name's TLV-VALUE.
pub const MAX_NAME_LENGTH: usize = 2048;

/// Represents a hierarchical name in the NDN network.
///
/// The name keeps its TLV-VALUE (the concatenated component TLVs) in one
/// shared buffer together with the end offset of every component, so that
/// prefixes share storage with the full name and hashing a prefix never
/// re-encodes anything.
#[derive(Clone)]
pub struct Name {
    value: Bytes,
    ends: Arc<[u32]>,
    len: usize,
}

impl Name {
    /// Create a new empty name
    pub fn new() -> Self {
        Self {
            value: Bytes::new(),
            ends: Arc::from(Vec::new()),
            len: 0,
        }
    }

    /// Parse a URI such as `/hello/world`. Each segment becomes a
    /// GenericNameComponent; `%XX` escapes are decoded.
    pub fn parse(uri: &str) -> Result<Self, Error> {
        let mut value = BytesMut::new();
        let mut ends = Vec::new();
        for segment in uri.split('/').filter(|s| !s.is_empty()) {
            let component = TlvElement::new(tlv_types::GENERIC_NAME_COMPONENT, unescape(segment)?);
            component.encode_to(&mut value);
            ends.push(value.len() as u32);
        }
        Self::from_parts(value.freeze(), ends)
    }

    /// Build a name from its TLV-VALUE, validating every component.
    pub fn from_value(value: Bytes) -> Result<Self, Error> {
        let mut ends = Vec::new();
        let mut offset = 0usize;
        for element in TlvIter::new(value.clone()) {
            let element = element?;
            if element.type_ == 0 || element.type_ > 0xFFFF {
                return Err(Error::NdnPacket(format!("invalid name component type {}", element.type_)));
            }
            offset += element.encoded_length();
            ends.push(offset as u32);
        }
        Self::from_parts(value, ends)
    }

    fn from_parts(value: Bytes, ends: Vec<u32>) -> Result<Self, Error> {
        if ends.len() > MAX_NAME_COMPONENTS || value.len() > MAX_NAME_LENGTH {
            return Err(Error::NameTooLong {
                components: ends.len(),
                octets: value.len(),
            });
        }
        let len = ends.len();
        Ok(Self {
            value,
            ends: Arc::from(ends),
            len,
        })
    }

    /// Append a generic component, returning a new name.
    pub fn append(&self, component: &[u8]) -> Result<Self, Error> {
        let mut value = BytesMut::from(&self.value[..]);
        TlvElement::new(tlv_types::GENERIC_NAME_COMPONENT, component.to_vec()).encode_to(&mut value);
        let mut ends = self.ends[..self.len].to_vec();
        ends.push(value.len() as u32);
        Self::from_parts(value.freeze(), ends)
    }

    /// Get the number of components
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the name is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// TLV-VALUE of the name.
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    fn start_of(&self, i: usize) -> usize {
        if i == 0 {
            0
        } else {
            self.ends[i - 1] as usize
        }
    }

    /// Get the value octets of the component at `index`.
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        if index >= self.len {
            return None;
        }
        let raw = &self.value[self.start_of(index)..self.ends[index] as usize];
        let (_, type_len) = tlv::read_varnum(raw).ok()?;
        let (_, length_len) = tlv::read_varnum(&raw[type_len..]).ok()?;
        Some(&raw[type_len + length_len..])
    }

    /// Get a prefix with at most `length` components. Shares storage.
    pub fn prefix(&self, length: usize) -> Name {
        let length = length.min(self.len);
        Name {
            value: self.value.slice(..self.start_of(length)),
            ends: self.ends.clone(),
            len: length,
        }
    }

    /// Check if this name is a prefix of another name
    pub fn is_prefix_of(&self, other: &Name) -> bool {
        self.len <= other.len && other.value.starts_with(&self.value) && other.start_of(self.len) == self.value.len()
    }

    /// Stable hash over the first `k` components (or fewer if the name is shorter).
    pub fn prefix_hash(&self, k: usize) -> u64 {
        let end = self.start_of(k.min(self.len));
        let mut hasher = DefaultHasher::new();
        hasher.write(&self.value[..end]);
        hasher.finish()
    }

    /// Hash of the whole name.
    pub fn full_hash(&self) -> u64 {
        self.prefix_hash(self.len)
    }

    /// Encode as a complete Name TLV.
    pub fn to_tlv(&self) -> TlvElement {
        TlvElement::new(tlv_types::NAME, self.value.clone())
    }

    /// Convert to URI representation
    pub fn to_uri(&self) -> String {
        self.to_string()
    }
}

fn unescape(segment: &str) -> Result<Vec<u8>, Error> {
    let raw = segment.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' {
            let hex = raw
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| Error::NdnPacket(format!("bad escape in name component {segment:?}")))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    Ok(out)
}

impl Default for Name {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(&self.value);
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len == 0 {
            return write!(f, "/");
        }
        for i in 0..self.len {
            write!(f, "/")?;
            for &b in self.get(i).unwrap_or_default() {
                if b.is_ascii_alphanumeric() || b"-._~".contains(&b) {
                    write!(f, "{}", b as char)?;
                } else {
                    write!(f, "%{:02X}", b)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self)
    }
}

impl std::str::FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Name::parse(s)
    }
}

impl serde::Serialize for Name {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_uri())
    }
}

impl<'de> serde::Deserialize<'de> for Name {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let uri = String::deserialize(deserializer)?;
        Name::parse(&uri).map_err(serde::de::Error::custom)
    }
}
