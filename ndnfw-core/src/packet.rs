//! Interest, Data and Nack packets plus the NDNLPv2 framing that carries
//! PIT tokens and Nack headers.

use std::fmt;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::mbuf::Mbuf;
use crate::name::Name;
use crate::tlv::{self, tlv_types, TlvElement, TlvIter};

/// Default InterestLifetime.
pub const DEFAULT_INTEREST_LIFETIME: Duration = Duration::from_millis(4000);

/// Represents an NDN Interest packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interest {
    pub name: Name,
    pub can_be_prefix: bool,
    pub must_be_fresh: bool,
    /// First delegation of the ForwardingHint, if any.
    pub fwhint: Option<Name>,
    pub nonce: u32,
    pub lifetime: Duration,
    pub hop_limit: Option<u8>,
}

impl Interest {
    /// Create a new Interest with a random nonce and default lifetime
    pub fn new(name: Name) -> Self {
        Self {
            name,
            can_be_prefix: false,
            must_be_fresh: false,
            fwhint: None,
            nonce: rand::random(),
            lifetime: DEFAULT_INTEREST_LIFETIME,
            hop_limit: None,
        }
    }

    pub fn with_nonce(mut self, nonce: u32) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn with_hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = Some(hop_limit);
        self
    }

    pub fn with_can_be_prefix(mut self, can_be_prefix: bool) -> Self {
        self.can_be_prefix = can_be_prefix;
        self
    }

    pub fn with_must_be_fresh(mut self, must_be_fresh: bool) -> Self {
        self.must_be_fresh = must_be_fresh;
        self
    }

    pub fn with_fwhint(mut self, fwhint: Name) -> Self {
        self.fwhint = Some(fwhint);
        self
    }

    /// Encode the Interest TLV.
    pub fn encode(&self) -> Vec<u8> {
        let mut inner = BytesMut::new();
        self.name.to_tlv().encode_to(&mut inner);
        if self.can_be_prefix {
            TlvElement::new(tlv_types::CAN_BE_PREFIX, Bytes::new()).encode_to(&mut inner);
        }
        if self.must_be_fresh {
            TlvElement::new(tlv_types::MUST_BE_FRESH, Bytes::new()).encode_to(&mut inner);
        }
        if let Some(fwhint) = &self.fwhint {
            TlvElement::new(tlv_types::FORWARDING_HINT, fwhint.to_tlv().encode()).encode_to(&mut inner);
        }
        TlvElement::new(tlv_types::NONCE, self.nonce.to_be_bytes().to_vec()).encode_to(&mut inner);
        if self.lifetime != DEFAULT_INTEREST_LIFETIME {
            TlvElement::new(tlv_types::INTEREST_LIFETIME, tlv::encode_nni(self.lifetime.as_millis() as u64))
                .encode_to(&mut inner);
        }
        if let Some(hop_limit) = self.hop_limit {
            TlvElement::new(tlv_types::HOP_LIMIT, vec![hop_limit]).encode_to(&mut inner);
        }
        TlvElement::new(tlv_types::INTEREST, inner.freeze()).encode()
    }

    /// Decode from the TLV-VALUE of an Interest element.
    pub fn decode_value(value: Bytes) -> Result<Self, Error> {
        let mut name = None;
        let mut interest = Interest::new(Name::new());
        let mut has_nonce = false;
        for element in TlvIter::new(value) {
            let element = element?;
            match element.type_ {
                tlv_types::NAME => name = Some(Name::from_value(element.value)?),
                tlv_types::CAN_BE_PREFIX => interest.can_be_prefix = true,
                tlv_types::MUST_BE_FRESH => interest.must_be_fresh = true,
                tlv_types::FORWARDING_HINT => {
                    let first = TlvIter::new(element.value)
                        .next()
                        .transpose()?
                        .ok_or_else(|| Error::NdnPacket("empty ForwardingHint".into()))?;
                    interest.fwhint = Some(Name::from_value(first.value)?);
                }
                tlv_types::NONCE => {
                    let octets: [u8; 4] = element.value[..]
                        .try_into()
                        .map_err(|_| Error::NdnPacket("Nonce must be 4 octets".into()))?;
                    interest.nonce = u32::from_be_bytes(octets);
                    has_nonce = true;
                }
                tlv_types::INTEREST_LIFETIME => interest.lifetime = Duration::from_millis(element.nni()?),
                tlv_types::HOP_LIMIT => {
                    if element.value.len() != 1 {
                        return Err(Error::NdnPacket("HopLimit must be 1 octet".into()));
                    }
                    interest.hop_limit = Some(element.value[0]);
                }
                _ => {}
            }
        }
        interest.name = name.ok_or_else(|| Error::NdnPacket("Interest has no Name".into()))?;
        if !has_nonce {
            interest.nonce = rand::random();
        }
        Ok(interest)
    }
}

/// Represents an NDN Data packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub name: Name,
    pub content_type: u64,
    pub freshness_period: Duration,
    pub content: Bytes,
    pub signature: Bytes,
}

impl Data {
    /// Create a new Data packet with zero freshness
    pub fn new(name: Name, content: impl Into<Bytes>) -> Self {
        Self {
            name,
            content_type: 0,
            freshness_period: Duration::ZERO,
            content: content.into(),
            signature: Bytes::from_static(&[0u8; 32]),
        }
    }

    pub fn with_freshness_period(mut self, freshness_period: Duration) -> Self {
        self.freshness_period = freshness_period;
        self
    }

    /// Check whether the name of this Data satisfies the Interest.
    /// Freshness is checked separately, against the cache arrival time.
    pub fn can_satisfy(&self, interest: &Interest) -> bool {
        if interest.can_be_prefix {
            interest.name.is_prefix_of(&self.name)
        } else {
            interest.name == self.name
        }
    }

    /// Whether Data that arrived at `arrival` is still fresh at `now`.
    pub fn is_fresh(&self, arrival: Instant, now: Instant) -> bool {
        !self.freshness_period.is_zero() && now < arrival + self.freshness_period
    }

    /// Encode the Data TLV.
    pub fn encode(&self) -> Vec<u8> {
        let mut meta = BytesMut::new();
        if self.content_type != 0 {
            TlvElement::new(tlv_types::CONTENT_TYPE, tlv::encode_nni(self.content_type)).encode_to(&mut meta);
        }
        if !self.freshness_period.is_zero() {
            TlvElement::new(
                tlv_types::FRESHNESS_PERIOD,
                tlv::encode_nni(self.freshness_period.as_millis() as u64),
            )
            .encode_to(&mut meta);
        }

        let mut inner = BytesMut::new();
        self.name.to_tlv().encode_to(&mut inner);
        if !meta.is_empty() {
            TlvElement::new(tlv_types::META_INFO, meta.freeze()).encode_to(&mut inner);
        }
        TlvElement::new(tlv_types::CONTENT, self.content.clone()).encode_to(&mut inner);
        // SignatureInfo: DigestSha256
        TlvElement::new(tlv_types::SIGNATURE_INFO, vec![0x1B, 0x01, 0x00]).encode_to(&mut inner);
        TlvElement::new(tlv_types::SIGNATURE_VALUE, self.signature.clone()).encode_to(&mut inner);
        TlvElement::new(tlv_types::DATA, inner.freeze()).encode()
    }

    /// Decode from the TLV-VALUE of a Data element.
    pub fn decode_value(value: Bytes) -> Result<Self, Error> {
        let mut name = None;
        let mut data = Data::new(Name::new(), Bytes::new());
        data.signature = Bytes::new();
        for element in TlvIter::new(value) {
            let element = element?;
            match element.type_ {
                tlv_types::NAME => name = Some(Name::from_value(element.value)?),
                tlv_types::META_INFO => {
                    for field in TlvIter::new(element.value) {
                        let field = field?;
                        match field.type_ {
                            tlv_types::CONTENT_TYPE => data.content_type = field.nni()?,
                            tlv_types::FRESHNESS_PERIOD => {
                                data.freshness_period = Duration::from_millis(field.nni()?)
                            }
                            _ => {}
                        }
                    }
                }
                tlv_types::CONTENT => data.content = element.value,
                tlv_types::SIGNATURE_VALUE => data.signature = element.value,
                _ => {}
            }
        }
        data.name = name.ok_or_else(|| Error::NdnPacket("Data has no Name".into()))?;
        Ok(data)
    }
}

/// Nack reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NackReason {
    Congestion,
    Duplicate,
    NoRoute,
    Unspecified,
}

impl NackReason {
    pub fn code(self) -> u64 {
        match self {
            NackReason::Congestion => 50,
            NackReason::Duplicate => 100,
            NackReason::NoRoute => 150,
            NackReason::Unspecified => 0,
        }
    }

    pub fn from_code(code: u64) -> Self {
        match code {
            50 => NackReason::Congestion,
            100 => NackReason::Duplicate,
            150 => NackReason::NoRoute,
            _ => NackReason::Unspecified,
        }
    }

    /// Ordering used when several upstreams disagree: lower is less severe.
    pub fn severity(self) -> u8 {
        match self {
            NackReason::Congestion => 1,
            NackReason::Duplicate => 2,
            NackReason::NoRoute => 3,
            NackReason::Unspecified => 4,
        }
    }

    /// The less severe of two reasons.
    pub fn least_severe(self, other: NackReason) -> NackReason {
        if other.severity() < self.severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NackReason::Congestion => "Congestion",
            NackReason::Duplicate => "Duplicate",
            NackReason::NoRoute => "NoRoute",
            NackReason::Unspecified => "Unspecified",
        };
        f.write_str(s)
    }
}

/// A Nack: the rejected Interest and the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nack {
    pub interest: Interest,
    pub reason: NackReason,
}

impl Nack {
    pub fn new(interest: Interest, reason: NackReason) -> Self {
        Self { interest, reason }
    }
}

/// Network-layer packet after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Interest(Interest),
    Data(Data),
    Nack(Nack),
}

impl Packet {
    pub fn name(&self) -> &Name {
        match self {
            Packet::Interest(interest) => &interest.name,
            Packet::Data(data) => &data.name,
            Packet::Nack(nack) => &nack.interest.name,
        }
    }

    fn encode_l3(&self) -> Vec<u8> {
        match self {
            Packet::Interest(interest) => interest.encode(),
            Packet::Data(data) => data.encode(),
            Packet::Nack(nack) => nack.interest.encode(),
        }
    }
}

/// A packet with its NDNLPv2 header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LpPacket {
    /// PIT token, echoed by the next hop on the matching Data or Nack.
    pub token: Option<u64>,
    pub packet: Packet,
}

impl LpPacket {
    pub fn new(packet: Packet, token: Option<u64>) -> Self {
        Self { token, packet }
    }

    fn needs_lp(&self) -> bool {
        self.token.is_some() || matches!(self.packet, Packet::Nack(_))
    }

    /// LpPacket header octets that precede an L3 payload of `l3_len` octets.
    fn lp_header(&self, l3_len: usize) -> Vec<u8> {
        let mut fields = Vec::new();
        if let Some(token) = self.token {
            TlvElement::new(tlv_types::LP_PIT_TOKEN, token.to_be_bytes().to_vec()).encode_to(&mut fields);
        }
        if let Packet::Nack(nack) = &self.packet {
            let reason = TlvElement::new(tlv_types::LP_NACK_REASON, tlv::encode_nni(nack.reason.code()));
            TlvElement::new(tlv_types::LP_NACK, reason.encode()).encode_to(&mut fields);
        }
        tlv::write_varnum(&mut fields, tlv_types::LP_FRAGMENT as u64);
        tlv::write_varnum(&mut fields, l3_len as u64);

        let total = fields.len() + l3_len;
        let mut header = Vec::with_capacity(fields.len() + 10);
        tlv::write_varnum(&mut header, tlv_types::LP_PACKET as u64);
        tlv::write_varnum(&mut header, total as u64);
        header.extend_from_slice(&fields);
        header
    }

    /// Encode to a contiguous buffer.
    pub fn encode(&self) -> Vec<u8> {
        let l3 = self.packet.encode_l3();
        if !self.needs_lp() {
            return l3;
        }
        let mut wire = self.lp_header(l3.len());
        wire.extend_from_slice(&l3);
        wire
    }

    /// Write the L3 packet into tailroom and prepend the LP header into headroom.
    pub fn encode_into(&self, mbuf: &mut Mbuf) -> Result<(), Error> {
        let l3 = self.packet.encode_l3();
        mbuf.append(l3.len())?.copy_from_slice(&l3);
        if self.needs_lp() {
            let header = self.lp_header(l3.len());
            mbuf.prepend(header.len())?.copy_from_slice(&header);
        }
        Ok(())
    }

    /// Decode and classify a received frame.
    pub fn decode(wire: Bytes) -> Result<Self, Error> {
        let (outer, _) = TlvElement::decode(&wire)?;
        let mut token = None;
        let mut nack_reason = None;
        let l3 = if outer.type_ == tlv_types::LP_PACKET {
            let mut fragment = None;
            for field in TlvIter::new(outer.value) {
                let field = field?;
                match field.type_ {
                    tlv_types::LP_PIT_TOKEN => {
                        if field.value.is_empty() || field.value.len() > 8 {
                            return Err(Error::NdnPacket(format!(
                                "unsupported PIT token length {}",
                                field.value.len()
                            )));
                        }
                        token = Some(field.value.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64));
                    }
                    tlv_types::LP_NACK => {
                        let mut reason = NackReason::Unspecified;
                        for inner in TlvIter::new(field.value) {
                            let inner = inner?;
                            if inner.type_ == tlv_types::LP_NACK_REASON {
                                reason = NackReason::from_code(inner.nni()?);
                            }
                        }
                        nack_reason = Some(reason);
                    }
                    tlv_types::LP_FRAGMENT => fragment = Some(field.value),
                    _ => {}
                }
            }
            let fragment = fragment.ok_or_else(|| Error::NdnPacket("LpPacket without fragment".into()))?;
            TlvElement::decode(&fragment)?.0
        } else {
            outer
        };

        let packet = match (l3.type_, nack_reason) {
            (tlv_types::INTEREST, None) => Packet::Interest(Interest::decode_value(l3.value)?),
            (tlv_types::INTEREST, Some(reason)) => Packet::Nack(Nack::new(Interest::decode_value(l3.value)?, reason)),
            (tlv_types::DATA, None) => Packet::Data(Data::decode_value(l3.value)?),
            (tlv_types::DATA, Some(_)) => return Err(Error::NdnPacket("Nack header on Data".into())),
            (other, _) => return Err(Error::NdnPacket(format!("unexpected L3 type {other:#x}"))),
        };
        Ok(Self { token, packet })
    }
}
