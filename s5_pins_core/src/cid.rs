//! Content identifiers as used by the remote pinning protocol.
//!
//! Supports CIDv0 (bare base58btc sha2-256 multihash, always `dag-pb`) and
//! CIDv1 in any multibase encoding. CIDv1 values are displayed in
//! base32lower, CIDv0 values keep their legacy `Qm...` form.

use minicbor::decode::{Decode, Decoder, Error as DecodeError};
use minicbor::encode::{self, Encode, Encoder, Write};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const CODEC_RAW: u64 = 0x55;
pub const CODEC_DAG_PB: u64 = 0x70;
pub const CODEC_DAG_CBOR: u64 = 0x71;

pub const MULTIHASH_IDENTITY: u64 = 0x00;
pub const MULTIHASH_SHA2_256: u64 = 0x12;
pub const MULTIHASH_BLAKE3: u64 = 0x1e;

/// Upper bound for a multihash digest we are willing to accept.
const MAX_DIGEST_LEN: u64 = 128;

#[derive(thiserror::Error, Debug)]
pub enum CidError {
    #[error("invalid multibase string: {0}")]
    Multibase(#[from] multibase::Error),
    #[error("empty input")]
    Empty,
    #[error("invalid varint")]
    InvalidVarint,
    #[error("unsupported cid version {0}")]
    UnsupportedVersion(u64),
    #[error("invalid CIDv0: expected a 34 byte sha2-256 multihash")]
    InvalidV0,
    #[error("digest too long: {0} bytes")]
    DigestTooLong(u64),
    #[error("invalid length: expected {expected} digest bytes, got {actual}")]
    InvalidDigestLength { expected: u64, actual: usize },
    #[error("{0} trailing bytes after multihash")]
    TrailingBytes(usize),
}

/// A parsed content identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid {
    version: u8,
    codec: u64,
    /// Full multihash bytes: `<hash code varint><length varint><digest>`.
    multihash: Vec<u8>,
}

impl Cid {
    /// Builds a CIDv1 from its parts.
    pub fn new_v1(codec: u64, hash_code: u64, digest: &[u8]) -> Self {
        let mut multihash = Vec::with_capacity(digest.len() + 4);
        write_varint(&mut multihash, hash_code);
        write_varint(&mut multihash, digest.len() as u64);
        multihash.extend_from_slice(digest);
        Self {
            version: 1,
            codec,
            multihash,
        }
    }

    pub fn parse(str: &str) -> Result<Self, CidError> {
        let str = str.trim();
        if str.is_empty() {
            return Err(CidError::Empty);
        }
        if str.len() == 46 && str.starts_with("Qm") {
            let bytes = multibase::Base::Base58Btc.decode(str)?;
            return Self::from_v0_bytes(bytes);
        }
        let (_, bytes) = multibase::decode(str)?;
        Self::from_bytes(&bytes)
    }

    /// Decodes the binary form, as produced by [`Cid::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CidError> {
        if bytes.len() == 34 && bytes[0] == MULTIHASH_SHA2_256 as u8 && bytes[1] == 0x20 {
            return Self::from_v0_bytes(bytes.to_vec());
        }
        let mut rest = bytes;
        let version = read_varint(&mut rest)?;
        if version != 1 {
            return Err(CidError::UnsupportedVersion(version));
        }
        let codec = read_varint(&mut rest)?;
        let multihash = rest;
        let _hash_code = read_varint(&mut rest)?;
        let len = read_varint(&mut rest)?;
        if len > MAX_DIGEST_LEN {
            return Err(CidError::DigestTooLong(len));
        }
        if (rest.len() as u64) < len {
            return Err(CidError::InvalidDigestLength {
                expected: len,
                actual: rest.len(),
            });
        }
        let trailing = rest.len() - len as usize;
        if trailing > 0 {
            return Err(CidError::TrailingBytes(trailing));
        }
        Ok(Self {
            version: 1,
            codec,
            multihash: multihash.to_vec(),
        })
    }

    fn from_v0_bytes(bytes: Vec<u8>) -> Result<Self, CidError> {
        if bytes.len() != 34 || bytes[0] != MULTIHASH_SHA2_256 as u8 || bytes[1] != 0x20 {
            return Err(CidError::InvalidV0);
        }
        Ok(Self {
            version: 0,
            codec: CODEC_DAG_PB,
            multihash: bytes,
        })
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn codec(&self) -> u64 {
        self.codec
    }

    pub fn multihash(&self) -> &[u8] {
        &self.multihash
    }

    /// Multihash function code, e.g. `0x12` for sha2-256.
    pub fn hash_code(&self) -> u64 {
        let mut rest = self.multihash.as_slice();
        read_varint(&mut rest).unwrap_or_default()
    }

    pub fn digest(&self) -> &[u8] {
        let mut rest = self.multihash.as_slice();
        let _ = read_varint(&mut rest);
        let _ = read_varint(&mut rest);
        rest
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        if self.version == 0 {
            return self.multihash.clone();
        }
        let mut out = Vec::with_capacity(self.multihash.len() + 4);
        write_varint(&mut out, 1);
        write_varint(&mut out, self.codec);
        out.extend_from_slice(&self.multihash);
        out
    }

    pub fn to_base32(&self) -> String {
        multibase::encode(multibase::Base::Base32Lower, self.to_bytes())
    }
    pub fn to_base58(&self) -> String {
        multibase::encode(multibase::Base::Base58Btc, self.to_bytes())
    }
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(input: &mut &[u8]) -> Result<u64, CidError> {
    let mut value = 0u64;
    // unsigned-varint caps values at 63 bits, i.e. 9 bytes
    for (i, byte) in input.iter().enumerate().take(9) {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            if i > 0 && *byte == 0 {
                return Err(CidError::InvalidVarint);
            }
            *input = &input[i + 1..];
            return Ok(value);
        }
    }
    Err(CidError::InvalidVarint)
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version == 0 {
            write!(f, "{}", multibase::Base::Base58Btc.encode(&self.multihash))
        } else {
            write!(f, "{}", self.to_base32())
        }
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({self})")
    }
}

impl FromStr for Cid {
    type Err = CidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cid::parse(s)
    }
}

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Cid::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl<C> Encode<C> for Cid {
    fn encode<W: Write>(
        &self,
        e: &mut Encoder<W>,
        _: &mut C,
    ) -> Result<(), encode::Error<W::Error>> {
        e.bytes(&self.to_bytes())?;
        Ok(())
    }
}

impl<'b, C> Decode<'b, C> for Cid {
    fn decode(d: &mut Decoder<'b>, _: &mut C) -> Result<Self, DecodeError> {
        let p = d.position();
        let bytes = d.bytes()?;
        Cid::from_bytes(bytes).map_err(|e| DecodeError::message(e.to_string()).at(p))
    }
}
