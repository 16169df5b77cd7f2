//! Byte fields that read as hex in JSON and stay raw bytes in CBOR.
//!
//! Use with `#[serde(with = "serde_hex")]` for `Vec<u8>`, or one of the
//! submodules for fixed-size arrays and ed25519 keys.

use ed25519_dalek::{PublicKey, Signature};
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::Serializer;
use std::convert::TryFrom;
use std::fmt;

pub fn serialize<S, T>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: AsRef<[u8]> + ?Sized,
{
    if serializer.is_human_readable() {
        serializer.serialize_str(&hex::encode(bytes.as_ref()))
    } else {
        serializer.serialize_bytes(bytes.as_ref())
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    if deserializer.is_human_readable() {
        deserializer.deserialize_str(HexOrBytes)
    } else {
        deserializer.deserialize_byte_buf(HexOrBytes)
    }
}

struct HexOrBytes;

impl<'de> Visitor<'de> for HexOrBytes {
    type Value = Vec<u8>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a hex string or a byte buffer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        hex::decode(v).map_err(E::custom)
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        Ok(v.to_vec())
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
        Ok(v)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(byte) = seq.next_element::<u8>()? {
            out.push(byte);
        }
        Ok(out)
    }
}

/// `[u8; 32]` digests
pub mod fixed32 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        super::serialize(&bytes[..], serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let bytes = super::deserialize(deserializer)?;
        <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| de::Error::invalid_length(bytes.len(), &"32 bytes"))
    }
}

/// ed25519 verification keys
pub mod ed_public_key {
    use super::*;

    pub fn serialize<S: Serializer>(key: &PublicKey, serializer: S) -> Result<S::Ok, S::Error> {
        super::serialize(key.as_bytes(), serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PublicKey, D::Error> {
        let bytes = super::deserialize(deserializer)?;
        PublicKey::from_bytes(&bytes).map_err(de::Error::custom)
    }
}

/// ed25519 signatures
pub mod ed_signature {
    use super::*;

    pub fn serialize<S: Serializer>(sig: &Signature, serializer: S) -> Result<S::Ok, S::Error> {
        super::serialize(&sig.to_bytes()[..], serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Signature, D::Error> {
        let bytes = super::deserialize(deserializer)?;
        Signature::try_from(bytes.as_slice()).map_err(de::Error::custom)
    }
}

/// Ristretto points, as their 32-byte compressed encoding
pub mod ristretto {
    use super::*;
    use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};

    pub fn serialize<S: Serializer>(point: &RistrettoPoint, serializer: S) -> Result<S::Ok, S::Error> {
        super::serialize(point.compress().as_bytes(), serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RistrettoPoint, D::Error> {
        let bytes = super::fixed32::deserialize(deserializer)?;
        CompressedRistretto(bytes)
            .decompress()
            .ok_or_else(|| de::Error::custom("invalid ristretto point"))
    }
}

#[cfg(test)]
mod tests {
    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Blob {
        #[serde(with = "crate::serde_hex")]
        data: Vec<u8>,
        #[serde(with = "crate::serde_hex::fixed32")]
        digest: [u8; 32],
    }

    #[test]
    fn hex_in_json_bytes_in_cbor() {
        let blob = Blob {
            data: vec![0xde, 0xad, 0xbe, 0xef],
            digest: [7; 32],
        };

        let json = serde_json::to_string(&blob).unwrap();
        assert!(json.contains("\"deadbeef\""));
        assert_eq!(serde_json::from_str::<Blob>(&json).unwrap(), blob);

        let cbor = serde_cbor::to_vec(&blob).unwrap();
        assert!(cbor.len() < json.len());
        assert_eq!(serde_cbor::from_slice::<Blob>(&cbor).unwrap(), blob);
    }
}
