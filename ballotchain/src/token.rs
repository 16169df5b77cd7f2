use crate::*;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac, NewMac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::fmt;

pub type HmacSha256 = Hmac<Sha256>;

/// Authority-held secret that keys voter identity commitments.
///
/// Every process issuing tokens for an election must hold the same key, or
/// one voter would get a different commitment from each of them.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityKey(Vec<u8>);

impl IdentityKey {
    pub const MIN_LEN: usize = 32;

    pub fn generate() -> Self {
        let mut key = vec![0u8; Self::MIN_LEN];
        OsRng {}.fill_bytes(&mut key);
        IdentityKey(key)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < Self::MIN_LEN {
            return Err(Error::KeyDerivation);
        }
        Ok(IdentityKey(bytes.to_vec()))
    }

    pub fn from_hex(hex: &str) -> Result<Self, Error> {
        let bytes = hex::decode(hex.trim()).map_err(|_| Error::KeyDerivation)?;
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("IdentityKey(..)")
    }
}

/// Keyed commitment to a verified voter identity, bound to one election.
///
/// Published next to the voter's ballot. Without the identity key it cannot
/// be recomputed from a document number.
#[derive(Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub struct IdentityCommitment(#[serde(with = "serde_hex::fixed32")] pub [u8; 32]);

impl IdentityCommitment {
    pub fn new(
        key: &IdentityKey,
        election_id: &ElectionId,
        document_type: &str,
        document_number: &str,
    ) -> Result<Self, Error> {
        let mut mac = HmacSha256::new_from_slice(&key.0).map_err(|_| Error::KeyDerivation)?;
        mac.update(b"ballotchain_voter_identity");
        mac.update(election_id.as_bytes());
        mac.update(&(document_type.len() as u64).to_le_bytes());
        mac.update(document_type.as_bytes());
        mac.update(document_number.trim().to_uppercase().as_bytes());

        let mut out = [0u8; 32];
        out.copy_from_slice(&mac.finalize().into_bytes());
        Ok(IdentityCommitment(out))
    }
}

impl fmt::Debug for IdentityCommitment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "IdentityCommitment({})", hex::encode(&self.0[..8]))
    }
}

/// A successful identity check, as reported by the surrounding application.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct IdentityVerification {
    pub document_type: String,
    pub document_number: String,
}

/// Single-use voting credential.
///
/// Whether a token has been spent is never stored on the token: it is looked
/// up on the bulletin board (see [`BallotBox::consumed_entry_sequence`]).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VoterToken {
    pub election_id: ElectionId,
    pub voter_identity_commitment: IdentityCommitment,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl VoterToken {
    /// Issue a token for a verified identity, valid for `voter_token_expiration_minutes`.
    pub fn issue(
        config: &ElectionConfig,
        key: &IdentityKey,
        verification: &IdentityVerification,
        now: DateTime<Utc>,
    ) -> Result<Self, Error> {
        if !config.accepts_document(&verification.document_type) {
            return Err(Error::UnacceptedDocumentType(
                verification.document_type.clone(),
            ));
        }

        let expires_at = now
            .checked_add_signed(config.token_lifetime())
            .ok_or_else(|| Error::InvalidConfiguration("voter token expiry is out of range".into()))?;

        Ok(VoterToken {
            election_id: config.id,
            voter_identity_commitment: IdentityCommitment::new(
                key,
                &config.id,
                &verification.document_type,
                &verification.document_number,
            )?,
            issued_at: now,
            expires_at,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
