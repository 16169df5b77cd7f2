//! Pluggable voting schemes.
//!
//! The rest of the engine is generic over [`VotingScheme`]; the concrete
//! variant is picked once, from [`ElectionConfig::scheme`].

use crate::*;
use rand::{CryptoRng, RngCore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

mod dummy;
mod elgamal;
mod zkp;

pub use dummy::*;
pub use elgamal::*;
pub use zkp::{ElGamalCiphertext, Proof as SigmaProof};

/// Values that travel through bulletin board payloads
pub trait Wire:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Wire for T where
    T: Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SchemeKind {
    /// Plaintext pass-through with trivially true proofs, for deterministic testing
    Dummy,

    /// Threshold exponential ElGamal over Ristretto255
    #[serde(rename = "elgamal")]
    ElGamal,
}

impl fmt::Display for SchemeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SchemeKind::Dummy => write!(f, "dummy"),
            SchemeKind::ElGamal => write!(f, "elgamal"),
        }
    }
}

impl std::str::FromStr for SchemeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "dummy" => Ok(SchemeKind::Dummy),
            "elgamal" => Ok(SchemeKind::ElGamal),
            _ => Err(Error::InvalidConfiguration(format!("unknown voting scheme {}", s))),
        }
    }
}

/// Shape of a ballot: one 0/1 selection per option, at most `max_selections` set.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BallotShape {
    pub options: usize,
    pub max_selections: u32,
}

impl BallotShape {
    pub fn check(&self, selections: &[u32]) -> Result<(), Error> {
        if selections.len() != self.options {
            return Err(Error::InvalidSelection(format!(
                "expected {} selections, got {}",
                self.options,
                selections.len()
            )));
        }
        if let Some(bad) = selections.iter().find(|s| **s > 1) {
            return Err(Error::InvalidSelection(format!(
                "selection values must be 0 or 1, got {}",
                bad
            )));
        }
        let total: u32 = selections.iter().sum();
        if total > self.max_selections {
            return Err(Error::InvalidSelection(format!(
                "{} options selected, at most {} allowed",
                total, self.max_selections
            )));
        }
        Ok(())
    }
}

/// The capability set every voting scheme provides.
///
/// Trustees are addressed by their 1-based index. Key generation follows a
/// dealer model: each trustee deals a degree `threshold - 1` secret, commits
/// to it, and hands every trustee (itself included) a share of it.
pub trait VotingScheme: Clone + Default + fmt::Debug + PartialEq + Send + Sync + 'static {
    const KIND: SchemeKind;

    type PublicKey: Wire;

    /// A trustee's secret dealing. Never leaves the trustee.
    type Dealer;
    type Commitment: Wire;

    /// A share dealt to one trustee, or the sum of all shares a trustee received.
    type SecretShare: Wire;

    /// Public counterpart of a trustee's combined secret share
    type VerificationKey: Wire;

    type Ciphertext: Wire;
    type BallotProof: Wire;
    type DecryptionShare: Wire;

    fn dealer<R: RngCore + CryptoRng>(&self, index: u32, threshold: usize, rng: &mut R)
        -> Self::Dealer;

    fn commitment(&self, dealer: &Self::Dealer) -> Result<Self::Commitment, Error>;

    fn verify_commitment(&self, dealer: u32, threshold: usize, commitment: &Self::Commitment)
        -> bool;

    fn share_for(&self, dealer: &Self::Dealer, recipient: u32) -> Self::SecretShare;

    /// Check a dealt share against its dealer's commitment.
    fn verify_share(
        &self,
        commitment: &Self::Commitment,
        recipient: u32,
        share: &Self::SecretShare,
    ) -> bool;

    fn combine_secret_shares(&self, shares: &[Self::SecretShare]) -> Self::SecretShare;

    /// Election public key from the commitments of the qualified dealers.
    fn combine_public_key(&self, commitments: &[&Self::Commitment]) -> Self::PublicKey;

    fn verification_key(
        &self,
        commitments: &[&Self::Commitment],
        trustee: u32,
    ) -> Self::VerificationKey;

    /// Encrypt `selections` with proofs bound to `context` (see [`ballot_context`]).
    fn encrypt_ballot<R: RngCore + CryptoRng>(
        &self,
        public_key: &Self::PublicKey,
        shape: &BallotShape,
        context: &[u8],
        selections: &[u32],
        rng: &mut R,
    ) -> Result<(Self::Ciphertext, Self::BallotProof), Error>;

    fn verify_ballot_proof(
        &self,
        public_key: &Self::PublicKey,
        shape: &BallotShape,
        context: &[u8],
        ciphertext: &Self::Ciphertext,
        proof: &Self::BallotProof,
    ) -> bool;

    /// Homomorphic sum of ballots. An empty input yields an encryption of zero votes.
    fn aggregate<'a, I>(&self, shape: &BallotShape, ciphertexts: I) -> Self::Ciphertext
    where
        I: IntoIterator<Item = &'a Self::Ciphertext>;

    fn compute_decryption_share<R: RngCore + CryptoRng>(
        &self,
        key_share: &Self::SecretShare,
        context: &[u8],
        ciphertext: &Self::Ciphertext,
        rng: &mut R,
    ) -> Self::DecryptionShare;

    fn verify_decryption_share(
        &self,
        verification_key: &Self::VerificationKey,
        context: &[u8],
        ciphertext: &Self::Ciphertext,
        share: &Self::DecryptionShare,
    ) -> bool;

    /// Recover per-option totals from at least `threshold` verified shares.
    ///
    /// `max_total` bounds each recovered total (the number of counted ballots).
    fn combine_shares(
        &self,
        ciphertext: &Self::Ciphertext,
        shares: &[(u32, &Self::DecryptionShare)],
        max_total: u64,
    ) -> Result<Vec<u64>, Error>;
}

/// Proof context of a ballot: its election and the token it is cast with.
pub fn ballot_context(election_id: &ElectionId, token: &IdentityCommitment) -> Vec<u8> {
    let mut context = b"ballot".to_vec();
    context.extend_from_slice(election_id.as_bytes());
    context.extend_from_slice(&token.0);
    context
}

/// Proof context of a decryption share: its election, trustee and aggregate.
pub fn decryption_context(election_id: &ElectionId, trustee: u32, aggregate_digest: &[u8; 32]) -> Vec<u8> {
    let mut context = b"decryption".to_vec();
    context.extend_from_slice(election_id.as_bytes());
    context.extend_from_slice(&trustee.to_le_bytes());
    context.extend_from_slice(aggregate_digest);
    context
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_check() {
        let shape = BallotShape {
            options: 3,
            max_selections: 2,
        };
        shape.check(&[1, 0, 1]).unwrap();
        shape.check(&[0, 0, 0]).unwrap();

        for bad in &[&[1, 1, 1][..], &[1, 0][..], &[2, 0, 0][..]] {
            let err = shape.check(bad).unwrap_err();
            assert!(matches!(err, Error::InvalidSelection(_)));
            assert_eq!(err.kind(), ErrorKind::Protocol);
        }
    }

    #[test]
    fn kind_names() {
        for kind in &[SchemeKind::Dummy, SchemeKind::ElGamal] {
            assert_eq!(kind.to_string().parse::<SchemeKind>().unwrap(), *kind);
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
    }
}
