use crate::*;
use rand::{CryptoRng, RngCore};

/// Plaintext pass-through scheme for deterministic tests and simulations.
///
/// Ballots are stored in the clear and every proof is trivially true. Share
/// and decryption-share checks are still real enough that a trustee dealing
/// to the wrong recipient, or decrypting with the wrong key share, is caught.
#[derive(Default, Clone, Copy, Debug, PartialEq)]
pub struct DummyScheme;

pub struct DummyDealer {
    value: u64,
    degree: u32,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct DummyCommitment {
    pub value: u64,
    pub degree: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DummyDecryptionShare {
    pub key_share: u64,
    pub values: Vec<u64>,
}

impl VotingScheme for DummyScheme {
    const KIND: SchemeKind = SchemeKind::Dummy;

    type PublicKey = u64;
    type Dealer = DummyDealer;
    type Commitment = DummyCommitment;
    type SecretShare = u64;
    type VerificationKey = u64;
    type Ciphertext = Vec<u64>;
    type BallotProof = ();
    type DecryptionShare = DummyDecryptionShare;

    fn dealer<R: RngCore + CryptoRng>(&self, _index: u32, threshold: usize, rng: &mut R) -> DummyDealer {
        DummyDealer {
            value: rng.next_u64() >> 16,
            degree: threshold.saturating_sub(1) as u32,
        }
    }

    fn commitment(&self, dealer: &DummyDealer) -> Result<DummyCommitment, Error> {
        Ok(DummyCommitment {
            value: dealer.value,
            degree: dealer.degree,
        })
    }

    fn verify_commitment(&self, _dealer: u32, threshold: usize, commitment: &DummyCommitment) -> bool {
        commitment.degree as usize + 1 == threshold
    }

    fn share_for(&self, dealer: &DummyDealer, recipient: u32) -> u64 {
        dealer.value.wrapping_add(recipient as u64)
    }

    fn verify_share(&self, commitment: &DummyCommitment, recipient: u32, share: &u64) -> bool {
        *share == commitment.value.wrapping_add(recipient as u64)
    }

    fn combine_secret_shares(&self, shares: &[u64]) -> u64 {
        shares.iter().fold(0u64, |acc, s| acc.wrapping_add(*s))
    }

    fn combine_public_key(&self, commitments: &[&DummyCommitment]) -> u64 {
        commitments
            .iter()
            .fold(0u64, |acc, c| acc.wrapping_add(c.value))
    }

    fn verification_key(&self, commitments: &[&DummyCommitment], trustee: u32) -> u64 {
        commitments
            .iter()
            .fold(0u64, |acc, c| acc.wrapping_add(c.value.wrapping_add(trustee as u64)))
    }

    fn encrypt_ballot<R: RngCore + CryptoRng>(
        &self,
        _public_key: &u64,
        shape: &BallotShape,
        _context: &[u8],
        selections: &[u32],
        _rng: &mut R,
    ) -> Result<(Vec<u64>, ()), Error> {
        shape.check(selections)?;
        Ok((selections.iter().map(|s| *s as u64).collect(), ()))
    }

    fn verify_ballot_proof(
        &self,
        _public_key: &u64,
        shape: &BallotShape,
        _context: &[u8],
        ciphertext: &Vec<u64>,
        _proof: &(),
    ) -> bool {
        if ciphertext.iter().any(|v| *v > 1) {
            return false;
        }
        let selections: Vec<u32> = ciphertext.iter().map(|v| *v as u32).collect();
        shape.check(&selections).is_ok()
    }

    fn aggregate<'a, I>(&self, shape: &BallotShape, ciphertexts: I) -> Vec<u64>
    where
        I: IntoIterator<Item = &'a Vec<u64>>,
    {
        let mut sum = vec![0u64; shape.options];
        for ciphertext in ciphertexts {
            for (total, value) in sum.iter_mut().zip(ciphertext.iter()) {
                *total += value;
            }
        }
        sum
    }

    fn compute_decryption_share<R: RngCore + CryptoRng>(
        &self,
        key_share: &u64,
        _context: &[u8],
        ciphertext: &Vec<u64>,
        _rng: &mut R,
    ) -> DummyDecryptionShare {
        DummyDecryptionShare {
            key_share: *key_share,
            values: ciphertext.clone(),
        }
    }

    fn verify_decryption_share(
        &self,
        verification_key: &u64,
        _context: &[u8],
        ciphertext: &Vec<u64>,
        share: &DummyDecryptionShare,
    ) -> bool {
        share.key_share == *verification_key && &share.values == ciphertext
    }

    fn combine_shares(
        &self,
        ciphertext: &Vec<u64>,
        shares: &[(u32, &DummyDecryptionShare)],
        max_total: u64,
    ) -> Result<Vec<u64>, Error> {
        let (_, first) = shares
            .first()
            .ok_or_else(|| Error::ShareCombination("no decryption shares".into()))?;

        if shares.iter().any(|(_, share)| share.values != first.values) {
            return Err(Error::ShareCombination(
                "decryption shares disagree".into(),
            ));
        }
        if &first.values != ciphertext {
            return Err(Error::ShareCombination(
                "decryption shares do not match the aggregate".into(),
            ));
        }
        if first.values.iter().any(|v| *v > max_total) {
            return Err(Error::DiscreteLogOutOfRange);
        }

        Ok(first.values.clone())
    }
}
