use super::zkp::{self, ElGamalCiphertext, Proof};
use crate::*;
use curve25519_dalek::constants::RISTRETTO_BASEPOINT_TABLE;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand::{CryptoRng, RngCore};

/// Threshold exponential ElGamal over Ristretto255.
///
/// Keys come from a Joint-Feldman distributed key generation: every trustee
/// deals a random polynomial, publishes Feldman commitments to its
/// coefficients with a proof of knowledge of the constant term, and the
/// election key is the sum of the qualified dealers' constant terms.
#[derive(Default, Clone, Copy, Debug, PartialEq)]
pub struct ElGamalScheme;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ElGamalPublicKey(pub RistrettoPoint);

pub struct ElGamalDealer {
    index: u32,
    coefficients: Vec<Scalar>,
}

impl ElGamalDealer {
    fn eval(&self, x: u32) -> Scalar {
        let x = Scalar::from(x as u64);
        self.coefficients
            .iter()
            .rev()
            .fold(Scalar::zero(), |acc, c| acc * x + c)
    }
}

/// Feldman commitments to a dealer's polynomial
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FeldmanCommitment {
    pub coefficients: Vec<RistrettoPoint>,
    pub proof: Proof,
}

impl FeldmanCommitment {
    /// Public image of the dealt polynomial at `x`
    fn eval(&self, x: u32) -> RistrettoPoint {
        let x = Scalar::from(x as u64);
        self.coefficients
            .iter()
            .rev()
            .fold(RistrettoPoint::identity(), |acc, c| acc * x + c)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ScalarShare(pub Scalar);

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct VerificationPoint(pub RistrettoPoint);

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EncryptedBallot {
    pub selections: Vec<ElGamalCiphertext>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BallotValidityProof {
    /// Each selection encrypts 0 or 1
    pub selections: Vec<Vec<Proof>>,

    /// The sum of selections lies in `0..=max_selections`
    pub total: Vec<Proof>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PartialDecryption {
    /// `x_j·alpha` for every option
    pub factors: Vec<RistrettoPoint>,
    pub proofs: Vec<Proof>,
}

fn pok_context(dealer: u32) -> Vec<u8> {
    let mut context = b"dealer".to_vec();
    context.extend_from_slice(&dealer.to_le_bytes());
    context
}

/// Lagrange coefficient at zero for `index` over `indices`
fn lagrange_at_zero(index: u32, indices: &[u32]) -> Result<Scalar, Error> {
    let mut numerator = Scalar::one();
    let mut denominator = Scalar::one();
    let x_i = Scalar::from(index as u64);

    for other in indices.iter().filter(|j| **j != index) {
        let x_j = Scalar::from(*other as u64);
        numerator *= x_j;
        denominator *= x_j - x_i;
    }

    if denominator == Scalar::zero() {
        return Err(Error::ShareCombination("duplicate trustee index".into()));
    }
    Ok(numerator * denominator.invert())
}

impl VotingScheme for ElGamalScheme {
    const KIND: SchemeKind = SchemeKind::ElGamal;

    type PublicKey = ElGamalPublicKey;
    type Dealer = ElGamalDealer;
    type Commitment = FeldmanCommitment;
    type SecretShare = ScalarShare;
    type VerificationKey = VerificationPoint;
    type Ciphertext = EncryptedBallot;
    type BallotProof = BallotValidityProof;
    type DecryptionShare = PartialDecryption;

    fn dealer<R: RngCore + CryptoRng>(&self, index: u32, threshold: usize, rng: &mut R) -> ElGamalDealer {
        ElGamalDealer {
            index,
            coefficients: (0..threshold.max(1)).map(|_| Scalar::random(rng)).collect(),
        }
    }

    fn commitment(&self, dealer: &ElGamalDealer) -> Result<FeldmanCommitment, Error> {
        let coefficients: Vec<RistrettoPoint> = dealer
            .coefficients
            .iter()
            .map(|a| a * &RISTRETTO_BASEPOINT_TABLE)
            .collect();

        // Deterministic nonce so a restarted dealer republishes the same proof
        let (secret, constant) = match (dealer.coefficients.first(), coefficients.first()) {
            (Some(secret), Some(constant)) => (secret, constant),
            _ => return Err(Error::KeyDerivation),
        };
        let mut rng = nonce_rng(secret, b"feldman")?;
        let proof = zkp::prove_dlog(&mut rng, &pok_context(dealer.index), secret, constant);

        Ok(FeldmanCommitment {
            coefficients,
            proof,
        })
    }

    fn verify_commitment(&self, dealer: u32, threshold: usize, commitment: &FeldmanCommitment) -> bool {
        match commitment.coefficients.first() {
            Some(constant) if commitment.coefficients.len() == threshold => {
                zkp::verify_dlog(&pok_context(dealer), constant, &commitment.proof)
            }
            _ => false,
        }
    }

    fn share_for(&self, dealer: &ElGamalDealer, recipient: u32) -> ScalarShare {
        ScalarShare(dealer.eval(recipient))
    }

    fn verify_share(&self, commitment: &FeldmanCommitment, recipient: u32, share: &ScalarShare) -> bool {
        recipient != 0
            && !commitment.coefficients.is_empty()
            && &share.0 * &RISTRETTO_BASEPOINT_TABLE == commitment.eval(recipient)
    }

    fn combine_secret_shares(&self, shares: &[ScalarShare]) -> ScalarShare {
        ScalarShare(shares.iter().map(|s| s.0).sum())
    }

    fn combine_public_key(&self, commitments: &[&FeldmanCommitment]) -> ElGamalPublicKey {
        ElGamalPublicKey(
            commitments
                .iter()
                .filter_map(|c| c.coefficients.first())
                .sum(),
        )
    }

    fn verification_key(&self, commitments: &[&FeldmanCommitment], trustee: u32) -> VerificationPoint {
        VerificationPoint(commitments.iter().map(|c| c.eval(trustee)).sum())
    }

    fn encrypt_ballot<R: RngCore + CryptoRng>(
        &self,
        public_key: &ElGamalPublicKey,
        shape: &BallotShape,
        context: &[u8],
        selections: &[u32],
        rng: &mut R,
    ) -> Result<(EncryptedBallot, BallotValidityProof), Error> {
        shape.check(selections)?;
        let y = &public_key.0;

        let mut ciphertexts = Vec::with_capacity(selections.len());
        let mut proofs = Vec::with_capacity(selections.len());
        let mut total_r = Scalar::zero();
        let mut total = ElGamalCiphertext::zero();

        for selection in selections {
            let r = Scalar::random(rng);
            let ct = ElGamalCiphertext::encrypt(y, *selection as u64, &r);
            proofs.push(zkp::prove_interval(rng, context, y, &ct, &r, *selection as u64, 1));

            total_r += r;
            total = total.add(&ct);
            ciphertexts.push(ct);
        }

        let selected: u32 = selections.iter().sum();
        let total_proof = zkp::prove_interval(
            rng,
            context,
            y,
            &total,
            &total_r,
            selected as u64,
            shape.max_selections as u64,
        );

        Ok((
            EncryptedBallot {
                selections: ciphertexts,
            },
            BallotValidityProof {
                selections: proofs,
                total: total_proof,
            },
        ))
    }

    fn verify_ballot_proof(
        &self,
        public_key: &ElGamalPublicKey,
        shape: &BallotShape,
        context: &[u8],
        ciphertext: &EncryptedBallot,
        proof: &BallotValidityProof,
    ) -> bool {
        let y = &public_key.0;
        if ciphertext.selections.len() != shape.options || proof.selections.len() != shape.options {
            return false;
        }

        let each = ciphertext
            .selections
            .iter()
            .zip(proof.selections.iter())
            .all(|(ct, p)| zkp::verify_interval(context, y, ct, 1, p));
        if !each {
            return false;
        }

        let total = ciphertext
            .selections
            .iter()
            .fold(ElGamalCiphertext::zero(), |acc, ct| acc.add(ct));
        zkp::verify_interval(context, y, &total, shape.max_selections as u64, &proof.total)
    }

    fn aggregate<'a, I>(&self, shape: &BallotShape, ciphertexts: I) -> EncryptedBallot
    where
        I: IntoIterator<Item = &'a EncryptedBallot>,
    {
        let mut sum = vec![ElGamalCiphertext::zero(); shape.options];
        for ballot in ciphertexts {
            for (total, ct) in sum.iter_mut().zip(ballot.selections.iter()) {
                *total = total.add(ct);
            }
        }
        EncryptedBallot { selections: sum }
    }

    fn compute_decryption_share<R: RngCore + CryptoRng>(
        &self,
        key_share: &ScalarShare,
        context: &[u8],
        ciphertext: &EncryptedBallot,
        rng: &mut R,
    ) -> PartialDecryption {
        let x = &key_share.0;
        let public = x * &RISTRETTO_BASEPOINT_TABLE;

        let mut factors = Vec::with_capacity(ciphertext.selections.len());
        let mut proofs = Vec::with_capacity(ciphertext.selections.len());
        for ct in ciphertext.selections.iter() {
            let factor = x * ct.alpha;
            proofs.push(zkp::prove_dleq(rng, context, x, &public, &ct.alpha, &factor));
            factors.push(factor);
        }

        PartialDecryption { factors, proofs }
    }

    fn verify_decryption_share(
        &self,
        verification_key: &VerificationPoint,
        context: &[u8],
        ciphertext: &EncryptedBallot,
        share: &PartialDecryption,
    ) -> bool {
        let n = ciphertext.selections.len();
        if share.factors.len() != n || share.proofs.len() != n {
            return false;
        }

        ciphertext
            .selections
            .iter()
            .zip(share.factors.iter().zip(share.proofs.iter()))
            .all(|(ct, (factor, proof))| {
                zkp::verify_dleq(context, &verification_key.0, &ct.alpha, factor, proof)
            })
    }

    fn combine_shares(
        &self,
        ciphertext: &EncryptedBallot,
        shares: &[(u32, &PartialDecryption)],
        max_total: u64,
    ) -> Result<Vec<u64>, Error> {
        if shares.is_empty() {
            return Err(Error::ShareCombination("no decryption shares".into()));
        }
        let n = ciphertext.selections.len();
        if shares.iter().any(|(_, s)| s.factors.len() != n) {
            return Err(Error::ShareCombination(
                "decryption share has the wrong number of options".into(),
            ));
        }

        let indices: Vec<u32> = shares.iter().map(|(i, _)| *i).collect();
        let mut lambdas = Vec::with_capacity(indices.len());
        for index in indices.iter() {
            lambdas.push(lagrange_at_zero(*index, &indices)?);
        }

        let mut totals = Vec::with_capacity(n);
        for (option, ct) in ciphertext.selections.iter().enumerate() {
            let blinding: RistrettoPoint = shares
                .iter()
                .zip(lambdas.iter())
                .map(|((_, share), lambda)| lambda * share.factors[option])
                .sum();
            let plain = ct.beta - blinding;
            totals.push(zkp::bounded_dlog(&plain, max_total).ok_or(Error::DiscreteLogOutOfRange)?);
        }

        Ok(totals)
    }
}

fn nonce_rng(secret: &Scalar, label: &[u8]) -> Result<rand_chacha::ChaCha20Rng, Error> {
    use hkdf::Hkdf;
    use rand_chacha::rand_core::SeedableRng;
    use sha2::Sha256;

    let h = Hkdf::<Sha256>::new(Some(label), secret.as_bytes());
    let mut seed = [0u8; 32];
    h.expand(b"ballotchain_proof_nonce", &mut seed)
        .map_err(|_| Error::KeyDerivation)?;
    Ok(rand_chacha::ChaCha20Rng::from_seed(seed))
}
