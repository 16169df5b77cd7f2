//! Sigma protocols made non-interactive with domain-separated Fiat-Shamir hashes.
//!
//! Responses follow the `z = w - c·x` convention, so a verifier recomputes the
//! prover's commitments as `z·G + c·X` and checks the challenge hash.

use curve25519_dalek::constants::{RISTRETTO_BASEPOINT_POINT, RISTRETTO_BASEPOINT_TABLE};
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use digest::Digest;
use rand::{CryptoRng, RngCore};
use sha2::Sha512;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Proof {
    pub challenge: Scalar,
    pub response: Scalar,
}

/// An exponential ElGamal ciphertext `(r·G, m·G + r·Y)`
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ElGamalCiphertext {
    pub alpha: RistrettoPoint,
    pub beta: RistrettoPoint,
}

impl ElGamalCiphertext {
    pub fn zero() -> Self {
        ElGamalCiphertext {
            alpha: RistrettoPoint::identity(),
            beta: RistrettoPoint::identity(),
        }
    }

    pub fn encrypt(public_key: &RistrettoPoint, message: u64, r: &Scalar) -> Self {
        ElGamalCiphertext {
            alpha: r * &RISTRETTO_BASEPOINT_TABLE,
            beta: &Scalar::from(message) * &RISTRETTO_BASEPOINT_TABLE + r * public_key,
        }
    }

    pub fn add(&self, other: &ElGamalCiphertext) -> Self {
        ElGamalCiphertext {
            alpha: self.alpha + other.alpha,
            beta: self.beta + other.beta,
        }
    }
}

pub(crate) struct Transcript(Sha512);

impl Transcript {
    pub fn new(domain: &'static str) -> Self {
        let mut hasher = Sha512::new();
        hasher.update(b"ballotchain/");
        hasher.update(domain.as_bytes());
        Transcript(hasher)
    }

    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.0.update(&(bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
        self
    }

    pub fn point(mut self, point: &RistrettoPoint) -> Self {
        self.0.update(point.compress().as_bytes());
        self
    }

    pub fn challenge(self) -> Scalar {
        Scalar::from_hash(self.0)
    }
}

/// Proof of knowledge of `x` with `X = x·G`, bound to `context`.
pub fn prove_dlog<R: RngCore + CryptoRng>(
    rng: &mut R,
    context: &[u8],
    x: &Scalar,
    point: &RistrettoPoint,
) -> Proof {
    let w = Scalar::random(rng);
    let commit = &w * &RISTRETTO_BASEPOINT_TABLE;
    let challenge = Transcript::new("pok")
        .bytes(context)
        .point(point)
        .point(&commit)
        .challenge();

    Proof {
        challenge,
        response: w - x * challenge,
    }
}

pub fn verify_dlog(context: &[u8], point: &RistrettoPoint, proof: &Proof) -> bool {
    let commit = &proof.response * &RISTRETTO_BASEPOINT_TABLE + proof.challenge * point;
    let challenge = Transcript::new("pok")
        .bytes(context)
        .point(point)
        .point(&commit)
        .challenge();
    challenge == proof.challenge
}

/// Proof that `log_G(X) == log_A(D)` (Chaum-Pedersen), bound to `context`.
pub fn prove_dleq<R: RngCore + CryptoRng>(
    rng: &mut R,
    context: &[u8],
    x: &Scalar,
    public: &RistrettoPoint,
    base: &RistrettoPoint,
    result: &RistrettoPoint,
) -> Proof {
    let w = Scalar::random(rng);
    let commit_g = &w * &RISTRETTO_BASEPOINT_TABLE;
    let commit_a = w * base;
    let challenge = dleq_challenge(context, public, base, result, &commit_g, &commit_a);

    Proof {
        challenge,
        response: w - x * challenge,
    }
}

pub fn verify_dleq(
    context: &[u8],
    public: &RistrettoPoint,
    base: &RistrettoPoint,
    result: &RistrettoPoint,
    proof: &Proof,
) -> bool {
    let commit_g = &proof.response * &RISTRETTO_BASEPOINT_TABLE + proof.challenge * public;
    let commit_a = proof.response * base + proof.challenge * result;
    dleq_challenge(context, public, base, result, &commit_g, &commit_a) == proof.challenge
}

fn dleq_challenge(
    context: &[u8],
    public: &RistrettoPoint,
    base: &RistrettoPoint,
    result: &RistrettoPoint,
    commit_g: &RistrettoPoint,
    commit_a: &RistrettoPoint,
) -> Scalar {
    Transcript::new("decrypt")
        .bytes(context)
        .point(public)
        .point(base)
        .point(result)
        .point(commit_g)
        .point(commit_a)
        .challenge()
}

/// Proof that a ciphertext encrypts some value in `0..=max` without revealing which.
///
/// One (challenge, response) pair per candidate value; the challenges sum to
/// the transcript hash, which also covers `context`.
pub fn prove_interval<R: RngCore + CryptoRng>(
    rng: &mut R,
    context: &[u8],
    public_key: &RistrettoPoint,
    ciphertext: &ElGamalCiphertext,
    r: &Scalar,
    value: u64,
    max: u64,
) -> Vec<Proof> {
    let mut proofs = Vec::with_capacity(max as usize + 1);
    let mut commits = Vec::with_capacity(max as usize + 1);

    for m in 0..=max {
        let challenge = Scalar::random(rng);
        let response = Scalar::random(rng);
        commits.push(interval_commit(public_key, ciphertext, m, &challenge, &response));
        proofs.push(Proof {
            challenge,
            response,
        });
    }

    // Replace the simulated branch for the real value
    let w = Scalar::random(rng);
    let real = value as usize;
    commits[real] = (&w * &RISTRETTO_BASEPOINT_TABLE, w * public_key);

    let mut challenge = interval_challenge(context, public_key, ciphertext, &commits);
    for (m, proof) in proofs.iter().enumerate() {
        if m != real {
            challenge -= proof.challenge;
        }
    }
    proofs[real] = Proof {
        challenge,
        response: w - r * challenge,
    };

    proofs
}

pub fn verify_interval(
    context: &[u8],
    public_key: &RistrettoPoint,
    ciphertext: &ElGamalCiphertext,
    max: u64,
    proofs: &[Proof],
) -> bool {
    if proofs.len() as u64 != max + 1 {
        return false;
    }

    let mut sum = Scalar::zero();
    let mut commits = Vec::with_capacity(proofs.len());
    for (m, proof) in proofs.iter().enumerate() {
        commits.push(interval_commit(
            public_key,
            ciphertext,
            m as u64,
            &proof.challenge,
            &proof.response,
        ));
        sum += proof.challenge;
    }

    interval_challenge(context, public_key, ciphertext, &commits) == sum
}

fn interval_commit(
    public_key: &RistrettoPoint,
    ciphertext: &ElGamalCiphertext,
    m: u64,
    challenge: &Scalar,
    response: &Scalar,
) -> (RistrettoPoint, RistrettoPoint) {
    let shifted = ciphertext.beta - &Scalar::from(m) * &RISTRETTO_BASEPOINT_TABLE;
    (
        response * &RISTRETTO_BASEPOINT_TABLE + challenge * ciphertext.alpha,
        response * public_key + challenge * shifted,
    )
}

fn interval_challenge(
    context: &[u8],
    public_key: &RistrettoPoint,
    ciphertext: &ElGamalCiphertext,
    commits: &[(RistrettoPoint, RistrettoPoint)],
) -> Scalar {
    let mut transcript = Transcript::new("interval")
        .bytes(context)
        .point(public_key)
        .point(&ciphertext.alpha)
        .point(&ciphertext.beta);
    for (a, b) in commits {
        transcript = transcript.point(a).point(b);
    }
    transcript.challenge()
}

/// Find `m` in `0..=max` with `point == m·G`.
pub fn bounded_dlog(point: &RistrettoPoint, max: u64) -> Option<u64> {
    let mut candidate = RistrettoPoint::identity();
    for m in 0..=max {
        if &candidate == point {
            return Some(m);
        }
        candidate += RISTRETTO_BASEPOINT_POINT;
    }
    None
}
