//! ECIES over Ristretto255, used to carry key shares between trustees on a
//! public bulletin board.
//!
//! Ciphertext layout: ephemeral public point (32 bytes) || AES-GCM nonce (12 bytes) || AES-256-GCM output.
//! Associated data binds a ciphertext to its context so it cannot be replayed
//! under a different dealer or recipient.

use crate::*;
use aes_gcm::aead::{generic_array::GenericArray, Aead, NewAead, Payload};
use aes_gcm::Aes256Gcm;
use curve25519_dalek::constants::RISTRETTO_BASEPOINT_TABLE;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use hkdf::Hkdf;
use rand::{CryptoRng, Rng, RngCore};
use sha2::Sha256;

const POINT_LENGTH: usize = 32;
const AES_IV_LENGTH: usize = 12;

type AesKey = [u8; 32];

/// Secret half of a trustee's share-transport keypair
#[derive(Clone)]
pub struct EncryptionSecret(Scalar);

/// Public half of a trustee's share-transport keypair
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionKey(#[serde(with = "serde_hex::ristretto")] RistrettoPoint);

impl EncryptionSecret {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        EncryptionSecret(Scalar::random(rng))
    }

    pub fn from_bytes_mod_order(bytes: [u8; 32]) -> Self {
        EncryptionSecret(Scalar::from_bytes_mod_order(bytes))
    }

    pub fn public(&self) -> EncryptionKey {
        EncryptionKey(&self.0 * &RISTRETTO_BASEPOINT_TABLE)
    }

    /// Decrypt a ciphertext produced by [`EncryptionKey::encrypt`] with the same associated data.
    pub fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, Error> {
        if ciphertext.len() < POINT_LENGTH + AES_IV_LENGTH {
            return Err(Error::ShareDecryption);
        }

        let ephemeral = CompressedRistretto::from_slice(&ciphertext[..POINT_LENGTH])
            .decompress()
            .ok_or(Error::ShareDecryption)?;
        let shared = ephemeral * self.0;
        let aes_key = derive_key(&ephemeral, &shared)?;

        aes_decrypt(&aes_key, &ciphertext[POINT_LENGTH..], aad)
    }
}

impl std::fmt::Debug for EncryptionSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("EncryptionSecret(..)")
    }
}

impl EncryptionKey {
    pub fn as_point(&self) -> &RistrettoPoint {
        &self.0
    }

    /// Encrypt a message so only the holder of the matching secret can read it.
    pub fn encrypt<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        msg: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let ephemeral_secret = Scalar::random(rng);
        let ephemeral = &ephemeral_secret * &RISTRETTO_BASEPOINT_TABLE;
        let shared = self.0 * ephemeral_secret;
        let aes_key = derive_key(&ephemeral, &shared)?;

        let mut nonce = [0u8; AES_IV_LENGTH];
        rng.fill(&mut nonce);
        let encrypted = aes_encrypt(&aes_key, &nonce, msg, aad)?;

        let mut cipher_text = Vec::with_capacity(POINT_LENGTH + encrypted.len());
        cipher_text.extend_from_slice(ephemeral.compress().as_bytes());
        cipher_text.extend(encrypted);
        Ok(cipher_text)
    }
}

fn derive_key(ephemeral: &RistrettoPoint, shared: &RistrettoPoint) -> Result<AesKey, Error> {
    let mut master = Vec::with_capacity(POINT_LENGTH * 2);
    master.extend_from_slice(ephemeral.compress().as_bytes());
    master.extend_from_slice(shared.compress().as_bytes());

    let h = Hkdf::<Sha256>::new(None, &master);
    let mut out = [0u8; 32];
    h.expand(b"ballotchain_share_transport", &mut out)
        .map_err(|_| Error::KeyDerivation)?;
    Ok(out)
}

fn aes_encrypt(
    key: &AesKey,
    nonce: &[u8; AES_IV_LENGTH],
    msg: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, Error> {
    let aead = Aes256Gcm::new(GenericArray::from_slice(key));
    let nonce = GenericArray::from_slice(nonce);

    let ciphertext = aead
        .encrypt(nonce, Payload { msg, aad })
        .map_err(|_| Error::KeyDerivation)?;

    let mut output = Vec::with_capacity(AES_IV_LENGTH + ciphertext.len());
    output.extend_from_slice(nonce);
    output.extend(ciphertext);
    Ok(output)
}

fn aes_decrypt(key: &AesKey, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, Error> {
    let aead = Aes256Gcm::new(GenericArray::from_slice(key));

    let nonce = GenericArray::from_slice(&ciphertext[..AES_IV_LENGTH]);
    let msg = &ciphertext[AES_IV_LENGTH..];

    aead.decrypt(nonce, Payload { msg, aad })
        .map_err(|_| Error::ShareDecryption)
}
