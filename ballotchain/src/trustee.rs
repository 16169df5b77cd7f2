use crate::*;
use ed25519_dalek::{Keypair, PublicKey, SecretKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;
use sha2::Sha256;
use std::sync::Arc;
use uuid::Uuid;

/// A trustee's root secret. Every key the trustee uses is derived from it.
#[derive(Clone)]
pub struct TrusteeSecret([u8; 32]);

impl TrusteeSecret {
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        OsRng {}.fill_bytes(&mut seed);
        TrusteeSecret(seed)
    }

    pub fn from_hex(hex: &str) -> Result<Self, Error> {
        let bytes = hex::decode(hex.trim()).map_err(|_| Error::KeyDerivation)?;
        let mut seed = [0u8; 32];
        if bytes.len() != seed.len() {
            return Err(Error::KeyDerivation);
        }
        seed.copy_from_slice(&bytes);
        Ok(TrusteeSecret(seed))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn derive(&self, info: &[u8]) -> Result<[u8; 32], Error> {
        let h = Hkdf::<Sha256>::new(None, &self.0);
        let mut out = [0u8; 32];
        h.expand(info, &mut out).map_err(|_| Error::KeyDerivation)?;
        Ok(out)
    }

    /// Key that signs this trustee's bulletin board entries
    pub fn signing_keypair(&self) -> Result<Keypair, Error> {
        let secret = SecretKey::from_bytes(&self.derive(b"ballotchain_trustee_signing")?)?;
        let public: PublicKey = (&secret).into();
        Ok(Keypair { secret, public })
    }

    /// Key that decrypts shares addressed to this trustee
    pub fn encryption_secret(&self) -> Result<EncryptionSecret, Error> {
        Ok(EncryptionSecret::from_bytes_mod_order(
            self.derive(b"ballotchain_trustee_encryption")?,
        ))
    }

    // Dealing randomness for one election, so a restarted trustee deals the same polynomial
    fn generator(&self, election_id: &ElectionId) -> Result<ChaCha20Rng, Error> {
        let mut info = b"ballotchain_trustee_generator".to_vec();
        info.extend_from_slice(election_id.as_bytes());
        Ok(ChaCha20Rng::from_seed(self.derive(&info)?))
    }

    /// Public descriptor to list in an election configuration
    pub fn descriptor(&self, name: &str) -> Result<TrusteeDescriptor, Error> {
        Ok(TrusteeDescriptor {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            signing_key: self.signing_keypair()?.public,
            encryption_key: self.encryption_secret()?.public(),
        })
    }
}

impl std::fmt::Debug for TrusteeSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("TrusteeSecret(..)")
    }
}

/// Deliberate misbehaviour, for fault drills.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrusteeFault {
    /// Deal every trustee the share meant for somebody else
    MisdirectedShares,

    /// Decrypt with a key share that does not match the verification key
    WrongKeyShare,
}

/// One trustee taking part in one election.
///
/// Trustees talk to each other and to the coordinator only through the
/// bulletin board. Each step checks the board first and does nothing when
/// it has already been done or is not yet due.
pub struct Trustee<S: VotingScheme> {
    election_id: ElectionId,
    secret: TrusteeSecret,
    encryption: EncryptionSecret,
    ledger: Ledger<S>,
    fault: Option<TrusteeFault>,
}

impl<S: VotingScheme> Trustee<S> {
    pub fn new(
        board: Arc<dyn BulletinBoard>,
        clock: Arc<dyn Clock>,
        settings: &Settings,
        election_id: ElectionId,
        secret: &TrusteeSecret,
    ) -> Result<Self, Error> {
        let client = BoardClient::new(board, secret.signing_keypair()?, settings.page_size);
        Ok(Trustee {
            election_id,
            secret: secret.clone(),
            encryption: secret.encryption_secret()?,
            ledger: Ledger::new(client, clock, settings.retry),
            fault: None,
        })
    }

    pub fn with_fault(mut self, fault: TrusteeFault) -> Self {
        self.fault = Some(fault);
        self
    }

    /// This trustee's 1-based index in the election
    pub fn index(&self) -> Result<u32, Error> {
        let election = self.ledger.election(&self.election_id)?;
        self.index_in(&election)
    }

    fn index_in(&self, election: &Election<S>) -> Result<u32, Error> {
        election
            .config
            .trustee_index(&self.ledger.client().public_key())
            .ok_or_else(|| {
                Error::InvalidConfiguration("signing key is not a trustee of this election".into())
            })
    }

    fn dealer(&self, index: u32, threshold: usize) -> Result<S::Dealer, Error> {
        let mut rng = self.secret.generator(&self.election_id)?;
        Ok(self.ledger.scheme().dealer(index, threshold, &mut rng))
    }

    /// Perform whichever steps are currently due. Returns true if anything was published.
    pub fn participate(&self) -> Result<bool, Error> {
        let mut published = self.publish_commitment()?;
        published |= self.publish_shares()?;
        published |= self.verify_shares()?;
        published |= self.publish_decryption_share()?;
        Ok(published)
    }

    /// Step 1: commit to the dealt secret.
    pub fn publish_commitment(&self) -> Result<bool, Error> {
        let committed = self.ledger.transact(&self.election_id, |election, _| {
            let index = self.index_in(election)?;
            if election.state != ElectionState::KeyCeremonyPending
                || election.ceremony.committed.is_some()
                || election.ceremony.commitments.contains_key(&index)
            {
                return Ok(Decision::Skip(()));
            }

            let dealer = self.dealer(index, election.config.threshold())?;
            let payload = KeyCommitmentPayload::<S> {
                trustee: index,
                commitment: self.ledger.scheme().commitment(&dealer)?,
            };
            Decision::append(EntryType::KeyCommitment, &payload, ())
        })?;
        Ok(committed.tip.is_some())
    }

    /// Step 3: deal an encrypted share to every trustee with an accepted commitment.
    pub fn publish_shares(&self) -> Result<bool, Error> {
        let scheme = self.ledger.scheme();
        let committed = self.ledger.transact(&self.election_id, |election, _| {
            let index = self.index_in(election)?;
            let members = match &election.ceremony.committed {
                Some(members) => members,
                None => return Ok(Decision::Skip(())),
            };
            if election.state != ElectionState::KeyCeremonyPending
                || !members.contains(&index)
                || election.ceremony.shares.contains_key(&index)
            {
                return Ok(Decision::Skip(()));
            }

            let dealer = self.dealer(index, election.config.threshold())?;
            let mut csprng = OsRng {};
            let mut shares = Vec::with_capacity(members.len());
            for recipient in members.iter().copied() {
                let descriptor = election
                    .config
                    .trustee(recipient)
                    .ok_or(Error::UnknownTrustee(recipient))?;
                let dealt_for = match self.fault {
                    Some(TrusteeFault::MisdirectedShares) => recipient + 1,
                    _ => recipient,
                };
                let share = serde_cbor::to_vec(&scheme.share_for(&dealer, dealt_for))?;
                let ciphertext = descriptor.encryption_key.encrypt(
                    &mut csprng,
                    &share,
                    &share_context(&self.election_id, index, recipient),
                )?;
                shares.push(EncryptedShare {
                    recipient,
                    ciphertext,
                });
            }

            let payload = KeySharesPayload {
                dealer: index,
                shares,
            };
            Decision::append(EntryType::KeyShares, &payload, ())
        })?;
        Ok(committed.tip.is_some())
    }

    /// Step 4: check every share addressed to this trustee and publish complaints.
    pub fn verify_shares(&self) -> Result<bool, Error> {
        let committed = self.ledger.transact(&self.election_id, |election, _| {
            let index = self.index_in(election)?;
            let members = match &election.ceremony.committed {
                Some(members) => members,
                None => return Ok(Decision::Skip(())),
            };
            if election.state != ElectionState::KeyCeremonyPending
                || !members.contains(&index)
                || election.ceremony.verifications.contains_key(&index)
                || members.iter().any(|m| !election.ceremony.shares.contains_key(m))
            {
                return Ok(Decision::Skip(()));
            }

            let mut complaints = vec![];
            for dealer in members.iter().copied() {
                if self.received_share(election, dealer, index).is_err() {
                    warn!(
                        "election {}: {}",
                        self.election_id,
                        Error::InvalidShareProof { dealer }
                    );
                    complaints.push(dealer);
                }
            }

            let payload = ShareVerificationPayload {
                trustee: index,
                complaints,
            };
            Decision::append(EntryType::ShareVerification, &payload, ())
        })?;
        Ok(committed.tip.is_some())
    }

    /// Decrypt and check the share `dealer` addressed to `recipient`.
    fn received_share(
        &self,
        election: &Election<S>,
        dealer: u32,
        recipient: u32,
    ) -> Result<S::SecretShare, Error> {
        let scheme = self.ledger.scheme();
        let missing = || Error::MissingKeyShare(dealer);

        let commitment = election.ceremony.commitments.get(&dealer).ok_or_else(missing)?;
        let encrypted = election
            .ceremony
            .shares
            .get(&dealer)
            .and_then(|shares| shares.iter().find(|s| s.recipient == recipient))
            .ok_or_else(missing)?;

        let plaintext = self.encryption.decrypt(
            &encrypted.ciphertext,
            &share_context(&self.election_id, dealer, recipient),
        )?;
        let share: S::SecretShare = serde_cbor::from_slice(&plaintext)?;

        if !scheme.verify_share(commitment, recipient, &share) {
            return Err(Error::InvalidShareProof { dealer });
        }
        Ok(share)
    }

    /// This trustee's share of the election secret: the sum of the shares dealt
    /// to it by every qualified trustee.
    pub fn key_share(&self) -> Result<S::SecretShare, Error> {
        let election = self.ledger.election(&self.election_id)?;
        self.key_share_in(&election)
    }

    fn key_share_in(&self, election: &Election<S>) -> Result<S::SecretShare, Error> {
        let index = self.index_in(election)?;
        let outcome = election
            .ceremony
            .outcome
            .as_ref()
            .ok_or(Error::CeremonyIncomplete)?;
        if !outcome.qualified.contains(&index) {
            return Err(Error::TrusteeNotQualified(index));
        }

        let mut shares = Vec::with_capacity(outcome.qualified.len());
        for dealer in outcome.qualified.iter().copied() {
            shares.push(
                self.received_share(election, dealer, index)
                    .map_err(|_| Error::MissingKeyShare(dealer))?,
            );
        }
        Ok(self.ledger.scheme().combine_secret_shares(&shares))
    }

    /// After voting closes: publish a decryption share of the aggregate of all valid ballots.
    pub fn publish_decryption_share(&self) -> Result<bool, Error> {
        let scheme = self.ledger.scheme();
        let committed = self.ledger.transact(&self.election_id, |election, _| {
            let index = self.index_in(election)?;
            if !matches!(
                election.state,
                ElectionState::VotingClosed | ElectionState::Tallying
            ) || !election.is_qualified(index)
                || election.decryption_shares.contains_key(&index)
                || election.tally.is_some()
            {
                return Ok(Decision::Skip(()));
            }

            let key_share = match self.fault {
                Some(TrusteeFault::WrongKeyShare) => {
                    let wrong = self.received_share(election, index, index)?;
                    scheme.combine_secret_shares(&[wrong.clone(), wrong])
                }
                _ => self.key_share_in(election)?,
            };

            let aggregate = AggregateView::compute(scheme, election)?;
            let context = decryption_context(&self.election_id, index, &aggregate.digest);
            let mut csprng = OsRng {};
            let payload = DecryptionSharePayload::<S> {
                trustee: index,
                aggregate_digest: aggregate.digest,
                share: scheme.compute_decryption_share(
                    &key_share,
                    &context,
                    &aggregate.ciphertext,
                    &mut csprng,
                ),
            };
            Decision::append(EntryType::DecryptionShare, &payload, ())
        })?;

        if committed.tip.is_some() {
            info!("election {}: decryption share published", self.election_id);
        }
        Ok(committed.tip.is_some())
    }
}

/// Associated data binding a share ciphertext to its election, dealer and recipient
fn share_context(election_id: &ElectionId, dealer: u32, recipient: u32) -> Vec<u8> {
    let mut context = election_id.as_bytes().to_vec();
    context.extend_from_slice(&dealer.to_le_bytes());
    context.extend_from_slice(&recipient.to_le_bytes());
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    #[test]
    fn derived_keys_are_stable() {
        let secret = TrusteeSecret::generate();
        let restored = TrusteeSecret::from_hex(&secret.to_hex()).unwrap();

        assert_eq!(
            secret.signing_keypair().unwrap().public,
            restored.signing_keypair().unwrap().public
        );
        assert_eq!(
            secret.encryption_secret().unwrap().public(),
            restored.encryption_secret().unwrap().public()
        );

        let id = ElectionId::new();
        let mut a = secret.generator(&id).unwrap();
        let mut b = restored.generator(&id).unwrap();
        assert_eq!(a.next_u64(), b.next_u64());
        let mut c = secret.generator(&ElectionId::new()).unwrap();
        assert_ne!(secret.generator(&id).unwrap().next_u64(), c.next_u64());

        assert!(TrusteeSecret::from_hex("abcd").is_err());
    }

    #[test]
    fn restarted_trustee_republishes_nothing() {
        let fixture = Fixture::new(SchemeKind::ElGamal, 3, 2);
        let engine = fixture.elgamal_engine();
        let id = fixture.election_id();
        fixture.run_ceremony(&engine);

        // A fresh process for trustee 2 recomputes its key share from the board alone
        let restarted: Trustee<ElGamalScheme> = fixture.trustee(2);
        assert_eq!(restarted.index().unwrap(), 2);
        assert!(!restarted.participate().unwrap());
        let key_share = restarted.key_share().unwrap();

        let election = engine.ledger().election(&id).unwrap();
        let commitments = election.ceremony.qualified_commitments();
        let vk = ElGamalScheme.verification_key(&commitments, 2);
        assert_eq!(
            &key_share.0 * &curve25519_dalek::constants::RISTRETTO_BASEPOINT_TABLE,
            vk.0
        );
    }

    #[test]
    fn steps_wait_for_their_phase() {
        let fixture = Fixture::new(SchemeKind::Dummy, 2, 2);
        let engine = fixture.dummy_engine();
        engine.create_election(fixture.config.clone()).unwrap();

        let trustee: Trustee<DummyScheme> = fixture.trustee(1);
        // Configured: nothing is due yet
        assert!(!trustee.participate().unwrap());
        assert!(matches!(trustee.key_share(), Err(Error::CeremonyIncomplete)));

        engine.begin_key_ceremony(&fixture.election_id()).unwrap();
        assert!(trustee.publish_commitment().unwrap());
        assert!(!trustee.publish_commitment().unwrap());
        // Commitments are not closed yet
        assert!(!trustee.publish_shares().unwrap());
    }
}
