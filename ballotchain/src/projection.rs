//! In-memory view of an election, derived entirely by replaying its board entries.

use crate::*;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};

/// Ceremony messages seen so far in the current key ceremony
#[derive(Clone, Debug)]
pub struct CeremonyRecord<S: VotingScheme> {
    pub commitments: BTreeMap<u32, S::Commitment>,

    /// Dealers whose commitments were accepted, once commitments are closed
    pub committed: Option<Vec<u32>>,

    /// Encrypted shares by dealer
    pub shares: BTreeMap<u32, Vec<EncryptedShare>>,

    /// Complaints (dealer indices) by verifying trustee
    pub verifications: BTreeMap<u32, Vec<u32>>,

    pub outcome: Option<CeremonyOutcome<S>>,
}

impl<S: VotingScheme> Default for CeremonyRecord<S> {
    fn default() -> Self {
        CeremonyRecord {
            commitments: BTreeMap::new(),
            committed: None,
            shares: BTreeMap::new(),
            verifications: BTreeMap::new(),
            outcome: None,
        }
    }
}

impl<S: VotingScheme> CeremonyRecord<S> {
    /// Commitments of the qualified dealers, once the ceremony is complete
    pub fn qualified_commitments(&self) -> Vec<&S::Commitment> {
        match &self.outcome {
            Some(outcome) => outcome
                .qualified
                .iter()
                .filter_map(|i| self.commitments.get(i))
                .collect(),
            None => vec![],
        }
    }
}

#[derive(Clone, Debug)]
pub struct BallotRecord<S: VotingScheme> {
    pub sequence: u64,
    pub ballot: BallotPayload<S>,
}

#[derive(Clone, Debug)]
pub struct Election<S: VotingScheme> {
    pub config: ElectionConfig,
    pub state: ElectionState,
    pub suspended_from: Option<ElectionState>,
    pub tip: ChainTip,

    /// Every state entered, in order
    pub transitions: Vec<ElectionState>,

    pub ceremony: CeremonyRecord<S>,
    pub ballots: Vec<BallotRecord<S>>,

    /// Identity commitment to the sequence number of the ballot that consumed it
    pub spent: HashMap<IdentityCommitment, u64>,

    pub rejected_casts: Vec<(u64, RejectedCastPayload)>,
    pub rejected_ballots: BTreeMap<u64, String>,
    pub decryption_shares: BTreeMap<u32, DecryptionSharePayload<S>>,
    pub tally: Option<(u64, Tally)>,

    /// Entries skipped during replay, with the reason
    pub ignored: Vec<(u64, String)>,
}

impl<S: VotingScheme> Election<S> {
    /// Start a projection from an election's genesis entry.
    pub fn from_genesis(genesis: &Entry) -> Result<Self, Error> {
        if genesis.sequence_number != 0 || genesis.entry_type != EntryType::ElectionCreated {
            return Err(Error::ChainHashMismatch {
                sequence: genesis.sequence_number,
            });
        }

        let config: ElectionConfig = serde_cbor::from_slice(&genesis.payload)?;
        if config.id != genesis.election_id {
            return Err(Error::ElectionMismatch);
        }
        if genesis.author() != &config.authority {
            return Err(Error::AuthorityMismatch);
        }
        if config.scheme != S::KIND {
            return Err(Error::SchemeMismatch {
                expected: S::KIND,
                found: config.scheme,
            });
        }
        config.validate()?;

        Ok(Election {
            config,
            state: ElectionState::Configured,
            suspended_from: None,
            tip: ChainTip::of(genesis)?,
            transitions: vec![],
            ceremony: CeremonyRecord::default(),
            ballots: vec![],
            spent: HashMap::new(),
            rejected_casts: vec![],
            rejected_ballots: BTreeMap::new(),
            decryption_shares: BTreeMap::new(),
            tally: None,
            ignored: vec![],
        })
    }

    /// Verify a complete chain and replay it from genesis.
    pub fn replay(entries: &[Entry]) -> Result<Self, Error> {
        verify_chain(entries)?;
        let genesis = entries.first().ok_or(Error::ChainHashMismatch { sequence: 0 })?;

        let mut election = Self::from_genesis(genesis)?;
        for entry in entries.iter().skip(1) {
            election.apply(entry)?;
        }
        Ok(election)
    }

    pub fn id(&self) -> ElectionId {
        self.config.id
    }

    pub fn public_key(&self) -> Option<&S::PublicKey> {
        self.ceremony.outcome.as_ref().map(|o| &o.public_key)
    }

    pub fn is_qualified(&self, trustee: u32) -> bool {
        self.ceremony
            .outcome
            .as_ref()
            .map(|o| o.qualified.contains(&trustee))
            .unwrap_or(false)
    }

    /// Apply the next entry of an already-verified chain.
    ///
    /// Entries from unauthorized signers, or that make no sense in the current
    /// state, are recorded in `ignored` and otherwise have no effect.
    pub fn apply(&mut self, entry: &Entry) -> Result<(), Error> {
        self.tip = ChainTip::of(entry)?;
        let sequence = entry.sequence_number;

        if entry.election_id != self.config.id {
            self.ignore(sequence, "entry belongs to another election".into());
            return Ok(());
        }

        let author = if entry.entry_type.is_trustee_authored() {
            match self.config.trustee_index(entry.author()) {
                Some(index) => Some(index),
                None => {
                    self.ignore(sequence, format!("{} not signed by a trustee", entry.entry_type));
                    return Ok(());
                }
            }
        } else {
            if entry.author() != &self.config.authority {
                self.ignore(
                    sequence,
                    format!("{} not signed by the election authority", entry.entry_type),
                );
                return Ok(());
            }
            None
        };

        if let Err(reason) = self.apply_payload(entry, author) {
            self.ignore(sequence, reason);
        }
        Ok(())
    }

    fn apply_payload(&mut self, entry: &Entry, author: Option<u32>) -> Result<(), String> {
        use ElectionState::*;

        let sequence = entry.sequence_number;
        let author = author.unwrap_or(0);

        match entry.entry_type {
            EntryType::ElectionCreated => Err("duplicate genesis entry".into()),

            EntryType::StateTransition => {
                let payload: TransitionPayload = decode(entry)?;
                if payload.from != self.state {
                    return Err(format!(
                        "transition from {} but election is {}",
                        payload.from, self.state
                    ));
                }
                if !self.state.allows(payload.to, self.suspended_from) {
                    return Err(format!("illegal transition to {}", payload.to));
                }

                match payload.to {
                    Suspended => self.suspended_from = Some(self.state),
                    _ => self.suspended_from = None,
                }
                if payload.to == KeyCeremonyPending {
                    self.ceremony = CeremonyRecord::default();
                }
                self.state = payload.to;
                self.transitions.push(payload.to);
                Ok(())
            }

            EntryType::KeyCommitment => {
                let payload: KeyCommitmentPayload<S> = decode(entry)?;
                self.expect_state(KeyCeremonyPending)?;
                expect_author(payload.trustee, author)?;
                if self.ceremony.committed.is_some() {
                    return Err("commitments are already closed".into());
                }
                if self.ceremony.commitments.contains_key(&author) {
                    return Err(format!("trustee {} already committed", author));
                }
                self.ceremony.commitments.insert(author, payload.commitment);
                Ok(())
            }

            EntryType::CommitmentsClosed => {
                let payload: CommitmentsClosedPayload = decode(entry)?;
                self.expect_state(KeyCeremonyPending)?;
                if self.ceremony.committed.is_some() {
                    return Err("commitments are already closed".into());
                }
                if payload
                    .committed
                    .iter()
                    .any(|i| !self.ceremony.commitments.contains_key(i))
                {
                    return Err("closing over a missing commitment".into());
                }
                self.ceremony.committed = Some(payload.committed);
                Ok(())
            }

            EntryType::KeyShares => {
                let payload: KeySharesPayload = decode(entry)?;
                self.expect_state(KeyCeremonyPending)?;
                expect_author(payload.dealer, author)?;
                if !self.ceremony_member(author) {
                    return Err(format!("trustee {} has no accepted commitment", author));
                }
                if self.ceremony.shares.contains_key(&author) {
                    return Err(format!("trustee {} already dealt its shares", author));
                }
                self.ceremony.shares.insert(author, payload.shares);
                Ok(())
            }

            EntryType::ShareVerification => {
                let payload: ShareVerificationPayload = decode(entry)?;
                self.expect_state(KeyCeremonyPending)?;
                expect_author(payload.trustee, author)?;
                if !self.ceremony_member(author) {
                    return Err(format!("trustee {} has no accepted commitment", author));
                }
                if self.ceremony.verifications.contains_key(&author) {
                    return Err(format!("trustee {} already verified", author));
                }
                self.ceremony.verifications.insert(author, payload.complaints);
                Ok(())
            }

            EntryType::CeremonyComplete => {
                let payload: CeremonyOutcome<S> = decode(entry)?;
                self.expect_state(KeyCeremonyPending)?;
                if self.ceremony.outcome.is_some() {
                    return Err("ceremony already complete".into());
                }
                if !payload.qualified.iter().all(|i| self.ceremony_member(*i)) {
                    return Err("qualified set names an uncommitted trustee".into());
                }
                self.ceremony.outcome = Some(payload);
                Ok(())
            }

            EntryType::Ballot => {
                let payload: BallotPayload<S> = decode(entry)?;
                self.expect_state(VotingOpen)?;
                if let Some(prior) = self.spent.get(&payload.token) {
                    return Err(format!("token already consumed by entry {}", prior));
                }
                self.spent.insert(payload.token, sequence);
                self.ballots.push(BallotRecord {
                    sequence,
                    ballot: payload,
                });
                Ok(())
            }

            EntryType::RejectedCast => {
                let payload: RejectedCastPayload = decode(entry)?;
                self.rejected_casts.push((sequence, payload));
                Ok(())
            }

            EntryType::RejectedBallot => {
                let payload: RejectedBallotPayload = decode(entry)?;
                self.expect_state(Tallying)?;
                if !self.ballots.iter().any(|b| b.sequence == payload.sequence) {
                    return Err(format!("no ballot at entry {}", payload.sequence));
                }
                self.rejected_ballots
                    .entry(payload.sequence)
                    .or_insert(payload.reason);
                Ok(())
            }

            EntryType::DecryptionShare => {
                let payload: DecryptionSharePayload<S> = decode(entry)?;
                if self.state != VotingClosed && self.state != Tallying {
                    return Err(format!("decryption share while {}", self.state));
                }
                expect_author(payload.trustee, author)?;
                if !self.is_qualified(author) {
                    return Err(format!("trustee {} is not qualified", author));
                }
                if self.decryption_shares.contains_key(&author) {
                    return Err(format!("trustee {} already published a share", author));
                }
                self.decryption_shares.insert(author, payload);
                Ok(())
            }

            EntryType::TallyPublished => {
                let payload: Tally = decode(entry)?;
                self.expect_state(Tallying)?;
                if self.tally.is_some() {
                    return Err("tally already published".into());
                }
                self.tally = Some((sequence, payload));
                Ok(())
            }
        }
    }

    fn ceremony_member(&self, trustee: u32) -> bool {
        self.ceremony
            .committed
            .as_ref()
            .map(|c| c.contains(&trustee))
            .unwrap_or(false)
    }

    fn expect_state(&self, state: ElectionState) -> Result<(), String> {
        if self.state == state {
            Ok(())
        } else {
            Err(format!("not allowed while {}", self.state))
        }
    }

    fn ignore(&mut self, sequence: u64, reason: String) {
        warn!(
            "election {}: ignoring entry {}: {}",
            self.config.id, sequence, reason
        );
        self.ignored.push((sequence, reason));
    }
}

fn decode<T: DeserializeOwned>(entry: &Entry) -> Result<T, String> {
    serde_cbor::from_slice(&entry.payload)
        .map_err(|e| format!("malformed {} payload: {}", entry.entry_type, e))
}

fn expect_author(claimed: u32, author: u32) -> Result<(), String> {
    if claimed == author {
        Ok(())
    } else {
        Err(format!(
            "payload claims trustee {} but entry is signed by trustee {}",
            claimed, author
        ))
    }
}
