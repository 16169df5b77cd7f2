use crate::*;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use sha2::{Digest, Sha256};

/// A ballot excluded from the tally because its validity proof failed
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RejectedBallotPayload {
    /// Sequence number of the excluded ballot entry
    pub sequence: u64,
    pub reason: String,
}

/// A trustee's decryption share of the aggregate ciphertext
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(bound = "")]
pub struct DecryptionSharePayload<S: VotingScheme> {
    pub trustee: u32,

    /// Digest of the aggregate this share decrypts
    #[serde(with = "serde_hex::fixed32")]
    pub aggregate_digest: [u8; 32],
    pub share: S::DecryptionShare,
}

/// The published result of an election.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub election_id: ElectionId,

    /// Totals per option, in ballot order
    pub results: IndexMap<String, u64>,
    pub ballots_counted: u64,
    pub rejected_ballots: Vec<RejectedBallotPayload>,

    /// Trustees whose shares were combined
    pub decryption_shares: Vec<u32>,

    /// Trustees whose shares failed verification
    pub rejected_shares: Vec<u32>,

    /// CBOR of the aggregate ciphertext
    #[serde(with = "serde_hex")]
    pub encrypted_sum: Vec<u8>,

    #[serde(with = "serde_hex::fixed32")]
    pub aggregate_digest: [u8; 32],

    pub published_at: DateTime<Utc>,
}

/// The homomorphic sum of every ballot with a valid proof, and what was left out.
///
/// Computed from the projection alone, so trustees, the coordinator and
/// auditors all arrive at the same aggregate and digest.
pub struct AggregateView<S: VotingScheme> {
    pub ciphertext: S::Ciphertext,
    pub digest: [u8; 32],

    /// Sequence numbers of the ballots included
    pub counted: Vec<u64>,
    pub rejected: Vec<RejectedBallotPayload>,
}

impl<S: VotingScheme> AggregateView<S> {
    pub fn compute(scheme: &S, election: &Election<S>) -> Result<Self, Error> {
        let public_key = election.public_key().ok_or(Error::CeremonyIncomplete)?;
        let shape = election.config.ballot_shape();

        let mut counted = vec![];
        let mut valid = vec![];
        let mut rejected = vec![];
        for record in election.ballots.iter() {
            let ballot = &record.ballot;
            let context = ballot_context(&election.id(), &ballot.token);
            if scheme.verify_ballot_proof(public_key, &shape, &context, &ballot.ciphertext, &ballot.proof) {
                counted.push(record.sequence);
                valid.push(&ballot.ciphertext);
            } else {
                rejected.push(RejectedBallotPayload {
                    sequence: record.sequence,
                    reason: "ballot validity proof failed".into(),
                });
            }
        }

        let ciphertext = scheme.aggregate(&shape, valid);
        let encoded = serde_cbor::to_vec(&ciphertext)?;
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&Sha256::digest(&encoded));

        Ok(AggregateView {
            ciphertext,
            digest,
            counted,
            rejected,
        })
    }

    /// Verify the published decryption shares against this aggregate.
    /// Returns the accepted trustees and the rejected ones.
    fn check_shares(
        &self,
        scheme: &S,
        election: &Election<S>,
        trustees: impl Iterator<Item = u32>,
    ) -> (Vec<u32>, Vec<u32>) {
        let commitments = election.ceremony.qualified_commitments();
        let mut accepted = vec![];
        let mut rejected = vec![];
        for trustee in trustees {
            let valid = match election.decryption_shares.get(&trustee) {
                Some(payload) => {
                    let vk = scheme.verification_key(&commitments, trustee);
                    let context = decryption_context(&election.id(), trustee, &self.digest);
                    payload.aggregate_digest == self.digest
                        && scheme.verify_decryption_share(&vk, &context, &self.ciphertext, &payload.share)
                }
                None => false,
            };
            if valid {
                accepted.push(trustee);
            } else {
                rejected.push(trustee);
            }
        }
        (accepted, rejected)
    }

    fn combine(&self, scheme: &S, election: &Election<S>, trustees: &[u32]) -> Result<Vec<u64>, Error> {
        let shares: Vec<(u32, &S::DecryptionShare)> = trustees
            .iter()
            .filter_map(|t| election.decryption_shares.get(t).map(|p| (*t, &p.share)))
            .collect();
        scheme.combine_shares(&self.ciphertext, &shares, self.counted.len() as u64)
    }
}

/// Drives an election from `VotingClosed` to `Published`.
pub struct TallyVerifier<'a, S: VotingScheme> {
    ledger: &'a Ledger<S>,
}

impl<'a, S: VotingScheme> TallyVerifier<'a, S> {
    pub fn new(ledger: &'a Ledger<S>) -> Self {
        TallyVerifier { ledger }
    }

    /// Combine the trustees' decryption shares and publish the result.
    ///
    /// Idempotent: once a tally is on the board it is returned as recorded.
    pub fn tally(&self, election_id: &ElectionId) -> Result<Tally, Error> {
        let machine = StateMachine::new(self.ledger);
        let election = self.ledger.election(election_id)?;

        if let Some((_, tally)) = &election.tally {
            if election.state == ElectionState::Tallying {
                machine.publish(election_id)?;
            }
            return Ok(tally.clone());
        }
        match election.state {
            ElectionState::VotingClosed => {
                machine.begin_tally(election_id)?;
            }
            ElectionState::Tallying => {}
            state => return Err(Error::InvalidState(state)),
        }

        self.record_rejected_ballots(election_id)?;

        let scheme = self.ledger.scheme();
        let committed = self.ledger.transact(election_id, |election, now| {
            if let Some((_, tally)) = &election.tally {
                return Ok(Decision::Skip(tally.clone()));
            }
            if election.state != ElectionState::Tallying {
                return Err(Error::InvalidState(election.state));
            }

            let view = AggregateView::compute(scheme, election)?;
            let (accepted, rejected) =
                view.check_shares(scheme, election, election.decryption_shares.keys().copied());
            for trustee in rejected.iter() {
                warn!(
                    target: "ballotchain::audit",
                    "election {}: decryption share from trustee {} failed verification",
                    election_id, trustee
                );
            }

            let threshold = election.config.threshold();
            if accepted.len() < threshold {
                return Err(Error::QuorumNotMet {
                    valid: accepted.len(),
                    threshold,
                });
            }

            let totals = view.combine(scheme, election, &accepted)?;
            let tally = Tally {
                election_id: *election_id,
                results: election.config.options.iter().cloned().zip(totals).collect(),
                ballots_counted: view.counted.len() as u64,
                rejected_ballots: view.rejected,
                decryption_shares: accepted,
                rejected_shares: rejected,
                encrypted_sum: serde_cbor::to_vec(&view.ciphertext)?,
                aggregate_digest: view.digest,
                published_at: now,
            };
            Decision::append(EntryType::TallyPublished, &tally, tally.clone())
        });

        let committed = match committed {
            Err(Error::QuorumNotMet { valid, threshold }) => {
                machine.suspend(election_id, TransitionReason::QuorumNotMet { valid, threshold })?;
                return Err(Error::QuorumNotMet { valid, threshold });
            }
            other => other?,
        };

        if committed.tip.is_some() {
            info!(
                "election {}: tally published from {} ballots",
                election_id, committed.value.ballots_counted
            );
        }
        machine.publish(election_id)?;
        Ok(committed.value)
    }

    fn record_rejected_ballots(&self, election_id: &ElectionId) -> Result<(), Error> {
        let scheme = self.ledger.scheme();
        loop {
            let committed = self.ledger.transact(election_id, |election, _| {
                let view = AggregateView::compute(scheme, election)?;
                let pending = view
                    .rejected
                    .into_iter()
                    .find(|r| !election.rejected_ballots.contains_key(&r.sequence));
                match pending {
                    Some(rejection) => Decision::append(
                        EntryType::RejectedBallot,
                        &rejection,
                        Some(rejection.sequence),
                    ),
                    None => Ok(Decision::Skip(None)),
                }
            })?;

            match committed.value {
                Some(sequence) => warn!(
                    target: "ballotchain::audit",
                    "election {}: ballot at entry {} excluded from the tally", election_id, sequence
                ),
                None => return Ok(()),
            }
        }
    }
}

/// Summary of an independent audit of an election's board entries.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub election_id: ElectionId,
    pub state: ElectionState,
    pub entries: u64,
    pub ballots_cast: u64,
    pub ballots_counted: Option<u64>,
    pub rejected_ballots: Vec<u64>,
    pub ignored_entries: Vec<u64>,
    pub results: Option<IndexMap<String, u64>>,
}

/// Re-derive everything verifiable from an election's entries: the chain,
/// the election key, the aggregate and the published result.
pub fn audit<S: VotingScheme>(entries: &[Entry]) -> Result<AuditReport, Error> {
    let election = Election::<S>::replay(entries)?;
    let scheme = S::default();
    let mismatch = |what: &str| Err(Error::AuditMismatch(what.to_owned()));

    if let Some(outcome) = &election.ceremony.outcome {
        let commitments = election.ceremony.qualified_commitments();
        if scheme.combine_public_key(&commitments) != outcome.public_key {
            return mismatch("election public key does not match the qualified commitments");
        }
    }

    let mut ballots_counted = None;
    let mut results = None;
    if let Some((_, tally)) = &election.tally {
        let view = AggregateView::compute(&scheme, &election)?;

        let recorded: Vec<u64> = election.rejected_ballots.keys().copied().collect();
        let computed: Vec<u64> = view.rejected.iter().map(|r| r.sequence).collect();
        if recorded != computed || tally.rejected_ballots != view.rejected {
            return mismatch("rejected ballots differ from the recomputed set");
        }
        if tally.aggregate_digest != view.digest
            || tally.encrypted_sum != serde_cbor::to_vec(&view.ciphertext)?
        {
            return mismatch("aggregate ciphertext differs from the recomputed sum");
        }
        if tally.ballots_counted != view.counted.len() as u64 {
            return mismatch("counted ballots differ");
        }

        let (accepted, _) =
            view.check_shares(&scheme, &election, tally.decryption_shares.iter().copied());
        if accepted != tally.decryption_shares {
            return mismatch("a combined decryption share does not verify");
        }
        let (_, rejected) =
            view.check_shares(&scheme, &election, tally.rejected_shares.iter().copied());
        if rejected != tally.rejected_shares {
            return mismatch("a rejected decryption share verifies");
        }
        if accepted.len() < election.config.threshold() {
            return mismatch("fewer decryption shares than the threshold");
        }

        let totals = view.combine(&scheme, &election, &accepted)?;
        let recomputed: IndexMap<String, u64> =
            election.config.options.iter().cloned().zip(totals).collect();
        if recomputed != tally.results {
            return mismatch("results differ from the recombined shares");
        }

        ballots_counted = Some(tally.ballots_counted);
        results = Some(tally.results.clone());
    }

    Ok(AuditReport {
        election_id: election.id(),
        state: election.state,
        entries: election.tip.sequence_number + 1,
        ballots_cast: election.ballots.len() as u64,
        ballots_counted,
        rejected_ballots: election.rejected_ballots.keys().copied().collect(),
        ignored_entries: election.ignored.iter().map(|(s, _)| *s).collect(),
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    #[test]
    fn tally_requires_closed_voting() {
        let fixture = Fixture::new(SchemeKind::Dummy, 2, 2);
        let engine = fixture.dummy_engine();
        fixture.open(&engine);

        assert!(matches!(
            engine.tally(&fixture.election_id()),
            Err(Error::InvalidState(ElectionState::VotingOpen))
        ));
    }

    #[test]
    fn invalid_ballot_is_excluded() {
        let fixture = Fixture::new(SchemeKind::Dummy, 2, 2);
        let engine = fixture.dummy_engine();
        let id = fixture.election_id();
        fixture.open(&engine);

        engine.cast_ballot(&fixture.token(0), &[1, 0, 0]).unwrap();

        // An overvote that never went through the ballot box
        let forged = BallotPayload::<DummyScheme> {
            token: IdentityCommitment([9; 32]),
            ciphertext: vec![1, 1, 1],
            proof: (),
            cast_at: fixture.clock.now(),
        };
        let forged_at = fixture
            .authority_client()
            .append(id, EntryType::Ballot, serde_cbor::to_vec(&forged).unwrap())
            .unwrap();

        engine.cast_ballot(&fixture.token(1), &[0, 1, 1]).unwrap();

        let tally = fixture.close_and_tally(&engine);
        assert_eq!(tally.ballots_counted, 2);
        assert_eq!(tally.rejected_ballots.len(), 1);
        assert_eq!(tally.rejected_ballots[0].sequence, forged_at);
        assert_eq!(tally.results["Alice"], 1);
        assert_eq!(tally.results["Bob"], 1);
        assert_eq!(tally.results["Carol"], 1);

        let election = engine.ledger().election(&id).unwrap();
        assert!(election.rejected_ballots.contains_key(&forged_at));

        let report = audit::<DummyScheme>(&engine.audit_trail(&id).unwrap()).unwrap();
        assert_eq!(report.ballots_cast, 3);
        assert_eq!(report.rejected_ballots, vec![forged_at]);
    }

    #[test]
    fn ballot_copied_to_another_token_is_excluded() {
        let fixture = Fixture::new(SchemeKind::ElGamal, 2, 2);
        let engine = fixture.elgamal_engine();
        let id = fixture.election_id();
        fixture.open(&engine);

        engine.cast_ballot(&fixture.token(1), &[1, 0, 1]).unwrap();

        // Same ciphertext and proofs, re-posted under a token that never voted
        let original = engine.ledger().election(&id).unwrap().ballots[0].ballot.clone();
        let copy = BallotPayload::<ElGamalScheme> {
            token: IdentityCommitment([9; 32]),
            cast_at: fixture.clock.now(),
            ..original
        };
        let copied_at = fixture
            .authority_client()
            .append(id, EntryType::Ballot, serde_cbor::to_vec(&copy).unwrap())
            .unwrap();

        let tally = fixture.close_and_tally(&engine);
        assert_eq!(tally.ballots_counted, 1);
        assert_eq!(tally.rejected_ballots.len(), 1);
        assert_eq!(tally.rejected_ballots[0].sequence, copied_at);
        assert_eq!(tally.results["Alice"], 1);
        assert_eq!(tally.results["Bob"], 0);
        assert_eq!(tally.results["Carol"], 1);

        let report = audit::<ElGamalScheme>(&engine.audit_trail(&id).unwrap()).unwrap();
        assert_eq!(report.rejected_ballots, vec![copied_at]);
    }

    #[test]
    fn ballot_from_another_election_is_excluded() {
        let first = Fixture::new(SchemeKind::ElGamal, 1, 1);
        let engine = first.elgamal_engine();
        first.open(&engine);
        engine.cast_ballot(&first.token(1), &[0, 1, 0]).unwrap();
        let ballot = engine.ledger().election(&first.election_id()).unwrap().ballots[0]
            .ballot
            .clone();

        // Proofs are bound to the election they were made for, even under the same key
        let election = engine.ledger().election(&first.election_id()).unwrap();
        let public_key = election.public_key().unwrap();
        let shape = election.config.ballot_shape();
        let here = ballot_context(&first.election_id(), &ballot.token);
        let elsewhere = ballot_context(&ElectionId::new(), &ballot.token);
        assert!(ElGamalScheme.verify_ballot_proof(public_key, &shape, &here, &ballot.ciphertext, &ballot.proof));
        assert!(!ElGamalScheme.verify_ballot_proof(
            public_key,
            &shape,
            &elsewhere,
            &ballot.ciphertext,
            &ballot.proof
        ));
    }

    #[test]
    fn missing_shares_suspend() {
        let fixture = Fixture::new(SchemeKind::Dummy, 3, 2);
        let engine = fixture.dummy_engine();
        let id = fixture.election_id();
        fixture.open(&engine);
        engine.cast_ballot(&fixture.token(0), &[0, 0, 1]).unwrap();
        engine.close_voting(&id, "done").unwrap();

        // Only one trustee shows up
        let trustee: Trustee<DummyScheme> = fixture.trustee(3);
        assert!(trustee.participate().unwrap());

        let err = engine.tally(&id).unwrap_err();
        assert!(matches!(
            err,
            Error::QuorumNotMet {
                valid: 1,
                threshold: 2
            }
        ));
        assert_eq!(engine.status(&id).unwrap().state, ElectionState::Suspended);

        // Resume once another trustee is back
        assert_eq!(engine.resume(&id, "trustee 1 online").unwrap(), ElectionState::Tallying);
        let trustee: Trustee<DummyScheme> = fixture.trustee(1);
        assert!(trustee.participate().unwrap());

        let tally = engine.tally(&id).unwrap();
        assert_eq!(tally.decryption_shares, vec![1, 3]);
        assert_eq!(tally.results["Carol"], 1);
        assert_eq!(engine.status(&id).unwrap().state, ElectionState::Published);
    }

    #[test]
    fn audit_catches_forged_result() {
        let fixture = Fixture::new(SchemeKind::Dummy, 2, 2);
        let engine = fixture.dummy_engine();
        let id = fixture.election_id();
        fixture.open(&engine);
        engine.cast_ballot(&fixture.token(0), &[1, 0, 0]).unwrap();
        fixture.close_and_tally(&engine);

        let mut entries = engine.audit_trail(&id).unwrap();
        audit::<DummyScheme>(&entries).unwrap();

        // Re-sign a doctored tally as the authority and splice it in place
        let position = entries
            .iter()
            .position(|e| e.entry_type == EntryType::TallyPublished)
            .unwrap();
        let mut tally: Tally = serde_cbor::from_slice(&entries[position].payload).unwrap();
        tally.results.insert("Bob".into(), 5);

        let authority = fixture.authority_keypair();
        let prior = ChainTip::of(&entries[position - 1]).unwrap();
        let doctored = Entry::sign(
            &authority,
            id,
            Some(&prior),
            EntryType::TallyPublished,
            serde_cbor::to_vec(&tally).unwrap(),
        )
        .unwrap();
        entries.truncate(position);
        entries.push(doctored);

        assert!(matches!(
            audit::<DummyScheme>(&entries),
            Err(Error::AuditMismatch(_))
        ));
    }
}
