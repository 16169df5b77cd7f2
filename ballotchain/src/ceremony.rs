use crate::*;
use std::collections::BTreeSet;

/// Step 1: a trustee's commitment to its dealt secret
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(bound = "")]
pub struct KeyCommitmentPayload<S: VotingScheme> {
    pub trustee: u32,
    pub commitment: S::Commitment,
}

/// Step 2: the coordinator closes the commitment round
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CommitmentsClosedPayload {
    /// Trustees whose commitments were well-formed
    pub committed: Vec<u32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EncryptedShare {
    pub recipient: u32,
    #[serde(with = "serde_hex")]
    pub ciphertext: Vec<u8>,
}

/// Step 3: one dealer's shares, each encrypted to its recipient
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct KeySharesPayload {
    pub dealer: u32,
    pub shares: Vec<EncryptedShare>,
}

/// Step 4: dealers whose share to this trustee failed verification
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ShareVerificationPayload {
    pub trustee: u32,
    pub complaints: Vec<u32>,
}

/// Step 5: the election public key and the trustees it was built from
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(bound = "")]
pub struct CeremonyOutcome<S: VotingScheme> {
    pub public_key: S::PublicKey,
    pub qualified: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CeremonyProgress {
    AwaitingCommitments { missing: Vec<u32> },
    AwaitingShares { missing: Vec<u32> },
    AwaitingVerifications { missing: Vec<u32> },
    Complete { qualified: Vec<u32>, disqualified: Vec<u32> },
}

enum Step {
    Progress(CeremonyProgress),
    QuorumLost { valid: usize, threshold: usize },
}

/// Coordinates the key ceremony from the election authority's side.
///
/// The coordinator only reads what trustees have published and appends the
/// round markers: it closes the commitment round once every trustee has
/// committed, and publishes the election key as soon as `threshold`
/// trustees have verified their shares without being complained about.
/// Trustees that have not verified by then are left out of the key. When
/// `threshold` qualified trustees can no longer be reached the election is
/// suspended.
pub struct KeyCeremony<'a, S: VotingScheme> {
    ledger: &'a Ledger<S>,
}

impl<'a, S: VotingScheme> KeyCeremony<'a, S> {
    pub fn new(ledger: &'a Ledger<S>) -> Self {
        KeyCeremony { ledger }
    }

    /// Move the ceremony forward as far as the board allows.
    pub fn advance(&self, election_id: &ElectionId) -> Result<CeremonyProgress, Error> {
        let scheme = self.ledger.scheme();
        let committed = self.ledger.transact(election_id, |election, _| {
            let record = &election.ceremony;
            let threshold = election.config.threshold();

            if let Some(outcome) = &record.outcome {
                return Ok(Decision::Skip(Step::Progress(complete(election, outcome))));
            }
            if election.state != ElectionState::KeyCeremonyPending {
                return Err(Error::InvalidState(election.state));
            }

            let members = match &record.committed {
                Some(members) => members,
                None => {
                    let missing: Vec<u32> = election
                        .config
                        .trustee_indices()
                        .filter(|i| !record.commitments.contains_key(i))
                        .collect();
                    if !missing.is_empty() {
                        return Ok(Decision::Skip(Step::Progress(
                            CeremonyProgress::AwaitingCommitments { missing },
                        )));
                    }

                    let mut valid = vec![];
                    for (index, commitment) in record.commitments.iter() {
                        if scheme.verify_commitment(*index, threshold, commitment) {
                            valid.push(*index);
                        } else {
                            warn!(
                                "election {}: trustee {} published a malformed commitment",
                                election_id, index
                            );
                        }
                    }
                    if valid.len() < threshold {
                        return Ok(Decision::Skip(Step::QuorumLost {
                            valid: valid.len(),
                            threshold,
                        }));
                    }

                    let payload = CommitmentsClosedPayload {
                        committed: valid.clone(),
                    };
                    let progress = CeremonyProgress::AwaitingShares { missing: valid };
                    return Decision::append(
                        EntryType::CommitmentsClosed,
                        &payload,
                        Step::Progress(progress),
                    );
                }
            };

            let missing: Vec<u32> = members
                .iter()
                .copied()
                .filter(|m| !record.shares.contains_key(m))
                .collect();
            if !missing.is_empty() {
                return Ok(Decision::Skip(Step::Progress(
                    CeremonyProgress::AwaitingShares { missing },
                )));
            }

            let accused: BTreeSet<u32> = record
                .verifications
                .values()
                .flat_map(|complaints| complaints.iter().copied())
                .collect();

            // A trustee qualifies once it has verified its shares and nobody complains about it
            let qualified: Vec<u32> = members
                .iter()
                .copied()
                .filter(|m| record.verifications.contains_key(m) && !accused.contains(m))
                .collect();
            let missing: Vec<u32> = members
                .iter()
                .copied()
                .filter(|m| !record.verifications.contains_key(m))
                .collect();

            if qualified.len() < threshold {
                let reachable = qualified.len()
                    + missing.iter().filter(|m| !accused.contains(m)).count();
                if missing.is_empty() || reachable < threshold {
                    return Ok(Decision::Skip(Step::QuorumLost {
                        valid: reachable,
                        threshold,
                    }));
                }
                return Ok(Decision::Skip(Step::Progress(
                    CeremonyProgress::AwaitingVerifications { missing },
                )));
            }

            for dealer in accused.iter() {
                warn!("election {}: {}", election_id, Error::InvalidShareProof { dealer: *dealer });
            }
            if !missing.is_empty() {
                info!(
                    "election {}: completing key ceremony without verifications from {:?}",
                    election_id, missing
                );
            }

            let commitments: Vec<&S::Commitment> = qualified
                .iter()
                .filter_map(|i| record.commitments.get(i))
                .collect();
            let outcome = CeremonyOutcome::<S> {
                public_key: scheme.combine_public_key(&commitments),
                qualified,
            };
            let progress = complete(election, &outcome);
            Decision::append(EntryType::CeremonyComplete, &outcome, Step::Progress(progress))
        })?;

        let machine = StateMachine::new(self.ledger);
        match committed.value {
            Step::QuorumLost { valid, threshold } => {
                warn!(
                    "election {}: key ceremony has {} valid trustees, {} required",
                    election_id, valid, threshold
                );
                machine.suspend(election_id, TransitionReason::QuorumNotMet { valid, threshold })?;
                Err(Error::QuorumNotMet { valid, threshold })
            }
            Step::Progress(progress) => {
                if let CeremonyProgress::Complete { qualified, .. } = &progress {
                    if committed.tip.is_some() {
                        info!(
                            "election {}: key ceremony complete with trustees {:?}",
                            election_id, qualified
                        );
                    }
                    if machine.state(election_id)? == ElectionState::KeyCeremonyPending {
                        machine.complete_key_ceremony(election_id)?;
                    }
                }
                Ok(progress)
            }
        }
    }
}

fn complete<S: VotingScheme>(election: &Election<S>, outcome: &CeremonyOutcome<S>) -> CeremonyProgress {
    CeremonyProgress::Complete {
        qualified: outcome.qualified.clone(),
        disqualified: election
            .config
            .trustee_indices()
            .filter(|i| !outcome.qualified.contains(i))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use chrono::Duration;

    #[test]
    fn rounds() {
        let fixture = Fixture::new(SchemeKind::Dummy, 3, 2);
        let engine = fixture.dummy_engine();
        let id = fixture.election_id();
        engine.create_election(fixture.config.clone()).unwrap();
        engine.begin_key_ceremony(&id).unwrap();
        let trustees: Vec<Trustee<DummyScheme>> = fixture.trustees();

        assert_eq!(
            engine.advance_key_ceremony(&id).unwrap(),
            CeremonyProgress::AwaitingCommitments {
                missing: vec![1, 2, 3]
            }
        );

        for t in trustees.iter() {
            t.publish_commitment().unwrap();
        }
        assert_eq!(
            engine.advance_key_ceremony(&id).unwrap(),
            CeremonyProgress::AwaitingShares {
                missing: vec![1, 2, 3]
            }
        );

        trustees[0].publish_shares().unwrap();
        assert_eq!(
            engine.advance_key_ceremony(&id).unwrap(),
            CeremonyProgress::AwaitingShares {
                missing: vec![2, 3]
            }
        );

        for t in trustees.iter() {
            t.publish_shares().unwrap();
        }
        trustees[2].verify_shares().unwrap();
        assert_eq!(
            engine.advance_key_ceremony(&id).unwrap(),
            CeremonyProgress::AwaitingVerifications {
                missing: vec![1, 2]
            }
        );

        for t in trustees.iter() {
            t.verify_shares().unwrap();
        }
        assert_eq!(
            engine.advance_key_ceremony(&id).unwrap(),
            CeremonyProgress::Complete {
                qualified: vec![1, 2, 3],
                disqualified: vec![]
            }
        );

        let status = engine.status(&id).unwrap();
        assert_eq!(status.state, ElectionState::KeyCeremonyComplete);
        assert!(status.public_key.is_some());

        // Advancing again is harmless
        assert!(matches!(
            engine.advance_key_ceremony(&id).unwrap(),
            CeremonyProgress::Complete { .. }
        ));
    }

    fn run_with_faults<S: VotingScheme>(
        fixture: &Fixture,
        engine: &ElectionEngine<S>,
        faulty: &[u32],
    ) -> Result<CeremonyProgress, Error> {
        let trustees: Vec<Trustee<S>> = fixture
            .config
            .trustee_indices()
            .map(|i| {
                let trustee = fixture.trustee(i);
                if faulty.contains(&i) {
                    trustee.with_fault(TrusteeFault::MisdirectedShares)
                } else {
                    trustee
                }
            })
            .collect();
        fixture.try_ceremony(engine, &trustees)
    }

    #[test]
    fn tolerates_n_minus_t_bad_dealers() {
        let fixture = Fixture::new(SchemeKind::Dummy, 5, 3);
        let engine = fixture.dummy_engine();

        let progress = run_with_faults(&fixture, &engine, &[2, 5]).unwrap();
        assert_eq!(
            progress,
            CeremonyProgress::Complete {
                qualified: vec![1, 3, 4],
                disqualified: vec![2, 5]
            }
        );
        assert_eq!(
            engine.status(&fixture.election_id()).unwrap().state,
            ElectionState::KeyCeremonyComplete
        );
    }

    #[test]
    fn one_fewer_is_quorum_not_met() {
        let fixture = Fixture::new(SchemeKind::Dummy, 5, 3);
        let engine = fixture.dummy_engine();

        let err = run_with_faults(&fixture, &engine, &[1, 2, 5]).unwrap_err();
        assert!(matches!(
            err,
            Error::QuorumNotMet {
                valid: 2,
                threshold: 3
            }
        ));
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(
            engine.status(&fixture.election_id()).unwrap().state,
            ElectionState::Suspended
        );
    }

    #[test]
    fn elgamal_ceremony_with_bad_dealer() {
        let fixture = Fixture::new(SchemeKind::ElGamal, 3, 2);
        let engine = fixture.elgamal_engine();

        let progress = run_with_faults(&fixture, &engine, &[3]).unwrap();
        assert_eq!(
            progress,
            CeremonyProgress::Complete {
                qualified: vec![1, 2],
                disqualified: vec![3]
            }
        );

        // The published key is the sum of the qualified dealers' constant terms
        let election = engine.ledger().election(&fixture.election_id()).unwrap();
        let commitments = election.ceremony.qualified_commitments();
        assert_eq!(commitments.len(), 2);
        assert_eq!(
            election.public_key(),
            Some(&ElGamalScheme.combine_public_key(&commitments))
        );
    }

    #[test]
    fn silent_verifier_is_left_out() {
        let fixture = Fixture::new(SchemeKind::ElGamal, 5, 3);
        let engine = fixture.elgamal_engine();
        let id = fixture.election_id();
        engine.create_election(fixture.config.clone()).unwrap();
        engine.begin_key_ceremony(&id).unwrap();
        let trustees: Vec<Trustee<ElGamalScheme>> = fixture.trustees();

        for t in trustees.iter() {
            t.publish_commitment().unwrap();
        }
        engine.advance_key_ceremony(&id).unwrap();
        for t in trustees.iter() {
            t.publish_shares().unwrap();
        }

        // Trustee 4 dealt its shares and then went quiet
        trustees[0].verify_shares().unwrap();
        trustees[1].verify_shares().unwrap();
        assert_eq!(
            engine.advance_key_ceremony(&id).unwrap(),
            CeremonyProgress::AwaitingVerifications {
                missing: vec![3, 4, 5]
            }
        );
        trustees[2].verify_shares().unwrap();
        trustees[4].verify_shares().unwrap();
        assert_eq!(
            engine.advance_key_ceremony(&id).unwrap(),
            CeremonyProgress::Complete {
                qualified: vec![1, 2, 3, 5],
                disqualified: vec![4]
            }
        );
        assert_eq!(engine.status(&id).unwrap().state, ElectionState::KeyCeremonyComplete);
        assert!(matches!(
            trustees[3].key_share(),
            Err(Error::TrusteeNotQualified(4))
        ));

        // Speaking up after the fact changes nothing
        assert!(!trustees[3].verify_shares().unwrap());

        fixture.clock.set(fixture.config.scheduled_start + Duration::minutes(1));
        engine.open_voting(&id).unwrap();
        engine.cast_ballot(&fixture.token(1), &[1, 0, 0]).unwrap();
        engine.cast_ballot(&fixture.token(2), &[1, 1, 0]).unwrap();

        let tally = fixture.close_and_tally(&engine);
        assert_eq!(tally.decryption_shares, vec![1, 2, 3, 5]);
        assert_eq!(tally.results["Alice"], 2);
        assert_eq!(tally.results["Bob"], 1);
        assert_eq!(tally.results["Carol"], 0);
    }

    #[test]
    fn silent_verifier_below_quorum_suspends() {
        let fixture = Fixture::new(SchemeKind::Dummy, 3, 3);
        let engine = fixture.dummy_engine();
        let id = fixture.election_id();
        engine.create_election(fixture.config.clone()).unwrap();
        engine.begin_key_ceremony(&id).unwrap();
        let mut trustees: Vec<Trustee<DummyScheme>> = fixture.trustees();
        let bad = trustees.pop().unwrap().with_fault(TrusteeFault::MisdirectedShares);
        trustees.push(bad);

        for t in trustees.iter() {
            t.publish_commitment().unwrap();
        }
        engine.advance_key_ceremony(&id).unwrap();
        for t in trustees.iter() {
            t.publish_shares().unwrap();
        }

        // Trustee 3 is accused, so trustee 2 staying silent leaves two at best
        trustees[0].verify_shares().unwrap();
        trustees[2].verify_shares().unwrap();
        let err = engine.advance_key_ceremony(&id).unwrap_err();
        assert!(matches!(
            err,
            Error::QuorumNotMet {
                valid: 2,
                threshold: 3
            }
        ));
        assert_eq!(engine.status(&id).unwrap().state, ElectionState::Suspended);
    }

    #[test]
    fn resume_restarts_the_ceremony() {
        let fixture = Fixture::new(SchemeKind::Dummy, 3, 3);
        let engine = fixture.dummy_engine();
        let id = fixture.election_id();

        assert!(run_with_faults(&fixture, &engine, &[1]).is_err());
        assert_eq!(engine.resume(&id, "trustee 1 fixed").unwrap(), ElectionState::KeyCeremonyPending);

        let election = engine.ledger().election(&id).unwrap();
        assert!(election.ceremony.commitments.is_empty());

        let progress = run_with_faults(&fixture, &engine, &[]).unwrap();
        assert!(matches!(progress, CeremonyProgress::Complete { .. }));
    }
}
