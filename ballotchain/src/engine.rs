use crate::*;
use ed25519_dalek::Keypair;
use std::sync::Arc;

/// Read-only view of an election for status queries
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", bound = "")]
pub struct ElectionStatus<S: VotingScheme> {
    pub election_id: ElectionId,
    pub state: ElectionState,
    pub public_key: Option<S::PublicKey>,
    pub transitions: Vec<ElectionState>,
    pub ballots_cast: u64,
    pub sequence_number: u64,
    pub tally: Option<Tally>,
}

/// The election authority's entry point.
///
/// Holds no election state of its own: every call reads the bulletin board
/// through the ledger, so any number of engines may serve the same elections.
pub struct ElectionEngine<S: VotingScheme> {
    ledger: Ledger<S>,
    settings: Settings,
}

impl<S: VotingScheme> ElectionEngine<S> {
    pub fn new(
        board: Arc<dyn BulletinBoard>,
        authority: Keypair,
        clock: Arc<dyn Clock>,
        settings: Settings,
    ) -> Self {
        let client = BoardClient::new(board, authority, settings.page_size);
        ElectionEngine {
            ledger: Ledger::new(client, clock, settings.retry),
            settings,
        }
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state_machine(&self) -> StateMachine<S> {
        StateMachine::new(&self.ledger)
    }

    pub fn key_ceremony(&self) -> KeyCeremony<S> {
        KeyCeremony::new(&self.ledger)
    }

    pub fn ballot_box(&self) -> BallotBox<S> {
        BallotBox::new(&self.ledger)
    }

    pub fn tally_verifier(&self) -> TallyVerifier<S> {
        TallyVerifier::new(&self.ledger)
    }

    /// Record a new election on the board.
    pub fn create_election(&self, config: ElectionConfig) -> Result<ElectionId, Error> {
        let id = config.id;
        self.ledger.create(&config)?;
        info!("election {} created: {}", id, config.title);
        Ok(id)
    }

    pub fn status(&self, election_id: &ElectionId) -> Result<ElectionStatus<S>, Error> {
        let election = self.ledger.election(election_id)?;
        Ok(ElectionStatus {
            election_id: *election_id,
            state: election.state,
            public_key: election.public_key().cloned(),
            transitions: election.transitions.clone(),
            ballots_cast: election.ballots.len() as u64,
            sequence_number: election.tip.sequence_number,
            tally: election.tally.as_ref().map(|(_, tally)| tally.clone()),
        })
    }

    /// Issue a voter token to an identity the caller has already verified.
    pub fn issue_token(
        &self,
        election_id: &ElectionId,
        verification: &IdentityVerification,
    ) -> Result<VoterToken, Error> {
        let key = self
            .settings
            .identity_key
            .as_ref()
            .ok_or_else(|| Error::InvalidSetting {
                name: "BALLOTCHAIN_IDENTITY_KEY",
                value: String::new(),
            })?;
        let election = self.ledger.election(election_id)?;
        VoterToken::issue(&election.config, key, verification, self.ledger.now())
    }

    pub fn begin_key_ceremony(&self, election_id: &ElectionId) -> Result<ElectionState, Error> {
        self.state_machine().begin_key_ceremony(election_id)
    }

    pub fn advance_key_ceremony(&self, election_id: &ElectionId) -> Result<CeremonyProgress, Error> {
        self.key_ceremony().advance(election_id)
    }

    /// Open voting, passing through the setup window if the ceremony just completed.
    pub fn open_voting(&self, election_id: &ElectionId) -> Result<ElectionState, Error> {
        let machine = self.state_machine();
        if machine.state(election_id)? == ElectionState::KeyCeremonyComplete {
            machine.enter_setup_window(election_id)?;
        }
        machine.open_voting(election_id)
    }

    /// Close voting ahead of the scheduled end.
    pub fn close_voting(&self, election_id: &ElectionId, note: &str) -> Result<ElectionState, Error> {
        self.state_machine().close_voting(
            election_id,
            TransitionReason::Administrative {
                note: note.to_owned(),
            },
        )
    }

    pub fn tick(&self, election_id: &ElectionId) -> Result<ElectionState, Error> {
        self.state_machine().tick(election_id)
    }

    pub fn suspend(&self, election_id: &ElectionId, note: &str) -> Result<ElectionState, Error> {
        self.state_machine().suspend(
            election_id,
            TransitionReason::Administrative {
                note: note.to_owned(),
            },
        )
    }

    pub fn resume(&self, election_id: &ElectionId, note: &str) -> Result<ElectionState, Error> {
        self.state_machine().resume(election_id, note)
    }

    pub fn abort(&self, election_id: &ElectionId, note: &str) -> Result<ElectionState, Error> {
        self.state_machine().abort(election_id, note)
    }

    pub fn cast_ballot(&self, token: &VoterToken, selections: &[u32]) -> Result<BallotReceipt, Error> {
        self.ballot_box().cast_ballot(token, selections)
    }

    pub fn tally(&self, election_id: &ElectionId) -> Result<Tally, Error> {
        self.tally_verifier().tally(election_id)
    }

    /// Every entry of the election exactly as the board holds it. Readable
    /// even after the election was halted.
    pub fn audit_trail(&self, election_id: &ElectionId) -> Result<Vec<Entry>, Error> {
        let entries = self
            .ledger
            .client()
            .read_all(*election_id)
            .collect::<Result<Vec<Entry>, Error>>()?;
        if entries.is_empty() {
            return Err(Error::UnknownElection(*election_id));
        }
        Ok(entries)
    }

    /// Independently re-derive and check the election from its audit trail.
    pub fn audit(&self, election_id: &ElectionId) -> Result<AuditReport, Error> {
        audit::<S>(&self.audit_trail(election_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    #[test]
    fn status_and_tokens() {
        let fixture = Fixture::new(SchemeKind::Dummy, 2, 1);
        let engine = fixture.dummy_engine();
        let id = fixture.election_id();

        assert!(matches!(engine.status(&id), Err(Error::UnknownElection(_))));
        assert!(matches!(engine.audit_trail(&id), Err(Error::UnknownElection(_))));

        assert_eq!(engine.create_election(fixture.config.clone()).unwrap(), id);
        let status = engine.status(&id).unwrap();
        assert_eq!(status.state, ElectionState::Configured);
        assert_eq!(status.public_key, None);
        assert_eq!(status.sequence_number, 0);

        let passport = IdentityVerification {
            document_type: "passport".into(),
            document_number: "x1234".into(),
        };
        let token = engine.issue_token(&id, &passport).unwrap();
        assert_eq!(token.election_id, id);
        assert_eq!(token.expires_at - token.issued_at, chrono::Duration::minutes(120));

        let library_card = IdentityVerification {
            document_type: "library_card".into(),
            document_number: "1".into(),
        };
        assert!(matches!(
            engine.issue_token(&id, &library_card),
            Err(Error::UnacceptedDocumentType(_))
        ));
    }

    #[test]
    fn tokens_need_the_identity_key() {
        let fixture = Fixture::new(SchemeKind::Dummy, 1, 1);
        let id = fixture.election_id();
        let passport = IdentityVerification {
            document_type: "passport".into(),
            document_number: "P000001".into(),
        };

        let engine = fixture.dummy_engine();
        engine.create_election(fixture.config.clone()).unwrap();
        let token = engine.issue_token(&id, &passport).unwrap();
        assert_eq!(token.voter_identity_commitment, fixture.token(1).voter_identity_commitment);

        // A replica keyed differently cannot recognise the voter
        let mut settings = fixture.settings.clone();
        settings.identity_key = Some(IdentityKey::generate());
        let replica: ElectionEngine<DummyScheme> = ElectionEngine::new(
            fixture.board.clone(),
            fixture.authority_keypair(),
            fixture.clock.clone(),
            settings.clone(),
        );
        assert_ne!(
            replica.issue_token(&id, &passport).unwrap().voter_identity_commitment,
            token.voter_identity_commitment
        );

        settings.identity_key = None;
        let unkeyed: ElectionEngine<DummyScheme> = ElectionEngine::new(
            fixture.board.clone(),
            fixture.authority_keypair(),
            fixture.clock.clone(),
            settings,
        );
        let err = unkeyed.issue_token(&id, &passport).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidSetting {
                name: "BALLOTCHAIN_IDENTITY_KEY",
                ..
            }
        ));
    }

    #[test]
    fn wrong_authority_cannot_create() {
        let fixture = Fixture::new(SchemeKind::Dummy, 1, 1);
        let mut csprng = rand::rngs::OsRng {};
        let other = Keypair::generate(&mut csprng);
        let engine: ElectionEngine<DummyScheme> = ElectionEngine::new(
            fixture.board.clone(),
            other,
            fixture.clock.clone(),
            fixture.settings.clone(),
        );
        assert!(matches!(
            engine.create_election(fixture.config.clone()),
            Err(Error::AuthorityMismatch)
        ));
    }

    #[test]
    fn open_passes_through_setup_window() {
        let fixture = Fixture::new(SchemeKind::Dummy, 1, 1);
        let engine = fixture.dummy_engine();
        let id = fixture.election_id();
        fixture.run_ceremony(&engine);

        fixture.clock.set(fixture.config.scheduled_start);
        assert_eq!(engine.open_voting(&id).unwrap(), ElectionState::VotingOpen);
        assert_eq!(
            engine.status(&id).unwrap().transitions,
            vec![
                ElectionState::KeyCeremonyPending,
                ElectionState::KeyCeremonyComplete,
                ElectionState::SetupWindow,
                ElectionState::VotingOpen,
            ]
        );
    }
}
