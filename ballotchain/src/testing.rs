//! Shared scaffolding for unit and end-to-end tests.

use crate::*;
use chrono::{Duration, TimeZone, Utc};
use ed25519_dalek::Keypair;
use rand::rngs::OsRng;
use std::sync::Arc;

pub struct Fixture {
    pub board: Arc<MemBoard>,
    pub clock: Arc<ManualClock>,
    pub settings: Settings,
    pub config: ElectionConfig,
    pub secrets: Vec<TrusteeSecret>,
    authority: [u8; 64],
}

impl Fixture {
    /// A fresh board and an election with `n` trustees and threshold `t`,
    /// starting four hours from the fixture's clock.
    pub fn new(scheme: SchemeKind, n: u32, t: u32) -> Self {
        let mut csprng = OsRng {};
        let authority = Keypair::generate(&mut csprng);

        let settings = Settings {
            retry: RetryPolicy {
                max_attempts: 64,
                initial_backoff: std::time::Duration::from_millis(1),
                max_backoff: std::time::Duration::from_millis(20),
            },
            page_size: 4,
            identity_key: Some(IdentityKey::generate()),
            ..Settings::default()
        };

        let start = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start - Duration::hours(4)));

        let secrets: Vec<TrusteeSecret> = (0..n).map(|_| TrusteeSecret::generate()).collect();

        let mut config = ElectionConfig::new(
            &settings,
            scheme,
            authority.public,
            start,
            start + Duration::hours(12),
        );
        config.title = "Board of directors".into();
        config.options = vec!["Alice".into(), "Bob".into(), "Carol".into()];
        config.max_selections = 2;
        config.trustees = secrets
            .iter()
            .enumerate()
            .map(|(i, s)| s.descriptor(&format!("trustee {}", i + 1)).unwrap())
            .collect();
        config.threshold = t;

        Fixture {
            board: Arc::new(MemBoard::new()),
            clock,
            settings,
            config,
            secrets,
            authority: authority.to_bytes(),
        }
    }

    pub fn election_id(&self) -> ElectionId {
        self.config.id
    }

    pub fn authority_keypair(&self) -> Keypair {
        Keypair::from_bytes(&self.authority).unwrap()
    }

    pub fn engine<S: VotingScheme>(&self) -> ElectionEngine<S> {
        ElectionEngine::new(
            self.board.clone(),
            self.authority_keypair(),
            self.clock.clone(),
            self.settings.clone(),
        )
    }

    pub fn dummy_engine(&self) -> ElectionEngine<DummyScheme> {
        self.engine()
    }

    pub fn elgamal_engine(&self) -> ElectionEngine<ElGamalScheme> {
        self.engine()
    }

    pub fn authority_client(&self) -> BoardClient {
        BoardClient::new(self.board.clone(), self.authority_keypair(), self.settings.page_size)
    }

    /// Board client signing as trustee `index` (1-based)
    pub fn trustee_client(&self, index: u32) -> BoardClient {
        let keypair = self.secrets[index as usize - 1].signing_keypair().unwrap();
        BoardClient::new(self.board.clone(), keypair, self.settings.page_size)
    }

    pub fn trustee<S: VotingScheme>(&self, index: u32) -> Trustee<S> {
        Trustee::new(
            self.board.clone(),
            self.clock.clone(),
            &self.settings,
            self.election_id(),
            &self.secrets[index as usize - 1],
        )
        .unwrap()
    }

    pub fn trustees<S: VotingScheme>(&self) -> Vec<Trustee<S>> {
        self.config.trustee_indices().map(|i| self.trustee(i)).collect()
    }

    /// Create the election if needed and run the key ceremony with the given trustees.
    pub fn try_ceremony<S: VotingScheme>(
        &self,
        engine: &ElectionEngine<S>,
        trustees: &[Trustee<S>],
    ) -> Result<CeremonyProgress, Error> {
        let id = self.election_id();
        match engine.create_election(self.config.clone()) {
            Ok(_) | Err(Error::ElectionExists(_)) => {}
            Err(e) => return Err(e),
        }
        engine.begin_key_ceremony(&id)?;

        for _ in 0..5 {
            for trustee in trustees {
                trustee.participate()?;
            }
            let progress = engine.advance_key_ceremony(&id)?;
            if let CeremonyProgress::Complete { .. } = progress {
                return Ok(progress);
            }
        }
        Err(Error::CeremonyIncomplete)
    }

    /// Run the key ceremony with every trustee honest.
    pub fn run_ceremony<S: VotingScheme>(&self, engine: &ElectionEngine<S>) -> CeremonyProgress {
        self.try_ceremony(engine, &self.trustees()).unwrap()
    }

    /// Run the ceremony and open voting a minute after the scheduled start.
    pub fn open<S: VotingScheme>(&self, engine: &ElectionEngine<S>) {
        self.run_ceremony(engine);
        self.clock
            .set(self.config.scheduled_start + Duration::minutes(1));
        engine.open_voting(&self.election_id()).unwrap();
    }

    pub fn identity_key(&self) -> &IdentityKey {
        self.settings.identity_key.as_ref().unwrap()
    }

    /// A token for voter `i`, issued now
    pub fn token(&self, i: u32) -> VoterToken {
        let passport = IdentityVerification {
            document_type: "passport".into(),
            document_number: format!("P{:06}", i),
        };
        VoterToken::issue(&self.config, self.identity_key(), &passport, self.clock.now()).unwrap()
    }

    /// Close voting, have every trustee publish its decryption share, and tally.
    pub fn close_and_tally<S: VotingScheme>(&self, engine: &ElectionEngine<S>) -> Tally {
        let id = self.election_id();
        engine.close_voting(&id, "polls closed").unwrap();
        for trustee in self.trustees::<S>() {
            trustee.participate().unwrap();
        }
        engine.tally(&id).unwrap()
    }
}
