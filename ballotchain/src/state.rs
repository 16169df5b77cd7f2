use crate::*;
use chrono::{DateTime, Utc};
use std::fmt;

/// Lifecycle of an election
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ElectionState {
    Configured,
    KeyCeremonyPending,
    KeyCeremonyComplete,
    SetupWindow,
    VotingOpen,
    VotingClosed,
    Tallying,
    Published,
    Suspended,
    Aborted,
}

impl ElectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ElectionState::Published | ElectionState::Aborted)
    }

    /// Whether `self -> to` is a legal transition. Resuming is only legal back
    /// to the state the election was suspended from.
    pub fn allows(&self, to: ElectionState, suspended_from: Option<ElectionState>) -> bool {
        use ElectionState::*;

        match (*self, to) {
            (Configured, KeyCeremonyPending)
            | (KeyCeremonyPending, KeyCeremonyComplete)
            | (KeyCeremonyComplete, SetupWindow)
            | (SetupWindow, VotingOpen)
            | (VotingOpen, VotingClosed)
            | (VotingClosed, Tallying)
            | (Tallying, Published)
            | (Suspended, Aborted) => true,
            (Suspended, to) => suspended_from == Some(to),
            (from, Suspended) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ElectionState::Configured => "configured",
            ElectionState::KeyCeremonyPending => "key_ceremony_pending",
            ElectionState::KeyCeremonyComplete => "key_ceremony_complete",
            ElectionState::SetupWindow => "setup_window",
            ElectionState::VotingOpen => "voting_open",
            ElectionState::VotingClosed => "voting_closed",
            ElectionState::Tallying => "tallying",
            ElectionState::Published => "published",
            ElectionState::Suspended => "suspended",
            ElectionState::Aborted => "aborted",
        };
        write!(f, "{}", name)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionReason {
    /// Normal progress through the lifecycle
    Lifecycle,

    /// The clock reached `scheduled_end`
    ScheduledEnd,

    /// Operator command
    Administrative { note: String },

    /// Too few trustees to continue
    QuorumNotMet { valid: usize, threshold: usize },
}

/// Payload of a `StateTransition` entry
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TransitionPayload {
    pub from: ElectionState,
    pub to: ElectionState,
    pub reason: TransitionReason,
    pub at: DateTime<Utc>,
}

/// Drives an election through its lifecycle.
///
/// Every transition is a `StateTransition` entry appended at the tip the
/// decision was made against; the in-memory state only changes when the
/// entry is replayed. Asking for the state the election is already in is a
/// no-op.
pub struct StateMachine<'a, S: VotingScheme> {
    ledger: &'a Ledger<S>,
}

impl<'a, S: VotingScheme> StateMachine<'a, S> {
    pub fn new(ledger: &'a Ledger<S>) -> Self {
        StateMachine { ledger }
    }

    pub fn state(&self, election_id: &ElectionId) -> Result<ElectionState, Error> {
        Ok(self.ledger.election(election_id)?.state)
    }

    /// `Configured -> KeyCeremonyPending`, at least `setup_minimum_hours_before_start` before the start.
    pub fn begin_key_ceremony(&self, election_id: &ElectionId) -> Result<ElectionState, Error> {
        self.transition(
            election_id,
            ElectionState::KeyCeremonyPending,
            TransitionReason::Lifecycle,
            |election, now| {
                if now > election.config.setup_deadline()? {
                    return Err(Error::SchedulingViolation {
                        required_hours: election.config.setup_minimum_hours_before_start,
                    });
                }
                Ok(())
            },
        )
    }

    /// `KeyCeremonyPending -> KeyCeremonyComplete`, once the ceremony has published the election key.
    pub fn complete_key_ceremony(&self, election_id: &ElectionId) -> Result<ElectionState, Error> {
        self.transition(
            election_id,
            ElectionState::KeyCeremonyComplete,
            TransitionReason::Lifecycle,
            |election, _| match election.ceremony.outcome {
                Some(_) => Ok(()),
                None => Err(Error::CeremonyIncomplete),
            },
        )
    }

    pub fn enter_setup_window(&self, election_id: &ElectionId) -> Result<ElectionState, Error> {
        self.transition(
            election_id,
            ElectionState::SetupWindow,
            TransitionReason::Lifecycle,
            |_, _| Ok(()),
        )
    }

    /// `SetupWindow -> VotingOpen`, only between the scheduled start and
    /// `start_vote_maximum_hours_before_start` hours after it.
    pub fn open_voting(&self, election_id: &ElectionId) -> Result<ElectionState, Error> {
        self.transition(
            election_id,
            ElectionState::VotingOpen,
            TransitionReason::Lifecycle,
            |election, now| {
                let (opens, latest) = election.config.opening_window()?;
                let closes = latest.min(election.config.scheduled_end);
                if now < opens || now > closes {
                    return Err(Error::OutsideVotingWindow { opens, closes });
                }
                Ok(())
            },
        )
    }

    /// `VotingOpen -> VotingClosed`. Ballots cast after this entry are rejected.
    pub fn close_voting(
        &self,
        election_id: &ElectionId,
        reason: TransitionReason,
    ) -> Result<ElectionState, Error> {
        self.transition(election_id, ElectionState::VotingClosed, reason, |_, _| Ok(()))
    }

    /// Apply clock-driven transitions: closes voting once `scheduled_end` has passed.
    pub fn tick(&self, election_id: &ElectionId) -> Result<ElectionState, Error> {
        let committed = self.ledger.transact(election_id, |election, now| {
            if election.state == ElectionState::VotingOpen && now >= election.config.scheduled_end {
                let payload = TransitionPayload {
                    from: election.state,
                    to: ElectionState::VotingClosed,
                    reason: TransitionReason::ScheduledEnd,
                    at: now,
                };
                Decision::append(EntryType::StateTransition, &payload, ElectionState::VotingClosed)
            } else {
                Ok(Decision::Skip(election.state))
            }
        })?;

        if committed.tip.is_some() {
            info!("election {} closed at its scheduled end", election_id);
        }
        Ok(committed.value)
    }

    pub fn begin_tally(&self, election_id: &ElectionId) -> Result<ElectionState, Error> {
        self.transition(
            election_id,
            ElectionState::Tallying,
            TransitionReason::Lifecycle,
            |_, _| Ok(()),
        )
    }

    /// `Tallying -> Published`, once a tally has been recorded.
    pub fn publish(&self, election_id: &ElectionId) -> Result<ElectionState, Error> {
        self.transition(
            election_id,
            ElectionState::Published,
            TransitionReason::Lifecycle,
            |election, _| match election.tally {
                Some(_) => Ok(()),
                None => Err(Error::InvalidState(election.state)),
            },
        )
    }

    /// Move any non-terminal election to `Suspended`. Safe to issue at any time.
    pub fn suspend(
        &self,
        election_id: &ElectionId,
        reason: TransitionReason,
    ) -> Result<ElectionState, Error> {
        self.transition(election_id, ElectionState::Suspended, reason, |_, _| Ok(()))
    }

    /// Return a suspended election to the state it was suspended from.
    pub fn resume(&self, election_id: &ElectionId, note: &str) -> Result<ElectionState, Error> {
        let reason = TransitionReason::Administrative {
            note: note.to_owned(),
        };
        let committed = self.ledger.transact(election_id, |election, now| {
            let to = match (election.state, election.suspended_from) {
                (ElectionState::Suspended, Some(to)) => to,
                (state, _) => return Err(Error::InvalidState(state)),
            };
            let payload = TransitionPayload {
                from: election.state,
                to,
                reason: reason.clone(),
                at: now,
            };
            Decision::append(EntryType::StateTransition, &payload, to)
        })?;

        info!("election {} resumed into {}", election_id, committed.value);
        Ok(committed.value)
    }

    /// `Suspended -> Aborted`. Terminal.
    pub fn abort(&self, election_id: &ElectionId, note: &str) -> Result<ElectionState, Error> {
        self.transition(
            election_id,
            ElectionState::Aborted,
            TransitionReason::Administrative {
                note: note.to_owned(),
            },
            |_, _| Ok(()),
        )
    }

    fn transition<F>(
        &self,
        election_id: &ElectionId,
        to: ElectionState,
        reason: TransitionReason,
        check: F,
    ) -> Result<ElectionState, Error>
    where
        F: Fn(&Election<S>, DateTime<Utc>) -> Result<(), Error>,
    {
        let committed = self.ledger.transact(election_id, |election, now| {
            if election.state == to {
                return Ok(Decision::Skip(to));
            }
            if !election.state.allows(to, election.suspended_from) {
                return Err(Error::InvalidTransition {
                    from: election.state,
                    to,
                });
            }
            check(election, now)?;

            let payload = TransitionPayload {
                from: election.state,
                to,
                reason: reason.clone(),
                at: now,
            };
            Decision::append(EntryType::StateTransition, &payload, to)
        })?;

        if committed.tip.is_some() {
            match &reason {
                TransitionReason::Lifecycle | TransitionReason::ScheduledEnd => {
                    info!("election {} is now {}", election_id, to)
                }
                other => warn!("election {} is now {} ({:?})", election_id, to, other),
            }
        }
        Ok(committed.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use chrono::Duration;

    #[test]
    fn transition_table() {
        use ElectionState::*;

        assert!(Configured.allows(KeyCeremonyPending, None));
        assert!(!Configured.allows(VotingOpen, None));
        assert!(!VotingClosed.allows(VotingOpen, None));
        assert!(VotingOpen.allows(Suspended, None));
        assert!(!Published.allows(Suspended, None));
        assert!(!Aborted.allows(Suspended, None));
        assert!(Suspended.allows(VotingOpen, Some(VotingOpen)));
        assert!(!Suspended.allows(Tallying, Some(VotingOpen)));
        assert!(Suspended.allows(Aborted, Some(VotingOpen)));
    }

    #[test]
    fn setup_minimum_hours() {
        // Start in 4h with a 3h minimum: allowed right away
        let fixture = Fixture::new(SchemeKind::Dummy, 1, 1);
        let engine = fixture.dummy_engine();
        fixture.clock.set(fixture.config.scheduled_start - Duration::hours(4));
        engine.create_election(fixture.config.clone()).unwrap();
        assert_eq!(
            engine.begin_key_ceremony(&fixture.election_id()).unwrap(),
            ElectionState::KeyCeremonyPending
        );

        // Start in 1h: too late
        let fixture = Fixture::new(SchemeKind::Dummy, 1, 1);
        let engine = fixture.dummy_engine();
        fixture.clock.set(fixture.config.scheduled_start - Duration::hours(1));
        engine.create_election(fixture.config.clone()).unwrap();
        let err = engine.begin_key_ceremony(&fixture.election_id()).unwrap_err();
        assert!(matches!(err, Error::SchedulingViolation { required_hours: 3 }));
        assert_eq!(err.kind(), ErrorKind::Scheduling);
        assert_eq!(
            engine.status(&fixture.election_id()).unwrap().state,
            ElectionState::Configured
        );
    }

    #[test]
    fn ceremony_must_complete_first() {
        let fixture = Fixture::new(SchemeKind::Dummy, 2, 2);
        let engine = fixture.dummy_engine();
        let id = fixture.election_id();
        engine.create_election(fixture.config.clone()).unwrap();
        engine.begin_key_ceremony(&id).unwrap();

        let machine = StateMachine::new(engine.ledger());
        assert!(matches!(
            machine.complete_key_ceremony(&id),
            Err(Error::CeremonyIncomplete)
        ));
        assert!(matches!(
            machine.open_voting(&id),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn voting_window() {
        let fixture = Fixture::new(SchemeKind::Dummy, 1, 1);
        let engine = fixture.dummy_engine();
        let id = fixture.election_id();
        fixture.run_ceremony(&engine);

        // Before the scheduled start
        fixture.clock.set(fixture.config.scheduled_start - Duration::minutes(1));
        assert!(matches!(
            engine.open_voting(&id),
            Err(Error::OutsideVotingWindow { .. })
        ));

        // Past the maximum delay
        fixture.clock.set(fixture.config.scheduled_start + Duration::hours(7));
        assert!(matches!(
            engine.open_voting(&id),
            Err(Error::OutsideVotingWindow { .. })
        ));

        fixture.clock.set(fixture.config.scheduled_start + Duration::minutes(5));
        assert_eq!(engine.open_voting(&id).unwrap(), ElectionState::VotingOpen);

        // Idempotent
        assert_eq!(engine.open_voting(&id).unwrap(), ElectionState::VotingOpen);
        let transitions = engine.status(&id).unwrap().transitions;
        assert_eq!(
            transitions,
            vec![
                ElectionState::KeyCeremonyPending,
                ElectionState::KeyCeremonyComplete,
                ElectionState::SetupWindow,
                ElectionState::VotingOpen
            ]
        );
    }

    #[test]
    fn tick_closes_at_scheduled_end() {
        let fixture = Fixture::new(SchemeKind::Dummy, 1, 1);
        let engine = fixture.dummy_engine();
        let id = fixture.election_id();
        fixture.open(&engine);

        assert_eq!(engine.tick(&id).unwrap(), ElectionState::VotingOpen);
        fixture.clock.set(fixture.config.scheduled_end);
        assert_eq!(engine.tick(&id).unwrap(), ElectionState::VotingClosed);
        assert_eq!(engine.tick(&id).unwrap(), ElectionState::VotingClosed);
    }

    #[test]
    fn suspend_resume_abort() {
        let fixture = Fixture::new(SchemeKind::Dummy, 1, 1);
        let engine = fixture.dummy_engine();
        let id = fixture.election_id();
        fixture.open(&engine);

        assert!(matches!(engine.resume(&id, "nothing to resume"), Err(Error::InvalidState(_))));

        engine.suspend(&id, "investigating").unwrap();
        engine.suspend(&id, "still investigating").unwrap();
        assert_eq!(engine.status(&id).unwrap().state, ElectionState::Suspended);

        assert_eq!(engine.resume(&id, "resolved").unwrap(), ElectionState::VotingOpen);

        engine.suspend(&id, "again").unwrap();
        assert_eq!(engine.abort(&id, "fraud").unwrap(), ElectionState::Aborted);
        assert!(matches!(
            engine.suspend(&id, "too late"),
            Err(Error::InvalidTransition { .. })
        ));
    }
}
