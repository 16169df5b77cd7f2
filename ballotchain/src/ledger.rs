use crate::*;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// What a transaction decided to do against the projection it observed.
pub enum Decision<T> {
    /// Append an entry at the observed tip, then return the value
    Append {
        entry_type: EntryType,
        payload: Vec<u8>,
        value: T,
    },
    /// Nothing to write
    Skip(T),
}

impl<T> Decision<T> {
    pub fn append<P: Serialize>(entry_type: EntryType, payload: &P, value: T) -> Result<Self, Error> {
        Ok(Decision::Append {
            entry_type,
            payload: serde_cbor::to_vec(payload)?,
            value,
        })
    }
}

/// Outcome of a transaction. `tip` is set when an entry was appended.
#[derive(Debug)]
pub struct Committed<T> {
    pub value: T,
    pub tip: Option<ChainTip>,
}

/// Cached projections over the bulletin board, and compare-and-append
/// transactions against them.
///
/// Projections are refreshed incrementally from the board and verified link
/// by link. A broken chain halts all writes for that election in this
/// process.
pub struct Ledger<S: VotingScheme> {
    client: BoardClient,
    scheme: S,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    cache: Mutex<HashMap<ElectionId, Arc<Election<S>>>>,
    halted: Mutex<HashSet<ElectionId>>,
}

impl<S: VotingScheme> Ledger<S> {
    pub fn new(client: BoardClient, clock: Arc<dyn Clock>, retry: RetryPolicy) -> Self {
        Ledger {
            client,
            scheme: S::default(),
            clock,
            retry,
            cache: Mutex::new(HashMap::new()),
            halted: Mutex::new(HashSet::new()),
        }
    }

    pub fn client(&self) -> &BoardClient {
        &self.client
    }

    pub fn scheme(&self) -> &S {
        &self.scheme
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn is_halted(&self, election_id: &ElectionId) -> bool {
        self.halted
            .lock()
            .map(|halted| halted.contains(election_id))
            .unwrap_or(true)
    }

    /// Current projection of an election, refreshed from the board.
    pub fn election(&self, election_id: &ElectionId) -> Result<Arc<Election<S>>, Error> {
        if self.is_halted(election_id) {
            return Err(Error::ElectionHalted(*election_id));
        }

        let cached = self.cached(election_id);
        match self.refresh(election_id, cached) {
            Err(e) if e.kind() == ErrorKind::Integrity => {
                self.halt(election_id, &e);
                Err(e)
            }
            other => other,
        }
    }

    fn cached(&self, election_id: &ElectionId) -> Option<Arc<Election<S>>> {
        self.cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(election_id).cloned())
    }

    fn refresh(
        &self,
        election_id: &ElectionId,
        cached: Option<Arc<Election<S>>>,
    ) -> Result<Arc<Election<S>>, Error> {
        let mut entries = match &cached {
            Some(election) => self
                .client
                .read_from(*election_id, election.tip.next_sequence()),
            None => self.client.read_all(*election_id),
        };

        let mut election = match cached {
            Some(election) => election,
            None => {
                let genesis = entries
                    .next()
                    .ok_or(Error::UnknownElection(*election_id))??;
                verify_chain_from(None, std::slice::from_ref(&genesis))?;
                Arc::new(Election::from_genesis(&genesis)?)
            }
        };

        let start = election.tip.sequence_number;
        for entry in entries {
            let entry = entry?;
            verify_chain_from(Some(election.tip), std::slice::from_ref(&entry))?;
            Arc::make_mut(&mut election).apply(&entry)?;
        }

        if election.tip.sequence_number != start {
            debug!(
                "election {} replayed to entry {}",
                election_id, election.tip.sequence_number
            );
        }

        if let Ok(mut cache) = self.cache.lock() {
            let newer = cache
                .get(election_id)
                .map(|c| c.tip.sequence_number < election.tip.sequence_number)
                .unwrap_or(true);
            if newer {
                cache.insert(*election_id, election.clone());
            }
        }

        Ok(election)
    }

    fn halt(&self, election_id: &ElectionId, cause: &Error) {
        error!(
            target: "ballotchain::audit",
            "election {}: {}; halting all writes pending investigation", election_id, cause
        );
        if let Ok(mut halted) = self.halted.lock() {
            halted.insert(*election_id);
        }
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(election_id);
        }
    }

    /// Run `decide` against a fresh projection and append its entry at the
    /// tip it observed. On `ChainConflict` the projection is refreshed and
    /// `decide` runs again, with bounded backoff.
    pub fn transact<T, F>(&self, election_id: &ElectionId, mut decide: F) -> Result<Committed<T>, Error>
    where
        F: FnMut(&Election<S>, DateTime<Utc>) -> Result<Decision<T>, Error>,
    {
        self.retry.run(|| {
            let election = self.election(election_id)?;
            match decide(&election, self.clock.now())? {
                Decision::Skip(value) => Ok(Committed { value, tip: None }),
                Decision::Append {
                    entry_type,
                    payload,
                    value,
                } => {
                    let tip = self.client.append_at(
                        Some(&election.tip),
                        *election_id,
                        entry_type,
                        payload,
                    )?;
                    Ok(Committed {
                        value,
                        tip: Some(tip),
                    })
                }
            }
        })
    }

    /// Append the genesis entry of a new election.
    pub fn create(&self, config: &ElectionConfig) -> Result<ChainTip, Error> {
        if config.scheme != S::KIND {
            return Err(Error::SchemeMismatch {
                expected: S::KIND,
                found: config.scheme,
            });
        }
        if config.authority != self.client.public_key() {
            return Err(Error::AuthorityMismatch);
        }
        config.validate()?;

        let payload = serde_cbor::to_vec(config)?;
        self.client
            .append_at(None, config.id, EntryType::ElectionCreated, payload)
            .map_err(|e| match e {
                Error::ChainConflict { .. } => Error::ElectionExists(config.id),
                other => other,
            })
    }
}
