use crate::*;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;

/// Payload of a `Ballot` entry. The token's identity commitment doubles as
/// the consumption marker, so ballot and marker land in one append.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(bound = "")]
pub struct BallotPayload<S: VotingScheme> {
    pub token: IdentityCommitment,
    pub ciphertext: S::Ciphertext,
    pub proof: S::BallotProof,
    pub cast_at: DateTime<Utc>,
}

/// Audit entry for a cast refused because its token was already spent
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RejectedCastPayload {
    pub token: IdentityCommitment,
    pub reason: String,

    /// Sequence number of the ballot that consumed the token
    pub consumed_by: u64,
    pub at: DateTime<Utc>,
}

/// Acknowledgement returned to the voter
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BallotReceipt {
    pub election_id: ElectionId,
    pub sequence_number: u64,
    pub entry_hash: EntryHash,
    pub cast_at: DateTime<Utc>,
}

/// Accepts ballots against voter tokens.
pub struct BallotBox<'a, S: VotingScheme> {
    ledger: &'a Ledger<S>,
}

impl<'a, S: VotingScheme> BallotBox<'a, S> {
    pub fn new(ledger: &'a Ledger<S>) -> Self {
        BallotBox { ledger }
    }

    /// Encrypt `selections` and commit them with the token's consumption marker.
    ///
    /// State, expiry and spent-token checks are made against the same
    /// projection the append is conditioned on; losing a race to another
    /// append rereads the board and checks again.
    pub fn cast_ballot(&self, token: &VoterToken, selections: &[u32]) -> Result<BallotReceipt, Error> {
        let election_id = token.election_id;
        let scheme = self.ledger.scheme();

        let result = self.ledger.transact(&election_id, |election, now| {
            if election.state != ElectionState::VotingOpen {
                return Err(Error::ElectionNotOpen(election.state));
            }
            if now >= election.config.scheduled_end {
                return Err(Error::OutsideVotingWindow {
                    opens: election.config.scheduled_start,
                    closes: election.config.scheduled_end,
                });
            }
            if token.is_expired(now) {
                return Err(Error::TokenExpired(token.expires_at));
            }
            if election.spent.contains_key(&token.voter_identity_commitment) {
                return Err(Error::TokenAlreadyUsed);
            }

            let public_key = election.public_key().ok_or(Error::CeremonyIncomplete)?;
            let shape = election.config.ballot_shape();
            let mut csprng = OsRng {};
            let context = ballot_context(&election_id, &token.voter_identity_commitment);
            let (ciphertext, proof) =
                scheme.encrypt_ballot(public_key, &shape, &context, selections, &mut csprng)?;

            let payload = BallotPayload::<S> {
                token: token.voter_identity_commitment,
                ciphertext,
                proof,
                cast_at: now,
            };
            Decision::append(EntryType::Ballot, &payload, now)
        });

        match result {
            Ok(committed) => {
                let tip = committed
                    .tip
                    .ok_or_else(|| Error::Board("ballot was not appended".into()))?;
                debug!("ballot accepted at entry {} of {}", tip.sequence_number, election_id);
                Ok(BallotReceipt {
                    election_id,
                    sequence_number: tip.sequence_number,
                    entry_hash: tip.hash,
                    cast_at: committed.value,
                })
            }
            Err(Error::TokenAlreadyUsed) => {
                self.record_rejection(token);
                Err(Error::TokenAlreadyUsed)
            }
            Err(e) => {
                info!("ballot for {} refused: {}", election_id, e);
                Err(e)
            }
        }
    }

    /// Sequence number of the ballot entry that consumed this token, if any.
    pub fn consumed_entry_sequence(&self, token: &VoterToken) -> Result<Option<u64>, Error> {
        let election = self.ledger.election(&token.election_id)?;
        Ok(election.spent.get(&token.voter_identity_commitment).copied())
    }

    fn record_rejection(&self, token: &VoterToken) {
        let appended = self.ledger.transact(&token.election_id, |election, now| {
            let consumed_by = election
                .spent
                .get(&token.voter_identity_commitment)
                .copied()
                .unwrap_or_default();
            let payload = RejectedCastPayload {
                token: token.voter_identity_commitment,
                reason: Error::TokenAlreadyUsed.to_string(),
                consumed_by,
                at: now,
            };
            Decision::append(EntryType::RejectedCast, &payload, consumed_by)
        });

        match appended {
            Ok(committed) => warn!(
                target: "ballotchain::audit",
                "election {}: replayed voter token {:?} refused (consumed by entry {})",
                token.election_id, token.voter_identity_commitment, committed.value
            ),
            Err(e) => error!(
                target: "ballotchain::audit",
                "election {}: replayed voter token {:?} refused, audit entry not recorded: {}",
                token.election_id, token.voter_identity_commitment, e
            ),
        }
    }
}
