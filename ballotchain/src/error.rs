use crate::*;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Broad classes of failure, used by callers to decide between retrying,
/// surfacing to the initiating party, or escalating.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Wrong time for the request. Recoverable by retrying later, never retried automatically.
    Scheduling,
    /// A party broke the protocol or supplied malformed input.
    Protocol,
    /// Contention on the bulletin board or a replayed credential.
    Concurrency,
    /// The bulletin board no longer forms a valid chain. Always fatal.
    Integrity,
    /// Invalid inbound configuration or an unknown election.
    Configuration,
    /// Bulletin board unavailable or a codec failure.
    Transport,
}

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("ballotchain: setup must begin at least {required_hours}h before the scheduled start")]
    SchedulingViolation { required_hours: u32 },

    #[error("ballotchain: outside the voting window ({opens} to {closes})")]
    OutsideVotingWindow {
        opens: DateTime<Utc>,
        closes: DateTime<Utc>,
    },

    #[error("ballotchain: voter token expired at {0}")]
    TokenExpired(DateTime<Utc>),

    #[error("ballotchain: trustee {dealer} published a share that failed verification")]
    InvalidShareProof { dealer: u32 },

    #[error("ballotchain: quorum not met: {valid} valid trustees, {threshold} required")]
    QuorumNotMet { valid: usize, threshold: usize },

    #[error("ballotchain: invalid selection: {0}")]
    InvalidSelection(String),

    #[error("ballotchain: key ceremony has not completed")]
    CeremonyIncomplete,

    #[error("ballotchain: election is not open for voting (state: {0})")]
    ElectionNotOpen(ElectionState),

    #[error("ballotchain: invalid transition from {from} to {to}")]
    InvalidTransition { from: ElectionState, to: ElectionState },

    #[error("ballotchain: operation not allowed in state {0}")]
    InvalidState(ElectionState),

    #[error("ballotchain: trustee {0} is not part of this election")]
    UnknownTrustee(u32),

    #[error("ballotchain: trustee {0} is not in the qualified trustee set")]
    TrusteeNotQualified(u32),

    #[error("ballotchain: missing or undecryptable key share from trustee {0}")]
    MissingKeyShare(u32),

    #[error("ballotchain: decrypted total exceeds the number of counted ballots")]
    DiscreteLogOutOfRange,

    #[error("ballotchain: decryption shares do not combine: {0}")]
    ShareCombination(String),

    #[error("ballotchain: chain conflict: expected next sequence {expected}, board is at {found}")]
    ChainConflict { expected: u64, found: u64 },

    #[error("ballotchain: voter token has already been used")]
    TokenAlreadyUsed,

    #[error("ballotchain: chain hash mismatch at sequence {sequence}")]
    ChainHashMismatch { sequence: u64 },

    #[error("ballotchain: bad author signature at sequence {sequence}")]
    BadSignature { sequence: u64 },

    #[error("ballotchain: writes halted for election {0} pending investigation")]
    ElectionHalted(ElectionId),

    #[error("ballotchain: audit mismatch: {0}")]
    AuditMismatch(String),

    #[error("ballotchain: invalid election configuration: {0}")]
    InvalidConfiguration(String),

    #[error("ballotchain: unknown election {0}")]
    UnknownElection(ElectionId),

    #[error("ballotchain: election {0} already exists")]
    ElectionExists(ElectionId),

    #[error("ballotchain: election mismatch")]
    ElectionMismatch,

    #[error("ballotchain: election uses the {found} scheme, engine runs {expected}")]
    SchemeMismatch { expected: SchemeKind, found: SchemeKind },

    #[error("ballotchain: election authority public key mismatch")]
    AuthorityMismatch,

    #[error("ballotchain: document type {0} is not accepted")]
    UnacceptedDocumentType(String),

    #[error("ballotchain: invalid setting {name}: {value}")]
    InvalidSetting { name: &'static str, value: String },

    #[error("ballotchain: key derivation failed")]
    KeyDerivation,

    #[error("ballotchain: share transport decryption failed")]
    ShareDecryption,

    #[error("ballotchain: bulletin board unavailable: {0}")]
    Board(String),

    #[error("ballotchain: CBOR error: {0}")]
    CBOR(#[from] serde_cbor::Error),

    #[error("ballotchain: JSON error: {0}")]
    JSON(#[from] serde_json::Error),

    #[error("ballotchain: signature error: {0}")]
    Signature(#[from] ed25519_dalek::SignatureError),

    #[error("ballotchain: error deserializing entries: unknown format")]
    DeserializationUnknownFormat,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SchedulingViolation { .. }
            | Error::OutsideVotingWindow { .. }
            | Error::TokenExpired(_) => ErrorKind::Scheduling,

            Error::InvalidShareProof { .. }
            | Error::QuorumNotMet { .. }
            | Error::InvalidSelection(_)
            | Error::CeremonyIncomplete
            | Error::ElectionNotOpen(_)
            | Error::InvalidTransition { .. }
            | Error::InvalidState(_)
            | Error::UnknownTrustee(_)
            | Error::TrusteeNotQualified(_)
            | Error::MissingKeyShare(_)
            | Error::DiscreteLogOutOfRange
            | Error::ShareCombination(_) => ErrorKind::Protocol,

            Error::ChainConflict { .. } | Error::TokenAlreadyUsed => ErrorKind::Concurrency,

            Error::ChainHashMismatch { .. }
            | Error::BadSignature { .. }
            | Error::ElectionHalted(_)
            | Error::AuditMismatch(_) => ErrorKind::Integrity,

            Error::InvalidConfiguration(_)
            | Error::UnknownElection(_)
            | Error::ElectionExists(_)
            | Error::ElectionMismatch
            | Error::SchemeMismatch { .. }
            | Error::AuthorityMismatch
            | Error::UnacceptedDocumentType(_)
            | Error::InvalidSetting { .. } => ErrorKind::Configuration,

            Error::KeyDerivation
            | Error::ShareDecryption
            | Error::Board(_)
            | Error::CBOR(_)
            | Error::JSON(_)
            | Error::Signature(_)
            | Error::DeserializationUnknownFormat => ErrorKind::Transport,
        }
    }

    /// Only chain conflicts are expected under contention and safe to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ChainConflict { .. })
    }
}
