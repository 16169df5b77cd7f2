use crate::*;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::PublicKey;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque election identifier
#[derive(Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ElectionId(Uuid);

impl ElectionId {
    pub fn new() -> Self {
        ElectionId(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for ElectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ElectionId {
    fn from(id: Uuid) -> Self {
        ElectionId(id)
    }
}

impl fmt::Display for ElectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ElectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ElectionId({})", self.0)
    }
}

impl FromStr for ElectionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Uuid::parse_str(s)
            .map(ElectionId)
            .map_err(|_| Error::InvalidConfiguration(format!("not an election id: {}", s)))
    }
}

/// A trustee as declared in the election configuration.
///
/// Trustees are addressed by their 1-based position in `ElectionConfig::trustees`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrusteeDescriptor {
    pub id: Uuid,
    pub name: String,

    /// Verifies every bulletin board entry this trustee authors
    #[serde(with = "serde_hex::ed_public_key")]
    pub signing_key: PublicKey,

    /// Key shares addressed to this trustee are encrypted to this key
    pub encryption_key: EncryptionKey,
}

/// Inbound election configuration, recorded verbatim in the genesis entry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElectionConfig {
    pub id: ElectionId,
    pub title: String,
    pub scheme: SchemeKind,

    /// Election authority key. Signs every entry that is not trustee-authored.
    #[serde(with = "serde_hex::ed_public_key")]
    pub authority: PublicKey,

    pub setup_minimum_hours_before_start: u32,
    pub start_vote_maximum_hours_before_start: u32,
    pub voter_token_expiration_minutes: u32,
    pub document_types: Vec<String>,

    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,

    /// Ballot options, in ballot order
    pub options: Vec<String>,
    pub max_selections: u32,

    pub trustees: Vec<TrusteeDescriptor>,

    /// Minimum number of trustees needed to decrypt
    pub threshold: u32,
}

impl ElectionConfig {
    /// Upper bound on the hour-valued scheduling fields, ten years
    pub const MAX_SCHEDULE_HOURS: u32 = 10 * 366 * 24;

    /// Upper bound on `voter_token_expiration_minutes`, thirty days
    pub const MAX_TOKEN_MINUTES: u32 = 30 * 24 * 60;

    /// Create a new configuration with scheduling defaults taken from `settings`.
    ///
    /// Options and trustees start out empty and must be filled in before the
    /// election is created.
    pub fn new(
        settings: &Settings,
        scheme: SchemeKind,
        authority: PublicKey,
        scheduled_start: DateTime<Utc>,
        scheduled_end: DateTime<Utc>,
    ) -> Self {
        ElectionConfig {
            id: ElectionId::new(),
            title: String::new(),
            scheme,
            authority,
            setup_minimum_hours_before_start: settings.setup_minimum_hours_before_start,
            start_vote_maximum_hours_before_start: settings.start_vote_maximum_hours_before_start,
            voter_token_expiration_minutes: settings.voter_token_expiration_minutes,
            document_types: settings.document_types.clone(),
            scheduled_start,
            scheduled_end,
            options: vec![],
            max_selections: 1,
            trustees: vec![],
            threshold: 1,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: &str| Err(Error::InvalidConfiguration(msg.to_owned()));

        if self.trustees.is_empty() {
            return invalid("at least one trustee is required");
        }
        if self.threshold == 0 || self.threshold as usize > self.trustees.len() {
            return invalid("threshold must be between 1 and the number of trustees");
        }
        if self.options.is_empty() {
            return invalid("at least one ballot option is required");
        }
        if self.max_selections == 0 || self.max_selections as usize > self.options.len() {
            return invalid("max selections must be between 1 and the number of options");
        }
        if self.scheduled_start >= self.scheduled_end {
            return invalid("scheduled start must be before scheduled end");
        }
        if self.document_types.is_empty() {
            return invalid("at least one document type must be accepted");
        }
        if self.setup_minimum_hours_before_start > Self::MAX_SCHEDULE_HOURS
            || self.start_vote_maximum_hours_before_start > Self::MAX_SCHEDULE_HOURS
        {
            return invalid("scheduling hours are out of range");
        }
        if self.voter_token_expiration_minutes == 0
            || self.voter_token_expiration_minutes > Self::MAX_TOKEN_MINUTES
        {
            return invalid("voter token expiration is out of range");
        }
        self.setup_deadline()?;
        self.opening_window()?;

        let mut options = HashSet::new();
        if !self.options.iter().all(|o| !o.is_empty() && options.insert(o)) {
            return invalid("ballot options must be unique and non-empty");
        }

        let mut ids = HashSet::new();
        let mut keys = HashSet::new();
        for trustee in self.trustees.iter() {
            if !ids.insert(trustee.id) || !keys.insert(trustee.signing_key.to_bytes()) {
                return invalid("trustee ids and signing keys must be unique");
            }
        }

        Ok(())
    }

    pub fn num_trustees(&self) -> usize {
        self.trustees.len()
    }

    pub fn threshold(&self) -> usize {
        self.threshold as usize
    }

    /// Trustee at the given 1-based index
    pub fn trustee(&self, index: u32) -> Option<&TrusteeDescriptor> {
        if index == 0 {
            return None;
        }
        self.trustees.get(index as usize - 1)
    }

    /// 1-based index of the trustee holding this signing key
    pub fn trustee_index(&self, signing_key: &PublicKey) -> Option<u32> {
        self.trustees
            .iter()
            .position(|t| &t.signing_key == signing_key)
            .map(|pos| pos as u32 + 1)
    }

    pub fn trustee_indices(&self) -> impl Iterator<Item = u32> {
        1..=self.trustees.len() as u32
    }

    pub fn ballot_shape(&self) -> BallotShape {
        BallotShape {
            options: self.options.len(),
            max_selections: self.max_selections,
        }
    }

    /// Latest moment the key ceremony may begin
    pub fn setup_deadline(&self) -> Result<DateTime<Utc>, Error> {
        self.scheduled_start
            .checked_sub_signed(Duration::hours(self.setup_minimum_hours_before_start as i64))
            .ok_or_else(|| out_of_range("setup_minimum_hours_before_start"))
    }

    /// Interval in which voting may be opened
    pub fn opening_window(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), Error> {
        let latest = self
            .scheduled_start
            .checked_add_signed(Duration::hours(
                self.start_vote_maximum_hours_before_start as i64,
            ))
            .ok_or_else(|| out_of_range("start_vote_maximum_hours_before_start"))?;
        Ok((self.scheduled_start, latest))
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::minutes(self.voter_token_expiration_minutes as i64)
    }

    pub fn accepts_document(&self, document_type: &str) -> bool {
        self.document_types.iter().any(|t| t == document_type)
    }
}

fn out_of_range(field: &str) -> Error {
    Error::InvalidConfiguration(format!("{} puts the schedule out of range", field))
}
