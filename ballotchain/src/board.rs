//! The bulletin board: an external, append-only, hash-chained log of entries
//! keyed by election. Everything the engine knows is derived from it.

use crate::*;
use ed25519_dalek::{Keypair, PublicKey, Signature, Signer};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Kinds of entries recorded on the board.
#[derive(Serialize, Deserialize, Copy, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    ElectionCreated,
    StateTransition,
    KeyCommitment,
    CommitmentsClosed,
    KeyShares,
    ShareVerification,
    CeremonyComplete,
    Ballot,
    RejectedCast,
    RejectedBallot,
    DecryptionShare,
    TallyPublished,
}

impl EntryType {
    /// Entries of these types are authored by a trustee rather than the election authority.
    pub fn is_trustee_authored(&self) -> bool {
        matches!(
            self,
            EntryType::KeyCommitment
                | EntryType::KeyShares
                | EntryType::ShareVerification
                | EntryType::DecryptionShare
        )
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            EntryType::ElectionCreated => "election_created",
            EntryType::StateTransition => "state_transition",
            EntryType::KeyCommitment => "key_commitment",
            EntryType::CommitmentsClosed => "commitments_closed",
            EntryType::KeyShares => "key_shares",
            EntryType::ShareVerification => "share_verification",
            EntryType::CeremonyComplete => "ceremony_complete",
            EntryType::Ballot => "ballot",
            EntryType::RejectedCast => "rejected_cast",
            EntryType::RejectedBallot => "rejected_ballot",
            EntryType::DecryptionShare => "decryption_share",
            EntryType::TallyPublished => "tally_published",
        };
        write!(f, "{}", name)
    }
}

/// SHA-256 of an entry's canonical encoding.
#[derive(Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EntryHash(#[serde(with = "serde_hex::fixed32")] pub [u8; 32]);

impl EntryHash {
    /// Prior hash of every genesis entry.
    pub const ZERO: EntryHash = EntryHash([0; 32]);
}

impl fmt::Display for EntryHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for EntryHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "EntryHash({})", self)
    }
}

/// The signer's key together with its signature over the unsigned entry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorSignature {
    #[serde(with = "serde_hex::ed_public_key")]
    pub public_key: PublicKey,

    #[serde(with = "serde_hex::ed_signature")]
    pub signature: Signature,
}

/// An immutable bulletin board record.
///
/// The wire form is stable: field names and order are part of the contract
/// third-party auditors rely on to recompute the hash chain.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub election_id: ElectionId,
    pub sequence_number: u64,
    pub entry_type: EntryType,
    #[serde(with = "serde_hex")]
    pub payload: Vec<u8>,
    pub author_signature: AuthorSignature,
    pub prior_entry_hash: EntryHash,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SigningBody<'a> {
    election_id: &'a ElectionId,
    sequence_number: u64,
    entry_type: EntryType,
    #[serde(serialize_with = "serde_hex::serialize")]
    payload: &'a [u8],
    prior_entry_hash: &'a EntryHash,
}

impl Entry {
    /// Build and sign an entry that extends the chain after `prior`.
    pub fn sign(
        signer: &Keypair,
        election_id: ElectionId,
        prior: Option<&ChainTip>,
        entry_type: EntryType,
        payload: Vec<u8>,
    ) -> Result<Self, Error> {
        let (sequence_number, prior_entry_hash) = match prior {
            Some(tip) => (tip.next_sequence(), tip.hash),
            None => (0, EntryHash::ZERO),
        };

        let body = signing_bytes(
            &election_id,
            sequence_number,
            entry_type,
            &payload,
            &prior_entry_hash,
        )?;
        let signature = signer.sign(&body);

        Ok(Entry {
            election_id,
            sequence_number,
            entry_type,
            payload,
            author_signature: AuthorSignature {
                public_key: signer.public,
                signature,
            },
            prior_entry_hash,
        })
    }

    /// Canonical encoding hashed into the chain.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_cbor::to_vec(self)?)
    }

    pub fn hash(&self) -> Result<EntryHash, Error> {
        let digest = Sha256::digest(&self.canonical_bytes()?);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Ok(EntryHash(out))
    }

    pub fn author(&self) -> &PublicKey {
        &self.author_signature.public_key
    }

    /// Check the author signature over the unsigned fields.
    pub fn verify_signature(&self) -> Result<(), Error> {
        let body = signing_bytes(
            &self.election_id,
            self.sequence_number,
            self.entry_type,
            &self.payload,
            &self.prior_entry_hash,
        )?;
        self.author_signature
            .public_key
            .verify_strict(&body, &self.author_signature.signature)
            .map_err(|_| Error::BadSignature {
                sequence: self.sequence_number,
            })
    }

    /// Parse a list of entries from JSON or CBOR.
    pub fn list_from_bytes(bytes: &[u8]) -> Result<Vec<Entry>, Error> {
        use content_inspector::ContentType;

        match content_inspector::inspect(bytes) {
            ContentType::UTF_8 | ContentType::UTF_8_BOM => Ok(serde_json::from_slice(bytes)?),
            ContentType::BINARY => Ok(serde_cbor::from_slice(bytes)?),
            _ => Err(Error::DeserializationUnknownFormat),
        }
    }
}

fn signing_bytes(
    election_id: &ElectionId,
    sequence_number: u64,
    entry_type: EntryType,
    payload: &[u8],
    prior_entry_hash: &EntryHash,
) -> Result<Vec<u8>, Error> {
    let body = SigningBody {
        election_id,
        sequence_number,
        entry_type,
        payload,
        prior_entry_hash,
    };
    Ok(serde_cbor::to_vec(&body)?)
}

/// Latest entry of an election's chain.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChainTip {
    pub sequence_number: u64,
    pub hash: EntryHash,
}

impl ChainTip {
    pub fn of(entry: &Entry) -> Result<Self, Error> {
        Ok(ChainTip {
            sequence_number: entry.sequence_number,
            hash: entry.hash()?,
        })
    }

    pub fn next_sequence(&self) -> u64 {
        self.sequence_number + 1
    }
}

/// Recompute every hash link and signature of a chain starting at genesis.
pub fn verify_chain(entries: &[Entry]) -> Result<(), Error> {
    verify_chain_from(None, entries).map(|_| ())
}

/// Same as [`verify_chain`], returning a plain verdict.
pub fn is_valid_chain(entries: &[Entry]) -> bool {
    verify_chain(entries).is_ok()
}

/// Verify `entries` as the continuation of a chain whose last verified entry is `prior`.
///
/// Returns the new tip (or `prior` unchanged when `entries` is empty).
pub fn verify_chain_from(
    prior: Option<ChainTip>,
    entries: &[Entry],
) -> Result<Option<ChainTip>, Error> {
    let mut tip = prior;
    let election_id = entries.first().map(|e| e.election_id);

    for entry in entries {
        let (expected_sequence, expected_hash) = match tip {
            Some(tip) => (tip.next_sequence(), tip.hash),
            None => (0, EntryHash::ZERO),
        };

        if entry.sequence_number != expected_sequence
            || entry.prior_entry_hash != expected_hash
            || Some(entry.election_id) != election_id
        {
            return Err(Error::ChainHashMismatch {
                sequence: entry.sequence_number,
            });
        }
        entry.verify_signature()?;

        tip = Some(ChainTip::of(entry)?);
    }

    Ok(tip)
}

/// The narrow interface to the external ledger service.
///
/// Implementations serialize appends per election: `submit` must reject an
/// entry whose sequence number or prior hash does not extend the current tip.
pub trait BulletinBoard: Send + Sync {
    /// Current tip of the election's chain, or `None` when it has no entries.
    fn tip(&self, election_id: &ElectionId) -> Result<Option<ChainTip>, Error>;

    /// Read up to `limit` entries starting at sequence number `from`.
    fn read_range(
        &self,
        election_id: &ElectionId,
        from: u64,
        limit: usize,
    ) -> Result<Vec<Entry>, Error>;

    /// Append a signed entry, returning its sequence number.
    fn submit(&self, entry: Entry) -> Result<u64, Error>;
}

/// A simple board that keeps every chain in memory
#[derive(Default)]
pub struct MemBoard {
    inner: RwLock<HashMap<ElectionId, Vec<(Entry, EntryHash)>>>,
}

impl MemBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite stored entries in place, bypassing every check. Only useful for
    /// tamper-detection drills.
    #[doc(hidden)]
    pub fn tamper<F>(&self, election_id: &ElectionId, f: F)
    where
        F: FnOnce(&mut Vec<Entry>),
    {
        if let Ok(mut chains) = self.inner.write() {
            if let Some(chain) = chains.get_mut(election_id) {
                let mut entries: Vec<Entry> = chain.drain(..).map(|(e, _)| e).collect();
                f(&mut entries);
                for entry in entries {
                    let hash = entry.hash().unwrap_or(EntryHash::ZERO);
                    chain.push((entry, hash));
                }
            }
        }
    }
}

impl BulletinBoard for MemBoard {
    fn tip(&self, election_id: &ElectionId) -> Result<Option<ChainTip>, Error> {
        let chains = self
            .inner
            .read()
            .map_err(|_| Error::Board("lock poisoned".into()))?;

        Ok(chains
            .get(election_id)
            .and_then(|chain| chain.last())
            .map(|(entry, hash)| ChainTip {
                sequence_number: entry.sequence_number,
                hash: *hash,
            }))
    }

    fn read_range(
        &self,
        election_id: &ElectionId,
        from: u64,
        limit: usize,
    ) -> Result<Vec<Entry>, Error> {
        let chains = self
            .inner
            .read()
            .map_err(|_| Error::Board("lock poisoned".into()))?;

        let chain = match chains.get(election_id) {
            Some(chain) => chain,
            None => return Ok(vec![]),
        };

        Ok(chain
            .iter()
            .skip(from as usize)
            .take(limit)
            .map(|(entry, _)| entry.clone())
            .collect())
    }

    fn submit(&self, entry: Entry) -> Result<u64, Error> {
        entry.verify_signature()?;
        let hash = entry.hash()?;

        let mut chains = self
            .inner
            .write()
            .map_err(|_| Error::Board("lock poisoned".into()))?;
        let chain = chains.entry(entry.election_id).or_insert_with(Vec::new);

        let (expected, tip_hash) = match chain.last() {
            Some((last, last_hash)) => (last.sequence_number + 1, *last_hash),
            None => (0, EntryHash::ZERO),
        };
        if entry.sequence_number != expected || entry.prior_entry_hash != tip_hash {
            return Err(Error::ChainConflict {
                expected: entry.sequence_number,
                found: expected,
            });
        }

        let sequence_number = entry.sequence_number;
        chain.push((entry, hash));
        Ok(sequence_number)
    }
}

/// Signs and appends entries for one author, and reads chains back.
#[derive(Clone)]
pub struct BoardClient {
    board: Arc<dyn BulletinBoard>,
    signer: Arc<Keypair>,
    page_size: usize,
}

impl BoardClient {
    pub fn new(board: Arc<dyn BulletinBoard>, signer: Keypair, page_size: usize) -> Self {
        BoardClient {
            board,
            signer: Arc::new(signer),
            page_size: page_size.max(1),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.signer.public
    }

    pub fn tip(&self, election_id: &ElectionId) -> Result<Option<ChainTip>, Error> {
        self.board.tip(election_id)
    }

    /// Append at the board's current tip.
    ///
    /// Fails with `ChainConflict` when another writer got there first; the
    /// caller must reread and reapply.
    pub fn append(
        &self,
        election_id: ElectionId,
        entry_type: EntryType,
        payload: Vec<u8>,
    ) -> Result<u64, Error> {
        let tip = self.board.tip(&election_id)?;
        self.append_at(tip.as_ref(), election_id, entry_type, payload)
            .map(|tip| tip.sequence_number)
    }

    /// Compare-and-append: the entry only lands if `expected` is still the tip.
    pub fn append_at(
        &self,
        expected: Option<&ChainTip>,
        election_id: ElectionId,
        entry_type: EntryType,
        payload: Vec<u8>,
    ) -> Result<ChainTip, Error> {
        let entry = Entry::sign(&self.signer, election_id, expected, entry_type, payload)?;
        let tip = ChainTip::of(&entry)?;
        self.board.submit(entry)?;

        debug!(
            "appended {} #{} to election {}",
            entry_type, tip.sequence_number, election_id
        );
        Ok(tip)
    }

    /// Lazily read an election's whole chain in sequence order.
    pub fn read_all(&self, election_id: ElectionId) -> Entries {
        self.read_from(election_id, 0)
    }

    /// Lazily read an election's chain starting at sequence number `from`.
    pub fn read_from(&self, election_id: ElectionId, from: u64) -> Entries {
        Entries {
            board: self.board.clone(),
            election_id,
            next: from,
            page_size: self.page_size,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }
}

/// Paging iterator over a chain. Restart from any point with
/// [`BoardClient::read_from`] using [`Entries::position`].
pub struct Entries {
    board: Arc<dyn BulletinBoard>,
    election_id: ElectionId,
    next: u64,
    page_size: usize,
    buffer: VecDeque<Entry>,
    exhausted: bool,
}

impl Entries {
    /// Sequence number of the next entry this iterator will yield.
    pub fn position(&self) -> u64 {
        self.next
    }
}

impl Iterator for Entries {
    type Item = Result<Entry, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self
                .board
                .read_range(&self.election_id, self.next, self.page_size)
            {
                Ok(page) => {
                    self.exhausted = page.len() < self.page_size;
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }

        let entry = self.buffer.pop_front()?;
        self.next = entry.sequence_number + 1;
        Some(Ok(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn client(board: &Arc<MemBoard>, page_size: usize) -> BoardClient {
        let mut csprng = OsRng {};
        BoardClient::new(board.clone(), Keypair::generate(&mut csprng), page_size)
    }

    fn fill(client: &BoardClient, election_id: ElectionId, n: u8) {
        for i in 0..n {
            client
                .append(election_id, EntryType::StateTransition, vec![i])
                .unwrap();
        }
    }

    #[test]
    fn append_and_read() {
        let board = Arc::new(MemBoard::new());
        let client = client(&board, 3);
        let election_id = ElectionId::new();

        fill(&client, election_id, 7);

        let entries: Vec<Entry> = client
            .read_all(election_id)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(entries.len(), 7);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.sequence_number, i as u64);
            assert_eq!(entry.payload, vec![i as u8]);
        }
        assert_eq!(entries[0].prior_entry_hash, EntryHash::ZERO);
        verify_chain(&entries).unwrap();

        // Other elections are unaffected
        assert_eq!(client.read_all(ElectionId::new()).count(), 0);
    }

    #[test]
    fn restartable_read() {
        let board = Arc::new(MemBoard::new());
        let client = client(&board, 2);
        let election_id = ElectionId::new();
        fill(&client, election_id, 5);

        let mut entries = client.read_all(election_id);
        entries.next().unwrap().unwrap();
        entries.next().unwrap().unwrap();
        let position = entries.position();
        assert_eq!(position, 2);

        let rest: Vec<Entry> = client
            .read_from(election_id, position)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0].sequence_number, 2);

        // The continuation verifies against the prefix tip
        let prefix: Vec<Entry> = client
            .read_all(election_id)
            .take(2)
            .collect::<Result<_, _>>()
            .unwrap();
        let tip = verify_chain_from(None, &prefix).unwrap();
        verify_chain_from(tip, &rest).unwrap();
    }

    #[test]
    fn stale_tip_conflicts() {
        let board = Arc::new(MemBoard::new());
        let alice = client(&board, 16);
        let bob = client(&board, 16);
        let election_id = ElectionId::new();

        alice
            .append(election_id, EntryType::ElectionCreated, vec![])
            .unwrap();
        let tip = alice.tip(&election_id).unwrap();

        bob.append_at(tip.as_ref(), election_id, EntryType::Ballot, vec![1])
            .unwrap();
        let err = alice
            .append_at(tip.as_ref(), election_id, EntryType::Ballot, vec![2])
            .unwrap_err();
        assert!(matches!(err, Error::ChainConflict { .. }));

        // Rereading the tip lets the append through
        alice
            .append(election_id, EntryType::Ballot, vec![2])
            .unwrap();

        let entries: Vec<Entry> = alice
            .read_all(election_id)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(entries.len(), 3);
        assert!(is_valid_chain(&entries));
    }

    #[test]
    fn tampering_is_detected() {
        let board = Arc::new(MemBoard::new());
        let client = client(&board, 16);
        let election_id = ElectionId::new();
        fill(&client, election_id, 4);

        let mut entries: Vec<Entry> = client
            .read_all(election_id)
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(is_valid_chain(&entries));

        // Altered payload breaks the signature
        let mut altered = entries.clone();
        altered[1].payload = vec![42];
        assert!(matches!(
            verify_chain(&altered),
            Err(Error::BadSignature { sequence: 1 })
        ));

        // Dropped entry breaks the hash link
        entries.remove(2);
        assert!(matches!(
            verify_chain(&entries),
            Err(Error::ChainHashMismatch { sequence: 3 })
        ));
    }

    #[test]
    fn json_wire_format() {
        let board = Arc::new(MemBoard::new());
        let client = client(&board, 16);
        let election_id = ElectionId::new();
        fill(&client, election_id, 2);

        let entries: Vec<Entry> = client
            .read_all(election_id)
            .collect::<Result<_, _>>()
            .unwrap();
        let json = serde_json::to_vec_pretty(&entries).unwrap();
        let text = String::from_utf8(json.clone()).unwrap();
        for field in &[
            "electionId",
            "sequenceNumber",
            "entryType",
            "payload",
            "authorSignature",
            "priorEntryHash",
        ] {
            assert!(text.contains(field), "missing {}", field);
        }

        let parsed = Entry::list_from_bytes(&json).unwrap();
        assert_eq!(parsed, entries);
        assert_eq!(parsed[1].hash().unwrap(), entries[1].hash().unwrap());

        let cbor = serde_cbor::to_vec(&entries).unwrap();
        assert_eq!(Entry::list_from_bytes(&cbor).unwrap(), entries);
    }
}
