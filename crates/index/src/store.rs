//! Store contract between the retrieval core and persistence.
//!
//! The core never talks to a database directly: tracks, fingerprints and hash
//! bins go through [`FingerprintStore`]. A track's fingerprints must be
//! persisted before any hash bin referencing them.

use hashbrown::HashMap;
use perceptual::{AudioFingerprint, Fingerprint, FingerprintParams};
use serde::{Deserialize, Serialize};

use crate::lsh::LshConfig;
use crate::IndexError;

pub type TrackId = u64;
pub type FingerprintId = u64;

/// Bump this value whenever the on-disk record layout changes.
pub const INDEX_SCHEMA_VERSION: u16 = 2;

mod metadata_serde {
    use serde::de::Error as DeError;
    use serde::ser::Error as SerError;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    // bincode cannot drive `deserialize_any`, so the JSON travels as bytes.
    pub(super) fn serialize<S>(value: &Value, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let bytes = serde_json::to_vec(value).map_err(SerError::custom)?;
        serializer.serialize_bytes(&bytes)
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        serde_json::from_slice(&bytes).map_err(DeError::custom)
    }
}

/// Descriptive data supplied by the caller when inserting a track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Where the audio was read from, if it came from a file.
    pub source_path: Option<String>,
    pub duration_ms: Option<u64>,
    /// Arbitrary caller-defined fields.
    #[serde(with = "metadata_serde")]
    pub extra: serde_json::Value,
}

impl TrackMetadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = extra;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub id: TrackId,
    pub metadata: TrackMetadata,
    /// Ids of the track's fingerprints in sequence order.
    pub fingerprint_ids: Vec<FingerprintId>,
}

impl TrackRecord {
    pub fn fingerprint_count(&self) -> usize {
        self.fingerprint_ids.len()
    }
}

const fn default_schema_version() -> u16 {
    INDEX_SCHEMA_VERSION
}

/// A fingerprint as persisted, with its owning track and position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFingerprint {
    pub id: FingerprintId,
    pub track_id: TrackId,
    pub sequence: usize,
    pub start_frame: usize,
    pub bits: Fingerprint,
}

/// One `(table, bucket) -> (track, fingerprint)` posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashBinEntry {
    pub table: u16,
    pub bucket: u64,
    pub track_id: TrackId,
    pub fingerprint_id: FingerprintId,
}

/// Postings grouped by owning track.
pub type TrackPostings = HashMap<TrackId, Vec<HashBinEntry>>;

/// Predicate for [`FingerprintStore::read_tracks`]. Unset fields match
/// everything; string fields match case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackFilter {
    pub title_contains: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub min_fingerprints: Option<usize>,
}

impl TrackFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn title_contains(mut self, needle: impl Into<String>) -> Self {
        self.title_contains = Some(needle.into());
        self
    }

    pub fn artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn min_fingerprints(mut self, count: usize) -> Self {
        self.min_fingerprints = Some(count);
        self
    }

    pub fn matches(&self, track: &TrackRecord) -> bool {
        let meta = &track.metadata;
        if let Some(needle) = &self.title_contains {
            if !meta.title.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        if !optional_eq(&self.artist, &meta.artist) || !optional_eq(&self.album, &meta.album) {
            return false;
        }
        self.min_fingerprints
            .is_none_or(|min| track.fingerprint_count() >= min)
    }
}

fn optional_eq(wanted: &Option<String>, actual: &Option<String>) -> bool {
    match (wanted, actual) {
        (None, _) => true,
        (Some(w), Some(a)) => w.eq_ignore_ascii_case(a),
        (Some(_), None) => false,
    }
}

/// Parameters an index was built with. Probing with anything else would
/// silently return wrong candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub schema_version: u16,
    /// Settings that produced the stored fingerprint bits.
    pub fingerprint: FingerprintParams,
    pub fingerprint_bits: usize,
    pub lsh: LshConfig,
    pub pool_checksum: u64,
}

impl IndexDescriptor {
    /// Fail with [`IndexError::ConfigMismatch`] naming the first differing field.
    pub fn verify(&self, current: &IndexDescriptor) -> Result<(), IndexError> {
        let mut checks = vec![field(
            "schema_version",
            self.schema_version,
            current.schema_version,
        )];
        checks.extend(
            self.fingerprint
                .named_values()
                .into_iter()
                .zip(current.fingerprint.named_values())
                .map(|((name, stored), (_, now))| (name, stored, now)),
        );
        checks.extend([
            field("fingerprint_bits", self.fingerprint_bits, current.fingerprint_bits),
            field("tables", self.lsh.tables, current.lsh.tables),
            field("keys_per_table", self.lsh.keys_per_table, current.lsh.keys_per_table),
            field(
                "permutation_count",
                self.lsh.permutation_count,
                current.lsh.permutation_count,
            ),
            field(
                "permutation_length",
                self.lsh.permutation_length,
                current.lsh.permutation_length,
            ),
            field("seed", self.lsh.seed, current.lsh.seed),
            field(
                "disjoint_window",
                self.lsh.disjoint_window,
                current.lsh.disjoint_window,
            ),
            field("pool_checksum", self.pool_checksum, current.pool_checksum),
        ]);
        match checks.into_iter().find(|(_, stored, now)| stored != now) {
            Some((name, stored, now)) => Err(IndexError::ConfigMismatch {
                field: name.to_string(),
                stored,
                current: now,
            }),
            None => Ok(()),
        }
    }
}

fn field<T: ToString>(name: &'static str, stored: T, current: T) -> (&'static str, String, String) {
    (name, stored.to_string(), current.to_string())
}

/// Persistence operations the retrieval core relies on.
///
/// Implementations must support concurrent readers; writers are serialized
/// per call.
pub trait FingerprintStore: Send + Sync {
    /// Persist a new track and return its id.
    fn insert_track(&self, metadata: &TrackMetadata) -> Result<TrackId, IndexError>;

    /// Persist fingerprints for `track_id`, returning their ids in input order.
    fn insert_fingerprints(
        &self,
        track_id: TrackId,
        fingerprints: &[AudioFingerprint],
    ) -> Result<Vec<FingerprintId>, IndexError>;

    fn insert_hash_bins(&self, entries: &[HashBinEntry]) -> Result<(), IndexError>;

    /// Postings found under any of `buckets`, where `buckets[t]` is the key
    /// probed in table `t`.
    fn read_by_hash_buckets(&self, buckets: &[u64]) -> Result<TrackPostings, IndexError>;

    /// Every stored posting, for the full-scan path.
    fn read_all_postings(&self) -> Result<TrackPostings, IndexError>;

    /// Fingerprints by id. Unknown ids are skipped.
    fn read_fingerprints_by_id(
        &self,
        ids: &[FingerprintId],
    ) -> Result<Vec<StoredFingerprint>, IndexError>;

    /// Tracks by id. Unknown ids are skipped.
    fn read_tracks_by_id(&self, ids: &[TrackId]) -> Result<Vec<TrackRecord>, IndexError>;

    fn read_tracks(&self, filter: &TrackFilter) -> Result<Vec<TrackRecord>, IndexError>;

    /// Remove a track with its fingerprints and postings. Returns `false`
    /// when the track does not exist.
    fn delete_track(&self, track_id: TrackId) -> Result<bool, IndexError>;

    fn track_count(&self) -> Result<usize, IndexError>;

    fn fingerprint_count(&self) -> Result<usize, IndexError>;

    fn descriptor(&self) -> Result<Option<IndexDescriptor>, IndexError>;

    fn write_descriptor(&self, descriptor: &IndexDescriptor) -> Result<(), IndexError>;

    /// Write `expected` on first use, otherwise verify the stored descriptor.
    fn ensure_descriptor(&self, expected: &IndexDescriptor) -> Result<(), IndexError> {
        match self.descriptor()? {
            Some(stored) => stored.verify(expected),
            None => self.write_descriptor(expected),
        }
    }

    fn flush(&self) -> Result<(), IndexError> {
        Ok(())
    }
}
