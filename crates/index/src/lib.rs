//! # ACFP Index
//!
//! MinHash LSH indexing for audio fingerprints, plus a backend-agnostic store
//! for tracks, fingerprints and hash bins.
//!
//! ## Core Features
//!
//! - **Permutation pool** ([`PermutationPool`]): deterministic, seed-derived
//!   windows of fingerprint bit positions, shared read-only by every insert
//!   and probe.
//! - **MinHash + LSH banding** ([`MinHasher`]): one `u8` per permutation,
//!   folded `K` at a time into `L` bucket keys.
//! - **Distances** ([`similarity`]): Hamming, Jaccard and sign-cosine between
//!   two fingerprints, used at re-ranking time.
//! - **Store contract** ([`FingerprintStore`]) with a key-value implementation
//!   ([`FingerprintIndex`]) over pluggable [`IndexBackend`]s: an in-memory map
//!   for tests and Redb for persistence (feature `backend-redb`). Records are
//!   bincode encoded and zstd compressed.
//!
//! ## Example Usage
//!
//! ```
//! use index::{FingerprintIndex, FingerprintStore, IndexConfig, MinHasher, TrackMetadata};
//! use perceptual::{AudioFingerprint, Fingerprint};
//!
//! let cfg = IndexConfig::new();
//! let index = FingerprintIndex::open(cfg.clone()).unwrap();
//! let hasher = MinHasher::new(&cfg.lsh, 8192).unwrap();
//!
//! let mut bits = Fingerprint::zeros(8192);
//! bits.set(10, true);
//! bits.set(4001, true);
//! let fp = AudioFingerprint { sequence: 0, start_frame: 0, bits };
//!
//! let track = index.insert_track(&TrackMetadata::new("demo")).unwrap();
//! let ids = index.insert_fingerprints(track, &[fp.clone()]).unwrap();
//! let buckets = hasher.hash(&fp.bits).unwrap().unwrap();
//! index.insert_hash_bins(&index::hash_bin_entries(track, ids[0], &buckets)).unwrap();
//!
//! let hits = index.read_by_hash_buckets(&buckets).unwrap();
//! assert_eq!(hits[&track].len(), 25);
//! ```

mod backend;
pub mod lsh;
pub mod minhash;
pub mod similarity;
pub mod store;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

pub use backend::{BackendConfig, InMemoryBackend, IndexBackend};
#[cfg(feature = "backend-redb")]
pub use backend::RedbBackend;
pub use lsh::{LshConfig, PermutationPool, DEFAULT_PERMUTATION_SEED};
pub use minhash::{estimate_jaccard, BucketKeys, MinHasher};
pub use similarity::{cosine_similarity, hamming_distance, jaccard_similarity};
pub use store::{
    FingerprintId, FingerprintStore, HashBinEntry, IndexDescriptor, StoredFingerprint,
    TrackFilter, TrackId, TrackMetadata, TrackPostings, TrackRecord, INDEX_SCHEMA_VERSION,
};

use bincode::config::standard;
use bincode::error::{DecodeError, EncodeError};
use bincode::serde::{decode_from_slice, encode_to_vec};
use perceptual::AudioFingerprint;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use zstd::{decode_all, encode_all};

const TRACK_PREFIX: &str = "track/";
const FINGERPRINT_PREFIX: &str = "fp/";
const BIN_PREFIX: &str = "bin/";
const DESCRIPTOR_KEY: &str = "meta/descriptor";

/// Compression codec options for index storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompressionCodec {
    /// No compression (useful for debugging or when storage is not a concern).
    None,
    /// Zstd compression (default, good balance of speed and ratio).
    #[default]
    Zstd,
}

/// Compression behavior configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressionConfig {
    pub codec: CompressionCodec,
    /// Compression level (1-22 for Zstd, where higher = better compression but slower).
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            codec: CompressionCodec::default(),
            level: 3,
        }
    }
}

impl CompressionConfig {
    pub fn new(codec: CompressionCodec, level: i32) -> Self {
        Self { codec, level }
    }

    pub fn with_codec(mut self, codec: CompressionCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, IndexError> {
        match self.codec {
            CompressionCodec::None => Ok(data.to_vec()),
            CompressionCodec::Zstd => Ok(encode_all(data, self.level)?),
        }
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, IndexError> {
        match self.codec {
            CompressionCodec::None => Ok(data.to_vec()),
            CompressionCodec::Zstd => Ok(decode_all(data)?),
        }
    }
}

/// Config for initializing the index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexConfig {
    /// Backend storage configuration (in-memory or Redb).
    pub backend: BackendConfig,
    /// Compression settings for stored records.
    pub compression: CompressionConfig,
    /// LSH banding and permutation pool parameters.
    pub lsh: LshConfig,
}

impl IndexConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_lsh(mut self, lsh: LshConfig) -> Self {
        self.lsh = lsh;
        self
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        self.lsh.validate()?;
        if self.compression.codec == CompressionCodec::Zstd
            && !(1..=22).contains(&self.compression.level)
        {
            return Err(IndexError::InvalidConfig(format!(
                "zstd level must be in 1..=22 (got {})",
                self.compression.level
            )));
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Serialization encode error: {0}")]
    Encode(String),
    #[error("Serialization decode error: {0}")]
    Decode(String),
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("invalid index config: {0}")]
    InvalidConfig(String),
    #[error("index was built with {field} = {stored}, current config has {current}")]
    ConfigMismatch {
        field: String,
        stored: String,
        current: String,
    },
    #[error("fingerprint has {actual} bits, index expects {expected}")]
    FingerprintLength { expected: usize, actual: usize },
    #[error("unknown track {0}")]
    UnknownTrack(TrackId),
    #[error("hash bin references unknown fingerprint {0}")]
    UnknownFingerprint(FingerprintId),
    #[error("malformed key {0:?}")]
    InvalidKey(String),
}

impl From<EncodeError> for IndexError {
    fn from(e: EncodeError) -> Self {
        IndexError::Encode(e.to_string())
    }
}

impl From<DecodeError> for IndexError {
    fn from(e: DecodeError) -> Self {
        IndexError::Decode(e.to_string())
    }
}

impl From<std::io::Error> for IndexError {
    fn from(e: std::io::Error) -> Self {
        IndexError::Compression(e.to_string())
    }
}

impl IndexError {
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Expand one fingerprint's bucket keys into postings, one per table.
pub fn hash_bin_entries(
    track_id: TrackId,
    fingerprint_id: FingerprintId,
    buckets: &[u64],
) -> Vec<HashBinEntry> {
    buckets
        .iter()
        .enumerate()
        .map(|(table, &bucket)| HashBinEntry {
            table: table as u16,
            bucket,
            track_id,
            fingerprint_id,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Posting {
    track_id: TrackId,
    fingerprint_id: FingerprintId,
}

type BinKey = (u16, u64);

/// Key-value implementation of [`FingerprintStore`].
///
/// Hash bins are mirrored in an in-memory inverted index so bucket probes
/// never touch the backend; the mirror is rebuilt from the backend on open.
pub struct FingerprintIndex {
    /// The backend used for storage, abstracted behind a trait.
    backend: Box<dyn IndexBackend>,
    cfg: IndexConfig,
    postings: RwLock<hashbrown::HashMap<BinKey, Vec<Posting>>>,
    next_track_id: AtomicU64,
    next_fingerprint_id: AtomicU64,
    fingerprint_total: AtomicU64,
    /// Serializes read-modify-write cycles on bins and track records.
    write_lock: Mutex<()>,
}

impl FingerprintIndex {
    /// Build the configured backend and load any existing state from it.
    pub fn open(cfg: IndexConfig) -> Result<Self, IndexError> {
        let backend = cfg.backend.build()?;
        Self::with_backend(cfg, backend)
    }

    /// Use a custom backend (e.g., in-memory for tests).
    pub fn with_backend(
        cfg: IndexConfig,
        backend: Box<dyn IndexBackend>,
    ) -> Result<Self, IndexError> {
        cfg.validate()?;
        let index = Self {
            backend,
            cfg,
            postings: RwLock::new(hashbrown::HashMap::new()),
            next_track_id: AtomicU64::new(1),
            next_fingerprint_id: AtomicU64::new(1),
            fingerprint_total: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        };
        index.load()?;
        Ok(index)
    }

    pub fn config(&self) -> &IndexConfig {
        &self.cfg
    }

    fn load(&self) -> Result<(), IndexError> {
        let mut max_track = 0u64;
        self.backend.scan_prefix(TRACK_PREFIX, &mut |key, _| {
            max_track = max_track.max(parse_id(key, TRACK_PREFIX)?);
            Ok(())
        })?;

        let (mut max_fp, mut fp_total) = (0u64, 0u64);
        self.backend.scan_prefix(FINGERPRINT_PREFIX, &mut |key, _| {
            max_fp = max_fp.max(parse_id(key, FINGERPRINT_PREFIX)?);
            fp_total += 1;
            Ok(())
        })?;

        let mut postings: hashbrown::HashMap<BinKey, Vec<Posting>> = hashbrown::HashMap::new();
        self.backend.scan_prefix(BIN_PREFIX, &mut |key, value| {
            let (bin, _) = parse_bin_key(key)?;
            postings.entry(bin).or_default().push(self.decode(value)?);
            Ok(())
        })?;

        debug!(
            tracks = max_track,
            fingerprints = fp_total,
            bins = postings.len(),
            "index_loaded"
        );
        self.next_track_id.store(max_track + 1, Ordering::SeqCst);
        self.next_fingerprint_id.store(max_fp + 1, Ordering::SeqCst);
        self.fingerprint_total.store(fp_total, Ordering::SeqCst);
        *self
            .postings
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))? = postings;
        Ok(())
    }

    fn lock_writes(&self) -> Result<std::sync::MutexGuard<'_, ()>, IndexError> {
        self.write_lock
            .lock()
            .map_err(|_| IndexError::backend("poisoned lock"))
    }

    fn get_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, IndexError> {
        self.backend
            .get(key)?
            .map(|data| self.decode(&data))
            .transpose()
    }

    /// Decodes and decompresses a record from the backend.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, IndexError> {
        let decompressed = self.cfg.compression.decompress(data)?;
        let (value, _) = decode_from_slice(&decompressed, standard())?;
        Ok(value)
    }

    /// Encodes and compresses a record for storage in the backend.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, IndexError> {
        let encoded = encode_to_vec(value, standard())?;
        self.cfg.compression.compress(&encoded)
    }

    fn collect_postings<'a>(
        out: &mut TrackPostings,
        key: BinKey,
        list: impl IntoIterator<Item = &'a Posting>,
    ) {
        for posting in list {
            out.entry(posting.track_id).or_default().push(HashBinEntry {
                table: key.0,
                bucket: key.1,
                track_id: posting.track_id,
                fingerprint_id: posting.fingerprint_id,
            });
        }
    }
}

impl FingerprintStore for FingerprintIndex {
    fn insert_track(&self, metadata: &TrackMetadata) -> Result<TrackId, IndexError> {
        let id = self.next_track_id.fetch_add(1, Ordering::SeqCst);
        let record = TrackRecord {
            schema_version: INDEX_SCHEMA_VERSION,
            id,
            metadata: metadata.clone(),
            fingerprint_ids: Vec::new(),
        };
        self.backend.put(&track_key(id), &self.encode(&record)?)?;
        debug!(track_id = id, title = %metadata.title, "track_inserted");
        Ok(id)
    }

    fn insert_fingerprints(
        &self,
        track_id: TrackId,
        fingerprints: &[AudioFingerprint],
    ) -> Result<Vec<FingerprintId>, IndexError> {
        let _guard = self.lock_writes()?;
        let mut track: TrackRecord = self
            .get_record(&track_key(track_id))?
            .ok_or(IndexError::UnknownTrack(track_id))?;

        let mut ids = Vec::with_capacity(fingerprints.len());
        let mut entries = Vec::with_capacity(fingerprints.len() + 1);
        for fp in fingerprints {
            let id = self.next_fingerprint_id.fetch_add(1, Ordering::SeqCst);
            let stored = StoredFingerprint {
                id,
                track_id,
                sequence: fp.sequence,
                start_frame: fp.start_frame,
                bits: fp.bits.clone(),
            };
            entries.push((fingerprint_key(id), self.encode(&stored)?));
            ids.push(id);
        }
        track.fingerprint_ids.extend_from_slice(&ids);
        entries.push((track_key(track_id), self.encode(&track)?));

        self.backend.batch_put(entries)?;
        self.fingerprint_total
            .fetch_add(ids.len() as u64, Ordering::SeqCst);
        Ok(ids)
    }

    fn insert_hash_bins(&self, entries: &[HashBinEntry]) -> Result<(), IndexError> {
        if entries.is_empty() {
            return Ok(());
        }
        let _guard = self.lock_writes()?;

        let mut checked = hashbrown::HashSet::new();
        for entry in entries {
            if checked.insert(entry.fingerprint_id)
                && self.backend.get(&fingerprint_key(entry.fingerprint_id))?.is_none()
            {
                return Err(IndexError::UnknownFingerprint(entry.fingerprint_id));
            }
        }

        // One record per posting.
        let mut batch = Vec::with_capacity(entries.len());
        for entry in entries {
            let posting = Posting {
                track_id: entry.track_id,
                fingerprint_id: entry.fingerprint_id,
            };
            batch.push((
                bin_key((entry.table, entry.bucket), entry.fingerprint_id),
                self.encode(&posting)?,
            ));
        }
        self.backend.batch_put(batch)?;

        let mut postings = self
            .postings
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        for entry in entries {
            let posting = Posting {
                track_id: entry.track_id,
                fingerprint_id: entry.fingerprint_id,
            };
            let list = postings.entry((entry.table, entry.bucket)).or_default();
            if !list.contains(&posting) {
                list.push(posting);
            }
        }
        debug!(entries = entries.len(), "hash_bins_inserted");
        Ok(())
    }

    fn read_by_hash_buckets(&self, buckets: &[u64]) -> Result<TrackPostings, IndexError> {
        let postings = self
            .postings
            .read()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        let mut out = TrackPostings::new();
        for (table, &bucket) in buckets.iter().enumerate() {
            let key = (table as u16, bucket);
            if let Some(list) = postings.get(&key) {
                Self::collect_postings(&mut out, key, list);
            }
        }
        Ok(out)
    }

    fn read_all_postings(&self) -> Result<TrackPostings, IndexError> {
        let postings = self
            .postings
            .read()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        let mut out = TrackPostings::new();
        for (key, list) in postings.iter() {
            Self::collect_postings(&mut out, *key, list);
        }
        Ok(out)
    }

    fn read_fingerprints_by_id(
        &self,
        ids: &[FingerprintId],
    ) -> Result<Vec<StoredFingerprint>, IndexError> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(fp) = self.get_record(&fingerprint_key(id))? {
                out.push(fp);
            }
        }
        Ok(out)
    }

    fn read_tracks_by_id(&self, ids: &[TrackId]) -> Result<Vec<TrackRecord>, IndexError> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(track) = self.get_record(&track_key(id))? {
                out.push(track);
            }
        }
        Ok(out)
    }

    fn read_tracks(&self, filter: &TrackFilter) -> Result<Vec<TrackRecord>, IndexError> {
        let mut out = Vec::new();
        self.backend.scan_prefix(TRACK_PREFIX, &mut |_, value| {
            let track: TrackRecord = self.decode(value)?;
            if filter.matches(&track) {
                out.push(track);
            }
            Ok(())
        })?;
        Ok(out)
    }

    fn delete_track(&self, track_id: TrackId) -> Result<bool, IndexError> {
        let _guard = self.lock_writes()?;
        let Some(track) = self.get_record::<TrackRecord>(&track_key(track_id))? else {
            return Ok(false);
        };

        let mut keys = Vec::new();
        {
            let postings = self
                .postings
                .read()
                .map_err(|_| IndexError::backend("poisoned lock"))?;
            for (bin, list) in postings.iter() {
                keys.extend(
                    list.iter()
                        .filter(|p| p.track_id == track_id)
                        .map(|p| bin_key(*bin, p.fingerprint_id)),
                );
            }
        }
        keys.extend(track.fingerprint_ids.iter().map(|id| fingerprint_key(*id)));
        keys.push(track_key(track_id));

        // Postings in memory change only once the backend delete committed.
        self.backend.batch_delete(keys)?;

        let mut postings = self
            .postings
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        postings.retain(|_, list| {
            list.retain(|p| p.track_id != track_id);
            !list.is_empty()
        });
        drop(postings);

        self.fingerprint_total
            .fetch_sub(track.fingerprint_ids.len() as u64, Ordering::SeqCst);
        debug!(
            track_id,
            fingerprints = track.fingerprint_ids.len(),
            "track_deleted"
        );
        Ok(true)
    }

    fn track_count(&self) -> Result<usize, IndexError> {
        let mut count = 0usize;
        self.backend.scan_prefix(TRACK_PREFIX, &mut |_, _| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }

    fn fingerprint_count(&self) -> Result<usize, IndexError> {
        Ok(self.fingerprint_total.load(Ordering::SeqCst) as usize)
    }

    fn descriptor(&self) -> Result<Option<IndexDescriptor>, IndexError> {
        self.get_record(DESCRIPTOR_KEY)
    }

    fn write_descriptor(&self, descriptor: &IndexDescriptor) -> Result<(), IndexError> {
        self.backend.put(DESCRIPTOR_KEY, &self.encode(descriptor)?)
    }

    fn flush(&self) -> Result<(), IndexError> {
        self.backend.flush()
    }
}

fn track_key(id: TrackId) -> String {
    format!("{TRACK_PREFIX}{id:016x}")
}

fn fingerprint_key(id: FingerprintId) -> String {
    format!("{FINGERPRINT_PREFIX}{id:016x}")
}

fn bin_key((table, bucket): BinKey, fingerprint_id: FingerprintId) -> String {
    format!("{BIN_PREFIX}{table:04x}/{bucket:016x}/{fingerprint_id:016x}")
}

fn parse_id(key: &str, prefix: &str) -> Result<u64, IndexError> {
    key.strip_prefix(prefix)
        .and_then(|hex| u64::from_str_radix(hex, 16).ok())
        .ok_or_else(|| IndexError::InvalidKey(key.to_string()))
}

fn parse_bin_key(key: &str) -> Result<(BinKey, FingerprintId), IndexError> {
    let invalid = || IndexError::InvalidKey(key.to_string());
    let mut parts = key.strip_prefix(BIN_PREFIX).ok_or_else(invalid)?.split('/');
    let mut next_hex = || {
        parts
            .next()
            .and_then(|part| u64::from_str_radix(part, 16).ok())
            .ok_or_else(invalid)
    };
    let table = u16::try_from(next_hex()?).map_err(|_| invalid())?;
    let bucket = next_hex()?;
    let fingerprint_id = next_hex()?;
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok(((table, bucket), fingerprint_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use perceptual::Fingerprint;
    use std::sync::Arc;

    fn test_index() -> FingerprintIndex {
        FingerprintIndex::open(IndexConfig::new()).unwrap()
    }

    fn fingerprint(sequence: usize, bits: &[usize]) -> AudioFingerprint {
        let mut fp = Fingerprint::zeros(256);
        for &b in bits {
            fp.set(b, true);
        }
        AudioFingerprint {
            sequence,
            start_frame: sequence * 80,
            bits: fp,
        }
    }

    #[test]
    fn track_and_fingerprint_roundtrip() {
        let index = test_index();
        let track = index
            .insert_track(&TrackMetadata::new("Song").with_artist("Band"))
            .unwrap();
        let ids = index
            .insert_fingerprints(track, &[fingerprint(0, &[1, 2]), fingerprint(1, &[3])])
            .unwrap();
        assert_eq!(ids.len(), 2);

        let tracks = index.read_tracks_by_id(&[track, 999]).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].metadata.artist.as_deref(), Some("Band"));
        assert_eq!(tracks[0].fingerprint_ids, ids);

        let fps = index.read_fingerprints_by_id(&ids).unwrap();
        assert_eq!(fps[1].sequence, 1);
        assert_eq!(fps[1].start_frame, 80);
        assert!(fps[1].bits.get(3));
        assert_eq!(index.fingerprint_count().unwrap(), 2);
        assert_eq!(index.track_count().unwrap(), 1);
    }

    #[test]
    fn fingerprints_for_unknown_track_are_rejected() {
        let index = test_index();
        assert_eq!(
            index.insert_fingerprints(7, &[fingerprint(0, &[1])]),
            Err(IndexError::UnknownTrack(7))
        );
    }

    #[test]
    fn hash_bins_require_persisted_fingerprints() {
        let index = test_index();
        let track = index.insert_track(&TrackMetadata::new("x")).unwrap();
        let err = index
            .insert_hash_bins(&hash_bin_entries(track, 42, &[1, 2]))
            .unwrap_err();
        assert_eq!(err, IndexError::UnknownFingerprint(42));
    }

    #[test]
    fn bucket_reads_group_by_track() {
        let index = test_index();
        let a = index.insert_track(&TrackMetadata::new("a")).unwrap();
        let b = index.insert_track(&TrackMetadata::new("b")).unwrap();
        let fa = index.insert_fingerprints(a, &[fingerprint(0, &[1])]).unwrap();
        let fb = index.insert_fingerprints(b, &[fingerprint(0, &[2])]).unwrap();

        index.insert_hash_bins(&hash_bin_entries(a, fa[0], &[10, 20, 30])).unwrap();
        index.insert_hash_bins(&hash_bin_entries(b, fb[0], &[10, 21, 31])).unwrap();

        let hits = index.read_by_hash_buckets(&[10, 20, 99]).unwrap();
        assert_eq!(hits[&a].len(), 2);
        assert_eq!(hits[&b].len(), 1);
        assert_eq!(hits[&b][0].table, 0);

        // Bucket 20 in table 0 is a different bin from bucket 20 in table 1.
        let hits = index.read_by_hash_buckets(&[20]).unwrap();
        assert!(hits.is_empty());

        let all = index.read_all_postings().unwrap();
        assert_eq!(all[&a].len(), 3);
        assert_eq!(all[&b].len(), 3);
    }

    #[test]
    fn delete_track_removes_everything() {
        let index = test_index();
        let a = index.insert_track(&TrackMetadata::new("a")).unwrap();
        let b = index.insert_track(&TrackMetadata::new("b")).unwrap();
        let fa = index.insert_fingerprints(a, &[fingerprint(0, &[1])]).unwrap();
        let fb = index.insert_fingerprints(b, &[fingerprint(0, &[2])]).unwrap();
        index.insert_hash_bins(&hash_bin_entries(a, fa[0], &[5, 6])).unwrap();
        index.insert_hash_bins(&hash_bin_entries(b, fb[0], &[5, 7])).unwrap();

        assert!(index.delete_track(a).unwrap());
        assert!(!index.delete_track(a).unwrap());

        let hits = index.read_by_hash_buckets(&[5, 6]).unwrap();
        assert!(!hits.contains_key(&a));
        assert_eq!(hits[&b].len(), 1);
        assert!(index.read_fingerprints_by_id(&fa).unwrap().is_empty());
        assert_eq!(index.track_count().unwrap(), 1);
        assert_eq!(index.fingerprint_count().unwrap(), 1);
    }

    /// Delegates to an in-memory map but fails every write while `failing`.
    struct FlakyBackend {
        inner: InMemoryBackend,
        failing: std::sync::atomic::AtomicBool,
    }

    impl FlakyBackend {
        fn new() -> Self {
            Self {
                inner: InMemoryBackend::new(),
                failing: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), IndexError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(IndexError::backend("disk full"))
            } else {
                Ok(())
            }
        }
    }

    impl IndexBackend for FlakyBackend {
        fn put(&self, key: &str, value: &[u8]) -> Result<(), IndexError> {
            self.check()?;
            self.inner.put(key, value)
        }
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexError> {
            self.inner.get(key)
        }
        fn delete(&self, key: &str) -> Result<(), IndexError> {
            self.check()?;
            self.inner.delete(key)
        }
        fn batch_put(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), IndexError> {
            self.check()?;
            self.inner.batch_put(entries)
        }
        fn batch_delete(&self, keys: Vec<String>) -> Result<(), IndexError> {
            self.check()?;
            self.inner.batch_delete(keys)
        }
        fn scan_prefix(
            &self,
            prefix: &str,
            visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
        ) -> Result<(), IndexError> {
            self.inner.scan_prefix(prefix, visitor)
        }
    }

    #[test]
    fn failed_delete_keeps_postings() {
        let backend = Arc::new(FlakyBackend::new());
        let index =
            FingerprintIndex::with_backend(IndexConfig::new(), Box::new(backend.clone()))
                .unwrap();
        let track = index.insert_track(&TrackMetadata::new("kept")).unwrap();
        let ids = index
            .insert_fingerprints(track, &[fingerprint(0, &[4])])
            .unwrap();
        index.insert_hash_bins(&hash_bin_entries(track, ids[0], &[8, 9])).unwrap();

        backend.set_failing(true);
        assert!(index.delete_track(track).is_err());
        assert_eq!(index.read_by_hash_buckets(&[8, 9]).unwrap()[&track].len(), 2);
        assert_eq!(index.read_fingerprints_by_id(&ids).unwrap().len(), 1);
        assert_eq!(index.fingerprint_count().unwrap(), 1);

        backend.set_failing(false);
        assert!(index.delete_track(track).unwrap());
        assert!(index.read_by_hash_buckets(&[8, 9]).unwrap().is_empty());

        // Nothing of the track is left to reload.
        let reopened =
            FingerprintIndex::with_backend(IndexConfig::new(), Box::new(backend)).unwrap();
        assert!(reopened.read_all_postings().unwrap().is_empty());
        assert_eq!(reopened.fingerprint_count().unwrap(), 0);
    }

    #[test]
    fn failed_bin_insert_leaves_bucket_unchanged() {
        let backend = Arc::new(FlakyBackend::new());
        let index =
            FingerprintIndex::with_backend(IndexConfig::new(), Box::new(backend.clone()))
                .unwrap();
        let track = index.insert_track(&TrackMetadata::new("x")).unwrap();
        let ids = index
            .insert_fingerprints(track, &[fingerprint(0, &[1]), fingerprint(1, &[2])])
            .unwrap();
        index.insert_hash_bins(&hash_bin_entries(track, ids[0], &[3])).unwrap();

        backend.set_failing(true);
        assert!(index
            .insert_hash_bins(&hash_bin_entries(track, ids[1], &[3]))
            .is_err());
        assert_eq!(index.read_by_hash_buckets(&[3]).unwrap()[&track].len(), 1);
    }

    #[test]
    fn postings_are_stored_one_record_each() {
        let backend = Arc::new(InMemoryBackend::new());
        let index =
            FingerprintIndex::with_backend(IndexConfig::new(), Box::new(backend.clone()))
                .unwrap();
        let track = index.insert_track(&TrackMetadata::new("x")).unwrap();
        let ids = index
            .insert_fingerprints(track, &[fingerprint(0, &[1]), fingerprint(1, &[2])])
            .unwrap();
        index.insert_hash_bins(&hash_bin_entries(track, ids[0], &[3])).unwrap();
        index.insert_hash_bins(&hash_bin_entries(track, ids[1], &[3])).unwrap();
        // Re-inserting a posting does not duplicate it.
        index.insert_hash_bins(&hash_bin_entries(track, ids[1], &[3])).unwrap();

        let mut keys = Vec::new();
        backend
            .scan_prefix(BIN_PREFIX, &mut |key, _| {
                keys.push(key.to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(keys, vec![bin_key((0, 3), ids[0]), bin_key((0, 3), ids[1])]);
        assert_eq!(index.read_by_hash_buckets(&[3]).unwrap()[&track].len(), 2);
    }

    #[test]
    fn read_tracks_applies_filter() {
        let index = test_index();
        index
            .insert_track(&TrackMetadata::new("Morning Tone").with_artist("Lab"))
            .unwrap();
        index
            .insert_track(&TrackMetadata::new("Evening Noise").with_artist("Lab"))
            .unwrap();
        index
            .insert_track(&TrackMetadata::new("Morning Noise").with_artist("Field"))
            .unwrap();

        let found = index
            .read_tracks(&TrackFilter::all().title_contains("morning").artist("lab"))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.title, "Morning Tone");
        assert_eq!(index.read_tracks(&TrackFilter::all()).unwrap().len(), 3);
    }

    #[test]
    fn descriptor_is_written_once_then_verified() {
        let index = test_index();
        let descriptor = IndexDescriptor {
            schema_version: INDEX_SCHEMA_VERSION,
            fingerprint: perceptual::FingerprintConfig::default().params(),
            fingerprint_bits: 8192,
            lsh: LshConfig::default(),
            pool_checksum: 1,
        };
        assert_eq!(index.descriptor().unwrap(), None);
        index.ensure_descriptor(&descriptor).unwrap();
        assert_eq!(index.descriptor().unwrap(), Some(descriptor.clone()));
        index.ensure_descriptor(&descriptor).unwrap();

        let changed = IndexDescriptor {
            pool_checksum: 2,
            ..descriptor
        };
        assert!(matches!(
            index.ensure_descriptor(&changed),
            Err(IndexError::ConfigMismatch { .. })
        ));
    }

    #[test]
    fn state_is_reloaded_from_backend() {
        let backend = Arc::new(InMemoryBackend::new());
        let first = FingerprintIndex::with_backend(
            IndexConfig::new(),
            Box::new(backend.clone()),
        )
        .unwrap();
        let track = first.insert_track(&TrackMetadata::new("kept")).unwrap();
        let ids = first
            .insert_fingerprints(track, &[fingerprint(0, &[9])])
            .unwrap();
        first.insert_hash_bins(&hash_bin_entries(track, ids[0], &[3])).unwrap();
        drop(first);

        let reopened =
            FingerprintIndex::with_backend(IndexConfig::new(), Box::new(backend))
                .unwrap();
        assert_eq!(reopened.fingerprint_count().unwrap(), 1);
        assert_eq!(reopened.read_by_hash_buckets(&[3]).unwrap()[&track].len(), 1);
        let next = reopened.insert_track(&TrackMetadata::new("new")).unwrap();
        assert!(next > track);
    }

    #[test]
    fn uncompressed_codec_roundtrips() {
        let index = FingerprintIndex::open(
            IndexConfig::new()
                .with_compression(CompressionConfig::default().with_codec(CompressionCodec::None)),
        )
        .unwrap();
        let track = index.insert_track(&TrackMetadata::new("plain")).unwrap();
        let tracks = index.read_tracks_by_id(&[track]).unwrap();
        assert_eq!(tracks[0].metadata.title, "plain");
    }

    #[test]
    fn bin_keys_parse_back() {
        let key = bin_key((24, 0xDEAD_BEEF), 7);
        assert_eq!(parse_bin_key(&key).unwrap(), ((24, 0xDEAD_BEEF), 7));
        assert!(parse_bin_key("bin/zz").is_err());
        assert!(parse_bin_key("bin/0018/00000000deadbeef").is_err());
        assert!(parse_bin_key(&format!("{key}/01")).is_err());
        assert_eq!(parse_id(&track_key(17), TRACK_PREFIX).unwrap(), 17);
    }
}
