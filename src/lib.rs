//! # ACFP
//!
//! Content-based audio similarity search. A recording is turned into compact
//! wavelet fingerprints, indexed with MinHash LSH, and queried for
//! perceptually similar recordings without relying on metadata.
//!
//! The workspace is split by pipeline layer:
//!
//! - [`spectral`]: windowed FFT, log-frequency spectrogram, spectral images.
//! - [`perceptual`]: Haar decomposition and top-wavelet sign fingerprints.
//! - [`index`]: permutation pool, MinHash/LSH, distances, fingerprint store.
//! - [`matcher`]: candidate selection and ranking.
//!
//! This crate ties them together behind [`RetrievalService`], loads the YAML
//! configuration ([`config`]) and reads WAV files ([`audio`]).
//!
//! ## Example
//!
//! ```
//! use acfp::{AcfpConfig, RetrievalService, TrackMetadata};
//!
//! let service = RetrievalService::open_index(&AcfpConfig::default()).unwrap();
//!
//! let tone: Vec<f32> = (0..5512 * 10)
//!     .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 5512.0).sin())
//!     .collect();
//! let inserted = service.insert(&TrackMetadata::new("a440"), &tone).unwrap();
//!
//! let outcome = service.find_similar(&tone, service.default_match_config()).unwrap();
//! assert_eq!(outcome.hits[0].track_id, inserted.track_id);
//! ```

pub mod audio;
pub mod config;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

pub use crate::audio::{AudioError, AudioSource, WavAudioSource};
pub use crate::config::{AcfpConfig, ConfigLoadError};
pub use index::{
    BucketKeys, FingerprintIndex, FingerprintStore, IndexConfig, IndexDescriptor, IndexError,
    LshConfig, MinHasher, TrackFilter, TrackId, TrackMetadata, TrackRecord, INDEX_SCHEMA_VERSION,
};
pub use matcher::{
    CancellationToken, DistanceKind, MatchConfig, MatchError, MatchHit, MatchOutcome,
    MatchProgress, ProgressFn, QueryStats,
};
pub use perceptual::{
    AudioFingerprint, Fingerprint, FingerprintConfig, FingerprintPipeline, FingerprintSet,
    PerceptualError,
};
pub use spectral::{SpectralConfig, StrideConfig};

use matcher::CandidateSelector;

/// Errors surfaced by [`RetrievalService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigLoadError),

    #[error("fingerprinting failed: {0}")]
    Perceptual(#[from] PerceptualError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("match error: {0}")]
    Match(#[from] MatchError),

    #[error("audio error: {0}")]
    Audio(#[from] AudioError),

    /// The clip is shorter than one analysis window.
    #[error("clip of {samples} samples produced no fingerprints")]
    NoFingerprints { samples: usize },
}

/// What a successful insert persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertOutcome {
    pub track_id: TrackId,
    pub fingerprints: usize,
    pub hash_bins: usize,
}

/// Store totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub tracks: usize,
    pub fingerprints: usize,
}

/// Top-level facade: fingerprints audio, persists tracks and answers
/// similarity queries against a [`FingerprintStore`].
///
/// The service is `Send + Sync`; concurrent inserts and queries share the
/// permutation pool and the store.
pub struct RetrievalService {
    pipeline: FingerprintPipeline,
    query_stride: StrideConfig,
    selector: CandidateSelector,
    match_cfg: MatchConfig,
}

impl RetrievalService {
    /// Validate `config`, build the permutation pool and check it, together
    /// with every fingerprint setting, against the descriptor persisted in
    /// `store` (writing it on first use).
    pub fn open(
        config: &AcfpConfig,
        store: Arc<dyn FingerprintStore>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        let pipeline = FingerprintPipeline::new(config.fingerprint_config())?;
        let bits = pipeline.config().fingerprint_bits();
        let lsh = config.index.lsh;
        let hasher = MinHasher::new(&lsh, bits)?;

        let descriptor = IndexDescriptor {
            schema_version: INDEX_SCHEMA_VERSION,
            fingerprint: pipeline.config().params(),
            fingerprint_bits: bits,
            lsh,
            pool_checksum: hasher.pool().checksum(),
        };
        store.ensure_descriptor(&descriptor)?;
        info!(
            fingerprint_bits = bits,
            tables = lsh.tables,
            keys_per_table = lsh.keys_per_table,
            pool_checksum = descriptor.pool_checksum,
            "retrieval_service_opened"
        );

        Ok(Self {
            pipeline,
            query_stride: config.query_stride(),
            selector: CandidateSelector::new(store, hasher),
            match_cfg: config.matcher.clone(),
        })
    }

    /// Open the store described by `config.index` and wrap it.
    pub fn open_index(config: &AcfpConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let store = Arc::new(FingerprintIndex::open(config.index_config())?);
        Self::open(config, store)
    }

    pub fn store(&self) -> &Arc<dyn FingerprintStore> {
        self.selector.store()
    }

    pub fn pipeline(&self) -> &FingerprintPipeline {
        &self.pipeline
    }

    pub fn hasher(&self) -> &MinHasher {
        self.selector.hasher()
    }

    /// Query parameters from the configuration file.
    pub fn default_match_config(&self) -> &MatchConfig {
        &self.match_cfg
    }

    /// Fingerprint `samples` the way [`insert`](Self::insert) does.
    pub fn fingerprint(&self, samples: &[f32]) -> FingerprintSet {
        self.pipeline.fingerprint(samples)
    }

    /// Fingerprint `samples` the way queries do, with the query stride.
    pub fn query_fingerprints(&self, samples: &[f32]) -> Result<FingerprintSet, ServiceError> {
        Ok(self
            .pipeline
            .fingerprint_with_stride(samples, &self.query_stride)?)
    }

    /// Fingerprint and persist a track.
    ///
    /// Fingerprints are written before the hash bins that reference them. A
    /// clip producing no fingerprint is rejected before anything is stored,
    /// and a failed write removes whatever part of the track was persisted.
    pub fn insert(
        &self,
        metadata: &TrackMetadata,
        samples: &[f32],
    ) -> Result<InsertOutcome, ServiceError> {
        let span = info_span!("acfp.insert", title = %metadata.title);
        let _guard = span.enter();
        let start = Instant::now();

        let set = self.pipeline.fingerprint(samples);
        if set.is_empty() {
            return Err(ServiceError::NoFingerprints {
                samples: samples.len(),
            });
        }
        let keys = self.hash_all(&set.fingerprints)?;
        let silent = keys.iter().filter(|k| k.is_none()).count();
        if silent > 0 {
            warn!(silent, "silent fingerprints stored without hash bins");
        }

        let mut metadata = metadata.clone();
        if metadata.duration_ms.is_none() {
            let rate = u64::from(self.pipeline.config().spectral.sample_rate);
            metadata.duration_ms = Some(samples.len() as u64 * 1000 / rate);
        }

        let store = self.store();
        let track_id = store.insert_track(&metadata)?;
        let outcome = match self.persist_track(track_id, &set.fingerprints, &keys) {
            Ok(outcome) => outcome,
            Err(err) => {
                if let Err(cleanup) = store.delete_track(track_id) {
                    warn!(track_id, error = %cleanup, "rollback of failed insert failed");
                }
                return Err(err.into());
            }
        };

        info!(
            track_id,
            fingerprints = outcome.fingerprints,
            hash_bins = outcome.hash_bins,
            elapsed_us = start.elapsed().as_micros() as u64,
            "track_inserted"
        );
        Ok(outcome)
    }

    fn persist_track(
        &self,
        track_id: TrackId,
        fingerprints: &[AudioFingerprint],
        keys: &[Option<BucketKeys>],
    ) -> Result<InsertOutcome, IndexError> {
        let store = self.store();
        let ids = store.insert_fingerprints(track_id, fingerprints)?;
        let entries: Vec<_> = ids
            .iter()
            .zip(keys)
            .filter_map(|(id, keys)| {
                keys.as_ref()
                    .map(|keys| index::hash_bin_entries(track_id, *id, keys))
            })
            .flatten()
            .collect();
        store.insert_hash_bins(&entries)?;
        Ok(InsertOutcome {
            track_id,
            fingerprints: ids.len(),
            hash_bins: entries.len(),
        })
    }

    fn hash_all(
        &self,
        fingerprints: &[AudioFingerprint],
    ) -> Result<Vec<Option<BucketKeys>>, ServiceError> {
        let hasher = self.hasher();
        let keys: Result<Vec<_>, IndexError> = if self.pipeline.config().use_parallel {
            fingerprints
                .par_iter()
                .map(|fp| hasher.hash(&fp.bits))
                .collect()
        } else {
            fingerprints.iter().map(|fp| hasher.hash(&fp.bits)).collect()
        };
        Ok(keys?)
    }

    /// Rank stored tracks against a query clip.
    pub fn find_similar(
        &self,
        samples: &[f32],
        request: &MatchConfig,
    ) -> Result<MatchOutcome, ServiceError> {
        self.find_similar_with(samples, request, &CancellationToken::new(), None)
    }

    /// [`find_similar`](Self::find_similar) with cancellation and progress.
    ///
    /// A clip too short to fingerprint yields an empty, complete outcome.
    pub fn find_similar_with(
        &self,
        samples: &[f32],
        request: &MatchConfig,
        cancel: &CancellationToken,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<MatchOutcome, ServiceError> {
        let span = info_span!("acfp.query", samples = samples.len());
        let _guard = span.enter();
        let start = Instant::now();

        let set = self.query_fingerprints(samples)?;
        if set.is_empty() {
            debug!("query clip produced no fingerprints");
            return Ok(MatchOutcome::default());
        }
        if request.max_probes > 0 && set.len() > request.max_probes {
            debug!(
                probes = set.len(),
                cap = request.max_probes,
                "probe fingerprints capped"
            );
        }
        let probes: Vec<Fingerprint> = set.fingerprints.into_iter().map(|fp| fp.bits).collect();
        let outcome = self.selector.rank_with(&probes, request, cancel, progress)?;

        info!(
            hits = outcome.hits.len(),
            partial = outcome.partial,
            elapsed_us = start.elapsed().as_micros() as u64,
            "query_complete"
        );
        Ok(outcome)
    }

    /// Read `path` through `source` and insert it. The path is recorded in
    /// the track metadata.
    pub fn insert_file(
        &self,
        source: &dyn AudioSource,
        path: &Path,
        metadata: &TrackMetadata,
    ) -> Result<InsertOutcome, ServiceError> {
        let rate = self.pipeline.config().spectral.sample_rate;
        let samples = source.read_mono_samples(path, rate, None, 0)?;
        let metadata = metadata
            .clone()
            .with_source_path(path.display().to_string());
        self.insert(&metadata, &samples)
    }

    /// Query with `duration_ms` of `path` (to the end when `None`) starting
    /// at `start_ms`.
    pub fn find_similar_file(
        &self,
        source: &dyn AudioSource,
        path: &Path,
        start_ms: u64,
        duration_ms: Option<u64>,
        request: &MatchConfig,
    ) -> Result<MatchOutcome, ServiceError> {
        let rate = self.pipeline.config().spectral.sample_rate;
        let samples = source.read_mono_samples(path, rate, duration_ms, start_ms)?;
        self.find_similar(&samples, request)
    }

    /// Remove a track with its fingerprints and hash bins.
    pub fn delete(&self, track_id: TrackId) -> Result<bool, ServiceError> {
        let removed = self.store().delete_track(track_id)?;
        if removed {
            info!(track_id, "track_deleted");
        }
        Ok(removed)
    }

    pub fn tracks(&self, filter: &TrackFilter) -> Result<Vec<TrackRecord>, ServiceError> {
        Ok(self.store().read_tracks(filter)?)
    }

    pub fn stats(&self) -> Result<IndexStats, ServiceError> {
        let store = self.store();
        Ok(IndexStats {
            tracks: store.track_count()?,
            fingerprints: store.fingerprint_count()?,
        })
    }

    pub fn flush(&self) -> Result<(), ServiceError> {
        Ok(self.store().flush()?)
    }
}
