//! # ACFP Matcher
//!
//! Candidate selection and ranking for audio fingerprint queries.
//!
//! A query clip is fingerprinted into probe fingerprints, one per spectral
//! image. For every probe the [`CandidateSelector`] looks up the probe's LSH
//! buckets (or scans every posting when configured), drops tracks sharing
//! fewer than `threshold_tables` distinct tables with it, fetches the exact
//! stored fingerprints and folds their distances into per-track
//! [`QueryStats`]. Tracks are then ranked by the configured [`DistanceKind`].
//!
//! ## Core Types
//!
//! - [`CandidateSelector`]: runs a ranking pass over a [`index::FingerprintStore`].
//! - [`MatchConfig`]: table threshold, full scan, probe cap, result cap,
//!   distance kind and parallelism.
//! - [`MatchOutcome`] / [`MatchHit`] / [`QueryStats`]: ranked results with
//!   the per-track statistics that produced them.
//! - [`CancellationToken`] and [`MatchProgress`]: cooperative cancellation
//!   checked once per probe, and progress events emitted after each probe.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use index::{FingerprintIndex, FingerprintStore, IndexConfig, MinHasher, TrackMetadata};
//! use matcher::{CandidateSelector, MatchConfig};
//! use perceptual::{AudioFingerprint, Fingerprint};
//!
//! let cfg = IndexConfig::new();
//! let index = Arc::new(FingerprintIndex::open(cfg.clone()).unwrap());
//! let hasher = MinHasher::new(&cfg.lsh, 8192).unwrap();
//!
//! let mut bits = Fingerprint::zeros(8192);
//! for i in (0..8192).step_by(37) {
//!     bits.set(i, true);
//! }
//! let track = index.insert_track(&TrackMetadata::new("demo")).unwrap();
//! let fp = AudioFingerprint { sequence: 0, start_frame: 0, bits: bits.clone() };
//! let ids = index.insert_fingerprints(track, &[fp]).unwrap();
//! let buckets = hasher.hash(&bits).unwrap().unwrap();
//! index.insert_hash_bins(&index::hash_bin_entries(track, ids[0], &buckets)).unwrap();
//!
//! let selector = CandidateSelector::new(index, hasher);
//! let outcome = selector.rank(&[bits], &MatchConfig::default()).unwrap();
//! assert_eq!(outcome.hits[0].track_id, track);
//! assert_eq!(outcome.hits[0].stats.min_hamming_distance, 0);
//! ```

mod cancel;
pub mod engine;
pub mod types;

pub use crate::cancel::CancellationToken;
pub use crate::engine::{CandidateSelector, ProgressFn};
pub use crate::types::{
    DistanceKind, MatchConfig, MatchError, MatchHit, MatchOutcome, MatchProgress, QueryStats,
    MIN_HAMMING_WEIGHT,
};
