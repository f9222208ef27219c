use std::cmp::Ordering;

use index::{IndexError, TrackId, TrackRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metric used to order candidate tracks.
///
/// Resolved once per query into a scoring function; every variant keeps the
/// full [`QueryStats`] so consumers can read the other metrics too.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceKind {
    /// `hamming_sum / total_votes + 0.4 * min_hamming`, lower is better.
    #[default]
    Hamming,
    /// Best Jaccard similarity of set bits, higher is better.
    Jaccard,
    /// Best cosine of the decoded sign vectors, higher is better.
    Cosine,
}

/// Weight of the best single-fingerprint distance in the Hamming score.
pub const MIN_HAMMING_WEIGHT: f32 = 0.4;

impl DistanceKind {
    /// Whether lower scores rank first.
    pub fn ascending(self) -> bool {
        matches!(self, DistanceKind::Hamming)
    }

    pub fn scorer(self) -> fn(&QueryStats) -> f32 {
        match self {
            DistanceKind::Hamming => hamming_score,
            DistanceKind::Jaccard => |stats: &QueryStats| stats.best_jaccard,
            DistanceKind::Cosine => |stats: &QueryStats| stats.best_cosine,
        }
    }

    /// Order two scores so the better one comes first.
    pub fn compare(self, a: f32, b: f32) -> Ordering {
        if self.ascending() {
            a.total_cmp(&b)
        } else {
            b.total_cmp(&a)
        }
    }
}

fn hamming_score(stats: &QueryStats) -> f32 {
    let votes = stats.total_table_votes.max(1) as f32;
    stats.hamming_distance as f32 / votes + MIN_HAMMING_WEIGHT * stats.min_hamming_distance as f32
}

/// Configuration for a single ranking pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchConfig {
    /// Distinct hash tables a track must share with a probe to be kept.
    /// `0` keeps every candidate.
    #[serde(default)]
    pub threshold_tables: usize,
    /// Bypass the LSH buckets and compare against every stored posting.
    #[serde(default)]
    pub full_scan: bool,
    /// Use only the first `max_probes` probe fingerprints; `0` uses all.
    #[serde(default)]
    pub max_probes: usize,
    /// Maximum number of ranked tracks to return; `0` returns all.
    #[serde(default = "MatchConfig::default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub distance: DistanceKind,
    /// Process probes on the rayon pool.
    #[serde(default = "MatchConfig::default_use_parallel")]
    pub use_parallel: bool,
}

impl MatchConfig {
    pub(crate) fn default_max_results() -> usize {
        10
    }

    pub(crate) fn default_use_parallel() -> bool {
        true
    }

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold_tables(mut self, threshold_tables: usize) -> Self {
        self.threshold_tables = threshold_tables;
        self
    }

    pub fn with_full_scan(mut self, full_scan: bool) -> Self {
        self.full_scan = full_scan;
        self
    }

    pub fn with_max_probes(mut self, max_probes: usize) -> Self {
        self.max_probes = max_probes;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_distance(mut self, distance: DistanceKind) -> Self {
        self.distance = distance;
        self
    }

    pub fn with_parallel(mut self, use_parallel: bool) -> Self {
        self.use_parallel = use_parallel;
        self
    }

    /// Validate configuration values that do not depend on the index.
    pub fn validate(&self) -> Result<(), MatchError> {
        if self.threshold_tables > usize::from(u16::MAX) {
            return Err(MatchError::InvalidConfig(format!(
                "threshold_tables must be at most {} (got {})",
                u16::MAX,
                self.threshold_tables
            )));
        }
        Ok(())
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            threshold_tables: 0,
            full_scan: false,
            max_probes: 0,
            max_results: Self::default_max_results(),
            distance: DistanceKind::default(),
            use_parallel: Self::default_use_parallel(),
        }
    }
}

/// Per-track accumulator built up while probes are processed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QueryStats {
    /// Sum of per-occurrence Hamming distances, each weighted by its table votes.
    pub hamming_distance: u64,
    pub total_table_votes: u64,
    /// Probe and stored fingerprint pairs that contributed.
    pub occurrences: u32,
    pub min_hamming_distance: u32,
    pub max_hamming_distance: u32,
    pub max_table_votes: u32,
    /// Lowest Jaccard similarity over all occurrences.
    pub min_jaccard: f32,
    pub best_jaccard: f32,
    pub best_cosine: f32,
    /// Final score under the query's [`DistanceKind`].
    pub score: f32,
}

/// A ranked track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchHit {
    pub track_id: TrackId,
    /// `None` if the track was deleted while the query ran.
    pub track: Option<TrackRecord>,
    pub score: f32,
    /// Best Jaccard similarity, reported whatever the ranking metric.
    pub similarity: f32,
    pub stats: QueryStats,
}

/// Result of a ranking pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MatchOutcome {
    pub hits: Vec<MatchHit>,
    /// Set when the pass was cancelled before every probe was processed.
    pub partial: bool,
    pub probes_processed: usize,
    pub probes_total: usize,
}

impl MatchOutcome {
    pub fn best(&self) -> Option<&MatchHit> {
        self.hits.first()
    }
}

/// Progress event emitted after each processed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchProgress {
    pub processed: usize,
    pub total: usize,
}

/// Errors produced by the matching layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchError {
    #[error("invalid match config: {0}")]
    InvalidConfig(String),
    /// Index read or hashing failed.
    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(hamming: u64, votes: u64, min: u32) -> QueryStats {
        QueryStats {
            hamming_distance: hamming,
            total_table_votes: votes,
            occurrences: 1,
            min_hamming_distance: min,
            max_hamming_distance: min,
            max_table_votes: votes as u32,
            min_jaccard: 0.5,
            best_jaccard: 0.75,
            best_cosine: 0.6,
            score: 0.0,
        }
    }

    #[test]
    fn default_config_matches_documented_values() {
        let cfg = MatchConfig::default();
        assert_eq!(cfg.threshold_tables, 0);
        assert!(!cfg.full_scan);
        assert_eq!(cfg.max_probes, 0);
        assert_eq!(cfg.max_results, 10);
        assert_eq!(cfg.distance, DistanceKind::Hamming);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn serde_fills_missing_fields() {
        let cfg: MatchConfig = serde_json::from_str(r#"{"distance":"jaccard"}"#).unwrap();
        assert_eq!(cfg.distance, DistanceKind::Jaccard);
        assert_eq!(cfg.max_results, 10);
        assert!(cfg.use_parallel);
    }

    #[test]
    fn oversized_threshold_rejected() {
        let cfg = MatchConfig::new().with_threshold_tables(70_000);
        let err = cfg.validate().expect_err("config should be invalid");
        match err {
            MatchError::InvalidConfig(msg) => assert!(msg.contains("threshold_tables")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn hamming_score_weights_votes_and_minimum() {
        let score = DistanceKind::Hamming.scorer()(&stats(100, 4, 10));
        assert!((score - (25.0 + 4.0)).abs() < 1e-6);
        assert_eq!(DistanceKind::Jaccard.scorer()(&stats(0, 1, 0)), 0.75);
        assert_eq!(DistanceKind::Cosine.scorer()(&stats(0, 1, 0)), 0.6);
    }

    #[test]
    fn compare_puts_better_scores_first() {
        assert_eq!(DistanceKind::Hamming.compare(1.0, 2.0), Ordering::Less);
        assert_eq!(DistanceKind::Jaccard.compare(1.0, 2.0), Ordering::Greater);
        assert_eq!(DistanceKind::Cosine.compare(0.5, 0.5), Ordering::Equal);
    }
}
