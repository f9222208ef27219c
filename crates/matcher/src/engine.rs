use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hashbrown::{HashMap, HashSet};
use index::{
    cosine_similarity, hamming_distance, jaccard_similarity, FingerprintId, FingerprintStore,
    MinHasher, TrackId, TrackPostings, TrackRecord,
};
use perceptual::Fingerprint;
use rayon::prelude::*;
use tracing::{debug, info, info_span, warn};

use crate::cancel::CancellationToken;
use crate::types::{MatchConfig, MatchError, MatchHit, MatchOutcome, MatchProgress, QueryStats};


/// Callback invoked after every processed probe. Called from rayon workers
/// when the parallel path is enabled.
pub type ProgressFn<'a> = &'a (dyn Fn(MatchProgress) + Sync);

/// One stored fingerprint that survived filtering for one probe.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ProbeMatch {
    track_id: TrackId,
    votes: u32,
    hamming: u32,
    jaccard: f32,
    cosine: f32,
}

impl QueryStats {
    fn from_match(m: &ProbeMatch) -> Self {
        Self {
            hamming_distance: u64::from(m.hamming) * u64::from(m.votes),
            total_table_votes: u64::from(m.votes),
            occurrences: 1,
            min_hamming_distance: m.hamming,
            max_hamming_distance: m.hamming,
            max_table_votes: m.votes,
            min_jaccard: m.jaccard,
            best_jaccard: m.jaccard,
            best_cosine: m.cosine,
            score: 0.0,
        }
    }

    fn absorb(&mut self, m: &ProbeMatch) {
        self.hamming_distance += u64::from(m.hamming) * u64::from(m.votes);
        self.total_table_votes += u64::from(m.votes);
        self.occurrences += 1;
        self.min_hamming_distance = self.min_hamming_distance.min(m.hamming);
        self.max_hamming_distance = self.max_hamming_distance.max(m.hamming);
        self.max_table_votes = self.max_table_votes.max(m.votes);
        self.min_jaccard = self.min_jaccard.min(m.jaccard);
        self.best_jaccard = self.best_jaccard.max(m.jaccard);
        self.best_cosine = self.best_cosine.max(m.cosine);
    }
}

/// Retrieves candidate tracks for probe fingerprints and ranks them.
///
/// Probes are independent: each one is hashed, looked up, filtered and
/// compared against the exact stored fingerprints on its own, and only the
/// final reduction into per-track [`QueryStats`] is sequential.
pub struct CandidateSelector {
    store: Arc<dyn FingerprintStore>,
    hasher: MinHasher,
}

impl CandidateSelector {
    /// `hasher` must share the permutation pool the store was built with.
    pub fn new(store: Arc<dyn FingerprintStore>, hasher: MinHasher) -> Self {
        Self { store, hasher }
    }

    pub fn store(&self) -> &Arc<dyn FingerprintStore> {
        &self.store
    }

    pub fn hasher(&self) -> &MinHasher {
        &self.hasher
    }

    /// Rank stored tracks against `probes`.
    pub fn rank(
        &self,
        probes: &[Fingerprint],
        cfg: &MatchConfig,
    ) -> Result<MatchOutcome, MatchError> {
        self.rank_with(probes, cfg, &CancellationToken::new(), None)
    }

    /// Rank with a cancellation flag and an optional progress callback.
    ///
    /// Cancellation is checked before each probe. A cancelled pass ranks
    /// whatever was accumulated and sets [`MatchOutcome::partial`].
    pub fn rank_with(
        &self,
        probes: &[Fingerprint],
        cfg: &MatchConfig,
        cancel: &CancellationToken,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<MatchOutcome, MatchError> {
        cfg.validate()?;
        if cfg.threshold_tables > self.hasher.tables() {
            return Err(MatchError::InvalidConfig(format!(
                "threshold_tables {} exceeds the {} hash tables",
                cfg.threshold_tables,
                self.hasher.tables()
            )));
        }

        let probes = match cfg.max_probes {
            0 => probes,
            cap => &probes[..cap.min(probes.len())],
        };
        let total = probes.len();
        let span = info_span!(
            "matcher.rank",
            probes = total,
            threshold = cfg.threshold_tables,
            full_scan = cfg.full_scan
        );
        let _guard = span.enter();
        let start = Instant::now();

        let universe = if cfg.full_scan {
            let all = self.store.read_all_postings()?;
            debug!(tracks = all.len(), "loaded postings for full scan");
            Some(all)
        } else {
            None
        };

        let processed = AtomicUsize::new(0);
        let silent = AtomicUsize::new(0);
        let run_probe = |probe: &Fingerprint| -> Result<Option<Vec<ProbeMatch>>, MatchError> {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let matches = match self.hasher.hash(probe)? {
                Some(keys) => self.probe(probe, &keys, cfg.threshold_tables, universe.as_ref())?,
                None => {
                    silent.fetch_add(1, Ordering::Relaxed);
                    Vec::new()
                }
            };
            let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(report) = progress {
                report(MatchProgress {
                    processed: done,
                    total,
                });
            }
            Ok(Some(matches))
        };

        let per_probe: Vec<Option<Vec<ProbeMatch>>> = if cfg.use_parallel {
            probes
                .par_iter()
                .map(run_probe)
                .collect::<Result<_, _>>()?
        } else {
            let mut out = Vec::with_capacity(total);
            for probe in probes {
                let result = run_probe(probe)?;
                let stop = result.is_none();
                out.push(result);
                if stop {
                    break;
                }
            }
            out
        };

        let mut stats: HashMap<TrackId, QueryStats> = HashMap::new();
        let mut probes_processed = 0;
        for matches in per_probe.into_iter().flatten() {
            probes_processed += 1;
            for m in &matches {
                stats
                    .entry(m.track_id)
                    .and_modify(|s| s.absorb(m))
                    .or_insert_with(|| QueryStats::from_match(m));
            }
        }

        let skipped = silent.load(Ordering::Relaxed);
        if skipped > 0 {
            warn!(skipped, "silent probe fingerprints skipped");
        }

        let hits = self.finalize(stats, cfg)?;
        let partial = probes_processed < total;
        if partial {
            warn!(
                processed = probes_processed,
                total, "query cancelled, returning partial ranking"
            );
        }
        info!(
            hits = hits.len(),
            probes = probes_processed,
            elapsed_us = start.elapsed().as_micros() as u64,
            "ranking complete"
        );

        Ok(MatchOutcome {
            hits,
            partial,
            probes_processed,
            probes_total: total,
        })
    }

    fn probe(
        &self,
        probe: &Fingerprint,
        keys: &[u64],
        threshold: usize,
        universe: Option<&TrackPostings>,
    ) -> Result<Vec<ProbeMatch>, MatchError> {
        let fetched;
        let postings = match universe {
            Some(all) => all,
            None => {
                fetched = self.store.read_by_hash_buckets(keys)?;
                &fetched
            }
        };

        let votes = tally_votes(postings, keys, threshold);
        debug!(
            tracks = postings.len(),
            candidates = votes.len(),
            "probe candidates"
        );
        if votes.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<FingerprintId> = votes.keys().copied().collect();
        let stored = self.store.read_fingerprints_by_id(&ids)?;
        Ok(stored
            .iter()
            .filter_map(|fp| {
                let count = *votes.get(&fp.id)?;
                Some(ProbeMatch {
                    track_id: fp.track_id,
                    votes: count.max(1),
                    hamming: hamming_distance(probe, &fp.bits),
                    jaccard: jaccard_similarity(probe, &fp.bits),
                    cosine: cosine_similarity(probe, &fp.bits),
                })
            })
            .collect())
    }

    fn finalize(
        &self,
        stats: HashMap<TrackId, QueryStats>,
        cfg: &MatchConfig,
    ) -> Result<Vec<MatchHit>, MatchError> {
        let distance = cfg.distance;
        let score = distance.scorer();
        let mut hits: Vec<MatchHit> = stats
            .into_iter()
            .map(|(track_id, mut stats)| {
                stats.score = score(&stats);
                MatchHit {
                    track_id,
                    track: None,
                    score: stats.score,
                    similarity: stats.best_jaccard,
                    stats,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            distance
                .compare(a.score, b.score)
                .then_with(|| a.track_id.cmp(&b.track_id))
        });
        if cfg.max_results > 0 {
            hits.truncate(cfg.max_results);
        }

        let ids: Vec<TrackId> = hits.iter().map(|hit| hit.track_id).collect();
        let mut records: HashMap<TrackId, TrackRecord> = self
            .store
            .read_tracks_by_id(&ids)?
            .into_iter()
            .map(|track| (track.id, track))
            .collect();
        for hit in &mut hits {
            hit.track = records.remove(&hit.track_id);
        }
        Ok(hits)
    }
}

/// Table votes per stored fingerprint: how many of its postings sit in the
/// probe's bucket for that table. Tracks sharing fewer than `threshold`
/// distinct tables with the probe are dropped.
fn tally_votes(
    postings: &TrackPostings,
    keys: &[u64],
    threshold: usize,
) -> HashMap<FingerprintId, u32> {
    let mut votes = HashMap::new();
    for entries in postings.values() {
        let mut tables: HashSet<u16> = HashSet::new();
        let mut track_votes: HashMap<FingerprintId, u32> = HashMap::new();
        for entry in entries {
            let count = track_votes.entry(entry.fingerprint_id).or_insert(0);
            if keys.get(usize::from(entry.table)) == Some(&entry.bucket) {
                *count += 1;
                tables.insert(entry.table);
            }
        }
        if tables.len() >= threshold {
            votes.extend(track_votes);
        }
    }
    votes
}
