//! Thread-safety of the retrieval service.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use acfp::{MatchConfig, TrackMetadata};
use common::{noise, service};

#[test]
fn concurrent_queries_agree() {
    let service = Arc::new(service());
    let mut ids = Vec::new();
    for seed in 0..3 {
        let inserted = service
            .insert(&TrackMetadata::new(format!("track-{seed}")), &noise(seed, 8.0))
            .unwrap();
        ids.push(inserted.track_id);
    }

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                let seed = (i % 3) as u64;
                let outcome = service
                    .find_similar(&noise(seed, 8.0), &MatchConfig::default())
                    .expect("query should succeed");
                (seed, outcome.best().map(|hit| hit.track_id))
            })
        })
        .collect();

    for handle in handles {
        let (seed, best) = handle.join().expect("thread panicked");
        assert_eq!(best, Some(ids[seed as usize]));
    }
}

#[test]
fn concurrent_inserts_get_distinct_ids() {
    let service = Arc::new(service());

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                service
                    .insert(&TrackMetadata::new(format!("t{i}")), &noise(100 + i, 5.0))
                    .expect("insert should succeed")
            })
        })
        .collect();

    let outcomes: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .collect();

    let ids: HashSet<_> = outcomes.iter().map(|o| o.track_id).collect();
    assert_eq!(ids.len(), 6);

    let stats = service.stats().unwrap();
    assert_eq!(stats.tracks, 6);
    assert_eq!(
        stats.fingerprints,
        outcomes.iter().map(|o| o.fingerprints).sum::<usize>()
    );
}

#[test]
fn queries_run_while_inserting() {
    let service = Arc::new(service());
    let anchor = service
        .insert(&TrackMetadata::new("anchor"), &noise(500, 8.0))
        .unwrap()
        .track_id;

    let writer = {
        let service = Arc::clone(&service);
        thread::spawn(move || {
            for seed in 0..4 {
                service
                    .insert(&TrackMetadata::new("filler"), &noise(600 + seed, 5.0))
                    .expect("insert should succeed");
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                service
                    .find_similar(&noise(500, 8.0), &MatchConfig::default())
                    .expect("query should succeed")
                    .best()
                    .map(|hit| hit.track_id)
            })
        })
        .collect();

    writer.join().expect("writer panicked");
    for reader in readers {
        assert_eq!(reader.join().expect("reader panicked"), Some(anchor));
    }
    assert_eq!(service.stats().unwrap().tracks, 5);
}
