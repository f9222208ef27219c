//! Monte Carlo check that MinHash agreement tracks set-bit Jaccard similarity.

use acfp::{Fingerprint, LshConfig, MinHasher};
use index::{estimate_jaccard, jaccard_similarity};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

const BITS: usize = 8192;
const UNION: usize = 1200;
const PAIRS: usize = 40;

/// Two fingerprints whose set bits overlap with Jaccard close to `target`.
fn pair(rng: &mut StdRng, target: f64) -> (Fingerprint, Fingerprint) {
    let shared = (target * UNION as f64).round() as usize;
    let only_a = (UNION - shared) / 2;
    let positions = sample(rng, BITS, UNION).into_vec();

    let mut a = Fingerprint::zeros(BITS);
    let mut b = Fingerprint::zeros(BITS);
    for (i, &bit) in positions.iter().enumerate() {
        if i < shared {
            a.set(bit, true);
            b.set(bit, true);
        } else if i < shared + only_a {
            a.set(bit, true);
        } else {
            b.set(bit, true);
        }
    }
    (a, b)
}

#[test]
fn agreement_converges_to_jaccard_at_150_permutations() {
    let hasher = MinHasher::new(&LshConfig::default(), BITS).unwrap();
    assert_eq!(hasher.pool().len(), 150);
    let mut rng = StdRng::seed_from_u64(0xACF9);

    for target in [0.2, 0.5, 0.8] {
        let mut total_error = 0.0f32;
        for _ in 0..PAIRS {
            let (a, b) = pair(&mut rng, target);
            let exact = jaccard_similarity(&a, &b);
            let estimate = estimate_jaccard(
                &hasher.signature(&a).unwrap(),
                &hasher.signature(&b).unwrap(),
            );
            assert!(
                (estimate - exact).abs() < 0.2,
                "single pair at J={exact}: estimate {estimate}"
            );
            total_error += estimate - exact;
        }
        let mean_error = total_error / PAIRS as f32;
        assert!(
            mean_error.abs() < 0.05,
            "mean error {mean_error} at J={target}"
        );
    }
}

#[test]
fn identical_and_disjoint_fingerprints_are_extremes() {
    let hasher = MinHasher::new(&LshConfig::default(), BITS).unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let (a, b) = pair(&mut rng, 0.0);

    let sig_a = hasher.signature(&a).unwrap();
    assert_eq!(estimate_jaccard(&sig_a, &sig_a), 1.0);
    assert_eq!(jaccard_similarity(&a, &b), 0.0);
    // Dense disjoint sets only agree where both windows are empty.
    assert!(estimate_jaccard(&sig_a, &hasher.signature(&b).unwrap()) < 0.02);
}
