//! The pool of "interesting" samples (`spec.md` §3, §4.2).

use rand::distributions::WeightedIndex;
use rand::prelude::*;
use std::collections::HashSet;

pub type Sample = Vec<u8>;

/// An ordered, duplicate-free (by byte equality) sequence of samples. Never
/// shrinks over the life of a run; sampling is weighted toward longer inputs.
///
/// Deliberately not `Serialize`/`Deserialize`: the `seen` index would
/// desynchronize from `samples` on a naive derive. `state.rs` persists the
/// plain `Vec<Sample>` via [`Corpus::iter`] and rebuilds with
/// [`Corpus::from_samples`], which repopulates `seen` correctly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    samples: Vec<Sample>,
    seen: HashSet<Sample>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `sample` if it is not already present (by byte equality).
    /// Returns whether it was actually added.
    pub fn put(&mut self, sample: Sample) -> bool {
        if self.seen.contains(&sample) {
            return false;
        }
        self.seen.insert(sample.clone());
        self.samples.push(sample);
        true
    }

    /// Weighted pick by `max(1, len)`. Returns the empty byte string if the
    /// corpus is empty.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Sample {
        if self.samples.is_empty() {
            return Vec::new();
        }
        let weights = self.samples.iter().map(|s| s.len().max(1));
        let dist = WeightedIndex::new(weights).expect("at least one sample, all weights >= 1");
        self.samples[dist.sample(rng)].clone()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn contains(&self, sample: &[u8]) -> bool {
        self.seen.contains(sample)
    }

    pub(crate) fn from_samples(samples: Vec<Sample>) -> Self {
        let mut corpus = Corpus::new();
        for s in samples {
            corpus.put(s);
        }
        corpus
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn put_deduplicates_by_bytes() {
        let mut c = Corpus::new();
        assert!(c.put(b"a".to_vec()));
        assert!(!c.put(b"a".to_vec()));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn sample_on_empty_corpus_is_empty_string() {
        let c = Corpus::new();
        let mut rng = ChaCha20Rng::seed_from_u64(0);
        assert_eq!(c.sample(&mut rng), Vec::<u8>::new());
    }

    #[test]
    fn sample_favors_longer_inputs() {
        let mut c = Corpus::new();
        c.put(b"x".to_vec());
        c.put(b"x".repeat(100));
        let mut rng = ChaCha20Rng::seed_from_u64(42);

        let mut long_hits = 0;
        for _ in 0..500 {
            if c.sample(&mut rng).len() > 1 {
                long_hits += 1;
            }
        }
        assert!(long_hits > 400, "expected long sample to dominate, got {long_hits}/500");
    }

    #[test]
    fn corpus_monotonicity() {
        let mut c = Corpus::new();
        c.put(b"a".to_vec());
        let snapshot_t1: HashSet<_> = c.iter().cloned().collect();
        c.put(b"b".to_vec());
        let snapshot_t2: HashSet<_> = c.iter().cloned().collect();
        assert!(snapshot_t1.is_subset(&snapshot_t2));
    }
}
