// Pairwise overlap sweep
// Compares every step against the following `window` steps and records the matches

use crate::contour::ContourSource;
use crate::contour_cache::ContourCache;
use crate::overlap::OverlapPredicate;
use anyhow::{bail, Result};
use std::path::PathBuf;
use tracing::{debug, trace};

/// Observations of `step_i` matched to observations of `step_j`, pairwise
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRecord {
    pub step_i: usize,
    pub step_j: usize,
    pub indices_i: Vec<usize>,
    pub indices_j: Vec<usize>,
}

impl MatchRecord {
    pub fn new(step_i: usize, step_j: usize, indices_i: Vec<usize>, indices_j: Vec<usize>) -> Self {
        MatchRecord {
            step_i,
            step_j,
            indices_i,
            indices_j,
        }
    }

    pub fn len(&self) -> usize {
        self.indices_i.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices_i.is_empty()
    }

    /// `(local_i, local_j)` pairs in record order
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.indices_i.iter().copied().zip(self.indices_j.iter().copied())
    }
}

/// Output of one sweep: records in production order and per-step counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepResult {
    pub records: Vec<MatchRecord>,
    pub counts: Vec<usize>,
}

impl SweepResult {
    /// Total matched pairs over every record
    pub fn num_matches(&self) -> usize {
        self.records.iter().map(MatchRecord::len).sum()
    }
}

/// Single forward pass over the steps
#[derive(Debug, Clone, Copy)]
pub struct OverlapSweep {
    window: usize,
    threshold: f64,
}

impl OverlapSweep {
    pub fn new(window: usize, threshold: f64) -> Self {
        OverlapSweep { window, threshold }
    }

    pub fn run<S, P>(&self, steps: &[PathBuf], cache: &mut ContourCache<S>, predicate: &P) -> Result<SweepResult>
    where
        S: ContourSource,
        P: OverlapPredicate + ?Sized,
    {
        if self.window == 0 {
            bail!("window must be at least 1");
        }
        let n = steps.len();
        let mut result = SweepResult {
            records: Vec::with_capacity(n.saturating_mul(self.window)),
            counts: Vec::with_capacity(n),
        };

        for (i, step_i) in steps.iter().enumerate() {
            let a = cache.fetch(step_i)?;
            result.counts.push(a.len());
            debug!(step = i, file = %step_i.display(), observations = a.len(), "sweeping");

            for j in i + 1..(i + self.window + 1).min(n) {
                let b = cache.fetch(&steps[j])?;
                let (ia, ib) = predicate.bbox_intersection(&a, &b);
                let scores = predicate.vertice_overlap(&a, &ia, &b, &ib);
                if scores.len() != ia.len() || ia.len() != ib.len() {
                    bail!(
                        "overlap predicate returned {} scores for {} candidates",
                        scores.len(),
                        ia.len()
                    );
                }

                let mut record = MatchRecord::new(i, j, Vec::new(), Vec::new());
                for ((&ii, &ij), &score) in ia.iter().zip(&ib).zip(&scores) {
                    if score > self.threshold {
                        record.indices_i.push(ii);
                        record.indices_j.push(ij);
                    }
                }
                trace!(
                    step_i = i,
                    step_j = j,
                    candidates = ia.len(),
                    matches = record.len(),
                    "compared steps"
                );
                result.records.push(record);
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::ContourSet;
    use crate::overlap::PolygonOverlap;
    use ahash::AHashMap;
    use anyhow::Context;
    use std::path::Path;

    fn square(x0: f64, side: f64) -> (Vec<f64>, Vec<f64>) {
        (vec![x0, x0 + side, x0 + side, x0], vec![0.0, 0.0, side, side])
    }

    struct MapSource(AHashMap<PathBuf, Vec<(Vec<f64>, Vec<f64>)>>);

    impl ContourSource for MapSource {
        fn load(&mut self, path: &Path) -> Result<ContourSet> {
            let contours = self.0.get(path).context("unknown step")?;
            ContourSet::from_contours(contours)
        }
    }

    fn fixture() -> (Vec<PathBuf>, MapSource) {
        let steps: Vec<PathBuf> = ["t0", "t1", "t2", "t3"].iter().map(PathBuf::from).collect();
        let mut map = AHashMap::new();
        map.insert(steps[0].clone(), vec![square(0.0, 2.0), square(10.0, 1.0)]);
        // Shifted by half a side: IoU = 1/3
        map.insert(steps[1].clone(), vec![square(1.0, 2.0)]);
        // Barely touching the previous: IoU well under threshold
        map.insert(steps[2].clone(), vec![square(2.8, 2.0), square(10.0, 1.0)]);
        map.insert(steps[3].clone(), vec![]);
        (steps, MapSource(map))
    }

    #[test]
    fn test_records_per_window_pair() {
        let (steps, source) = fixture();
        let mut cache = ContourCache::new(source, 2);
        let result = OverlapSweep::new(2, 0.2)
            .run(&steps, &mut cache, &PolygonOverlap::default())
            .unwrap();

        let pairs: Vec<(usize, usize)> = result.records.iter().map(|r| (r.step_i, r.step_j)).collect();
        assert_eq!(pairs, vec![(0, 1), (0, 2), (1, 2), (1, 3), (2, 3)]);
        assert_eq!(result.counts, vec![2, 1, 2, 0]);

        assert_eq!(result.records[0].pairs().collect::<Vec<_>>(), vec![(0, 0)]);
        assert_eq!(result.records[1].pairs().collect::<Vec<_>>(), vec![(1, 1)]);
        assert!(result.records[2].is_empty());
        assert!(result.records[4].is_empty());
        assert_eq!(result.num_matches(), 2);
        // Every step loaded exactly once with a window-sized cache
        assert_eq!(cache.loads(), 4);
    }

    #[test]
    fn test_threshold_is_strict() {
        let (steps, source) = fixture();
        let mut cache = ContourCache::new(source, 1);
        let result = OverlapSweep::new(1, 1.0)
            .run(&steps, &mut cache, &PolygonOverlap::default())
            .unwrap();
        // Identical squares in t0 and t2 are outside window 1; nothing scores above 1.0
        assert_eq!(result.num_matches(), 0);
        assert_eq!(result.records.len(), 3);
    }

    #[test]
    fn test_empty_and_failing_inputs() {
        let (_, source) = fixture();
        let mut cache = ContourCache::new(source, 1);
        let sweep = OverlapSweep::new(1, 0.2);
        let empty = sweep.run(&[], &mut cache, &PolygonOverlap::default()).unwrap();
        assert_eq!(empty, SweepResult::default());

        let missing = vec![PathBuf::from("t0"), PathBuf::from("nope")];
        assert!(sweep.run(&missing, &mut cache, &PolygonOverlap::default()).is_err());
        assert!(OverlapSweep::new(0, 0.2)
            .run(&[], &mut cache, &PolygonOverlap::default())
            .is_err());
    }
}
