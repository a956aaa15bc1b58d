// Contour cache
// Holds the geometry of at most `window + 1` steps, evicting in insertion order

use crate::contour::{ContourSet, ContourSource};
use ahash::AHashMap;
use anyhow::Result;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::trace;

/// Buffer of loaded steps for one sweep.
///
/// Eviction is FIFO over insertion order; reading an entry does not refresh it.
/// Handles are `Rc`, so the cache stays on the thread that owns the sweep.
pub struct ContourCache<S> {
    source: S,
    window: usize,
    buffer: AHashMap<PathBuf, Rc<ContourSet>>,
    order: VecDeque<PathBuf>,
    loads: usize,
}

impl<S: ContourSource> ContourCache<S> {
    pub fn new(source: S, window: usize) -> Self {
        ContourCache {
            source,
            window,
            buffer: AHashMap::with_capacity(window + 1),
            order: VecDeque::with_capacity(window + 1),
            loads: 0,
        }
    }

    /// Geometry of `path`, loading it on first request
    pub fn fetch(&mut self, path: &Path) -> Result<Rc<ContourSet>> {
        if let Some(hit) = self.buffer.get(path) {
            return Ok(Rc::clone(hit));
        }

        let set = Rc::new(self.source.load(path)?);
        self.loads += 1;

        if self.order.len() > self.window {
            if let Some(oldest) = self.order.pop_front() {
                trace!(evicted = %oldest.display(), "contour cache full");
                self.buffer.remove(&oldest);
            }
        }
        self.order.push_back(path.to_path_buf());
        self.buffer.insert(path.to_path_buf(), Rc::clone(&set));
        Ok(set)
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.buffer.contains_key(path)
    }

    /// Number of loads performed so far (cache misses)
    pub fn loads(&self) -> usize {
        self.loads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    /// Synthetic source: one observation per step, none for names starting with "missing"
    struct CountingSource {
        calls: Vec<PathBuf>,
    }

    impl ContourSource for CountingSource {
        fn load(&mut self, path: &Path) -> Result<ContourSet> {
            self.calls.push(path.to_path_buf());
            if path.to_string_lossy().starts_with("missing") {
                bail!("no such step: {}", path.display());
            }
            ContourSet::from_contours(&[(vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0])])
        }
    }

    fn cache(window: usize) -> ContourCache<CountingSource> {
        ContourCache::new(CountingSource { calls: Vec::new() }, window)
    }

    #[test]
    fn test_hit_does_not_reload() {
        let mut cache = cache(2);
        cache.fetch(Path::new("a")).unwrap();
        cache.fetch(Path::new("a")).unwrap();
        assert_eq!(cache.loads(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_bounded_to_window_plus_one() {
        let mut cache = cache(2);
        for name in ["a", "b", "c", "d", "e"] {
            cache.fetch(Path::new(name)).unwrap();
            assert!(cache.len() <= 3);
        }
        assert!(!cache.contains(Path::new("a")));
        assert!(!cache.contains(Path::new("b")));
        assert!(cache.contains(Path::new("c")));
        assert!(cache.contains(Path::new("e")));
    }

    #[test]
    fn test_eviction_ignores_recent_use() {
        let mut cache = cache(1);
        cache.fetch(Path::new("a")).unwrap();
        cache.fetch(Path::new("b")).unwrap();
        // Reading "a" again does not protect it: it is still the oldest insertion.
        cache.fetch(Path::new("a")).unwrap();
        cache.fetch(Path::new("c")).unwrap();
        assert!(!cache.contains(Path::new("a")));
        assert!(cache.contains(Path::new("b")));
        assert_eq!(cache.loads(), 3);
    }

    #[test]
    fn test_load_failure_propagates_without_eviction() {
        let mut cache = cache(0);
        cache.fetch(Path::new("a")).unwrap();
        assert!(cache.fetch(Path::new("missing-b")).is_err());
        assert!(cache.contains(Path::new("a")));
        assert_eq!(cache.source.calls.len(), 2);
    }
}
