// Network builder
// Groups overlapping observations across a time window and saves the merged result

use crate::contour::{ContourKind, ContourSource, DatasetContours};
use crate::contour_cache::ContourCache;
use crate::grouping::{get_group_array, GroupAssignment};
use crate::merge_writer::{MergeStats, MergeWriter};
use crate::overlap::{OverlapConfig, OverlapPredicate, PolygonOverlap};
use crate::sweep::OverlapSweep;
use anyhow::{bail, Context, Result};
use eddynet_common::DEFAULT_COMPRESSION_LEVEL;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Network construction settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkConfig {
    /// Number of following steps each step is compared with
    pub window: usize,
    /// Compare speed contours instead of effective contours
    pub intern: bool,
    pub overlap: OverlapConfig,
    /// zstd level of the merged dataset
    pub compression_level: i32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            window: 5,
            intern: false,
            overlap: OverlapConfig::default(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            bail!("window must be at least 1");
        }
        let t = self.overlap.threshold;
        if !(0.0..=1.0).contains(&t) {
            bail!("overlap threshold must lie in [0, 1], got {t}");
        }
        Ok(())
    }

    pub fn contour_kind(&self) -> ContourKind {
        ContourKind::from_intern(self.intern)
    }
}

/// Sorted step files plus the settings to link them
pub struct Network {
    config: NetworkConfig,
    filenames: Vec<PathBuf>,
}

impl Network {
    /// Files matching `pattern`, sorted lexicographically
    pub fn new(pattern: &str, config: NetworkConfig) -> Result<Self> {
        let mut filenames = glob::glob(pattern)
            .with_context(|| format!("Invalid input pattern {pattern:?}"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to expand {pattern:?}"))?;
        filenames.sort();
        debug!(pattern, files = filenames.len(), "expanded input pattern");
        Self::from_files(filenames, config)
    }

    /// Use `filenames` in the given order
    pub fn from_files(filenames: Vec<PathBuf>, config: NetworkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Network { config, filenames })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn filenames(&self) -> &[PathBuf] {
        &self.filenames
    }

    /// Label every observation with the contours stored in the step files
    pub fn group_observations(&self) -> Result<GroupAssignment> {
        let source = DatasetContours::new(self.config.contour_kind());
        let predicate = PolygonOverlap::new(self.config.overlap);
        self.group_observations_with(source, &predicate)
    }

    /// Label every observation with a custom contour source and predicate
    pub fn group_observations_with<S, P>(&self, source: S, predicate: &P) -> Result<GroupAssignment>
    where
        S: ContourSource,
        P: OverlapPredicate + ?Sized,
    {
        info!(
            files = self.filenames.len(),
            window = self.config.window,
            "grouping observations"
        );
        let mut cache = ContourCache::new(source, self.config.window);
        let sweep = OverlapSweep::new(self.config.window, self.config.overlap.threshold);
        let result = sweep.run(&self.filenames, &mut cache, predicate)?;
        debug!(
            records = result.records.len(),
            matches = result.num_matches(),
            window = cache.window(),
            loads = cache.loads(),
            "sweep finished"
        );

        let assignment = get_group_array(&result.records, &result.counts)?;
        let summary = assignment.summary();
        info!(
            observations = summary.observations,
            singletons = summary.singletons,
            groups = summary.groups,
            "{summary}"
        );
        Ok(assignment)
    }

    /// Write the merged dataset ordered by group
    pub fn save<P: AsRef<Path>>(&self, assignment: &GroupAssignment, output: P) -> Result<MergeStats> {
        if self.filenames.is_empty() {
            bail!("cannot save an empty network: no input file to use as template");
        }
        MergeWriter::new(self.config.compression_level).write(&self.filenames, assignment, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(NetworkConfig::default().validate().is_ok());
        let zero = NetworkConfig {
            window: 0,
            ..NetworkConfig::default()
        };
        assert!(zero.validate().is_err());
        let mut bad = NetworkConfig::default();
        bad.overlap.threshold = 1.5;
        assert!(bad.validate().is_err());
        bad.overlap.threshold = f64::NAN;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_intern_selects_speed_contours() {
        let config = NetworkConfig {
            intern: true,
            ..NetworkConfig::default()
        };
        assert_eq!(config.contour_kind(), ContourKind::Speed);
        assert_eq!(NetworkConfig::default().contour_kind(), ContourKind::Effective);
    }

    #[test]
    fn test_empty_pattern_is_degenerate_run() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/*.eds", dir.path().display());
        let network = Network::new(&pattern, NetworkConfig::default()).unwrap();
        assert!(network.filenames().is_empty());
        let assignment = network.group_observations().unwrap();
        assert!(assignment.is_empty());
        assert_eq!(assignment.summary().groups, 0);
        assert!(network.save(&assignment, dir.path().join("out.eds")).is_err());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(Network::new("[", NetworkConfig::default()).is_err());
    }
}
