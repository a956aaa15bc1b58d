//! Overlap networks of contour observations.
//!
//! Each input dataset holds the contours detected at one time step. Observations
//! carry no identity across steps; this crate links them by comparing every step
//! with the next `window` steps and labels every connected set of overlapping
//! observations with one group id. The merged output holds every input variable,
//! records sorted by group, plus a `track` variable with the ids.
//!
//! # Pipeline
//!
//! - **Contour cache** - loads contour geometry, keeps at most `window + 1` steps
//! - **Overlap sweep** - bounding-box candidates, then polygon overlap scores
//! - **Group engine** - incremental labeling of match records
//! - **Merge writer** - group-contiguous reindex and copy into one dataset
//!
//! # Examples
//!
//! ## Building a network
//!
//! ```no_run
//! use eddynet_core::{Network, NetworkConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = NetworkConfig {
//!     window: 7,
//!     ..NetworkConfig::default()
//! };
//! let network = Network::new("eddies/*.eds", config)?;
//!
//! // Grouping and writing are separate stages
//! let assignment = network.group_observations()?;
//! println!("{}", assignment.summary());
//! network.save(&assignment, "network.eds")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Labeling match records directly
//!
//! ```
//! use eddynet_core::{get_group_array, MatchRecord, NO_GROUP};
//!
//! // Three steps of two observations; (0,0)~(1,1) and (1,1)~(2,0)
//! let records = vec![
//!     MatchRecord::new(0, 1, vec![0], vec![1]),
//!     MatchRecord::new(1, 2, vec![1], vec![0]),
//! ];
//! let assignment = get_group_array(&records, &[2, 2, 2]).unwrap();
//! assert_eq!(assignment.labels(), &[1, NO_GROUP, NO_GROUP, 1, 1, NO_GROUP]);
//! ```
//!
//! # Group ids
//!
//! `0` means "no group". Other ids are unique per group but not contiguous:
//! ids absorbed by a merge are never reused.

pub mod contour;
pub mod contour_cache;
pub mod grouping;
pub mod merge_writer;
pub mod network;
pub mod overlap;
pub mod reindex;
pub mod sweep;

pub use contour::{ContourKind, ContourSet, ContourSource, DatasetContours};
pub use contour_cache::ContourCache;
pub use grouping::{get_group_array, GroupAssignment, GroupEngine, GroupSummary, StepOffsets, NO_GROUP};
pub use merge_writer::{MergeStats, MergeWriter, TRACK_VAR};
pub use network::{Network, NetworkConfig};
pub use overlap::{OverlapConfig, OverlapPredicate, PolygonOverlap};
pub use reindex::{apply_permutation, get_next_index, invert};
pub use sweep::{MatchRecord, OverlapSweep, SweepResult};
