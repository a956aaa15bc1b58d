// Merge writer
// Concatenates per-step datasets into one dataset ordered by group

use crate::grouping::GroupAssignment;
use crate::reindex::{apply_permutation, get_next_index, scatter_records};
use anyhow::{bail, Context, Result};
use eddynet_common::{
    chunk_rows_for, Attributes, Dataset, DatasetWriter, DType, Schema, Variable, DEFAULT_COMPRESSION_LEVEL, OBS_DIM,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Output variable holding each observation's group id
pub const TRACK_VAR: &str = "track";

/// What a merge wrote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub sources: usize,
    pub observations: usize,
    /// Variables written, `track` included
    pub variables: usize,
}

/// Writes the merged, group-ordered dataset
#[derive(Debug, Clone, Copy)]
pub struct MergeWriter {
    compression_level: i32,
}

impl Default for MergeWriter {
    fn default() -> Self {
        MergeWriter {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl MergeWriter {
    pub fn new(compression_level: i32) -> Self {
        MergeWriter { compression_level }
    }

    /// Output layout: the template's dimensions with `obs` resized, its global
    /// attributes, `track` first, then every template variable re-chunked for
    /// the new size and stripped of stale extrema.
    fn output_schema(template: &Schema, nb_obs: usize) -> Result<Schema> {
        if template.var(TRACK_VAR).is_some() {
            bail!("input already has a {TRACK_VAR:?} variable");
        }
        let mut schema = Schema::new();
        for dim in &template.dims {
            let len = if dim.name == OBS_DIM { nb_obs } else { dim.len };
            schema.add_dim(&dim.name, len);
        }
        schema.attrs = template.attrs.clone();
        schema.add_var(TRACK_VAR, DType::U32, &[OBS_DIM], Attributes::new());
        for var in &template.vars {
            schema.vars.push(Variable {
                attrs: var.attrs.without_stale(),
                chunk_rows: chunk_rows_for(var.is_sampled(), nb_obs),
                ..var.clone()
            });
        }
        Ok(schema)
    }

    /// Check every source against the first before anything is written
    fn validate_sources(sources: &[PathBuf], counts: &[usize]) -> Result<Schema> {
        let template = Dataset::open(&sources[0])
            .with_context(|| format!("Failed to open template {}", sources[0].display()))?
            .schema()
            .clone();
        for (path, &count) in sources.iter().zip(counts) {
            let ds = Dataset::open(path)?;
            template
                .check_compatible(ds.schema())
                .with_context(|| format!("{} does not match {}", path.display(), sources[0].display()))?;
            if ds.obs_len() != count {
                bail!(
                    "{} holds {} observations, {count} were grouped",
                    path.display(),
                    ds.obs_len()
                );
            }
        }
        Ok(template)
    }

    /// Validate every source, stage the reordered records, then write `output`.
    /// No file is created when validation fails, and a write that fails
    /// part-way removes its partial output.
    pub fn write<P: AsRef<Path>>(
        &self,
        sources: &[PathBuf],
        assignment: &GroupAssignment,
        output: P,
    ) -> Result<MergeStats> {
        let output = output.as_ref();
        if sources.is_empty() {
            bail!("nothing to merge: no input files");
        }
        let counts = assignment.counts();
        if counts.len() != sources.len() {
            bail!(
                "grouping covers {} steps but {} files were given",
                counts.len(),
                sources.len()
            );
        }

        let template = Self::validate_sources(sources, counts)?;
        let nb_obs = assignment.len();
        let schema = Self::output_schema(&template, nb_obs)?;
        let new_index = get_next_index(assignment.labels());

        let record_sizes = template
            .vars
            .iter()
            .map(|v| template.record_size(v))
            .collect::<Result<Vec<_>>>()?;
        let mut staging = record_sizes
            .iter()
            .zip(&template.vars)
            .map(|(rs, var)| {
                rs.checked_mul(nb_obs)
                    .map(|len| vec![0u8; len])
                    .with_context(|| format!("merged {} is too large", var.name))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut cursor = 0;
        for (path, &count) in sources.iter().zip(counts) {
            debug!(file = %path.display(), observations = count, "copying");
            let mut ds = Dataset::open(path)?;
            let dest = &new_index[cursor..cursor + count];
            for ((var, &rs), buffer) in template.vars.iter().zip(&record_sizes).zip(staging.iter_mut()) {
                let raw = ds.read_raw(&var.name)?;
                scatter_records(&raw, rs, dest, buffer)
                    .with_context(|| format!("{}: cannot copy {}", path.display(), var.name))?;
            }
            cursor += count;
        }

        let mut writer = DatasetWriter::create(output, schema, self.compression_level)?;
        writer.write_values::<u32>(TRACK_VAR, &apply_permutation(assignment.labels(), &new_index))?;
        for (var, buffer) in template.vars.iter().zip(&staging) {
            writer.write_raw(&var.name, buffer)?;
        }
        writer
            .finish()
            .with_context(|| format!("Failed to finish {}", output.display()))?;

        let stats = MergeStats {
            sources: sources.len(),
            observations: cursor,
            variables: template.vars.len() + 1,
        };
        info!(
            output = %output.display(),
            observations = stats.observations,
            variables = stats.variables,
            "merged dataset written"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::get_group_array;
    use crate::sweep::MatchRecord;
    use eddynet_common::AttrValue;
    use tempfile::tempdir;

    fn step(dir: &Path, name: &str, ids: &[i32], extra_var: bool) -> PathBuf {
        let path = dir.join(name);
        let mut schema = Schema::new();
        schema.add_dim("obs", ids.len()).add_dim("NbSample", 2);
        schema.attrs.set("title", AttrValue::Text("synthetic".into()));
        let mut attrs = Attributes::new();
        attrs.set("units", AttrValue::Text("1".into()));
        attrs.set("min", AttrValue::Int(0));
        attrs.set("max", AttrValue::Int(99));
        schema.add_var("id", DType::I32, &["obs"], attrs);
        schema.add_var("pair", DType::I32, &["obs", "NbSample"], Attributes::new());
        if extra_var {
            schema.add_var("extra", DType::U8, &["obs"], Attributes::new());
        }

        let pair: Vec<i32> = ids.iter().flat_map(|&i| [i, -i]).collect();
        let mut writer = DatasetWriter::create(&path, schema, 1).unwrap();
        writer.write_values("id", ids).unwrap();
        writer.write_values("pair", &pair).unwrap();
        if extra_var {
            writer.write_values("extra", &vec![0u8; ids.len()]).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_output_grouped_and_complete() {
        let dir = tempdir().unwrap();
        let sources = vec![
            step(dir.path(), "a.eds", &[10, 11], false),
            step(dir.path(), "b.eds", &[20, 21], false),
            step(dir.path(), "c.eds", &[30, 31], false),
        ];
        let records = [
            MatchRecord::new(0, 1, vec![0], vec![1]),
            MatchRecord::new(1, 2, vec![1], vec![0]),
        ];
        let assignment = get_group_array(&records, &[2, 2, 2]).unwrap();
        let out = dir.path().join("network.eds");
        let stats = MergeWriter::default().write(&sources, &assignment, &out).unwrap();
        assert_eq!(stats.observations, 6);
        assert_eq!(stats.variables, 3);

        let mut ds = Dataset::open(&out).unwrap();
        assert_eq!(ds.schema().vars[0].name, TRACK_VAR);
        assert_eq!(ds.read_values::<u32>(TRACK_VAR).unwrap(), vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(ds.read_values::<i32>("id").unwrap(), vec![11, 20, 31, 10, 21, 30]);
        assert_eq!(
            ds.read_values::<i32>("pair").unwrap(),
            vec![11, -11, 20, -20, 31, -31, 10, -10, 21, -21, 30, -30]
        );

        let id = ds.schema().var("id").unwrap();
        assert!(id.attrs.get("min").is_none());
        assert!(id.attrs.get("max").is_none());
        assert_eq!(id.attrs.get("units"), Some(&AttrValue::Text("1".into())));
        assert_eq!(ds.schema().attrs.get("title"), Some(&AttrValue::Text("synthetic".into())));
        assert_eq!(ds.schema().dim_len("NbSample"), Some(2));
    }

    #[test]
    fn test_schema_mismatch_rejected_before_output() {
        let dir = tempdir().unwrap();
        let sources = vec![
            step(dir.path(), "a.eds", &[1], false),
            step(dir.path(), "b.eds", &[2], true),
        ];
        let assignment = get_group_array(&[], &[1, 1]).unwrap();
        let out = dir.path().join("network.eds");
        let err = MergeWriter::default().write(&sources, &assignment, &out).unwrap_err();
        assert!(format!("{err:#}").contains("extra"));
        assert!(!out.exists());
    }

    #[test]
    fn test_count_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let sources = vec![step(dir.path(), "a.eds", &[1, 2], false)];
        let out = dir.path().join("network.eds");
        let wrong = get_group_array(&[], &[3]).unwrap();
        assert!(MergeWriter::default().write(&sources, &wrong, &out).is_err());
        let steps = get_group_array(&[], &[2, 0]).unwrap();
        assert!(MergeWriter::default().write(&sources, &steps, &out).is_err());
        let empty = get_group_array(&[], &[]).unwrap();
        assert!(MergeWriter::default().write(&[], &empty, &out).is_err());
    }
}
