// Dataset inspection
// Text reports for the `info` and `dump` subcommands

use anyhow::{Context, Result};
use eddynet_common::Dataset;
use std::fmt::Write;

/// Dimensions, global attributes and variables of a dataset
pub fn info_report(ds: &Dataset) -> Result<String> {
    let schema = ds.schema();
    let mut out = String::new();
    writeln!(out, "Dataset: {}", ds.path().display())?;

    writeln!(out, "Dimensions:")?;
    for dim in &schema.dims {
        writeln!(out, "  {} = {}", dim.name, dim.len)?;
    }

    if !schema.attrs.is_empty() {
        writeln!(out, "Attributes:")?;
        for (name, value) in schema.attrs.iter() {
            writeln!(out, "  {name} = {value}")?;
        }
    }

    writeln!(out, "Variables:")?;
    for var in &schema.vars {
        writeln!(
            out,
            "  {} {}({}) chunk={}",
            var.dtype,
            var.name,
            var.dims.join(", "),
            var.chunk_rows
        )?;
        for (name, value) in var.attrs.iter() {
            writeln!(out, "    {name} = {value}")?;
        }
    }
    Ok(out)
}

/// Masked and scaled values of `name`, one line per record, at most `rows` lines
pub fn dump_rows(ds: &mut Dataset, name: &str, rows: Option<usize>) -> Result<Vec<String>> {
    let var = ds
        .schema()
        .var(name)
        .with_context(|| format!("{}: no variable named {name}", ds.path().display()))?
        .clone();
    let per_record = ds.schema().record_size(&var)? / var.dtype.size();
    let values = ds.read_f64(name)?;

    let limit = rows.unwrap_or(usize::MAX);
    if per_record == 0 {
        return Ok(vec![String::new(); ds.obs_len().min(limit)]);
    }
    Ok(values
        .chunks(per_record)
        .take(limit)
        .map(|record| {
            record
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("\t")
        })
        .collect())
}
