// Reindexing
// Group-contiguous destination slots and the scatter that moves records into them

use anyhow::{bail, Result};

/// Destination slot of every observation.
///
/// A stable counting sort by label: blocks ordered by ascending label (the
/// `NO_GROUP` block first), traversal order kept inside each block.
pub fn get_next_index(labels: &[u32]) -> Vec<usize> {
    let Some(&max) = labels.iter().max() else {
        return Vec::new();
    };
    let mut start = vec![0usize; max as usize + 1];
    for &label in labels {
        start[label as usize] += 1;
    }
    let mut cursor = 0;
    for slot in start.iter_mut() {
        let count = *slot;
        *slot = cursor;
        cursor += count;
    }

    labels
        .iter()
        .map(|&label| {
            let slot = &mut start[label as usize];
            let dest = *slot;
            *slot += 1;
            dest
        })
        .collect()
}

/// `inverse[new_index[i]] == i`
pub fn invert(new_index: &[usize]) -> Vec<usize> {
    let mut inverse = vec![0; new_index.len()];
    for (i, &dest) in new_index.iter().enumerate() {
        inverse[dest] = i;
    }
    inverse
}

/// Values moved to their destination slots
pub fn apply_permutation<T: Copy + Default>(values: &[T], new_index: &[usize]) -> Vec<T> {
    let mut out = vec![T::default(); values.len()];
    for (&value, &dest) in values.iter().zip(new_index) {
        out[dest] = value;
    }
    out
}

/// Copy fixed-size records from `src` into `dest`, record `r` landing at slot `dest_index[r]`
pub fn scatter_records(src: &[u8], record_size: usize, dest_index: &[usize], dest: &mut [u8]) -> Result<()> {
    if src.len() != dest_index.len() * record_size {
        bail!(
            "{} bytes do not hold {} records of {record_size} bytes",
            src.len(),
            dest_index.len()
        );
    }
    if record_size == 0 {
        return Ok(());
    }
    let slots = dest.len() / record_size;
    for (record, &slot) in src.chunks_exact(record_size).zip(dest_index) {
        if slot >= slots {
            bail!("destination slot {slot} out of range ({slots} slots)");
        }
        let at = slot * record_size;
        dest[at..at + record_size].copy_from_slice(record);
    }
    Ok(())
}
