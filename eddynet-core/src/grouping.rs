// Group assignment
// Incremental connected-components labeling of matched observations across steps

use crate::sweep::MatchRecord;
use ahash::AHashMap;
use anyhow::{bail, Context, Result};
use std::fmt;
use std::ops::Range;

/// Label of an observation that matched nothing
pub const NO_GROUP: u32 = 0;

/// Prefix sums of per-step observation counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOffsets {
    counts: Vec<usize>,
    offsets: Vec<usize>,
}

impl StepOffsets {
    pub fn from_counts(counts: &[usize]) -> Self {
        let mut offsets = Vec::with_capacity(counts.len() + 1);
        let mut total = 0usize;
        offsets.push(0);
        for &count in counts {
            total += count;
            offsets.push(total);
        }
        StepOffsets {
            counts: counts.to_vec(),
            offsets,
        }
    }

    /// Observations over every step
    pub fn total(&self) -> usize {
        self.offsets[self.offsets.len() - 1]
    }

    pub fn num_steps(&self) -> usize {
        self.counts.len()
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn count(&self, step: usize) -> Option<usize> {
        self.counts.get(step).copied()
    }

    /// Global indices covered by `step`
    pub fn range(&self, step: usize) -> Option<Range<usize>> {
        (step < self.counts.len()).then(|| self.offsets[step]..self.offsets[step + 1])
    }

    pub fn global_index(&self, step: usize, local: usize) -> Result<usize> {
        let count = self
            .count(step)
            .with_context(|| format!("step {step} out of range ({} steps)", self.num_steps()))?;
        if local >= count {
            bail!("observation {local} out of range for step {step} ({count} observations)");
        }
        Ok(self.offsets[step] + local)
    }
}

/// Disjoint-set forest where every root carries the group id of its set.
///
/// An unlabeled observation is always a singleton root whose id is `NO_GROUP`.
#[derive(Debug, Clone)]
struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<u32>,
    group: Vec<u32>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        DisjointSet {
            parent: (0..n).collect(),
            size: vec![1; n],
            group: vec![NO_GROUP; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn label(&mut self, x: usize) -> u32 {
        let root = self.find(x);
        self.group[root]
    }

    /// Join the sets of `x` and `y` and give the result `id`
    fn union(&mut self, x: usize, y: usize, id: u32) {
        let mut rx = self.find(x);
        let mut ry = self.find(y);
        if rx != ry {
            if self.size[rx] < self.size[ry] {
                std::mem::swap(&mut rx, &mut ry);
            }
            self.parent[ry] = rx;
            self.size[rx] += self.size[ry];
        }
        self.group[rx] = id;
    }
}

/// Group statistics reported after labeling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupSummary {
    pub observations: usize,
    /// Observations left with `NO_GROUP`
    pub singletons: usize,
    /// Distinct group ids, sentinel excluded
    pub groups: usize,
}

impl fmt::Display for GroupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} alone / {} obs, {} groups",
            self.singletons, self.observations, self.groups
        )
    }
}

/// One label per observation, flattened in step order, with the step layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAssignment {
    labels: Vec<u32>,
    offsets: StepOffsets,
    next_id: u32,
}

impl GroupAssignment {
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    pub fn offsets(&self) -> &StepOffsets {
        &self.offsets
    }

    pub fn counts(&self) -> &[usize] {
        self.offsets.counts()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// First id never handed out
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Labels of one step
    pub fn step_labels(&self, step: usize) -> Option<&[u32]> {
        self.offsets.range(step).map(|r| &self.labels[r])
    }

    pub fn summary(&self) -> GroupSummary {
        let mut ids: Vec<u32> = self.labels.iter().copied().filter(|&l| l != NO_GROUP).collect();
        let singletons = self.labels.len() - ids.len();
        ids.sort_unstable();
        ids.dedup();
        GroupSummary {
            observations: self.labels.len(),
            singletons,
            groups: ids.len(),
        }
    }
}

/// Consumes match records one at a time, in production order.
///
/// Each record is applied in four passes over its pairs, every pass looking at
/// the state left by the previous one:
/// 1. both unlabeled: every pair gets a fresh id
/// 2. only `i` labeled: `j` joins `i`'s group
/// 3. only `j` labeled: `i` joins `j`'s group
/// 4. labels differ: `i`'s whole group is merged into `j`'s
///
/// Within passes 1 to 3, an observation assigned twice keeps the last pair's
/// group; pass 4 reconnects the earlier one.
#[derive(Debug, Clone)]
pub struct GroupEngine {
    offsets: StepOffsets,
    set: DisjointSet,
    next_id: u32,
}

impl GroupEngine {
    pub fn new(counts: &[usize]) -> Self {
        let offsets = StepOffsets::from_counts(counts);
        let set = DisjointSet::new(offsets.total());
        GroupEngine {
            offsets,
            set,
            next_id: NO_GROUP + 1,
        }
    }

    /// Global `(i, j)` pairs of a record, rejecting malformed records
    fn global_pairs(&self, record: &MatchRecord) -> Result<Vec<(usize, usize)>> {
        if record.step_i == record.step_j {
            bail!("match record compares step {} with itself", record.step_i);
        }
        for step in [record.step_i, record.step_j] {
            if step >= self.offsets.num_steps() {
                bail!("match record references step {step} of {}", self.offsets.num_steps());
            }
        }
        if record.indices_i.len() != record.indices_j.len() {
            bail!(
                "match record ({}, {}) has {} indices for {} pairs",
                record.step_i,
                record.step_j,
                record.indices_i.len(),
                record.indices_j.len()
            );
        }
        record
            .pairs()
            .map(|(li, lj)| {
                Ok((
                    self.offsets.global_index(record.step_i, li)?,
                    self.offsets.global_index(record.step_j, lj)?,
                ))
            })
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("invalid match record ({}, {})", record.step_i, record.step_j))
    }

    pub fn apply(&mut self, record: &MatchRecord) -> Result<()> {
        let pairs = self.global_pairs(record)?;
        if pairs.is_empty() {
            return Ok(());
        }

        // Pass 1
        let fresh: Vec<(usize, usize)> = pairs
            .iter()
            .copied()
            .filter(|&(gi, gj)| self.set.label(gi) == NO_GROUP && self.set.label(gj) == NO_GROUP)
            .collect();
        if !fresh.is_empty() {
            let first = self.next_id;
            let count = u32::try_from(fresh.len()).ok();
            self.next_id = count
                .and_then(|c| first.checked_add(c))
                .context("group id space exhausted")?;

            let mut assigned: AHashMap<usize, u32> = AHashMap::with_capacity(fresh.len() * 2);
            for (k, &(gi, _)) in fresh.iter().enumerate() {
                assigned.insert(gi, first + k as u32);
            }
            for (k, &(_, gj)) in fresh.iter().enumerate() {
                assigned.insert(gj, first + k as u32);
            }
            let mut members: Vec<(u32, usize)> = assigned.into_iter().map(|(obs, id)| (id, obs)).collect();
            members.sort_unstable();
            let mut anchor: Option<(u32, usize)> = None;
            for (id, obs) in members {
                match anchor {
                    Some((anchor_id, root)) if anchor_id == id => self.set.union(root, obs, id),
                    _ => {
                        self.set.group[obs] = id;
                        anchor = Some((id, obs));
                    }
                }
            }
        }

        // Pass 2
        let mut joins: AHashMap<usize, usize> = AHashMap::new();
        for &(gi, gj) in &pairs {
            if self.set.label(gi) != NO_GROUP && self.set.label(gj) == NO_GROUP {
                joins.insert(gj, gi);
            }
        }
        self.join_all(joins);

        // Pass 3
        let mut joins: AHashMap<usize, usize> = AHashMap::new();
        for &(gi, gj) in &pairs {
            if self.set.label(gi) == NO_GROUP && self.set.label(gj) != NO_GROUP {
                joins.insert(gi, gj);
            }
        }
        self.join_all(joins);

        // Pass 4
        for &(gi, gj) in &pairs {
            let ri = self.set.find(gi);
            let rj = self.set.find(gj);
            if ri != rj {
                let id = self.set.group[rj];
                self.set.union(ri, rj, id);
            }
        }
        Ok(())
    }

    /// Attach each unlabeled key to the group of its target
    fn join_all(&mut self, joins: AHashMap<usize, usize>) {
        let mut joins: Vec<(usize, usize)> = joins.into_iter().collect();
        joins.sort_unstable();
        for (unlabeled, target) in joins {
            let id = self.set.label(target);
            self.set.union(target, unlabeled, id);
        }
    }

    pub fn finish(mut self) -> GroupAssignment {
        let labels = (0..self.offsets.total()).map(|x| self.set.label(x)).collect();
        GroupAssignment {
            labels,
            offsets: self.offsets,
            next_id: self.next_id,
        }
    }
}

/// Label every observation from all match records and per-step counts
pub fn get_group_array(records: &[MatchRecord], counts: &[usize]) -> Result<GroupAssignment> {
    let mut engine = GroupEngine::new(counts);
    for record in records {
        engine.apply(record)?;
    }
    Ok(engine.finish())
}
