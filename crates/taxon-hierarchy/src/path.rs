//! Materialized hierarchy paths.
//!
//! `path(n) = "/" + root + "/" + ... + n + "/"`. A root's path is `/n/`.
//! Paths are computed iteratively from one snapshot of parent links with a
//! memo, so each node's chain is walked at most once. Nodes on or under a
//! cycle, under a dangling parent, or deeper than the configured limit get
//! a [`StructuralError`] instead of a path, and any path cached on them is
//! cleared so no stale path survives. A batch is committed only if the
//! ancestor chain of each of its nodes is still the one its path was
//! computed from.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{debug, info, warn};

use taxon_store::{StoreResult, TaxonomyReader, TaxonomyStore};
use taxon_types::{SkillId, SkillNode};

use crate::cycle::{CycleDetector, ParentLinks};
use crate::error::{HierarchyError, HierarchyResult, StructuralError};

pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Paths and per-node failures derived from one snapshot of links.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathComputation {
    pub paths: BTreeMap<SkillId, String>,
    pub failures: BTreeMap<SkillId, StructuralError>,
}

pub fn compute_paths(links: &ParentLinks, max_depth: usize) -> PathComputation {
    let on_cycle = CycleDetector::new(links).detect().members();
    // id -> (path or fault, depth)
    let mut memo: HashMap<SkillId, (Result<String, StructuralError>, usize)> =
        HashMap::with_capacity(links.len());

    for &start in links.keys() {
        if memo.contains_key(&start) {
            continue;
        }

        // Walk up until a memoized ancestor, a root, or a structural fault.
        let mut chain: Vec<SkillId> = Vec::new();
        let mut current = start;
        let mut gave_up = false;
        let (base, base_depth) = loop {
            if let Some((known, depth)) = memo.get(&current) {
                break (known.clone(), *depth);
            }
            if on_cycle.contains(&current) {
                chain.push(current);
                break (Err(StructuralError::CycleDetected(current)), 0);
            }
            if chain.len() > max_depth {
                gave_up = true;
                break (
                    Err(StructuralError::DepthExceeded {
                        node: start,
                        max_depth,
                    }),
                    0,
                );
            }
            chain.push(current);
            match links.get(&current).copied().flatten() {
                None => break (Ok(String::from("/")), 0),
                Some(parent) if !links.contains_key(&parent) => {
                    break (
                        Err(StructuralError::DanglingParent {
                            node: current,
                            parent,
                        }),
                        0,
                    )
                }
                Some(parent) => current = parent,
            }
        };

        if gave_up {
            // The walk gave up before reaching a root; ancestors in the
            // chain may still be within the limit.
            memo.insert(start, (base, 0));
            continue;
        }
        let mut acc = base;
        let mut depth = base_depth;
        for id in chain.into_iter().rev() {
            depth += 1;
            acc = match acc {
                Ok(_) if depth > max_depth => {
                    Err(StructuralError::DepthExceeded { node: id, max_depth })
                }
                Ok(prefix) => Ok(format!("{prefix}{id}/")),
                Err(fault) => Err(fault),
            };
            memo.insert(id, (acc.clone(), depth));
        }
    }

    let mut out = PathComputation::default();
    for (id, (result, _)) in memo {
        match result {
            Ok(path) => {
                out.paths.insert(id, path);
            }
            Err(fault) => {
                out.failures.insert(id, fault);
            }
        }
    }
    out
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PathSummary {
    pub nodes_scanned: usize,
    pub paths_written: usize,
    pub paths_cleared: usize,
    pub unchanged: usize,
    pub cycle_failures: usize,
    pub dangling_failures: usize,
    pub depth_failures: usize,
    pub batches_committed: usize,
    pub stale_batches: usize,
}

impl PathSummary {
    pub fn failures(&self) -> usize {
        self.cycle_failures + self.dangling_failures + self.depth_failures
    }
}

struct PathWrite {
    node: SkillId,
    expected_parent: Option<SkillId>,
    /// Ancestors the path was computed from, parent first. Empty for a
    /// cleared path.
    ancestors: Vec<SkillId>,
    /// `None` clears the cached path of a node whose path cannot be computed.
    path: Option<String>,
}

impl PathWrite {
    /// Does the live hierarchy above `node` still match the snapshot?
    fn ancestry_unchanged<R: TaxonomyReader + ?Sized>(
        &self,
        reader: &R,
        node: &SkillNode,
    ) -> StoreResult<bool> {
        if node.parent_id != self.expected_parent {
            return Ok(false);
        }
        if self.path.is_none() {
            return Ok(true);
        }
        let mut current = node.parent_id;
        for expected in &self.ancestors {
            if current != Some(*expected) {
                return Ok(false);
            }
            current = reader.node(*expected)?.and_then(|n| n.parent_id);
        }
        Ok(current.is_none())
    }
}

/// Parent-first ancestors of a node whose path computed cleanly.
fn ancestors_of(links: &ParentLinks, parent: Option<SkillId>) -> Vec<SkillId> {
    let mut out = Vec::new();
    let mut current = parent;
    while let Some(id) = current {
        out.push(id);
        current = links.get(&id).copied().flatten();
    }
    out
}

/// Recomputes `hierarchy_path` for every node and writes the ones that changed.
pub struct HierarchyPathBuilder<'a, S: TaxonomyStore> {
    store: &'a S,
    batch_size: usize,
    max_depth: usize,
}

impl<'a, S: TaxonomyStore> HierarchyPathBuilder<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            batch_size: DEFAULT_BATCH_SIZE,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn run(&self) -> HierarchyResult<PathSummary> {
        let nodes = self.store.read(|r| r.nodes())?;
        let links: ParentLinks = nodes.iter().map(|n| (n.id, n.parent_id)).collect();
        let computed = compute_paths(&links, self.max_depth);

        let mut summary = PathSummary {
            nodes_scanned: nodes.len(),
            ..PathSummary::default()
        };
        for (id, fault) in &computed.failures {
            match fault {
                StructuralError::CycleDetected(_) => summary.cycle_failures += 1,
                StructuralError::DanglingParent { .. } => summary.dangling_failures += 1,
                StructuralError::DepthExceeded { .. } => summary.depth_failures += 1,
            }
            warn!(node = %id, error = %fault, "cannot compute hierarchy path");
        }

        let mut writes = Vec::new();
        for node in &nodes {
            let path = computed.paths.get(&node.id).cloned();
            if path == node.hierarchy_path {
                summary.unchanged += 1;
                continue;
            }
            let ancestors = match path {
                Some(_) => ancestors_of(&links, node.parent_id),
                None => Vec::new(),
            };
            writes.push(PathWrite {
                node: node.id,
                expected_parent: node.parent_id,
                ancestors,
                path,
            });
        }

        for (index, batch) in writes.chunks(self.batch_size).enumerate() {
            match self.write_batch(batch) {
                Ok(()) => {
                    summary.batches_committed += 1;
                    for write in batch {
                        if write.path.is_some() {
                            summary.paths_written += 1;
                        } else {
                            summary.paths_cleared += 1;
                        }
                    }
                    debug!(batch = index, rows = batch.len(), "path batch committed");
                }
                Err(HierarchyError::StaleSnapshot { node }) => {
                    summary.stale_batches += 1;
                    warn!(batch = index, node = %node, "parent changed under batch, batch skipped");
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            scanned = summary.nodes_scanned,
            written = summary.paths_written,
            failed = summary.failures(),
            stale = summary.stale_batches,
            "hierarchy paths rebuilt"
        );
        Ok(summary)
    }

    fn write_batch(&self, batch: &[PathWrite]) -> HierarchyResult<()> {
        self.store.transaction(|tx| {
            for write in batch {
                let mut node = tx.require_node(write.node)?;
                if !write.ancestry_unchanged(&*tx, &node)? {
                    return Err(HierarchyError::StaleSnapshot { node: write.node });
                }
                node.hierarchy_path = write.path.clone();
                tx.update_node(node)?;
            }
            Ok(())
        })
    }
}
