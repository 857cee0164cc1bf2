//! Cycle detection over single-parent links.
//!
//! Each node has at most one parent, so the walk from any node is a single
//! chain. Nodes are marked unvisited, on-stack or done; reaching an
//! on-stack node closes a cycle. Every node is visited once, O(V) overall.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::convert::Infallible;

use serde::Serialize;
use tracing::debug;

use taxon_store::{StoreResult, TaxonomyReader};
use taxon_types::SkillId;

/// `id -> parent_id` for every node.
pub type ParentLinks = BTreeMap<SkillId, Option<SkillId>>;

/// A parent id that does not resolve to a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DanglingLink {
    pub node: SkillId,
    pub parent: SkillId,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Each cycle in traversal order, closed by repeating its first id
    /// (`[A, B, A]`).
    pub cycles: Vec<Vec<SkillId>>,
    pub dangling: Vec<DanglingLink>,
}

impl CycleReport {
    pub fn is_acyclic(&self) -> bool {
        self.cycles.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.cycles.is_empty() && self.dangling.is_empty()
    }

    /// Every node that sits on some cycle.
    pub fn members(&self) -> BTreeSet<SkillId> {
        self.cycles.iter().flatten().copied().collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

pub struct CycleDetector<'a> {
    links: &'a ParentLinks,
}

impl<'a> CycleDetector<'a> {
    pub fn new(links: &'a ParentLinks) -> Self {
        Self { links }
    }

    pub fn detect(&self) -> CycleReport {
        let mut marks: HashMap<SkillId, Mark> = HashMap::with_capacity(self.links.len());
        let mut report = CycleReport::default();

        for &start in self.links.keys() {
            if marks.contains_key(&start) {
                continue;
            }
            let mut stack: Vec<SkillId> = Vec::new();
            let mut current = start;
            loop {
                match marks.get(&current) {
                    Some(Mark::Done) => break,
                    Some(Mark::OnStack) => {
                        if let Some(pos) = stack.iter().position(|id| *id == current) {
                            let mut cycle = stack[pos..].to_vec();
                            cycle.push(current);
                            debug!(node = %current, len = cycle.len() - 1, "parent cycle found");
                            report.cycles.push(cycle);
                        }
                        break;
                    }
                    None => {
                        marks.insert(current, Mark::OnStack);
                        stack.push(current);
                    }
                }
                match self.links.get(&current).copied().flatten() {
                    Some(parent) if self.links.contains_key(&parent) => current = parent,
                    Some(parent) => {
                        report.dangling.push(DanglingLink {
                            node: current,
                            parent,
                        });
                        break;
                    }
                    None => break,
                }
            }
            for id in stack {
                marks.insert(id, Mark::Done);
            }
        }
        report
    }
}

/// Would setting `node.parent_id = new_parent` close a cycle?
///
/// True when `new_parent` is `node` or one of its descendants, i.e. when
/// `node` is reachable walking up from `new_parent`.
pub fn would_create_cycle(links: &ParentLinks, node: SkillId, new_parent: SkillId) -> bool {
    let walk = reaches(node, new_parent, |id| {
        Ok::<_, Infallible>(links.get(&id).copied().flatten())
    });
    match walk {
        Ok(found) => found,
        Err(never) => match never {},
    }
}

/// [`would_create_cycle`] against a live reader. Only the ancestors of
/// `new_parent` are fetched, so the cost is the depth of that chain.
pub fn would_create_cycle_in<R: TaxonomyReader + ?Sized>(
    reader: &R,
    node: SkillId,
    new_parent: SkillId,
) -> StoreResult<bool> {
    reaches(node, new_parent, |id| {
        Ok(reader.node(id)?.and_then(|n| n.parent_id))
    })
}

fn reaches<E>(
    node: SkillId,
    new_parent: SkillId,
    mut parent_of: impl FnMut(SkillId) -> Result<Option<SkillId>, E>,
) -> Result<bool, E> {
    let mut seen = HashSet::new();
    let mut current = Some(new_parent);
    while let Some(id) = current {
        if id == node {
            return Ok(true);
        }
        if !seen.insert(id) {
            // An existing cycle above `new_parent` that does not include `node`.
            return Ok(false);
        }
        current = parent_of(id)?;
    }
    Ok(false)
}
