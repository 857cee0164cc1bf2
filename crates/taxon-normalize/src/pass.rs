//! The normalization batch pass.
//!
//! Recomputes node canonical keys under a [`KeyBasis`], surfaces collision
//! groups, and (only in [`ResolveMode::AutoResolve`]) disambiguates them.
//! Synonym keys are then re-normalized per owner.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use taxon_store::{StoreError, TaxonomyReader, TaxonomyStore};
use taxon_types::{now, SkillId, SkillNode, SynonymId};

use crate::collision::{CollisionGroup, CollisionIndex, KeyBasis};
use crate::error::NormalizeResult;
use crate::fingerprint::{FingerprintContext, HashDisambiguator};
use crate::review::write_review_file;
use crate::text::normalize;

/// How colliding nodes are handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveMode {
    /// Leave colliding keys untouched; the review file is the output.
    #[default]
    ManualReview,
    /// Give every colliding node a `base__hash` key.
    AutoResolve,
}

#[derive(Clone, Debug, Default)]
pub struct NormalizeOptions {
    pub basis: KeyBasis,
    pub mode: ResolveMode,
    pub review_file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeSummary {
    pub nodes_scanned: usize,
    pub nodes_updated: usize,
    pub nodes_failed: usize,
    pub collision_groups: usize,
    pub colliding_nodes: usize,
    pub left_for_review: usize,
    pub synonyms_scanned: usize,
    pub synonyms_updated: usize,
    pub synonyms_failed: usize,
}

#[derive(Clone, Debug, Default)]
pub struct NormalizeReport {
    pub summary: NormalizeSummary,
    pub groups: Vec<CollisionGroup>,
}

pub struct NormalizationPass<'a, S: TaxonomyStore> {
    store: &'a S,
    options: NormalizeOptions,
}

impl<'a, S: TaxonomyStore> NormalizationPass<'a, S> {
    pub fn new(store: &'a S, options: NormalizeOptions) -> Self {
        Self { store, options }
    }

    pub fn run(&self) -> NormalizeResult<NormalizeReport> {
        let nodes = self.store.read(|r| r.nodes())?;
        let index = CollisionIndex::build(&nodes, self.options.basis);
        let groups = index.groups();

        let mut summary = NormalizeSummary {
            nodes_scanned: index.len(),
            collision_groups: groups.len(),
            colliding_nodes: groups.iter().map(CollisionGroup::len).sum(),
            ..NormalizeSummary::default()
        };
        info!(
            basis = %self.options.basis,
            active = index.len(),
            groups = groups.len(),
            "collision index built"
        );

        if let Some(path) = &self.options.review_file {
            write_review_file(path, &groups)?;
            info!(path = %path.display(), groups = groups.len(), "review file written");
        }

        let targets = self.target_keys(&nodes, &index, &mut summary);
        let (updated, failed) = apply_until_settled(targets, |id, key| {
            self.store.transaction(|tx| {
                let mut node = tx.require_node(id)?;
                node.canonical_key = key.to_string();
                node.updated_at = now();
                tx.update_node(node)
            })
        });
        summary.nodes_updated = updated;
        summary.nodes_failed = failed;

        let (scanned, updated, failed) = self.renormalize_synonyms()?;
        summary.synonyms_scanned = scanned;
        summary.synonyms_updated = updated;
        summary.synonyms_failed = failed;

        info!(
            updated = summary.nodes_updated,
            failed = summary.nodes_failed,
            review = summary.left_for_review,
            synonyms_updated = summary.synonyms_updated,
            "normalization pass complete"
        );
        Ok(NormalizeReport { summary, groups })
    }

    /// Desired key for every node whose key should change.
    fn target_keys(
        &self,
        nodes: &[SkillNode],
        index: &CollisionIndex,
        summary: &mut NormalizeSummary,
    ) -> BTreeMap<SkillId, String> {
        let current: BTreeMap<SkillId, &str> = nodes
            .iter()
            .map(|n| (n.id, n.canonical_key.as_str()))
            .collect();
        let mut targets = BTreeMap::new();

        let mut disambiguator = match self.options.mode {
            ResolveMode::ManualReview => None,
            ResolveMode::AutoResolve => {
                let settled = index
                    .entries()
                    .filter(|(id, _)| !index.is_colliding(*id))
                    .map(|(_, key)| key.to_string());
                let reserved = nodes
                    .iter()
                    .filter(|n| !n.is_active())
                    .map(|n| n.canonical_key.clone());
                Some(HashDisambiguator::new(settled.chain(reserved)))
            }
        };

        let by_id: BTreeMap<SkillId, &SkillNode> = nodes.iter().map(|n| (n.id, n)).collect();
        for (id, base) in index.entries() {
            let key = if !index.is_colliding(id) {
                base.to_string()
            } else if let (Some(d), Some(node)) = (disambiguator.as_mut(), by_id.get(&id)) {
                d.resolve(base, &FingerprintContext::of(node))
            } else {
                summary.left_for_review += 1;
                continue;
            };
            if key.is_empty() {
                warn!(node = %id, "display name normalizes to an empty key, leaving key as is");
                continue;
            }
            if current.get(&id).copied() != Some(key.as_str()) {
                targets.insert(id, key);
            }
        }
        targets
    }

    /// Returns `(scanned, updated, failed)`.
    fn renormalize_synonyms(&self) -> NormalizeResult<(usize, usize, usize)> {
        let synonyms = self.store.read(|r| r.synonyms())?;
        let mut seen: HashSet<(SkillId, String)> = HashSet::new();
        let mut targets: BTreeMap<SynonymId, String> = BTreeMap::new();

        for syn in &synonyms {
            let base = normalize(&syn.raw_text);
            if base.is_empty() {
                continue;
            }
            let key = if seen.contains(&(syn.owner_id, base.clone())) {
                format!("{base}_{}", syn.id)
            } else {
                base
            };
            seen.insert((syn.owner_id, key.clone()));
            if key != syn.canonical_key {
                targets.insert(syn.id, key);
            }
        }

        let (updated, failed) = apply_until_settled(targets, |id, key| {
            self.store.transaction(|tx| {
                let mut syn = tx.synonym(id)?.ok_or(StoreError::SynonymNotFound(id))?;
                syn.canonical_key = key.to_string();
                tx.update_synonym(syn)
            })
        });
        Ok((synonyms.len(), updated, failed))
    }
}

/// Apply each pending update as its own write, sweeping again while a
/// sweep makes progress. Uniqueness violations are retried on the next
/// sweep (a later update may free the key); anything else fails at once.
fn apply_until_settled<K, F>(mut pending: BTreeMap<K, String>, mut apply: F) -> (usize, usize)
where
    K: Copy + Ord + std::fmt::Display,
    F: FnMut(K, &str) -> Result<(), StoreError>,
{
    let mut updated = 0;
    let mut failed = 0;
    loop {
        let before = pending.len();
        let mut retry = BTreeMap::new();
        for (id, key) in std::mem::take(&mut pending) {
            match apply(id, &key) {
                Ok(()) => {
                    debug!(id = %id, key = %key, "key updated");
                    updated += 1;
                }
                Err(err) if err.is_unique_violation() => {
                    retry.insert(id, key);
                }
                Err(err) => {
                    warn!(id = %id, key = %key, error = %err, "key update failed");
                    failed += 1;
                }
            }
        }
        pending = retry;
        if pending.is_empty() || pending.len() == before {
            break;
        }
    }
    for (id, key) in &pending {
        warn!(id = %id, key = %key, "key is held by another row, skipping");
    }
    (updated, failed + pending.len())
}
