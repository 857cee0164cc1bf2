//! Two-pass feed import.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use taxon_hierarchy::would_create_cycle_in;
use taxon_normalize::normalize;
use taxon_store::{StoreError, TaxonomyReader, TaxonomyStore, Upserted};
use taxon_types::{NewRelation, NewSynonym, RelationType, SkillId, SkillNode};

use crate::error::ImportResult;
use crate::feed::{FeedRecord, ParsedFeed};

/// Provenance tag on synonyms created from the feed.
pub const FEED_PROVENANCE: &str = "FEED_IMPORT";

/// Rows between progress log lines.
pub const PROGRESS_EVERY: usize = 500;

const FEED_RELATION_STRENGTH: f64 = 0.5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub rows: usize,
    pub rows_rejected: usize,
    pub rows_without_key: usize,
    pub nodes_inserted: usize,
    pub nodes_updated: usize,
    /// Rows naming a node that has since been merged away. Their edges go
    /// to the surviving node; the merged node itself is not touched.
    pub nodes_merged: usize,
    pub node_failures: usize,
    pub synonyms_created: usize,
    pub synonyms_existing: usize,
    pub synonym_failures: usize,
    pub parents_set: usize,
    pub parents_unchanged: usize,
    pub parents_unresolved: usize,
    pub parents_refused: usize,
    pub relations_created: usize,
    pub relations_existing: usize,
    pub relations_unresolved: usize,
    pub relation_failures: usize,
}

/// Resolves textual skill references to node ids.
///
/// Canonical key first, then lower-cased display name. A reference to a
/// deprecated node follows its merge pointer to the node that absorbed it.
struct Resolver {
    by_key: HashMap<String, SkillId>,
    by_name: HashMap<String, SkillId>,
    merged_into: HashMap<SkillId, SkillId>,
}

impl Resolver {
    fn new(nodes: &[SkillNode]) -> Self {
        let mut by_name = HashMap::new();
        for node in nodes {
            by_name
                .entry(node.display_name.trim().to_lowercase())
                .or_insert(node.id);
        }
        Self {
            by_key: nodes
                .iter()
                .map(|n| (n.canonical_key.clone(), n.id))
                .collect(),
            by_name,
            merged_into: nodes
                .iter()
                .filter_map(|n| n.merged_into_id.map(|into| (n.id, into)))
                .collect(),
        }
    }

    fn resolve(&self, reference: &str) -> Option<SkillId> {
        let found = self
            .by_key
            .get(&normalize(reference))
            .or_else(|| self.by_name.get(&reference.trim().to_lowercase()))
            .copied()?;
        self.follow(found)
    }

    /// The node that finally absorbed `found`, or `found` itself.
    fn follow(&self, found: SkillId) -> Option<SkillId> {
        let mut id = found;
        for _ in 0..=self.merged_into.len() {
            match self.merged_into.get(&id) {
                Some(&into) => id = into,
                None => return Some(id),
            }
        }
        warn!(node = %found, "merge pointers loop, reference left unresolved");
        None
    }
}

pub struct ImportPipeline<'a, S: TaxonomyStore> {
    store: &'a S,
}

impl<'a, S: TaxonomyStore> ImportPipeline<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn run(&self, feed: &ParsedFeed) -> ImportResult<ImportSummary> {
        let mut summary = ImportSummary {
            rows: feed.rows(),
            rows_rejected: feed.rejected,
            ..ImportSummary::default()
        };
        info!(rows = summary.rows, rejected = feed.rejected, "import started");

        let imported = self.upsert_nodes(feed, &mut summary);
        info!(
            inserted = summary.nodes_inserted,
            updated = summary.nodes_updated,
            merged = summary.nodes_merged,
            failed = summary.node_failures,
            "node pass complete"
        );

        let resolver = Resolver::new(&self.store.read(|r| r.nodes())?);
        for (done, (row, record, slot)) in imported.iter().enumerate() {
            let id = match *slot {
                NodeSlot::Live(id) => id,
                NodeSlot::Merged(merged) => match resolver.follow(merged) {
                    Some(survivor) => {
                        debug!(row, merged = %merged, survivor = %survivor, "row redirected to surviving node");
                        survivor
                    }
                    None => {
                        summary.node_failures += 1;
                        continue;
                    }
                },
            };
            self.attach_synonyms(id, record, &mut summary);
            // A merged row's parent link belongs to the merged node, not to
            // the survivor.
            if matches!(slot, NodeSlot::Live(_)) {
                self.attach_parent(*row, id, record, &resolver, &mut summary);
            }
            self.attach_relations(*row, id, record, &resolver, &mut summary);
            if (done + 1) % PROGRESS_EVERY == 0 {
                info!(processed = done + 1, total = imported.len(), "edge pass progress");
            }
        }

        info!(
            synonyms = summary.synonyms_created,
            parents = summary.parents_set,
            relations = summary.relations_created,
            unresolved = summary.parents_unresolved + summary.relations_unresolved,
            "import complete"
        );
        Ok(summary)
    }

    /// Pass 1. Returns `(row, record, slot)` for every row that maps to a node.
    ///
    /// A row whose key belongs to a merged-away node leaves that node as is.
    fn upsert_nodes<'f>(
        &self,
        feed: &'f ParsedFeed,
        summary: &mut ImportSummary,
    ) -> Vec<(usize, &'f FeedRecord, NodeSlot)> {
        let mut imported = Vec::with_capacity(feed.records.len());
        for (done, (row, record)) in feed.records.iter().enumerate() {
            let key = record.key();
            if key.is_empty() {
                warn!(row, "row has no skill_name or normalized_name, skipping");
                summary.rows_without_key += 1;
                continue;
            }
            let outcome = self.store.transaction(|tx| {
                if let Some(existing) = tx.node_by_key(&key)? {
                    if existing.merged_into_id.is_some() {
                        return Ok(NodeOutcome::Merged(existing.id));
                    }
                }
                Ok::<_, StoreError>(NodeOutcome::Upserted(tx.upsert_node(record.to_draft(&key))?))
            });
            match outcome {
                Ok(NodeOutcome::Upserted(Upserted::Inserted(id))) => {
                    summary.nodes_inserted += 1;
                    imported.push((*row, record, NodeSlot::Live(id)));
                }
                Ok(NodeOutcome::Upserted(Upserted::Updated(id))) => {
                    summary.nodes_updated += 1;
                    imported.push((*row, record, NodeSlot::Live(id)));
                }
                Ok(NodeOutcome::Merged(id)) => {
                    debug!(row, key = %key, node = %id, "row names a merged node");
                    summary.nodes_merged += 1;
                    imported.push((*row, record, NodeSlot::Merged(id)));
                }
                Err(err) => {
                    warn!(row, key = %key, error = %err, "node upsert failed");
                    summary.node_failures += 1;
                }
            }
            if (done + 1) % PROGRESS_EVERY == 0 {
                info!(processed = done + 1, total = feed.records.len(), "node pass progress");
            }
        }
        imported
    }

    fn attach_synonyms(&self, owner: SkillId, record: &FeedRecord, summary: &mut ImportSummary) {
        for raw in record.synonyms() {
            let key = normalize(raw);
            if key.is_empty() {
                continue;
            }
            let created = self.store.transaction(|tx| {
                if tx.find_synonym(owner, &key)?.is_some() {
                    return Ok(false);
                }
                tx.insert_synonym(
                    NewSynonym::new(owner, raw.trim(), key.as_str()).with_provenance(FEED_PROVENANCE),
                )?;
                Ok::<_, StoreError>(true)
            });
            match created {
                Ok(true) => summary.synonyms_created += 1,
                Ok(false) => summary.synonyms_existing += 1,
                Err(err) => {
                    warn!(node = %owner, synonym = %raw, error = %err, "synonym insert failed");
                    summary.synonym_failures += 1;
                }
            }
        }
    }

    fn attach_parent(
        &self,
        row: usize,
        id: SkillId,
        record: &FeedRecord,
        resolver: &Resolver,
        summary: &mut ImportSummary,
    ) {
        let Some(reference) = record.parent() else {
            return;
        };
        let Some(parent) = resolver.resolve(reference) else {
            debug!(row, node = %id, parent = reference, "parent reference unresolved");
            summary.parents_unresolved += 1;
            return;
        };
        if parent == id {
            warn!(row, node = %id, "skill names itself as parent, skipping");
            summary.parents_refused += 1;
            return;
        }

        let result = self.store.transaction(|tx| {
            let mut node = tx.require_node(id)?;
            if node.parent_id == Some(parent) {
                return Ok(ParentOutcome::Unchanged);
            }
            if would_create_cycle_in(&*tx, id, parent)? {
                return Ok(ParentOutcome::WouldCycle);
            }
            node.parent_id = Some(parent);
            tx.update_node(node)?;
            Ok::<_, StoreError>(ParentOutcome::Set)
        });
        match result {
            Ok(ParentOutcome::Set) => summary.parents_set += 1,
            Ok(ParentOutcome::Unchanged) => summary.parents_unchanged += 1,
            Ok(ParentOutcome::WouldCycle) => {
                warn!(row, node = %id, parent = %parent, "parent link would close a cycle, skipping");
                summary.parents_refused += 1;
            }
            Err(err) => {
                warn!(row, node = %id, error = %err, "parent update failed");
                summary.parents_refused += 1;
            }
        }
    }

    fn attach_relations(
        &self,
        row: usize,
        id: SkillId,
        record: &FeedRecord,
        resolver: &Resolver,
        summary: &mut ImportSummary,
    ) {
        for reference in record.related() {
            let target = match resolver.resolve(reference) {
                Some(target) if target != id => target,
                _ => {
                    debug!(row, node = %id, target = %reference, "related skill unresolved");
                    summary.relations_unresolved += 1;
                    continue;
                }
            };
            let created = self.store.transaction(|tx| {
                let ty = RelationType::CommonlyWith;
                let reverse = tx
                    .find_relation(target, id, &ty)?
                    .filter(|r| r.bidirectional);
                if tx.find_relation(id, target, &ty)?.is_some() || reverse.is_some() {
                    return Ok(false);
                }
                tx.insert_relation(
                    NewRelation::new(id, target, ty)
                        .with_strength(FEED_RELATION_STRENGTH)
                        .bidirectional(true),
                )?;
                Ok::<_, StoreError>(true)
            });
            match created {
                Ok(true) => summary.relations_created += 1,
                Ok(false) => summary.relations_existing += 1,
                Err(err) => {
                    warn!(row, node = %id, target = %target, error = %err, "relation insert failed");
                    summary.relation_failures += 1;
                }
            }
        }
    }
}

enum NodeOutcome {
    Upserted(Upserted),
    Merged(SkillId),
}

/// Where a row's edges attach.
#[derive(Clone, Copy)]
enum NodeSlot {
    Live(SkillId),
    /// The row's key belongs to this deprecated node.
    Merged(SkillId),
}

enum ParentOutcome {
    Set,
    Unchanged,
    WouldCycle,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::parse_feed;
    use taxon_store::InMemoryTaxonomyStore;
    use taxon_types::Endpoint;

    const FEED: &str = r#"[
        {"skill_name": "Programming", "skill_type": "domain"},
        {"skill_name": "JavaScript", "parent_skill": "Programming", "synonyms": ["JS", "ECMAScript", "js"]},
        {"skill_name": "React", "normalized_name": "react", "parent_skill": "javascript",
         "synonyms": ["ReactJS"], "related_skills": ["JavaScript", "Redux", "react"], "demand_score": 0.9},
        {"skill_name": "Angular", "parent_skill": "Frontend Frameworks"},
        {"synonyms": ["orphan"]}
    ]"#;

    fn import(store: &InMemoryTaxonomyStore) -> ImportSummary {
        let feed = parse_feed(FEED).unwrap();
        ImportPipeline::new(store).run(&feed).unwrap()
    }

    fn id_of(store: &InMemoryTaxonomyStore, key: &str) -> SkillId {
        store.read(|r| r.node_by_key(key)).unwrap().unwrap().id
    }

    #[test]
    fn first_import_builds_the_graph() {
        let store = InMemoryTaxonomyStore::new();
        let summary = import(&store);

        assert_eq!(summary.rows, 5);
        assert_eq!(summary.rows_without_key, 1);
        assert_eq!(summary.nodes_inserted, 4);
        // "js" repeats "JS" after normalization.
        assert_eq!(summary.synonyms_created, 3);
        assert_eq!(summary.synonyms_existing, 1);
        assert_eq!(summary.parents_set, 2);
        assert_eq!(summary.parents_unresolved, 1);
        // "Redux" is unknown and "react" is the node itself.
        assert_eq!(summary.relations_created, 1);
        assert_eq!(summary.relations_unresolved, 2);

        let programming = id_of(&store, "programming");
        let js = id_of(&store, "javascript");
        let react = id_of(&store, "react");
        let react_node = store.read(|r| r.require_node(react)).unwrap();
        assert_eq!(react_node.parent_id, Some(js));
        assert_eq!(react_node.weights.demand_score, 0.9);
        let js_node = store.read(|r| r.require_node(js)).unwrap();
        assert_eq!(js_node.parent_id, Some(programming));

        let rel = store
            .read(|r| r.find_relation(react, js, &RelationType::CommonlyWith))
            .unwrap()
            .unwrap();
        assert!(rel.bidirectional);
        assert_eq!(rel.strength, 0.5);

        let synonyms = store.read(|r| r.synonyms_of(react)).unwrap();
        assert_eq!(synonyms[0].provenance, FEED_PROVENANCE);
        assert_eq!(synonyms[0].locale, "en");
    }

    #[test]
    fn reimport_creates_nothing_new() {
        let store = InMemoryTaxonomyStore::new();
        import(&store);
        let before = store.stats().unwrap();

        let again = import(&store);
        assert_eq!(again.nodes_inserted, 0);
        assert_eq!(again.nodes_updated, 4);
        assert_eq!(again.synonyms_created, 0);
        assert_eq!(again.relations_created, 0);
        assert_eq!(again.parents_set, 0);
        assert_eq!(again.parents_unchanged, 2);
        assert_eq!(store.stats().unwrap(), before);
    }

    #[test]
    fn cycle_closing_parent_is_refused() {
        let store = InMemoryTaxonomyStore::new();
        let body = r#"[
            {"skill_name": "A", "parent_skill": "B"},
            {"skill_name": "B", "parent_skill": "A"}
        ]"#;
        let summary = ImportPipeline::new(&store)
            .run(&parse_feed(body).unwrap())
            .unwrap();
        assert_eq!(summary.parents_set, 1);
        assert_eq!(summary.parents_refused, 1);
    }

    #[test]
    fn self_parent_is_refused() {
        let store = InMemoryTaxonomyStore::new();
        let body = r#"{"skill_name": "Loop", "parent_skill": "loop"}"#;
        let summary = ImportPipeline::new(&store)
            .run(&parse_feed(body).unwrap())
            .unwrap();
        assert_eq!(summary.parents_refused, 1);
        assert_eq!(summary.parents_set, 0);
    }

    #[test]
    fn reverse_bidirectional_edge_counts_as_existing() {
        let store = InMemoryTaxonomyStore::new();
        let body = r#"[
            {"skill_name": "Docker", "related_skills": ["Kubernetes"]},
            {"skill_name": "Kubernetes", "related_skills": ["Docker"]}
        ]"#;
        let summary = ImportPipeline::new(&store)
            .run(&parse_feed(body).unwrap())
            .unwrap();
        assert_eq!(summary.relations_created, 1);
        assert_eq!(summary.relations_existing, 1);
    }

    #[test]
    fn reference_to_merged_node_follows_pointer() {
        let store = InMemoryTaxonomyStore::new();
        import(&store);
        let js = id_of(&store, "javascript");
        let react = id_of(&store, "react");
        store
            .transaction(|tx| {
                let mut n = tx.require_node(js)?;
                n.deprecate_into(react, taxon_types::now());
                tx.update_node(n)
            })
            .unwrap();
        let nodes = store.read(|r| r.nodes()).unwrap();
        let resolver = Resolver::new(&nodes);
        assert_eq!(resolver.resolve("JavaScript"), Some(react));
        assert_eq!(resolver.resolve("unknown"), None);
    }

    #[test]
    fn row_for_merged_node_attaches_to_survivor() {
        let store = InMemoryTaxonomyStore::new();
        let body = r#"[
            {"skill_name": "Programming"},
            {"skill_name": "JavaScript", "parent_skill": "Programming", "related_skills": ["TypeScript"]},
            {"skill_name": "JS Legacy", "normalized_name": "javascript_legacy", "parent_skill": "TypeScript",
             "synonyms": ["ECMAScript"], "related_skills": ["TypeScript"]},
            {"skill_name": "TypeScript"}
        ]"#;
        let feed = parse_feed(body).unwrap();
        ImportPipeline::new(&store).run(&feed).unwrap();
        let programming = id_of(&store, "programming");
        let js = id_of(&store, "javascript");
        let legacy = id_of(&store, "javascript_legacy");
        store
            .transaction(|tx| {
                let mut n = tx.require_node(legacy)?;
                n.deprecate_into(js, taxon_types::now());
                tx.update_node(n)
            })
            .unwrap();
        let legacy_before = store.read(|r| r.require_node(legacy)).unwrap();
        let legacy_synonyms = store.read(|r| r.synonyms_of(legacy)).unwrap();
        let legacy_relations = store
            .read(|r| r.relations_at(legacy, Endpoint::Source))
            .unwrap();

        let again = ImportPipeline::new(&store).run(&feed).unwrap();
        assert_eq!(again.nodes_merged, 1);
        assert_eq!(again.nodes_updated, 3);
        assert_eq!(again.node_failures, 0);

        // The merged node gains nothing.
        assert_eq!(store.read(|r| r.require_node(legacy)).unwrap(), legacy_before);
        assert_eq!(store.read(|r| r.synonyms_of(legacy)).unwrap(), legacy_synonyms);
        assert_eq!(
            store.read(|r| r.relations_at(legacy, Endpoint::Source)).unwrap(),
            legacy_relations
        );

        // The survivor takes the row's synonym, already has the relation and
        // keeps its own parent.
        assert_eq!(again.synonyms_created, 1);
        assert!(store.read(|r| r.find_synonym(js, "ecmascript")).unwrap().is_some());
        assert_eq!(again.relations_created, 0);
        assert_eq!(again.relations_existing, 2);
        assert_eq!(again.parents_unchanged, 1);
        assert_eq!(again.parents_set, 0);
        let js_node = store.read(|r| r.require_node(js)).unwrap();
        assert_eq!(js_node.parent_id, Some(programming));
    }
}
