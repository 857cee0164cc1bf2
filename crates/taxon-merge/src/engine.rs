//! The merge pass.
//!
//! For each duplicate, in one transaction:
//!
//! 1. synonyms move to the canonical node unless it already owns the key
//! 2. cross-references are bulk repointed
//! 3. relations move endpoint by endpoint unless the canonical node
//!    already has the same edge, or the edge would become a self-loop
//! 4. children are re-parented to the canonical node
//! 5. the duplicate is deprecated into the canonical node
//! 6. a merge record is appended to the log
//!
//! A failure at any step discards the whole duplicate's work.

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use taxon_hierarchy::would_create_cycle;
use taxon_normalize::CollisionGroup;
use taxon_store::{StoreError, TaxonomyReader, TaxonomyStore, TaxonomyWriter};
use taxon_types::{now, Endpoint, EndpointMigration, MergeRecord, SkillId, SkillNode};

use crate::canonical::select_canonical;
use crate::error::{MergeError, MergeResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub groups_seen: usize,
    pub duplicates_merged: usize,
    pub already_merged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub synonyms_moved: usize,
    pub synonyms_dropped: usize,
    pub relations_moved: usize,
    pub relations_dropped: usize,
    pub cross_refs_repointed: usize,
    pub children_moved: usize,
}

/// Synonym and relation rows handled while merging one duplicate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MigrationCounts {
    synonyms_moved: usize,
    synonyms_dropped: usize,
    relations_moved: usize,
    relations_dropped: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DuplicateOutcome {
    Merged(MergeRecord, MigrationCounts),
    /// Already deprecated into this canonical node. Nothing was written.
    AlreadyMerged,
    /// Deprecated into some other node. Nothing was written.
    MergedElsewhere(SkillId),
}

#[derive(Clone, Debug, Default)]
pub struct MergeOutcome {
    pub summary: MergeSummary,
    /// Records appended by this run, in order.
    pub records: Vec<MergeRecord>,
}

pub struct MergeEngine<'a, S: TaxonomyStore> {
    store: &'a S,
    batch_id: Uuid,
}

impl<'a, S: TaxonomyStore> MergeEngine<'a, S> {
    /// A fresh engine with a new time-ordered batch id.
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            batch_id: Uuid::now_v7(),
        }
    }

    pub fn with_batch_id(mut self, batch_id: Uuid) -> Self {
        self.batch_id = batch_id;
        self
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Merge every group. Per-duplicate failures are logged and counted.
    pub fn run(&self, groups: &[CollisionGroup]) -> MergeResult<MergeOutcome> {
        let mut outcome = MergeOutcome::default();
        for group in groups {
            self.merge_group(group, &mut outcome)?;
        }
        let s = &outcome.summary;
        info!(
            batch = %self.batch_id,
            groups = s.groups_seen,
            merged = s.duplicates_merged,
            already = s.already_merged,
            failed = s.failed,
            "merge pass complete"
        );
        Ok(outcome)
    }

    fn merge_group(&self, group: &CollisionGroup, outcome: &mut MergeOutcome) -> MergeResult<()> {
        outcome.summary.groups_seen += 1;
        let members = self.store.read(|r| {
            let mut found = Vec::with_capacity(group.members.len());
            for &id in &group.members {
                match r.node(id)? {
                    Some(node) => found.push(node),
                    None => warn!(node = %id, key = %group.key, "group member not found, skipping"),
                }
            }
            Ok::<_, StoreError>(found)
        })?;
        outcome.summary.skipped += group.members.len() - members.len();

        let Some(canonical) = select_canonical(&members).map(|n| n.id) else {
            debug!(key = %group.key, "no active member, nothing to merge");
            return Ok(());
        };

        for duplicate in members.iter().filter(|n| n.id != canonical) {
            if !duplicate.is_active() {
                self.note_inactive(duplicate, canonical, &mut outcome.summary);
                continue;
            }
            match self.merge_duplicate(canonical, duplicate.id, &group.key) {
                Ok(DuplicateOutcome::Merged(record, counts)) => {
                    let s = &mut outcome.summary;
                    s.duplicates_merged += 1;
                    s.synonyms_moved += counts.synonyms_moved;
                    s.synonyms_dropped += counts.synonyms_dropped;
                    s.relations_moved += counts.relations_moved;
                    s.relations_dropped += counts.relations_dropped;
                    s.children_moved += record
                        .moved_children
                        .iter()
                        .filter(|id| **id != canonical)
                        .count();
                    s.cross_refs_repointed += record.repointed_refs.len();
                    outcome.records.push(record);
                }
                Ok(DuplicateOutcome::AlreadyMerged) => outcome.summary.already_merged += 1,
                Ok(DuplicateOutcome::MergedElsewhere(_)) => outcome.summary.skipped += 1,
                Err(err) => {
                    outcome.summary.failed += 1;
                    error!(
                        canonical = %canonical,
                        duplicate = %duplicate.id,
                        error = %err,
                        "merge failed, duplicate left untouched"
                    );
                }
            }
        }
        Ok(())
    }

    fn note_inactive(&self, node: &SkillNode, canonical: SkillId, summary: &mut MergeSummary) {
        if node.merged_into_id == Some(canonical) {
            debug!(duplicate = %node.id, canonical = %canonical, "already merged");
            summary.already_merged += 1;
        } else {
            warn!(
                duplicate = %node.id,
                merged_into = ?node.merged_into_id,
                canonical = %canonical,
                "member already merged into another node, skipping"
            );
            summary.skipped += 1;
        }
    }

    /// Merge one duplicate into `canonical` as a single transaction.
    pub fn merge_duplicate(
        &self,
        canonical: SkillId,
        duplicate: SkillId,
        collision_key: &str,
    ) -> MergeResult<DuplicateOutcome> {
        let outcome = self.store.transaction(|tx| {
            let dup = tx.require_node(duplicate)?;
            if !dup.is_active() {
                return Ok(match dup.merged_into_id {
                    Some(into) if into == canonical => DuplicateOutcome::AlreadyMerged,
                    Some(into) => DuplicateOutcome::MergedElsewhere(into),
                    None => DuplicateOutcome::AlreadyMerged,
                });
            }
            let canon = tx.require_node(canonical)?;
            if !canon.is_active() {
                return Err(MergeError::CanonicalInactive(canonical));
            }

            let mut migrated = MigrationCounts::default();
            migrate_synonyms(tx, duplicate, canonical, &mut migrated)?;
            let repointed_refs = tx.repoint_cross_references(duplicate, canonical)?;
            migrate_relations(tx, duplicate, canonical, &mut migrated)?;
            let moved_children = move_children(tx, &dup, &canon)?;

            let at = now();
            let mut dup = tx.require_node(duplicate)?;
            dup.deprecate_into(canonical, at);
            tx.update_node(dup)?;

            let mut record = MergeRecord::new(self.batch_id, canonical, duplicate, collision_key, at);
            record.moved_children = moved_children;
            record.repointed_refs = repointed_refs;
            tx.append_merge_record(record.clone())?;
            Ok(DuplicateOutcome::Merged(record, migrated))
        })?;

        if let DuplicateOutcome::Merged(record, migrated) = &outcome {
            debug!(
                canonical = %canonical,
                duplicate = %duplicate,
                synonyms = migrated.synonyms_moved,
                relations = migrated.relations_moved,
                children = record.moved_children.len(),
                refs = record.repointed_refs.len(),
                "duplicate merged"
            );
        }
        Ok(outcome)
    }
}

fn migrate_synonyms(
    tx: &mut dyn TaxonomyWriter,
    duplicate: SkillId,
    canonical: SkillId,
    migrated: &mut MigrationCounts,
) -> MergeResult<()> {
    for syn in tx.synonyms_of(duplicate)? {
        if tx.find_synonym(canonical, &syn.canonical_key)?.is_some() {
            tx.delete_synonym(syn.id)?;
            migrated.synonyms_dropped += 1;
            continue;
        }
        let id = syn.id;
        let mut moved = syn;
        moved.owner_id = canonical;
        moved.merge_trail.push(duplicate);
        match tx.update_synonym(moved) {
            Ok(()) => migrated.synonyms_moved += 1,
            Err(err) if err.is_unique_violation() => {
                tx.delete_synonym(id)?;
                migrated.synonyms_dropped += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn migrate_relations(
    tx: &mut dyn TaxonomyWriter,
    duplicate: SkillId,
    canonical: SkillId,
    migrated: &mut MigrationCounts,
) -> MergeResult<()> {
    for end in [Endpoint::Source, Endpoint::Target] {
        for rel in tx.relations_at(duplicate, end)? {
            let other = rel.endpoint(end.opposite());
            let (source, target) = match end {
                Endpoint::Source => (canonical, other),
                Endpoint::Target => (other, canonical),
            };
            let redundant = other == canonical
                || tx
                    .find_relation(source, target, &rel.relation_type)?
                    .is_some();
            if redundant {
                tx.delete_relation(rel.id)?;
                migrated.relations_dropped += 1;
                continue;
            }
            let id = rel.id;
            let mut moved = rel;
            moved.set_endpoint(end, canonical);
            moved.merge_trail.push(EndpointMigration {
                duplicate,
                endpoint: end,
            });
            match tx.update_relation(moved) {
                Ok(()) => migrated.relations_moved += 1,
                Err(err) if err.is_unique_violation() => {
                    tx.delete_relation(id)?;
                    migrated.relations_dropped += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
    Ok(())
}

/// Re-parent the duplicate's children to the canonical node. Returns the
/// moved ids; the canonical node itself is included when it was a child
/// of the duplicate and inherited the duplicate's parent instead.
fn move_children(
    tx: &mut dyn TaxonomyWriter,
    dup: &SkillNode,
    canon: &SkillNode,
) -> MergeResult<Vec<SkillId>> {
    let mut links = tx.parent_links()?;
    let mut moved = Vec::new();

    if canon.parent_id == Some(dup.id) {
        let mut node = canon.clone();
        node.parent_id = dup.parent_id;
        links.insert(node.id, node.parent_id);
        tx.update_node(node)?;
        moved.push(canon.id);
    }

    for child in tx.children(dup.id)? {
        if would_create_cycle(&links, child, canon.id) {
            return Err(MergeError::WouldCreateCycle {
                child,
                parent: canon.id,
            });
        }
        let mut node = tx.require_node(child)?;
        node.parent_id = Some(canon.id);
        tx.update_node(node)?;
        links.insert(child, Some(canon.id));
        moved.push(child);
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxon_store::{InMemoryTaxonomyStore, Upserted};
    use taxon_types::{NewRelation, NewSkillNode, NewSynonym, RelationType};

    struct Fixture {
        store: InMemoryTaxonomyStore,
        keep: SkillId,
        dup: SkillId,
        other: SkillId,
    }

    /// `keep` (demand 0.9) and `dup` (demand 0.1) collide on "react";
    /// `other` is an unrelated node.
    fn fixture() -> Fixture {
        let store = InMemoryTaxonomyStore::new();
        let (keep, dup, other) = store
            .transaction(|tx| {
                let keep = tx
                    .upsert_node(NewSkillNode::new("React", "react").with_demand(0.9))?
                    .id();
                let dup = tx
                    .upsert_node(NewSkillNode::new("react", "react_dup").with_demand(0.1))?
                    .id();
                let other = tx.upsert_node(NewSkillNode::new("Redux", "redux"))?.id();
                Ok::<_, StoreError>((keep, dup, other))
            })
            .unwrap();
        Fixture {
            store,
            keep,
            dup,
            other,
        }
    }

    fn group(f: &Fixture) -> CollisionGroup {
        CollisionGroup::new("react", vec![f.keep, f.dup])
    }

    fn node(store: &InMemoryTaxonomyStore, id: SkillId) -> SkillNode {
        store.read(|r| r.require_node(id)).unwrap()
    }

    // -----------------------------------------------------------------------
    // Postconditions
    // -----------------------------------------------------------------------

    #[test]
    fn merge_moves_everything_and_deprecates() {
        let f = fixture();
        let child = f
            .store
            .transaction(|tx| {
                tx.insert_synonym(NewSynonym::new(f.dup, "ReactJS", "reactjs"))?;
                tx.insert_relation(NewRelation::new(f.dup, f.other, RelationType::CommonlyWith))?;
                tx.insert_relation(NewRelation::new(f.other, f.dup, RelationType::Prerequisite))?;
                let child = tx.upsert_node(NewSkillNode::new("Hooks", "hooks"))?.id();
                let mut c = tx.require_node(child)?;
                c.parent_id = Some(f.dup);
                tx.update_node(c)?;
                Ok::<_, StoreError>(child)
            })
            .unwrap();
        let xref = f.store.insert_cross_reference("PROFILE_SKILL", f.dup).unwrap();

        let outcome = MergeEngine::new(&f.store).run(&[group(&f)]).unwrap();
        assert_eq!(outcome.summary.duplicates_merged, 1);
        assert_eq!(outcome.summary.children_moved, 1);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].repointed_refs, vec![xref]);

        let dup = node(&f.store, f.dup);
        assert_eq!(dup.status, taxon_types::SkillStatus::Deprecated);
        assert_eq!(dup.merged_into_id, Some(f.keep));
        assert_eq!(node(&f.store, child).parent_id, Some(f.keep));

        let relations = f.store.read(|r| r.relations()).unwrap();
        assert!(relations.iter().all(|r| !r.touches(f.dup)));
        assert_eq!(relations.len(), 2);

        let synonyms = f.store.read(|r| r.synonyms_of(f.keep)).unwrap();
        assert_eq!(synonyms.len(), 1);
        assert_eq!(synonyms[0].merge_trail, vec![f.dup]);

        let refs = f.store.read(|r| r.cross_references_to(f.keep)).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(f.store.read(|r| r.merge_records()).unwrap().len(), 1);
    }

    #[test]
    fn redundant_rows_are_dropped() {
        let f = fixture();
        f.store
            .transaction(|tx| {
                tx.insert_synonym(NewSynonym::new(f.keep, "ReactJS", "reactjs"))?;
                tx.insert_synonym(NewSynonym::new(f.dup, "React.js", "reactjs"))?;
                tx.insert_relation(NewRelation::new(f.keep, f.other, RelationType::CommonlyWith))?;
                tx.insert_relation(NewRelation::new(f.dup, f.other, RelationType::CommonlyWith))?;
                Ok::<_, StoreError>(())
            })
            .unwrap();

        let summary = MergeEngine::new(&f.store).run(&[group(&f)]).unwrap().summary;
        assert_eq!(summary.synonyms_dropped, 1);
        assert_eq!(summary.relations_dropped, 1);
        assert_eq!(f.store.read(|r| r.synonyms()).unwrap().len(), 1);
        assert_eq!(f.store.read(|r| r.relations()).unwrap().len(), 1);
    }

    #[test]
    fn relation_to_canonical_is_dropped_not_self_looped() {
        let f = fixture();
        f.store
            .transaction(|tx| {
                tx.insert_relation(NewRelation::new(f.dup, f.keep, RelationType::Alternative))
            })
            .unwrap();
        let summary = MergeEngine::new(&f.store).run(&[group(&f)]).unwrap().summary;
        assert_eq!(summary.relations_dropped, 1);
        assert_eq!(summary.failed, 0);
        assert!(f.store.read(|r| r.relations()).unwrap().is_empty());
    }

    #[test]
    fn canonical_child_of_duplicate_inherits_its_parent() {
        let f = fixture();
        f.store
            .transaction(|tx| {
                let mut dup = tx.require_node(f.dup)?;
                dup.parent_id = Some(f.other);
                tx.update_node(dup)?;
                let mut keep = tx.require_node(f.keep)?;
                keep.parent_id = Some(f.dup);
                tx.update_node(keep)
            })
            .unwrap();
        let outcome = MergeEngine::new(&f.store).run(&[group(&f)]).unwrap();
        assert_eq!(outcome.summary.duplicates_merged, 1);
        assert_eq!(node(&f.store, f.keep).parent_id, Some(f.other));
        assert_eq!(outcome.records[0].moved_children, vec![f.keep]);
    }

    #[test]
    fn cycle_on_reparent_fails_only_that_duplicate() {
        // dup <- c <- keep: moving c under keep would close keep -> c -> keep.
        let f = fixture();
        let c = f
            .store
            .transaction(|tx| {
                let c = tx.upsert_node(NewSkillNode::new("C", "c"))?.id();
                let mut cn = tx.require_node(c)?;
                cn.parent_id = Some(f.dup);
                tx.update_node(cn)?;
                let mut keep = tx.require_node(f.keep)?;
                keep.parent_id = Some(c);
                tx.update_node(keep)?;
                tx.insert_synonym(NewSynonym::new(f.dup, "ReactJS", "reactjs"))?;
                Ok::<_, StoreError>(c)
            })
            .unwrap();

        let err = MergeEngine::new(&f.store)
            .merge_duplicate(f.keep, f.dup, "react")
            .unwrap_err();
        assert!(matches!(err, MergeError::WouldCreateCycle { child, .. } if child == c));

        // Nothing from the failed transaction is visible.
        assert!(node(&f.store, f.dup).is_active());
        assert_eq!(f.store.read(|r| r.synonyms_of(f.dup)).unwrap().len(), 1);
        assert!(f.store.read(|r| r.merge_records()).unwrap().is_empty());

        let summary = MergeEngine::new(&f.store).run(&[group(&f)]).unwrap().summary;
        assert_eq!(summary.failed, 1);
    }

    // -----------------------------------------------------------------------
    // Idempotence and skips
    // -----------------------------------------------------------------------

    #[test]
    fn rerun_is_a_no_op() {
        let f = fixture();
        let engine = MergeEngine::new(&f.store);
        engine.run(&[group(&f)]).unwrap();
        let before = f.store.stats().unwrap();

        let again = engine.run(&[group(&f)]).unwrap();
        assert_eq!(again.summary.duplicates_merged, 0);
        assert_eq!(again.summary.already_merged, 1);
        assert!(again.records.is_empty());
        assert_eq!(f.store.stats().unwrap(), before);

        let direct = engine.merge_duplicate(f.keep, f.dup, "react").unwrap();
        assert_eq!(direct, DuplicateOutcome::AlreadyMerged);
    }

    #[test]
    fn missing_members_and_foreign_merges_are_skipped() {
        let f = fixture();
        MergeEngine::new(&f.store)
            .merge_duplicate(f.other, f.dup, "x")
            .unwrap();
        let g = CollisionGroup::new("react", vec![f.keep, f.dup, SkillId(999)]);
        let summary = MergeEngine::new(&f.store).run(&[g]).unwrap().summary;
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.duplicates_merged, 0);
        assert_eq!(node(&f.store, f.dup).merged_into_id, Some(f.other));
    }

    #[test]
    fn records_share_the_batch_id() {
        let f = fixture();
        let third = f
            .store
            .transaction(|tx| tx.upsert_node(NewSkillNode::new("REACT", "react_3")).map(Upserted::id))
            .unwrap();
        let batch = Uuid::now_v7();
        let g = CollisionGroup::new("react", vec![f.keep, f.dup, third]);
        let outcome = MergeEngine::new(&f.store)
            .with_batch_id(batch)
            .run(&[g])
            .unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert!(outcome.records.iter().all(|r| r.batch_id == batch && r.canonical_id == f.keep));
    }
}
