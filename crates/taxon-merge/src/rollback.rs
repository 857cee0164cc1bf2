//! Merge rollback.
//!
//! Reverses merge records newest first, one transaction per record. Rows
//! are attributed exactly: a synonym or relation goes back only if the top
//! of its `merge_trail` names the record's duplicate, and only the children
//! and cross-references listed on the record move back. An edge whose trail
//! names the duplicate below a later merge's entry stays where it is and is
//! counted as a conflict. Rows the merge dropped as redundant are not
//! recreated.

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use taxon_hierarchy::would_create_cycle;
use taxon_store::{TaxonomyReader, TaxonomyStore, TaxonomyWriter};
use taxon_types::{now, EndpointMigration, MergeRecord, SkillId};

use crate::error::MergeResult;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RollbackSummary {
    pub records_seen: usize,
    pub rolled_back: usize,
    pub already_active: usize,
    pub skipped: usize,
    pub failed: usize,
    pub synonyms_restored: usize,
    pub relations_restored: usize,
    pub cross_refs_restored: usize,
    pub children_restored: usize,
    /// Rows left on the canonical node because moving them back would
    /// violate a constraint.
    pub conflicts: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Restored {
    synonyms: usize,
    relations: usize,
    cross_refs: usize,
    children: usize,
    conflicts: usize,
}

enum RecordOutcome {
    RolledBack(Restored),
    AlreadyActive,
    /// The duplicate now points somewhere other than the record's canonical node.
    Diverged(Option<SkillId>),
}

pub struct RollbackEngine<'a, S: TaxonomyStore> {
    store: &'a S,
    batch: Option<Uuid>,
}

impl<'a, S: TaxonomyStore> RollbackEngine<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store, batch: None }
    }

    /// Only roll back records from `batch_id`.
    pub fn for_batch(mut self, batch_id: Uuid) -> Self {
        self.batch = Some(batch_id);
        self
    }

    /// Roll back the store's own merge log.
    pub fn run_from_log(&self) -> MergeResult<RollbackSummary> {
        let log = self.store.read(|r| r.merge_records())?;
        self.run(&log)
    }

    /// Roll back `records` (given oldest first), newest first.
    pub fn run(&self, records: &[MergeRecord]) -> MergeResult<RollbackSummary> {
        let mut summary = RollbackSummary::default();
        let selected = records
            .iter()
            .rev()
            .filter(|r| self.batch.map_or(true, |b| b == r.batch_id));

        for record in selected {
            summary.records_seen += 1;
            match self.rollback_record(record) {
                Ok(RecordOutcome::RolledBack(restored)) => {
                    summary.rolled_back += 1;
                    summary.synonyms_restored += restored.synonyms;
                    summary.relations_restored += restored.relations;
                    summary.cross_refs_restored += restored.cross_refs;
                    summary.children_restored += restored.children;
                    summary.conflicts += restored.conflicts;
                }
                Ok(RecordOutcome::AlreadyActive) => summary.already_active += 1,
                Ok(RecordOutcome::Diverged(into)) => {
                    summary.skipped += 1;
                    warn!(
                        duplicate = %record.duplicate_id,
                        canonical = %record.canonical_id,
                        merged_into = ?into,
                        "duplicate was merged elsewhere since, skipping"
                    );
                }
                Err(err) => {
                    summary.failed += 1;
                    error!(
                        duplicate = %record.duplicate_id,
                        canonical = %record.canonical_id,
                        error = %err,
                        "rollback failed"
                    );
                }
            }
        }

        info!(
            batch = ?self.batch,
            seen = summary.records_seen,
            rolled_back = summary.rolled_back,
            conflicts = summary.conflicts,
            failed = summary.failed,
            "rollback complete"
        );
        Ok(summary)
    }

    fn rollback_record(&self, record: &MergeRecord) -> MergeResult<RecordOutcome> {
        let duplicate = record.duplicate_id;
        let canonical = record.canonical_id;

        self.store.transaction(|tx| {
            let mut dup = tx.require_node(duplicate)?;
            if dup.is_active() {
                return Ok(RecordOutcome::AlreadyActive);
            }
            if dup.merged_into_id != Some(canonical) {
                return Ok(RecordOutcome::Diverged(dup.merged_into_id));
            }
            dup.reactivate(now());
            let dup_parent = dup.parent_id;
            tx.update_node(dup)?;

            let mut restored = Restored::default();
            restore_synonyms(tx, record, &mut restored)?;
            restore_relations(tx, record, &mut restored)?;
            restored.cross_refs =
                tx.repoint_cross_references_by_id(&record.repointed_refs, canonical, duplicate)?;
            restore_children(tx, record, dup_parent, &mut restored)?;

            debug!(
                duplicate = %duplicate,
                canonical = %canonical,
                synonyms = restored.synonyms,
                relations = restored.relations,
                children = restored.children,
                "merge record rolled back"
            );
            Ok(RecordOutcome::RolledBack(restored))
        })
    }
}

fn restore_synonyms(
    tx: &mut dyn TaxonomyWriter,
    record: &MergeRecord,
    restored: &mut Restored,
) -> MergeResult<()> {
    for syn in tx.synonyms()? {
        if !syn.merge_trail.contains(&record.duplicate_id) {
            continue;
        }
        if syn.migrated_from() != Some(record.duplicate_id) || syn.owner_id != record.canonical_id {
            debug!(synonym = %syn.id, "synonym moved again by a later merge, leaving it");
            restored.conflicts += 1;
            continue;
        }
        let mut back = syn;
        back.owner_id = record.duplicate_id;
        back.merge_trail.pop();
        match tx.update_synonym(back) {
            Ok(()) => restored.synonyms += 1,
            Err(err) if err.is_unique_violation() => restored.conflicts += 1,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn restore_relations(
    tx: &mut dyn TaxonomyWriter,
    record: &MergeRecord,
    restored: &mut Restored,
) -> MergeResult<()> {
    for rel in tx.relations()? {
        if !rel.merge_trail.iter().any(|m| m.duplicate == record.duplicate_id) {
            continue;
        }
        let Some(EndpointMigration {
            duplicate,
            endpoint,
        }) = rel.last_migration()
        else {
            continue;
        };
        if duplicate != record.duplicate_id || rel.endpoint(endpoint) != record.canonical_id {
            debug!(relation = %rel.id, "relation moved again by a later merge, leaving it");
            restored.conflicts += 1;
            continue;
        }
        let mut back = rel;
        back.set_endpoint(endpoint, record.duplicate_id);
        back.merge_trail.pop();
        match tx.update_relation(back) {
            Ok(()) => restored.relations += 1,
            Err(err) if err.is_unique_violation() => restored.conflicts += 1,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn restore_children(
    tx: &mut dyn TaxonomyWriter,
    record: &MergeRecord,
    dup_parent: Option<SkillId>,
    restored: &mut Restored,
) -> MergeResult<()> {
    let mut links = tx.parent_links()?;
    for &child in &record.moved_children {
        let Some(mut node) = tx.node(child)? else {
            continue;
        };
        // The canonical node inherited the duplicate's parent; anything else
        // was moved under the canonical node.
        let expected = if child == record.canonical_id {
            dup_parent
        } else {
            Some(record.canonical_id)
        };
        if node.parent_id != expected {
            debug!(node = %child, "child moved since the merge, leaving it");
            continue;
        }
        if would_create_cycle(&links, child, record.duplicate_id) {
            warn!(node = %child, parent = %record.duplicate_id, "restoring parent would close a cycle");
            restored.conflicts += 1;
            continue;
        }
        node.parent_id = Some(record.duplicate_id);
        tx.update_node(node)?;
        links.insert(child, Some(record.duplicate_id));
        restored.children += 1;
    }
    Ok(())
}
