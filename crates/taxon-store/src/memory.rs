use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

use taxon_types::error::check_unit_interval;
use taxon_types::{
    now, CrossRefId, CrossReference, Endpoint, MergeRecord, NewRelation, NewSkillNode, NewSynonym,
    RelationEdge, RelationId, RelationType, SkillId, SkillNode, SynonymEdge, SynonymId,
};

use crate::error::{StoreError, StoreResult, UniqueConstraint};
use crate::traits::{TaxonomyReader, TaxonomyStore, TaxonomyWriter, Upserted};

/// Full taxonomy state held by [`InMemoryTaxonomyStore`].
///
/// Secondary indexes back the uniqueness constraints and are rebuilt from
/// the primary maps whenever state is loaded from a snapshot.
#[derive(Clone, Debug, Default)]
pub struct TaxonomyState {
    nodes: BTreeMap<SkillId, SkillNode>,
    synonyms: BTreeMap<SynonymId, SynonymEdge>,
    relations: BTreeMap<RelationId, RelationEdge>,
    cross_refs: BTreeMap<CrossRefId, CrossReference>,
    merge_log: Vec<MergeRecord>,
    next_id: IdCounters,
    node_keys: HashMap<String, SkillId>,
    synonym_keys: HashMap<(SkillId, String), SynonymId>,
    relation_keys: HashMap<(SkillId, SkillId, RelationType), RelationId>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
struct IdCounters {
    node: u64,
    synonym: u64,
    relation: u64,
    cross_ref: u64,
}

/// On-disk snapshot layout. Flat lists keep the JSON readable.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    next_id: IdCounters,
    #[serde(default)]
    nodes: Vec<SkillNode>,
    #[serde(default)]
    synonyms: Vec<SynonymEdge>,
    #[serde(default)]
    relations: Vec<RelationEdge>,
    #[serde(default)]
    cross_refs: Vec<CrossReference>,
    #[serde(default)]
    merge_log: Vec<MergeRecord>,
}

/// Row counts for status reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub nodes: usize,
    pub active_nodes: usize,
    pub synonyms: usize,
    pub relations: usize,
    pub cross_refs: usize,
    pub merge_records: usize,
}

impl TaxonomyState {
    /// Rebuild state and indexes from a snapshot. A snapshot that breaks a
    /// uniqueness constraint or names a missing node is rejected.
    fn from_snapshot(snapshot: Snapshot) -> StoreResult<Self> {
        let mut state = TaxonomyState {
            next_id: snapshot.next_id,
            merge_log: snapshot.merge_log,
            ..Default::default()
        };
        for node in snapshot.nodes {
            if state.nodes.contains_key(&node.id) {
                return Err(StoreError::Serialization(format!(
                    "snapshot lists node {} twice",
                    node.id
                )));
            }
            state.check_node_key(&node.canonical_key, Some(node.id))?;
            state.next_id.node = state.next_id.node.max(node.id.get());
            state.node_keys.insert(node.canonical_key.clone(), node.id);
            state.nodes.insert(node.id, node);
        }
        for syn in snapshot.synonyms {
            if state.synonyms.contains_key(&syn.id) {
                return Err(StoreError::Serialization(format!(
                    "snapshot lists synonym {} twice",
                    syn.id
                )));
            }
            state.require_existing_node(syn.owner_id)?;
            state.check_synonym_key(syn.owner_id, &syn.canonical_key, Some(syn.id))?;
            state.next_id.synonym = state.next_id.synonym.max(syn.id.get());
            state
                .synonym_keys
                .insert((syn.owner_id, syn.canonical_key.clone()), syn.id);
            state.synonyms.insert(syn.id, syn);
        }
        for rel in snapshot.relations {
            if state.relations.contains_key(&rel.id) {
                return Err(StoreError::Serialization(format!(
                    "snapshot lists relation {} twice",
                    rel.id
                )));
            }
            state.require_existing_node(rel.source_id)?;
            state.require_existing_node(rel.target_id)?;
            state.check_relation(rel.source_id, rel.target_id, &rel.relation_type, Some(rel.id))?;
            state.next_id.relation = state.next_id.relation.max(rel.id.get());
            state.relation_keys.insert(
                (rel.source_id, rel.target_id, rel.relation_type.clone()),
                rel.id,
            );
            state.relations.insert(rel.id, rel);
        }
        for xref in snapshot.cross_refs {
            state.next_id.cross_ref = state.next_id.cross_ref.max(xref.id.get());
            state.cross_refs.insert(xref.id, xref);
        }
        Ok(state)
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            next_id: self.next_id,
            nodes: self.nodes.values().cloned().collect(),
            synonyms: self.synonyms.values().cloned().collect(),
            relations: self.relations.values().cloned().collect(),
            cross_refs: self.cross_refs.values().cloned().collect(),
            merge_log: self.merge_log.clone(),
        }
    }

    fn check_node_key(&self, key: &str, owner: Option<SkillId>) -> StoreResult<()> {
        match self.node_keys.get(key) {
            Some(existing) if Some(*existing) != owner => Err(StoreError::UniqueViolation {
                constraint: UniqueConstraint::NodeKey,
                detail: format!("key {key:?} already used by node {existing}"),
            }),
            _ => Ok(()),
        }
    }

    fn check_synonym_key(
        &self,
        owner: SkillId,
        key: &str,
        this: Option<SynonymId>,
    ) -> StoreResult<()> {
        match self.synonym_keys.get(&(owner, key.to_string())) {
            Some(existing) if Some(*existing) != this => Err(StoreError::UniqueViolation {
                constraint: UniqueConstraint::SynonymOwnerKey,
                detail: format!("node {owner} already owns synonym {key:?} ({existing})"),
            }),
            _ => Ok(()),
        }
    }

    fn check_relation(
        &self,
        source: SkillId,
        target: SkillId,
        relation_type: &RelationType,
        this: Option<RelationId>,
    ) -> StoreResult<()> {
        if source == target {
            return Err(StoreError::SelfLoop(source));
        }
        match self
            .relation_keys
            .get(&(source, target, relation_type.clone()))
        {
            Some(existing) if Some(*existing) != this => Err(StoreError::UniqueViolation {
                constraint: UniqueConstraint::RelationTriple,
                detail: format!("{source} -[{relation_type}]-> {target} already exists ({existing})"),
            }),
            _ => Ok(()),
        }
    }

    fn require_existing_node(&self, id: SkillId) -> StoreResult<()> {
        if self.nodes.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::NodeNotFound(id))
        }
    }

    /// Seed an externally owned cross-reference row.
    pub fn insert_cross_reference(
        &mut self,
        kind: impl Into<String>,
        skill_id: SkillId,
    ) -> StoreResult<CrossRefId> {
        self.require_existing_node(skill_id)?;
        self.next_id.cross_ref += 1;
        let id = CrossRefId(self.next_id.cross_ref);
        self.cross_refs.insert(
            id,
            CrossReference {
                id,
                kind: kind.into(),
                skill_id,
            },
        );
        Ok(id)
    }

    fn restore_node(&mut self, id: SkillId, prior: Option<SkillNode>) {
        if let Some(current) = self.nodes.remove(&id) {
            if self.node_keys.get(&current.canonical_key) == Some(&id) {
                self.node_keys.remove(&current.canonical_key);
            }
        }
        if let Some(node) = prior {
            self.node_keys.insert(node.canonical_key.clone(), id);
            self.nodes.insert(id, node);
        }
    }

    fn restore_synonym(&mut self, id: SynonymId, prior: Option<SynonymEdge>) {
        if let Some(current) = self.synonyms.remove(&id) {
            let key = (current.owner_id, current.canonical_key);
            if self.synonym_keys.get(&key) == Some(&id) {
                self.synonym_keys.remove(&key);
            }
        }
        if let Some(syn) = prior {
            self.synonym_keys
                .insert((syn.owner_id, syn.canonical_key.clone()), id);
            self.synonyms.insert(id, syn);
        }
    }

    fn restore_relation(&mut self, id: RelationId, prior: Option<RelationEdge>) {
        if let Some(current) = self.relations.remove(&id) {
            let key = (current.source_id, current.target_id, current.relation_type);
            if self.relation_keys.get(&key) == Some(&id) {
                self.relation_keys.remove(&key);
            }
        }
        if let Some(rel) = prior {
            self.relation_keys
                .insert((rel.source_id, rel.target_id, rel.relation_type.clone()), id);
            self.relations.insert(id, rel);
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            nodes: self.nodes.len(),
            active_nodes: self.nodes.values().filter(|n| n.is_active()).count(),
            synonyms: self.synonyms.len(),
            relations: self.relations.len(),
            cross_refs: self.cross_refs.len(),
            merge_records: self.merge_log.len(),
        }
    }
}

impl TaxonomyReader for TaxonomyState {
    fn node(&self, id: SkillId) -> StoreResult<Option<SkillNode>> {
        Ok(self.nodes.get(&id).cloned())
    }

    fn nodes(&self) -> StoreResult<Vec<SkillNode>> {
        Ok(self.nodes.values().cloned().collect())
    }

    fn node_by_key(&self, canonical_key: &str) -> StoreResult<Option<SkillNode>> {
        Ok(self
            .node_keys
            .get(canonical_key)
            .and_then(|id| self.nodes.get(id))
            .cloned())
    }

    fn children(&self, parent: SkillId) -> StoreResult<Vec<SkillId>> {
        Ok(self
            .nodes
            .values()
            .filter(|n| n.parent_id == Some(parent))
            .map(|n| n.id)
            .collect())
    }

    fn parent_links(&self) -> StoreResult<BTreeMap<SkillId, Option<SkillId>>> {
        Ok(self.nodes.values().map(|n| (n.id, n.parent_id)).collect())
    }

    fn synonyms(&self) -> StoreResult<Vec<SynonymEdge>> {
        Ok(self.synonyms.values().cloned().collect())
    }

    fn synonym(&self, id: SynonymId) -> StoreResult<Option<SynonymEdge>> {
        Ok(self.synonyms.get(&id).cloned())
    }

    fn synonyms_of(&self, owner: SkillId) -> StoreResult<Vec<SynonymEdge>> {
        Ok(self
            .synonyms
            .values()
            .filter(|s| s.owner_id == owner)
            .cloned()
            .collect())
    }

    fn find_synonym(
        &self,
        owner: SkillId,
        canonical_key: &str,
    ) -> StoreResult<Option<SynonymEdge>> {
        Ok(self
            .synonym_keys
            .get(&(owner, canonical_key.to_string()))
            .and_then(|id| self.synonyms.get(id))
            .cloned())
    }

    fn relations(&self) -> StoreResult<Vec<RelationEdge>> {
        Ok(self.relations.values().cloned().collect())
    }

    fn relations_at(&self, node: SkillId, end: Endpoint) -> StoreResult<Vec<RelationEdge>> {
        Ok(self
            .relations
            .values()
            .filter(|r| r.endpoint(end) == node)
            .cloned()
            .collect())
    }

    fn find_relation(
        &self,
        source: SkillId,
        target: SkillId,
        relation_type: &RelationType,
    ) -> StoreResult<Option<RelationEdge>> {
        Ok(self
            .relation_keys
            .get(&(source, target, relation_type.clone()))
            .and_then(|id| self.relations.get(id))
            .cloned())
    }

    fn cross_references_to(&self, node: SkillId) -> StoreResult<Vec<CrossReference>> {
        Ok(self
            .cross_refs
            .values()
            .filter(|x| x.skill_id == node)
            .cloned()
            .collect())
    }

    fn merge_records(&self) -> StoreResult<Vec<MergeRecord>> {
        Ok(self.merge_log.clone())
    }
}

impl TaxonomyWriter for TaxonomyState {
    fn upsert_node(&mut self, draft: NewSkillNode) -> StoreResult<Upserted> {
        check_unit_interval("demand_score", draft.weights.demand_score)?;
        let at = now();
        if let Some(&id) = self.node_keys.get(&draft.canonical_key) {
            let node = self.nodes.get_mut(&id).ok_or(StoreError::NodeNotFound(id))?;
            node.display_name = draft.display_name;
            node.skill_code = draft.skill_code.or(node.skill_code.take());
            node.skill_type = draft.skill_type;
            node.category = draft.category.or(node.category.take());
            node.subcategory = draft.subcategory.or(node.subcategory.take());
            node.skill_level = draft.skill_level;
            node.weights = draft.weights;
            node.updated_at = draft.updated_at.unwrap_or(at);
            return Ok(Upserted::Updated(id));
        }

        self.next_id.node += 1;
        let id = SkillId(self.next_id.node);
        let node = draft.into_node(id, at);
        self.node_keys.insert(node.canonical_key.clone(), id);
        debug!(node = %id, key = %node.canonical_key, "inserted skill node");
        self.nodes.insert(id, node);
        Ok(Upserted::Inserted(id))
    }

    fn update_node(&mut self, node: SkillNode) -> StoreResult<()> {
        let previous_key = self
            .nodes
            .get(&node.id)
            .map(|n| n.canonical_key.clone())
            .ok_or(StoreError::NodeNotFound(node.id))?;
        if node.parent_id == Some(node.id) {
            return Err(StoreError::SelfParent(node.id));
        }
        if let Some(parent) = node.parent_id {
            self.require_existing_node(parent)?;
        }
        if let Some(target) = node.merged_into_id {
            self.require_existing_node(target)?;
        }
        check_unit_interval("demand_score", node.weights.demand_score)?;
        self.check_node_key(&node.canonical_key, Some(node.id))?;

        if previous_key != node.canonical_key {
            self.node_keys.remove(&previous_key);
            self.node_keys.insert(node.canonical_key.clone(), node.id);
        }
        self.nodes.insert(node.id, node);
        Ok(())
    }

    fn insert_synonym(&mut self, synonym: NewSynonym) -> StoreResult<SynonymId> {
        self.require_existing_node(synonym.owner_id)?;
        check_unit_interval("confidence", synonym.confidence)?;
        self.check_synonym_key(synonym.owner_id, &synonym.canonical_key, None)?;

        self.next_id.synonym += 1;
        let id = SynonymId(self.next_id.synonym);
        self.synonym_keys
            .insert((synonym.owner_id, synonym.canonical_key.clone()), id);
        self.synonyms.insert(
            id,
            SynonymEdge {
                id,
                owner_id: synonym.owner_id,
                raw_text: synonym.raw_text,
                canonical_key: synonym.canonical_key,
                locale: synonym.locale,
                confidence: synonym.confidence,
                provenance: synonym.provenance,
                merge_trail: Vec::new(),
            },
        );
        Ok(id)
    }

    fn update_synonym(&mut self, synonym: SynonymEdge) -> StoreResult<()> {
        let previous = self
            .synonyms
            .get(&synonym.id)
            .map(|s| (s.owner_id, s.canonical_key.clone()))
            .ok_or(StoreError::SynonymNotFound(synonym.id))?;
        self.require_existing_node(synonym.owner_id)?;
        check_unit_interval("confidence", synonym.confidence)?;
        self.check_synonym_key(synonym.owner_id, &synonym.canonical_key, Some(synonym.id))?;

        self.synonym_keys.remove(&previous);
        self.synonym_keys
            .insert((synonym.owner_id, synonym.canonical_key.clone()), synonym.id);
        self.synonyms.insert(synonym.id, synonym);
        Ok(())
    }

    fn delete_synonym(&mut self, id: SynonymId) -> StoreResult<bool> {
        match self.synonyms.remove(&id) {
            Some(syn) => {
                self.synonym_keys.remove(&(syn.owner_id, syn.canonical_key));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn insert_relation(&mut self, relation: NewRelation) -> StoreResult<RelationId> {
        self.require_existing_node(relation.source_id)?;
        self.require_existing_node(relation.target_id)?;
        check_unit_interval("strength", relation.strength)?;
        self.check_relation(
            relation.source_id,
            relation.target_id,
            &relation.relation_type,
            None,
        )?;

        self.next_id.relation += 1;
        let id = RelationId(self.next_id.relation);
        self.relation_keys.insert(
            (
                relation.source_id,
                relation.target_id,
                relation.relation_type.clone(),
            ),
            id,
        );
        self.relations.insert(
            id,
            RelationEdge {
                id,
                source_id: relation.source_id,
                target_id: relation.target_id,
                relation_type: relation.relation_type,
                strength: relation.strength,
                bidirectional: relation.bidirectional,
                merge_trail: Vec::new(),
            },
        );
        Ok(id)
    }

    fn update_relation(&mut self, relation: RelationEdge) -> StoreResult<()> {
        let previous = self
            .relations
            .get(&relation.id)
            .map(|r| (r.source_id, r.target_id, r.relation_type.clone()))
            .ok_or(StoreError::RelationNotFound(relation.id))?;
        self.require_existing_node(relation.source_id)?;
        self.require_existing_node(relation.target_id)?;
        check_unit_interval("strength", relation.strength)?;
        self.check_relation(
            relation.source_id,
            relation.target_id,
            &relation.relation_type,
            Some(relation.id),
        )?;

        self.relation_keys.remove(&previous);
        self.relation_keys.insert(
            (
                relation.source_id,
                relation.target_id,
                relation.relation_type.clone(),
            ),
            relation.id,
        );
        self.relations.insert(relation.id, relation);
        Ok(())
    }

    fn delete_relation(&mut self, id: RelationId) -> StoreResult<bool> {
        match self.relations.remove(&id) {
            Some(rel) => {
                self.relation_keys
                    .remove(&(rel.source_id, rel.target_id, rel.relation_type));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn repoint_cross_references(
        &mut self,
        from: SkillId,
        to: SkillId,
    ) -> StoreResult<Vec<CrossRefId>> {
        self.require_existing_node(to)?;
        let mut moved = Vec::new();
        for xref in self.cross_refs.values_mut().filter(|x| x.skill_id == from) {
            xref.skill_id = to;
            moved.push(xref.id);
        }
        Ok(moved)
    }

    fn repoint_cross_references_by_id(
        &mut self,
        ids: &[CrossRefId],
        from: SkillId,
        to: SkillId,
    ) -> StoreResult<usize> {
        self.require_existing_node(to)?;
        let mut moved = 0;
        for id in ids {
            if let Some(xref) = self.cross_refs.get_mut(id) {
                if xref.skill_id == from {
                    xref.skill_id = to;
                    moved += 1;
                }
            }
        }
        Ok(moved)
    }

    fn append_merge_record(&mut self, record: MergeRecord) -> StoreResult<()> {
        self.merge_log.push(record);
        Ok(())
    }
}

/// Prior value of one row touched inside a transaction.
enum Undo {
    Node(SkillId, Option<SkillNode>),
    Synonym(SynonymId, Option<SynonymEdge>),
    Relation(RelationId, Option<RelationEdge>),
    CrossRefs { ids: Vec<CrossRefId>, from: SkillId },
    MergeLog(usize),
}

/// Writer handed to a transaction closure. Writes land in the shared state
/// directly; each one records the prior row so a failed closure can be
/// reversed without copying the whole state up front.
struct Journal<'s> {
    state: &'s mut TaxonomyState,
    counters: IdCounters,
    undo: Vec<Undo>,
}

impl<'s> Journal<'s> {
    fn new(state: &'s mut TaxonomyState) -> Self {
        Self {
            counters: state.next_id,
            state,
            undo: Vec::new(),
        }
    }

    fn rollback(self) {
        let touched = self.undo.len();
        for entry in self.undo.into_iter().rev() {
            match entry {
                Undo::Node(id, prior) => self.state.restore_node(id, prior),
                Undo::Synonym(id, prior) => self.state.restore_synonym(id, prior),
                Undo::Relation(id, prior) => self.state.restore_relation(id, prior),
                Undo::CrossRefs { ids, from } => {
                    for id in ids {
                        if let Some(xref) = self.state.cross_refs.get_mut(&id) {
                            xref.skill_id = from;
                        }
                    }
                }
                Undo::MergeLog(len) => self.state.merge_log.truncate(len),
            }
        }
        self.state.next_id = self.counters;
        debug!(writes = touched, "transaction rolled back");
    }
}

impl TaxonomyReader for Journal<'_> {
    fn node(&self, id: SkillId) -> StoreResult<Option<SkillNode>> {
        self.state.node(id)
    }

    fn nodes(&self) -> StoreResult<Vec<SkillNode>> {
        self.state.nodes()
    }

    fn node_by_key(&self, canonical_key: &str) -> StoreResult<Option<SkillNode>> {
        self.state.node_by_key(canonical_key)
    }

    fn children(&self, parent: SkillId) -> StoreResult<Vec<SkillId>> {
        self.state.children(parent)
    }

    fn parent_links(&self) -> StoreResult<BTreeMap<SkillId, Option<SkillId>>> {
        self.state.parent_links()
    }

    fn synonyms(&self) -> StoreResult<Vec<SynonymEdge>> {
        self.state.synonyms()
    }

    fn synonym(&self, id: SynonymId) -> StoreResult<Option<SynonymEdge>> {
        self.state.synonym(id)
    }

    fn synonyms_of(&self, owner: SkillId) -> StoreResult<Vec<SynonymEdge>> {
        self.state.synonyms_of(owner)
    }

    fn find_synonym(
        &self,
        owner: SkillId,
        canonical_key: &str,
    ) -> StoreResult<Option<SynonymEdge>> {
        self.state.find_synonym(owner, canonical_key)
    }

    fn relations(&self) -> StoreResult<Vec<RelationEdge>> {
        self.state.relations()
    }

    fn relations_at(&self, node: SkillId, end: Endpoint) -> StoreResult<Vec<RelationEdge>> {
        self.state.relations_at(node, end)
    }

    fn find_relation(
        &self,
        source: SkillId,
        target: SkillId,
        relation_type: &RelationType,
    ) -> StoreResult<Option<RelationEdge>> {
        self.state.find_relation(source, target, relation_type)
    }

    fn cross_references_to(&self, node: SkillId) -> StoreResult<Vec<CrossReference>> {
        self.state.cross_references_to(node)
    }

    fn merge_records(&self) -> StoreResult<Vec<MergeRecord>> {
        self.state.merge_records()
    }
}

impl TaxonomyWriter for Journal<'_> {
    fn upsert_node(&mut self, draft: NewSkillNode) -> StoreResult<Upserted> {
        let prior = self.state.node_by_key(&draft.canonical_key)?;
        let out = self.state.upsert_node(draft)?;
        self.undo.push(Undo::Node(out.id(), prior));
        Ok(out)
    }

    fn update_node(&mut self, node: SkillNode) -> StoreResult<()> {
        let id = node.id;
        let prior = self.state.node(id)?;
        self.state.update_node(node)?;
        self.undo.push(Undo::Node(id, prior));
        Ok(())
    }

    fn insert_synonym(&mut self, synonym: NewSynonym) -> StoreResult<SynonymId> {
        let id = self.state.insert_synonym(synonym)?;
        self.undo.push(Undo::Synonym(id, None));
        Ok(id)
    }

    fn update_synonym(&mut self, synonym: SynonymEdge) -> StoreResult<()> {
        let id = synonym.id;
        let prior = self.state.synonym(id)?;
        self.state.update_synonym(synonym)?;
        self.undo.push(Undo::Synonym(id, prior));
        Ok(())
    }

    fn delete_synonym(&mut self, id: SynonymId) -> StoreResult<bool> {
        let prior = self.state.synonym(id)?;
        let deleted = self.state.delete_synonym(id)?;
        if deleted {
            self.undo.push(Undo::Synonym(id, prior));
        }
        Ok(deleted)
    }

    fn insert_relation(&mut self, relation: NewRelation) -> StoreResult<RelationId> {
        let id = self.state.insert_relation(relation)?;
        self.undo.push(Undo::Relation(id, None));
        Ok(id)
    }

    fn update_relation(&mut self, relation: RelationEdge) -> StoreResult<()> {
        let id = relation.id;
        let prior = self.state.relations.get(&id).cloned();
        self.state.update_relation(relation)?;
        self.undo.push(Undo::Relation(id, prior));
        Ok(())
    }

    fn delete_relation(&mut self, id: RelationId) -> StoreResult<bool> {
        let prior = self.state.relations.get(&id).cloned();
        let deleted = self.state.delete_relation(id)?;
        if deleted {
            self.undo.push(Undo::Relation(id, prior));
        }
        Ok(deleted)
    }

    fn repoint_cross_references(
        &mut self,
        from: SkillId,
        to: SkillId,
    ) -> StoreResult<Vec<CrossRefId>> {
        let moved = self.state.repoint_cross_references(from, to)?;
        self.undo.push(Undo::CrossRefs {
            ids: moved.clone(),
            from,
        });
        Ok(moved)
    }

    fn repoint_cross_references_by_id(
        &mut self,
        ids: &[CrossRefId],
        from: SkillId,
        to: SkillId,
    ) -> StoreResult<usize> {
        let moving: Vec<CrossRefId> = ids
            .iter()
            .copied()
            .filter(|id| {
                self.state
                    .cross_refs
                    .get(id)
                    .is_some_and(|x| x.skill_id == from)
            })
            .collect();
        let moved = self.state.repoint_cross_references_by_id(ids, from, to)?;
        self.undo.push(Undo::CrossRefs { ids: moving, from });
        Ok(moved)
    }

    fn append_merge_record(&mut self, record: MergeRecord) -> StoreResult<()> {
        let len = self.state.merge_log.len();
        self.state.append_merge_record(record)?;
        self.undo.push(Undo::MergeLog(len));
        Ok(())
    }
}

/// In-memory taxonomy store.
///
/// State lives behind a `RwLock`. A transaction writes through a [`Journal`]
/// and, when the closure fails, replays the journal backwards, so a failed
/// unit of work leaves nothing behind.
pub struct InMemoryTaxonomyStore {
    state: RwLock<TaxonomyState>,
}

impl InMemoryTaxonomyStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(TaxonomyState::default()),
        }
    }

    /// Load a store from a JSON snapshot. A missing file yields an empty store.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no snapshot found, starting empty");
            return Ok(Self::new());
        }
        let bytes = fs::read(path)?;
        let snapshot: Snapshot =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self {
            state: RwLock::new(TaxonomyState::from_snapshot(snapshot)?),
        })
    }

    /// Persist the current state as a JSON snapshot.
    ///
    /// Written to a temporary file next to `path` and renamed into place.
    pub fn save(&self, path: &Path) -> StoreResult<()> {
        let snapshot = self
            .state
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .to_snapshot();
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    /// Seed an externally owned cross-reference row.
    pub fn insert_cross_reference(
        &self,
        kind: impl Into<String>,
        skill_id: SkillId,
    ) -> StoreResult<CrossRefId> {
        self.state
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .insert_cross_reference(kind, skill_id)
    }

    pub fn stats(&self) -> StoreResult<StoreStats> {
        Ok(self.state.read().map_err(|_| StoreError::Poisoned)?.stats())
    }
}

impl Default for InMemoryTaxonomyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaxonomyStore for InMemoryTaxonomyStore {
    fn read<T, E>(&self, f: impl FnOnce(&dyn TaxonomyReader) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let guard = self.state.read().map_err(|_| StoreError::Poisoned)?;
        f(&*guard)
    }

    fn transaction<T, E>(
        &self,
        f: impl FnOnce(&mut dyn TaxonomyWriter) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut guard = self.state.write().map_err(|_| StoreError::Poisoned)?;
        let mut journal = Journal::new(&mut *guard);
        match f(&mut journal) {
            Ok(out) => Ok(out),
            Err(err) => {
                journal.rollback();
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for InMemoryTaxonomyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats().unwrap_or_default();
        f.debug_struct("InMemoryTaxonomyStore")
            .field("nodes", &stats.nodes)
            .field("synonyms", &stats.synonyms)
            .field("relations", &stats.relations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(names: &[&str]) -> (InMemoryTaxonomyStore, Vec<SkillId>) {
        let store = InMemoryTaxonomyStore::new();
        let ids = store
            .transaction(|tx| {
                names
                    .iter()
                    .map(|name| tx.upsert_node(NewSkillNode::new(*name, *name)).map(Upserted::id))
                    .collect::<StoreResult<Vec<_>>>()
            })
            .unwrap();
        (store, ids)
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    #[test]
    fn upsert_inserts_then_updates() {
        let store = InMemoryTaxonomyStore::new();
        let first = store
            .transaction(|tx| tx.upsert_node(NewSkillNode::new("React", "react")))
            .unwrap();
        let second = store
            .transaction(|tx| tx.upsert_node(NewSkillNode::new("React.js", "react").with_demand(0.9)))
            .unwrap();
        assert!(matches!(first, Upserted::Inserted(_)));
        assert_eq!(second, Upserted::Updated(first.id()));

        let node = store.read(|r| r.require_node(first.id())).unwrap();
        assert_eq!(node.display_name, "React.js");
        assert_eq!(node.weights.demand_score, 0.9);
        assert_eq!(store.stats().unwrap().nodes, 1);
    }

    #[test]
    fn update_node_enforces_unique_key() {
        let (store, ids) = store_with(&["a", "b"]);
        let err = store
            .transaction(|tx| {
                let mut b = tx.require_node(ids[1])?;
                b.canonical_key = "a".into();
                tx.update_node(b)
            })
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn update_node_moves_key_index() {
        let (store, ids) = store_with(&["a"]);
        store
            .transaction(|tx| {
                let mut a = tx.require_node(ids[0])?;
                a.canonical_key = "alpha".into();
                tx.update_node(a)
            })
            .unwrap();
        assert!(store.read(|r| r.node_by_key("a")).unwrap().is_none());
        assert_eq!(
            store.read(|r| r.node_by_key("alpha")).unwrap().map(|n| n.id),
            Some(ids[0])
        );
    }

    #[test]
    fn node_cannot_parent_itself() {
        let (store, ids) = store_with(&["a"]);
        let err = store
            .transaction(|tx| {
                let mut a = tx.require_node(ids[0])?;
                a.parent_id = Some(a.id);
                tx.update_node(a)
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::SelfParent(_)));
    }

    #[test]
    fn children_and_parent_links() {
        let (store, ids) = store_with(&["root", "child"]);
        store
            .transaction(|tx| {
                let mut child = tx.require_node(ids[1])?;
                child.parent_id = Some(ids[0]);
                tx.update_node(child)
            })
            .unwrap();
        assert_eq!(store.read(|r| r.children(ids[0])).unwrap(), vec![ids[1]]);
        let links = store.read(|r| r.parent_links()).unwrap();
        assert_eq!(links[&ids[0]], None);
        assert_eq!(links[&ids[1]], Some(ids[0]));
    }

    // -----------------------------------------------------------------------
    // Synonyms and relations
    // -----------------------------------------------------------------------

    #[test]
    fn synonym_owner_key_is_unique() {
        let (store, ids) = store_with(&["a"]);
        store
            .transaction(|tx| tx.insert_synonym(NewSynonym::new(ids[0], "A", "a")))
            .unwrap();
        let err = store
            .transaction(|tx| tx.insert_synonym(NewSynonym::new(ids[0], "a!", "a")))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::UniqueViolation {
                constraint: UniqueConstraint::SynonymOwnerKey,
                ..
            }
        ));
    }

    #[test]
    fn synonym_confidence_is_validated() {
        let (store, ids) = store_with(&["a"]);
        let mut syn = NewSynonym::new(ids[0], "A", "a");
        syn.confidence = 2.0;
        let err = store.transaction(|tx| tx.insert_synonym(syn)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidField(_)));
    }

    #[test]
    fn relation_rejects_self_loop_and_duplicates() {
        let (store, ids) = store_with(&["a", "b"]);
        let loop_err = store
            .transaction(|tx| {
                tx.insert_relation(NewRelation::new(ids[0], ids[0], RelationType::CommonlyWith))
            })
            .unwrap_err();
        assert!(matches!(loop_err, StoreError::SelfLoop(_)));

        store
            .transaction(|tx| {
                tx.insert_relation(NewRelation::new(ids[0], ids[1], RelationType::CommonlyWith))
            })
            .unwrap();
        let dup_err = store
            .transaction(|tx| {
                tx.insert_relation(NewRelation::new(ids[0], ids[1], RelationType::CommonlyWith))
            })
            .unwrap_err();
        assert!(dup_err.is_unique_violation());

        // Same pair, different type is fine.
        store
            .transaction(|tx| {
                tx.insert_relation(NewRelation::new(ids[0], ids[1], RelationType::Prerequisite))
            })
            .unwrap();
        assert_eq!(store.read(|r| r.relations_at(ids[0], Endpoint::Source)).unwrap().len(), 2);
        assert_eq!(store.read(|r| r.relations_at(ids[1], Endpoint::Target)).unwrap().len(), 2);
    }

    #[test]
    fn delete_relation_frees_triple() {
        let (store, ids) = store_with(&["a", "b"]);
        let rel = store
            .transaction(|tx| {
                tx.insert_relation(NewRelation::new(ids[0], ids[1], RelationType::CommonlyWith))
            })
            .unwrap();
        assert!(store.transaction(|tx| tx.delete_relation(rel)).unwrap());
        assert!(!store.transaction(|tx| tx.delete_relation(rel)).unwrap());
        store
            .transaction(|tx| {
                tx.insert_relation(NewRelation::new(ids[0], ids[1], RelationType::CommonlyWith))
            })
            .unwrap();
    }

    // -----------------------------------------------------------------------
    // Cross-references
    // -----------------------------------------------------------------------

    #[test]
    fn bulk_repoint_returns_moved_rows() {
        let (store, ids) = store_with(&["a", "b"]);
        let x1 = store.insert_cross_reference("PROFILE_SKILL", ids[1]).unwrap();
        let x2 = store.insert_cross_reference("JOB_REQUIRED_SKILL", ids[1]).unwrap();
        store.insert_cross_reference("PROFILE_SKILL", ids[0]).unwrap();

        let moved = store
            .transaction(|tx| tx.repoint_cross_references(ids[1], ids[0]))
            .unwrap();
        assert_eq!(moved, vec![x1, x2]);
        assert_eq!(store.read(|r| r.cross_references_to(ids[0])).unwrap().len(), 3);

        let back = store
            .transaction(|tx| tx.repoint_cross_references_by_id(&[x2], ids[0], ids[1]))
            .unwrap();
        assert_eq!(back, 1);
        assert_eq!(store.read(|r| r.cross_references_to(ids[1])).unwrap().len(), 1);
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    #[test]
    fn failed_transaction_discards_writes() {
        let (store, ids) = store_with(&["a"]);
        let result: StoreResult<()> = store.transaction(|tx| {
            tx.insert_synonym(NewSynonym::new(ids[0], "first", "first"))?;
            tx.insert_synonym(NewSynonym::new(ids[0], "again", "first"))?;
            Ok(())
        });
        assert!(result.is_err());
        assert!(store.read(|r| r.synonyms()).unwrap().is_empty());
    }

    #[test]
    fn merge_log_is_append_only_in_order() {
        let (store, ids) = store_with(&["a", "b", "c"]);
        let batch = uuid::Uuid::nil();
        store
            .transaction(|tx| {
                tx.append_merge_record(MergeRecord::new(batch, ids[0], ids[1], "a", now()))?;
                tx.append_merge_record(MergeRecord::new(batch, ids[0], ids[2], "a", now()))
            })
            .unwrap();
        let log = store.read(|r| r.merge_records()).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].duplicate_id, ids[1]);
        assert_eq!(log[1].duplicate_id, ids[2]);
    }

    #[test]
    fn failed_transaction_restores_every_touched_row() {
        let (store, ids) = store_with(&["a", "b", "c"]);
        let xref = store.insert_cross_reference("PROFILE_SKILL", ids[1]).unwrap();
        store
            .transaction(|tx| {
                tx.insert_synonym(NewSynonym::new(ids[0], "A", "a"))?;
                tx.insert_relation(NewRelation::new(ids[0], ids[1], RelationType::Alternative))
            })
            .unwrap();
        let nodes = store.read(|r| r.nodes()).unwrap();
        let synonyms = store.read(|r| r.synonyms()).unwrap();
        let relations = store.read(|r| r.relations()).unwrap();

        let result: StoreResult<()> = store.transaction(|tx| {
            // Key swap between a and b.
            let mut a = tx.require_node(ids[0])?;
            a.canonical_key = "tmp".into();
            tx.update_node(a)?;
            let mut b = tx.require_node(ids[1])?;
            b.canonical_key = "a".into();
            tx.update_node(b)?;

            let mut syn = tx.synonyms_of(ids[0])?.remove(0);
            syn.owner_id = ids[2];
            tx.update_synonym(syn)?;
            let rel = tx.relations()?.remove(0);
            tx.delete_relation(rel.id)?;
            tx.repoint_cross_references(ids[1], ids[2])?;
            tx.append_merge_record(MergeRecord::new(uuid::Uuid::nil(), ids[2], ids[1], "b", now()))?;
            tx.upsert_node(NewSkillNode::new("d", "d"))?;
            Err(StoreError::SelfParent(ids[0]))
        });
        assert!(result.is_err());

        assert_eq!(store.read(|r| r.nodes()).unwrap(), nodes);
        assert_eq!(store.read(|r| r.synonyms()).unwrap(), synonyms);
        assert_eq!(store.read(|r| r.relations()).unwrap(), relations);
        assert!(store.read(|r| r.merge_records()).unwrap().is_empty());
        let refs = store.read(|r| r.cross_references_to(ids[1])).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].id, xref);

        // Indexes and counters are back too.
        assert_eq!(store.read(|r| r.node_by_key("a")).unwrap().unwrap().id, ids[0]);
        assert!(store.read(|r| r.node_by_key("tmp")).unwrap().is_none());
        assert!(store.read(|r| r.find_synonym(ids[0], "a")).unwrap().is_some());
        assert!(store.read(|r| r.find_synonym(ids[2], "a")).unwrap().is_none());
        assert!(store
            .read(|r| r.find_relation(ids[0], ids[1], &RelationType::Alternative))
            .unwrap()
            .is_some());
        let next = store
            .transaction(|tx| tx.upsert_node(NewSkillNode::new("d", "d")))
            .unwrap();
        assert_eq!(next, Upserted::Inserted(SkillId(4)));
    }

    #[test]
    fn synonym_lookup_by_id() {
        let (store, ids) = store_with(&["a"]);
        let id = store
            .transaction(|tx| tx.insert_synonym(NewSynonym::new(ids[0], "A", "a")))
            .unwrap();
        assert_eq!(store.read(|r| r.synonym(id)).unwrap().unwrap().raw_text, "A");
        assert!(store.read(|r| r.synonym(SynonymId(99))).unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    #[test]
    fn snapshot_roundtrip_rebuilds_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taxonomy.json");

        let (store, ids) = store_with(&["a", "b"]);
        store
            .transaction(|tx| {
                tx.insert_synonym(NewSynonym::new(ids[0], "A", "a"))?;
                tx.insert_relation(NewRelation::new(ids[0], ids[1], RelationType::Alternative))
            })
            .unwrap();
        store.insert_cross_reference("PROFILE_SKILL", ids[1]).unwrap();
        store.save(&path).unwrap();

        let reopened = InMemoryTaxonomyStore::open(&path).unwrap();
        assert_eq!(reopened.stats().unwrap(), store.stats().unwrap());
        assert!(reopened.read(|r| r.node_by_key("b")).unwrap().is_some());
        assert!(reopened.read(|r| r.find_synonym(ids[0], "a")).unwrap().is_some());

        // Counters survive: the next node gets a fresh id.
        let next = reopened
            .transaction(|tx| tx.upsert_node(NewSkillNode::new("c", "c")))
            .unwrap();
        assert_eq!(next, Upserted::Inserted(SkillId(3)));
    }

    fn saved_snapshot(edit: impl FnOnce(&mut serde_json::Value)) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taxonomy.json");
        let (store, ids) = store_with(&["a", "b"]);
        store
            .transaction(|tx| {
                tx.insert_synonym(NewSynonym::new(ids[0], "A", "a"))?;
                tx.insert_synonym(NewSynonym::new(ids[0], "Alpha", "alpha"))?;
                tx.insert_relation(NewRelation::new(ids[0], ids[1], RelationType::Alternative))?;
                tx.insert_relation(NewRelation::new(ids[1], ids[0], RelationType::Alternative))
            })
            .unwrap();
        store.save(&path).unwrap();

        let mut json: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        edit(&mut json);
        fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();
        (dir, path)
    }

    #[test]
    fn snapshot_with_duplicate_node_key_is_rejected() {
        let (_dir, path) = saved_snapshot(|json| {
            json["nodes"][1]["canonical_key"] = "a".into();
        });
        let err = InMemoryTaxonomyStore::open(&path).unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn snapshot_with_duplicate_synonym_key_is_rejected() {
        let (_dir, path) = saved_snapshot(|json| {
            json["synonyms"][1]["canonical_key"] = "a".into();
        });
        let err = InMemoryTaxonomyStore::open(&path).unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn snapshot_with_duplicate_relation_is_rejected() {
        let (_dir, path) = saved_snapshot(|json| {
            let source = json["relations"][0]["source_id"].clone();
            let target = json["relations"][0]["target_id"].clone();
            json["relations"][1]["source_id"] = source;
            json["relations"][1]["target_id"] = target;
        });
        let err = InMemoryTaxonomyStore::open(&path).unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn snapshot_with_dangling_owner_is_rejected() {
        let (_dir, path) = saved_snapshot(|json| {
            json["synonyms"][0]["owner_id"] = 42.into();
        });
        let err = InMemoryTaxonomyStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::NodeNotFound(SkillId(42))));
    }

    #[test]
    fn open_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryTaxonomyStore::open(&dir.path().join("absent.json")).unwrap();
        assert_eq!(store.stats().unwrap(), StoreStats::default());
    }

    #[test]
    fn debug_format() {
        let (store, _) = store_with(&["x"]);
        let debug = format!("{store:?}");
        assert!(debug.contains("InMemoryTaxonomyStore"));
        assert!(debug.contains("nodes"));
    }
}
