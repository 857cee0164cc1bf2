use std::collections::BTreeMap;

use taxon_types::{
    CrossRefId, CrossReference, Endpoint, MergeRecord, NewRelation, NewSkillNode, NewSynonym,
    RelationEdge, RelationId, RelationType, SkillId, SkillNode, SynonymEdge, SynonymId,
};

use crate::error::{StoreError, StoreResult};

/// Outcome of [`TaxonomyWriter::upsert_node`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upserted {
    Inserted(SkillId),
    Updated(SkillId),
}

impl Upserted {
    pub fn id(self) -> SkillId {
        match self {
            Upserted::Inserted(id) | Upserted::Updated(id) => id,
        }
    }
}

/// Read boundary. All listings are ordered by id.
pub trait TaxonomyReader {
    fn node(&self, id: SkillId) -> StoreResult<Option<SkillNode>>;

    fn nodes(&self) -> StoreResult<Vec<SkillNode>>;

    fn node_by_key(&self, canonical_key: &str) -> StoreResult<Option<SkillNode>>;

    /// Ids of nodes whose `parent_id` is `parent`.
    fn children(&self, parent: SkillId) -> StoreResult<Vec<SkillId>>;

    /// `id -> parent_id` for every node, taken from one consistent view.
    fn parent_links(&self) -> StoreResult<BTreeMap<SkillId, Option<SkillId>>>;

    fn synonyms(&self) -> StoreResult<Vec<SynonymEdge>>;

    fn synonym(&self, id: SynonymId) -> StoreResult<Option<SynonymEdge>>;

    fn synonyms_of(&self, owner: SkillId) -> StoreResult<Vec<SynonymEdge>>;

    fn find_synonym(&self, owner: SkillId, canonical_key: &str)
        -> StoreResult<Option<SynonymEdge>>;

    fn relations(&self) -> StoreResult<Vec<RelationEdge>>;

    /// Relations whose `end` endpoint is `node`.
    fn relations_at(&self, node: SkillId, end: Endpoint) -> StoreResult<Vec<RelationEdge>>;

    fn find_relation(
        &self,
        source: SkillId,
        target: SkillId,
        relation_type: &RelationType,
    ) -> StoreResult<Option<RelationEdge>>;

    fn cross_references_to(&self, node: SkillId) -> StoreResult<Vec<CrossReference>>;

    /// The append-only merge log, oldest first.
    fn merge_records(&self) -> StoreResult<Vec<MergeRecord>>;

    /// Fetch a node that must exist.
    fn require_node(&self, id: SkillId) -> StoreResult<SkillNode> {
        self.node(id)?.ok_or(StoreError::NodeNotFound(id))
    }
}

/// Write boundary. Implementations enforce:
/// - node canonical keys are unique
/// - `(owner, canonical_key)` is unique for synonyms
/// - `(source, target, relation_type)` is unique for relations and `source != target`
pub trait TaxonomyWriter: TaxonomyReader {
    /// Insert a node, or refresh the descriptive fields of the node that
    /// already carries `draft.canonical_key`. Status, parent and merge
    /// pointers of an existing node are left alone.
    fn upsert_node(&mut self, draft: NewSkillNode) -> StoreResult<Upserted>;

    /// Replace a stored node with `node` (matched by id).
    fn update_node(&mut self, node: SkillNode) -> StoreResult<()>;

    fn insert_synonym(&mut self, synonym: NewSynonym) -> StoreResult<SynonymId>;

    fn update_synonym(&mut self, synonym: SynonymEdge) -> StoreResult<()>;

    fn delete_synonym(&mut self, id: SynonymId) -> StoreResult<bool>;

    fn insert_relation(&mut self, relation: NewRelation) -> StoreResult<RelationId>;

    fn update_relation(&mut self, relation: RelationEdge) -> StoreResult<()>;

    fn delete_relation(&mut self, id: RelationId) -> StoreResult<bool>;

    /// Bulk repoint every cross-reference row from `from` to `to`.
    /// Returns the ids of the rows that moved.
    fn repoint_cross_references(&mut self, from: SkillId, to: SkillId)
        -> StoreResult<Vec<CrossRefId>>;

    /// Repoint only the listed rows, and only those currently pointing at `from`.
    fn repoint_cross_references_by_id(
        &mut self,
        ids: &[CrossRefId],
        from: SkillId,
        to: SkillId,
    ) -> StoreResult<usize>;

    fn append_merge_record(&mut self, record: MergeRecord) -> StoreResult<()>;
}

/// Entry point to a taxonomy store.
///
/// The process entrypoint owns the store and passes a reference into every
/// pass; passes never open their own connection.
pub trait TaxonomyStore: Send + Sync {
    /// Run `f` against a consistent read-only view.
    fn read<T, E>(&self, f: impl FnOnce(&dyn TaxonomyReader) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>;

    /// Run `f` as one atomic unit: either every write it made becomes
    /// visible, or (on `Err`) none does.
    fn transaction<T, E>(
        &self,
        f: impl FnOnce(&mut dyn TaxonomyWriter) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>;
}
