//! Collision detection over canonical keys.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use taxon_types::{SkillId, SkillNode};

use crate::error::NormalizeError;
use crate::text::{normalize, normalize_with_category};

/// What a node's canonical key is computed from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyBasis {
    /// `normalize(display_name)`
    #[default]
    Name,
    /// `normalize(display_name + "_" + category)` when a category is set.
    NameAndCategory,
}

impl KeyBasis {
    pub fn key_for(self, node: &SkillNode) -> String {
        match self {
            KeyBasis::Name => normalize(&node.display_name),
            KeyBasis::NameAndCategory => {
                normalize_with_category(&node.display_name, node.category.as_deref())
            }
        }
    }
}

impl fmt::Display for KeyBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyBasis::Name => f.write_str("name"),
            KeyBasis::NameAndCategory => f.write_str("name_and_category"),
        }
    }
}

impl FromStr for KeyBasis {
    type Err = NormalizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "name" => Ok(KeyBasis::Name),
            "name_and_category" | "name_category" => Ok(KeyBasis::NameAndCategory),
            _ => Err(NormalizeError::UnknownBasis(s.to_string())),
        }
    }
}

/// A set of ACTIVE nodes sharing one canonical key. `members` is sorted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionGroup {
    pub key: String,
    pub members: Vec<SkillId>,
}

impl CollisionGroup {
    pub fn new(key: impl Into<String>, mut members: Vec<SkillId>) -> Self {
        members.sort();
        members.dedup();
        Self {
            key: key.into(),
            members,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Groups ACTIVE nodes by their base key under a [`KeyBasis`].
///
/// Building the index never touches the store.
#[derive(Clone, Debug)]
pub struct CollisionIndex {
    basis: KeyBasis,
    buckets: BTreeMap<String, Vec<SkillId>>,
    base_keys: BTreeMap<SkillId, String>,
}

impl CollisionIndex {
    pub fn build<'a>(nodes: impl IntoIterator<Item = &'a SkillNode>, basis: KeyBasis) -> Self {
        let mut buckets: BTreeMap<String, Vec<SkillId>> = BTreeMap::new();
        let mut base_keys = BTreeMap::new();
        for node in nodes.into_iter().filter(|n| n.is_active()) {
            let key = basis.key_for(node);
            buckets.entry(key.clone()).or_default().push(node.id);
            base_keys.insert(node.id, key);
        }
        for ids in buckets.values_mut() {
            ids.sort();
        }
        Self {
            basis,
            buckets,
            base_keys,
        }
    }

    pub fn basis(&self) -> KeyBasis {
        self.basis
    }

    /// Number of ACTIVE nodes indexed.
    pub fn len(&self) -> usize {
        self.base_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base_keys.is_empty()
    }

    pub fn base_key(&self, id: SkillId) -> Option<&str> {
        self.base_keys.get(&id).map(String::as_str)
    }

    pub fn is_colliding(&self, id: SkillId) -> bool {
        self.base_key(id)
            .and_then(|key| self.buckets.get(key))
            .is_some_and(|ids| ids.len() > 1)
    }

    /// Groups with more than one member, ordered by key.
    pub fn groups(&self) -> Vec<CollisionGroup> {
        self.buckets
            .iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(key, ids)| CollisionGroup {
                key: key.clone(),
                members: ids.clone(),
            })
            .collect()
    }

    /// `(id, base_key)` for every indexed node, ordered by id.
    pub fn entries(&self) -> impl Iterator<Item = (SkillId, &str)> {
        self.base_keys.iter().map(|(id, key)| (*id, key.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxon_types::{now, NewSkillNode};

    fn node(id: u64, name: &str, category: Option<&str>) -> SkillNode {
        let mut draft = NewSkillNode::new(name, format!("k{id}"));
        if let Some(c) = category {
            draft = draft.with_category(c);
        }
        draft.into_node(SkillId(id), now())
    }

    #[test]
    fn three_way_collision_forms_one_group() {
        let nodes = vec![
            node(1, "React", None),
            node(2, "react", None),
            node(3, "REACT ", None),
            node(4, "Vue", None),
        ];
        let index = CollisionIndex::build(&nodes, KeyBasis::Name);
        let groups = index.groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key, "react");
        assert_eq!(groups[0].members, vec![SkillId(1), SkillId(2), SkillId(3)]);
        assert!(index.is_colliding(SkillId(2)));
        assert!(!index.is_colliding(SkillId(4)));
    }

    #[test]
    fn deprecated_nodes_are_ignored() {
        let mut dup = node(2, "React", None);
        dup.deprecate_into(SkillId(1), now());
        let nodes = vec![node(1, "React", None), dup];
        let index = CollisionIndex::build(&nodes, KeyBasis::Name);
        assert!(index.groups().is_empty());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn category_basis_splits_groups() {
        let nodes = vec![
            node(1, "Python", Some("Programming")),
            node(2, "Python", Some("Zoology")),
        ];
        assert_eq!(CollisionIndex::build(&nodes, KeyBasis::Name).groups().len(), 1);
        let by_category = CollisionIndex::build(&nodes, KeyBasis::NameAndCategory);
        assert!(by_category.groups().is_empty());
        assert_eq!(by_category.base_key(SkillId(2)), Some("python_zoology"));
    }

    #[test]
    fn basis_parses() {
        assert_eq!("name".parse::<KeyBasis>().unwrap(), KeyBasis::Name);
        assert_eq!(
            "Name-And-Category".parse::<KeyBasis>().unwrap(),
            KeyBasis::NameAndCategory
        );
        assert!("id".parse::<KeyBasis>().is_err());
        assert_eq!(KeyBasis::NameAndCategory.to_string(), "name_and_category");
    }

    #[test]
    fn group_new_sorts_and_dedups() {
        let g = CollisionGroup::new("x", vec![SkillId(3), SkillId(1), SkillId(3)]);
        assert_eq!(g.members, vec![SkillId(1), SkillId(3)]);
        assert_eq!(g.len(), 2);
    }
}
