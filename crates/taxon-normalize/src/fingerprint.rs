//! Deterministic collision disambiguation.
//!
//! Only used in auto-resolve mode. A colliding node's key becomes
//! `base__<fp>`, where `<fp>` is a 7-hex-digit fingerprint over the node's
//! disambiguating context. If that key is still taken, a counter suffix is
//! appended (`base__<fp>_1`, `base__<fp>_2`, ...). The same input always
//! yields the same keys.

use std::collections::HashSet;

use taxon_types::SkillNode;

/// Number of hex digits kept from the digest.
pub const FINGERPRINT_LEN: usize = 7;

/// The fields that distinguish two nodes sharing a display name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FingerprintContext<'a> {
    pub skill_type: &'a str,
    pub category: Option<&'a str>,
    pub subcategory: Option<&'a str>,
    pub display_name: &'a str,
}

impl<'a> FingerprintContext<'a> {
    pub fn of(node: &'a SkillNode) -> Self {
        Self {
            skill_type: &node.skill_type,
            category: node.category.as_deref(),
            subcategory: node.subcategory.as_deref(),
            display_name: &node.display_name,
        }
    }
}

/// Short stable fingerprint of `ctx`.
///
/// Taken from a BLAKE3 digest; nothing here depends on it being
/// collision-resistant, only on it being deterministic.
pub fn fingerprint(ctx: &FingerprintContext<'_>) -> String {
    let material = format!(
        "{}|{}|{}|{}",
        ctx.skill_type,
        ctx.category.unwrap_or(""),
        ctx.subcategory.unwrap_or(""),
        ctx.display_name
    );
    let digest = blake3::hash(material.as_bytes());
    let mut hex = hex::encode(&digest.as_bytes()[..4]);
    hex.truncate(FINGERPRINT_LEN);
    hex
}

/// Assigns unique disambiguated keys against a set of taken keys.
#[derive(Clone, Debug, Default)]
pub struct HashDisambiguator {
    taken: HashSet<String>,
}

impl HashDisambiguator {
    /// Start with `reserved` keys already taken.
    pub fn new<I, K>(reserved: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            taken: reserved.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_taken(&self, key: &str) -> bool {
        self.taken.contains(key)
    }

    /// Mark `key` as taken. Returns `false` if it already was.
    pub fn reserve(&mut self, key: impl Into<String>) -> bool {
        self.taken.insert(key.into())
    }

    /// Produce and reserve a unique key for a node whose base key collides.
    pub fn resolve(&mut self, base: &str, ctx: &FingerprintContext<'_>) -> String {
        let stem = format!("{base}__{}", fingerprint(ctx));
        let mut candidate = stem.clone();
        let mut counter = 0u32;
        while self.taken.contains(&candidate) {
            counter += 1;
            candidate = format!("{stem}_{counter}");
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}
