use std::cmp::Ordering;

use taxon_types::SkillNode;

/// Orders nodes best-canonical first: highest demand score, then earliest
/// creation, then lowest id.
pub fn canonical_order(a: &SkillNode, b: &SkillNode) -> Ordering {
    b.weights
        .demand_score
        .total_cmp(&a.weights.demand_score)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// The canonical node among ACTIVE `candidates`, if any.
pub fn select_canonical<'a, I>(candidates: I) -> Option<&'a SkillNode>
where
    I: IntoIterator<Item = &'a SkillNode>,
{
    candidates
        .into_iter()
        .filter(|n| n.is_active())
        .min_by(|a, b| canonical_order(a, b))
}
