//! Collision review file.
//!
//! ```text
//! normalized,ids
//! "react","3|17|42"
//! ```
//!
//! The file is both the output of a manual-review normalization pass and
//! the input the merge pass reads its groups from.

use std::fs;
use std::path::Path;

use tracing::warn;

use taxon_types::SkillId;

use crate::collision::CollisionGroup;
use crate::error::{NormalizeError, NormalizeResult};

pub const REVIEW_HEADER: &str = "normalized,ids";

/// Render groups in file order.
pub fn render_review(groups: &[CollisionGroup]) -> String {
    let mut out = String::from(REVIEW_HEADER);
    out.push('\n');
    for group in groups {
        let ids = group
            .members
            .iter()
            .map(SkillId::to_string)
            .collect::<Vec<_>>()
            .join("|");
        out.push_str(&format!("\"{}\",\"{}\"\n", group.key, ids));
    }
    out
}

/// Parse a review file body. Blank and malformed rows are skipped with a
/// warning; so are groups left with fewer than two ids.
pub fn parse_review(input: &str) -> Vec<CollisionGroup> {
    let mut groups = Vec::new();
    for (line_no, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || (line_no == 0 && line.eq_ignore_ascii_case(REVIEW_HEADER)) {
            continue;
        }
        match parse_row(line) {
            Some(group) if group.len() > 1 => groups.push(group),
            Some(group) => {
                warn!(line = line_no + 1, key = %group.key, "review row has fewer than two ids, skipping");
            }
            None => warn!(line = line_no + 1, row = line, "malformed review row, skipping"),
        }
    }
    groups
}

fn parse_row(line: &str) -> Option<CollisionGroup> {
    let (key, ids) = line.rsplit_once(',')?;
    let key = unquote(key);
    if key.is_empty() {
        return None;
    }
    let members = unquote(ids)
        .split('|')
        .map(|id| id.parse::<SkillId>().ok())
        .collect::<Option<Vec<_>>>()?;
    Some(CollisionGroup::new(key, members))
}

fn unquote(cell: &str) -> &str {
    let cell = cell.trim();
    cell.strip_prefix('"')
        .and_then(|c| c.strip_suffix('"'))
        .unwrap_or(cell)
}

pub fn write_review_file(path: &Path, groups: &[CollisionGroup]) -> NormalizeResult<()> {
    fs::write(path, render_review(groups)).map_err(|source| NormalizeError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_review_file(path: &Path) -> NormalizeResult<Vec<CollisionGroup>> {
    let body = fs::read_to_string(path).map_err(|source| NormalizeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_review(&body))
}
