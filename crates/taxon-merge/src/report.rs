//! Merge report file.
//!
//! One line per merged duplicate, appended after every merge run:
//!
//! ```text
//! canonical_id,merged_id,normalized,batch_id,merged_at,children,cross_refs
//! 12,40,"react",0190c3a2-...,2024-06-01T10:00:00+00:00,41|43,7|8
//! ```
//!
//! Older reports carry only the first three columns; those rows still parse
//! and are completed from the store's merge log when rolled back.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use taxon_types::{CrossRefId, MergeRecord, SkillId, Timestamp};

use crate::error::{MergeError, MergeResult};

pub const REPORT_HEADER: &str =
    "canonical_id,merged_id,normalized,batch_id,merged_at,children,cross_refs";

/// One parsed report row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportEntry {
    pub canonical_id: SkillId,
    pub merged_id: SkillId,
    pub collision_key: String,
    pub batch_id: Option<Uuid>,
    pub merged_at: Option<Timestamp>,
    pub moved_children: Vec<SkillId>,
    pub repointed_refs: Vec<CrossRefId>,
}

impl From<&MergeRecord> for ReportEntry {
    fn from(record: &MergeRecord) -> Self {
        Self {
            canonical_id: record.canonical_id,
            merged_id: record.duplicate_id,
            collision_key: record.collision_key.clone(),
            batch_id: Some(record.batch_id),
            merged_at: Some(record.merged_at),
            moved_children: record.moved_children.clone(),
            repointed_refs: record.repointed_refs.clone(),
        }
    }
}

impl ReportEntry {
    /// Whether `record` describes the same merge as this row.
    pub fn matches(&self, record: &MergeRecord) -> bool {
        record.canonical_id == self.canonical_id
            && record.duplicate_id == self.merged_id
            && self.batch_id.map_or(true, |b| b == record.batch_id)
    }

    /// Rebuild the full record, preferring the matching entry in `log`
    /// (the latest one) over what the row itself carries.
    pub fn into_record(self, log: &[MergeRecord]) -> MergeRecord {
        if let Some(found) = log.iter().rev().find(|r| self.matches(r)) {
            return found.clone();
        }
        let mut record = MergeRecord::new(
            self.batch_id.unwrap_or(Uuid::nil()),
            self.canonical_id,
            self.merged_id,
            self.collision_key,
            self.merged_at.unwrap_or_default(),
        );
        record.moved_children = self.moved_children;
        record.repointed_refs = self.repointed_refs;
        record
    }
}

fn join_ids<T: ToString>(ids: &[T]) -> String {
    ids.iter().map(T::to_string).collect::<Vec<_>>().join("|")
}

fn split_ids<T: std::str::FromStr>(cell: &str) -> Option<Vec<T>> {
    if cell.is_empty() {
        return Some(Vec::new());
    }
    cell.split('|').map(|id| id.parse().ok()).collect()
}

pub fn render_report_line(record: &MergeRecord) -> String {
    format!(
        "{},{},\"{}\",{},{},{},{}",
        record.canonical_id,
        record.duplicate_id,
        record.collision_key,
        record.batch_id,
        record.merged_at.to_rfc3339(),
        join_ids(&record.moved_children),
        join_ids(&record.repointed_refs),
    )
}

fn parse_line(line: &str) -> Option<ReportEntry> {
    let cells: Vec<&str> = line.split(',').map(str::trim).collect();
    if cells.len() != 3 && cells.len() != 7 {
        return None;
    }
    let key = cells[2];
    let key = key
        .strip_prefix('"')
        .and_then(|k| k.strip_suffix('"'))
        .unwrap_or(key);
    let mut entry = ReportEntry {
        canonical_id: cells[0].parse().ok()?,
        merged_id: cells[1].parse().ok()?,
        collision_key: key.to_string(),
        batch_id: None,
        merged_at: None,
        moved_children: Vec::new(),
        repointed_refs: Vec::new(),
    };
    if cells.len() == 7 {
        entry.batch_id = Some(cells[3].parse().ok()?);
        entry.merged_at = Some(
            DateTime::parse_from_rfc3339(cells[4])
                .ok()?
                .with_timezone(&Utc),
        );
        entry.moved_children = split_ids(cells[5])?;
        entry.repointed_refs = split_ids(cells[6])?;
    }
    Some(entry)
}

/// Parse a report body. The header line is optional; malformed rows are
/// skipped with a warning.
pub fn parse_report(input: &str) -> Vec<ReportEntry> {
    let mut entries = Vec::new();
    for (line_no, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("canonical_id,") {
            continue;
        }
        match parse_line(line) {
            Some(entry) => entries.push(entry),
            None => warn!(line = line_no + 1, row = line, "malformed merge report row, skipping"),
        }
    }
    entries
}

/// Append `records` to the report at `path`, writing the header first if
/// the file is new or empty.
pub fn append_report(path: &Path, records: &[MergeRecord]) -> MergeResult<()> {
    let io_err = |source| MergeError::Io {
        path: path.to_path_buf(),
        source,
    };
    let fresh = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err)?;
    let mut body = String::new();
    if fresh {
        body.push_str(REPORT_HEADER);
        body.push('\n');
    }
    for record in records {
        body.push_str(&render_report_line(record));
        body.push('\n');
    }
    file.write_all(body.as_bytes()).map_err(io_err)
}

pub fn read_report(path: &Path) -> MergeResult<Vec<ReportEntry>> {
    let body = fs::read_to_string(path).map_err(|source| MergeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_report(&body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(canonical: u64, dup: u64) -> MergeRecord {
        let mut r = MergeRecord::new(
            Uuid::now_v7(),
            SkillId(canonical),
            SkillId(dup),
            "react",
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        );
        r.moved_children = vec![SkillId(5), SkillId(6)];
        r.repointed_refs = vec![CrossRefId(9)];
        r
    }

    #[test]
    fn line_layout() {
        let r = record(1, 2);
        let line = render_report_line(&r);
        assert!(line.starts_with("1,2,\"react\","));
        assert!(line.ends_with(",5|6,9"));
    }

    #[test]
    fn full_rows_parse_back() {
        let r = record(1, 2);
        let body = format!("{REPORT_HEADER}\n{}\n", render_report_line(&r));
        let entries = parse_report(&body);
        assert_eq!(entries, vec![ReportEntry::from(&r)]);
    }

    #[test]
    fn legacy_rows_parse() {
        let entries = parse_report("3,4,\"node_js\"\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].merged_id, SkillId(4));
        assert_eq!(entries[0].batch_id, None);
        assert!(entries[0].moved_children.is_empty());
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let entries = parse_report("x,4,\"a\"\n1,2\n1,2,\"ok\"\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].collision_key, "ok");
    }

    #[test]
    fn legacy_entry_is_completed_from_log() {
        let r = record(1, 2);
        let entry = parse_report("1,2,react").remove(0);
        assert_eq!(entry.into_record(&[r.clone()]), r);
    }

    #[test]
    fn append_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merge-report.csv");
        append_report(&path, &[record(1, 2)]).unwrap();
        append_report(&path, &[record(1, 3)]).unwrap();

        let body = fs::read_to_string(&path).unwrap();
        assert_eq!(body.matches("canonical_id,").count(), 1);
        let entries = read_report(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].merged_id, SkillId(3));
    }
}
