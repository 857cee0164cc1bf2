//! Feed records and parsing.

use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use taxon_normalize::normalize;
use taxon_types::node::DEFAULT_SKILL_TYPE;
use taxon_types::{NewSkillNode, SkillWeights, Timestamp};

use crate::error::{ImportError, ImportResult};

/// One skill as it appears in the feed. Unknown fields are ignored.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct FeedRecord {
    #[serde(default)]
    pub skill_name: Option<String>,
    #[serde(default)]
    pub normalized_name: Option<String>,
    #[serde(default)]
    pub skill_code: Option<String>,
    #[serde(default)]
    pub skill_type: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub parent_skill: Option<String>,
    #[serde(default)]
    pub skill_level: Option<u32>,
    #[serde(default)]
    pub synonyms: Option<Vec<String>>,
    #[serde(default)]
    pub related_skills: Option<Vec<String>>,
    #[serde(default)]
    pub base_weight: Option<f64>,
    #[serde(default)]
    pub demand_score: Option<f64>,
    #[serde(default)]
    pub trending_score: Option<f64>,
    /// Accepted but not applied: imported nodes always start ACTIVE.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// RFC 3339, or a bare `YYYY-MM-DD` taken as midnight UTC.
fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

impl FeedRecord {
    /// Canonical key: `normalize(normalized_name or skill_name)`. May be empty.
    pub fn key(&self) -> String {
        non_empty(&self.normalized_name)
            .or_else(|| non_empty(&self.skill_name))
            .map(normalize)
            .unwrap_or_default()
    }

    pub fn display_name(&self) -> Option<&str> {
        non_empty(&self.skill_name).or_else(|| non_empty(&self.normalized_name))
    }

    pub fn parent(&self) -> Option<&str> {
        non_empty(&self.parent_skill)
    }

    pub fn synonyms(&self) -> &[String] {
        self.synonyms.as_deref().unwrap_or_default()
    }

    pub fn related(&self) -> &[String] {
        self.related_skills.as_deref().unwrap_or_default()
    }

    /// Node draft for `key`.
    pub fn to_draft(&self, key: &str) -> NewSkillNode {
        let defaults = SkillWeights::default();
        let timestamp = |field: &Option<String>, name: &str| {
            let raw = non_empty(field)?;
            let parsed = parse_timestamp(raw);
            if parsed.is_none() {
                warn!(key, field = name, value = raw, "unparseable timestamp, ignoring");
            }
            parsed
        };
        NewSkillNode {
            display_name: self.display_name().unwrap_or(key).to_string(),
            canonical_key: key.to_string(),
            skill_code: non_empty(&self.skill_code).map(str::to_string),
            skill_type: non_empty(&self.skill_type)
                .map(str::to_ascii_uppercase)
                .unwrap_or_else(|| DEFAULT_SKILL_TYPE.to_string()),
            category: non_empty(&self.category).map(str::to_string),
            subcategory: non_empty(&self.subcategory).map(str::to_string),
            skill_level: self.skill_level.unwrap_or(0),
            weights: SkillWeights {
                base_weight: self.base_weight.unwrap_or(defaults.base_weight),
                demand_score: self.demand_score.unwrap_or(defaults.demand_score),
                trending_score: self.trending_score.unwrap_or(defaults.trending_score),
            },
            created_at: timestamp(&self.created_at, "created_at"),
            updated_at: timestamp(&self.updated_at, "updated_at"),
        }
    }
}

/// Validated records with their 1-based row numbers, plus the count of
/// rows that failed validation.
#[derive(Clone, Debug, Default)]
pub struct ParsedFeed {
    pub records: Vec<(usize, FeedRecord)>,
    pub rejected: usize,
}

impl ParsedFeed {
    pub fn rows(&self) -> usize {
        self.records.len() + self.rejected
    }

    fn accept(&mut self, row: usize, parsed: Result<FeedRecord, serde_json::Error>) {
        match parsed {
            Ok(record) => self.records.push((row, record)),
            Err(err) => {
                warn!(row, error = %err, "feed row rejected");
                self.rejected += 1;
            }
        }
    }
}

/// Parse a JSON array of records, or JSON Lines when the body does not
/// start with `[`.
pub fn parse_feed(input: &str) -> ImportResult<ParsedFeed> {
    let mut feed = ParsedFeed::default();
    if input.trim_start().starts_with('[') {
        let rows: Vec<Value> = serde_json::from_str(input)?;
        for (i, row) in rows.into_iter().enumerate() {
            feed.accept(i + 1, serde_json::from_value(row));
        }
    } else {
        for (i, line) in input.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            feed.accept(i + 1, serde_json::from_str(line));
        }
    }
    Ok(feed)
}

pub fn read_feed(path: &Path) -> ImportResult<ParsedFeed> {
    let body = fs::read_to_string(path).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_feed(&body)
}
