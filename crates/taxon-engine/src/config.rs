use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use taxon_hierarchy::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_DEPTH};
use taxon_normalize::{KeyBasis, NormalizeOptions, ResolveMode};

use crate::error::{EngineError, EngineResult};

pub const CONFIG_FILE_NAME: &str = "taxon.toml";

/// Engine configuration, read from `taxon.toml`. Every field has a default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// JSON snapshot backing the in-memory store.
    pub store_path: PathBuf,
    pub normalize: NormalizeConfig,
    pub hierarchy: HierarchyConfig,
    pub merge: MergeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("taxonomy.json"),
            normalize: NormalizeConfig::default(),
            hierarchy: HierarchyConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    pub key_basis: KeyBasis,
    /// Disambiguate collisions with hashed keys instead of leaving them for review.
    pub auto_resolve: bool,
    pub review_file: PathBuf,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            key_basis: KeyBasis::Name,
            auto_resolve: false,
            review_file: PathBuf::from("collisions-for-review.csv"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    pub batch_size: usize,
    pub max_depth: usize,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub report_file: PathBuf,
    /// Rebuild hierarchy paths after a merge or rollback moved children.
    pub rebuild_paths: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            report_file: PathBuf::from("merge-report.csv"),
            rebuild_paths: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(path: &Path, body: &str) -> EngineResult<Self> {
        toml::from_str(body).map_err(|source| EngineError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> EngineResult<Self> {
        match fs::read_to_string(path) {
            Ok(body) => Self::from_toml_str(path, &body),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(EngineError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn to_toml_string(&self) -> EngineResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn resolve_mode(&self) -> ResolveMode {
        if self.normalize.auto_resolve {
            ResolveMode::AutoResolve
        } else {
            ResolveMode::ManualReview
        }
    }

    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            basis: self.normalize.key_basis,
            mode: self.resolve_mode(),
            review_file: Some(self.normalize.review_file.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = EngineConfig::default();
        assert_eq!(c.store_path, PathBuf::from("taxonomy.json"));
        assert_eq!(c.normalize.key_basis, KeyBasis::Name);
        assert!(!c.normalize.auto_resolve);
        assert_eq!(c.hierarchy.batch_size, 500);
        assert_eq!(c.hierarchy.max_depth, 64);
        assert_eq!(c.merge.report_file, PathBuf::from("merge-report.csv"));
        assert!(c.merge.rebuild_paths);
        assert_eq!(c.resolve_mode(), ResolveMode::ManualReview);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let body = r#"
            store_path = "data/skills.json"

            [normalize]
            key_basis = "name_and_category"
            auto_resolve = true

            [hierarchy]
            batch_size = 100
        "#;
        let c = EngineConfig::from_toml_str(Path::new("taxon.toml"), body).unwrap();
        assert_eq!(c.store_path, PathBuf::from("data/skills.json"));
        assert_eq!(c.normalize.key_basis, KeyBasis::NameAndCategory);
        assert_eq!(c.normalize.review_file, PathBuf::from("collisions-for-review.csv"));
        assert_eq!(c.hierarchy.batch_size, 100);
        assert_eq!(c.hierarchy.max_depth, 64);
        assert_eq!(c.merge, MergeConfig::default());
        assert_eq!(c.normalize_options().mode, ResolveMode::AutoResolve);
    }

    #[test]
    fn bad_basis_is_a_config_error() {
        let body = "[normalize]\nkey_basis = \"id\"\n";
        let err = EngineConfig::from_toml_str(Path::new("taxon.toml"), body).unwrap_err();
        assert!(matches!(err, EngineError::Config { .. }));
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let c = EngineConfig::load(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(c, EngineConfig::default());
    }

    #[test]
    fn toml_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut c = EngineConfig::default();
        c.merge.rebuild_paths = false;
        c.hierarchy.max_depth = 12;
        fs::write(&path, c.to_toml_string().unwrap()).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), c);
    }
}
