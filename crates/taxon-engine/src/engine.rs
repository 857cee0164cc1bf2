use std::path::Path;

use tracing::info;
use uuid::Uuid;

use taxon_hierarchy::{CycleDetector, CycleReport, HierarchyPathBuilder, PathSummary};
use taxon_import::{read_feed, ImportPipeline, ImportSummary, ParsedFeed};
use taxon_merge::{
    append_report, read_report, MergeEngine, MergeSummary, RollbackEngine, RollbackSummary,
};
use taxon_normalize::review::read_review_file;
use taxon_normalize::{CollisionGroup, NormalizationPass, NormalizeOptions, NormalizeReport};
use taxon_store::{InMemoryTaxonomyStore, StoreStats, TaxonomyReader, TaxonomyStore};
use taxon_types::MergeRecord;

use crate::config::EngineConfig;
use crate::error::EngineResult;

/// Result of a merge run.
#[derive(Clone, Debug)]
pub struct MergeRun {
    pub batch_id: Uuid,
    pub summary: MergeSummary,
    pub records: Vec<MergeRecord>,
    /// Present when paths were rebuilt afterwards.
    pub paths: Option<PathSummary>,
}

#[derive(Clone, Debug)]
pub struct RollbackRun {
    pub summary: RollbackSummary,
    pub paths: Option<PathSummary>,
}

/// One store, one configuration, every pass.
pub struct TaxonomyEngine<S: TaxonomyStore> {
    store: S,
    config: EngineConfig,
}

impl<S: TaxonomyStore> TaxonomyEngine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut EngineConfig {
        &mut self.config
    }

    pub fn into_store(self) -> S {
        self.store
    }

    // ---- Import ----

    pub fn import_feed(&self, path: &Path) -> EngineResult<ImportSummary> {
        let feed = read_feed(path)?;
        info!(path = %path.display(), rows = feed.rows(), "feed loaded");
        self.import(&feed)
    }

    pub fn import(&self, feed: &ParsedFeed) -> EngineResult<ImportSummary> {
        Ok(ImportPipeline::new(&self.store).run(feed)?)
    }

    // ---- Normalization ----

    /// Run with the configured options.
    pub fn normalize(&self) -> EngineResult<NormalizeReport> {
        self.normalize_with(self.config.normalize_options())
    }

    pub fn normalize_with(&self, options: NormalizeOptions) -> EngineResult<NormalizeReport> {
        Ok(NormalizationPass::new(&self.store, options).run()?)
    }

    // ---- Hierarchy ----

    pub fn detect_cycles(&self) -> EngineResult<CycleReport> {
        let links = self.store.read(|r| r.parent_links())?;
        Ok(CycleDetector::new(&links).detect())
    }

    pub fn rebuild_paths(&self) -> EngineResult<PathSummary> {
        let builder = HierarchyPathBuilder::new(&self.store)
            .with_batch_size(self.config.hierarchy.batch_size)
            .with_max_depth(self.config.hierarchy.max_depth);
        Ok(builder.run()?)
    }

    // ---- Merge / rollback ----

    /// Merge the groups listed in `review_file` (the configured one when `None`).
    pub fn merge_from_review(&self, review_file: Option<&Path>) -> EngineResult<MergeRun> {
        let path = review_file.unwrap_or(self.config.normalize.review_file.as_path());
        let groups = read_review_file(path)?;
        info!(path = %path.display(), groups = groups.len(), "collision groups loaded");
        self.merge(&groups)
    }

    /// Merge `groups`, append the new records to the merge report, and
    /// rebuild paths when configured to.
    pub fn merge(&self, groups: &[CollisionGroup]) -> EngineResult<MergeRun> {
        let engine = MergeEngine::new(&self.store);
        let batch_id = engine.batch_id();
        let outcome = engine.run(groups)?;

        if !outcome.records.is_empty() {
            append_report(&self.config.merge.report_file, &outcome.records)?;
        }
        let paths = if self.config.merge.rebuild_paths && !outcome.records.is_empty() {
            Some(self.rebuild_paths()?)
        } else {
            None
        };
        Ok(MergeRun {
            batch_id,
            summary: outcome.summary,
            records: outcome.records,
            paths,
        })
    }

    /// Roll back merges, optionally only one batch. Records come from
    /// `report` when given, otherwise from the store's merge log.
    pub fn rollback(&self, batch: Option<Uuid>, report: Option<&Path>) -> EngineResult<RollbackRun> {
        let mut engine = RollbackEngine::new(&self.store);
        if let Some(batch) = batch {
            engine = engine.for_batch(batch);
        }
        let summary = match report {
            Some(path) => {
                let log = self.store.read(|r| r.merge_records())?;
                let records: Vec<MergeRecord> = read_report(path)?
                    .into_iter()
                    .map(|entry| entry.into_record(&log))
                    .collect();
                engine.run(&records)?
            }
            None => engine.run_from_log()?,
        };
        let paths = if self.config.merge.rebuild_paths && summary.rolled_back > 0 {
            Some(self.rebuild_paths()?)
        } else {
            None
        };
        Ok(RollbackRun { summary, paths })
    }

    pub fn merge_log(&self) -> EngineResult<Vec<MergeRecord>> {
        Ok(self.store.read(|r| r.merge_records())?)
    }
}

impl TaxonomyEngine<InMemoryTaxonomyStore> {
    /// Open the snapshot at `config.store_path` (empty if absent).
    pub fn open(config: EngineConfig) -> EngineResult<Self> {
        let store = InMemoryTaxonomyStore::open(&config.store_path)?;
        Ok(Self::new(store, config))
    }

    pub fn save(&self) -> EngineResult<()> {
        self.store.save(&self.config.store_path)?;
        info!(path = %self.config.store_path.display(), "store saved");
        Ok(())
    }

    pub fn status(&self) -> EngineResult<StoreStats> {
        Ok(self.store.stats()?)
    }
}
