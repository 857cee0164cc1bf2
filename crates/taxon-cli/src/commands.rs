use anyhow::Context;
use colored::Colorize;
use serde::Serialize;
use serde_json::json;

use taxon_engine::{
    CycleReport, EngineConfig, ImportSummary, InMemoryTaxonomyStore, MergeRun, NormalizeReport,
    PathSummary, RollbackRun, StoreStats, TaxonomyEngine,
};

use crate::cli::*;

type Engine = TaxonomyEngine<InMemoryTaxonomyStore>;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let mut config = EngineConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    let format = cli.format;

    match cli.command {
        Command::Import(args) => {
            let engine = open(config)?;
            let summary = engine
                .import_feed(&args.feed)
                .with_context(|| format!("importing {}", args.feed.display()))?;
            engine.save()?;
            emit(&format, &summary, || print_import(&summary))
        }
        Command::Normalize(args) => {
            if let Some(basis) = args.basis {
                config.normalize.key_basis = basis;
            }
            if args.auto_resolve {
                config.normalize.auto_resolve = true;
            }
            if let Some(review_file) = args.review_file {
                config.normalize.review_file = review_file;
            }
            let engine = open(config)?;
            let report = engine.normalize()?;
            engine.save()?;
            let body = json!({ "summary": report.summary, "groups": report.groups });
            emit(&format, &body, || print_normalize(&engine, &report))
        }
        Command::Cycles => {
            let engine = open(config)?;
            let report = engine.detect_cycles()?;
            emit(&format, &report, || print_cycles(&report))
        }
        Command::Paths(args) => {
            if let Some(batch_size) = args.batch_size {
                config.hierarchy.batch_size = batch_size;
            }
            let engine = open(config)?;
            let summary = engine.rebuild_paths()?;
            engine.save()?;
            emit(&format, &summary, || print_paths(&summary))
        }
        Command::Merge(args) => {
            if let Some(report) = args.report {
                config.merge.report_file = report;
            }
            let engine = open(config)?;
            let run = engine.merge_from_review(args.collisions.as_deref())?;
            engine.save()?;
            let body = json!({
                "batch_id": run.batch_id,
                "summary": run.summary,
                "records": run.records,
                "paths": run.paths,
            });
            emit(&format, &body, || print_merge(&engine, &run))
        }
        Command::Rollback(args) => {
            let engine = open(config)?;
            let run = engine.rollback(args.batch, args.report.as_deref())?;
            engine.save()?;
            let body = json!({ "summary": run.summary, "paths": run.paths });
            emit(&format, &body, || print_rollback(&run))
        }
        Command::Status => {
            let engine = open(config)?;
            let stats = engine.status()?;
            emit(&format, &stats, || print_status(&engine, &stats))
        }
    }
}

fn open(config: EngineConfig) -> anyhow::Result<Engine> {
    let path = config.store_path.clone();
    TaxonomyEngine::open(config).with_context(|| format!("opening store {}", path.display()))
}

fn emit<T: Serialize>(
    format: &OutputFormat,
    value: &T,
    text: impl FnOnce(),
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(),
    }
    Ok(())
}

fn failures(count: usize) -> String {
    if count == 0 {
        "0".to_string()
    } else {
        count.to_string().red().bold().to_string()
    }
}

fn print_import(s: &ImportSummary) {
    println!("{} Imported {} rows", "✓".green().bold(), s.rows.to_string().bold());
    if s.rows_rejected > 0 || s.rows_without_key > 0 {
        println!(
            "  Skipped: {} unparseable, {} without a key",
            s.rows_rejected.to_string().yellow(),
            s.rows_without_key.to_string().yellow()
        );
    }
    println!(
        "  Nodes: {} inserted, {} updated, {} merged, {} failed",
        s.nodes_inserted,
        s.nodes_updated,
        s.nodes_merged,
        failures(s.node_failures)
    );
    println!(
        "  Synonyms: {} created, {} existing, {} failed",
        s.synonyms_created, s.synonyms_existing, failures(s.synonym_failures)
    );
    println!(
        "  Parents: {} set, {} unchanged, {} unresolved, {} refused",
        s.parents_set, s.parents_unchanged, s.parents_unresolved, failures(s.parents_refused)
    );
    println!(
        "  Relations: {} created, {} existing, {} unresolved, {} failed",
        s.relations_created, s.relations_existing, s.relations_unresolved,
        failures(s.relation_failures)
    );
}

fn print_normalize(engine: &Engine, report: &NormalizeReport) {
    let s = &report.summary;
    let config = &engine.config().normalize;
    println!(
        "{} Normalized {} nodes ({})",
        "✓".green().bold(),
        s.nodes_scanned.to_string().bold(),
        config.key_basis.to_string().cyan()
    );
    println!("  Keys updated: {}, failed: {}", s.nodes_updated, failures(s.nodes_failed));
    println!(
        "  Synonyms: {} scanned, {} updated, {} failed",
        s.synonyms_scanned, s.synonyms_updated, failures(s.synonyms_failed)
    );
    if report.groups.is_empty() {
        println!("  No collisions.");
        return;
    }
    println!(
        "  Collisions: {} groups, {} nodes",
        s.collision_groups.to_string().yellow(),
        s.colliding_nodes
    );
    if s.left_for_review > 0 {
        println!(
            "  {} nodes left for review in {}",
            s.left_for_review.to_string().yellow(),
            config.review_file.display().to_string().bold()
        );
    }
}

fn print_cycles(report: &CycleReport) {
    if report.is_clean() {
        println!("{} Hierarchy is acyclic, no dangling parents.", "✓".green().bold());
        return;
    }
    for cycle in &report.cycles {
        let chain: Vec<String> = cycle.iter().map(|id| id.to_string()).collect();
        println!("{} cycle: {}", "✗".red().bold(), chain.join(" -> ").yellow());
    }
    for link in &report.dangling {
        println!(
            "{} dangling: {} -> missing {}",
            "!".yellow().bold(),
            link.node,
            link.parent.to_string().red()
        );
    }
    println!(
        "{} cycles, {} dangling parents",
        report.cycles.len().to_string().bold(),
        report.dangling.len().to_string().bold()
    );
}

fn print_paths(s: &PathSummary) {
    println!("{} Rebuilt paths for {} nodes", "✓".green().bold(), s.nodes_scanned.to_string().bold());
    println!(
        "  Written: {}, cleared: {}, unchanged: {}",
        s.paths_written, s.paths_cleared, s.unchanged
    );
    println!(
        "  Failures: {} cycle, {} dangling, {} too deep",
        failures(s.cycle_failures), failures(s.dangling_failures), failures(s.depth_failures)
    );
    println!(
        "  Batches: {} committed, {} stale",
        s.batches_committed, failures(s.stale_batches)
    );
}

fn print_merge(engine: &Engine, run: &MergeRun) {
    let s = &run.summary;
    println!(
        "{} Merged {} duplicates from {} groups",
        "✓".green().bold(),
        s.duplicates_merged.to_string().bold(),
        s.groups_seen
    );
    println!("  Batch: {}", run.batch_id.to_string().cyan());
    println!(
        "  Already merged: {}, skipped: {}, failed: {}",
        s.already_merged, s.skipped, failures(s.failed)
    );
    println!(
        "  Synonyms: {} moved, {} dropped; relations: {} moved, {} dropped",
        s.synonyms_moved, s.synonyms_dropped, s.relations_moved, s.relations_dropped
    );
    println!(
        "  Cross references repointed: {}, children moved: {}",
        s.cross_refs_repointed, s.children_moved
    );
    if !run.records.is_empty() {
        println!(
            "  Report: {}",
            engine.config().merge.report_file.display().to_string().bold()
        );
    }
    if let Some(paths) = &run.paths {
        println!("  Paths rewritten: {}", paths.paths_written + paths.paths_cleared);
    }
}

fn print_rollback(run: &RollbackRun) {
    let s = &run.summary;
    println!(
        "{} Rolled back {} of {} merges",
        "✓".green().bold(),
        s.rolled_back.to_string().bold(),
        s.records_seen
    );
    println!(
        "  Already active: {}, skipped: {}, failed: {}",
        s.already_active, s.skipped, failures(s.failed)
    );
    println!(
        "  Restored: {} synonyms, {} relations, {} cross references, {} children",
        s.synonyms_restored, s.relations_restored, s.cross_refs_restored, s.children_restored
    );
    if s.conflicts > 0 {
        println!("  {} rows kept on the canonical node (conflict)", s.conflicts.to_string().yellow());
    }
    if let Some(paths) = &run.paths {
        println!("  Paths rewritten: {}", paths.paths_written + paths.paths_cleared);
    }
}

fn print_status(engine: &Engine, s: &StoreStats) {
    println!("Store: {}", engine.config().store_path.display().to_string().bold());
    println!(
        "  Nodes: {} ({} active)",
        s.nodes.to_string().bold(),
        s.active_nodes.to_string().green()
    );
    println!("  Synonyms: {}", s.synonyms);
    println!("  Relations: {}", s.relations);
    println!("  Cross references: {}", s.cross_refs);
    println!("  Merge records: {}", s.merge_records);
}
