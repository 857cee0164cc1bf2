use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use taxon_engine::{KeyBasis, CONFIG_FILE_NAME};

#[derive(Parser)]
#[command(
    name = "taxon",
    about = "Taxonomy graph consistency engine",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store snapshot to operate on (overrides `store_path` in the config)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    #[arg(long, global = true, default_value = CONFIG_FILE_NAME)]
    pub config: PathBuf,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Upsert nodes, synonyms, parent links and relations from a JSON feed
    Import(ImportArgs),
    /// Recompute canonical keys and report collisions
    Normalize(NormalizeArgs),
    /// Report parent-link cycles and dangling parents
    Cycles,
    /// Rebuild materialized hierarchy paths
    Paths(PathsArgs),
    /// Merge duplicate nodes listed in a collision review file
    Merge(MergeArgs),
    /// Undo recorded merges
    Rollback(RollbackArgs),
    /// Show store row counts
    Status,
}

#[derive(Args)]
pub struct ImportArgs {
    /// JSON array or JSON-lines feed
    pub feed: PathBuf,
}

#[derive(Args)]
pub struct NormalizeArgs {
    /// Key basis: `name` or `name-and-category`
    #[arg(long)]
    pub basis: Option<KeyBasis>,
    /// Give colliding nodes hashed keys instead of leaving them for review
    #[arg(long)]
    pub auto_resolve: bool,
    #[arg(long)]
    pub review_file: Option<PathBuf>,
}

#[derive(Args)]
pub struct PathsArgs {
    #[arg(long)]
    pub batch_size: Option<usize>,
}

#[derive(Args)]
pub struct MergeArgs {
    /// Collision review file (defaults to the configured review file)
    #[arg(long)]
    pub collisions: Option<PathBuf>,
    /// Merge report to append to
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Args)]
pub struct RollbackArgs {
    /// Read merges from this report instead of the store's merge log
    #[arg(long)]
    pub report: Option<PathBuf>,
    /// Only undo merges from this batch
    #[arg(long)]
    pub batch: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_import() {
        let cli = Cli::try_parse_from(["taxon", "import", "skills.jsonl"]).unwrap();
        if let Command::Import(args) = cli.command {
            assert_eq!(args.feed, PathBuf::from("skills.jsonl"));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_import_requires_feed() {
        assert!(Cli::try_parse_from(["taxon", "import"]).is_err());
    }

    #[test]
    fn parse_normalize_defaults() {
        let cli = Cli::try_parse_from(["taxon", "normalize"]).unwrap();
        if let Command::Normalize(args) = cli.command {
            assert!(args.basis.is_none());
            assert!(!args.auto_resolve);
            assert!(args.review_file.is_none());
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_normalize_flags() {
        let cli = Cli::try_parse_from([
            "taxon", "normalize", "--basis", "name-and-category", "--auto-resolve",
            "--review-file", "review.csv",
        ]).unwrap();
        if let Command::Normalize(args) = cli.command {
            assert_eq!(args.basis, Some(KeyBasis::NameAndCategory));
            assert!(args.auto_resolve);
            assert_eq!(args.review_file, Some(PathBuf::from("review.csv")));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_normalize_unknown_basis() {
        assert!(Cli::try_parse_from(["taxon", "normalize", "--basis", "colour"]).is_err());
    }

    #[test]
    fn parse_cycles() {
        let cli = Cli::try_parse_from(["taxon", "cycles"]).unwrap();
        assert!(matches!(cli.command, Command::Cycles));
    }

    #[test]
    fn parse_paths_batch_size() {
        let cli = Cli::try_parse_from(["taxon", "paths", "--batch-size", "100"]).unwrap();
        if let Command::Paths(args) = cli.command {
            assert_eq!(args.batch_size, Some(100));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_merge() {
        let cli = Cli::try_parse_from([
            "taxon", "merge", "--collisions", "c.csv", "--report", "r.csv",
        ]).unwrap();
        if let Command::Merge(args) = cli.command {
            assert_eq!(args.collisions, Some(PathBuf::from("c.csv")));
            assert_eq!(args.report, Some(PathBuf::from("r.csv")));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_rollback_batch() {
        let batch = Uuid::now_v7();
        let text = batch.to_string();
        let cli = Cli::try_parse_from(["taxon", "rollback", "--batch", text.as_str()]).unwrap();
        if let Command::Rollback(args) = cli.command {
            assert_eq!(args.batch, Some(batch));
            assert!(args.report.is_none());
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_rollback_bad_batch() {
        assert!(Cli::try_parse_from(["taxon", "rollback", "--batch", "nope"]).is_err());
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::try_parse_from([
            "taxon", "status", "--store", "snap.json", "--config", "alt.toml", "-v",
        ]).unwrap();
        assert!(matches!(cli.command, Command::Status));
        assert_eq!(cli.store, Some(PathBuf::from("snap.json")));
        assert_eq!(cli.config, PathBuf::from("alt.toml"));
        assert!(cli.verbose);
    }

    #[test]
    fn parse_default_config() {
        let cli = Cli::try_parse_from(["taxon", "status"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(CONFIG_FILE_NAME));
        assert!(cli.store.is_none());
    }

    #[test]
    fn parse_json_format() {
        let cli = Cli::try_parse_from(["taxon", "--format", "json", "cycles"]).unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
    }
}
