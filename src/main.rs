use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use folio::commit::{CommitOptions, CommitOutcome, ObjectChangeset};
use folio::config::FolioConfig;
use folio::index::IndexId;
use folio::object::SpecRegistry;
use folio::{Worker, telemetry};
use folio_git::Signature;

/// Structured datasets in git working copies
///
/// Objects are JSON (`*.json`) and TOML (`*.toml`) files under a dataset
/// directory. Every command loads the dataset and builds its index first.
///
/// EXAMPLES:
///
///   folio --dataset data index
///   folio --dataset data query 'obj.year >= 2000 && obj.tags.includes("maps")'
///   folio --dataset data get /maps/atlas.json
///   folio --dataset data put /maps/atlas.json '{"year": 2004}' -m "Add atlas"
///   folio --dataset data versions /maps/atlas.json HEAD HEAD~1
#[derive(Parser)]
#[command(name = "folio")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'folio <command> --help' for more information on a specific command.")]
struct Cli {
    #[command(flatten)]
    target: Target,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// Working copy root
    #[arg(long, short = 'C', global = true, default_value = ".")]
    repo: PathBuf,

    /// Dataset directory, relative to the working copy
    #[arg(long, short = 'd', global = true, default_value = "")]
    dataset: String,
}

#[derive(Args)]
struct CommitArgs {
    /// Commit message
    #[arg(long, short = 'm')]
    message: String,

    /// Author name (defaults to `[author]` in .folio/config.toml)
    #[arg(long, env = "FOLIO_AUTHOR_NAME")]
    author_name: Option<String>,

    /// Author email (defaults to `[author]` in .folio/config.toml)
    #[arg(long, env = "FOLIO_AUTHOR_EMAIL")]
    author_email: Option<String>,

    /// Fail instead of waiting when another operation holds the working copy
    #[arg(long)]
    no_wait: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a git repository at the working copy root
    Init,

    /// Build the default index and print its status
    Index,

    /// Print the object paths a predicate accepts, in path order
    ///
    /// The predicate is an expression over `obj`, for example
    /// `obj.status === "published"`. It must evaluate to a boolean.
    Query {
        /// Predicate expression
        expression: String,
    },

    /// Print objects as JSON (null for absent ones)
    Get {
        /// Object paths, relative to the dataset
        #[arg(required = true)]
        paths: Vec<String>,

        /// Resolve LFS pointers from .git/lfs/objects
        #[arg(long)]
        lfs: bool,
    },

    /// Write an object and commit it
    Put {
        /// Object path, relative to the dataset
        path: String,

        /// New value as JSON
        value: String,

        #[command(flatten)]
        commit: CommitArgs,
    },

    /// Delete an object and commit the deletion
    Delete {
        /// Object path, relative to the dataset
        path: String,

        #[command(flatten)]
        commit: CommitArgs,
    },

    /// Print an object as of each revision
    Versions {
        /// Object path, relative to the dataset
        path: String,

        /// Revisions (`HEAD`, `HEAD~1`, a commit hash, ...)
        #[arg(required = true)]
        revisions: Vec<String>,
    },
}

fn main() -> Result<()> {
    let _telemetry = telemetry::init();
    let cli = Cli::parse();
    let work_dir = cli.target.repo.as_path();
    let config = FolioConfig::load(work_dir)?;
    let worker = Worker::new(config.worker.clone());

    if matches!(cli.command, Commands::Init) {
        worker.init_repository(work_dir)?;
        println!("initialized {}", work_dir.display());
        return Ok(());
    }

    let dataset = cli.target.dataset.as_str();
    let cache_root = config
        .cache
        .dataset_root(work_dir, &folio::paths::normalize_dataset_dir(dataset)?);
    let count = worker
        .load(work_dir, dataset, SpecRegistry::builtin(), &cache_root)
        .context("could not index dataset")?;

    match cli.command {
        Commands::Init => Ok(()),
        Commands::Index => {
            let status = worker.describe_index(work_dir, dataset, &IndexId::Default)?;
            tracing::debug!(count, "indexed");
            print_json(&status.initial)
        }
        Commands::Query { expression } => query(&worker, work_dir, dataset, &expression),
        Commands::Get { paths, lfs } => {
            print_json(&worker.get_object_dataset(work_dir, dataset, &paths, lfs)?)
        }
        Commands::Put {
            path,
            value,
            commit,
        } => {
            let value = serde_json::from_str(&value).context("value is not valid JSON")?;
            write(&worker, &config, work_dir, dataset, &path, Some(value), &commit)
        }
        Commands::Delete { path, commit } => {
            write(&worker, &config, work_dir, dataset, &path, None, &commit)
        }
        Commands::Versions { path, revisions } => {
            print_json(&worker.read_object_versions(work_dir, dataset, &path, &revisions)?)
        }
    }
}

fn query(worker: &Worker, work_dir: &Path, dataset: &str, expression: &str) -> Result<()> {
    let id = worker.get_or_create_filtered_index(work_dir, dataset, expression)?;
    let mut position = 0;
    while let Some(path) = worker.get_indexed_object(work_dir, dataset, &id, position)? {
        println!("{path}");
        position += 1;
    }
    Ok(())
}

fn write(
    worker: &Worker,
    config: &FolioConfig,
    work_dir: &Path,
    dataset: &str,
    path: &str,
    value: Option<serde_json::Value>,
    args: &CommitArgs,
) -> Result<()> {
    let author = author(config, args)?;
    let current = worker
        .get_object_dataset(work_dir, dataset, &[path], false)?
        .into_values()
        .next()
        .flatten();
    let changes = ObjectChangeset::new().with(path, current, value);
    let mut options = CommitOptions::new(author, &args.message);
    if args.no_wait {
        options = options.failing_if_busy();
    }
    match worker.update_objects(work_dir, dataset, &changes, &options)? {
        CommitOutcome::Committed { commit, .. } => {
            println!("{commit}");
            Ok(())
        }
        CommitOutcome::Conflicted(conflicts) => {
            for (path, status) in &conflicts {
                eprintln!("conflict: {path} was {status} concurrently");
            }
            bail!("nothing committed")
        }
    }
}

fn author(config: &FolioConfig, args: &CommitArgs) -> Result<Signature> {
    let fallback = config.author.as_ref();
    let name = args
        .author_name
        .clone()
        .or_else(|| fallback.map(|a| a.name.clone()));
    let email = args
        .author_email
        .clone()
        .or_else(|| fallback.map(|a| a.email.clone()));
    match (name, email) {
        (Some(name), Some(email)) => Ok(Signature::new(name, email)),
        _ => bail!("no commit author: pass --author-name and --author-email or set [author] in .folio/config.toml"),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
