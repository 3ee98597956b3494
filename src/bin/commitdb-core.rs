use clap::{Parser, Subcommand};
use commitdb_core::compaction::CompactionPolicy;
use commitdb_core::engine::{Backend, Engine, EngineConfig};
use commitdb_core::merge::MergeOutcome;
use commitdb_core::pending_merge::{ConflictKey, Resolution};
use commitdb_core::{Identity, MergeStrategy};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "commitdb-core",
    version,
    about = "Content-addressed, version-controlled row storage with three-way merge"
)]
struct Cli {
    /// Repository path (default: ./commitdb.db)
    #[arg(long, default_value = "commitdb.db")]
    repo: PathBuf,

    /// Author identity, "Name <email>", for any commit this invocation creates
    #[arg(long, default_value = "commitdb <commitdb@localhost>")]
    author: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new repository
    Init,
    /// Store a row
    Put {
        db: String,
        table: String,
        key: String,
        value: String,
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Retrieve a row
    Get {
        db: String,
        table: String,
        key: String,
        /// Read at a specific commit instead of the current branch HEAD
        #[arg(long)]
        at: Option<String>,
    },
    /// Delete a row
    Delete {
        db: String,
        table: String,
        key: String,
        #[arg(short, long)]
        message: Option<String>,
    },
    /// List every row in a table
    Scan { db: String, table: String },
    /// List tables in a database
    Tables { db: String },
    /// List databases
    Databases,
    /// Show commit history reachable from a revision
    Log {
        #[arg(default_value = "HEAD")]
        from: String,
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Create a branch at the current HEAD
    Branch { name: String },
    /// Switch to a branch
    Checkout { name: String },
    /// List all branches
    Branches,
    /// Delete a branch
    DeleteBranch { name: String },
    /// Rename a branch
    RenameBranch { from: String, to: String },
    /// Merge a branch into the current one
    Merge {
        branch: String,
        /// fast-forward-only, row-level (last-writer-wins), or manual
        #[arg(long, default_value = "row-level")]
        strategy: String,
    },
    /// Resolve one conflicted row from a pending manual merge
    ResolveConflict {
        db: String,
        table: String,
        key: String,
        /// Blob hash to keep instead of auto-merging; omit with --delete
        #[arg(long)]
        keep: Option<String>,
        #[arg(long)]
        delete: bool,
    },
    /// Finish a pending merge once every conflict is resolved
    CompleteMerge {
        #[arg(short, long, default_value = "merge")]
        message: String,
    },
    /// Abandon a pending merge, discarding recorded resolutions
    AbortMerge,
    /// Show the pending merge's remaining conflicts, if any
    MergeStatus,
    /// Create a tag
    Tag {
        name: String,
        #[arg(long)]
        commit: Option<String>,
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Hard-reset the current branch to a tag's commit
    Recover { tag: String },
    /// Selectively hard-reset a database/table (or everything) to its state
    /// at a prior transaction
    Restore {
        txn: String,
        /// Restrict the restore to one database (omit to restore everything)
        #[arg(long)]
        db: Option<String>,
        /// Restrict the restore to one table within --db
        #[arg(long, requires = "db")]
        table: Option<String>,
        #[arg(short, long, default_value = "restore")]
        message: String,
    },
    /// Create a secondary index on a JSON field across all rows
    CreateIndex { name: String, field: String },
    /// Drop a secondary index
    DropIndex { name: String },
    /// Query a secondary index by exact value
    QueryIndex { name: String, value: String },
    /// List secondary indexes
    Indexes,
    /// Report commits a compaction policy would reclaim
    Compact {
        #[arg(long, default_value = "0")]
        max_versions: usize,
        #[arg(long)]
        max_age_days: Option<u64>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let identity = Identity::parse(&cli.author);

    let result = run(&cli.repo, identity, cli.command);
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(repo: &Path, identity: Identity, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Init => {
            Engine::init(EngineConfig {
                backend: Backend::File { base_dir: repo.to_path_buf() },
                identity,
            })?;
            println!("Initialized commitdb repository at {}", repo.display());
            Ok(())
        }
        other => {
            let engine = Engine::open(EngineConfig {
                backend: Backend::File { base_dir: repo.to_path_buf() },
                identity,
            })?;
            dispatch(&engine, other)
        }
    }
}

fn dispatch(engine: &Engine, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Init => unreachable!("handled in run"),
        Commands::Put { db, table, key, value, message } => {
            let mut txn = engine.begin()?;
            txn.add_put(db, table, key, value.into_bytes())?;
            let outcome = engine.commit_txn(txn, message.unwrap_or_else(|| "put".into()))?;
            print_outcome(&outcome);
            Ok(())
        }
        Commands::Get { db, table, key, at } => {
            let row = match &at {
                Some(commit) => engine.get_row_at(commit, &db, &table, &key)?,
                None => engine.get_row(&db, &table, &key)?,
            };
            match row {
                Some(bytes) => println!("{}", String::from_utf8_lossy(&bytes)),
                None => println!("(not found)"),
            }
            Ok(())
        }
        Commands::Delete { db, table, key, message } => {
            let mut txn = engine.begin()?;
            txn.add_del(db, table, key)?;
            let outcome = engine.commit_txn(txn, message.unwrap_or_else(|| "delete".into()))?;
            print_outcome(&outcome);
            Ok(())
        }
        Commands::Scan { db, table } => {
            let rows = engine.scan(&db, &table)?;
            if rows.is_empty() {
                println!("(no rows)");
            }
            for (key, value) in rows {
                println!("{key} = {}", String::from_utf8_lossy(&value));
            }
            Ok(())
        }
        Commands::Tables { db } => {
            for t in engine.list_tables(&db)? {
                println!("{t}");
            }
            Ok(())
        }
        Commands::Databases => {
            for d in engine.list_databases()? {
                println!("{d}");
            }
            Ok(())
        }
        Commands::Log { from, limit } => {
            let log = engine.log(&from)?;
            if log.is_empty() {
                println!("(no commits yet)");
            }
            for (id, commit) in log.iter().take(limit) {
                println!(
                    "{} {} {}",
                    &id[..8.min(id.len())],
                    commit.commit_time().format("%Y-%m-%d %H:%M:%S"),
                    commit.message,
                );
            }
            Ok(())
        }
        Commands::Branch { name } => {
            engine.create_branch(&name)?;
            println!("Created branch '{name}'");
            Ok(())
        }
        Commands::Checkout { name } => {
            engine.checkout(&name)?;
            println!("Switched to branch '{name}'");
            Ok(())
        }
        Commands::Branches => {
            let current = engine.current_branch().ok();
            let mut branches = engine.list_branches();
            branches.sort();
            for b in branches {
                if Some(&b) == current.as_ref() {
                    println!("* {b}");
                } else {
                    println!("  {b}");
                }
            }
            Ok(())
        }
        Commands::DeleteBranch { name } => {
            engine.delete_branch(&name)?;
            println!("Deleted branch '{name}'");
            Ok(())
        }
        Commands::RenameBranch { from, to } => {
            engine.rename_branch(&from, &to)?;
            println!("Renamed branch '{from}' to '{to}'");
            Ok(())
        }
        Commands::Merge { branch, strategy } => {
            let strategy = parse_strategy(&strategy)?;
            match engine.merge(&branch, strategy)? {
                MergeOutcome::Completed(id) => println!("Merge complete: [{}]", &id[..8.min(id.len())]),
                MergeOutcome::Pending(pending) => {
                    println!(
                        "Merge pending: {} conflict(s) need resolution (merge id {})",
                        pending.unresolved.len(),
                        pending.merge_id
                    );
                    for c in &pending.unresolved {
                        println!("  {}/{}/{}", c.db, c.table, c.key);
                    }
                }
                MergeOutcome::AlreadyUpToDate => println!("Already up to date"),
            }
            Ok(())
        }
        Commands::ResolveConflict { db, table, key, keep, delete } => {
            let resolution = match (keep, delete) {
                (Some(hash), false) => Resolution::Keep(hash),
                (None, true) => Resolution::Delete,
                _ => return Err("specify exactly one of --keep <hash> or --delete".into()),
            };
            engine.resolve_conflict(&ConflictKey { db, table, key }, resolution)?;
            println!("Resolved");
            Ok(())
        }
        Commands::CompleteMerge { message } => {
            let id = engine.complete_merge(message)?;
            println!("Merge committed: [{}]", &id[..8.min(id.len())]);
            Ok(())
        }
        Commands::AbortMerge => {
            engine.abort_merge()?;
            println!("Merge aborted");
            Ok(())
        }
        Commands::MergeStatus => match engine.pending_merge() {
            Some(pending) if !pending.is_fully_resolved() => {
                println!("{} conflict(s) remain:", pending.unresolved.len());
                for c in &pending.unresolved {
                    println!("  {}/{}/{}", c.db, c.table, c.key);
                }
            }
            Some(_) => println!("All conflicts resolved; run complete-merge"),
            None => println!("(no merge in progress)"),
        },
        Commands::Tag { name, commit, message } => {
            engine.tag(&name, commit.as_deref(), message)?;
            println!("Tagged '{name}'");
            Ok(())
        }
        Commands::Recover { tag } => {
            let id = engine.recover(&tag)?;
            println!("Recovered to [{}]", &id[..8.min(id.len())]);
            Ok(())
        }
        Commands::Restore { txn, db, table, message } => {
            let outcome = engine.restore(&txn, db.as_deref(), table.as_deref(), message)?;
            print_outcome(&outcome);
            Ok(())
        }
        Commands::CreateIndex { name, field } => {
            engine.create_index(&name, &field)?;
            println!("Created index '{name}' on field '{field}'");
            Ok(())
        }
        Commands::DropIndex { name } => {
            engine.drop_index(&name)?;
            println!("Dropped index '{name}'");
            Ok(())
        }
        Commands::QueryIndex { name, value } => {
            let keys = engine.query_index(&name, &value)?;
            if keys.is_empty() {
                println!("(no matches)");
            }
            for k in keys {
                println!("{k}");
            }
            Ok(())
        }
        Commands::Indexes => {
            for name in engine.list_indexes() {
                println!("{name}");
            }
            Ok(())
        }
        Commands::Compact { max_versions, max_age_days } => {
            let policy = CompactionPolicy { max_versions, max_age_days };
            let result = engine.compact(&policy)?;
            print!("{result}");
            Ok(())
        }
    }
}

fn print_outcome(outcome: &commitdb_core::commits::Outcome) {
    match outcome {
        commitdb_core::commits::Outcome::Created(id) => println!("[{}]", &id[..8.min(id.len())]),
        commitdb_core::commits::Outcome::Unchanged => println!("(no change)"),
    }
}

fn parse_strategy(s: &str) -> Result<MergeStrategy, Box<dyn std::error::Error>> {
    match s {
        "fast-forward-only" | "ff" => Ok(MergeStrategy::FastForwardOnly),
        "row-level" | "lww" => Ok(MergeStrategy::RowLevel),
        "manual" => Ok(MergeStrategy::Manual),
        other => Err(format!("unknown merge strategy '{other}'").into()),
    }
}
