// repolens CLI - register repositories, build indexes, and query them

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use repolens::{
    create_engine, init_logging_with_level, CodeHit, EngineConfig, IndexProgress, RepoId,
    RepoScope, SearchOptions, SymbolKind, SymbolQueryOptions, SyncRequest,
};

#[derive(Parser)]
#[command(
    name = "repolens",
    about = "Repository indexing engine serving symbol and content queries",
    version
)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true, env = "REPOLENS_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a working tree for indexing
    Register {
        /// Path to the repository root
        path: PathBuf,
    },
    /// Remove a repository from the registry (the index stays on disk)
    Deregister {
        /// Repository id or a path inside the working tree
        target: String,
    },
    /// List registered repositories
    List,
    /// Build or refresh the index for a repository
    Index {
        /// Repository id or a path inside the working tree
        target: String,
        /// Force a full rebuild even when incremental would do
        #[arg(long)]
        full: bool,
    },
    /// Ranked full-text code search
    Search {
        query: String,
        /// Restrict to one language tag
        #[arg(long)]
        language: Option<String>,
        /// Restrict to one repository id
        #[arg(long)]
        repo: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Consult the semantic back end first
        #[arg(long)]
        semantic: bool,
    },
    /// Symbol definition lookup
    Symbol {
        name: String,
        /// Restrict to one symbol kind (class, function, method, ...)
        #[arg(long)]
        kind: Option<String>,
        /// Restrict to one repository id
        #[arg(long)]
        repo: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Pack the active snapshot into the configured artifact store
    Pack {
        /// Repository id or a path inside the working tree
        target: String,
    },
    /// Report engine and per-repository readiness
    Status,
    /// Watch registered repositories and keep indexes in sync
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging_with_level(cli.verbose, cli.quiet)?;

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let engine = create_engine(config, None)?;

    match cli.command {
        Commands::Register { path } => {
            let repo = engine.registry.register(&path)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&repo)?);
            } else {
                println!("registered {} at {}", repo.repo_id, repo.root_path.display());
            }
        }

        Commands::Deregister { target } => {
            let repo_id = resolve_target(&engine, &target)?;
            let repo = engine.registry.deregister(&repo_id)?;
            if !cli.quiet {
                println!(
                    "deregistered {}; index remains at {}",
                    repo.repo_id,
                    repo.index_dir.display()
                );
            }
        }

        Commands::List => {
            let repos = engine.registry.list()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&repos)?);
            } else if repos.is_empty() {
                println!("no repositories registered");
            } else {
                for repo in repos {
                    println!(
                        "{}  {}  branch={}  indexed={}",
                        repo.repo_id,
                        repo.root_path.display(),
                        repo.current_branch.as_deref().unwrap_or("-"),
                        repo.last_indexed_commit
                            .as_deref()
                            .map(|c| &c[..c.len().min(12)])
                            .unwrap_or("never"),
                    );
                }
            }
        }

        Commands::Index { target, full } => {
            let repo_id = resolve_target(&engine, &target)?;
            let quiet = cli.quiet;
            let progress: repolens::ProgressCallback = Arc::new(move |p: &IndexProgress| {
                if !quiet {
                    eprintln!(
                        "  {}/{} files ({:.0}/s, eta {:.0}s)",
                        p.done,
                        p.total,
                        p.rate,
                        p.eta.as_secs_f64()
                    );
                }
            });
            let outcome = engine
                .index_manager
                .sync_with(&repo_id, full, Some(progress))
                .await?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "action": format!("{:?}", outcome.action),
                        "commit": outcome.commit,
                        "report": outcome.report,
                    })
                );
            } else {
                println!("{repo_id}: {:?}", outcome.action);
                if let Some(report) = outcome.report {
                    println!(
                        "  {} indexed, {} skipped, {} symbols, {} references in {} ms",
                        report.files_indexed,
                        report.files_skipped,
                        report.symbols_extracted,
                        report.references_recorded,
                        report.elapsed_ms
                    );
                }
            }
        }

        Commands::Search {
            query,
            language,
            repo,
            limit,
            semantic,
        } => {
            let repo_scope = match repo {
                Some(raw) => RepoScope::One(RepoId::parse(&raw)?),
                None => RepoScope::All,
            };
            let response = engine
                .dispatcher
                .search_code(
                    &query,
                    &SearchOptions {
                        semantic,
                        language,
                        repo_scope,
                        limit,
                    },
                )
                .await?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "partial": response.partial, "hits": response.hits })
                );
            } else {
                if response.partial {
                    eprintln!("(partial results: query deadline exceeded)");
                }
                print_code_hits(&response.hits);
            }
        }

        Commands::Symbol {
            name,
            kind,
            repo,
            limit,
        } => {
            let kind = match kind.as_deref() {
                Some(raw) => Some(SymbolKind::parse(raw).ok_or_else(|| {
                    anyhow::anyhow!("unknown symbol kind {raw:?}")
                })?),
                None => None,
            };
            let repo_scope = match repo {
                Some(raw) => RepoScope::One(RepoId::parse(&raw)?),
                None => RepoScope::All,
            };
            let hits = engine
                .dispatcher
                .lookup_symbol(
                    &name,
                    &SymbolQueryOptions {
                        kind,
                        repo_scope,
                        limit,
                    },
                )
                .await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if hits.is_empty() {
                println!("no definitions found for {name}");
            } else {
                for hit in hits {
                    println!(
                        "{}:{}  {}  {}  {}",
                        hit.rel_path,
                        hit.line,
                        hit.kind,
                        hit.name,
                        hit.signature.as_deref().unwrap_or(""),
                    );
                }
            }
        }

        Commands::Pack { target } => {
            let repo_id = resolve_target(&engine, &target)?;
            let archive = engine.index_manager.pack_current(&repo_id)?;
            if !cli.quiet {
                println!("packed {} -> {}", repo_id, archive.display());
            }
        }

        Commands::Status => {
            let report = engine.dispatcher.status().await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "storage_ok={}  plugins_loaded={}  semantic_available={}",
                    report.storage_ok, report.plugins_loaded, report.semantic_available
                );
                for repo in report.repos {
                    println!(
                        "  {}  {}  snapshot={}  files={}  symbols={}",
                        repo.repo_id,
                        repo.root_path.display(),
                        if repo.snapshot_present { "yes" } else { "missing" },
                        repo.file_count,
                        repo.symbol_count
                    );
                }
            }
        }

        Commands::Watch => {
            let repos = engine.registry.list()?;
            if repos.is_empty() {
                anyhow::bail!("no repositories registered; run `repolens register` first");
            }
            let (tx, mut rx) = tokio::sync::mpsc::channel::<SyncRequest>(64);
            let handle = repolens::watcher::spawn(repos, &engine.config, tx)?;
            if !cli.quiet {
                println!("watching; ctrl-c to stop");
            }

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    maybe_request = rx.recv() => {
                        let Some(request) = maybe_request else { break };
                        if !cli.quiet {
                            println!("sync {} ({:?})", request.repo_id, request.reason);
                        }
                        if let Err(e) = engine.index_manager.sync(&request.repo_id).await {
                            eprintln!("sync failed for {}: {e:#}", request.repo_id);
                        }
                    }
                }
            }
            handle.stop().await;
        }
    }

    Ok(())
}

/// Accept either a repository id or any path inside a registered tree.
fn resolve_target(engine: &repolens::Engine, target: &str) -> Result<RepoId> {
    if let Ok(repo_id) = RepoId::parse(target) {
        if engine.registry.lookup(&repo_id).is_ok() {
            return Ok(repo_id);
        }
    }
    Ok(engine.registry.lookup_by_path(target)?.repo_id)
}

fn print_code_hits(hits: &[CodeHit]) {
    if hits.is_empty() {
        println!("no matches");
        return;
    }
    for hit in hits {
        let repo = hit
            .repo_id
            .as_ref()
            .map(|r| format!("{r}:"))
            .unwrap_or_default();
        println!(
            "{}{}:{}  [{:.2}] {}",
            repo, hit.rel_path, hit.line, hit.score, hit.snippet
        );
    }
}
