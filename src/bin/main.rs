//! Sieve CLI - print and run cohort queries
//!
//! Usage:
//!   sieve sql <config.json> [--node <key>] [--isolated]
//!   sieve run <config.json> (--database <file.db> | --connection <name>) [--cumulative] [--timeout <secs>]
//!   sieve cache stats|clear
//!
//! Node keys are `aggregate:<id>`, `container:<id>` or `joinable:<id>`.

use clap::{Parser, Subcommand};
use sieve::cache::SqliteResultCache;
use sieve::compiler::{CohortCompiler, QueryExecutor, SqliteExecutor};
use sieve::config::Settings;
use sieve::model::{CohortConfiguration, NodeKey};
use sieve::query::CohortQueryBuilder;
use sieve::worker::{WorkerClient, WorkerExecutor};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sieve")]
#[command(about = "Sieve - compile and run cohort identification queries")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to SIEVE_CONFIG, ./sieve.toml, then the user config dir)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the SQL for a cohort configuration
    Sql {
        /// Path to the configuration JSON
        file: PathBuf,

        /// Only this node (e.g. aggregate:3)
        #[arg(short, long)]
        node: Option<String>,

        /// Include parameter declarations
        #[arg(short, long)]
        isolated: bool,
    },

    /// Compile and execute every node
    Run {
        /// Path to the configuration JSON
        file: PathBuf,

        /// SQLite database to run against
        #[arg(short, long, conflicts_with = "connection")]
        database: Option<PathBuf>,

        /// Named connection from the settings file
        #[arg(short, long)]
        connection: Option<String>,

        /// Also execute every sub-container
        #[arg(long)]
        cumulative: bool,

        /// Per-query timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Inspect or empty the result cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    Stats,
    Clear,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = match Settings::load(cli.settings.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Sql {
            file,
            node,
            isolated,
        } => cmd_sql(&file, node.as_deref(), isolated),
        Commands::Run {
            file,
            database,
            connection,
            cumulative,
            timeout,
        } => cmd_run(&settings, &file, database, connection, cumulative, timeout),
        Commands::Cache { action } => cmd_cache(&settings, action),
    }
}

fn load_config(file: &Path) -> Option<CohortConfiguration> {
    match CohortConfiguration::from_json_file(file) {
        Ok(config) => Some(config),
        Err(e) => {
            eprintln!("Error reading '{}': {}", file.display(), e);
            None
        }
    }
}

fn parse_node(s: &str) -> Option<NodeKey> {
    let (kind, id) = s.split_once(':')?;
    let id: u32 = id.parse().ok()?;
    match kind {
        "aggregate" => Some(NodeKey::Leaf(id)),
        "container" => Some(NodeKey::SetOp(id)),
        "joinable" => Some(NodeKey::JoinSource(id)),
        _ => None,
    }
}

fn cmd_sql(file: &Path, node: Option<&str>, isolated: bool) -> ExitCode {
    let Some(config) = load_config(file) else {
        return ExitCode::FAILURE;
    };
    let builder = CohortQueryBuilder::new(&config);

    let key = match node {
        Some(s) => match parse_node(s) {
            Some(key) => key,
            None => {
                eprintln!("Invalid node '{}': expected aggregate:<id>, container:<id> or joinable:<id>", s);
                return ExitCode::FAILURE;
            }
        },
        None => NodeKey::SetOp(config.root.id),
    };

    match builder.node_sql(key) {
        Ok(sql) if isolated => {
            println!("{}", sql.isolated_sql);
            ExitCode::SUCCESS
        }
        Ok(sql) => {
            println!("{}", sql.nest_ready);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Query building error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_run(
    settings: &Settings,
    file: &Path,
    database: Option<PathBuf>,
    connection: Option<String>,
    cumulative: bool,
    timeout: Option<u64>,
) -> ExitCode {
    let Some(config) = load_config(file) else {
        return ExitCode::FAILURE;
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error starting runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        let executor = match make_executor(settings, database, connection).await {
            Ok(executor) => executor,
            Err(message) => {
                eprintln!("{}", message);
                return ExitCode::FAILURE;
            }
        };

        let mut options = settings.compiler_options();
        options.include_cumulative_totals |= cumulative;
        if let Some(secs) = timeout {
            options.timeout = std::time::Duration::from_secs(secs);
        }

        let mut compiler = CohortCompiler::new(Arc::new(config), executor).with_options(options);
        if settings.cache.enabled {
            match open_cache(settings) {
                Ok(cache) => compiler = compiler.with_cache(Arc::new(cache)),
                Err(message) => eprintln!("Warning: result cache disabled: {}", message),
            }
        }

        let report = match compiler.run_all().await {
            Ok(report) => report,
            Err(e) => {
                eprintln!("Compilation error: {}", e);
                return ExitCode::FAILURE;
            }
        };

        let mut failed = false;
        for (key, status) in &report {
            let name = compiler.config().node_name(*key).unwrap_or("?");
            let (key, state) = (key.to_string(), status.state.to_string());
            match (&status.row_count(), &status.error) {
                (Some(rows), _) => {
                    let cached = if status.from_cache { " (cached)" } else { "" };
                    println!("{:<16} {:<10} {:>8}  {}{}", key, state, rows, name, cached);
                }
                (None, Some(error)) => {
                    failed = true;
                    println!("{:<16} {:<10} {:>8}  {}: {}", key, state, "-", name, error);
                }
                (None, None) => println!("{:<16} {:<10} {:>8}  {}", key, state, "-", name),
            }
        }

        if failed {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }
    })
}

async fn make_executor(
    settings: &Settings,
    database: Option<PathBuf>,
    connection: Option<String>,
) -> Result<Arc<dyn QueryExecutor>, String> {
    if let Some(path) = database {
        return Ok(Arc::new(SqliteExecutor::new(path)));
    }
    let Some(name) = connection else {
        return Err("Either --database or --connection is required".to_string());
    };

    let conn = settings.get_connection(&name).map_err(|e| e.to_string())?;
    if conn.is_native() {
        let path = conn.resolved_connection_string().map_err(|e| e.to_string())?;
        return Ok(Arc::new(SqliteExecutor::new(path)));
    }

    let params = conn.connection_params().map_err(|e| e.to_string())?;
    let client = WorkerClient::spawn_with_settings(settings)
        .await
        .map_err(|e| format!("Error starting worker: {}", e))?;
    Ok(Arc::new(WorkerExecutor::new(Arc::new(client), params)))
}

fn open_cache(settings: &Settings) -> Result<SqliteResultCache, String> {
    let result = match settings.cache_path().map_err(|e| e.to_string())? {
        Some(path) => SqliteResultCache::open(path),
        None => SqliteResultCache::open_default(),
    };
    result.map_err(|e| e.to_string())
}

fn cmd_cache(settings: &Settings, action: CacheAction) -> ExitCode {
    let cache = match open_cache(settings) {
        Ok(cache) => cache,
        Err(message) => {
            eprintln!("Error opening result cache: {}", message);
            return ExitCode::FAILURE;
        }
    };

    match action {
        CacheAction::Stats => match cache.stats() {
            Ok(stats) => {
                println!("Entries:     {}", stats.entry_count);
                println!("Identifiers: {}", stats.identifier_count);
                println!("Size:        {} bytes", stats.total_size_bytes);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error reading result cache: {}", e);
                ExitCode::FAILURE
            }
        },
        CacheAction::Clear => match cache.clear_all() {
            Ok(removed) => {
                println!("Removed {} cached result(s)", removed);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error clearing result cache: {}", e);
                ExitCode::FAILURE
            }
        },
    }
}
