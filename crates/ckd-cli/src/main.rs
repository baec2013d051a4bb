mod commands;

use std::path::PathBuf;

use anyhow::Result;
use ckd_runtime::DEFAULT_LOG_LIMIT;
use clap::{Parser, Subcommand};
use commands::kitchen as k;

#[derive(Parser)]
#[command(name = "ckd")]
#[command(about = "Kitchen resource-contention and deadlock CLI", long_about = None)]
struct Cli {
    /// SQLite database file (falls back to CKD_DATABASE_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// YAML overlays applied on top of the built-in defaults, in order
    #[arg(long = "config", global = true)]
    config_paths: Vec<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Overlay paths in merge order (defaults are always the base)
        paths: Vec<String>,
    },

    /// Resource pool commands
    Resources {
        #[command(subcommand)]
        cmd: ResourcesCmd,
    },

    /// Order lifecycle commands
    Order {
        #[command(subcommand)]
        cmd: OrderCmd,
    },

    /// Run one allocation pass over pending orders
    Process,

    /// Wait-for cycle detection
    Detect,

    /// Banker's safety check
    Safe,

    /// Generate sequential orders, one allocation pass each
    Simulate {
        #[arg(long, default_value_t = 1)]
        steps: u32,
    },

    /// Drop every order and restore full availability
    Reset,

    /// Print the event log, oldest first
    Log {
        #[arg(long, default_value_t = DEFAULT_LOG_LIMIT)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations
    Migrate,
}

#[derive(Subcommand)]
enum ResourcesCmd {
    /// Print total / available / in-use per resource
    Show,

    /// Add capacity, creating resources that do not exist yet
    Add {
        /// NAME=QTY pairs
        #[arg(required = true)]
        resources: Vec<String>,
    },
}

#[derive(Subcommand)]
enum OrderCmd {
    /// Create an order and (by default) run an allocation pass
    Create {
        order_id: String,

        /// NAME=QTY pairs
        #[arg(required = true)]
        resources: Vec<String>,

        /// Lower runs first; configured default when omitted
        #[arg(long, allow_hyphen_values = true)]
        priority: Option<i64>,

        /// Leave the order pending
        #[arg(long, default_value_t = false)]
        no_process: bool,
    },

    /// Return an order's resources and delete it
    Release { order_id: String },

    /// Abandon an order
    Abort { order_id: String },

    /// Forcibly reclaim an order's resources
    Preempt { order_id: String },

    /// Change an order's priority
    Reschedule {
        order_id: String,

        #[arg(long, allow_hyphen_values = true)]
        priority: i64,
    },

    /// List allocated and pending orders
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let path = commands::resolve_db_path(cli.db)?;
            let store = ckd_db::SqliteStore::connect(&path).await?;
            match cmd {
                DbCmd::Status => {
                    let s = store.status().await?;
                    println!(
                        "db_ok={} has_resources_table={}",
                        s.ok, s.has_resources_table
                    );
                }
                DbCmd::Migrate => {
                    store.migrate().await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = ckd_config::load_kitchen_config(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        other => {
            let path = commands::resolve_db_path(cli.db)?;
            let kitchen = commands::open_kitchen(&path, &cli.config_paths).await?;
            run_kitchen_command(&kitchen, other).await?;
        }
    }

    Ok(())
}

async fn run_kitchen_command(kitchen: &ckd_runtime::Kitchen, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Resources { cmd } => match cmd {
            ResourcesCmd::Show => k::resources_show(kitchen).await,
            ResourcesCmd::Add { resources } => {
                let additions = commands::parse_resource_args(&resources)?;
                k::resources_add(kitchen, &additions).await
            }
        },

        Commands::Order { cmd } => match cmd {
            OrderCmd::Create {
                order_id,
                resources,
                priority,
                no_process,
            } => {
                let request = commands::parse_resource_args(&resources)?;
                k::order_create(kitchen, &order_id, request, priority, !no_process).await
            }
            OrderCmd::Release { order_id } => k::order_release(kitchen, &order_id).await,
            OrderCmd::Abort { order_id } => k::order_abort(kitchen, &order_id).await,
            OrderCmd::Preempt { order_id } => k::order_preempt(kitchen, &order_id).await,
            OrderCmd::Reschedule { order_id, priority } => {
                k::order_reschedule(kitchen, &order_id, priority).await
            }
            OrderCmd::List => k::order_list(kitchen).await,
        },

        Commands::Process => k::process(kitchen).await,
        Commands::Detect => k::detect(kitchen).await,
        Commands::Safe => k::safe(kitchen).await,
        Commands::Simulate { steps } => k::simulate(kitchen, steps).await,
        Commands::Reset => k::reset(kitchen).await,
        Commands::Log { limit } => k::log(kitchen, limit).await,

        Commands::Db { .. } | Commands::ConfigHash { .. } => {
            anyhow::bail!("not a kitchen command")
        }
    }
}

/// Logs go to stderr so stdout stays `key=value`.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
