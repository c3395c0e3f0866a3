use std::fs;
use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use bibstack::config::ServiceConfig;
use bibstack::store::{SqliteStore, Store};
use bibstack::sync::{self, Directory, HttpDirectory, SqliteDirectory};

#[derive(Parser)]
#[command(name = "bibstack")]
#[command(about = "Persistence and identity layer for shared document libraries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Create the database schema
    Init {
        /// Data directory for the database
        #[arg(long, default_value = "./data")]
        data_dir: String,
    },

    /// Drop the database schema, destroying all stored data
    Destroy {
        /// Data directory for the database
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Confirm the destruction
        #[arg(long)]
        yes: bool,
    },

    /// Run one reconciliation pass against the identity directory
    Sync {
        /// Data directory for the database
        #[arg(long)]
        data_dir: Option<String>,

        /// TOML config file supplying defaults for the other flags
        #[arg(long)]
        config: Option<PathBuf>,

        /// HTTP endpoint returning a JSON array of identity numbers
        #[arg(long)]
        directory_url: Option<String>,

        /// Path to the upstream accounts database file
        #[arg(long)]
        directory_db: Option<PathBuf>,
    },
}

fn run_init(data_dir: String) -> anyhow::Result<()> {
    let data_path: PathBuf = data_dir.into();
    fs::create_dir_all(&data_path)?;

    let db_path = data_path.join("bibstack.db");
    let store = SqliteStore::new(&db_path)?;
    store.initialize()?;

    println!("Database initialized at {}", db_path.display());
    Ok(())
}

fn run_destroy(data_dir: String, yes: bool) -> anyhow::Result<()> {
    let db_path = PathBuf::from(data_dir).join("bibstack.db");

    if !yes {
        bail!(
            "This drops every table in {}. Re-run with --yes to confirm.",
            db_path.display()
        );
    }
    if !db_path.exists() {
        bail!("No database at {}", db_path.display());
    }

    let store = SqliteStore::new(&db_path)?;
    store.destroy()?;

    println!("Database destroyed at {}", db_path.display());
    Ok(())
}

fn run_sync(
    data_dir: Option<String>,
    config: Option<PathBuf>,
    directory_url: Option<String>,
    directory_db: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut cfg = match config {
        Some(path) => ServiceConfig::load(&path)?,
        None => ServiceConfig::default(),
    };
    if let Some(dir) = data_dir {
        cfg.data_dir = dir.into();
    }
    if let Some(url) = directory_url {
        cfg.directory_url = Some(url);
    }
    if let Some(path) = directory_db {
        cfg.directory_db = Some(path);
    }

    let db_path = cfg.db_path();
    if !db_path.exists() {
        bail!(
            "No database at {}. Run 'bibstack admin init' first.",
            db_path.display()
        );
    }
    let store = SqliteStore::new(&db_path)?;

    let directory: Box<dyn Directory> = if let Some(path) = &cfg.directory_db {
        Box::new(SqliteDirectory::new(path))
    } else if let Some(url) = &cfg.directory_url {
        Box::new(HttpDirectory::new(url.clone())?)
    } else {
        bail!("No identity directory configured; pass --directory-db or --directory-url.");
    };

    info!("starting reconciliation");
    let report = sync::run(&store, directory.as_ref())?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Logs on stderr; stdout carries command output (e.g. the sync report).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("bibstack=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Admin { command } => match command {
            AdminCommands::Init { data_dir } => run_init(data_dir)?,
            AdminCommands::Destroy { data_dir, yes } => run_destroy(data_dir, yes)?,
            AdminCommands::Sync {
                data_dir,
                config,
                directory_url,
                directory_db,
            } => run_sync(data_dir, config, directory_url, directory_db)?,
        },
    }

    Ok(())
}
