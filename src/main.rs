use std::path::{Path, PathBuf};

use archivist::{
    config::ArchivistConfig,
    observability,
    retention::{ArchivalWorker, start_archival_worker},
};
use clap::Parser;

const DEFAULT_CONFIG_PATH: &str = "archivist.toml";

#[derive(Parser, Debug)]
#[command(version, about = "Scheduled data-retention archival worker", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./archivist.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run archival jobs on the configured interval (default)
    Run,
    /// Execute a single archival run and exit
    ///
    /// Exits with a non-zero status if any job aborted.
    Once {
        /// Print the run report as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration file and exit
    Check,
    /// Initialize a new configuration file
    Init {
        /// Path to create the config file (defaults to ./archivist.toml)
        #[arg(short, long)]
        output: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Export the JSON schema for the configuration file
    Schema {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Show enabled compile-time features
    Features,
}

/// Starter configuration written by `init`.
/// Archives a local SQLite table to CSV files on disk, with deletes disabled
/// by `dry_run` until the operator opts in.
fn default_config_toml() -> &'static str {
    r#"# Archivist configuration
# Generated by `archivist init`

[scheduler]
# Minutes between two runs
interval_minutes = 1440
# Steps run in this order for every job
instructions = "to_azure, delete"

# Store that holds the rows to archive
[source]
type = "sqlite"
path = "archivist.db"

# Exports are written as <path>/<container_name>/<blob name>
[blob]
type = "filesystem"
path = "./archive"
container_name = "archive"

# Azure Blob Storage instead of the local filesystem
# [blob]
# type = "azure"
# container_name = "archive"
# sas_url = "https://myaccount.blob.core.windows.net"
# sas_token = "${AZURE_SAS_TOKEN}"

# Enable to_db by adding it to the instructions and a backup store
# [backup_db]
# type = "postgres"
# host = "localhost"
# username = "archiver"
# password = "${BACKUP_DB_PASSWORD}"
# database = "archive"

# Delete steps only log what they would remove until this is turned off
[safety]
dry_run = true

[[jobs]]
table_names = "sensor_a"
backup_duration_days = 7
blob_names = "sensor_a.csv"
# backup_table_names = "sensor_a_archive"

[observability.logging]
level = "info"
format = "compact"
"#
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config_path = PathBuf::from(args.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH));

    match args.command {
        Some(Command::Schema { output }) => {
            #[cfg(feature = "json-schema")]
            run_schema_export(output);
            #[cfg(not(feature = "json-schema"))]
            {
                let _ = output;
                eprintln!("Error: JSON schema export requires the 'json-schema' feature");
                std::process::exit(1);
            }
        }
        Some(Command::Init { output, force }) => {
            run_init_default(output, force);
        }
        Some(Command::Features) => {
            run_features();
        }
        Some(Command::Check) => {
            run_check(&config_path);
        }
        Some(Command::Once { json }) => {
            run_once(config_path, json).await;
        }
        Some(Command::Run) | None => {
            run_worker(config_path).await;
        }
    }
}

/// Load the config file or exit with the parse error.
fn load_config(config_path: &Path) -> ArchivistConfig {
    match ArchivistConfig::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &ArchivistConfig) {
    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }
}

/// Run the scheduled worker until interrupted.
async fn run_worker(config_path: PathBuf) {
    let config = load_config(&config_path);
    init_tracing(&config);

    let worker = ArchivalWorker::new(config_path);

    tokio::select! {
        result = start_archival_worker(&worker) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Archival worker stopped");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping archival worker");
        }
    }
}

/// Execute one run now and report the outcome.
async fn run_once(config_path: PathBuf, json: bool) {
    let config = load_config(&config_path);
    init_tracing(&config);

    let worker = ArchivalWorker::new(config_path);
    let report = match worker.run_config(&config, None).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "Archival run failed");
            std::process::exit(1);
        }
    };

    if json {
        match report.to_json() {
            Ok(content) => println!("{}", content),
            Err(e) => {
                eprintln!("Failed to serialize run report: {}", e);
                std::process::exit(1);
            }
        }
    }

    if !report.is_success() {
        std::process::exit(1);
    }
}

/// Validate the config file and print a short summary.
fn run_check(config_path: &Path) {
    let config = load_config(config_path);

    let instructions: Vec<String> = config
        .scheduler
        .instructions
        .iter()
        .map(ToString::to_string)
        .collect();

    println!("Config OK: {}", config_path.display());
    println!("  interval:     {} minutes", config.scheduler.interval_minutes);
    println!("  instructions: {}", instructions.join(", "));
    println!("  source:       {}", config.source.backend_name());
    if let Some(backup) = &config.backup_db {
        println!("  backup_db:    {}", backup.backend_name());
    }
    if let Some(blob) = &config.blob {
        println!("  blob:         container '{}'", blob.container_name());
    }
    if config.safety.dry_run {
        println!("  dry_run:      enabled");
    }
    for job in &config.jobs {
        println!(
            "  job {}: {} table(s), {} day(s), column {}",
            job.display_name(),
            job.table_names.len(),
            job.backup_duration_days,
            job.timestamp_column
        );
    }
}

/// Create a default configuration file.
fn run_init_default(output: Option<String>, force: bool) {
    let output_path = PathBuf::from(output.as_deref().unwrap_or(DEFAULT_CONFIG_PATH));

    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        std::process::exit(1);
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        std::process::exit(1);
    }

    if let Err(e) = std::fs::write(&output_path, default_config_toml()) {
        eprintln!("Failed to write config file: {}", e);
        std::process::exit(1);
    }

    println!("Created config file: {}", output_path.display());
    println!();
    println!("To validate it, run:");
    println!("  archivist check --config {}", output_path.display());
    println!();
    println!("To start the worker, run:");
    println!("  archivist run --config {}", output_path.display());
}

/// Export JSON schema for the configuration file to file or stdout
#[cfg(feature = "json-schema")]
fn run_schema_export(output: Option<String>) {
    let content = match ArchivistConfig::json_schema_string() {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Failed to serialize config schema: {}", e);
            std::process::exit(1);
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &content) {
                eprintln!("Failed to write to {}: {}", path, e);
                std::process::exit(1);
            }
            eprintln!("Config JSON schema written to {}", path);
        }
        None => {
            println!("{}", content);
        }
    }
}

/// Print enabled compile-time features.
fn run_features() {
    let version = env!("CARGO_PKG_VERSION");

    let features: &[(&str, &str, bool)] = &[
        (
            "database-sqlite",
            "Databases",
            cfg!(feature = "database-sqlite"),
        ),
        (
            "database-postgres",
            "Databases",
            cfg!(feature = "database-postgres"),
        ),
        (
            "database-mysql",
            "Databases",
            cfg!(feature = "database-mysql"),
        ),
        ("blob-azure", "Blob Sinks", cfg!(feature = "blob-azure")),
        ("json-schema", "Export", cfg!(feature = "json-schema")),
    ];

    println!("archivist v{}", version);
    println!();

    let mut current_category = "";
    for (name, category, enabled) in features {
        if *category != current_category {
            if !current_category.is_empty() {
                println!();
            }
            println!("{}:", category);
            current_category = category;
        }
        let marker = if *enabled { "+" } else { "-" };
        println!("  {} {}", marker, name);
    }
}
