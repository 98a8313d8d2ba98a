//! vaultkeep: backup and restore for a supervised Vaultwarden instance.
//!
//! Paths and timeouts come from VAULTKEEP_* environment variables (a `.env`
//! file is honoured); backup settings live in `<conf_dir>/backup_config.json`.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use vaultkeep_cli::{read_config_file, render_backups_table, stage_upload, App};
use vaultkeep_core::constants::{CONFIG_RELOAD_INTERVAL_SECS, DEFAULT_LOG_TAIL_LINES};
use vaultkeep_core::RuntimeSettings;
use vaultkeep_infra::{init_telemetry, tail_log};
use vaultkeep_services::{RestoreSource, Scheduler};

#[derive(Parser)]
#[command(name = "vaultkeep", about = "Vaultwarden backup manager", version)]
struct Cli {
    /// Emit logs on stderr as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scheduled backups until interrupted
    Serve,
    /// Take a backup now
    Backup,
    /// Replace the data directory with an archive
    Restore {
        /// Archive name in remote storage
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        remote: Option<String>,
        /// Local archive file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// List remote backups, newest first
    List {
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Inspect or replace the backup configuration
    Config {
        #[command(subcommand)]
        sub: ConfigCommands,
    },
    /// Print the end of the audit log
    Logs {
        #[arg(long, default_value_t = DEFAULT_LOG_TAIL_LINES)]
        lines: usize,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the current configuration with secrets masked
    Show,
    /// Validate a JSON document and make it the current configuration
    Set { file: PathBuf },
    /// Validate a JSON document without saving it
    Validate { file: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = RuntimeSettings::from_env().context("Invalid VAULTKEEP_* settings")?;
    init_telemetry(Some(&settings.audit_log_path()), cli.json_logs)?;

    let app = App::from_settings(settings)?;

    match cli.command {
        Commands::Serve => serve(&app).await?,
        Commands::Backup => {
            let outcome = app.orchestrator.run_backup().await?;
            print_json(&outcome)?;
        }
        Commands::Restore { remote, file } => {
            let source = match (remote, file) {
                (Some(name), _) => RestoreSource::Remote(name),
                (None, Some(file)) => {
                    RestoreSource::Staged(stage_upload(&file, &app.settings.temp_dir)?)
                }
                (None, None) => anyhow::bail!("Either --remote or --file is required"),
            };
            let outcome = app.orchestrator.run_restore(source).await?;
            print_json(&outcome)?;
        }
        Commands::List { format } => {
            let records = app.orchestrator.list_backups().await?;
            match format {
                OutputFormat::Json => print_json(&records)?,
                OutputFormat::Table => print!("{}", render_backups_table(&records, app.tz)),
            }
        }
        Commands::Config { sub } => match sub {
            ConfigCommands::Show => print_json(&app.config.current().redacted())?,
            ConfigCommands::Set { file } => {
                let config = read_config_file(&file)?;
                app.config.save(config).await?;
                println!("Configuration saved to {}", app.config.path().display());
            }
            ConfigCommands::Validate { file } => {
                read_config_file(&file)?;
                println!("{} is valid", file.display());
            }
        },
        Commands::Logs { lines } => {
            for line in tail_log(&app.settings.audit_log_path(), lines)? {
                println!("{}", line);
            }
        }
    }

    Ok(())
}

async fn serve(app: &App) -> anyhow::Result<()> {
    let scheduler = Scheduler::new(app.orchestrator.clone(), app.tz);
    let handle = scheduler.start(app.config.subscribe());
    // `vaultkeep config set` runs in its own process
    let watcher = app
        .config
        .clone()
        .watch_file(Duration::from_secs(CONFIG_RELOAD_INTERVAL_SECS));
    tracing::info!(
        data_dir = %app.settings.data_dir.display(),
        service = %app.settings.service_name,
        "vaultkeep serving"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");
    watcher.abort();
    handle.shutdown().await;
    Ok(())
}
