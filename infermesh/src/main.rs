//! infermesh - Entry Point
//!
//! Deploys the inference services of a single host as containers and routes
//! queries to them.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{error, info};

use infermesh::backup::BackupManager;
use infermesh::deploy::docker::DockerCli;
use infermesh::deploy::orchestrator::{Orchestrator, OrchestratorConfig};
use infermesh::errors::MeshError;
use infermesh::filesys::file::File;
use infermesh::health::HealthChecker;
use infermesh::logs::{init_logging, LogLevel, LogOptions};
use infermesh::models::deployment::{DeploymentOutcome, DeploymentRecord, ServiceState};
use infermesh::registry::ServiceRegistry;
use infermesh::router::{Router, RouterOptions};
use infermesh::server::serve::{serve, ServerOptions};
use infermesh::server::state::ServerState;
use infermesh::storage::layout::{VaultLayout, VAULT_ENV};
use infermesh::storage::settings::Settings;
use infermesh::utils::{version_info, ShutdownSignal, ShutdownTrigger};

#[derive(Debug, Parser)]
#[command(name = "infermesh", version, about = "Deploy and route single-host inference services")]
struct Cli {
    /// Vault root directory
    #[arg(long, global = true, env = VAULT_ENV, default_value = "vault")]
    vault: PathBuf,

    /// Settings file; defaults to <vault>/configs/settings.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Back up the vault, then build, start and health check every service
    DeployAll,

    /// Stop and remove every managed container and the shared network
    Cleanup,

    /// Manage vault backups
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Route a query to the matching worker
    Route {
        query: String,

        /// Only print the routing decision
        #[arg(long)]
        dry_run: bool,

        /// Token budget for the completion
        #[arg(long)]
        n_predict: Option<i32>,
    },

    /// Run the router HTTP server
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Reach workers by service name on the shared network
        #[arg(long)]
        in_network: bool,
    },

    /// Show managed containers and the last deployment
    Status,

    /// Print version information
    Version,
}

#[derive(Debug, Subcommand)]
enum BackupAction {
    /// Snapshot the vault now
    Create,

    /// List archives, newest first
    List,

    /// Restore an archive over the vault
    Restore { id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Command::Version = cli.command {
        let version = version_info();
        match serde_json::to_string_pretty(&version) {
            Ok(s) => println!("{}", s),
            Err(e) => println!("{} {:?}", version.version, e),
        }
        return ExitCode::SUCCESS;
    }

    let layout = VaultLayout::new(&cli.vault);
    let settings_file = cli
        .config
        .clone()
        .map(File::new)
        .unwrap_or_else(|| layout.settings_file());
    let settings = match Settings::load_or_default(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => return report_error(&e),
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: if cli.verbose {
            LogLevel::Debug
        } else {
            settings.log_level.clone()
        },
        json_format: settings.log_json,
        log_dir: Some(layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    match run(cli.command, layout, settings).await {
        Ok(code) => code,
        Err(e) => report_error(&e),
    }
}

async fn run(command: Command, layout: VaultLayout, settings: Settings) -> Result<ExitCode, MeshError> {
    match command {
        Command::DeployAll => {
            let orchestrator = build_orchestrator(&settings, layout)?;
            let (trigger, shutdown) = ShutdownSignal::new();
            tokio::spawn(forward_interrupt(trigger));

            let record = orchestrator.deploy_all(Utc::now(), &shutdown).await?;
            print_record(&record);
            Ok(deployment_exit_code(&record))
        }
        Command::Cleanup => {
            let orchestrator = build_orchestrator(&settings, layout)?;
            orchestrator.cleanup().await?;
            println!("{}", "cleanup complete".green());
            Ok(ExitCode::SUCCESS)
        }
        Command::Backup { action } => {
            let orchestrator = build_orchestrator(&settings, layout.clone())?;
            let backups = orchestrator.backups();
            match action {
                BackupAction::Create => {
                    layout.setup().await?;
                    let record = backups.create(&layout.root).await?;
                    println!("{} {}", "created".green(), record.id);
                }
                BackupAction::List => {
                    for record in backups.list().await? {
                        println!(
                            "{}  {}  {} bytes",
                            record.id,
                            record.created_at.to_rfc3339(),
                            record.size_bytes
                        );
                    }
                }
                BackupAction::Restore { id } => {
                    let safety = orchestrator.restore_backup(&id).await?;
                    println!("{} {} (safety backup {})", "restored".green(), id, safety.id);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Route {
            query,
            dry_run,
            n_predict,
        } => {
            let router = build_router(&settings, settings.router.worker_host.as_deref())?;
            if dry_run {
                let decision = router.decide(&query);
                println!("{}", serde_json::to_string_pretty(&decision)?);
                return Ok(ExitCode::SUCCESS);
            }
            let completion = router.route(&query, n_predict).await?;
            info!(target_service = %completion.decision.target_service, "Query answered");
            println!("{}", completion.content);
            Ok(ExitCode::SUCCESS)
        }
        Command::Serve {
            host,
            port,
            in_network,
        } => {
            let worker_host = if in_network {
                None
            } else {
                settings.router.worker_host.as_deref()
            };
            let router = build_router(&settings, worker_host)?;
            let options = ServerOptions {
                host: host.unwrap_or_else(|| settings.router.listen_host.clone()),
                port: port.unwrap_or(settings.router.listen_port),
            };
            let state = Arc::new(ServerState::new(Arc::new(router)));
            let handle = serve(&options, state, await_shutdown_signal()).await?;
            handle
                .await
                .map_err(|e| MeshError::ServerError(e.to_string()))??;
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => {
            let orchestrator = build_orchestrator(&settings, layout)?;
            for status in orchestrator.status().await? {
                if status.containers.is_empty() {
                    println!("{:<10} {}", status.name, "absent".dimmed());
                }
                for container in status.containers {
                    let state = if container.running {
                        container.status.green()
                    } else {
                        container.status.yellow()
                    };
                    println!("{:<10} {:<16} {}", status.name, container.name, state);
                }
            }
            if let Some(record) = orchestrator.records().latest().await? {
                println!();
                print_record(&record);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Version => Ok(ExitCode::SUCCESS),
    }
}

fn build_orchestrator(settings: &Settings, layout: VaultLayout) -> Result<Orchestrator, MeshError> {
    let registry = ServiceRegistry::new(settings.services.clone())?;
    let runtime = DockerCli::new(settings.runtime.binary.clone())
        .with_unit_prefix(settings.runtime.unit_prefix.clone());
    let health = HealthChecker::http(Duration::from_millis(settings.health.timeout_ms))?;
    let backups = BackupManager::new(layout.backups_dir(), settings.backup_options());
    let config = OrchestratorConfig::from_settings(settings, layout);
    Ok(Orchestrator::new(config, registry, Arc::new(runtime), health, backups))
}

fn build_router(settings: &Settings, worker_host: Option<&str>) -> Result<Router, MeshError> {
    let registry = ServiceRegistry::new(settings.services.clone())?;
    Router::from_registry(&registry, worker_host, &RouterOptions::from(&settings.router))
}

/// Success, or a partial failure made only of skips, exits zero
fn deployment_exit_code(record: &DeploymentRecord) -> ExitCode {
    match record.outcome {
        DeploymentOutcome::Success => ExitCode::SUCCESS,
        DeploymentOutcome::PartialFailure if record.failures.is_empty() => ExitCode::SUCCESS,
        _ => {
            if let Some(failure) = record.failures.last() {
                eprintln!("{}: {}", format!("error[{}]", failure.class).red().bold(), failure.message);
            }
            ExitCode::FAILURE
        }
    }
}

fn print_record(record: &DeploymentRecord) {
    let outcome = match record.outcome {
        DeploymentOutcome::Success => record.outcome.to_string().green(),
        DeploymentOutcome::PartialFailure => record.outcome.to_string().yellow(),
        DeploymentOutcome::RolledBack => record.outcome.to_string().red(),
    };
    println!("deployment {}: {}", record.deployment_id, outcome.bold());
    for entry in &record.services {
        let label = match &entry.state {
            ServiceState::Healthy => entry.state.label().green(),
            ServiceState::Skipped(_) | ServiceState::Pending => entry.state.label().dimmed(),
            ServiceState::RolledBack => entry.state.label().yellow(),
            _ => entry.state.label().red(),
        };
        match entry.state.detail() {
            Some(detail) => println!("  {:<10} {} ({})", entry.name, label, detail),
            None => println!("  {:<10} {}", entry.name, label),
        }
    }
}

fn report_error(err: &MeshError) -> ExitCode {
    error!("{}", err);
    eprintln!("{}: {}", format!("error[{}]", err.class()).red().bold(), err);
    ExitCode::FAILURE
}

/// Fire the trigger on the first interrupt so a deployment can roll back
async fn forward_interrupt(trigger: ShutdownTrigger) {
    await_shutdown_signal().await;
    trigger.trigger();
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            _ => {
                error!("Unable to install signal handlers, falling back to Ctrl+C");
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Ctrl+C received, shutting down...");
                }
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down...");
        }
    }
}
