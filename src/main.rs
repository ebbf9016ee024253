use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use dvrmanager::config::AppConfig;
use dvrmanager::context::AppContext;
use dvrmanager::core::{ExportStatus, JobRecord, Orchestrator, spawn_export};
use dvrmanager::logging::{self, ActivityLog, LogConfig};
use dvrmanager::rpc::{ClientError, RpcClient, RpcServer};
use dvrmanager::settings::{ExportItem, ExportItemPatch, SettingsStore};
use dvrmanager::adapters;
use serde::Serialize;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "dvrmanager")]
#[command(about = "Archives recordings from DVR flash drives as soon as they are plugged in", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    config: ConfigArgs,
}

/// Flags that override values from config.toml and the environment.
#[derive(Args, Serialize)]
struct ConfigArgs {
    /// Use an in-memory drive table driven from stdin
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    simulation: bool,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long, short, global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    json_logs: bool,

    /// Settings file to use instead of the per-user default
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long = "settings", global = true)]
    settings_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    rpc_bind: Option<SocketAddr>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch for drives and export automatically
    Daemon,
    /// Show what a running daemon is doing
    Status,
    /// Manage export rules
    #[command(subcommand)]
    Rules(RulesCommand),
    /// Show or set the archive directory
    Target { dir: Option<PathBuf> },
    /// Run one export rule now
    Export { index: usize },
}

#[derive(Subcommand)]
enum RulesCommand {
    List,
    /// Append a rule with default values
    Add,
    Remove {
        index: usize,
    },
    /// Change fields of a rule
    Set {
        index: usize,
        #[arg(long)]
        drive_name: Option<String>,
        /// Glob relative to the drive root; empty means every file
        #[arg(long)]
        drive_path: Option<String>,
        #[arg(long)]
        delete: Option<bool>,
        #[arg(long)]
        unmount: Option<bool>,
        #[arg(long)]
        automatic: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::new(Some(&cli.config))?;

    let activity = ActivityLog::default();
    let long_running = matches!(cli.command, Commands::Daemon | Commands::Export { .. });
    logging::init(LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
        log_dir: long_running.then(|| config.logs_dir.clone()),
        activity: Some(activity.clone()),
    });

    match cli.command {
        Commands::Daemon => run_daemon(config, activity)
            .await
            .context("Failed to run daemon")?,
        Commands::Status => run_status(&config)
            .await
            .context("Failed to check status of daemon")?,
        Commands::Rules(cmd) => run_rules(&config, cmd)?,
        Commands::Target { dir } => run_target(&config, dir)?,
        Commands::Export { index } => run_export(config, activity, index).await?,
    }

    Ok(())
}

async fn run_daemon(config: AppConfig, activity: ActivityLog) -> Result<()> {
    let settings = SettingsStore::open(&config.settings_path);
    let fs = adapters::get_drive_fs(config.simulation);
    let rpc_bind = config.rpc_bind;
    let ctx = AppContext::new(config, settings, fs, activity);

    let orchestrator = Orchestrator::new(ctx.clone());
    let shutdown = orchestrator.shutdown_token();

    let rpc = RpcServer::new(ctx, rpc_bind);
    let rpc_shutdown = shutdown.clone();
    let rpc_task = tokio::spawn(async move {
        if let Err(e) = rpc.start(rpc_shutdown).await {
            error!(error = %e, "RPC server failed");
        }
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    orchestrator.start().await?;
    let _ = rpc_task.await;
    Ok(())
}

async fn run_status(config: &AppConfig) -> Result<()> {
    let client = RpcClient::new(config.rpc_bind);

    let status = match client.daemon_status().await {
        Ok(status) => status,
        Err(ClientError::Connect(_)) => {
            println!("Daemon is not running (nothing listening on {})", config.rpc_bind);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!(
        "dvrmanager {} running for {}s{}",
        status.version,
        status.uptime_secs,
        if status.simulation { " (simulation)" } else { "" }
    );
    println!("Archive:  {}", status.target_directory.display());
    println!("Settings: {}", status.settings_path.display());

    println!("\nDrives:");
    for drive in client.drives().await? {
        let state = if drive.attached { "attached" } else { "not attached" };
        println!("  {:<24} {}", drive.drive_name, state);
    }

    print_jobs("Active exports", &client.active_jobs().await?);
    print_jobs("Recent exports", &client.recent_jobs().await?);

    println!("\nRecent activity:");
    for entry in client.recent_log(10).await? {
        println!(
            "  [{}] {:<5} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.level,
            entry.message
        );
    }

    Ok(())
}

fn print_jobs(title: &str, jobs: &[JobRecord]) {
    println!("\n{}:", title);
    if jobs.is_empty() {
        println!("  none");
    }
    for job in jobs {
        println!(
            "  {} {:<20} {}",
            &job.job_id[..8.min(job.job_id.len())],
            job.drive_name,
            describe_status(&job.status)
        );
    }
}

fn describe_status(status: &ExportStatus) -> String {
    match status {
        ExportStatus::Ready => "starting".to_string(),
        ExportStatus::InProgress {
            files_done,
            total_files,
            percentage,
            current_file,
            ..
        } => format!("{percentage}% ({files_done}/{total_files}) {current_file}"),
        ExportStatus::Unmounting => "unmounting".to_string(),
        ExportStatus::Finished(report) => {
            let mut summary = format!(
                "{} copied, {} failed, {} deleted -> {}",
                report.files_copied,
                report.files_failed,
                report.files_deleted,
                report.archive_dir.display()
            );
            if report.unmounted {
                summary.push_str(", unmounted");
            }
            if report.device_removed {
                summary.push_str(", device removed");
            }
            summary
        }
        ExportStatus::Failed(reason) => format!("failed: {reason}"),
    }
}

fn run_rules(config: &AppConfig, cmd: RulesCommand) -> Result<()> {
    let store = SettingsStore::open(&config.settings_path);

    match cmd {
        RulesCommand::List => {
            let settings = store.snapshot();
            if settings.export_items.is_empty() {
                println!("No export rules");
            }
            for (index, item) in settings.export_items.iter().enumerate() {
                print_rule(index, item);
            }
        }
        RulesCommand::Add => {
            let index = store.add_default_rule()?;
            print_rule(index, &store.rule(index)?);
        }
        RulesCommand::Remove { index } => {
            let removed = store.remove_rule(index)?;
            println!("Removed rule for {}", removed.drive_name);
        }
        RulesCommand::Set {
            index,
            drive_name,
            drive_path,
            delete,
            unmount,
            automatic,
        } => {
            let patch = ExportItemPatch {
                drive_name,
                drive_path,
                delete,
                unmount,
                automatic,
            };
            if patch.is_empty() {
                bail!("Nothing to change; pass at least one field");
            }
            let item = store.update_rule(index, patch)?;
            print_rule(index, &item);
        }
    }

    Ok(())
}

fn print_rule(index: usize, item: &ExportItem) {
    let flag = |on: bool, name: &'static str| if on { name } else { "" };
    let flags: Vec<&str> = [
        flag(item.delete, "delete"),
        flag(item.unmount, "unmount"),
        flag(item.automatic, "automatic"),
    ]
    .into_iter()
    .filter(|f| !f.is_empty())
    .collect();

    println!(
        "[{}] {:<20} {:<20} {}",
        index,
        item.drive_name,
        item.pattern().unwrap_or("(all files)"),
        if flags.is_empty() { "manual, keep files".to_string() } else { flags.join(", ") }
    );
}

fn run_target(config: &AppConfig, dir: Option<PathBuf>) -> Result<()> {
    let store = SettingsStore::open(&config.settings_path);

    if let Some(dir) = dir {
        store.set_target_directory(dir)?;
    }
    println!("{}", store.target_directory().display());
    Ok(())
}

/// Hand the export to a running daemon, or run it here if there is none.
/// Without a daemon the export runs here, against real drives only.
fn ensure_local_drives(config: &AppConfig) -> Result<()> {
    if config.simulation {
        bail!(
            "No daemon is listening on {}. Simulated drives only exist inside a running \
             daemon: start `dvrmanager --simulation daemon`, attach the drive on its stdin, \
             then run the export again",
            config.rpc_bind
        );
    }
    Ok(())
}

async fn run_export(config: AppConfig, activity: ActivityLog, index: usize) -> Result<()> {
    let client = RpcClient::new(config.rpc_bind);
    match client.run_export(index).await {
        Ok(started) => {
            println!("Daemon started export job {}", started.job_id);
            return Ok(());
        }
        Err(ClientError::Connect(_)) => {}
        Err(e) => return Err(e).context("Daemon refused the export"),
    }

    ensure_local_drives(&config)?;
    let settings = SettingsStore::open(&config.settings_path);
    let rule = settings.rule(index)?;
    let fs = adapters::get_drive_fs(false);
    if !fs.drive_exists(&rule.drive_name) {
        bail!("Drive {} is not attached", rule.drive_name);
    }

    let ctx = AppContext::new(config, settings, fs, activity);
    let job_id = spawn_export(&ctx, rule);
    ctx.jobs.close();
    ctx.jobs.wait().await;

    let job = ctx
        .progress
        .get(&job_id)
        .await
        .context("Export job vanished")?;
    println!("{}", describe_status(&job.status));

    match job.status {
        ExportStatus::Finished(report) if report.succeeded() => Ok(()),
        ExportStatus::Finished(report) => {
            for e in &report.errors {
                eprintln!("  {e}");
            }
            bail!("Export finished with errors")
        }
        _ => bail!("Export failed"),
    }
}
