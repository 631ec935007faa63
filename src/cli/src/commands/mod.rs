//! CLI command definitions and dispatch.

mod load;
mod mirror;
mod save;

use std::path::PathBuf;
use std::sync::Arc;

use a3s_mirror_core::config::MirrorConfig;
use a3s_mirror_core::event::EventEmitter;
use a3s_mirror_core::job::Job;
use a3s_mirror_core::log::LogFormat;
use a3s_mirror_queue::{FailedList, PoolMonitor, PoolSummary, WorkerPool};
use a3s_mirror_runtime::{HttpRegistryClient, MirrorJob, MirrorUnit, Mirrorer, RegistryAuth, RegistryClient};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::output;

/// A3S Mirror - multi-arch container image mirroring.
#[derive(Parser)]
#[command(name = "a3s-mirror", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Configuration file (YAML or JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log output format: text or json
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Copy images between registries and rebuild manifest lists
    Mirror(mirror::MirrorArgs),
    /// Save images from a registry into a local archive directory
    Save(save::SaveArgs),
    /// Load images from a local archive directory into a registry
    Load(load::LoadArgs),
    /// Check that mirrored manifest lists match their sources
    MirrorValidate(mirror::MirrorArgs),
    /// Check that a saved archive still matches its source registries
    SaveValidate(save::SaveValidateArgs),
    /// Check that loaded manifest lists carry every archived platform
    LoadValidate(load::LoadArgs),
}

/// Run options shared by every command, overriding the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Architectures to copy (comma separated)
    #[arg(short, long, value_delimiter = ',')]
    pub arch: Vec<String>,

    /// Operating systems to copy (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub os: Vec<String>,

    /// Number of concurrent workers (1-20)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Per-image timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// File receiving failed images, truncated at start
    #[arg(long)]
    pub failed: Option<PathBuf>,

    /// Also copy attestation manifests
    #[arg(long)]
    pub provenance: bool,

    /// Talk plain HTTP to registries
    #[arg(long)]
    pub insecure: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub tls_skip_verify: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut MirrorConfig) {
        if !self.arch.is_empty() {
            config.arch = self.arch.clone();
        }
        if !self.os.is_empty() {
            config.os = self.os.clone();
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(failed) = &self.failed {
            config.failed_file = failed.clone();
        }
        if self.provenance {
            config.copy_provenance = true;
        }
        if self.insecure {
            config.registry.insecure_http = true;
        }
        if self.tls_skip_verify {
            config.registry.tls_verify = false;
        }
    }
}

/// Load the config file (or defaults) and apply global logging flags.
pub fn load_config(global: &GlobalArgs) -> Result<MirrorConfig, Box<dyn std::error::Error>> {
    let mut config = match &global.config {
        Some(path) => MirrorConfig::from_file(path)?,
        None => MirrorConfig::default(),
    };
    if global.debug {
        config.log.level = a3s_mirror_core::log::LogLevel::Debug;
    }
    if let Some(format) = global.log_format {
        config.log.format = format;
    }
    Ok(config)
}

/// Apply command flags on top of the loaded config and validate the result.
fn finalize_config(
    mut config: MirrorConfig,
    args: &RunArgs,
) -> Result<MirrorConfig, Box<dyn std::error::Error>> {
    args.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn registry_client(config: &MirrorConfig) -> Result<Arc<dyn RegistryClient>, Box<dyn std::error::Error>> {
    let auth = RegistryAuth::from_config(
        config.registry.username.as_deref(),
        config.registry.password.as_deref(),
    );
    Ok(Arc::new(HttpRegistryClient::new(&config.registry, auth)?))
}

/// First Ctrl-C cancels the run; a second one exits immediately.
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("Interrupted, stopping (press Ctrl-C again to exit immediately)");
        token.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

/// Record an input line that could not become a unit.
pub(crate) async fn reject(
    failed: &FailedList,
    line: &str,
    error: impl std::fmt::Display,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::error!(line, error = %error, "Skipping image");
    failed.append(line).await?;
    Ok(())
}

/// Units prepared from input, plus input lines that never became units.
pub(crate) struct Prepared {
    pub units: Vec<MirrorUnit>,
    pub rejected: usize,
}

/// Drive prepared units through the worker pool and report.
pub(crate) async fn run_units(
    config: &MirrorConfig,
    mirrorer: Mirrorer,
    failed: Arc<FailedList>,
    prepared: Prepared,
) -> Result<PoolSummary, Box<dyn std::error::Error>> {
    let pool = WorkerPool::new(config.jobs, config.timeout(), Arc::clone(&failed))?;
    spawn_interrupt_handler(pool.cancellation_token());
    let monitor = Arc::new(PoolMonitor::new(pool.progress())).start();

    let events = EventEmitter::default();
    let event_log = tokio::spawn(output::log_events(events.subscribe()));
    let mirrorer = Arc::new(mirrorer.with_events(events));
    let jobs = prepared
        .units
        .into_iter()
        .map(|unit| Box::new(MirrorJob::new(unit, Arc::clone(&mirrorer))) as Box<dyn Job>);
    let result = pool.run(jobs).await;
    monitor.abort();
    // The log ends once the last emitter clone is gone.
    drop(mirrorer);
    let tally = tokio::time::timeout(std::time::Duration::from_secs(1), event_log)
        .await
        .ok()
        .and_then(|joined| joined.ok())
        .unwrap_or_default();
    let summary = result?;

    if let Some(line) = output::tally_line(&tally) {
        println!("{line}");
    }
    output::print_summary(&summary, prepared.rejected, failed.path());
    let failures = summary.failed + summary.cancelled + prepared.rejected;
    if failures > 0 {
        return Err(format!(
            "{} image(s) failed, see {}",
            failures,
            failed.path().display()
        )
        .into());
    }
    Ok(summary)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli, config: MirrorConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Mirror(args) => mirror::execute(args, config, false).await,
        Command::MirrorValidate(args) => mirror::execute(args, config, true).await,
        Command::Save(args) => save::execute(args, config).await,
        Command::SaveValidate(args) => save::execute_validate(args, config).await,
        Command::Load(args) => load::execute(args, config, false).await,
        Command::LoadValidate(args) => load::execute(args, config, true).await,
    }
}
