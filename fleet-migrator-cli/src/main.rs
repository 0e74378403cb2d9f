//! `fleet-migrate` entry point.
//!
//! Applies versioned SQL scripts to the master database or to every active
//! tenant database. The report goes to stdout; logs go to stderr.
//!
//! Exit codes: `0` every target succeeded or was skipped, `1` at least one
//! target failed, `2` configuration error or run aborted before any target.

mod output;

use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fleet_migrator_app::config::FleetConfig;
use fleet_migrator_app::AppState;
use fleet_migrator_core::services::CancelHandle;
use fleet_migrator_core::types::{MigrationDomain, TargetFilter};

use output::{render_report, render_scripts, OutputFormat};

const EXIT_TARGET_FAILED: u8 = 1;
const EXIT_ABORTED: u8 = 2;

#[derive(Parser)]
#[command(name = "fleet-migrate", version)]
#[command(about = "Apply versioned SQL scripts across a fleet of tenant databases")]
struct Cli {
    /// Configuration file (default: ./fleet-migrator.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Master database URL
    #[arg(long, global = true, env = "FLEET_MIGRATOR_MASTER_URL", hide_env_values = true)]
    master_url: Option<String>,

    /// Root directory of the script tree
    #[arg(long, global = true, env = "FLEET_MIGRATOR_SCRIPTS_DIR")]
    scripts_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending scripts
    Migrate {
        #[command(flatten)]
        target: TargetArgs,

        /// Report pending scripts without applying them
        #[arg(long)]
        dry_run: bool,

        /// Targets migrated at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Upper bound for one script, in seconds
        #[arg(long)]
        script_timeout: Option<u64>,
    },

    /// Show pending scripts per target without applying anything
    Status {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// List and validate the scripts of a domain
    Scripts {
        domain: DomainArg,

        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct TargetArgs {
    domain: DomainArg,

    /// Only run against these tenants (repeatable)
    #[arg(long = "tenant", value_name = "ID")]
    tenants: Vec<String>,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

impl TargetArgs {
    fn filter(&self) -> TargetFilter {
        if self.tenants.is_empty() {
            TargetFilter::All
        } else {
            TargetFilter::Only(self.tenants.clone())
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DomainArg {
    Master,
    Tenant,
}

impl From<DomainArg> for MigrationDomain {
    fn from(arg: DomainArg) -> Self {
        match arg {
            DomainArg::Master => Self::Master,
            DomainArg::Tenant => Self::Tenant,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so stdout carries only the report
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(EXIT_ABORTED)
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<FleetConfig> {
    let mut config = FleetConfig::load(cli.config.as_deref())?;
    if let Some(url) = &cli.master_url {
        config.set_master_url(url);
    }
    if let Some(dir) = &cli.scripts_dir {
        config.scripts_dir.clone_from(dir);
    }
    if let Commands::Migrate {
        concurrency,
        script_timeout,
        ..
    } = &cli.command
    {
        if let Some(n) = concurrency {
            config.concurrency = *n;
        }
        if let Some(secs) = script_timeout {
            config.script_timeout_secs = *secs;
        }
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(&cli)?;
    let state = AppState::from_config(&config)?;

    match &cli.command {
        Commands::Scripts { domain, format } => {
            let scripts = state
                .fleet_service
                .load_scripts(MigrationDomain::from(*domain))
                .await?;
            println!("{}", render_scripts(&scripts, *format)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Migrate {
            target, dry_run, ..
        } => run_fleet(&state, target, *dry_run).await,
        Commands::Status { target } => run_fleet(&state, target, true).await,
    }
}

/// The first interrupt cancels the run at the next script boundary.
///
/// Returns `true` when a second interrupt asks to abort right away; open
/// transactions are then rolled back by the databases when the process exits.
async fn handle_interrupts<F, Fut>(mut next_interrupt: F, cancel: CancelHandle) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if next_interrupt().await.is_err() {
        return false;
    }
    tracing::warn!(
        "Interrupt received, finishing running scripts and stopping (interrupt again to abort)"
    );
    cancel.cancel();

    if next_interrupt().await.is_err() {
        return false;
    }
    tracing::error!("Second interrupt, aborting without waiting for running scripts");
    true
}

async fn run_fleet(state: &AppState, args: &TargetArgs, dry_run: bool) -> anyhow::Result<ExitCode> {
    let cancel = CancelHandle::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if handle_interrupts(tokio::signal::ctrl_c, on_signal).await {
            std::process::exit(i32::from(EXIT_ABORTED));
        }
    });

    let mut options = state.run_options.clone();
    options.dry_run = dry_run;

    let report = state
        .fleet_service
        .migrate_fleet(args.domain.into(), &args.filter(), &options, &cancel)
        .await?;

    println!("{}", render_report(&report, args.format)?);

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::warn!("Failed targets: {}", report.failed_tenants().join(", "));
        Ok(ExitCode::from(EXIT_TARGET_FAILED))
    }
}

#[cfg(test)]
mod tests {
    use std::future::ready;

    use super::*;

    #[tokio::test]
    async fn second_interrupt_aborts_after_cancelling() {
        let cancel = CancelHandle::new();

        let abort = handle_interrupts(|| ready(Ok(())), cancel.clone()).await;

        assert!(abort);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn unavailable_signal_handler_neither_cancels_nor_aborts() {
        let cancel = CancelHandle::new();

        let abort = handle_interrupts(
            || ready(Err(std::io::Error::other("no signal support"))),
            cancel.clone(),
        )
        .await;

        assert!(!abort);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn migrate_overrides_are_parsed() {
        let cli = Cli::try_parse_from([
            "fleet-migrate",
            "migrate",
            "tenant",
            "--tenant",
            "acme",
            "--script-timeout",
            "30",
        ])
        .unwrap();

        match cli.command {
            Commands::Migrate {
                target,
                script_timeout,
                dry_run,
                ..
            } => {
                assert_eq!(script_timeout, Some(30));
                assert!(!dry_run);
                assert!(matches!(target.filter(), TargetFilter::Only(ids) if ids == ["acme"]));
            }
            _ => panic!("expected migrate"),
        }
    }
}
