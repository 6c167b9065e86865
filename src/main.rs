use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use glbak::config::LoggingConfig;
use glbak::health::CheckResult;
use glbak::{
    ClientConfig, Config, GitLabClient, GroupTraversal, HealthCheck, OutcomeKind, RunCoordinator,
    RunReport,
};

/// Failures listed in the console summary before truncating
const MAX_LISTED_FAILURES: usize = 20;

#[derive(Parser)]
#[command(name = "glbak")]
#[command(about = "Mirror every repository under a GitLab group tree into a local archive")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror every repository under a group
    Backup(BackupArgs),

    /// List the repositories a backup would mirror
    List {
        /// Group path, e.g. acme or acme/team-a
        group: String,

        /// GitLab instance URL
        #[arg(long)]
        base_url: Option<String>,

        /// Show repository details
        #[arg(long)]
        details: bool,
    },

    /// System health check and diagnostics
    Doctor,
}

#[derive(Args)]
struct BackupArgs {
    /// Group path, e.g. acme or acme/team-a
    group: String,

    /// GitLab instance URL
    #[arg(long)]
    base_url: Option<String>,

    /// Archive root directory
    #[arg(long)]
    dest: Option<String>,

    /// Repositories mirrored in parallel
    #[arg(long)]
    concurrency: Option<usize>,

    /// HTTP timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Verify TLS certificates
    #[arg(long, overrides_with = "no_verify_ssl")]
    verify_ssl: bool,

    /// Skip TLS certificate verification
    #[arg(long, overrides_with = "verify_ssl")]
    no_verify_ssl: bool,

    /// Report what would be done without touching the archive
    #[arg(long)]
    dry_run: bool,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

impl BackupArgs {
    /// Command-line flags take precedence over file and environment.
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(base_url) = &self.base_url {
            config.gitlab.base_url = base_url.clone();
        }
        if let Some(dest) = &self.dest {
            config.archive_root = dest.clone();
            config.expand_paths()?;
        }
        if let Some(concurrency) = self.concurrency {
            config.sync.max_parallel = concurrency.max(1);
        }
        if let Some(timeout) = self.timeout {
            config.gitlab.timeout = timeout;
        }
        if self.verify_ssl {
            config.gitlab.verify_ssl = true;
        }
        if self.no_verify_ssl {
            config.gitlab.verify_ssl = false;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    init_logging(cli.verbose, &config.logging)?;
    info!("Starting glbak v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Backup(args) => {
            args.apply(&mut config)?;
            cmd_backup(&args, &config).await
        }
        Commands::List {
            group,
            base_url,
            details,
        } => {
            if let Some(base_url) = base_url {
                config.gitlab.base_url = base_url;
            }
            cmd_list(&group, details, &config).await
        }
        Commands::Doctor => cmd_doctor(&config).await,
    }
}

/// Initialize logging; `RUST_LOG` wins over `--verbose` and the config file
fn init_logging(verbose: bool, logging: &LoggingConfig) -> Result<()> {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level)
            .with_context(|| format!("Invalid log level: {}", default_level))?,
    };

    let layer = fmt::layer().with_writer(std::io::stderr);
    match logging.format.as_str() {
        "full" => tracing_subscriber::registry().with(layer).with(filter).init(),
        _ => tracing_subscriber::registry()
            .with(layer.compact())
            .with(filter)
            .init(),
    }

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

fn gitlab_client(config: &Config) -> Result<GitLabClient> {
    let token = config.token().context("GitLab token not available")?;
    GitLabClient::new(ClientConfig::from_config(config, token))
}

/// Mirror every repository under the group
async fn cmd_backup(args: &BackupArgs, config: &Config) -> Result<ExitCode> {
    let client = gitlab_client(config)?;
    // Bars would interleave with a JSON report or garble redirected output.
    let show_progress = !args.json && std::io::stderr().is_terminal();
    let coordinator =
        RunCoordinator::from_config(config, Arc::new(client)).with_progress(show_progress);

    let header = [
        format!("glbak v{}", env!("CARGO_PKG_VERSION")),
        format!("   GitLab: {}", config.gitlab.base_url),
        format!("   Group: {}", args.group),
        format!("   Destination: {}", config.archive_root_path().display()),
    ];
    for line in &header {
        // Keep stdout clean for the JSON report.
        if args.json {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    }
    if args.dry_run {
        let notice = "🔍 Dry run mode - no mirror will be created or modified";
        if args.json {
            eprintln!("{}", notice);
        } else {
            println!("{}", notice);
        }
    }

    let cancel = coordinator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing repositories already in progress");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let report = coordinator
        .run(&args.group, args.dry_run)
        .await
        .context("Backup aborted")?;

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize run report")?;
        println!("{}", json);
    } else {
        print_run_summary(&report);
    }

    Ok(ExitCode::from(report.exit_code() as u8))
}

fn print_run_summary(report: &RunReport) {
    let title = if report.dry_run {
        "\n📈 Dry Run Summary:"
    } else {
        "\n🎉 Backup Complete!"
    };
    println!("{}", title);
    println!("   📊 Repositories discovered: {}", report.discovered);
    println!("   📥 Created: {}", report.counts.created);
    println!("   🔄 Updated: {}", report.counts.updated);
    println!("   ✅ Unchanged: {}", report.counts.unchanged);
    println!("   ⏭️  Skipped: {}", report.counts.skipped);
    println!("   ❌ Failed: {}", report.counts.failed);
    println!("   ⏱️  Duration: {:.2}s", report.duration.as_secs_f64());

    if report.dry_run && report.counts.skipped > 0 && report.outcomes.len() <= 10 {
        println!();
        for outcome in &report.outcomes {
            if let OutcomeKind::SkippedDryRun { would } = &outcome.kind {
                println!("   {} {}", would, outcome.record.full_path);
            }
        }
    }

    if !report.gaps.is_empty() {
        println!("\n⚠️  Discovery gaps ({}):", report.gaps.len());
        for gap in &report.gaps {
            println!("   ⚠️  {}: {}", gap.path, gap.message);
        }
    }

    if !report.failures.is_empty() {
        println!("\n🔍 Failed Operations:");
        for failure in report.failures.iter().take(MAX_LISTED_FAILURES) {
            println!("   ❌ {}: {}", failure.path, failure.message);
        }
        if report.failures.len() > MAX_LISTED_FAILURES {
            println!(
                "   ... and {} more",
                report.failures.len() - MAX_LISTED_FAILURES
            );
        }
    }
}

/// List repositories that a backup would mirror
async fn cmd_list(group: &str, details: bool, config: &Config) -> Result<ExitCode> {
    info!("Listing repositories...");

    let client = gitlab_client(config)?;
    let traversal = GroupTraversal::new(Arc::new(client), config.discovery.max_parallel);

    println!("🔍 Discovering repositories under {}...", group);
    let discovery = traversal
        .discover(group)
        .await
        .context("Discovery aborted")?;

    println!("Repositories ({}): ", discovery.inventory.len());

    for record in &discovery.inventory {
        if details {
            println!("📁 {}", record.full_path);
            if let Some(branch) = &record.default_branch {
                println!("   🌿 Default branch: {}", branch);
            }
            if record.archived {
                println!("   🗄️  Archived");
            }
            if let Some(url) = &record.web_url {
                println!("   🔗 {}", url);
            }
            println!();
        } else {
            println!("  📁 {}", record.full_path);
        }
    }

    if !discovery.gaps.is_empty() {
        println!("\n⚠️  Discovery gaps ({}):", discovery.gaps.len());
        for gap in &discovery.gaps {
            println!("   ⚠️  {}: {}", gap.group_path, gap.cause);
        }
        return Ok(ExitCode::from(2));
    }

    Ok(ExitCode::SUCCESS)
}

/// System health check and diagnostics
async fn cmd_doctor(config: &Config) -> Result<ExitCode> {
    let health = HealthCheck::run(config).await;
    print_health_report(&health);
    Ok(if health.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning { "⚠️ " } else { "✅" }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 glbak System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ Some checks failed");
    }
}
