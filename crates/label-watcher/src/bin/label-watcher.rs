//! Label watcher CLI - polls repositories and advances labelled issues.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use label_watcher::{
    render_prometheus, ActionRegistry, CommentAction, GitHubTracker, Issue, IssueStateStore,
    IssueTracker, LabelTransitionMetrics, LabelTransitionMetricsSnapshot, LabelWatcher, Phase,
    RepositoryConfig, TransitionDecider, WatcherConfig,
};

/// Watch issue labels and drive workflow transitions.
#[derive(Parser)]
#[command(name = "label-watcher")]
#[command(version)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true, env = "LABEL_WATCHER_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Poll every configured repository until interrupted
    Run,

    /// Run a single poll cycle and print the metrics snapshot
    Once {
        /// Print Prometheus text instead of JSON
        #[arg(long)]
        prometheus: bool,
    },

    /// Validate the configuration and print the workflow routes
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.verbose);

    let config =
        WatcherConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Once { prometheus } => once(config, prometheus).await,
        Commands::CheckConfig => {
            check_config(&config);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat, verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("label_watcher=debug,info")
        } else {
            EnvFilter::new("label_watcher=info,warn")
        }
    });

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
    }
}

fn build_watcher(
    config: &WatcherConfig,
    repository: &RepositoryConfig,
    token: &str,
) -> Result<LabelWatcher> {
    let tracker: Arc<dyn IssueTracker> = Arc::new(
        GitHubTracker::new(token, &repository.owner, &repository.repo)
            .context("Failed to create GitHub client")?
            .with_base_url(&config.api_url),
    );

    let mut actions = ActionRegistry::new();
    for phase in Phase::ALL {
        if let Some(template) = &config.workflow.phase(phase).comment {
            actions = actions.with_action(
                phase,
                Arc::new(CommentAction::new(Arc::clone(&tracker), template)),
            );
        }
    }

    let decider = TransitionDecider::new(
        Arc::clone(&tracker),
        Arc::new(IssueStateStore::new()),
        Arc::new(LabelTransitionMetrics::new()),
        &config.workflow,
        actions,
    );

    let slug = repository.slug();
    let on_detect_slug = slug.clone();
    Ok(LabelWatcher::new(
        &slug,
        tracker,
        decider,
        config.workflow.watched_labels(),
        config.watcher_settings(),
    )
    .with_detection_callback(Arc::new(move |issue: &Issue| {
        debug!(
            repository = %on_detect_slug,
            issue_number = issue.number,
            labels = ?issue.labels,
            "Observed watched issue"
        );
    })))
}

fn build_watchers(config: &WatcherConfig) -> Result<Vec<LabelWatcher>> {
    let token = config.require_token()?;
    anyhow::ensure!(
        !config.repositories.is_empty(),
        "No repositories configured; set [[repositories]] or LABEL_WATCHER_REPOSITORY"
    );

    config
        .repositories
        .iter()
        .map(|repository| build_watcher(config, repository, token))
        .collect()
}

async fn run(config: WatcherConfig) -> Result<()> {
    let watchers = build_watchers(&config)?;
    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    for watcher in watchers {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let name = watcher.name().to_string();
            let snapshot = watcher.run(cancel).await;
            (name, snapshot)
        });
    }

    info!(watchers = tasks.len(), "Label watchers started");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    cancel.cancel();

    let mut snapshots = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, snapshot)) => {
                snapshots.insert(name, snapshot);
            }
            Err(e) => error!(error = %e, "Watcher task failed"),
        }
    }

    println!("{}", serde_json::to_string_pretty(&snapshots)?);
    Ok(())
}

async fn once(config: WatcherConfig, prometheus: bool) -> Result<()> {
    let watchers = build_watchers(&config)?;
    let mut snapshots: BTreeMap<String, LabelTransitionMetricsSnapshot> = BTreeMap::new();

    for watcher in &watchers {
        match watcher.poll_once().await {
            Ok(report) => info!(
                repository = watcher.name(),
                observed = report.observed,
                succeeded = report.succeeded,
                failed = report.failed,
                "Poll cycle complete"
            ),
            Err(e) => error!(repository = watcher.name(), error = %e, "Poll cycle failed"),
        }
        snapshots.insert(
            watcher.name().to_string(),
            watcher.decider().metrics().snapshot(),
        );
    }

    if prometheus {
        print!(
            "{}",
            render_prometheus(
                "label_watcher",
                "repository",
                snapshots
                    .iter()
                    .map(|(name, snapshot)| (name.as_str(), snapshot)),
            )
        );
    } else {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
    }
    Ok(())
}

fn check_config(config: &WatcherConfig) {
    println!("poll interval: {}s", config.poll_interval_secs);
    println!("state retention: {}s", config.state_retention_secs);
    for repository in &config.repositories {
        println!("repository: {}", repository.slug());
    }
    for route in config.workflow.routes() {
        println!(
            "{:<8} {:<15} {}",
            format!("{:?}", route.kind),
            route.phase.as_str(),
            route.descriptor()
        );
    }
    if config.token.is_none() {
        println!("warning: GITHUB_TOKEN is not set");
    }
}
