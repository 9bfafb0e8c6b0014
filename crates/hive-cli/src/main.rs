//! Hive CLI
//!
//! The `hive` command submits research queries to the orchestration engine
//! and inspects the persisted policy state.
//!
//! ## Commands
//!
//! - `run`: submit one query and print the report
//! - `batch`: submit queries from a JSONL file with the learning loop running
//! - `policy`: show the active policy version or its lineage
//! - `benchmark`: show recorded benchmark runs or evaluate now
//! - `audit`: tail the audit log
//! - `config`: validate a configuration file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hive_core::config::GATEWAY_URL_ENV;
use hive_core::gateway::fakes::EchoGateway;
use hive_core::gateway::NoSearch;
use hive_core::{
    CancelToken, Collaborators, HiveConfig, HttpModelGateway, InMemoryObservationalMemory,
    ModelGateway, Query, RunReport, Runtime, METRICS,
};
use hive_state::{
    AuditLog, BenchmarkLog, FsPolicyLineage, JsonlAuditLog, JsonlBenchmarkLog, PolicyLineage,
    VersionId,
};
use serde::Deserialize;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "hive")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Adaptive multi-agent research orchestration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "HIVE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding lineage, benchmark and audit files
    #[arg(long, global = true, default_value = ".hive", env = "HIVE_STATE_DIR")]
    state_dir: PathBuf,

    /// Use the deterministic offline gateway instead of HTTP
    #[arg(long, global = true)]
    offline: bool,

    /// OpenAI-compatible endpoint for the model gateway
    #[arg(long, global = true, env = "HIVE_GATEWAY_URL")]
    gateway_url: Option<String>,

    /// API key for the model gateway
    #[arg(long, global = true, env = "HIVE_GATEWAY_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit one query and print the report
    Run {
        /// Domain tag for the query
        #[arg(short, long)]
        domain: String,

        /// Minimum acceptable validation score (0-100)
        #[arg(short, long)]
        target: Option<f64>,

        /// Print the full report as JSON
        #[arg(long)]
        report_json: bool,

        /// Query text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Submit queries from a JSONL file, one `{"domain", "text"}` object per line
    Batch {
        file: PathBuf,
    },

    /// Inspect the policy lineage
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },

    /// Benchmark runs
    Benchmark {
        #[command(subcommand)]
        action: BenchmarkAction,
    },

    /// Audit log
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },

    /// Configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum PolicyAction {
    /// Show the active version
    Current,
    /// List every version, oldest first
    History,
}

#[derive(Subcommand)]
enum BenchmarkAction {
    /// List recorded runs
    Log {
        /// Only runs for this version number
        #[arg(long)]
        version: Option<u64>,
    },
    /// Evaluate the active version now
    Run,
}

#[derive(Subcommand)]
enum AuditAction {
    /// Print the most recent records as JSON lines
    Tail {
        #[arg(short = 'n', long, default_value = "20")]
        lines: usize,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate the configuration and print it with defaults filled in
    Check,
}

/// One line of a batch file.
#[derive(Debug, Deserialize)]
struct BatchItem {
    domain: String,
    text: String,
    #[serde(default)]
    quality_target: Option<f64>,
}

impl BatchItem {
    fn into_query(self) -> Query {
        let query = Query::new(self.domain, self.text);
        match self.quality_target {
            Some(t) => query.with_quality_target(t),
            None => query,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    hive_core::init_tracing(cli.json, level);

    let config = load_config(&cli)?;
    let outcome = match cli.command {
        Commands::Run {
            ref domain,
            target,
            report_json,
            ref text,
        } => {
            let mut query = Query::new(domain.clone(), text.join(" "));
            if let Some(t) = target {
                query = query.with_quality_target(t);
            }
            cmd_run(&config, &cli, query, report_json).await
        }
        Commands::Batch { ref file } => cmd_batch(&config, &cli, file).await,
        Commands::Policy { ref action } => match action {
            PolicyAction::Current => cmd_policy_current(&cli.state_dir).await,
            PolicyAction::History => cmd_policy_history(&cli.state_dir).await,
        },
        Commands::Benchmark { ref action } => match action {
            BenchmarkAction::Log { version } => {
                cmd_benchmark_log(&cli.state_dir, version.map(VersionId)).await
            }
            BenchmarkAction::Run => cmd_benchmark_run(&config, &cli).await,
        },
        Commands::Audit { ref action } => match action {
            AuditAction::Tail { lines } => cmd_audit_tail(&cli.state_dir, *lines).await,
        },
        Commands::Config { ref action } => match action {
            ConfigAction::Check => cmd_config_check(&config),
        },
    };
    METRICS.flush();
    outcome
}

/// File (when given) plus environment, then CLI overrides, validated.
fn load_config(cli: &Cli) -> Result<HiveConfig> {
    let mut config = match &cli.config {
        Some(path) => HiveConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => {
            let mut c = HiveConfig::default();
            c.apply_env();
            c
        }
    };
    if let Some(url) = &cli.gateway_url {
        config.gateway.base_url = Some(url.clone());
    }
    if let Some(key) = &cli.api_key {
        config.gateway.api_key = Some(key.clone());
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn gateway(config: &HiveConfig, offline: bool) -> Result<Arc<dyn ModelGateway>> {
    if offline {
        return Ok(Arc::new(EchoGateway));
    }
    if config.gateway.base_url.is_none() {
        bail!("No model gateway configured; set {GATEWAY_URL_ENV} or pass --offline");
    }
    let gw = HttpModelGateway::new(&config.gateway).context("Failed to build HTTP gateway")?;
    Ok(Arc::new(gw))
}

/// Filesystem-backed collaborators under `state_dir`.
fn collaborators(state_dir: &Path, gateway: Arc<dyn ModelGateway>) -> Result<Collaborators> {
    let lineage = FsPolicyLineage::open(state_dir)
        .with_context(|| format!("Failed to open lineage in {}", state_dir.display()))?;
    let benchmarks = JsonlBenchmarkLog::in_dir(state_dir).context("Failed to open benchmark log")?;
    let audit = JsonlAuditLog::in_dir(state_dir).context("Failed to open audit log")?;
    Ok(Collaborators {
        gateway,
        search: Arc::new(NoSearch),
        memory: Arc::new(InMemoryObservationalMemory::new()),
        lineage: Arc::new(lineage),
        benchmarks: Arc::new(benchmarks),
        audit: Arc::new(audit),
    })
}

async fn assemble(config: &HiveConfig, cli: &Cli) -> Result<Runtime> {
    let parts = collaborators(&cli.state_dir, gateway(config, cli.offline)?)?;
    Runtime::assemble(config, parts)
        .await
        .context("Failed to assemble runtime")
}

fn print_report(report: &RunReport) {
    println!("run {} (policy {})", report.run_id, report.policy_version);
    println!(
        "validation: {:.1} {} | coverage {} | confidence {:.2} | {} tokens | {} ms",
        report.validation.overall_score,
        if report.validation.passed {
            "passed"
        } else {
            "failed"
        },
        report.coverage,
        report.confidence,
        report.token_cost,
        report.execution_ms
    );
    for task in &report.tasks {
        match &task.error {
            Some(e) => println!("  {} [{}] {} ({e})", task.task_id, task.status, task.objective),
            None => println!("  {} [{}] {}", task.task_id, task.status, task.objective),
        }
    }
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    for note in &report.validation.notes {
        println!("note: {note}");
    }
    println!("\n{}", report.report);
    if !report.citations.is_empty() {
        println!("\nsources:");
        for c in &report.citations {
            println!("  {c}");
        }
    }
}

async fn cmd_run(config: &HiveConfig, cli: &Cli, query: Query, report_json: bool) -> Result<()> {
    let runtime = assemble(config, cli).await?;
    let report = runtime
        .orchestrator
        .submit(query)
        .await
        .context("Run failed")?;
    if report_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn read_batch(path: &Path) -> Result<Vec<Query>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            let item: BatchItem = serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid batch item", path.display(), idx + 1))?;
            Ok(item.into_query())
        })
        .collect()
}

async fn cmd_batch(config: &HiveConfig, cli: &Cli, file: &Path) -> Result<()> {
    let queries = read_batch(file)?;
    let runtime = assemble(config, cli).await?;
    let (orchestrator, store, learning) = runtime.start(CancelToken::new());

    let total = queries.len();
    let mut failed = 0;
    for query in queries {
        let id = query.id;
        match orchestrator.submit(query).await {
            Ok(report) => println!(
                "{id} {} {:.1} {}",
                report.coverage, report.validation.overall_score, report.policy_version
            ),
            Err(e) => {
                failed += 1;
                warn!(run_id = %id, error = %e, "query failed");
                println!("{id} failed: {e}");
            }
        }
    }

    // Dropping the orchestrator closes the run channel; the loop drains it.
    drop(orchestrator);
    let report = learning.await.context("Learning loop panicked")?;
    info!(
        total,
        failed,
        cycles = report.cycles,
        candidates = report.candidates,
        decisions = report.decisions,
        "batch finished"
    );
    println!(
        "{} queries, {} failed, {} training cycles, {} candidates, {} governor decisions; active policy {}",
        total,
        failed,
        report.cycles,
        report.candidates,
        report.decisions,
        store.active_id()
    );
    Ok(())
}

async fn cmd_policy_current(state_dir: &Path) -> Result<()> {
    let lineage = FsPolicyLineage::open(state_dir)?;
    match lineage.active().await? {
        Some(id) => {
            let version = lineage.get(id).await?;
            println!("{}", serde_json::to_string_pretty(&version)?);
        }
        None => println!("No active policy version in {}", state_dir.display()),
    }
    Ok(())
}

async fn cmd_policy_history(state_dir: &Path) -> Result<()> {
    let lineage = FsPolicyLineage::open(state_dir)?;
    let active = lineage.active().await?;
    let versions = lineage.list().await?;
    if versions.is_empty() {
        println!("No policy versions in {}", state_dir.display());
        return Ok(());
    }
    for v in versions {
        let marker = if Some(v.version_id) == active { "*" } else { " " };
        let parent = v
            .parent
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{marker} {} parent={} {} {}",
            v.version_id,
            parent,
            v.created_at.to_rfc3339(),
            serde_json::to_string(&v.origin)?
        );
    }
    Ok(())
}

async fn cmd_benchmark_log(state_dir: &Path, version: Option<VersionId>) -> Result<()> {
    let log = JsonlBenchmarkLog::in_dir(state_dir)?;
    let runs = match version {
        Some(id) => log.for_version(id).await?,
        None => log.list().await?,
    };
    if runs.is_empty() {
        println!("No benchmark runs recorded");
        return Ok(());
    }
    for run in runs {
        println!(
            "{} {} {} score={:.3} passed={} decision={}",
            run.created_at.to_rfc3339(),
            run.policy_version_id,
            run.suite_id,
            run.aggregate_score,
            run.passed,
            run.decision
        );
    }
    Ok(())
}

async fn cmd_benchmark_run(config: &HiveConfig, cli: &Cli) -> Result<()> {
    let mut runtime = assemble(config, cli).await?;
    let outcome = runtime
        .learning
        .evaluate_now()
        .await
        .context("Benchmark evaluation failed")?;
    println!(
        "{} score={:.3} passed={} decision={} active={}",
        outcome.active_run.policy_version_id,
        outcome.active_run.aggregate_score,
        outcome.active_run.passed,
        outcome.decision,
        outcome.active_after
    );
    Ok(())
}

async fn cmd_audit_tail(state_dir: &Path, lines: usize) -> Result<()> {
    let log = JsonlAuditLog::in_dir(state_dir)?;
    for record in log.tail(lines).await? {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

fn cmd_config_check(config: &HiveConfig) -> Result<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(state_dir: &Path) -> Cli {
        Cli::parse_from([
            "hive",
            "--offline",
            "--state-dir",
            state_dir.to_str().unwrap(),
            "policy",
            "history",
        ])
    }

    #[test]
    fn run_command_joins_query_words() {
        let cli = Cli::parse_from(["hive", "run", "-d", "minerals", "lithium", "supply"]);
        match cli.command {
            Commands::Run { domain, text, .. } => {
                assert_eq!(domain, "minerals");
                assert_eq!(text.join(" "), "lithium supply");
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn batch_file_parses_and_reports_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queries.jsonl");
        std::fs::write(
            &path,
            "{\"domain\":\"energy\",\"text\":\"grid storage\"}\n\n\
             {\"domain\":\"minerals\",\"text\":\"cobalt\",\"quality_target\":80}\n",
        )
        .unwrap();
        let queries = read_batch(&path).unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].quality_target, Some(80.0));

        std::fs::write(&path, "{\"domain\":\"energy\"}\n").unwrap();
        let err = read_batch(&path).unwrap_err();
        assert!(format!("{err:#}").contains(":1: invalid batch item"));
    }

    #[test]
    fn missing_gateway_url_requires_offline() {
        let config = HiveConfig::default();
        assert!(gateway(&config, false).is_err());
        assert!(gateway(&config, true).is_ok());
    }

    #[tokio::test]
    async fn offline_run_persists_seed_policy() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli(dir.path());
        let config = HiveConfig::default();
        let query = Query::new("energy", "grid scale storage outlook");

        cmd_run(&config, &cli, query, true).await.unwrap();

        let lineage = FsPolicyLineage::open(dir.path()).unwrap();
        assert_eq!(lineage.active().await.unwrap(), Some(VersionId::SEED));
        let audit = JsonlAuditLog::in_dir(dir.path()).unwrap();
        let names: Vec<&str> = audit
            .list()
            .await
            .unwrap()
            .iter()
            .map(|r| r.event.name())
            .collect();
        assert!(names.contains(&"version_created"));
        assert!(names.contains(&"run_metrics"));
    }

    #[tokio::test]
    async fn offline_benchmark_run_records_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli(dir.path());
        cmd_benchmark_run(&HiveConfig::default(), &cli).await.unwrap();
        let log = JsonlBenchmarkLog::in_dir(dir.path()).unwrap();
        assert_eq!(log.for_version(VersionId::SEED).await.unwrap().len(), 1);
    }
}
