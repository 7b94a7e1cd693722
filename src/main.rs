//! # Steward — autonomous ops scheduler
//!
//! Runs due jobs on a tick, turns what they find into deduplicated work
//! items, and produces uptime proof from the run history.
//!
//! Usage:
//!   steward tick                          # One tick, then exit (cron / systemd timer)
//!   steward run --interval-ms 60000       # Tick forever
//!   steward proof --hours 24 --out ./proof
//!   steward work list --status NEW

mod handlers;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use steward_core::config::{MAX_PROOF_WINDOW_HOURS, expand_path};
use steward_core::{Category, Database, Severity, StewardConfig};
use steward_heal::Incident;
use steward_proof::ProofEngine;
use steward_scheduler::{
    DispatchAlerter, JobsFile, Scheduler, SchedulerDb, targets_from_config,
};
use steward_work::{NewIssue, WorkItemQuery, WorkItemStore, WorkStatus};

#[derive(Parser)]
#[command(name = "steward", version, about = "🛰️ Steward — autonomous ops scheduler")]
struct Cli {
    /// Config file (default: ~/.steward/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single tick
    Tick,
    /// Tick on a fixed interval until interrupted
    Run {
        /// Defaults to scheduler.tick_interval_ms
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Upsert job definitions from a jobs file (or the built-in set)
    Seed {
        #[arg(long)]
        file: Option<String>,
    },
    /// List jobs and their state
    Jobs,
    /// Stop scheduling a job (jobs are never deleted)
    Disable { name: String },
    /// Resume scheduling a disabled job
    Enable { name: String },
    /// Show recent runs
    Runs {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Generate a proof report
    Proof {
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_PROOF_WINDOW_HOURS)))]
        hours: Option<u32>,
        /// Also write the artifact into this directory
        #[arg(long)]
        out: Option<String>,
    },
    /// Work item operations
    #[command(subcommand)]
    Work(WorkCommand),
    /// Playbook operations
    #[command(subcommand)]
    Playbooks(PlaybookCommand),
}

#[derive(Subcommand)]
enum WorkCommand {
    /// Query items with per-status and per-severity counts
    List {
        #[arg(long)]
        status: Option<WorkStatus>,
        #[arg(long)]
        severity: Option<Severity>,
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// File an issue by hand
    Issue {
        #[arg(long)]
        title: String,
        #[arg(long)]
        severity: Severity,
        #[arg(long, default_value = "ops")]
        category: Category,
        #[arg(long)]
        locator: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Move an item to another status
    Transition {
        id: String,
        to: WorkStatus,
        /// Cooldown applied when moving to FAILED
        #[arg(long)]
        cooldown_ms: Option<u64>,
    },
    /// Approve a gated item for dispatch
    Approve { id: String },
}

#[derive(Subcommand)]
enum PlaybookCommand {
    /// List playbooks
    List,
    /// Show which playbooks an incident would trigger
    Match {
        #[arg(long)]
        status_code: Option<u16>,
        #[arg(long)]
        locator: Option<String>,
        #[arg(long)]
        category: Option<Category>,
        #[arg(long)]
        error: Option<String>,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(path: Option<&str>) -> Result<StewardConfig> {
    let mut config = match path {
        Some(p) => StewardConfig::load_from(&expand_path(p))?,
        None => StewardConfig::load()?,
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
}

fn open_db(config: &StewardConfig) -> Result<Database> {
    let path = config.database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(Database::open(&path)?)
}

/// Seed from `file`, else `scheduler.jobs_path`, else the built-in set when
/// the table is empty. Returns how many definitions were written.
fn seed(config: &StewardConfig, store: &SchedulerDb, file: Option<&str>) -> Result<usize> {
    let defs = match file.or(config.scheduler.jobs_path.as_deref()) {
        Some(path) => JobsFile::load(&expand_path(path))?.jobs,
        None if store.load_jobs()?.is_empty() => handlers::default_jobs(config),
        None => return Ok(0),
    };
    for def in &defs {
        store.seed_job(def)?;
    }
    tracing::info!("🌱 Seeded {} job(s)", defs.len());
    Ok(defs.len())
}

fn build_scheduler(config: &StewardConfig, db: &Database) -> Result<Scheduler> {
    let store = SchedulerDb::new(db.clone());
    seed(config, &store, None)?;

    let registry = handlers::build_registry(config, db)?;
    let alerter = DispatchAlerter::new(targets_from_config(&config.alerts)).with_store(store);
    if alerter.target_names().is_empty() {
        tracing::warn!("⚠️  No alert channels configured; escalations are only recorded");
    }
    Ok(Scheduler::new(
        db.clone(),
        registry,
        Arc::new(alerter),
        config.scheduler.clone(),
    )?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "steward=debug" } else { "steward=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = load_config(cli.config.as_deref())?;
    let db = open_db(&config)?;

    match cli.command {
        Command::Tick => {
            let scheduler = build_scheduler(&config, &db)?;
            let report = scheduler.tick(Utc::now()).await?;
            print_json(&report)?;
        }
        Command::Run { interval_ms } => {
            let scheduler = build_scheduler(&config, &db)?;
            let every = Duration::from_millis(interval_ms.unwrap_or(config.scheduler.tick_interval_ms));
            println!("🛰️ Steward v{}", env!("CARGO_PKG_VERSION"));
            println!("   🗄️  Database: {}", config.database_path().display());
            println!("   ⏱️  Tick:     every {}ms", every.as_millis());
            println!();
            tokio::select! {
                _ = scheduler.run_forever(every) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("🛑 Interrupted, stopping");
                }
            }
        }
        Command::Seed { file } => {
            let store = SchedulerDb::new(db.clone());
            let written = match file.as_deref() {
                Some(path) => seed(&config, &store, Some(path))?,
                None if config.scheduler.jobs_path.is_some() => seed(&config, &store, None)?,
                None => {
                    let defs = handlers::default_jobs(&config);
                    for def in &defs {
                        store.seed_job(def)?;
                    }
                    defs.len()
                }
            };
            // Fail here rather than on the next tick.
            handlers::build_registry(&config, &db)?.validate_jobs(&store.load_jobs()?)?;
            println!("✅ Seeded {written} job(s)");
        }
        Command::Jobs => {
            let jobs = SchedulerDb::new(db).load_jobs()?;
            if jobs.is_empty() {
                println!("No jobs. Run `steward seed` first.");
            }
            for job in jobs {
                println!(
                    "{} {:<20} {:<16} {:<10} last={} next={} failures={}",
                    if job.enabled { "●" } else { "○" },
                    job.name,
                    job.handler,
                    job.schedule.kind(),
                    job.last_status.map(|s| s.as_str()).unwrap_or("-"),
                    job.next_run_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "due".into()),
                    job.consecutive_failures,
                );
            }
        }
        Command::Disable { name } => set_job_enabled(db, &name, false)?,
        Command::Enable { name } => set_job_enabled(db, &name, true)?,
        Command::Runs { limit } => {
            print_json(&SchedulerDb::new(db).recent_runs(limit)?)?;
        }
        Command::Proof { hours, out } => {
            let engine = ProofEngine::new(SchedulerDb::new(db), &config.proof);
            let report = engine.generate(hours.unwrap_or(config.proof.window_hours), Utc::now())?;
            print_json(&report)?;
            if let Some(dir) = out {
                let path = ProofEngine::write(&report, &expand_path(&dir))?;
                eprintln!("📄 Wrote {}", path.display());
            }
            if !report.verification.overall_healthy {
                std::process::exit(2);
            }
        }
        Command::Work(cmd) => run_work(cmd, WorkItemStore::new(db))?,
        Command::Playbooks(cmd) => run_playbooks(cmd, &config)?,
    }

    Ok(())
}

fn set_job_enabled(db: Database, name: &str, enabled: bool) -> Result<()> {
    if !SchedulerDb::new(db).set_enabled(name, enabled)? {
        anyhow::bail!("no job '{name}'");
    }
    println!("✅ {name} {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

fn run_work(cmd: WorkCommand, store: WorkItemStore) -> Result<()> {
    let now = Utc::now();
    match cmd {
        WorkCommand::List {
            status,
            severity,
            limit,
        } => print_json(&store.query(&WorkItemQuery {
            status,
            severity,
            limit,
        })?)?,
        WorkCommand::Issue {
            title,
            severity,
            category,
            locator,
            description,
        } => {
            let mut issue = NewIssue::new(&title, severity, category).with_description(&description);
            issue.locator = locator;
            print_json(&store.upsert_issue(&issue, now)?)?;
        }
        WorkCommand::Transition {
            id,
            to,
            cooldown_ms,
        } => {
            let cooldown = cooldown_ms.map(Duration::from_millis);
            if !store.advance(&id, to, cooldown, now)? {
                anyhow::bail!("'{id}' cannot move to {to}");
            }
            println!("✅ {id} → {to}");
        }
        WorkCommand::Approve { id } => {
            if !store.approve(&id, now)? {
                anyhow::bail!("no work item '{id}'");
            }
            println!("✅ Approved {id}");
        }
    }
    Ok(())
}

fn run_playbooks(cmd: PlaybookCommand, config: &StewardConfig) -> Result<()> {
    let table = handlers::load_playbooks(config)?;
    match cmd {
        PlaybookCommand::List => {
            for pb in &table.playbooks {
                let actions: Vec<&str> = pb.actions.iter().map(|a| a.action.as_str()).collect();
                println!("{:<16} {:<32} {}", pb.id, pb.name, actions.join(" → "));
            }
        }
        PlaybookCommand::Match {
            status_code,
            locator,
            category,
            error,
        } => {
            let incident = Incident {
                status_code,
                locator,
                category,
                error,
                url: None,
            };
            let matched: Vec<&str> = table.matches(&incident).iter().map(|p| p.id.as_str()).collect();
            print_json(&matched)?;
        }
    }
    Ok(())
}
