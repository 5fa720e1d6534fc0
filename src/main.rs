use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use apipulse::model::{Collection, NotifySettings, Schedule, TestDefinition};
use apipulse::notify::LogSink;
use apipulse::recurrence::{self, RecurrenceRule, TimeOfDay, WeekdaySpec};
use apipulse::runner::{CollectionRunner, HttpExecutor, RunTrigger};
use apipulse::scheduler::ScheduleDispatcher;
use apipulse::storage::Store;

#[derive(Parser)]
#[command(
    name = "apipulse",
    about = "Self-hosted API test runner with recurring schedules",
    version,
    long_about = None
)]
struct Cli {
    /// Database path
    #[arg(long, global = true, default_value = "data/apipulse.db")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + schedule triggers)
    Serve {
        /// Bind address
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,

        /// Poll for due schedules instead of arming per-schedule triggers
        #[arg(long)]
        poll: bool,
    },

    /// Manage test collections
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Manage recurring schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Inspect run history
    Run {
        #[command(subcommand)]
        action: RunAction,
    },
}

#[derive(Subcommand)]
enum CollectionAction {
    /// Create a collection
    Add {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
    },

    /// Add an HTTP test to a collection
    AddTest {
        #[arg(long)]
        collection: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "GET")]
        method: String,
        #[arg(long)]
        url: String,
        /// Request header, repeatable (name=value)
        #[arg(long = "header")]
        headers: Vec<String>,
        #[arg(long)]
        body: Option<String>,
        /// Expected HTTP status (informational)
        #[arg(long)]
        expect: Option<u16>,
    },

    /// List collections
    List {
        #[arg(long)]
        owner: Option<String>,
    },

    /// Run a collection ad hoc
    Run {
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Create a schedule for a collection
    Add {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        collection: Uuid,
        /// Cadence kind: minute, hour, day, or week
        #[arg(long)]
        kind: String,
        /// Interval for minute/hour cadences
        #[arg(long)]
        every: Option<u32>,
        /// Time of day (HH:MM, UTC) for day/week cadences
        #[arg(long)]
        at: Option<String>,
        /// Weekday for week cadences (monday..sunday, weekday, every)
        #[arg(long)]
        weekday: Option<String>,
        /// Send a run report to this recipient
        #[arg(long)]
        notify: Option<String>,
    },

    /// List schedules with their next computed run
    List {
        #[arg(long)]
        owner: Option<String>,
    },

    /// Delete a schedule
    Remove {
        #[arg(long)]
        id: Uuid,
    },

    /// Activate a schedule
    Enable {
        #[arg(long)]
        id: Uuid,
    },

    /// Deactivate a schedule
    Disable {
        #[arg(long)]
        id: Uuid,
    },

    /// Run a schedule's collection immediately (does not touch last-run)
    RunNow {
        #[arg(long)]
        id: Uuid,
    },

    /// Preview upcoming fire instants for all active schedules
    NextRuns {
        /// Hours to preview
        #[arg(long, default_value = "24")]
        hours: u64,
    },
}

#[derive(Subcommand)]
enum RunAction {
    /// List recent runs
    List {
        #[arg(long)]
        collection: Option<Uuid>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, default_value = "20")]
        limit: i64,
    },

    /// Show per-test results for a run
    Results {
        #[arg(long)]
        id: Uuid,
    },
}

fn parse_headers(raw: &[String]) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::new();
    for entry in raw {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("header '{}' is not name=value", entry))?;
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }
    Ok(headers)
}

fn build_rule(
    kind: &str,
    every: Option<u32>,
    at: Option<&str>,
    weekday: Option<&str>,
) -> Result<RecurrenceRule> {
    let at = at.map(str::parse::<TimeOfDay>).transpose()?;
    let weekday = weekday.map(WeekdaySpec::parse).transpose()?;
    Ok(RecurrenceRule::from_parts(kind, every, every, at, weekday, true)?)
}

fn dispatcher_for(store: &Store) -> Result<ScheduleDispatcher> {
    let executor = Arc::new(HttpExecutor::new(HttpExecutor::DEFAULT_TIMEOUT)?);
    let runner = CollectionRunner::new(store.clone(), executor);
    Ok(ScheduleDispatcher::new(
        store.clone(),
        runner,
        Arc::new(LogSink),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, poll } => {
            tracing::info!(%bind, "Starting apipulse daemon");
            apipulse::serve(apipulse::ServeOptions {
                bind,
                db_path: cli.db,
                poll,
            })
            .await?;
        }

        Commands::Collection { action } => {
            let store = Store::open(&cli.db)?;
            match action {
                CollectionAction::Add {
                    owner,
                    name,
                    description,
                } => {
                    let collection = Collection {
                        id: Uuid::new_v4(),
                        owner_id: owner,
                        name: name.clone(),
                        description,
                        created_at: Utc::now(),
                    };
                    store.insert_collection(&collection)?;
                    println!("Collection '{}' created: {}", name, collection.id);
                }
                CollectionAction::AddTest {
                    collection,
                    name,
                    method,
                    url,
                    headers,
                    body,
                    expect,
                } => {
                    let method = method.to_ascii_uppercase();
                    reqwest::Method::from_bytes(method.as_bytes())
                        .map_err(|_| anyhow!("invalid HTTP method '{}'", method))?;
                    store
                        .get_collection(collection)?
                        .ok_or_else(|| anyhow!("collection {} not found", collection))?;
                    let position = store.tests_for_collection(collection)?.len() as i64;
                    let test = TestDefinition {
                        id: Uuid::new_v4(),
                        collection_id: collection,
                        name: name.clone(),
                        method,
                        url,
                        headers: parse_headers(&headers)?,
                        body,
                        expected_status: expect,
                        position,
                    };
                    store.insert_test(&test)?;
                    println!("Test '{}' added: {}", name, test.id);
                }
                CollectionAction::List { owner } => {
                    let collections = store.list_collections(owner.as_deref())?;
                    if collections.is_empty() {
                        println!("No collections found.");
                    } else {
                        println!("{:<36} | {:<12} | {:<5} | Name", "Id", "Owner", "Tests");
                        for c in collections {
                            let tests = store.tests_for_collection(c.id)?.len();
                            println!("{:<36} | {:<12} | {:<5} | {}", c.id, c.owner_id, tests, c.name);
                        }
                    }
                }
                CollectionAction::Run { id } => {
                    let collection = store
                        .get_collection(id)?
                        .ok_or_else(|| anyhow!("collection {} not found", id))?;
                    let executor = Arc::new(HttpExecutor::new(HttpExecutor::DEFAULT_TIMEOUT)?);
                    let runner = CollectionRunner::new(store.clone(), executor);
                    let trigger = RunTrigger {
                        owner_id: collection.owner_id.clone(),
                        schedule_id: None,
                    };
                    let run = runner
                        .run(&collection, &trigger)
                        .await
                        .context("collection run failed")?;
                    println!(
                        "Run {} completed: {}/{} passed in {}ms",
                        run.id, run.success_count, run.total_tests, run.total_duration_ms
                    );
                }
            }
        }

        Commands::Schedule { action } => {
            let store = Store::open(&cli.db)?;
            match action {
                ScheduleAction::Add {
                    owner,
                    name,
                    collection,
                    kind,
                    every,
                    at,
                    weekday,
                    notify,
                } => {
                    let rule = build_rule(&kind, every, at.as_deref(), weekday.as_deref())?;
                    let collection_row = store
                        .get_collection(collection)?
                        .ok_or_else(|| anyhow!("collection {} not found", collection))?;
                    if collection_row.owner_id != owner {
                        anyhow::bail!("collection {} belongs to another owner", collection);
                    }
                    let schedule = Schedule {
                        id: Uuid::new_v4(),
                        owner_id: owner,
                        name: name.clone(),
                        collection_id: collection,
                        rule,
                        notify: NotifySettings {
                            enabled: notify.is_some(),
                            recipient: notify,
                        },
                        last_run: None,
                        created_at: Utc::now(),
                    };
                    store.insert_schedule(&schedule)?;
                    let next = recurrence::next_run_after(&schedule.rule, None, Utc::now());
                    println!("Schedule '{}' created: {}", name, schedule.id);
                    if let Some(next) = next {
                        println!("Next run (once the daemon is up): {}", next.to_rfc3339());
                    }
                }
                ScheduleAction::List { owner } => {
                    let schedules = store.list_schedules(owner.as_deref())?;
                    if schedules.is_empty() {
                        println!("No schedules found.");
                    } else {
                        println!(
                            "{:<36} | {:<16} | {:<6} | {:<25} | Name",
                            "Id", "Cron", "Active", "Next run"
                        );
                        let now = Utc::now();
                        for s in schedules {
                            let next = recurrence::next_run_after(&s.rule, s.last_run, now)
                                .map(|t| t.to_rfc3339())
                                .unwrap_or_else(|| "-".to_string());
                            println!(
                                "{:<36} | {:<16} | {:<6} | {:<25} | {}",
                                s.id,
                                s.rule.cron_expr(),
                                s.rule.active,
                                next,
                                s.name
                            );
                        }
                    }
                }
                ScheduleAction::Remove { id } => {
                    if store.delete_schedule(id)? {
                        println!("Schedule {} removed.", id);
                    } else {
                        anyhow::bail!("schedule {} not found", id);
                    }
                }
                ScheduleAction::Enable { id } => {
                    if !store.set_schedule_active(id, true)? {
                        anyhow::bail!("schedule {} not found", id);
                    }
                    println!("Schedule {} enabled.", id);
                }
                ScheduleAction::Disable { id } => {
                    if !store.set_schedule_active(id, false)? {
                        anyhow::bail!("schedule {} not found", id);
                    }
                    println!("Schedule {} disabled.", id);
                }
                ScheduleAction::RunNow { id } => {
                    let dispatcher = dispatcher_for(&store)?;
                    let run = dispatcher.run_now(id).await?;
                    println!(
                        "Run {} completed: {}/{} passed in {}ms",
                        run.id, run.success_count, run.total_tests, run.total_duration_ms
                    );
                }
                ScheduleAction::NextRuns { hours } => {
                    let now = Utc::now();
                    let until = now + chrono::Duration::hours(hours as i64);
                    let mut upcoming = Vec::new();
                    for s in store.active_schedules()? {
                        for instant in
                            recurrence::preview_occurrences(&s.rule, s.last_run, now, until)
                        {
                            upcoming.push((instant, s.name.clone()));
                        }
                    }
                    upcoming.sort();
                    if upcoming.is_empty() {
                        println!("No runs scheduled in next {} hours.", hours);
                    } else {
                        println!("Upcoming runs (next {} hours):", hours);
                        for (instant, name) in upcoming {
                            println!("{} : {}", instant.to_rfc3339(), name);
                        }
                    }
                }
            }
        }

        Commands::Run { action } => {
            let store = Store::open(&cli.db)?;
            match action {
                RunAction::List {
                    collection,
                    owner,
                    limit,
                } => {
                    let runs = store.list_runs(collection, owner.as_deref(), limit)?;
                    if runs.is_empty() {
                        println!("No runs found.");
                    } else {
                        println!(
                            "{:<36} | {:<9} | {:<25} | {:>4}/{:<4} | Duration",
                            "Id", "Status", "Started", "Pass", "Total"
                        );
                        for r in runs {
                            println!(
                                "{:<36} | {:<9} | {:<25} | {:>4}/{:<4} | {}ms",
                                r.id,
                                r.status.to_string(),
                                r.started_at.to_rfc3339(),
                                r.success_count,
                                r.total_tests,
                                r.total_duration_ms
                            );
                        }
                    }
                }
                RunAction::Results { id } => {
                    let results = store.results_for_run(id)?;
                    if results.is_empty() {
                        println!("No results for run {}.", id);
                    } else {
                        println!("{:<36} | {:<6} | {:<10} | Error", "Test", "Status", "Duration");
                        for r in results {
                            println!(
                                "{:<36} | {:<6} | {:<10} | {}",
                                r.test_id,
                                r.status_code,
                                format!("{}ms", r.duration_ms),
                                r.error.as_deref().unwrap_or("-")
                            );
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
