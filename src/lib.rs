//! apipulse -- self-hosted API test runner with recurring schedules.
//!
//! Users group HTTP test definitions into collections, run them ad hoc or on
//! minute/hour/day/week cadences, and review historical results. This crate
//! provides the recurrence calculator, the collection runner, the trigger
//! registry/dispatcher that ties them together over time, the SQLite store,
//! and the HTTP/CLI surfaces.

pub mod api;
pub mod model;
pub mod notify;
pub mod recurrence;
pub mod runner;
pub mod scheduler;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::notify::LogSink;
use crate::runner::{CollectionRunner, HttpExecutor};
use crate::scheduler::{ScheduleDispatcher, ScheduleRegistry};
use crate::storage::Store;

/// Daemon options.
pub struct ServeOptions {
    pub bind: String,
    pub db_path: String,
    /// Use a periodic due-sweep instead of armed per-schedule triggers.
    pub poll: bool,
}

/// How long a run may sit in `running` before the reaper fails it.
const STALE_RUN_AFTER_HOURS: i64 = 1;
const REAPER_INTERVAL: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Start the apipulse daemon: API server, schedule triggers, and reaper.
pub async fn serve(opts: ServeOptions) -> Result<()> {
    tracing::info!(db_path = %opts.db_path, "Initializing database");
    let store = Store::open(&opts.db_path)?;

    let executor = Arc::new(HttpExecutor::new(HttpExecutor::DEFAULT_TIMEOUT)?);
    let runner = CollectionRunner::new(store.clone(), executor);
    let dispatcher = ScheduleDispatcher::new(store.clone(), runner.clone(), Arc::new(LogSink));
    let registry = ScheduleRegistry::new(store.clone(), dispatcher.clone());

    if opts.poll {
        let poll_store = store.clone();
        let poll_dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            scheduler::sweep::run_poll_loop(poll_store, poll_dispatcher, POLL_INTERVAL).await;
        });
    } else {
        // Restart recovery: re-arm every persisted active schedule.
        registry.install_all().await?;
    }

    let reaper_store = store.clone();
    tokio::spawn(async move {
        scheduler::sweep::run_reaper_loop(
            reaper_store,
            chrono::Duration::hours(STALE_RUN_AFTER_HOURS),
            REAPER_INTERVAL,
        )
        .await;
    });

    let state = api::AppState {
        store,
        registry: registry.clone(),
        dispatcher,
        runner,
    };
    let app = api::router(state);

    let addr: std::net::SocketAddr = opts.bind.parse()?;
    tracing::info!(%addr, "apipulse listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            registry.shutdown().await;
        })
        .await?;

    Ok(())
}
