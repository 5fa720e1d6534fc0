//! Poll-mode alternative to armed triggers, plus the stale-run reaper.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::recurrence::{default_tolerance, is_due_now};
use crate::storage::Store;

use super::dispatcher::{FireOutcome, ScheduleDispatcher};

/// One pass over all active schedules, firing those that are due. Returns
/// the number of completed runs. Equivalent in due-ness to the armed-trigger
/// path; deployments pick one with `serve --poll`.
pub async fn run_due_sweep(store: &Store, dispatcher: &ScheduleDispatcher) -> Result<usize> {
    let now = Utc::now();
    let tolerance = default_tolerance();
    let mut fired = 0;

    for schedule in store.active_schedules()? {
        if !is_due_now(&schedule.rule, schedule.last_run, now, tolerance) {
            continue;
        }
        info!(schedule=%schedule.name, "Schedule due");
        match dispatcher.on_fire(schedule.id).await {
            FireOutcome::Completed(run) => {
                debug!(schedule=%schedule.name, run=%run.id, "Sweep run completed");
                fired += 1;
            }
            outcome => debug!(schedule=%schedule.name, ?outcome, "Sweep skipped schedule"),
        }
    }
    Ok(fired)
}

/// Background loop around [`run_due_sweep`].
pub async fn run_poll_loop(store: Store, dispatcher: ScheduleDispatcher, every: Duration) {
    info!(interval_secs = every.as_secs(), "Schedule poll loop started");
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if let Err(e) = run_due_sweep(&store, &dispatcher).await {
            error!("Due sweep failed: {:#}", e);
        }
    }
}

/// Background loop that marks runs stuck in `running` as failed. A crash
/// between run creation and completion otherwise leaves them "in progress
/// forever" in the history view.
pub async fn run_reaper_loop(store: Store, older_than: chrono::Duration, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match store.fail_stale_runs(older_than, Utc::now()) {
            Ok(0) => {}
            Ok(n) => warn!(runs = n, "Marked stale running runs as failed"),
            Err(e) => error!("Stale run sweep failed: {:#}", e),
        }
    }
}
