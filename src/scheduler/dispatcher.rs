//! Fire handling: revalidate, run, record, report.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::model::Run;
use crate::notify::NotificationSink;
use crate::runner::{outcome_is_success, CollectionRunner, RunTrigger, RunnerError};
use crate::storage::Store;

/// What happened when a trigger fired. The registry uses this to decide
/// whether to re-arm.
#[derive(Debug)]
pub enum FireOutcome {
    Completed(Run),
    /// Schedule was deleted between arming and firing.
    ScheduleGone,
    /// Schedule was deactivated between arming and firing.
    Inactive,
    /// Collection had no tests; logged and skipped, schedule stays active.
    EmptyCollection,
    /// Unexpected failure; logged, schedule stays active and retries at the
    /// next computed occurrence.
    Failed,
}

#[derive(Clone)]
pub struct ScheduleDispatcher {
    store: Store,
    runner: CollectionRunner,
    sink: Arc<dyn NotificationSink>,
}

impl ScheduleDispatcher {
    pub fn new(store: Store, runner: CollectionRunner, sink: Arc<dyn NotificationSink>) -> Self {
        Self { store, runner, sink }
    }

    /// Handle a trigger fire for `schedule_id`. Never returns an error: every
    /// failure mode is logged and folded into the outcome so a single bad run
    /// can not deactivate the schedule.
    pub async fn on_fire(&self, schedule_id: Uuid) -> FireOutcome {
        // The dispatch instant, not completion, becomes last_run.
        let fired_at = Utc::now();

        let schedule = match self.store.get_schedule(schedule_id) {
            Ok(Some(schedule)) => schedule,
            Ok(None) => {
                warn!(schedule=%schedule_id, "Fired for a deleted schedule");
                return FireOutcome::ScheduleGone;
            }
            Err(e) => {
                error!(schedule=%schedule_id, "Failed to reload schedule: {:#}", e);
                return FireOutcome::Failed;
            }
        };
        if !schedule.rule.active {
            info!(schedule=%schedule.name, "Schedule deactivated before fire, skipping");
            return FireOutcome::Inactive;
        }

        let collection = match self.store.get_collection(schedule.collection_id) {
            Ok(Some(collection)) => collection,
            Ok(None) => {
                error!(schedule=%schedule.name, collection=%schedule.collection_id, "Collection missing");
                return FireOutcome::Failed;
            }
            Err(e) => {
                error!(schedule=%schedule.name, "Failed to load collection: {:#}", e);
                return FireOutcome::Failed;
            }
        };

        let trigger = RunTrigger {
            owner_id: schedule.owner_id.clone(),
            schedule_id: Some(schedule.id),
        };
        let run = match self.runner.run(&collection, &trigger).await {
            Ok(run) => run,
            Err(RunnerError::EmptyCollection(name)) => {
                warn!(schedule=%schedule.name, collection=%name, "Collection is empty, nothing to run");
                return FireOutcome::EmptyCollection;
            }
            Err(e) => {
                error!(schedule=%schedule.name, "Run failed: {:#}", e);
                return FireOutcome::Failed;
            }
        };

        if let Err(e) = self.store.set_last_run(schedule.id, fired_at) {
            error!(schedule=%schedule.name, "Failed to record last_run: {:#}", e);
        }

        if schedule.notify.enabled {
            self.deliver_report(&schedule.name, schedule.notify.recipient.as_deref(), &run)
                .await;
        }

        FireOutcome::Completed(run)
    }

    /// Report delivery is fire-and-forget: failures are logged and never
    /// rolled back against the run or the schedule.
    async fn deliver_report(&self, schedule_name: &str, recipient: Option<&str>, run: &Run) {
        let Some(recipient) = recipient else {
            warn!(schedule=%schedule_name, "Notification enabled but no recipient configured");
            return;
        };
        let failed = match self.store.results_for_run(run.id) {
            Ok(results) => results
                .into_iter()
                .filter(|r| !outcome_is_success(r.status_code, r.error.as_deref()))
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!(run=%run.id, "Failed to load results for report: {:#}", e);
                Vec::new()
            }
        };
        if let Err(e) = self.sink.send(recipient, schedule_name, run, &failed).await {
            warn!(schedule=%schedule_name, %recipient, "Report delivery failed: {:#}", e);
        }
    }

    /// Ad hoc "run this schedule now", bypassing the trigger. Reuses the
    /// runner path but leaves `last_run` and notification untouched, and
    /// surfaces errors synchronously to the caller.
    pub async fn run_now(&self, schedule_id: Uuid) -> Result<Run> {
        let schedule = self
            .store
            .get_schedule(schedule_id)?
            .ok_or_else(|| anyhow!("schedule {} not found", schedule_id))?;
        let collection = self
            .store
            .get_collection(schedule.collection_id)?
            .ok_or_else(|| anyhow!("collection {} not found", schedule.collection_id))?;
        let trigger = RunTrigger {
            owner_id: schedule.owner_id.clone(),
            schedule_id: Some(schedule.id),
        };
        self.runner
            .run(&collection, &trigger)
            .await
            .with_context(|| format!("failed to run schedule '{}'", schedule.name))
    }
}
