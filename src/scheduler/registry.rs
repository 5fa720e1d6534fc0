//! Armed-trigger registry: one self-rescheduling one-shot timer per active
//! schedule.
//!
//! Day and week cadences have non-uniform gaps ("next Monday at 17:00"), so
//! a fixed-period repeating timer cannot express them; each trigger fires
//! once and re-arms from fresh store state. The trigger map is guarded by a
//! single mutex so a user edit and a just-fired self-reinstall can never
//! leave two armed triggers for the same schedule.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::model::Schedule;
use crate::recurrence::next_run_after;
use crate::storage::Store;

use super::dispatcher::{FireOutcome, ScheduleDispatcher};

struct ArmedTrigger {
    generation: u64,
    fire_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

struct Inner {
    store: Store,
    dispatcher: ScheduleDispatcher,
    triggers: Mutex<HashMap<Uuid, ArmedTrigger>>,
    generation: AtomicU64,
}

#[derive(Clone)]
pub struct ScheduleRegistry {
    inner: Arc<Inner>,
}

impl ScheduleRegistry {
    pub fn new(store: Store, dispatcher: ScheduleDispatcher) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                dispatcher,
                triggers: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Arm (or re-arm) the trigger for `schedule`. Any previously armed
    /// trigger for the same id is cancelled first, so repeated installs are
    /// idempotent. Returns the computed fire instant, or `None` when the
    /// rule is inactive (in which case any armed trigger is removed).
    pub async fn install(&self, schedule: &Schedule) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        let Some(fire_at) = next_run_after(&schedule.rule, schedule.last_run, now) else {
            self.uninstall(schedule.id).await;
            return None;
        };
        let delay = (fire_at - now).to_std().unwrap_or_default();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;

        let registry = self.clone();
        let id = schedule.id;

        let mut triggers = self.inner.triggers.lock().await;
        if let Some(old) = triggers.remove(&id) {
            old.handle.abort();
            debug!(schedule=%id, "Replaced armed trigger");
        }
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.fire(id, generation).await;
        });
        triggers.insert(
            id,
            ArmedTrigger {
                generation,
                fire_at,
                handle,
            },
        );
        debug!(schedule=%id, fire_at=%fire_at.to_rfc3339(), "Trigger armed");
        Some(fire_at)
    }

    /// Cancel the armed trigger for `id`, if any.
    pub async fn uninstall(&self, id: Uuid) {
        let mut triggers = self.inner.triggers.lock().await;
        if let Some(trigger) = triggers.remove(&id) {
            trigger.handle.abort();
            info!(schedule=%id, "Trigger cancelled");
        }
    }

    /// Restart recovery: arm a trigger for every persisted active schedule.
    pub async fn install_all(&self) -> Result<usize> {
        let schedules = self.inner.store.active_schedules()?;
        let mut armed = 0;
        for schedule in &schedules {
            if self.install(schedule).await.is_some() {
                armed += 1;
            }
        }
        info!(%armed, "Installed triggers for active schedules");
        Ok(armed)
    }

    /// Cancel every armed trigger. Called on graceful shutdown.
    pub async fn shutdown(&self) {
        let mut triggers = self.inner.triggers.lock().await;
        for (_, trigger) in triggers.drain() {
            trigger.handle.abort();
        }
        info!("All triggers cancelled");
    }

    /// Armed triggers for one schedule id; 0 or 1 by construction.
    pub async fn armed_count(&self, id: Uuid) -> usize {
        usize::from(self.inner.triggers.lock().await.contains_key(&id))
    }

    pub async fn armed_total(&self) -> usize {
        self.inner.triggers.lock().await.len()
    }

    /// The instant the armed trigger for `id` will fire, for display.
    pub async fn next_fire_at(&self, id: Uuid) -> Option<DateTime<Utc>> {
        self.inner
            .triggers
            .lock()
            .await
            .get(&id)
            .map(|t| t.fire_at)
    }

    // Boxed return type (rather than `async fn`) breaks the cyclic
    // install -> fire -> install opaque-future Send inference.
    fn fire(
        &self,
        id: Uuid,
        generation: u64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(self.fire_inner(id, generation))
    }

    async fn fire_inner(&self, id: Uuid, generation: u64) {
        {
            let mut triggers = self.inner.triggers.lock().await;
            match triggers.get(&id) {
                Some(trigger) if trigger.generation == generation => {
                    triggers.remove(&id);
                }
                // A newer trigger replaced this one while it slept; it owns
                // the schedule now.
                _ => return,
            }
        }

        let outcome = self.inner.dispatcher.on_fire(id).await;
        match outcome {
            FireOutcome::ScheduleGone | FireOutcome::Inactive => {
                debug!(schedule=%id, ?outcome, "Not re-arming");
            }
            FireOutcome::Completed(_) | FireOutcome::EmptyCollection | FireOutcome::Failed => {
                // Self-reschedule from fresh state; last_run was updated by
                // the dispatcher on a completed run.
                match self.inner.store.get_schedule(id) {
                    Ok(Some(schedule)) if schedule.rule.active => {
                        let _ = self.install(&schedule).await;
                    }
                    Ok(_) => debug!(schedule=%id, "Schedule gone or inactive, not re-arming"),
                    Err(e) => {
                        error!(schedule=%id, "Failed to reload schedule for re-arm: {:#}", e)
                    }
                }
            }
        }
    }
}
