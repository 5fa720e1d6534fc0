//! Collection fan-out: run every test, isolate failures, aggregate a run.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::model::{Collection, Run, RunStatus, TestResult};
use crate::storage::Store;

use super::executor::TestExecutor;
use super::{outcome_is_success, RunnerError};

/// Who asked for the run. `schedule_id` is set only for schedule-triggered
/// runs; ad hoc runs leave it empty and share the same code path.
#[derive(Debug, Clone)]
pub struct RunTrigger {
    pub owner_id: String,
    pub schedule_id: Option<Uuid>,
}

/// Fans the executor out over a collection's tests and records the run.
///
/// The runner never touches `Schedule.last_run`; that belongs to the
/// dispatcher, which keeps ad hoc collection runs on the identical path.
#[derive(Clone)]
pub struct CollectionRunner {
    store: Store,
    executor: Arc<dyn TestExecutor>,
}

impl CollectionRunner {
    pub fn new(store: Store, executor: Arc<dyn TestExecutor>) -> Self {
        Self { store, executor }
    }

    /// Execute all tests of `collection` concurrently and return the
    /// completed run summary. Individual results are persisted against the
    /// run id; callers needing them query the store.
    pub async fn run(
        &self,
        collection: &Collection,
        trigger: &RunTrigger,
    ) -> Result<Run, RunnerError> {
        let tests = self.store.tests_for_collection(collection.id)?;
        if tests.is_empty() {
            return Err(RunnerError::EmptyCollection(collection.name.clone()));
        }

        let mut run = Run {
            id: Uuid::new_v4(),
            collection_id: collection.id,
            schedule_id: trigger.schedule_id,
            owner_id: trigger.owner_id.clone(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            total_tests: tests.len() as i64,
            success_count: 0,
            failure_count: 0,
            total_duration_ms: 0,
        };
        self.store.insert_run(&run)?;
        info!(run=%run.id, collection=%collection.name, tests=%tests.len(), "Collection run started");

        // One test's transport failure must not abort any other; the
        // executor returns failures as values, so join_all never
        // short-circuits.
        let outcomes = futures::future::join_all(tests.iter().map(|test| {
            let executor = Arc::clone(&self.executor);
            async move { (test.id, test.name.clone(), executor.execute(test).await) }
        }))
        .await;

        let mut success_count = 0i64;
        let mut failure_count = 0i64;
        let mut total_duration_ms = 0i64;

        for (test_id, test_name, outcome) in outcomes {
            let ok = outcome_is_success(outcome.status_code, outcome.error.as_deref());
            if ok {
                success_count += 1;
            } else {
                failure_count += 1;
            }
            total_duration_ms += outcome.duration_ms;
            debug!(
                run=%run.id, test=%test_name, status=%outcome.status_code,
                duration_ms=%outcome.duration_ms, success=%ok, "Test finished"
            );

            self.store.insert_result(&TestResult {
                id: Uuid::new_v4(),
                run_id: run.id,
                test_id,
                status_code: outcome.status_code,
                duration_ms: outcome.duration_ms,
                error: outcome.error,
                response_body: outcome.response_body,
            })?;
        }

        let completed_at = Utc::now();
        self.store
            .complete_run(run.id, success_count, failure_count, total_duration_ms, completed_at)?;

        run.status = RunStatus::Completed;
        run.completed_at = Some(completed_at);
        run.success_count = success_count;
        run.failure_count = failure_count;
        run.total_duration_ms = total_duration_ms;

        info!(
            run=%run.id, success=%success_count, failure=%failure_count,
            duration_ms=%total_duration_ms, "Collection run completed"
        );
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TestDefinition;
    use crate::runner::executor::Outcome;
    use std::collections::HashMap;

    /// Scripted executor: URL decides the outcome.
    struct ScriptedExecutor;

    #[async_trait::async_trait]
    impl TestExecutor for ScriptedExecutor {
        async fn execute(&self, test: &TestDefinition) -> Outcome {
            if test.url.contains("refused") {
                Outcome {
                    status_code: 0,
                    duration_ms: 5,
                    error: Some("connection refused".to_string()),
                    response_body: None,
                }
            } else if test.url.contains("missing") {
                Outcome {
                    status_code: 404,
                    duration_ms: 10,
                    error: None,
                    response_body: Some("not found".to_string()),
                }
            } else {
                Outcome {
                    status_code: 200,
                    duration_ms: 20,
                    error: None,
                    response_body: Some("ok".to_string()),
                }
            }
        }
    }

    fn fixture() -> (Store, Collection, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db").to_str().unwrap()).unwrap();
        let collection = Collection {
            id: Uuid::new_v4(),
            owner_id: "alice".to_string(),
            name: "api-smoke".to_string(),
            description: None,
            created_at: Utc::now(),
        };
        store.insert_collection(&collection).unwrap();
        (store, collection, dir)
    }

    fn add_test(store: &Store, collection_id: Uuid, name: &str, url: &str) -> Uuid {
        let test = TestDefinition {
            id: Uuid::new_v4(),
            collection_id,
            name: name.to_string(),
            method: "GET".to_string(),
            url: url.to_string(),
            headers: HashMap::new(),
            body: None,
            expected_status: None,
            position: 0,
        };
        store.insert_test(&test).unwrap();
        test.id
    }

    fn ad_hoc() -> RunTrigger {
        RunTrigger {
            owner_id: "alice".to_string(),
            schedule_id: None,
        }
    }

    #[tokio::test]
    async fn aggregates_mixed_outcomes() {
        let (store, collection, _dir) = fixture();
        add_test(&store, collection.id, "ok-1", "http://svc/ok");
        add_test(&store, collection.id, "ok-2", "http://svc/ok2");
        add_test(&store, collection.id, "broken", "http://svc/missing");

        let runner = CollectionRunner::new(store.clone(), Arc::new(ScriptedExecutor));
        let run = runner.run(&collection, &ad_hoc()).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.total_tests, 3);
        assert_eq!(run.success_count, 2);
        assert_eq!(run.failure_count, 1);
        assert_eq!(run.success_count + run.failure_count, run.total_tests);
        assert_eq!(run.total_duration_ms, 50);
        assert!(run.completed_at.is_some());
        assert!(run.schedule_id.is_none());
    }

    #[tokio::test]
    async fn transport_failure_is_isolated_per_test() {
        let (store, collection, _dir) = fixture();
        let dead = add_test(&store, collection.id, "dead", "http://svc/refused");
        add_test(&store, collection.id, "alive-1", "http://svc/ok");
        add_test(&store, collection.id, "alive-2", "http://svc/ok2");

        let runner = CollectionRunner::new(store.clone(), Arc::new(ScriptedExecutor));
        let run = runner.run(&collection, &ad_hoc()).await.unwrap();

        let results = store.results_for_run(run.id).unwrap();
        assert_eq!(results.len(), 3);

        let failed = results.iter().find(|r| r.test_id == dead).unwrap();
        assert_eq!(failed.status_code, 0);
        assert!(failed.error.is_some());

        // The other two recorded their real outcomes.
        assert_eq!(
            results.iter().filter(|r| r.status_code == 200).count(),
            2
        );
    }

    #[tokio::test]
    async fn empty_collection_creates_no_run() {
        let (store, collection, _dir) = fixture();
        let runner = CollectionRunner::new(store.clone(), Arc::new(ScriptedExecutor));

        let err = runner.run(&collection, &ad_hoc()).await.unwrap_err();
        assert!(matches!(err, RunnerError::EmptyCollection(_)));
        assert!(store.list_runs(Some(collection.id), None, 10).unwrap().is_empty());
    }
}
