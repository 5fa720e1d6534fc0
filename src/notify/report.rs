//! Plain-text run report rendering.

use std::fmt::Write;

use crate::model::{Run, TestResult};

/// Render a schedule run summary with detail for each failed test.
pub fn render(schedule_name: &str, run: &Run, failed: &[TestResult]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "API Test Report - {}", schedule_name);
    let _ = writeln!(out, "Run:         {}", run.id);
    let _ = writeln!(out, "Started:     {}", run.started_at.to_rfc3339());
    let _ = writeln!(out, "Status:      {}", run.status);
    let _ = writeln!(out, "Total tests: {}", run.total_tests);
    let _ = writeln!(out, "Passed:      {}", run.success_count);
    let _ = writeln!(out, "Failed:      {}", run.failure_count);
    let _ = writeln!(out, "Duration:    {}ms", run.total_duration_ms);

    if !failed.is_empty() {
        let _ = writeln!(out, "\nFailed tests:");
        for result in failed {
            match &result.error {
                Some(err) => {
                    let _ = writeln!(out, "  - test {}: transport error: {}", result.test_id, err);
                }
                None => {
                    let _ = writeln!(
                        out,
                        "  - test {}: HTTP {} in {}ms",
                        result.test_id, result.status_code, result.duration_ms
                    );
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn completed_run(success: i64, failure: i64) -> Run {
        Run {
            id: Uuid::new_v4(),
            collection_id: Uuid::new_v4(),
            schedule_id: Some(Uuid::new_v4()),
            owner_id: "alice".to_string(),
            status: RunStatus::Completed,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            total_tests: success + failure,
            success_count: success,
            failure_count: failure,
            total_duration_ms: 1234,
        }
    }

    #[test]
    fn clean_run_omits_failure_section() {
        let run = completed_run(3, 0);
        let body = render("nightly", &run, &[]);
        assert!(body.contains("API Test Report - nightly"));
        assert!(body.contains("Passed:      3"));
        assert!(!body.contains("Failed tests:"));
    }

    #[test]
    fn failed_tests_are_itemized() {
        let run = completed_run(1, 2);
        let failed = vec![
            TestResult {
                id: Uuid::new_v4(),
                run_id: run.id,
                test_id: Uuid::new_v4(),
                status_code: 0,
                duration_ms: 30,
                error: Some("connection refused".to_string()),
                response_body: None,
            },
            TestResult {
                id: Uuid::new_v4(),
                run_id: run.id,
                test_id: Uuid::new_v4(),
                status_code: 503,
                duration_ms: 80,
                error: None,
                response_body: Some("unavailable".to_string()),
            },
        ];
        let body = render("nightly", &run, &failed);
        assert!(body.contains("Failed tests:"));
        assert!(body.contains("connection refused"));
        assert!(body.contains("HTTP 503"));
    }
}
