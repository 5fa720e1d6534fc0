//! Run report delivery.
//!
//! Actual transports (email, webhooks) live outside this crate; the
//! dispatcher only sees the sink trait, fire-and-forget.

pub mod report;

use anyhow::Result;
use tracing::info;

use crate::model::{Run, TestResult};

/// Destination for schedule run reports.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        schedule_name: &str,
        run: &Run,
        failed: &[TestResult],
    ) -> Result<()>;
}

/// Sink that writes the rendered report to the log. Default for deployments
/// without a delivery channel configured.
pub struct LogSink;

#[async_trait::async_trait]
impl NotificationSink for LogSink {
    async fn send(
        &self,
        recipient: &str,
        schedule_name: &str,
        run: &Run,
        failed: &[TestResult],
    ) -> Result<()> {
        let body = report::render(schedule_name, run, failed);
        info!(%recipient, schedule=%schedule_name, run=%run.id, "Run report\n{}", body);
        Ok(())
    }
}
