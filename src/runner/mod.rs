//! Test execution -- single-request executor and collection fan-out.

pub mod collection;
pub mod executor;

pub use collection::{CollectionRunner, RunTrigger};
pub use executor::{HttpExecutor, Outcome, TestExecutor};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("collection '{0}' has no tests")]
    EmptyCollection(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Success policy used for run aggregation: the request completed at the
/// transport level and returned a 2xx/3xx status. Classification lives here,
/// with the aggregator, not in the executor.
pub fn outcome_is_success(status_code: u16, error: Option<&str>) -> bool {
    error.is_none() && (200..400).contains(&status_code)
}
