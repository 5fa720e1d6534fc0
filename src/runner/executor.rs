//! Per-test HTTP execution.

use std::time::{Duration, Instant};

use anyhow::Result;
use reqwest::{Client, Method};

use crate::model::TestDefinition;

/// Raw outcome of executing one test. The executor reports what happened
/// and never classifies success or failure.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// HTTP status, or 0 when the request failed at the transport level.
    pub status_code: u16,
    pub duration_ms: i64,
    /// Set iff the request could not be completed (DNS, refused, timeout).
    pub error: Option<String>,
    pub response_body: Option<String>,
}

/// Executes one test definition and returns its outcome as a value.
#[async_trait::async_trait]
pub trait TestExecutor: Send + Sync {
    async fn execute(&self, test: &TestDefinition) -> Outcome;
}

/// Real HTTP executor backed by a shared reqwest client.
pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Default for HttpExecutor {
    fn default() -> Self {
        // Builder only fails on TLS backend misconfiguration.
        Self::new(Self::DEFAULT_TIMEOUT).expect("failed to build HTTP client")
    }
}

fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

#[async_trait::async_trait]
impl TestExecutor for HttpExecutor {
    async fn execute(&self, test: &TestDefinition) -> Outcome {
        let method = match Method::from_bytes(test.method.as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                return Outcome {
                    status_code: 0,
                    duration_ms: 0,
                    error: Some(format!("invalid HTTP method '{}'", test.method)),
                    response_body: None,
                }
            }
        };

        let mut request = self.client.request(method.clone(), &test.url);
        for (name, value) in &test.headers {
            request = request.header(name, value);
        }
        if carries_body(&method) {
            if let Some(body) = &test.body {
                request = request.body(body.clone());
            }
        }

        // Wall-clock duration covers the network call only.
        let start = Instant::now();
        let response = request.send().await;
        let duration_ms = start.elapsed().as_millis() as i64;

        match response {
            Ok(resp) => {
                let status_code = resp.status().as_u16();
                let response_body = resp.text().await.ok();
                Outcome {
                    status_code,
                    duration_ms,
                    error: None,
                    response_body,
                }
            }
            Err(e) => Outcome {
                status_code: 0,
                duration_ms,
                error: Some(e.to_string()),
                response_body: None,
            },
        }
    }
}
