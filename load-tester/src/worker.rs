use crate::client::GenerateTransport;
use crate::context::RunContext;
use crate::dispatcher::ResultSink;
use crate::error::RunError;
use crate::record::{RequestRecord, ResultRecord};
use generate_wire::GenerateRequest;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// How a worker reacts to transient transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, the first one included.
    pub max_retries: u32,
    /// Delay before the retry following attempt `n` is `backoff_base * 2^n`.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    #[inline]
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Issues `request` until it succeeds, fails fatally, or runs out of attempts.
///
/// Exhausting the attempts is not an error: it yields a sentinel record. Any
/// non-transient failure is returned as `Err` and ends the run.
pub async fn execute(
    transport: &dyn GenerateTransport,
    request: RequestRecord,
    policy: &RetryPolicy,
) -> Result<ResultRecord, RunError> {
    let attempts = policy.max_retries.max(1);
    let payload = GenerateRequest::greedy(request.prompt.as_str(), request.max_output_tokens);
    let mut attempt = 0;
    loop {
        let started_at = Instant::now();
        match transport.generate(&request.endpoint, &payload).await {
            Ok(response) => {
                let ended_at = Instant::now();
                return Ok(ResultRecord::success(request, response, started_at, ended_at));
            }
            Err(e) if e.is_transient() => {
                if attempt + 1 >= attempts {
                    tracing::warn!(
                        endpoint = %request.endpoint,
                        attempts,
                        error = %e,
                        "giving up on request"
                    );
                    return Ok(ResultRecord::sentinel(request, started_at, Instant::now()));
                }
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    endpoint = %request.endpoint,
                    attempt,
                    delay = ?delay,
                    error = %e,
                    "transient failure, backing off"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(source) => {
                return Err(RunError::Request {
                    endpoint: request.endpoint.to_string(),
                    source,
                });
            }
        }
    }
}

/// Runs one request and pushes its outcome, success or not, into the sink.
pub async fn run_worker(ctx: Arc<RunContext>, request: RequestRecord, sink: ResultSink) {
    let outcome = execute(ctx.transport.as_ref(), request, &ctx.retry).await;
    if sink.send(outcome).await.is_err() {
        tracing::debug!("aggregator stopped, dropping result");
    }
}
