use crate::dispatcher::ResultSource;
use crate::error::{AggregateError, RunError};
use crate::record::{Category, ResultRecord};
use crate::statistics::{mean_or_infinity, per_second, CategoryStats, RunSummary, TimeRange};
use crate::tokens::TokenCounter;
use std::collections::BTreeMap;

/// Consumes the results of one run and turns them into a [`RunSummary`].
#[derive(Debug)]
pub struct Aggregator {
    expected: usize,
    received: usize,
    failed: usize,
    latencies: Vec<f64>,
    by_category: BTreeMap<Category, Vec<f64>>,
    prompts: Vec<String>,
    responses: Vec<serde_json::Value>,
    started: TimeRange,
    ended: TimeRange,
}

impl Aggregator {
    #[must_use]
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            received: 0,
            failed: 0,
            latencies: Vec::with_capacity(expected),
            by_category: BTreeMap::new(),
            prompts: Vec::with_capacity(expected),
            responses: Vec::with_capacity(expected),
            started: TimeRange::default(),
            ended: TimeRange::default(),
        }
    }

    #[must_use]
    pub fn received(&self) -> usize {
        self.received
    }

    /// Waits for exactly `expected` results. There is no timeout: a request that never
    /// finishes holds the run.
    ///
    /// A worker error ends collection immediately. So does the channel closing early,
    /// which means some worker died without reporting.
    pub async fn collect(mut self, mut source: ResultSource) -> Result<Self, RunError> {
        while self.received < self.expected {
            match source.recv().await {
                Some(Ok(record)) => self.observe(record),
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(AggregateError::ResultsMissing {
                        expected: self.expected,
                        received: self.received,
                    }
                    .into());
                }
            }
        }
        Ok(self)
    }

    pub fn observe(&mut self, record: ResultRecord) {
        self.received += 1;
        let Some(response) = record.response else {
            self.failed += 1;
            return;
        };
        self.latencies.push(record.latency_seconds);
        self.by_category
            .entry(record.category)
            .or_default()
            .push(record.latency_seconds);
        self.prompts.push(record.prompt);
        self.responses.push(response);
        self.started.include(record.started_at);
        self.ended.include(record.ended_at);
    }

    /// Token counting happens here, after the run, so it never competes with
    /// in-flight requests for the thread.
    pub fn summarize(&self, counter: &dyn TokenCounter) -> Result<RunSummary, RunError> {
        let successful = self.latencies.len();
        let mut tokens_sent = 0;
        for prompt in &self.prompts {
            tokens_sent += counter.count_tokens(prompt)?;
        }
        let mut tokens_received = 0;
        for response in &self.responses {
            tokens_received += counter.count_tokens(first_text(response)?)?;
        }

        let categories = Category::ALL
            .iter()
            .map(|&category| {
                let latencies = self
                    .by_category
                    .get(&category)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let stats = CategoryStats {
                    successful_requests: latencies.len(),
                    avg_latency: mean_or_infinity(latencies),
                };
                (category, stats)
            })
            .collect();

        let receive_window = self.ended.span_secs();
        let per_request = |tokens: usize| {
            if successful > 0 {
                tokens as f64 / successful as f64
            } else {
                0.0
            }
        };
        Ok(RunSummary {
            requests_sent: self.expected,
            successful_requests: successful,
            failed_requests: self.failed,
            duration_secs: TimeRange::between(&self.started, &self.ended),
            qps_observed: per_second(self.expected as f64, self.started.span_secs()),
            tokens_sent,
            tokens_received,
            tokens_sent_per_request: per_request(tokens_sent),
            tokens_received_per_request: per_request(tokens_received),
            categories,
            avg_latency_overall: mean_or_infinity(&self.latencies),
            tokens_sent_per_sec: per_second(tokens_sent as f64, receive_window),
            tokens_received_per_sec: per_second(tokens_received as f64, receive_window),
        })
    }
}

fn first_text(response: &serde_json::Value) -> Result<&str, AggregateError> {
    response
        .get("text")
        .and_then(|text| text.get(0))
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| AggregateError::MissingText(response.to_string()))
}
