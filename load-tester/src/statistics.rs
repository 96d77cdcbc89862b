use crate::record::Category;
use std::collections::BTreeMap;
use std::fmt;
use tokio::time::Instant;

/// Earliest and latest of a set of instants.
#[derive(Debug, Copy, Clone, Default)]
pub struct TimeRange {
    bounds: Option<(Instant, Instant)>,
}

impl TimeRange {
    #[inline]
    pub fn include(&mut self, at: Instant) {
        self.bounds = Some(match self.bounds {
            None => (at, at),
            Some((min, max)) => (min.min(at), max.max(at)),
        });
    }

    /// Seconds from the earliest to the latest instant, 0 when empty.
    #[must_use]
    pub fn span_secs(&self) -> f64 {
        self.bounds
            .map(|(min, max)| max.duration_since(min).as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Seconds from the earliest instant of `from` to the latest of `to`.
    #[must_use]
    pub fn between(from: &TimeRange, to: &TimeRange) -> f64 {
        match (from.bounds, to.bounds) {
            (Some((first, _)), Some((_, last))) => last.saturating_duration_since(first).as_secs_f64(),
            _ => 0.0,
        }
    }
}

/// Mean of `values`, or `+inf` when there are none.
#[must_use]
pub fn mean_or_infinity(values: &[f64]) -> f64 {
    if values.is_empty() {
        f64::INFINITY
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// `amount / elapsed_secs`, or 0 when no time elapsed.
#[inline]
#[must_use]
pub fn per_second(amount: f64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        amount / elapsed_secs
    } else {
        0.0
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CategoryStats {
    pub successful_requests: usize,
    pub avg_latency: f64,
}

/// Everything reported about one run. Latencies are in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub requests_sent: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub duration_secs: f64,
    pub qps_observed: f64,
    pub tokens_sent: usize,
    pub tokens_received: usize,
    pub tokens_sent_per_request: f64,
    pub tokens_received_per_request: f64,
    pub categories: BTreeMap<Category, CategoryStats>,
    pub avg_latency_overall: f64,
    pub tokens_sent_per_sec: f64,
    pub tokens_received_per_sec: f64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\
No of req sent: {}
No of req received: {}
Total duration: {:.4}
QPS: {:.4}
tokens sent per req: {:.2}
tokens rcvd per req: {:.2}
Number of successful requests: {}
Number of failed requests: {}
",
            self.requests_sent,
            self.successful_requests,
            self.duration_secs,
            self.qps_observed,
            self.tokens_sent_per_request,
            self.tokens_received_per_request,
            self.successful_requests,
            self.failed_requests,
        )?;
        for (category, stats) in &self.categories {
            writeln!(f, "Number of {category} requests: {}", stats.successful_requests)?;
        }
        for (category, stats) in &self.categories {
            writeln!(
                f,
                "Average latency for {category} prompts: {:.4} seconds",
                stats.avg_latency
            )?;
        }
        write!(
            f,
            "\
Overall average latency: {:.4} seconds
Tokens Sent per Second: {:.2}
Tokens Received per Second: {:.2}",
            self.avg_latency_overall, self.tokens_sent_per_sec, self.tokens_received_per_sec,
        )
    }
}
