use hyper::Uri;
use std::fmt;
use tokio::time::Instant;

/// Latency recorded for a request that never got a response.
pub const FAILURE_LATENCY: f64 = -1.0;

/// Which dataset a prompt came from. Latencies are reported per category.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    /// Math questions with reference answers.
    Arxiv,
    /// First turns of multi-turn conversations.
    PureDove,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Arxiv, Category::PureDove];

    #[inline]
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Category::Arxiv => "arxiv",
            Category::PureDove => "puredove",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub input: String,
    pub reference: String,
    pub category: Category,
}

impl PromptPair {
    #[must_use]
    pub fn new(input: impl Into<String>, reference: impl Into<String>, category: Category) -> Self {
        Self {
            input: input.into(),
            reference: reference.into(),
            category,
        }
    }
}

/// One request as decided by the dispatcher, handed to exactly one worker.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub prompt: String,
    pub max_output_tokens: usize,
    pub category: Category,
    pub endpoint: Uri,
}

/// Outcome of one request. `response` is `None` exactly when the request ran out of
/// attempts, in which case `latency_seconds` is [`FAILURE_LATENCY`].
#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub response: Option<serde_json::Value>,
    pub latency_seconds: f64,
    pub started_at: Instant,
    pub ended_at: Instant,
    pub prompt: String,
    pub category: Category,
}

impl ResultRecord {
    #[must_use]
    pub fn success(
        request: RequestRecord,
        response: serde_json::Value,
        started_at: Instant,
        ended_at: Instant,
    ) -> Self {
        Self {
            response: Some(response),
            latency_seconds: ended_at.duration_since(started_at).as_secs_f64(),
            started_at,
            ended_at,
            prompt: request.prompt,
            category: request.category,
        }
    }

    #[must_use]
    pub fn sentinel(request: RequestRecord, started_at: Instant, ended_at: Instant) -> Self {
        Self {
            response: None,
            latency_seconds: FAILURE_LATENCY,
            started_at,
            ended_at,
            prompt: request.prompt,
            category: request.category,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.response.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request() -> RequestRecord {
        RequestRecord {
            prompt: "What is 2 + 2?".into(),
            max_output_tokens: 4,
            category: Category::Arxiv,
            endpoint: Uri::from_static("http://127.0.0.1:8080/generate"),
        }
    }

    #[test]
    fn success_latency_is_wall_clock_delta() {
        let start = Instant::now();
        let end = start + Duration::from_millis(1500);
        let record = ResultRecord::success(request(), serde_json::json!({"text": ["4"]}), start, end);
        assert!(!record.is_sentinel());
        assert!((record.latency_seconds - 1.5).abs() < 1e-9);
        assert_eq!(record.category, Category::Arxiv);
    }

    #[test]
    fn sentinel_has_no_response() {
        let start = Instant::now();
        let record = ResultRecord::sentinel(request(), start, start);
        assert!(record.is_sentinel());
        assert_eq!(record.latency_seconds, FAILURE_LATENCY);
    }

    #[test]
    fn category_labels() {
        assert_eq!(Category::Arxiv.to_string(), "arxiv");
        assert_eq!(Category::PureDove.to_string(), "puredove");
    }
}
