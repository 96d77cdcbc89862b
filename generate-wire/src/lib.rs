pub mod drain;

use bytes::Bytes;
use http_body_util::Full;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Path every generate endpoint serves.
pub const GENERATE_PATH: &str = "/generate";

#[inline]
pub fn byte_body<B: Into<Bytes>>(bytes: B) -> Full<Bytes> {
    Full::new(bytes.into())
}

/// Counts requests seen by a server, shared across connection tasks.
#[derive(Clone, Default)]
pub struct RequestCounter {
    count: Arc<AtomicUsize>,
}

impl RequestCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one request and returns how many were recorded before it.
    #[inline]
    pub fn increment(&self) -> usize {
        self.count.fetch_add(1, Ordering::AcqRel)
    }

    #[inline]
    #[must_use]
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

/// Body of a `POST /generate` call.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub use_beam_search: bool,
    pub temperature: f64,
    pub max_tokens: usize,
    pub ignore_eos: bool,
    pub stream: bool,
}

impl GenerateRequest {
    /// Greedy, non-streaming sampling capped at `max_tokens` output tokens.
    #[must_use]
    pub fn greedy(prompt: impl Into<String>, max_tokens: usize) -> Self {
        Self {
            prompt: prompt.into(),
            use_beam_search: false,
            temperature: 0.0,
            max_tokens,
            ignore_eos: false,
            stream: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerateResponse {
    pub text: Vec<String>,
}

impl GenerateResponse {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: vec![text.into()],
        }
    }

    #[inline]
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.text.first().map(String::as_str)
    }
}
