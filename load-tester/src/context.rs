use crate::client::GenerateTransport;
use crate::dataset::PromptPool;
use crate::dispatcher::SelectionPolicy;
use crate::tokens::TokenCounter;
use crate::worker::RetryPolicy;
use hyper::Uri;
use std::sync::Arc;

/// Everything a run needs, shared by the dispatcher, its workers and the aggregator.
pub struct RunContext {
    pub transport: Arc<dyn GenerateTransport>,
    pub token_counter: Arc<dyn TokenCounter>,
    pub prompts: Arc<PromptPool>,
    pub selection: SelectionPolicy,
    pub endpoints: Vec<Uri>,
    pub retry: RetryPolicy,
    /// Results buffered between workers and the aggregator. A full channel makes
    /// workers wait; nothing is dropped.
    pub channel_capacity: usize,
}
