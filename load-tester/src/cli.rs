use crate::client::TransportSettings;
use crate::config::{
    DatasetSources, ExperimentConfig, RunSchedule, DEFAULT_CHANNEL_CAPACITY, DEFAULT_RATES,
    DEFAULT_REQUESTS_PER_RUN,
};
use crate::dataset::DatasetFilter;
use crate::dispatcher::SelectionPolicy;
use crate::error::ConfigError;
use crate::record::Category;
use crate::worker::RetryPolicy;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Sends generate requests at a series of fixed rates and reports latency and
/// token throughput for each.
#[derive(Debug, Parser)]
#[command(name = "load-tester", version)]
pub struct Cli {
    /// Generate endpoint URL. Repeat, or separate with commas, to spread load.
    #[arg(
        long = "endpoint",
        env = "LOAD_TESTER_ENDPOINTS",
        value_delimiter = ',',
        required = true
    )]
    pub endpoints: Vec<String>,

    /// Requests per second for each run. Runs go from the highest rate down.
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_RATES)]
    pub rates: Vec<f64>,

    #[arg(long, default_value_t = DEFAULT_REQUESTS_PER_RUN)]
    pub requests_per_run: usize,

    /// Pause between runs.
    #[arg(long, default_value_t = 10)]
    pub cooldown_secs: u64,

    /// Attempts per request, the first one included.
    #[arg(long, default_value_t = 1)]
    pub max_retries: u32,

    #[arg(long, default_value_t = 1000)]
    pub backoff_base_ms: u64,

    #[arg(long, default_value_t = 6000)]
    pub request_timeout_secs: u64,

    /// In-flight requests allowed per host.
    #[arg(long, default_value_t = 10_000)]
    pub pool_limit_per_host: usize,

    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,

    /// JSONL with `question` and `answer` fields.
    #[arg(long)]
    pub arxiv_dataset: Option<PathBuf>,

    /// JSONL with a `conversation` array of `input`/`output` turns.
    #[arg(long)]
    pub pure_dove_dataset: Option<PathBuf>,

    #[arg(long, default_value_t = 1.0)]
    pub arxiv_weight: f64,

    #[arg(long, default_value_t = 1.0)]
    pub pure_dove_weight: f64,

    /// Skip prompts longer than this many tokens.
    #[arg(long)]
    pub max_prompt_tokens: Option<usize>,

    /// Keep at most this many prompts per dataset.
    #[arg(long)]
    pub max_prompts: Option<usize>,

    /// HuggingFace `tokenizer.json`. Whitespace counting is used without one.
    #[arg(long, env = "LOAD_TESTER_TOKENIZER")]
    pub tokenizer: Option<PathBuf>,

    /// Seed for prompt and endpoint selection.
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Cli {
    pub fn into_config(self) -> Result<ExperimentConfig, ConfigError> {
        let mut config = ExperimentConfig::new(self.endpoints.as_slice())?;
        config.schedule = RunSchedule {
            rates: self.rates,
            requests_per_run: self.requests_per_run,
            cooldown: Duration::from_secs(self.cooldown_secs),
            seed: self.seed,
        };
        config.retry = RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        };
        config.transport = TransportSettings {
            pool_limit_per_host: self.pool_limit_per_host,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        };
        config.channel_capacity = self.channel_capacity;
        config.selection = SelectionPolicy::new([
            (Category::Arxiv, self.arxiv_weight),
            (Category::PureDove, self.pure_dove_weight),
        ])?;
        config.datasets = DatasetSources {
            arxiv: self.arxiv_dataset,
            pure_dove: self.pure_dove_dataset,
            filter: DatasetFilter {
                max_prompt_tokens: self.max_prompt_tokens,
                max_prompts: self.max_prompts,
            },
        };
        config.tokenizer = self.tokenizer;
        config.validate()
    }
}
