use crate::aggregator::Aggregator;
use crate::client::HttpClient;
use crate::config::{ExperimentConfig, RunSchedule};
use crate::context::RunContext;
use crate::dataset::{load_jsonl, DatasetFormat, PromptPool};
use crate::dispatcher::Dispatcher;
use crate::error::RunError;
use crate::statistics::RunSummary;
use crate::tokens::{HfTokenCounter, TokenCounter, WhitespaceTokenCounter};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// One run: dispatch `total` requests at `rate`, wait for every result, summarize.
///
/// Dispatch and collection run concurrently. If collection fails, the pending
/// dispatch and every in-flight worker are dropped with it.
pub async fn run_once(
    ctx: &Arc<RunContext>,
    rng: StdRng,
    total: usize,
    rate: f64,
) -> Result<RunSummary, RunError> {
    let expected = Dispatcher::planned_requests(total, rate);
    let (sink, source) = mpsc::channel(ctx.channel_capacity.max(1));
    let mut dispatcher = Dispatcher::new(ctx.clone(), rng);
    let start = Instant::now();
    let (mut workers, aggregator) = tokio::try_join!(
        dispatcher.dispatch(total, rate, sink),
        Aggregator::new(expected).collect(source),
    )?;
    while let Some(joined) = workers.join_next().await {
        joined?;
    }
    tracing::info!(
        rate,
        requests = expected,
        elapsed = ?start.elapsed(),
        "run complete"
    );
    aggregator.summarize(ctx.token_counter.as_ref())
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateSummary {
    pub rate: f64,
    pub summary: RunSummary,
}

/// Runs the schedule's rates in order against one shared context.
pub struct Experiment {
    ctx: Arc<RunContext>,
    schedule: RunSchedule,
    rng: StdRng,
}

impl Experiment {
    #[must_use]
    pub fn new(ctx: Arc<RunContext>, schedule: RunSchedule) -> Self {
        let rng = match schedule.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { ctx, schedule, rng }
    }

    /// Loads the tokenizer and datasets and opens the HTTP session.
    ///
    /// Fails before any request is sent when no category can supply prompts.
    pub fn from_config(config: ExperimentConfig) -> Result<Self, RunError> {
        let config = config.validate()?;
        let token_counter: Arc<dyn TokenCounter> = match &config.tokenizer {
            Some(path) => Arc::new(HfTokenCounter::from_file(path)?),
            None => Arc::new(WhitespaceTokenCounter),
        };
        tracing::info!(tokenizer = token_counter.name(), "token counter ready");

        let mut prompts = PromptPool::new();
        let sources = [
            (&config.datasets.arxiv, DatasetFormat::QuestionAnswer),
            (&config.datasets.pure_dove, DatasetFormat::Conversation),
        ];
        for (path, format) in sources {
            let Some(path) = path else { continue };
            let pairs = load_jsonl(path, format)?;
            let pairs = config.datasets.filter.apply(pairs, token_counter.as_ref())?;
            tracing::info!(category = %format.category(), kept = pairs.len(), "prompts after filtering");
            prompts.extend(pairs);
        }

        let ctx = Arc::new(RunContext {
            transport: Arc::new(HttpClient::new(config.transport)),
            token_counter,
            prompts: Arc::new(prompts),
            selection: config.selection,
            endpoints: config.endpoints,
            retry: config.retry,
            channel_capacity: config.channel_capacity,
        });
        let any_planned = config
            .schedule
            .rates
            .iter()
            .any(|&rate| Dispatcher::planned_requests(config.schedule.requests_per_run, rate) > 0);
        if any_planned {
            ctx.selection.sampler(&ctx.prompts)?;
        }
        Ok(Self::new(ctx, config.schedule))
    }

    #[must_use]
    pub fn context(&self) -> &Arc<RunContext> {
        &self.ctx
    }

    /// Runs every rate, writing each report to `out` as soon as it is ready, and
    /// pauses for the cooldown between runs.
    pub async fn run<W: Write>(&mut self, out: &mut W) -> Result<Vec<RateSummary>, RunError> {
        let rates = self.schedule.rates.clone();
        let mut summaries = Vec::with_capacity(rates.len());
        for (idx, &rate) in rates.iter().enumerate() {
            if idx > 0 && !self.schedule.cooldown.is_zero() {
                tracing::info!(cooldown_secs = self.schedule.cooldown.as_secs_f64(), "cooling down");
                tokio::time::sleep(self.schedule.cooldown).await;
            }
            tracing::info!(rate, requests = self.schedule.requests_per_run, "starting run");
            let rng = StdRng::seed_from_u64(self.rng.gen());
            let summary = match run_once(&self.ctx, rng, self.schedule.requests_per_run, rate).await {
                Ok(summary) => summary,
                Err(e) => {
                    tracing::error!(rate, error = %e, "run aborted");
                    return Err(e);
                }
            };
            writeln!(out, "rate {rate}")?;
            writeln!(out, "{summary}")?;
            out.flush()?;
            summaries.push(RateSummary { rate, summary });
        }
        Ok(summaries)
    }
}
