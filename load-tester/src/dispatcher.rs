use crate::context::RunContext;
use crate::dataset::PromptPool;
use crate::error::{ConfigError, RunError};
use crate::record::{Category, PromptPair, RequestRecord, ResultRecord};
use crate::worker::run_worker;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// What a worker reports back: its record, or the error that ends the run.
pub type WorkerOutcome = Result<ResultRecord, RunError>;
pub type ResultSink = mpsc::Sender<WorkerOutcome>;
pub type ResultSource = mpsc::Receiver<WorkerOutcome>;

/// Relative weights for choosing which category the next prompt comes from.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionPolicy {
    weights: Vec<(Category, f64)>,
}

impl SelectionPolicy {
    pub fn new(weights: impl IntoIterator<Item = (Category, f64)>) -> Result<Self, ConfigError> {
        let weights: Vec<_> = weights.into_iter().collect();
        for &(category, weight) in &weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidWeight { category, weight });
            }
        }
        Ok(Self { weights })
    }

    #[must_use]
    pub fn uniform() -> Self {
        Self {
            weights: Category::ALL.iter().map(|&c| (c, 1.0)).collect(),
        }
    }

    #[must_use]
    pub fn only(category: Category) -> Self {
        Self {
            weights: vec![(category, 1.0)],
        }
    }

    #[must_use]
    pub fn weight(&self, category: Category) -> f64 {
        self.weights
            .iter()
            .filter(|(c, _)| *c == category)
            .map(|(_, w)| *w)
            .sum()
    }

    /// Categories with a positive weight and at least one prompt take part.
    pub fn sampler<'a>(&self, pool: &'a PromptPool) -> Result<PromptSampler<'a>, ConfigError> {
        let eligible: Vec<_> = Category::ALL
            .iter()
            .map(|&c| (c, self.weight(c)))
            .filter(|&(c, w)| w > 0.0 && !pool.prompts(c).is_empty())
            .collect();
        let index = WeightedIndex::new(eligible.iter().map(|(_, w)| *w))
            .map_err(|_| ConfigError::NoEligibleCategory)?;
        Ok(PromptSampler {
            pool,
            categories: eligible.into_iter().map(|(c, _)| c).collect(),
            index,
        })
    }
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self::uniform()
    }
}

pub struct PromptSampler<'a> {
    pool: &'a PromptPool,
    categories: Vec<Category>,
    index: WeightedIndex<f64>,
}

impl<'a> PromptSampler<'a> {
    pub fn pick(&self, rng: &mut StdRng) -> &'a PromptPair {
        let category = self.categories[self.index.sample(rng)];
        let prompts = self.pool.prompts(category);
        &prompts[rng.gen_range(0..prompts.len())]
    }
}

/// Issues requests at a fixed rate, one worker task per request.
pub struct Dispatcher {
    ctx: Arc<RunContext>,
    rng: StdRng,
}

impl Dispatcher {
    #[must_use]
    pub fn new(ctx: Arc<RunContext>, rng: StdRng) -> Self {
        Self { ctx, rng }
    }

    /// How many requests a run of `total` at `rate` actually issues. A rate of zero
    /// issues nothing.
    #[inline]
    #[must_use]
    pub fn planned_requests(total: usize, rate: f64) -> usize {
        if rate > 0.0 && rate.is_finite() {
            total
        } else {
            0
        }
    }

    /// Time between two dispatches at `rate`. Fails when the period does not fit a
    /// `Duration`, as happens for vanishingly small rates.
    pub fn period(rate: f64) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(1.0 / rate)
            .map(|period| period.max(Duration::from_nanos(1)))
            .map_err(|_| ConfigError::InvalidRate(rate))
    }

    /// Spawns `planned_requests(total, rate)` workers, `1 / rate` seconds apart, and
    /// hands back their handles. Returns as soon as the last one is spawned.
    pub async fn dispatch(
        &mut self,
        total: usize,
        rate: f64,
        sink: ResultSink,
    ) -> Result<JoinSet<()>, RunError> {
        let planned = Self::planned_requests(total, rate);
        let mut workers = JoinSet::new();
        if planned == 0 {
            tracing::info!(rate, "nothing to dispatch");
            return Ok(workers);
        }
        let ctx = self.ctx.clone();
        let sampler = ctx.selection.sampler(&ctx.prompts)?;
        let period = Self::period(rate)?;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        for seq in 0..planned {
            ticker.tick().await;
            let request = self.next_request(&sampler)?;
            tracing::debug!(
                seq,
                category = %request.category,
                endpoint = %request.endpoint,
                max_tokens = request.max_output_tokens,
                "dispatch"
            );
            workers.spawn(run_worker(ctx.clone(), request, sink.clone()));
        }
        Ok(workers)
    }

    fn next_request(&mut self, sampler: &PromptSampler<'_>) -> Result<RequestRecord, RunError> {
        let pair = sampler.pick(&mut self.rng);
        let endpoint = self
            .ctx
            .endpoints
            .choose(&mut self.rng)
            .ok_or(ConfigError::NoEndpoints)?
            .clone();
        let max_output_tokens = self.ctx.token_counter.count_tokens(&pair.reference)?;
        Ok(RequestRecord {
            prompt: pair.input.clone(),
            max_output_tokens,
            category: pair.category,
            endpoint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::WhitespaceTokenCounter;
    use crate::worker::tests::ScriptedTransport;
    use crate::worker::RetryPolicy;
    use hyper::Uri;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use tokio::time::Instant;

    fn pool() -> PromptPool {
        vec![
            PromptPair::new("arxiv question", "two words", Category::Arxiv),
            PromptPair::new("dove prompt", "a three word", Category::PureDove),
        ]
        .into_iter()
        .collect()
    }

    fn context(selection: SelectionPolicy, transport: Arc<ScriptedTransport>) -> Arc<RunContext> {
        Arc::new(RunContext {
            transport,
            token_counter: Arc::new(WhitespaceTokenCounter),
            prompts: Arc::new(pool()),
            selection,
            endpoints: vec![
                Uri::from_static("http://10.0.0.1/generate"),
                Uri::from_static("http://10.0.0.2/generate"),
            ],
            retry: RetryPolicy::default(),
            channel_capacity: 16,
        })
    }

    #[test]
    fn rejects_negative_and_nan_weights() {
        assert!(SelectionPolicy::new([(Category::Arxiv, -1.0)]).is_err());
        assert!(SelectionPolicy::new([(Category::Arxiv, f64::NAN)]).is_err());
        assert!(SelectionPolicy::new([(Category::Arxiv, 0.0), (Category::PureDove, 2.5)]).is_ok());
    }

    #[test]
    fn sampler_needs_an_eligible_category() {
        let empty = PromptPool::new();
        assert!(matches!(
            SelectionPolicy::uniform().sampler(&empty),
            Err(ConfigError::NoEligibleCategory)
        ));
        let zero = SelectionPolicy::new([(Category::Arxiv, 0.0), (Category::PureDove, 0.0)]).unwrap();
        assert!(zero.sampler(&pool()).is_err());
    }

    #[test]
    fn zero_weight_category_is_never_picked() {
        let pool = pool();
        let policy = SelectionPolicy::new([(Category::Arxiv, 0.0), (Category::PureDove, 1.0)]).unwrap();
        let sampler = policy.sampler(&pool).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            assert_eq!(sampler.pick(&mut rng).category, Category::PureDove);
        }
    }

    #[test]
    fn weighted_selection_reaches_both_categories() {
        let pool = pool();
        let sampler = SelectionPolicy::uniform().sampler(&pool).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let seen: HashSet<_> = (0..200).map(|_| sampler.pick(&mut rng).category).collect();
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn zero_rate_plans_nothing() {
        assert_eq!(Dispatcher::planned_requests(2500, 0.0), 0);
        assert_eq!(Dispatcher::planned_requests(2500, f64::INFINITY), 0);
        assert_eq!(Dispatcher::planned_requests(0, 10.0), 0);
        assert_eq!(Dispatcher::planned_requests(3, 0.5), 3);
    }

    #[test]
    fn period_is_inverse_rate() {
        assert_eq!(Dispatcher::period(2.0).unwrap(), Duration::from_millis(500));
        assert_eq!(Dispatcher::period(1e12).unwrap(), Duration::from_nanos(1));
        assert!(matches!(
            Dispatcher::period(1e-20),
            Err(ConfigError::InvalidRate(r)) if r == 1e-20
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_period_is_an_error() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new(), Duration::ZERO));
        let ctx = context(SelectionPolicy::uniform(), transport.clone());
        let (tx, _rx) = mpsc::channel(1);
        let mut dispatcher = Dispatcher::new(ctx, StdRng::seed_from_u64(1));
        let err = dispatcher.dispatch(1, 1e-20, tx).await.unwrap_err();
        assert!(matches!(err, RunError::Config(ConfigError::InvalidRate(_))));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_at_the_requested_pace() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new(), Duration::ZERO));
        let ctx = context(SelectionPolicy::uniform(), transport.clone());
        let (tx, mut rx) = mpsc::channel(16);
        let mut dispatcher = Dispatcher::new(ctx, StdRng::seed_from_u64(1));

        let start = Instant::now();
        let mut workers = dispatcher.dispatch(4, 2.0, tx).await.unwrap();
        assert_eq!(Instant::now() - start, Duration::from_millis(1500));

        while let Some(joined) = workers.join_next().await {
            joined.unwrap();
        }
        let times = transport.call_times();
        assert_eq!(times.len(), 4);
        for pair in times.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_millis(500));
        }

        let mut received = 0;
        while let Some(outcome) = rx.recv().await {
            let record = outcome.unwrap();
            assert!(!record.is_sentinel());
            received += 1;
        }
        assert_eq!(received, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_requests_spawn_no_workers() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new(), Duration::ZERO));
        let ctx = context(SelectionPolicy::uniform(), transport.clone());
        let (tx, mut rx) = mpsc::channel(1);
        let mut dispatcher = Dispatcher::new(ctx, StdRng::seed_from_u64(1));
        let workers = dispatcher.dispatch(10, 0.0, tx).await.unwrap();
        assert!(workers.is_empty());
        assert!(rx.recv().await.is_none());
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn request_is_sized_by_reference_tokens() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new(), Duration::ZERO));
        let ctx = context(SelectionPolicy::only(Category::PureDove), transport);
        let mut dispatcher = Dispatcher::new(ctx.clone(), StdRng::seed_from_u64(3));
        let sampler = ctx.selection.sampler(&ctx.prompts).unwrap();
        let request = dispatcher.next_request(&sampler).unwrap();
        assert_eq!(request.prompt, "dove prompt");
        assert_eq!(request.max_output_tokens, 3);
        assert!(ctx.endpoints.contains(&request.endpoint));
    }
}
