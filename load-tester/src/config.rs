use crate::client::TransportSettings;
use crate::dataset::DatasetFilter;
use crate::dispatcher::{Dispatcher, SelectionPolicy};
use crate::error::ConfigError;
use crate::worker::RetryPolicy;
use hyper::Uri;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Semaphore;

pub const DEFAULT_RATES: [f64; 9] = [0.5, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 35.0, 40.0];
pub const DEFAULT_REQUESTS_PER_RUN: usize = 2500;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Which rates to run, how many requests each, and the pause in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSchedule {
    /// Highest first.
    pub rates: Vec<f64>,
    pub requests_per_run: usize,
    pub cooldown: Duration,
    pub seed: Option<u64>,
}

impl Default for RunSchedule {
    fn default() -> Self {
        Self {
            rates: descending(DEFAULT_RATES.to_vec()),
            requests_per_run: DEFAULT_REQUESTS_PER_RUN,
            cooldown: DEFAULT_COOLDOWN,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DatasetSources {
    /// Question/answer lines.
    pub arxiv: Option<PathBuf>,
    /// Conversation lines.
    pub pure_dove: Option<PathBuf>,
    pub filter: DatasetFilter,
}

#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    pub endpoints: Vec<Uri>,
    pub schedule: RunSchedule,
    pub retry: RetryPolicy,
    pub transport: TransportSettings,
    pub channel_capacity: usize,
    pub selection: SelectionPolicy,
    pub datasets: DatasetSources,
    /// A HuggingFace `tokenizer.json`; whitespace counting when absent.
    pub tokenizer: Option<PathBuf>,
}

impl ExperimentConfig {
    /// Defaults for everything but the endpoints.
    pub fn new<S: AsRef<str>>(endpoints: &[S]) -> Result<Self, ConfigError> {
        let endpoints = endpoints
            .iter()
            .map(|e| parse_endpoint(e.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            endpoints,
            schedule: RunSchedule::default(),
            retry: RetryPolicy::default(),
            transport: TransportSettings::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            selection: SelectionPolicy::default(),
            datasets: DatasetSources::default(),
            tokenizer: None,
        })
    }

    /// Checks every setting and puts the rates in descending order.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        if let Some(&bad) = self
            .schedule
            .rates
            .iter()
            .find(|r| !r.is_finite() || **r < 0.0)
        {
            return Err(ConfigError::InvalidRate(bad));
        }
        for &rate in &self.schedule.rates {
            if rate > 0.0 {
                Dispatcher::period(rate)?;
            }
        }
        if self.retry.max_retries == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.transport.pool_limit_per_host == 0 {
            return Err(ConfigError::ZeroPoolLimit);
        }
        if self.transport.pool_limit_per_host > Semaphore::MAX_PERMITS {
            return Err(ConfigError::PoolLimitTooLarge(self.transport.pool_limit_per_host));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ZeroChannelCapacity);
        }
        if self.channel_capacity > Semaphore::MAX_PERMITS {
            return Err(ConfigError::ChannelCapacityTooLarge(self.channel_capacity));
        }
        self.schedule.rates = descending(std::mem::take(&mut self.schedule.rates));
        Ok(self)
    }
}

/// Accepts absolute `http://` URLs only.
pub fn parse_endpoint(raw: &str) -> Result<Uri, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidEndpoint {
        endpoint: raw.to_owned(),
        reason: reason.to_owned(),
    };
    let uri: Uri = raw.parse().map_err(|e: hyper::http::uri::InvalidUri| invalid(&e.to_string()))?;
    match uri.scheme_str() {
        Some("http") => {}
        Some(other) => return Err(invalid(&format!("unsupported scheme {other}"))),
        None => return Err(invalid("missing scheme")),
    }
    if uri.authority().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(uri)
}

fn descending(mut rates: Vec<f64>) -> Vec<f64> {
    rates.sort_by(|a, b| b.total_cmp(a));
    rates
}
