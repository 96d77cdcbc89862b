//! Open-loop load generation for a text-generation `/generate` endpoint.
//!
//! A run dispatches requests at a fixed rate, each in its own task, and an
//! aggregator folds the results into a [`statistics::RunSummary`]. An
//! [`scenario::Experiment`] repeats that for a list of rates.
pub mod aggregator;
pub mod cli;
pub mod client;
pub mod config;
pub mod context;
pub mod dataset;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod record;
pub mod scenario;
pub mod statistics;
pub mod tokens;
pub mod worker;
