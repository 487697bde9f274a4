//! Metrics aggregation and durable logging for federated-averaging experiments.
//!
//! The `federated` module holds the round-level components that sit on the strategy
//! engine's evaluate callback. `config` describes an experiment and where its logs go,
//! and `simulation` fabricates client evaluations for the `fedlog` binary.

pub mod config;
pub mod federated;
pub mod simulation;

pub use config::{ConfigError, ExperimentConfig, PartitionMode};
