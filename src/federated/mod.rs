//! Round-level metrics for federated averaging.
//!
//! Two components sit in front of the strategy engine's evaluate callback:
//! - `RoundMetricsAggregator` weights the clients' metrics by sample count and appends
//!   one global row per round.
//! - `GlobalEvalLogger` appends one row per client and round, then hands the round to
//!   the strategy it wraps.
//!
//! Both write to a `DurableLog`, an append-only CSV file owned by a single writer.

pub mod aggregate;
pub mod durable_log;
pub mod error;
pub mod evaluate;
pub mod logger;
pub mod records;
pub mod strategy;

pub use aggregate::{
    weighted_average, MetricsAggregation, RoundMetricsAggregator, WeightedMetrics,
};
pub use durable_log::DurableLog;
pub use error::{MetricsError, Result};
pub use evaluate::{ClientHandle, ClientMetrics, EvaluateRes, Failure};
pub use logger::GlobalEvalLogger;
pub use records::{ClientEvalRecord, MetricRecord, Record};
pub use strategy::{EvaluateAggregate, EvaluateStrategy, FedAvg, NoMetricsAggregation};
