use std::{fmt, path::PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::{
    durable_log::DurableLog,
    error::{MetricsError, Result},
    evaluate::{resolve, ClientMetrics},
    records::MetricRecord,
};

/// Sample-weighted evaluation metrics of one round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedMetrics {
    pub accuracy: f64,
    pub loss: f64,
}

impl fmt::Display for WeightedMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acc={:.4}, loss={:.4}", self.accuracy, self.loss)
    }
}

/// Computes the sample-weighted mean of every client's accuracy and loss.
///
/// Sums run in input order. Reordering the clients can change the last bits of the
/// result, so runs with shuffled client lists aren't bit-for-bit reproducible.
///
/// A client without `accuracy` or `loss` contributes `NaN`, which makes the
/// corresponding global value `NaN` too.
///
/// # Arguments
/// * `metrics` - `(num_examples, metrics)` pairs, one per client.
///
/// # Errors
/// `MetricsError::DegenerateAggregate` when the sample counts add up to zero,
/// which includes an empty `metrics`.
pub fn weighted_average(metrics: &[(u64, ClientMetrics)]) -> Result<WeightedMetrics> {
    let accuracy = weighted_mean(metrics.iter().map(|(n, m)| (*n, resolve(m.accuracy, None))))?;
    let loss = weighted_mean(metrics.iter().map(|(n, m)| (*n, resolve(m.loss, None))))?;

    Ok(WeightedMetrics { accuracy, loss })
}

/// Sample-weighted mean of `(num_examples, value)` pairs, summed in iteration order.
///
/// # Errors
/// `MetricsError::DegenerateAggregate` when the sample counts add up to zero.
pub(crate) fn weighted_mean(values: impl Iterator<Item = (u64, f64)>) -> Result<f64> {
    let (mut clients, mut sum, mut n_sum) = (0, 0.0, 0u64);
    for (n, value) in values {
        clients += 1;
        sum += n as f64 * value;
        n_sum += n;
    }

    if n_sum == 0 {
        return Err(MetricsError::DegenerateAggregate {
            clients,
            total_samples: n_sum,
        });
    }

    Ok(sum / n_sum as f64)
}

/// Reduces per-client metrics of a round into a single `WeightedMetrics`.
///
/// This is the hook `FedAvg` calls once the evaluation loss has been aggregated.
pub trait MetricsAggregation {
    /// Aggregates the metrics of `round`.
    ///
    /// # Arguments
    /// * `round` - Round counter owned by the strategy engine.
    /// * `metrics` - `(num_examples, metrics)` pairs, one per successful client.
    fn aggregate(
        &mut self,
        round: u64,
        metrics: &[(u64, ClientMetrics)],
    ) -> Result<WeightedMetrics>;
}

/// Weights per-client metrics by sample count and appends the round's result to a
/// durable global log.
#[derive(Debug)]
pub struct RoundMetricsAggregator {
    log: DurableLog<MetricRecord>,
}

impl RoundMetricsAggregator {
    /// Creates an aggregator writing to `path`, creating the log if needed.
    ///
    /// # Errors
    /// See `DurableLog::open`.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            log: DurableLog::open(path)?,
        })
    }

    /// Aggregates one round and appends it, labelled with the next round in the log.
    ///
    /// The label is the number of rows already in the log plus one, whatever round
    /// the caller believes it's in.
    ///
    /// # Arguments
    /// * `metrics` - `(num_examples, metrics)` pairs, one per client.
    ///
    /// # Returns
    /// The weighted accuracy and loss, after they've been persisted.
    ///
    /// # Errors
    /// `MetricsError::DegenerateAggregate` on a zero sample total (nothing is written),
    /// any read or write failure of the log.
    pub fn aggregate_and_log(
        &mut self,
        metrics: &[(u64, ClientMetrics)],
    ) -> Result<WeightedMetrics> {
        let aggregate = weighted_average(metrics)?;
        let round = self.next_round()?;
        self.record(round, aggregate)
    }

    /// Same as `aggregate_and_log`, but labels the row with the caller's `round`.
    ///
    /// The round derived from the log is still computed and must agree, so a caller
    /// whose counter drifted from the log finds out before anything is written.
    ///
    /// # Errors
    /// `MetricsError::RoundMismatch` when `round` isn't the log's next round, plus
    /// everything `aggregate_and_log` can return.
    pub fn aggregate_and_log_round(
        &mut self,
        round: u64,
        metrics: &[(u64, ClientMetrics)],
    ) -> Result<WeightedMetrics> {
        let aggregate = weighted_average(metrics)?;

        let derived = self.next_round()?;
        if derived != round {
            return Err(MetricsError::RoundMismatch {
                expected: round,
                derived,
            });
        }

        self.record(round, aggregate)
    }

    /// The round label the next appended row will get.
    pub fn next_round(&self) -> Result<u64> {
        Ok(self.log.row_count()? + 1)
    }

    /// Every round recorded so far, oldest first.
    pub fn history(&self) -> Result<Vec<MetricRecord>> {
        self.log.records()
    }

    /// The underlying global log.
    pub fn log(&self) -> &DurableLog<MetricRecord> {
        &self.log
    }

    fn record(&mut self, round: u64, aggregate: WeightedMetrics) -> Result<WeightedMetrics> {
        let record = MetricRecord {
            round,
            accuracy: aggregate.accuracy,
            loss: aggregate.loss,
        };
        self.log.append(&[record])?;

        info!("{record}");
        Ok(aggregate)
    }
}

/// Rows written through the hook are labelled with the round derived from the log.
///
/// The engine's round only gets compared against it: rounds the strategy skipped
/// (no results, rejected failures) leave no global row, so the two counters may
/// drift apart for the rest of the run.
impl MetricsAggregation for RoundMetricsAggregator {
    fn aggregate(
        &mut self,
        round: u64,
        metrics: &[(u64, ClientMetrics)],
    ) -> Result<WeightedMetrics> {
        let aggregate = weighted_average(metrics)?;

        let derived = self.next_round()?;
        if derived != round {
            warn!("engine is at round {round}, global log records it as round {derived}");
        }

        self.record(derived, aggregate)
    }
}
