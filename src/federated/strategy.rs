use log::warn;

use super::{
    aggregate::{weighted_mean, MetricsAggregation, WeightedMetrics},
    error::Result,
    evaluate::{resolve, ClientHandle, ClientMetrics, EvaluateRes, Failure},
};

/// What a strategy hands back to the engine after aggregating a round's evaluations.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EvaluateAggregate {
    pub loss: Option<f64>,
    pub metrics: Option<WeightedMetrics>,
}

/// The evaluate-aggregation callback of a federated strategy.
///
/// The engine calls it once per round, after the global model was evaluated on the
/// selected clients, and never concurrently.
pub trait EvaluateStrategy {
    /// Aggregates the evaluation results of `round`.
    ///
    /// # Arguments
    /// * `round` - Round counter owned by the engine, starting at 1.
    /// * `results` - One entry per client that evaluated successfully.
    /// * `failures` - Clients that didn't.
    ///
    /// # Returns
    /// The aggregated loss and metrics, either may be absent.
    ///
    /// # Errors
    /// Implementations fail when the round can't be aggregated or persisted.
    fn aggregate_evaluate(
        &mut self,
        round: u64,
        results: &[(ClientHandle, EvaluateRes)],
        failures: &[Failure],
    ) -> Result<EvaluateAggregate>;

    /// Rejects a round `aggregate_evaluate` is known to fail on, before anything
    /// has been persisted for it. Accepts every round unless overridden.
    ///
    /// # Errors
    /// The error `aggregate_evaluate` would return for the same arguments.
    fn check_evaluate(
        &self,
        _round: u64,
        _results: &[(ClientHandle, EvaluateRes)],
        _failures: &[Failure],
    ) -> Result<()> {
        Ok(())
    }
}

/// Placeholder for a `FedAvg` built without a metrics aggregation hook.
#[derive(Debug)]
pub enum NoMetricsAggregation {}

impl MetricsAggregation for NoMetricsAggregation {
    fn aggregate(&mut self, _: u64, _: &[(u64, ClientMetrics)]) -> Result<WeightedMetrics> {
        match *self {}
    }
}

/// Federated averaging, evaluation side.
///
/// The loss is averaged with each client weighted by its number of examples; the
/// metrics maps are handed to the configured `MetricsAggregation`, if any.
#[derive(Debug)]
pub struct FedAvg<M = NoMetricsAggregation> {
    accept_failures: bool,
    metrics_aggregation: Option<M>,
    warned_missing_aggregation: bool,
}

impl FedAvg {
    /// Creates a `FedAvg` that accepts failures and has no metrics aggregation.
    pub fn new() -> Self {
        Self {
            accept_failures: true,
            metrics_aggregation: None,
            warned_missing_aggregation: false,
        }
    }
}

impl Default for FedAvg {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: MetricsAggregation> FedAvg<M> {
    /// Whether a round with failed clients is still aggregated.
    pub fn accept_failures(mut self, accept: bool) -> Self {
        self.accept_failures = accept;
        self
    }

    /// Installs the hook that reduces the clients' metrics maps.
    pub fn evaluate_metrics_aggregation<N>(self, aggregation: N) -> FedAvg<N>
    where
        N: MetricsAggregation,
    {
        FedAvg {
            accept_failures: self.accept_failures,
            metrics_aggregation: Some(aggregation),
            warned_missing_aggregation: false,
        }
    }

    /// The installed metrics aggregation hook.
    pub fn metrics_aggregation(&self) -> Option<&M> {
        self.metrics_aggregation.as_ref()
    }

    fn rejects(&self, failures: &[Failure]) -> bool {
        !self.accept_failures && !failures.is_empty()
    }
}

impl<M: MetricsAggregation> EvaluateStrategy for FedAvg<M> {
    fn aggregate_evaluate(
        &mut self,
        round: u64,
        results: &[(ClientHandle, EvaluateRes)],
        failures: &[Failure],
    ) -> Result<EvaluateAggregate> {
        if results.is_empty() {
            return Ok(EvaluateAggregate::default());
        }

        if self.rejects(failures) {
            warn!(
                "round {round}: {} client(s) failed and failures aren't accepted, skipping",
                failures.len()
            );
            return Ok(EvaluateAggregate::default());
        }

        let loss = weighted_mean(
            results
                .iter()
                .map(|(_, res)| (res.num_examples(), resolve(res.loss, None))),
        )?;

        let metrics = match self.metrics_aggregation.as_mut() {
            Some(aggregation) => {
                let metrics: Vec<_> = results
                    .iter()
                    .map(|(_, res)| (res.num_examples(), res.metrics.unwrap_or_default()))
                    .collect();
                Some(aggregation.aggregate(round, &metrics)?)
            }
            None => {
                if !self.warned_missing_aggregation {
                    warn!("no evaluate metrics aggregation configured, metrics are dropped");
                    self.warned_missing_aggregation = true;
                }
                None
            }
        };

        Ok(EvaluateAggregate {
            loss: Some(loss),
            metrics,
        })
    }

    fn check_evaluate(
        &self,
        _round: u64,
        results: &[(ClientHandle, EvaluateRes)],
        failures: &[Failure],
    ) -> Result<()> {
        if results.is_empty() || self.rejects(failures) {
            return Ok(());
        }

        let samples = results.iter().map(|(_, res)| (res.num_examples(), 0.0));
        weighted_mean(samples).map(|_| ())
    }
}
