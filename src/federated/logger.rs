use std::path::PathBuf;

use super::{
    durable_log::DurableLog,
    error::Result,
    evaluate::{ClientHandle, EvaluateRes, Failure},
    records::ClientEvalRecord,
    strategy::{EvaluateAggregate, EvaluateStrategy},
};

/// Wraps a strategy and logs every client's evaluation of the global model before
/// letting the wrapped strategy aggregate the round.
///
/// The logger adds no aggregation of its own: whatever `S` returns is returned
/// untouched. Calling it twice for the same round logs that round twice.
#[derive(Debug)]
pub struct GlobalEvalLogger<S> {
    log: DurableLog<ClientEvalRecord>,
    inner: S,
}

impl<S: EvaluateStrategy> GlobalEvalLogger<S> {
    /// Creates a logger writing per-client rows to `path` in front of `inner`.
    ///
    /// # Arguments
    /// * `path` - Destination of the per-client CSV log.
    /// * `inner` - The strategy that does the actual aggregation.
    ///
    /// # Errors
    /// See `DurableLog::open`.
    pub fn create(path: impl Into<PathBuf>, inner: S) -> Result<Self> {
        Ok(Self {
            log: DurableLog::open(path)?,
            inner,
        })
    }

    /// Appends one row per successful client, then delegates to the wrapped strategy.
    ///
    /// Rows of a call are written together or not at all. The wrapped strategy's
    /// `check_evaluate` runs first, so a round it rejects leaves the log untouched.
    /// Failed clients are neither logged nor looked at, they're handed over to the
    /// wrapped strategy as is.
    ///
    /// # Arguments
    /// * `round` - Round label the engine assigned to this evaluation.
    /// * `results` - Successful `(client, result)` pairs.
    /// * `failures` - Clients that failed to evaluate.
    ///
    /// # Returns
    /// The wrapped strategy's aggregate.
    ///
    /// # Errors
    /// Fails when the wrapped strategy rejects the round up front, when the rows can't
    /// be persisted (the wrapped strategy isn't called then), or when the wrapped
    /// strategy fails after the rows were written.
    pub fn log_and_aggregate(
        &mut self,
        round: u64,
        results: &[(ClientHandle, EvaluateRes)],
        failures: &[Failure],
    ) -> Result<EvaluateAggregate> {
        self.inner.check_evaluate(round, results, failures)?;

        let rows: Vec<_> = results
            .iter()
            .map(|(client, res)| ClientEvalRecord::from_evaluation(round, client, res))
            .collect();
        self.log.append(&rows)?;

        self.inner.aggregate_evaluate(round, results, failures)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn log(&self) -> &DurableLog<ClientEvalRecord> {
        &self.log
    }
}

impl<S: EvaluateStrategy> EvaluateStrategy for GlobalEvalLogger<S> {
    fn aggregate_evaluate(
        &mut self,
        round: u64,
        results: &[(ClientHandle, EvaluateRes)],
        failures: &[Failure],
    ) -> Result<EvaluateAggregate> {
        self.log_and_aggregate(round, results, failures)
    }

    fn check_evaluate(
        &self,
        round: u64,
        results: &[(ClientHandle, EvaluateRes)],
        failures: &[Failure],
    ) -> Result<()> {
        self.inner.check_evaluate(round, results, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federated::{error::MetricsError, evaluate::ClientMetrics, strategy::FedAvg};

    /// Counts calls and returns a fixed loss.
    #[derive(Default)]
    struct Counting {
        calls: usize,
        failures_seen: usize,
    }

    impl EvaluateStrategy for Counting {
        fn aggregate_evaluate(
            &mut self,
            _round: u64,
            _results: &[(ClientHandle, EvaluateRes)],
            failures: &[Failure],
        ) -> Result<EvaluateAggregate> {
            self.calls += 1;
            self.failures_seen += failures.len();
            Ok(EvaluateAggregate {
                loss: Some(0.42),
                metrics: None,
            })
        }
    }

    #[test]
    fn rows_are_logged_before_delegating() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger =
            GlobalEvalLogger::create(dir.path().join("clients.csv"), Counting::default())
                .unwrap();
        let results = vec![
            (
                ClientHandle::new("a"),
                EvaluateRes::new(10, 0.5)
                    .with_metrics(ClientMetrics::new(0.8, 0.4).with_client_idx(0)),
            ),
            (ClientHandle::new("b"), EvaluateRes::new(20, 0.3)),
        ];
        let failures = [Failure::new(None, "dropped")];

        let agg = logger.log_and_aggregate(5, &results, &failures).unwrap();

        assert_eq!(agg.loss, Some(0.42));
        assert_eq!(logger.inner().calls, 1);
        assert_eq!(logger.inner().failures_seen, 1);

        let rows = logger.log().records().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cid, "a");
        assert_eq!(rows[0].client_idx, Some(0));
        assert_eq!(rows[0].loss, 0.4);
        assert_eq!(rows[1].cid, "b");
        assert_eq!(rows[1].loss, 0.3);
        assert!(rows[1].accuracy.is_nan());
        assert!(rows.iter().all(|r| r.round == 5));
    }

    #[test]
    fn empty_round_appends_nothing_and_still_delegates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clients.csv");
        let mut logger = GlobalEvalLogger::create(&path, FedAvg::new()).unwrap();

        let agg = logger.log_and_aggregate(1, &[], &[]).unwrap();

        assert_eq!(agg, EvaluateAggregate::default());
        assert_eq!(logger.log().row_count().unwrap(), 0);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "round,cid,client_idx,num_examples,loss,accuracy\n"
        );
    }

    #[test]
    fn repeated_rounds_are_not_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger =
            GlobalEvalLogger::create(dir.path().join("clients.csv"), Counting::default())
                .unwrap();
        let results = [(ClientHandle::new("a"), EvaluateRes::new(1, 1.0))];

        logger.aggregate_evaluate(1, &results, &[]).unwrap();
        logger.aggregate_evaluate(1, &results, &[]).unwrap();

        assert_eq!(logger.log().row_count().unwrap(), 2);
    }

    #[test]
    fn rejected_round_leaves_the_log_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = GlobalEvalLogger::create(dir.path().join("clients.csv"), FedAvg::new())
            .unwrap();
        let results = [(ClientHandle::new("empty"), EvaluateRes::new(0, 0.5))];

        let err = logger.log_and_aggregate(1, &results, &[]).unwrap_err();

        assert!(matches!(err, MetricsError::DegenerateAggregate { .. }));
        assert_eq!(logger.log().row_count().unwrap(), 0);
    }

    #[test]
    fn stacked_loggers_forward_the_check() {
        let dir = tempfile::tempdir().unwrap();
        let inner = GlobalEvalLogger::create(dir.path().join("inner.csv"), FedAvg::new())
            .unwrap();
        let mut outer = GlobalEvalLogger::create(dir.path().join("outer.csv"), inner).unwrap();
        let results = [(ClientHandle::new("empty"), EvaluateRes::new(0, 0.5))];

        assert!(outer.aggregate_evaluate(1, &results, &[]).is_err());
        assert_eq!(outer.log().row_count().unwrap(), 0);
        assert_eq!(outer.inner().log().row_count().unwrap(), 0);
    }
}
