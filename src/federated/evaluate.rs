use log::debug;
use serde::{Deserialize, Serialize};

use super::records::ClientEvalRecord;

/// Opaque handle of a client taking part in a round.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientHandle {
    cid: String,
}

impl ClientHandle {
    pub fn new(cid: impl Into<String>) -> Self {
        Self { cid: cid.into() }
    }

    /// The identifier the framework assigned to this client.
    pub fn cid(&self) -> &str {
        &self.cid
    }
}

/// Metrics a client reports next to its evaluation loss.
///
/// Every field is optional: clients are free to report only part of it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientMetrics {
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub loss: Option<f64>,
    #[serde(default)]
    pub client_idx: Option<i64>,
}

impl ClientMetrics {
    /// Creates a metrics map carrying both accuracy and loss.
    pub fn new(accuracy: f64, loss: f64) -> Self {
        Self {
            accuracy: Some(accuracy),
            loss: Some(loss),
            client_idx: None,
        }
    }

    /// Tags the metrics with the client's partition index.
    pub fn with_client_idx(mut self, client_idx: i64) -> Self {
        self.client_idx = Some(client_idx);
        self
    }
}

/// Outcome of evaluating the global model on a single client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluateRes {
    pub num_examples: Option<u64>,
    pub loss: Option<f64>,
    pub metrics: Option<ClientMetrics>,
}

impl EvaluateRes {
    /// Creates a result with a top-level loss and no metrics map.
    pub fn new(num_examples: u64, loss: f64) -> Self {
        Self {
            num_examples: Some(num_examples),
            loss: Some(loss),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ClientMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Number of evaluation samples, `0` when the client didn't say.
    pub fn num_examples(&self) -> u64 {
        self.num_examples.unwrap_or(0)
    }

    /// Loss as the client reported it: metrics map first, then the top-level field.
    ///
    /// # Returns
    /// The first loss found, or `NaN` when neither is present.
    pub fn reported_loss(&self) -> f64 {
        resolve(self.metrics.and_then(|m| m.loss), self.loss)
    }

    /// Accuracy from the metrics map, `NaN` when absent.
    pub fn reported_accuracy(&self) -> f64 {
        resolve(self.metrics.and_then(|m| m.accuracy), None)
    }

    /// Partition index from the metrics map, if the client sent one.
    pub fn client_idx(&self) -> Option<i64> {
        self.metrics.and_then(|m| m.client_idx)
    }
}

/// A client that didn't return an evaluation this round.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub client: Option<ClientHandle>,
    pub reason: String,
}

impl Failure {
    pub fn new(client: Option<ClientHandle>, reason: impl Into<String>) -> Self {
        Self {
            client,
            reason: reason.into(),
        }
    }
}

/// Fallback chain for numeric diagnostics: preferred, then fallback, then `NaN`.
pub fn resolve(preferred: Option<f64>, fallback: Option<f64>) -> f64 {
    preferred.or(fallback).unwrap_or(f64::NAN)
}

impl ClientEvalRecord {
    /// Builds the per-client row for `round` out of a raw evaluation result.
    ///
    /// Missing fields never fail: loss and accuracy fall back to `NaN`, the client
    /// index to `None` and the sample count to `0`.
    ///
    /// # Arguments
    /// * `round` - Round label given by the strategy engine.
    /// * `client` - Handle of the reporting client.
    /// * `res` - What the client returned.
    pub fn from_evaluation(round: u64, client: &ClientHandle, res: &EvaluateRes) -> Self {
        let accuracy = res.reported_accuracy();
        if accuracy.is_nan() {
            debug!("round {round}: client {} reported no accuracy", client.cid());
        }

        Self {
            round,
            cid: client.cid().to_owned(),
            client_idx: res.client_idx(),
            num_examples: res.num_examples(),
            loss: res.reported_loss(),
            accuracy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_loss_wins_over_top_level_loss() {
        let res = EvaluateRes::new(32, 0.9).with_metrics(ClientMetrics::new(0.7, 0.4));
        assert_eq!(res.reported_loss(), 0.4);
    }

    #[test]
    fn top_level_loss_is_used_without_metrics_loss() {
        let res = EvaluateRes::new(32, 0.9).with_metrics(ClientMetrics {
            accuracy: Some(0.7),
            ..Default::default()
        });
        assert_eq!(res.reported_loss(), 0.9);
    }

    #[test]
    fn loss_is_nan_when_nobody_reports_it() {
        let res = EvaluateRes {
            num_examples: Some(4),
            ..Default::default()
        };
        assert!(res.reported_loss().is_nan());
    }

    #[test]
    fn record_without_accuracy_keeps_the_rest() {
        let client = ClientHandle::new("c-1");
        let res = EvaluateRes::new(50, 0.3).with_metrics(ClientMetrics {
            loss: Some(0.25),
            ..Default::default()
        });

        let row = ClientEvalRecord::from_evaluation(2, &client, &res);

        assert_eq!(row.round, 2);
        assert_eq!(row.cid, "c-1");
        assert_eq!(row.client_idx, None);
        assert_eq!(row.num_examples, 50);
        assert_eq!(row.loss, 0.25);
        assert!(row.accuracy.is_nan());
    }

    #[test]
    fn record_defaults_missing_sample_count_to_zero() {
        let client = ClientHandle::new("c-2");
        let res = EvaluateRes {
            loss: Some(1.0),
            metrics: Some(ClientMetrics::new(0.5, 1.1).with_client_idx(4)),
            ..Default::default()
        };

        let row = ClientEvalRecord::from_evaluation(1, &client, &res);

        assert_eq!(row.num_examples, 0);
        assert_eq!(row.client_idx, Some(4));
        assert_eq!(row.accuracy, 0.5);
    }

    #[test]
    fn metrics_deserialize_with_missing_fields() {
        let m: ClientMetrics = serde_json::from_str(r#"{"loss": 0.5}"#).unwrap();
        assert_eq!(m.accuracy, None);
        assert_eq!(m.loss, Some(0.5));
        assert_eq!(m.client_idx, None);
    }
}
