use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A row type that can live in a `DurableLog`.
///
/// The header is written once when the log is created, so the field order of the
/// implementing struct must match it.
pub trait Record: Serialize + DeserializeOwned {
    /// Column names, in serialization order.
    const HEADER: &'static [&'static str];
}

/// One completed round of globally aggregated evaluation metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub round: u64,
    pub accuracy: f64,
    pub loss: f64,
}

impl Record for MetricRecord {
    const HEADER: &'static [&'static str] = &["round", "accuracy", "loss"];
}

/// One client's evaluation of the global model in a given round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEvalRecord {
    pub round: u64,
    pub cid: String,
    pub client_idx: Option<i64>,
    pub num_examples: u64,
    pub loss: f64,
    pub accuracy: f64,
}

impl Record for ClientEvalRecord {
    const HEADER: &'static [&'static str] = &[
        "round",
        "cid",
        "client_idx",
        "num_examples",
        "loss",
        "accuracy",
    ];
}

impl fmt::Display for MetricRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Round {:02}] GLOBAL acc={:.4}, loss={:.4}",
            self.round, self.accuracy, self.loss
        )
    }
}
