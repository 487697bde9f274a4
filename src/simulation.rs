use rand::{rngs::StdRng, seq::index, Rng, SeedableRng};

use crate::{
    config::{ExperimentConfig, PartitionMode},
    federated::{ClientHandle, ClientMetrics, EvaluateRes, Failure},
};

/// Chance that a selected client drops out of an evaluation round.
const DROP_RATE: f64 = 0.02;
/// Chance that a client leaves accuracy out of its metrics map.
const SILENT_ACCURACY_RATE: f64 = 0.05;

/// Stand-in for a population of clients evaluating the global model.
///
/// Accuracy climbs and loss falls as rounds go by, with client-level noise. Everything
/// is driven by the config seed, so two runs with the same config report the same
/// numbers.
pub struct SimulatedClients {
    rng: StdRng,
    sizes: Vec<u64>,
    per_round: usize,
    noise: f64,
    horizon: f64,
}

impl SimulatedClients {
    /// Builds the client population described by `config`.
    ///
    /// Non-iid partitions get uneven dataset sizes and noisier metrics.
    pub fn new(config: &ExperimentConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);

        let (sizes, noise) = match config.mode {
            PartitionMode::Iid => {
                let sizes = (0..config.clients)
                    .map(|_| rng.random_range(950..=1050))
                    .collect::<Vec<u64>>();
                (sizes, 0.01)
            }
            PartitionMode::NonIid => {
                let sizes = (0..config.clients)
                    .map(|_| rng.random_range(100..=2000))
                    .collect::<Vec<u64>>();
                (sizes, 0.04)
            }
        };

        Self {
            rng,
            sizes,
            per_round: config.clients_per_round().min(config.clients),
            noise,
            horizon: (config.rounds as f64 / 5.0).max(1.0),
        }
    }

    /// Evaluation set size of every client, by client index.
    pub fn sizes(&self) -> &[u64] {
        &self.sizes
    }

    /// Samples this round's clients and lets each of them evaluate the global model.
    ///
    /// # Returns
    /// The successful `(client, result)` pairs and the clients that dropped out.
    pub fn evaluate_round(
        &mut self,
        round: u64,
    ) -> (Vec<(ClientHandle, EvaluateRes)>, Vec<Failure>) {
        let mut selected =
            index::sample(&mut self.rng, self.sizes.len(), self.per_round).into_vec();
        selected.sort_unstable();

        let progress = 1.0 - (-(round as f64) / self.horizon).exp();
        let mut results = Vec::with_capacity(selected.len());
        let mut failures = Vec::new();

        for idx in selected {
            let client = ClientHandle::new(format!("client-{idx}"));

            if self.rng.random_bool(DROP_RATE) {
                failures.push(Failure::new(Some(client), "evaluation timed out"));
                continue;
            }

            let accuracy = (0.1 + 0.8 * progress + self.jitter()).clamp(0.0, 1.0);
            let loss = (2.3 * (1.0 - progress) + 0.2 + self.jitter()).max(0.0);

            let metrics = ClientMetrics {
                accuracy: (!self.rng.random_bool(SILENT_ACCURACY_RATE)).then_some(accuracy),
                loss: Some(loss),
                client_idx: Some(idx as i64),
            };

            results.push((
                client,
                EvaluateRes::new(self.sizes[idx], loss).with_metrics(metrics),
            ));
        }

        (results, failures)
    }

    fn jitter(&mut self) -> f64 {
        self.rng.random_range(-self.noise..=self.noise)
    }
}
