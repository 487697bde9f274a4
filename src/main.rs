use std::env;

use anyhow::Context;
use env_logger::Env;
use fedlog::{
    federated::{FedAvg, GlobalEvalLogger, RoundMetricsAggregator},
    simulation::SimulatedClients,
    ExperimentConfig,
};
use log::{info, warn};

fn main() -> anyhow::Result<()> {
    // Round summaries are logged at info level.
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = match env::args().nth(1) {
        Some(path) => ExperimentConfig::from_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        None => {
            info!("no config file given, using defaults");
            ExperimentConfig::default()
        }
    };
    info!("experiment: {}", serde_json::to_string(&config)?);

    let aggregator = RoundMetricsAggregator::create(config.global_metrics_path())
        .context("opening global metrics log")?;

    let global_next = aggregator.next_round()?;
    let strategy = FedAvg::new().evaluate_metrics_aggregation(aggregator);
    let mut logger = GlobalEvalLogger::create(config.client_eval_path(), strategy)
        .context("opening client evaluation log")?;
    let mut clients = SimulatedClients::new(&config);

    // Skipped rounds leave no global row, the client log knows the engine's last round.
    let client_last = logger.log().records()?.last().map_or(0, |r| r.round);
    let first_round = global_next.max(client_last + 1);
    if first_round > 1 {
        info!("resuming {} at round {first_round}", config.run_dir().display());
    }

    for round in first_round..first_round + config.rounds {
        let (results, failures) = clients.evaluate_round(round);
        if !failures.is_empty() {
            warn!("round {round}: {} client(s) failed to evaluate", failures.len());
        }
        if results.is_empty() {
            warn!("round {round}: no client reported, no global metrics for this round");
        }

        let aggregate = logger
            .log_and_aggregate(round, &results, &failures)
            .with_context(|| format!("aggregating round {round}"))?;
        if let Some(loss) = aggregate.loss {
            info!("round {round}: weighted evaluation loss {loss:.4}");
        }
    }

    let history = logger
        .inner()
        .metrics_aggregation()
        .context("metrics aggregation was not installed")?
        .history()?;
    let best = history
        .iter()
        .filter(|r| !r.accuracy.is_nan())
        .max_by(|a, b| a.accuracy.total_cmp(&b.accuracy));

    match best {
        Some(best) => info!("best round so far: {best}"),
        None => warn!("no round reported an accuracy"),
    }
    info!(
        "{} global row(s) in {}, {} client row(s) in {}",
        history.len(),
        config.global_metrics_path().display(),
        logger.log().row_count()?,
        config.client_eval_path().display(),
    );

    Ok(())
}
