use std::{
    error::Error,
    fmt, fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// How the dataset is split across clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PartitionMode {
    #[serde(rename = "iid")]
    Iid,
    #[default]
    #[serde(rename = "non-iid")]
    NonIid,
}

impl PartitionMode {
    /// Directory name the run's logs are written under.
    pub fn dir_name(self) -> &'static str {
        match self {
            PartitionMode::Iid => "IID",
            PartitionMode::NonIid => "NON-IID",
        }
    }
}

/// Description of one federated experiment.
///
/// Missing fields in a config file take the defaults below. The training
/// hyperparameters are carried for the run description only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub mode: PartitionMode,
    pub clients: usize,
    pub rounds: u64,
    pub client_fraction: f64,
    pub local_epochs: usize,
    pub batch_size: usize,
    pub lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    /// Dirichlet concentration of client dataset sizes.
    pub alpha_qty: f64,
    /// Dirichlet concentration of client label distributions.
    pub alpha_label: f64,
    pub seed: u64,
    pub num_workers: usize,
    pub out_dir: PathBuf,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            mode: PartitionMode::NonIid,
            clients: 5,
            rounds: 200,
            client_fraction: 1.0,
            local_epochs: 4,
            batch_size: 64,
            lr: 0.01,
            momentum: 0.9,
            weight_decay: 5e-4,
            alpha_qty: 1.0,
            alpha_label: 0.1,
            seed: 0,
            num_workers: 2,
            out_dir: PathBuf::from("runs"),
        }
    }
}

impl ExperimentConfig {
    /// Loads a config from a JSON file and validates it.
    ///
    /// # Arguments
    /// * `path` - Location of the JSON file.
    ///
    /// # Errors
    /// Returns a `ConfigError` if the file can't be read, parsed or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the config describes a runnable experiment.
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clients == 0 {
            return Err(ConfigError::Invalid("at least one client is required".into()));
        }

        if self.rounds == 0 {
            return Err(ConfigError::Invalid("rounds must be greater than 0".into()));
        }

        if !(self.client_fraction > 0.0 && self.client_fraction <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "client_fraction ({}) must be in (0, 1]",
                self.client_fraction
            )));
        }

        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be greater than 0".into()));
        }

        if !(self.lr > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "lr ({}) must be greater than 0",
                self.lr
            )));
        }

        let alphas = [("alpha_qty", self.alpha_qty), ("alpha_label", self.alpha_label)];
        for (name, alpha) in alphas {
            if !(alpha > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} ({alpha}) must be greater than 0"
                )));
            }
        }

        Ok(())
    }

    /// Number of clients evaluated each round, never less than one.
    pub fn clients_per_round(&self) -> usize {
        ((self.clients as f64 * self.client_fraction).floor() as usize).max(1)
    }

    /// Directory holding this run's logs.
    pub fn run_dir(&self) -> PathBuf {
        self.out_dir.join(self.mode.dir_name())
    }

    /// Per-round global metrics log.
    pub fn global_metrics_path(&self) -> PathBuf {
        self.run_dir().join("global_metrics.csv")
    }

    /// Per-client evaluation log.
    pub fn client_eval_path(&self) -> PathBuf {
        self.run_dir().join("client_eval.csv")
    }
}

/// Failures loading an `ExperimentConfig`.
#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(serde_json::Error),
    /// The config parsed but describes an impossible experiment.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Parse(e) => write!(f, "malformed config: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}
