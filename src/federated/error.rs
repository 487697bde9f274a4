use std::{error::Error, fmt, io, path::PathBuf};

/// The federated metrics module's result type.
pub type Result<T> = std::result::Result<T, MetricsError>;

/// Failures raised while aggregating round metrics or writing them to a durable log.
///
/// Missing per-client fields are never an error: they're substituted with `NaN` or
/// `None` by the extraction helpers in `evaluate`.
#[derive(Debug)]
pub enum MetricsError {
    /// The log destination could not be prepared (parent directory, file creation).
    Configuration { path: PathBuf, source: io::Error },
    /// The destination already exists but carries a different header.
    HeaderMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },
    /// Appending rows to an existing log failed, nothing of this call was kept.
    DurableWrite { path: PathBuf, source: io::Error },
    /// The log could not be read back (row count, history).
    Read { path: PathBuf, source: csv::Error },
    /// A row could not be serialized, the log was not touched.
    Encode(csv::Error),
    /// The weighted mean has no samples to divide by.
    DegenerateAggregate { clients: usize, total_samples: u64 },
    /// The caller's round counter disagrees with the one derived from the log.
    RoundMismatch { expected: u64, derived: u64 },
}

impl fmt::Display for MetricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { path, source } => {
                write!(f, "cannot prepare metrics log {}: {source}", path.display())
            }
            Self::HeaderMismatch {
                path,
                expected,
                found,
            } => write!(
                f,
                "metrics log {} has header `{found}`, expected `{expected}`",
                path.display()
            ),
            Self::DurableWrite { path, source } => {
                write!(f, "failed to append to {}: {source}", path.display())
            }
            Self::Read { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            Self::Encode(e) => write!(f, "failed to encode metrics row: {e}"),
            Self::DegenerateAggregate {
                clients,
                total_samples,
            } => write!(
                f,
                "cannot aggregate {clients} client(s) with {total_samples} total samples"
            ),
            Self::RoundMismatch { expected, derived } => write!(
                f,
                "round mismatch: caller is at round {expected}, log is at round {derived}"
            ),
        }
    }
}

impl Error for MetricsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Configuration { source, .. } => Some(source),
            Self::DurableWrite { source, .. } => Some(source),
            Self::Read { source, .. } => Some(source),
            Self::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<csv::Error> for MetricsError {
    fn from(value: csv::Error) -> Self {
        Self::Encode(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<MetricsError> for io::Error {
    fn from(value: MetricsError) -> Self {
        match value {
            MetricsError::Configuration { source, .. } => source,
            MetricsError::DurableWrite { source, .. } => source,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offending_path() {
        let err = MetricsError::DurableWrite {
            path: PathBuf::from("runs/IID/global_metrics.csv"),
            source: io::Error::other("disk full"),
        };

        let msg = err.to_string();
        assert!(msg.contains("runs/IID/global_metrics.csv"));
        assert!(msg.contains("disk full"));
        assert!(err.source().is_some());
    }

    #[test]
    fn io_conversion_keeps_the_original_kind() {
        let err = MetricsError::Configuration {
            path: PathBuf::from("/root/forbidden"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };

        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::PermissionDenied);

        let io_err: io::Error = MetricsError::RoundMismatch {
            expected: 3,
            derived: 2,
        }
        .into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);
    }
}
