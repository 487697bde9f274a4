use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    marker::PhantomData,
    path::{Path, PathBuf},
};

use log::debug;

use super::{
    error::{MetricsError, Result},
    records::Record,
};

/// Append-only CSV file holding one kind of `Record`.
///
/// The header row is written exactly once, when the file is first created. After that
/// rows are only ever appended; every `append` call is self-contained (open, write,
/// flush, sync) so the log never holds an open handle between rounds.
///
/// A log must have a single owner: the type is not `Clone` and mutation goes through
/// `&mut self`. Separate processes appending to the same path are not coordinated.
#[derive(Debug)]
pub struct DurableLog<R> {
    path: PathBuf,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> DurableLog<R> {
    /// Opens the log at `path`, creating parent directories and the header if needed.
    ///
    /// # Arguments
    /// * `path` - Destination of the CSV file.
    ///
    /// # Returns
    /// The opened log.
    ///
    /// # Errors
    /// `MetricsError::Configuration` if the directory or file can't be created,
    /// `MetricsError::HeaderMismatch` if an existing file has a different header.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| MetricsError::Configuration {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let configuration = |source: io::Error| MetricsError::Configuration {
            path: path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(configuration)?;

        // Zero-length counts as absent: a crash between create and write leaves one.
        if file.metadata().map_err(configuration)?.len() == 0 {
            let header = encode_header::<R>()?;
            file.write_all(&header)
                .and_then(|_| file.sync_data())
                .map_err(configuration)?;
            debug!("created metrics log {}", path.display());
        } else {
            check_header::<R>(&path)?;
        }

        Ok(Self {
            path,
            _record: PhantomData,
        })
    }

    /// Returns the location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Counts the data rows currently in the log, header excluded.
    ///
    /// # Errors
    /// `MetricsError::Read` if the file can't be read or a row is malformed.
    pub fn row_count(&self) -> Result<u64> {
        let mut reader = self.reader()?;
        let mut rows = 0;
        for record in reader.byte_records() {
            record.map_err(|source| self.read_error(source))?;
            rows += 1;
        }
        Ok(rows)
    }

    /// Reads every row back, in file order.
    ///
    /// # Errors
    /// `MetricsError::Read` if the file can't be read or a row doesn't decode as `R`.
    pub fn records(&self) -> Result<Vec<R>> {
        self.reader()?
            .deserialize()
            .collect::<std::result::Result<Vec<R>, _>>()
            .map_err(|source| self.read_error(source))
    }

    /// Appends `rows` to the log as a single write.
    ///
    /// Every row is encoded before the file is touched, so an encoding failure leaves
    /// the log as it was. An empty slice is a no-op.
    ///
    /// # Errors
    /// `MetricsError::Encode` if a row can't be serialized, `MetricsError::DurableWrite`
    /// if the file can't be opened, written or synced.
    pub fn append(&mut self, rows: &[R]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        for row in rows {
            wtr.serialize(row)?;
        }
        let buf = wtr
            .into_inner()
            .map_err(|e| MetricsError::Encode(e.into_error().into()))?;

        self.write_durably(&buf)
            .map_err(|source| MetricsError::DurableWrite {
                path: self.path.clone(),
                source,
            })?;

        debug!("appended {} row(s) to {}", rows.len(), self.path.display());
        Ok(())
    }

    fn write_durably(&self, buf: &[u8]) -> io::Result<()> {
        // No `create`: a log removed behind our back must not come back headerless.
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(buf)?;
        file.flush()?;
        file.sync_data()
    }

    fn reader(&self) -> Result<csv::Reader<File>> {
        csv::Reader::from_path(&self.path).map_err(|source| self.read_error(source))
    }

    fn read_error(&self, source: csv::Error) -> MetricsError {
        MetricsError::Read {
            path: self.path.clone(),
            source,
        }
    }
}

fn encode_header<R: Record>() -> Result<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(R::HEADER)?;
    wtr.into_inner()
        .map_err(|e| MetricsError::Encode(e.into_error().into()))
}

fn check_header<R: Record>(path: &Path) -> Result<()> {
    let read_error = |source: csv::Error| MetricsError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::Reader::from_path(path).map_err(read_error)?;
    let found = reader.headers().map_err(read_error)?;

    if found.iter().eq(R::HEADER.iter().copied()) {
        return Ok(());
    }

    Err(MetricsError::HeaderMismatch {
        path: path.to_path_buf(),
        expected: R::HEADER.join(","),
        found: found.iter().collect::<Vec<_>>().join(","),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federated::records::{ClientEvalRecord, MetricRecord};

    fn row(round: u64) -> MetricRecord {
        MetricRecord {
            round,
            accuracy: 0.5,
            loss: 1.5,
        }
    }

    #[test]
    fn open_creates_missing_directories_and_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs").join("IID").join("global.csv");

        let log = DurableLog::<MetricRecord>::open(&path).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "round,accuracy,loss\n");
        assert_eq!(log.row_count().unwrap(), 0);
        assert_eq!(log.path(), path.as_path());
    }

    #[test]
    fn reopening_does_not_repeat_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global.csv");

        let mut log = DurableLog::<MetricRecord>::open(&path).unwrap();
        log.append(&[row(1)]).unwrap();
        let log = DurableLog::<MetricRecord>::open(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("round,accuracy,loss").count(), 1);
        assert_eq!(log.row_count().unwrap(), 1);
    }

    #[test]
    fn empty_existing_file_receives_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global.csv");
        File::create(&path).unwrap();

        DurableLog::<MetricRecord>::open(&path).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "round,accuracy,loss\n");
    }

    #[test]
    fn foreign_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global.csv");
        DurableLog::<MetricRecord>::open(&path).unwrap();

        let err = DurableLog::<ClientEvalRecord>::open(&path).unwrap_err();

        assert!(matches!(err, MetricsError::HeaderMismatch { .. }));
    }

    #[test]
    fn append_batches_rows_and_reads_them_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = DurableLog::open(dir.path().join("global.csv")).unwrap();

        log.append(&[row(1), row(2)]).unwrap();
        log.append(&[]).unwrap();
        log.append(&[row(3)]).unwrap();

        let rounds: Vec<_> = log.records().unwrap().iter().map(|r| r.round).collect();
        assert_eq!(rounds, vec![1, 2, 3]);
        assert_eq!(log.row_count().unwrap(), 3);
    }

    #[test]
    fn append_fails_loudly_when_the_file_disappears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global.csv");
        let mut log = DurableLog::<MetricRecord>::open(&path).unwrap();
        fs::remove_file(&path).unwrap();

        let err = log.append(&[row(1)]).unwrap_err();

        assert!(matches!(err, MetricsError::DurableWrite { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn open_fails_when_parent_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("runs");
        File::create(&blocker).unwrap();

        let err = DurableLog::<MetricRecord>::open(blocker.join("global.csv")).unwrap_err();

        assert!(matches!(err, MetricsError::Configuration { .. }));
    }
}
