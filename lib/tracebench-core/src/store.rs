//! Append-only CSV stores.

use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use snafu::{ResultExt as _, Snafu};
use tracing::{debug, warn};

use crate::table::Table;

/// A store error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum StoreError {
    /// The data directory could not be created.
    #[snafu(display("Failed to create data directory '{}': {}", path.display(), source))]
    CreateDirectory {
        /// Directory path.
        path: PathBuf,

        /// Error source.
        source: io::Error,
    },

    /// A store file could not be opened or inspected.
    #[snafu(display("Failed to access store '{}': {}", path.display(), source))]
    Access {
        /// Store path.
        path: PathBuf,

        /// Error source.
        source: io::Error,
    },

    /// Rows could not be written to a store file.
    #[snafu(display("Failed to write to store '{}': {}", path.display(), source))]
    Write {
        /// Store path.
        path: PathBuf,

        /// Error source.
        source: csv::Error,
    },

    /// The blocking write task did not complete.
    #[snafu(display("Store write task for '{}' failed: {}", path.display(), source))]
    Task {
        /// Store path.
        path: PathBuf,

        /// Error source.
        source: tokio::task::JoinError,
    },
}

/// What an append did.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AppendOutcome {
    /// Number of rows appended.
    pub rows: usize,

    /// Whether the header row was written.
    pub wrote_header: bool,

    /// Whether the existing header differed from the table's columns.
    pub header_mismatch: bool,
}

/// A set of CSV files under one data directory.
///
/// Every file is append-only. The header is written only when a file is new or empty, so repeated appends accumulate
/// rows from many test cases under one header. Appends to the same file are serialized; appends to different files
/// proceed in parallel.
pub struct TableStores {
    root: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl TableStores {
    /// Opens the stores under `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// If the directory cannot be created, an error is returned.
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).context(CreateDirectory { path: root.clone() })?;

        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path of the named store file.
    pub fn path_of(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// Appends a table to the named store file.
    ///
    /// The write itself runs on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// If the file cannot be opened or written, an error is returned. Rows may have been partially written.
    pub async fn append(&self, file_name: &str, table: Table) -> Result<AppendOutcome, StoreError> {
        let path = self.path_of(file_name);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;

        let write_path = path.clone();
        let outcome = tokio::task::spawn_blocking(move || append_blocking(&write_path, &table))
            .await
            .context(Task { path: path.clone() })??;

        if outcome.header_mismatch {
            warn!(path = %path.display(), "Store header differs from the appended columns. Rows were appended anyway.");
        }
        debug!(path = %path.display(), rows = outcome.rows, wrote_header = outcome.wrote_header, "Appended to store.");

        Ok(outcome)
    }

    fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(path.to_path_buf()).or_default().clone()
    }
}

fn append_blocking(path: &Path, table: &Table) -> Result<AppendOutcome, StoreError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context(Access { path })?;
    let is_empty = file.metadata().context(Access { path })?.len() == 0;

    let mut outcome = AppendOutcome {
        rows: table.len(),
        wrote_header: is_empty,
        header_mismatch: false,
    };

    if !is_empty {
        outcome.header_mismatch = existing_header(path)? != table.columns();
    }

    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    if is_empty {
        writer.write_record(table.columns()).context(Write { path })?;
    }
    for row in table.rows() {
        writer.write_record(row).context(Write { path })?;
    }
    writer.flush().context(Access { path })?;

    Ok(outcome)
}

fn existing_header(path: &Path) -> Result<Vec<String>, StoreError> {
    let file = File::open(path).context(Access { path })?;
    let mut reader = csv::ReaderBuilder::new().has_headers(false).from_reader(file);

    let mut record = csv::StringRecord::new();
    reader.read_record(&mut record).context(Write { path })?;
    Ok(record.iter().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: &[&[&str]]) -> Table {
        let mut table = Table::new(columns.iter().copied());
        for row in rows {
            table.push_row(row.iter().map(|cell| cell.to_string()).collect());
        }
        table
    }

    #[test]
    fn open_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("data");

        let stores = TableStores::open(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(stores.path_of("raw_data.csv"), root.join("raw_data.csv"));
    }

    #[tokio::test]
    async fn header_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let stores = TableStores::open(dir.path()).unwrap();

        let first = stores
            .append("throughput_data.csv", table(&["real_throughput", "round"], &[&["99.5", "1"]]))
            .await
            .unwrap();
        let second = stores
            .append("throughput_data.csv", table(&["real_throughput", "round"], &[&["101", "2"]]))
            .await
            .unwrap();

        assert!(first.wrote_header);
        assert!(!second.wrote_header);
        assert!(!second.header_mismatch);

        let contents = fs::read_to_string(stores.path_of("throughput_data.csv")).unwrap();
        assert_eq!(contents, "real_throughput,round\n99.5,1\n101,2\n");
    }

    #[tokio::test]
    async fn empty_existing_file_gets_a_header() {
        let dir = tempfile::tempdir().unwrap();
        let stores = TableStores::open(dir.path()).unwrap();
        File::create(stores.path_of("hardware_data.csv")).unwrap();

        let outcome = stores
            .append("hardware_data.csv", table(&["pod"], &[&["cart-a-b"]]))
            .await
            .unwrap();
        assert!(outcome.wrote_header);
    }

    #[tokio::test]
    async fn header_mismatch_still_appends() {
        let dir = tempfile::tempdir().unwrap();
        let stores = TableStores::open(dir.path()).unwrap();

        stores
            .append("statistical_data.csv", table(&["microservice", "p50"], &[&["cart", "1"]]))
            .await
            .unwrap();
        let outcome = stores
            .append(
                "statistical_data.csv",
                table(&["microservice", "p50", "cpu"], &[&["cart", "2", "4"]]),
            )
            .await
            .unwrap();

        assert!(outcome.header_mismatch);
        let contents = fs::read_to_string(stores.path_of("statistical_data.csv")).unwrap();
        assert_eq!(contents.lines().count(), 3);
    }

    #[tokio::test]
    async fn cells_are_quoted_when_needed() {
        let dir = tempfile::tempdir().unwrap();
        let stores = TableStores::open(dir.path()).unwrap();

        stores
            .append("raw_data.csv", table(&["operation"], &[&["GET /a,b"]]))
            .await
            .unwrap();
        let contents = fs::read_to_string(stores.path_of("raw_data.csv")).unwrap();
        assert_eq!(contents, "operation\n\"GET /a,b\"\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_to_one_file_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let stores = Arc::new(TableStores::open(dir.path()).unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let stores = Arc::clone(&stores);
            tasks.spawn(async move {
                let value = i.to_string();
                stores
                    .append("end_to_end_data.csv", table(&["trace_id"], &[&[value.as_str()]]))
                    .await
                    .unwrap();
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        let contents = fs::read_to_string(stores.path_of("end_to_end_data.csv")).unwrap();
        let lines = contents.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 17);
        assert_eq!(lines.iter().filter(|line| **line == "trace_id").count(), 1);
    }
}
