//! Test case identity and collection windows.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;

use crate::table::ColumnValue;

/// A closed time window `[start, end]`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a new `TimeWindow`.
    ///
    /// If `end` precedes `start`, the bounds are swapped.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if end < start {
            Self { start: end, end: start }
        } else {
            Self { start, end }
        }
    }

    /// Returns the start of the window.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Returns the end of the window.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Returns the start of the window as microseconds since the Unix epoch.
    pub fn start_micros(&self) -> i64 {
        self.start.timestamp_micros()
    }

    /// Returns the end of the window as microseconds since the Unix epoch.
    pub fn end_micros(&self) -> i64 {
        self.end.timestamp_micros()
    }

    /// Returns the start of the window as fractional seconds since the Unix epoch.
    pub fn start_secs(&self) -> f64 {
        self.start.timestamp_micros() as f64 / 1_000_000.0
    }

    /// Returns the end of the window as fractional seconds since the Unix epoch.
    pub fn end_secs(&self) -> f64 {
        self.end.timestamp_micros() as f64 / 1_000_000.0
    }
}

/// The unit of work for one collection pipeline run.
///
/// Created by the caller once the test case's load phase has finished, and read-only for the duration of the run.
#[derive(Clone, Debug)]
pub struct TestCaseContext {
    name: String,
    window: TimeWindow,
    operation: Option<String>,
    additional_columns: IndexMap<String, ColumnValue>,
}

impl TestCaseContext {
    /// Creates a new `TestCaseContext` with no operation filter and no additional columns.
    pub fn new<S: Into<String>>(name: S, window: TimeWindow) -> Self {
        Self {
            name: name.into(),
            window,
            operation: None,
            additional_columns: IndexMap::new(),
        }
    }

    /// Restricts trace collection to the given operation.
    pub fn with_operation<S: Into<String>>(mut self, operation: S) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Adds a column that is attached to every persisted row of this test case.
    pub fn with_column<K, V>(mut self, name: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<ColumnValue>,
    {
        self.additional_columns.insert(name.into(), value.into());
        self
    }

    /// Adds several columns at once. See [`with_column`][Self::with_column].
    pub fn with_columns(mut self, columns: IndexMap<String, ColumnValue>) -> Self {
        self.additional_columns.extend(columns);
        self
    }

    /// Returns the test case name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the collection window.
    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    /// Returns the operation filter, if any.
    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref()
    }

    /// Returns the additional columns.
    pub fn additional_columns(&self) -> &IndexMap<String, ColumnValue> {
        &self.additional_columns
    }
}

/// Descriptive metadata of a test case: repeat round, workload throughput and interference levels.
///
/// The descriptor both names the test case and provides the columns that make accumulated output tables queryable by
/// configuration.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TestCaseDescriptor {
    /// Repeat round.
    #[serde(default)]
    pub round: Option<u32>,

    /// Target workload throughput, in requests per second.
    #[serde(default)]
    pub throughput: Option<u32>,

    /// Interference pods by interference type.
    #[serde(default)]
    pub interferences: IndexMap<String, u32>,

    /// Any further descriptive values.
    #[serde(default)]
    pub additional: IndexMap<String, ColumnValue>,
}

impl TestCaseDescriptor {
    /// Returns the canonical name, e.g. `round=1|throughput=200|cpu=2`.
    pub fn name(&self) -> String {
        self.columns()
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Returns the descriptor as output columns, in name order.
    pub fn columns(&self) -> IndexMap<String, ColumnValue> {
        let mut columns = IndexMap::new();
        if let Some(round) = self.round {
            columns.insert("round".to_string(), ColumnValue::from(round));
        }
        if let Some(throughput) = self.throughput {
            columns.insert("throughput".to_string(), ColumnValue::from(throughput));
        }
        for (kind, count) in &self.interferences {
            columns.insert(kind.clone(), ColumnValue::from(*count));
        }
        for (key, value) in &self.additional {
            columns.insert(key.clone(), value.clone());
        }
        columns
    }
}
