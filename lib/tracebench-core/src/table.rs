//! In-memory tables handed to the durable stores.

use std::fmt;

use indexmap::IndexMap;
use serde::Deserialize;

/// A scalar value attached to every row of a test case's output.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ColumnValue {
    /// A boolean flag.
    Bool(bool),

    /// An integer, such as a round number or an interference pod count.
    Integer(i64),

    /// A floating-point number.
    Float(f64),

    /// Free-form text.
    Text(String),
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::Integer(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{}", value),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<bool> for ColumnValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for ColumnValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for ColumnValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// A record type that can be laid out as a table row.
pub trait TableRecord {
    /// Column names, in order.
    fn columns() -> &'static [&'static str];

    /// Cell values for this record, in the same order as [`columns`][Self::columns].
    fn cells(&self) -> Vec<String>;
}

/// A rectangular table of string-rendered cells.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Creates an empty table with the given columns.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Creates a table from a slice of records.
    pub fn from_records<R: TableRecord>(records: &[R]) -> Self {
        let mut table = Self::new(R::columns().iter().copied());
        table.rows.extend(records.iter().map(TableRecord::cells));
        table
    }

    /// Appends a row.
    ///
    /// Rows shorter than the column list are padded with empty cells and longer rows are truncated, so the table
    /// always stays rectangular.
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.columns.len(), String::new());
        self.rows.push(row);
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the rows.
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sets a constant value for the given columns on every row.
    ///
    /// Columns that do not exist yet are appended after the existing ones, in the order given. Columns that already
    /// exist are overwritten.
    pub fn with_constant_columns(mut self, columns: &IndexMap<String, ColumnValue>) -> Self {
        for (name, value) in columns {
            let rendered = value.to_string();
            match self.columns.iter().position(|existing| existing == name) {
                Some(idx) => {
                    for row in &mut self.rows {
                        row[idx] = rendered.clone();
                    }
                }
                None => {
                    self.columns.push(name.clone());
                    for row in &mut self.rows {
                        row.push(rendered.clone());
                    }
                }
            }
        }
        self
    }
}
