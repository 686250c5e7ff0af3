use std::path::Path;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;
use tracebench_core::{
    table::ColumnValue,
    test_case::{TestCaseContext, TestCaseDescriptor, TimeWindow},
};
use tracebench_error::{generic_error, ErrorContext as _, GenericError};

/// A list of test cases whose load phases have finished and which are ready for collection.
#[derive(Debug, Deserialize)]
pub struct CollectionPlan {
    pub test_cases: Vec<PlannedTestCase>,
}

/// One test case of a [`CollectionPlan`].
///
/// The name is optional: when missing, it is derived from the descriptor, e.g. `round=1|throughput=200|cpu=2`.
#[derive(Debug, Deserialize)]
pub struct PlannedTestCase {
    #[serde(default)]
    pub name: Option<String>,

    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,

    #[serde(default)]
    pub operation: Option<String>,

    #[serde(flatten)]
    pub descriptor: TestCaseDescriptor,

    #[serde(default)]
    pub additional_columns: IndexMap<String, ColumnValue>,
}

impl CollectionPlan {
    /// Reads a plan from the given YAML file.
    ///
    /// # Errors
    ///
    /// If the file cannot be read or parsed, or a test case has no name and an empty descriptor, an error is returned.
    pub fn from_yaml(path: &Path) -> Result<Self, GenericError> {
        let raw = std::fs::read_to_string(path)
            .with_error_context(|| format!("Failed to read plan '{}'.", path.display()))?;
        Self::parse(&raw).with_error_context(|| format!("Invalid plan '{}'.", path.display()))
    }

    fn parse(raw: &str) -> Result<Self, GenericError> {
        let plan = serde_yaml::from_str::<Self>(raw).error_context("Failed to parse plan.")?;
        for (i, test_case) in plan.test_cases.iter().enumerate() {
            if test_case.name().is_empty() {
                return Err(generic_error!(
                    "Test case #{} has no name and nothing to derive one from.",
                    i + 1
                ));
            }
        }
        Ok(plan)
    }

    /// Converts the plan into run contexts, in plan order.
    pub fn into_test_cases(self) -> Vec<TestCaseContext> {
        self.test_cases.into_iter().map(PlannedTestCase::into_context).collect()
    }
}

impl PlannedTestCase {
    fn name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.descriptor.name(),
        }
    }

    fn into_context(self) -> TestCaseContext {
        let name = self.name();
        let mut context = TestCaseContext::new(name, TimeWindow::new(self.start, self.end))
            .with_columns(self.descriptor.columns())
            .with_columns(self.additional_columns);
        if let Some(operation) = self.operation {
            context = context.with_operation(operation);
        }
        context
    }
}
