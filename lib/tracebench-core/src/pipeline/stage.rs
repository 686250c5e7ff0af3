use std::{any::Any, collections::HashMap, sync::Arc};

use async_trait::async_trait;
use indexmap::IndexMap;
use snafu::Snafu;

use crate::{error::CollectError, table::Table, test_case::TestCaseContext};

/// Stage registry error.
#[derive(Debug, Eq, PartialEq, Snafu)]
#[snafu(context(suffix(false)))]
pub enum RegistryError {
    /// A stage with the same name is already registered.
    #[snafu(display("duplicate stage '{}'", stage))]
    DuplicateStage {
        /// Stage name.
        stage: String,
    },

    /// A stage depends on a stage that is not registered before it.
    #[snafu(display("stage '{}' depends on unregistered stage '{}'", stage, dependency))]
    UnknownDependency {
        /// Stage name.
        stage: String,

        /// Missing dependency.
        dependency: String,
    },
}

/// Output of one successful stage.
pub struct StageOutput {
    table: Table,
    artifact: Option<Arc<dyn Any + Send + Sync>>,
    diagnostics: IndexMap<String, usize>,
}

impl StageOutput {
    /// Creates a new `StageOutput` holding the table to persist.
    pub fn new(table: Table) -> Self {
        Self {
            table,
            artifact: None,
            diagnostics: IndexMap::new(),
        }
    }

    /// Attaches an in-memory artifact that dependent stages can read through [`RunContext::artifact`].
    pub fn with_artifact<T: Any + Send + Sync>(mut self, artifact: T) -> Self {
        self.artifact = Some(Arc::new(artifact));
        self
    }

    /// Records a diagnostic counter for this stage.
    pub fn with_diagnostic<S: Into<String>>(mut self, name: S, value: usize) -> Self {
        self.diagnostics.insert(name.into(), value);
        self
    }

    /// Returns the table to persist.
    pub fn table(&self) -> &Table {
        &self.table
    }

    pub(super) fn into_parts(self) -> (Table, Option<Arc<dyn Any + Send + Sync>>, IndexMap<String, usize>) {
        (self.table, self.artifact, self.diagnostics)
    }
}

/// Per-run state visible to stages.
///
/// Holds the test case being collected and the artifacts of the stages that already succeeded in this run.
pub struct RunContext {
    test_case: TestCaseContext,
    artifacts: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl RunContext {
    /// Creates a new `RunContext` for the given test case.
    pub fn new(test_case: TestCaseContext) -> Self {
        Self {
            test_case,
            artifacts: HashMap::new(),
        }
    }

    /// Returns the test case.
    pub fn test_case(&self) -> &TestCaseContext {
        &self.test_case
    }

    /// Returns the artifact produced by `stage`, if it produced one of type `T`.
    pub fn artifact<T: Any + Send + Sync>(&self, stage: &str) -> Option<&T> {
        self.artifacts.get(stage).and_then(|artifact| artifact.downcast_ref::<T>())
    }

    /// Returns the artifact produced by `stage`.
    ///
    /// # Errors
    ///
    /// If `stage` produced no artifact of type `T`, [`CollectError::MalformedInput`] is returned.
    pub fn require<T: Any + Send + Sync>(&self, stage: &str) -> Result<&T, CollectError> {
        self.artifact(stage).ok_or_else(|| CollectError::MalformedInput {
            what: "stage artifact",
            reason: format!("stage '{}' produced no artifact of the expected type", stage),
        })
    }

    pub(super) fn insert_artifact(&mut self, stage: &str, artifact: Arc<dyn Any + Send + Sync>) {
        self.artifacts.insert(stage.to_string(), artifact);
    }
}

/// Produces the output of a collection stage.
#[async_trait]
pub trait StageProducer: Send + Sync {
    /// Produces this stage's output for the run.
    ///
    /// # Errors
    ///
    /// If the stage has nothing to collect, [`CollectError::NoData`] is returned, which ends the run. Any other error
    /// fails only this stage.
    async fn produce(&self, context: &RunContext) -> Result<StageOutput, CollectError>;
}

/// A named step of the collection pipeline and the store its output is appended to.
#[derive(Clone)]
pub struct CollectionStage {
    name: String,
    output_path: String,
    depends_on: Vec<String>,
    producer: Arc<dyn StageProducer>,
}

impl CollectionStage {
    /// Creates a new `CollectionStage` without dependencies.
    ///
    /// `output_path` is the store file name, relative to the data directory.
    pub fn new<N, P>(name: N, output_path: P, producer: Arc<dyn StageProducer>) -> Self
    where
        N: Into<String>,
        P: Into<String>,
    {
        Self {
            name: name.into(),
            output_path: output_path.into(),
            depends_on: Vec::new(),
            producer,
        }
    }

    /// Declares the stages this stage depends on.
    pub fn depends_on<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(stages.into_iter().map(Into::into));
        self
    }

    /// Returns the stage name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the store file name.
    pub fn output_path(&self) -> &str {
        &self.output_path
    }

    /// Returns the names of the stages this stage depends on.
    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    pub(super) fn producer(&self) -> &dyn StageProducer {
        self.producer.as_ref()
    }
}

/// An ordered set of collection stages.
///
/// Stages run in registration order. A stage may only depend on stages registered before it, which keeps the order a
/// valid topological order without any cycle detection.
#[derive(Clone, Default)]
pub struct StageRegistry {
    stages: Vec<CollectionStage>,
}

impl StageRegistry {
    /// Creates an empty `StageRegistry`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stage.
    ///
    /// # Errors
    ///
    /// If a stage with the same name is already registered, or if any dependency is not registered yet, an error is
    /// returned and the registry is left unchanged.
    pub fn register(&mut self, stage: CollectionStage) -> Result<(), RegistryError> {
        if self.get(stage.name()).is_some() {
            return Err(RegistryError::DuplicateStage {
                stage: stage.name().to_string(),
            });
        }

        if let Some(dependency) = stage.dependencies().iter().find(|dep| self.get(dep).is_none()) {
            return Err(RegistryError::UnknownDependency {
                stage: stage.name().to_string(),
                dependency: dependency.clone(),
            });
        }

        self.stages.push(stage);
        Ok(())
    }

    /// Returns the stage with the given name, if registered.
    pub fn get(&self, name: &str) -> Option<&CollectionStage> {
        self.stages.iter().find(|stage| stage.name() == name)
    }

    /// Returns the stages in registration order.
    pub fn stages(&self) -> &[CollectionStage] {
        &self.stages
    }

    /// Returns the number of registered stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if no stage is registered.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
