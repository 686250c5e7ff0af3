//! The per-test-case collection pipeline.

use std::{any::Any, fmt, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt as _;
use indexmap::IndexMap;
use tracing::{debug, error, info, info_span, warn, Instrument as _};

use crate::{store::TableStores, table::Table, test_case::TestCaseContext};

mod stage;
pub use self::stage::{CollectionStage, RegistryError, RunContext, StageOutput, StageProducer, StageRegistry};

mod stages;
pub use self::stages::{
    DefaultSources, ThroughputRecord, END_TO_END_STAGE, HARDWARE_STAGE, RAW_SPANS_STAGE, STATISTICAL_STAGE,
    THROUGHPUT_STAGE,
};

/// Outcome of one stage within a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StageStatus {
    /// The stage produced output and it was persisted.
    Succeeded,

    /// The stage, or the persistence of its output, failed.
    Failed {
        /// Error chain, rendered.
        reason: String,
    },

    /// The stage was not attempted because a dependency did not succeed.
    Skipped {
        /// The first dependency that did not succeed.
        dependency: String,
    },

    /// The stage found nothing to collect, which ended the run.
    NoData,
}

/// Final state of a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunState {
    /// Every stage succeeded and every output was persisted.
    Persisted,

    /// At least one stage failed or was skipped. Outputs of the other stages were persisted.
    PartiallyFailed,

    /// A stage found nothing to collect. Nothing was persisted.
    NoData,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persisted => f.write_str("persisted"),
            Self::PartiallyFailed => f.write_str("partially failed"),
            Self::NoData => f.write_str("no data"),
        }
    }
}

/// Report of one pipeline run.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// Test case name.
    pub test_case: String,

    /// Final state.
    pub state: RunState,

    /// Status of every stage that was reached, in run order.
    pub stages: IndexMap<String, StageStatus>,

    /// Diagnostic counters, keyed by `<stage>.<counter>`.
    pub diagnostics: IndexMap<String, usize>,
}

impl RunReport {
    /// Returns the status of the named stage, if it was reached.
    pub fn status(&self, stage: &str) -> Option<&StageStatus> {
        self.stages.get(stage)
    }

    /// Returns the named diagnostic counter, if it was recorded.
    pub fn diagnostic(&self, name: &str) -> Option<usize> {
        self.diagnostics.get(name).copied()
    }
}

/// Runs the registered stages for one test case and persists their outputs.
///
/// Stages run sequentially in registration order. A failing stage is logged and its output omitted, while independent
/// stages still run; stages that depend on it are skipped. A stage that finds nothing to collect ends the run without
/// persisting anything. Once every stage has run, successful outputs are appended to their stores in one batch, with
/// the test case's additional columns attached to every row.
pub struct CollectionPipeline {
    registry: StageRegistry,
    stores: Arc<TableStores>,
}

impl CollectionPipeline {
    /// Creates a new `CollectionPipeline`.
    pub fn new(registry: StageRegistry, stores: Arc<TableStores>) -> Self {
        Self { registry, stores }
    }

    /// Returns the stage registry.
    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Returns the stores outputs are persisted to.
    pub fn stores(&self) -> &TableStores {
        &self.stores
    }

    /// Runs the pipeline for the given test case.
    ///
    /// Never fails: every error degrades to a partial result that is described by the returned report.
    pub async fn run(&self, test_case: TestCaseContext) -> RunReport {
        let span = info_span!("run", test_case = %test_case.name());
        self.run_inner(test_case).instrument(span).await
    }

    async fn run_inner(&self, test_case: TestCaseContext) -> RunReport {
        let mut report = RunReport {
            test_case: test_case.name().to_string(),
            state: RunState::Persisted,
            stages: IndexMap::new(),
            diagnostics: IndexMap::new(),
        };
        let mut context = RunContext::new(test_case);
        let mut outputs: Vec<(&CollectionStage, Table)> = Vec::new();

        for stage in self.registry.stages() {
            let unmet = stage
                .dependencies()
                .iter()
                .find(|dependency| report.status(dependency) != Some(&StageStatus::Succeeded));
            if let Some(dependency) = unmet {
                warn!(stage = stage.name(), %dependency, "Skipping stage as a dependency did not succeed.");
                report.stages.insert(
                    stage.name().to_string(),
                    StageStatus::Skipped {
                        dependency: dependency.clone(),
                    },
                );
                continue;
            }

            debug!(stage = stage.name(), "Running stage.");
            let produced = AssertUnwindSafe(stage.producer().produce(&context))
                .catch_unwind()
                .await;
            match produced {
                Ok(Ok(output)) => {
                    let (table, artifact, diagnostics) = output.into_parts();
                    for (name, value) in diagnostics {
                        report.diagnostics.insert(format!("{}.{}", stage.name(), name), value);
                    }
                    if let Some(artifact) = artifact {
                        context.insert_artifact(stage.name(), artifact);
                    }
                    report.stages.insert(stage.name().to_string(), StageStatus::Succeeded);
                    outputs.push((stage, table));
                }
                Ok(Err(e)) if e.is_no_data() => {
                    error!(
                        stage = stage.name(),
                        error = %e,
                        "No data collected. Nothing will be persisted for this test case."
                    );
                    report.stages.insert(stage.name().to_string(), StageStatus::NoData);
                    report.state = RunState::NoData;
                    return report;
                }
                Ok(Err(e)) => {
                    let reason = error_chain(&e);
                    error!(stage = stage.name(), error = %reason, "Stage failed.");
                    report
                        .stages
                        .insert(stage.name().to_string(), StageStatus::Failed { reason });
                }
                Err(panic) => {
                    let reason = format!("Stage panicked: {}", panic_message(&*panic));
                    error!(stage = stage.name(), error = %reason, "Stage failed.");
                    report
                        .stages
                        .insert(stage.name().to_string(), StageStatus::Failed { reason });
                }
            }
        }

        let additional_columns = context.test_case().additional_columns();
        for (stage, table) in outputs {
            let table = table.with_constant_columns(additional_columns);
            if let Err(e) = self.stores.append(stage.output_path(), table).await {
                let reason = error_chain(&e);
                error!(stage = stage.name(), error = %reason, "Failed to persist stage output.");
                report
                    .stages
                    .insert(stage.name().to_string(), StageStatus::Failed { reason });
            }
        }

        if report.stages.values().any(|status| *status != StageStatus::Succeeded) {
            report.state = RunState::PartiallyFailed;
        }
        info!(state = %report.state, "Data collection finished.");

        report
    }
}

fn error_chain(e: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Renders the payload of a caught panic.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
