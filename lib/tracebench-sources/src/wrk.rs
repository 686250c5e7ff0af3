use std::path::PathBuf;

use async_trait::async_trait;
use tracebench_core::sources::ThroughputSource;
use tracebench_error::{ErrorContext as _, GenericError};
use tracing::debug;

/// A [`ThroughputSource`] reading the files written by the `wrk` workload generator.
///
/// The generator writes the achieved requests per second of each test case to `<output path>/throughput/<test case
/// name>`, as the first line of the file.
pub struct WrkThroughputSource {
    throughput_dir: PathBuf,
}

impl WrkThroughputSource {
    /// Creates a new `WrkThroughputSource` for the given generator output path.
    pub fn new<P: Into<PathBuf>>(output_path: P) -> Self {
        Self {
            throughput_dir: output_path.into().join("throughput"),
        }
    }
}

#[async_trait]
impl ThroughputSource for WrkThroughputSource {
    async fn fetch_throughput(&self, test_case_name: &str) -> Result<f64, GenericError> {
        let path = self.throughput_dir.join(test_case_name);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .with_error_context(|| format!("Failed to read throughput file '{}'.", path.display()))?;

        let first_line = contents.lines().next().unwrap_or_default().trim();
        let throughput = first_line
            .parse::<f64>()
            .with_error_context(|| format!("Invalid throughput '{}' in '{}'.", first_line, path.display()))?;
        debug!(test_case = test_case_name, throughput, "Read achieved throughput.");

        Ok(throughput)
    }
}
