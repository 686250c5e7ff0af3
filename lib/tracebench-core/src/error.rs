//! Collection errors.

use std::num::ParseFloatError;

use snafu::Snafu;
use tracebench_error::GenericError;

/// An error raised while collecting data for a test case.
///
/// `NoData` means the window held nothing to collect. The pipeline ends the run early on it rather than treating it as
/// a stage failure.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
#[snafu(visibility(pub(crate)))]
pub enum CollectError {
    /// A fetch returned zero records.
    #[snafu(display("No {} found in the collection window.", what))]
    NoData {
        /// What was being fetched.
        what: &'static str,
    },

    /// A fetched structure was missing required fields or was internally inconsistent.
    #[snafu(display("Malformed {}: {}", what, reason))]
    MalformedInput {
        /// What was being parsed.
        what: &'static str,

        /// Why it was rejected.
        reason: String,
    },

    /// A collaborator failed to answer, or answered with something that could not be read.
    #[snafu(display("Failed to fetch {} from its source.", what))]
    TransientIo {
        /// What was being fetched.
        what: &'static str,

        /// Error source.
        source: GenericError,
    },
}

impl CollectError {
    /// Returns `true` if this error means there was nothing to collect.
    pub fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData { .. })
    }

    /// Classifies an error returned by a source while fetching `what`.
    ///
    /// Errors caused by an undecodable payload become [`MalformedInput`][Self::MalformedInput]. Everything else is
    /// treated as the collaborator failing to answer.
    pub fn from_fetch(what: &'static str, e: GenericError) -> Self {
        let malformed = e
            .chain()
            .any(|cause| cause.is::<serde_json::Error>() || cause.is::<ParseFloatError>());
        if malformed {
            Self::MalformedInput {
                what,
                reason: format!("{:#}", e),
            }
        } else {
            Self::TransientIo { what, source: e }
        }
    }
}

#[cfg(test)]
mod tests {
    use tracebench_error::{generic_error, ErrorContext as _};

    use super::*;

    #[test]
    fn decode_failures_are_malformed_input() {
        let e = serde_json::from_str::<Vec<u32>>("[1, \"two\"]")
            .error_context("Failed to decode response.")
            .unwrap_err();
        let err = CollectError::from_fetch("traces", e);
        match &err {
            CollectError::MalformedInput { what, reason } => {
                assert_eq!(*what, "traces");
                assert!(reason.starts_with("Failed to decode"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(err.to_string().starts_with("Malformed traces: "));
    }

    #[test]
    fn unparseable_numbers_are_malformed_input() {
        let e = "fast".parse::<f64>().error_context("Invalid throughput.").unwrap_err();
        assert!(matches!(
            CollectError::from_fetch("throughput", e),
            CollectError::MalformedInput { what: "throughput", .. }
        ));
    }

    #[test]
    fn other_failures_are_transient() {
        let e = generic_error!("connection refused");
        assert!(matches!(
            CollectError::from_fetch("CPU usage", e),
            CollectError::TransientIo { what: "CPU usage", .. }
        ));
    }
}
