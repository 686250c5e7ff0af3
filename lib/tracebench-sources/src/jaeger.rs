use async_trait::async_trait;
use reqwest::Client;
use tracebench_core::{sources::TraceSource, test_case::TimeWindow, trace::TraceExport};
use tracebench_error::{ErrorContext as _, GenericError};
use tracing::debug;

use crate::{build_client, decode_response, process_response};

const DEFAULT_TAG_FILTER: &str = r#"{"http.status_code":"200"}"#;

/// A [`TraceSource`] backed by the Jaeger query API.
///
/// Traces are searched by the entrance service, i.e. the service selected in the Jaeger UI's search form, and by
/// default only traces whose HTTP status code is 200 are returned.
pub struct JaegerTraceSource {
    client: Client,
    url: String,
    entrance_service: String,
    tag_filter: Option<String>,
}

impl JaegerTraceSource {
    /// Creates a new `JaegerTraceSource` for the Jaeger query service at `endpoint`, e.g. `http://jaeger:16686`.
    ///
    /// # Errors
    ///
    /// If the HTTP client cannot be built, an error is returned.
    pub fn new<E, S>(endpoint: E, entrance_service: S) -> Result<Self, GenericError>
    where
        E: AsRef<str>,
        S: Into<String>,
    {
        Ok(Self {
            client: build_client()?,
            url: format!("{}/api/traces", endpoint.as_ref().trim_end_matches('/')),
            entrance_service: entrance_service.into(),
            tag_filter: Some(DEFAULT_TAG_FILTER.to_string()),
        })
    }

    /// Sets the JSON tag filter applied to the search, or removes it when `None`.
    pub fn with_tag_filter(mut self, tag_filter: Option<String>) -> Self {
        self.tag_filter = tag_filter;
        self
    }

    fn query_params(&self, window: &TimeWindow, operation: Option<&str>, limit: usize) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("start", window.start_micros().to_string()),
            ("end", window.end_micros().to_string()),
            ("limit", limit.to_string()),
            ("service", self.entrance_service.clone()),
        ];
        if let Some(tags) = &self.tag_filter {
            params.push(("tags", tags.clone()));
        }
        if let Some(operation) = operation {
            params.push(("operation", operation.to_string()));
        }
        params
    }
}

#[async_trait]
impl TraceSource for JaegerTraceSource {
    async fn fetch_traces(
        &self, window: &TimeWindow, operation: Option<&str>, limit: usize,
    ) -> Result<TraceExport, GenericError> {
        let response = self
            .client
            .get(&self.url)
            .query(&self.query_params(window, operation, limit))
            .send()
            .await
            .error_context("Failed to query Jaeger.")?;
        debug!(url = %response.url(), "Fetched traces.");

        let response = process_response(response).await?;
        let export = decode_response::<TraceExport>(response, "Jaeger").await?;
        debug!(traces = export.data.len(), "Decoded traces.");

        Ok(export)
    }
}
