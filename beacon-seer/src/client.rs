use std::collections::HashSet;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use beacon_auth::{RpcSignature, SharedSecret};
use beacon_dynamic_config::OptionsStore;
use beacon_metrics::{Counter, CounterMetric, Metrics, TimerMetric, TimerSpec};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use url::Url;

use crate::statsd::{SeerCounters, SeerTimers};
use crate::types::{
    BulkCreateGroupingRecordsResponse, CreateGroupingRecordsRequest,
    DeleteGroupingRecordsByHashRequest,
};

/// Endpoint for bulk uploads of grouping records.
pub const GROUPING_RECORDS_PATH: &str = "v0/issues/similar-issues/grouping-record";

/// Endpoint for deleting grouping records by hash.
pub const HASH_RECORDS_DELETE_PATH: &str = "v0/issues/similar-issues/grouping-record/delete-by-hash";

/// Endpoint for deleting all grouping records of a project, followed by the project id.
pub const PROJECT_RECORDS_DELETE_PATH: &str = "v0/issues/similar-issues/grouping-record/delete";

const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";

/// Maximum number of characters of an error response body kept for logging.
const MAX_ERROR_BODY: usize = 512;

/// Error raised when constructing a [`SeerClient`].
#[derive(Debug, thiserror::Error)]
pub enum SeerClientError {
    /// The HTTP client could not be created.
    #[error("failed to create http client")]
    Client(#[from] reqwest::Error),
    /// The base URL cannot carry a path.
    #[error("invalid base url for the similarity service: {0}")]
    InvalidUrl(Url),
}

/// Failure of a single call. Never leaves the client.
#[derive(Debug, thiserror::Error)]
enum SeerError {
    #[error("invalid endpoint url")]
    Url(#[from] url::ParseError),
    #[error("failed to serialize request")]
    Serialize(#[source] serde_json::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("could not send request")]
    Transport(#[source] reqwest::Error),
    #[error("unexpected status {status}")]
    Status { status: StatusCode, body: String },
    #[error("failed to parse response")]
    InvalidResponse(#[source] serde_json::Error),
}

impl SeerError {
    fn from_reqwest(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            Self::Timeout(timeout)
        } else {
            Self::Transport(error)
        }
    }

    /// The value of the `result` tag in outcome metrics.
    fn outcome(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            _ => "failure",
        }
    }

    /// A short description of the failure for logs.
    fn reason(&self) -> &'static str {
        match self {
            Self::Url(_) | Self::Serialize(_) => "invalid request",
            Self::Timeout(_) => "read timeout",
            Self::Transport(_) => "transport error",
            Self::Status { status, .. } => status.canonical_reason().unwrap_or("unknown status"),
            Self::InvalidResponse(_) => "invalid response",
        }
    }

    /// The truncated response body of an error status, if the service sent one.
    fn body(&self) -> Option<&str> {
        match self {
            Self::Status { body, .. } if !body.is_empty() => Some(body),
            _ => None,
        }
    }
}

/// Client for the similarity search service.
///
/// All calls share a single connection pool. The pool is created with a default timeout, which
/// every call overrides with the timeout from the runtime options.
#[derive(Debug)]
pub struct SeerClient {
    client: Client,
    base_url: Url,
    options: Arc<OptionsStore>,
    shared_secret: Option<SharedSecret>,
    metrics: Arc<Metrics>,
}

impl SeerClient {
    /// Creates a client for the service at `base_url`.
    pub fn new(
        base_url: Url,
        timeout: Duration,
        options: Arc<OptionsStore>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, SeerClientError> {
        if base_url.cannot_be_a_base() {
            return Err(SeerClientError::InvalidUrl(base_url));
        }

        // Endpoints are joined relative to the base path.
        let mut base_url = base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            options,
            shared_secret: None,
            metrics,
        })
    }

    /// Signs bulk uploads with the given secret.
    pub fn with_shared_secret(mut self, shared_secret: SharedSecret) -> Self {
        self.shared_secret = Some(shared_secret);
        self
    }

    /// Returns the base URL of the service.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Uploads a batch of grouping records.
    ///
    /// An empty batch succeeds without contacting the service. Timeouts, error statuses and
    /// malformed responses are logged and return an unsuccessful response. Neighbors returned
    /// for groups that were not part of the batch are dropped.
    pub fn post_bulk_grouping_records(
        &self,
        request: &CreateGroupingRecordsRequest,
    ) -> BulkCreateGroupingRecordsResponse {
        let Some(project_id) = request.project_id() else {
            return BulkCreateGroupingRecordsResponse::success();
        };

        let timeout = self.options.get().bulk_record_update_timeout();
        let group_ids = &request.group_id_list;
        let stacktrace_length_sum = request.stacktrace_length_sum();

        let mut timer = self
            .metrics
            .timer(TimerSpec::new(SeerTimers::BulkRecordsDuration.name()));

        match self.try_post_bulk_grouping_records(request, timeout) {
            Ok(response) => {
                beacon_log::info!(
                    group_ids = ?group_ids,
                    project_id,
                    stacktrace_length_sum,
                    "posted bulk grouping records",
                );
                self.report(SeerCounters::BulkRecordsPosted, "success");
                response
            }
            Err(error) => {
                timer.fail();
                beacon_log::info!(
                    error = &error as &dyn Error,
                    reason = error.reason(),
                    body = error.body(),
                    timeout = ?timeout,
                    group_ids = ?group_ids,
                    project_id,
                    stacktrace_length_sum,
                    "failed to post bulk grouping records",
                );
                self.report(SeerCounters::BulkRecordsPosted, error.outcome());
                BulkCreateGroupingRecordsResponse::failure()
            }
        }
    }

    /// Deletes all grouping records of a project.
    ///
    /// Returns `true` if the service responded with a success status.
    pub fn delete_project_grouping_records(&self, project_id: u64) -> bool {
        let timeout = self.options.get().record_delete_timeout();

        let result = self
            .endpoint(&format!("{PROJECT_RECORDS_DELETE_PATH}/{project_id}"))
            .and_then(|url| {
                let builder = self.client.get(url).header(CONTENT_TYPE, JSON_CONTENT_TYPE);
                self.send(builder, timeout)
            });

        match result {
            Ok(_) => {
                beacon_log::info!(project_id, "deleted project grouping records");
                self.report(SeerCounters::ProjectRecordsDeleted, "success");
                true
            }
            Err(error) => {
                beacon_log::error!(
                    error = &error as &dyn Error,
                    reason = error.reason(),
                    body = error.body(),
                    timeout = ?timeout,
                    project_id,
                    "failed to delete project grouping records",
                );
                self.report(SeerCounters::ProjectRecordsDeleted, error.outcome());
                false
            }
        }
    }

    /// Deletes the grouping records with the given hashes.
    ///
    /// Returns `true` if the service responded with a success status.
    pub fn delete_grouping_records_by_hash(&self, project_id: u64, hashes: &[String]) -> bool {
        let timeout = self.options.get().record_delete_timeout();
        let body = DeleteGroupingRecordsByHashRequest {
            project_id,
            hash_list: hashes,
        };

        let result = self.endpoint(HASH_RECORDS_DELETE_PATH).and_then(|url| {
            let builder = self.client.post(url).json(&body);
            self.send(builder, timeout)
        });

        match result {
            Ok(_) => {
                beacon_log::info!(
                    project_id,
                    hashes = ?hashes,
                    "deleted grouping records by hash",
                );
                self.report(SeerCounters::HashRecordsDeleted, "success");
                true
            }
            Err(error) => {
                beacon_log::error!(
                    error = &error as &dyn Error,
                    reason = error.reason(),
                    body = error.body(),
                    timeout = ?timeout,
                    project_id,
                    hashes = ?hashes,
                    "failed to delete grouping records by hash",
                );
                self.report(SeerCounters::HashRecordsDeleted, error.outcome());
                false
            }
        }
    }

    fn try_post_bulk_grouping_records(
        &self,
        request: &CreateGroupingRecordsRequest,
        timeout: Duration,
    ) -> Result<BulkCreateGroupingRecordsResponse, SeerError> {
        let url = self.endpoint(GROUPING_RECORDS_PATH)?;
        let body = serde_json::to_vec(request).map_err(SeerError::Serialize)?;

        let mut builder = self.client.post(url).header(CONTENT_TYPE, JSON_CONTENT_TYPE);
        if let Some(signature) = self.signature(&body) {
            builder = builder.header(AUTHORIZATION, signature.to_header());
        }

        let response = self.send(builder.body(body), timeout)?;
        let bytes = response
            .bytes()
            .map_err(|error| SeerError::from_reqwest(error, timeout))?;

        let mut response: BulkCreateGroupingRecordsResponse =
            serde_json::from_slice(&bytes).map_err(SeerError::InvalidResponse)?;
        self.retain_submitted_neighbors(&mut response, &request.group_id_list);

        Ok(response)
    }

    /// Signs the body at the rate configured in the runtime options.
    fn signature(&self, body: &[u8]) -> Option<RpcSignature> {
        let rate = self.options.get().use_shared_secret_rate();
        if rand::random::<f32>() >= rate {
            return None;
        }

        match self.shared_secret {
            Some(ref secret) if !secret.is_empty() => Some(secret.sign(body)),
            _ => {
                beacon_log::warn!("no shared secret configured for the similarity service");
                None
            }
        }
    }

    fn retain_submitted_neighbors(
        &self,
        response: &mut BulkCreateGroupingRecordsResponse,
        group_ids: &[u64],
    ) {
        let Some(ref mut neighbors) = response.groups_with_neighbor else {
            return;
        };

        let submitted = group_ids
            .iter()
            .map(|group_id| group_id.to_string())
            .collect::<HashSet<_>>();

        neighbors.retain(|group_id, _| {
            let known = submitted.contains(group_id);
            if !known {
                beacon_log::warn!(
                    group_id = group_id.as_str(),
                    "similarity service returned a neighbor for an unknown group",
                );
                self.metrics
                    .incr(Counter::new(SeerCounters::UnknownNeighborGroups.name()));
            }
            known
        });
    }

    fn endpoint(&self, path: &str) -> Result<Url, SeerError> {
        Ok(self.base_url.join(path)?)
    }

    fn send(&self, builder: RequestBuilder, timeout: Duration) -> Result<Response, SeerError> {
        let response = builder
            .timeout(timeout)
            .send()
            .map_err(|error| SeerError::from_reqwest(error, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(SeerError::Status {
                status,
                body: body.trim().chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        Ok(response)
    }

    fn report(&self, counter: SeerCounters, outcome: &'static str) {
        self.metrics
            .incr(Counter::new(counter.name()).tag("result", outcome));
    }
}
