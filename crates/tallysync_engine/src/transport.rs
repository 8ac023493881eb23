//! Transport layer for talking to the tax backend.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so any library
//! (or an in-memory server for tests) can sit underneath. [`ApiTransport`]
//! layers the backend's paths and `{"data": ...}` envelopes on top of it.

use crate::error::{SyncError, SyncResult};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tallysync_protocol::{
    ApiEnvelope, EntityType, GenerateReport, Operation, OperationRequest, PushEntitiesRequest,
    PushEntitiesResponse, SyncableEntity,
};
use thiserror::Error;
use tracing::debug;

/// Failure reported by an [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request never reached the server or the connection dropped.
    #[error("network error: {0}")]
    Network(String),
    /// No response within the request timeout.
    #[error("request timed out")]
    Timeout,
    /// The server answered with an error status.
    #[error("server responded {status}: {message}")]
    Application {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body.
        message: String,
    },
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(message) => SyncError::transport_retryable(message),
            TransportError::Timeout => SyncError::Timeout,
            // Request timeout and rate limiting clear up on their own
            TransportError::Application { status: 408 | 429, message } => {
                SyncError::transport_retryable(message)
            }
            TransportError::Application { status, message } if (400..500).contains(&status) => {
                SyncError::Validation(format!("{status}: {message}"))
            }
            TransportError::Application { status, message } => {
                SyncError::ServerError(format!("{status}: {message}"))
            }
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    /// Time after which the client gives up with [`TransportError::Timeout`].
    pub timeout: Duration,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. Bodies are
/// JSON; paths are relative to the backend's base URL.
pub trait HttpClient: Send + Sync {
    /// Sends a GET request and returns the response body.
    fn get(&self, path: &str, options: &RequestOptions) -> Result<Value, TransportError>;

    /// Sends a POST request and returns the response body.
    fn post(&self, path: &str, body: &Value, options: &RequestOptions)
        -> Result<Value, TransportError>;
}

impl<C: HttpClient + ?Sized> HttpClient for Arc<C> {
    fn get(&self, path: &str, options: &RequestOptions) -> Result<Value, TransportError> {
        (**self).get(path, options)
    }

    fn post(
        &self,
        path: &str,
        body: &Value,
        options: &RequestOptions,
    ) -> Result<Value, TransportError> {
        (**self).post(path, body, options)
    }
}

/// Typed access to the backend's endpoints.
pub struct ApiTransport<C: HttpClient> {
    client: C,
    base_path: String,
    options: RequestOptions,
}

impl<C: HttpClient> ApiTransport<C> {
    /// Creates a transport sending every path under `base_path`.
    pub fn new(client: C, base_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_path: base_path.into().trim_end_matches('/').to_string(),
            options: RequestOptions { timeout },
        }
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_path, path)
    }

    fn get_data<T: DeserializeOwned>(&self, path: &str) -> SyncResult<T> {
        let url = self.url(path);
        debug!(%url, "GET");
        let body = self.client.get(&url, &self.options)?;
        let envelope: ApiEnvelope<T> = serde_json::from_value(body)?;
        Ok(envelope.data)
    }

    fn post_data<T: DeserializeOwned>(&self, path: &str, body: &Value) -> SyncResult<T> {
        let url = self.url(path);
        debug!(%url, "POST");
        let body = self.client.post(&url, body, &self.options)?;
        let envelope: ApiEnvelope<T> = serde_json::from_value(body)?;
        Ok(envelope.data)
    }

    /// Fetches the server's entities of one type.
    pub fn fetch_entities(&self, entity_type: EntityType) -> SyncResult<Vec<SyncableEntity>> {
        self.get_data(&entity_type.fetch_path())
    }

    /// Pushes locally-won entities. Returns how many the server accepted.
    pub fn push_entities(
        &self,
        entity_type: EntityType,
        entities: &[SyncableEntity],
    ) -> SyncResult<usize> {
        let request = PushEntitiesRequest {
            entity_type,
            entities: entities.to_vec(),
        };
        let response: PushEntitiesResponse =
            self.post_data(&entity_type.push_path(), &serde_json::to_value(&request)?)?;
        Ok(response.accepted)
    }

    /// Sends one queued operation to its endpoint and returns the response data.
    pub fn dispatch(&self, op: &Operation) -> SyncResult<Value> {
        let endpoint = op
            .kind
            .endpoint()
            .ok_or_else(|| SyncError::UnknownOperation(op.kind.name().to_string()))?;
        let request = OperationRequest::from(op);
        self.post_data(endpoint, &serde_json::to_value(&request)?)
    }

    /// Asks the backend to generate a report.
    pub fn generate_report(&self, request: &GenerateReport) -> SyncResult<Value> {
        self.post_data("/reports/generate", &serde_json::to_value(request)?)
    }
}

impl<C: HttpClient> std::fmt::Debug for ApiTransport<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiTransport")
            .field("base_path", &self.base_path)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}


