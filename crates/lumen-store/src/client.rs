//! HTTP record store client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::{
    CreatedRecord, NewRecord, RecordKind, RecordPayload, RecordStore, StoreError, StoredRecord,
};

/// Number of attempts for a single request (initial + retries).
const MAX_ATTEMPTS: u32 = 4;

/// [`RecordStore`] backed by a REST endpoint.
///
/// Routes:
/// - `GET    /records/{kind}/{source}?language=` read singleton
/// - `GET    /records/{kind}/{source}/items` list
/// - `POST   /records/{kind}/{source}` create
/// - `PUT    /records/{kind}/item/{id}` update (`If-Match: <token>`)
/// - `DELETE /records/{kind}/item/{id}` delete
/// - `GET    /health` validate
pub struct HttpRecordStore {
    http: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpRecordStore {
    /// Create a new client for the given store URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, StoreError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: None,
        })
    }

    /// Authenticate requests with a pre-acquired bearer token.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Get the store URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Check if an error is transient and worth retrying.
    fn is_transient_error(err: &StoreError) -> bool {
        match err {
            StoreError::Remote { error, .. } => {
                error == "InternalServerError"
                    || error == "ServiceUnavailable"
                    || error == "UpstreamTimeout"
            }
            StoreError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Send a request, retrying transient failures with backoff.
    ///
    /// `build` is called once per attempt.
    async fn send_with_retry<F>(
        &self,
        operation: &'static str,
        build: F,
    ) -> Result<reqwest::Response, StoreError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            match self.send_once(build()).await {
                Ok(response) => return Ok(response),
                Err(ref e) if Self::is_transient_error(e) && attempt + 1 < MAX_ATTEMPTS => {
                    let backoff_ms = 500 * (1 << attempt); // 500ms, 1s, 2s
                    warn!(
                        attempt = attempt + 1,
                        backoff_ms,
                        error = %e,
                        operation,
                        "transient store error, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a request exactly once. Used for non-idempotent requests, where
    /// a retry after a timeout could apply the request twice.
    async fn send_once(&self, request: RequestBuilder) -> Result<reqwest::Response, StoreError> {
        match self.authorize(request).send().await {
            Ok(response) => Self::check_status(response).await,
            Err(e) => Err(StoreError::Http(e)),
        }
    }

    /// Map non-success statuses to errors, passing 404/412 through for the
    /// caller to interpret.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();

        if status.is_success()
            || status == StatusCode::NOT_FOUND
            || status == StatusCode::PRECONDITION_FAILED
        {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(StoreError::RateLimited { retry_after_secs });
        }

        let text = response.text().await.map_err(|e| {
            StoreError::InvalidResponse(format!(
                "request failed ({}): failed to read response: {}",
                status, e
            ))
        })?;

        if let Ok(remote) = serde_json::from_str::<RemoteError>(&text) {
            return Err(StoreError::Remote {
                error: remote.error,
                message: remote.message,
            });
        }

        Err(StoreError::InvalidResponse(format!(
            "request failed ({}): {}",
            status, text
        )))
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, StoreError> {
        Ok(response.json().await?)
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn ensure_ready(&self) -> Result<(), StoreError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .send_with_retry("ensure_ready", || self.http.get(&url))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Unavailable(format!(
                "health check returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn read(
        &self,
        kind: RecordKind,
        source_id: &str,
        language: Option<&str>,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let url = format!("{}/records/{}/{}", self.base_url, kind, source_id);
        let response = self
            .send_with_retry("read", || {
                let request = self.http.get(&url);
                match language {
                    Some(language) => request.query(&[("language", language)]),
                    None => request,
                }
            })
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let record: StoredRecord = Self::parse(response).await?;
        debug!(kind = %kind, id = %record.id, "read record");
        Ok(Some(record))
    }

    async fn list(
        &self,
        kind: RecordKind,
        source_id: &str,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let url = format!("{}/records/{}/{}/items", self.base_url, kind, source_id);
        let response = self
            .send_with_retry("list", || self.http.get(&url))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let body: ListRecordsResponse = Self::parse(response).await?;
        Ok(body.records)
    }

    async fn create(&self, record: NewRecord) -> Result<CreatedRecord, StoreError> {
        let url = format!(
            "{}/records/{}/{}",
            self.base_url, record.kind, record.source_id
        );
        let response = self.send_once(self.http.post(&url).json(&record)).await?;

        if !response.status().is_success() {
            return Err(StoreError::InvalidResponse(format!(
                "create failed ({})",
                response.status()
            )));
        }

        let created: CreatedRecord = Self::parse(response).await?;
        debug!(kind = %record.kind, id = %created.id, "created record");
        Ok(created)
    }

    async fn update(
        &self,
        kind: RecordKind,
        id: &str,
        payload: RecordPayload,
        concurrency_token: &str,
    ) -> Result<String, StoreError> {
        let url = format!("{}/records/{}/item/{}", self.base_url, kind, id);
        let response = self
            .send_with_retry("update", || {
                self.http
                    .put(&url)
                    .header(reqwest::header::IF_MATCH, concurrency_token)
                    .json(&payload)
            })
            .await?;

        match response.status() {
            StatusCode::PRECONDITION_FAILED => Err(StoreError::Conflict {
                kind,
                id: id.to_string(),
            }),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            }),
            _ => {
                let body: UpdateRecordResponse = Self::parse(response).await?;
                debug!(kind = %kind, id = %id, "updated record");
                Ok(body.concurrency_token)
            }
        }
    }

    async fn delete(&self, kind: RecordKind, id: &str) -> Result<(), StoreError> {
        let url = format!("{}/records/{}/item/{}", self.base_url, kind, id);
        let response = self
            .send_with_retry("delete", || self.http.delete(&url))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

/// Error body returned by the store.
#[derive(Debug, Deserialize)]
struct RemoteError {
    error: String,
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ListRecordsResponse {
    records: Vec<StoredRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRecordResponse {
    concurrency_token: String,
}
