//! REST Store
//!
//! Implements StoreAdapter against a PostgREST-style HTTP API, the dialect
//! spoken by hosted Postgres services. Filters become `field=eq.value`
//! query parameters and writes ask for the stored representation back via
//! the `Prefer` header.

use crate::domain::errors::StoreError;
use crate::domain::operation::{Filter, Operation, OperationKind, OperationOutcome, Payload};
use crate::domain::ports::StoreAdapter;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Configuration for the REST store connection.
#[derive(Debug, Clone)]
pub struct RestStoreConfig {
    /// Base URL of the service (e.g., "https://project.example.co")
    pub base_url: String,
    /// API key sent as both `apikey` header and bearer token
    pub api_key: String,
    /// Per-request timeout; keeps `execute` failing fast
    pub request_timeout: Duration,
    /// Collection probed for liveness
    pub probe_collection: String,
}

impl Default for RestStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            api_key: String::new(),
            request_timeout: Duration::from_secs(5),
            probe_collection: "users".to_string(),
        }
    }
}

/// HTTP-backed store adapter.
pub struct RestStore {
    name: String,
    config: RestStoreConfig,
    client: reqwest::Client,
}

impl RestStore {
    /// Create a new REST store with the given configuration.
    pub fn new(config: RestStoreConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            name: "rest".to_string(),
            config,
            client,
        })
    }

    /// Set the adapter name reported in logs and errors.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn collection_url(&self, collection: &str) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            collection
        )
    }

    fn request(&self, method: Method, collection: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.collection_url(collection))
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
    }

    /// Send the request and decode the row array every PostgREST endpoint
    /// returns when representation is requested.
    async fn read_rows(&self, req: reqwest::RequestBuilder) -> Result<Vec<Value>, StoreError> {
        let resp = req.send().await.map_err(|e| self.classify_transport(e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(self.classify_status(status, body));
        }
        resp.json::<Vec<Value>>()
            .await
            .map_err(|e| StoreError::unknown(&self.name, format!("bad response body: {}", e)))
    }

    /// Timeouts and connection failures mark the store unreachable; a
    /// malformed request is our bug, not the store's.
    fn classify_transport(&self, e: reqwest::Error) -> StoreError {
        if e.is_builder() {
            StoreError::unknown(&self.name, e.to_string())
        } else {
            StoreError::unreachable(&self.name, e.to_string())
        }
    }

    fn classify_status(&self, status: StatusCode, body: String) -> StoreError {
        let detail = format!("http {}: {}", status.as_u16(), body);
        match status.as_u16() {
            404 => StoreError::not_found(&self.name, detail),
            409 => StoreError::conflict(&self.name, detail),
            400 | 422 => StoreError::validation(&self.name, detail),
            408 => StoreError::unreachable(&self.name, detail),
            _ => StoreError::unknown(&self.name, detail),
        }
    }

    async fn read_one(&self, op: &Operation) -> OperationOutcome {
        let mut params = filter_params(&op.filter);
        params.push(("limit".to_string(), "1".to_string()));
        let req = self.request(Method::GET, &op.collection).query(&params);
        let rows = self.read_rows(req).await?;
        // An empty result set for a single read is a normal miss
        match rows.into_iter().next() {
            Some(record) => Ok(Payload::Record(record)),
            None => Err(StoreError::not_found(
                &self.name,
                format!("no record in {} matches filter", op.collection),
            )),
        }
    }

    async fn read_many(&self, op: &Operation) -> OperationOutcome {
        let mut params = filter_params(&op.filter);
        params.push(("order".to_string(), "created_at.desc".to_string()));
        params.push(("limit".to_string(), op.effective_limit().to_string()));
        let req = self.request(Method::GET, &op.collection).query(&params);
        let rows = self.read_rows(req).await?;
        Ok(Payload::Records(rows))
    }

    async fn insert(&self, op: &Operation) -> OperationOutcome {
        let payload = match &op.payload {
            Some(v @ Value::Object(_)) => v,
            Some(_) => {
                return Err(StoreError::validation(
                    &self.name,
                    "insert payload must be a json object",
                ))
            }
            None => {
                return Err(StoreError::validation(
                    &self.name,
                    "insert requires a payload",
                ))
            }
        };
        let req = self
            .request(Method::POST, &op.collection)
            .header("Prefer", "return=representation")
            .json(payload);
        let rows = self.read_rows(req).await?;
        match rows.into_iter().next() {
            Some(record) => Ok(Payload::Record(record)),
            None => Err(StoreError::unknown(
                &self.name,
                "insert returned no representation",
            )),
        }
    }

    async fn update(&self, op: &Operation) -> OperationOutcome {
        let patch = match &op.payload {
            Some(v @ Value::Object(_)) => v,
            Some(_) => {
                return Err(StoreError::validation(
                    &self.name,
                    "update payload must be a json object",
                ))
            }
            None => {
                return Err(StoreError::validation(
                    &self.name,
                    "update requires a payload",
                ))
            }
        };
        let params = filter_params(&op.filter);
        let req = self
            .request(Method::PATCH, &op.collection)
            .header("Prefer", "return=representation")
            .query(&params)
            .json(patch);
        let rows = self.read_rows(req).await?;
        match rows.into_iter().next() {
            Some(record) => Ok(Payload::Record(record)),
            None => Err(StoreError::not_found(
                &self.name,
                format!("no record in {} matches filter", op.collection),
            )),
        }
    }

    async fn delete(&self, op: &Operation) -> OperationOutcome {
        let params = filter_params(&op.filter);
        let req = self
            .request(Method::DELETE, &op.collection)
            .header("Prefer", "return=representation")
            .query(&params);
        let rows = self.read_rows(req).await?;
        if rows.is_empty() {
            return Err(StoreError::not_found(
                &self.name,
                format!("no record in {} matches filter", op.collection),
            ));
        }
        Ok(Payload::Deleted(rows.len() as u64))
    }

    async fn exists(&self, op: &Operation) -> OperationOutcome {
        let mut params = filter_params(&op.filter);
        params.push(("limit".to_string(), "1".to_string()));
        let req = self.request(Method::GET, &op.collection).query(&params);
        let rows = self.read_rows(req).await?;
        Ok(Payload::Exists(!rows.is_empty()))
    }
}

#[async_trait]
impl StoreAdapter for RestStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, op: &Operation) -> OperationOutcome {
        match op.kind {
            OperationKind::ReadOne => self.read_one(op).await,
            OperationKind::ReadMany => self.read_many(op).await,
            OperationKind::Insert => self.insert(op).await,
            OperationKind::Update => self.update(op).await,
            OperationKind::Delete => self.delete(op).await,
            OperationKind::Exists => self.exists(op).await,
        }
    }

    async fn probe(&self) -> OperationOutcome {
        let op = Operation::read_many_limit(&self.config.probe_collection, 1);
        self.read_many(&op).await
    }
}

/// Render filter clauses as PostgREST query parameters.
fn filter_params(filter: &Filter) -> Vec<(String, String)> {
    filter
        .clauses
        .iter()
        .map(|(field, value)| {
            let rendered = match value {
                Value::Null => "is.null".to_string(),
                Value::String(s) => format!("eq.{}", s),
                other => format!("eq.{}", other),
            };
            (field.clone(), rendered)
        })
        .collect()
}
