//! HTTP backend talking to a remote resolution service.
//!
//! # Wire mapping
//!
//! | Operation | Method | Path |
//! |-----------|--------|------|
//! | find      | GET (POST when the query is long) | `/v1/<kind>/<key>` |
//! | search    | GET    | `/v1/<kind plural>/<pattern>` |
//! | save      | PUT    | `/v1/<kind>/<key>` |
//! | destroy   | DELETE | `/v1/<kind>/<key>` |
//! | exists    | HEAD   | `/v1/<kind>/<key>` |
//!
//! The environment and request options travel in the query string. Status
//! classes map to outcomes: 2xx success, 404 absent, other 4xx
//! `ValidationError::Rejected`, 5xx / connect failure / timeout
//! `Unreachable`.

use std::time::Duration;

use async_trait::async_trait;
use indirect_core::{
    Artifact, Capabilities, CodecError, ConfigError, IndirectError, IndirectResult, Operation,
    Options, Request, UnreachableReason, ValidationError,
};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::backend::Backend;
use crate::codec::Format;

/// Queries longer than this are sent as a form body instead.
pub const MAX_QUERY_LEN: usize = 1024;

#[derive(Debug, Clone)]
pub struct NetworkBackend {
    name: String,
    base_url: Url,
    client: Client,
    format: Format,
}

impl NetworkBackend {
    /// Backend for the service at `base_url`; every call is bounded by `timeout`.
    pub fn new(name: impl Into<String>, base_url: &str, timeout: Duration) -> IndirectResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| ConfigError::InvalidValue {
            field: "base_url".to_string(),
            value: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidValue {
                field: "base_url".to_string(),
                value: base_url.to_string(),
                reason: "not a base URL".to_string(),
            }
            .into());
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "request_timeout".to_string(),
                value: format!("{:?}", timeout),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name: name.into(),
            base_url,
            client,
            format: Format::MessagePack,
        })
    }

    /// Codec used for request bodies on save.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// URL for `request`, including the encoded query.
    pub fn url_for(&self, request: &Request) -> IndirectResult<Url> {
        let mut url = self.base_url.clone();
        let kind = if request.is_plural() {
            request.kind().plural()
        } else {
            request.kind().as_str()
        };
        url.path_segments_mut()
            .map_err(|_| ConfigError::InvalidValue {
                field: "base_url".to_string(),
                value: self.base_url.to_string(),
                reason: "not a base URL".to_string(),
            })?
            .pop_if_empty()
            .extend(["v1", kind, request.key()]);

        let pairs = encode_options(request.options())?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("environment", request.environment());
            for (name, value) in &pairs {
                query.append_pair(name, value);
            }
        }
        Ok(url)
    }

    async fn send(&self, method: Method, request: &Request) -> IndirectResult<Response> {
        let mut url = self.url_for(request)?;
        let query = url.query().unwrap_or_default().to_string();

        let long_find = request.operation() == Operation::Find && query.len() > MAX_QUERY_LEN;
        let builder = if method == Method::GET && long_find {
            url.set_query(None);
            tracing::debug!(
                backend = %self.name,
                query_len = query.len(),
                "Query too long, sending as POST"
            );
            self.client
                .post(url)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(query)
        } else {
            self.client.request(method, url)
        };

        builder
            .header(ACCEPT, Format::accept_header())
            .send()
            .await
            .map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, e: reqwest::Error) -> IndirectError {
        let reason = if e.is_timeout() {
            UnreachableReason::Timeout
        } else if e.is_connect() {
            UnreachableReason::ConnectionRefused
        } else {
            UnreachableReason::Transport(e.to_string())
        };
        tracing::warn!(backend = %self.name, error = %e, "Network call failed");
        IndirectError::unreachable(&self.name, reason)
    }

    /// Map a non-success, non-404 status to its error class.
    async fn status_error(&self, response: Response) -> IndirectError {
        let status = response.status();
        if status.is_server_error() {
            return IndirectError::unreachable(
                &self.name,
                UnreachableReason::ServerError {
                    status: status.as_u16(),
                },
            );
        }
        let body = response.text().await.unwrap_or_default();
        ValidationError::Rejected {
            backend: self.name.clone(),
            status: status.as_u16(),
            body,
        }
        .into()
    }

    async fn decode_body<T: DeserializeOwned>(&self, response: Response) -> IndirectResult<T> {
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;

        let content_type = content_type.ok_or_else(|| CodecError::MissingContentType {
            backend: self.name.clone(),
        })?;
        Format::from_content_type(&content_type)?.decode(&body)
    }
}

fn invalid_option(name: &str, reason: &str) -> IndirectError {
    ValidationError::InvalidOption {
        option: name.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn scalar(name: &str, value: &Value) -> IndirectResult<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Array(_) => Err(invalid_option(name, "nested arrays cannot be encoded")),
        Value::Object(_) => Err(invalid_option(name, "objects cannot be encoded")),
    }
}

/// Flatten request options into query pairs. Arrays repeat their name once
/// per element; nulls are dropped.
pub fn encode_options(options: &Options) -> IndirectResult<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for (name, value) in options {
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Some(s) = scalar(name, item)? {
                        pairs.push((name.clone(), s));
                    }
                }
            }
            Value::Object(_) => return Err(invalid_option(name, "objects cannot be encoded")),
            other => {
                if let Some(s) = scalar(name, other)? {
                    pairs.push((name.clone(), s));
                }
            }
        }
    }
    Ok(pairs)
}

#[async_trait]
impl Backend for NetworkBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    async fn find(&self, request: &Request) -> IndirectResult<Option<Artifact>> {
        let response = self.send(Method::GET, request).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => self.decode_body(response).await.map(Some),
            _ => Err(self.status_error(response).await),
        }
    }

    async fn search(&self, request: &Request) -> IndirectResult<Vec<Artifact>> {
        let response = self.send(Method::GET, request).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            s if s.is_success() => self.decode_body(response).await,
            _ => Err(self.status_error(response).await),
        }
    }

    async fn save(&self, request: &Request, artifact: &Artifact) -> IndirectResult<()> {
        let url = self.url_for(request)?;
        let body = self.format.encode(artifact)?;
        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, self.format.content_type())
            .header(ACCEPT, Format::accept_header())
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.status_error(response).await)
        }
    }

    async fn destroy(&self, request: &Request) -> IndirectResult<()> {
        let response = self.send(Method::DELETE, request).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            s if s.is_success() => Ok(()),
            _ => Err(self.status_error(response).await),
        }
    }

    async fn exists(&self, request: &Request) -> IndirectResult<bool> {
        let response = self.send(Method::HEAD, request).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            _ => Err(self.status_error(response).await),
        }
    }
}
