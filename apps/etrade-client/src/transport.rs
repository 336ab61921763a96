//! Transport port and the reqwest-backed default implementation.
//!
//! A transport sends exactly one already-signed request and reports the
//! status and body. Retry policy lives above it, where requests can be
//! re-signed with a fresh nonce per attempt.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::EtradeError;

/// A fully signed request, ready for the wire.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    /// HTTP method (`GET`, `POST`, `PUT`, `DELETE`).
    pub method: String,
    /// Full URL, query string included.
    pub url: String,
    /// Headers, including `Authorization`.
    pub headers: Vec<(String, String)>,
    /// Optional JSON body.
    pub body: Option<serde_json::Value>,
}

/// Raw response from the transport.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
    /// Parsed `Retry-After` header, in seconds.
    pub retry_after: Option<u64>,
}

impl HttpResponse {
    /// True for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Port for sending signed requests.
///
/// One attempt per call; implementations must not retry or mutate auth
/// state.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Acquire any underlying connection resources. Optional.
    async fn open(&self) -> Result<(), EtradeError> {
        Ok(())
    }

    /// Release underlying connection resources. Optional; dropping the
    /// transport releases them regardless.
    async fn close(&self) -> Result<(), EtradeError> {
        Ok(())
    }

    /// Send one request and return the raw response.
    async fn send(&self, request: &SignedRequest) -> Result<HttpResponse, EtradeError>;
}

/// Default transport over a reqwest connection pool.
///
/// `open` builds a pooled client reused across calls; before `open` (or
/// after `close`) each send builds a one-shot client, so the transport is
/// usable without explicit lifecycle management.
#[derive(Debug)]
pub struct HttpTransport {
    timeout: Duration,
    pool: RwLock<Option<reqwest::Client>>,
}

impl HttpTransport {
    /// Create a transport with the given per-request timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pool: RwLock::new(None),
        }
    }

    fn build_client(&self) -> Result<reqwest::Client, EtradeError> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| EtradeError::Network(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self) -> Result<(), EtradeError> {
        let mut pool = self.pool.write().await;
        if pool.is_none() {
            *pool = Some(self.build_client()?);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), EtradeError> {
        self.pool.write().await.take();
        Ok(())
    }

    async fn send(&self, request: &SignedRequest) -> Result<HttpResponse, EtradeError> {
        let client = match self.pool.read().await.as_ref() {
            Some(client) => client.clone(),
            None => self.build_client()?,
        };

        let mut builder = match request.method.as_str() {
            "GET" => client.get(&request.url),
            "POST" => client.post(&request.url),
            "PUT" => client.put(&request.url),
            "DELETE" => client.delete(&request.url),
            other => {
                return Err(EtradeError::Network(format!("unsupported method: {other}")));
            }
        };

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| EtradeError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response
            .text()
            .await
            .map_err(|e| EtradeError::Network(e.to_string()))?;

        Ok(HttpResponse {
            status,
            body,
            retry_after,
        })
    }
}
