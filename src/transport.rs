//! HTTP transport consumed by the backend adapters.
//!
//! Adapters never talk to the network directly: they build a [`Request`] and
//! hand it to a [`Transport`]. The production implementation is
//! [`HttpTransport`], backed by [`reqwest`]. Transports never retry.
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use smallvec::SmallVec;
use tracing::debug;

/// Timeout applied to every request issued by an adapter.
pub const NETWORK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

/// A single request/response round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: SmallVec<[(&'static str, String); 2]>,
    pub body: Option<String>,
    pub timeout: Duration,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: SmallVec::new(),
            body: None,
            timeout: NETWORK_TIMEOUT,
        }
    }

    /// A POST carrying a JSON body. Backends accept an empty body for
    /// commands that take their arguments from the query string.
    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: SmallVec::from_iter([("Content-Type", "application/json".to_string())]),
            body: Some(body.into()),
            timeout: NETWORK_TIMEOUT,
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// The path and query of the URL, without scheme and host.
    pub fn path(&self) -> &str {
        let rest = self
            .url
            .split_once("://")
            .map_or(self.url.as_str(), |(_, rest)| rest);
        rest.find('/').map_or("/", |index| &rest[index..])
    }
}

/// Everything that can go wrong between issuing a request and holding a
/// parsed response.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("timed out waiting for {url}")]
    Timeout { url: String },
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("malformed response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },
}

/// Blocking-style request/response primitive with a timeout.
///
/// A timeout is an ordinary [`Error::Timeout`] value, never a panic.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: Request) -> impl Future<Output = Result<Bytes, Error>> + Send;
}

/// [`Transport`] over a pooled [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse an existing client, sharing its connection pool.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Bytes, Error> {
        debug!(method = ?request.method, url = %request.url, "sending request");

        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        builder = builder.timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let url = request.url;
        let failed = |error: reqwest::Error| {
            if error.is_timeout() {
                Error::Timeout { url: url.clone() }
            } else {
                Error::Transport {
                    url: url.clone(),
                    reason: error.to_string(),
                }
            }
        };

        let response = builder.send().await.map_err(failed)?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                url: url.clone(),
                status: status.as_u16(),
            });
        }
        response.bytes().await.map_err(failed)
    }
}
