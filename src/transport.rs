//! HTTP transport abstraction.
//!
//! The engine never talks to reqwest directly: every request goes through a
//! [`Transport`], which lets tests substitute a scripted double.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::{Result, SpeedtestError};
use crate::params;
use crate::progress::ProgressSink;

/// A request body that knows its length and can be replayed.
#[derive(Clone)]
pub struct RequestBody {
    payload: Bytes,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl RequestBody {
    /// A body carrying `payload`, without progress reporting.
    pub fn new(payload: Bytes) -> Self {
        RequestBody {
            payload,
            progress: None,
        }
    }

    /// Report every slice of the body to `sink` as it is written.
    pub fn with_progress(mut self, sink: Option<Arc<dyn ProgressSink>>) -> Self {
        self.progress = sink;
        self
    }

    /// Length sent in the `Content-Length` header.
    pub fn content_length(&self) -> u64 {
        self.payload.len() as u64
    }

    /// The raw payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Whether writes are reported to a progress sink.
    pub fn reports_progress(&self) -> bool {
        self.progress.is_some()
    }

    /// A copy positioned at the start of the body for resending.
    ///
    /// Replays do not report progress again.
    pub fn rewind(&self) -> Self {
        RequestBody::new(self.payload.clone())
    }

    /// The body as a stream of slices, reporting each slice as it is taken.
    pub fn into_stream(self) -> impl Stream<Item = std::io::Result<Bytes>> + Send + Sync + 'static {
        let RequestBody { payload, progress } = self;
        let chunks: Vec<Bytes> = (0..payload.len())
            .step_by(params::UPLOAD_CHUNK_SIZE)
            .map(|at| payload.slice(at..(at + params::UPLOAD_CHUNK_SIZE).min(payload.len())))
            .collect();
        stream::iter(chunks).map(move |chunk| {
            if let Some(sink) = &progress {
                sink.update(chunk.len() as u64);
            }
            Ok(chunk)
        })
    }
}

/// One HTTP request issued by a transfer or the latency probe.
pub struct TransferRequest {
    /// HTTP method.
    pub method: Method,
    /// Target URL.
    pub url: Url,
    /// Extra request headers.
    pub headers: HeaderMap,
    /// Body, absent for GETs.
    pub body: Option<RequestBody>,
}

impl TransferRequest {
    /// A bodyless GET.
    pub fn get(url: Url) -> Self {
        TransferRequest {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// A form POST carrying `body`.
    pub fn post_form(url: Url, body: RequestBody) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(params::FORM_CONTENT_TYPE),
        );
        TransferRequest {
            method: Method::POST,
            url,
            headers,
            body: Some(body),
        }
    }
}

/// Status and body of a response. The body is read lazily.
pub struct TransferResponse {
    /// Response status.
    pub status: StatusCode,
    /// Body chunks as they arrive.
    pub body: BoxStream<'static, Result<Bytes>>,
}

/// Performs single HTTP requests on behalf of the engine.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return once response headers are available.
    ///
    /// Implementations must give up with [`SpeedtestError::Cancelled`] when
    /// `cancel` fires.
    async fn send(
        &self,
        request: TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<TransferResponse>;
}

/// [`Transport`] backed by a shared reqwest connection pool.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// A transport with its own connection pool, identifying as `user_agent`.
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(ReqwestTransport { client })
    }

    /// Wrap an existing reqwest client.
    pub fn from_client(client: reqwest::Client) -> Self {
        ReqwestTransport { client }
    }

    async fn execute(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Option<RequestBody>,
    ) -> reqwest::Result<reqwest::Response> {
        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            builder = builder.header(CONTENT_LENGTH, body.content_length());
            builder = if body.reports_progress() {
                builder.body(reqwest::Body::wrap_stream(body.into_stream()))
            } else {
                builder.body(body.payload.clone())
            };
        }
        builder.send().await
    }
}

// A pooled connection closed by the server surfaces as a request error
// before any response arrived.
fn is_stale_connection(e: &reqwest::Error) -> bool {
    e.is_request() && !e.is_connect() && !e.is_timeout()
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<TransferResponse> {
        let TransferRequest {
            method,
            url,
            headers,
            body,
        } = request;
        let replay = body.as_ref().map(RequestBody::rewind);

        let attempt = async {
            match self
                .execute(method.clone(), url.clone(), headers.clone(), body)
                .await
            {
                Err(e) if is_stale_connection(&e) => {
                    debug!(%url, error = %e, "retrying request on a fresh connection");
                    self.execute(method, url, headers, replay).await
                }
                other => other,
            }
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(SpeedtestError::Cancelled),
            response = attempt => response?,
        };

        let status = response.status();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(SpeedtestError::from))
            .boxed();
        Ok(TransferResponse { status, body })
    }
}
