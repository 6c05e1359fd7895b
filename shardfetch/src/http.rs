//! HTTP client wrapper for download requests.
//!
//! A thin layer over `reqwest` that knows how to:
//! - issue GET/HEAD requests with an optional `Range` header
//! - probe a URL for its content length and byte-range support
//!
//! The underlying client is built without a request timeout (streaming
//! downloads are long-lived) and with connection keep-alive disabled, so
//! shards do not queue behind each other on a single origin connection.

use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, RANGE, USER_AGENT};
use reqwest::{Client, Method, Response};
use tracing::{debug, warn};

use crate::config::{FetchConfig, ProxyMode};
use crate::error::{FetchError, FetchResult};

/// Byte range requested from the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteRange {
    /// No `Range` header.
    Full,
    /// `bytes=start-` — from an offset to the end.
    From(u64),
    /// `bytes=start-end` — a closed span, both ends inclusive.
    Span(u64, u64),
}

impl ByteRange {
    /// Renders the `Range` header value, or `None` for a full request.
    pub fn header_value(&self) -> Option<String> {
        match self {
            Self::Full => None,
            Self::From(start) => Some(format!("bytes={}-", start)),
            Self::Span(start, end) => Some(format!("bytes={}-{}", start, end)),
        }
    }
}

/// Result of a length probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentInfo {
    /// Declared content length in bytes.
    pub length: u64,
    /// Whether the server advertises `Accept-Ranges: bytes`.
    pub supports_range: bool,
}

/// HTTP client used by all download tasks.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
    user_agent: String,
    headers: Vec<(String, String)>,
}

impl HttpClient {
    /// Build a client from the task configuration.
    pub fn new(config: &FetchConfig) -> FetchResult<Self> {
        let mut builder = Client::builder().pool_max_idle_per_host(0);
        builder = match &config.proxy {
            ProxyMode::Explicit(url) => builder.proxy(reqwest::Proxy::all(url)?),
            ProxyMode::Environment => builder,
            ProxyMode::Disabled => builder.no_proxy(),
        };
        Ok(Self {
            client: builder.build()?,
            user_agent: config.user_agent.clone(),
            headers: config.headers.clone(),
        })
    }

    /// Send a request with the configured User-Agent and extra headers.
    pub async fn send(&self, url: &str, method: Method, range: ByteRange) -> FetchResult<Response> {
        let mut request = self
            .client
            .request(method, url)
            .header(USER_AGENT, &self.user_agent);
        if let Some(value) = range.header_value() {
            request = request.header(RANGE, value);
        }
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        Ok(request.send().await?)
    }

    /// Probe a URL for its content length and byte-range support.
    ///
    /// Tries HEAD first; servers that reject HEAD (status >= 300) are
    /// probed again with GET and the body is discarded.
    pub async fn probe(&self, url: &str) -> FetchResult<ContentInfo> {
        let mut response = self.send(url, Method::HEAD, ByteRange::Full).await?;
        if response.status().as_u16() >= 300 {
            warn!(
                status = response.status().as_u16(),
                "HEAD rejected, probing with GET"
            );
            response = self.send(url, Method::GET, ByteRange::Full).await?;
            if response.status().as_u16() >= 300 {
                return Err(FetchError::Status(response.status().as_u16()));
            }
        }

        let length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        if length == 0 {
            return Err(FetchError::LengthUnknown);
        }

        let supports_range = response
            .headers()
            .get(ACCEPT_RANGES)
            .map(|v| v.to_str().unwrap_or("") == "bytes")
            .unwrap_or(false);

        debug!(length, supports_range, "probed remote resource");
        Ok(ContentInfo {
            length,
            supports_range,
        })
    }
}
