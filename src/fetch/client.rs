use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::{redirect, Client};
use thiserror::Error;

use crate::domain::Target;

/// Hop ceiling for Location chains. Keeps a misconfigured target that
/// redirects to itself from looping forever.
const MAX_REDIRECTS: usize = 16;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Unexpected status code: {0}")]
    Status(u16),

    #[error("Invalid redirect target: {0}")]
    BadRedirect(String),

    #[error("Gave up after {MAX_REDIRECTS} redirects")]
    TooManyRedirects,
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Headers received for a successful (2xx) response.
pub enum FetchResponse {
    /// Live body stream, handed to the caller for chunk-by-chunk draining.
    Stream {
        nominal: Option<u64>,
        stream: BoxStream<'static, Result<Bytes>>,
    },
    /// Connect-only mode: the connection was dropped without reading any
    /// body bytes. The nominal length was already visible in the headers.
    ConnectOnly { nominal: Option<u64> },
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchResponse::Stream { nominal, .. } => f
                .debug_struct("Stream")
                .field("nominal", nominal)
                .finish_non_exhaustive(),
            FetchResponse::ConnectOnly { nominal } => f
                .debug_struct("ConnectOnly")
                .field("nominal", nominal)
                .finish(),
        }
    }
}

/// One GET request/response cycle, with manual redirect resolution.
#[derive(Clone)]
pub struct FetchClient {
    client: Client,
}

impl FetchClient {
    /// Redirects are resolved here rather than by reqwest, so the
    /// built-in policy is disabled. The timeout covers the full request,
    /// connection setup included.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Perform one GET against the target, following up to `MAX_REDIRECTS`
    /// Location hops, and resolve to headers plus (unless connect-only)
    /// the live body stream.
    pub async fn fetch(&self, target: &Target) -> Result<FetchResponse> {
        let mut url = target.url.clone();

        for _ in 0..=MAX_REDIRECTS {
            let mut request = self.client.get(url.clone());
            for (key, value) in &target.headers {
                request = request.header(key.as_str(), value.as_str());
            }

            let response = request.send().await?;
            let status = response.status();

            if status.is_redirection() {
                if let Some(location) = response.headers().get(reqwest::header::LOCATION) {
                    let location = location
                        .to_str()
                        .map_err(|e| FetchError::BadRedirect(e.to_string()))?;
                    // join() accepts both relative paths and absolute URLs;
                    // the response body is discarded with the drop.
                    url = url
                        .join(location)
                        .map_err(|e| FetchError::BadRedirect(e.to_string()))?;
                    continue;
                }
                // 3xx without Location is just an unexpected status
            }

            if !status.is_success() {
                return Err(FetchError::Status(status.as_u16()));
            }

            let nominal = response.content_length();

            if target.connect_only {
                // Dropping the response aborts the transfer before any
                // body bytes are read.
                return Ok(FetchResponse::ConnectOnly { nominal });
            }

            let stream = response.bytes_stream().map_err(FetchError::from).boxed();
            return Ok(FetchResponse::Stream { nominal, stream });
        }

        Err(FetchError::TooManyRedirects)
    }
}
