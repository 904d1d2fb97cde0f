use std::{future::Future, sync::Arc, time::Duration};

use bytes::Bytes;
use reqwest::header::{HeaderMap, RANGE};
use tokio::time::Instant;
use url::Url;

use crate::{util::http::HttpClient, util::range::ByteRange, IoriError, IoriResult};

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub body: Bytes,
    pub status: u16,
    /// Location after redirects.
    pub effective_url: Url,
    pub headers: HeaderMap,
    pub elapsed: Duration,
}

impl FetchResponse {
    /// Measured throughput in bits per second.
    pub fn throughput(&self) -> Option<u64> {
        let seconds = self.elapsed.as_secs_f64();
        (seconds > 0. && !self.body.is_empty())
            .then(|| (self.body.len() as f64 * 8. / seconds) as u64)
    }
}

/// Retrieves manifests, segment indexes and fragments.
///
/// Implementations return [`IoriError::FragmentDownload`] for unsuccessful HTTP statuses and
/// [`IoriError::NetworkTransient`] for timeouts, so callers can decide on rampdown.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(
        &self,
        url: &Url,
        range: Option<ByteRange>,
    ) -> impl Future<Output = IoriResult<FetchResponse>> + Send;
}

impl<F> Fetcher for Arc<F>
where
    F: Fetcher,
{
    fn fetch(
        &self,
        url: &Url,
        range: Option<ByteRange>,
    ) -> impl Future<Output = IoriResult<FetchResponse>> + Send {
        self.as_ref().fetch(url, range)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: HttpClient,
}

impl HttpFetcher {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, range: Option<ByteRange>) -> IoriResult<FetchResponse> {
        let mut request = self.client.get(url.clone());
        if let Some(range) = range {
            request = request.header(RANGE, range.to_http_range());
        }

        let started = Instant::now();
        let response = request.send().await.map_err(transient)?;
        let status = response.status();
        if !status.is_success() {
            if let Ok(body) = response.text().await {
                tracing::warn!(%url, status = status.as_u16(), "Error body: {body}");
            }
            return Err(IoriError::FragmentDownload {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let effective_url = response.url().clone();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(transient)?;
        Ok(FetchResponse {
            body,
            status: status.as_u16(),
            effective_url,
            headers,
            elapsed: started.elapsed(),
        })
    }
}

fn transient(error: reqwest::Error) -> IoriError {
    if error.is_timeout() || error.is_connect() {
        IoriError::NetworkTransient(error.to_string())
    } else {
        IoriError::RequestError(error)
    }
}
