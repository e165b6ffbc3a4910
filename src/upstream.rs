use std::future::Future;

use anyhow::{Context, Result};
use bytes::Bytes;
use rama::{
    Service,
    http::{
        Body, HeaderMap, Method, Request, StatusCode,
        body::util::BodyExt as _,
        client::EasyHttpWebClient,
        header::{ACCEPT_ENCODING, HeaderValue, USER_AGENT},
    },
};
use tracing::debug;

use crate::error::ProxyError;

const UA: &str = concat!("capillary/", env!("CARGO_PKG_VERSION"));

/// A fully buffered upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The one outbound call the proxy makes: GET an absolute URL.
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<UpstreamResponse>> + Send;
}

/// Rama-based upstream client. No retries: a transport failure is reported
/// once to the caller.
#[derive(Debug, Clone, Default)]
pub struct UpstreamClient;

impl UpstreamClient {
    pub fn new() -> Self {
        Self
    }
}

impl Fetch for UpstreamClient {
    async fn fetch(&self, url: &str) -> Result<UpstreamResponse> {
        let client = EasyHttpWebClient::default();

        let mut builder = Request::builder().method(Method::GET).uri(url);
        {
            let headers = builder.headers_mut().context("getting headers")?;
            headers.insert(USER_AGENT, HeaderValue::from_static(UA));
            // Bodies may be rewritten as text, so ask for them uncompressed.
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        }
        let request = builder
            .body(Body::empty())
            .context("building upstream request")?;

        let response = client
            .serve(request)
            .await
            .map_err(|e| ProxyError::Upstream {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ProxyError::Upstream {
                url: url.to_string(),
                reason: format!("reading body: {e}"),
            })?
            .to_bytes();

        debug!(%url, %status, bytes = body.len(), "upstream responded");

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
