use anyhow::{Context, Result};
use capillary_adapter::CacheItem;
use rama::http::{
    Body, HeaderMap, Response, StatusCode,
    header::{self, HeaderName, HeaderValue},
};
use tracing::debug;

use crate::upstream::UpstreamResponse;

/// Responds with plain text
pub fn respond_text(status: StatusCode, body: &str) -> Result<Response<Body>> {
    Response::builder()
        .status(status)
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        )
        .body(Body::from(body.to_owned()))
        .map_err(Into::into)
}

/// Responds with JSON content
pub fn respond_json(status: StatusCode, body: &str) -> Result<Response<Body>> {
    Response::builder()
        .status(status)
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        )
        .header(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))
        .body(Body::from(body.to_owned()))
        .map_err(Into::into)
}

/// 200 with the stored headers and body of a cache entry
pub fn serve_cached(item: &CacheItem) -> Result<Response<Body>> {
    let mut builder = Response::builder().status(StatusCode::OK);
    {
        let headers = builder
            .headers_mut()
            .context("getting headers for cached response")?;
        for (name, value) in &item.headers {
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                debug!(header = %name, "skipping unrepresentable cached header");
                continue;
            };
            if is_replayable(&name) {
                headers.insert(name, value);
            }
        }
    }

    builder
        .body(Body::from(item.body.clone()))
        .context("building cached response")
}

/// Passes a non-200 upstream response through unchanged
pub fn forward_upstream(response: UpstreamResponse) -> Result<Response<Body>> {
    let mut builder = Response::builder().status(response.status);
    {
        let headers = builder
            .headers_mut()
            .context("getting headers for forwarded response")?;
        copy_replayable(&response.headers, headers);
    }

    builder
        .body(Body::from(response.body))
        .context("building forwarded response")
}

fn copy_replayable(source: &HeaderMap, target: &mut HeaderMap) {
    for (name, value) in source.iter() {
        if is_replayable(name) {
            target.append(name, value.clone());
        }
    }
}

/// Hop-by-hop headers describe the upstream connection, and the length is
/// recomputed from the body we actually send.
fn is_replayable(name: &HeaderName) -> bool {
    !(name == header::CONNECTION
        || name == header::KEEP_ALIVE
        || name == header::PROXY_AUTHENTICATE
        || name == header::PROXY_AUTHORIZATION
        || name == header::TE
        || name == header::TRAILER
        || name == header::TRANSFER_ENCODING
        || name == header::UPGRADE
        || name == header::CONTENT_LENGTH)
}
