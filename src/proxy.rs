mod response;
mod rewrite;
mod routing;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use capillary_adapter::{Cache, CacheItem, DurableTier, FilesystemCache};
use rama::{
    Service,
    error::BoxError,
    http::{Body, Method, Request, Response, StatusCode, header},
};
use serde_json::json;
use tracing::{error, info, warn};

use crate::{
    config::{Config, registries},
    error::ProxyError,
    upstream::{Fetch, UpstreamClient},
};

pub use rewrite::{is_json_content_type, rewrite_registry_urls};
pub use routing::{Namespace, Route, normalize_path, upstream_url};
pub use types::{CacheStatus, RequestContext};

/// Main proxy service
pub struct RegistryProxy<U = UpstreamClient, D = FilesystemCache> {
    config: Arc<Config>,
    cache: Arc<Cache<D>>,
    upstream: Arc<U>,
    npm_origin: String,
    jsr_origin: String,
}

impl<U, D> Clone for RegistryProxy<U, D> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            cache: self.cache.clone(),
            upstream: self.upstream.clone(),
            npm_origin: self.npm_origin.clone(),
            jsr_origin: self.jsr_origin.clone(),
        }
    }
}

impl<U, D> RegistryProxy<U, D>
where
    U: Fetch,
    D: DurableTier,
{
    pub fn new(config: Arc<Config>, cache: Arc<Cache<D>>, upstream: U) -> Self {
        let npm_origin = registries::origin(&config.registries.npm);
        let jsr_origin = registries::origin(&config.registries.jsr);
        Self {
            config,
            cache,
            upstream: Arc::new(upstream),
            npm_origin,
            jsr_origin,
        }
    }

    fn registry_origin(&self, namespace: Namespace) -> &str {
        match namespace {
            Namespace::Npm => &self.npm_origin,
            Namespace::Jsr => &self.jsr_origin,
        }
    }

    /// Origin clients reach this proxy under, used in rewritten metadata.
    fn proxy_origin(&self, req: &Request<Body>) -> String {
        if let Some(public_url) = &self.config.server.public_url {
            return public_url.as_str().trim_end_matches('/').to_string();
        }

        let host = req
            .uri()
            .authority()
            .map(|authority| authority.as_str().to_string())
            .or_else(|| {
                req.headers()
                    .get(header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| {
                format!("{}:{}", self.config.server.host, self.config.server.port)
            });
        let scheme = req.uri().scheme_str().unwrap_or("http");
        format!("{scheme}://{host}")
    }

    async fn handle(&self, req: Request<Body>, ctx: &mut RequestContext) -> Result<Response<Body>> {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return response::respond_text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
        }

        let path = normalize_path(req.uri().path());
        if path == "/up" {
            let body = json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
                "cached_only": self.config.cache.cached_only,
            });
            return response::respond_json(StatusCode::OK, &body.to_string());
        }

        let (namespace, rest) = match Route::classify(&path) {
            Route::Registry { namespace, rest } => (namespace, rest),
            Route::Blocked | Route::Unmatched => {
                return response::respond_text(StatusCode::NOT_FOUND, "Not Found");
            }
        };

        let registry_origin = self.registry_origin(namespace);
        let upstream_url = upstream_url(registry_origin, rest, req.uri().query());
        ctx.upstream_url = Some(upstream_url.clone());

        let key = self.cache.create_cache_key(&upstream_url);
        if let Some(item) = self.cache.get(&key).await.context("reading cache")? {
            ctx.cache = CacheStatus::Hit;
            return response::serve_cached(&item);
        }

        ctx.cache = CacheStatus::Miss;
        if self.config.cache.cached_only {
            return response::respond_text(StatusCode::NOT_FOUND, "Not Found");
        }

        info!(url = %upstream_url, "requesting upstream");
        let upstream = self.upstream.fetch(&upstream_url).await?;

        if upstream.status != StatusCode::OK {
            warn!(
                status = %upstream.status,
                url = %upstream_url,
                "upstream returned non-success status, not caching"
            );
            ctx.cache = CacheStatus::Pass;
            return response::forward_upstream(upstream);
        }

        let headers = CacheItem::collect_headers(
            upstream
                .headers
                .iter()
                .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
        );
        let is_json = headers
            .get(header::CONTENT_TYPE.as_str())
            .is_some_and(|ct| is_json_content_type(ct));
        let body = if is_json {
            let local = format!("{}/{}/", self.proxy_origin(&req), namespace.mount());
            rewrite_registry_urls(upstream.body, registry_origin, &local)
        } else {
            upstream.body
        };

        self.cache
            .set(&key, CacheItem::new(headers, body))
            .await
            .with_context(|| format!("storing {upstream_url}"))?;

        let item = self
            .cache
            .get(&key)
            .await
            .context("reading back stored entry")?
            .ok_or(ProxyError::CacheNotPopulated { url: upstream_url })?;
        response::serve_cached(&item)
    }
}

impl<U, D> Service<Request<Body>> for RegistryProxy<U, D>
where
    U: Fetch + 'static,
    D: DurableTier + 'static,
{
    type Output = Response<Body>;
    type Error = BoxError;

    async fn serve(&self, req: Request<Body>) -> Result<Self::Output, Self::Error> {
        let mut ctx = RequestContext::from_request(&req);

        let result = self.handle(req, &mut ctx).await;

        match &result {
            Ok(resp) => {
                let response_code = resp.status().as_u16();
                let duration_ms = ctx.start.elapsed().as_millis();
                info!(
                    summary = %ctx.summary(),
                    upstream = ctx.upstream_url.as_deref().unwrap_or("-"),
                    response_code,
                    duration_ms,
                    cache_status = %ctx.cache,
                    "request handled"
                );
            }
            Err(err) => {
                ctx.cache = CacheStatus::Error;
                let duration_ms = ctx.start.elapsed().as_millis();
                error!(
                    summary = %ctx.summary(),
                    upstream = ctx.upstream_url.as_deref().unwrap_or("-"),
                    duration_ms,
                    cache_status = %ctx.cache,
                    error = %err,
                    "request failed"
                );
            }
        }

        result.map_err(|e| e.into())
    }
}
