use hyper::body::HttpBody;
use hyper::header::HeaderValue;
use hyper::{Body, Method, Request, Uri};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::http::{ProxyRequest, ProxyResponse};
use super::{CachedResolution, ServerContext};
use crate::error::{BofangError, BofangResult};
use crate::net::client::{copy_headers, is_hop_by_hop_header, DEFAULT_USER_AGENT};
use crate::resolver::{media, ParseResult, SiteContext};
use crate::rules::MatchContext;

/// One inbound connection: parse a single request, route it, respond,
/// close. The connection never outlives its task and no other task ever
/// touches it.
pub struct ProxyConnection {
    id: u64,
    peer: SocketAddr,
    ctx: Arc<ServerContext>,
}

impl ProxyConnection {
    pub fn new(id: u64, peer: SocketAddr, ctx: Arc<ServerContext>) -> Self {
        Self { id, peer, ctx }
    }

    /// Drive the connection to completion. Parse failures drop the socket
    /// without a response; all other errors produce an error body.
    pub async fn handle(self, stream: TcpStream) {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let read_timeout = Duration::from_secs(self.ctx.config.read_timeout);
        let request = match tokio::time::timeout(
            read_timeout,
            ProxyRequest::read_from(&mut reader, self.ctx.config.max_body_bytes),
        )
        .await
        {
            Ok(Ok(request)) => request,
            Ok(Err(e)) => {
                debug!("connection {} dropped: {}", self.id, e);
                return;
            }
            Err(_) => {
                debug!("connection {} dropped: request read timed out", self.id);
                return;
            }
        };

        debug!(
            "connection {}: {} {} from {}",
            self.id, request.method, request.target, self.peer
        );

        if let Err(e) = self.route(&request, &mut write_half).await {
            if !e.is_silent() {
                warn!("connection {}: {}", self.id, e);
                let status = match &e {
                    BofangError::Network { .. } | BofangError::Timeout { .. } => 502,
                    _ => 500,
                };
                let _ = ProxyResponse::text(status, e.to_string())
                    .write_to(&mut write_half)
                    .await;
            }
        }

        let _ = write_half.shutdown().await;
    }

    async fn route<W: AsyncWrite + Unpin>(
        &self,
        request: &ProxyRequest,
        writer: &mut W,
    ) -> BofangResult<()> {
        let path = request.path().to_string();

        if path.starts_with("/proxy") {
            return self.handle_proxy(request, writer).await;
        }
        if path.starts_with("/player") {
            return self.handle_player(request, writer).await;
        }
        if path.starts_with("/stats") {
            return self.handle_stats(request, writer).await;
        }

        if request.is_absolute() {
            return ProxyResponse::bad_request("absolute request targets are not served")
                .write_to(writer)
                .await
                .map_err(Into::into);
        }

        self.serve_static(&path, writer).await
    }

    /// `/proxy?url=`: raw pass-through fetch with the caller's headers
    async fn handle_proxy<W: AsyncWrite + Unpin>(
        &self,
        request: &ProxyRequest,
        writer: &mut W,
    ) -> BofangResult<()> {
        let url = match request.query_param("url") {
            Some(url) if !url.is_empty() => url,
            _ => {
                return ProxyResponse::bad_request("missing url parameter")
                    .write_to(writer)
                    .await
                    .map_err(Into::into)
            }
        };

        let method = match request.method.as_str() {
            "POST" => Method::POST,
            _ => Method::GET,
        };

        let uri: Uri = url.parse()?;
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in &request.headers {
                if is_hop_by_hop_header(name) || name == "host" {
                    continue;
                }
                if let (Ok(name), Ok(value)) = (
                    name.parse::<hyper::header::HeaderName>(),
                    HeaderValue::from_str(value),
                ) {
                    headers.insert(name, value);
                }
            }
            if !headers.contains_key(hyper::header::USER_AGENT) {
                headers.insert(
                    hyper::header::USER_AGENT,
                    HeaderValue::from_static(DEFAULT_USER_AGENT),
                );
            }
        }
        let body = if request.body.is_empty() {
            Body::empty()
        } else {
            Body::from(request.body.clone())
        };
        let upstream = self.ctx.client.execute(builder.body(body)?).await?;

        self.stream_upstream(upstream, writer).await
    }

    /// `/player?url=`: rule rewrite, cache, resolve, then stream
    async fn handle_player<W: AsyncWrite + Unpin>(
        &self,
        request: &ProxyRequest,
        writer: &mut W,
    ) -> BofangResult<()> {
        let mut url = match request.query_param("url") {
            Some(url) if !url.is_empty() => url,
            _ => {
                return ProxyResponse::bad_request("missing url parameter")
                    .write_to(writer)
                    .await
                    .map_err(Into::into)
            }
        };

        let query = request.query();
        let use_cache = query.get("cache").map(|v| v != "0").unwrap_or(true);
        let forward_range = query.get("range").map(|v| v == "1").unwrap_or(false);
        let ua_override = query.get("ua").cloned();

        let mut site_headers: HashMap<String, String> = HashMap::new();
        if let Some(ua) = &ua_override {
            site_headers.insert("User-Agent".to_string(), ua.clone());
        }

        // A flagged item goes through the Spider capability first
        if let (Some(flag), Some(id)) = (query.get("flag"), query.get("id")) {
            match self.ctx.spider.player_content(flag, id, &[]).await {
                Ok(descriptor) => {
                    if let Some(candidate) = descriptor.candidate_url() {
                        site_headers.extend(descriptor.header.clone());
                        if descriptor.is_direct() {
                            debug!("spider served {} directly", candidate);
                            let fetch_headers =
                                self.fetch_headers(&site_headers, request, forward_range);
                            let upstream =
                                self.ctx.client.get(candidate, &fetch_headers).await?;
                            return self.stream_upstream(upstream, writer).await;
                        }
                        url = candidate.to_string();
                    }
                }
                Err(e) => debug!("spider lookup failed: {}", e),
            }
        }

        // Rule rewrite before resolution
        let match_ctx = MatchContext {
            headers: request.headers.clone(),
            query: query.clone(),
            clock: None,
        };
        let mut forward_addr = None;
        if let Some(rule) = self.ctx.rules.match_url(&url, &match_ctx) {
            let applied = self.ctx.rules.apply(&rule, &url);
            site_headers.extend(applied.headers);
            forward_addr = applied.forward_addr;
            url = applied.url;
        }

        if let Some(addr) = forward_addr {
            let fetch_headers = self.fetch_headers(&site_headers, request, forward_range);
            let upstream = self.fetch_via(&url, &addr, &fetch_headers).await?;
            return self.stream_upstream(upstream, writer).await;
        }

        let cache_key = format!("player:{}|{}", url, ua_override.as_deref().unwrap_or(""));
        if use_cache {
            if let Some(cached) = self.ctx.content_cache.get(&cache_key).await {
                debug!("cache hit for {}", url);
                let mut headers = cached.headers.clone();
                headers.extend(site_headers.clone());
                let fetch_headers = self.fetch_headers(&headers, request, forward_range);
                match self.ctx.client.get(&cached.play_url, &fetch_headers).await {
                    Ok(upstream) if !upstream.status().is_server_error() => {
                        return self.stream_upstream(upstream, writer).await;
                    }
                    _ => {
                        // A dead cached stream falls back to a fresh resolve
                        self.ctx.content_cache.remove(&cache_key).await;
                    }
                }
            }
        }

        let site = SiteContext {
            key: String::new(),
            headers: site_headers,
        };
        match self.ctx.chain.resolve(&url, &site, None).await {
            ParseResult::Success {
                play_url, headers, ..
            } => {
                let record = super::PlayRecord {
                    url: url.clone(),
                    play_url: play_url.clone(),
                    played_at: chrono::Utc::now(),
                };
                if let Err(e) = self.ctx.play_history.put(&url, record, None, None).await {
                    warn!("recording play history failed: {}", e);
                }
                if use_cache {
                    let cached = CachedResolution {
                        play_url: play_url.clone(),
                        headers: headers.clone(),
                    };
                    if let Err(e) = self
                        .ctx
                        .content_cache
                        .put(&cache_key, cached, None, None)
                        .await
                    {
                        warn!("caching resolution failed: {}", e);
                    }
                }
                let fetch_headers = self.fetch_headers(&headers, request, forward_range);
                let upstream = self.ctx.client.get(&play_url, &fetch_headers).await?;
                self.stream_upstream(upstream, writer).await
            }
            ParseResult::Failure { error, elapsed_ms } => {
                debug!("resolution failed after {}ms: {}", elapsed_ms, error);
                ProxyResponse::bad_gateway(error)
                    .write_to(writer)
                    .await
                    .map_err(Into::into)
            }
        }
    }

    /// `/stats`: connection, cache and bandwidth counters as JSON
    async fn handle_stats<W: AsyncWrite + Unpin>(
        &self,
        _request: &ProxyRequest,
        writer: &mut W,
    ) -> BofangResult<()> {
        let stats = serde_json::json!({
            "server": self.ctx.counters.snapshot(),
            "content_cache": self.ctx.content_cache.stats(),
            "play_history": self.ctx.play_history.stats(),
            "bandwidth_window_bytes": self.ctx.bandwidth.window_bytes(),
        });
        ProxyResponse::ok(stats.to_string(), "application/json")
            .write_to(writer)
            .await
            .map_err(Into::into)
    }

    /// Relative paths resolve inside the configured resource directory
    async fn serve_static<W: AsyncWrite + Unpin>(
        &self,
        path: &str,
        writer: &mut W,
    ) -> BofangResult<()> {
        let relative = path.trim_start_matches('/');
        let relative = if relative.is_empty() {
            "index.html"
        } else {
            relative
        };

        // No path traversal out of the resource root
        let candidate = Path::new(relative);
        if candidate
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return ProxyResponse::bad_request("invalid resource path")
                .write_to(writer)
                .await
                .map_err(Into::into);
        }

        let full: PathBuf = Path::new(&self.ctx.config.resources_dir).join(candidate);
        match tokio::fs::read(&full).await {
            Ok(bytes) => ProxyResponse::ok(bytes, media::mime_for_path(relative))
                .write_to(writer)
                .await
                .map_err(Into::into),
            Err(_) => ProxyResponse::not_found()
                .write_to(writer)
                .await
                .map_err(Into::into),
        }
    }

    /// Copy an upstream response to the client, head first, then the body
    /// chunk by chunk under the bandwidth budget.
    async fn stream_upstream<W: AsyncWrite + Unpin>(
        &self,
        upstream: hyper::Response<Body>,
        writer: &mut W,
    ) -> BofangResult<()> {
        let (parts, mut body) = upstream.into_parts();

        let mut response = ProxyResponse::new(parts.status.as_u16());
        for (name, value) in parts.headers.iter() {
            if is_hop_by_hop_header(name.as_str()) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                response.headers.push((name.to_string(), value.to_string()));
            }
        }
        response.write_head(writer).await?;

        while let Some(chunk) = body.data().await {
            let chunk = chunk?;
            self.ctx.bandwidth.admit(self.id, chunk.len() as u64).await;
            writer.write_all(&chunk).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    /// Fetch a URL through a delegated forwarding address: the request is
    /// dialed at `addr`, the Host header keeps the original authority.
    async fn fetch_via(
        &self,
        url: &str,
        addr: &str,
        headers: &HashMap<String, String>,
    ) -> BofangResult<hyper::Response<Body>> {
        let original: Uri = url.parse()?;
        let host = original
            .host()
            .ok_or_else(|| BofangError::parse_failure("url has no host"))?
            .to_string();
        let pq = original
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let scheme = original.scheme_str().unwrap_or("http");
        let via: Uri = format!("{}://{}{}", scheme, addr, pq).parse()?;

        let mut builder = Request::builder().method(Method::GET).uri(via);
        if let Some(map) = builder.headers_mut() {
            copy_headers(headers, map);
            map.insert(
                hyper::header::HOST,
                HeaderValue::from_str(&host)
                    .map_err(|e| BofangError::internal(format!("host header: {}", e)))?,
            );
        }
        self.ctx.client.execute(builder.body(Body::empty())?).await
    }

    /// Headers for the final media fetch: resolved/site headers plus the
    /// caller's Range when range forwarding is on.
    fn fetch_headers(
        &self,
        base: &HashMap<String, String>,
        request: &ProxyRequest,
        forward_range: bool,
    ) -> HashMap<String, String> {
        let mut headers = base.clone();
        if forward_range {
            if let Some(range) = request.header("range") {
                headers.insert("Range".to_string(), range.to_string());
            }
        }
        headers
    }
}
