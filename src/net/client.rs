use hyper::client::HttpConnector;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Body, Client, HeaderMap, Method, Request, Response, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::hosts::HostsResolver;
use crate::error::{BofangError, BofangResult};

/// User-Agent sent upstream when the caller supplies none
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Shared outbound HTTP client (HTTP/HTTPS via rustls).
///
/// - One pooled hyper client reused across requests
/// - The hosts resolver is consulted before every fetch; an override IP
///   replaces the authority for plain-http URLs (the Host header keeps the
///   original name), https URLs keep their hostname for SNI/verification
/// - Explicitly constructed and injected, never a global
#[derive(Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Body>,
    hosts: Arc<HostsResolver>,
    request_timeout: Duration,
}

impl HttpClient {
    pub fn new(hosts: Arc<HostsResolver>) -> Self {
        Self::with_timeout(hosts, Duration::from_secs(20))
    }

    pub fn with_timeout(hosts: Arc<HostsResolver>, request_timeout: Duration) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);

        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();

        let inner = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(32)
            .build::<_, Body>(https);

        Self {
            inner,
            hosts,
            request_timeout,
        }
    }

    /// Issue a request, applying host overrides and the request timeout
    pub async fn execute(&self, req: Request<Body>) -> BofangResult<Response<Body>> {
        let req = self.apply_host_override(req).await?;
        let response = tokio::time::timeout(self.request_timeout, self.inner.request(req))
            .await
            .map_err(|_| BofangError::timeout(self.request_timeout, "outbound request"))??;
        Ok(response)
    }

    /// GET a URL with extra headers
    pub async fn get(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> BofangResult<Response<Body>> {
        self.request_with(Method::GET, url, headers).await
    }

    /// HEAD a URL with extra headers
    pub async fn head(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> BofangResult<Response<Body>> {
        self.request_with(Method::HEAD, url, headers).await
    }

    async fn request_with(
        &self,
        method: Method,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> BofangResult<Response<Body>> {
        let uri: Uri = url.parse()?;
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(map) = builder.headers_mut() {
            copy_headers(headers, map);
            if !map.contains_key(hyper::header::USER_AGENT) {
                map.insert(
                    hyper::header::USER_AGENT,
                    HeaderValue::from_static(DEFAULT_USER_AGENT),
                );
            }
        }

        let req = builder.body(Body::empty())?;
        self.execute(req).await
    }

    /// GET a URL and read its body as text, bounded by `cap` bytes
    pub async fn get_string(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        cap: usize,
    ) -> BofangResult<String> {
        let response = self.get(url, headers).await?;
        let bytes = read_body(response, cap).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Rewrite the authority to an override IP for plain-http requests.
    /// The hosts resolver is consulted for every host so the DNS cache
    /// stays warm even when no override exists.
    async fn apply_host_override(&self, req: Request<Body>) -> BofangResult<Request<Body>> {
        let host = match req.uri().host() {
            Some(host) => host.to_string(),
            None => return Ok(req),
        };

        let _ = self.hosts.resolve(&host).await;

        let scheme = req.uri().scheme_str().unwrap_or("http").to_string();
        if scheme != "http" {
            return Ok(req);
        }

        let override_ip = match self.hosts.override_ip(&host).await {
            Some(ip) => ip,
            None => return Ok(req),
        };

        let (mut parts, body) = req.into_parts();
        let port = parts.uri.port_u16().unwrap_or(80);
        let pq = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let new_uri: Uri = format!("{}://{}:{}{}", scheme, override_ip, port, pq).parse()?;
        parts.uri = new_uri;
        parts
            .headers
            .insert(hyper::header::HOST, HeaderValue::from_str(&host).map_err(
                |e| BofangError::internal(format!("host header: {}", e)),
            )?);

        debug!("host override {} -> {}", host, override_ip);
        Ok(Request::from_parts(parts, body))
    }
}

/// Read a response body up to `cap` bytes
pub async fn read_body(response: Response<Body>, cap: usize) -> BofangResult<Vec<u8>> {
    let bytes = hyper::body::to_bytes(response.into_body()).await?;
    let mut bytes = bytes.to_vec();
    bytes.truncate(cap);
    Ok(bytes)
}

/// Copy string headers into a hyper map, skipping invalid names/values
pub fn copy_headers(from: &HashMap<String, String>, into: &mut HeaderMap) {
    for (name, value) in from {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(value),
        ) {
            into.insert(name, value);
        }
    }
}

/// Hop-by-hop headers are scoped to one connection and never forwarded
pub fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Strip hop-by-hop headers per RFC 7230, including any named by Connection
pub fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    let extra: Vec<String> = headers
        .get("connection")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').map(|s| s.trim().to_ascii_lowercase()).collect())
        .unwrap_or_default();

    const HOP_HEADERS: &[&str] = &[
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailers",
        "transfer-encoding",
        "upgrade",
    ];
    for name in HOP_HEADERS {
        headers.remove(*name);
    }
    for name in extra {
        headers.remove(name.as_str());
    }
}
