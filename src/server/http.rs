//! Raw HTTP/1.1 request parsing and response framing.
//!
//! The inbound side reads exactly one request per connection off the
//! socket (the original serve loop shape); responses always carry
//! `Connection: close`, and `Content-Length`/`Content-Type` are defaulted
//! when absent.

use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{BofangError, BofangResult};

/// Upper bound on header lines per request
const MAX_HEADERS: usize = 100;

/// One parsed inbound request
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// HTTP method, uppercased
    pub method: String,
    /// Raw request target (origin-form path or absolute-form URL)
    pub target: String,
    /// HTTP version token from the request line
    pub version: String,
    /// Headers with lowercased names
    pub headers: HashMap<String, String>,
    /// Request body (POST only, sized by Content-Length)
    pub body: Vec<u8>,
}

impl ProxyRequest {
    /// Read one request line + headers (+ body for POST) off the socket.
    /// Every malformed shape maps to [`BofangError::MalformedRequest`], on
    /// which the caller drops the connection without a response.
    pub async fn read_from<R: AsyncBufReadExt + Unpin>(
        reader: &mut R,
        max_body_bytes: u64,
    ) -> BofangResult<Self> {
        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| BofangError::malformed(format!("request line: {}", e)))?;
        if read == 0 {
            return Err(BofangError::malformed("premature EOF"));
        }

        let mut parts = line.split_whitespace();
        let method = parts
            .next()
            .ok_or_else(|| BofangError::malformed("missing method"))?
            .to_ascii_uppercase();
        let target = parts
            .next()
            .ok_or_else(|| BofangError::malformed("missing path"))?
            .to_string();
        let version = parts
            .next()
            .ok_or_else(|| BofangError::malformed("missing version"))?
            .to_string();

        let mut headers = HashMap::new();
        loop {
            let mut line = String::new();
            let read = reader
                .read_line(&mut line)
                .await
                .map_err(|e| BofangError::malformed(format!("header line: {}", e)))?;
            if read == 0 {
                return Err(BofangError::malformed("premature EOF in headers"));
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if headers.len() >= MAX_HEADERS {
                return Err(BofangError::malformed("too many headers"));
            }
            match line.split_once(':') {
                Some((name, value)) => {
                    headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
                }
                None => return Err(BofangError::malformed("header without colon")),
            }
        }

        let mut body = Vec::new();
        if method == "POST" {
            let content_length: u64 = headers
                .get("content-length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            if content_length > max_body_bytes {
                return Err(BofangError::malformed("body exceeds limit"));
            }
            if content_length > 0 {
                body.resize(content_length as usize, 0);
                reader
                    .read_exact(&mut body)
                    .await
                    .map_err(|e| BofangError::malformed(format!("body: {}", e)))?;
            }
        }

        Ok(Self {
            method,
            target,
            version,
            headers,
            body,
        })
    }

    /// Header lookup (names are stored lowercased)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|v| v.as_str())
    }

    /// Whether the target is an absolute-form URL
    pub fn is_absolute(&self) -> bool {
        self.target.starts_with("http://") || self.target.starts_with("https://")
    }

    /// Path component of the target
    pub fn path(&self) -> &str {
        let without_query = self.target.split(['?', '#']).next().unwrap_or(&self.target);
        without_query
    }

    /// Decoded query parameters
    pub fn query(&self) -> HashMap<String, String> {
        match self.target.split_once('?') {
            Some((_, query)) => url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
            None => HashMap::new(),
        }
    }

    /// One decoded query parameter
    pub fn query_param(&self, key: &str) -> Option<String> {
        self.query().get(key).cloned()
    }
}

/// One outbound response; headers keep insertion order for the wire
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ProxyResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// 200 with a body and content type
    pub fn ok(body: impl Into<Vec<u8>>, content_type: &str) -> Self {
        let mut response = Self::new(200);
        response.set_header("Content-Type", content_type);
        response.body = body.into();
        response
    }

    /// Plain-text response with a status
    pub fn text(status: u16, message: impl Into<String>) -> Self {
        let mut response = Self::new(status);
        response.set_header("Content-Type", "text/plain; charset=utf-8");
        response.body = message.into().into_bytes();
        response
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::text(400, message)
    }

    pub fn not_found() -> Self {
        Self::text(404, "not found")
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::text(502, message)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Set a header, replacing any existing value case-insensitively
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers
            .retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// Write status line, headers and body. `Connection: close` is always
    /// set; `Content-Length` is computed from the body unless already set,
    /// and `Content-Type` defaults to octet-stream.
    pub async fn write_to<W: AsyncWrite + Unpin>(mut self, writer: &mut W) -> std::io::Result<()> {
        if self.header("content-length").is_none() {
            let length = self.body.len().to_string();
            self.set_header("Content-Length", &length);
        }
        let body = std::mem::take(&mut self.body);
        self.write_head(writer).await?;
        writer.write_all(&body).await?;
        writer.flush().await
    }

    /// Write only the head; the caller streams the body afterwards.
    /// Used for proxied transfers where the body never sits in memory.
    pub async fn write_head<W: AsyncWrite + Unpin>(mut self, writer: &mut W) -> std::io::Result<()> {
        if self.header("content-type").is_none() {
            self.set_header("Content-Type", "application/octet-stream");
        }
        self.set_header("Connection", "close");

        let mut head = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status,
            reason_phrase(self.status)
        );
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        writer.write_all(head.as_bytes()).await?;
        writer.flush().await
    }
}

/// Standard reason phrases for the statuses this server emits
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    async fn parse(raw: &str) -> BofangResult<ProxyRequest> {
        let mut reader = BufReader::new(Cursor::new(raw.as_bytes().to_vec()));
        ProxyRequest::read_from(&mut reader, 1024).await
    }

    #[tokio::test]
    async fn test_parse_get_request() {
        let request = parse(
            "GET /player?url=http%3A%2F%2Fsite%2Fv HTTP/1.1\r\nHost: 127.0.0.1:9978\r\nUser-Agent: player/1\r\n\r\n",
        )
        .await
        .unwrap();

        assert_eq!(request.method, "GET");
        assert_eq!(request.path(), "/player");
        assert_eq!(request.version, "HTTP/1.1");
        assert_eq!(request.header("host").unwrap(), "127.0.0.1:9978");
        assert_eq!(request.header("User-Agent").unwrap(), "player/1");
        assert_eq!(
            request.query_param("url").unwrap(),
            "http://site/v"
        );
        assert!(!request.is_absolute());
    }

    #[tokio::test]
    async fn test_parse_post_body() {
        let request = parse(
            "POST /proxy?url=x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello",
        )
        .await
        .unwrap();
        assert_eq!(request.body, b"hello");
    }

    #[tokio::test]
    async fn test_malformed_request_line() {
        assert!(matches!(
            parse("GARBAGE\r\n\r\n").await,
            Err(BofangError::MalformedRequest { .. })
        ));
        assert!(matches!(
            parse("").await,
            Err(BofangError::MalformedRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_premature_eof_in_headers() {
        assert!(matches!(
            parse("GET / HTTP/1.1\r\nHost: x").await,
            Err(BofangError::MalformedRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_body_over_limit_rejected() {
        let result = parse(
            "POST / HTTP/1.1\r\nContent-Length: 4096\r\n\r\n",
        )
        .await;
        assert!(matches!(result, Err(BofangError::MalformedRequest { .. })));
    }

    #[tokio::test]
    async fn test_response_framing() {
        let mut response = ProxyResponse::ok("hello", "text/plain");
        response.set_header("X-Test", "1");

        let mut buffer = Vec::new();
        response.write_to(&mut buffer).await.unwrap();
        let written = String::from_utf8(buffer).unwrap();

        assert!(written.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(written.contains("Content-Length: 5\r\n"));
        assert!(written.contains("Connection: close\r\n"));
        assert!(written.contains("X-Test: 1\r\n"));
        assert!(written.ends_with("\r\n\r\nhello"));
    }

    #[tokio::test]
    async fn test_response_defaults() {
        let response = ProxyResponse::new(204);
        let mut buffer = Vec::new();
        response.write_to(&mut buffer).await.unwrap();
        let written = String::from_utf8(buffer).unwrap();

        assert!(written.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(written.contains("Content-Length: 0\r\n"));
        assert!(written.contains("Content-Type: application/octet-stream\r\n"));
    }

    #[tokio::test]
    async fn test_existing_content_length_kept() {
        let mut response = ProxyResponse::new(200);
        response.set_header("Content-Length", "999");
        let mut buffer = Vec::new();
        response.write_to(&mut buffer).await.unwrap();
        let written = String::from_utf8(buffer).unwrap();
        assert!(written.contains("Content-Length: 999\r\n"));
    }

    #[test]
    fn test_absolute_target() {
        let request = ProxyRequest {
            method: "GET".to_string(),
            target: "http://other.host/page".to_string(),
            version: "HTTP/1.1".to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
        };
        assert!(request.is_absolute());
    }
}
