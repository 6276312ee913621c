use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use super::{Resolved, ResolveStrategy, SiteContext};
use crate::error::{BofangError, BofangResult};
use crate::net::HttpClient;

/// Response body cap; parser endpoints answer with small JSON documents
const BODY_CAP: usize = 1024 * 1024;

/// Candidate fields probed in order; the first absolute URL wins
const URL_FIELDS: &[&str] = &[
    "url", "play_url", "data.url", "video", "src", "file", "link", "stream",
];

/// Header keys a parser response may legitimately dictate
const HEADER_FIELDS: &[(&str, &str)] = &[
    ("user-agent", "User-Agent"),
    ("ua", "User-Agent"),
    ("referer", "Referer"),
    ("cookie", "Cookie"),
];

/// 结构化JSON解析策略
///
/// 请求配置的解析端点（目标URL作为查询参数URL编码附加），或在没有
/// 端点时直接请求目标；把响应当JSON解析，按固定字段顺序探测播放地址。
pub struct JsonApiStrategy {
    client: HttpClient,
    endpoints: Vec<String>,
}

impl JsonApiStrategy {
    pub fn new(client: HttpClient, endpoints: Vec<String>) -> Self {
        Self { client, endpoints }
    }

    async fn try_candidate(
        &self,
        request_url: &str,
        site: &SiteContext,
    ) -> BofangResult<Resolved> {
        let body = self
            .client
            .get_string(request_url, &site.headers, BODY_CAP)
            .await?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| BofangError::parse_failure(format!("not a JSON response: {}", e)))?;

        let play_url = probe_url_fields(&value)
            .ok_or_else(|| BofangError::parse_failure("no url field in JSON response"))?;

        let mut headers = site.headers.clone();
        headers.extend(extract_headers(&value));
        Ok(Resolved::with_headers(play_url, headers))
    }
}

#[async_trait]
impl ResolveStrategy for JsonApiStrategy {
    fn id(&self) -> &'static str {
        "json"
    }

    fn can_handle(&self, url: &str, _site: &SiteContext) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }

    async fn resolve(&self, url: &str, site: &SiteContext) -> BofangResult<Resolved> {
        let candidates: Vec<String> = if self.endpoints.is_empty() {
            vec![url.to_string()]
        } else {
            self.endpoints
                .iter()
                .map(|endpoint| format!("{}{}", endpoint, urlencoding::encode(url)))
                .collect()
        };

        let mut last_error = BofangError::parse_failure("no parser endpoint configured");
        for candidate in &candidates {
            match self.try_candidate(candidate, site).await {
                Ok(resolved) => return Ok(resolved),
                Err(e) => {
                    debug!("json parse via {} failed: {}", candidate, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

/// Probe the fixed, ordered field list; dotted names descend into objects
fn probe_url_fields(value: &Value) -> Option<String> {
    for field in URL_FIELDS {
        if let Some(found) = lookup(value, field).and_then(|v| v.as_str()) {
            if found.starts_with("http://") || found.starts_with("https://") {
                return Some(found.to_string());
            }
        }
    }
    None
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cursor = value;
    for segment in path.split('.') {
        cursor = cursor.get(segment)?;
    }
    Some(cursor)
}

/// Pull UA/Referer/Cookie hints out of a parser response
fn extract_headers(value: &Value) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    if let Some(object) = value.as_object() {
        for (key, field) in object {
            let lowered = key.to_ascii_lowercase();
            for (name, canonical) in HEADER_FIELDS {
                if lowered == *name {
                    if let Some(text) = field.as_str() {
                        headers.insert(canonical.to_string(), text.to_string());
                    }
                }
            }
        }
        // A nested "header" object wins over top-level hints
        if let Some(nested) = object.get("header").and_then(|h| h.as_object()) {
            for (key, field) in nested {
                if let Some(text) = field.as_str() {
                    headers.insert(key.clone(), text.to_string());
                }
            }
        }
    }
    headers
}
