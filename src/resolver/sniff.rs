use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;
use url::Url;

use super::media;
use super::{Resolved, ResolveStrategy, SiteContext};
use crate::error::{BofangError, BofangResult};
use crate::net::{client::read_body, HttpClient};

/// Page body scan cap; media URLs live near the top of player pages
const BODY_SCAN_CAP: usize = 512 * 1024;

/// 嗅探策略
///
/// 顺序：URL本身已是媒体地址则直接成功；否则发HEAD探测，最多跟随一次
/// 重定向，Location或Content-Type指向媒体流即成功；仍不行则抓取页面
/// 正文，扫描内联JS变量/JSON字段中的媒体地址。
pub struct SniffStrategy {
    client: HttpClient,
}

impl SniffStrategy {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    async fn probe(&self, url: &str, headers: &HashMap<String, String>) -> BofangResult<Resolved> {
        let response = match self.client.head(url, headers).await {
            Ok(response) => response,
            // Some origins reject HEAD outright; retry as GET
            Err(_) => self.client.get(url, headers).await?,
        };

        let status = response.status();

        if status.is_redirection() {
            if let Some(location) = response
                .headers()
                .get(hyper::header::LOCATION)
                .and_then(|v| v.to_str().ok())
            {
                let location = absolutize(url, location);
                if media::is_media_url(&location) {
                    return Ok(Resolved::with_headers(location, headers.clone()));
                }
                // Follow at most one redirect
                let followed = self.client.get(&location, headers).await?;
                if let Some(content_type) = followed
                    .headers()
                    .get(hyper::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                {
                    if media::is_media_content_type(content_type) {
                        return Ok(Resolved::with_headers(location, headers.clone()));
                    }
                }
                return Err(BofangError::parse_failure(format!(
                    "redirect target {} is not a media stream",
                    location
                )));
            }
        }

        if let Some(content_type) = response
            .headers()
            .get(hyper::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if media::is_media_content_type(content_type) {
                return Ok(Resolved::with_headers(url.to_string(), headers.clone()));
            }
        }

        Err(BofangError::parse_failure("no media signal in response"))
    }
}

#[async_trait]
impl ResolveStrategy for SniffStrategy {
    fn id(&self) -> &'static str {
        "sniff"
    }

    fn can_handle(&self, url: &str, _site: &SiteContext) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }

    async fn resolve(&self, url: &str, site: &SiteContext) -> BofangResult<Resolved> {
        // Already a playable container: succeed with the URL unchanged
        if media::is_media_url(url) {
            debug!("sniff: {} is already a media url", url);
            return Ok(Resolved::with_headers(url.to_string(), site.headers.clone()));
        }

        if let Ok(resolved) = self.probe(url, &site.headers).await {
            return Ok(resolved);
        }

        // Degraded path: scan the page body for inline media references
        let response = self.client.get(url, &site.headers).await?;
        let body = read_body(response, BODY_SCAN_CAP).await?;
        let text = String::from_utf8_lossy(&body);

        match media::find_inline_media_url(&text) {
            Some(found) => {
                let mut headers = site.headers.clone();
                headers.insert("Referer".to_string(), url.to_string());
                Ok(Resolved::with_headers(found, headers))
            }
            None => Err(BofangError::parse_failure(format!(
                "no inline media url in {}",
                url
            ))),
        }
    }
}

/// Resolve a possibly relative Location against the request URL
fn absolutize(base: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        return location.to_string();
    }
    match Url::parse(base).and_then(|base| base.join(location)) {
        Ok(joined) => joined.to_string(),
        Err(_) => location.to_string(),
    }
}
