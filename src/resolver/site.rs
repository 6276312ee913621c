use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use url::Url;

use super::media;
use super::{Resolved, ResolveStrategy, SiteContext};
use crate::error::{BofangError, BofangResult};
use crate::net::{client::read_body, HttpClient};

const BODY_CAP: usize = 1024 * 1024;

/// `"url":"https:\/\/..."` JSON blobs embedded in player pages
static EMBEDDED_JSON_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?:url|playUrl)"\s*:\s*"((?:https?:)?(?:\\/|/)(?:\\/|/)[^"]+)""#).unwrap()
});

/// 站点定制策略
///
/// 按主机名分发到少量已知站点的定制处理；没有定制处理的域名统一走
/// 通用iframe提取。
pub struct SiteStrategy {
    client: HttpClient,
}

impl SiteStrategy {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    fn handler_for(host: &str) -> SiteHandler {
        if host.ends_with("bilibili.com") || host.ends_with("iqiyi.com") {
            SiteHandler::EmbeddedJson
        } else if host.ends_with("qq.com") || host.ends_with("youku.com") {
            SiteHandler::InlineVariable
        } else {
            SiteHandler::GenericIframe
        }
    }

    async fn fetch_page(&self, url: &str, site: &SiteContext) -> BofangResult<String> {
        let response = self.client.get(url, &site.headers).await?;
        let body = read_body(response, BODY_CAP).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Player pages that ship their state as embedded JSON
    async fn resolve_embedded_json(
        &self,
        url: &str,
        site: &SiteContext,
    ) -> BofangResult<Resolved> {
        let page = self.fetch_page(url, site).await?;
        let capture = EMBEDDED_JSON_URL
            .captures(&page)
            .ok_or_else(|| BofangError::parse_failure("no embedded json url"))?;
        let found = capture[1].replace("\\/", "/");
        if !media::is_media_url(&found) {
            return Err(BofangError::parse_failure("embedded url is not media"));
        }
        let mut headers = site.headers.clone();
        headers.insert("Referer".to_string(), url.to_string());
        Ok(Resolved::with_headers(found, headers))
    }

    /// Player pages that assign the stream to a JS variable
    async fn resolve_inline_variable(
        &self,
        url: &str,
        site: &SiteContext,
    ) -> BofangResult<Resolved> {
        let page = self.fetch_page(url, site).await?;
        let found = media::find_inline_media_url(&page)
            .ok_or_else(|| BofangError::parse_failure("no inline variable url"))?;
        let mut headers = site.headers.clone();
        headers.insert("Referer".to_string(), url.to_string());
        Ok(Resolved::with_headers(found, headers))
    }

    /// Fallthrough: pull the first iframe and scan its document once
    async fn resolve_generic_iframe(
        &self,
        url: &str,
        site: &SiteContext,
    ) -> BofangResult<Resolved> {
        let page = self.fetch_page(url, site).await?;
        let iframe = media::find_iframe_src(&page)
            .ok_or_else(|| BofangError::parse_failure("no iframe on page"))?;
        let iframe = absolutize(url, &iframe);

        if media::is_media_url(&iframe) {
            let mut headers = site.headers.clone();
            headers.insert("Referer".to_string(), url.to_string());
            return Ok(Resolved::with_headers(iframe, headers));
        }

        debug!("scanning iframe {} from {}", iframe, url);
        let inner = self.fetch_page(&iframe, site).await?;
        match media::find_page_media_url(&inner) {
            Some(found) => {
                let mut headers = site.headers.clone();
                headers.insert("Referer".to_string(), iframe);
                Ok(Resolved::with_headers(found, headers))
            }
            None => Err(BofangError::parse_failure("iframe holds no media url")),
        }
    }
}

enum SiteHandler {
    EmbeddedJson,
    InlineVariable,
    GenericIframe,
}

#[async_trait]
impl ResolveStrategy for SiteStrategy {
    fn id(&self) -> &'static str {
        "site"
    }

    fn can_handle(&self, url: &str, _site: &SiteContext) -> bool {
        Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(|h| !h.is_empty()))
            .unwrap_or(false)
    }

    async fn resolve(&self, url: &str, site: &SiteContext) -> BofangResult<Resolved> {
        let host = Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_string))
            .ok_or_else(|| BofangError::parse_failure("url has no host"))?;

        match Self::handler_for(&host) {
            SiteHandler::EmbeddedJson => self.resolve_embedded_json(url, site).await,
            SiteHandler::InlineVariable => self.resolve_inline_variable(url, site).await,
            SiteHandler::GenericIframe => self.resolve_generic_iframe(url, site).await,
        }
    }
}

fn absolutize(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    match Url::parse(base).and_then(|base| base.join(href)) {
        Ok(joined) => joined.to_string(),
        Err(_) => href.to_string(),
    }
}
