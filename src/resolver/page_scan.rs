use async_trait::async_trait;
use tracing::debug;

use super::media;
use super::{Resolved, ResolveStrategy, SiteContext};
use crate::error::{BofangError, BofangResult};
use crate::net::{client::read_body, HttpClient};

const BODY_CAP: usize = 1024 * 1024;

/// 页面扫描策略
///
/// 抓取HTML，按固定顺序的文本模式找视频地址：JS变量赋值、
/// url:/src:/file:对象字段、最后是任何带媒体扩展名的带引号绝对URL。
/// 本策略从不执行脚本，是嗅探和JSON都失败后的降级兜底。
pub struct PageScanStrategy {
    client: HttpClient,
}

impl PageScanStrategy {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResolveStrategy for PageScanStrategy {
    fn id(&self) -> &'static str {
        "page_scan"
    }

    fn can_handle(&self, url: &str, _site: &SiteContext) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }

    async fn resolve(&self, url: &str, site: &SiteContext) -> BofangResult<Resolved> {
        let response = self.client.get(url, &site.headers).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BofangError::parse_failure(format!(
                "page fetch returned {}",
                status
            )));
        }

        let body = read_body(response, BODY_CAP).await?;
        let text = String::from_utf8_lossy(&body);

        match media::find_page_media_url(&text) {
            Some(found) => {
                debug!("page scan found {} in {}", found, url);
                let mut headers = site.headers.clone();
                headers.insert("Referer".to_string(), url.to_string());
                Ok(Resolved::with_headers(found, headers))
            }
            None => Err(BofangError::parse_failure(format!(
                "no media url pattern in {}",
                url
            ))),
        }
    }
}
