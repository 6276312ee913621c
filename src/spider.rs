//! Spider capability boundary.
//!
//! Per-site scraper plugins live outside this core. They are exposed only
//! through this trait: given a flag/id the backend returns a descriptor of
//! a play target. Compiled backends implement [`Spider`]; [`NullSpider`]
//! is the default when none is wired in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::BofangResult;

/// Descriptor of how to play a flagged item.
///
/// `parse == 0` means the URL is directly playable; `parse == 1` means it
/// still needs to go through the resolver chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayDescriptor {
    #[serde(default)]
    pub parse: i32,
    #[serde(default, rename = "playUrl")]
    pub play_url: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub header: HashMap<String, String>,
}

impl PlayDescriptor {
    /// The non-empty candidate URL, preferring `playUrl` over `url`
    pub fn candidate_url(&self) -> Option<&str> {
        if !self.play_url.is_empty() {
            Some(&self.play_url)
        } else if !self.url.is_empty() {
            Some(&self.url)
        } else {
            None
        }
    }

    /// Whether the candidate can be served without further resolution
    pub fn is_direct(&self) -> bool {
        self.parse == 0
    }
}

/// Opaque scraper capability
#[async_trait]
pub trait Spider: Send + Sync {
    /// Descriptor for a named play source (`flag`) of a content item (`id`)
    async fn player_content(
        &self,
        flag: &str,
        id: &str,
        vip_flags: &[String],
    ) -> BofangResult<PlayDescriptor>;
}

/// Backend used when no scraper is configured: every lookup comes back
/// empty and the caller falls through to plain resolution.
#[derive(Debug, Clone, Default)]
pub struct NullSpider;

#[async_trait]
impl Spider for NullSpider {
    async fn player_content(
        &self,
        _flag: &str,
        _id: &str,
        _vip_flags: &[String],
    ) -> BofangResult<PlayDescriptor> {
        Ok(PlayDescriptor::default())
    }
}
