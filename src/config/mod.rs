//! # 配置管理模块
//!
//! 本模块提供bofang媒体代理的完整配置管理功能，包括：
//!
//! - TOML配置文件解析和验证
//! - 环境变量替换和扩展
//! - 规则配置热重载支持
//! - 类型安全的配置结构定义
//!
//! ## 配置结构
//!
//! 主配置包含以下子模块：
//! - `server`: 服务器基础配置（端口、连接上限、静态资源目录）
//! - `logging`: 日志级别配置
//! - `cache`: 缓存引擎配置（各专用实例由同一引擎按档位派生）
//! - `resolver`: 解析链配置（超时、解析端点、站点处理器）
//! - `hosts`: 域名覆盖表与DNS缓存配置
//! - `bandwidth`: 带宽预算配置
//! - `access`: 访问白名单配置
//! - `rules`: 代理规则配置（可选）

pub mod cache; // 缓存配置模块
pub mod logging; // 日志配置模块
pub mod manager; // 配置管理器和热重载模块
pub mod server; // 服务器配置模块

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use tracing::info;

// Re-export all public types
pub use cache::{CacheConfig, CacheProfile, CacheTier};
pub use logging::LoggingConfig;
pub use manager::ConfigManager;
pub use server::ServerConfig;

// Re-export external dependencies that are part of the config API
pub use crate::net::access::AccessConfig;
pub use crate::net::bandwidth::BandwidthConfig;
pub use crate::net::hosts::HostsConfig;
pub use crate::resolver::ResolverConfig;
pub use crate::rules::RulesConfig;

/// bofang主配置结构
///
/// 包含所有子系统的配置选项，支持TOML格式序列化和反序列化。
/// 每个小节都有默认值，空配置文件也能启动。
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// 服务器基础配置（监听端口、连接上限等）
    #[serde(default)]
    pub server: ServerConfig,
    /// 日志级别配置
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 缓存引擎配置
    #[serde(default)]
    pub cache: CacheConfig,
    /// 解析链配置
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// 域名覆盖与DNS缓存配置
    #[serde(default)]
    pub hosts: HostsConfig,
    /// 带宽预算配置
    #[serde(default)]
    pub bandwidth: BandwidthConfig,
    /// 访问白名单配置
    #[serde(default)]
    pub access: AccessConfig,
    /// 代理规则配置（可选）
    pub rules: Option<RulesConfig>,
}

impl Config {
    /// Load configuration from file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_file_with_env(path).await
    }

    /// Load configuration from file with environment variable expansion
    pub async fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;

        // Expand environment variables in the content
        let expanded_content = expand_env_vars(&content);

        let mut config: Config = toml::from_str(&expanded_content)?;

        config.apply_defaults();
        config.validate()?;

        info!("Configuration loaded from {:?}", path.as_ref());
        Ok(config)
    }

    /// Parse configuration from a TOML string (used by tests and hot reload)
    pub fn from_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(&expand_env_vars(content))?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Apply default values where needed
    fn apply_defaults(&mut self) {
        // Disabled cache keeps no disk tier
        if !self.cache.enabled {
            self.cache.tier = CacheTier::MemoryOnly;
        }

        // An unlimited bandwidth budget disables the limiter entirely
        if self.bandwidth.max_bytes_per_window == 0 {
            self.bandwidth.enabled = false;
        }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.logging.validate()?;
        self.cache.validate()?;
        self.resolver.validate()?;
        self.hosts.validate()?;
        self.bandwidth.validate()?;

        if let Some(rules) = &self.rules {
            rules.validate()?;
        }

        Ok(())
    }
}

/// Expand `${VAR}` and `${VAR:-default}` references in configuration content
fn expand_env_vars(content: &str) -> String {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let expr = &after[..end];
                let (name, default) = match expr.split_once(":-") {
                    Some((n, d)) => (n, Some(d)),
                    None => (expr, None),
                };
                match env::var(name) {
                    Ok(value) => result.push_str(&value),
                    Err(_) => {
                        if let Some(default) = default {
                            result.push_str(default);
                        }
                        // Unset without default expands to empty
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    result.push_str(rest);
    result
}
