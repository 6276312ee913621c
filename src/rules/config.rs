//! 规则配置结构定义
//!
//! 本模块包含代理规则、匹配方式和条件的结构体定义与验证。

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{BofangError, BofangResult};

/// 规则集合配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RulesConfig {
    /// 规则列表；匹配时按优先级降序评估
    #[serde(default)]
    pub rules: Vec<ProxyRule>,
}

impl RulesConfig {
    /// 验证规则配置
    pub fn validate(&self) -> BofangResult<()> {
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.id.is_empty() {
                return Err(BofangError::config(format!("rule {} has empty id", i)));
            }
            if rule.pattern.is_empty() {
                return Err(BofangError::config(format!(
                    "rule '{}' has empty pattern",
                    rule.id
                )));
            }
            if rule.target.is_empty() {
                return Err(BofangError::config(format!(
                    "rule '{}' has empty target",
                    rule.id
                )));
            }

            if rule.match_kind == MatchKind::Regex {
                Regex::new(&rule.pattern).map_err(|e| {
                    BofangError::config(format!("invalid regex in rule '{}': {}", rule.id, e))
                })?;
            }

            for condition in &rule.conditions {
                if condition.operator == ConditionOperator::Regex {
                    Regex::new(&condition.value).map_err(|e| {
                        BofangError::config(format!(
                            "invalid condition regex in rule '{}': {}",
                            rule.id, e
                        ))
                    })?;
                }
            }
        }
        Ok(())
    }
}

/// 单条代理规则
///
/// 恰好一种匹配方式（match_kind）决定基础测试；所有条件还须全部成立
/// （逻辑与）规则才算命中。优先级数值越大越先评估。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRule {
    /// 规则标识（用于日志与响应头标记）
    pub id: String,
    /// 匹配模式
    pub pattern: String,
    /// 基础匹配方式
    pub match_kind: MatchKind,
    /// 改写目标：绝对URL、host:port 转发地址，或子串替换文本
    pub target: String,
    /// 优先级；数值越大越优先
    #[serde(default)]
    pub priority: i32,
    /// 是否启用
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 附加条件（全部成立才命中）
    #[serde(default)]
    pub conditions: Vec<ProxyCondition>,
    /// 命中后附加到出站请求的头部
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

/// 基础匹配方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// 通配模式：`*`展开为`.*`整体正则；以http开头时为前缀测试；否则子串测试
    UrlPattern,
    /// 主机精确匹配；`*.`开头时为后缀匹配
    Domain,
    /// 仅针对URL路径的通配/前缀/子串测试
    Path,
    /// 非锚定正则搜索
    Regex,
    /// 全串相等
    Exact,
}

/// 规则附加条件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyCondition {
    /// 取值来源
    pub source: ConditionSource,
    /// 来源内的键（header名、query参数名；time/userAgent/referer不使用）
    #[serde(default)]
    pub key: String,
    /// 期望值
    pub value: String,
    /// 比较算子
    pub operator: ConditionOperator,
}

/// 条件取值来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionSource {
    Header,
    QueryParam,
    Time,
    UserAgent,
    Referer,
}

/// 条件比较算子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Regex,
    GreaterThan,
    LessThan,
}
