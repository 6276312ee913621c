//! 规则引擎实现
//!
//! 按优先级降序扫描启用的规则，基础测试命中且全部条件成立的第一条规则
//! 即为结果。单条规则匹配中的任何异常都按"未命中"处理（仅对该条规则
//! fail-closed），不会中断整个扫描。

use chrono::Local;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;
use url::Url;

use super::config::{
    ConditionOperator, ConditionSource, MatchKind, ProxyCondition, ProxyRule, RulesConfig,
};
use crate::error::BofangResult;

/// Request-side values a condition can observe
#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    /// Inbound headers, keys lowercased
    pub headers: HashMap<String, String>,
    /// Inbound query parameters
    pub query: HashMap<String, String>,
    /// Wall clock override as `HH:MM`; `None` reads the local time
    pub clock: Option<String>,
}

impl MatchContext {
    /// Observed value for a condition source; absent values read as empty
    fn value_for(&self, source: ConditionSource, key: &str) -> String {
        match source {
            ConditionSource::Header => self
                .headers
                .get(&key.to_ascii_lowercase())
                .cloned()
                .unwrap_or_default(),
            ConditionSource::QueryParam => self.query.get(key).cloned().unwrap_or_default(),
            ConditionSource::UserAgent => {
                self.headers.get("user-agent").cloned().unwrap_or_default()
            }
            ConditionSource::Referer => self.headers.get("referer").cloned().unwrap_or_default(),
            ConditionSource::Time => self
                .clock
                .clone()
                .unwrap_or_else(|| Local::now().format("%H:%M").to_string()),
        }
    }
}

/// Result of applying a matched rule to a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleApplication {
    /// URL to fetch (rewritten, or the original when forwarding)
    pub url: String,
    /// Headers the rule adds to the outbound request
    pub headers: HashMap<String, String>,
    /// `host:port` to delegate forwarding to, when the target names one
    pub forward_addr: Option<String>,
}

/// 规则引擎主结构
pub struct RuleEngine {
    /// 当前规则快照；整体替换，匹配期间的读取者始终看到完整一致的列表
    rules: RwLock<Arc<Vec<ProxyRule>>>,
}

impl RuleEngine {
    /// 创建新的规则引擎
    pub fn new(config: RulesConfig) -> BofangResult<Self> {
        config.validate()?;
        let engine = Self {
            rules: RwLock::new(Arc::new(Vec::new())),
        };
        engine.replace_rules(config.rules);
        Ok(engine)
    }

    /// 原子替换整个规则列表（copy-on-replace）
    pub fn replace_rules(&self, mut rules: Vec<ProxyRule>) {
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        let snapshot = Arc::new(rules);
        if let Ok(mut guard) = self.rules.write() {
            *guard = snapshot;
        }
    }

    /// 当前快照
    pub fn snapshot(&self) -> Arc<Vec<ProxyRule>> {
        self.rules
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_else(|_| Arc::new(Vec::new()))
    }

    /// 返回第一条完全命中的规则；无命中返回None
    pub fn match_url(&self, url: &str, ctx: &MatchContext) -> Option<ProxyRule> {
        let snapshot = self.snapshot();
        for rule in snapshot.iter() {
            if !rule.enabled {
                continue;
            }
            if !Self::base_match(rule, url) {
                continue;
            }
            if rule
                .conditions
                .iter()
                .all(|condition| Self::condition_holds(condition, ctx))
            {
                debug!("rule '{}' matched {}", rule.id, url);
                return Some(rule.clone());
            }
        }
        None
    }

    /// 将命中的规则应用到URL
    pub fn apply(&self, rule: &ProxyRule, url: &str) -> RuleApplication {
        let mut headers = rule.headers.clone();

        if rule.target.starts_with("http://") || rule.target.starts_with("https://") {
            // 绝对URL目标：改走目标本身，打上来源标记
            headers.insert("X-Proxy-Rule".to_string(), rule.id.clone());
            headers.insert("X-Proxy-Target".to_string(), rule.target.clone());
            return RuleApplication {
                url: rule.target.clone(),
                headers,
                forward_addr: None,
            };
        }

        if rule.target.contains(':') {
            // host:port目标：保留原URL，转发委托给该地址
            return RuleApplication {
                url: url.to_string(),
                headers,
                forward_addr: Some(rule.target.clone()),
            };
        }

        // 其余情况：pattern在URL中的字面子串替换
        RuleApplication {
            url: url.replace(&rule.pattern, &rule.target),
            headers,
            forward_addr: None,
        }
    }

    fn base_match(rule: &ProxyRule, url: &str) -> bool {
        match rule.match_kind {
            MatchKind::UrlPattern => Self::pattern_match(&rule.pattern, url),
            MatchKind::Domain => Self::domain_match(&rule.pattern, url),
            MatchKind::Path => Self::path_match(&rule.pattern, url),
            MatchKind::Regex => match Regex::new(&rule.pattern) {
                Ok(regex) => regex.is_match(url),
                Err(_) => false,
            },
            MatchKind::Exact => url == rule.pattern,
        }
    }

    /// 通配/前缀/子串三态测试
    fn pattern_match(pattern: &str, subject: &str) -> bool {
        if pattern.contains('*') {
            match Regex::new(&format!("^{}$", glob_to_regex(pattern))) {
                Ok(regex) => regex.is_match(subject),
                Err(_) => false,
            }
        } else if pattern.starts_with("http") {
            subject.starts_with(pattern)
        } else {
            subject.contains(pattern)
        }
    }

    fn domain_match(pattern: &str, url: &str) -> bool {
        let host = match Url::parse(url) {
            Ok(parsed) => match parsed.host_str() {
                Some(host) => host.to_string(),
                None => return false,
            },
            Err(_) => return false,
        };
        if let Some(suffix) = pattern.strip_prefix("*.") {
            host == suffix || host.ends_with(&format!(".{}", suffix))
        } else {
            host == pattern
        }
    }

    fn path_match(pattern: &str, url: &str) -> bool {
        let path = match Url::parse(url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => return false,
        };
        if pattern.contains('*') {
            match Regex::new(&format!("^{}$", glob_to_regex(pattern))) {
                Ok(regex) => regex.is_match(&path),
                Err(_) => false,
            }
        } else if pattern.starts_with('/') {
            path.starts_with(pattern)
        } else {
            path.contains(pattern)
        }
    }

    fn condition_holds(condition: &ProxyCondition, ctx: &MatchContext) -> bool {
        let actual = ctx.value_for(condition.source, &condition.key);
        let expected = condition.value.as_str();

        match condition.operator {
            ConditionOperator::Equals => actual == expected,
            ConditionOperator::NotEquals => actual != expected,
            ConditionOperator::Contains => actual.contains(expected),
            ConditionOperator::NotContains => !actual.contains(expected),
            ConditionOperator::StartsWith => actual.starts_with(expected),
            ConditionOperator::EndsWith => actual.ends_with(expected),
            ConditionOperator::Regex => match Regex::new(expected) {
                Ok(regex) => regex.is_match(&actual),
                Err(_) => false,
            },
            ConditionOperator::GreaterThan => compare(&actual, expected) == std::cmp::Ordering::Greater,
            ConditionOperator::LessThan => compare(&actual, expected) == std::cmp::Ordering::Less,
        }
    }
}

/// Numeric comparison when both sides parse as numbers, lexicographic
/// otherwise (which orders zero-padded `HH:MM` times correctly)
fn compare(actual: &str, expected: &str) -> std::cmp::Ordering {
    match (actual.parse::<f64>(), expected.parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
        _ => actual.cmp(expected),
    }
}

/// Expand `*` globs into a regex, escaping everything else
fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() * 2);
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            ch if "\\.+?^$()[]{}|".contains(ch) => {
                regex.push('\\');
                regex.push(ch);
            }
            ch => regex.push(ch),
        }
    }
    regex
}
