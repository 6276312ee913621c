//! 代理规则模块
//!
//! 在URL进入解析链之前，规则引擎按优先级对其进行改写或转发重定向。
//! 规则列表作为整体快照替换（copy-on-replace），匹配过程中绝不原地修改。

pub mod config;
pub mod engine;

pub use config::{
    ConditionOperator, ConditionSource, MatchKind, ProxyCondition, ProxyRule, RulesConfig,
};
pub use engine::{MatchContext, RuleApplication, RuleEngine};
