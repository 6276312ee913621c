//! Edge-case tests for rule matching and application.

use std::collections::HashMap;

use bofang::rules::{
    ConditionOperator, ConditionSource, MatchContext, MatchKind, ProxyCondition, ProxyRule,
    RuleEngine, RulesConfig,
};

fn rule(id: &str, pattern: &str, kind: MatchKind, target: &str, priority: i32) -> ProxyRule {
    ProxyRule {
        id: id.to_string(),
        pattern: pattern.to_string(),
        match_kind: kind,
        target: target.to_string(),
        priority,
        enabled: true,
        conditions: vec![],
        headers: HashMap::new(),
    }
}

fn engine(rules: Vec<ProxyRule>) -> RuleEngine {
    RuleEngine::new(RulesConfig { rules }).unwrap()
}

#[test]
fn test_priority_twenty_beats_ten() {
    let engine = engine(vec![
        rule("p10", "video.com", MatchKind::Domain, "t10", 10),
        rule("p20", "video.com", MatchKind::Domain, "t20", 20),
    ]);

    // Registration order must not matter, only priority
    for _ in 0..3 {
        let matched = engine
            .match_url("http://video.com/ep1", &MatchContext::default())
            .unwrap();
        assert_eq!(matched.id, "p20");
    }
}

#[test]
fn test_first_full_match_stops_the_scan() {
    let mut guarded = rule("guarded", "video.com", MatchKind::Domain, "a", 30);
    guarded.conditions = vec![ProxyCondition {
        source: ConditionSource::QueryParam,
        key: "vip".to_string(),
        value: "1".to_string(),
        operator: ConditionOperator::Equals,
    }];
    let engine = engine(vec![
        guarded,
        rule("fallback", "video.com", MatchKind::Domain, "b", 10),
    ]);

    // The high-priority rule fails its condition, so the scan continues
    let matched = engine
        .match_url("http://video.com/ep1", &MatchContext::default())
        .unwrap();
    assert_eq!(matched.id, "fallback");

    let mut ctx = MatchContext::default();
    ctx.query.insert("vip".to_string(), "1".to_string());
    let matched = engine.match_url("http://video.com/ep1", &ctx).unwrap();
    assert_eq!(matched.id, "guarded");
}

#[test]
fn test_bad_regex_fails_only_that_rule() {
    // The invalid regex enters through replace_rules, bypassing config
    // validation, the way a hot-reload race would surface it
    let engine = engine(vec![]);
    engine.replace_rules(vec![
        rule("broken", "(unclosed", MatchKind::Regex, "a", 50),
        rule("working", "video", MatchKind::UrlPattern, "b", 10),
    ]);

    let matched = engine
        .match_url("http://video.com/ep1", &MatchContext::default())
        .unwrap();
    assert_eq!(matched.id, "working");
}

#[test]
fn test_condition_operators() {
    let cases = vec![
        (ConditionOperator::Equals, "exoplayer", true),
        (ConditionOperator::NotEquals, "vlc", true),
        (ConditionOperator::Contains, "exo", true),
        (ConditionOperator::NotContains, "mpv", true),
        (ConditionOperator::StartsWith, "exo", true),
        (ConditionOperator::EndsWith, "player", true),
        (ConditionOperator::Regex, "^exo.*r$", true),
        (ConditionOperator::Equals, "vlc", false),
        (ConditionOperator::StartsWith, "player", false),
    ];

    for (operator, value, expected) in cases {
        let mut conditional = rule("c", "video.com", MatchKind::Domain, "t", 0);
        conditional.conditions = vec![ProxyCondition {
            source: ConditionSource::UserAgent,
            key: String::new(),
            value: value.to_string(),
            operator,
        }];
        let engine = engine(vec![conditional]);

        let mut ctx = MatchContext::default();
        ctx.headers
            .insert("user-agent".to_string(), "exoplayer".to_string());

        assert_eq!(
            engine.match_url("http://video.com/x", &ctx).is_some(),
            expected,
            "operator {:?} value {}",
            operator,
            value
        );
    }
}

#[test]
fn test_numeric_comparison_conditions() {
    let mut conditional = rule("n", "video.com", MatchKind::Domain, "t", 0);
    conditional.conditions = vec![ProxyCondition {
        source: ConditionSource::QueryParam,
        key: "bitrate".to_string(),
        value: "2000".to_string(),
        operator: ConditionOperator::GreaterThan,
    }];
    let engine = engine(vec![conditional]);

    let mut ctx = MatchContext::default();
    ctx.query.insert("bitrate".to_string(), "10000".to_string());
    // 10000 > 2000 numerically even though "10000" < "2000" as strings
    assert!(engine.match_url("http://video.com/x", &ctx).is_some());

    ctx.query.insert("bitrate".to_string(), "500".to_string());
    assert!(engine.match_url("http://video.com/x", &ctx).is_none());
}

#[test]
fn test_apply_modes() {
    let engine = engine(vec![]);

    // Absolute target: proxy through it verbatim, with markers
    let absolute = rule("r", "a.com", MatchKind::Domain, "http://mirror/f", 0);
    let applied = engine.apply(&absolute, "http://a.com/x");
    assert_eq!(applied.url, "http://mirror/f");
    assert_eq!(applied.headers.get("X-Proxy-Rule").unwrap(), "r");
    assert_eq!(applied.headers.get("X-Proxy-Target").unwrap(), "http://mirror/f");

    // host:port target: original URL preserved, forwarding delegated
    let forward = rule("f", "a.com", MatchKind::Domain, "127.0.0.1:9000", 0);
    let applied = engine.apply(&forward, "http://a.com/x");
    assert_eq!(applied.url, "http://a.com/x");
    assert_eq!(applied.forward_addr.as_deref(), Some("127.0.0.1:9000"));

    // Plain target: literal substring replacement
    let replace = rule("s", "a.com", MatchKind::UrlPattern, "b.org", 0);
    let applied = engine.apply(&replace, "http://a.com/x?site=a.com");
    assert_eq!(applied.url, "http://b.org/x?site=b.org");
}

#[test]
fn test_rule_headers_carried_through_apply() {
    let engine = engine(vec![]);
    let mut with_headers = rule("h", "a.com", MatchKind::Domain, "b.org", 0);
    with_headers
        .headers
        .insert("Referer".to_string(), "http://a.com/".to_string());

    let applied = engine.apply(&with_headers, "http://a.com/x");
    assert_eq!(applied.headers.get("Referer").unwrap(), "http://a.com/");
}

#[test]
fn test_rule_list_swap_is_copy_on_replace() {
    let engine = engine(vec![rule("v1", "a.com", MatchKind::Domain, "t", 0)]);

    let snapshot_before = engine.snapshot();
    engine.replace_rules(vec![
        rule("v2-low", "a.com", MatchKind::Domain, "t", 1),
        rule("v2-high", "a.com", MatchKind::Domain, "t", 9),
    ]);

    // Readers holding the old snapshot still see a complete list
    assert_eq!(snapshot_before.len(), 1);
    assert_eq!(snapshot_before[0].id, "v1");

    // New matches see the replacement, already priority-sorted
    let matched = engine
        .match_url("http://a.com/x", &MatchContext::default())
        .unwrap();
    assert_eq!(matched.id, "v2-high");
}
