use std::path::Path;

use config::rule_set::{
    builtin_url, is_builtin_tag, is_valid_tag, GEOIP_CN, GEOSITE_ADS, GEOSITE_CN,
};
use config::{DefaultAction, RoutingMode, RuleAction, RuleSetDescriptor, RuleSetFormat, Settings};
use serde::Serialize;

use crate::{is_false, BLOCK_TAG, DIRECT_TAG, DNS_OUT_TAG};

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RouteRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub ip_is_private: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_set: Option<String>,
    pub outbound: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSetKind {
    Remote,
    Local,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RuleSetEntry {
    #[serde(rename = "type")]
    pub kind: RuleSetKind,
    pub tag: String,
    pub format: RuleSetFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_detour: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RouteConfig {
    pub rules: Vec<RouteRule>,
    pub rule_set: Vec<RuleSetEntry>,
    #[serde(rename = "final")]
    pub final_outbound: String,
    pub auto_detect_interface: bool,
}

/// Outbound for traffic no rule matched. `proxy` is the selector tag, or
/// `direct` when there is no selector.
pub fn final_outbound<'a>(settings: &Settings, proxy: &'a str) -> &'a str {
    match settings.routing_mode {
        RoutingMode::Global => proxy,
        RoutingMode::Direct => DIRECT_TAG,
        RoutingMode::Rule => match settings.default_action {
            DefaultAction::Proxy => proxy,
            DefaultAction::Direct => DIRECT_TAG,
            DefaultAction::Block => BLOCK_TAG,
        },
    }
}

/// Outbound a user rule-set routes to. A node that is not among
/// `node_tags` (missing or not proxy-capable) falls back to `proxy`.
pub fn rule_target<'a>(action: &'a RuleAction, proxy: &'a str, node_tags: &[&str]) -> &'a str {
    match action {
        RuleAction::Direct => DIRECT_TAG,
        RuleAction::Block => BLOCK_TAG,
        RuleAction::Node(tag) if node_tags.contains(&tag.as_str()) => tag.as_str(),
        RuleAction::Proxy | RuleAction::Node(_) | RuleAction::Profile(_) => proxy,
    }
}

/// Enabled user rule-sets that can be referenced from the document. Built-in
/// tags are handled by the fixed rules.
fn user_rule_sets(rule_sets: &[RuleSetDescriptor]) -> impl Iterator<Item = &RuleSetDescriptor> {
    rule_sets.iter().filter(|descriptor| {
        descriptor.enabled && !is_builtin_tag(&descriptor.tag) && is_valid_tag(&descriptor.tag)
    })
}

fn china_rules_apply(settings: &Settings) -> bool {
    settings.routing_mode != RoutingMode::Global
}

/// A built-in tag is on unless its descriptor has been switched off.
pub(crate) fn builtin_enabled(rule_sets: &[RuleSetDescriptor], tag: &str) -> bool {
    !rule_sets
        .iter()
        .any(|descriptor| descriptor.tag == tag && !descriptor.enabled)
}

/// Built-in tags the document refers to, in declaration order.
fn active_builtins(settings: &Settings, rule_sets: &[RuleSetDescriptor]) -> Vec<&'static str> {
    let mut tags = Vec::new();
    if china_rules_apply(settings) {
        tags.extend([GEOSITE_CN, GEOIP_CN]);
    }
    if settings.block_ads {
        tags.push(GEOSITE_ADS);
    }
    tags.retain(|tag| builtin_enabled(rule_sets, tag));
    tags
}

pub fn build_rules(
    settings: &Settings,
    proxy: &str,
    node_tags: &[&str],
    rule_sets: &[RuleSetDescriptor],
) -> Vec<RouteRule> {
    let mut rules = vec![RouteRule {
        protocol: Some("dns".to_string()),
        outbound: DNS_OUT_TAG.to_string(),
        ..RouteRule::default()
    }];
    if settings.bypass_lan {
        rules.push(RouteRule {
            ip_is_private: true,
            outbound: DIRECT_TAG.to_string(),
            ..RouteRule::default()
        });
    }
    for descriptor in user_rule_sets(rule_sets) {
        rules.push(RouteRule {
            rule_set: Some(descriptor.tag.clone()),
            outbound: rule_target(&descriptor.action, proxy, node_tags).to_string(),
            ..RouteRule::default()
        });
    }
    for tag in active_builtins(settings, rule_sets) {
        if tag == GEOSITE_ADS {
            continue;
        }
        rules.push(RouteRule {
            rule_set: Some(tag.to_string()),
            outbound: DIRECT_TAG.to_string(),
            ..RouteRule::default()
        });
    }
    rules
}

fn builtin_entry(tag: &str) -> Option<RuleSetEntry> {
    Some(RuleSetEntry {
        kind: RuleSetKind::Remote,
        tag: tag.to_string(),
        format: RuleSetFormat::Binary,
        url: Some(builtin_url(tag)?),
        path: None,
        download_detour: Some(DIRECT_TAG.to_string()),
    })
}

/// Every rule-set referenced by the route and dns rules.
pub fn build_rule_set_entries(
    settings: &Settings,
    rule_sets: &[RuleSetDescriptor],
    cache_dir: &Path,
) -> Vec<RuleSetEntry> {
    let mut entries: Vec<RuleSetEntry> = active_builtins(settings, rule_sets)
        .into_iter()
        .filter_map(builtin_entry)
        .collect();
    entries.extend(user_rule_sets(rule_sets).map(|descriptor| RuleSetEntry {
        kind: RuleSetKind::Local,
        tag: descriptor.tag.clone(),
        format: descriptor.format,
        url: None,
        path: Some(
            descriptor
                .artifact_path(cache_dir)
                .to_string_lossy()
                .into_owned(),
        ),
        download_detour: None,
    }));
    entries
}

pub fn build_route(
    settings: &Settings,
    proxy: &str,
    node_tags: &[&str],
    rule_sets: &[RuleSetDescriptor],
    cache_dir: &Path,
) -> RouteConfig {
    RouteConfig {
        rules: build_rules(settings, proxy, node_tags, rule_sets),
        rule_set: build_rule_set_entries(settings, rule_sets, cache_dir),
        final_outbound: final_outbound(settings, proxy).to_string(),
        auto_detect_interface: true,
    }
}
