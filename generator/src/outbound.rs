use std::collections::HashSet;

use config::OutboundNode;
use serde::Serialize;

use crate::{BLOCK_TAG, DIRECT_TAG, DNS_OUT_TAG, SELECTOR_TAG, URLTEST_TAG};

const URLTEST_INTERVAL: &str = "3m";
const URLTEST_TOLERANCE_MS: u16 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundType {
    Selector,
    Urltest,
    Direct,
    Block,
    Dns,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SelectorOutbound {
    #[serde(rename = "type")]
    pub kind: OutboundType,
    pub tag: String,
    pub outbounds: Vec<String>,
    pub default: String,
    pub interrupt_exist_connections: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UrlTestOutbound {
    #[serde(rename = "type")]
    pub kind: OutboundType,
    pub tag: String,
    pub outbounds: Vec<String>,
    pub url: String,
    pub interval: String,
    pub tolerance: u16,
}

/// `direct`, `block` and `dns` sinks: nothing but a type and a tag.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SinkOutbound {
    #[serde(rename = "type")]
    pub kind: OutboundType,
    pub tag: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Selector(SelectorOutbound),
    UrlTest(UrlTestOutbound),
    Sink(SinkOutbound),
    Node(OutboundNode),
}

impl Outbound {
    pub fn tag(&self) -> &str {
        match self {
            Outbound::Selector(o) => &o.tag,
            Outbound::UrlTest(o) => &o.tag,
            Outbound::Sink(o) => &o.tag,
            Outbound::Node(node) => &node.tag,
        }
    }
}

fn is_reserved_tag(tag: &str) -> bool {
    [SELECTOR_TAG, URLTEST_TAG, DIRECT_TAG, BLOCK_TAG, DNS_OUT_TAG].contains(&tag)
}

/// Proxy-capable nodes in input order.
///
/// Nodes with an empty tag, a tag already taken by an earlier node or a tag
/// reserved for the generated outbounds are left out so the document never
/// carries duplicate tags.
pub fn proxy_nodes(nodes: &[OutboundNode]) -> Vec<&OutboundNode> {
    let mut seen = HashSet::new();
    nodes
        .iter()
        .filter(|node| node.is_proxy_capable())
        .filter(|node| {
            if node.tag.is_empty() || is_reserved_tag(&node.tag) || !seen.insert(node.tag.as_str())
            {
                tracing::warn!(tag = %node.tag, "skip node with unusable tag");
                return false;
            }
            true
        })
        .collect()
}

pub fn build_selector(proxies: &[&OutboundNode], active: Option<&str>) -> Option<SelectorOutbound> {
    let first = proxies.first()?;
    let members: Vec<String> = proxies.iter().map(|node| node.tag.clone()).collect();
    let default = active
        .filter(|tag| members.iter().any(|member| member == tag))
        .unwrap_or(&first.tag)
        .to_string();
    Some(SelectorOutbound {
        kind: OutboundType::Selector,
        tag: SELECTOR_TAG.to_string(),
        outbounds: members,
        default,
        interrupt_exist_connections: false,
    })
}

/// Latency based group, only worth having with two or more members.
pub fn build_urltest(proxies: &[&OutboundNode], url: &str) -> Option<UrlTestOutbound> {
    if proxies.len() < 2 {
        return None;
    }
    Some(UrlTestOutbound {
        kind: OutboundType::Urltest,
        tag: URLTEST_TAG.to_string(),
        outbounds: proxies.iter().map(|node| node.tag.clone()).collect(),
        url: url.to_string(),
        interval: URLTEST_INTERVAL.to_string(),
        tolerance: URLTEST_TOLERANCE_MS,
    })
}

fn sink(kind: OutboundType, tag: &str) -> Outbound {
    Outbound::Sink(SinkOutbound {
        kind,
        tag: tag.to_string(),
    })
}

/// Selector first, then the nodes, the urltest group and the three sinks.
pub fn build_outbounds(
    nodes: &[OutboundNode],
    active: Option<&str>,
    latency_test_url: &str,
) -> Vec<Outbound> {
    let proxies = proxy_nodes(nodes);
    if proxies.len() < nodes.len() {
        tracing::debug!(
            "{} of {} nodes are not used for routing",
            nodes.len() - proxies.len(),
            nodes.len()
        );
    }

    let mut outbounds = Vec::with_capacity(proxies.len() + 5);
    if let Some(selector) = build_selector(&proxies, active) {
        outbounds.push(Outbound::Selector(selector));
    }
    outbounds.extend(proxies.iter().map(|node| Outbound::Node((*node).clone())));
    if let Some(urltest) = build_urltest(&proxies, latency_test_url) {
        outbounds.push(Outbound::UrlTest(urltest));
    }
    outbounds.push(sink(OutboundType::Direct, DIRECT_TAG));
    outbounds.push(sink(OutboundType::Block, BLOCK_TAG));
    outbounds.push(sink(OutboundType::Dns, DNS_OUT_TAG));
    outbounds
}
