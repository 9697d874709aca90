//! Builds the kernel configuration document from the user's settings and
//! node list.
//!
//! Generation is pure and total: the same input always gives the same
//! document, and missing or malformed values are replaced by defaults
//! instead of being reported.

pub mod dns;
pub mod inbound;
pub mod outbound;
pub mod route;

use std::path::Path;

use config::{OutboundNode, RuleSetDescriptor, Settings};
use serde::Serialize;

pub use dns::DnsConfig;
pub use inbound::Inbound;
pub use outbound::Outbound;
pub use route::RouteConfig;

pub const SELECTOR_TAG: &str = "proxy";
pub const URLTEST_TAG: &str = "auto";
pub const DIRECT_TAG: &str = "direct";
pub const BLOCK_TAG: &str = "block";
pub const DNS_OUT_TAG: &str = "dns-out";

const CONTROLLER_ADDRESS: &str = "127.0.0.1:9090";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogConfig {
    pub disabled: bool,
    pub level: String,
    pub timestamp: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClashApi {
    pub external_controller: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CacheFile {
    pub enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Experimental {
    pub clash_api: ClashApi,
    pub cache_file: CacheFile,
}

/// The document handed to the kernel.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConfigDocument {
    pub log: LogConfig,
    pub experimental: Experimental,
    pub dns: DnsConfig,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Outbound>,
    pub route: RouteConfig,
}

impl ConfigDocument {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn outbound(&self, tag: &str) -> Option<&Outbound> {
        self.outbounds.iter().find(|o| o.tag() == tag)
    }
}

pub(crate) fn is_false(value: &bool) -> bool {
    !*value
}

pub fn build_log() -> LogConfig {
    LogConfig {
        disabled: false,
        level: "info".to_string(),
        timestamp: true,
    }
}

pub fn build_experimental() -> Experimental {
    Experimental {
        clash_api: ClashApi {
            external_controller: CONTROLLER_ADDRESS.to_string(),
        },
        cache_file: CacheFile { enabled: true },
    }
}

pub fn generate(
    settings: &Settings,
    nodes: &[OutboundNode],
    active_node_tag: Option<&str>,
) -> ConfigDocument {
    generate_with_rule_sets(settings, nodes, active_node_tag, &[], Path::new(""))
}

/// Like [`generate`], and also routes the enabled user rule-sets.
/// `cache_dir` is where remote rule-set artifacts are cached.
pub fn generate_with_rule_sets(
    settings: &Settings,
    nodes: &[OutboundNode],
    active_node_tag: Option<&str>,
    rule_sets: &[RuleSetDescriptor],
    cache_dir: &Path,
) -> ConfigDocument {
    let outbounds =
        outbound::build_outbounds(nodes, active_node_tag, settings.latency_test_url());

    // With no selector every reference to it goes out directly instead.
    let proxy = if matches!(outbounds.first(), Some(Outbound::Selector(_))) {
        SELECTOR_TAG
    } else {
        DIRECT_TAG
    };
    let node_tags: Vec<&str> = outbounds
        .iter()
        .filter(|o| matches!(o, Outbound::Node(_)))
        .map(Outbound::tag)
        .collect();

    let dns = dns::build_dns(settings, proxy, rule_sets);
    let inbounds = inbound::build_inbounds(settings);
    let route = route::build_route(settings, proxy, &node_tags, rule_sets, cache_dir);

    ConfigDocument {
        log: build_log(),
        experimental: build_experimental(),
        dns,
        inbounds,
        outbounds,
        route,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_static_sections() {
        assert_eq!(
            serde_json::to_value(build_log()).unwrap(),
            json!({ "disabled": false, "level": "info", "timestamp": true })
        );
        assert_eq!(
            serde_json::to_value(build_experimental()).unwrap(),
            json!({
                "clash_api": { "external_controller": "127.0.0.1:9090" },
                "cache_file": { "enabled": true },
            })
        );
    }

    #[test]
    fn test_empty_input_is_still_a_document() {
        let document = generate(&Settings::default(), &[], None);
        let value = serde_json::to_value(&document).unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(
            keys.len(),
            6,
            "log, experimental, dns, inbounds, outbounds, route"
        );
        assert_eq!(value["route"]["final"], json!("direct"));
        assert_eq!(value["dns"]["servers"][2]["detour"], json!("direct"));
        assert!(document.outbound(SELECTOR_TAG).is_none());
    }
}
