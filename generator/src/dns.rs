use config::rule_set::{GEOSITE_ADS, GEOSITE_CN};
use config::{RoutingMode, RuleSetDescriptor, Settings};
use serde::Serialize;

use crate::route::builtin_enabled;
use crate::{is_false, DIRECT_TAG};

pub const BOOTSTRAP_SERVER_TAG: &str = "dns-bootstrap";
pub const LOCAL_SERVER_TAG: &str = "dns-local";
pub const REMOTE_SERVER_TAG: &str = "dns-remote";
pub const BLOCK_SERVER_TAG: &str = "dns-block";
pub const FAKEIP_SERVER_TAG: &str = "dns-fakeip";

/// Plain IP so it never needs resolving itself.
pub const BOOTSTRAP_ADDRESS: &str = "223.5.5.5";
const BLOCK_ADDRESS: &str = "rcode://success";
const FAKEIP_ADDRESS: &str = "fakeip";

pub const FAKEIP_INET4_RANGE: &str = "198.18.0.0/15";
pub const FAKEIP_INET6_RANGE: &str = "fc00::/18";

const SECURE_SCHEMES: [&str; 4] = ["https://", "tls://", "quic://", "h3://"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStrategy {
    Ipv4Only,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DnsServer {
    pub tag: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_resolver: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detour: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DnsRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_set: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub query_type: Vec<String>,
    pub server: String,
    #[serde(skip_serializing_if = "is_false")]
    pub disable_cache: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FakeIp {
    pub enabled: bool,
    pub inet4_range: String,
    pub inet6_range: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DnsConfig {
    pub servers: Vec<DnsServer>,
    pub rules: Vec<DnsRule>,
    #[serde(rename = "final")]
    pub final_server: String,
    pub strategy: DomainStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fakeip: Option<FakeIp>,
}

/// Whether the resolver at `address` is reached by a host name that itself
/// needs resolving.
pub fn needs_bootstrap(address: &str) -> bool {
    let address = address.trim().to_ascii_lowercase();
    SECURE_SCHEMES
        .iter()
        .any(|scheme| address.starts_with(scheme))
}

fn resolver(tag: &str, address: &str, detour: &str) -> DnsServer {
    DnsServer {
        tag: tag.to_string(),
        address: address.trim().to_string(),
        address_resolver: needs_bootstrap(address).then(|| BOOTSTRAP_SERVER_TAG.to_string()),
        detour: Some(detour.to_string()),
    }
}

fn static_server(tag: &str, address: &str) -> DnsServer {
    DnsServer {
        tag: tag.to_string(),
        address: address.to_string(),
        address_resolver: None,
        detour: None,
    }
}

/// Servers in order: bootstrap, local, remote, block and, with fake DNS on,
/// fakeip. `proxy` is the outbound the remote resolver is reached through.
pub fn build_servers(settings: &Settings, proxy: &str) -> Vec<DnsServer> {
    let mut servers = vec![
        DnsServer {
            detour: Some(DIRECT_TAG.to_string()),
            ..static_server(BOOTSTRAP_SERVER_TAG, BOOTSTRAP_ADDRESS)
        },
        resolver(LOCAL_SERVER_TAG, settings.local_dns(), DIRECT_TAG),
        resolver(REMOTE_SERVER_TAG, settings.remote_dns(), proxy),
        static_server(BLOCK_SERVER_TAG, BLOCK_ADDRESS),
    ];
    if settings.fake_dns {
        servers.push(static_server(FAKEIP_SERVER_TAG, FAKEIP_ADDRESS));
    }
    servers
}

pub fn build_rules(settings: &Settings, rule_sets: &[RuleSetDescriptor]) -> Vec<DnsRule> {
    let mut rules = vec![
        DnsRule {
            outbound: Some("any".to_string()),
            server: BOOTSTRAP_SERVER_TAG.to_string(),
            ..DnsRule::default()
        },
        DnsRule {
            outbound: Some(DIRECT_TAG.to_string()),
            server: LOCAL_SERVER_TAG.to_string(),
            ..DnsRule::default()
        },
    ];
    if settings.routing_mode != RoutingMode::Global && builtin_enabled(rule_sets, GEOSITE_CN) {
        rules.push(DnsRule {
            rule_set: Some(GEOSITE_CN.to_string()),
            server: LOCAL_SERVER_TAG.to_string(),
            ..DnsRule::default()
        });
    }
    if settings.block_ads && builtin_enabled(rule_sets, GEOSITE_ADS) {
        rules.push(DnsRule {
            rule_set: Some(GEOSITE_ADS.to_string()),
            server: BLOCK_SERVER_TAG.to_string(),
            disable_cache: true,
            ..DnsRule::default()
        });
    }
    if settings.fake_dns {
        rules.push(DnsRule {
            query_type: vec!["A".to_string(), "AAAA".to_string()],
            server: FAKEIP_SERVER_TAG.to_string(),
            ..DnsRule::default()
        });
    }
    rules
}

pub fn build_dns(settings: &Settings, proxy: &str, rule_sets: &[RuleSetDescriptor]) -> DnsConfig {
    DnsConfig {
        servers: build_servers(settings, proxy),
        rules: build_rules(settings, rule_sets),
        final_server: REMOTE_SERVER_TAG.to_string(),
        strategy: DomainStrategy::Ipv4Only,
        fakeip: settings.fake_dns.then(|| FakeIp {
            enabled: true,
            inet4_range: FAKEIP_INET4_RANGE.to_string(),
            inet6_range: FAKEIP_INET6_RANGE.to_string(),
        }),
    }
}
