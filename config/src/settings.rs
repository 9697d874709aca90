use serde::{Deserialize, Serialize};

pub const DEFAULT_LOCAL_PORT: i32 = 7890;
pub const DEFAULT_LOCAL_DNS: &str = "https://223.5.5.5/dns-query";
pub const DEFAULT_REMOTE_DNS: &str = "https://1.1.1.1/dns-query";
pub const DEFAULT_LATENCY_TEST_URL: &str = "https://www.gstatic.com/generate_204";

/// Userspace packet-processing stack used by the tun inbound.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunStack {
    System,
    Gvisor,
    #[default]
    Mixed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Split traffic by rule-sets.
    #[default]
    Rule,
    /// Everything goes through the proxy selector.
    Global,
    /// Everything goes out directly.
    Direct,
}

/// Where traffic goes when no routing rule matched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultAction {
    #[default]
    Proxy,
    Direct,
    Block,
}

/// Snapshot of the user facing settings.
///
/// Every field has a default, so a partial record (or an empty one) always
/// deserializes. Nothing in the workspace mutates a `Settings` in place; the
/// store produces a new snapshot for each change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Port of the mixed (http + socks) listener. Non-positive disables it.
    pub local_port: i32,
    pub allow_lan: bool,
    pub tun_enabled: bool,
    pub tun_stack: TunStack,
    pub local_dns: Option<String>,
    pub remote_dns: Option<String>,
    pub fake_dns: bool,
    pub block_ads: bool,
    pub bypass_lan: bool,
    pub routing_mode: RoutingMode,
    pub default_action: DefaultAction,
    pub latency_test_url: Option<String>,
    pub autostart: bool,
    pub minimize_to_tray: bool,
    pub start_minimized: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            local_port: DEFAULT_LOCAL_PORT,
            allow_lan: false,
            tun_enabled: false,
            tun_stack: TunStack::default(),
            local_dns: None,
            remote_dns: None,
            fake_dns: false,
            block_ads: false,
            bypass_lan: true,
            routing_mode: RoutingMode::default(),
            default_action: DefaultAction::default(),
            latency_test_url: None,
            autostart: false,
            minimize_to_tray: true,
            start_minimized: false,
        }
    }
}

impl Settings {
    pub fn local_dns(&self) -> &str {
        non_blank(self.local_dns.as_deref()).unwrap_or(DEFAULT_LOCAL_DNS)
    }

    pub fn remote_dns(&self) -> &str {
        non_blank(self.remote_dns.as_deref()).unwrap_or(DEFAULT_REMOTE_DNS)
    }

    pub fn latency_test_url(&self) -> &str {
        non_blank(self.latency_test_url.as_deref()).unwrap_or(DEFAULT_LATENCY_TEST_URL)
    }

    /// Port of the mixed listener, `None` when the listener must not be opened.
    pub fn mixed_port(&self) -> Option<u16> {
        u16::try_from(self.local_port).ok().filter(|port| *port > 0)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_record_uses_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.local_dns(), DEFAULT_LOCAL_DNS);
        assert_eq!(settings.remote_dns(), DEFAULT_REMOTE_DNS);
        assert_eq!(settings.latency_test_url(), DEFAULT_LATENCY_TEST_URL);
        assert_eq!(settings.mixed_port(), Some(7890));
    }

    #[test]
    fn test_partial_yaml_record() {
        let yaml = r#"
local_port: 1080
allow_lan: true
tun_enabled: true
tun_stack: gvisor
remote_dns: tls://8.8.8.8
routing_mode: global
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.mixed_port(), Some(1080));
        assert!(settings.allow_lan);
        assert_eq!(settings.tun_stack, TunStack::Gvisor);
        assert_eq!(settings.remote_dns(), "tls://8.8.8.8");
        assert_eq!(settings.local_dns(), DEFAULT_LOCAL_DNS);
        assert_eq!(settings.routing_mode, RoutingMode::Global);
        assert!(settings.bypass_lan);
    }

    #[test]
    fn test_blank_strings_fall_back() {
        let settings = Settings {
            local_dns: Some("   ".to_string()),
            latency_test_url: Some(String::new()),
            ..Settings::default()
        };
        assert_eq!(settings.local_dns(), DEFAULT_LOCAL_DNS);
        assert_eq!(settings.latency_test_url(), DEFAULT_LATENCY_TEST_URL);
    }

    #[test]
    fn test_mixed_port_bounds() {
        for port in [0, -1, 65536, i32::MAX] {
            let settings = Settings {
                local_port: port,
                ..Settings::default()
            };
            assert_eq!(settings.mixed_port(), None, "port {port}");
        }
        let settings = Settings {
            local_port: 65535,
            ..Settings::default()
        };
        assert_eq!(settings.mixed_port(), Some(65535));
    }
}
