use config::{Settings, TunStack};
use serde::Serialize;

pub const MIXED_INBOUND_TAG: &str = "mixed-in";
pub const TUN_INBOUND_TAG: &str = "tun-in";

const LAN_LISTEN: &str = "0.0.0.0";
const LOOPBACK_LISTEN: &str = "127.0.0.1";

pub const TUN_INET4_ADDRESS: &str = "172.19.0.1/30";
pub const TUN_INET6_ADDRESS: &str = "fdfe:dcba:9876::1/126";
pub const TUN_MTU: u32 = 9000;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MixedInbound {
    pub tag: String,
    pub listen: String,
    pub listen_port: u16,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TunInbound {
    pub tag: String,
    pub address: Vec<String>,
    pub mtu: u32,
    pub auto_route: bool,
    pub strict_route: bool,
    pub stack: TunStack,
    pub sniff: bool,
    pub sniff_override_destination: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Inbound {
    Mixed(MixedInbound),
    Tun(TunInbound),
}

pub fn build_mixed(settings: &Settings) -> Option<MixedInbound> {
    let port = settings.mixed_port()?;
    let listen = if settings.allow_lan {
        LAN_LISTEN
    } else {
        LOOPBACK_LISTEN
    };
    Some(MixedInbound {
        tag: MIXED_INBOUND_TAG.to_string(),
        listen: listen.to_string(),
        listen_port: port,
    })
}

pub fn build_tun(settings: &Settings) -> Option<TunInbound> {
    if !settings.tun_enabled {
        return None;
    }
    Some(TunInbound {
        tag: TUN_INBOUND_TAG.to_string(),
        address: vec![TUN_INET4_ADDRESS.to_string(), TUN_INET6_ADDRESS.to_string()],
        mtu: TUN_MTU,
        auto_route: true,
        strict_route: true,
        stack: settings.tun_stack,
        sniff: true,
        sniff_override_destination: false,
    })
}

pub fn build_inbounds(settings: &Settings) -> Vec<Inbound> {
    build_mixed(settings)
        .map(Inbound::Mixed)
        .into_iter()
        .chain(build_tun(settings).map(Inbound::Tun))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mixed_listen_address() {
        let settings = Settings::default();
        let mixed = build_mixed(&settings).unwrap();
        assert_eq!(mixed.listen, "127.0.0.1");
        assert_eq!(mixed.listen_port, 7890);

        let settings = Settings {
            allow_lan: true,
            local_port: 2080,
            ..Settings::default()
        };
        let mixed = build_mixed(&settings).unwrap();
        assert_eq!(mixed.listen, "0.0.0.0");
        assert_eq!(mixed.listen_port, 2080);
    }

    #[test]
    fn test_non_positive_port_has_no_mixed() {
        for port in [0, -7890] {
            let settings = Settings {
                local_port: port,
                tun_enabled: true,
                ..Settings::default()
            };
            let inbounds = build_inbounds(&settings);
            assert_eq!(inbounds.len(), 1);
            assert!(matches!(inbounds[0], Inbound::Tun(_)));
        }
    }

    #[test]
    fn test_tun_only_when_enabled() {
        assert!(build_tun(&Settings::default()).is_none());
        let settings = Settings {
            tun_enabled: true,
            tun_stack: TunStack::System,
            ..Settings::default()
        };
        let inbounds = build_inbounds(&settings);
        let value = serde_json::to_value(&inbounds).unwrap();
        assert_eq!(
            value,
            json!([
                { "type": "mixed", "tag": "mixed-in", "listen": "127.0.0.1", "listen_port": 7890 },
                {
                    "type": "tun",
                    "tag": "tun-in",
                    "address": ["172.19.0.1/30", "fdfe:dcba:9876::1/126"],
                    "mtu": 9000,
                    "auto_route": true,
                    "strict_route": true,
                    "stack": "system",
                    "sniff": true,
                    "sniff_override_destination": false,
                },
            ])
        );
    }
}
