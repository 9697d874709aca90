use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::decode_base64;

/// Outbound protocol of a node, as named by the kernel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeProtocol {
    Shadowsocks,
    Vmess,
    Vless,
    Trojan,
    Hysteria,
    Hysteria2,
    Tuic,
    Socks,
    Http,
    Wireguard,
    ShadowTls,
    AnyTls,
    Ssh,
    Direct,
    Block,
    Dns,
    Selector,
    UrlTest,
    Other(String),
}

impl NodeProtocol {
    pub fn as_str(&self) -> &str {
        match self {
            NodeProtocol::Shadowsocks => "shadowsocks",
            NodeProtocol::Vmess => "vmess",
            NodeProtocol::Vless => "vless",
            NodeProtocol::Trojan => "trojan",
            NodeProtocol::Hysteria => "hysteria",
            NodeProtocol::Hysteria2 => "hysteria2",
            NodeProtocol::Tuic => "tuic",
            NodeProtocol::Socks => "socks",
            NodeProtocol::Http => "http",
            NodeProtocol::Wireguard => "wireguard",
            NodeProtocol::ShadowTls => "shadowtls",
            NodeProtocol::AnyTls => "anytls",
            NodeProtocol::Ssh => "ssh",
            NodeProtocol::Direct => "direct",
            NodeProtocol::Block => "block",
            NodeProtocol::Dns => "dns",
            NodeProtocol::Selector => "selector",
            NodeProtocol::UrlTest => "urltest",
            NodeProtocol::Other(name) => name,
        }
    }

    /// Whether traffic can be relayed through an upstream of this type.
    /// Only these types take part in the selector and urltest groups.
    pub fn is_proxy_capable(&self) -> bool {
        matches!(
            self,
            NodeProtocol::Shadowsocks
                | NodeProtocol::Vmess
                | NodeProtocol::Vless
                | NodeProtocol::Trojan
                | NodeProtocol::Hysteria
                | NodeProtocol::Hysteria2
                | NodeProtocol::Tuic
                | NodeProtocol::Socks
                | NodeProtocol::Http
                | NodeProtocol::Wireguard
                | NodeProtocol::ShadowTls
                | NodeProtocol::AnyTls
                | NodeProtocol::Ssh
        )
    }
}

impl From<String> for NodeProtocol {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "shadowsocks" | "ss" => NodeProtocol::Shadowsocks,
            "vmess" => NodeProtocol::Vmess,
            "vless" => NodeProtocol::Vless,
            "trojan" => NodeProtocol::Trojan,
            "hysteria" => NodeProtocol::Hysteria,
            "hysteria2" | "hy2" => NodeProtocol::Hysteria2,
            "tuic" => NodeProtocol::Tuic,
            "socks" | "socks5" => NodeProtocol::Socks,
            "http" => NodeProtocol::Http,
            "wireguard" => NodeProtocol::Wireguard,
            "shadowtls" => NodeProtocol::ShadowTls,
            "anytls" => NodeProtocol::AnyTls,
            "ssh" => NodeProtocol::Ssh,
            "direct" => NodeProtocol::Direct,
            "block" => NodeProtocol::Block,
            "dns" => NodeProtocol::Dns,
            "selector" => NodeProtocol::Selector,
            "urltest" => NodeProtocol::UrlTest,
            _ => NodeProtocol::Other(s),
        }
    }
}

impl From<NodeProtocol> for String {
    fn from(protocol: NodeProtocol) -> Self {
        match protocol {
            NodeProtocol::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl Display for NodeProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured upstream endpoint.
///
/// `params` holds the protocol specific fields (server, credentials, tls,
/// transport...) and is written next to `type` and `tag` unchanged, so a node
/// record is already a valid kernel outbound.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundNode {
    #[serde(rename = "type")]
    pub protocol: NodeProtocol,
    pub tag: String,
    #[serde(flatten)]
    pub params: BTreeMap<String, Value>,
}

impl OutboundNode {
    pub fn new(tag: impl Into<String>, protocol: NodeProtocol) -> Self {
        OutboundNode {
            protocol,
            tag: tag.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn is_proxy_capable(&self) -> bool {
        self.protocol.is_proxy_capable()
    }

    pub fn server(&self) -> Option<&str> {
        self.params.get("server").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    InvalidLink(String),
    UnsupportedScheme(String),
    MissingField(&'static str),
    InvalidBase64,
}

impl std::error::Error for ParseError {}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidLink(link) => write!(f, "invalid share link: {link}"),
            ParseError::UnsupportedScheme(scheme) => write!(f, "unsupported scheme: {scheme}"),
            ParseError::MissingField(field) => write!(f, "share link has no {field}"),
            ParseError::InvalidBase64 => write!(f, "invalid base64 payload"),
        }
    }
}

impl FromStr for OutboundNode {
    type Err = ParseError;

    /// Parses a share link (`ss://`, `trojan://`, `vless://`, `socks5://`,
    /// `http://`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let link = s.trim();
        let Some((scheme, _)) = link.split_once("://") else {
            return Err(ParseError::InvalidLink(link.to_string()));
        };
        match scheme.to_ascii_lowercase().as_str() {
            "ss" => parse_shadowsocks(link),
            "trojan" => parse_trojan(link),
            "vless" => parse_vless(link),
            "socks" | "socks5" => parse_socks(link),
            "http" | "https" => parse_http(link),
            other => Err(ParseError::UnsupportedScheme(other.to_string())),
        }
    }
}

fn parse_url(link: &str) -> Result<Url, ParseError> {
    Url::parse(link).map_err(|_| ParseError::InvalidLink(link.to_string()))
}

fn decoded(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Node skeleton with server, port and a tag taken from the fragment.
fn endpoint(url: &Url, protocol: NodeProtocol) -> Result<OutboundNode, ParseError> {
    let server = url
        .host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
        .filter(|h| !h.is_empty())
        .ok_or(ParseError::MissingField("server"))?;
    let port = url
        .port_or_known_default()
        .ok_or(ParseError::MissingField("port"))?;
    let tag = url
        .fragment()
        .map(|f| decoded(f).trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| format!("{server}:{port}"));
    Ok(OutboundNode::new(tag, protocol)
        .with_param("server", server)
        .with_param("server_port", port))
}

fn query_map(url: &Url) -> HashMap<String, String> {
    url.query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn parse_shadowsocks(link: &str) -> Result<OutboundNode, ParseError> {
    let body = &link["ss://".len()..];
    let (main, fragment) = match body.split_once('#') {
        Some((main, fragment)) => (main, Some(fragment)),
        None => (body, None),
    };

    // Legacy form: the whole `method:password@host:port` is base64 encoded.
    let url = if main.contains('@') {
        parse_url(link)?
    } else {
        let plain = decode_base64(main.trim_end_matches('/').as_bytes())
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or(ParseError::InvalidBase64)?;
        let rebuilt = match fragment {
            Some(fragment) => format!("ss://{plain}#{fragment}"),
            None => format!("ss://{plain}"),
        };
        parse_url(&rebuilt)?
    };

    let (method, password) = match url.password() {
        Some(password) => (decoded(url.username()), decoded(password)),
        None => {
            let userinfo = decode_base64(decoded(url.username()).as_bytes())
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .ok_or(ParseError::InvalidBase64)?;
            let (method, password) = userinfo
                .split_once(':')
                .ok_or(ParseError::MissingField("password"))?;
            (method.to_string(), password.to_string())
        }
    };
    if method.is_empty() {
        return Err(ParseError::MissingField("method"));
    }

    let mut node = endpoint(&url, NodeProtocol::Shadowsocks)?
        .with_param("method", method)
        .with_param("password", password);
    if let Some(plugin) = query_map(&url).get("plugin") {
        let (name, opts) = plugin.split_once(';').unwrap_or((plugin.as_str(), ""));
        node = node.with_param("plugin", name);
        if !opts.is_empty() {
            node = node.with_param("plugin_opts", opts);
        }
    }
    Ok(node)
}

fn parse_trojan(link: &str) -> Result<OutboundNode, ParseError> {
    let url = parse_url(link)?;
    let password = decoded(url.username());
    if password.is_empty() {
        return Err(ParseError::MissingField("password"));
    }
    let query = query_map(&url);
    let mut node = endpoint(&url, NodeProtocol::Trojan)?.with_param("password", password);
    let server = node.server().unwrap_or_default().to_string();
    let security = query.get("security").map(String::as_str).unwrap_or("tls");
    if let Some(tls) = tls_options(security, &query, &server) {
        node = node.with_param("tls", tls);
    }
    if let Some(transport) = transport_options(&query) {
        node = node.with_param("transport", transport);
    }
    Ok(node)
}

fn parse_vless(link: &str) -> Result<OutboundNode, ParseError> {
    let url = parse_url(link)?;
    let uuid = decoded(url.username());
    if uuid.is_empty() {
        return Err(ParseError::MissingField("uuid"));
    }
    let query = query_map(&url);
    let mut node = endpoint(&url, NodeProtocol::Vless)?.with_param("uuid", uuid);
    let server = node.server().unwrap_or_default().to_string();
    if let Some(flow) = query.get("flow").filter(|f| !f.is_empty()) {
        node = node.with_param("flow", flow.as_str());
    }
    let security = query.get("security").map(String::as_str).unwrap_or("none");
    if let Some(tls) = tls_options(security, &query, &server) {
        node = node.with_param("tls", tls);
    }
    if let Some(transport) = transport_options(&query) {
        node = node.with_param("transport", transport);
    }
    Ok(node)
}

fn parse_socks(link: &str) -> Result<OutboundNode, ParseError> {
    let url = parse_url(link)?;
    let mut node = endpoint(&url, NodeProtocol::Socks)?.with_param("version", "5");
    node = with_credentials(node, &url);
    Ok(node)
}

fn parse_http(link: &str) -> Result<OutboundNode, ParseError> {
    let url = parse_url(link)?;
    let mut node = endpoint(&url, NodeProtocol::Http)?;
    node = with_credentials(node, &url);
    if url.scheme() == "https" {
        let server = node.server().unwrap_or_default().to_string();
        node = node.with_param("tls", json!({ "enabled": true, "server_name": server }));
    }
    Ok(node)
}

fn with_credentials(mut node: OutboundNode, url: &Url) -> OutboundNode {
    if !url.username().is_empty() {
        node = node.with_param("username", decoded(url.username()));
    }
    if let Some(password) = url.password() {
        node = node.with_param("password", decoded(password));
    }
    node
}

fn tls_options(security: &str, query: &HashMap<String, String>, server: &str) -> Option<Value> {
    if !matches!(security, "tls" | "reality" | "xtls") {
        return None;
    }
    let server_name = query
        .get("sni")
        .or_else(|| query.get("peer"))
        .filter(|s| !s.is_empty())
        .map(String::as_str)
        .unwrap_or(server);
    let mut tls = json!({ "enabled": true, "server_name": server_name });
    if matches!(
        query.get("allowInsecure").map(String::as_str),
        Some("1" | "true")
    ) {
        tls["insecure"] = json!(true);
    }
    if let Some(alpn) = query.get("alpn").filter(|a| !a.is_empty()) {
        let alpn: Vec<&str> = alpn.split(',').map(str::trim).collect();
        tls["alpn"] = json!(alpn);
    }
    let fingerprint = query.get("fp").filter(|f| !f.is_empty());
    if security == "reality" {
        tls["utls"] = json!({
            "enabled": true,
            "fingerprint": fingerprint.map(String::as_str).unwrap_or("chrome"),
        });
        tls["reality"] = json!({
            "enabled": true,
            "public_key": query.get("pbk").cloned().unwrap_or_default(),
            "short_id": query.get("sid").cloned().unwrap_or_default(),
        });
    } else if let Some(fingerprint) = fingerprint {
        tls["utls"] = json!({ "enabled": true, "fingerprint": fingerprint });
    }
    Some(tls)
}

fn transport_options(query: &HashMap<String, String>) -> Option<Value> {
    let host = query.get("host").filter(|h| !h.is_empty());
    match query.get("type").map(String::as_str) {
        Some("ws") => {
            let mut transport = json!({
                "type": "ws",
                "path": query.get("path").map(String::as_str).unwrap_or("/"),
            });
            if let Some(host) = host {
                transport["headers"] = json!({ "Host": host });
            }
            Some(transport)
        }
        Some("grpc") => Some(json!({
            "type": "grpc",
            "service_name": query.get("serviceName").cloned().unwrap_or_default(),
        })),
        Some("http" | "h2") => {
            let mut transport = json!({ "type": "http" });
            if let Some(path) = query.get("path") {
                transport["path"] = json!(path);
            }
            if let Some(host) = host {
                transport["host"] = json!([host]);
            }
            Some(transport)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_round_trips_through_string() {
        assert_eq!(NodeProtocol::from("vless".to_string()), NodeProtocol::Vless);
        assert_eq!(NodeProtocol::from("SS".to_string()), NodeProtocol::Shadowsocks);
        assert_eq!(
            NodeProtocol::from("naive".to_string()),
            NodeProtocol::Other("naive".to_string())
        );
        assert_eq!(String::from(NodeProtocol::UrlTest), "urltest");
        assert_eq!(String::from(NodeProtocol::Other("naive".into())), "naive");
    }

    #[test]
    fn test_proxy_capable_set() {
        assert!(NodeProtocol::Trojan.is_proxy_capable());
        assert!(NodeProtocol::Hysteria2.is_proxy_capable());
        assert!(!NodeProtocol::Direct.is_proxy_capable());
        assert!(!NodeProtocol::Dns.is_proxy_capable());
        assert!(!NodeProtocol::Selector.is_proxy_capable());
        assert!(!NodeProtocol::Other("log".into()).is_proxy_capable());
    }

    #[test]
    fn test_node_serializes_flat() {
        let node = OutboundNode::new("hk-01", NodeProtocol::Shadowsocks)
            .with_param("server", "1.2.3.4")
            .with_param("server_port", 8388);
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "shadowsocks",
                "tag": "hk-01",
                "server": "1.2.3.4",
                "server_port": 8388,
            })
        );
        let back: OutboundNode = serde_json::from_value(value).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_parse_sip002_link() {
        let node: OutboundNode =
            "ss://YWVzLTI1Ni1nY206MTEx@test.ss.com:30002/?plugin=obfs-local%3Bobfs%3Dhttp%3Bobfs-host%3Dwww.microsoft.com#HK%2001"
                .parse()
                .unwrap();
        assert_eq!(node.tag, "HK 01");
        assert_eq!(node.protocol, NodeProtocol::Shadowsocks);
        assert_eq!(node.params["server"], json!("test.ss.com"));
        assert_eq!(node.params["server_port"], json!(30002));
        assert_eq!(node.params["method"], json!("aes-256-gcm"));
        assert_eq!(node.params["password"], json!("111"));
        assert_eq!(node.params["plugin"], json!("obfs-local"));
        assert_eq!(
            node.params["plugin_opts"],
            json!("obfs=http;obfs-host=www.microsoft.com")
        );
    }

    #[test]
    fn test_parse_legacy_ss_link() {
        // base64("aes-128-gcm:secret@10.0.0.1:8388")
        let node: OutboundNode = "ss://YWVzLTEyOC1nY206c2VjcmV0QDEwLjAuMC4xOjgzODg=#legacy"
            .parse()
            .unwrap();
        assert_eq!(node.tag, "legacy");
        assert_eq!(node.params["server"], json!("10.0.0.1"));
        assert_eq!(node.params["method"], json!("aes-128-gcm"));
        assert_eq!(node.params["password"], json!("secret"));
    }

    #[test]
    fn test_parse_trojan_link() {
        let node: OutboundNode =
            "trojan://pass@example.com:443?sni=cdn.example.com&type=ws&path=%2Fws&host=cdn.example.com#tj"
                .parse()
                .unwrap();
        assert_eq!(node.protocol, NodeProtocol::Trojan);
        assert_eq!(node.params["password"], json!("pass"));
        assert_eq!(node.params["tls"]["server_name"], json!("cdn.example.com"));
        assert_eq!(node.params["transport"]["type"], json!("ws"));
        assert_eq!(node.params["transport"]["path"], json!("/ws"));
        assert_eq!(
            node.params["transport"]["headers"]["Host"],
            json!("cdn.example.com")
        );
    }

    #[test]
    fn test_parse_vless_reality_link() {
        let node: OutboundNode = "vless://0b7d4a4c-1111-2222-3333-444455556666@1.2.3.4:443?security=reality&sni=www.apple.com&pbk=KEY&sid=ab&flow=xtls-rprx-vision&fp=safari#v1"
            .parse()
            .unwrap();
        assert_eq!(node.protocol, NodeProtocol::Vless);
        assert_eq!(node.params["flow"], json!("xtls-rprx-vision"));
        let tls = &node.params["tls"];
        assert_eq!(tls["server_name"], json!("www.apple.com"));
        assert_eq!(tls["reality"]["public_key"], json!("KEY"));
        assert_eq!(tls["reality"]["short_id"], json!("ab"));
        assert_eq!(tls["utls"]["fingerprint"], json!("safari"));
        assert!(!node.params.contains_key("transport"));
    }

    #[test]
    fn test_parse_socks_and_http_links() {
        let node: OutboundNode = "socks5://user:pw@127.0.0.1:1080".parse().unwrap();
        assert_eq!(node.tag, "127.0.0.1:1080");
        assert_eq!(node.protocol, NodeProtocol::Socks);
        assert_eq!(node.params["username"], json!("user"));
        assert_eq!(node.params["password"], json!("pw"));

        let node: OutboundNode = "https://proxy.example.com#web".parse().unwrap();
        assert_eq!(node.protocol, NodeProtocol::Http);
        assert_eq!(node.params["server_port"], json!(443));
        assert_eq!(node.params["tls"]["enabled"], json!(true));
    }

    #[test]
    fn test_reject_bad_links() {
        assert_eq!(
            "vmess://abc".parse::<OutboundNode>(),
            Err(ParseError::UnsupportedScheme("vmess".to_string()))
        );
        assert!(matches!(
            "not a link".parse::<OutboundNode>(),
            Err(ParseError::InvalidLink(_))
        ));
        assert_eq!(
            "ss://!!!".parse::<OutboundNode>(),
            Err(ParseError::InvalidBase64)
        );
    }
}
