mod node;
pub mod rule_set;
mod settings;

pub use node::{NodeProtocol, OutboundNode, ParseError};
pub use rule_set::{RuleAction, RuleSetDescriptor, RuleSetFormat, RuleSetSource};
pub use settings::{
    DefaultAction, RoutingMode, Settings, TunStack, DEFAULT_LATENCY_TEST_URL, DEFAULT_LOCAL_DNS,
    DEFAULT_LOCAL_PORT, DEFAULT_REMOTE_DNS,
};

use serde::Deserialize;
use std::fs::File;
use std::io;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::str::FromStr;

const STANDARD_ENGINE: base64::engine::fast_portable::FastPortable =
    base64::engine::fast_portable::FastPortable::from(
        &base64::alphabet::STANDARD,
        base64::engine::fast_portable::FastPortableConfig::new()
            .with_decode_padding_mode(base64::engine::DecodePaddingMode::Indifferent),
    );

const URL_SAFE_ENGINE: base64::engine::fast_portable::FastPortable =
    base64::engine::fast_portable::FastPortable::from(
        &base64::alphabet::URL_SAFE,
        base64::engine::fast_portable::FastPortableConfig::new()
            .with_decode_padding_mode(base64::engine::DecodePaddingMode::Indifferent),
    );

/// Source of the current settings snapshot.
pub trait SettingsProvider {
    fn get_settings(&self) -> anyhow::Result<Settings>;

    /// Merges `patch` (a JSON object holding a subset of the settings keys)
    /// over the current snapshot and returns the new one.
    fn set_settings(&self, patch: serde_json::Value) -> anyhow::Result<Settings>;
}

/// Source of the configured nodes and the user's current pick.
pub trait NodeListProvider {
    fn list_nodes(&self) -> anyhow::Result<Vec<OutboundNode>>;
    fn active_node_tag(&self) -> anyhow::Result<Option<String>>;
}

#[derive(Deserialize)]
struct NodeFile {
    #[serde(alias = "outbounds", alias = "proxies")]
    nodes: Vec<OutboundNode>,
}

pub fn nodes_from_file(path: impl AsRef<Path>) -> io::Result<Vec<OutboundNode>> {
    let file = File::open(path)?;
    nodes_from_reader(file)
}

/// Reads a yaml document with a `nodes` (or `outbounds`) list.
pub fn nodes_from_reader<R: Read>(reader: R) -> io::Result<Vec<OutboundNode>> {
    let file: NodeFile = serde_yaml::from_reader(reader)
        .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
    let mut seen = std::collections::HashSet::new();
    for node in &file.nodes {
        if !seen.insert(node.tag.as_str()) {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("duplicate node tag: {}", node.tag),
            ));
        }
    }
    Ok(file.nodes)
}

pub(crate) fn decode_base64(data: &[u8]) -> Option<Vec<u8>> {
    base64::decode_engine(data, &STANDARD_ENGINE)
        .or_else(|_| base64::decode_engine(data, &URL_SAFE_ENGINE))
        .ok()
}

/// Parses a subscription payload: base64 of newline separated share links.
/// Plain (not encoded) link lists are accepted too. Lines that fail to
/// parse are logged and skipped.
pub fn parse_subscription_data(data: &[u8]) -> Result<Vec<OutboundNode>, ParseError> {
    let compact: Vec<u8> = data
        .iter()
        .copied()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let text = match decode_base64(&compact) {
        Some(decoded) => decoded,
        None if data.windows(3).any(|w| w == b"://") => data.to_vec(),
        None => return Err(ParseError::InvalidBase64),
    };
    let ret = text
        .split(|&c| c == b'\n')
        .filter_map(|line| std::str::from_utf8(line).ok())
        .map(|s| s.trim())
        .filter(|line| !line.is_empty())
        .filter_map(|line| match OutboundNode::from_str(line) {
            Ok(node) => Some(node),
            Err(e) => {
                tracing::error!("build node from link: {}, error: {}", line, e);
                None
            }
        })
        .collect();
    Ok(ret)
}

pub mod duration {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (num, unit) = s.split_at(split);
        let n: u64 = num
            .parse()
            .map_err(|_| format!("invalid value: {}, expected 10s or 10ms", s))?;
        match unit {
            "s" => Ok(Duration::from_secs(n)),
            "ms" => Ok(Duration::from_millis(n)),
            "m" => Ok(Duration::from_secs(n * 60)),
            _ => Err(format!("invalid value: {}, expected 10s or 10ms", s)),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        parse_duration(&s)
            .map_err(|_| Error::invalid_value(serde::de::Unexpected::Str(&s), &"10s or 10ms"))
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }
}
