use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const GEOSITE_CN: &str = "geosite-cn";
pub const GEOIP_CN: &str = "geoip-cn";
pub const GEOSITE_ADS: &str = "geosite-category-ads-all";

const GEOSITE_BASE: &str = "https://raw.githubusercontent.com/SagerNet/sing-geosite/rule-set";
const GEOIP_BASE: &str = "https://raw.githubusercontent.com/SagerNet/sing-geoip/rule-set";

/// Extension of a cached rule-set artifact.
pub const ARTIFACT_EXTENSION: &str = "srs";

/// Where the artifact of a rule-set comes from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuleSetSource {
    /// Downloaded on demand and cached under the rule-set directory.
    Remote { url: String },
    /// A file the user manages.
    Local { path: PathBuf },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSetFormat {
    #[default]
    Binary,
    Source,
}

/// What happens to traffic matched by a rule-set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Direct,
    #[default]
    Proxy,
    Block,
    /// Route to one node by tag.
    Node(String),
    /// Route to a named profile.
    Profile(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSetDescriptor {
    pub tag: String,
    pub name: String,
    #[serde(flatten)]
    pub source: RuleSetSource,
    #[serde(default)]
    pub format: RuleSetFormat,
    #[serde(default)]
    pub action: RuleAction,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub built_in: bool,
}

fn default_enabled() -> bool {
    true
}

impl RuleSetDescriptor {
    pub fn remote(tag: &str, name: &str, url: &str, action: RuleAction) -> Self {
        RuleSetDescriptor {
            tag: tag.to_string(),
            name: name.to_string(),
            source: RuleSetSource::Remote {
                url: url.to_string(),
            },
            format: RuleSetFormat::Binary,
            action,
            enabled: true,
            built_in: false,
        }
    }

    pub fn local(tag: &str, name: &str, path: impl Into<PathBuf>, action: RuleAction) -> Self {
        RuleSetDescriptor {
            tag: tag.to_string(),
            name: name.to_string(),
            source: RuleSetSource::Local { path: path.into() },
            format: RuleSetFormat::Binary,
            action,
            enabled: true,
            built_in: false,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.source, RuleSetSource::Remote { .. })
    }

    pub fn url(&self) -> Option<&str> {
        match &self.source {
            RuleSetSource::Remote { url } => Some(url),
            RuleSetSource::Local { .. } => None,
        }
    }

    /// Path of the artifact backing this rule-set: the configured file for a
    /// local rule-set, the cache entry for a remote one.
    pub fn artifact_path(&self, cache_dir: &Path) -> PathBuf {
        match &self.source {
            RuleSetSource::Remote { .. } => cached_artifact_path(cache_dir, &self.tag),
            RuleSetSource::Local { path } => path.clone(),
        }
    }
}

/// `<cache_dir>/<tag>.srs`. No I/O.
pub fn cached_artifact_path(cache_dir: &Path, tag: &str) -> PathBuf {
    cache_dir.join(format!("{tag}.{ARTIFACT_EXTENSION}"))
}

/// Tags become file names, so they are limited to a safe charset.
pub fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && !tag.starts_with('.')
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// The rule-sets shipped with the application.
pub fn builtin_rule_sets() -> Vec<RuleSetDescriptor> {
    [
        (GEOSITE_CN, "China sites", RuleAction::Direct),
        (GEOIP_CN, "China IPs", RuleAction::Direct),
        (GEOSITE_ADS, "Ads", RuleAction::Block),
    ]
    .into_iter()
    .filter_map(|(tag, name, action)| {
        builtin_url(tag).map(|url| RuleSetDescriptor {
            built_in: true,
            ..RuleSetDescriptor::remote(tag, name, &url, action)
        })
    })
    .collect()
}

/// Upstream download URL of a built-in rule-set.
pub fn builtin_url(tag: &str) -> Option<String> {
    match tag {
        GEOSITE_CN | GEOSITE_ADS => Some(format!("{GEOSITE_BASE}/{tag}.{ARTIFACT_EXTENSION}")),
        GEOIP_CN => Some(format!("{GEOIP_BASE}/{tag}.{ARTIFACT_EXTENSION}")),
        _ => None,
    }
}

pub fn is_builtin_tag(tag: &str) -> bool {
    builtin_url(tag).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_wire_format() {
        let descriptor = RuleSetDescriptor::remote(
            "netflix",
            "Netflix",
            "https://example.com/netflix.srs",
            RuleAction::Node("us-01".to_string()),
        );
        let value = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(
            value,
            json!({
                "tag": "netflix",
                "name": "Netflix",
                "type": "remote",
                "url": "https://example.com/netflix.srs",
                "format": "binary",
                "action": { "node": "us-01" },
                "enabled": true,
                "built_in": false,
            })
        );
        let back: RuleSetDescriptor = serde_json::from_value(value).unwrap();
        assert_eq!(back, descriptor);
    }

    #[test]
    fn test_minimal_local_descriptor() {
        let descriptor: RuleSetDescriptor = serde_json::from_value(json!({
            "tag": "lan",
            "name": "LAN",
            "type": "local",
            "path": "/etc/rules/lan.srs",
            "action": "direct",
        }))
        .unwrap();
        assert!(!descriptor.is_remote());
        assert!(descriptor.enabled);
        assert!(!descriptor.built_in);
        assert_eq!(descriptor.format, RuleSetFormat::Binary);
        assert_eq!(
            descriptor.artifact_path(Path::new("/cache")),
            PathBuf::from("/etc/rules/lan.srs")
        );
    }

    #[test]
    fn test_cached_artifact_path() {
        assert_eq!(
            cached_artifact_path(Path::new("/cache/rulesets"), GEOIP_CN),
            PathBuf::from("/cache/rulesets/geoip-cn.srs")
        );
    }

    #[test]
    fn test_tag_charset() {
        assert!(is_valid_tag("geosite-cn"));
        assert!(is_valid_tag("my_rules.v2"));
        assert!(!is_valid_tag(""));
        assert!(!is_valid_tag("../etc"));
        assert!(!is_valid_tag("a/b"));
        assert!(!is_valid_tag(".hidden"));
    }

    #[test]
    fn test_builtins() {
        let builtins = builtin_rule_sets();
        let tags: Vec<&str> = builtins.iter().map(|d| d.tag.as_str()).collect();
        assert_eq!(tags, vec![GEOSITE_CN, GEOIP_CN, GEOSITE_ADS]);
        assert!(builtins.iter().all(|d| d.built_in && d.enabled && d.is_remote()));
        assert_eq!(
            builtins[1].url(),
            Some("https://raw.githubusercontent.com/SagerNet/sing-geoip/rule-set/geoip-cn.srs")
        );
        assert_eq!(builtins[2].action, RuleAction::Block);
    }
}
