use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use config::rule_set::{builtin_rule_sets, is_builtin_tag, is_valid_tag};
use config::RuleSetDescriptor;

use crate::error::ManifestError;

/// The user's rule-set list, persisted as a JSON array. Built-in rule-sets
/// are always present; missing ones are put back at the front.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    path: PathBuf,
    rule_sets: Vec<RuleSetDescriptor>,
}

impl Manifest {
    /// Load `path`, or start from the built-in rule-sets when it does not
    /// exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ManifestError> {
        let path = path.into();
        let rule_sets = match fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let mut manifest = Manifest { path, rule_sets };
        manifest.ensure_builtins();
        Ok(manifest)
    }

    fn ensure_builtins(&mut self) {
        for descriptor in self.rule_sets.iter_mut() {
            descriptor.built_in = is_builtin_tag(&descriptor.tag);
        }
        for builtin in builtin_rule_sets().into_iter().rev() {
            if self.get(&builtin.tag).is_none() {
                self.rule_sets.insert(0, builtin);
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rule_sets(&self) -> &[RuleSetDescriptor] {
        &self.rule_sets
    }

    pub fn get(&self, tag: &str) -> Option<&RuleSetDescriptor> {
        self.rule_sets.iter().find(|d| d.tag == tag)
    }

    fn get_mut(&mut self, tag: &str) -> Result<&mut RuleSetDescriptor, ManifestError> {
        self.rule_sets
            .iter_mut()
            .find(|d| d.tag == tag)
            .ok_or_else(|| ManifestError::UnknownTag(tag.to_string()))
    }

    pub fn add(&mut self, mut descriptor: RuleSetDescriptor) -> Result<(), ManifestError> {
        if !is_valid_tag(&descriptor.tag) {
            return Err(ManifestError::InvalidTag(descriptor.tag));
        }
        if self.get(&descriptor.tag).is_some() {
            return Err(ManifestError::DuplicateTag(descriptor.tag));
        }
        descriptor.built_in = false;
        self.rule_sets.push(descriptor);
        Ok(())
    }

    pub fn remove(&mut self, tag: &str) -> Result<RuleSetDescriptor, ManifestError> {
        if is_builtin_tag(tag) {
            return Err(ManifestError::BuiltIn(tag.to_string()));
        }
        let pos = self
            .rule_sets
            .iter()
            .position(|d| d.tag == tag)
            .ok_or_else(|| ManifestError::UnknownTag(tag.to_string()))?;
        Ok(self.rule_sets.remove(pos))
    }

    pub fn set_enabled(&mut self, tag: &str, enabled: bool) -> Result<(), ManifestError> {
        self.get_mut(tag)?.enabled = enabled;
        Ok(())
    }

    pub fn save(&self) -> Result<(), ManifestError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(&self.rule_sets)?;
        let tmp = self.path.with_extension("json.part");
        fs::write(&tmp, data)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::rule_set::{GEOIP_CN, GEOSITE_ADS, GEOSITE_CN};
    use config::RuleAction;

    fn builtin_tags(manifest: &Manifest) -> Vec<&str> {
        manifest.rule_sets()[..3]
            .iter()
            .map(|d| d.tag.as_str())
            .collect()
    }

    #[test]
    fn test_missing_file_gives_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::load(dir.path().join("rulesets.json")).unwrap();
        assert_eq!(manifest.rule_sets().len(), 3);
        assert_eq!(builtin_tags(&manifest), vec![GEOSITE_CN, GEOIP_CN, GEOSITE_ADS]);
        assert!(manifest.rule_sets().iter().all(|d| d.built_in));
    }

    #[test]
    fn test_add_remove_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rulesets.json");
        let mut manifest = Manifest::load(&path).unwrap();

        manifest
            .add(RuleSetDescriptor::remote(
                "streaming",
                "Streaming",
                "https://e.com/streaming.srs",
                RuleAction::Node("us-1".to_string()),
            ))
            .unwrap();
        manifest
            .add(RuleSetDescriptor::local("work", "Work", "/etc/work.srs", RuleAction::Direct))
            .unwrap();
        manifest.set_enabled("work", false).unwrap();
        manifest.set_enabled(GEOSITE_ADS, false).unwrap();
        manifest.save().unwrap();
        assert!(!path.with_extension("json.part").exists());

        let loaded = Manifest::load(&path).unwrap();
        assert_eq!(loaded.rule_sets(), manifest.rule_sets());
        assert!(!loaded.get("work").unwrap().enabled);
        assert!(!loaded.get(GEOSITE_ADS).unwrap().enabled);
        assert_eq!(
            loaded.get("streaming").unwrap().action,
            RuleAction::Node("us-1".to_string())
        );

        let mut loaded = loaded;
        let removed = loaded.remove("streaming").unwrap();
        assert_eq!(removed.tag, "streaming");
        assert!(loaded.get("streaming").is_none());
    }

    #[test]
    fn test_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = Manifest::load(dir.path().join("m.json")).unwrap();
        let dup = RuleSetDescriptor::remote(GEOIP_CN, "x", "https://e.com/x.srs", RuleAction::Proxy);
        assert!(matches!(manifest.add(dup), Err(ManifestError::DuplicateTag(_))));
        let bad = RuleSetDescriptor::remote("a/b", "x", "https://e.com/x.srs", RuleAction::Proxy);
        assert!(matches!(manifest.add(bad), Err(ManifestError::InvalidTag(_))));
        assert!(matches!(manifest.remove(GEOSITE_CN), Err(ManifestError::BuiltIn(_))));
        assert!(matches!(manifest.remove("nope"), Err(ManifestError::UnknownTag(_))));
        assert!(matches!(
            manifest.set_enabled("nope", true),
            Err(ManifestError::UnknownTag(_))
        ));
    }

    #[test]
    fn test_missing_builtins_reinserted_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rulesets.json");
        std::fs::write(
            &path,
            r#"[
                {"tag": "mine", "name": "Mine", "type": "local", "path": "/m.srs", "action": "block"},
                {"tag": "geoip-cn", "name": "China IPs", "type": "remote",
                 "url": "https://mirror.example/geoip-cn.srs", "enabled": false}
            ]"#,
        )
        .unwrap();
        let manifest = Manifest::load(&path).unwrap();
        let tags: Vec<&str> = manifest.rule_sets().iter().map(|d| d.tag.as_str()).collect();
        assert_eq!(tags, vec![GEOSITE_CN, GEOSITE_ADS, "mine", GEOIP_CN]);
        let geoip = manifest.get(GEOIP_CN).unwrap();
        assert!(geoip.built_in);
        assert!(!geoip.enabled);
        assert_eq!(geoip.url(), Some("https://mirror.example/geoip-cn.srs"));
    }

    #[test]
    fn test_corrupt_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rulesets.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(Manifest::load(&path), Err(ManifestError::Parse(_))));
    }
}
