use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use config::rule_set::is_builtin_tag;
use config::{NodeListProvider, RuleAction, RuleSetDescriptor, SettingsProvider};
use generator::ConfigDocument;
use ruleset::{Manifest, ProvisionReport, Provisioner, ProvisionerConfig, Readiness};
use serde_json::{Map, Value};
use store::Store;

use crate::handoff::DocumentSink;

/// Everything a command needs: persistent state, the rule-set manifest and
/// the provisioner working in the data directory.
pub struct App {
    store: Store,
    provisioner: Provisioner,
    manifest_path: PathBuf,
}

impl App {
    pub fn new(store: Store, provisioner: Provisioner) -> Self {
        let manifest_path = provisioner.config().manifest_path();
        App {
            store,
            provisioner,
            manifest_path,
        }
    }

    pub fn open(db_path: &Path, config: ProvisionerConfig) -> Result<Self> {
        let store = Store::new(db_path).with_context(|| format!("open db {:?}", db_path))?;
        Ok(Self::new(store, Provisioner::with_ureq(config)))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    pub fn manifest(&self) -> Result<Manifest> {
        Manifest::load(&self.manifest_path)
            .with_context(|| format!("load rule-set manifest {:?}", self.manifest_path))
    }

    pub async fn provision<F>(&self, on_progress: F) -> Result<ProvisionReport>
    where
        F: FnMut(&str, usize, usize),
    {
        let manifest = self.manifest()?;
        Ok(self
            .provisioner
            .provision_all(manifest.rule_sets(), on_progress)
            .await)
    }

    pub fn readiness(&self) -> Result<Readiness> {
        let manifest = self.manifest()?;
        Ok(self.provisioner.check_readiness(manifest.rule_sets()))
    }

    /// Build the document from the current state. User rule-sets whose
    /// artifact is not on disk are left out so the kernel never references
    /// a missing file.
    pub fn generate(&self) -> Result<ConfigDocument> {
        let settings = self.store.get_settings()?;
        let nodes = self.store.list_nodes()?;
        let active = self.store.active_node_tag()?;
        let manifest = self.manifest()?;
        let readiness = self.provisioner.check_readiness(manifest.rule_sets());

        let rule_sets: Vec<RuleSetDescriptor> = manifest
            .rule_sets()
            .iter()
            .filter(|d| d.built_in || readiness.ready.contains(&d.tag))
            .cloned()
            .collect();
        for tag in readiness.missing.iter().filter(|t| !is_builtin_tag(t)) {
            tracing::warn!("rule-set {} is not available, skipped", tag);
        }

        Ok(generator::generate_with_rule_sets(
            &settings,
            &nodes,
            active.as_deref(),
            &rule_sets,
            &self.provisioner.cache_dir(),
        ))
    }

    pub fn generate_to(&self, sink: &dyn DocumentSink) -> Result<()> {
        let document = self.generate()?;
        sink.hand_off(&document)
    }

    /// Provision, then generate and hand off. Failed rule-sets are reported
    /// and do not stop the run.
    pub async fn run<F>(&self, sink: &dyn DocumentSink, on_progress: F) -> Result<ProvisionReport>
    where
        F: FnMut(&str, usize, usize),
    {
        let report = self.provision(on_progress).await?;
        for (tag, reason) in &report.failures {
            tracing::warn!("rule-set {} not provisioned: {}", tag, reason);
        }
        self.generate_to(sink)?;
        Ok(report)
    }

    pub fn set_settings(&self, pairs: &[String]) -> Result<config::Settings> {
        let patch = settings_patch(pairs)?;
        self.store.set_settings(patch)
    }

    pub fn select_node(&self, tag: &str) -> Result<()> {
        let nodes = self.store.list_nodes()?;
        let Some(node) = nodes.iter().find(|n| n.tag == tag) else {
            bail!("no node named {}", tag);
        };
        if !node.is_proxy_capable() {
            bail!("node {} ({}) cannot be selected", tag, node.protocol);
        }
        self.store.set_active_node_tag(Some(tag))
    }
}

/// `key=value` pairs to a settings patch. Values are read as JSON and fall
/// back to plain strings, so `local_port=2080` and `tun_stack=system` both
/// work.
pub fn settings_patch(pairs: &[String]) -> Result<Value> {
    let mut patch = Map::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("expected key=value, got `{}`", pair);
        };
        let value = serde_json::from_str(value.trim())
            .unwrap_or_else(|_| Value::String(value.trim().to_string()));
        patch.insert(key.trim().to_string(), value);
    }
    Ok(Value::Object(patch))
}

/// `direct`, `proxy`, `block`, `node:<tag>` or `profile:<name>`.
pub fn parse_action(s: &str) -> Result<RuleAction> {
    let action = match s.split_once(':') {
        None => match s {
            "direct" => RuleAction::Direct,
            "proxy" => RuleAction::Proxy,
            "block" => RuleAction::Block,
            _ => bail!("unknown action `{}`", s),
        },
        Some(("node", tag)) if !tag.is_empty() => RuleAction::Node(tag.to_string()),
        Some(("profile", name)) if !name.is_empty() => RuleAction::Profile(name.to_string()),
        Some(_) => bail!("unknown action `{}`", s),
    };
    Ok(action)
}

pub fn describe_action(action: &RuleAction) -> String {
    match action {
        RuleAction::Direct => "direct".to_string(),
        RuleAction::Proxy => "proxy".to_string(),
        RuleAction::Block => "block".to_string(),
        RuleAction::Node(tag) => format!("node:{tag}"),
        RuleAction::Profile(name) => format!("profile:{name}"),
    }
}
