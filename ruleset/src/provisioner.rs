use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_std::fs;
use async_std::task;
use config::rule_set::{cached_artifact_path, is_valid_tag, ARTIFACT_EXTENSION};
use config::{RuleSetDescriptor, RuleSetSource};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::instrument;

use crate::error::ProvisionError;
use crate::mirror;
use crate::transport::{fetch, Transport, UreqTransport};
use crate::validate::{looks_like_html, validate};
use crate::ProvisionerConfig;

type Attempt = Shared<BoxFuture<'static, Result<PathBuf, ProvisionError>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioned {
    /// Downloaded and written to the cache.
    Fetched(PathBuf),
    /// Local rule-sets are never downloaded.
    NotApplicable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub succeeded: usize,
    pub failed: usize,
    /// `(tag, reason)` for each failed rule-set.
    pub failures: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readiness {
    pub ready: Vec<String>,
    pub missing: Vec<String>,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Keeps rule-set artifacts in `<cache_root>/rulesets`.
#[derive(Clone)]
pub struct Provisioner {
    config: Arc<ProvisionerConfig>,
    transport: Arc<dyn Transport>,
    in_flight: Arc<Mutex<HashMap<String, Attempt>>>,
}

impl Provisioner {
    pub fn new(config: ProvisionerConfig, transport: Arc<dyn Transport>) -> Self {
        Provisioner {
            config: Arc::new(config),
            transport,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_ureq(config: ProvisionerConfig) -> Self {
        let transport = Arc::new(UreqTransport::new(config.timeout));
        Self::new(config, transport)
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.config.rule_set_dir()
    }

    pub fn local_path_for(&self, tag: &str) -> PathBuf {
        cached_artifact_path(&self.cache_dir(), tag)
    }

    pub fn is_cached_locally(&self, tag: &str) -> bool {
        self.local_path_for(tag).exists()
    }

    /// A cached artifact is trusted when it is non-empty and not a saved
    /// html page.
    async fn has_valid_cache(&self, tag: &str) -> bool {
        if !is_valid_tag(tag) {
            return false;
        }
        match fs::read(self.local_path_for(tag)).await {
            Ok(data) => !data.is_empty() && !looks_like_html(&data),
            Err(_) => false,
        }
    }

    #[instrument(skip(self, descriptor), fields(tag = %descriptor.tag))]
    pub async fn provision_one(
        &self,
        descriptor: &RuleSetDescriptor,
    ) -> Result<Provisioned, ProvisionError> {
        let Some(url) = descriptor.url() else {
            return Ok(Provisioned::NotApplicable);
        };
        let tag = descriptor.tag.clone();
        if !is_valid_tag(&tag) {
            return Err(ProvisionError::InvalidTag(tag));
        }

        let attempt = {
            let mut in_flight = self.in_flight.lock();
            if let Some(attempt) = in_flight.get(&tag) {
                tracing::debug!("joining in-flight download");
                attempt.clone()
            } else {
                let this = self.clone();
                let url = url.to_string();
                let key = tag.clone();
                let attempt = async move { this.download(&key, &url).await }
                    .boxed()
                    .shared();
                in_flight.insert(tag.clone(), attempt.clone());
                attempt
            }
        };
        let result = attempt.clone().await;

        let mut in_flight = self.in_flight.lock();
        if in_flight.get(&tag).is_some_and(|a| a.ptr_eq(&attempt)) {
            in_flight.remove(&tag);
        }
        result.map(Provisioned::Fetched)
    }

    async fn download(&self, tag: &str, url: &str) -> Result<PathBuf, ProvisionError> {
        fs::create_dir_all(self.cache_dir())
            .await
            .map_err(ProvisionError::io)?;

        let mut attempts = Vec::new();
        for candidate in mirror::candidates(&self.config.mirrors, url) {
            match self.fetch_validated(&candidate).await {
                Ok(payload) => {
                    let path = self.local_path_for(tag);
                    write_atomically(&path, &payload)
                        .await
                        .map_err(ProvisionError::io)?;
                    tracing::info!(url = %candidate, bytes = payload.len(), "rule-set downloaded");
                    return Ok(path);
                }
                Err(e) => {
                    tracing::warn!("{}", e);
                    attempts.push(e);
                }
            }
        }
        Err(ProvisionError::Exhausted {
            tag: tag.to_string(),
            attempts,
        })
    }

    async fn fetch_validated(&self, url: &str) -> Result<Vec<u8>, ProvisionError> {
        let transport = self.transport.clone();
        let target = url.to_string();
        let payload = task::spawn_blocking(move || fetch(transport.as_ref(), &target))
            .await
            .map_err(|source| ProvisionError::Fetch {
                url: url.to_string(),
                source,
            })?;
        validate(&payload).map_err(|reason| ProvisionError::Rejected {
            url: url.to_string(),
            reason,
        })?;
        Ok(payload)
    }

    /// Make sure every enabled remote rule-set is cached, one at a time.
    /// `on_progress(tag, index, total)` is called before each one, `index`
    /// starting at 1. A failure does not stop the batch.
    #[instrument(skip_all)]
    pub async fn provision_all<F>(
        &self,
        descriptors: &[RuleSetDescriptor],
        mut on_progress: F,
    ) -> ProvisionReport
    where
        F: FnMut(&str, usize, usize),
    {
        let targets: Vec<&RuleSetDescriptor> = descriptors
            .iter()
            .filter(|d| d.enabled && d.is_remote())
            .collect();
        let total = targets.len();
        let mut report = ProvisionReport::default();

        for (index, descriptor) in targets.into_iter().enumerate() {
            on_progress(&descriptor.tag, index + 1, total);
            if self.has_valid_cache(&descriptor.tag).await {
                tracing::debug!(tag = %descriptor.tag, "rule-set cached");
                report.succeeded += 1;
                continue;
            }
            match self.provision_one(descriptor).await {
                Ok(_) => report.succeeded += 1,
                Err(e) => {
                    tracing::error!(tag = %descriptor.tag, "provision rule-set: {}", e);
                    report.failed += 1;
                    report.failures.push((descriptor.tag.clone(), e.to_string()));
                }
            }
        }
        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "rule-set provisioning finished"
        );
        report
    }

    /// Which enabled rule-sets have an artifact on disk. Never downloads.
    pub fn check_readiness(&self, descriptors: &[RuleSetDescriptor]) -> Readiness {
        let mut readiness = Readiness::default();
        for descriptor in descriptors.iter().filter(|d| d.enabled) {
            let available = match &descriptor.source {
                RuleSetSource::Remote { .. } => {
                    is_valid_tag(&descriptor.tag) && self.is_cached_locally(&descriptor.tag)
                }
                RuleSetSource::Local { path } => path.exists(),
            };
            if available {
                readiness.ready.push(descriptor.tag.clone());
            } else {
                readiness.missing.push(descriptor.tag.clone());
            }
        }
        readiness
    }
}

/// Readers of `path` see either the old file or the complete new one.
async fn write_atomically(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension(format!("{ARTIFACT_EXTENSION}.part"));
    fs::write(&tmp, data).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}
