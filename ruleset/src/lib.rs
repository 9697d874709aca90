//! Local cache of binary rule-set artifacts: downloads through a list of
//! mirrors, rejects payloads that are not rule-sets and reports which
//! enabled rule-sets are ready to be referenced by the kernel.

mod error;
pub mod manifest;
pub mod mirror;
mod provisioner;
pub mod transport;
pub mod validate;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use error::{FetchError, ManifestError, ProvisionError};
pub use manifest::Manifest;
pub use mirror::Mirror;
pub use provisioner::{ProvisionReport, Provisioned, Provisioner, Readiness};
pub use transport::{fetch, RawResponse, Transport, UreqTransport};

pub const RULE_SET_DIR: &str = "rulesets";
pub const MANIFEST_FILE: &str = "rulesets.json";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    pub cache_root: PathBuf,
    #[serde(with = "config::duration", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(default = "mirror::default_mirrors")]
    pub mirrors: Vec<Mirror>,
}

impl ProvisionerConfig {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        ProvisionerConfig {
            cache_root: cache_root.into(),
            timeout: DEFAULT_TIMEOUT,
            mirrors: mirror::default_mirrors(),
        }
    }

    pub fn rule_set_dir(&self) -> PathBuf {
        self.cache_root.join(RULE_SET_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.cache_root.join(MANIFEST_FILE)
    }
}
