use anyhow::{anyhow, bail, Context, Result};
use config::{Settings, SettingsProvider};
use serde_json::Value;

use crate::Store;

const SETTINGS_KEY: &str = "settings";

impl Store {
    /// The stored settings, or the defaults when nothing was saved yet.
    pub fn settings(&self) -> Result<Settings> {
        match self.get_value(SETTINGS_KEY)? {
            Some(value) => serde_json::from_str(&value).context("decode stored settings"),
            None => Ok(Settings::default()),
        }
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let value = serde_json::to_string(settings)?;
        self.set_value(SETTINGS_KEY, &value)
    }

    /// Merge the keys of `patch` over the stored settings. Unknown keys and
    /// values of the wrong type are rejected and nothing is written.
    pub fn update_settings(&self, patch: Value) -> Result<Settings> {
        let Value::Object(patch) = patch else {
            bail!("settings patch must be a JSON object");
        };
        let mut current = match serde_json::to_value(self.settings()?)? {
            Value::Object(map) => map,
            _ => return Err(anyhow!("settings do not serialize to an object")),
        };
        for (key, value) in patch {
            let Some(slot) = current.get_mut(&key) else {
                bail!("unknown setting `{}`", key);
            };
            *slot = value;
        }
        let settings: Settings = serde_json::from_value(Value::Object(current))
            .context("invalid settings value")?;
        self.save_settings(&settings)?;
        tracing::info!("settings updated");
        Ok(settings)
    }
}

impl SettingsProvider for Store {
    fn get_settings(&self) -> Result<Settings> {
        self.settings()
    }

    fn set_settings(&self, patch: Value) -> Result<Settings> {
        self.update_settings(patch)
    }
}
