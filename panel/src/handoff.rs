use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use generator::ConfigDocument;

/// Receives each generated document.
pub trait DocumentSink {
    fn hand_off(&self, document: &ConfigDocument) -> Result<()>;
}

/// Writes the document where the kernel reads it. The previous file stays
/// in place until the new one is complete.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSink { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentSink for FileSink {
    fn hand_off(&self, document: &ConfigDocument) -> Result<()> {
        let json = document.to_json_pretty()?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.part");
        fs::write(&tmp, json.as_bytes()).with_context(|| format!("write {:?}", tmp))?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e).with_context(|| format!("replace {:?}", self.path));
        }
        tracing::info!("configuration written to {:?}", self.path);
        Ok(())
    }
}

pub struct StdoutSink;

impl DocumentSink for StdoutSink {
    fn hand_off(&self, document: &ConfigDocument) -> Result<()> {
        let json = document.to_json_pretty()?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
