use serde::{Deserialize, Serialize};

const RAW_GITHUB: &str = "https://raw.githubusercontent.com/";
const JSDELIVR_HOSTS: [&str; 3] = [
    "https://cdn.jsdelivr.net/gh/",
    "https://fastly.jsdelivr.net/gh/",
    "https://testingcf.jsdelivr.net/gh/",
];
const JSDELIVR: &str = "https://cdn.jsdelivr.net/gh/";

/// A way of deriving a download candidate from a rule-set url.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mirror {
    /// The url itself, with known mirror prefixes rewritten back to
    /// raw.githubusercontent.com.
    Canonical,
    /// jsDelivr's GitHub CDN. Only applies to GitHub raw urls.
    JsDelivr,
    /// A proxy that takes the full url after its own prefix,
    /// e.g. `https://ghproxy.net/`.
    Prefix(String),
}

pub fn default_mirrors() -> Vec<Mirror> {
    vec![Mirror::Canonical, Mirror::JsDelivr]
}

fn from_jsdelivr(url: &str) -> Option<String> {
    let rest = JSDELIVR_HOSTS
        .iter()
        .find_map(|host| url.strip_prefix(host))?;
    // owner/repo@branch/path
    let (owner, rest) = rest.split_once('/')?;
    let (repo_ref, path) = rest.split_once('/')?;
    let (repo, branch) = repo_ref.split_once('@')?;
    Some(format!("{RAW_GITHUB}{owner}/{repo}/{branch}/{path}"))
}

/// Undo the known mirror rewrites so every strategy starts from the same url.
pub fn canonicalize(url: &str) -> String {
    let url = url.trim();
    if let Some(raw) = from_jsdelivr(url) {
        return raw;
    }
    // ghproxy style: https://proxy.example/https://raw.githubusercontent.com/...
    if !url.starts_with(RAW_GITHUB) {
        if let Some(pos) = url.find(RAW_GITHUB) {
            return url[pos..].to_string();
        }
    }
    url.to_string()
}

fn to_jsdelivr(canonical: &str) -> Option<String> {
    let rest = canonical.strip_prefix(RAW_GITHUB)?;
    let mut parts = rest.splitn(4, '/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let repo = parts.next().filter(|s| !s.is_empty())?;
    let branch = parts.next().filter(|s| !s.is_empty())?;
    let path = parts.next().filter(|s| !s.is_empty())?;
    Some(format!("{JSDELIVR}{owner}/{repo}@{branch}/{path}"))
}

impl Mirror {
    pub fn candidate(&self, url: &str) -> Option<String> {
        let canonical = canonicalize(url);
        match self {
            Mirror::Canonical => Some(canonical),
            Mirror::JsDelivr => to_jsdelivr(&canonical),
            Mirror::Prefix(prefix) if prefix.trim().is_empty() => None,
            Mirror::Prefix(prefix) => Some(format!("{}{}", prefix.trim(), canonical)),
        }
    }
}

/// Ordered download candidates for `url`, duplicates removed. Falls back to
/// the url itself when no strategy applies.
pub fn candidates(mirrors: &[Mirror], url: &str) -> Vec<String> {
    let mut ret: Vec<String> = Vec::new();
    for candidate in mirrors.iter().filter_map(|m| m.candidate(url)) {
        if !ret.contains(&candidate) {
            ret.push(candidate);
        }
    }
    if ret.is_empty() {
        ret.push(url.trim().to_string());
    }
    ret
}
