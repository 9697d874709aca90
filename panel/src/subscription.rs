use std::collections::HashSet;
use std::io::{self, Read};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use config::OutboundNode;
use store::Store;

const SUBSCRIPTION_TIMEOUT: Duration = Duration::from_secs(10);

pub fn read_data_from_remote_config(url: &str) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    let _size = ureq::get(url)
        .timeout(SUBSCRIPTION_TIMEOUT)
        .call()
        .map_err(|e| io::Error::other(format!("read remote config: {e}")))?
        .into_reader()
        .read_to_end(&mut data)?;
    Ok(data)
}

/// Share links often repeat a name; later duplicates get a numeric suffix.
fn dedup_tags(nodes: &mut [OutboundNode]) {
    let mut seen = HashSet::new();
    for node in nodes.iter_mut() {
        if seen.insert(node.tag.clone()) {
            continue;
        }
        let mut n = 2;
        let tag = loop {
            let candidate = format!("{}-{}", node.tag, n);
            if !seen.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };
        seen.insert(tag.clone());
        node.tag = tag;
    }
}

/// Download the subscription at `url` and return its nodes. The raw payload
/// is cached in the store; when the download fails the cached copy is used.
pub fn load_subscription<F>(store: &Store, url: &str, fetch: F) -> Result<Vec<OutboundNode>>
where
    F: FnOnce(&str) -> io::Result<Vec<u8>>,
{
    let data = match fetch(url) {
        Ok(data) => {
            if let Err(e) = store.cache_remote_config_data(url, &data) {
                tracing::warn!("cache remote config `{url}` error: {e}");
            }
            data
        }
        Err(e) => {
            tracing::warn!("load nodes from remote config `{url}` error: {e}");
            let Some(data) = store.get_cached_remote_config_data(url)? else {
                bail!("no cached config for `{url}`");
            };
            tracing::info!("use config for `{url}` from cache instead");
            data
        }
    };
    let mut nodes =
        config::parse_subscription_data(&data).with_context(|| format!("parse config `{url}`"))?;
    dedup_tags(&mut nodes);
    tracing::info!("load {} nodes from remote config `{url}`", nodes.len());
    Ok(nodes)
}
