use crate::{now, Store};
use anyhow::Result;
use rusqlite::OptionalExtension;

/// Cached subscription payloads are dropped after 90 days.
const REMOTE_CONFIG_CACHE_TTL: u64 = 60 * 60 * 24 * 90;

// region: remote config cache
impl Store {
    pub fn get_cached_remote_config_data(&self, remote_url: &str) -> Result<Option<Vec<u8>>> {
        self.get_cached_remote_config_data_at(remote_url, now())
    }

    fn get_cached_remote_config_data_at(
        &self,
        remote_url: &str,
        at: u64,
    ) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            r#"SELECT data, last_update FROM {} WHERE url = ?"#,
            Self::TABLE_REMOTE_CONFIG_CACHE
        ))?;
        let ret = stmt
            .query_row((remote_url,), |row| {
                Ok((
                    row.get::<_, Vec<u8>>("data")?,
                    row.get::<_, u64>("last_update")?,
                ))
            })
            .optional()?;
        let Some((data, last_update)) = ret else {
            return Ok(None);
        };
        if last_update + REMOTE_CONFIG_CACHE_TTL < at {
            tracing::debug!("cached payload of {} expired", remote_url);
            self.delete_cached_data(remote_url)?;
            return Ok(None);
        }
        Ok(Some(data))
    }

    pub fn cache_remote_config_data(&self, url: &str, data: &[u8]) -> Result<()> {
        self.cache_remote_config_data_at(url, data, now())
    }

    fn cache_remote_config_data_at(&self, url: &str, data: &[u8], at: u64) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            r#"INSERT OR REPLACE INTO {} (url, data, last_update) VALUES (?, ?, ?)"#,
            Self::TABLE_REMOTE_CONFIG_CACHE
        ))?;
        let _affected = stmt.execute((url, data, at))?;
        self.delete_expired_data(at)?;
        Ok(())
    }

    fn delete_cached_data(&self, url: &str) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            r#"DELETE FROM {} WHERE url = ?"#,
            Self::TABLE_REMOTE_CONFIG_CACHE
        ))?;
        let _affected = stmt.execute((url,))?;
        Ok(())
    }

    fn delete_expired_data(&self, at: u64) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            r#"DELETE FROM {} WHERE last_update < ?"#,
            Self::TABLE_REMOTE_CONFIG_CACHE
        ))?;
        let _affected = stmt.execute([at.saturating_sub(REMOTE_CONFIG_CACHE_TTL)])?;
        Ok(())
    }
}
// endregion: remote config cache

#[cfg(test)]
mod tests {
    use super::*;

    const SUBSCRIPTION: &str = "https://sub.example.com/link/abc";

    #[test]
    fn test_cache_remote_config_data() -> Result<()> {
        let store = Store::new_in_memory()?;
        let data = store.get_cached_remote_config_data(SUBSCRIPTION)?;
        assert!(data.is_none());
        let data = b"dHJvamFuOi8vcEBoOjQ0Mw==".to_vec();
        store.cache_remote_config_data(SUBSCRIPTION, &data)?;
        let data2 = store.get_cached_remote_config_data(SUBSCRIPTION)?;
        assert_eq!(data2, Some(data));
        Ok(())
    }

    #[test]
    fn test_cache_expires() -> Result<()> {
        let store = Store::new_in_memory()?;
        let day = 60 * 60 * 24;
        store.cache_remote_config_data_at(SUBSCRIPTION, b"old", 1_000 * day)?;
        assert_eq!(
            store.get_cached_remote_config_data_at(SUBSCRIPTION, 1_089 * day)?,
            Some(b"old".to_vec())
        );
        assert_eq!(
            store.get_cached_remote_config_data_at(SUBSCRIPTION, 1_091 * day)?,
            None
        );
        // the expired row is gone for good
        assert_eq!(
            store.get_cached_remote_config_data_at(SUBSCRIPTION, 1_000 * day)?,
            None
        );
        Ok(())
    }

    #[test]
    fn test_caching_prunes_expired_rows() -> Result<()> {
        let store = Store::new_in_memory()?;
        let day = 60 * 60 * 24;
        store.cache_remote_config_data_at("https://a", b"a", 10 * day)?;
        store.cache_remote_config_data_at("https://b", b"b", 200 * day)?;
        assert_eq!(store.get_cached_remote_config_data_at("https://a", 10 * day)?, None);
        assert_eq!(
            store.get_cached_remote_config_data_at("https://b", 200 * day)?,
            Some(b"b".to_vec())
        );
        Ok(())
    }
}
