use anyhow::{Context, Result};
use config::{NodeListProvider, OutboundNode};

use crate::Store;

const ACTIVE_NODE_KEY: &str = "active_node";

// region: nodes
impl Store {
    pub fn nodes(&self) -> Result<Vec<OutboundNode>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            r#"SELECT tag, data FROM {} ORDER BY position"#,
            Self::TABLE_NODES
        ))?;
        let rows = stmt.query_map((), |row| {
            Ok((row.get::<_, String>("tag")?, row.get::<_, String>("data")?))
        })?;
        let mut nodes = Vec::new();
        for row in rows {
            let (tag, data) = row?;
            let node: OutboundNode =
                serde_json::from_str(&data).with_context(|| format!("decode node {}", tag))?;
            nodes.push(node);
        }
        Ok(nodes)
    }

    /// Replace the whole node list, keeping the given order. Duplicate tags
    /// fail the call and leave the stored list untouched.
    pub fn replace_nodes(&self, nodes: &[OutboundNode]) -> Result<()> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        tx.execute(&format!(r#"DELETE FROM {}"#, Self::TABLE_NODES), ())?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                r#"INSERT INTO {} (position, tag, data) VALUES (?, ?, ?)"#,
                Self::TABLE_NODES
            ))?;
            for (position, node) in nodes.iter().enumerate() {
                let data = serde_json::to_string(node)?;
                stmt.execute((position as i64, &node.tag, &data))
                    .with_context(|| format!("insert node {}", node.tag))?;
            }
        }
        tx.commit()?;
        tracing::info!("stored {} nodes", nodes.len());
        Ok(())
    }

    pub fn active_node(&self) -> Result<Option<String>> {
        self.get_value(ACTIVE_NODE_KEY)
    }

    pub fn set_active_node_tag(&self, tag: Option<&str>) -> Result<()> {
        match tag {
            Some(tag) => self.set_value(ACTIVE_NODE_KEY, tag),
            None => self.delete_value(ACTIVE_NODE_KEY),
        }
    }
}
// endregion: nodes

impl NodeListProvider for Store {
    fn list_nodes(&self) -> Result<Vec<OutboundNode>> {
        self.nodes()
    }

    fn active_node_tag(&self) -> Result<Option<String>> {
        self.active_node()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::NodeProtocol;

    fn node(tag: &str, protocol: NodeProtocol) -> OutboundNode {
        OutboundNode::new(tag, protocol)
            .with_param("server", "example.com")
            .with_param("server_port", 443)
    }

    #[test]
    fn test_replace_nodes_keeps_order() -> Result<()> {
        let store = Store::new_in_memory()?;
        assert!(store.list_nodes()?.is_empty());

        let nodes = vec![
            node("tokyo", NodeProtocol::Trojan),
            node("berlin", NodeProtocol::Vless),
            node("austin", NodeProtocol::Shadowsocks),
        ];
        store.replace_nodes(&nodes)?;
        assert_eq!(store.list_nodes()?, nodes);

        let nodes = vec![node("zurich", NodeProtocol::Hysteria2)];
        store.replace_nodes(&nodes)?;
        assert_eq!(store.list_nodes()?, nodes);
        Ok(())
    }

    #[test]
    fn test_duplicate_tags_roll_back() -> Result<()> {
        let store = Store::new_in_memory()?;
        let kept = vec![node("a", NodeProtocol::Socks)];
        store.replace_nodes(&kept)?;
        let dup = vec![node("b", NodeProtocol::Http), node("b", NodeProtocol::Http)];
        assert!(store.replace_nodes(&dup).is_err());
        assert_eq!(store.list_nodes()?, kept);
        Ok(())
    }

    #[test]
    fn test_active_node_tag() -> Result<()> {
        let store = Store::new_in_memory()?;
        assert_eq!(store.active_node_tag()?, None);
        store.set_active_node_tag(Some("tokyo"))?;
        assert_eq!(store.active_node_tag()?, Some("tokyo".to_string()));
        store.set_active_node_tag(None)?;
        assert_eq!(store.active_node_tag()?, None);
        Ok(())
    }
}
