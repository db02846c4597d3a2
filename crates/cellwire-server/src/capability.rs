//! Capability URLs.
//!
//! Knowing the URL is the only credential a client needs, so tokens are
//! random UUIDs unless configured explicitly. A root is reached at
//! `/<token>/radio`.

use std::collections::HashMap;

use cellwire_core::BlockRef;
use cellwire_stream::RootResolver;
use tracing::debug;
use uuid::Uuid;

/// Path segment under a token naming the exported root.
pub const ROOT_SEGMENT: &str = "radio";

/// Token to root table handed to the connection driver.
#[derive(Debug, Default)]
pub struct CapabilityTable {
    roots: HashMap<String, BlockRef>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant access to `root` under a fresh random token.
    pub fn issue(&mut self, root: BlockRef) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.grant(token.clone(), root);
        token
    }

    /// Grant access to `root` under `token`, replacing any earlier grant.
    pub fn grant(&mut self, token: impl Into<String>, root: BlockRef) {
        self.roots.insert(token.into(), root);
    }

    pub fn revoke(&mut self, token: &str) -> bool {
        self.roots.remove(token).is_some()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// The path a client sends to reach the root granted under `token`.
    pub fn path_for(token: &str) -> String {
        format!("/{token}/{ROOT_SEGMENT}")
    }
}

impl RootResolver for CapabilityTable {
    fn resolve(&self, path: &str) -> Option<BlockRef> {
        let mut segments = path.trim_matches('/').split('/');
        let token = segments.next()?;
        let root = match (segments.next(), segments.next()) {
            (Some(ROOT_SEGMENT), None) => self.roots.get(token).cloned(),
            _ => None,
        };
        if root.is_none() {
            debug!(path, "capability path did not resolve");
        }
        root
    }
}

#[cfg(test)]
mod tests {
    use cellwire_core::StateNode;

    use super::*;

    #[test]
    fn issued_token_resolves_its_root() {
        let root = StateNode::builder().into_block();
        let mut table = CapabilityTable::new();
        let token = table.issue(root.clone());

        assert_eq!(token.len(), 32);
        let path = CapabilityTable::path_for(&token);
        assert_eq!(table.resolve(&path), Some(root.clone()));
        assert_eq!(table.resolve(&format!("{path}/")), Some(root));
    }

    #[test]
    fn wrong_token_or_segment_is_rejected() {
        let mut table = CapabilityTable::new();
        table.grant("abc", StateNode::builder().into_block());

        assert!(table.resolve("/abc/radio").is_some());
        assert!(table.resolve("/abd/radio").is_none());
        assert!(table.resolve("/abc/other").is_none());
        assert!(table.resolve("/abc/radio/extra").is_none());
        assert!(table.resolve("/abc").is_none());
        assert!(table.resolve("").is_none());
    }

    #[test]
    fn revoked_token_stops_resolving() {
        let mut table = CapabilityTable::new();
        table.grant("abc", StateNode::builder().into_block());
        assert!(table.revoke("abc"));
        assert!(table.is_empty());
        assert!(table.resolve("/abc/radio").is_none());
    }
}
