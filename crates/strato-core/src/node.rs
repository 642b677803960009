//! Owned-node naming.
//!
//! Every worker node managed by strato is named `<prefix>-<uuid-v4>`. The
//! pattern is the ownership boundary: nodes and VMs whose names do not match
//! are invisible to scaling decisions and are never deleted.

use regex::Regex;
use uuid::Uuid;

/// Lowercase-hex UUID-v4 shape, anchored by [`NodePattern`].
const UUID_RE: &str = "[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}";

/// Matches and mints owned worker-node names.
#[derive(Debug, Clone)]
pub struct NodePattern {
    prefix: String,
    regex: Regex,
}

impl NodePattern {
    /// Build the pattern for a name prefix.
    ///
    /// The prefix is matched literally; the compiled regex is exactly
    /// `^<prefix>-<uuid-v4>$`.
    pub fn new(prefix: impl Into<String>) -> Result<Self, regex::Error> {
        let prefix = prefix.into();
        let regex = Regex::new(&format!("^{}-{UUID_RE}$", regex::escape(&prefix)))?;
        Ok(Self { prefix, regex })
    }

    /// The configured name prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether a node or VM name is owned by this autoscaler.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// Mint a fresh owned node name.
    #[must_use]
    pub fn generate(&self) -> String {
        format!("{}-{}", self.prefix, Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_names_match() {
        let pattern = NodePattern::new("kp-node").unwrap();
        let name = pattern.generate();
        assert!(pattern.matches(&name), "generated name must match: {name}");
    }

    #[test]
    fn foreign_names_do_not_match() {
        let pattern = NodePattern::new("kp-node").unwrap();
        assert!(pattern.matches("kp-node-163c3d58-4c4d-426d-baef-e0c30ecb5fcd"));
        assert!(!pattern.matches("control-plane-01"));
        assert!(!pattern.matches("kp-node-not-a-uuid"));
        assert!(!pattern.matches("kp-node-163c3d58-4c4d-426d-baef"));
        // Prefix must anchor at the start.
        assert!(!pattern.matches("x-kp-node-163c3d58-4c4d-426d-baef-e0c30ecb5fcd"));
        // No trailing content allowed.
        assert!(!pattern.matches("kp-node-163c3d58-4c4d-426d-baef-e0c30ecb5fcd-extra"));
    }

    #[test]
    fn uppercase_hex_is_rejected() {
        let pattern = NodePattern::new("kp-node").unwrap();
        assert!(!pattern.matches("kp-node-163C3D58-4C4D-426D-BAEF-E0C30ECB5FCD"));
    }

    #[test]
    fn prefix_with_regex_metacharacters_is_literal() {
        let pattern = NodePattern::new("kp.node").unwrap();
        assert!(!pattern.matches("kpxnode-163c3d58-4c4d-426d-baef-e0c30ecb5fcd"));
        assert!(pattern.matches("kp.node-163c3d58-4c4d-426d-baef-e0c30ecb5fcd"));
    }

    #[test]
    fn generated_names_are_unique() {
        let pattern = NodePattern::new("kp-node").unwrap();
        assert_ne!(pattern.generate(), pattern.generate());
    }
}
