//! Instance identifier handling.
//!
//! An instance is an opaque name owned by the gateway. The only rules enforced
//! here are that it is non-blank and, for anything forwarded to the gateway,
//! that it sticks to `[A-Za-z0-9_-]`.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static INSTANCE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("instance pattern is valid"));

/// A trimmed, non-blank instance identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId(String);

impl InstanceId {
    /// Parse a user-supplied identifier, returning `None` when it is blank.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is safe to splice into a gateway path.
    pub fn is_strict(&self) -> bool {
        INSTANCE_PATTERN.is_match(&self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate a raw `instance` query parameter the way the proxy does.
///
/// Rejects missing, blank, and non `[A-Za-z0-9_-]` values. Surrounding
/// whitespace counts as an invalid character.
pub fn validate_query_param(raw: Option<&str>) -> Option<InstanceId> {
    let raw = raw?;
    if raw.trim().is_empty() || !INSTANCE_PATTERN.is_match(raw) {
        return None;
    }
    InstanceId::parse(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims_and_rejects_blank() {
        assert_eq!(InstanceId::parse("  shop42 ").unwrap().as_str(), "shop42");
        assert!(InstanceId::parse("").is_none());
        assert!(InstanceId::parse("   ").is_none());
        assert!(InstanceId::parse("\t\n").is_none());
    }

    #[test]
    fn test_strict_pattern() {
        assert!(InstanceId::parse("shop_42-a").unwrap().is_strict());
        assert!(!InstanceId::parse("shop 42").unwrap().is_strict());
        assert!(!InstanceId::parse("../admin").unwrap().is_strict());
    }

    #[test]
    fn test_validate_query_param() {
        assert!(validate_query_param(None).is_none());
        assert!(validate_query_param(Some("")).is_none());
        assert!(validate_query_param(Some("   ")).is_none());
        assert!(validate_query_param(Some(" shop42")).is_none());
        assert!(validate_query_param(Some("shop42?x=1")).is_none());
        assert_eq!(
            validate_query_param(Some("shop42")).map(|id| id.to_string()),
            Some("shop42".to_string())
        );
    }
}
