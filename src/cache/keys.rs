//! Cache key definitions
//!
//! List views are keyed by query shape only. Every shape lives under
//! [`LIST_KEY_PREFIX`], so a single prefix sweep drops all of them.
//! Keys use dots rather than colons so they are valid NATS KV keys.

use std::fmt;

/// Prefix shared by every cached list view
pub const LIST_KEY_PREFIX: &str = "items.list.";

/// Shape of a list query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryShape {
    /// The entire list
    All,
    /// The first N items, newest first (N > 0)
    First(u32),
}

impl QueryShape {
    /// Map a requested limit to its shape; `None` and `Some(0)` mean everything
    pub fn from_limit(limit: Option<u32>) -> Self {
        match limit {
            None | Some(0) => Self::All,
            Some(n) => Self::First(n),
        }
    }

    /// The row bound to pass to the store
    pub fn limit(&self) -> Option<u32> {
        match self {
            Self::All => None,
            Self::First(n) => Some(*n),
        }
    }

    /// Convert to storage key string
    /// Format: items.list.all or items.list.first.N
    pub fn storage_key(&self) -> String {
        match self {
            Self::All => format!("{}all", LIST_KEY_PREFIX),
            Self::First(n) => format!("{}first.{}", LIST_KEY_PREFIX, n),
        }
    }

    /// Parse a storage key back into a shape
    pub fn from_storage_key(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(LIST_KEY_PREFIX)?;
        if rest == "all" {
            return Some(Self::All);
        }
        let n: u32 = rest.strip_prefix("first.")?.parse().ok()?;
        (n > 0).then_some(Self::First(n))
    }
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::First(n) => write!(f, "first({})", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_and_absent_limit_share_a_key() {
        assert_eq!(QueryShape::from_limit(None), QueryShape::All);
        assert_eq!(QueryShape::from_limit(Some(0)), QueryShape::All);
        assert_eq!(
            QueryShape::from_limit(None).storage_key(),
            QueryShape::from_limit(Some(0)).storage_key()
        );
    }

    #[test]
    fn test_storage_keys() {
        assert_eq!(QueryShape::All.storage_key(), "items.list.all");
        assert_eq!(QueryShape::First(3).storage_key(), "items.list.first.3");
        assert_ne!(
            QueryShape::First(3).storage_key(),
            QueryShape::First(30).storage_key()
        );
    }

    #[test]
    fn test_every_shape_is_under_the_prefix() {
        for shape in [QueryShape::All, QueryShape::First(1), QueryShape::First(500)] {
            assert!(shape.storage_key().starts_with(LIST_KEY_PREFIX));
        }
    }

    #[test]
    fn test_key_parses_back() {
        for shape in [QueryShape::All, QueryShape::First(7)] {
            assert_eq!(QueryShape::from_storage_key(&shape.storage_key()), Some(shape));
        }
        assert_eq!(QueryShape::from_storage_key("items.list.first.0"), None);
        assert_eq!(QueryShape::from_storage_key("todo:abc"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(QueryShape::All.to_string(), "all");
        assert_eq!(QueryShape::First(3).to_string(), "first(3)");
    }
}
