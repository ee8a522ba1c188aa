use crate::error::{MinqError, Result};
use std::fmt::{self, Display};

/// A typed field selector for document type `D`, rendering to the exact
/// storage key the driver's own serializer produces for that field.
///
/// Implemented by the `Fields` enums that `#[derive(Document)]` and
/// `#[derive(Embedded)]` generate; nested variants render dotted paths.
/// [`FieldPath`] is the untyped escape hatch for keys that only exist at
/// runtime.
pub trait FieldKey<D>: Display {}

/// A storage-level field path that was not derived from a typed selector.
///
/// Use this sparingly; the `Fields` enums are checked at compile time, while
/// a `FieldPath` is only validated for structural sanity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(String);

impl FieldPath {
    /// Validates and wraps a dotted storage path. Empty paths, empty
    /// segments, and operator-looking (`$`-prefixed) segments cannot be
    /// compiled to a storage key.
    pub fn parse(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(MinqError::Render {
                reason: "field path is empty".into(),
            });
        }

        for segment in path.split('.') {
            if segment.is_empty() {
                return Err(MinqError::Render {
                    reason: format!("field path `{path}` contains an empty segment"),
                });
            }

            if segment.starts_with('$') {
                return Err(MinqError::Render {
                    reason: format!("field path `{path}` contains an operator segment `{segment}`"),
                });
            }
        }

        Ok(Self(path.to_owned()))
    }

    /// The reserved identifier key.
    pub fn id() -> Self {
        Self("_id".into())
    }

    /// The storage key of the creation timestamp stamped by `insert`.
    pub fn created_on() -> Self {
        Self("created".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// A dynamic path may address any document type.
impl<D> FieldKey<D> for FieldPath {}

/// Joins a storage key onto an optional dotted prefix. Used by the
/// derive-generated field scanners.
#[doc(hidden)]
pub fn join_key(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}.{key}"),
        None => key.to_owned(),
    }
}

/// Logged by the generated field scanners when an embedded document sits
/// deeper than the scan bound; its fields are skipped rather than scanned.
#[doc(hidden)]
pub fn scan_depth_exceeded(prefix: &str) {
    tracing::warn!(
        field = prefix,
        "embedded document exceeds the field scan depth; its indexes and search fields are ignored"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_dotted_paths() {
        assert_eq!(FieldPath::parse("profile.city").unwrap().as_str(), "profile.city");
    }

    #[test]
    fn parse_rejects_empty_path() {
        assert!(matches!(FieldPath::parse(""), Err(MinqError::Render { .. })));
    }

    #[test]
    fn parse_rejects_empty_segment() {
        assert!(matches!(FieldPath::parse("a..b"), Err(MinqError::Render { .. })));
    }

    #[test]
    fn parse_rejects_operator_segment() {
        assert!(matches!(FieldPath::parse("a.$set"), Err(MinqError::Render { .. })));
    }
}
