//! Names of named schemas (record, error, enum, fixed).
//!
//! A name is resolved once, at construction, against the enclosing default
//! namespace. A dotted name carries its own namespace and ignores both the
//! `namespace` attribute and the default.

use crate::error::SchemaError;
use std::fmt;

/// Separator between namespace components and the short name.
pub const NAME_SEPARATOR: char = '.';

/// Primitive type names. They can never be used as the name of a named schema.
pub const PRIMITIVE_TYPES: [&str; 8] = [
    "null", "boolean", "int", "long", "float", "double", "bytes", "string",
];

/// Returns whether `name` is one of the primitive type names.
pub fn is_primitive_type(name: &str) -> bool {
    PRIMITIVE_TYPES.contains(&name)
}

/// Returns whether `s` matches `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The resolved name of a named schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    name: String,
    namespace: Option<String>,
    fullname: String,
}

impl Name {
    /// Resolves a name from its `name` and `namespace` attributes and the
    /// enclosing default namespace.
    pub fn new(
        name: &str,
        namespace: Option<&str>,
        default_namespace: Option<&str>,
    ) -> Result<Self, SchemaError> {
        let (short, namespace) = match name.rfind(NAME_SEPARATOR) {
            Some(idx) => (&name[idx + 1..], Some(&name[..idx])),
            None => (name, namespace.or(default_namespace)),
        };
        let namespace = namespace.filter(|ns| !ns.is_empty());

        if !is_valid_identifier(short) {
            return Err(SchemaError::InvalidName(name.to_string()));
        }
        if let Some(ns) = namespace {
            if !ns.split(NAME_SEPARATOR).all(is_valid_identifier) {
                return Err(SchemaError::InvalidName(format!("{}{}{}", ns, NAME_SEPARATOR, short)));
            }
        }

        let fullname = match namespace {
            Some(ns) => format!("{}{}{}", ns, NAME_SEPARATOR, short),
            None => short.to_string(),
        };

        Ok(Self {
            name: short.to_string(),
            namespace: namespace.map(str::to_string),
            fullname,
        })
    }

    /// Short name, without namespace.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Globally unique identity within one registry.
    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    /// Returns the short name when this name lives in `default_namespace`,
    /// the fullname otherwise.
    pub fn qualified_name(&self, default_namespace: Option<&str>) -> &str {
        let default_namespace = default_namespace.filter(|ns| !ns.is_empty());
        if self.namespace.as_deref() == default_namespace {
            &self.name
        } else {
            &self.fullname
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fullname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("Foo"));
        assert!(is_valid_identifier("_foo9"));
        assert!(!is_valid_identifier("9foo"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("foo-bar"));
        assert!(!is_valid_identifier("foo.bar"));
    }

    #[test]
    fn test_name_with_default_namespace() {
        let name = Name::new("Link", None, Some("org.example")).unwrap();
        assert_eq!(name.name(), "Link");
        assert_eq!(name.namespace(), Some("org.example"));
        assert_eq!(name.fullname(), "org.example.Link");
    }

    #[test]
    fn test_explicit_namespace_overrides_default() {
        let name = Name::new("Link", Some("a.b"), Some("org.example")).unwrap();
        assert_eq!(name.fullname(), "a.b.Link");
    }

    #[test]
    fn test_dotted_name_ignores_namespace() {
        let name = Name::new("x.y.Link", Some("a.b"), Some("c")).unwrap();
        assert_eq!(name.name(), "Link");
        assert_eq!(name.namespace(), Some("x.y"));
        assert_eq!(name.fullname(), "x.y.Link");
    }

    #[test]
    fn test_empty_namespace_is_none() {
        let name = Name::new("Link", Some(""), Some("org.example")).unwrap();
        assert_eq!(name.namespace(), None);
        assert_eq!(name.fullname(), "Link");
    }

    #[test]
    fn test_qualified_name() {
        let name = Name::new("Link", Some("org.example"), None).unwrap();
        assert_eq!(name.qualified_name(Some("org.example")), "Link");
        assert_eq!(name.qualified_name(Some("other")), "org.example.Link");
        assert_eq!(name.qualified_name(None), "org.example.Link");

        let bare = Name::new("Link", None, None).unwrap();
        assert_eq!(bare.qualified_name(None), "Link");
        assert_eq!(bare.qualified_name(Some("")), "Link");
    }

    #[test]
    fn test_invalid_names() {
        assert!(Name::new("", None, None).is_err());
        assert!(Name::new("1abc", None, None).is_err());
        assert!(Name::new("ok", Some("bad-ns"), None).is_err());
        assert!(Name::new("a..b", None, None).is_err());
    }
}
