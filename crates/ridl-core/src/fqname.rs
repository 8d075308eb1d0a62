//! Fully-qualified names for packages, types and enum values
//!
//! This module is the single source of truth for parsing and matching
//! qualified names across the codebase. The canonical form is
//!
//! - Full: `vendor.graphics@2.1::Surface.Format`
//! - Package only: `vendor.graphics@2.1`
//! - Bare (resolved against the enclosing file): `Surface.Format`
//!
//! The `name` part is a dotted path of type components; an enum value
//! reference addresses its value as the trailing component
//! (`Surface.Format.RGBA`) and is split by [`FqName::split_value`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Package version, `major.minor`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Errors that can occur while parsing a qualified name
#[derive(Debug, Clone, thiserror::Error)]
pub enum FqNameError {
    #[error("empty name")]
    Empty,

    #[error("invalid fully-qualified name: {0}")]
    InvalidFormat(String),

    #[error("invalid version in '{0}', expected 'major.minor'")]
    InvalidVersion(String),
}

/// A possibly-partial qualified name.
///
/// `package` and `version` may be absent (a bare name to be resolved against
/// the current file); `name` may be empty (a whole-package reference).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FqName {
    package: String,
    version: Option<Version>,
    name: String,
}

impl FqName {
    pub fn new(package: impl Into<String>, version: Version, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            version: Some(version),
            name: name.into(),
        }
    }

    /// A bare dotted name with no package or version.
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            package: String::new(),
            version: None,
            name: name.into(),
        }
    }

    /// Parse any of the supported forms (see module docs).
    pub fn parse(s: &str) -> Result<Self, FqNameError> {
        if s.is_empty() {
            return Err(FqNameError::Empty);
        }

        let (head, name) = match s.split_once("::") {
            Some((head, name)) => {
                if name.is_empty() {
                    return Err(FqNameError::InvalidFormat(s.to_string()));
                }
                (head, name)
            }
            // no "::": either "pkg@1.0" or a bare dotted name
            None if s.contains('@') => (s, ""),
            None => ("", s),
        };

        let (package, version) = if head.is_empty() {
            (String::new(), None)
        } else {
            let (package, version) = head
                .split_once('@')
                .ok_or_else(|| FqNameError::InvalidFormat(s.to_string()))?;
            if package.is_empty() {
                return Err(FqNameError::InvalidFormat(s.to_string()));
            }
            (package.to_string(), Some(parse_version(version)?))
        };

        if !valid_path(&package, char::is_alphanumeric) && !package.is_empty() {
            return Err(FqNameError::InvalidFormat(s.to_string()));
        }
        if !name.is_empty() && !valid_path(name, char::is_alphanumeric) {
            return Err(FqNameError::InvalidFormat(s.to_string()));
        }

        Ok(Self {
            package,
            version,
            name: name.to_string(),
        })
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// The dotted type path (may be empty for a whole-package name).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_components(&self) -> impl Iterator<Item = &str> {
        self.name.split('.').filter(|c| !c.is_empty())
    }

    /// The trailing component of the type path.
    pub fn leaf(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or("")
    }

    pub fn is_fully_qualified(&self) -> bool {
        !self.package.is_empty() && self.version.is_some() && !self.name.is_empty()
    }

    /// Bare single-component name, e.g. a local identifier inside an enum.
    pub fn is_identifier(&self) -> bool {
        self.package.is_empty()
            && self.version.is_none()
            && !self.name.is_empty()
            && !self.name.contains('.')
    }

    /// Fill in missing package/version from the enclosing file.
    pub fn with_defaults(&self, package: &str, version: Version) -> Self {
        Self {
            package: if self.package.is_empty() {
                package.to_string()
            } else {
                self.package.clone()
            },
            version: Some(self.version.unwrap_or(version)),
            name: self.name.clone(),
        }
    }

    /// Just the package identity, no type path.
    pub fn package_and_version(&self) -> Self {
        Self {
            package: self.package.clone(),
            version: self.version,
            name: String::new(),
        }
    }

    /// Same package identity as `other`?
    pub fn same_package(&self, other: &FqName) -> bool {
        self.package == other.package && self.version == other.version
    }

    /// The first component of the type path, fully qualified.
    ///
    /// `pkg@1.0::IFoo.Inner` -> `pkg@1.0::IFoo`.
    pub fn top_level_type(&self) -> Self {
        Self {
            package: self.package.clone(),
            version: self.version,
            name: self.name_components().next().unwrap_or("").to_string(),
        }
    }

    /// The shared types file of this name's package.
    pub fn types_for_package(&self) -> Self {
        Self {
            package: self.package.clone(),
            version: self.version,
            name: "types".to_string(),
        }
    }

    /// Replace the type path.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            package: self.package.clone(),
            version: self.version,
            name: name.into(),
        }
    }

    /// Append a nested component to the type path.
    pub fn child(&self, component: &str) -> Self {
        let name = if self.name.is_empty() {
            component.to_string()
        } else {
            format!("{}.{}", self.name, component)
        };
        self.with_name(name)
    }

    /// Split an enum-value reference `Type.Path.VALUE` into the type part
    /// and the value name. Returns `None` for a single bare component.
    pub fn split_value(&self) -> Option<(FqName, &str)> {
        let (type_path, value) = self.name.rsplit_once('.')?;
        Some((self.with_name(type_path), value))
    }

    /// Suffix match on dot-separated component boundaries, used for
    /// partial-name lookup: `Foo.Bar` matches `pkg@1.0::Foo.Bar` and
    /// `pkg@1.0::Outer.Foo.Bar`, but not `pkg@1.0::XFoo.Bar`. If the
    /// partial name carries a package or version, those must match exactly.
    pub fn ends_with(&self, partial: &FqName) -> bool {
        if !partial.package.is_empty() && partial.package != self.package {
            return false;
        }
        if partial.version.is_some() && partial.version != self.version {
            return false;
        }
        if partial.name.is_empty() {
            return true;
        }
        let mine: Vec<&str> = self.name_components().collect();
        let theirs: Vec<&str> = partial.name_components().collect();
        if theirs.len() > mine.len() {
            return false;
        }
        mine[mine.len() - theirs.len()..] == theirs[..]
    }
}

fn parse_version(s: &str) -> Result<Version, FqNameError> {
    let (major, minor) = s
        .split_once('.')
        .ok_or_else(|| FqNameError::InvalidVersion(s.to_string()))?;
    let major = major
        .parse()
        .map_err(|_| FqNameError::InvalidVersion(s.to_string()))?;
    let minor = minor
        .parse()
        .map_err(|_| FqNameError::InvalidVersion(s.to_string()))?;
    Ok(Version { major, minor })
}

fn valid_path(s: &str, head: impl Fn(char) -> bool) -> bool {
    s.split('.').all(|component| {
        let mut chars = component.chars();
        match chars.next() {
            Some(c) if head(c) || c == '_' => chars.all(|c| c.is_alphanumeric() || c == '_'),
            _ => false,
        }
    })
}

impl fmt::Display for FqName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&*self.package, self.version) {
            ("", _) => write!(f, "{}", self.name),
            (pkg, Some(v)) if self.name.is_empty() => write!(f, "{}@{}", pkg, v),
            (pkg, Some(v)) => write!(f, "{}@{}::{}", pkg, v, self.name),
            (pkg, None) => write!(f, "{}::{}", pkg, self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let fq = FqName::parse("vendor.graphics@2.1::Surface.Format").unwrap();
        assert_eq!(fq.package(), "vendor.graphics");
        assert_eq!(fq.version(), Some(Version::new(2, 1)));
        assert_eq!(fq.name(), "Surface.Format");
        assert_eq!(fq.leaf(), "Format");
        assert!(fq.is_fully_qualified());
        assert!(!fq.is_identifier());
    }

    #[test]
    fn test_parse_package_only() {
        let fq = FqName::parse("vendor.graphics@2.1").unwrap();
        assert_eq!(fq.package(), "vendor.graphics");
        assert_eq!(fq.name(), "");
        assert!(!fq.is_fully_qualified());
    }

    #[test]
    fn test_parse_bare() {
        let fq = FqName::parse("Format").unwrap();
        assert!(fq.is_identifier());
        let fq = FqName::parse("Surface.Format").unwrap();
        assert!(!fq.is_identifier());
        assert_eq!(fq.package(), "");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(FqName::parse("").is_err());
        assert!(FqName::parse("pkg@x.y::Foo").is_err());
        assert!(FqName::parse("pkg@1::Foo").is_err());
        assert!(FqName::parse("@1.0::Foo").is_err());
        assert!(FqName::parse("pkg@1.0::").is_err());
        assert!(FqName::parse("pkg@1.0::Foo..Bar").is_err());
    }

    #[test]
    fn test_with_defaults() {
        let fq = FqName::bare("Foo").with_defaults("pkg", Version::new(1, 0));
        assert_eq!(fq.to_string(), "pkg@1.0::Foo");

        let qualified = FqName::parse("other@2.0::Foo").unwrap();
        let fq = qualified.with_defaults("pkg", Version::new(1, 0));
        assert_eq!(fq.to_string(), "other@2.0::Foo");
    }

    #[test]
    fn test_top_level_and_types() {
        let fq = FqName::parse("pkg@1.0::IFoo.Inner").unwrap();
        assert_eq!(fq.top_level_type().to_string(), "pkg@1.0::IFoo");
        assert_eq!(fq.types_for_package().to_string(), "pkg@1.0::types");
    }

    #[test]
    fn test_split_value() {
        let fq = FqName::parse("pkg@1.0::Format.RGBA").unwrap();
        let (ty, value) = fq.split_value().unwrap();
        assert_eq!(ty.to_string(), "pkg@1.0::Format");
        assert_eq!(value, "RGBA");

        assert!(FqName::bare("RGBA").split_value().is_none());
    }

    #[test]
    fn test_ends_with() {
        let full = FqName::parse("pkg@1.0::Outer.Foo.Bar").unwrap();
        assert!(full.ends_with(&FqName::bare("Bar")));
        assert!(full.ends_with(&FqName::bare("Foo.Bar")));
        assert!(full.ends_with(&FqName::parse("pkg@1.0::Outer.Foo.Bar").unwrap()));
        assert!(!full.ends_with(&FqName::bare("oo.Bar")));
        assert!(!full.ends_with(&FqName::bare("XFoo.Bar")));
        assert!(!full.ends_with(&FqName::parse("other@1.0::Bar").unwrap()));
    }

    #[test]
    fn test_display_roundtrip() {
        for s in ["pkg@1.0::Foo", "pkg@1.0", "Foo.Bar"] {
            assert_eq!(FqName::parse(s).unwrap().to_string(), s);
        }
    }
}
