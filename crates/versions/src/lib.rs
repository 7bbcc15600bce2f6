//! A nullable, partially-ordered software version.
//!
//! Deployed applications pin their dependencies with version strings of the
//! form `major[.minor[.patch]][-preview]`. A *shorter* string is a floating
//! constraint and deliberately out-ranks a longer one: `4` > `4.18` >
//! `4.18.0` > `4.18.0-rc`. Strings that don't parse still participate as
//! opaque values: they are equal only to themselves, and every fail-soft
//! predicate against them answers `false`.

use std::cmp::Ordering;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref VERSION_RE: Regex =
        Regex::new(r"^(\d+)(\.(\d+))?(\.(\d+))?(-(.+))?$").unwrap();
}

/// Parsed numeric components of a version string.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Parts {
    major: u64,
    minor: Option<u64>,
    patch: Option<u64>,
    preview: Option<String>,
}

/// A version parsed from a string, or the absence of one.
///
/// `Version` carries its raw string alongside the parsed components.
/// Equality is raw-string identity (`"4.0"` and `"4.0.0"` are distinct),
/// while the total order compares components with missing-outranks-present
/// semantics and tie-breaks on the raw string so that `Ord` and `Eq` agree.
#[derive(Debug, Clone, Default)]
pub struct Version {
    raw: Option<String>,
    parts: Option<Parts>,
}

impl Version {
    /// The absent version. Compares equal only to other absent versions.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let parts = VERSION_RE.captures(&raw).map(|caps| Parts {
            major: caps[1].parse().unwrap_or(0),
            minor: caps.get(3).and_then(|m| m.as_str().parse().ok()),
            patch: caps.get(5).and_then(|m| m.as_str().parse().ok()),
            preview: caps.get(7).map(|m| m.as_str().to_owned()),
        });
        Self {
            raw: Some(raw),
            parts,
        }
    }

    /// Whether the raw string parsed as a version.
    pub fn exists(&self) -> bool {
        self.parts.is_some()
    }

    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    /// The raw string, suitable as a dedup key.
    pub fn raw_key(&self) -> Option<String> {
        self.raw.clone()
    }

    pub fn major(&self) -> Option<u64> {
        self.parts.as_ref().map(|p| p.major)
    }

    pub fn minor(&self) -> Option<u64> {
        self.parts.as_ref().and_then(|p| p.minor)
    }

    pub fn patch(&self) -> Option<u64> {
        self.parts.as_ref().and_then(|p| p.patch)
    }

    pub fn preview(&self) -> Option<&str> {
        self.parts.as_ref().and_then(|p| p.preview.as_deref())
    }

    fn soft_cmp(&self, other: &Version) -> Option<Ordering> {
        match (&self.parts, &other.parts) {
            (Some(a), Some(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// `self > other`, `false` when either side is unparseable.
    pub fn newer_than<V: Into<Version>>(&self, other: V) -> bool {
        self.soft_cmp(&other.into()) == Some(Ordering::Greater)
    }

    /// `self < other`, `false` when either side is unparseable.
    pub fn older_than<V: Into<Version>>(&self, other: V) -> bool {
        self.soft_cmp(&other.into()) == Some(Ordering::Less)
    }

    /// `self >= other`, `false` when either side is unparseable.
    /// Equality here is string identity, as everywhere else.
    pub fn at_least<V: Into<Version>>(&self, other: V) -> bool {
        let other = other.into();
        match self.soft_cmp(&other) {
            Some(Ordering::Greater) => true,
            Some(_) => self.raw == other.raw,
            None => false,
        }
    }

    /// `self <= other`, `false` when either side is unparseable.
    pub fn at_most<V: Into<Version>>(&self, other: V) -> bool {
        let other = other.into();
        match self.soft_cmp(&other) {
            Some(Ordering::Less) => true,
            Some(_) => self.raw == other.raw,
            None => false,
        }
    }

    /// String-identical and both parseable.
    pub fn same_as<V: Into<Version>>(&self, other: V) -> bool {
        let other = other.into();
        self.exists() && other.exists() && self.raw == other.raw
    }

    /// Distinct strings and both parseable. Note: NOT the negation of
    /// [`Version::same_as`], since both answer `false` on unparseable input.
    pub fn differs_from<V: Into<Version>>(&self, other: V) -> bool {
        let other = other.into();
        self.exists() && other.exists() && self.raw != other.raw
    }
}

impl Parts {
    fn cmp(&self, other: &Parts) -> Ordering {
        self.major
            .cmp(&other.major)
            .then_with(|| cmp_missing_high(&self.minor, &other.minor))
            .then_with(|| cmp_missing_high(&self.patch, &other.patch))
            .then_with(|| cmp_missing_high(&self.preview, &other.preview))
    }
}

/// A missing component out-ranks any present one.
fn cmp_missing_high<T: Ord>(a: &Option<T>, b: &Option<T>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x.cmp(y),
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Version {}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.parts, &other.parts) {
            // Unparseable versions sort below every parseable one, and
            // among themselves by raw string for determinism.
            (None, None) => self.raw.cmp(&other.raw),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b).then_with(|| self.raw.cmp(&other.raw)),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.raw {
            Some(raw) => f.write_str(raw),
            None => f.write_str("None"),
        }
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Version::parse(s)
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Version::parse(s)
    }
}

impl From<Option<String>> for Version {
    fn from(s: Option<String>) -> Self {
        match s {
            Some(s) => Version::parse(s),
            None => Version::empty(),
        }
    }
}

impl From<&Version> for Version {
    fn from(v: &Version) -> Self {
        v.clone()
    }
}

impl serde::Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.raw {
            Some(raw) => serializer.serialize_str(raw),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_components() {
        let v = Version::parse("4.18.3-preview.1");
        assert!(v.exists());
        assert_eq!(v.major(), Some(4));
        assert_eq!(v.minor(), Some(18));
        assert_eq!(v.patch(), Some(3));
        assert_eq!(v.preview(), Some("preview.1"));

        let v = Version::parse("4");
        assert_eq!(v.major(), Some(4));
        assert_eq!(v.minor(), None);
        assert_eq!(v.patch(), None);
        assert_eq!(v.preview(), None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(!Version::parse("").exists());
        assert!(!Version::parse("v4.1").exists());
        assert!(!Version::parse("four").exists());
        assert!(!Version::parse("1.2.3.4").exists());
        assert!(!Version::empty().exists());
    }

    #[test]
    fn missing_component_outranks_present() {
        // The canonical chain: 4 > 4.18 > 4.18.0 > 4.18.0-rc.
        assert!(Version::parse("4").newer_than("4.18"));
        assert!(Version::parse("4.18").newer_than("4.18.0"));
        assert!(Version::parse("4.18.0").newer_than("4.18.0-rc"));
        assert!(Version::parse("4.18.0-rc").older_than("4"));

        // Present previews compare lexicographically.
        assert!(Version::parse("1.0.0-rc2").newer_than("1.0.0-rc1"));
    }

    #[test]
    fn numeric_not_lexicographic() {
        assert!(Version::parse("4.9").older_than("4.10"));
        assert!(Version::parse("10.0.0").newer_than("9.9.9"));
    }

    #[test]
    fn unparseable_comparisons_are_all_false() {
        let bad = Version::parse("not-a-version");
        let good = Version::parse("1.0.0");
        assert!(!bad.newer_than(&good));
        assert!(!bad.older_than(&good));
        assert!(!bad.at_least(&good));
        assert!(!bad.at_most(&good));
        assert!(!bad.same_as(&good));
        assert!(!bad.differs_from(&good));
        assert!(!good.newer_than(&bad));
        assert!(!good.older_than(&bad));
        assert!(!good.same_as(&bad));
        // Fail-soft identity: even an unparseable string is not `same_as` itself.
        assert!(!bad.same_as(&bad));
    }

    #[test]
    fn equality_is_string_identity() {
        assert_eq!(Version::parse("4.0"), Version::parse("4.0"));
        assert_ne!(Version::parse("4.0"), Version::parse("4.0.0"));
        assert_eq!(Version::empty(), Version::empty());
        assert_ne!(Version::empty(), Version::parse("4.0"));
        // Unparseable versions are equal only to themselves.
        assert_eq!(Version::parse("junk"), Version::parse("junk"));
        assert_ne!(Version::parse("junk"), Version::parse("other junk"));
    }

    #[test]
    fn total_order_is_antisymmetric_and_transitive() {
        let samples = [
            Version::empty(),
            Version::parse("junk"),
            Version::parse("1"),
            Version::parse("1.0"),
            Version::parse("1.0.0"),
            Version::parse("1.0.0-rc"),
            Version::parse("2.3"),
            Version::parse("2.3.1"),
            Version::parse("10"),
        ];
        for a in &samples {
            for b in &samples {
                match a.cmp(b) {
                    Ordering::Less => assert_eq!(b.cmp(a), Ordering::Greater),
                    Ordering::Greater => assert_eq!(b.cmp(a), Ordering::Less),
                    Ordering::Equal => assert_eq!(a, b),
                }
                for c in &samples {
                    if a.cmp(b) != Ordering::Greater && b.cmp(c) != Ordering::Greater {
                        assert_ne!(a.cmp(c), Ordering::Greater, "{a} <= {b} <= {c}");
                    }
                }
            }
        }
    }

    #[test]
    fn sort_descending_puts_floating_versions_first() {
        let mut versions = vec![
            Version::parse("4.18.0-rc"),
            Version::parse("4.18.0"),
            Version::parse("4"),
            Version::parse("4.18"),
        ];
        versions.sort_by(|a, b| b.cmp(a));
        let raw: Vec<_> = versions.iter().map(|v| v.raw().unwrap()).collect();
        assert_eq!(raw, vec!["4", "4.18", "4.18.0", "4.18.0-rc"]);
    }
}
