//! The value type of projections and groupings.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;
use versions::Version;

/// A projected fact about an app or a group: the closed set of values a
/// selector may produce. Totally ordered so any datum can serve as a
/// sort or grouping key.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Version(Version),
    List(Vec<Datum>),
}

impl Datum {
    fn rank(&self) -> u8 {
        match self {
            Datum::Null => 0,
            Datum::Bool(_) => 1,
            Datum::Int(_) | Datum::Float(_) => 2,
            Datum::Str(_) => 3,
            Datum::Version(_) => 4,
            Datum::List(_) => 5,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Datum::Int(value) => Some(*value as f64),
            Datum::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_number()
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Datum {}

impl Ord for Datum {
    fn cmp(&self, other: &Self) -> Ordering {
        use Datum::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (Version(a), Version(b)) => a.cmp(b),
            (List(a), List(b)) => a.cmp(b),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.rank().cmp(&b.rank()),
            },
        }
    }
}

impl PartialOrd for Datum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => f.write_str("None"),
            Datum::Bool(value) => write!(f, "{value}"),
            Datum::Int(value) => write!(f, "{value}"),
            Datum::Float(value) => write!(f, "{value}"),
            Datum::Str(value) => f.write_str(value),
            Datum::Version(value) => write!(f, "{value}"),
            Datum::List(values) => {
                f.write_str("[")?;
                for (at, value) in values.iter().enumerate() {
                    if at > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for Datum {
    fn from(value: bool) -> Self {
        Datum::Bool(value)
    }
}

impl From<i64> for Datum {
    fn from(value: i64) -> Self {
        Datum::Int(value)
    }
}

impl From<u64> for Datum {
    fn from(value: u64) -> Self {
        Datum::Int(value as i64)
    }
}

impl From<usize> for Datum {
    fn from(value: usize) -> Self {
        Datum::Int(value as i64)
    }
}

impl From<f64> for Datum {
    fn from(value: f64) -> Self {
        Datum::Float(value)
    }
}

impl From<&str> for Datum {
    fn from(value: &str) -> Self {
        Datum::Str(value.to_owned())
    }
}

impl From<String> for Datum {
    fn from(value: String) -> Self {
        Datum::Str(value)
    }
}

impl From<Version> for Datum {
    fn from(value: Version) -> Self {
        Datum::Version(value)
    }
}

impl<T: Into<Datum>> From<Option<T>> for Datum {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => Datum::Null,
        }
    }
}

impl<T: Into<Datum>> From<Vec<T>> for Datum {
    fn from(values: Vec<T>) -> Self {
        Datum::List(values.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn total_order_across_kinds() {
        let mut data = vec![
            Datum::from("b"),
            Datum::Null,
            Datum::from(2i64),
            Datum::from(1.5),
            Datum::from("a"),
            Datum::from(true),
        ];
        data.sort();
        assert_eq!(
            data,
            vec![
                Datum::Null,
                Datum::from(true),
                Datum::from(1.5),
                Datum::from(2i64),
                Datum::from("a"),
                Datum::from("b"),
            ]
        );
    }

    #[test]
    fn versions_order_as_versions() {
        let newer = Datum::from(Version::parse("4"));
        let older = Datum::from(Version::parse("4.18"));
        assert!(newer > older);
    }

    #[test]
    fn renders_like_python_str() {
        assert_eq!(Datum::Null.to_string(), "None");
        assert_eq!(Datum::from(3usize).to_string(), "3");
        assert_eq!(
            Datum::from(vec!["8.0.0", "7.5.0"]).to_string(),
            "[8.0.0, 7.5.0]"
        );
    }
}
