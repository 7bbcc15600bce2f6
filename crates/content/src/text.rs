//! Plain-text regex scanning.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use seq::Seq;

use crate::FileEntry;

/// A text file, or the absence of one. Empty files count as absent.
#[derive(Debug, Clone, Default)]
pub struct TextDoc {
    text: Option<Arc<String>>,
    path: Option<String>,
    remote_url: Option<String>,
}

impl TextDoc {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entry(entry: &FileEntry) -> Self {
        let text = String::from_utf8_lossy(&entry.bytes);
        TextDoc {
            text: (!text.is_empty()).then(|| Arc::new(text.into_owned())),
            path: Some(entry.path.clone()),
            remote_url: Some(entry.remote_url.clone()),
        }
    }

    pub fn from_text(text: &str) -> Self {
        TextDoc {
            text: (!text.is_empty()).then(|| Arc::new(text.to_owned())),
            path: None,
            remote_url: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.text.is_some()
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().map(String::as_str)
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    /// All matches of `pattern`, yielding the given capture group.
    /// Malformed patterns are programmer errors and panic.
    pub fn find_all(&self, pattern: &str, group: usize) -> Seq<String> {
        let Some(text) = &self.text else {
            return Seq::empty();
        };
        let regex = Regex::new(pattern)
            .unwrap_or_else(|err| panic!("invalid text pattern {pattern:?}: {err}"));
        let found: Vec<String> = regex
            .captures_iter(text)
            .filter_map(|captures| captures.get(group))
            .map(|group| group.as_str().to_owned())
            .collect();
        Seq::of(found)
    }

    /// First match of `pattern`, yielding the given capture group.
    pub fn first(&self, pattern: &str, group: usize) -> Option<String> {
        self.find_all(pattern, group).first()
    }
}

impl PartialEq for TextDoc {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl PartialOrd for TextDoc {
    /// `None` (all operators `false`) when either side is missing.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.text.as_ref()?.cmp(other.text.as_ref()?))
    }
}

impl fmt::Display for TextDoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.text() {
            Some(text) => f.write_str(text),
            None => f.write_str("None"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scans_with_groups() {
        let doc = TextDoc::from_text("alpha=1 beta=2 gamma=3");
        assert_eq!(
            doc.find_all(r"(\w+)=(\d)", 1).list(),
            vec!["alpha", "beta", "gamma"]
        );
        assert_eq!(doc.first(r"(\w+)=(\d)", 2).as_deref(), Some("1"));
        assert_eq!(doc.first(r"delta=(\d)", 1), None);
    }

    #[test]
    fn empty_text_contract() {
        let empty = TextDoc::empty();
        assert!(!empty.exists());
        assert!(!TextDoc::from_text("").exists());
        assert_eq!(empty, TextDoc::from_text(""));
        assert!(empty.find_all(".", 0).is_empty());
        assert!(!(empty < TextDoc::from_text("a")));
        assert!(TextDoc::from_text("a") < TextDoc::from_text("b"));
    }
}
