//! JSON adapters that derive a tag from their filename.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::json::JsonDoc;
use crate::FileEntry;

lazy_static! {
    static ref APPSETTINGS_RE: Regex =
        Regex::new(r"appsettings(\.([^.]+))?\.json$").unwrap();
    static ref TEXT_RESOURCE_RE: Regex =
        Regex::new(r"resource\.([a-z]{2})\.json$").unwrap();
}

/// `appsettings[.<env>].json`, tagged with the environment from its
/// filename (`default` for the untagged file).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppSettings {
    doc: JsonDoc,
    environment: Option<String>,
}

impl AppSettings {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entry(entry: &FileEntry) -> Self {
        AppSettings {
            doc: JsonDoc::from_entry(entry),
            environment: environment_from_path(&entry.path),
        }
    }

    pub fn exists(&self) -> bool {
        self.doc.exists()
    }

    pub fn doc(&self) -> &JsonDoc {
        &self.doc
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }
}

pub(crate) fn environment_from_path(path: &str) -> Option<String> {
    let captures = APPSETTINGS_RE.captures(path)?;
    Some(
        captures
            .get(2)
            .map(|tag| tag.as_str().to_owned())
            .unwrap_or_else(|| "default".to_owned()),
    )
}

impl fmt::Display for AppSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.doc.fmt(f)
    }
}

/// `resource.<lang>.json` text bundle, tagged with its language code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextResource {
    doc: JsonDoc,
    language: Option<String>,
}

impl TextResource {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entry(entry: &FileEntry) -> Self {
        TextResource {
            doc: JsonDoc::from_entry(entry),
            language: TEXT_RESOURCE_RE
                .captures(&entry.path)
                .and_then(|captures| captures.get(1))
                .map(|lang| lang.as_str().to_owned()),
        }
    }

    pub fn exists(&self) -> bool {
        self.doc.exists()
    }

    pub fn doc(&self) -> &JsonDoc {
        &self.doc
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// The ids of every text resource in the bundle.
    pub fn ids(&self) -> seq::Seq<String> {
        self.doc
            .query(".resources[].id")
            .map(|node| node.as_str().unwrap_or_default())
    }
}

impl fmt::Display for TextResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.doc.fmt(f)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;

    fn entry(path: &str, body: &str) -> FileEntry {
        FileEntry {
            bytes: Bytes::copy_from_slice(body.as_bytes()),
            path: path.to_owned(),
            remote_url: format!("https://example.test{path}"),
        }
    }

    #[test]
    fn environment_tags() {
        assert_eq!(
            environment_from_path("my-app/App/appsettings.json").as_deref(),
            Some("default")
        );
        assert_eq!(
            environment_from_path("my-app/App/appsettings.Staging.json").as_deref(),
            Some("Staging")
        );
        assert_eq!(environment_from_path("my-app/App/other.json"), None);
    }

    #[test]
    fn text_resource_language() {
        let resource = TextResource::from_entry(&entry(
            "my-app/App/config/texts/resource.nb.json",
            r#"{"language": "nb", "resources": [{"id": "title", "value": "Skjema"}]}"#,
        ));
        assert!(resource.exists());
        assert_eq!(resource.language(), Some("nb"));
        assert_eq!(resource.ids().list(), vec!["title".to_owned()]);
    }
}
