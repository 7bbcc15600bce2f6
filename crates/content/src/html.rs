//! The `Index.cshtml` home view, scanned as text.

use std::fmt;

use seq::Seq;

use crate::text::TextDoc;
use crate::FileEntry;

/// The HTML view that bootstraps the frontend. Facts are extracted by
/// regex rather than by parsing Razor-flavored markup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Html {
    text: TextDoc,
}

impl Html {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entry(entry: &FileEntry) -> Self {
        Html {
            text: TextDoc::from_entry(entry),
        }
    }

    pub fn exists(&self) -> bool {
        self.text.exists()
    }

    pub fn text(&self) -> &TextDoc {
        &self.text
    }

    /// `src` attributes of every `<script>` tag.
    pub fn script_sources(&self) -> Seq<String> {
        self.text
            .find_all(r#"<script[^>]*\bsrc="([^"]+)""#, 1)
    }

    pub fn find_all(&self, pattern: &str, group: usize) -> Seq<String> {
        self.text.find_all(pattern, group)
    }

    pub fn first(&self, pattern: &str, group: usize) -> Option<String> {
        self.text.first(pattern, group)
    }
}

impl fmt::Display for Html {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.text.fmt(f)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extracts_script_sources() {
        let html = Html {
            text: TextDoc::from_text(
                r#"<html><head>
                <script src="https://altinncdn.no/toolkits/altinn-app-frontend/4.18.0/altinn-app-frontend.js"></script>
                <script defer src="/local.js"></script>
                </head></html>"#,
            ),
        };
        assert_eq!(
            html.script_sources().list(),
            vec![
                "https://altinncdn.no/toolkits/altinn-app-frontend/4.18.0/altinn-app-frontend.js"
                    .to_owned(),
                "/local.js".to_owned(),
            ]
        );
        assert!(Html::empty().script_sources().is_empty());
    }
}
