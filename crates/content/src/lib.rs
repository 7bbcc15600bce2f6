//! Content adapters over archive members.
//!
//! Every adapter follows the same family contract: an empty instance is a
//! well-formed value that `exists() == false`, compares equal only to
//! other empty instances, renders as `None`, and answers every query with
//! an empty sequence. Hard parse failures therefore never escape to the
//! caller — they surface as empty adapters.

pub mod code;
pub mod html;
pub mod json;
pub mod layout;
pub mod settings;
pub mod text;
pub mod xml;

pub use code::{ClassQuery, CodeQuery, Lang, MethodQuery, ObjectCreationQuery, Program, RuleHandler, Snippet, SourceFile};
pub use html::Html;
pub use json::JsonDoc;
pub use layout::{Component, Layout, LayoutSet, LayoutSetMeta, LayoutSets, LayoutSettings, RuleConfiguration};
pub use settings::{AppSettings, TextResource};
pub use text::TextDoc;
pub use xml::{Process, ProcessTask, XmlDoc};

/// One archive member handed to an adapter: its bytes, its path inside
/// the archive, and the rendered permalink into the source repository.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub bytes: bytes::Bytes,
    pub path: String,
    pub remote_url: String,
}
