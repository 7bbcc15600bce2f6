//! The layout-set family: UI layouts, their settings, and rule scripts.
//!
//! A `LayoutSets` document (when present) binds named sets; otherwise a
//! single default set is synthesized from the fixed `/App/ui/` paths.
//! Only the parent owns its children — a child carries its set's id, not
//! a reference back, which keeps the content graph acyclic.

use std::fmt;

use seq::Seq;
use serde_json::Value;

use crate::code::RuleHandler;
use crate::json::JsonDoc;
use crate::FileEntry;

/// A component or layout `hidden` property can be a literal or a dynamic
/// expression (an array); either makes the element hideable.
fn hideable(hidden: &JsonDoc) -> bool {
    match hidden.value() {
        Some(Value::Bool(value)) => *value,
        Some(Value::Array(_)) => true,
        _ => false,
    }
}

/// One component of a layout page: a JSON object with `id` and `type`.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    node: JsonDoc,
    layout_set_id: Option<String>,
}

impl Component {
    pub fn new(node: JsonDoc, layout_set_id: Option<String>) -> Self {
        Component {
            node,
            layout_set_id,
        }
    }

    pub fn exists(&self) -> bool {
        self.node.exists()
    }

    pub fn id(&self) -> Option<String> {
        self.node.first(".id").as_str()
    }

    /// The component type tag, e.g. `Input` or `FileUpload`.
    pub fn kind(&self) -> Option<String> {
        self.node.first(".type").as_str()
    }

    pub fn can_be_hidden(&self) -> bool {
        hideable(&self.node.first(".hidden"))
    }

    pub fn layout_set_id(&self) -> Option<&str> {
        self.layout_set_id.as_deref()
    }

    pub fn node(&self) -> &JsonDoc {
        &self.node
    }

    pub fn query(&self, query: &str) -> Seq<JsonDoc> {
        self.node.query(query)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.node.fmt(f)
    }
}

/// One layout page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Layout {
    doc: JsonDoc,
    layout_set_id: Option<String>,
}

impl Layout {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entry(entry: &FileEntry, layout_set_id: Option<String>) -> Self {
        Layout {
            doc: JsonDoc::from_entry(entry),
            layout_set_id,
        }
    }

    pub fn exists(&self) -> bool {
        self.doc.exists()
    }

    pub fn doc(&self) -> &JsonDoc {
        &self.doc
    }

    pub fn schema(&self) -> Option<String> {
        self.doc.schema()
    }

    pub fn layout_set_id(&self) -> Option<&str> {
        self.layout_set_id.as_deref()
    }

    pub fn can_be_hidden(&self) -> bool {
        hideable(&self.doc.first(".data.hidden"))
    }

    pub fn components(&self) -> Seq<Component> {
        let layout_set_id = self.layout_set_id.clone();
        self.doc
            .query(".data.layout[]")
            .map(move |node| Component::new(node, layout_set_id.clone()))
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.doc.fmt(f)
    }
}

/// `Settings.json` of one layout set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayoutSettings {
    doc: JsonDoc,
    layout_set_id: Option<String>,
}

impl LayoutSettings {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entry(entry: &FileEntry, layout_set_id: Option<String>) -> Self {
        LayoutSettings {
            doc: JsonDoc::from_entry(entry),
            layout_set_id,
        }
    }

    pub fn exists(&self) -> bool {
        self.doc.exists()
    }

    pub fn doc(&self) -> &JsonDoc {
        &self.doc
    }

    pub fn layout_set_id(&self) -> Option<&str> {
        self.layout_set_id.as_deref()
    }

    /// The declared page order, when present.
    pub fn page_order(&self) -> Seq<String> {
        self.doc
            .query(".pages.order[]")
            .map(|node| node.as_str().unwrap_or_default())
    }
}

impl fmt::Display for LayoutSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.doc.fmt(f)
    }
}

/// `RuleConfiguration.json` of one layout set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleConfiguration {
    doc: JsonDoc,
    layout_set_id: Option<String>,
}

impl RuleConfiguration {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entry(entry: &FileEntry, layout_set_id: Option<String>) -> Self {
        RuleConfiguration {
            doc: JsonDoc::from_entry(entry),
            layout_set_id,
        }
    }

    pub fn exists(&self) -> bool {
        self.doc.exists()
    }

    pub fn doc(&self) -> &JsonDoc {
        &self.doc
    }

    pub fn layout_set_id(&self) -> Option<&str> {
        self.layout_set_id.as_deref()
    }
}

impl fmt::Display for RuleConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.doc.fmt(f)
    }
}

/// Metadata of a named set from `layout-sets.json`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayoutSetMeta {
    pub id: String,
    pub data_type: Option<String>,
    pub tasks: Vec<String>,
}

impl LayoutSetMeta {
    pub fn from_node(node: &JsonDoc) -> Option<LayoutSetMeta> {
        Some(LayoutSetMeta {
            id: node.first(".id").as_str()?,
            data_type: node.first(".dataType").as_str(),
            tasks: node
                .query(".tasks[]")
                .list()
                .into_iter()
                .filter_map(|task| task.as_str())
                .collect(),
        })
    }
}

/// One logical layout set: its layouts, at most one settings document, at
/// most one rule configuration, and at most one rule-handler script.
#[derive(Debug, Clone, Default)]
pub struct LayoutSet {
    meta: Option<LayoutSetMeta>,
    layouts: Seq<Layout>,
    settings: Seq<LayoutSettings>,
    rule_configuration: Seq<RuleConfiguration>,
    rule_handler: Seq<RuleHandler>,
}

impl LayoutSet {
    pub fn new(
        meta: Option<LayoutSetMeta>,
        layouts: Seq<Layout>,
        settings: Seq<LayoutSettings>,
        rule_configuration: Seq<RuleConfiguration>,
        rule_handler: Seq<RuleHandler>,
    ) -> Self {
        LayoutSet {
            meta,
            layouts,
            settings,
            rule_configuration,
            rule_handler,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.meta.as_ref().map(|meta| meta.id.as_str())
    }

    pub fn data_type(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|meta| meta.data_type.as_deref())
    }

    pub fn tasks(&self) -> &[String] {
        self.meta.as_ref().map(|meta| meta.tasks.as_slice()).unwrap_or(&[])
    }

    pub fn layouts(&self) -> Seq<Layout> {
        self.layouts.clone()
    }

    /// The set's settings document, empty when absent.
    pub fn settings(&self) -> LayoutSettings {
        self.settings.first_or(LayoutSettings::empty())
    }

    pub fn rule_configuration(&self) -> RuleConfiguration {
        self.rule_configuration.first_or(RuleConfiguration::empty())
    }

    pub fn rule_handler(&self) -> RuleHandler {
        self.rule_handler.first_or(RuleHandler::empty())
    }
}

/// The `layout-sets.json` document plus the realized sets (which may be
/// the single synthesized default set when the document is absent).
#[derive(Debug, Clone, Default)]
pub struct LayoutSets {
    doc: JsonDoc,
    sets: Seq<LayoutSet>,
}

impl LayoutSets {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entry(entry: &FileEntry) -> Self {
        LayoutSets {
            doc: JsonDoc::from_entry(entry),
            sets: Seq::empty(),
        }
    }

    /// Whether `layout-sets.json` itself exists (not whether any set does).
    pub fn exists(&self) -> bool {
        self.doc.exists()
    }

    pub fn doc(&self) -> &JsonDoc {
        &self.doc
    }

    /// Metadata nodes of the declared sets, in declaration order.
    pub fn declared_sets(&self) -> Seq<JsonDoc> {
        self.doc.query(".sets[]")
    }

    pub fn with_sets(mut self, sets: Seq<LayoutSet>) -> Self {
        self.sets = sets;
        self
    }

    pub fn sets(&self) -> Seq<LayoutSet> {
        self.sets.clone()
    }
}

impl fmt::Display for LayoutSets {
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

    const LAYOUT: &str = r#"{
        "$schema": "https://altinncdn.no/schemas/json/layout/layout.schema.v1.json",
        "data": {
            "hidden": ["equals", ["dataModel", "hide"], "yes"],
            "layout": [
                {"id": "name", "type": "Input", "hidden": true},
                {"id": "submit", "type": "Button"}
            ]
        }
    }"#;

    #[test]
    fn layout_components() {
        let layout = Layout::from_entry(
            &entry("my-app/App/ui/form/layouts/page1.json", LAYOUT),
            Some("form".to_owned()),
        );
        assert!(layout.exists());
        assert!(layout.can_be_hidden());
        let components = layout.components().list();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].id().as_deref(), Some("name"));
        assert_eq!(components[0].kind().as_deref(), Some("Input"));
        assert!(components[0].can_be_hidden());
        assert!(!components[1].can_be_hidden());
        assert_eq!(components[1].layout_set_id(), Some("form"));
    }

    #[test]
    fn layout_set_meta() {
        let doc = JsonDoc::from_bytes(
            br#"{"sets": [{"id": "form", "dataType": "model", "tasks": ["Task_1"]}]}"#,
        );
        let meta = LayoutSetMeta::from_node(&doc.first(".sets[0]")).unwrap();
        assert_eq!(meta.id, "form");
        assert_eq!(meta.data_type.as_deref(), Some("model"));
        assert_eq!(meta.tasks, vec!["Task_1".to_owned()]);
    }

    #[test]
    fn absent_pieces_are_empty() {
        let set = LayoutSet::default();
        assert!(!set.settings().exists());
        assert!(!set.rule_configuration().exists());
        assert!(!set.rule_handler().exists());
        assert!(set.layouts().is_empty());
        assert!(!LayoutSets::empty().exists());
    }
}
