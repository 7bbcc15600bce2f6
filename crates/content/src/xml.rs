//! XML documents addressed by path expressions.
//!
//! Parsing goes through roxmltree and is immediately copied into an owned
//! arena (`XmlTree`) so adapters are `'static`, cheaply clonable, and free
//! of ownership cycles: elements own their children and hold an index back
//! to their parent.
//!
//! Queries are XPath-shaped path expressions: `/` child steps, `//`
//! descendant steps, `@attr`, `text()`, `*`, attribute predicates
//! (`[@a="v"]`, `[matches(@a, "re", "i")]`), and top-level union with `|`.
//! Prefixes resolve through a fixed default namespace map merged with the
//! document's own declarations, so a missing prefix can only error when it
//! is genuinely unknown. Unprefixed name tests match on local name alone.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use seq::Seq;

use crate::FileEntry;

lazy_static! {
    static ref DEFAULT_NS: Vec<(&'static str, &'static str)> = vec![
        ("xsi", "http://www.w3.org/2001/XMLSchema-instance"),
        ("altinn", "http://altinn.no/process"),
        ("bpmn", "http://www.omg.org/spec/BPMN/20100524/MODEL"),
        ("bpmndi", "http://www.omg.org/spec/BPMN/20100524/DI"),
        ("dc", "http://www.omg.org/spec/DD/20100524/DC"),
        ("di", "http://www.omg.org/spec/DD/20100524/DI"),
        ("bpmn2", "http://www.omg.org/spec/BPMN/20100524/MODEL"),
        ("modeler", "http://camunda.org/schema/modeler/1.0"),
        ("camunda", "http://camunda.org/schema/1.0/bpmn"),
        ("xacml", "urn:oasis:names:tc:xacml:3.0:core:schema:wd-17"),
    ];
}

#[derive(Debug)]
struct Attribute {
    local: String,
    namespace: Option<String>,
    value: String,
}

#[derive(Debug)]
struct Element {
    local: String,
    namespace: Option<String>,
    parent: Option<usize>,
    children: Vec<usize>,
    attributes: Vec<Attribute>,
    /// Concatenated direct text children.
    text: String,
}

/// Owned arena of one parsed document.
#[derive(Debug)]
pub struct XmlTree {
    elements: Vec<Element>,
    /// prefix → URI: the defaults overlaid with the document's own.
    namespaces: Vec<(String, String)>,
}

impl XmlTree {
    fn parse(text: &str) -> Option<XmlTree> {
        let doc = roxmltree::Document::parse(text).ok()?;
        let mut tree = XmlTree {
            elements: Vec::new(),
            namespaces: DEFAULT_NS
                .iter()
                .map(|(prefix, uri)| (prefix.to_string(), uri.to_string()))
                .collect(),
        };
        for ns in doc.root_element().namespaces() {
            if let Some(prefix) = ns.name() {
                tree.set_namespace(prefix, ns.uri());
            }
        }
        tree.copy_element(doc.root_element(), None);
        Some(tree)
    }

    fn set_namespace(&mut self, prefix: &str, uri: &str) {
        if let Some(entry) = self.namespaces.iter_mut().find(|(p, _)| p == prefix) {
            entry.1 = uri.to_owned();
        } else {
            self.namespaces.push((prefix.to_owned(), uri.to_owned()));
        }
    }

    fn resolve(&self, prefix: &str) -> Option<&str> {
        self.namespaces
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    fn copy_element(&mut self, node: roxmltree::Node<'_, '_>, parent: Option<usize>) -> usize {
        let id = self.elements.len();
        self.elements.push(Element {
            local: node.tag_name().name().to_owned(),
            namespace: node.tag_name().namespace().map(str::to_owned),
            parent,
            children: Vec::new(),
            attributes: node
                .attributes()
                .map(|attr| Attribute {
                    local: attr.name().to_owned(),
                    namespace: attr.namespace().map(str::to_owned),
                    value: attr.value().to_owned(),
                })
                .collect(),
            text: node
                .children()
                .filter(|child| child.is_text())
                .filter_map(|child| child.text())
                .collect(),
        });
        for child in node.children().filter(|child| child.is_element()) {
            let child_id = self.copy_element(child, Some(id));
            self.elements[id].children.push(child_id);
        }
        id
    }

    fn descendants_of(&self, id: usize, out: &mut Vec<usize>) {
        out.push(id);
        for &child in &self.elements[id].children {
            self.descendants_of(child, out);
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Missing,
    Element(usize),
    Scalar(String),
}

/// An XML document, an element within one, or a scalar produced by an
/// attribute or `text()` step.
#[derive(Debug, Clone)]
pub struct XmlDoc {
    tree: Option<Arc<XmlTree>>,
    node: Node,
    path: Option<String>,
    remote_url: Option<String>,
}

impl Default for XmlDoc {
    fn default() -> Self {
        XmlDoc {
            tree: None,
            node: Node::Missing,
            path: None,
            remote_url: None,
        }
    }
}

impl XmlDoc {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entry(entry: &FileEntry) -> Self {
        let mut doc = XmlDoc::from_bytes(&entry.bytes);
        doc.path = Some(entry.path.clone());
        doc.remote_url = Some(entry.remote_url.clone());
        doc
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        match XmlTree::parse(&text) {
            Some(tree) => XmlDoc {
                node: Node::Element(0),
                tree: Some(Arc::new(tree)),
                path: None,
                remote_url: None,
            },
            None => XmlDoc::empty(),
        }
    }

    pub fn exists(&self) -> bool {
        !matches!(self.node, Node::Missing)
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    /// Element tag name, for element nodes.
    pub fn name(&self) -> Option<&str> {
        match (&self.tree, &self.node) {
            (Some(tree), Node::Element(id)) => Some(tree.elements[*id].local.as_str()),
            _ => None,
        }
    }

    /// Scalar value, or an element's own concatenated text.
    pub fn text(&self) -> Option<String> {
        match (&self.tree, &self.node) {
            (_, Node::Scalar(value)) => Some(value.clone()),
            (Some(tree), Node::Element(id)) => Some(tree.elements[*id].text.clone()),
            _ => None,
        }
    }

    fn element(&self, id: usize) -> XmlDoc {
        XmlDoc {
            tree: self.tree.clone(),
            node: Node::Element(id),
            path: self.path.clone(),
            remote_url: self.remote_url.clone(),
        }
    }

    fn scalar(&self, value: String) -> XmlDoc {
        XmlDoc {
            tree: self.tree.clone(),
            node: Node::Scalar(value),
            path: self.path.clone(),
            remote_url: self.remote_url.clone(),
        }
    }

    /// Evaluate a path expression from this node.
    pub fn query(&self, query: &str) -> Seq<XmlDoc> {
        let (Some(tree), Node::Element(context)) = (&self.tree, &self.node) else {
            return Seq::empty();
        };
        let mut out = Vec::new();
        for alternative in split_union(query) {
            let path = parse_path(&alternative);
            evaluate(tree, *context, &path, self, &mut out);
        }
        Seq::of(out)
    }

    /// First match, or the empty document.
    pub fn first(&self, query: &str) -> XmlDoc {
        self.query(query).first_or(XmlDoc::empty())
    }

    /// The n-th match, or the empty document.
    pub fn nth(&self, query: &str, n: usize) -> XmlDoc {
        self.query(query).nth(n).unwrap_or_else(XmlDoc::empty)
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, id: usize, depth: usize) -> fmt::Result {
        let tree = self.tree.as_ref().expect("render is called on elements only");
        let element = &tree.elements[id];
        let indent = "  ".repeat(depth);
        write!(f, "{indent}<{}", element.local)?;
        for attr in &element.attributes {
            write!(f, " {}=\"{}\"", attr.local, attr.value)?;
        }
        let text = element.text.trim();
        if element.children.is_empty() && text.is_empty() {
            return writeln!(f, "/>");
        }
        write!(f, ">")?;
        if !text.is_empty() {
            write!(f, "{text}")?;
        }
        if element.children.is_empty() {
            return writeln!(f, "</{}>", element.local);
        }
        writeln!(f)?;
        for &child in &element.children {
            self.render(f, child, depth + 1)?;
        }
        writeln!(f, "{indent}</{}>", element.local)
    }
}

impl PartialEq for XmlDoc {
    fn eq(&self, other: &Self) -> bool {
        match (&self.node, &other.node) {
            (Node::Missing, Node::Missing) => true,
            (Node::Scalar(a), Node::Scalar(b)) => a == b,
            (Node::Element(a), Node::Element(b)) => {
                match (&self.tree, &other.tree) {
                    (Some(ta), Some(tb)) => Arc::ptr_eq(ta, tb) && a == b,
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

impl PartialOrd for XmlDoc {
    /// Scalar ordering only; `None` (and thus `false` operators) for
    /// missing nodes and element nodes.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (&self.node, &other.node) {
            (Node::Scalar(a), Node::Scalar(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for XmlDoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Node::Missing => f.write_str("None"),
            Node::Scalar(value) => f.write_str(value),
            Node::Element(id) => self.render(f, *id, 0),
        }
    }
}

#[derive(Debug)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug)]
struct NameTest {
    prefix: Option<String>,
    local: String,
}

impl NameTest {
    fn parse(raw: &str) -> NameTest {
        match raw.split_once(':') {
            Some((prefix, local)) => NameTest {
                prefix: Some(prefix.to_owned()),
                local: local.to_owned(),
            },
            None => NameTest {
                prefix: None,
                local: raw.to_owned(),
            },
        }
    }

    /// An unprefixed test matches on local name regardless of namespace;
    /// a prefixed test additionally requires the resolved URI.
    fn matches(&self, tree: &XmlTree, local: &str, namespace: Option<&str>) -> bool {
        if self.local != "*" && self.local != local {
            return false;
        }
        match &self.prefix {
            None => true,
            Some(prefix) => match tree.resolve(prefix) {
                Some(uri) => namespace == Some(uri),
                None => false,
            },
        }
    }
}

#[derive(Debug)]
enum Test {
    Element(NameTest),
    Attribute(NameTest),
    Text,
}

#[derive(Debug)]
enum Predicate {
    AttrEquals { name: NameTest, value: String },
    AttrMatches { name: NameTest, regex: Regex },
}

#[derive(Debug)]
struct Step {
    axis: Axis,
    test: Test,
    predicates: Vec<Predicate>,
}

fn split_union(query: &str) -> Vec<String> {
    // `|` cannot occur inside the quoted strings we support, except in
    // regex literals; split only outside quotes.
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in query.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '|' if !in_quotes => {
                parts.push(current.trim().to_owned());
                current = String::new();
            }
            _ => current.push(c),
        }
    }
    parts.push(current.trim().to_owned());
    parts
}

fn parse_path(query: &str) -> Vec<Step> {
    match try_parse_path(query) {
        Ok(path) => path,
        Err(reason) => panic!("invalid XML path query {query:?}: {reason}"),
    }
}

fn try_parse_path(query: &str) -> Result<Vec<Step>, String> {
    let mut rest = query.trim();
    // A leading `.` anchors at the context node, which is the default.
    rest = rest.strip_prefix('.').unwrap_or(rest);

    let mut steps = Vec::new();
    while !rest.is_empty() {
        let axis = if let Some(tail) = rest.strip_prefix("//") {
            rest = tail;
            Axis::Descendant
        } else if let Some(tail) = rest.strip_prefix('/') {
            rest = tail;
            Axis::Child
        } else if steps.is_empty() {
            Axis::Child
        } else {
            return Err(format!("expected '/' before {rest:?}"));
        };

        let (raw_step, tail) = split_step(rest)?;
        rest = tail;

        let (raw_test, raw_predicates) = match raw_step.find('[') {
            Some(at) => (&raw_step[..at], Some(&raw_step[at..])),
            None => (raw_step, None),
        };

        let test = if let Some(attr) = raw_test.strip_prefix('@') {
            Test::Attribute(NameTest::parse(attr))
        } else if raw_test == "text()" {
            Test::Text
        } else if raw_test.is_empty() {
            return Err("empty step".to_owned());
        } else {
            Test::Element(NameTest::parse(raw_test))
        };

        let mut predicates = Vec::new();
        if let Some(mut raw) = raw_predicates {
            while let Some(tail) = raw.strip_prefix('[') {
                let end = tail.find(']').ok_or("unterminated predicate")?;
                predicates.push(parse_predicate(&tail[..end])?);
                raw = &tail[end + 1..];
            }
        }

        steps.push(Step {
            axis,
            test,
            predicates,
        });
    }
    Ok(steps)
}

/// Split off one step at the next `/` that is outside brackets/quotes.
fn split_step(rest: &str) -> Result<(&str, &str), String> {
    let mut depth = 0usize;
    let mut in_quotes = false;
    for (at, c) in rest.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '[' | '(' if !in_quotes => depth += 1,
            ']' | ')' if !in_quotes => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced brackets".to_owned())?;
            }
            '/' if !in_quotes && depth == 0 => {
                return Ok((&rest[..at], &rest[at..]));
            }
            _ => {}
        }
    }
    Ok((rest, ""))
}

fn parse_predicate(raw: &str) -> Result<Predicate, String> {
    let raw = raw.trim();
    if let Some(inner) = raw.strip_prefix("matches(") {
        let inner = inner
            .strip_suffix(')')
            .ok_or_else(|| "unterminated matches()".to_owned())?;
        let mut parts = split_args(inner);
        if parts.len() < 2 || parts.len() > 3 {
            return Err(format!("matches() takes 2 or 3 arguments, got {}", parts.len()));
        }
        let attr = parts
            .remove(0)
            .strip_prefix('@')
            .ok_or_else(|| "matches() must test an attribute".to_owned())?
            .to_owned();
        let pattern = unquote(&parts.remove(0))?;
        let case_insensitive = !parts.is_empty() && unquote(&parts.remove(0))?.contains('i');
        let regex = regex::RegexBuilder::new(&pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|err| format!("bad regex: {err}"))?;
        return Ok(Predicate::AttrMatches {
            name: NameTest::parse(&attr),
            regex,
        });
    }
    if let Some((lhs, rhs)) = raw.split_once('=') {
        let attr = lhs
            .trim()
            .strip_prefix('@')
            .ok_or_else(|| "predicate must test an attribute".to_owned())?;
        return Ok(Predicate::AttrEquals {
            name: NameTest::parse(attr),
            value: unquote(rhs.trim())?,
        });
    }
    Err(format!("unsupported predicate {raw:?}"))
}

fn split_args(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in raw.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                parts.push(current.trim().to_owned());
                current = String::new();
            }
            _ => current.push(c),
        }
    }
    parts.push(current.trim().to_owned());
    parts
}

fn unquote(raw: &str) -> Result<String, String> {
    let raw = raw.trim();
    if (raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2)
        || (raw.starts_with('\'') && raw.ends_with('\'') && raw.len() >= 2)
    {
        Ok(raw[1..raw.len() - 1].to_owned())
    } else {
        Err(format!("expected a quoted string, got {raw:?}"))
    }
}

fn attribute_value<'t>(tree: &'t XmlTree, element: &'t Element, name: &NameTest) -> Option<&'t str> {
    element
        .attributes
        .iter()
        .find(|attr| name.matches(tree, &attr.local, attr.namespace.as_deref()))
        .map(|attr| attr.value.as_str())
}

fn evaluate(
    tree: &Arc<XmlTree>,
    context: usize,
    path: &[Step],
    origin: &XmlDoc,
    out: &mut Vec<XmlDoc>,
) {
    let mut current = vec![context];
    for step in path {
        let mut candidates = Vec::new();
        match step.axis {
            Axis::Child => {
                for &id in &current {
                    candidates.extend(tree.elements[id].children.iter().copied());
                }
            }
            Axis::Descendant => {
                for &id in &current {
                    let mut all = Vec::new();
                    tree.descendants_of(id, &mut all);
                    candidates.extend(all);
                }
            }
        }

        match &step.test {
            Test::Element(name) => {
                current = candidates
                    .into_iter()
                    .filter(|&id| {
                        let element = &tree.elements[id];
                        name.matches(tree, &element.local, element.namespace.as_deref())
                            && step.predicates.iter().all(|predicate| match predicate {
                                Predicate::AttrEquals { name, value } => {
                                    attribute_value(tree, element, name) == Some(value.as_str())
                                }
                                Predicate::AttrMatches { name, regex } => {
                                    attribute_value(tree, element, name)
                                        .is_some_and(|value| regex.is_match(value))
                                }
                            })
                    })
                    .collect();
            }
            Test::Attribute(name) => {
                // Attribute steps address the *current* nodes, not children.
                for &id in &current {
                    if let Some(value) = attribute_value(tree, &tree.elements[id], name) {
                        out.push(origin.scalar(value.to_owned()));
                    }
                }
                return;
            }
            Test::Text => {
                for &id in &current {
                    let text = &tree.elements[id].text;
                    if !text.is_empty() {
                        out.push(origin.scalar(text.clone()));
                    }
                }
                return;
            }
        }
    }
    out.extend(current.into_iter().map(|id| origin.element(id)));
}

/// A BPMN process definition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Process {
    doc: XmlDoc,
}

impl Process {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entry(entry: &FileEntry) -> Self {
        Process {
            doc: XmlDoc::from_entry(entry),
        }
    }

    pub fn exists(&self) -> bool {
        self.doc.exists()
    }

    pub fn doc(&self) -> &XmlDoc {
        &self.doc
    }

    pub fn tasks(&self) -> Seq<ProcessTask> {
        self.doc
            .query(".//bpmn:task | .//bpmn2:task")
            .map(|node| ProcessTask { node })
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.doc.fmt(f)
    }
}

/// One task of a BPMN process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessTask {
    node: XmlDoc,
}

impl ProcessTask {
    pub fn id(&self) -> Option<String> {
        self.node.query("./@id").first().and_then(|node| node.text())
    }

    /// The Altinn task type: either a child element or an attribute,
    /// depending on the process format vintage.
    pub fn task_type(&self) -> Option<String> {
        self.node
            .query(".//altinn:taskType/text() | ./@altinn:tasktype")
            .first()
            .and_then(|node| node.text())
    }

    pub fn node(&self) -> &XmlDoc {
        &self.node
    }
}
