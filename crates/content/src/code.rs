//! Source-code adapters: syntactic queries over C# and JavaScript.
//!
//! Shape matching uses tree-sitter query patterns; the equal-to /
//! any-equal / regex predicates run on the captured node text after
//! matching. Compiling a query is expensive relative to executing it, so
//! compiled queries are cached process-wide by their pattern text.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use regex::Regex;
use seq::Seq;
use streaming_iterator::StreamingIterator;
use tree_sitter::{Parser, Query, QueryCursor};

use crate::FileEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lang {
    CSharp,
    JavaScript,
}

impl Lang {
    fn language(&self) -> tree_sitter::Language {
        match self {
            Lang::CSharp => tree_sitter_c_sharp::LANGUAGE.into(),
            Lang::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        }
    }
}

lazy_static! {
    static ref QUERY_CACHE: Mutex<HashMap<(Lang, String), Arc<Query>>> =
        Mutex::new(HashMap::new());
}

fn compiled(lang: Lang, pattern: &str) -> Arc<Query> {
    let mut cache = QUERY_CACHE.lock().unwrap();
    if let Some(query) = cache.get(&(lang, pattern.to_owned())) {
        return Arc::clone(query);
    }
    let query = Arc::new(
        Query::new(&lang.language(), pattern)
            .unwrap_or_else(|err| panic!("invalid tree-sitter query: {err}\n{pattern}")),
    );
    cache.insert((lang, pattern.to_owned()), Arc::clone(&query));
    query
}

/// How a named capture is tested after a structural match.
#[derive(Debug, Clone)]
enum CaptureTest {
    /// Every occurrence equals the value.
    Eq(String),
    /// At least one occurrence equals the value.
    AnyEq(String),
    /// Every occurrence matches the regex.
    Matches(Regex),
    /// Every occurrence equals the other capture's text.
    EqCapture(String),
}

/// A tree-sitter pattern plus text predicates over its captures. The
/// capture named `output` is what the query yields.
#[derive(Debug, Clone)]
pub struct CodeQuery {
    pattern: String,
    filters: Vec<(String, CaptureTest)>,
}

impl CodeQuery {
    pub fn new(pattern: impl Into<String>) -> Self {
        CodeQuery {
            pattern: pattern.into(),
            filters: Vec::new(),
        }
    }

    pub fn equals(mut self, capture: &str, value: &str) -> Self {
        self.filters
            .push((capture.to_owned(), CaptureTest::Eq(value.to_owned())));
        self
    }

    pub fn any_equals(mut self, capture: &str, value: &str) -> Self {
        self.filters
            .push((capture.to_owned(), CaptureTest::AnyEq(value.to_owned())));
        self
    }

    pub fn matches(mut self, capture: &str, pattern: &str) -> Self {
        let regex = Regex::new(pattern)
            .unwrap_or_else(|err| panic!("invalid capture regex {pattern:?}: {err}"));
        self.filters
            .push((capture.to_owned(), CaptureTest::Matches(regex)));
        self
    }

    pub fn equals_capture(mut self, capture: &str, other: &str) -> Self {
        self.filters
            .push((capture.to_owned(), CaptureTest::EqCapture(other.to_owned())));
        self
    }
}

/// A matched region of source, with its 1-based starting line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub text: String,
    pub start_line: usize,
    pub path: Option<String>,
    pub remote_url: Option<String>,
}

impl fmt::Display for Snippet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// One source file, or the absence of one.
#[derive(Debug, Clone)]
pub struct SourceFile {
    lang: Lang,
    text: Option<Arc<String>>,
    path: Option<String>,
    remote_url: Option<String>,
}

impl SourceFile {
    pub fn empty(lang: Lang) -> Self {
        SourceFile {
            lang,
            text: None,
            path: None,
            remote_url: None,
        }
    }

    pub fn from_entry(lang: Lang, entry: &FileEntry) -> Self {
        let text = String::from_utf8_lossy(&entry.bytes);
        SourceFile {
            lang,
            text: (!text.is_empty()).then(|| Arc::new(text.into_owned())),
            path: Some(entry.path.clone()),
            remote_url: Some(entry.remote_url.clone()),
        }
    }

    pub fn from_text(lang: Lang, text: &str) -> Self {
        SourceFile {
            lang,
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

    /// Run a query, yielding one [`Snippet`] per `@output` capture of
    /// every structural match that passes the query's predicates.
    pub fn find_all(&self, query: &CodeQuery) -> Seq<Snippet> {
        let Some(text) = &self.text else {
            return Seq::empty();
        };
        let source = text.as_bytes();

        let mut parser = Parser::new();
        parser
            .set_language(&self.lang.language())
            .expect("the bundled grammars match the linked tree-sitter");
        let Some(tree) = parser.parse(source, None) else {
            return Seq::empty();
        };

        let compiled = compiled(self.lang, &query.pattern);
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&compiled, tree.root_node(), source);

        let mut out = Vec::new();
        'matches: while let Some(found) = matches.next() {
            let texts_of = |capture: &str| -> Vec<&str> {
                found
                    .captures
                    .iter()
                    .filter(|c| compiled.capture_names()[c.index as usize] == capture)
                    .filter_map(|c| c.node.utf8_text(source).ok())
                    .collect()
            };
            for (capture, test) in &query.filters {
                let texts = texts_of(capture);
                let pass = match test {
                    CaptureTest::Eq(value) => {
                        !texts.is_empty() && texts.iter().all(|t| *t == value.as_str())
                    }
                    CaptureTest::AnyEq(value) => {
                        texts.iter().any(|t| *t == value.as_str())
                    }
                    CaptureTest::Matches(regex) => {
                        !texts.is_empty() && texts.iter().all(|t| regex.is_match(t))
                    }
                    CaptureTest::EqCapture(other) => {
                        let others = texts_of(other);
                        !texts.is_empty()
                            && !others.is_empty()
                            && texts.iter().all(|t| others.iter().all(|o| t == o))
                    }
                };
                if !pass {
                    continue 'matches;
                }
            }
            for capture in found.captures {
                if compiled.capture_names()[capture.index as usize] != "output" {
                    continue;
                }
                if let Ok(matched) = capture.node.utf8_text(source) {
                    out.push(Snippet {
                        text: matched.to_owned(),
                        start_line: capture.node.start_position().row + 1,
                        path: self.path.clone(),
                        remote_url: self.remote_url.clone(),
                    });
                }
            }
        }
        Seq::of(out)
    }
}

impl PartialEq for SourceFile {
    fn eq(&self, other: &Self) -> bool {
        self.lang == other.lang && self.text == other.text
    }
}

impl fmt::Display for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.text() {
            Some(text) => f.write_str(text),
            None => f.write_str("None"),
        }
    }
}

/// Optional restrictions on a C# class declaration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassQuery<'a> {
    pub name: Option<&'a str>,
    pub implements: Option<&'a str>,
    pub modifier: Option<&'a str>,
}

/// Optional restrictions on a C# method declaration.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodQuery<'a> {
    pub name: Option<&'a str>,
    pub returns: Option<&'a str>,
    pub modifier: Option<&'a str>,
}

/// Optional restrictions on a C# object creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectCreationQuery<'a> {
    pub type_name: Option<&'a str>,
    pub initializer_field: Option<&'a str>,
}

impl SourceFile {
    /// C# class declarations, optionally restricted by name, one
    /// implemented interface, and one modifier.
    pub fn class_declarations(&self, restrict: ClassQuery<'_>) -> Seq<Snippet> {
        let base_list = if restrict.implements.is_some() {
            "(base_list (identifier) @interface.name)"
        } else {
            ""
        };
        let modifiers = if restrict.modifier.is_some() {
            "(modifier) @class.modifier"
        } else {
            ""
        };
        let mut query = CodeQuery::new(format!(
            "(class_declaration
                {modifiers}
                name: (identifier) @class.name
                {base_list}) @output"
        ));
        if let Some(name) = restrict.name {
            query = query.equals("class.name", name);
        }
        if let Some(implements) = restrict.implements {
            query = query.equals("interface.name", implements);
        }
        if let Some(modifier) = restrict.modifier {
            query = query.equals("class.modifier", modifier);
        }
        self.find_all(&query)
    }

    /// C# method declarations, optionally restricted by name, return
    /// type, and one modifier.
    pub fn method_declarations(&self, restrict: MethodQuery<'_>) -> Seq<Snippet> {
        let returns = if restrict.returns.is_some() {
            "returns: (_) @method.returns"
        } else {
            ""
        };
        let modifiers = if restrict.modifier.is_some() {
            "(modifier) @method.modifier"
        } else {
            ""
        };
        let mut query = CodeQuery::new(format!(
            "(method_declaration
                {modifiers}
                {returns}
                name: (identifier) @method.name) @output"
        ));
        if let Some(name) = restrict.name {
            query = query.equals("method.name", name);
        }
        if let Some(returns) = restrict.returns {
            query = query.equals("method.returns", returns);
        }
        if let Some(modifier) = restrict.modifier {
            query = query.equals("method.modifier", modifier);
        }
        self.find_all(&query)
    }

    /// C# object creations, optionally restricted by created type and by
    /// a field name assigned in the object initializer.
    pub fn object_creations(&self, restrict: ObjectCreationQuery<'_>) -> Seq<Snippet> {
        let initializer = if restrict.initializer_field.is_some() {
            "(initializer_expression
                (assignment_expression
                    left: (identifier) @object.field))"
        } else {
            ""
        };
        let mut query = CodeQuery::new(format!(
            "(object_creation_expression
                type: (_) @object.type
                {initializer}) @output"
        ));
        if let Some(type_name) = restrict.type_name {
            query = query.equals("object.type", type_name);
        }
        if let Some(field) = restrict.initializer_field {
            query = query.any_equals("object.field", field);
        }
        self.find_all(&query)
    }

    /// JavaScript: `var <variable> = { <property>: ... }` pairs.
    pub fn object_declarations(
        &self,
        variable_name: Option<&str>,
        property_name: Option<&str>,
    ) -> Seq<Snippet> {
        let mut query = CodeQuery::new(
            "(variable_declaration
                (variable_declarator
                    name: (identifier) @variable.name
                    value: (object
                        (pair
                            key: (property_identifier) @prop.name
                            value: (_)) @output)))",
        );
        if let Some(variable_name) = variable_name {
            query = query.equals("variable.name", variable_name);
        }
        if let Some(property_name) = property_name {
            query = query.equals("prop.name", property_name);
        }
        self.find_all(&query)
    }
}

/// The application's `Program.cs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    source: SourceFile,
}

impl Program {
    pub fn empty() -> Self {
        Program {
            source: SourceFile::empty(Lang::CSharp),
        }
    }

    pub fn from_entry(entry: &FileEntry) -> Self {
        Program {
            source: SourceFile::from_entry(Lang::CSharp, entry),
        }
    }

    pub fn exists(&self) -> bool {
        self.source.exists()
    }

    pub fn source(&self) -> &SourceFile {
        &self.source
    }

    /// Implementation types registered through
    /// `RegisterCustomAppServices(IServiceCollection services, ...)` as
    /// `services.Add*<IFace, Impl>(...)`, optionally restricted to one
    /// interface name.
    pub fn custom_app_services(&self, interface_name: Option<&str>) -> Seq<String> {
        let mut query = CodeQuery::new(
            "(local_function_statement
                name: (identifier) @register_func.name
                parameters: (parameter_list
                    (parameter
                        type: (identifier) @service_collection.type
                        name: (identifier) @service_collection.name))
                body: (block
                    (expression_statement
                        (invocation_expression
                            function: (member_access_expression
                                expression: (identifier) @member.name
                                name: (generic_name
                                    (identifier) @method.name
                                    (type_argument_list
                                        (identifier) @interface.name
                                        (identifier) @output)))
                            arguments: (_)))))",
        )
        .equals("register_func.name", "RegisterCustomAppServices")
        .equals("service_collection.type", "IServiceCollection")
        .equals_capture("member.name", "service_collection.name")
        .matches("method.name", "^Add.+");
        if let Some(interface_name) = interface_name {
            query = query.equals("interface.name", interface_name);
        }
        self.source
            .find_all(&query)
            .map(|snippet| snippet.text)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.source.fmt(f)
    }
}

/// The rule-handler script of a layout set: four well-known top-level
/// object literals holding rules and their helpers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleHandler {
    source: Option<SourceFile>,
}

impl RuleHandler {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entry(entry: &FileEntry) -> Self {
        RuleHandler {
            source: Some(SourceFile::from_entry(Lang::JavaScript, entry)),
        }
    }

    pub fn exists(&self) -> bool {
        self.source.as_ref().is_some_and(SourceFile::exists)
    }

    pub fn source(&self) -> Option<&SourceFile> {
        self.source.as_ref()
    }

    fn lookup(&self, object: &str, name: Option<&str>) -> Seq<Snippet> {
        match &self.source {
            Some(source) => source.object_declarations(Some(object), name),
            None => Seq::empty(),
        }
    }

    pub fn rules(&self, name: Option<&str>) -> Seq<Snippet> {
        self.lookup("ruleHandlerObject", name)
    }

    pub fn rule_helpers(&self, name: Option<&str>) -> Seq<Snippet> {
        self.lookup("ruleHandlerHelper", name)
    }

    pub fn conditional_rules(&self, name: Option<&str>) -> Seq<Snippet> {
        self.lookup("conditionalRuleHandlerObject", name)
    }

    pub fn conditional_rule_helpers(&self, name: Option<&str>) -> Seq<Snippet> {
        self.lookup("conditionalRuleHandlerHelper", name)
    }
}

impl fmt::Display for RuleHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => source.fmt(f),
            None => f.write_str("None"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const PROGRAM_CS: &str = r#"
using Altinn.App.Core.Features;

WebApplication app = WebApplication.CreateBuilder(args).Build();

void RegisterCustomAppServices(IServiceCollection services, IConfiguration config)
{
    services.AddTransient<IInstantiationProcessor, InstantiationProcessor>();
    services.AddSingleton<IDataProcessor, DataProcessor>();
    other.AddTransient<IIgnored, Ignored>();
}
"#;

    const CLASSES_CS: &str = r#"
public class DataProcessor : IDataProcessor
{
    public async Task<bool> ProcessDataRead(Instance instance)
    {
        return await Task.FromResult(true);
    }
}

internal class Helper
{
    private static int Count() { return 0; }
}
"#;

    const RULE_HANDLER_JS: &str = r#"
var ruleHandlerObject = {
  sum: (obj) => {
    return obj.a + obj.b;
  },
};
var ruleHandlerHelper = {
  sum: () => {
    return { a: "a", b: "b" };
  },
};
var conditionalRuleHandlerObject = {
  hideField: (obj) => {
    return obj.value === "yes";
  },
};
var conditionalRuleHandlerHelper = {
  hideField: () => {
    return { value: "value" };
  },
};
"#;

    #[test]
    fn class_declarations_with_restrictions() {
        let source = SourceFile::from_text(Lang::CSharp, CLASSES_CS);
        assert_eq!(source.class_declarations(ClassQuery::default()).len(), 2);

        let implementing = source.class_declarations(ClassQuery {
            implements: Some("IDataProcessor"),
            ..Default::default()
        });
        let found = implementing.list();
        assert_eq!(found.len(), 1);
        assert!(found[0].text.contains("class DataProcessor"));

        assert!(source
            .class_declarations(ClassQuery {
                name: Some("NoSuchClass"),
                ..Default::default()
            })
            .is_empty());
    }

    #[test]
    fn method_declarations_by_name() {
        let source = SourceFile::from_text(Lang::CSharp, CLASSES_CS);
        let methods = source.method_declarations(MethodQuery::default());
        assert_eq!(methods.len(), 2);
        let process = source.method_declarations(MethodQuery {
            name: Some("ProcessDataRead"),
            ..Default::default()
        });
        assert_eq!(process.len(), 1);
    }

    #[test]
    fn custom_app_services_follow_the_service_collection() {
        let program = Program {
            source: SourceFile::from_text(Lang::CSharp, PROGRAM_CS),
        };
        // `other.AddTransient` is not on the IServiceCollection argument.
        assert_eq!(
            program.custom_app_services(None).list(),
            vec!["InstantiationProcessor".to_owned(), "DataProcessor".to_owned()]
        );
        assert_eq!(
            program.custom_app_services(Some("IDataProcessor")).list(),
            vec!["DataProcessor".to_owned()]
        );
        assert!(program.custom_app_services(Some("INoSuch")).is_empty());
    }

    #[test]
    fn rule_handler_lookups() {
        let handler = RuleHandler {
            source: Some(SourceFile::from_text(Lang::JavaScript, RULE_HANDLER_JS)),
        };
        assert_eq!(handler.rules(None).len(), 1);
        assert_eq!(handler.rule_helpers(Some("sum")).len(), 1);
        assert_eq!(handler.conditional_rules(Some("hideField")).len(), 1);
        assert!(handler.conditional_rules(Some("nope")).is_empty());
        assert!(RuleHandler::empty().rules(None).is_empty());
    }

    #[test]
    fn empty_source_contract() {
        let empty = SourceFile::empty(Lang::CSharp);
        assert!(!empty.exists());
        assert_eq!(empty.to_string(), "None");
        assert!(empty.class_declarations(ClassQuery::default()).is_empty());
        assert_eq!(empty, SourceFile::empty(Lang::CSharp));
        assert_ne!(empty, SourceFile::from_text(Lang::CSharp, "class A {}"));
    }
}
