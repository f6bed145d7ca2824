//! Grammar-driven plugins backed by tree-sitter parsers.
//!
//! One plugin instance per language; the parser is built at construction
//! time (under the manager's timeout guard) and reused for every file.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tree_sitter::{Language, Node, Parser};

use crate::plugins::{
    Capabilities, LanguagePlugin, ParsedImport, ParsedReference, ParsedSymbol, PluginOutput,
    PluginSpec, PluginVariant,
};
use crate::types::{ReferenceKind, SymbolKind};

// Node kinds shared by the supported grammars. Names differ per grammar, so
// each set lists every spelling we classify.
const FUNCTION_NODES: &[&str] = &[
    // Rust
    "function_item",
    // Python
    "function_definition",
    // JavaScript / TypeScript
    "function_declaration",
    "generator_function_declaration",
];
const METHOD_NODES: &[&str] = &["method_definition"];
const CLASS_NODES: &[&str] = &[
    // Rust
    "struct_item",
    "enum_item",
    "trait_item",
    "union_item",
    // Python
    "class_definition",
    // JavaScript / TypeScript
    "class_declaration",
    "interface_declaration",
    "enum_declaration",
];
const TYPE_NODES: &[&str] = &["type_item", "type_alias_declaration"];
const CONST_NODES: &[&str] = &["const_item", "static_item"];
const MODULE_NODES: &[&str] = &["mod_item", "internal_module", "module"];
const MACRO_NODES: &[&str] = &["macro_definition"];
const IMPORT_NODES: &[&str] = &[
    // Rust
    "use_declaration",
    // Python (import_statement is also the JS/TS spelling)
    "import_statement",
    "import_from_statement",
];
const CALL_NODES: &[&str] = &["call_expression", "call"];
const VARIABLE_DECLARATOR: &str = "variable_declarator";
const LEXICAL_DECLARATION: &str = "lexical_declaration";
const IMPL_NODE: &str = "impl_item";

// Containers that contribute a segment to qualified names. Functions nested
// in the method-container subset become methods; modules only add scope.
const CONTAINER_NODES: &[&str] = &[
    "impl_item",
    "trait_item",
    "class_definition",
    "class_declaration",
    "mod_item",
    "internal_module",
];
const METHOD_CONTAINER_NODES: &[&str] = &[
    "impl_item",
    "trait_item",
    "class_definition",
    "class_declaration",
];

/// Languages with a bundled grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrammarLanguage {
    Rust,
    Python,
    TypeScript,
    JavaScript,
}

impl GrammarLanguage {
    pub fn tree_sitter_language(&self) -> Language {
        match self {
            GrammarLanguage::Rust => tree_sitter_rust::LANGUAGE.into(),
            GrammarLanguage::Python => tree_sitter_python::LANGUAGE.into(),
            GrammarLanguage::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            GrammarLanguage::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            GrammarLanguage::Rust => "rust",
            GrammarLanguage::Python => "python",
            GrammarLanguage::TypeScript => "typescript",
            GrammarLanguage::JavaScript => "javascript",
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            GrammarLanguage::Rust => &["rs"],
            GrammarLanguage::Python => &["py", "pyi"],
            GrammarLanguage::TypeScript => &["ts", "tsx"],
            GrammarLanguage::JavaScript => &["js", "jsx", "mjs", "cjs"],
        }
    }

    /// Separator between qualified-name segments.
    fn scope_separator(&self) -> &'static str {
        match self {
            GrammarLanguage::Rust => "::",
            _ => ".",
        }
    }
}

/// A tree-sitter backed plugin for one language.
pub struct GrammarPlugin {
    language: GrammarLanguage,
    // tree-sitter parsers are stateful; the mutex keeps `index` callable
    // from the worker pool.
    parser: Mutex<Parser>,
}

impl GrammarPlugin {
    pub fn new(language: GrammarLanguage) -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&language.tree_sitter_language())
            .with_context(|| format!("failed to load grammar for {}", language.tag()))?;
        Ok(Self {
            language,
            parser: Mutex::new(parser),
        })
    }
}

impl LanguagePlugin for GrammarPlugin {
    fn language(&self) -> &'static str {
        self.language.tag()
    }

    fn variant(&self) -> PluginVariant {
        PluginVariant::Grammar
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            symbols: true,
            references: true,
            imports: true,
        }
    }

    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                let ext = ext.to_lowercase();
                self.language.extensions().contains(&ext.as_str())
            })
            .unwrap_or(false)
    }

    fn index(&self, rel_path: &str, content: &str) -> Result<PluginOutput> {
        let tree = {
            let mut parser = self.parser.lock();
            parser
                .parse(content, None)
                .with_context(|| format!("parse failed for {rel_path}"))?
        };

        let mut extractor = Extractor {
            language: self.language,
            content,
            output: PluginOutput::default(),
            scope: Vec::new(),
        };
        extractor.walk(tree.root_node());
        Ok(extractor.output)
    }

    fn memory_bytes(&self) -> u64 {
        // Grammar tables plus parser state; measured sizes sit in the low
        // megabytes for all bundled grammars.
        4 * 1024 * 1024
    }

    fn release(&self) {
        self.parser.lock().reset();
    }
}

/// Tree walk state: scope stack for qualified names plus the accumulating
/// output.
struct Extractor<'a> {
    language: GrammarLanguage,
    content: &'a str,
    output: PluginOutput,
    scope: Vec<ScopeFrame>,
}

struct ScopeFrame {
    name: String,
    method_container: bool,
}

impl Extractor<'_> {
    fn walk(&mut self, node: Node) {
        let kind = node.kind();

        let symbol_kind = if FUNCTION_NODES.contains(&kind) {
            if self.in_container() {
                Some(SymbolKind::Method)
            } else {
                Some(SymbolKind::Function)
            }
        } else if METHOD_NODES.contains(&kind) {
            Some(SymbolKind::Method)
        } else if CLASS_NODES.contains(&kind) {
            Some(SymbolKind::Class)
        } else if TYPE_NODES.contains(&kind) {
            Some(SymbolKind::Type)
        } else if CONST_NODES.contains(&kind) {
            Some(SymbolKind::Variable)
        } else if MODULE_NODES.contains(&kind) {
            Some(SymbolKind::Module)
        } else if MACRO_NODES.contains(&kind) {
            Some(SymbolKind::Macro)
        } else if kind == LEXICAL_DECLARATION && self.scope.is_empty() {
            // Top-level `const`/`let` in JS/TS; the declarator carries the name.
            self.extract_declarators(node);
            None
        } else {
            None
        };

        if let Some(symbol_kind) = symbol_kind {
            if let Some(name) = self.node_name(node) {
                self.push_symbol(node, symbol_kind, name);
            }
        }

        if IMPORT_NODES.contains(&kind) {
            self.extract_import(node);
        } else if CALL_NODES.contains(&kind) {
            self.extract_call(node);
        }

        if self.language == GrammarLanguage::Python && kind == "class_definition" {
            self.extract_python_bases(node);
        }
        if kind == "class_declaration" {
            self.extract_js_heritage(node);
        }

        let mut pushed_scope = false;
        if CONTAINER_NODES.contains(&kind) {
            if let Some(name) = self.node_name(node) {
                self.scope.push(ScopeFrame {
                    name,
                    method_container: METHOD_CONTAINER_NODES.contains(&kind),
                });
                pushed_scope = true;
            }
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(child);
        }

        if pushed_scope {
            self.scope.pop();
        }
    }

    fn in_container(&self) -> bool {
        self.scope.iter().any(|frame| frame.method_container)
    }

    /// Name of a declaration node via its grammar field, with an identifier
    /// scan as fallback.
    fn node_name(&self, node: Node) -> Option<String> {
        let field = if node.kind() == IMPL_NODE {
            "type"
        } else {
            "name"
        };
        if let Some(name_node) = node.child_by_field_name(field) {
            if let Ok(text) = name_node.utf8_text(self.content.as_bytes()) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if matches!(child.kind(), "identifier" | "type_identifier" | "name") {
                if let Ok(text) = child.utf8_text(self.content.as_bytes()) {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        return Some(trimmed.to_string());
                    }
                }
            }
        }
        None
    }

    fn push_symbol(&mut self, node: Node, kind: SymbolKind, name: String) {
        let start = node.start_position();
        let end = node.end_position();
        let qualified_name = if self.scope.is_empty() {
            name.clone()
        } else {
            let separator = self.language.scope_separator();
            let prefix = self
                .scope
                .iter()
                .map(|frame| frame.name.as_str())
                .collect::<Vec<_>>()
                .join(separator);
            format!("{prefix}{separator}{name}")
        };

        self.output.symbols.push(ParsedSymbol {
            name,
            qualified_name,
            kind,
            signature: self.signature_of(node),
            documentation: self.documentation_of(node),
            start_line: start.row as u32 + 1,
            start_col: start.column as u32,
            end_line: end.row as u32 + 1,
            end_col: end.column as u32,
        });
    }

    /// First source line of the declaration, trimmed and bounded.
    fn signature_of(&self, node: Node) -> Option<String> {
        let text = node.utf8_text(self.content.as_bytes()).ok()?;
        let first_line = text.lines().next()?.trim();
        if first_line.is_empty() {
            return None;
        }
        let mut signature = first_line.trim_end_matches('{').trim_end().to_string();
        if signature.len() > 200 {
            signature.truncate(200);
        }
        Some(signature)
    }

    /// Documentation attached to a declaration: preceding `///` / `//!` or
    /// block comments, or a Python docstring as the first body statement.
    fn documentation_of(&self, node: Node) -> Option<String> {
        if self.language == GrammarLanguage::Python {
            return self.python_docstring(node);
        }

        let mut lines: Vec<String> = Vec::new();
        let mut sibling = node.prev_sibling();
        while let Some(prev) = sibling {
            let kind = prev.kind();
            if kind != "line_comment" && kind != "block_comment" && kind != "comment" {
                break;
            }
            let text = prev.utf8_text(self.content.as_bytes()).ok()?;
            let cleaned = clean_comment(text);
            if !cleaned.is_empty() {
                lines.push(cleaned);
            }
            sibling = prev.prev_sibling();
        }
        if lines.is_empty() {
            return None;
        }
        lines.reverse();
        Some(lines.join("\n"))
    }

    fn python_docstring(&self, node: Node) -> Option<String> {
        let body = node.child_by_field_name("body")?;
        let first = body.named_child(0)?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let string_node = first.named_child(0)?;
        if string_node.kind() != "string" {
            return None;
        }
        let raw = string_node.utf8_text(self.content.as_bytes()).ok()?;
        let cleaned = raw
            .trim_matches(|c| c == '"' || c == '\'')
            .trim()
            .to_string();
        if cleaned.is_empty() {
            None
        } else {
            Some(cleaned)
        }
    }

    fn extract_import(&mut self, node: Node) {
        let line = node.start_position().row as u32 + 1;
        let module = match self.language {
            GrammarLanguage::Rust => node
                .child_by_field_name("argument")
                .and_then(|n| n.utf8_text(self.content.as_bytes()).ok())
                .map(str::to_string),
            GrammarLanguage::Python => {
                // `import a.b` carries the dotted name; `from a import b`
                // carries it in the module_name field.
                node.child_by_field_name("module_name")
                    .or_else(|| {
                        let mut cursor = node.walk();
                        let found = node
                            .children(&mut cursor)
                            .find(|c| matches!(c.kind(), "dotted_name" | "aliased_import"));
                        found
                    })
                    .and_then(|n| n.utf8_text(self.content.as_bytes()).ok())
                    .map(str::to_string)
            }
            GrammarLanguage::TypeScript | GrammarLanguage::JavaScript => node
                .child_by_field_name("source")
                .and_then(|n| n.utf8_text(self.content.as_bytes()).ok())
                .map(|s| s.trim_matches(|c| c == '"' || c == '\'').to_string()),
        };

        if let Some(module) = module {
            let module = module.trim().to_string();
            if !module.is_empty() {
                self.output.imports.push(ParsedImport {
                    module: module.clone(),
                    line,
                });
                let name = module
                    .rsplit(['.', ':', '/'])
                    .next()
                    .unwrap_or(&module)
                    .to_string();
                self.output.references.push(ParsedReference {
                    name,
                    line,
                    col: node.start_position().column as u32,
                    kind: ReferenceKind::Import,
                });
            }
        }
    }

    fn extract_call(&mut self, node: Node) {
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        // For `a.b.c()` keep the invoked member name.
        let callee = match function.kind() {
            "field_expression" => function.child_by_field_name("field"),
            "attribute" => function.child_by_field_name("attribute"),
            "member_expression" => function.child_by_field_name("property"),
            "scoped_identifier" => function.child_by_field_name("name"),
            _ => Some(function),
        };
        let Some(callee) = callee else { return };
        if let Ok(name) = callee.utf8_text(self.content.as_bytes()) {
            let name = name.trim();
            if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                let pos = callee.start_position();
                self.output.references.push(ParsedReference {
                    name: name.to_string(),
                    line: pos.row as u32 + 1,
                    col: pos.column as u32,
                    kind: ReferenceKind::Call,
                });
            }
        }
    }

    fn extract_python_bases(&mut self, node: Node) {
        let Some(superclasses) = node.child_by_field_name("superclasses") else {
            return;
        };
        let mut cursor = superclasses.walk();
        for child in superclasses.children(&mut cursor) {
            if child.kind() == "identifier" {
                if let Ok(name) = child.utf8_text(self.content.as_bytes()) {
                    let pos = child.start_position();
                    self.output.references.push(ParsedReference {
                        name: name.to_string(),
                        line: pos.row as u32 + 1,
                        col: pos.column as u32,
                        kind: ReferenceKind::Inherit,
                    });
                }
            }
        }
    }

    fn extract_js_heritage(&mut self, node: Node) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "class_heritage" {
                let mut inner = child.walk();
                for part in child.children(&mut inner) {
                    if part.kind() == "identifier" {
                        if let Ok(name) = part.utf8_text(self.content.as_bytes()) {
                            let pos = part.start_position();
                            self.output.references.push(ParsedReference {
                                name: name.to_string(),
                                line: pos.row as u32 + 1,
                                col: pos.column as u32,
                                kind: ReferenceKind::Inherit,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Top-level JS/TS `const x = ...` declarators become variable symbols.
    fn extract_declarators(&mut self, node: Node) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == VARIABLE_DECLARATOR {
                if let Some(name) = self.node_name(child) {
                    self.push_symbol(child, SymbolKind::Variable, name);
                }
            }
        }
    }
}

fn clean_comment(raw: &str) -> String {
    raw.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches("///")
                .trim_start_matches("//!")
                .trim_start_matches("//")
                .trim_start_matches("/*")
                .trim_end_matches("*/")
                .trim_start_matches('*')
                .trim()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn make_plugin(language: GrammarLanguage) -> Result<Arc<dyn LanguagePlugin>> {
    Ok(Arc::new(GrammarPlugin::new(language)?))
}

fn construct_rust() -> Result<Arc<dyn LanguagePlugin>> {
    make_plugin(GrammarLanguage::Rust)
}
fn construct_python() -> Result<Arc<dyn LanguagePlugin>> {
    make_plugin(GrammarLanguage::Python)
}
fn construct_typescript() -> Result<Arc<dyn LanguagePlugin>> {
    make_plugin(GrammarLanguage::TypeScript)
}
fn construct_javascript() -> Result<Arc<dyn LanguagePlugin>> {
    make_plugin(GrammarLanguage::JavaScript)
}

/// Registration records for all grammar plugins.
pub fn specs() -> Vec<PluginSpec> {
    vec![
        PluginSpec {
            language: "rust",
            extensions: GrammarLanguage::Rust.extensions(),
            variant: PluginVariant::Grammar,
            construct: construct_rust,
        },
        PluginSpec {
            language: "python",
            extensions: GrammarLanguage::Python.extensions(),
            variant: PluginVariant::Grammar,
            construct: construct_python,
        },
        PluginSpec {
            language: "typescript",
            extensions: GrammarLanguage::TypeScript.extensions(),
            variant: PluginVariant::Grammar,
            construct: construct_typescript,
        },
        PluginSpec {
            language: "javascript",
            extensions: GrammarLanguage::JavaScript.extensions(),
            variant: PluginVariant::Grammar,
            construct: construct_javascript,
        },
    ]
}
