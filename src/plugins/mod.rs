//! Language plugin interface and built-in plugin variants.
//!
//! A plugin turns file content into structural data: symbols, references,
//! and imports. Plugins are pure with respect to storage — they return data,
//! the indexer writes. Three variants exist: grammar-driven (tree-sitter),
//! regex-driven fallback, and a generic text plugin used when no specialized
//! plugin claims a file.

pub mod fallback;
#[cfg(feature = "tree-sitter-parsing")]
pub mod grammar;
pub mod text;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::types::{ReferenceKind, SymbolKind};

/// How a plugin derives its structural data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginVariant {
    /// Parser-library backed, loaded at startup.
    Grammar,
    /// Line-regex backed.
    Regex,
    /// Claims everything, extracts nothing.
    Generic,
}

/// Which extraction capabilities a plugin implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub symbols: bool,
    pub references: bool,
    pub imports: bool,
}

/// A symbol extracted from source. Line numbers are 1-based, columns 0-based.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSymbol {
    pub name: String,
    pub qualified_name: String,
    pub kind: SymbolKind,
    pub signature: Option<String>,
    pub documentation: Option<String>,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

/// A use of a name at a location, to be resolved against symbol rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReference {
    pub name: String,
    pub line: u32,
    pub col: u32,
    pub kind: ReferenceKind,
}

/// An imported module or path.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedImport {
    pub module: String,
    pub line: u32,
}

/// Everything a plugin extracts from one file.
#[derive(Debug, Clone, Default)]
pub struct PluginOutput {
    pub symbols: Vec<ParsedSymbol>,
    pub references: Vec<ParsedReference>,
    pub imports: Vec<ParsedImport>,
}

/// Contract each language plugin implements.
///
/// `index` must be deterministic for the same input. A plugin that fails on
/// one file is logged by the indexer and the file is stored full-text-only;
/// a plugin whose construction fails is removed from the active set for the
/// process lifetime.
pub trait LanguagePlugin: Send + Sync {
    /// Language tag stored on file and symbol rows.
    fn language(&self) -> &'static str;

    fn variant(&self) -> PluginVariant;

    fn capabilities(&self) -> Capabilities;

    /// Whether this plugin claims the file at `path`.
    fn supports(&self, path: &Path) -> bool;

    /// Extract structural data from one file.
    fn index(&self, rel_path: &str, content: &str) -> Result<PluginOutput>;

    /// Slice source by 1-based inclusive line range. The default is the raw
    /// slice; grammar plugins may override to expand to enclosing nodes.
    fn extract_snippet(&self, content: &str, start_line: u32, end_line: u32) -> String {
        let start = start_line.max(1) as usize - 1;
        let count = (end_line.max(start_line) as usize).saturating_sub(start);
        content
            .lines()
            .skip(start)
            .take(count.max(1))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Approximate resident size, used by the manager's memory ceiling.
    fn memory_bytes(&self) -> u64 {
        64 * 1024
    }

    /// Called on eviction; plugins with internal caches drop them here.
    fn release(&self) {}
}

/// Constructor signature the manager invokes under its timeout guard.
pub type PluginConstructor = fn() -> Result<Arc<dyn LanguagePlugin>>;

/// Registration record for one plugin, keyed by extension.
pub struct PluginSpec {
    pub language: &'static str,
    pub extensions: &'static [&'static str],
    pub variant: PluginVariant,
    pub construct: PluginConstructor,
}

/// All built-in plugin registrations, grammar plugins first so they win
/// extension claims over fallbacks.
pub fn builtin_specs() -> Vec<PluginSpec> {
    let mut specs: Vec<PluginSpec> = Vec::new();

    #[cfg(feature = "tree-sitter-parsing")]
    specs.extend(grammar::specs());

    specs.extend(fallback::specs());
    specs
}

/// Language tag implied by a path's extension, independent of whether the
/// plugin for it is loaded. Falls back to the extension itself for known
/// text formats and to "text" otherwise.
pub fn language_for_path(path: &Path) -> &'static str {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.to_lowercase(),
        None => return "text",
    };
    for spec in builtin_specs() {
        if spec.extensions.contains(&ext.as_str()) {
            return spec.language;
        }
    }
    match ext.as_str() {
        "md" | "markdown" => "markdown",
        "toml" => "toml",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "html" | "htm" => "html",
        "css" => "css",
        "sh" | "bash" => "shell",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        "rb" => "ruby",
        _ => "text",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_specs_cover_fallback_languages() {
        let specs = builtin_specs();
        assert!(specs.iter().any(|s| s.language == "go"));
        assert!(specs.iter().any(|s| s.language == "java"));
    }

    #[cfg(feature = "tree-sitter-parsing")]
    #[test]
    fn grammar_specs_precede_fallbacks() {
        let specs = builtin_specs();
        let first_grammar = specs
            .iter()
            .position(|s| s.variant == PluginVariant::Grammar);
        let first_regex = specs.iter().position(|s| s.variant == PluginVariant::Regex);
        assert!(first_grammar.unwrap() < first_regex.unwrap());
    }

    #[test]
    fn language_detection_is_extension_based() {
        assert_eq!(language_for_path(Path::new("a/b/readme.md")), "markdown");
        assert_eq!(language_for_path(Path::new("script.sh")), "shell");
        assert_eq!(language_for_path(Path::new("no_extension")), "text");
        assert_eq!(language_for_path(Path::new("main.go")), "go");
    }

    #[test]
    fn default_snippet_is_a_raw_line_slice() {
        struct Probe;
        impl LanguagePlugin for Probe {
            fn language(&self) -> &'static str {
                "probe"
            }
            fn variant(&self) -> PluginVariant {
                PluginVariant::Generic
            }
            fn capabilities(&self) -> Capabilities {
                Capabilities::default()
            }
            fn supports(&self, _path: &Path) -> bool {
                true
            }
            fn index(&self, _rel_path: &str, _content: &str) -> Result<PluginOutput> {
                Ok(PluginOutput::default())
            }
        }

        let content = "one\ntwo\nthree\nfour\n";
        assert_eq!(Probe.extract_snippet(content, 2, 3), "two\nthree");
        assert_eq!(Probe.extract_snippet(content, 1, 1), "one");
    }
}
