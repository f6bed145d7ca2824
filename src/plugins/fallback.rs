//! Regex-driven fallback plugins for languages without a bundled grammar.
//!
//! Line-oriented extraction only: good enough for definition lookup, never
//! authoritative. Rules run in order per line; the first match wins.

use anyhow::{Context, Result};
use regex::Regex;
use std::path::Path;
use std::sync::Arc;

use crate::plugins::{
    Capabilities, LanguagePlugin, ParsedImport, ParsedSymbol, PluginOutput, PluginSpec,
    PluginVariant,
};
use crate::types::SymbolKind;

/// One line rule: pattern with the symbol name in capture group 1.
struct SymbolRule {
    pattern: Regex,
    kind: SymbolKind,
}

/// A regex-driven plugin for one language.
pub struct RegexPlugin {
    language: &'static str,
    extensions: &'static [&'static str],
    symbol_rules: Vec<SymbolRule>,
    import_rule: Option<Regex>,
}

impl RegexPlugin {
    pub fn go() -> Result<Self> {
        Ok(Self {
            language: "go",
            extensions: &["go"],
            symbol_rules: vec![
                SymbolRule {
                    // Method: func with a receiver.
                    pattern: Regex::new(r"^func\s+\([^)]*\)\s+([A-Za-z_]\w*)\s*\(")
                        .context("go method rule")?,
                    kind: SymbolKind::Method,
                },
                SymbolRule {
                    pattern: Regex::new(r"^func\s+([A-Za-z_]\w*)\s*\(").context("go func rule")?,
                    kind: SymbolKind::Function,
                },
                SymbolRule {
                    pattern: Regex::new(r"^type\s+([A-Za-z_]\w*)\s+(?:struct|interface)\b")
                        .context("go type rule")?,
                    kind: SymbolKind::Class,
                },
                SymbolRule {
                    pattern: Regex::new(r"^type\s+([A-Za-z_]\w*)\s+").context("go alias rule")?,
                    kind: SymbolKind::Type,
                },
                SymbolRule {
                    pattern: Regex::new(r"^(?:var|const)\s+([A-Za-z_]\w*)\b")
                        .context("go var rule")?,
                    kind: SymbolKind::Variable,
                },
            ],
            import_rule: Some(Regex::new(r#"^\s*(?:import\s+)?"([^"]+)"\s*$"#)?),
        })
    }

    pub fn java() -> Result<Self> {
        Ok(Self {
            language: "java",
            extensions: &["java"],
            symbol_rules: vec![
                SymbolRule {
                    pattern: Regex::new(
                        r"^\s*(?:public\s+|private\s+|protected\s+)?(?:static\s+)?(?:final\s+|abstract\s+)?(?:class|interface|enum|record)\s+([A-Za-z_]\w*)",
                    )
                    .context("java class rule")?,
                    kind: SymbolKind::Class,
                },
                SymbolRule {
                    // Method-looking line: modifiers, return type, name, paren.
                    pattern: Regex::new(
                        r"^\s*(?:public|private|protected)\s+(?:static\s+)?(?:final\s+)?[\w<>\[\],.\s]+\s+([A-Za-z_]\w*)\s*\([^;]*$",
                    )
                    .context("java method rule")?,
                    kind: SymbolKind::Method,
                },
            ],
            import_rule: Some(Regex::new(r"^\s*import\s+(?:static\s+)?([\w.]+(?:\.\*)?);")?),
        })
    }
}

impl LanguagePlugin for RegexPlugin {
    fn language(&self) -> &'static str {
        self.language
    }

    fn variant(&self) -> PluginVariant {
        PluginVariant::Regex
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            symbols: true,
            references: false,
            imports: self.import_rule.is_some(),
        }
    }

    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                let ext = ext.to_lowercase();
                self.extensions.contains(&ext.as_str())
            })
            .unwrap_or(false)
    }

    fn index(&self, _rel_path: &str, content: &str) -> Result<PluginOutput> {
        let mut output = PluginOutput::default();

        for (line_idx, line) in content.lines().enumerate() {
            let line_no = line_idx as u32 + 1;

            let mut matched = false;
            for rule in &self.symbol_rules {
                if let Some(captures) = rule.pattern.captures(line) {
                    if let Some(name) = captures.get(1) {
                        output.symbols.push(ParsedSymbol {
                            name: name.as_str().to_string(),
                            qualified_name: name.as_str().to_string(),
                            kind: rule.kind,
                            signature: Some(line.trim().trim_end_matches('{').trim().to_string()),
                            documentation: None,
                            start_line: line_no,
                            start_col: name.start() as u32,
                            end_line: line_no,
                            end_col: name.end() as u32,
                        });
                        matched = true;
                        break;
                    }
                }
            }
            if matched {
                continue;
            }

            if let Some(import_rule) = &self.import_rule {
                if let Some(captures) = import_rule.captures(line) {
                    if let Some(module) = captures.get(1) {
                        output.imports.push(ParsedImport {
                            module: module.as_str().to_string(),
                            line: line_no,
                        });
                    }
                }
            }
        }

        Ok(output)
    }

    fn memory_bytes(&self) -> u64 {
        // Compiled automata only.
        256 * 1024
    }
}

fn construct_go() -> Result<Arc<dyn LanguagePlugin>> {
    Ok(Arc::new(RegexPlugin::go()?))
}
fn construct_java() -> Result<Arc<dyn LanguagePlugin>> {
    Ok(Arc::new(RegexPlugin::java()?))
}

/// Registration records for all fallback plugins.
pub fn specs() -> Vec<PluginSpec> {
    vec![
        PluginSpec {
            language: "go",
            extensions: &["go"],
            variant: PluginVariant::Regex,
            construct: construct_go,
        },
        PluginSpec {
            language: "java",
            extensions: &["java"],
            variant: PluginVariant::Regex,
            construct: construct_java,
        },
    ]
}
