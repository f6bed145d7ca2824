//! Generic text plugin: claims every file, extracts nothing.
//!
//! Used when no specialized plugin covers an extension, and as the stand-in
//! for a plugin that failed construction — files still get a full-text row,
//! just no structural data.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::plugins::{Capabilities, LanguagePlugin, PluginOutput, PluginVariant};

pub struct GenericTextPlugin;

impl GenericTextPlugin {
    pub fn shared() -> Arc<dyn LanguagePlugin> {
        Arc::new(GenericTextPlugin)
    }
}

impl LanguagePlugin for GenericTextPlugin {
    fn language(&self) -> &'static str {
        "text"
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

    fn memory_bytes(&self) -> u64 {
        0
    }
}
