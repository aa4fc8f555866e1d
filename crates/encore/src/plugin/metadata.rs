//! Plugin Metadata
//!
//! Extracts the `@field value` header comment at the top of a plugin file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Comment syntax a header is looked up with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStyle {
    /// Scripts: only a doc-style `/** ... */` block counts, so a plain
    /// `/* license */` banner is never mistaken for metadata
    Script,
    /// Stylesheets: any `/* ... */` block counts
    Page,
}

/// Structured plugin metadata with the fixed fields always present
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PluginMetadata {
    pub name: String,
    pub author: String,
    pub version: String,
    pub description: String,
    pub license: String,
    pub homepage: String,
    /// Any other declared field, verbatim
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl PluginMetadata {
    /// Metadata for a plugin without a header
    pub fn defaults(id: &str) -> Self {
        Self {
            name: id.to_string(),
            author: "Unknown".to_string(),
            version: "0.0.0".to_string(),
            description: String::new(),
            license: String::new(),
            homepage: String::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Set a field by header key. Fixed fields match case-insensitively;
    /// anything else is kept under the key as written.
    fn set(&mut self, key: &str, value: &str) {
        let slot = match key.to_ascii_lowercase().as_str() {
            "name" => &mut self.name,
            "author" => &mut self.author,
            "version" => &mut self.version,
            "description" => &mut self.description,
            "license" => &mut self.license,
            "homepage" => &mut self.homepage,
            _ => {
                self.extra.insert(key.to_string(), value.to_string());
                return;
            }
        };
        if !value.is_empty() {
            *slot = value.to_string();
        }
    }
}

/// Parse the header of `source`. Never fails: a missing or malformed header
/// just yields the defaults for `id`.
pub fn parse_metadata(id: &str, source: &str, style: SourceStyle) -> PluginMetadata {
    let mut metadata = PluginMetadata::defaults(id);

    let Some(block) = header_block(source, style) else {
        return metadata;
    };

    for line in block.lines() {
        let line = line.trim_start_matches(|c: char| c.is_whitespace() || c == '*');
        let Some(rest) = line.strip_prefix('@') else {
            continue;
        };

        let key_len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(rest.len());
        if key_len == 0 {
            continue;
        }
        let (key, value) = rest.split_at(key_len);
        metadata.set(key, value.trim());
    }

    metadata
}

/// Body of the first block comment, if the file starts with one
fn header_block(source: &str, style: SourceStyle) -> Option<&str> {
    let source = source.trim_start_matches('\u{feff}').trim_start();

    let body = match style {
        SourceStyle::Script => {
            let body = source.strip_prefix("/**")?;
            // `/**/` is an empty plain comment, not a doc block
            if body.starts_with('/') {
                return None;
            }
            body
        }
        SourceStyle::Page => source.strip_prefix("/*")?,
    };

    let end = body.find("*/")?;
    Some(&body[..end])
}
