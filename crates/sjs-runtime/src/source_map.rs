use std::collections::HashMap;
use std::sync::Mutex;

use crate::error_map::lock;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SourceEntry {
    display: String,
    start_line: usize,
}

/// Maps compiled script sources back to the file they were extracted from.
///
/// Each compiled snippet is keyed by a unique source key; the entry holds the
/// name shown to users and the line the snippet's first line occupies there.
/// Entries are written at compile time and live as long as the runtime.
#[derive(Debug, Default)]
pub struct SourceMapCache {
    entries: Mutex<HashMap<String, SourceEntry>>,
}

impl SourceMapCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the source key for a snippet of `name` starting at `start_line`.
    pub fn key_for(name: &str, start_line: usize) -> String {
        if start_line <= 1 {
            name.to_string()
        } else {
            format!("{}@{}", name, start_line)
        }
    }

    pub fn record(&self, key: &str, display: &str, start_line: usize) {
        lock(&self.entries).insert(
            key.to_string(),
            SourceEntry {
                display: display.to_string(),
                start_line: start_line.max(1),
            },
        );
    }

    pub fn display_name(&self, key: &str) -> String {
        lock(&self.entries)
            .get(key)
            .map(|entry| entry.display.clone())
            .unwrap_or_else(|| key.to_string())
    }

    /// Translates a snippet-relative line under `key` into the display name
    /// and line of the original file. Unknown keys pass through unchanged.
    pub fn resolve(&self, key: &str, line: usize) -> (String, usize) {
        match lock(&self.entries).get(key) {
            Some(entry) => (entry.display.clone(), line + entry.start_line - 1),
            None => (key.to_string(), line),
        }
    }
}
