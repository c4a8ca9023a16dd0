// Extension → reader lookup used by `InputPackage::load`.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Reads a file into a JSON value.
pub type FileReader = fn(&Path) -> Result<Value>;

/// Maps lower-cased file extensions (with the leading dot, e.g. `.json`) to readers.
#[derive(Clone)]
pub struct FileReaderRegistry {
    readers: HashMap<String, FileReader>,
}

impl FileReaderRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            readers: HashMap::new(),
        }
    }

    /// Register `reader` for each of `suffixes`, replacing any existing entry.
    pub fn register(&mut self, reader: FileReader, suffixes: &[&str]) -> &mut Self {
        for suffix in suffixes {
            self.readers.insert(normalize_suffix(suffix), reader);
        }
        self
    }

    /// Merge `other` on top of `self`; entries in `other` win.
    pub fn merged_with(&self, other: &FileReaderRegistry) -> FileReaderRegistry {
        let mut merged = self.clone();
        merged
            .readers
            .extend(other.readers.iter().map(|(k, v)| (k.clone(), *v)));
        merged
    }

    /// Find the reader for a path's extension.
    pub fn reader_for(&self, path: &Path) -> Option<FileReader> {
        let ext = path.extension()?.to_string_lossy();
        self.readers.get(&normalize_suffix(&ext)).copied()
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}

impl Default for FileReaderRegistry {
    /// Registry with the built-in `.json` and `.txt` readers.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(load_json, &[".json"]);
        registry.register(load_text, &[".txt"]);
        registry
    }
}

fn normalize_suffix(suffix: &str) -> String {
    let lower = suffix.to_lowercase();
    if lower.starts_with('.') {
        lower
    } else {
        format!(".{lower}")
    }
}

/// Parse a JSON file.
pub fn load_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in '{}'", path.display()))
}

/// Read a text file as a JSON string.
pub fn load_text(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    Ok(Value::String(text))
}
