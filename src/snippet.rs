//! Snippet Extractor: a per-run cached line reader used to attach
//! source context to occurrences.
//!
//! The cache is owned by whichever `IndexStoreReader` constructs it and
//! dropped with it at end-of-run, rather than living as process-wide
//! global state.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct SnippetExtractor {
    cache: RefCell<HashMap<PathBuf, Vec<String>>>,
}

impl SnippetExtractor {
    pub fn new() -> Self {
        Self {
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// The 1-indexed source line at `line_number`, or `None` if the
    /// file can't be read or the line doesn't exist. Never surfaces an
    /// error; unreadable files simply yield an absent snippet.
    pub fn line(&self, path: &Path, line_number: u32) -> Option<String> {
        if !self.cache.borrow().contains_key(path) {
            let contents = std::fs::read_to_string(path).ok()?;
            let lines: Vec<String> = contents.lines().map(str::to_string).collect();
            self.cache.borrow_mut().insert(path.to_path_buf(), lines);
        }

        let cache = self.cache.borrow();
        let lines = cache.get(path)?;
        let index = line_number.checked_sub(1)? as usize;
        lines.get(index).cloned()
    }
}

impl Default for SnippetExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn reads_the_requested_one_indexed_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "first").unwrap();
        writeln!(file, "second").unwrap();
        let extractor = SnippetExtractor::new();
        assert_eq!(extractor.line(file.path(), 2), Some("second".to_string()));
    }

    #[test]
    fn caches_across_repeated_lookups_on_the_same_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "only line").unwrap();
        let extractor = SnippetExtractor::new();
        assert!(extractor.line(file.path(), 1).is_some());
        std::fs::remove_file(file.path()).ok();
        assert_eq!(extractor.line(file.path(), 1), Some("only line".to_string()));
    }

    #[test]
    fn missing_file_yields_none_rather_than_an_error() {
        let extractor = SnippetExtractor::new();
        assert_eq!(extractor.line(Path::new("/does/not/exist.swift"), 1), None);
    }

    #[test]
    fn out_of_range_line_yields_none() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "only line").unwrap();
        let extractor = SnippetExtractor::new();
        assert_eq!(extractor.line(file.path(), 99), None);
    }
}
