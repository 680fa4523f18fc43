use regex::{Regex, RegexBuilder};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid url pattern {pattern:?}: {source}")]
pub struct PatternError {
    pattern: String,
    source: regex::Error,
}

/// Ordered set of glob-style URL patterns (`*` and `?` wildcards).
///
/// Patterns are plain data supplied by configuration; each one is compiled
/// to an anchored case-insensitive regex when the set is built, so matching
/// during a harvest pass is allocation-free.
#[derive(Debug, Clone)]
pub struct PatternSet {
    entries: Vec<PatternEntry>,
}

#[derive(Debug, Clone)]
struct PatternEntry {
    raw: String,
    regex: Regex,
}

impl PatternSet {
    pub fn compile(globs: &[String]) -> Result<Self, PatternError> {
        let mut entries = Vec::with_capacity(globs.len());
        for glob in globs {
            let regex = compile_glob(glob).map_err(|source| PatternError {
                pattern: glob.clone(),
                source,
            })?;
            entries.push(PatternEntry {
                raw: glob.clone(),
                regex,
            });
        }
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn matches(&self, url: &str) -> bool {
        self.entries.iter().any(|entry| entry.regex.is_match(url))
    }

    /// Returns the first configured pattern that matches, in config order.
    pub fn first_match(&self, url: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.regex.is_match(url))
            .map(|entry| entry.raw.as_str())
    }
}

fn compile_glob(glob: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    RegexBuilder::new(&pattern).case_insensitive(true).build()
}
