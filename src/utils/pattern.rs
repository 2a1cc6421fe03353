use crate::utils::error::{Result, SyncError};
use regex::Regex;

/// Set of fnmatch-style globs (`*`, `?`, `[...]`) for paths the client never syncs.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    patterns: Vec<Regex>,
}

impl IgnoreSet {
    pub fn new<S: AsRef<str>>(globs: &[S]) -> Result<Self> {
        let patterns = globs
            .iter()
            .map(|glob| {
                let glob = glob.as_ref();
                Regex::new(&glob_to_regex(glob)).map_err(|e| SyncError::InvalidConfigValueError {
                    field: "client.ignore".to_string(),
                    value: glob.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Matches against the whole relative path and each of its components,
    /// so `*.swp` also hides `a/b/c.swp` and `.git` hides everything below it.
    pub fn is_ignored(&self, relative: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        self.patterns.iter().any(|re| {
            re.is_match(relative) || relative.split('/').any(|component| re.is_match(component))
        })
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if inner == '\\' {
                        class.push('\\');
                    }
                    class.push(inner);
                }
                if closed {
                    out.push('[');
                    out.push_str(&class);
                    out.push(']');
                } else {
                    // Unterminated class is a literal '['
                    out.push_str(r"\[");
                    out.push_str(&regex::escape(class.trim_start_matches('^')));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}
