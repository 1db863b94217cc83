use anyhow::{Context, Result};
use regex::Regex;

/// A run of at least this many underscores separates body from footnotes.
pub const SEPARATOR_PATTERN: &str = r"_{5,}";

/// Splits page text into body and footnote around the underscore separator.
/// Every input character that is not the separator itself ends up in one of
/// the two outputs.
#[derive(Debug, Clone)]
pub struct FootnoteSplitter {
    separator: Regex,
}

impl FootnoteSplitter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            separator: Regex::new(SEPARATOR_PATTERN).context("invalid footnote separator pattern")?,
        })
    }

    pub fn split(&self, body: &str, foot: &str) -> (String, String) {
        let body = body.trim();
        let foot = foot.trim();

        if !body.is_empty() {
            return match self.split_once(body) {
                Some((head, tail)) => (head.to_string(), join_lines(tail, foot)),
                None => (body.to_string(), foot.to_string()),
            };
        }

        match self.split_once(foot) {
            Some((head, tail)) => (head.to_string(), tail.to_string()),
            None => (foot.to_string(), String::new()),
        }
    }

    /// Splits at the first separator. When either side is empty the separator
    /// is orphaned and stays in the tail verbatim.
    fn split_once<'t>(&self, text: &'t str) -> Option<(&'t str, &'t str)> {
        let found = self.separator.find(text)?;
        let head = text[..found.start()].trim();
        let tail = text[found.end()..].trim();
        if head.is_empty() || tail.is_empty() {
            return Some((head, text[found.start()..].trim()));
        }
        Some((head, tail))
    }
}

fn join_lines(first: &str, second: &str) -> String {
    match (first.is_empty(), second.is_empty()) {
        (true, _) => second.to_string(),
        (_, true) => first.to_string(),
        _ => format!("{first}\n{second}"),
    }
}
