//! Detection patterns derived from the search query.
//!
//! Construction rules:
//! - the query is split with shell quoting, so `'api key'` is one token;
//! - tokens containing `:` are qualifiers (`filename:.env`) and are skipped,
//!   unless nothing else is left, in which case the last token is used;
//! - search tokens are literal substrings, matched case-insensitively;
//! - a fixed list of credential shapes is always appended;
//! - extra lines are user regexes, compiled as-is and case-insensitively.

use regex::{Regex, RegexBuilder, RegexSet, RegexSetBuilder};
use tracing::{debug, warn};

use crate::error::SearchError;

/// Credential shapes that are worth flagging whatever the query was.
pub const BUILTIN_PATTERNS: &[&str] = &[
    r"AKIA[0-9A-Z]{16}",
    r"gh[pousr]_[A-Za-z0-9]{36}",
    r"github_pat_[A-Za-z0-9_]{22,}",
    r"xox[baprs]-[0-9A-Za-z-]{10,48}",
    r"AIza[0-9A-Za-z_\-]{35}",
    r"-----BEGIN (RSA |EC |DSA |OPENSSH )?PRIVATE KEY-----",
];

#[derive(Debug, Clone)]
pub struct PatternSet {
    sources: Vec<String>,
    set: RegexSet,
}

impl PatternSet {
    pub fn build<S: AsRef<str>>(query: &str, extra_lines: &[S]) -> Result<Self, SearchError> {
        let mut sources: Vec<String> = search_tokens(query)
            .iter()
            .map(|token| regex::escape(token))
            .collect();

        sources.extend(BUILTIN_PATTERNS.iter().map(|p| p.to_string()));

        for line in extra_lines {
            let line = line.as_ref().trim();
            if line.is_empty() {
                continue;
            }
            compile(line).map_err(|source| SearchError::InvalidPattern {
                line: line.to_string(),
                source,
            })?;
            sources.push(line.to_string());
        }

        let set = RegexSetBuilder::new(&sources)
            .case_insensitive(true)
            .build()
            .map_err(|source| SearchError::InvalidPattern {
                line: sources.join(" | "),
                source,
            })?;

        debug!("Compiled {} detection patterns", sources.len());
        Ok(PatternSet { sources, set })
    }

    /// True when any pattern matches somewhere in `line`.
    pub fn is_match(&self, line: &str) -> bool {
        self.set.is_match(line)
    }

    /// Pattern sources in evaluation order: query tokens, built-ins, extras.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl PartialEq for PatternSet {
    fn eq(&self, other: &Self) -> bool {
        self.sources == other.sources
    }
}

impl Eq for PatternSet {}

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

fn tokenize(query: &str) -> Vec<String> {
    match shell_words::split(query) {
        Ok(tokens) => tokens,
        Err(e) => {
            warn!("Could not parse query quoting ({}), splitting on whitespace", e);
            query.split_whitespace().map(str::to_string).collect()
        }
    }
}

/// The free-text part of a query, as used for local matching.
pub fn search_tokens(query: &str) -> Vec<String> {
    let tokens: Vec<String> = tokenize(query)
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect();

    let free_text: Vec<String> = tokens.iter().filter(|t| !t.contains(':')).cloned().collect();
    if !free_text.is_empty() {
        return free_text;
    }
    tokens.last().cloned().into_iter().collect()
}
