//! Exclusion rules: glob-like lines compiled into anchored path predicates.
//!
//! Rule syntax, one rule per line:
//! - `#` starts a comment line, blank lines are ignored
//! - `*` matches zero or more characters (including `/`)
//! - every other character is literal
//! - a trailing `/` makes the rule directory-recursive: it matches the
//!   directory itself and everything beneath it
//! - on Windows `\` is accepted as a separator; elsewhere it is a literal
//!   character
//!
//! Rules are anchored at the tree root, so `config.php` only matches the file
//! at the top level while `*config.php` matches it at any depth.

use regex::Regex;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, warn};
use treecheck_common::{RuleCompileError, TreeCheckError};

#[cfg(windows)]
fn normalize_separators(rule: &str) -> String {
    rule.replace('\\', "/")
}

#[cfg(not(windows))]
fn normalize_separators(rule: &str) -> String {
    rule.to_string()
}

/// One piece of a parsed rule
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Wildcard,
}

fn tokenize(body: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut literal = String::new();

    for ch in body.chars() {
        if ch == '*' {
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            // Runs of `*` collapse into a single wildcard
            if tokens.last() != Some(&Token::Wildcard) {
                tokens.push(Token::Wildcard);
            }
        } else {
            literal.push(ch);
        }
    }
    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }

    tokens
}

fn regex_source(tokens: &[Token]) -> String {
    let mut source = String::from("^(?:");
    for token in tokens {
        match token {
            Token::Literal(text) => source.push_str(&regex::escape(text)),
            Token::Wildcard => source.push_str(".*"),
        }
    }
    source.push_str(")$");
    source
}

/// Ancestors of a `/`-separated relative path, shortest first, each of which
/// is a directory.
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/')
        .map(move |(idx, _)| &path[..idx])
        .filter(|ancestor| !ancestor.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// Matches files or directories whose whole path matches
    Path,
    /// Trailing `/`: matches directories and their entire subtree
    Directory,
}

/// A compiled exclusion rule
#[derive(Debug, Clone)]
pub struct ExclusionRule {
    source: String,
    kind: RuleKind,
    regex: Regex,
}

impl ExclusionRule {
    pub fn parse(line: &str) -> Result<Self, RuleCompileError> {
        let source = line.trim().to_string();
        let normalized = normalize_separators(&source);

        let kind = if normalized.ends_with('/') {
            RuleKind::Directory
        } else {
            RuleKind::Path
        };

        let mut body = normalized.trim_matches('/');
        while let Some(rest) = body.strip_prefix("./") {
            body = rest.trim_start_matches('/');
        }
        if body.is_empty() || body == "." {
            return Err(RuleCompileError::Empty(source));
        }
        if body.split('/').any(|segment| segment == "..") {
            return Err(RuleCompileError::ParentTraversal(source));
        }

        let regex = Regex::new(&regex_source(&tokenize(body))).map_err(|e| {
            RuleCompileError::Regex {
                rule: source.clone(),
                source: e,
            }
        })?;

        Ok(Self { source, kind, regex })
    }

    /// The rule as written
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    /// Match against exactly this path, ignoring its ancestors
    fn matches_exact(&self, path: &str, is_dir: bool) -> bool {
        match self.kind {
            RuleKind::Path => self.regex.is_match(path),
            RuleKind::Directory => is_dir && self.regex.is_match(path),
        }
    }

    /// Match against the path or any of its ancestor directories
    pub fn matches(&self, path: &str, is_dir: bool) -> bool {
        self.matches_exact(path, is_dir)
            || ancestors(path).any(|ancestor| self.matches_exact(ancestor, true))
    }
}

/// Decides whether a relative path is excluded from comparison
#[derive(Debug, Clone, Default)]
pub struct ExclusionMatcher {
    rules: Vec<ExclusionRule>,
}

impl ExclusionMatcher {
    /// A matcher that excludes nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile rule lines. Malformed rules are logged and dropped.
    pub fn compile<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut matcher = Self::empty();
        matcher.extend(lines);
        matcher
    }

    /// Compile and append more rule lines
    pub fn extend<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match ExclusionRule::parse(line) {
                Ok(rule) => {
                    debug!("Added exclusion rule: {}", rule.source());
                    self.rules.push(rule);
                }
                Err(e) => warn!("Skipping exclusion rule: {}", e),
            }
        }
    }

    /// Read rules from a file. A missing file is not an error: the result
    /// excludes nothing.
    pub fn from_file(path: &Path) -> Result<Self, TreeCheckError> {
        match fs::read_to_string(path) {
            Ok(data) => {
                let matcher = Self::compile(data.lines());
                debug!("Loaded {} exclusion rules from {:?}", matcher.len(), path);
                Ok(matcher)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("No exclusion file at {:?}, nothing will be excluded", path);
                Ok(Self::empty())
            }
            Err(e) => Err(TreeCheckError::Io(e)),
        }
    }

    /// Whether `path` (relative, `/`-separated) or any ancestor is excluded
    pub fn matches(&self, path: &str, is_dir: bool) -> bool {
        if path.is_empty() {
            return false;
        }
        self.rules.iter().any(|rule| rule.matches(path, is_dir))
    }

    pub fn rules(&self) -> &[ExclusionRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
