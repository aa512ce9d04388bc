// src/components/filters.rs

//! Include/exclude rules for package authoring
//!
//! When a package is built from a real directory, every candidate entry is
//! tested against an ordered rule list. Rules are written one per line:
//!
//! ```text
//! # Comments start with #
//! include *.txt
//! exclude secret*.txt
//! exclude **/.git
//! ```
//!
//! # Rule Precedence
//!
//! The last rule whose pattern matches decides. Paths that no rule matches
//! are included. Specificity plays no part: a broad rule listed after a
//! narrow one overrides it.
//!
//! # Pattern Grammar
//!
//! - literal characters match themselves
//! - `?` matches one character other than `/`
//! - `*` matches any run of characters other than `/`
//! - `**` matches any run of characters including `/`
//! - `**/` additionally matches zero directories, so `**/*.txt` matches `a.txt`
//!
//! # Directory Pruning
//!
//! The tree builder asks about a directory before its contents. An
//! excluded directory is pruned: nothing below it is visited, even paths a
//! later rule would include. With `exclude *` followed by
//! `include **/*.txt`, `a.txt` is kept but `notes/a.txt` is never reached
//! because `notes` itself is excluded.
//!
//! Matching is case-sensitive unless the rule set is marked
//! case-insensitive, in which case both sides are compared after Unicode
//! lowercasing.

use serde::{Deserialize, Serialize};
use std::path::Path;
use strum_macros::{Display, EnumString};
use tracing::warn;

/// What to do with an entry whose path matches a rule
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RuleAction {
    Include,
    Exclude,
}

/// A single pattern/action pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    /// The glob pattern to match against relative paths
    pub pattern: String,
    /// Decision when the pattern matches
    pub action: RuleAction,
}

impl FilterRule {
    /// Create an include rule
    pub fn include(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            action: RuleAction::Include,
        }
    }

    /// Create an exclude rule
    pub fn exclude(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            action: RuleAction::Exclude,
        }
    }

    /// Check if this rule matches a relative path
    pub fn matches(&self, path: &str, case_insensitive: bool) -> bool {
        glob_match_with(&self.pattern, path, case_insensitive)
    }
}

/// Ordered rule list; the last matching rule wins
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    rules: Vec<FilterRule>,
    #[serde(default)]
    case_insensitive: bool,
}

impl RuleSet {
    /// Create an empty rule set (everything is included)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a rule set from rules in evaluation order
    pub fn from_rules(rules: Vec<FilterRule>) -> Self {
        Self {
            rules,
            case_insensitive: false,
        }
    }

    /// Compare paths without regard to case
    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    /// Append a rule; it takes precedence over every earlier rule
    pub fn push(&mut self, rule: FilterRule) {
        self.rules.push(rule);
    }

    /// Append every rule of another set after this set's rules
    pub fn extend(&mut self, other: &RuleSet) {
        self.rules.extend(other.rules.iter().cloned());
        self.case_insensitive |= other.case_insensitive;
    }

    /// Parse rules from text, skipping malformed lines
    ///
    /// Format: `include <pattern>` or `exclude <pattern>`
    pub fn parse(content: &str) -> Self {
        let mut set = Self::new();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match Self::parse_rule(line) {
                Some(rule) => set.push(rule),
                None => warn!("Ignoring malformed rule on line {}: {}", line_num + 1, line),
            }
        }

        set
    }

    fn parse_rule(line: &str) -> Option<FilterRule> {
        let (action, pattern) = line.split_once(char::is_whitespace)?;
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return None;
        }
        let action = action.parse::<RuleAction>().ok()?;
        Some(FilterRule {
            pattern: pattern.to_string(),
            action,
        })
    }

    /// Load rules from a file
    pub fn load_from_file(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Decide the action for a relative path
    pub fn decide(&self, path: &str) -> RuleAction {
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.matches(path, self.case_insensitive))
            .map(|rule| rule.action)
            .unwrap_or(RuleAction::Include)
    }

    /// Check whether a relative path is included
    pub fn includes(&self, path: &str) -> bool {
        self.decide(path) == RuleAction::Include
    }

    /// Get an iterator over the rules
    pub fn rules(&self) -> impl Iterator<Item = &FilterRule> {
        self.rules.iter()
    }

    /// Check if the rule set is empty
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Get the number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Char(char),
    One,
    Star,
    Globstar,
    /// `**/`: zero directories, or anything ending in `/`
    GlobstarDir,
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::with_capacity(chars.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                // Runs of three or more stars behave like `**`
                let mut j = i + 2;
                while chars.get(j) == Some(&'*') {
                    j += 1;
                }
                if chars.get(j) == Some(&'/') {
                    tokens.push(Token::GlobstarDir);
                    j += 1;
                } else {
                    tokens.push(Token::Globstar);
                }
                i = j;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '?' => {
                tokens.push(Token::One);
                i += 1;
            }
            c => {
                tokens.push(Token::Char(c));
                i += 1;
            }
        }
    }

    tokens
}

fn chars_eq(a: char, b: char, case_insensitive: bool) -> bool {
    a == b || (case_insensitive && a.to_lowercase().eq(b.to_lowercase()))
}

/// Case-sensitive glob match of a whole relative path
pub fn glob_match(pattern: &str, path: &str) -> bool {
    glob_match_with(pattern, path, false)
}

/// Glob match with an explicit case policy
///
/// Runs in O(pattern * path) time and never fails; every input string is a
/// valid pattern.
pub fn glob_match_with(pattern: &str, path: &str, case_insensitive: bool) -> bool {
    let tokens = tokenize(pattern);
    let text: Vec<char> = path.chars().collect();
    let m = text.len();

    // next[j]: tokens[i + 1..] match text[j..]
    let mut next = vec![false; m + 1];
    next[m] = true;

    for token in tokens.iter().rev() {
        let mut cur = vec![false; m + 1];
        // slash_then[j]: some '/' at k >= j with next[k + 1]
        let mut slash_then = false;

        for j in (0..=m).rev() {
            if j < m && text[j] == '/' && next[j + 1] {
                slash_then = true;
            }
            cur[j] = match *token {
                Token::Char(c) => j < m && chars_eq(c, text[j], case_insensitive) && next[j + 1],
                Token::One => j < m && text[j] != '/' && next[j + 1],
                Token::Star => next[j] || (j < m && text[j] != '/' && cur[j + 1]),
                Token::Globstar => next[j] || (j < m && cur[j + 1]),
                Token::GlobstarDir => next[j] || (j < m && slash_then),
            };
        }

        next = cur;
    }

    next[0]
}
