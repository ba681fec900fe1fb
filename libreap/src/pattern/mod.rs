//! Tag and package name matching.
//!
//! Policy options select tags and packages either by a comma-separated list
//! of wildcard patterns (`v1.*`, `nightly-?`) or by a single regular
//! expression, chosen by one mode flag. Wildcards compile to anchored
//! regular expressions so a pattern always matches the whole name.

use crate::error::{ReapError, Result};
use regex::Regex;


/// A compiled matcher over tag or package names.
#[derive(Debug)]
pub struct Matcher {
    patterns: Vec<Regex>,
}

impl Matcher {
    /// Compiles a matcher from a user-supplied selection string.
    ///
    /// In wildcard mode the string is a comma-separated list where `*`
    /// matches any run of characters and `?` matches a single character.
    /// In regex mode the whole string is one regular expression.
    ///
    /// # Examples
    ///
    /// ```
    /// use libreap::pattern::Matcher;
    ///
    /// let matcher = Matcher::new("v1.*, latest", false).unwrap();
    /// assert!(matcher.matches("v1.2.3"));
    /// assert!(matcher.matches("latest"));
    /// assert!(!matcher.matches("v2.0"));
    ///
    /// let matcher = Matcher::new(r"^release-\d+$", true).unwrap();
    /// assert!(matcher.matches("release-42"));
    /// assert!(!matcher.matches("release-rc"));
    /// ```
    pub fn new(selection: &str, use_regex: bool) -> Result<Self> {
        let patterns = if use_regex {
            vec![compile_regex(selection)?]
        } else {
            selection
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(wildcard_to_regex)
                .collect::<Result<Vec<_>>>()?
        };

        if patterns.is_empty() {
            return Err(ReapError::malformed(format!(
                "pattern selection '{}': no patterns in it",
                selection
            )));
        }

        Ok(Self { patterns })
    }

    /// Returns true when any pattern matches the candidate.
    pub fn matches(&self, candidate: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(candidate))
    }
}

/// Returns true when a name contains wildcard metacharacters, i.e. it only
/// resolves through expansion rather than naming one thing literally.
pub fn is_wildcard(name: &str) -> bool {
    name.contains('*') || name.contains('?')
}

fn compile_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| ReapError::malformed_with(format!("regex '{}'", pattern), e))
}

/// Translates one wildcard pattern into an anchored regex.
fn wildcard_to_regex(pattern: &str) -> Result<Regex> {
    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => translated.push_str(".*"),
            '?' => translated.push('.'),
            _ => translated.push_str(&regex::escape(&ch.to_string())),
        }
    }
    translated.push('$');
    compile_regex(&translated)
}
