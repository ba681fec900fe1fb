//! Cleanup run configuration.
//!
//! A [`CleanupConfig`] is built once by the caller (the CLI, a test) and
//! passed by reference into every component. It is never mutated during a
//! run; all defaulting is expressed through accessor methods so the stored
//! value reflects exactly what the user asked for.

use crate::error::{ReapError, Result};
use crate::pattern;
use chrono::Duration;
use regex::Regex;


/// Options consumed by the cleanup engine.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// Owner (user or organisation) of the target packages.
    pub owner: String,
    /// Package names or patterns; comma-separated input is split upstream.
    pub packages: Vec<String>,
    /// Allow patterns in `packages` and expand them via the packages API.
    pub expand_packages: bool,
    /// GitHub token used for both the packages API and the registry login.
    pub token: String,

    /// Tags to delete: wildcard list or regex, per `use_regex`.
    pub delete_tags: Option<String>,
    /// Tags to protect from every stage: wildcard list or regex.
    pub exclude_tags: Option<String>,
    /// Interpret `delete_tags`/`exclude_tags`/package patterns as regexes.
    pub use_regex: bool,

    /// Delete every untagged top-level version. `None` means unset, which
    /// turns into `true` when no other selection option is configured.
    pub delete_untagged: Option<bool>,
    /// Delete index manifests all of whose children are missing.
    pub delete_ghost_images: bool,
    /// Delete index manifests with at least one missing child.
    pub delete_partial_images: bool,
    /// Delete referrer-tagged versions whose subject no longer exists.
    pub delete_orphaned_images: bool,

    /// Keep this many of the newest tagged versions, delete the rest.
    pub keep_n_tagged: Option<usize>,
    /// Keep this many of the newest untagged versions, delete the rest.
    pub keep_n_untagged: Option<usize>,

    /// Only consider versions last updated before now minus this duration.
    pub older_than: Option<Duration>,

    /// Log intended deletions without performing them.
    pub dry_run: bool,
    /// Run the post-cleanup integrity scan.
    pub validate: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            packages: Vec::new(),
            expand_packages: false,
            token: String::new(),
            delete_tags: None,
            exclude_tags: None,
            use_regex: false,
            delete_untagged: None,
            delete_ghost_images: false,
            delete_partial_images: false,
            delete_orphaned_images: false,
            keep_n_tagged: None,
            keep_n_untagged: None,
            older_than: None,
            dry_run: false,
            validate: false,
        }
    }
}

impl CleanupConfig {
    /// Checks option consistency. Called before any I/O; every violation is
    /// a configuration error that fails the run immediately.
    pub fn validate(&self) -> Result<()> {
        if self.owner.is_empty() {
            return Err(ReapError::bad_config("owner must be set"));
        }
        if self.token.is_empty() {
            return Err(ReapError::bad_config("a GitHub token is required"));
        }
        if self.packages.is_empty() {
            return Err(ReapError::bad_config("at least one package must be named"));
        }
        if self.delete_ghost_images && self.delete_partial_images {
            return Err(ReapError::bad_config(
                "delete-ghost-images and delete-partial-images are mutually exclusive \
                 (partial already covers ghosts)",
            ));
        }
        if self.keep_n_untagged.is_some() && self.delete_untagged == Some(true) {
            return Err(ReapError::bad_config(
                "keep-n-untagged and delete-untagged are mutually exclusive",
            ));
        }
        if !self.expand_packages {
            if let Some(pattern) = self.packages.iter().find(|p| pattern::is_wildcard(p)) {
                return Err(ReapError::bad_config(format!(
                    "package pattern '{}' requires expand-packages and a token able to \
                     list the owner's packages",
                    pattern
                )));
            }
        }
        Ok(())
    }

    /// Whether any selection option (tag deletion, structural cleanup, or a
    /// keep count) is configured. When none is, deleting untagged versions
    /// becomes the default action.
    fn any_selection_configured(&self) -> bool {
        self.delete_tags.is_some()
            || self.delete_ghost_images
            || self.delete_partial_images
            || self.delete_orphaned_images
            || self.keep_n_tagged.is_some()
            || self.keep_n_untagged.is_some()
    }

    /// The effective delete-untagged setting after defaulting: an explicit
    /// value wins; otherwise true iff nothing else was configured.
    pub fn delete_untagged_effective(&self) -> bool {
        match self.delete_untagged {
            Some(value) => value,
            None => !self.any_selection_configured(),
        }
    }
}

/// Parses a human interval like `1 second`, `15 minutes` or `30 years`.
///
/// A bare number is rejected: the unit is required so that misconfigured
/// inputs fail loudly instead of silently meaning seconds or days.
///
/// # Examples
///
/// ```
/// use libreap::config::parse_interval;
///
/// assert_eq!(parse_interval("90 seconds").unwrap().num_seconds(), 90);
/// assert_eq!(parse_interval("2 weeks").unwrap().num_days(), 14);
/// assert!(parse_interval("42").is_err());
/// ```
pub fn parse_interval(input: &str) -> Result<Duration> {
    let pattern = Regex::new(r"(?i)^\s*(\d+)\s*(second|minute|hour|day|week|month|year)s?\s*$")
        .expect("interval pattern is valid");

    let captures = pattern.captures(input).ok_or_else(|| {
        ReapError::bad_config(format!(
            "Cannot parse interval '{}': expected '<count> <unit>' with a unit of \
             seconds, minutes, hours, days, weeks, months or years",
            input
        ))
    })?;

    let count: i64 = captures[1]
        .parse()
        .map_err(|e| ReapError::bad_config_with(format!("interval '{}' overflows", input), e))?;

    let duration = match captures[2].to_ascii_lowercase().as_str() {
        "second" => Duration::seconds(count),
        "minute" => Duration::minutes(count),
        "hour" => Duration::hours(count),
        "day" => Duration::days(count),
        "week" => Duration::weeks(count),
        "month" => Duration::days(count * 30),
        "year" => Duration::days(count * 365),
        _ => unreachable!("unit restricted by the pattern"),
    };

    Ok(duration)
}
