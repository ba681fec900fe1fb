//! OCI Content Digest validation and referrer-tag conventions.
//!
//! This module wraps the `oci_spec::image::Digest` type to integrate with
//! Reap's error handling, and implements the tag naming convention that
//! attaches referrer artifacts (signatures, attestations, SBOMs) to a
//! subject digest.

use crate::error::{ReapError, Result};
use oci_spec::image::Digest as OciDigest;
use std::fmt;
use std::str::FromStr;


/// Length of a referrer tag: "sha256-" plus 64 hex characters.
///
/// Registries truncate tag names derived from digests to this length, so
/// referrer detection compares only the first 71 characters of a tag.
pub const REFERRER_TAG_LEN: usize = 71;

/// Represents a content digest, wrapping the `oci_spec::image::Digest` type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest(OciDigest);

impl FromStr for Digest {
    type Err = ReapError;

    fn from_str(s: &str) -> Result<Self> {
        let oci_digest = OciDigest::from_str(s)
            .map_err(|e| ReapError::malformed_with(format!("digest '{}'", s), e))?;
        Ok(Digest(oci_digest))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Digest {
    /// Returns the algorithm component (e.g. "sha256").
    pub fn algorithm(&self) -> String {
        self.0.algorithm().to_string()
    }

    /// Returns the hex component of the digest.
    pub fn hex(&self) -> &str {
        self.0.digest()
    }

    /// Returns the tag name under which referrers of this digest are
    /// published: the digest with `:` replaced by `-`, truncated to
    /// [`REFERRER_TAG_LEN`] characters.
    ///
    /// # Examples
    ///
    /// ```
    /// use libreap::digest::Digest;
    /// use std::str::FromStr;
    ///
    /// let digest = Digest::from_str(
    ///     "sha256:7d865e959b2466918c9863afca942d0fb89d7c9ac0c99bafc3749504ded97730",
    /// )
    /// .unwrap();
    /// assert_eq!(
    ///     digest.referrer_tag(),
    ///     "sha256-7d865e959b2466918c9863afca942d0fb89d7c9ac0c99bafc3749504ded97730",
    /// );
    /// ```
    pub fn referrer_tag(&self) -> String {
        let mut tag = format!("{}-{}", self.algorithm(), self.hex());
        tag.truncate(REFERRER_TAG_LEN);
        tag
    }
}

/// Returns true when `tag` follows the referrer naming convention:
/// `sha256-` followed by 64 hex characters, with an optional suffix.
///
/// # Examples
///
/// ```
/// use libreap::digest::is_referrer_tag;
///
/// assert!(is_referrer_tag(
///     "sha256-7d865e959b2466918c9863afca942d0fb89d7c9ac0c99bafc3749504ded97730"
/// ));
/// assert!(is_referrer_tag(
///     "sha256-7d865e959b2466918c9863afca942d0fb89d7c9ac0c99bafc3749504ded97730.sig"
/// ));
/// assert!(!is_referrer_tag("v1.2.3"));
/// assert!(!is_referrer_tag("sha256-tooshort"));
/// ```
pub fn is_referrer_tag(tag: &str) -> bool {
    referrer_subject_hex(tag).is_some()
}

/// Extracts the subject hex from a referrer tag, or `None` when the tag does
/// not follow the convention.
pub fn referrer_subject_hex(tag: &str) -> Option<&str> {
    let hex = tag.strip_prefix("sha256-")?;
    if hex.len() < 64 {
        return None;
    }
    let hex = &hex[..64];
    if hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
        Some(hex)
    } else {
        None
    }
}

/// Returns the digest string (`sha256:<hex>`) named by a referrer tag, or
/// `None` when the tag is not a referrer tag.
pub fn referrer_subject_digest(tag: &str) -> Option<String> {
    referrer_subject_hex(tag).map(|hex| format!("sha256:{}", hex))
}

/// Returns true when `tag` names a referrer of `subject`.
///
/// Detection is a prefix match against the subject's referrer tag so that
/// suffixed forms (e.g. `sha256-<hex>.sig`) are recognised.
pub fn tag_refers_to(tag: &str, subject: &Digest) -> bool {
    tag.starts_with(&subject.referrer_tag())
}
