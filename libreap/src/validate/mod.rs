//! Post-run integrity scan.
//!
//! After a cleanup the package should be self-consistent: every child a
//! surviving index manifest lists must still exist, and every referrer tag
//! must name a surviving subject. Violations are reported as warnings; the
//! scan never fails a run by itself.

use crate::client::RegistryClient;
use crate::digest;
use crate::error::Result;
use crate::index::PackageIndex;
use std::collections::BTreeSet;
use tracing::{info, warn};


/// Scans a freshly reloaded index and returns the number of warnings.
pub fn validate_package(
    registry: &mut dyn RegistryClient,
    index: &PackageIndex,
) -> Result<u32> {
    let mut warnings = 0;

    // partition digests so only top-level indexes are checked; a child
    // listed by a surviving parent is allowed to list grandchildren that
    // the parent's deletion already removed
    let mut children: BTreeSet<String> = BTreeSet::new();
    let mut manifests = Vec::new();
    for digest_str in index.digests() {
        match registry.manifest_by_digest(digest_str) {
            Ok(manifest) => {
                if manifest.is_index() {
                    for child in manifest.child_digests() {
                        if index.contains_digest(child) {
                            children.insert(child.to_string());
                        }
                    }
                }
                manifests.push((digest_str.to_string(), manifest));
            }
            Err(e) if e.is_missing() => {
                warn!(digest = %digest_str, "version has no manifest in the registry");
                warnings += 1;
            }
            Err(e) => return Err(e),
        }
    }

    for (digest_str, manifest) in &manifests {
        if children.contains(digest_str) || !manifest.is_index() {
            continue;
        }
        for child in manifest.child_digests() {
            if !index.contains_digest(child) {
                warn!(
                    parent = %digest_str,
                    child,
                    "multi-arch image lists a child that no longer exists"
                );
                warnings += 1;
            }
        }
    }

    for tag in index.tags() {
        let Some(subject) = digest::referrer_subject_digest(tag) else {
            continue;
        };
        if !index.contains_digest(&subject) {
            warn!(tag, subject = %subject, "referrer tag has no subject version");
            warnings += 1;
        }
    }

    if warnings == 0 {
        info!(package = %index.package(), "validation passed");
    } else {
        warn!(package = %index.package(), warnings, "validation found inconsistencies");
    }
    Ok(warnings)
}
