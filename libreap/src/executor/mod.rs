//! Deletion execution.
//!
//! The executor turns the pipeline's selection into platform calls while
//! preserving storage integrity: children of a deleted multi-arch image
//! are deleted only when no other parent still lists them, referrer
//! artifacts cascade with their subject, and every recursive path is
//! guarded by the set of already-deleted digests so referrer chains cannot
//! loop.
//!
//! Manifests needed for child labelling are prefetched before the first
//! deletion, so a network failure mid-run cannot leave the engine unable
//! to reason about what it already deleted.

use crate::client::RegistryClient;
use crate::digest::Digest;
use crate::error::{ReapError, Result};
use crate::graph::ImageGraph;
use crate::index::PackageIndex;
use crate::oci::child_label;
use crate::packages::{DeleteOutcome, PackageClient};
use crate::policy::PipelineOutcome;
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::{debug, info, info_span, warn};


/// Counters reported at the end of a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupStats {
    /// Versions deleted, children and referrers included.
    pub deleted_versions: u64,
    /// Multi-arch (index) manifests among them.
    pub deleted_multiarch: u64,
}

/// Removes one tag from a multi-tagged version.
///
/// A substitute manifest with the same shape but no content is uploaded
/// under the tag; the registry hashes it to a new digest and rebinds the
/// tag, leaving the original version with its remaining tags. The
/// transient version created for the substitute exists only to carry the
/// tag off and is deleted immediately.
pub fn untag_image(
    registry: &mut dyn RegistryClient,
    packages: &mut dyn PackageClient,
    index: &mut PackageIndex,
    tag: &str,
    digest: &str,
) -> Result<()> {
    let manifest = registry.manifest_by_digest(digest)?;
    let substitute = manifest.cleared();
    registry.put_manifest(tag, &substitute)?;

    index.reload(packages)?;

    let package = index.package().to_string();
    let Some(new_digest) = index.digest_by_tag(tag).map(str::to_string) else {
        return Err(ReapError::missing(format!(
            "tag '{}' right after its substitute upload",
            tag
        )));
    };
    if new_digest == digest {
        return Err(ReapError::malformed(format!(
            "substitute manifest for tag '{}': it hashed to the original digest",
            tag
        )));
    }

    let Some(version) = index.version_by_digest(&new_digest) else {
        return Err(ReapError::missing(format!(
            "version for substitute digest {}",
            new_digest
        )));
    };
    let id = version.id;

    if packages.delete_version(&package, id)? == DeleteOutcome::Missing {
        warn!(tag, id, "transient untag version already gone");
    }
    index.reload(packages)?;

    debug!(tag, original = digest, transient = %new_digest, "untag complete");
    Ok(())
}

/// Executes the pipeline's selection against one package.
pub struct Executor {
    dry_run: bool,
    deleted: BTreeSet<String>,
    consecutive_missing: u32,
    stats: CleanupStats,
}

impl Executor {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            deleted: BTreeSet::new(),
            consecutive_missing: 0,
            stats: CleanupStats::default(),
        }
    }

    /// Deletes everything the pipeline selected, in selection order, then
    /// returns the counters.
    pub fn execute(
        mut self,
        registry: &mut dyn RegistryClient,
        packages: &mut dyn PackageClient,
        index: &PackageIndex,
        graph: &mut ImageGraph,
        outcome: &PipelineOutcome,
    ) -> Result<CleanupStats> {
        let span = info_span!("deleting packages");
        let _enter = span.enter();

        if outcome.delete_order.is_empty() {
            info!("nothing to delete");
            return Ok(self.stats);
        }

        self.prefetch(registry, index, outcome)?;

        for digest in &outcome.delete_order {
            if self.deleted.contains(digest) {
                continue;
            }
            self.delete_image(registry, packages, index, graph, digest, &outcome.excluded_tags)?;
        }

        Ok(self.stats)
    }

    /// Warms the manifest memo with everything label computation and the
    /// referrer cascade will touch. Missing manifests are fine (they are
    /// re-detected as missing later); transport errors abort before the
    /// first deletion.
    fn prefetch(
        &self,
        registry: &mut dyn RegistryClient,
        index: &PackageIndex,
        outcome: &PipelineOutcome,
    ) -> Result<()> {
        for digest in &outcome.delete_order {
            let manifest = match registry.manifest_by_digest(digest) {
                Ok(manifest) => Some(manifest),
                Err(e) if e.is_missing() => None,
                Err(e) => return Err(e),
            };

            if let Some(manifest) = manifest
                && manifest.is_index()
            {
                for entry in manifest.entries() {
                    if entry.is_unknown_platform() && index.contains_digest(&entry.digest) {
                        match registry.manifest_by_digest(&entry.digest) {
                            Ok(_) => {}
                            Err(e) if e.is_missing() => {}
                            Err(e) => return Err(e),
                        }
                    }
                }
            }

            for target in referrer_targets(index, digest, &outcome.excluded_tags) {
                let referrer = match registry.manifest_by_digest(&target) {
                    Ok(manifest) => Some(manifest),
                    Err(e) if e.is_missing() => None,
                    Err(e) => return Err(e),
                };
                let Some(referrer) = referrer else { continue };
                for entry in referrer.entries() {
                    if index.contains_digest(&entry.digest) {
                        match registry.manifest_by_digest(&entry.digest) {
                            Ok(_) => {}
                            Err(e) if e.is_missing() => {}
                            Err(e) => return Err(e),
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Deletes one digest, cascading into sole-parented children and
    /// referrer artifacts. The `deleted` set makes the recursion safe
    /// against referrer chains that loop back.
    fn delete_image(
        &mut self,
        registry: &mut dyn RegistryClient,
        packages: &mut dyn PackageClient,
        index: &PackageIndex,
        graph: &mut ImageGraph,
        digest: &str,
        excluded_tags: &BTreeSet<String>,
    ) -> Result<()> {
        if !self.deleted.insert(digest.to_string()) {
            return Ok(());
        }

        let manifest = match registry.manifest_by_digest(digest) {
            Ok(manifest) => Some(manifest),
            Err(e) if e.is_missing() => {
                warn!(digest, "manifest missing, deleting version only");
                None
            }
            Err(e) => return Err(e),
        };

        let Some(version) = index.version_by_digest(digest) else {
            warn!(digest, "version no longer listed, skipping");
            return Ok(());
        };
        let id = version.id;
        let tags = version.tags.clone();

        self.delete_version_guarded(packages, index.package(), id, digest)?;
        self.stats.deleted_versions += 1;
        if self.dry_run {
            info!(digest, ?tags, "dry-run: would delete image");
        } else {
            info!(digest, ?tags, "deleted image");
        }

        if let Some(manifest) = &manifest
            && manifest.is_index()
        {
            self.stats.deleted_multiarch += 1;

            for entry in manifest.entries() {
                let child = entry.digest.as_str();
                if self.deleted.contains(child) {
                    continue;
                }
                if !index.contains_digest(child) {
                    debug!(child, "listed child not present in package");
                    continue;
                }

                if graph.solely_used_by(child, digest) {
                    let child_manifest = match registry.manifest_by_digest(child) {
                        Ok(manifest) => Some(manifest),
                        Err(e) if e.is_missing() => {
                            // without its manifest the child cannot be
                            // inspected; leave it for a later run
                            warn!(child, "child manifest missing, skipping child");
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    let label = child_label(entry, child_manifest.as_ref());
                    info!(child, label = %label, "deleting child of multi-arch image");
                    self.delete_image(registry, packages, index, graph, child, excluded_tags)?;
                    graph.remove_child_entry(child);
                } else {
                    graph.remove_edge(child, digest);
                    debug!(child, "child shared with another parent, keeping");
                }
            }
        }

        for target in referrer_targets(index, digest, excluded_tags) {
            if self.deleted.contains(&target) {
                continue;
            }
            info!(subject = digest, referrer = %target, "deleting referrer");
            self.delete_image(registry, packages, index, graph, &target, excluded_tags)?;
        }

        Ok(())
    }

    /// Deletes a version, tolerating a single 404: the platform sometimes
    /// lags its own registry view right after a neighbouring delete. Two
    /// consecutive 404s mean something external is deleting too, and the
    /// run stops.
    fn delete_version_guarded(
        &mut self,
        packages: &mut dyn PackageClient,
        package: &str,
        id: u64,
        digest: &str,
    ) -> Result<()> {
        if self.dry_run {
            info!(digest, id, "dry-run: would delete version");
            return Ok(());
        }
        match packages.delete_version(package, id)? {
            DeleteOutcome::Deleted => {
                self.consecutive_missing = 0;
                Ok(())
            }
            DeleteOutcome::Missing => {
                self.consecutive_missing += 1;
                if self.consecutive_missing >= 2 {
                    return Err(ReapError::missing(format!(
                        "version {} (id {}), second 404 in a row",
                        digest, id
                    )));
                }
                warn!(digest, id, "delete answered 404, treating as already removed");
                Ok(())
            }
        }
    }
}

/// Digests reachable from `digest` through non-excluded referrer tags.
fn referrer_targets(
    index: &PackageIndex,
    digest: &str,
    excluded_tags: &BTreeSet<String>,
) -> Vec<String> {
    let Ok(parsed) = Digest::from_str(digest) else {
        return Vec::new();
    };
    index
        .tags()
        .filter(|tag| crate::digest::tag_refers_to(tag, &parsed) && !excluded_tags.contains(*tag))
        .filter_map(|tag| index.digest_by_tag(tag))
        .filter(|target| *target != digest)
        .map(str::to_string)
        .collect()
}
