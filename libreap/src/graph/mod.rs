//! Relations between a package's versions.
//!
//! Multi-architecture images share storage with their children and with
//! referrer artifacts purely through digest references, so a safe cleanup
//! needs the reverse mapping: which parents still use a child. This module
//! walks every version's manifest once (manifest fetches are memoised by
//! the client) and derives:
//!
//! - the `used_by` relation, child digest to the set of index manifests
//!   listing it;
//! - the set of digests reachable from top-level digests through referrer
//!   tags;
//! - from those, the top-level digests policy applies to.

use crate::client::RegistryClient;
use crate::digest::Digest;
use crate::error::Result;
use crate::index::PackageIndex;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

#[cfg(test)]
mod tests;

/// The usedBy relation plus the top-level/child partition of a package.
#[derive(Debug, Default)]
pub struct ImageGraph {
    /// child digest -> parents whose manifest lists it
    used_by: HashMap<String, BTreeSet<String>>,
    /// digests whose own manifest was missing from the registry
    missing: BTreeSet<String>,
    /// referrer targets of top-level digests, plus their children
    referrer_reachable: BTreeSet<String>,
    /// digests that are not children of anything: the policy domain
    top_level: BTreeSet<String>,
}

impl ImageGraph {
    /// Walks the index and builds the graph.
    ///
    /// Versions whose manifest the registry no longer serves are recorded
    /// as missing and otherwise ignored; any other fetch error aborts the
    /// build.
    pub fn build(registry: &mut dyn RegistryClient, index: &PackageIndex) -> Result<Self> {
        let mut graph = Self::default();

        for digest in index.digests() {
            let manifest = match registry.manifest_by_digest(digest) {
                Ok(manifest) => manifest,
                Err(e) if e.is_missing() => {
                    tracing::warn!(digest, "manifest missing from registry");
                    graph.missing.insert(digest.to_string());
                    continue;
                }
                Err(e) => return Err(e),
            };

            tracing::debug!(digest, manifest = ?manifest, "parsed manifest");

            if manifest.is_index() {
                for child in manifest.child_digests() {
                    if index.contains_digest(child) {
                        graph
                            .used_by
                            .entry(child.to_string())
                            .or_default()
                            .insert(digest.to_string());
                    }
                }
            }
        }

        // digests listed by an existing parent are children; the rest are
        // top-level candidates whose referrers we now chase
        let candidates: Vec<String> = index
            .digests()
            .filter(|d| !graph.used_by.contains_key(*d))
            .map(str::to_string)
            .collect();

        for digest_str in &candidates {
            let Ok(digest) = Digest::from_str(digest_str) else {
                tracing::warn!(digest = %digest_str, "version name is not a digest, skipping");
                continue;
            };
            let prefix = digest.referrer_tag();

            for tag in index.tags() {
                if !tag.starts_with(&prefix) {
                    continue;
                }
                let Some(target) = index.digest_by_tag(tag) else {
                    continue;
                };
                if target == digest_str.as_str() {
                    continue;
                }
                graph.referrer_reachable.insert(target.to_string());

                // the target is usually an attestation index; its children
                // are reachable too
                match registry.manifest_by_digest(target) {
                    Ok(manifest) if manifest.is_index() => {
                        for child in manifest.child_digests() {
                            if index.contains_digest(child) {
                                graph.referrer_reachable.insert(child.to_string());
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) if e.is_missing() => {
                        tracing::warn!(tag, target, "referrer manifest missing");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let excluded = graph.children_of_top_level();
        graph.top_level = index
            .digests()
            .filter(|d| !excluded.contains(*d))
            .map(str::to_string)
            .collect();

        tracing::debug!(
            top_level = graph.top_level.len(),
            children = graph.used_by.len(),
            referrer_reachable = graph.referrer_reachable.len(),
            missing = graph.missing.len(),
            "image graph built"
        );
        Ok(graph)
    }

    /// Digests excluded from policy consideration: children of index
    /// manifests and everything reachable through referrer tags.
    pub fn children_of_top_level(&self) -> BTreeSet<String> {
        let mut excluded: BTreeSet<String> = self.used_by.keys().cloned().collect();
        excluded.extend(self.referrer_reachable.iter().cloned());
        excluded
    }

    /// The digests policy stages operate on.
    pub fn top_level_digests(&self) -> &BTreeSet<String> {
        &self.top_level
    }

    /// Parents still using a child, if any.
    pub fn parents_of(&self, child: &str) -> Option<&BTreeSet<String>> {
        self.used_by.get(child)
    }

    /// True when the child is used by exactly the given parent.
    pub fn solely_used_by(&self, child: &str, parent: &str) -> bool {
        self.parents_of(child)
            .is_some_and(|parents| parents.len() == 1 && parents.contains(parent))
    }

    /// Removes one parent edge after that parent was deleted.
    pub fn remove_edge(&mut self, child: &str, parent: &str) {
        if let Some(parents) = self.used_by.get_mut(child) {
            parents.remove(parent);
            if parents.is_empty() {
                self.used_by.remove(child);
            }
        }
    }

    /// Drops a child's entry entirely, after the child itself was deleted.
    pub fn remove_child_entry(&mut self, child: &str) {
        self.used_by.remove(child);
    }

    /// True when the digest's own manifest was missing during the walk.
    pub fn manifest_missing(&self, digest: &str) -> bool {
        self.missing.contains(digest)
    }
}
