//! In-memory catalogue of a package's versions.
//!
//! One listing pass produces three views of the same data: digest to id,
//! id to version, and tag to digest. The maps stay bijective because the
//! platform names each version after its content digest and binds a tag to
//! at most one version.
//!
//! The index is a snapshot. After any mutation (untag, delete) callers
//! reload it before trusting the views again.

use crate::error::Result;
use crate::packages::{PackageClient, PackageVersion};
use std::collections::{BTreeMap, HashMap};


/// Snapshot of a package's versions and tags.
#[derive(Debug, Default)]
pub struct PackageIndex {
    package: String,
    digest_to_id: HashMap<String, u64>,
    id_to_version: BTreeMap<u64, PackageVersion>,
    tag_to_digest: HashMap<String, String>,
}

impl PackageIndex {
    /// Builds the index from a fresh version listing.
    pub fn load(client: &mut dyn PackageClient, package: &str) -> Result<Self> {
        let mut index = Self {
            package: package.to_string(),
            ..Default::default()
        };
        index.reload(client)?;
        Ok(index)
    }

    /// Discards the snapshot and rebuilds it from the platform.
    pub fn reload(&mut self, client: &mut dyn PackageClient) -> Result<()> {
        let versions = client.list_versions(&self.package)?;

        self.digest_to_id.clear();
        self.id_to_version.clear();
        self.tag_to_digest.clear();

        for version in versions {
            self.digest_to_id.insert(version.digest.clone(), version.id);
            for tag in &version.tags {
                self.tag_to_digest.insert(tag.clone(), version.digest.clone());
            }
            self.id_to_version.insert(version.id, version);
        }

        tracing::debug!(
            package = %self.package,
            versions = self.id_to_version.len(),
            tags = self.tag_to_digest.len(),
            "package index loaded"
        );
        Ok(())
    }

    /// The package this index describes.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// All digests present in the package.
    pub fn digests(&self) -> impl Iterator<Item = &str> {
        self.digest_to_id.keys().map(String::as_str)
    }

    /// All tags present in the package.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tag_to_digest.keys().map(String::as_str)
    }

    /// Resolves a tag to the digest it points at.
    pub fn digest_by_tag(&self, tag: &str) -> Option<&str> {
        self.tag_to_digest.get(tag).map(String::as_str)
    }

    /// Looks up the version stored under a digest.
    pub fn version_by_digest(&self, digest: &str) -> Option<&PackageVersion> {
        let id = self.digest_to_id.get(digest)?;
        self.id_to_version.get(id)
    }

    /// Looks up a version by its platform id.
    pub fn version_by_id(&self, id: u64) -> Option<&PackageVersion> {
        self.id_to_version.get(&id)
    }

    /// True when the digest exists as a version in this package.
    pub fn contains_digest(&self, digest: &str) -> bool {
        self.digest_to_id.contains_key(digest)
    }

    /// Number of versions in the snapshot.
    pub fn len(&self) -> usize {
        self.id_to_version.len()
    }

    /// True when the package holds no versions.
    pub fn is_empty(&self) -> bool {
        self.id_to_version.is_empty()
    }
}
