//! In-memory doubles of the registry and packages APIs.
//!
//! [`FakeStore`] models one owner's container storage the way GHCR exposes
//! it through two APIs: manifests are content-addressed and served by
//! digest, while versions (ids, tags, timestamps) are listed and deleted
//! through the packages surface. A [`FakeRegistry`] and a [`FakeHub`]
//! handed out by the same store share that state, so tag rebinds performed
//! through the registry become visible to the next version listing, just
//! like in production.
//!
//! Policy, executor and orchestration tests run against these doubles;
//! only the HTTP clients themselves are tested over the wire.

use crate::client::{RegistryClient, digest_of_bytes};
use crate::error::{ReapError, Result};
use crate::oci::Manifest;
use crate::packages::{DeleteOutcome, PackageClient, PackageVersion};
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;


/// Timestamp `days` days in the past, for seeding version ages.
pub fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::days(days)
}

/// A minimal single-image manifest document. The seed lands in an
/// annotation so different seeds hash to different digests.
pub fn image_manifest_json(seed: &str) -> String {
    format!(
        r#"{{"schemaVersion":2,"mediaType":"application/vnd.oci.image.manifest.v1+json","layers":[{{"mediaType":"application/vnd.oci.image.layer.v1.tar+gzip","size":2}}],"annotations":{{"seed":"{}"}}}}"#,
        seed
    )
}

/// A single-image manifest whose first layer is an in-toto attestation.
pub fn attestation_manifest_json(seed: &str) -> String {
    format!(
        r#"{{"schemaVersion":2,"mediaType":"application/vnd.oci.image.manifest.v1+json","layers":[{{"mediaType":"application/vnd.in-toto+json","size":2}}],"annotations":{{"seed":"{}"}}}}"#,
        seed
    )
}

/// An index manifest listing `(digest, architecture)` children. The
/// placeholder "unknown" architecture is emitted verbatim, matching how
/// buildkit records attestation entries.
pub fn index_manifest_json(children: &[(&str, &str)]) -> String {
    let entries = children
        .iter()
        .map(|(digest, arch)| {
            format!(
                r#"{{"mediaType":"application/vnd.oci.image.manifest.v1+json","digest":"{}","size":3,"platform":{{"architecture":"{}","os":"linux"}}}}"#,
                digest, arch
            )
        })
        .collect::<Vec<_>>()
        .join(",");
    format!(
        r#"{{"schemaVersion":2,"mediaType":"application/vnd.oci.image.index.v1+json","manifests":[{}]}}"#,
        entries
    )
}

#[derive(Default)]
struct PackageState {
    versions: BTreeMap<u64, PackageVersion>,
}

impl PackageState {
    fn version_by_digest(&self, digest: &str) -> Option<&PackageVersion> {
        self.versions.values().find(|v| v.digest == digest)
    }
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    packages: BTreeMap<String, PackageState>,
    manifests: HashMap<String, Manifest>,
    /// Tags whose substitute upload should fail, for failure-path tests
    failing_puts: HashSet<String>,
    /// Forces the next N deletions to answer 404
    missing_deletes: u32,
    deletions: Vec<(String, u64)>,
}

/// Shared in-memory storage behind a fake registry and a fake hub.
#[derive(Clone, Default)]
pub struct FakeStore {
    inner: Rc<RefCell<Inner>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an empty package.
    pub fn add_package(&self, package: &str) {
        self.inner
            .borrow_mut()
            .packages
            .entry(package.to_string())
            .or_default();
    }

    /// Stores a manifest document and creates a version for it.
    ///
    /// The digest is computed over the serialized document, exactly as the
    /// registry would. Returns the digest.
    pub fn push_manifest(
        &self,
        package: &str,
        tags: &[&str],
        updated_at: DateTime<Utc>,
        manifest_json: &str,
    ) -> String {
        let manifest = Manifest::from_bytes(manifest_json.as_bytes())
            .expect("seed manifest must be valid JSON");
        let digest = digest_of_bytes(&manifest.to_bytes().expect("seed manifest serializes"));
        self.push_version(package, &digest, tags, updated_at, Some(manifest));
        digest
    }

    /// Creates a version under an explicit digest, optionally with a stored
    /// manifest. Versions without a manifest model registry inconsistency
    /// (the packages API still lists them).
    pub fn push_version(
        &self,
        package: &str,
        digest: &str,
        tags: &[&str],
        updated_at: DateTime<Utc>,
        manifest: Option<Manifest>,
    ) {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        if let Some(manifest) = manifest {
            inner.manifests.insert(digest.to_string(), manifest);
        }
        let state = inner.packages.entry(package.to_string()).or_default();
        state.versions.insert(
            id,
            PackageVersion {
                id,
                digest: digest.to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                updated_at,
            },
        );
    }

    /// A registry view over one package of this store.
    pub fn registry(&self, package: &str) -> FakeRegistry {
        FakeRegistry {
            store: self.clone(),
            package: package.to_string(),
        }
    }

    /// A packages-API view over this store.
    pub fn hub(&self) -> FakeHub {
        FakeHub { store: self.clone() }
    }

    /// Makes the next substitute upload for `tag` fail with a server error.
    pub fn fail_put_for(&self, tag: &str) {
        self.inner.borrow_mut().failing_puts.insert(tag.to_string());
    }

    /// Makes the next `n` deletions answer 404.
    pub fn answer_missing_for_next_deletes(&self, n: u32) {
        self.inner.borrow_mut().missing_deletes = n;
    }

    /// Digests currently stored for a package.
    pub fn digests(&self, package: &str) -> Vec<String> {
        let inner = self.inner.borrow();
        inner
            .packages
            .get(package)
            .map(|s| s.versions.values().map(|v| v.digest.clone()).collect())
            .unwrap_or_default()
    }

    /// Tags currently bound in a package.
    pub fn tags(&self, package: &str) -> Vec<String> {
        let inner = self.inner.borrow();
        let mut tags: Vec<String> = inner
            .packages
            .get(package)
            .map(|s| {
                s.versions
                    .values()
                    .flat_map(|v| v.tags.iter().cloned())
                    .collect()
            })
            .unwrap_or_default();
        tags.sort();
        tags
    }

    /// True when a digest still exists as a version.
    pub fn has_digest(&self, package: &str, digest: &str) -> bool {
        self.inner
            .borrow()
            .packages
            .get(package)
            .is_some_and(|s| s.version_by_digest(digest).is_some())
    }

    /// Tags bound to one digest.
    pub fn tags_of(&self, package: &str, digest: &str) -> Vec<String> {
        self.inner
            .borrow()
            .packages
            .get(package)
            .and_then(|s| s.version_by_digest(digest).map(|v| v.tags.clone()))
            .unwrap_or_default()
    }

    /// Every deletion performed through the hub, in order.
    pub fn deletion_log(&self) -> Vec<(String, u64)> {
        self.inner.borrow().deletions.clone()
    }

    /// Number of versions in a package.
    pub fn version_count(&self, package: &str) -> usize {
        self.inner
            .borrow()
            .packages
            .get(package)
            .map(|s| s.versions.len())
            .unwrap_or(0)
    }
}

/// Registry double serving one package from a [`FakeStore`].
pub struct FakeRegistry {
    store: FakeStore,
    package: String,
}

impl RegistryClient for FakeRegistry {
    fn manifest_by_digest(&mut self, digest: &str) -> Result<Manifest> {
        let inner = self.store.inner.borrow();
        let state = inner
            .packages
            .get(&self.package)
            .ok_or_else(|| ReapError::missing(format!("package {}", self.package)))?;
        if state.version_by_digest(digest).is_none() {
            return Err(ReapError::missing(format!("manifest {}", digest)));
        }
        inner
            .manifests
            .get(digest)
            .cloned()
            .ok_or_else(|| ReapError::missing(format!("manifest {}", digest)))
    }

    fn manifest_by_tag(&mut self, tag: &str) -> Result<Manifest> {
        let digest = {
            let inner = self.store.inner.borrow();
            let state = inner
                .packages
                .get(&self.package)
                .ok_or_else(|| ReapError::missing(format!("package {}", self.package)))?;
            state
                .versions
                .values()
                .find(|v| v.tags.iter().any(|t| t == tag))
                .map(|v| v.digest.clone())
                .ok_or_else(|| ReapError::missing(format!("manifest for tag {}", tag)))?
        };
        self.manifest_by_digest(&digest)
    }

    fn put_manifest(&mut self, tag: &str, manifest: &Manifest) -> Result<()> {
        let bytes = manifest.to_bytes()?;
        let digest = digest_of_bytes(&bytes);

        let mut inner = self.store.inner.borrow_mut();
        if inner.failing_puts.remove(tag) {
            return Err(ReapError::upstream(500, "injected upload failure"));
        }
        inner.manifests.insert(digest.clone(), manifest.clone());

        inner.next_id += 1;
        let id = inner.next_id;
        let state = inner.packages.entry(self.package.clone()).or_default();

        // the tag moves off whatever version held it
        for version in state.versions.values_mut() {
            version.tags.retain(|t| t != tag);
        }

        // and onto the version for the uploaded content, created on demand
        match state
            .versions
            .values_mut()
            .find(|v| v.digest == digest)
        {
            Some(existing) => existing.tags.push(tag.to_string()),
            None => {
                state.versions.insert(
                    id,
                    PackageVersion {
                        id,
                        digest,
                        tags: vec![tag.to_string()],
                        updated_at: Utc::now(),
                    },
                );
            }
        }
        Ok(())
    }
}

/// Packages-API double over a [`FakeStore`].
pub struct FakeHub {
    store: FakeStore,
}

impl PackageClient for FakeHub {
    fn list_versions(&mut self, package: &str) -> Result<Vec<PackageVersion>> {
        let inner = self.store.inner.borrow();
        let state = inner
            .packages
            .get(package)
            .ok_or_else(|| ReapError::missing(format!("package {}", package)))?;
        Ok(state.versions.values().cloned().collect())
    }

    fn delete_version(&mut self, package: &str, id: u64) -> Result<DeleteOutcome> {
        let mut inner = self.store.inner.borrow_mut();
        if inner.missing_deletes > 0 {
            inner.missing_deletes -= 1;
            return Ok(DeleteOutcome::Missing);
        }
        inner.deletions.push((package.to_string(), id));
        let state = inner
            .packages
            .get_mut(package)
            .ok_or_else(|| ReapError::missing(format!("package {}", package)))?;
        match state.versions.remove(&id) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::Missing),
        }
    }

    fn list_packages(&mut self) -> Result<Vec<String>> {
        Ok(self.store.inner.borrow().packages.keys().cloned().collect())
    }
}
