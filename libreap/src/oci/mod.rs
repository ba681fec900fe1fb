//! OCI manifest documents.
//!
//! The registry serves two kinds of manifest: an index (multi-architecture
//! image, a list of child descriptors) and a single image (a list of
//! layers). The engine classifies a fetched document by media type and works
//! with a tagged [`Manifest`] enum from then on.
//!
//! Both variants keep every field they do not model in a flattened map, so
//! a manifest can be fetched, have its children or layers cleared, and be
//! re-uploaded as a well-formed document. That round-trip is the basis of
//! the untag protocol.

use crate::error::{ReapError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[cfg(test)]
mod tests;

/// OCI image index media type.
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// OCI image manifest media type.
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// Docker manifest list media type.
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// Docker image manifest media type.
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";

/// Layer media type used by in-toto attestation images.
pub const MEDIA_TYPE_IN_TOTO: &str = "application/vnd.in-toto+json";
/// Artifact type prefix used by sigstore bundle referrers.
pub const ARTIFACT_TYPE_SIGSTORE_PREFIX: &str = "application/vnd.dev.sigstore.bundle";

/// Platform block of an index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of an index manifest's `manifests` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorEntry {
    pub digest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(rename = "artifactType", skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DescriptorEntry {
    /// Returns true when the platform is absent or reports the placeholder
    /// "unknown" architecture used by attestation entries.
    pub fn is_unknown_platform(&self) -> bool {
        match &self.platform {
            Some(p) => p.architecture == "unknown",
            None => true,
        }
    }

    /// Returns "arch" or "arch/variant" for a real platform entry.
    pub fn platform_label(&self) -> Option<String> {
        let platform = self.platform.as_ref()?;
        if platform.architecture == "unknown" {
            return None;
        }
        Some(match &platform.variant {
            Some(variant) => format!("{}/{}", platform.architecture, variant),
            None => platform.architecture.clone(),
        })
    }
}

/// One entry of an image manifest's `layers` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerEntry {
    #[serde(rename = "mediaType", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A multi-architecture index manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    #[serde(rename = "mediaType", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<DescriptorEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single-image manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageManifest {
    #[serde(rename = "mediaType", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub layers: Vec<LayerEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A parsed manifest document, classified by media type.
#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    Index(IndexManifest),
    Image(ImageManifest),
}

impl Manifest {
    /// Parses raw manifest bytes into the appropriate variant.
    ///
    /// Classification uses the declared `mediaType`; documents without one
    /// are treated as an index when a `manifests` list is present.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| ReapError::malformed_with("manifest JSON", e))?;
        Self::from_value(value)
    }

    /// Parses an already-decoded JSON document.
    pub fn from_value(value: Value) -> Result<Self> {
        let media_type = value.get("mediaType").and_then(Value::as_str);
        let is_index = match media_type {
            Some(MEDIA_TYPE_OCI_INDEX) | Some(MEDIA_TYPE_DOCKER_MANIFEST_LIST) => true,
            Some(_) => false,
            None => value.get("manifests").is_some(),
        };

        if is_index {
            let index: IndexManifest = serde_json::from_value(value)
                .map_err(|e| ReapError::malformed_with("index manifest", e))?;
            Ok(Manifest::Index(index))
        } else {
            let image: ImageManifest = serde_json::from_value(value)
                .map_err(|e| ReapError::malformed_with("image manifest", e))?;
            Ok(Manifest::Image(image))
        }
    }

    /// Serializes the manifest back to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let result = match self {
            Manifest::Index(index) => serde_json::to_vec(index),
            Manifest::Image(image) => serde_json::to_vec(image),
        };
        result.map_err(|e| ReapError::malformed_with("manifest during re-serialization", e))
    }

    /// Returns the declared media type, when present.
    pub fn media_type(&self) -> Option<&str> {
        match self {
            Manifest::Index(index) => index.media_type.as_deref(),
            Manifest::Image(image) => image.media_type.as_deref(),
        }
    }

    /// Returns true for index (multi-architecture) manifests.
    pub fn is_index(&self) -> bool {
        matches!(self, Manifest::Index(_))
    }

    /// Returns the index entries, or an empty slice for an image manifest.
    pub fn entries(&self) -> &[DescriptorEntry] {
        match self {
            Manifest::Index(index) => &index.manifests,
            Manifest::Image(_) => &[],
        }
    }

    /// Returns the digests listed by an index manifest.
    pub fn child_digests(&self) -> Vec<&str> {
        self.entries().iter().map(|e| e.digest.as_str()).collect()
    }

    /// Produces the content-empty substitute used by the untag protocol:
    /// a clone with `manifests` (index) or `layers` (image) cleared, every
    /// other field intact. The substitute hashes to a new digest, so
    /// uploading it under a tag carries the tag off the original version.
    pub fn cleared(&self) -> Manifest {
        match self {
            Manifest::Index(index) => {
                let mut cleared = index.clone();
                cleared.manifests.clear();
                Manifest::Index(cleared)
            }
            Manifest::Image(image) => {
                let mut cleared = image.clone();
                cleared.layers.clear();
                Manifest::Image(cleared)
            }
        }
    }
}

/// Derives a human-readable label for an index entry being deleted.
///
/// Real platforms report `architecture: <arch>[/<variant>]`. Attestation
/// entries carry the placeholder "unknown" architecture and are identified
/// by their artifact type (sigstore) or by the first layer of the child
/// manifest (in-toto).
pub fn child_label(entry: &DescriptorEntry, child_manifest: Option<&Manifest>) -> String {
    if let Some(label) = entry.platform_label() {
        return format!("architecture: {}", label);
    }

    if let Some(artifact_type) = &entry.artifact_type
        && artifact_type.starts_with(ARTIFACT_TYPE_SIGSTORE_PREFIX)
    {
        return "sigstore attestation".to_string();
    }

    if let Some(Manifest::Image(image)) = child_manifest
        && let Some(first) = image.layers.first()
        && first.media_type.as_deref() == Some(MEDIA_TYPE_IN_TOTO)
    {
        return "in-toto attestation".to_string();
    }

    "architecture: unknown".to_string()
}
