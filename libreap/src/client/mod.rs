//! HTTP client for the GHCR distribution API.
//!
//! This module provides a thin client built on reqwest implementing the
//! slice of the OCI Distribution Specification v2 the cleanup engine
//! needs: fetching manifests by digest or tag, and uploading substitute
//! manifests for the untag protocol.
//!
//! Every fetched manifest is memoised for the lifetime of a cleanup task,
//! because each manifest request counts as a pull against the registry's
//! rate limits.

use crate::auth::{self, AuthChallenge, TokenResponse};
use crate::error::{ReapError, Result};
use crate::net;
use crate::oci::{MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_MANIFEST, Manifest};
use reqwest::StatusCode;
use reqwest::blocking::Client as HttpClient;
use sha2::{Digest as Sha2Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

#[cfg(test)]
mod tests;

/// Default registry endpoint.
pub const GHCR_URL: &str = "https://ghcr.io";

/// Accept header offering every manifest flavour the engine understands.
const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json";

/// Request timeout in seconds.
const TIMEOUT_SECONDS: u64 = 30;

/// Manifest access used by the graph builder, pipeline and executor.
///
/// The production implementation is [`GhcrClient`]; tests substitute an
/// in-memory fake so policy logic runs without a network.
pub trait RegistryClient {
    /// Fetches and parses the manifest stored under a digest.
    ///
    /// Returns [`ReapError::Missing`] when the registry reports 404 (or
    /// 400, which GHCR uses for malformed references); callers treat that
    /// as "manifest missing, record and continue".
    fn manifest_by_digest(&mut self, digest: &str) -> Result<Manifest>;

    /// Fetches the manifest a tag currently points at.
    fn manifest_by_tag(&mut self, tag: &str) -> Result<Manifest>;

    /// Uploads a manifest under a tag. The registry computes the new
    /// content digest and rebinds the tag to it.
    fn put_manifest(&mut self, tag: &str, manifest: &Manifest) -> Result<()>;
}

/// Client for one package's manifests on GHCR.
pub struct GhcrClient {
    /// The underlying HTTP client
    http: HttpClient,
    /// Base registry URL
    registry_url: String,
    /// `owner/package` path component
    repository: String,
    /// GitHub token exchanged for a registry token on first use
    credential: String,
    /// Registry-scoped bearer token, populated by the login flow
    token: Option<String>,
    /// Whether the login probe has run; anonymous registries stay tokenless
    probed: bool,
    /// Per-run manifest memo, keyed by digest
    cache: HashMap<String, Manifest>,
    /// Tag to digest bindings observed through tag fetches
    tag_bindings: HashMap<String, String>,
}

impl GhcrClient {
    /// Creates a client for `owner/package` on the default registry.
    pub fn new(owner: &str, package: &str, credential: &str) -> Result<Self> {
        Self::with_registry_url(GHCR_URL, owner, package, credential)
    }

    /// Creates a client against a specific registry URL. Used by tests and
    /// GHES deployments.
    pub fn with_registry_url(
        registry_url: &str,
        owner: &str,
        package: &str,
        credential: &str,
    ) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECONDS))
            .build()
            .map_err(|e| ReapError::http_with("building the HTTP client", e))?;

        Ok(Self {
            http,
            registry_url: registry_url.trim_end_matches('/').to_string(),
            repository: format!("{}/{}", owner, package),
            credential: credential.to_string(),
            token: None,
            probed: false,
            cache: HashMap::new(),
            tag_bindings: HashMap::new(),
        })
    }

    /// Returns the repository path this client operates on.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Performs the login flow once: probe `/v2/`, and on a bearer
    /// challenge exchange the GitHub credential for a scoped registry
    /// token. Registries that answer the probe without a challenge are
    /// used anonymously.
    fn ensure_token(&mut self) -> Result<()> {
        if self.probed {
            return Ok(());
        }

        let probe_url = format!("{}/v2/", self.registry_url);
        let response = net::send_with_retries("registry probe", || self.http.get(&probe_url))?;

        if response.status() != StatusCode::UNAUTHORIZED {
            // anonymous registry or pre-authenticated proxy
            net::check_status(response, "registry probe")?;
            self.probed = true;
            return Ok(());
        }

        let challenge_header = response
            .headers()
            .get(reqwest::header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ReapError::denied("registry probe: 401 with no usable challenge", 401))?;

        let challenge = AuthChallenge::parse(challenge_header)?;
        if !challenge.scheme.eq_ignore_ascii_case("bearer") {
            return Err(ReapError::denied(
                format!("registry login with '{}' scheme", challenge.scheme),
                401,
            ));
        }

        let token_url = challenge.token_url(&self.repository);
        let exchange = auth::exchange_header(&self.credential);
        let response = net::send_with_retries("token exchange", || {
            self.http
                .get(&token_url)
                .header(reqwest::header::AUTHORIZATION, exchange.as_str())
        })?;
        let response = net::check_status(response, "token exchange")?;

        let token: TokenResponse = response
            .json()
            .map_err(|e| ReapError::malformed_with("token response", e))?;

        tracing::debug!(repository = %self.repository, "registry login complete");
        self.token = Some(token.token);
        self.probed = true;
        Ok(())
    }

    /// Fetches raw manifest bytes for a reference (digest or tag).
    fn fetch_manifest_bytes(&mut self, reference: &str) -> Result<Vec<u8>> {
        self.ensure_token()?;

        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.registry_url, self.repository, reference
        );
        let token = self.token.clone();
        let http = &self.http;

        let response = net::send_with_retries("manifest", || {
            let mut request = http.get(&url).header(reqwest::header::ACCEPT, MANIFEST_ACCEPT);
            if let Some(token) = &token {
                request = request.header(reqwest::header::AUTHORIZATION, auth::bearer_header(token));
            }
            request
        })?;

        // GHCR answers 400 for references it no longer knows; both are
        // "manifest missing" to the engine
        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST {
            return Err(ReapError::missing(format!("manifest {}", reference)));
        }
        let response = net::check_status(response, &format!("manifest {}", reference))?;

        let bytes = response
            .bytes()
            .map_err(|e| ReapError::http_with("reading the manifest body", e))?;
        Ok(bytes.to_vec())
    }
}

/// Computes the canonical digest of raw manifest bytes.
pub fn digest_of_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

impl RegistryClient for GhcrClient {
    fn manifest_by_digest(&mut self, digest: &str) -> Result<Manifest> {
        if let Some(manifest) = self.cache.get(digest) {
            return Ok(manifest.clone());
        }

        let bytes = self.fetch_manifest_bytes(digest)?;
        let manifest = Manifest::from_bytes(&bytes)?;
        tracing::trace!(digest, "fetched manifest");
        self.cache.insert(digest.to_string(), manifest.clone());
        Ok(manifest)
    }

    fn manifest_by_tag(&mut self, tag: &str) -> Result<Manifest> {
        if let Some(digest) = self.tag_bindings.get(tag)
            && let Some(manifest) = self.cache.get(digest)
        {
            return Ok(manifest.clone());
        }

        let bytes = self.fetch_manifest_bytes(tag)?;
        let digest = digest_of_bytes(&bytes);
        let manifest = Manifest::from_bytes(&bytes)?;
        self.cache.insert(digest.clone(), manifest.clone());
        self.tag_bindings.insert(tag.to_string(), digest);
        Ok(manifest)
    }

    fn put_manifest(&mut self, tag: &str, manifest: &Manifest) -> Result<()> {
        self.ensure_token()?;

        let content_type = manifest.media_type().unwrap_or(if manifest.is_index() {
            MEDIA_TYPE_OCI_INDEX
        } else {
            MEDIA_TYPE_OCI_MANIFEST
        });
        let body = manifest.to_bytes()?;

        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.registry_url, self.repository, tag
        );
        let token = self.token.clone();
        let http = &self.http;
        let content_type = content_type.to_string();

        let response = net::send_with_retries("manifest upload", || {
            let mut request = http
                .put(&url)
                .header(reqwest::header::CONTENT_TYPE, content_type.as_str())
                .body(body.clone());
            if let Some(token) = &token {
                request = request.header(reqwest::header::AUTHORIZATION, auth::bearer_header(token));
            }
            request
        })?;
        net::check_status(response, &format!("manifest upload for tag '{}'", tag))?;

        // the tag now points at new content; drop the stale binding
        self.tag_bindings.remove(tag);
        tracing::debug!(tag, "uploaded substitute manifest");
        Ok(())
    }
}
