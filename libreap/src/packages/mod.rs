//! Client for the GitHub Packages REST API.
//!
//! Container packages live alongside the registry: the distribution API
//! serves manifests while this API owns version metadata (ids, tags,
//! timestamps) and deletion. Version listings are paginated 100 at a time
//! and continued through `Link` headers.
//!
//! The endpoint prefix differs by owner kind: organisations use
//! `/orgs/{owner}/...`, other users `/users/{owner}/...`, and the
//! authenticated user's own private packages `/user/...`. The kind is
//! probed once per run and remembered.

use crate::error::{ReapError, Result};
use crate::net;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::blocking::Client as HttpClient;
use serde::Deserialize;
use std::time::Duration;


/// Default API endpoint.
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// Versions fetched per page.
const PAGE_SIZE: u32 = 100;

/// Request timeout in seconds.
const TIMEOUT_SECONDS: u64 = 30;

/// One stored manifest version of a container package.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageVersion {
    /// Opaque platform identifier, used for deletion
    pub id: u64,
    /// Content digest (`sha256:<hex>`), the version's name
    pub digest: String,
    /// Tags currently bound to this version; empty for untagged versions
    pub tags: Vec<String>,
    /// Last update timestamp reported by the platform
    pub updated_at: DateTime<Utc>,
}

impl PackageVersion {
    /// A version is tagged iff it carries at least one tag.
    pub fn is_tagged(&self) -> bool {
        !self.tags.is_empty()
    }
}

/// Result of a version deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The platform confirmed the deletion.
    Deleted,
    /// The platform answered 404. The executor tolerates one of these per
    /// run step and escalates consecutive occurrences.
    Missing,
}

/// Package listing and deletion used by the index, pipeline and executor.
pub trait PackageClient {
    /// Lists every version of a package, following pagination to the end.
    fn list_versions(&mut self, package: &str) -> Result<Vec<PackageVersion>>;

    /// Deletes one version by id. Best effort: a 404 is reported as
    /// [`DeleteOutcome::Missing`] rather than an error.
    fn delete_version(&mut self, package: &str, id: u64) -> Result<DeleteOutcome>;

    /// Lists the owner's container package names (for pattern expansion).
    fn list_packages(&mut self) -> Result<Vec<String>>;
}

#[derive(Debug, Deserialize)]
struct RawVersion {
    id: u64,
    name: String,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    metadata: RawMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    container: RawContainer,
}

#[derive(Debug, Default, Deserialize)]
struct RawContainer {
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawPackage {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawOwner {
    #[serde(rename = "type")]
    kind: String,
}

/// Resolved endpoint prefix for the configured owner.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OwnerScope {
    Organization,
    User,
    /// The token belongs to the owner; private packages need `/user/...`.
    Authenticated,
}

/// GitHub Packages API client for one owner.
pub struct GithubPackages {
    http: HttpClient,
    api_url: String,
    owner: String,
    token: String,
    scope: Option<OwnerScope>,
    dry_run: bool,
}

impl GithubPackages {
    /// Creates a client for `owner` against the public GitHub API.
    pub fn new(owner: &str, token: &str, dry_run: bool) -> Result<Self> {
        Self::with_api_url(GITHUB_API_URL, owner, token, dry_run)
    }

    /// Creates a client against a specific API URL. Used by tests and GHES.
    pub fn with_api_url(api_url: &str, owner: &str, token: &str, dry_run: bool) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECONDS))
            .user_agent(concat!("reap/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ReapError::http_with("building the HTTP client", e))?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            token: token.to_string(),
            scope: None,
            dry_run,
        })
    }

    fn get(&self, url: &str) -> reqwest::blocking::RequestBuilder {
        self.http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    fn delete(&self, url: &str) -> reqwest::blocking::RequestBuilder {
        self.http
            .delete(url)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Determines the endpoint prefix for the owner, once per run.
    fn ensure_scope(&mut self) -> Result<()> {
        if self.scope.is_some() {
            return Ok(());
        }

        // tokens issued to the owner themselves must use /user endpoints to
        // see private packages; workflow tokens cannot call /user at all,
        // so failures here just mean "not that case"
        let me_url = format!("{}/user", self.api_url);
        let login = net::send_with_retries("authenticated user", || self.get(&me_url))
            .ok()
            .filter(|r| r.status().is_success())
            .and_then(|r| r.json::<RawUser>().ok())
            .map(|u| u.login);

        if login.as_deref() == Some(self.owner.as_str()) {
            self.scope = Some(OwnerScope::Authenticated);
            return Ok(());
        }

        let owner_url = format!("{}/users/{}", self.api_url, self.owner);
        let response = net::send_with_retries("owner lookup", || self.get(&owner_url))?;
        let response = net::check_status(response, &format!("owner lookup for {}", self.owner))?;
        let owner: RawOwner = response
            .json()
            .map_err(|e| ReapError::malformed_with("owner lookup response", e))?;

        self.scope = Some(if owner.kind == "Organization" {
            OwnerScope::Organization
        } else {
            OwnerScope::User
        });
        tracing::debug!(owner = %self.owner, scope = ?self.scope, "resolved owner kind");
        Ok(())
    }

    /// Endpoint prefix (`orgs/{owner}`, `users/{owner}` or `user`).
    fn base_path(&mut self) -> Result<String> {
        self.ensure_scope()?;
        Ok(match self.scope.as_ref().expect("scope resolved") {
            OwnerScope::Organization => format!("orgs/{}", self.owner),
            OwnerScope::User => format!("users/{}", self.owner),
            OwnerScope::Authenticated => "user".to_string(),
        })
    }

    /// Container package names may contain `/`, which must be escaped in
    /// the path.
    fn encode_package(package: &str) -> String {
        package.replace('/', "%2F")
    }

    /// Follows Link-header pagination, collecting JSON pages of `T`.
    fn get_paginated<T: serde::de::DeserializeOwned>(
        &self,
        first_url: String,
        resource: &str,
    ) -> Result<Vec<T>> {
        let mut collected = Vec::new();
        let mut url = first_url;

        loop {
            let response = net::send_with_retries(resource, || self.get(&url))?;
            let next = net::next_link(response.headers());
            let response = net::check_status(response, resource)?;

            let mut page: Vec<T> = response
                .json()
                .map_err(|e| ReapError::malformed_with(format!("{} page", resource), e))?;
            collected.append(&mut page);

            match next {
                Some(next) => url = net::join_next_url(&self.api_url, &next),
                None => break,
            }
        }

        Ok(collected)
    }
}

impl PackageClient for GithubPackages {
    fn list_versions(&mut self, package: &str) -> Result<Vec<PackageVersion>> {
        let base = self.base_path()?;
        let url = format!(
            "{}/{}/packages/container/{}/versions?per_page={}",
            self.api_url,
            base,
            Self::encode_package(package),
            PAGE_SIZE
        );

        let raw: Vec<RawVersion> = self.get_paginated(url, "package versions")?;
        let versions = raw
            .into_iter()
            .map(|v| PackageVersion {
                id: v.id,
                digest: v.name,
                tags: v.metadata.container.tags,
                updated_at: v.updated_at,
            })
            .collect::<Vec<_>>();

        tracing::debug!(package, count = versions.len(), "listed package versions");
        Ok(versions)
    }

    fn delete_version(&mut self, package: &str, id: u64) -> Result<DeleteOutcome> {
        if self.dry_run {
            tracing::info!(package, id, "dry-run: would delete version");
            return Ok(DeleteOutcome::Deleted);
        }

        let base = self.base_path()?;
        let url = format!(
            "{}/{}/packages/container/{}/versions/{}",
            self.api_url,
            base,
            Self::encode_package(package),
            id
        );

        let response = net::send_with_retries("version deletion", || self.delete(&url))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(DeleteOutcome::Missing);
        }
        net::check_status(response, &format!("deletion of version {}", id))?;

        Ok(DeleteOutcome::Deleted)
    }

    fn list_packages(&mut self) -> Result<Vec<String>> {
        let base = self.base_path()?;
        let url = format!(
            "{}/{}/packages?package_type=container&per_page={}",
            self.api_url, base, PAGE_SIZE
        );

        let raw: Vec<RawPackage> = self.get_paginated(url, "packages")?;
        Ok(raw.into_iter().map(|p| p.name).collect())
    }
}
