//! Registry authentication flow.
//!
//! GHCR answers an unauthenticated request with a `401` carrying a
//! `WWW-Authenticate: Bearer realm=...,service=...,scope=...` challenge.
//! The caller-supplied credential (a GitHub token) is exchanged at the
//! realm for a registry-scoped bearer token, which then accompanies every
//! subsequent request.

use crate::error::{ReapError, Result};
use serde::Deserialize;


/// The bearer challenge a registry answers unauthenticated requests with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// Token endpoint to exchange the credential at
    pub realm: String,

    /// Service identifier to present at the realm
    pub service: Option<String>,

    /// Scope the registry wants the token restricted to
    pub scope: Option<String>,

    /// Challenge scheme; anything but "Bearer" is rejected by the caller
    pub scheme: String,
}

/// One `key="value"` pair of the challenge parameter list.
fn challenge_param(raw: &str) -> Option<(&str, &str)> {
    let (key, value) = raw.trim().split_once('=')?;
    Some((key.trim(), value.trim().trim_matches('"')))
}

impl AuthChallenge {
    /// Parses a WWW-Authenticate header such as
    /// `Bearer realm="https://ghcr.io/token",service="ghcr.io",scope="repository:owner/image:pull"`.
    ///
    /// Parameters other than realm, service and scope are dropped. A
    /// challenge without a realm is useless, since there is nowhere to
    /// take the credential.
    ///
    /// # Examples
    ///
    /// ```
    /// use libreap::auth::AuthChallenge;
    ///
    /// let header = r#"Bearer realm="https://ghcr.io/token",service="ghcr.io""#;
    /// let challenge = AuthChallenge::parse(header).unwrap();
    /// assert_eq!(challenge.scheme, "Bearer");
    /// assert_eq!(challenge.realm, "https://ghcr.io/token");
    /// ```
    pub fn parse(header: &str) -> Result<Self> {
        let mut halves = header.trim().splitn(2, ' ');
        let scheme = halves
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ReapError::malformed("empty authentication challenge"))?;

        let mut challenge = Self {
            realm: String::new(),
            service: None,
            scope: None,
            scheme: scheme.to_string(),
        };

        for (key, value) in halves
            .next()
            .unwrap_or_default()
            .split(',')
            .filter_map(challenge_param)
        {
            match key {
                "realm" => challenge.realm = value.to_string(),
                "service" => challenge.service = Some(value.to_string()),
                "scope" => challenge.scope = Some(value.to_string()),
                _ => {}
            }
        }

        if challenge.realm.is_empty() {
            return Err(ReapError::malformed(format!(
                "authentication challenge with no realm: '{}'",
                header.trim()
            )));
        }
        Ok(challenge)
    }

    /// Builds the token-exchange URL: `realm?service=...&scope=...`.
    ///
    /// The fallback scope grants pull, push and delete on the repository,
    /// which is what a cleanup run needs.
    pub fn token_url(&self, repository: &str) -> String {
        let mut url = self.realm.clone();
        let mut separator = '?';
        if let Some(service) = &self.service {
            url.push(separator);
            url.push_str("service=");
            url.push_str(service);
            separator = '&';
        }
        let scope = self
            .scope
            .clone()
            .unwrap_or_else(|| format!("repository:{}:pull,push,delete", repository));
        url.push(separator);
        url.push_str("scope=");
        url.push_str(&scope);
        url
    }
}

/// Body of a successful token exchange.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Authorization header for the token exchange request: HTTP basic auth with
/// the literal username `token` and the GitHub credential as password.
pub fn exchange_header(credential: &str) -> String {
    use base64::{Engine as _, engine::general_purpose};
    let encoded = general_purpose::STANDARD.encode(format!("token:{}", credential));
    format!("Basic {}", encoded)
}

/// Authorization header carrying an exchanged registry token.
pub fn bearer_header(token: &str) -> String {
    format!("Bearer {}", token)
}
