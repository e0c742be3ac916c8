//! OAuth 2.1 metadata discovery for tool-provider servers.
//!
//! Implements:
//! - RFC 9728: OAuth 2.0 Protected Resource Metadata
//! - RFC 8414: OAuth 2.0 Authorization Server Metadata
//! - RFC 7591: OAuth 2.0 Dynamic Client Registration

use {
    reqwest::Client,
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    tracing::{debug, info},
    url::Url,
};

use crate::{Error, Result};

// ── Protected Resource Metadata (RFC 9728) ─────────────────────────────────

/// Metadata returned by `/.well-known/oauth-protected-resource`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// The resource server's identifier (its base URL).
    pub resource: String,
    /// Authorization server(s) that can issue tokens for this resource.
    #[serde(default)]
    pub authorization_servers: Vec<String>,
    /// Scopes the resource requires.
    #[serde(default)]
    pub scopes_supported: Vec<String>,
}

/// Fetch protected resource metadata from
/// `{resource_url}/.well-known/oauth-protected-resource`.
pub async fn fetch_resource_metadata(
    client: &Client,
    resource_url: &Url,
) -> Result<ProtectedResourceMetadata> {
    let well_known = build_well_known_url(resource_url, "oauth-protected-resource")?;
    let meta: ProtectedResourceMetadata =
        fetch_json_metadata(client, &well_known, "protected resource metadata").await?;
    info!(
        resource = %meta.resource,
        servers = meta.authorization_servers.len(),
        "fetched resource metadata"
    );
    Ok(meta)
}

// ── Authorization Server Metadata (RFC 8414) ───────────────────────────────

/// Metadata returned by `/.well-known/oauth-authorization-server`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// The AS issuer identifier (a URL).
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    /// URL of the dynamic client registration endpoint (RFC 7591).
    #[serde(default)]
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    /// PKCE challenge methods supported (`S256` expected).
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

/// Fetch authorization server metadata from
/// `{as_url}/.well-known/oauth-authorization-server`.
pub async fn fetch_as_metadata(
    client: &Client,
    as_url: &Url,
) -> Result<AuthorizationServerMetadata> {
    let well_known = build_well_known_url(as_url, "oauth-authorization-server")?;
    let meta: AuthorizationServerMetadata =
        fetch_json_metadata(client, &well_known, "authorization server metadata").await?;
    info!(issuer = %meta.issuer, "fetched AS metadata");
    Ok(meta)
}

async fn fetch_json_metadata<T: DeserializeOwned>(
    client: &Client,
    url: &Url,
    what: &str,
) -> Result<T> {
    debug!(url = %url, "fetching {what}");

    let resp = client
        .get(url.as_str())
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|source| Error::external(format!("failed to fetch {what}"), source))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::message(format!(
            "{what} returned HTTP {status}: {body}"
        )));
    }

    resp.json()
        .await
        .map_err(|source| Error::external(format!("failed to parse {what}"), source))
}

// ── Dynamic Client Registration (RFC 7591) ─────────────────────────────────

/// Request body for dynamic client registration.
#[derive(Debug, Clone, Serialize)]
struct ClientRegistrationRequest {
    redirect_uris: Vec<String>,
    client_name: String,
    grant_types: Vec<String>,
    response_types: Vec<String>,
    token_endpoint_auth_method: String,
}

/// Successful registration response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegistrationResponse {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

/// Perform dynamic client registration at the given endpoint.
pub async fn register_client(
    client: &Client,
    registration_endpoint: &str,
    redirect_uris: Vec<String>,
    client_name: &str,
) -> Result<ClientRegistrationResponse> {
    debug!(endpoint = %registration_endpoint, client_name, "registering dynamic OAuth client");

    let req = ClientRegistrationRequest {
        redirect_uris,
        client_name: client_name.to_string(),
        grant_types: vec![
            "authorization_code".to_string(),
            "refresh_token".to_string(),
        ],
        response_types: vec!["code".to_string()],
        token_endpoint_auth_method: "none".to_string(),
    };

    let resp = client
        .post(registration_endpoint)
        .header("Content-Type", "application/json")
        .json(&req)
        .send()
        .await
        .map_err(|source| Error::external("failed to register OAuth client", source))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::message(format!(
            "dynamic client registration returned HTTP {status}: {body}"
        )));
    }

    let reg: ClientRegistrationResponse = resp.json().await.map_err(|source| {
        Error::external("failed to parse client registration response", source)
    })?;

    info!(client_id = %reg.client_id, "registered dynamic OAuth client");

    Ok(reg)
}

// ── WWW-Authenticate header parsing ────────────────────────────────────────

/// Parse the `resource_metadata` URL from a `WWW-Authenticate: Bearer ...`
/// header.
///
/// Example header:
/// `Bearer realm="example", resource_metadata="https://example.com/.well-known/oauth-protected-resource"`
#[must_use]
pub fn parse_www_authenticate(header: &str) -> Option<String> {
    let stripped = header
        .strip_prefix("Bearer")
        .or_else(|| header.strip_prefix("bearer"))?;

    for part in stripped.trim_start().split(',') {
        let part = part.trim();
        if let Some(value) = part
            .strip_prefix("resource_metadata=")
            .or_else(|| part.strip_prefix("resource_metadata ="))
        {
            let value = value.trim().trim_matches('"');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

// ── Helpers ────────────────────────────────────────────────────────────────

/// Build a `/.well-known/<suffix>` URL following RFC 8615 path conventions.
fn build_well_known_url(base: &Url, suffix: &str) -> Result<Url> {
    let mut url = base.clone();
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    url.join(&format!(".well-known/{suffix}")).map_err(|source| {
        Error::external(
            format!("failed to build .well-known/{suffix} URL from {base}"),
            source,
        )
    })
}
