//! OAuth authentication for HTTP tool servers.
//!
//! Drives the full OAuth 2.1 lifecycle for one server: metadata
//! discovery (RFC 9728 / 8414), dynamic client registration (RFC 7591),
//! the PKCE authorization-code flow, silent refresh, and revocation.
//! Tokens and registrations persist in the switchboard config directory
//! keyed by `mcp:{server_name}`.

use {
    secrecy::{ExposeSecret, Secret},
    serde::Serialize,
    tokio::sync::RwLock,
    tracing::{debug, info, warn},
    url::Url,
};

use {
    switchboard_oauth::{
        AuthorizationServerMetadata, OAuthConfig, OAuthFlow, OAuthTokens, RegistrationStore,
        StoredRegistration, TokenStore, fetch_as_metadata, fetch_resource_metadata,
        parse_www_authenticate, register_client,
    },
    switchboard_common::FromMessage,
};

use crate::{
    definitions::OAuthOverride,
    error::{Error, Result},
    traits::AuthProvider,
};

/// Refresh this many seconds before the recorded expiry.
const EXPIRY_BUFFER_SECS: u64 = 60;

const CLIENT_NAME: &str = "switchboard";

/// Where the authenticator is in the OAuth lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    Unconfigured,
    Discovering,
    Registering,
    AwaitingConsent,
    Authenticated,
    Expired,
}

/// Snapshot of authentication state for status reporting. Never carries
/// token material.
#[derive(Debug, Clone, Serialize)]
pub struct OAuthStatus {
    pub configured: bool,
    pub authenticated: bool,
    pub phase: AuthPhase,
    pub token_expiry: Option<u64>,
    pub error: Option<String>,
}

struct PendingFlow {
    config: OAuthConfig,
    verifier: String,
    state: String,
    url: String,
}

pub struct OAuthAuthenticator {
    server_name: String,
    server_url: String,
    overrides: Option<OAuthOverride>,
    http: reqwest::Client,
    tokens: TokenStore,
    registrations: RegistrationStore,
    phase: RwLock<AuthPhase>,
    last_error: RwLock<Option<String>>,
    pending: RwLock<Option<PendingFlow>>,
    /// Resource metadata URL taken from the most recent
    /// `WWW-Authenticate` header, if any.
    resource_metadata_url: RwLock<Option<String>>,
}

impl OAuthAuthenticator {
    pub fn new(server_name: &str, server_url: &str, overrides: Option<OAuthOverride>) -> Self {
        Self::with_stores(
            server_name,
            server_url,
            overrides,
            TokenStore::new(),
            RegistrationStore::new(),
        )
    }

    pub fn with_stores(
        server_name: &str,
        server_url: &str,
        overrides: Option<OAuthOverride>,
        tokens: TokenStore,
        registrations: RegistrationStore,
    ) -> Self {
        Self {
            server_name: server_name.to_string(),
            server_url: server_url.to_string(),
            overrides,
            http: reqwest::Client::new(),
            tokens,
            registrations,
            phase: RwLock::new(AuthPhase::Unconfigured),
            last_error: RwLock::new(None),
            pending: RwLock::new(None),
            resource_metadata_url: RwLock::new(None),
        }
    }

    fn store_key(&self) -> String {
        format!("mcp:{}", self.server_name)
    }

    fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// A token with no recorded expiry is treated as valid.
    fn tokens_usable(tokens: &OAuthTokens) -> bool {
        match tokens.expires_at {
            Some(expires_at) => Self::now() + EXPIRY_BUFFER_SECS < expires_at,
            None => true,
        }
    }

    async fn set_phase(&self, phase: AuthPhase) {
        *self.phase.write().await = phase;
    }

    async fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(server = %self.server_name, error = %message, "OAuth error");
        *self.last_error.write().await = Some(message);
    }

    /// Token endpoint configuration for refresh, from overrides or the
    /// stored registration. The refresh grant does not use a redirect URI.
    fn refresh_config(&self) -> Option<OAuthConfig> {
        if let Some(ov) = &self.overrides
            && let (Some(client_id), Some(auth_url), Some(token_url)) =
                (&ov.client_id, &ov.auth_url, &ov.token_url)
        {
            return Some(OAuthConfig {
                client_id: client_id.clone(),
                auth_url: auth_url.clone(),
                token_url: token_url.clone(),
                redirect_uri: String::new(),
                resource: Some(self.server_url.clone()),
                scopes: ov.scopes.clone(),
            });
        }

        let reg = self.registrations.load(&self.server_url)?;
        Some(OAuthConfig {
            client_id: reg.client_id,
            auth_url: reg.authorization_endpoint,
            token_url: reg.token_endpoint,
            redirect_uri: String::new(),
            resource: Some(self.server_url.clone()),
            scopes: Vec::new(),
        })
    }

    async fn try_refresh(&self, tokens: &OAuthTokens) -> Option<OAuthTokens> {
        let refresh_token = tokens.refresh_token.as_ref()?;
        let config = self.refresh_config()?;

        let flow = OAuthFlow::new(config);
        match flow.refresh(refresh_token.expose_secret()).await {
            Ok(mut fresh) => {
                // Servers may omit the refresh token on rotation; keep the
                // old one in that case.
                if fresh.refresh_token.is_none() {
                    fresh.refresh_token = tokens.refresh_token.clone();
                }
                if let Err(e) = self.tokens.save(&self.store_key(), &fresh) {
                    self.record_error(format!("failed to persist refreshed tokens: {e}"))
                        .await;
                }
                info!(server = %self.server_name, "refreshed OAuth tokens");
                Some(fresh)
            },
            Err(e) => {
                self.record_error(format!("token refresh failed: {e}")).await;
                None
            },
        }
    }

    /// Discover the authorization server for this resource. Prefers the
    /// `WWW-Authenticate` resource metadata URL, then the server's own
    /// well-known document, then the server origin as the AS.
    async fn discover(&self) -> Result<AuthorizationServerMetadata> {
        self.set_phase(AuthPhase::Discovering).await;

        let server_url = Url::parse(&self.server_url)?;

        let as_url = match self.fetch_authorization_server(&server_url).await {
            Some(url) => url,
            None => {
                debug!(server = %self.server_name, "no resource metadata, using server origin");
                let mut origin = server_url.clone();
                origin.set_path("");
                origin.set_query(None);
                origin
            },
        };

        Ok(fetch_as_metadata(&self.http, &as_url).await?)
    }

    async fn fetch_authorization_server(&self, server_url: &Url) -> Option<Url> {
        // A 401 may have pointed us directly at the metadata document.
        if let Some(meta_url) = self.resource_metadata_url.read().await.clone()
            && let Ok(meta_url) = Url::parse(&meta_url)
            && let Ok(resp) = self.http.get(meta_url).send().await
            && let Ok(meta) =
                resp.json::<switchboard_oauth::ProtectedResourceMetadata>().await
            && let Some(first) = meta.authorization_servers.first()
        {
            return Url::parse(first).ok();
        }

        let meta = fetch_resource_metadata(&self.http, server_url).await.ok()?;
        let first = meta.authorization_servers.first()?;
        Url::parse(first).ok()
    }

    /// Obtain a client id, registering dynamically when no override or
    /// stored registration exists.
    async fn ensure_registration(
        &self,
        as_meta: &AuthorizationServerMetadata,
        redirect_uri: &str,
    ) -> Result<StoredRegistration> {
        self.set_phase(AuthPhase::Registering).await;

        if let Some(existing) = self.registrations.load(&self.server_url) {
            debug!(server = %self.server_name, client_id = %existing.client_id, "reusing stored registration");
            return Ok(existing);
        }

        let endpoint = as_meta.registration_endpoint.as_deref().ok_or_else(|| {
            Error::from_message(format!(
                "authorization server '{}' does not support dynamic client registration",
                as_meta.issuer
            ))
        })?;

        let response = register_client(
            &self.http,
            endpoint,
            vec![redirect_uri.to_string()],
            CLIENT_NAME,
        )
        .await?;

        let registration = StoredRegistration {
            client_id: response.client_id,
            client_secret: response.client_secret.map(Secret::new),
            authorization_endpoint: as_meta.authorization_endpoint.clone(),
            token_endpoint: as_meta.token_endpoint.clone(),
            resource: self.server_url.clone(),
            registered_at: Self::now(),
        };
        self.registrations.save(&self.server_url, &registration)?;
        Ok(registration)
    }

    /// Start the interactive authorization flow. Returns the URL the user
    /// must open to grant consent.
    pub async fn begin_authorization(&self, redirect_uri: &str) -> Result<String> {
        let config = match self.build_flow_config(redirect_uri).await {
            Ok(config) => config,
            Err(e) => {
                self.record_error(e.to_string()).await;
                self.set_phase(AuthPhase::Unconfigured).await;
                return Err(e);
            },
        };

        let flow = OAuthFlow::new(config.clone());
        let request = flow.start()?;

        *self.pending.write().await = Some(PendingFlow {
            config,
            verifier: request.pkce.verifier,
            state: request.state,
            url: request.url.clone(),
        });
        *self.last_error.write().await = None;
        self.set_phase(AuthPhase::AwaitingConsent).await;

        info!(server = %self.server_name, "authorization started, awaiting consent");
        Ok(request.url)
    }

    async fn build_flow_config(&self, redirect_uri: &str) -> Result<OAuthConfig> {
        if let Some(ov) = &self.overrides
            && let (Some(client_id), Some(auth_url), Some(token_url)) =
                (&ov.client_id, &ov.auth_url, &ov.token_url)
        {
            return Ok(OAuthConfig {
                client_id: client_id.clone(),
                auth_url: auth_url.clone(),
                token_url: token_url.clone(),
                redirect_uri: redirect_uri.to_string(),
                resource: Some(self.server_url.clone()),
                scopes: ov.scopes.clone(),
            });
        }

        let as_meta = self.discover().await?;
        let registration = self.ensure_registration(&as_meta, redirect_uri).await?;

        let scopes = self
            .overrides
            .as_ref()
            .map(|ov| ov.scopes.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| as_meta.scopes_supported.clone());

        Ok(OAuthConfig {
            client_id: registration.client_id,
            auth_url: registration.authorization_endpoint,
            token_url: registration.token_endpoint,
            redirect_uri: redirect_uri.to_string(),
            resource: Some(self.server_url.clone()),
            scopes,
        })
    }

    /// Finish the flow with the callback's state and code. Returns `false`
    /// when the state does not match the pending flow.
    pub async fn complete_authorization(&self, state: &str, code: &str) -> Result<bool> {
        let Some(pending) = self.pending.write().await.take() else {
            self.record_error("no authorization flow in progress").await;
            return Ok(false);
        };

        if pending.state != state {
            self.record_error("authorization state mismatch").await;
            self.set_phase(AuthPhase::Unconfigured).await;
            return Ok(false);
        }

        let flow = OAuthFlow::new(pending.config);
        let tokens = flow.exchange(code, &pending.verifier).await?;
        self.tokens.save(&self.store_key(), &tokens)?;

        *self.last_error.write().await = None;
        self.set_phase(AuthPhase::Authenticated).await;
        info!(server = %self.server_name, "authorization complete");
        Ok(true)
    }

    /// Forget tokens and registration for this server.
    pub async fn revoke(&self) -> Result<()> {
        self.tokens.delete(&self.store_key())?;
        self.registrations.delete(&self.server_url)?;
        *self.pending.write().await = None;
        *self.last_error.write().await = None;
        self.set_phase(AuthPhase::Unconfigured).await;
        info!(server = %self.server_name, "OAuth credentials revoked");
        Ok(())
    }

    /// URL of the pending consent page, if a flow is awaiting the user.
    pub async fn pending_auth_url(&self) -> Option<String> {
        self.pending.read().await.as_ref().map(|p| p.url.clone())
    }

    pub async fn status(&self) -> OAuthStatus {
        let stored = self.tokens.load(&self.store_key());
        let authenticated = stored.as_ref().is_some_and(Self::tokens_usable);
        let configured = self.overrides.is_some()
            || self.registrations.load(&self.server_url).is_some()
            || self.pending.read().await.is_some()
            || stored.is_some();

        OAuthStatus {
            configured,
            authenticated,
            phase: *self.phase.read().await,
            token_expiry: stored.and_then(|t| t.expires_at),
            error: self.last_error.read().await.clone(),
        }
    }
}

#[async_trait::async_trait]
impl AuthProvider for OAuthAuthenticator {
    async fn access_token(&self) -> Option<Secret<String>> {
        let tokens = self.tokens.load(&self.store_key())?;

        if Self::tokens_usable(&tokens) {
            self.set_phase(AuthPhase::Authenticated).await;
            return Some(tokens.access_token);
        }

        match self.try_refresh(&tokens).await {
            Some(fresh) => {
                self.set_phase(AuthPhase::Authenticated).await;
                Some(fresh.access_token)
            },
            None => {
                self.set_phase(AuthPhase::Expired).await;
                None
            },
        }
    }

    async fn handle_unauthorized(&self, www_authenticate: Option<&str>) -> bool {
        if let Some(header) = www_authenticate
            && let Some(meta_url) = parse_www_authenticate(header)
        {
            *self.resource_metadata_url.write().await = Some(meta_url);
        }

        let Some(tokens) = self.tokens.load(&self.store_key()) else {
            return false;
        };

        match self.try_refresh(&tokens).await {
            Some(_) => {
                self.set_phase(AuthPhase::Authenticated).await;
                true
            },
            None => {
                self.set_phase(AuthPhase::Expired).await;
                false
            },
        }
    }
}
