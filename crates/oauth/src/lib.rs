//! OAuth 2.1 building blocks for tool-server authentication.
//!
//! Implements the pieces the MCP Authorization model needs:
//! - PKCE authorization code flow (`flow`, `pkce`)
//! - Protected resource metadata discovery, RFC 9728 (`discovery`)
//! - Authorization server metadata discovery, RFC 8414 (`discovery`)
//! - Dynamic client registration, RFC 7591 (`discovery`)
//! - File-backed token and registration persistence (`storage`,
//!   `registration_store`)

mod config_dir;
pub mod discovery;
pub mod error;
pub mod flow;
pub mod pkce;
pub mod registration_store;
pub mod storage;
pub mod types;

pub use {
    discovery::{
        AuthorizationServerMetadata, ClientRegistrationResponse, ProtectedResourceMetadata,
        fetch_as_metadata, fetch_resource_metadata, parse_www_authenticate, register_client,
    },
    error::{Error, Result},
    flow::{AuthorizationRequest, OAuthFlow},
    registration_store::{RegistrationStore, StoredRegistration},
    storage::TokenStore,
    types::{OAuthConfig, OAuthTokens, PkceChallenge, serialize_option_secret, serialize_secret},
};
