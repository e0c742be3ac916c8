//! MCP (Model Context Protocol) client core for switchboard.
//!
//! This crate provides:
//! - Transports for the three server channel kinds: child process
//!   (`stdio_transport`), TCP (`socket_transport`), streamable HTTP
//!   (`http_transport`), behind one `Transport` trait (`traits`)
//! - A per-server protocol client (`client`)
//! - Persisted server definitions (`definitions`)
//! - The runtime connection registry (`registry`)
//! - The tool router aggregating all servers into one namespace (`router`)
//! - OAuth authentication for HTTP servers (`auth`)

pub mod auth;
pub mod client;
pub mod definitions;
pub mod error;
pub mod http_transport;
pub mod registry;
pub mod router;
pub mod socket_transport;
pub mod stdio_transport;
#[cfg(test)]
pub(crate) mod test_support;
pub mod traits;
pub mod types;

pub use {
    auth::{AuthPhase, OAuthAuthenticator, OAuthStatus},
    client::{Client, ConnectionState},
    definitions::{OAuthOverride, ServerDefinition, ServerDefinitions, TransportKind},
    error::{Error, Result},
    registry::{ConnectionRegistry, RuntimeStatus},
    router::{TestConnectionResult, ToolCallRequest, ToolDescriptor, ToolRouter},
    traits::{AuthProvider, Transport},
    types::{ToolCallResult, ToolContent, ToolDef},
};
