//! Upstream OAuth 2.0 authorization and token lifecycle
//!
//! - [`crypto`] seals token material at rest
//! - [`token_store`] persists the single token record
//! - [`oauth_client`] talks to the upstream token endpoint
//! - [`manager`] keeps the access token fresh
//! - [`pkce`] derives S256 challenges
//! - [`flow`] drives the authorization-code attempts

pub mod crypto;
pub mod flow;
pub mod manager;
pub mod oauth_client;
pub mod pkce;
pub mod token_store;

pub use flow::{AuthorizationFlow, AuthorizationStart};
pub use manager::TokenManager;
pub use token_store::{TokenRecord, TokenStatus, TokenStore};
