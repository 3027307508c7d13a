//! Vitalgate - OAuth2/PKCE broker and tool gateway for a health-data API
//!
//! Vitalgate holds one operator's upstream credentials, keeps them fresh, and
//! exposes the data API to remote tool-calling clients over two transports
//! that share one authorization context.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `auth`: PKCE authorization flow, encrypted token store, token lifecycle
//! - `mcp`: streaming sessions, transport dispatcher, wire types
//! - `tools`: shared tool-execution boundary and the data tools
//! - `api`: bearer-authenticated data API client
//! - `server`: application context, HTTP routes, graceful shutdown
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use vitalgate::{server, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let ctx = server::AppContext::init(config)?;
//!     server::serve(ctx).await
//! }
//! ```

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod mcp;
pub mod server;
pub mod tools;

// Re-export commonly used types
pub use config::Config;
pub use error::{ErrorKind, Result, VitalgateError};
pub use server::AppContext;
