//! Protocol layer for Vitalgate
//!
//! Tool calls reach the broker over two transports that share one
//! authorization context:
//!
//! - `session`    -- streaming sessions: table, phases, heartbeats, result routing
//! - `dispatcher` -- bearer check and routing to the streaming or stateless path
//! - `types`      -- call envelopes and JSON-RPC 2.0 primitives

pub mod dispatcher;
pub mod session;
pub mod types;

pub use dispatcher::Dispatcher;
pub use session::{CloseReason, SessionConfig, SessionEvent, SessionManager, SessionPhase, SessionStream};
