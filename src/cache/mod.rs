//! Identity caching for request-scoped data sessions.
//!
//! - [`IdentityCache`]: one canonical instance per `(kind, id)` within a unit of work
//! - [`session_scope`]: axum middleware that opens a session per request and
//!   clears its cache at the request boundary
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! cache_negative_lookups = true
//! ```

mod config;
pub mod identity;
mod keys;
pub(crate) mod lock;
mod middleware;

pub use config::CacheConfig;
pub use identity::IdentityCache;
pub use keys::IdentityKey;
pub use middleware::session_scope;
