//! Proxy runtime: key resolution, the dedup/session/rate-limit stores,
//! the dialect adapter, the gateway catalog, and the axum server plus the
//! request state machine that ties them together.

pub mod dedup;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod ratelimit;
pub mod retry;
pub mod server;
pub mod session;
pub mod state;
pub mod translate;
pub mod upstream;
pub mod usage;

pub use engine::{ChatReply, PassthroughReply, ProxyEngine};
pub use error::{ProxyError, TranslateError};
pub use keys::{KeyResolver, ResolvedAccess, auth_headers};
pub use state::AppState;
