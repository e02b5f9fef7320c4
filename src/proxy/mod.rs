//! Edge relay
//!
//! The reverse proxy in front of the backend: header policy, per-request
//! origin resolution, the upstream transport, the API and health relays and
//! the HTTP server that routes between them.

pub mod headers;
pub mod health;
pub mod origin;
pub mod relay;
pub mod server;
pub mod upstream;

pub use health::HealthProxy;
pub use origin::{resolve_origin, BuildMode, EnvSource, OriginConfig, ProcessEnv};
pub use relay::EdgeProxy;
pub use server::{serve, EdgeRouter};
pub use upstream::{ReqwestUpstream, UpstreamClient, UpstreamError};
