//! Proxy engine integration.
//!
//! The engine calls [`ProxyHooks`] on a [`ProxyAddon`] for every lifecycle
//! event. The addon rewrites HTML responses through the injector and exports
//! every event to the host.
//!
//! ```text
//!  proxy engine ──hooks──► ProxyAddon ─┬─► ContentInjector (response path)
//!                                      └─► EventExporter   (all paths)
//! ```

pub mod assemble;
pub mod error;
pub mod flow;
pub mod hooks;
pub mod orchestrator;

pub use assemble::{assemble_request, assemble_response};
pub use error::{AddonError, AddonResult};
pub use flow::{
    ConnectionInfo, FlowTarget, HttpFlow, LogEntry, LogLevel, TcpFlow, TcpMessage, TlsFailure,
    WebSocketData, WebSocketMessage,
};
pub use hooks::ProxyHooks;
pub use orchestrator::{ProxyAddon, ProxyAddonBuilder};
