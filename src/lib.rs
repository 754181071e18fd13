//! mitm-addon: traffic export and userscript injection for an intercepting proxy
//!
//! This crate is the addon layer that sits inside a MITM proxy and does two
//! things for the host application controlling the proxy:
//!
//! - **Export**: every proxy event (requests, responses, TCP and WebSocket
//!   messages, TLS failures, key material, log lines) is framed and written to
//!   a local control channel
//! - **Injection**: HTML responses are rewritten to run the userscripts whose
//!   `@match` rules accept the page URL
//!
//! # Failure Model
//!
//! Losing the control channel is fatal to the session: the first failed write
//! raises a one-time shutdown request. Everything else is contained: a broken
//! script file becomes an error entry, and a page that cannot be rewritten is
//! forwarded unchanged.
//!
//! # Architecture
//!
//! - **Addon**: engine boundary types, the [`addon::ProxyHooks`] extension
//!   point and the [`addon::ProxyAddon`] implementing it
//! - **Inject**: URL matching, userscript parsing, script registry, HTML rewriting
//! - **Export**: frame codec, per-flow truncation, control channel
//! - **Config**: Hierarchical TOML configuration

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod addon;
pub mod cli;
pub mod cli_handler;
pub mod config;
pub mod export;
pub mod inject;
