//! The proxy addon: hook implementations tying injection to export.
//!
//! # Response path
//!
//! ```text
//!   engine ── response(flow) ──► ContentInjector ──► may rewrite body/headers
//!                                      │ names injected
//!                                      ▼
//!                               js_inject frame
//!                                      │
//!                                      ▼
//!                 http_rep frame (the rewritten response, truncation applied)
//! ```
//!
//! Every other hook maps one engine event onto one frame. All frames of a flow
//! carry the flow's endpoint port, chosen by `dump_client`:
//!
//! | Mode                    | Port reported                        |
//! |-------------------------|--------------------------------------|
//! | SOCKS5 (`dump_client`)  | client peer port                     |
//! | transparent             | local port of the server-side socket |

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use super::assemble::{assemble_request, assemble_response};
use super::error::{AddonError, AddonResult};
use super::flow::{ConnectionInfo, HttpFlow, LogEntry, TcpFlow, TlsFailure};
use super::hooks::ProxyHooks;
use crate::config::{Config, ExportSettings};
use crate::export::{ChannelAddr, Direction, EventExporter, MessageKind, connect, now_millis};
use crate::inject::{ContentInjector, ScriptRegistry};

/// Separator between script names in a `js_inject` payload.
pub const INJECTED_NAMES_SEPARATOR: &str = ",";

/// The addon registered with the proxy engine.
pub struct ProxyAddon {
    exporter: EventExporter,
    injector: Option<ContentInjector>,
    settings: ExportSettings,
}

impl ProxyAddon {
    /// Start building an addon.
    pub fn builder() -> ProxyAddonBuilder {
        ProxyAddonBuilder::new()
    }

    /// The exporter frames are written through.
    pub fn exporter(&self) -> &EventExporter {
        &self.exporter
    }

    /// The injector, if injection is enabled.
    pub fn injector(&self) -> Option<&ContentInjector> {
        self.injector.as_ref()
    }

    /// Effective export flags.
    pub fn settings(&self) -> ExportSettings {
        self.settings
    }

    /// Subscribe to the shutdown request raised when the control channel
    /// fails. The proxy session should stop once it turns `true`.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.exporter.subscribe_shutdown()
    }

    /// Mark the scripts dirty. They are rescanned before the next injection.
    pub fn reload_scripts(&self) {
        match self.injector {
            Some(ref injector) => injector.registry().invalidate(),
            None => debug!("Script reload requested with injection disabled"),
        }
    }

    fn port(&self, conn: &ConnectionInfo) -> u16 {
        conn.endpoint_port(self.settings.dump_client)
    }

    /// Run the injector over the flow's response and announce what was
    /// injected.
    fn inject(&self, flow: &mut HttpFlow, port: u16) {
        let Some(ref injector) = self.injector else {
            return;
        };
        let target = flow.target();
        let Some(response) = flow.response.as_mut() else {
            return;
        };

        match injector.inject(target.as_request_target(), response) {
            Ok(names) if !names.is_empty() => {
                let payload = names.join(INJECTED_NAMES_SEPARATOR);
                self.exporter
                    .send(now_millis(), port, MessageKind::JsInject, payload.as_bytes());
            }
            Ok(_) => {}
            Err(e) => debug!("Injection into {} (flow {}) skipped: {}", target, flow.id, e),
        }
    }
}

impl ProxyHooks for ProxyAddon {
    fn running(&self) {
        self.exporter.send(now_millis(), 0, MessageKind::Running, &[]);
    }

    fn request(&self, flow: &mut HttpFlow) {
        let port = self.port(&flow.conn);
        let payload = assemble_request(&flow.request);

        self.exporter.send_payload(
            &mut flow.state,
            flow.request_timestamp_ms,
            port,
            MessageKind::HttpRequest,
            &payload,
            Direction::Request,
        );
    }

    fn response(&self, flow: &mut HttpFlow) {
        let port = self.port(&flow.conn);
        self.inject(flow, port);

        let Some(ref response) = flow.response else {
            return;
        };
        let payload = assemble_response(response);
        let timestamp_ms = flow.response_timestamp_ms.unwrap_or_else(now_millis);

        self.exporter.send_payload(
            &mut flow.state,
            timestamp_ms,
            port,
            MessageKind::HttpResponse,
            &payload,
            Direction::Response,
        );
    }

    fn error(&self, flow: &mut HttpFlow) {
        if let Some(ref error) = flow.error {
            debug!("HTTP flow {} on {} failed: {}", flow.id, flow.conn, error);
            self.exporter.send(
                now_millis(),
                self.port(&flow.conn),
                MessageKind::HttpError,
                error.as_bytes(),
            );
        }
    }

    fn tcp_message(&self, flow: &mut TcpFlow) {
        let port = self.port(&flow.conn);
        let Some(message) = flow.messages.last() else {
            return;
        };

        self.exporter.send_payload(
            &mut flow.state,
            message.timestamp_ms,
            port,
            MessageKind::tcp_message(message.from_client),
            &message.content,
            Direction::from_client(message.from_client),
        );
    }

    fn tcp_error(&self, flow: &mut TcpFlow) {
        if let Some(ref error) = flow.error {
            debug!("TCP flow {} on {} failed: {}", flow.id, flow.conn, error);
            self.exporter.send(
                now_millis(),
                self.port(&flow.conn),
                MessageKind::TcpError,
                error.as_bytes(),
            );
        }
    }

    fn websocket_message(&self, flow: &mut HttpFlow) {
        let port = self.port(&flow.conn);
        let Some(message) = flow.websocket.as_ref().and_then(|ws| ws.messages.last()) else {
            return;
        };

        self.exporter.send_payload(
            &mut flow.state,
            message.timestamp_ms,
            port,
            MessageKind::ws_message(message.from_client),
            &message.content,
            Direction::from_client(message.from_client),
        );
    }

    fn tls_failed_client(&self, failure: &TlsFailure) {
        debug!("TLS handshake on {} failed: {}", failure.conn, failure.error);
        self.exporter.send(
            failure.timestamp_ms,
            self.port(&failure.conn),
            MessageKind::TlsError,
            failure.error.as_bytes(),
        );
    }

    fn tls_failed_server(&self, failure: &TlsFailure) {
        self.tls_failed_client(failure);
    }

    fn key_material(&self, line: &[u8]) {
        if self.settings.dump_keylog {
            self.exporter.send(now_millis(), 0, MessageKind::Secret, line);
        }
    }

    fn log(&self, entry: &LogEntry) {
        let payload = format!("[{}] {}", entry.level, entry.message);
        self.exporter
            .send(now_millis(), 0, MessageKind::Log, payload.as_bytes());
    }
}

/// Builder for [`ProxyAddon`].
pub struct ProxyAddonBuilder {
    settings: ExportSettings,
    scripts_dir: Option<PathBuf>,
    registry: Option<Arc<ScriptRegistry>>,
    writer: Option<Box<dyn Write + Send>>,
    channel: Option<ChannelAddr>,
}

impl ProxyAddonBuilder {
    /// Builder with default flags, no injection and no channel.
    pub fn new() -> Self {
        Self {
            settings: ExportSettings::default(),
            scripts_dir: None,
            registry: None,
            writer: None,
            channel: None,
        }
    }

    /// Builder preset from a loaded configuration.
    pub fn from_config(config: &Config) -> AddonResult<Self> {
        let channel = config
            .export
            .channel
            .as_deref()
            .map(str::parse::<ChannelAddr>)
            .transpose()?;

        Ok(Self {
            settings: config.export_settings(),
            scripts_dir: config.injector.resolved_scripts_dir()?,
            registry: None,
            writer: None,
            channel,
        })
    }

    /// Enable the per-flow truncation policy.
    pub fn truncate_payloads(mut self, enabled: bool) -> Self {
        self.settings.truncate_payloads = enabled;
        self
    }

    /// Report client ports (`true`) or server-side local ports (`false`).
    pub fn dump_client(mut self, enabled: bool) -> Self {
        self.settings.dump_client = enabled;
        self
    }

    /// Forward TLS key material.
    pub fn dump_keylog(mut self, enabled: bool) -> Self {
        self.settings.dump_keylog = enabled;
        self
    }

    /// Inject the scripts found in `dir`.
    pub fn scripts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scripts_dir = Some(dir.into());
        self
    }

    /// Inject the scripts of an existing registry.
    pub fn registry(mut self, registry: Arc<ScriptRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Write frames to `writer` instead of connecting to a channel.
    pub fn writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.writer = Some(Box::new(writer));
        self
    }

    /// Connect to the host at `addr` on build.
    pub fn channel(mut self, addr: ChannelAddr) -> Self {
        self.channel = Some(addr);
        self
    }

    /// Open the channel, load the scripts and create the addon.
    pub fn build(self) -> AddonResult<ProxyAddon> {
        let writer = match (self.writer, self.channel) {
            (Some(writer), _) => writer,
            (None, Some(addr)) => connect(&addr)?,
            (None, None) => return Err(AddonError::NoChannel),
        };

        let registry = match (self.registry, self.scripts_dir) {
            (Some(registry), _) => Some(registry),
            (None, Some(dir)) => Some(Arc::new(ScriptRegistry::new(dir))),
            (None, None) => None,
        };

        match registry {
            Some(ref registry) => info!("Injecting scripts from {:?}", registry.dir()),
            None => info!("Script injection disabled"),
        }
        debug!(
            "Export settings: truncate_payloads={} dump_client={} dump_keylog={}",
            self.settings.truncate_payloads, self.settings.dump_client, self.settings.dump_keylog
        );

        Ok(ProxyAddon {
            exporter: EventExporter::new(writer, self.settings.truncate_payloads),
            injector: registry.map(ContentInjector::new),
            settings: self.settings,
        })
    }
}

impl Default for ProxyAddonBuilder {
    fn default() -> Self {
        Self::new()
    }
}
