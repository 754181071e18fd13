//! Extension point called by the proxy engine.

use super::flow::{HttpFlow, LogEntry, TcpFlow, TlsFailure};

/// Lifecycle callbacks of the proxy engine.
///
/// The engine calls these one at a time. Every method defaults to doing
/// nothing, so an implementation only overrides the events it cares about.
/// Hooks never fail: errors are handled inside the implementation.
pub trait ProxyHooks {
    /// The proxy finished starting and accepts connections.
    fn running(&self) {}

    /// A request was fully received.
    fn request(&self, _flow: &mut HttpFlow) {}

    /// A response was fully received and is about to be forwarded.
    ///
    /// Changes made to `flow.response` here are what the client receives.
    fn response(&self, _flow: &mut HttpFlow) {}

    /// The HTTP flow failed. `flow.error` holds the reason.
    fn error(&self, _flow: &mut HttpFlow) {}

    /// New data on a raw TCP connection, appended to `flow.messages`.
    fn tcp_message(&self, _flow: &mut TcpFlow) {}

    /// The raw TCP connection failed. `flow.error` holds the reason.
    fn tcp_error(&self, _flow: &mut TcpFlow) {}

    /// New WebSocket message, appended to the flow's WebSocket data.
    fn websocket_message(&self, _flow: &mut HttpFlow) {}

    /// TLS handshake with the client failed.
    fn tls_failed_client(&self, _failure: &TlsFailure) {}

    /// TLS handshake with the server failed.
    fn tls_failed_server(&self, _failure: &TlsFailure) {}

    /// TLS key material in NSS key log format, one line per call.
    fn key_material(&self, _line: &[u8]) {}

    /// The engine logged a line.
    fn log(&self, _entry: &LogEntry) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addon::flow::{ConnectionInfo, LogLevel};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct LogCounter(AtomicUsize);

    impl ProxyHooks for LogCounter {
        fn log(&self, _entry: &LogEntry) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_defaults_are_noops() {
        let hooks = LogCounter::default();
        let mut flow = TcpFlow::new(ConnectionInfo::new("127.0.0.1:9".parse().unwrap()));

        hooks.running();
        hooks.tcp_message(&mut flow);
        hooks.key_material(b"CLIENT_RANDOM 00 11");
        hooks.log(&LogEntry::new(LogLevel::Info, "hello"));

        assert_eq!(hooks.0.load(Ordering::Relaxed), 1);
        assert!(flow.messages.is_empty());
    }
}
