//! Event exporter over the control channel.
//!
//! The exporter owns the write end of the channel and is shared by every hook.
//! Writes are synchronous and serialized by a mutex, so frames never
//! interleave.
//!
//! # Channel lifecycle
//!
//! ```text
//!        write ok
//!       ┌───────┐
//!       ▼       │
//!     Open ─────┘
//!       │ write error (first one wins)
//!       ▼
//!     Closed ──► shutdown signal sent once, later sends are no-ops
//! ```

use std::io::Write;
#[cfg(test)]
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;
use tracing::{debug, error, info};

use super::error::ExportError;
use super::flow_state::{Admission, Direction, FlowState, MAX_PAYLOAD_LEN};
use super::protocol::{MessageKind, now_millis, write_frame};

/// Frames events onto the control channel.
pub struct EventExporter {
    /// Write end of the channel.
    writer: Mutex<Box<dyn Write + Send>>,
    /// Set once by the first failed write.
    closed: AtomicBool,
    /// Flipped to `true` when the channel closes.
    shutdown_tx: watch::Sender<bool>,
    /// Whether the per-flow truncation policy applies.
    truncate: bool,
    /// Number of shutdown signals raised.
    #[cfg(test)]
    shutdown_signals: AtomicUsize,
}

impl EventExporter {
    /// Create an exporter writing to `writer`.
    pub fn new(writer: Box<dyn Write + Send>, truncate: bool) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
            shutdown_tx,
            truncate,
            #[cfg(test)]
            shutdown_signals: AtomicUsize::new(0),
        }
    }

    /// Subscribe to the shutdown request raised when the channel closes.
    ///
    /// The value turns `true` exactly once. Receivers created after the fact
    /// observe `true` immediately.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Whether the channel has failed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether payload truncation is enabled.
    pub fn truncates_payloads(&self) -> bool {
        self.truncate
    }

    /// Write one frame.
    ///
    /// Failures are never returned: the first one closes the channel and
    /// requests shutdown, and every later call does nothing.
    pub fn send(&self, timestamp_ms: u64, port: u16, kind: MessageKind, payload: &[u8]) {
        if self.is_closed() {
            return;
        }

        let result = {
            let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            write_frame(&mut **writer, timestamp_ms, port, kind, payload)
        };

        match result {
            Ok(()) => debug!("Sent {} frame ({} bytes) for port {}", kind, payload.len(), port),
            Err(e) => self.close(ExportError::from_write(e)),
        }
    }

    /// Apply the truncation policy to a flow payload.
    ///
    /// Returns the bytes to export, or `None` if the payload must be dropped.
    /// When this call truncates the flow, a `trunc` frame is sent first.
    pub fn check_payload<'a>(
        &self,
        state: &mut FlowState,
        port: u16,
        data: &'a [u8],
        direction: Direction,
    ) -> Option<&'a [u8]> {
        if !self.truncate {
            return Some(data);
        }

        let admission = state.admit(data.len(), direction);
        if admission.truncates() {
            self.send(now_millis(), port, MessageKind::Truncated, &[]);
        }

        match admission {
            Admission::Full => Some(data),
            Admission::Capped => Some(&data[..MAX_PAYLOAD_LEN]),
            Admission::Exhausted | Admission::Dropped => None,
        }
    }

    /// Send a flow payload through the truncation policy.
    pub fn send_payload(
        &self,
        state: &mut FlowState,
        timestamp_ms: u64,
        port: u16,
        kind: MessageKind,
        data: &[u8],
        direction: Direction,
    ) {
        if let Some(payload) = self.check_payload(state, port, data, direction) {
            self.send(timestamp_ms, port, kind, payload);
        }
    }

    /// Transition to closed and signal shutdown, once.
    fn close(&self, err: ExportError) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        if err.is_peer_closed() {
            info!("Control channel closed by host, shutting down");
        } else {
            error!("Control channel write failed, shutting down: {}", err);
        }

        #[cfg(test)]
        self.shutdown_signals.fetch_add(1, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::protocol::{Frame, read_all_frames};
    use std::io::{self, Cursor};
    use std::sync::{Arc, Barrier};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn frames(&self) -> Vec<Frame> {
            let bytes = self.0.lock().unwrap().clone();
            read_all_frames(&mut Cursor::new(bytes)).unwrap()
        }
    }

    struct FailingWriter(io::ErrorKind);

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(self.0))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn exporter(truncate: bool) -> (EventExporter, SharedBuffer) {
        let buffer = SharedBuffer::default();
        (EventExporter::new(Box::new(buffer.clone()), truncate), buffer)
    }

    #[test]
    fn test_send_writes_frame() {
        let (exporter, buffer) = exporter(false);
        exporter.send(10, 443, MessageKind::HttpRequest, b"GET / HTTP/1.1\r\n\r\n");

        let frames = buffer.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].timestamp_ms, 10);
        assert_eq!(frames[0].port, 443);
        assert_eq!(frames[0].kind, MessageKind::HttpRequest);
        assert_eq!(frames[0].payload_lossy(), "GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn test_truncation_disabled_passes_everything() {
        let (exporter, buffer) = exporter(false);
        let mut state = FlowState::new();
        let data = vec![b'x'; 2000];

        for _ in 0..3 {
            assert_eq!(exporter.check_payload(&mut state, 1, &data, Direction::Request), Some(&data[..]));
        }
        assert!(!state.is_truncated());
        assert!(buffer.frames().is_empty());
    }

    #[test]
    fn test_second_chunk_same_direction_suppressed() {
        let (exporter, buffer) = exporter(true);
        let mut state = FlowState::new();
        let chunk = [b'a'; 100];

        exporter.send_payload(&mut state, 1, 80, MessageKind::TcpClientMessage, &chunk, Direction::Request);
        exporter.send_payload(&mut state, 2, 80, MessageKind::TcpClientMessage, &chunk, Direction::Request);

        let kinds: Vec<_> = buffer.frames().iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![MessageKind::TcpClientMessage, MessageKind::Truncated]);
    }

    #[test]
    fn test_oversized_chunk_capped_with_notice() {
        let (exporter, buffer) = exporter(true);
        let mut state = FlowState::new();
        let chunk = [b'z'; 1000];

        exporter.send_payload(&mut state, 1, 80, MessageKind::TcpServerMessage, &chunk, Direction::Response);
        exporter.send_payload(&mut state, 2, 80, MessageKind::TcpServerMessage, &chunk, Direction::Response);

        let frames = buffer.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].kind, MessageKind::Truncated);
        assert_eq!(frames[0].port, 80);
        assert!(frames[0].payload.is_empty());
        assert_eq!(frames[1].kind, MessageKind::TcpServerMessage);
        assert_eq!(frames[1].payload.len(), MAX_PAYLOAD_LEN);
    }

    #[test]
    fn test_truncated_flow_never_notifies_twice() {
        let (exporter, buffer) = exporter(true);
        let mut state = FlowState::new();

        assert!(exporter.check_payload(&mut state, 1, &[0; 600], Direction::Request).is_some());
        assert!(exporter.check_payload(&mut state, 1, &[0; 10], Direction::Request).is_none());
        assert!(exporter.check_payload(&mut state, 1, &[0; 10], Direction::Response).is_none());

        let truncs = buffer
            .frames()
            .iter()
            .filter(|f| f.kind == MessageKind::Truncated)
            .count();
        assert_eq!(truncs, 1);
    }

    #[test]
    fn test_broken_pipe_closes_once() {
        let exporter = EventExporter::new(Box::new(FailingWriter(io::ErrorKind::BrokenPipe)), false);
        let shutdown = exporter.subscribe_shutdown();
        assert!(!*shutdown.borrow());

        exporter.send(1, 0, MessageKind::Running, b"");
        assert!(exporter.is_closed());
        assert!(*shutdown.borrow());

        // Later sends are no-ops
        exporter.send(2, 0, MessageKind::Log, b"x");
        assert!(exporter.is_closed());
    }

    #[test]
    fn test_other_io_error_closes() {
        let exporter = EventExporter::new(Box::new(FailingWriter(io::ErrorKind::Other)), true);
        exporter.send(1, 0, MessageKind::Log, b"[info] x");
        assert!(exporter.is_closed());
        assert!(*exporter.subscribe_shutdown().borrow());
    }

    #[test]
    fn test_concurrent_failures_signal_once() {
        let exporter = Arc::new(EventExporter::new(
            Box::new(FailingWriter(io::ErrorKind::ConnectionReset)),
            false,
        ));
        let mut shutdown = exporter.subscribe_shutdown();

        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let exporter = exporter.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    exporter.send(i, 0, MessageKind::Log, b"x");
                    exporter.close(ExportError::PeerClosed);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(exporter.is_closed());
        assert_eq!(exporter.shutdown_signals.load(Ordering::SeqCst), 1);
        assert!(shutdown.has_changed().unwrap());
        assert!(*shutdown.borrow_and_update());
        assert!(!shutdown.has_changed().unwrap());
    }
}
