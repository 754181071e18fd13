//! Event export to the controlling host.
//!
//! ```text
//!  ProxyAddon ──► EventExporter ──► ControlChannel ──► host
//!                  │   (frames, truncation, shutdown on failure)
//!                  └─ FlowState (one per flow)
//! ```

pub mod channel;
pub mod error;
pub mod exporter;
pub mod flow_state;
pub mod protocol;

pub use channel::{ChannelAddr, connect};
pub use error::{ExportError, ExportResult};
pub use exporter::EventExporter;
pub use flow_state::{Admission, Direction, FlowState, MAX_PAYLOAD_LEN};
pub use protocol::{Frame, MessageKind, now_millis, read_all_frames, read_frame, write_frame};
