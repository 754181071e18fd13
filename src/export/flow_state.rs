//! Per-flow payload truncation state.
//!
//! When payload truncation is enabled, each flow may export at most one
//! payload chunk per direction, and no chunk longer than [`MAX_PAYLOAD_LEN`].
//! The first time either limit is hit the flow becomes truncated for good:
//!
//! ```text
//!                 chunk < cap                 2nd chunk same direction
//!   fresh ──────────────────────► dir sent ──────────────────────────┐
//!     │                                                              ▼
//!     └──── chunk >= cap (capped, still sent) ────────────────► truncated
//!                                                           (everything dropped)
//! ```

/// Cap on a single exported payload chunk, per direction.
pub const MAX_PAYLOAD_LEN: usize = 512;

/// Direction of a payload within a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server.
    Request,
    /// Server to client.
    Response,
}

impl Direction {
    /// Direction of a message by its sender.
    pub fn from_client(from_client: bool) -> Self {
        if from_client {
            Direction::Request
        } else {
            Direction::Response
        }
    }
}

/// Outcome of [`FlowState::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Export the payload unchanged.
    Full,
    /// Export the first [`MAX_PAYLOAD_LEN`] bytes. The flow is now truncated.
    Capped,
    /// Drop the payload. The flow was truncated by this chunk.
    Exhausted,
    /// Drop the payload. The flow was already truncated.
    Dropped,
}

impl Admission {
    /// Whether this outcome is the moment the flow became truncated.
    pub fn truncates(self) -> bool {
        matches!(self, Admission::Capped | Admission::Exhausted)
    }
}

/// Truncation bookkeeping for one flow.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlowState {
    request_sent: bool,
    response_sent: bool,
    truncated: bool,
}

impl FlowState {
    /// Fresh state: nothing sent, not truncated.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a chunk was already exported in `direction`.
    pub fn sent(&self, direction: Direction) -> bool {
        match direction {
            Direction::Request => self.request_sent,
            Direction::Response => self.response_sent,
        }
    }

    /// Whether the flow is truncated. Never reverts once set.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Decide what to do with a chunk of `len` bytes and update the state.
    pub fn admit(&mut self, len: usize, direction: Direction) -> Admission {
        if self.truncated {
            return Admission::Dropped;
        }

        if self.sent(direction) {
            self.truncated = true;
            return Admission::Exhausted;
        }

        if len >= MAX_PAYLOAD_LEN {
            self.truncated = true;
            return Admission::Capped;
        }

        match direction {
            Direction::Request => self.request_sent = true,
            Direction::Response => self.response_sent = true,
        }
        Admission::Full
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_chunk_per_direction() {
        let mut state = FlowState::new();

        assert_eq!(state.admit(100, Direction::Request), Admission::Full);
        assert_eq!(state.admit(100, Direction::Response), Admission::Full);
        assert!(state.sent(Direction::Request));
        assert!(!state.is_truncated());

        assert_eq!(state.admit(100, Direction::Request), Admission::Exhausted);
        assert!(state.is_truncated());
    }

    #[test]
    fn test_oversized_chunk_is_capped() {
        let mut state = FlowState::new();

        assert_eq!(state.admit(1000, Direction::Response), Admission::Capped);
        assert!(state.is_truncated());
        assert_eq!(state.admit(10, Direction::Response), Admission::Dropped);
        assert_eq!(state.admit(10, Direction::Request), Admission::Dropped);
    }

    #[test]
    fn test_cap_is_inclusive() {
        let mut state = FlowState::new();
        assert_eq!(state.admit(MAX_PAYLOAD_LEN - 1, Direction::Request), Admission::Full);

        let mut state = FlowState::new();
        assert_eq!(state.admit(MAX_PAYLOAD_LEN, Direction::Request), Admission::Capped);
    }

    #[test]
    fn test_truncation_is_sticky() {
        let mut state = FlowState::new();
        state.admit(5, Direction::Request);
        assert!(state.admit(5, Direction::Request).truncates());

        for _ in 0..3 {
            let admission = state.admit(5, Direction::Request);
            assert_eq!(admission, Admission::Dropped);
            assert!(!admission.truncates());
        }
        assert!(state.is_truncated());
    }

    #[test]
    fn test_direction_from_client() {
        assert_eq!(Direction::from_client(true), Direction::Request);
        assert_eq!(Direction::from_client(false), Direction::Response);
    }
}
