//! Per-connection frame reassembly
//!
//! Chunks arrive in order on a single connection. The [`Reassembler`] buffers
//! them until the declared frame length is reached, then verifies the checksum
//! and hands the payload back. Buffers are keyed by [`ConnectionId`], so state
//! for one connection never leaks into another.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::errors::ReassemblyError;
use crate::fragmentation::{checksum, FrameHeader, DEFAULT_MAX_MESSAGE_SIZE, FRAME_HEADER_LEN};
use crate::types::ConnectionId;

/// Default age after which a partial frame is discarded
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of feeding one chunk to the reassembler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyOutcome {
    /// More bytes are needed
    Pending,
    /// A full payload was received and verified
    Complete(Vec<u8>),
    /// The partial frame was discarded
    Error(ReassemblyError),
}

#[derive(Debug)]
struct ReassemblyState {
    buffer: Vec<u8>,
    header: Option<FrameHeader>,
    started_at: Instant,
}

impl ReassemblyState {
    fn new(started_at: Instant) -> Self {
        Self {
            buffer: Vec::new(),
            header: None,
            started_at,
        }
    }
}

/// What to do with a connection's buffer after appending a chunk
enum Step {
    Wait,
    Finish,
    Reject(ReassemblyError),
}

/// Accumulates chunks into frames, one buffer per connection
#[derive(Debug)]
pub struct Reassembler {
    max_message_size: usize,
    timeout: Duration,
    buffers: HashMap<ConnectionId, ReassemblyState>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_REASSEMBLY_TIMEOUT)
    }
}

impl Reassembler {
    pub fn new(max_message_size: usize, timeout: Duration) -> Self {
        Self {
            max_message_size,
            timeout,
            buffers: HashMap::new(),
        }
    }

    pub fn accept(&mut self, connection: ConnectionId, bytes: &[u8]) -> ReassemblyOutcome {
        self.accept_at(connection, bytes, Instant::now())
    }

    /// Feed one chunk observed at `now`
    ///
    /// A partial frame older than the timeout is dropped before the chunk is
    /// applied, so the chunk is treated as the start of a new frame.
    pub fn accept_at(
        &mut self,
        connection: ConnectionId,
        bytes: &[u8],
        now: Instant,
    ) -> ReassemblyOutcome {
        if bytes.is_empty() {
            return ReassemblyOutcome::Pending;
        }

        if self.is_stale(connection, now) {
            warn!("Discarding stale partial frame on {}", connection);
            self.buffers.remove(&connection);
        }

        let max_message_size = self.max_message_size;
        let state = self
            .buffers
            .entry(connection)
            .or_insert_with(|| ReassemblyState::new(now));
        state.buffer.extend_from_slice(bytes);
        trace!(
            "{}: +{} bytes, {} buffered",
            connection,
            bytes.len(),
            state.buffer.len()
        );

        match Self::evaluate(state, max_message_size) {
            Step::Wait => ReassemblyOutcome::Pending,
            Step::Reject(error) => {
                self.buffers.remove(&connection);
                warn!("Corrupt frame on {}: {}", connection, error);
                ReassemblyOutcome::Error(error)
            }
            Step::Finish => match self.buffers.remove(&connection) {
                Some(state) => Self::finish(state),
                None => ReassemblyOutcome::Pending,
            },
        }
    }

    fn evaluate(state: &mut ReassemblyState, max_message_size: usize) -> Step {
        if state.header.is_none() {
            let Some(header) = FrameHeader::parse(&state.buffer) else {
                return Step::Wait;
            };
            if header.length == 0 {
                return Step::Reject(ReassemblyError::corrupt("frame declares zero length"));
            }
            if header.length as usize > max_message_size {
                return Step::Reject(ReassemblyError::corrupt(format!(
                    "declared length {} exceeds maximum {}",
                    header.length, max_message_size
                )));
            }
            state.header = Some(header);
        }

        let Some(header) = state.header else {
            return Step::Wait;
        };
        let expected = header.frame_len();
        if state.buffer.len() < expected {
            Step::Wait
        } else if state.buffer.len() > expected {
            Step::Reject(ReassemblyError::corrupt(format!(
                "received {} bytes for a {} byte frame",
                state.buffer.len(),
                expected
            )))
        } else {
            Step::Finish
        }
    }

    fn finish(mut state: ReassemblyState) -> ReassemblyOutcome {
        let Some(header) = state.header else {
            return ReassemblyOutcome::Pending;
        };
        let payload = state.buffer.split_off(FRAME_HEADER_LEN);
        if checksum(&payload) != header.checksum {
            return ReassemblyOutcome::Error(ReassemblyError::corrupt("checksum mismatch"));
        }
        ReassemblyOutcome::Complete(payload)
    }

    fn is_stale(&self, connection: ConnectionId, now: Instant) -> bool {
        self.buffers
            .get(&connection)
            .is_some_and(|state| now.saturating_duration_since(state.started_at) > self.timeout)
    }

    /// Drop every partial frame older than the timeout, returning the affected connections
    pub fn expire_stale(&mut self, now: Instant) -> Vec<ConnectionId> {
        let timeout = self.timeout;
        let expired: Vec<ConnectionId> = self
            .buffers
            .iter()
            .filter(|(_, state)| now.saturating_duration_since(state.started_at) > timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.buffers.remove(id);
        }
        expired
    }

    /// Drop any partial frame for a connection; returns the number of bytes discarded
    pub fn discard(&mut self, connection: ConnectionId) -> usize {
        self.buffers
            .remove(&connection)
            .map(|state| state.buffer.len())
            .unwrap_or(0)
    }

    pub fn pending_bytes(&self, connection: ConnectionId) -> usize {
        self.buffers
            .get(&connection)
            .map(|state| state.buffer.len())
            .unwrap_or(0)
    }

    pub fn active_connections(&self) -> usize {
        self.buffers.len()
    }
}
