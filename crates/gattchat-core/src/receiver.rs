//! Per-connection receive task
//!
//! Owns the notification stream and the [`Reassembler`] for one connection and
//! forwards complete, decoded envelopes to the node. Decode and reassembly
//! failures are forwarded as events too; none of them stop the stream.

use std::time::{Duration, Instant};

use futures::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::envelope::Envelope;
use crate::errors::{DecodeError, ReassemblyError};
use crate::reassembly::{Reassembler, ReassemblyOutcome};
use crate::types::ConnectionId;

/// What the receive task observed
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Envelope(Envelope),
    /// A verified frame whose payload did not decode
    Unparsed {
        payload: Vec<u8>,
        error: DecodeError,
    },
    Corrupt(ReassemblyError),
    /// The notification stream ended without a local disconnect
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedFrame {
    pub connection: ConnectionId,
    pub event: InboundEvent,
}

pub struct ReceiveTask {
    connection: ConnectionId,
    reassembler: Reassembler,
    events: mpsc::Sender<ReceivedFrame>,
    cancel: CancellationToken,
    sweep_interval: Duration,
}

impl ReceiveTask {
    pub fn new(
        connection: ConnectionId,
        reassembler: Reassembler,
        events: mpsc::Sender<ReceivedFrame>,
        cancel: CancellationToken,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            connection,
            reassembler,
            events,
            cancel,
            sweep_interval,
        }
    }

    async fn emit(&self, event: InboundEvent) -> bool {
        self.events
            .send(ReceivedFrame {
                connection: self.connection,
                event,
            })
            .await
            .is_ok()
    }

    pub async fn run(mut self, mut notifications: BoxStream<'static, Vec<u8>>) {
        debug!("Receive task started for {}", self.connection);
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let cancel = self.cancel.clone();

        'receive: loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                chunk = notifications.next() => match chunk {
                    Some(bytes) => {
                        if !self.handle_chunk(&bytes).await {
                            break;
                        }
                    }
                    None => {
                        if !cancel.is_cancelled() {
                            self.emit(InboundEvent::Closed).await;
                        }
                        break;
                    }
                },
                _ = sweep.tick() => {
                    for connection in self.reassembler.expire_stale(Instant::now()) {
                        warn!("Partial frame on {} timed out", connection);
                        let error = ReassemblyError::corrupt("partial frame timed out");
                        if !self.emit(InboundEvent::Corrupt(error)).await {
                            break 'receive;
                        }
                    }
                }
            }
        }

        let dropped = self.reassembler.discard(self.connection);
        if dropped > 0 {
            warn!(
                "Discarded {} bytes of a partial frame on {}",
                dropped, self.connection
            );
        }
        debug!("Receive task stopped for {}", self.connection);
    }

    /// Returns `false` once the node is gone
    async fn handle_chunk(&mut self, bytes: &[u8]) -> bool {
        trace!("{} rx: {}", self.connection, hex::encode(bytes));

        let event = match self.reassembler.accept(self.connection, bytes) {
            ReassemblyOutcome::Pending => return true,
            ReassemblyOutcome::Error(error) => InboundEvent::Corrupt(error),
            ReassemblyOutcome::Complete(payload) => match Envelope::decode(&payload) {
                Ok(envelope) => {
                    debug!(
                        "Received {} from {} on {}",
                        envelope.kind().as_str(),
                        envelope.sender_id,
                        self.connection
                    );
                    InboundEvent::Envelope(envelope)
                }
                Err(error) => {
                    warn!("Undecodable payload on {}: {}", self.connection, error);
                    InboundEvent::Unparsed { payload, error }
                }
            },
        };
        self.emit(event).await
    }
}
