//! Outbound Dispatcher
//!
//! Turns application intents into envelopes, records chat entries, and queues
//! framed messages for the connection's [`DispatchWorker`]. The worker is the
//! sole owner of the in-flight message: it writes one message's chunks in
//! order and only then takes the next one from its queue.

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::chat_log::{ChatLog, ChatLogEntry};
use crate::envelope::{Envelope, EnvelopeBody, EnvelopeKind};
use crate::errors::{ProtocolError, WriteError};
use crate::fragmentation::{Fragmenter, OutboundFrame};
use crate::group::GroupMembership;
use crate::session::ConnectionHandle;
use crate::transport::TransportLink;
use crate::types::{ConnectionId, Coordinates, GroupId, LocalIdentity, MessageId};

/// Failure reason recorded for sends attempted without a ready connection
pub const NOT_CONNECTED: &str = "not connected";

// ----------------------------------------------------------------------------
// Queue Items and Reports
// ----------------------------------------------------------------------------

/// What a queued message is, so its outcome can be routed back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundTicket {
    /// A chat message with a log entry
    Chat(MessageId),
    /// A group control envelope
    Control(EnvelopeKind),
}

/// A framed envelope waiting for the dispatch worker
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub ticket: OutboundTicket,
    pub frame: OutboundFrame,
}

/// Terminal outcome of one queued message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub connection: ConnectionId,
    pub ticket: OutboundTicket,
    /// Number of chunks written on success
    pub result: Result<usize, WriteError>,
}

/// Outcome of a chat send request
#[derive(Debug, Clone)]
pub struct Submission {
    /// Entry as appended, pending or already failed
    pub entry: ChatLogEntry,
    /// Coordinates were requested but unavailable
    pub location_missing: bool,
}

// ----------------------------------------------------------------------------
// Outbound Dispatcher
// ----------------------------------------------------------------------------

/// Worker queue of the ready connection
struct AttachedQueue {
    connection: ConnectionId,
    chunk_size: usize,
    sender: mpsc::Sender<OutboundMessage>,
}

pub struct OutboundDispatcher {
    identity: LocalIdentity,
    max_message_size: usize,
    queue: Option<AttachedQueue>,
}

impl OutboundDispatcher {
    pub fn new(identity: LocalIdentity, max_message_size: usize) -> Self {
        Self {
            identity,
            max_message_size,
            queue: None,
        }
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    /// Route subsequent sends to a connection's worker queue, framed for its chunk size
    pub fn attach(
        &mut self,
        connection: ConnectionId,
        chunk_size: usize,
        sender: mpsc::Sender<OutboundMessage>,
    ) {
        debug!("Dispatcher attached to {} (chunk size {})", connection, chunk_size);
        self.queue = Some(AttachedQueue {
            connection,
            chunk_size,
            sender,
        });
    }

    pub fn detach(&mut self) {
        if let Some(queue) = self.queue.take() {
            debug!("Dispatcher detached from {}", queue.connection);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.queue.is_some()
    }

    fn envelope(&self, body: EnvelopeBody) -> Envelope {
        Envelope::new(
            self.identity.peer_id.clone(),
            self.identity.display_name.clone(),
            body,
        )
    }

    /// Envelope for a text message, grouped when `group_id` is set
    pub fn build_message(
        &self,
        text: Option<String>,
        location: Option<Coordinates>,
        group_id: Option<GroupId>,
    ) -> Envelope {
        match group_id {
            Some(group_id) => self.envelope(EnvelopeBody::GroupMessage {
                group_id,
                text,
                location,
            }),
            None => self.envelope(EnvelopeBody::PlainMessage { text, location }),
        }
    }

    /// Send a text message to the current group or directly to the peer
    pub fn send_text(
        &mut self,
        log: &mut ChatLog,
        groups: &GroupMembership,
        text: String,
        group_id: Option<GroupId>,
    ) -> Result<Submission, ProtocolError> {
        if text.trim().is_empty() {
            return Err(ProtocolError::EmptyMessage {
                reason: "message text is empty".to_string(),
            });
        }
        let target = groups.resolve_target(group_id.as_ref())?;
        Ok(self.send_chat(log, Some(text), None, target, false))
    }

    /// Send a geotagged message; falls back to text alone without coordinates
    pub fn send_location(
        &mut self,
        log: &mut ChatLog,
        groups: &GroupMembership,
        text: Option<String>,
        coordinates: Option<Coordinates>,
        group_id: Option<GroupId>,
    ) -> Result<Submission, ProtocolError> {
        let text = text.filter(|t| !t.trim().is_empty());
        if text.is_none() && coordinates.is_none() {
            return Err(ProtocolError::EmptyMessage {
                reason: "no text and no location available".to_string(),
            });
        }
        let target = groups.resolve_target(group_id.as_ref())?;
        Ok(self.send_chat(log, text, coordinates, target, coordinates.is_none()))
    }

    fn send_chat(
        &mut self,
        log: &mut ChatLog,
        text: Option<String>,
        location: Option<Coordinates>,
        group_id: Option<GroupId>,
        location_missing: bool,
    ) -> Submission {
        let envelope = self.build_message(text.clone(), location, group_id.clone());
        let mut entry = log
            .append_sent(&self.identity, text, location, group_id)
            .clone();

        if let Err(reason) = self.submit(OutboundTicket::Chat(entry.id), &envelope) {
            warn!("Message {} failed before sending: {}", entry.id, reason);
            if let Some(failed) = log.mark_failed(entry.id, reason) {
                entry = failed;
            }
        }

        Submission {
            entry,
            location_missing,
        }
    }

    /// Queue a group control envelope; returns the failure reason if it cannot be queued
    pub fn send_control(&mut self, envelope: &Envelope) -> Result<(), String> {
        self.submit(OutboundTicket::Control(envelope.kind()), envelope)
    }

    fn submit(&mut self, ticket: OutboundTicket, envelope: &Envelope) -> Result<(), String> {
        let Some(queue) = &self.queue else {
            return Err(NOT_CONNECTED.to_string());
        };

        let frame = Fragmenter::prepare(envelope, queue.chunk_size, self.max_message_size)
            .map_err(|e| e.to_string())?;
        trace!(
            "Queueing {:?} on {} ({} byte frame, {} chunk(s))",
            ticket,
            queue.connection,
            frame.len(),
            frame.chunk_count()
        );

        queue
            .sender
            .try_send(OutboundMessage { ticket, frame })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => "outbound queue full".to_string(),
                mpsc::error::TrySendError::Closed(_) => NOT_CONNECTED.to_string(),
            })
    }
}

// ----------------------------------------------------------------------------
// Dispatch Worker
// ----------------------------------------------------------------------------

/// Writes queued messages for one connection, strictly one at a time
pub struct DispatchWorker<L> {
    handle: ConnectionHandle<L>,
    queue: mpsc::Receiver<OutboundMessage>,
    reports: mpsc::Sender<DeliveryReport>,
}

impl<L: TransportLink> DispatchWorker<L> {
    pub fn new(
        handle: ConnectionHandle<L>,
        queue: mpsc::Receiver<OutboundMessage>,
        reports: mpsc::Sender<DeliveryReport>,
    ) -> Self {
        Self {
            handle,
            queue,
            reports,
        }
    }

    pub async fn run(mut self) {
        let connection = self.handle.id();
        let cancel = self.handle.cancellation().clone();
        debug!("Dispatch worker started for {}", connection);

        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                message = self.queue.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let result = self.send_one(&message).await;
            let stop = matches!(&result, Err(e) if e.is_link_loss() || *e == WriteError::Cancelled);
            let report = DeliveryReport {
                connection,
                ticket: message.ticket,
                result,
            };
            if self.reports.send(report).await.is_err() || stop {
                break;
            }
        }

        debug!("Dispatch worker stopped for {}", connection);
    }

    async fn send_one(&self, message: &OutboundMessage) -> Result<usize, WriteError> {
        let total = message.frame.chunk_count();

        for (index, chunk) in message.frame.chunks().enumerate() {
            trace!(
                "{} chunk {}/{}: {}",
                self.handle.id(),
                index + 1,
                total,
                hex::encode(chunk)
            );
            if let Err(e) = self.handle.write(chunk).await {
                warn!(
                    "Write of chunk {}/{} for {:?} failed: {}",
                    index + 1,
                    total,
                    message.ticket,
                    e
                );
                return Err(e);
            }
        }

        debug!("Sent {:?} in {} chunk(s)", message.ticket, total);
        Ok(total)
    }
}
