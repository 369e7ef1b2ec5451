//! Append-only chat log
//!
//! Entries are numbered with a monotonically increasing [`MessageId`]. Only the
//! delivery status of a sent entry changes after it is appended.

use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::types::{Coordinates, GroupId, LocalIdentity, MessageId, PeerId, Timestamp};

/// Whether an entry was written locally or received from the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Queued or mid-write
    Pending,
    /// Every chunk was acknowledged by the transport
    Sent,
    Failed { reason: String },
    Received,
}

/// One line of conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatLogEntry {
    pub id: MessageId,
    pub direction: Direction,
    pub text: Option<String>,
    pub location: Option<Coordinates>,
    pub sender_name: String,
    /// Absent for payloads that could not be decoded
    pub sender_id: Option<PeerId>,
    pub group_id: Option<GroupId>,
    pub timestamp: Timestamp,
    pub status: DeliveryStatus,
    /// Group message for a group the local peer is not in
    pub out_of_group: bool,
    /// Raw payload that failed to decode
    pub unparsed: bool,
}

impl ChatLogEntry {
    /// Text for display, with a map link appended for geotagged entries
    pub fn display_text(&self) -> String {
        let location = self
            .location
            .map(|coords| format!("Location: {}", coords.osm_link()));
        match (self.text.as_deref(), location) {
            (Some(text), Some(location)) if !text.is_empty() => format!("{}\n{}", text, location),
            (_, Some(location)) => location,
            (Some(text), None) => text.to_string(),
            (None, None) => String::new(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, DeliveryStatus::Pending)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, DeliveryStatus::Failed { .. })
    }
}

/// Conversation history in arrival order
#[derive(Debug, Default)]
pub struct ChatLog {
    entries: Vec<ChatLogEntry>,
    next_sequence: u64,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> MessageId {
        self.next_sequence += 1;
        MessageId::new(self.next_sequence)
    }

    /// Append a locally authored entry in the pending state
    pub fn append_sent(
        &mut self,
        identity: &LocalIdentity,
        text: Option<String>,
        location: Option<Coordinates>,
        group_id: Option<GroupId>,
    ) -> &ChatLogEntry {
        let id = self.next_id();
        self.push(ChatLogEntry {
            id,
            direction: Direction::Sent,
            text,
            location,
            sender_name: identity.display_name.clone(),
            sender_id: Some(identity.peer_id.clone()),
            group_id,
            timestamp: Timestamp::now(),
            status: DeliveryStatus::Pending,
            out_of_group: false,
            unparsed: false,
        })
    }

    /// Append a decoded chat envelope from the peer
    pub fn append_received(&mut self, envelope: &Envelope, out_of_group: bool) -> &ChatLogEntry {
        let id = self.next_id();
        self.push(ChatLogEntry {
            id,
            direction: Direction::Received,
            text: envelope.text().map(str::to_string),
            location: envelope.location(),
            sender_name: envelope.sender_name.clone(),
            sender_id: Some(envelope.sender_id.clone()),
            group_id: envelope.group_id().cloned(),
            timestamp: Timestamp::now(),
            status: DeliveryStatus::Received,
            out_of_group,
            unparsed: false,
        })
    }

    /// Append a payload that arrived intact but did not decode
    pub fn append_unparsed(&mut self, payload: &[u8]) -> &ChatLogEntry {
        let id = self.next_id();
        self.push(ChatLogEntry {
            id,
            direction: Direction::Received,
            text: Some(String::from_utf8_lossy(payload).into_owned()),
            location: None,
            sender_name: "Unknown".to_string(),
            sender_id: None,
            group_id: None,
            timestamp: Timestamp::now(),
            status: DeliveryStatus::Received,
            out_of_group: false,
            unparsed: true,
        })
    }

    fn push(&mut self, entry: ChatLogEntry) -> &ChatLogEntry {
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    fn get_mut(&mut self, id: MessageId) -> Option<&mut ChatLogEntry> {
        // ids are assigned in order, so the entry index is sequence - 1
        let index = usize::try_from(id.sequence().checked_sub(1)?).ok()?;
        self.entries.get_mut(index).filter(|entry| entry.id == id)
    }

    pub fn get(&self, id: MessageId) -> Option<&ChatLogEntry> {
        let index = usize::try_from(id.sequence().checked_sub(1)?).ok()?;
        self.entries.get(index).filter(|entry| entry.id == id)
    }

    /// Mark a pending entry as delivered; returns the updated entry
    pub fn mark_sent(&mut self, id: MessageId) -> Option<ChatLogEntry> {
        let entry = self.get_mut(id)?;
        if !entry.is_pending() {
            return None;
        }
        entry.status = DeliveryStatus::Sent;
        Some(entry.clone())
    }

    /// Mark a pending entry as failed; returns the updated entry
    pub fn mark_failed<T: Into<String>>(
        &mut self,
        id: MessageId,
        reason: T,
    ) -> Option<ChatLogEntry> {
        let entry = self.get_mut(id)?;
        if !entry.is_pending() {
            return None;
        }
        entry.status = DeliveryStatus::Failed {
            reason: reason.into(),
        };
        Some(entry.clone())
    }

    /// Fail every pending entry, as happens when the connection drops mid-send
    pub fn fail_pending(&mut self, reason: &str) -> Vec<ChatLogEntry> {
        self.entries
            .iter_mut()
            .filter(|entry| entry.is_pending())
            .map(|entry| {
                entry.status = DeliveryStatus::Failed {
                    reason: reason.to_string(),
                };
                entry.clone()
            })
            .collect()
    }

    pub fn entries(&self) -> &[ChatLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
