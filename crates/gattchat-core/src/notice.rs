//! User-visible system notices

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::types::GroupId;

/// Status line surfaced to the front end alongside chat entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemNotice {
    ScanStarted,
    ScanStopped,
    DevicesFound {
        count: usize,
    },
    Connected {
        device: String,
    },
    ConnectionFailed {
        device: String,
        reason: String,
    },
    Disconnected {
        reason: String,
    },
    GroupCreated {
        group_id: GroupId,
        group_name: String,
    },
    JoinedGroup {
        group_id: GroupId,
        group_name: String,
    },
    /// A peer's group announcement was adopted while in no group
    GroupAdopted {
        group_id: GroupId,
        group_name: String,
        creator: String,
    },
    MemberJoined {
        group_id: GroupId,
        peer_name: String,
    },
    InviteReceived {
        group_id: GroupId,
        group_name: String,
        from: String,
    },
    InviteSent {
        group_id: GroupId,
    },
    InviteDeclined {
        group_id: GroupId,
    },
    LeftGroup {
        group_id: GroupId,
    },
    LocationUnavailable,
    SendFailed {
        reason: String,
    },
    ControlSendFailed {
        kind: String,
        reason: String,
    },
    CorruptFrame {
        reason: String,
    },
}

impl fmt::Display for SystemNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemNotice::ScanStarted => write!(f, "Scanning for devices..."),
            SystemNotice::ScanStopped => write!(f, "Scan stopped"),
            SystemNotice::DevicesFound { count } => write!(f, "Found {} device(s)", count),
            SystemNotice::Connected { device } => write!(f, "Connected to {}", device),
            SystemNotice::ConnectionFailed { device, reason } => {
                write!(f, "Connection to {} failed: {}", device, reason)
            }
            SystemNotice::Disconnected { reason } => write!(f, "Disconnected: {}", reason),
            SystemNotice::GroupCreated {
                group_id,
                group_name,
            } => write!(f, "Group created: {} ({})", group_name, group_id),
            SystemNotice::JoinedGroup {
                group_id,
                group_name,
            } => write!(f, "Joined group {} ({})", group_name, group_id),
            SystemNotice::GroupAdopted {
                group_id,
                group_name,
                creator,
            } => write!(
                f,
                "{} created group {} ({}); you are now a member",
                creator, group_name, group_id
            ),
            SystemNotice::MemberJoined {
                group_id,
                peer_name,
            } => write!(f, "{} joined group {}", peer_name, group_id),
            SystemNotice::InviteReceived {
                group_id,
                group_name,
                from,
            } => write!(
                f,
                "{} invited you to group {} ({}); /accept or /decline",
                from, group_name, group_id
            ),
            SystemNotice::InviteSent { group_id } => {
                write!(f, "Invite sent for group {}", group_id)
            }
            SystemNotice::InviteDeclined { group_id } => {
                write!(f, "Declined invite to group {}", group_id)
            }
            SystemNotice::LeftGroup { group_id } => write!(f, "Left group {}", group_id),
            SystemNotice::LocationUnavailable => {
                write!(f, "Location unavailable; sending text only")
            }
            SystemNotice::SendFailed { reason } => write!(f, "Send failed: {}", reason),
            SystemNotice::ControlSendFailed { kind, reason } => {
                write!(f, "Failed to send {}: {}", kind, reason)
            }
            SystemNotice::CorruptFrame { reason } => {
                write!(f, "Dropped corrupt incoming message: {}", reason)
            }
        }
    }
}
