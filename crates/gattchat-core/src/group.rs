//! Group Membership State Machine
//!
//! Tracks the local, non-authoritative view of the current group. State moves
//! between `NoGroup`, `Owner` and `Member` in response to local actions
//! (`create`, `join`, `invite`, `leave`) and decoded control envelopes from the
//! peer. Every inbound transition is idempotent: replaying an envelope leaves
//! the state exactly as applying it once did.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::envelope::{Envelope, EnvelopeBody};
use crate::errors::ProtocolError;
use crate::notice::SystemNotice;
use crate::types::{GroupId, LocalIdentity, PeerId};

/// Name given to groups created without one
pub const DEFAULT_GROUP_NAME: &str = "Group";

// ----------------------------------------------------------------------------
// Group State
// ----------------------------------------------------------------------------

/// Identity and known membership of a group
///
/// `members` holds remote peers only; the local peer is implicit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupState {
    pub group_id: GroupId,
    pub group_name: String,
    pub members: BTreeMap<PeerId, String>,
}

impl GroupState {
    pub fn new(group_id: GroupId, group_name: String) -> Self {
        Self {
            group_id,
            group_name,
            members: BTreeMap::new(),
        }
    }

    /// Record a member; returns `true` if the peer was not known before
    fn add_member(&mut self, peer_id: &PeerId, name: &str) -> bool {
        self.members.insert(peer_id.clone(), name.to_string()).is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GroupStatus {
    #[default]
    NoGroup,
    Owner(GroupState),
    Member(GroupState),
}

impl GroupStatus {
    pub fn state(&self) -> Option<&GroupState> {
        match self {
            GroupStatus::NoGroup => None,
            GroupStatus::Owner(state) | GroupStatus::Member(state) => Some(state),
        }
    }

    fn state_mut(&mut self) -> Option<&mut GroupState> {
        match self {
            GroupStatus::NoGroup => None,
            GroupStatus::Owner(state) | GroupStatus::Member(state) => Some(state),
        }
    }

    pub fn status_name(&self) -> &'static str {
        match self {
            GroupStatus::NoGroup => "NoGroup",
            GroupStatus::Owner(_) => "Owner",
            GroupStatus::Member(_) => "Member",
        }
    }
}

/// An inbound invite awaiting a local decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInvite {
    pub group_id: GroupId,
    pub group_name: String,
    pub from: PeerId,
    pub from_name: String,
}

// ----------------------------------------------------------------------------
// Transition Results
// ----------------------------------------------------------------------------

/// Side effects of a membership transition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupUpdate {
    /// Control envelope to send to the peer
    pub outbound: Option<Envelope>,
    pub notices: SmallVec<[SystemNotice; 2]>,
    /// Whether the group state itself changed
    pub changed: bool,
    /// Set when an inbound invite was recorded
    pub invite: Option<PendingInvite>,
}

impl GroupUpdate {
    fn unchanged() -> Self {
        Self::default()
    }

    fn changed(outbound: Option<Envelope>, notice: SystemNotice) -> Self {
        let mut notices = SmallVec::new();
        notices.push(notice);
        Self {
            outbound,
            notices,
            changed: true,
            invite: None,
        }
    }
}

/// How an inbound chat envelope relates to the current group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageScope {
    /// Plain point-to-point message
    Direct,
    InGroup,
    /// Shown, but flagged as belonging to a group the local peer is not in
    OutOfGroup(ProtocolError),
}

// ----------------------------------------------------------------------------
// Group Membership
// ----------------------------------------------------------------------------

pub struct GroupMembership {
    local: LocalIdentity,
    status: GroupStatus,
    pending_invites: Vec<PendingInvite>,
}

impl GroupMembership {
    pub fn new(local: LocalIdentity) -> Self {
        Self {
            local,
            status: GroupStatus::NoGroup,
            pending_invites: Vec::new(),
        }
    }

    pub fn status(&self) -> &GroupStatus {
        &self.status
    }

    pub fn current(&self) -> Option<&GroupState> {
        self.status.state()
    }

    pub fn current_group_id(&self) -> Option<&GroupId> {
        self.current().map(|state| &state.group_id)
    }

    pub fn pending_invites(&self) -> &[PendingInvite] {
        &self.pending_invites
    }

    fn envelope(&self, body: EnvelopeBody) -> Envelope {
        Envelope::new(
            self.local.peer_id.clone(),
            self.local.display_name.clone(),
            body,
        )
    }

    // ------------------------------------------------------------------------
    // Local actions
    // ------------------------------------------------------------------------

    /// Start a new group owned by the local peer, replacing any current one
    pub fn create(&mut self, group_name: Option<String>) -> GroupUpdate {
        let group_id = GroupId::generate();
        let group_name = group_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GROUP_NAME.to_string());

        info!("Creating group {} ({})", group_name, group_id);
        self.status = GroupStatus::Owner(GroupState::new(group_id.clone(), group_name.clone()));

        let outbound = self.envelope(EnvelopeBody::GroupCreate {
            group_id: group_id.clone(),
            group_name: group_name.clone(),
        });
        GroupUpdate::changed(
            Some(outbound),
            SystemNotice::GroupCreated {
                group_id,
                group_name,
            },
        )
    }

    /// Become a member of `group_id`, discarding any other membership
    pub fn join(&mut self, group_id: GroupId, group_name: Option<String>) -> GroupUpdate {
        if self.current_group_id() == Some(&group_id) {
            debug!("Already in group {}", group_id);
            return GroupUpdate::unchanged();
        }

        let group_name = group_name.unwrap_or_else(|| group_id.to_string());
        info!("Joining group {} ({})", group_name, group_id);
        self.pending_invites.retain(|invite| invite.group_id != group_id);
        self.status = GroupStatus::Member(GroupState::new(group_id.clone(), group_name.clone()));

        let outbound = self.envelope(EnvelopeBody::GroupJoin {
            group_id: group_id.clone(),
        });
        GroupUpdate::changed(
            Some(outbound),
            SystemNotice::JoinedGroup {
                group_id,
                group_name,
            },
        )
    }

    /// Announce the current group to the peer as an invitation
    pub fn invite(&self) -> Result<GroupUpdate, ProtocolError> {
        let state = self.current().ok_or(ProtocolError::NotInGroup)?;
        let outbound = self.envelope(EnvelopeBody::GroupInvite {
            group_id: state.group_id.clone(),
            group_name: state.group_name.clone(),
        });

        let mut update = GroupUpdate::unchanged();
        update.outbound = Some(outbound);
        update.notices.push(SystemNotice::InviteSent {
            group_id: state.group_id.clone(),
        });
        Ok(update)
    }

    pub fn accept_invite(&mut self, group_id: &GroupId) -> Result<GroupUpdate, ProtocolError> {
        let invite = self.take_invite(group_id)?;
        let mut update = self.join(invite.group_id.clone(), Some(invite.group_name));
        if let Some(state) = self.status.state_mut() {
            let known = state.group_id == invite.group_id;
            if known && state.add_member(&invite.from, &invite.from_name) {
                update.changed = true;
            }
        }
        Ok(update)
    }

    pub fn decline_invite(&mut self, group_id: &GroupId) -> Result<GroupUpdate, ProtocolError> {
        let invite = self.take_invite(group_id)?;
        let mut update = GroupUpdate::unchanged();
        update.notices.push(SystemNotice::InviteDeclined {
            group_id: invite.group_id,
        });
        Ok(update)
    }

    fn take_invite(&mut self, group_id: &GroupId) -> Result<PendingInvite, ProtocolError> {
        let index = self
            .pending_invites
            .iter()
            .position(|invite| &invite.group_id == group_id)
            .ok_or_else(|| ProtocolError::UnknownInvite {
                group_id: group_id.to_string(),
            })?;
        Ok(self.pending_invites.remove(index))
    }

    /// Drop the current group, whatever it is
    pub fn leave(&mut self) -> GroupUpdate {
        match core::mem::take(&mut self.status) {
            GroupStatus::NoGroup => GroupUpdate::unchanged(),
            GroupStatus::Owner(state) | GroupStatus::Member(state) => {
                info!("Leaving group {}", state.group_id);
                GroupUpdate::changed(
                    None,
                    SystemNotice::LeftGroup {
                        group_id: state.group_id,
                    },
                )
            }
        }
    }

    /// Clear all group state; used when the connection goes away
    pub fn reset(&mut self) -> bool {
        self.pending_invites.clear();
        let was_in_group = !matches!(self.status, GroupStatus::NoGroup);
        self.status = GroupStatus::NoGroup;
        was_in_group
    }

    // ------------------------------------------------------------------------
    // Inbound envelopes
    // ------------------------------------------------------------------------

    /// Apply a decoded control envelope from the peer
    pub fn handle_control(&mut self, envelope: &Envelope) -> GroupUpdate {
        if envelope.sender_id == self.local.peer_id {
            debug!("Ignoring echo of our own {:?}", envelope.kind());
            return GroupUpdate::unchanged();
        }

        match &envelope.body {
            EnvelopeBody::GroupCreate {
                group_id,
                group_name,
            } => self.on_group_create(envelope, group_id, group_name),
            EnvelopeBody::GroupJoin { group_id } => self.on_group_join(envelope, group_id),
            EnvelopeBody::GroupInvite {
                group_id,
                group_name,
            } => self.on_group_invite(envelope, group_id, group_name),
            EnvelopeBody::PlainMessage { .. } | EnvelopeBody::GroupMessage { .. } => {
                GroupUpdate::unchanged()
            }
        }
    }

    fn on_group_create(
        &mut self,
        envelope: &Envelope,
        group_id: &GroupId,
        group_name: &str,
    ) -> GroupUpdate {
        if matches!(self.status, GroupStatus::NoGroup) {
            let mut state = GroupState::new(group_id.clone(), group_name.to_string());
            state.add_member(&envelope.sender_id, &envelope.sender_name);
            info!(
                "Adopted group {} announced by {}",
                group_id, envelope.sender_name
            );
            self.status = GroupStatus::Member(state);
            return GroupUpdate::changed(
                None,
                SystemNotice::GroupAdopted {
                    group_id: group_id.clone(),
                    group_name: group_name.to_string(),
                    creator: envelope.sender_name.clone(),
                },
            );
        }

        match self.status.state_mut() {
            None => GroupUpdate::unchanged(),
            Some(state) if &state.group_id == group_id => {
                let added = state.add_member(&envelope.sender_id, &envelope.sender_name);
                GroupUpdate {
                    changed: added,
                    ..GroupUpdate::unchanged()
                }
            }
            Some(state) => {
                warn!(
                    "{}",
                    ProtocolError::GroupMismatch {
                        received: group_id.to_string(),
                        local: state.group_id.to_string(),
                    }
                );
                GroupUpdate::unchanged()
            }
        }
    }

    fn on_group_join(&mut self, envelope: &Envelope, group_id: &GroupId) -> GroupUpdate {
        match self.status.state_mut() {
            Some(state) if &state.group_id == group_id => {
                if state.add_member(&envelope.sender_id, &envelope.sender_name) {
                    info!("{} joined group {}", envelope.sender_name, group_id);
                    GroupUpdate::changed(
                        None,
                        SystemNotice::MemberJoined {
                            group_id: group_id.clone(),
                            peer_name: envelope.sender_name.clone(),
                        },
                    )
                } else {
                    GroupUpdate::unchanged()
                }
            }
            Some(state) => {
                warn!(
                    "{}",
                    ProtocolError::GroupMismatch {
                        received: group_id.to_string(),
                        local: state.group_id.to_string(),
                    }
                );
                GroupUpdate::unchanged()
            }
            None => {
                debug!("Ignoring join for {} while in no group", group_id);
                GroupUpdate::unchanged()
            }
        }
    }

    fn on_group_invite(
        &mut self,
        envelope: &Envelope,
        group_id: &GroupId,
        group_name: &str,
    ) -> GroupUpdate {
        if let Some(state) = self.status.state_mut() {
            if &state.group_id == group_id {
                let added = state.add_member(&envelope.sender_id, &envelope.sender_name);
                return GroupUpdate {
                    changed: added,
                    ..GroupUpdate::unchanged()
                };
            }
        }

        if self
            .pending_invites
            .iter()
            .any(|invite| &invite.group_id == group_id)
        {
            return GroupUpdate::unchanged();
        }

        let invite = PendingInvite {
            group_id: group_id.clone(),
            group_name: group_name.to_string(),
            from: envelope.sender_id.clone(),
            from_name: envelope.sender_name.clone(),
        };
        self.pending_invites.push(invite.clone());

        let mut update = GroupUpdate::unchanged();
        update.notices.push(SystemNotice::InviteReceived {
            group_id: group_id.clone(),
            group_name: group_name.to_string(),
            from: envelope.sender_name.clone(),
        });
        update.invite = Some(invite);
        update
    }

    /// Classify an inbound chat envelope against the current group
    pub fn classify(&self, envelope: &Envelope) -> MessageScope {
        let Some(group_id) = envelope.group_id() else {
            return MessageScope::Direct;
        };

        match self.current_group_id() {
            Some(local) if local == group_id => MessageScope::InGroup,
            local => MessageScope::OutOfGroup(ProtocolError::GroupMismatch {
                received: group_id.to_string(),
                local: local
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "none".to_string()),
            }),
        }
    }

    /// Group a locally authored message should target
    ///
    /// An explicit `group_id` must match the current group.
    pub fn resolve_target(
        &self,
        requested: Option<&GroupId>,
    ) -> Result<Option<GroupId>, ProtocolError> {
        match (requested, self.current_group_id()) {
            (None, current) => Ok(current.cloned()),
            (Some(requested), Some(current)) if requested == current => Ok(Some(current.clone())),
            (Some(requested), current) => Err(ProtocolError::GroupMismatch {
                received: requested.to_string(),
                local: current
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "none".to_string()),
            }),
        }
    }
}
