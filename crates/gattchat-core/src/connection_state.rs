//! Transport session state machine
//!
//! `Idle → Scanning → DeviceFound → Connecting → Connected → Subscribing → Ready`,
//! with every state able to fall to `Disconnected`. Transitions consume the
//! current state and either yield the next one or reject the event, so illegal
//! sequences (writing before subscribing, connecting without a scan) are caught
//! in one place.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::errors::StateTransitionError;

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Lifecycle state of the single transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Scanning,
    /// At least one device has been discovered in the current scan
    DeviceFound,
    Connecting,
    /// Link is up but notifications are not yet subscribed
    Connected,
    Subscribing,
    /// The only state in which sends and receives are accepted
    Ready,
    /// Terminal until a new scan starts
    Disconnected,
}

impl SessionState {
    pub fn state_name(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Scanning => "Scanning",
            SessionState::DeviceFound => "DeviceFound",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Subscribing => "Subscribing",
            SessionState::Ready => "Ready",
            SessionState::Disconnected => "Disconnected",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready)
    }

    /// Whether a link to a device currently exists
    pub fn has_link(&self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Subscribing | SessionState::Ready
        )
    }

    /// Process an event, consuming the current state
    pub fn transition(self, event: SessionEvent) -> Result<SessionState, StateTransitionError> {
        use SessionEvent as E;
        use SessionState as S;

        let next = match (self, &event) {
            (_, E::Disconnect { .. }) => S::Disconnected,

            (S::Idle | S::Disconnected | S::Scanning | S::DeviceFound, E::StartScan) => S::Scanning,
            (S::Scanning | S::DeviceFound, E::DeviceFound) => S::DeviceFound,
            (S::Scanning, E::StopScan) => S::Idle,
            (S::DeviceFound, E::StopScan) => S::DeviceFound,

            (S::DeviceFound, E::Connect) => S::Connecting,
            (S::Connecting, E::LinkEstablished) => S::Connected,
            (S::Connecting, E::ConnectFailed { .. }) => S::Disconnected,

            (S::Connected, E::Subscribe) => S::Subscribing,
            (S::Subscribing, E::Subscribed) => S::Ready,

            (from, event) => {
                return Err(StateTransitionError {
                    from_state: from.state_name().to_string(),
                    event: event.event_name().to_string(),
                })
            }
        };

        Ok(next)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}

// ----------------------------------------------------------------------------
// Session Events
// ----------------------------------------------------------------------------

/// Events that drive the session state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StartScan,
    DeviceFound,
    StopScan,
    Connect,
    LinkEstablished,
    ConnectFailed { reason: String },
    Subscribe,
    Subscribed,
    /// Explicit request, link loss or unrecoverable I/O failure
    Disconnect { reason: String },
}

impl SessionEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            SessionEvent::StartScan => "StartScan",
            SessionEvent::DeviceFound => "DeviceFound",
            SessionEvent::StopScan => "StopScan",
            SessionEvent::Connect => "Connect",
            SessionEvent::LinkEstablished => "LinkEstablished",
            SessionEvent::ConnectFailed { .. } => "ConnectFailed",
            SessionEvent::Subscribe => "Subscribe",
            SessionEvent::Subscribed => "Subscribed",
            SessionEvent::Disconnect { .. } => "Disconnect",
        }
    }
}
