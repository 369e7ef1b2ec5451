//! gattchat core protocol
//!
//! Point-to-point chat over a small-MTU, connection-oriented byte link such as
//! a BLE GATT characteristic pair. This crate holds everything that does not
//! depend on a radio: the JSON envelope codec, length/CRC framing and
//! chunking, per-connection reassembly, the transport session lifecycle,
//! group membership, and the node task that ties them together.
//!
//! Concrete transports implement [`Transport`] and [`TransportLink`]; front
//! ends drive a node through [`NodeHandle`] and consume [`AppEvent`]s.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod chat_log;
pub mod config;
pub mod connection_state;
pub mod dispatcher;
pub mod envelope;
pub mod errors;
pub mod fragmentation;
pub mod group;
pub mod node;
pub mod notice;
pub mod reassembly;
pub mod receiver;
pub mod session;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use chat_log::{ChatLog, ChatLogEntry, DeliveryStatus, Direction};
pub use config::{ChannelConfig, GattchatConfig, IdentityConfig, ProtocolConfig, SessionConfig};
pub use connection_state::{SessionEvent, SessionState};
pub use dispatcher::{
    DeliveryReport, DispatchWorker, OutboundDispatcher, OutboundMessage, OutboundTicket,
};
pub use envelope::{Envelope, EnvelopeBody, EnvelopeKind};
pub use errors::{
    ConnectError, DecodeError, FragmentationError, GattchatError, GattchatResult, ProtocolError,
    ReassemblyError, Result, StateTransitionError, TransportError, WriteError,
};
pub use fragmentation::{
    effective_chunk_size, Fragmenter, FrameHeader, OutboundFrame, ATT_OVERHEAD,
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE, FRAME_HEADER_LEN,
};
pub use group::{GroupMembership, GroupState, GroupStatus, GroupUpdate, MessageScope, PendingInvite};
pub use node::{AppEvent, ChatNode, Command, NodeHandle};
pub use notice::SystemNotice;
pub use reassembly::{Reassembler, ReassemblyOutcome, DEFAULT_REASSEMBLY_TIMEOUT};
pub use session::{ConnectionHandle, TransportSession};
pub use transport::{Transport, TransportLink};
pub use types::{
    ConnectionId, Coordinates, DeviceId, DiscoveredDevice, GroupId, LocalIdentity, MessageId,
    PeerId, Timestamp,
};
