//! Chat node runtime
//!
//! The node task is the single dispatch point of the system. It owns the
//! [`TransportSession`], [`GroupMembership`], [`ChatLog`] and
//! [`OutboundDispatcher`]; nothing else mutates them. Front ends talk to it
//! through [`Command`]s and observe it through [`AppEvent`]s, while the scan
//! task, the receive task and the dispatch worker report back over internal
//! channels.
//!
//! ```text
//!  front end ──Command──▶ ChatNode ──AppEvent──▶ front end
//!                          ▲   │
//!     scan task ──device───┤   ├──OutboundMessage──▶ DispatchWorker ──▶ link
//!  receive task ──frame────┤   │                          │
//! DispatchWorker ──report──┘◀──────────────────────────────┘
//! ```

use std::time::Duration;

use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::chat_log::{ChatLog, ChatLogEntry, DeliveryStatus};
use crate::config::GattchatConfig;
use crate::connection_state::SessionState;
use crate::dispatcher::{
    DeliveryReport, DispatchWorker, OutboundDispatcher, OutboundTicket, Submission,
};
use crate::errors::{GattchatError, ProtocolError, Result, WriteError};
use crate::group::{GroupMembership, GroupState, GroupUpdate, MessageScope, PendingInvite};
use crate::notice::SystemNotice;
use crate::reassembly::Reassembler;
use crate::receiver::{InboundEvent, ReceiveTask, ReceivedFrame};
use crate::session::TransportSession;
use crate::transport::Transport;
use crate::types::{Coordinates, DeviceId, DiscoveredDevice, GroupId, LocalIdentity};

/// Lower bound on how often partial frames are checked for staleness
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

// ----------------------------------------------------------------------------
// Commands and Events
// ----------------------------------------------------------------------------

/// Requests from a front end to the node
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartScan,
    StopScan,
    Connect {
        device_id: DeviceId,
    },
    Disconnect,
    SendText {
        text: String,
        group_id: Option<GroupId>,
    },
    SendLocation {
        text: Option<String>,
        coordinates: Option<Coordinates>,
        group_id: Option<GroupId>,
    },
    CreateGroup {
        name: Option<String>,
    },
    JoinGroup {
        group_id: GroupId,
        group_name: Option<String>,
    },
    InviteToGroup,
    AcceptInvite {
        group_id: GroupId,
    },
    DeclineInvite {
        group_id: GroupId,
    },
    LeaveGroup,
    Shutdown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::StartScan => "scan",
            Command::StopScan => "stop-scan",
            Command::Connect { .. } => "connect",
            Command::Disconnect => "disconnect",
            Command::SendText { .. } => "send",
            Command::SendLocation { .. } => "send-location",
            Command::CreateGroup { .. } => "create-group",
            Command::JoinGroup { .. } => "join-group",
            Command::InviteToGroup => "invite",
            Command::AcceptInvite { .. } => "accept-invite",
            Command::DeclineInvite { .. } => "decline-invite",
            Command::LeaveGroup => "leave-group",
            Command::Shutdown => "shutdown",
        }
    }
}

/// Notifications from the node to a front end
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    ChatLogAppended(ChatLogEntry),
    /// Delivery status of an existing entry changed
    ChatLogUpdated(ChatLogEntry),
    GroupStateChanged(Option<GroupState>),
    ConnectionStateChanged(SessionState),
    DeviceDiscovered(DiscoveredDevice),
    InviteReceived(PendingInvite),
    Notice(SystemNotice),
    /// A command was rejected without changing any state
    CommandFailed {
        command: &'static str,
        reason: String,
    },
}

// ----------------------------------------------------------------------------
// Node Handle
// ----------------------------------------------------------------------------

/// Front-end side of a running node
pub struct NodeHandle {
    commands: mpsc::Sender<Command>,
    events: Option<mpsc::Receiver<AppEvent>>,
    identity: LocalIdentity,
    task: Option<JoinHandle<()>>,
}

impl NodeHandle {
    /// Take the event receiver; available once
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<AppEvent>> {
        self.events.take()
    }

    pub fn command_sender(&self) -> mpsc::Sender<Command> {
        self.commands.clone()
    }

    pub fn local_identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub async fn send_command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| GattchatError::channel_error("node has stopped"))
    }

    pub async fn request_scan(&self) -> Result<()> {
        self.send_command(Command::StartScan).await
    }

    pub async fn request_stop_scan(&self) -> Result<()> {
        self.send_command(Command::StopScan).await
    }

    pub async fn request_connect(&self, device_id: DeviceId) -> Result<()> {
        self.send_command(Command::Connect { device_id }).await
    }

    pub async fn request_disconnect(&self) -> Result<()> {
        self.send_command(Command::Disconnect).await
    }

    /// Send a message, geotagged when `coordinates` are given
    pub async fn request_send(
        &self,
        text: String,
        coordinates: Option<Coordinates>,
        group_id: Option<GroupId>,
    ) -> Result<()> {
        let command = match coordinates {
            Some(coordinates) => Command::SendLocation {
                text: Some(text),
                coordinates: Some(coordinates),
                group_id,
            },
            None => Command::SendText { text, group_id },
        };
        self.send_command(command).await
    }

    /// Send the current location, or just `text` when no fix is available
    pub async fn request_send_location(
        &self,
        text: Option<String>,
        coordinates: Option<Coordinates>,
    ) -> Result<()> {
        self.send_command(Command::SendLocation {
            text,
            coordinates,
            group_id: None,
        })
        .await
    }

    pub async fn request_create_group(&self, name: Option<String>) -> Result<()> {
        self.send_command(Command::CreateGroup { name }).await
    }

    pub async fn request_join_group(
        &self,
        group_id: GroupId,
        group_name: Option<String>,
    ) -> Result<()> {
        self.send_command(Command::JoinGroup {
            group_id,
            group_name,
        })
        .await
    }

    pub async fn request_invite(&self) -> Result<()> {
        self.send_command(Command::InviteToGroup).await
    }

    pub async fn request_accept_invite(&self, group_id: GroupId) -> Result<()> {
        self.send_command(Command::AcceptInvite { group_id }).await
    }

    pub async fn request_decline_invite(&self, group_id: GroupId) -> Result<()> {
        self.send_command(Command::DeclineInvite { group_id }).await
    }

    pub async fn request_leave_group(&self) -> Result<()> {
        self.send_command(Command::LeaveGroup).await
    }

    /// Stop the node, disconnecting first, and wait for it to finish
    pub async fn shutdown(mut self) -> Result<()> {
        // the node may already be gone; joining below covers both cases
        let _ = self.commands.send(Command::Shutdown).await;
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| GattchatError::channel_error(format!("node task failed: {}", e)))?;
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Chat Node
// ----------------------------------------------------------------------------

pub struct ChatNode<T: Transport> {
    config: GattchatConfig,
    session: TransportSession<T>,
    groups: GroupMembership,
    log: ChatLog,
    dispatcher: OutboundDispatcher,
    commands: mpsc::Receiver<Command>,
    app_events: mpsc::Sender<AppEvent>,
    device_tx: mpsc::Sender<DiscoveredDevice>,
    device_rx: mpsc::Receiver<DiscoveredDevice>,
    frame_tx: mpsc::Sender<ReceivedFrame>,
    frame_rx: mpsc::Receiver<ReceivedFrame>,
    report_tx: mpsc::Sender<DeliveryReport>,
    report_rx: mpsc::Receiver<DeliveryReport>,
}

impl<T: Transport> ChatNode<T> {
    /// Validate the configuration and start the node task
    pub fn spawn(config: GattchatConfig, transport: T) -> Result<NodeHandle> {
        config.validate()?;

        let identity = config.identity.resolve();
        let channels = config.channels.clone();
        let (command_tx, commands) = mpsc::channel(channels.command_buffer_size);
        let (app_events, events) = mpsc::channel(channels.app_event_buffer_size);
        let (device_tx, device_rx) = mpsc::channel(channels.internal_buffer_size);
        let (frame_tx, frame_rx) = mpsc::channel(channels.internal_buffer_size);
        let (report_tx, report_rx) = mpsc::channel(channels.internal_buffer_size);

        let node = ChatNode {
            session: TransportSession::new(transport, config.session.clone(), &config.protocol),
            groups: GroupMembership::new(identity.clone()),
            log: ChatLog::new(),
            dispatcher: OutboundDispatcher::new(identity.clone(), config.protocol.max_message_size),
            config,
            commands,
            app_events,
            device_tx,
            device_rx,
            frame_tx,
            frame_rx,
            report_tx,
            report_rx,
        };

        info!(
            "Starting chat node as {} ({})",
            identity.display_name, identity.peer_id
        );
        let task = tokio::spawn(node.run());

        Ok(NodeHandle {
            commands: command_tx,
            events: Some(events),
            identity,
            task: Some(task),
        })
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(device) = self.device_rx.recv() => self.on_device(device).await,
                Some(frame) = self.frame_rx.recv() => self.on_frame(frame).await,
                Some(report) = self.report_rx.recv() => self.on_delivery(report).await,
            }
            self.publish_transitions().await;
        }

        info!("Chat node shutting down");
        if let Err(e) = self.session.stop_scan().await {
            warn!("Failed to stop scan during shutdown: {}", e);
        }
        self.teardown("shutdown").await;
        self.publish_transitions().await;
    }

    async fn emit(&self, event: AppEvent) {
        if self.app_events.send(event).await.is_err() {
            debug!("No front end listening for events");
        }
    }

    async fn notice(&self, notice: SystemNotice) {
        info!("{}", notice);
        self.emit(AppEvent::Notice(notice)).await;
    }

    async fn command_failed(&self, command: &'static str, reason: String) {
        warn!("Command {} failed: {}", command, reason);
        self.emit(AppEvent::CommandFailed { command, reason }).await;
    }

    async fn publish_transitions(&mut self) {
        for state in self.session.take_transitions() {
            self.emit(AppEvent::ConnectionStateChanged(state)).await;
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        let name = command.name();
        debug!("Handling command {}", name);

        match command {
            Command::StartScan => self.start_scan().await,
            Command::StopScan => match self.session.stop_scan().await {
                Ok(()) => {
                    self.notice(SystemNotice::ScanStopped).await;
                    let count = self.session.discovered_devices().len();
                    self.notice(SystemNotice::DevicesFound { count }).await;
                }
                Err(e) => self.command_failed(name, e.to_string()).await,
            },
            Command::Connect { device_id } => self.connect(device_id).await,
            Command::Disconnect => self.teardown("disconnect requested").await,
            Command::SendText { text, group_id } => {
                let result = self
                    .dispatcher
                    .send_text(&mut self.log, &self.groups, text, group_id);
                self.after_submit(name, result).await;
            }
            Command::SendLocation {
                text,
                coordinates,
                group_id,
            } => {
                let result = self.dispatcher.send_location(
                    &mut self.log,
                    &self.groups,
                    text,
                    coordinates,
                    group_id,
                );
                self.after_submit(name, result).await;
            }
            Command::CreateGroup { name: group_name } => {
                let update = self.groups.create(group_name);
                self.apply_group_update(update).await;
            }
            Command::JoinGroup {
                group_id,
                group_name,
            } => {
                let update = self.groups.join(group_id, group_name);
                self.apply_group_update(update).await;
            }
            Command::InviteToGroup => {
                let result = self.groups.invite();
                self.apply_group_result(name, result).await;
            }
            Command::AcceptInvite { group_id } => {
                let result = self.groups.accept_invite(&group_id);
                self.apply_group_result(name, result).await;
            }
            Command::DeclineInvite { group_id } => {
                let result = self.groups.decline_invite(&group_id);
                self.apply_group_result(name, result).await;
            }
            Command::LeaveGroup => {
                let update = self.groups.leave();
                self.apply_group_update(update).await;
            }
            Command::Shutdown => {}
        }
    }

    async fn start_scan(&mut self) {
        let mut devices = match self.session.scan().await {
            Ok(devices) => devices,
            Err(e) => return self.command_failed("scan", e.to_string()).await,
        };

        let device_tx = self.device_tx.clone();
        tokio::spawn(async move {
            while let Some(device) = devices.next().await {
                if device_tx.send(device).await.is_err() {
                    break;
                }
            }
            debug!("Scan task finished");
        });
        self.notice(SystemNotice::ScanStarted).await;
    }

    async fn connect(&mut self, device_id: DeviceId) {
        let device_label = self
            .session
            .find_device(&device_id)
            .map(ToString::to_string)
            .unwrap_or_else(|| device_id.to_string());

        let mut handle = match self.session.connect(&device_id).await {
            Ok(handle) => handle,
            Err(e) => {
                self.publish_transitions().await;
                return self
                    .notice(SystemNotice::ConnectionFailed {
                        device: device_label,
                        reason: e.to_string(),
                    })
                    .await;
            }
        };

        self.session.negotiate_chunk_size(&mut handle).await;
        let notifications = match self.session.subscribe(&handle).await {
            Ok(stream) => stream,
            Err(e) => {
                self.dispatcher.detach();
                self.publish_transitions().await;
                return self
                    .notice(SystemNotice::ConnectionFailed {
                        device: device_label,
                        reason: e.to_string(),
                    })
                    .await;
            }
        };

        let protocol = &self.config.protocol;
        let reassembler = Reassembler::new(protocol.max_message_size, protocol.reassembly_timeout);
        let sweep_interval = (protocol.reassembly_timeout / 2).max(MIN_SWEEP_INTERVAL);
        let receiver = ReceiveTask::new(
            handle.id(),
            reassembler,
            self.frame_tx.clone(),
            handle.cancellation().child_token(),
            sweep_interval,
        );
        tokio::spawn(receiver.run(notifications));

        let (queue_tx, queue_rx) = mpsc::channel(self.config.channels.outbound_buffer_size);
        let worker = DispatchWorker::new(handle.clone(), queue_rx, self.report_tx.clone());
        tokio::spawn(worker.run());
        self.dispatcher.attach(handle.id(), handle.chunk_size(), queue_tx);

        self.publish_transitions().await;
        self.notice(SystemNotice::Connected {
            device: handle.device().to_string(),
        })
        .await;
    }

    /// Disconnect and release everything scoped to the connection
    async fn teardown(&mut self, reason: &str) {
        let closed = self.session.disconnect(reason).await;
        self.dispatcher.detach();

        let cancelled = WriteError::Cancelled.to_string();
        for entry in self.log.fail_pending(&cancelled) {
            self.emit(AppEvent::ChatLogUpdated(entry)).await;
        }
        if self.groups.reset() {
            self.emit(AppEvent::GroupStateChanged(None)).await;
        }
        if closed.is_some() {
            self.notice(SystemNotice::Disconnected {
                reason: reason.to_string(),
            })
            .await;
        }
    }

    async fn after_submit(
        &mut self,
        command: &'static str,
        result: core::result::Result<Submission, ProtocolError>,
    ) {
        let submission = match result {
            Ok(submission) => submission,
            Err(e) => return self.command_failed(command, e.to_string()).await,
        };

        if submission.location_missing {
            self.notice(SystemNotice::LocationUnavailable).await;
        }
        let failure = match &submission.entry.status {
            DeliveryStatus::Failed { reason } => Some(reason.clone()),
            _ => None,
        };
        self.emit(AppEvent::ChatLogAppended(submission.entry)).await;
        if let Some(reason) = failure {
            self.notice(SystemNotice::SendFailed { reason }).await;
        }
    }

    async fn apply_group_result(
        &mut self,
        command: &'static str,
        result: core::result::Result<GroupUpdate, ProtocolError>,
    ) {
        match result {
            Ok(update) => self.apply_group_update(update).await,
            Err(e) => self.command_failed(command, e.to_string()).await,
        }
    }

    async fn apply_group_update(&mut self, update: GroupUpdate) {
        let GroupUpdate {
            outbound,
            notices,
            changed,
            invite,
        } = update;

        if changed {
            let state = self.groups.current().cloned();
            self.emit(AppEvent::GroupStateChanged(state)).await;
        }
        for notice in notices {
            self.notice(notice).await;
        }
        if let Some(invite) = invite {
            self.emit(AppEvent::InviteReceived(invite)).await;
        }
        if let Some(envelope) = outbound {
            if let Err(reason) = self.dispatcher.send_control(&envelope) {
                self.notice(SystemNotice::ControlSendFailed {
                    kind: envelope.kind().as_str().to_string(),
                    reason,
                })
                .await;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Internal events
    // ------------------------------------------------------------------------

    async fn on_device(&mut self, device: DiscoveredDevice) {
        if self.session.record_device(device.clone()) {
            self.emit(AppEvent::DeviceDiscovered(device)).await;
        }
    }

    async fn on_frame(&mut self, frame: ReceivedFrame) {
        if !self.session.is_current(frame.connection) {
            debug!("Dropping event from stale {}", frame.connection);
            return;
        }

        match frame.event {
            InboundEvent::Envelope(envelope) if envelope.kind().is_control() => {
                let update = self.groups.handle_control(&envelope);
                self.apply_group_update(update).await;
            }
            InboundEvent::Envelope(envelope) => {
                let out_of_group = match self.groups.classify(&envelope) {
                    MessageScope::Direct | MessageScope::InGroup => false,
                    MessageScope::OutOfGroup(mismatch) => {
                        warn!("Out-of-group message from {}: {}", envelope.sender_name, mismatch);
                        true
                    }
                };
                let entry = self.log.append_received(&envelope, out_of_group).clone();
                self.emit(AppEvent::ChatLogAppended(entry)).await;
            }
            InboundEvent::Unparsed { payload, error } => {
                warn!("Logging undecodable message: {}", error);
                let entry = self.log.append_unparsed(&payload).clone();
                self.emit(AppEvent::ChatLogAppended(entry)).await;
            }
            InboundEvent::Corrupt(error) => {
                self.notice(SystemNotice::CorruptFrame {
                    reason: error.to_string(),
                })
                .await;
            }
            InboundEvent::Closed => self.teardown("link closed").await,
        }
    }

    async fn on_delivery(&mut self, report: DeliveryReport) {
        if !self.session.is_current(report.connection) {
            debug!("Dropping delivery report from stale {}", report.connection);
            return;
        }

        let link_lost = match &report.result {
            Err(e) => e.is_link_loss().then(|| e.to_string()),
            Ok(_) => None,
        };

        match (report.ticket, report.result) {
            (OutboundTicket::Chat(id), Ok(chunks)) => {
                debug!("Message {} delivered in {} chunk(s)", id, chunks);
                if let Some(entry) = self.log.mark_sent(id) {
                    self.emit(AppEvent::ChatLogUpdated(entry)).await;
                }
            }
            (OutboundTicket::Chat(id), Err(e)) => {
                error!("Message {} failed: {}", id, e);
                if let Some(entry) = self.log.mark_failed(id, e.to_string()) {
                    self.emit(AppEvent::ChatLogUpdated(entry)).await;
                }
                self.notice(SystemNotice::SendFailed {
                    reason: e.to_string(),
                })
                .await;
            }
            (OutboundTicket::Control(kind), Ok(_)) => {
                debug!("Control envelope {} delivered", kind.as_str());
            }
            (OutboundTicket::Control(kind), Err(e)) => {
                self.notice(SystemNotice::ControlSendFailed {
                    kind: kind.as_str().to_string(),
                    reason: e.to_string(),
                })
                .await;
            }
        }

        if let Some(reason) = link_lost {
            self.teardown(&reason).await;
        }
    }
}
