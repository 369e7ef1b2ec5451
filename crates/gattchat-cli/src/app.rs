//! Interactive chat session
//!
//! [`ChatApp`] is a thin front end over a running [`NodeHandle`]: it turns
//! input lines into node commands and prints the node's events. All protocol
//! state lives in the node; the app only keeps what it needs for display.

use gattchat_ble::BleTransport;
use gattchat_core::{
    AppEvent, ChatLogEntry, ChatNode, Command, DeliveryStatus, DeviceId, Direction,
    DiscoveredDevice, GattchatError, GroupState, NodeHandle, SessionState,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::commands::{DeviceSelector, InputCommand, HELP};
use crate::config::{AppConfig, CliConfig};
use crate::error::Result;

// ----------------------------------------------------------------------------
// Chat Application
// ----------------------------------------------------------------------------

pub struct ChatApp {
    node: NodeHandle,
    events: mpsc::Receiver<AppEvent>,
    config: CliConfig,
    devices: Vec<DiscoveredDevice>,
    group: Option<GroupState>,
    state: SessionState,
    /// Device id or name to connect to once discovered
    auto_connect: Option<String>,
}

impl ChatApp {
    /// Open the BLE adapter and start a node on it
    pub async fn start(config: AppConfig) -> Result<Self> {
        let transport = BleTransport::new(config.ble.clone()).await?;
        let node = ChatNode::spawn(config.core.clone(), transport)?;
        info!(
            "Chat node started as {} ({})",
            node.local_identity().display_name,
            node.local_identity().peer_id
        );
        Self::new(node, config.cli)
    }

    pub fn new(mut node: NodeHandle, config: CliConfig) -> Result<Self> {
        let events = node
            .take_event_receiver()
            .ok_or_else(|| GattchatError::channel_error("event receiver already taken"))?;
        Ok(Self {
            node,
            events,
            config,
            devices: Vec::new(),
            group: None,
            state: SessionState::Idle,
            auto_connect: None,
        })
    }

    pub fn with_auto_connect(mut self, device: Option<String>) -> Self {
        self.auto_connect = device;
        self
    }

    /// Run against standard input until `/quit` or end of input
    pub async fn run(self) -> Result<()> {
        self.run_with_input(BufReader::new(tokio::io::stdin())).await
    }

    pub async fn run_with_input<R: AsyncBufRead + Unpin>(mut self, input: R) -> Result<()> {
        let mut lines = input.lines();
        println!("{}", HELP);
        if self.config.auto_scan || self.auto_connect.is_some() {
            self.node.request_scan().await?;
        }
        self.prompt().await;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        debug!("Input closed");
                        break;
                    };
                    match InputCommand::parse(&line) {
                        Ok(InputCommand::Quit) => break,
                        Ok(command) => self.handle_input(command).await?,
                        Err(e) => println!("{}", e),
                    }
                    self.prompt().await;
                }
                event = self.events.recv() => {
                    let Some(event) = event else {
                        warn!("Node stopped");
                        break;
                    };
                    self.handle_event(event).await?;
                }
            }
        }

        self.node.shutdown().await?;
        Ok(())
    }

    async fn prompt(&self) {
        let mut stdout = tokio::io::stdout();
        // a broken stdout surfaces on the next println
        let _ = stdout.write_all(self.config.prompt.as_bytes()).await;
        let _ = stdout.flush().await;
    }

    // ------------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------------

    async fn handle_input(&mut self, command: InputCommand) -> Result<()> {
        match command {
            InputCommand::Empty | InputCommand::Quit => {}
            InputCommand::Help => println!("{}", HELP),
            InputCommand::Send(text) => {
                let group_id = self.group.as_ref().map(|g| g.group_id.clone());
                self.node.request_send(text, None, group_id).await?;
            }
            InputCommand::Scan => {
                self.devices.clear();
                self.node.request_scan().await?;
            }
            InputCommand::StopScan => self.node.request_stop_scan().await?,
            InputCommand::Devices => {
                if self.devices.is_empty() {
                    println!("No devices found yet; try /scan");
                }
                for line in device_listing(&self.devices) {
                    println!("{}", line);
                }
            }
            InputCommand::Connect(selector) => match resolve_device(&self.devices, &selector) {
                Some(device_id) => self.node.request_connect(device_id).await?,
                None => println!("No such device; see /devices"),
            },
            InputCommand::Disconnect => self.node.request_disconnect().await?,
            InputCommand::CreateGroup(name) => self.node.request_create_group(name).await?,
            InputCommand::JoinGroup {
                group_id,
                group_name,
            } => self.node.request_join_group(group_id, group_name).await?,
            InputCommand::Invite => self.node.request_invite().await?,
            InputCommand::Accept(group_id) => self.node.request_accept_invite(group_id).await?,
            InputCommand::Decline(group_id) => self.node.request_decline_invite(group_id).await?,
            InputCommand::Leave => self.node.request_leave_group().await?,
            InputCommand::Location { coordinates, text } => {
                let group_id = self.group.as_ref().map(|g| g.group_id.clone());
                self.node
                    .send_command(Command::SendLocation {
                        text,
                        coordinates,
                        group_id,
                    })
                    .await?
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    async fn handle_event(&mut self, event: AppEvent) -> Result<()> {
        match &event {
            AppEvent::DeviceDiscovered(device) => {
                if !self.devices.iter().any(|d| d.id == device.id) {
                    self.devices.push(device.clone());
                }
            }
            AppEvent::GroupStateChanged(group) => self.group = group.clone(),
            AppEvent::ConnectionStateChanged(state) => {
                debug!("Session state: {}", state.state_name());
                self.state = *state;
            }
            _ => {}
        }

        if let Some(line) = render_event(&event, self.devices.len()) {
            println!("\r{}", line);
            self.prompt().await;
        }

        if let AppEvent::DeviceDiscovered(device) = event {
            self.try_auto_connect(&device).await?;
        }
        Ok(())
    }

    async fn try_auto_connect(&mut self, device: &DiscoveredDevice) -> Result<()> {
        let matches = self.auto_connect.as_deref().is_some_and(|wanted| {
            wanted == device.id.as_str() || device.name.as_deref() == Some(wanted)
        });
        if matches && !self.state.has_link() {
            info!("Auto-connecting to {}", device);
            self.auto_connect = None;
            self.node.request_connect(device.id.clone()).await?;
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Rendering
// ----------------------------------------------------------------------------

/// One line per device, numbered for `/connect <index>`
pub fn device_listing(devices: &[DiscoveredDevice]) -> Vec<String> {
    devices
        .iter()
        .enumerate()
        .map(|(index, device)| format!("  [{}] {}", index + 1, device))
        .collect()
}

pub fn resolve_device(devices: &[DiscoveredDevice], selector: &DeviceSelector) -> Option<DeviceId> {
    match selector {
        DeviceSelector::Index(index) => devices.get(index.checked_sub(1)?).map(|d| d.id.clone()),
        DeviceSelector::Id(id) => Some(
            devices
                .iter()
                .find(|d| d.id.as_str() == id || d.name.as_deref() == Some(id.as_str()))
                .map(|d| d.id.clone())
                .unwrap_or_else(|| DeviceId::new(id.clone())),
        ),
    }
}

pub fn format_entry(entry: &ChatLogEntry) -> String {
    let who = match entry.direction {
        Direction::Sent => "you".to_string(),
        Direction::Received if entry.unparsed => "unparsed".to_string(),
        Direction::Received => entry.sender_name.clone(),
    };
    let scope = match (&entry.group_id, entry.out_of_group) {
        (Some(group_id), true) => format!(" @{} (not a member)", group_id),
        (Some(group_id), false) => format!(" @{}", group_id),
        (None, _) => String::new(),
    };
    let status = match &entry.status {
        DeliveryStatus::Pending => " …",
        DeliveryStatus::Failed { .. } => " (failed)",
        DeliveryStatus::Sent | DeliveryStatus::Received => "",
    };
    format!("[{}{}] {}{}", who, scope, entry.display_text(), status)
}

/// Text printed for an event, if any
pub fn render_event(event: &AppEvent, device_count: usize) -> Option<String> {
    match event {
        AppEvent::ChatLogAppended(entry) => Some(format_entry(entry)),
        AppEvent::ChatLogUpdated(entry) => match &entry.status {
            DeliveryStatus::Failed { reason } => {
                Some(format!("! message {} not delivered: {}", entry.id, reason))
            }
            _ => None,
        },
        AppEvent::GroupStateChanged(Some(group)) => Some(format!(
            "* group {} ({}), {} other member(s)",
            group.group_name,
            group.group_id,
            group.members.len()
        )),
        AppEvent::GroupStateChanged(None) => Some("* no group".to_string()),
        AppEvent::ConnectionStateChanged(SessionState::Ready) => {
            Some("* ready to chat".to_string())
        }
        AppEvent::ConnectionStateChanged(_) => None,
        AppEvent::DeviceDiscovered(device) => Some(format!("  [{}] {}", device_count, device)),
        AppEvent::InviteReceived(_) => None,
        AppEvent::Notice(notice) => Some(format!("* {}", notice)),
        AppEvent::CommandFailed { command, reason } => {
            Some(format!("! {} failed: {}", command, reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gattchat_core::{GroupId, MessageId, PeerId, SystemNotice, Timestamp};

    fn devices() -> Vec<DiscoveredDevice> {
        vec![
            DiscoveredDevice::new(DeviceId::new("dev-1"), Some("Bob's phone".into())),
            DiscoveredDevice::new(DeviceId::new("dev-2"), None),
        ]
    }

    fn entry(direction: Direction, status: DeliveryStatus) -> ChatLogEntry {
        ChatLogEntry {
            id: MessageId::new(3),
            direction,
            text: Some("hello".into()),
            location: None,
            sender_name: "Bob".into(),
            sender_id: Some(PeerId::new("B")),
            group_id: None,
            timestamp: Timestamp::new(0),
            status,
            out_of_group: false,
            unparsed: false,
        }
    }

    #[test]
    fn test_device_listing_is_numbered() {
        let lines = device_listing(&devices());
        assert_eq!(lines[0], "  [1] Bob's phone (dev-1)");
        assert_eq!(lines[1], "  [2] Unknown (dev-2)");
    }

    #[test]
    fn test_resolve_device() {
        let devices = devices();
        assert_eq!(
            resolve_device(&devices, &DeviceSelector::Index(2)),
            Some(DeviceId::new("dev-2"))
        );
        assert_eq!(resolve_device(&devices, &DeviceSelector::Index(3)), None);
        assert_eq!(
            resolve_device(&devices, &DeviceSelector::Id("Bob's phone".into())),
            Some(DeviceId::new("dev-1"))
        );
        assert_eq!(
            resolve_device(&devices, &DeviceSelector::Id("dev-9".into())),
            Some(DeviceId::new("dev-9"))
        );
    }

    #[test]
    fn test_format_entries() {
        assert_eq!(
            format_entry(&entry(Direction::Received, DeliveryStatus::Received)),
            "[Bob] hello"
        );
        assert_eq!(
            format_entry(&entry(Direction::Sent, DeliveryStatus::Pending)),
            "[you] hello …"
        );

        let mut grouped = entry(Direction::Received, DeliveryStatus::Received);
        grouped.group_id = Some(GroupId::new("g1"));
        grouped.out_of_group = true;
        assert_eq!(format_entry(&grouped), "[Bob @g1 (not a member)] hello");
    }

    #[test]
    fn test_render_events() {
        let failed = entry(
            Direction::Sent,
            DeliveryStatus::Failed {
                reason: "not connected".into(),
            },
        );
        assert_eq!(
            render_event(&AppEvent::ChatLogUpdated(failed), 0).as_deref(),
            Some("! message #3 not delivered: not connected")
        );
        let sent = entry(Direction::Sent, DeliveryStatus::Sent);
        assert_eq!(render_event(&AppEvent::ChatLogUpdated(sent), 0), None);
        assert_eq!(
            render_event(&AppEvent::Notice(SystemNotice::ScanStarted), 0).as_deref(),
            Some("* Scanning for devices...")
        );
        assert_eq!(
            render_event(&AppEvent::ConnectionStateChanged(SessionState::Connecting), 0),
            None
        );
    }
}
