//! Interactive input parsing
//!
//! Lines starting with `/` are commands; anything else is sent as a message.

use gattchat_core::{Coordinates, GroupId};

use crate::error::{CliError, Result};

/// Help text printed for `/help`
pub const HELP: &str = "\
Commands:
  /scan                     scan for nearby devices
  /stop                     stop scanning
  /devices                  list discovered devices
  /connect <index|id>       connect to a discovered device
  /disconnect               close the current connection
  /create [name]            create a group and announce it
  /join <group-id> [name]   join a group by id
  /invite                   invite the peer to the current group
  /accept <group-id>        accept a pending invite
  /decline <group-id>       decline a pending invite
  /leave                    leave the current group
  /loc [<lat> <lon>] [text] send a location message
  /help                     show this help
  /quit                     exit
Any other line is sent as a message.";

/// A parsed line of interactive input
#[derive(Debug, Clone, PartialEq)]
pub enum InputCommand {
    Send(String),
    Scan,
    StopScan,
    Devices,
    /// Index into the device list, or a raw device id
    Connect(DeviceSelector),
    Disconnect,
    CreateGroup(Option<String>),
    JoinGroup {
        group_id: GroupId,
        group_name: Option<String>,
    },
    Invite,
    Accept(GroupId),
    Decline(GroupId),
    Leave,
    Location {
        coordinates: Option<Coordinates>,
        text: Option<String>,
    },
    Help,
    Quit,
    /// Blank line
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// 1-based position in the `/devices` listing
    Index(usize),
    Id(String),
}

impl InputCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(InputCommand::Empty);
        }
        let Some(command_line) = line.strip_prefix('/') else {
            return Ok(InputCommand::Send(line.to_string()));
        };

        let (command, rest) = match command_line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (command_line, ""),
        };
        let rest_opt = (!rest.is_empty()).then(|| rest.to_string());

        match command.to_ascii_lowercase().as_str() {
            "scan" => Ok(InputCommand::Scan),
            "stop" => Ok(InputCommand::StopScan),
            "devices" => Ok(InputCommand::Devices),
            "connect" => {
                let target = required(rest, "/connect <index|id>")?;
                Ok(InputCommand::Connect(match target.parse::<usize>() {
                    Ok(index) if index > 0 => DeviceSelector::Index(index),
                    _ => DeviceSelector::Id(target.to_string()),
                }))
            }
            "disconnect" => Ok(InputCommand::Disconnect),
            "create" => Ok(InputCommand::CreateGroup(rest_opt)),
            "join" => {
                let args = required(rest, "/join <group-id> [name]")?;
                let (group_id, name) = match args.split_once(char::is_whitespace) {
                    Some((id, name)) => (id, Some(name.trim().to_string())),
                    None => (args, None),
                };
                Ok(InputCommand::JoinGroup {
                    group_id: GroupId::new(group_id),
                    group_name: name,
                })
            }
            "invite" => Ok(InputCommand::Invite),
            "accept" => Ok(InputCommand::Accept(GroupId::new(required(
                rest,
                "/accept <group-id>",
            )?))),
            "decline" => Ok(InputCommand::Decline(GroupId::new(required(
                rest,
                "/decline <group-id>",
            )?))),
            "leave" => Ok(InputCommand::Leave),
            "loc" | "location" => parse_location(rest),
            "help" | "?" => Ok(InputCommand::Help),
            "quit" | "exit" => Ok(InputCommand::Quit),
            other => Err(CliError::InvalidInput(format!(
                "unknown command /{}; try /help",
                other
            ))),
        }
    }
}

fn required<'a>(rest: &'a str, usage: &str) -> Result<&'a str> {
    if rest.is_empty() {
        Err(CliError::InvalidInput(format!("usage: {}", usage)))
    } else {
        Ok(rest)
    }
}

/// `/loc <lat> <lon> [text]` or `/loc [text]`
fn parse_location(rest: &str) -> Result<InputCommand> {
    let mut words = rest.splitn(3, char::is_whitespace);
    let lat = words.next().and_then(|w| w.parse::<f64>().ok());
    let lon = words.next().and_then(|w| w.parse::<f64>().ok());

    if let (Some(latitude), Some(longitude)) = (lat, lon) {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(CliError::InvalidInput(format!(
                "coordinates out of range: {}, {}",
                latitude, longitude
            )));
        }
        let text = words
            .next()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        return Ok(InputCommand::Location {
            coordinates: Some(Coordinates::new(latitude, longitude)),
            text,
        });
    }

    Ok(InputCommand::Location {
        coordinates: None,
        text: (!rest.is_empty()).then(|| rest.to_string()),
    })
}
