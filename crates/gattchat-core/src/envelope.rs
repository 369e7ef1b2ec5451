//! Envelope codec
//!
//! An [`Envelope`] is the self-describing unit exchanged between peers. On the
//! wire it is a compact JSON object; the structured body keeps the per-kind
//! invariants (coordinates come in pairs, only group kinds carry a group id)
//! in the type system rather than in runtime checks.

use serde::{Deserialize, Serialize};

use crate::errors::{DecodeError, FragmentationError};
use crate::types::{Coordinates, GroupId, PeerId};

// ----------------------------------------------------------------------------
// Envelope Kind
// ----------------------------------------------------------------------------

/// Discriminant of an envelope, as carried in the `kind` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    #[serde(rename = "message")]
    PlainMessage,
    GroupCreate,
    GroupJoin,
    GroupInvite,
    GroupMessage,
}

impl EnvelopeKind {
    /// Wire name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::PlainMessage => "message",
            EnvelopeKind::GroupCreate => "group_create",
            EnvelopeKind::GroupJoin => "group_join",
            EnvelopeKind::GroupInvite => "group_invite",
            EnvelopeKind::GroupMessage => "group_message",
        }
    }

    /// Control kinds drive group membership and never appear in the chat log
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            EnvelopeKind::GroupCreate | EnvelopeKind::GroupJoin | EnvelopeKind::GroupInvite
        )
    }
}

// ----------------------------------------------------------------------------
// Envelope
// ----------------------------------------------------------------------------

/// Kind-specific content of an envelope
#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeBody {
    PlainMessage {
        text: Option<String>,
        location: Option<Coordinates>,
    },
    GroupCreate {
        group_id: GroupId,
        group_name: String,
    },
    GroupJoin {
        group_id: GroupId,
    },
    GroupInvite {
        group_id: GroupId,
        group_name: String,
    },
    GroupMessage {
        group_id: GroupId,
        text: Option<String>,
        location: Option<Coordinates>,
    },
}

/// A decoded protocol message
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub sender_id: PeerId,
    pub sender_name: String,
    pub body: EnvelopeBody,
}

impl Envelope {
    pub fn new(sender_id: PeerId, sender_name: String, body: EnvelopeBody) -> Self {
        Self {
            sender_id,
            sender_name,
            body,
        }
    }

    pub fn kind(&self) -> EnvelopeKind {
        match self.body {
            EnvelopeBody::PlainMessage { .. } => EnvelopeKind::PlainMessage,
            EnvelopeBody::GroupCreate { .. } => EnvelopeKind::GroupCreate,
            EnvelopeBody::GroupJoin { .. } => EnvelopeKind::GroupJoin,
            EnvelopeBody::GroupInvite { .. } => EnvelopeKind::GroupInvite,
            EnvelopeBody::GroupMessage { .. } => EnvelopeKind::GroupMessage,
        }
    }

    /// Group this envelope is addressed to, if any
    pub fn group_id(&self) -> Option<&GroupId> {
        match &self.body {
            EnvelopeBody::PlainMessage { .. } => None,
            EnvelopeBody::GroupCreate { group_id, .. }
            | EnvelopeBody::GroupJoin { group_id }
            | EnvelopeBody::GroupInvite { group_id, .. }
            | EnvelopeBody::GroupMessage { group_id, .. } => Some(group_id),
        }
    }

    pub fn group_name(&self) -> Option<&str> {
        match &self.body {
            EnvelopeBody::GroupCreate { group_name, .. }
            | EnvelopeBody::GroupInvite { group_name, .. } => Some(group_name),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.body {
            EnvelopeBody::PlainMessage { text, .. } | EnvelopeBody::GroupMessage { text, .. } => {
                text.as_deref()
            }
            _ => None,
        }
    }

    pub fn location(&self) -> Option<Coordinates> {
        match &self.body {
            EnvelopeBody::PlainMessage { location, .. }
            | EnvelopeBody::GroupMessage { location, .. } => *location,
            _ => None,
        }
    }

    /// Serialize to the compact wire encoding
    ///
    /// The output is a single JSON object, so a decoder handed exactly these
    /// bytes can tell whether they form a complete envelope. Envelopes that
    /// [`Envelope::decode`] would reject are refused here.
    pub fn encode(&self) -> Result<Vec<u8>, FragmentationError> {
        if let Some(location) = self.location() {
            if !location.latitude.is_finite() || !location.longitude.is_finite() {
                return Err(FragmentationError::Encoding {
                    reason: "coordinates must be finite".to_string(),
                });
            }
        }

        let wire = WireEnvelope::from(self);
        let bytes = serde_json::to_vec(&wire).map_err(|e| FragmentationError::Encoding {
            reason: e.to_string(),
        })?;
        wire.validate().map_err(|e| FragmentationError::Encoding {
            reason: e.to_string(),
        })?;
        Ok(bytes)
    }

    /// Parse and validate an envelope from its wire encoding
    ///
    /// Never panics: any input that is not a valid envelope yields an error.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| DecodeError::malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(DecodeError::malformed("envelope must be a JSON object"));
        }
        let wire: WireEnvelope =
            serde_json::from_value(value).map_err(|e| DecodeError::malformed(e.to_string()))?;
        wire.validate()
    }
}

// ----------------------------------------------------------------------------
// Wire Representation
// ----------------------------------------------------------------------------

/// Flat, loosely-typed mirror of the JSON object; unknown fields are ignored
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<EnvelopeKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group_name: Option<String>,
}

impl From<&Envelope> for WireEnvelope {
    fn from(envelope: &Envelope) -> Self {
        let mut wire = WireEnvelope {
            kind: Some(envelope.kind()),
            sender_id: Some(envelope.sender_id.as_str().to_string()),
            sender_name: Some(envelope.sender_name.clone()),
            ..Default::default()
        };

        wire.text = envelope.text().map(str::to_string);
        if let Some(location) = envelope.location() {
            wire.latitude = Some(location.latitude);
            wire.longitude = Some(location.longitude);
        }
        wire.group_id = envelope.group_id().map(|id| id.as_str().to_string());
        wire.group_name = envelope.group_name().map(str::to_string);
        wire
    }
}

impl WireEnvelope {
    fn validate(self) -> Result<Envelope, DecodeError> {
        let kind = self
            .kind
            .ok_or_else(|| DecodeError::malformed("missing `kind`"))?;
        let kind_name = kind.as_str();

        let sender_id = non_empty(self.sender_id).ok_or(DecodeError::MissingField {
            kind: kind_name,
            field: "sender_id",
        })?;
        let sender_name = self.sender_name.ok_or(DecodeError::MissingField {
            kind: kind_name,
            field: "sender_name",
        })?;

        let location = match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinates::new(latitude, longitude)),
            (None, None) => None,
            (Some(_), None) => {
                return Err(DecodeError::MissingField {
                    kind: kind_name,
                    field: "longitude",
                })
            }
            (None, Some(_)) => {
                return Err(DecodeError::MissingField {
                    kind: kind_name,
                    field: "latitude",
                })
            }
        };

        let group_id = non_empty(self.group_id).map(GroupId::new);
        let require_group_id = || {
            group_id.clone().ok_or(DecodeError::MissingField {
                kind: kind_name,
                field: "group_id",
            })
        };
        let require_group_name = || {
            self.group_name.clone().ok_or(DecodeError::MissingField {
                kind: kind_name,
                field: "group_name",
            })
        };
        let require_content = || {
            if self.text.is_none() && location.is_none() {
                Err(DecodeError::MissingField {
                    kind: kind_name,
                    field: "text",
                })
            } else {
                Ok(())
            }
        };

        let body = match kind {
            EnvelopeKind::PlainMessage => {
                if group_id.is_some() {
                    return Err(DecodeError::malformed(
                        "plain message must not carry a group_id",
                    ));
                }
                require_content()?;
                EnvelopeBody::PlainMessage {
                    text: self.text.clone(),
                    location,
                }
            }
            EnvelopeKind::GroupCreate => EnvelopeBody::GroupCreate {
                group_id: require_group_id()?,
                group_name: require_group_name()?,
            },
            EnvelopeKind::GroupJoin => EnvelopeBody::GroupJoin {
                group_id: require_group_id()?,
            },
            EnvelopeKind::GroupInvite => EnvelopeBody::GroupInvite {
                group_id: require_group_id()?,
                group_name: require_group_name()?,
            },
            EnvelopeKind::GroupMessage => {
                let group_id = require_group_id()?;
                require_content()?;
                EnvelopeBody::GroupMessage {
                    group_id,
                    text: self.text.clone(),
                    location,
                }
            }
        };

        Ok(Envelope::new(PeerId::new(sender_id), sender_name, body))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> (PeerId, String) {
        (PeerId::new("A"), "Alice".to_string())
    }

    #[test]
    fn test_plain_message_wire_shape() {
        let (id, name) = sender();
        let envelope = Envelope::new(
            id,
            name,
            EnvelopeBody::PlainMessage {
                text: Some("hi".into()),
                location: None,
            },
        );

        let bytes = envelope.encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["kind"], "message");
        assert_eq!(json["sender_id"], "A");
        assert_eq!(json["text"], "hi");
        assert!(json.get("group_id").is_none());
        assert!(json.get("latitude").is_none());
    }

    #[test]
    fn test_group_message_roundtrip_with_location() {
        let (id, name) = sender();
        let envelope = Envelope::new(
            id,
            name,
            EnvelopeBody::GroupMessage {
                group_id: GroupId::new("g1"),
                text: None,
                location: Some(Coordinates::new(-33.86, 151.21)),
            },
        );

        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.group_id(), Some(&GroupId::new("g1")));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let bytes =
            br#"{"kind":"group_join","sender_id":"B","sender_name":"Bob","group_id":"g","hops":3}"#;
        let decoded = Envelope::decode(bytes).unwrap();
        assert_eq!(decoded.kind(), EnvelopeKind::GroupJoin);
    }

    #[test]
    fn test_missing_required_fields() {
        let no_group =
            br#"{"kind":"group_create","sender_id":"A","sender_name":"Alice","group_name":"x"}"#;
        assert_eq!(
            Envelope::decode(no_group),
            Err(DecodeError::MissingField {
                kind: "group_create",
                field: "group_id"
            })
        );

        let no_sender = br#"{"kind":"message","sender_name":"Alice","text":"hi"}"#;
        assert!(matches!(
            Envelope::decode(no_sender),
            Err(DecodeError::MissingField {
                field: "sender_id",
                ..
            })
        ));

        let lone_latitude =
            br#"{"kind":"message","sender_id":"A","sender_name":"Alice","latitude":1.5}"#;
        assert!(matches!(
            Envelope::decode(lone_latitude),
            Err(DecodeError::MissingField {
                field: "longitude",
                ..
            })
        ));

        let empty_message = br#"{"kind":"message","sender_id":"A","sender_name":"Alice"}"#;
        assert!(matches!(
            Envelope::decode(empty_message),
            Err(DecodeError::MissingField { field: "text", .. })
        ));
    }

    #[test]
    fn test_malformed_inputs() {
        let cases: [&[u8]; 7] = [
            b"",
            b"{",
            b"[1,2,3]",
            b"\xff\xfe",
            br#"{"kind":"teleport","sender_id":"A","sender_name":"x"}"#,
            br#"{"kind":"message","sender_id":"A","sender_name":"x","text":"a"} trailing"#,
            br#"{"kind":"message","sender_id":"A","sender_name":"x","text":"a","group_id":"g"}"#,
        ];

        for case in cases {
            assert!(
                matches!(Envelope::decode(case), Err(DecodeError::Malformed { .. })),
                "expected malformed for {:?}",
                String::from_utf8_lossy(case)
            );
        }
    }

    #[test]
    fn test_braces_inside_text_survive() {
        let (id, name) = sender();
        let envelope = Envelope::new(
            id,
            name,
            EnvelopeBody::PlainMessage {
                text: Some("}{ \"kind\": } {{".into()),
                location: None,
            },
        );
        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_encode_refuses_undecodable_envelopes() {
        let empty_sender = Envelope::new(
            PeerId::new(""),
            "Alice".to_string(),
            EnvelopeBody::PlainMessage {
                text: Some("hi".into()),
                location: None,
            },
        );
        assert!(matches!(
            empty_sender.encode(),
            Err(FragmentationError::Encoding { .. })
        ));

        let (id, name) = sender();
        let empty_group = Envelope::new(
            id.clone(),
            name.clone(),
            EnvelopeBody::GroupJoin {
                group_id: GroupId::new(""),
            },
        );
        assert!(empty_group.encode().is_err());

        let no_content = Envelope::new(
            id,
            name,
            EnvelopeBody::PlainMessage {
                text: None,
                location: None,
            },
        );
        assert!(no_content.encode().is_err());
    }

    #[test]
    fn test_full_precision_coordinates_roundtrip() {
        let (id, name) = sender();
        let envelope = Envelope::new(
            id,
            name,
            EnvelopeBody::PlainMessage {
                text: None,
                location: Some(Coordinates::new(22.264283906583856, 127.03465148502943)),
            },
        );
        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded.location(), envelope.location());
    }

    #[test]
    fn test_non_finite_coordinates_rejected() {
        let (id, name) = sender();
        let envelope = Envelope::new(
            id,
            name,
            EnvelopeBody::PlainMessage {
                text: None,
                location: Some(Coordinates::new(f64::NAN, 0.0)),
            },
        );
        assert!(envelope.encode().is_err());
    }
}
