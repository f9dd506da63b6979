//! Protocol messages for phone/watch sync.

use crate::counter::{Counter, CounterId};
use crate::error::{ProtocolError, ProtocolResult};
use crate::fields;
use crate::record::{CounterRecord, FieldReader};
use serde::{Deserialize, Serialize};
use std::fmt;
use trivit_codec::{from_cbor, to_cbor, Value};

/// Replica role of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The phone; source of truth for full snapshots.
    Primary,
    /// The watch; a dependent cache of the primary.
    Secondary,
}

impl Role {
    /// The role on the other end of the session.
    pub fn peer(&self) -> Role {
        match self {
            Role::Primary => Role::Secondary,
            Role::Secondary => Role::Primary,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Primary => "primary",
            Role::Secondary => "secondary",
        })
    }
}

/// Discriminator of a sync message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Ask the peer for a full snapshot.
    RequestSync,
    /// Full snapshot of the primary's live counters.
    TrivitsSync,
    /// One counter's current state.
    TrivitUpdate,
    /// A counter was removed.
    TrivitDelete,
    /// Ask the primary to create a counter.
    CreateTrivit,
}

impl MessageKind {
    /// Every message kind.
    pub const ALL: [MessageKind; 5] = [
        MessageKind::RequestSync,
        MessageKind::TrivitsSync,
        MessageKind::TrivitUpdate,
        MessageKind::TrivitDelete,
        MessageKind::CreateTrivit,
    ];

    /// The `type` value on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            MessageKind::RequestSync => "requestSync",
            MessageKind::TrivitsSync => "trivitsSync",
            MessageKind::TrivitUpdate => "trivitUpdate",
            MessageKind::TrivitDelete => "trivitDelete",
            MessageKind::CreateTrivit => "createTrivit",
        }
    }

    /// Parses a wire `type` value.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_name() == name)
    }

    /// Whether a replica in `role` may send this kind of message.
    pub fn may_be_sent_by(&self, role: Role) -> bool {
        match self {
            MessageKind::RequestSync | MessageKind::TrivitUpdate | MessageKind::TrivitDelete => {
                true
            }
            MessageKind::TrivitsSync => role == Role::Primary,
            MessageKind::CreateTrivit => role == Role::Secondary,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A sync protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// Request for a full snapshot.
    RequestSync,
    /// Full snapshot, ordered by sort order.
    TrivitsSync(Vec<CounterRecord>),
    /// Single counter update.
    TrivitUpdate(CounterRecord),
    /// Counter deletion.
    TrivitDelete(CounterId),
    /// Request to create a counter on the primary.
    CreateTrivit {
        /// Title of the new counter.
        title: String,
        /// Palette index of the new counter.
        color_index: u32,
    },
}

impl SyncMessage {
    /// Snapshot message for the given counters, in the given order.
    pub fn full_sync<'a>(counters: impl IntoIterator<Item = &'a Counter>) -> Self {
        SyncMessage::TrivitsSync(counters.into_iter().map(CounterRecord::from).collect())
    }

    /// Single-update message for a counter.
    pub fn update(counter: &Counter) -> Self {
        SyncMessage::TrivitUpdate(CounterRecord::update_of(counter))
    }

    /// Deletion message.
    pub fn delete(id: CounterId) -> Self {
        SyncMessage::TrivitDelete(id)
    }

    /// Create-request message.
    pub fn create(title: impl Into<String>, color_index: u32) -> Self {
        SyncMessage::CreateTrivit {
            title: title.into(),
            color_index,
        }
    }

    /// Returns the message kind.
    pub fn kind(&self) -> MessageKind {
        match self {
            SyncMessage::RequestSync => MessageKind::RequestSync,
            SyncMessage::TrivitsSync(_) => MessageKind::TrivitsSync,
            SyncMessage::TrivitUpdate(_) => MessageKind::TrivitUpdate,
            SyncMessage::TrivitDelete(_) => MessageKind::TrivitDelete,
            SyncMessage::CreateTrivit { .. } => MessageKind::CreateTrivit,
        }
    }

    /// Lowers the message to its key-value payload.
    pub fn to_value(&self) -> Value {
        let kind = (fields::TYPE, Value::from(self.kind().wire_name()));
        match self {
            SyncMessage::RequestSync => Value::text_map([kind]),
            SyncMessage::TrivitsSync(records) => Value::text_map([
                kind,
                (
                    fields::TRIVITS,
                    Value::Array(records.iter().map(CounterRecord::to_value).collect()),
                ),
            ]),
            SyncMessage::TrivitUpdate(record) => {
                Value::text_map([kind, (fields::DATA, record.to_value())])
            }
            SyncMessage::TrivitDelete(id) => {
                Value::text_map([kind, (fields::ID, Value::Text(id.to_string()))])
            }
            SyncMessage::CreateTrivit { title, color_index } => Value::text_map([
                kind,
                (fields::TITLE, Value::Text(title.clone())),
                (fields::COLOR_INDEX, Value::from(*color_index)),
            ]),
        }
    }

    /// Parses a key-value payload.
    ///
    /// Every required field of the declared type is checked. A snapshot
    /// with a single invalid entry is rejected as a whole.
    pub fn from_value(value: &Value) -> ProtocolResult<Self> {
        if value.as_map().is_none() {
            return Err(ProtocolError::NotAMap);
        }

        let type_name = value
            .get(fields::TYPE)
            .and_then(Value::as_text)
            .ok_or(ProtocolError::MissingType)?;
        let kind = MessageKind::from_wire_name(type_name)
            .ok_or_else(|| ProtocolError::UnknownType(type_name.to_string()))?;
        let reader = FieldReader::new(value, kind)?;

        match kind {
            MessageKind::RequestSync => Ok(SyncMessage::RequestSync),
            MessageKind::TrivitsSync => reader
                .array(fields::TRIVITS)?
                .iter()
                .map(|entry| CounterRecord::from_value(entry, kind, true))
                .collect::<ProtocolResult<Vec<_>>>()
                .map(SyncMessage::TrivitsSync),
            MessageKind::TrivitUpdate => {
                CounterRecord::from_value(reader.value(fields::DATA)?, kind, false)
                    .map(SyncMessage::TrivitUpdate)
            }
            MessageKind::TrivitDelete => reader.id(fields::ID).map(SyncMessage::TrivitDelete),
            MessageKind::CreateTrivit => Ok(SyncMessage::CreateTrivit {
                title: reader.text(fields::TITLE)?.to_string(),
                color_index: reader.color_index(fields::COLOR_INDEX)?,
            }),
        }
    }

    /// Encodes to CBOR bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(to_cbor(&self.to_value())?)
    }

    /// Decodes from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Self::from_value(&from_cbor(bytes)?)
    }
}
