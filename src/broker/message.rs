//! Outbound events.
//!
//! The coordinator fans out protocol-independent `Outgoing` events; each
//! session's writer encodes them for its own wire generation. This is how an
//! NT3 peer and an NT4 peer observe the same directory.

use tracing::debug;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::topic::{Topic, TopicFlags, TopicId};
use crate::codec::nt3::{NEW_ENTRY_ID, Nt3Message};
use crate::codec::nt4::{
    self, AnnounceParams, ControlMessage, Properties, PropertiesParams, TIMESYNC_ID,
    UnannounceParams, ValueFrame,
};
use crate::codec::{FrameFormatError, Value, ValueType};

#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Announce {
        id: TopicId,
        name: String,
        value_type: ValueType,
        properties: Properties,
        flags: TopicFlags,
        /// Only set on the copy sent to the publishing session.
        pubuid: Option<i64>,
        /// NT3 assignments must carry a value; the type default stands in for none.
        initial: Value,
        seq: u16,
    },
    Unannounce {
        id: TopicId,
        name: String,
    },
    Properties {
        id: TopicId,
        name: String,
        update: Properties,
        ack: bool,
        flags: TopicFlags,
    },
    Value {
        id: TopicId,
        timestamp: u64,
        value: Value,
        seq: u16,
    },
    TimeSync {
        server_time: u64,
        client_time: i64,
    },
    Nt3(Nt3Message),
}

impl Outgoing {
    pub fn announce(topic: &Topic, pubuid: Option<i64>) -> Self {
        Outgoing::Announce {
            id: topic.id,
            name: topic.name.clone(),
            value_type: topic.value_type,
            properties: topic.properties.clone(),
            flags: topic.flags,
            pubuid,
            initial: topic.value_or_default(),
            seq: topic.seq,
        }
    }

    pub fn unannounce(topic: &Topic) -> Self {
        Outgoing::Unannounce {
            id: topic.id,
            name: topic.name.clone(),
        }
    }

    /// `None` if the topic has no value yet.
    pub fn value(topic: &Topic) -> Option<Self> {
        topic.value.as_ref().map(|v| Outgoing::Value {
            id: topic.id,
            timestamp: v.timestamp,
            value: v.value.clone(),
            seq: topic.seq,
        })
    }

    pub fn properties(topic: &Topic, update: Properties, ack: bool) -> Self {
        Outgoing::Properties {
            id: topic.id,
            name: topic.name.clone(),
            update,
            ack,
            flags: topic.flags,
        }
    }

    /// Encode for an NT4 session. `Ok(None)` for events NT4 has no frame for.
    pub fn encode_nt4(&self) -> Result<Option<WsMessage>, FrameFormatError> {
        let control = match self {
            Outgoing::Announce {
                id,
                name,
                value_type,
                properties,
                pubuid,
                ..
            } => ControlMessage::Announce(AnnounceParams {
                name: name.clone(),
                id: i64::from(*id),
                value_type: *value_type,
                pubuid: *pubuid,
                properties: properties.clone(),
            }),
            Outgoing::Unannounce { id, name } => ControlMessage::Unannounce(UnannounceParams {
                name: name.clone(),
                id: i64::from(*id),
            }),
            Outgoing::Properties {
                name, update, ack, ..
            } => ControlMessage::Properties(PropertiesParams {
                name: name.clone(),
                ack: *ack,
                update: update.clone(),
            }),
            Outgoing::Value {
                id,
                timestamp,
                value,
                ..
            } => {
                let frame = ValueFrame::new(i64::from(*id), *timestamp, value.clone());
                let bytes = nt4::encode_values(&[frame])?;
                return Ok(Some(WsMessage::binary(bytes)));
            }
            Outgoing::TimeSync {
                server_time,
                client_time,
            } => {
                let frame = ValueFrame::new(TIMESYNC_ID, *server_time, Value::Int(*client_time));
                let bytes = nt4::encode_values(&[frame])?;
                return Ok(Some(WsMessage::binary(bytes)));
            }
            Outgoing::Nt3(_) => return Ok(None),
        };
        let text = nt4::encode_control(&[control])?;
        Ok(Some(WsMessage::text(text)))
    }

    /// Encode for an NT3 session. `None` for events NT3 has no message for.
    pub fn encode_nt3(&self) -> Option<Vec<u8>> {
        let msg = match self {
            Outgoing::Announce {
                id,
                name,
                flags,
                initial,
                seq,
                ..
            } => Nt3Message::EntryAssignment {
                name: name.clone(),
                id: nt3_id(*id)?,
                seq: *seq,
                flags: flags.bits(),
                value: initial.clone(),
            },
            Outgoing::Unannounce { id, .. } => Nt3Message::EntryDelete { id: nt3_id(*id)? },
            Outgoing::Properties { id, flags, .. } => Nt3Message::FlagsUpdate {
                id: nt3_id(*id)?,
                flags: flags.bits(),
            },
            Outgoing::Value { id, value, seq, .. } => Nt3Message::EntryUpdate {
                id: nt3_id(*id)?,
                seq: *seq,
                value: value.clone(),
            },
            Outgoing::TimeSync { .. } => return None,
            Outgoing::Nt3(msg) => msg.clone(),
        };
        Some(msg.to_bytes())
    }
}

/// NT3 ids are 16 bits wide and `0xFFFF` is reserved.
fn nt3_id(id: TopicId) -> Option<u16> {
    match u16::try_from(id) {
        Ok(id) if id != NEW_ENTRY_ID => Some(id),
        _ => {
            debug!("topic id {} does not fit NT3, not forwarded", id);
            None
        }
    }
}
