//! NT4 framing.
//!
//! Control traffic is a WebSocket text frame holding a JSON array of
//! `{method, params}` objects. Value traffic is a binary frame holding one or
//! more `[id, timestamp_us, type, value]` arrays, normally MessagePack; some
//! peers send the same array as UTF-8 JSON, so decoding falls back to JSON
//! when MessagePack fails.

use serde::{Deserialize, Serialize};
use serde_json::Map;

use super::value::{Value, ValueType, WireValue};
use super::{Codec, FrameFormatError};

/// NT4.0 subprotocol identifier.
pub const SUBPROTOCOL_V40: &str = "networktables.first.wpi.edu";
/// NT4.1 subprotocol identifier.
pub const SUBPROTOCOL_V41: &str = "v4.1.networktables.first.wpi.edu";

/// Value-frame id reserved for clock synchronization probes.
pub const TIMESYNC_ID: i64 = -1;

pub type Properties = Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "lowercase")]
pub enum ControlMessage {
    Publish(PublishParams),
    Unpublish(UnpublishParams),
    SetProperties(SetPropertiesParams),
    Subscribe(SubscribeParams),
    Unsubscribe(UnsubscribeParams),
    Announce(AnnounceParams),
    Unannounce(UnannounceParams),
    Properties(PropertiesParams),
}

impl ControlMessage {
    pub fn method(&self) -> &'static str {
        match self {
            ControlMessage::Publish(_) => "publish",
            ControlMessage::Unpublish(_) => "unpublish",
            ControlMessage::SetProperties(_) => "setproperties",
            ControlMessage::Subscribe(_) => "subscribe",
            ControlMessage::Unsubscribe(_) => "unsubscribe",
            ControlMessage::Announce(_) => "announce",
            ControlMessage::Unannounce(_) => "unannounce",
            ControlMessage::Properties(_) => "properties",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishParams {
    pub name: String,
    pub pubuid: i64,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnpublishParams {
    pub pubuid: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetPropertiesParams {
    pub name: String,
    pub update: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeParams {
    pub topics: Vec<String>,
    pub subuid: i64,
    #[serde(default)]
    pub options: SubscribeOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeOptions {
    #[serde(default)]
    pub prefix: bool,
    #[serde(default)]
    pub topicsonly: bool,
    #[serde(default = "default_immediate")]
    pub immediate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub periodic: Option<f64>,
    #[serde(default)]
    pub all: bool,
}

fn default_immediate() -> bool {
    true
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            prefix: false,
            topicsonly: false,
            immediate: true,
            periodic: None,
            all: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeParams {
    pub subuid: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnounceParams {
    pub name: String,
    pub id: i64,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubuid: Option<i64>,
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnannounceParams {
    pub name: String,
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertiesParams {
    pub name: String,
    #[serde(default)]
    pub ack: bool,
    pub update: Properties,
}

/// Result of decoding one text frame: the messages that parsed, and one
/// error per array element that did not.
#[derive(Debug, Default)]
pub struct ControlBatch {
    pub messages: Vec<ControlMessage>,
    pub rejected: Vec<FrameFormatError>,
}

/// Decode a control text frame.
///
/// The frame as a whole must be a JSON array; individual elements with an
/// unknown `method` or missing fields are reported in `rejected` without
/// affecting their siblings.
pub fn decode_control(text: &str) -> Result<ControlBatch, FrameFormatError> {
    let items: Vec<serde_json::Value> = serde_json::from_str(text)
        .map_err(|e| FrameFormatError::new(Codec::Nt4Json, e.to_string()))?;

    let mut batch = ControlBatch::default();
    for item in items {
        match serde_json::from_value::<ControlMessage>(item) {
            Ok(msg) => batch.messages.push(msg),
            Err(e) => batch
                .rejected
                .push(FrameFormatError::new(Codec::Nt4Json, e.to_string())),
        }
    }
    Ok(batch)
}

pub fn encode_control(messages: &[ControlMessage]) -> Result<String, FrameFormatError> {
    serde_json::to_string(messages).map_err(|e| FrameFormatError::new(Codec::Nt4Json, e.to_string()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueFrame {
    pub id: i64,
    pub timestamp: u64,
    pub value: Value,
}

impl ValueFrame {
    pub fn new(id: i64, timestamp: u64, value: Value) -> Self {
        Self {
            id,
            timestamp,
            value,
        }
    }

    pub fn is_timesync(&self) -> bool {
        self.id == TIMESYNC_ID
    }
}

#[derive(Debug, Deserialize)]
struct RawValueFrame(i64, u64, u8, WireValue);

impl RawValueFrame {
    fn into_frame(self, codec: Codec) -> Result<ValueFrame, FrameFormatError> {
        let RawValueFrame(id, timestamp, tag, wire) = self;
        let ty = ValueType::from_tag(tag)
            .ok_or_else(|| FrameFormatError::new(codec, format!("unknown type tag {tag}")))?;
        let value =
            Value::from_wire(ty, wire).map_err(|e| FrameFormatError::new(codec, e.to_string()))?;
        Ok(ValueFrame::new(id, timestamp, value))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonValueFrames {
    One(RawValueFrame),
    Many(Vec<RawValueFrame>),
}

/// Encode value frames as concatenated MessagePack arrays.
pub fn encode_values(frames: &[ValueFrame]) -> Result<Vec<u8>, FrameFormatError> {
    let mut out = Vec::new();
    for frame in frames {
        let raw = (
            frame.id,
            frame.timestamp,
            frame.value.value_type().tag(),
            &frame.value,
        );
        rmp_serde::encode::write(&mut out, &raw)
            .map_err(|e| FrameFormatError::new(Codec::Nt4MessagePack, e.to_string()))?;
    }
    Ok(out)
}

/// Decode a binary frame, MessagePack first and JSON as the fallback.
pub fn decode_values(bytes: &[u8]) -> Result<Vec<ValueFrame>, FrameFormatError> {
    match decode_msgpack_values(bytes) {
        Ok(frames) => Ok(frames),
        Err(msgpack_err) => decode_json_values(bytes).map_err(|json_err| {
            FrameFormatError::new(
                Codec::Nt4MessagePackThenJson,
                format!("{}; {}", msgpack_err.reason, json_err.reason),
            )
        }),
    }
}

fn decode_msgpack_values(bytes: &[u8]) -> Result<Vec<ValueFrame>, FrameFormatError> {
    if bytes.is_empty() {
        return Err(FrameFormatError::new(Codec::Nt4MessagePack, "empty frame"));
    }
    let mut rest = bytes;
    let mut frames = Vec::new();
    while !rest.is_empty() {
        let raw: RawValueFrame = rmp_serde::from_read(&mut rest)
            .map_err(|e| FrameFormatError::new(Codec::Nt4MessagePack, e.to_string()))?;
        frames.push(raw.into_frame(Codec::Nt4MessagePack)?);
    }
    Ok(frames)
}

fn decode_json_values(bytes: &[u8]) -> Result<Vec<ValueFrame>, FrameFormatError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| FrameFormatError::new(Codec::Nt4Json, e.to_string()))?;
    let parsed: JsonValueFrames = serde_json::from_str(text)
        .map_err(|e| FrameFormatError::new(Codec::Nt4Json, e.to_string()))?;
    match parsed {
        JsonValueFrames::One(raw) => Ok(vec![raw.into_frame(Codec::Nt4Json)?]),
        JsonValueFrames::Many(raws) => raws
            .into_iter()
            .map(|raw| raw.into_frame(Codec::Nt4Json))
            .collect(),
    }
}
