//! NT3 binary framing.
//!
//! Each message is a one-byte message type followed by its fields. Fixed-width
//! numbers are little-endian; strings, raw payloads and array counts carry a
//! ULEB128 length prefix. Value payloads use the shared type tags from
//! `codec::value`.
//!
//! The stream has no outer length prefix, so `decode` reports an incomplete
//! buffer as `Ok(None)` and the caller reads more bytes.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::value::{Value, ValueType};
use super::{Codec, FrameFormatError};

pub const PROTOCOL_VERSION: u16 = 0x0300;
/// Id a client uses in `EntryAssignment` to ask the server for a new id.
pub const NEW_ENTRY_ID: u16 = 0xFFFF;
pub const CLEAR_ALL_MAGIC: u32 = 0xD06C_B27A;
/// Largest message a peer may send; also bounds every length prefix.
pub const MAX_MESSAGE_SIZE: usize = 1 << 20;

pub const FLAG_NONE: u8 = 0x00;
pub const FLAG_PERSISTENT: u8 = 0x01;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum MessageType {
    KeepAlive = 0x00,
    ClientHello = 0x01,
    ProtoUnsupported = 0x02,
    ServerHelloComplete = 0x03,
    ServerHello = 0x04,
    ClientHelloComplete = 0x05,
    EntryAssignment = 0x10,
    EntryUpdate = 0x11,
    FlagsUpdate = 0x12,
    EntryDelete = 0x13,
    ClearEntries = 0x14,
    RpcDefinition = 0x20,
    RpcExecution = 0x21,
}

/// In-band error codes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum Nt3ErrorCode {
    None = 0x00,
    ProtocolUnsupported = 0x01,
    MessageTypeUnsupported = 0x02,
    MessageFormatError = 0x03,
    EntryExists = 0x10,
    EntryNotFound = 0x11,
    EntryTypeMismatch = 0x12,
    EntryValueInvalid = 0x13,
    RpcDefinitionExists = 0x20,
    RpcDefinitionNotFound = 0x21,
    RpcExecutionFailed = 0x22,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Nt3Message {
    KeepAlive,
    ClientHello {
        version: u16,
        identity: String,
    },
    ProtoUnsupported {
        version: u16,
    },
    ServerHelloComplete,
    ServerHello {
        flags: u8,
        identity: String,
    },
    ClientHelloComplete,
    EntryAssignment {
        name: String,
        id: u16,
        seq: u16,
        flags: u8,
        value: Value,
    },
    EntryUpdate {
        id: u16,
        seq: u16,
        value: Value,
    },
    FlagsUpdate {
        id: u16,
        flags: u8,
    },
    EntryDelete {
        id: u16,
    },
    ClearEntries {
        magic: u32,
    },
    RpcDefinition {
        id: u16,
        definition: Vec<u8>,
    },
    RpcExecution {
        id: u16,
        uid: u16,
        params: Vec<u8>,
    },
}

impl Nt3Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Nt3Message::KeepAlive => MessageType::KeepAlive,
            Nt3Message::ClientHello { .. } => MessageType::ClientHello,
            Nt3Message::ProtoUnsupported { .. } => MessageType::ProtoUnsupported,
            Nt3Message::ServerHelloComplete => MessageType::ServerHelloComplete,
            Nt3Message::ServerHello { .. } => MessageType::ServerHello,
            Nt3Message::ClientHelloComplete => MessageType::ClientHelloComplete,
            Nt3Message::EntryAssignment { .. } => MessageType::EntryAssignment,
            Nt3Message::EntryUpdate { .. } => MessageType::EntryUpdate,
            Nt3Message::FlagsUpdate { .. } => MessageType::FlagsUpdate,
            Nt3Message::EntryDelete { .. } => MessageType::EntryDelete,
            Nt3Message::ClearEntries { .. } => MessageType::ClearEntries,
            Nt3Message::RpcDefinition { .. } => MessageType::RpcDefinition,
            Nt3Message::RpcExecution { .. } => MessageType::RpcExecution,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.message_type().into());
        match self {
            Nt3Message::KeepAlive
            | Nt3Message::ServerHelloComplete
            | Nt3Message::ClientHelloComplete => {}
            Nt3Message::ClientHello { version, identity } => {
                out.extend_from_slice(&version.to_le_bytes());
                put_string(out, identity);
            }
            Nt3Message::ProtoUnsupported { version } => {
                out.extend_from_slice(&version.to_le_bytes());
            }
            Nt3Message::ServerHello { flags, identity } => {
                out.push(*flags);
                put_string(out, identity);
            }
            Nt3Message::EntryAssignment {
                name,
                id,
                seq,
                flags,
                value,
            } => {
                put_string(out, name);
                out.push(value.value_type().tag());
                out.extend_from_slice(&id.to_le_bytes());
                out.extend_from_slice(&seq.to_le_bytes());
                out.push(*flags);
                put_value(out, value);
            }
            Nt3Message::EntryUpdate { id, seq, value } => {
                out.extend_from_slice(&id.to_le_bytes());
                out.extend_from_slice(&seq.to_le_bytes());
                out.push(value.value_type().tag());
                put_value(out, value);
            }
            Nt3Message::FlagsUpdate { id, flags } => {
                out.extend_from_slice(&id.to_le_bytes());
                out.push(*flags);
            }
            Nt3Message::EntryDelete { id } => {
                out.extend_from_slice(&id.to_le_bytes());
            }
            Nt3Message::ClearEntries { magic } => {
                out.extend_from_slice(&magic.to_le_bytes());
            }
            Nt3Message::RpcDefinition { id, definition } => {
                out.extend_from_slice(&id.to_le_bytes());
                put_bytes(out, definition);
            }
            Nt3Message::RpcExecution { id, uid, params } => {
                out.extend_from_slice(&id.to_le_bytes());
                out.extend_from_slice(&uid.to_le_bytes());
                put_bytes(out, params);
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

/// Decode one message from the front of `buf`.
///
/// Returns the message and the number of bytes it occupied, or `Ok(None)` if
/// `buf` holds only a prefix of a message.
pub fn decode(buf: &[u8]) -> Result<Option<(Nt3Message, usize)>, FrameFormatError> {
    let mut reader = Reader::new(buf);
    match reader.message() {
        Ok(msg) => Ok(Some((msg, reader.pos))),
        Err(ReadError::Incomplete) => Ok(None),
        Err(ReadError::Invalid(reason)) => Err(FrameFormatError::new(Codec::Nt3, reason)),
    }
}

fn put_uleb128(out: &mut Vec<u8>, mut n: u64) {
    loop {
        let byte = (n & 0x7f) as u8;
        n >>= 7;
        if n == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    put_uleb128(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

fn put_string(out: &mut Vec<u8>, s: &str) {
    put_bytes(out, s.as_bytes());
}

fn put_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Boolean(b) => out.push(u8::from(*b)),
        Value::Double(d) => out.extend_from_slice(&d.to_le_bytes()),
        Value::Int(i) => out.extend_from_slice(&i.to_le_bytes()),
        Value::Float(f) => out.extend_from_slice(&f.to_le_bytes()),
        Value::String(s) => put_string(out, s),
        Value::Raw(bytes) => put_bytes(out, bytes),
        Value::BooleanArray(items) => {
            put_uleb128(out, items.len() as u64);
            out.extend(items.iter().map(|b| u8::from(*b)));
        }
        Value::DoubleArray(items) => {
            put_uleb128(out, items.len() as u64);
            items
                .iter()
                .for_each(|d| out.extend_from_slice(&d.to_le_bytes()));
        }
        Value::IntArray(items) => {
            put_uleb128(out, items.len() as u64);
            items
                .iter()
                .for_each(|i| out.extend_from_slice(&i.to_le_bytes()));
        }
        Value::FloatArray(items) => {
            put_uleb128(out, items.len() as u64);
            items
                .iter()
                .for_each(|f| out.extend_from_slice(&f.to_le_bytes()));
        }
        Value::StringArray(items) => {
            put_uleb128(out, items.len() as u64);
            items.iter().for_each(|s| put_string(out, s));
        }
    }
}

enum ReadError {
    Incomplete,
    Invalid(String),
}

type ReadResult<T> = Result<T, ReadError>;

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> ReadResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(ReadError::Incomplete)?;
        let slice = self.buf.get(self.pos..end).ok_or(ReadError::Incomplete)?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> ReadResult<[u8; N]> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.take(N)?);
        Ok(arr)
    }

    fn u8(&mut self) -> ReadResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> ReadResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> ReadResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn uleb128(&mut self) -> ReadResult<usize> {
        let mut result: u64 = 0;
        for shift in (0..64).step_by(7) {
            let byte = self.u8()?;
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return match usize::try_from(result) {
                    Ok(len) if len <= MAX_MESSAGE_SIZE => Ok(len),
                    _ => Err(ReadError::Invalid(format!(
                        "length {} exceeds the {} byte message limit",
                        result, MAX_MESSAGE_SIZE
                    ))),
                };
            }
        }
        Err(ReadError::Invalid("ULEB128 length longer than 10 bytes".into()))
    }

    fn bytes(&mut self) -> ReadResult<Vec<u8>> {
        let len = self.uleb128()?;
        Ok(self.take(len)?.to_vec())
    }

    fn string(&mut self) -> ReadResult<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes).map_err(|e| ReadError::Invalid(format!("invalid UTF-8: {e}")))
    }

    fn value_type(&mut self) -> ReadResult<ValueType> {
        let tag = self.u8()?;
        ValueType::from_tag(tag).ok_or_else(|| ReadError::Invalid(format!("unknown type tag {tag}")))
    }

    fn items<T>(&mut self, mut f: impl FnMut(&mut Self) -> ReadResult<T>) -> ReadResult<Vec<T>> {
        let count = self.uleb128()?;
        // Bound the preallocation by what the buffer could possibly hold.
        let mut items = Vec::with_capacity(count.min(self.buf.len() - self.pos));
        for _ in 0..count {
            items.push(f(self)?);
        }
        Ok(items)
    }

    fn f64(&mut self) -> ReadResult<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> ReadResult<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> ReadResult<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    fn bool(&mut self) -> ReadResult<bool> {
        Ok(self.u8()? != 0)
    }

    fn value(&mut self, ty: ValueType) -> ReadResult<Value> {
        let value = match ty {
            ValueType::Boolean => Value::Boolean(self.bool()?),
            ValueType::Double => Value::Double(self.f64()?),
            ValueType::Int => Value::Int(self.i64()?),
            ValueType::Float => Value::Float(self.f32()?),
            ValueType::String => Value::String(self.string()?),
            ValueType::Raw => Value::Raw(self.bytes()?),
            ValueType::BooleanArray => Value::BooleanArray(self.items(Self::bool)?),
            ValueType::DoubleArray => Value::DoubleArray(self.items(Self::f64)?),
            ValueType::IntArray => Value::IntArray(self.items(Self::i64)?),
            ValueType::FloatArray => Value::FloatArray(self.items(Self::f32)?),
            ValueType::StringArray => Value::StringArray(self.items(Self::string)?),
        };
        Ok(value)
    }

    fn message(&mut self) -> ReadResult<Nt3Message> {
        let type_byte = self.u8()?;
        let msg_type = MessageType::try_from(type_byte)
            .map_err(|_| ReadError::Invalid(format!("unsupported message type {type_byte:#04x}")))?;

        let msg = match msg_type {
            MessageType::KeepAlive => Nt3Message::KeepAlive,
            MessageType::ClientHello => Nt3Message::ClientHello {
                version: self.u16()?,
                identity: self.string()?,
            },
            MessageType::ProtoUnsupported => Nt3Message::ProtoUnsupported {
                version: self.u16()?,
            },
            MessageType::ServerHelloComplete => Nt3Message::ServerHelloComplete,
            MessageType::ServerHello => Nt3Message::ServerHello {
                flags: self.u8()?,
                identity: self.string()?,
            },
            MessageType::ClientHelloComplete => Nt3Message::ClientHelloComplete,
            MessageType::EntryAssignment => {
                let name = self.string()?;
                let ty = self.value_type()?;
                let id = self.u16()?;
                let seq = self.u16()?;
                let flags = self.u8()?;
                let value = self.value(ty)?;
                Nt3Message::EntryAssignment {
                    name,
                    id,
                    seq,
                    flags,
                    value,
                }
            }
            MessageType::EntryUpdate => {
                let id = self.u16()?;
                let seq = self.u16()?;
                let ty = self.value_type()?;
                let value = self.value(ty)?;
                Nt3Message::EntryUpdate { id, seq, value }
            }
            MessageType::FlagsUpdate => Nt3Message::FlagsUpdate {
                id: self.u16()?,
                flags: self.u8()?,
            },
            MessageType::EntryDelete => Nt3Message::EntryDelete { id: self.u16()? },
            MessageType::ClearEntries => Nt3Message::ClearEntries { magic: self.u32()? },
            MessageType::RpcDefinition => Nt3Message::RpcDefinition {
                id: self.u16()?,
                definition: self.bytes()?,
            },
            MessageType::RpcExecution => Nt3Message::RpcExecution {
                id: self.u16()?,
                uid: self.u16()?,
                params: self.bytes()?,
            },
        };
        Ok(msg)
    }
}
