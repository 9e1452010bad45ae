// WSJT-X UDP Protocol Parser
// Reference: NetworkMessage.hpp from WSJT-X source
//
// Every datagram starts with a fixed 12-byte header (magic, schema, type),
// followed by the sender's client id as a length-prefixed UTF-8 string.
// All integers are big-endian.

use std::fmt;

use thiserror::Error;

/// WSJT-X Magic Number
pub const WSJTX_MAGIC: u32 = 0xadbccbda;

/// magic(4) + schema(4) + type(4)
pub const HEADER_LEN: usize = 12;

/// Length prefix marking a null (absent) string
pub const NULL_STRING_LEN: u32 = 0xFFFFFFFF;

const MS_PER_HOUR: u32 = 3_600_000;
const MS_PER_MINUTE: u32 = 60_000;
const MS_PER_SECOND: u32 = 1_000;

/// Errors raised while reading a datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("message too short: {0} bytes (header needs 12)")]
    TooShort(usize),

    #[error("invalid magic number: {0:08x}")]
    BadMagic(u32),

    #[error("truncated at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("invalid UTF-8 in string at offset {offset}")]
    InvalidEncoding { offset: usize },
}

/// WSJT-X Message Types
///
/// Tags outside the known set are kept as `Unknown` so a newer sender
/// never aborts the read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Heartbeat,
    Status,
    Decode,
    Clear,
    Reply,
    QsoLogged,
    Close,
    Replay,
    HaltTx,
    FreeText,
    WsprDecode,
    Location,
    LoggedAdif,
    HighlightCallsign,
    SwitchConfiguration,
    Configure,
    Unknown(u32),
}

impl MessageType {
    pub fn from_u32(tag: u32) -> Self {
        match tag {
            0 => MessageType::Heartbeat,
            1 => MessageType::Status,
            2 => MessageType::Decode,
            3 => MessageType::Clear,
            4 => MessageType::Reply,
            5 => MessageType::QsoLogged,
            6 => MessageType::Close,
            7 => MessageType::Replay,
            8 => MessageType::HaltTx,
            9 => MessageType::FreeText,
            10 => MessageType::WsprDecode,
            11 => MessageType::Location,
            12 => MessageType::LoggedAdif,
            13 => MessageType::HighlightCallsign,
            14 => MessageType::SwitchConfiguration,
            15 => MessageType::Configure,
            other => MessageType::Unknown(other),
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            MessageType::Heartbeat => 0,
            MessageType::Status => 1,
            MessageType::Decode => 2,
            MessageType::Clear => 3,
            MessageType::Reply => 4,
            MessageType::QsoLogged => 5,
            MessageType::Close => 6,
            MessageType::Replay => 7,
            MessageType::HaltTx => 8,
            MessageType::FreeText => 9,
            MessageType::WsprDecode => 10,
            MessageType::Location => 11,
            MessageType::LoggedAdif => 12,
            MessageType::HighlightCallsign => 13,
            MessageType::SwitchConfiguration => 14,
            MessageType::Configure => 15,
            MessageType::Unknown(tag) => *tag,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, MessageType::Unknown(_))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::Status => "STATUS",
            MessageType::Decode => "DECODE",
            MessageType::Clear => "CLEAR",
            MessageType::Reply => "REPLY",
            MessageType::QsoLogged => "QSO_LOGGED",
            MessageType::Close => "CLOSE",
            MessageType::Replay => "REPLAY",
            MessageType::HaltTx => "HALT_TX",
            MessageType::FreeText => "FREE_TEXT",
            MessageType::WsprDecode => "WSPR_DECODE",
            MessageType::Location => "LOCATION",
            MessageType::LoggedAdif => "LOGGED_ADIF",
            MessageType::HighlightCallsign => "HIGHLIGHT_CALLSIGN",
            MessageType::SwitchConfiguration => "SWITCH_CONFIGURATION",
            MessageType::Configure => "CONFIGURE",
            MessageType::Unknown(tag) => return write!(f, "UNKNOWN({})", tag),
        };
        f.write_str(name)
    }
}

/// The fixed 12-byte prefix of every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub schema: u32,
    pub message_type: MessageType,
}

impl FrameHeader {
    /// Validate length and magic, then read schema and type.
    pub fn read(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < HEADER_LEN {
            return Err(DecodeError::TooShort(data.len()));
        }

        let mut offset = 0;
        let magic = read_u32(data, &mut offset)?;
        if magic != WSJTX_MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }
        let schema = read_u32(data, &mut offset)?;
        let message_type = MessageType::from_u32(read_u32(data, &mut offset)?);

        Ok(Self {
            magic,
            schema,
            message_type,
        })
    }

    /// Read the client id that follows the header and complete the frame.
    pub fn into_frame(self, data: &[u8]) -> Result<Frame, DecodeError> {
        let mut offset = HEADER_LEN;
        let client_id = read_string(data, &mut offset)?;

        Ok(Frame {
            magic: self.magic,
            schema: self.schema,
            message_type: self.message_type,
            client_id,
            payload_offset: offset,
        })
    }
}

/// A validated datagram header plus the offset where the payload begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub magic: u32,
    pub schema: u32,
    pub message_type: MessageType,
    pub client_id: Option<String>,
    pub payload_offset: usize,
}

/// Slice a raw datagram into a typed frame.
pub fn read_frame(data: &[u8]) -> Result<Frame, DecodeError> {
    FrameHeader::read(data)?.into_frame(data)
}

/// Packed QTime: milliseconds since midnight, split into clock fields.
///
/// `hours` is not wrapped, so values past 24h come through as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
    pub milliseconds: u32,
}

impl TimeOfDay {
    pub fn from_millis(msecs: u32) -> Self {
        let hours = msecs / MS_PER_HOUR;
        let msecs = msecs % MS_PER_HOUR;
        let minutes = msecs / MS_PER_MINUTE;
        let msecs = msecs % MS_PER_MINUTE;
        let seconds = msecs / MS_PER_SECOND;
        let milliseconds = msecs % MS_PER_SECOND;

        Self {
            hours,
            minutes,
            seconds,
            milliseconds,
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}.{:03}",
            self.hours, self.minutes, self.seconds, self.milliseconds
        )
    }
}

/// Borrow `len` bytes at `offset`, or report how short the buffer is.
fn take(data: &[u8], offset: usize, len: usize) -> Result<&[u8], DecodeError> {
    match offset.checked_add(len) {
        Some(end) if end <= data.len() => Ok(&data[offset..end]),
        _ => Err(DecodeError::Truncated {
            offset,
            needed: len,
            available: data.len().saturating_sub(offset),
        }),
    }
}

/// Read a big-endian u32 and advance the cursor
pub fn read_u32(data: &[u8], offset: &mut usize) -> Result<u32, DecodeError> {
    let b = take(data, *offset, 4)?;
    let value = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
    *offset += 4;
    Ok(value)
}

/// Read a big-endian u64 and advance the cursor
pub fn read_u64(data: &[u8], offset: &mut usize) -> Result<u64, DecodeError> {
    let b = take(data, *offset, 8)?;
    let value = u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
    *offset += 8;
    Ok(value)
}

/// Read a Qt-style string from the buffer
/// Format: u32 length (0xFFFFFFFF for null), then UTF-8 bytes
///
/// A null string consumes only the 4-byte prefix. The cursor is left
/// untouched when decoding fails.
pub fn read_string(data: &[u8], offset: &mut usize) -> Result<Option<String>, DecodeError> {
    let mut cursor = *offset;
    let len = read_u32(data, &mut cursor)?;

    if len == NULL_STRING_LEN {
        *offset = cursor;
        return Ok(None);
    }

    let bytes = take(data, cursor, len as usize)?;
    let s = std::str::from_utf8(bytes)
        .map_err(|_| DecodeError::InvalidEncoding { offset: cursor })?
        .to_string();

    *offset = cursor + bytes.len();
    Ok(Some(s))
}

/// Read a packed QTime (u32 milliseconds since midnight)
pub fn read_packed_time(data: &[u8], offset: &mut usize) -> Result<TimeOfDay, DecodeError> {
    let msecs = read_u32(data, offset)?;
    Ok(TimeOfDay::from_millis(msecs))
}
