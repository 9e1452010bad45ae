// WSJT-X message decoding
//
// Only STATUS carries a structured payload here. Every other type, known
// or not, is surfaced with its header fields alone.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::wsjtx::{read_string, read_u64, DecodeError, Frame, FrameHeader, MessageType};

/// The STATUS (type 1) fields this application consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPayload {
    pub dial_frequency_hz: u64,
    pub mode: Option<String>,
    pub dx_call: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Status(StatusPayload),
    HeaderOnly,
}

/// A datagram decoded into header fields plus an optional payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    /// Wall-clock time of decoding; the packet carries no receive time.
    pub received_at: DateTime<Utc>,
    pub schema_version: u32,
    pub message_type: MessageType,
    pub client_id: Option<String>,
    pub payload: Payload,
}

impl DecodedMessage {
    pub fn status(&self) -> Option<&StatusPayload> {
        match &self.payload {
            Payload::Status(status) => Some(status),
            Payload::HeaderOnly => None,
        }
    }
}

/// A datagram that could not be decoded.
///
/// `message_type` is set whenever the header got far enough to read it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("decoding error: {error}")]
pub struct DecodeFailure {
    pub received_at: DateTime<Utc>,
    pub message_type: Option<MessageType>,
    #[source]
    pub error: DecodeError,
    pub raw_hex: String,
}

impl DecodeFailure {
    fn new(
        received_at: DateTime<Utc>,
        message_type: Option<MessageType>,
        error: DecodeError,
        raw: &[u8],
    ) -> Self {
        Self {
            received_at,
            message_type,
            error,
            raw_hex: hex::encode(raw),
        }
    }
}

/// Decode one raw datagram, stamping it with the current UTC time.
pub fn decode_datagram(data: &[u8]) -> Result<DecodedMessage, DecodeFailure> {
    let received_at = Utc::now();
    let header = FrameHeader::read(data)
        .map_err(|e| DecodeFailure::new(received_at, None, e, data))?;
    let frame = header
        .into_frame(data)
        .map_err(|e| DecodeFailure::new(received_at, Some(header.message_type), e, data))?;

    decode_message(&frame, data, received_at)
}

/// Decode the payload of an already framed datagram.
///
/// The cursor starts at `frame.payload_offset`.
pub fn decode_message(
    frame: &Frame,
    data: &[u8],
    received_at: DateTime<Utc>,
) -> Result<DecodedMessage, DecodeFailure> {
    let payload = match frame.message_type {
        MessageType::Status => {
            let mut offset = frame.payload_offset;
            let status = parse_status(data, &mut offset).map_err(|e| {
                DecodeFailure::new(received_at, Some(frame.message_type), e, data)
            })?;
            Payload::Status(status)
        }
        _ => Payload::HeaderOnly,
    };

    Ok(DecodedMessage {
        received_at,
        schema_version: frame.schema,
        message_type: frame.message_type,
        client_id: frame.client_id.clone(),
        payload,
    })
}

/// Parse the leading STATUS fields.
///
/// Wire order after the id: dial frequency (u64), mode, DX call, then
/// report, Tx mode, flags, offsets, DE call/grid and more. Everything
/// after the DX call is left unread. Field positions are fixed for all
/// schema versions seen so far.
fn parse_status(data: &[u8], offset: &mut usize) -> Result<StatusPayload, DecodeError> {
    let dial_frequency_hz = read_u64(data, offset)?;
    let mode = read_string(data, offset)?;
    let dx_call = read_string(data, offset)?;

    Ok(StatusPayload {
        dial_frequency_hz,
        mode,
        dx_call,
    })
}
