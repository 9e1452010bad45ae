pub mod listener;
pub mod message;
pub mod wsjtx;
pub use listener::{MonitorState, ReceiveLoop, DATAGRAM_BUFFER_LEN};
pub use message::{decode_datagram, DecodeFailure, DecodedMessage, Payload, StatusPayload};
pub use wsjtx::{read_frame, DecodeError, Frame, MessageType, TimeOfDay};
