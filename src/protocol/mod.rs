//! Wire protocol: modem line framing ([`codec`]) and the application payloads riding inside
//! frames ([`message`]).

pub mod codec;
pub mod message;

pub use codec::{decode_checked, decode_received, encode_send, DecodeError, Frame, SignalQuality};
pub use message::{Message, MessageKind, PayloadError, Waypoint};
