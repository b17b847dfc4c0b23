//! Protocol module containing message types, the dynamic value type, and the
//! JSON codec.

pub mod codec;
pub mod messages;
pub mod value;

pub use codec::{decode_message, encode_message, is_legacy_acknowledgement, ProtocolError};
pub use messages::*;
pub use value::DynamicValue;
