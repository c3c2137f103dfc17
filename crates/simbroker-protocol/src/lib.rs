//! simbroker Protocol - Wire protocol for broker and session connections
//!
//! Both the broker and every session host speak the same newline-delimited
//! JSON protocol: one [`ClientMessage`] per line in, one [`ServerMessage`]
//! per line out, strictly in request order.

pub mod codec;
pub mod message;
pub mod value;
pub mod version;

pub use codec::{decode, encode, CodecError, MAX_MESSAGE_SIZE};
pub use message::{Call, ClientMessage, ServerMessage, ServiceRole};
pub use value::{ReplyValue, ServiceInfo};
pub use version::ProtocolVersion;
