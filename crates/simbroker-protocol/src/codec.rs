//! Line framing helpers.
//!
//! One JSON document per line. Both peers reject lines above
//! [`MAX_MESSAGE_SIZE`] before attempting to parse them.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum message size (16 MB); script payloads travel inline.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Message too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Invalid message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes a message into a newline-terminated line.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, CodecError> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

/// Parses one received line.
pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T, CodecError> {
    if line.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::TooLarge {
            size: line.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Call, ClientMessage};

    #[test]
    fn test_encode_appends_newline() {
        let line = encode(&ClientMessage::ping(1)).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_decode_tolerates_crlf() {
        let msg: ClientMessage =
            decode("{\"protocol_version\":{\"major\":1,\"minor\":0},\"type\":\"ping\",\"seq\":9}\r\n")
                .unwrap();
        assert!(matches!(msg.call, Call::Ping { seq: 9 }));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result: Result<ClientMessage, _> = decode("not json\n");
        assert!(matches!(result, Err(CodecError::Json(_))));
    }
}
