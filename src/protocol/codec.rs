//! JSON text codec for requests and responses.
//!
//! 64-bit integers (the handshake secret, unix timestamps) are written as bare
//! JSON integers. `serde_json` keeps `u64`/`i64` exact in both directions, so no
//! string pivot is applied and the output is byte-compatible with the daemon.
use serde_json::{Map, Value};
use thiserror::Error;

use super::{Envelope, Request, Response, ResponseKind};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("message has no 'Command' member")]
    MissingCommand,
    #[error("invalid '{command}' payload: {source}")]
    Payload {
        command: String,
        source: serde_json::Error,
    },
}

/// Serialize a request envelope to one line of text (without the delimiter).
pub fn encode_request(envelope: &Envelope<'_>) -> Result<String, CodecError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Parse one framed message into a [`Response`].
pub fn decode_response(message: &[u8]) -> Result<Response, CodecError> {
    let (command, idx, payload) = split_message(message)?;
    Ok(Response {
        kind: ResponseKind::from_command(&command),
        command,
        idx,
        payload,
    })
}

/// Serialize a response; the inverse of [`decode_response`].
pub fn encode_response(response: &Response) -> Result<String, CodecError> {
    let mut map = Map::with_capacity(response.payload.len() + 2);
    map.insert("Command".into(), Value::String(response.command.clone()));
    map.insert("Idx".into(), Value::from(response.idx));
    for (key, value) in &response.payload {
        map.insert(key.clone(), value.clone());
    }
    Ok(serde_json::to_string(&Value::Object(map))?)
}

/// Parse one framed request, returning its index and typed body.
pub fn decode_request(message: &[u8]) -> Result<(u64, Request), CodecError> {
    let (command, idx, mut payload) = split_message(message)?;
    payload.remove("ProtocolSecret");
    payload.insert("Command".into(), Value::String(command));
    let request = serde_json::from_value(Value::Object(payload))?;
    Ok((idx, request))
}

fn split_message(message: &[u8]) -> Result<(String, u64, Map<String, Value>), CodecError> {
    let Value::Object(mut map) = serde_json::from_slice::<Value>(message)? else {
        return Err(CodecError::NotAnObject);
    };

    let command = match map.remove("Command") {
        Some(Value::String(command)) if !command.is_empty() => command,
        _ => return Err(CodecError::MissingCommand),
    };
    let idx = map.remove("Idx").and_then(|v| v.as_u64()).unwrap_or(0);

    Ok((command, idx, map))
}
