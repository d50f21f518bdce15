//! Line-oriented JSON packet codec.
//!
//! Requests: `["1.1","C","CREATE",{"basket":"1.1.1"}]`
//! Responses: `["1.1","R","CREATE",{"basket":"1.1.1",...}]`, or an
//! `{"error":{"code":..,"message":..}}` object in place of the payload.

use crate::{CommandArgs, Payload, PeerError, Result};
use serde_json::{Value, json};

pub const PROTOCOL_VERSION: &str = "1.1";

const DIRECTION_COMMAND: &str = "C";
const DIRECTION_RESPONSE: &str = "R";

pub fn decode_request(raw: &str) -> Result<(String, CommandArgs)> {
    let (command, fields) = decode_packet(raw, DIRECTION_COMMAND)?;

    let args = fields
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect();

    Ok((command, args))
}

pub fn decode_response(raw: &str) -> Result<(String, Payload)> {
    decode_packet(raw, DIRECTION_RESPONSE)
}

pub fn encode_request(command: &str, args: &CommandArgs) -> Result<String> {
    let packet = json!([PROTOCOL_VERSION, DIRECTION_COMMAND, command, args]);
    Ok(format!("{}\r\n", serde_json::to_string(&packet)?))
}

pub fn encode_response(command: &str, result: &Result<Payload>) -> Result<String> {
    let body = match result {
        Ok(payload) => Value::Object(payload.clone()),
        Err(error) => json!({
            "error": {
                "code": error.code(),
                "message": error.detail(),
            }
        }),
    };
    let packet = json!([PROTOCOL_VERSION, DIRECTION_RESPONSE, command, body]);
    Ok(format!("{}\r\n", serde_json::to_string(&packet)?))
}

fn decode_packet(raw: &str, direction: &str) -> Result<(String, Payload)> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|e| PeerError::BadRequest(format!("malformed packet: {}", e)))?;

    let Value::Array(mut items) = value else {
        return Err(PeerError::BadRequest("packet is not an array".to_string()));
    };
    if items.len() != 4 {
        return Err(PeerError::BadRequest(format!(
            "packet has {} elements, expected 4",
            items.len()
        )));
    }

    let fields = match items.pop() {
        Some(Value::Object(fields)) => fields,
        _ => {
            return Err(PeerError::BadRequest(
                "packet arguments are not an object".to_string(),
            ));
        }
    };

    match (&items[0], &items[1], &items[2]) {
        (Value::String(version), Value::String(dir), Value::String(command)) => {
            if version != PROTOCOL_VERSION {
                return Err(PeerError::BadRequest(format!(
                    "unsupported protocol version: {}",
                    version
                )));
            }
            if dir != direction {
                return Err(PeerError::BadRequest(format!(
                    "unexpected packet direction: {}",
                    dir
                )));
            }
            Ok((command.clone(), fields))
        }
        _ => Err(PeerError::BadRequest(
            "packet header must be strings".to_string(),
        )),
    }
}
