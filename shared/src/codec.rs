//! Text payload codec for the controller channel and the cross-context dispatch
//!
//! The controller channel carries raw text payloads with no further framing:
//! ```text
//! inbound : "pause" | "play" | <anything else, ignored>
//! outbound: "ping" | "ack_pause" | "ack_play"
//! ```
//!
//! Dispatch requests to an execution context are JSON objects:
//! ```text
//! { "action": "controlVideo", "data": "pause" }  ->  { "status": "success" }
//! ```

use thiserror::Error;

use crate::{CommandToken, DispatchRequest, DispatchResponse};

/// Keepalive payload sent on every probe tick
pub const PING: &str = "ping";

/// Errors that can occur while encoding/decoding dispatch messages
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A decoded inbound payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// A recognized command token
    Command(CommandToken),
    /// Anything else; dropped without error so new control payloads stay compatible
    Ignored,
}

/// Decode a raw inbound payload from the controller
pub fn decode_inbound(payload: &str) -> Inbound {
    match payload {
        "pause" => Inbound::Command(CommandToken::Pause),
        "play" => Inbound::Command(CommandToken::Play),
        _ => Inbound::Ignored,
    }
}

/// Encode the acknowledgment for a successfully executed token
pub fn encode_ack(token: CommandToken) -> String {
    token.ack_payload().to_string()
}

/// Serialize a dispatch request
pub fn encode_request(request: &DispatchRequest) -> Result<String, CodecError> {
    Ok(serde_json::to_string(request)?)
}

/// Parse a dispatch request
pub fn decode_request(raw: &str) -> Result<DispatchRequest, CodecError> {
    Ok(serde_json::from_str(raw)?)
}

/// Serialize a dispatch response
pub fn encode_response(response: &DispatchResponse) -> Result<String, CodecError> {
    Ok(serde_json::to_string(response)?)
}

/// Parse a dispatch response
pub fn decode_response(raw: &str) -> Result<DispatchResponse, CodecError> {
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DispatchStatus;

    #[test]
    fn test_decode_recognized_tokens() {
        assert_eq!(decode_inbound("pause"), Inbound::Command(CommandToken::Pause));
        assert_eq!(decode_inbound("play"), Inbound::Command(CommandToken::Play));
    }

    #[test]
    fn test_unrecognized_payloads_are_ignored() {
        for payload in ["", "Pause", "PLAY", " pause", "pause\n", "ping", "ack_pause", "stop"] {
            assert_eq!(decode_inbound(payload), Inbound::Ignored, "payload {:?}", payload);
        }
    }

    #[test]
    fn test_encode_ack() {
        assert_eq!(encode_ack(CommandToken::Pause), "ack_pause");
        assert_eq!(encode_ack(CommandToken::Play), "ack_play");
    }

    #[test]
    fn test_request_wire_shape() {
        let encoded = encode_request(&DispatchRequest::control_video(CommandToken::Pause))
            .expect("encode failed");
        assert_eq!(encoded, r#"{"action":"controlVideo","data":"pause"}"#);
    }

    #[test]
    fn test_decode_response() {
        let response = decode_response(r#"{"status":"success"}"#).expect("decode failed");
        assert!(response.is_success());

        let response = decode_response(r#"{"status":"failure"}"#).expect("decode failed");
        assert_eq!(response.status, DispatchStatus::Failure);

        assert!(decode_response(r#"{"status":"maybe"}"#).is_err());
    }

    #[test]
    fn test_request_with_unknown_action_still_decodes() {
        let request = decode_request(r#"{"action":"seek","data":"play"}"#).expect("decode failed");
        assert_eq!(request.action, "seek");
        assert_eq!(request.data, CommandToken::Play);
    }

    #[test]
    fn test_request_with_unknown_token_is_rejected() {
        let result = decode_request(r#"{"action":"controlVideo","data":"stop"}"#);
        assert!(matches!(result, Err(CodecError::Json(_))));
    }
}
