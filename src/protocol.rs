use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::intents::Intents;

/// Gateway protocol version negotiated in the connection URL.
pub const GATEWAY_VERSION: u8 = 10;

/// JSON envelope exchanged over the gateway socket.
///
/// `s` and `t` are only present on dispatch payloads; `d` may be any JSON
/// value including `null` (the invalid-session payload is a bare boolean).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl Envelope {
    pub fn new(op: Opcode, d: Value) -> Envelope {
        Envelope {
            op: op as u8,
            d,
            s: None,
            t: None,
        }
    }

    /// Parse an envelope from the decompressed JSON text of one frame.
    pub fn from_json(text: &str) -> crate::Result<Envelope> {
        serde_json::from_str(text).map_err(|e| crate::Error::Protocol(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        // Envelope contains only JSON-representable fields; serialization
        // cannot fail.
        serde_json::to_string(self).expect("envelope serializes")
    }
}

/// Gateway operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Dispatch = 0,
    Heartbeat = 1,
    Identify = 2,
    Resume = 6,
    Reconnect = 7,
    InvalidSession = 9,
    Hello = 10,
    HeartbeatAck = 11,
}

impl Opcode {
    pub fn from_u8(op: u8) -> Option<Opcode> {
        match op {
            0 => Some(Opcode::Dispatch),
            1 => Some(Opcode::Heartbeat),
            2 => Some(Opcode::Identify),
            6 => Some(Opcode::Resume),
            7 => Some(Opcode::Reconnect),
            9 => Some(Opcode::InvalidSession),
            10 => Some(Opcode::Hello),
            11 => Some(Opcode::HeartbeatAck),
            _ => None,
        }
    }
}

/// Close codes sent by the gateway when terminating a connection.
pub mod close_code {
    pub const UNKNOWN_ERROR: u16 = 4000;
    pub const UNKNOWN_OPCODE: u16 = 4001;
    pub const DECODE_ERROR: u16 = 4002;
    pub const NOT_AUTHENTICATED: u16 = 4003;
    pub const AUTHENTICATION_FAILED: u16 = 4004;
    pub const ALREADY_AUTHENTICATED: u16 = 4005;
    pub const INVALID_SEQUENCE: u16 = 4007;
    pub const RATE_LIMITED: u16 = 4008;
    pub const SESSION_TIMED_OUT: u16 = 4009;
    pub const INVALID_SHARD: u16 = 4010;
    pub const SHARDING_REQUIRED: u16 = 4011;
    pub const INVALID_API_VERSION: u16 = 4012;
    pub const INVALID_INTENTS: u16 = 4013;
    pub const DISALLOWED_INTENTS: u16 = 4014;
}

/// Whether a close code must never be retried automatically.
///
/// Everything outside this set (rate-limited, session-timed-out, decode
/// errors, transport-level closes) is retryable on the fixed interval.
pub fn is_fatal_close(code: u16) -> bool {
    matches!(
        code,
        close_code::AUTHENTICATION_FAILED
            | close_code::INVALID_SHARD
            | close_code::SHARDING_REQUIRED
            | close_code::INVALID_API_VERSION
            | close_code::INVALID_INTENTS
            | close_code::DISALLOWED_INTENTS
    )
}

/// Client metadata sent with the identify payload.
#[derive(Debug, Clone, Serialize)]
pub struct ClientProperties {
    pub os: &'static str,
    pub browser: &'static str,
    pub device: &'static str,
}

impl Default for ClientProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS,
            browser: "shardgate",
            device: "shardgate",
        }
    }
}

/// Build an identify payload for a fresh handshake.
pub fn identify(
    token: &str,
    compress: bool,
    large_threshold: u16,
    intents: Intents,
    shard: (u16, u16),
) -> Envelope {
    Envelope::new(
        Opcode::Identify,
        json!({
            "token": token,
            "compress": compress,
            "large_threshold": large_threshold,
            "properties": ClientProperties::default(),
            "shard": [shard.0, shard.1],
            "intents": intents.bits(),
        }),
    )
}

/// Build a resume payload from stored session state.
pub fn resume(token: &str, session_id: &str, sequence: Option<i64>) -> Envelope {
    Envelope::new(
        Opcode::Resume,
        json!({
            "token": token,
            "session_id": session_id,
            "seq": sequence,
        }),
    )
}

/// Build a heartbeat carrying the last known dispatch sequence.
pub fn heartbeat(sequence: Option<i64>) -> Envelope {
    Envelope::new(
        Opcode::Heartbeat,
        sequence.map(Value::from).unwrap_or(Value::Null),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip() {
        let env = Envelope::from_json(r#"{"op":0,"d":{"a":1},"s":42,"t":"MESSAGE_CREATE"}"#)
            .expect("valid envelope");
        assert_eq!(env.op, 0);
        assert_eq!(env.s, Some(42));
        assert_eq!(env.t.as_deref(), Some("MESSAGE_CREATE"));
    }

    #[test]
    fn test_envelope_without_sequence() {
        let env = Envelope::from_json(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#)
            .expect("valid envelope");
        assert_eq!(env.op, 10);
        assert_eq!(env.s, None);
        assert_eq!(env.t, None);
        // serialized form omits s/t entirely
        let text = env.to_json();
        assert!(!text.contains("\"s\""));
        assert!(!text.contains("\"t\""));
    }

    #[test]
    fn test_opcode_mapping() {
        assert_eq!(Opcode::from_u8(0), Some(Opcode::Dispatch));
        assert_eq!(Opcode::from_u8(6), Some(Opcode::Resume));
        assert_eq!(Opcode::from_u8(11), Some(Opcode::HeartbeatAck));
        assert_eq!(Opcode::from_u8(3), None);
        assert_eq!(Opcode::from_u8(12), None);
    }

    #[test]
    fn test_fatal_close_partition() {
        for code in [4004, 4010, 4011, 4012, 4013, 4014] {
            assert!(is_fatal_close(code), "{code} should be fatal");
        }
        for code in [1000, 1006, 4000, 4001, 4002, 4003, 4005, 4007, 4008, 4009] {
            assert!(!is_fatal_close(code), "{code} should be retryable");
        }
    }

    #[test]
    fn test_identify_payload_shape() {
        let env = identify("token", true, 150, Intents::GUILDS, (2, 8));
        assert_eq!(env.op, Opcode::Identify as u8);
        assert_eq!(env.d["token"], "token");
        assert_eq!(env.d["compress"], true);
        assert_eq!(env.d["large_threshold"], 150);
        assert_eq!(env.d["shard"], serde_json::json!([2, 8]));
        assert_eq!(env.d["intents"], 1);
    }

    #[test]
    fn test_heartbeat_echoes_sequence() {
        assert_eq!(heartbeat(Some(512)).d, serde_json::json!(512));
        assert_eq!(heartbeat(None).d, serde_json::Value::Null);
    }
}
