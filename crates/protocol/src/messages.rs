//! Wire messages exchanged between a rekindle host and its clients.
//!
//! Every message is one JSON object per frame with an explicit `type` tag,
//! so either side can dispatch without out-of-band context. Binary payloads
//! (the compiled module and its debug companion) travel as base64 blocks
//! inside the frame.

use rekindle_core::UnitId;
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use uuid::Uuid;

/// Constant marker the server sends first; clients reject anything else.
pub const SERVER_TOKEN: &str = "<<|rekindle|>>";

/// Protocol version string exchanged in the handshake.
pub const PROTOCOL_VERSION: &str = "0.5.0";

/// The protocol envelope: a discriminated union over every message either
/// side can send.
#[serde_as]
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Envelope {
  /// First message on a new connection, host -> client.
  ServerHello {
    token: String,
    version: String,
    session_id: Uuid,
  },

  /// Identity reply, client -> host. Change aggregation for the session
  /// starts only once this is received.
  ClientHello { target: String, platform: Option<String> },

  /// Host -> client: a rebuild is about to start; reply with any
  /// additionally needed units.
  BuildRequest {},

  /// Client -> host: units the client needs compiled alongside the changed
  /// files (e.g. types it could not resolve from the previous delta).
  AdditionalUnits { units: Vec<UnitId> },

  /// Host -> client: one build's output.
  Delta {
    /// Strictly increasing per build target, never reused
    version: u64,
    /// Units whose sources were directly edited
    changed_units: Vec<UnitId>,
    /// Every unit present in the emitted module (changed + requested +
    /// structurally coupled)
    all_units: Vec<UnitId>,
    #[serde_as(as = "Base64")]
    module: Vec<u8>,
    #[serde_as(as = "Base64")]
    debug_info: Vec<u8>,
  },
}

impl Envelope {
  /// The handshake greeting with the current token and protocol version.
  pub fn server_hello(session_id: Uuid) -> Self {
    Envelope::ServerHello {
      token: SERVER_TOKEN.to_string(),
      version: PROTOCOL_VERSION.to_string(),
      session_id,
    }
  }

  /// Whether this is a greeting carrying the expected server token.
  pub fn is_valid_hello(&self) -> bool {
    matches!(self, Envelope::ServerHello { token, .. } if token == SERVER_TOKEN)
  }

  /// Wire tag of this message, for logging and error reporting.
  pub fn name(&self) -> &'static str {
    match self {
      Envelope::ServerHello { .. } => "server_hello",
      Envelope::ClientHello { .. } => "client_hello",
      Envelope::BuildRequest {} => "build_request",
      Envelope::AdditionalUnits { .. } => "additional_units",
      Envelope::Delta { .. } => "delta",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_tag_dispatch() {
    let json = serde_json::to_string(&Envelope::BuildRequest {}).unwrap();
    assert_eq!(json, r#"{"type":"build_request"}"#);

    let parsed: Envelope = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, Envelope::BuildRequest {});
  }

  #[test]
  fn test_server_hello_token() {
    let hello = Envelope::server_hello(Uuid::new_v4());
    assert!(hello.is_valid_hello());

    let forged = Envelope::ServerHello {
      token: "<<|something-else|>>".to_string(),
      version: PROTOCOL_VERSION.to_string(),
      session_id: Uuid::new_v4(),
    };
    assert!(!forged.is_valid_hello());
  }

  #[test]
  fn test_client_hello_omits_missing_platform() {
    let hello = Envelope::ClientHello {
      target: "demo-app".to_string(),
      platform: None,
    };
    let json = serde_json::to_string(&hello).unwrap();
    assert!(!json.contains("platform"));

    let parsed: Envelope = serde_json::from_str(r#"{"type":"client_hello","target":"demo-app"}"#).unwrap();
    assert_eq!(parsed, hello);
  }

  #[test]
  fn test_delta_payload_is_base64() {
    let delta = Envelope::Delta {
      version: 3,
      changed_units: vec![UnitId::from("app::View")],
      all_units: vec![UnitId::from("app::View"), UnitId::from("app::Model")],
      module: vec![0x7f, b'E', b'L', b'F', 0x00, 0xff],
      debug_info: Vec::new(),
    };

    let json = serde_json::to_string(&delta).unwrap();
    // Raw bytes must not appear as JSON number arrays
    assert!(!json.contains("127"));
    assert!(json.contains(r#""module":"f0VMRgD/""#));

    let parsed: Envelope = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, delta);
  }

  #[test]
  fn test_unknown_tag_is_an_error() {
    let result: Result<Envelope, _> = serde_json::from_str(r#"{"type":"reload_now"}"#);
    assert!(result.is_err());
  }
}
