//! Client wire codecs
//!
//! The gateway speaks in `Request` and `Reply`; a codec owns the bytes.
//! One implementation per wire format.

use super::errors::GatewayError;
use super::request::{Reply, Request};

/// Largest request frame accepted from a client, delimiter excluded.
pub const MAX_REQUEST_LEN: usize = 64 * 1024;

pub trait WireCodec: Send + Sync {
    /// Decode one frame (without its delimiter).
    fn decode(&self, frame: &[u8]) -> Result<Request, GatewayError>;

    /// Encode one reply (without its delimiter).
    fn encode(&self, reply: &Reply) -> Vec<u8>;
}

/// One JSON object per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl WireCodec for JsonCodec {
    fn decode(&self, frame: &[u8]) -> Result<Request, GatewayError> {
        serde_json::from_slice(frame).map_err(|e| GatewayError::Malformed(e.to_string()))
    }

    fn encode(&self, reply: &Reply) -> Vec<u8> {
        serde_json::to_vec(reply).unwrap_or_else(|_| {
            br#"{"success":false,"message":"Reply could not be encoded","error":"Unavailable"}"#
                .to_vec()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_list_accounts() {
        let req = JsonCodec
            .decode(br#"{"command":"list_accounts","pattern":"a*"}"#)
            .unwrap();
        assert_eq!(
            req,
            Request::ListAccounts {
                pattern: "a*".into()
            }
        );
    }

    #[test]
    fn test_unknown_command_is_malformed() {
        let err = JsonCodec.decode(br#"{"command":"shutdown"}"#).unwrap_err();
        assert_eq!(err.kind(), "Malformed");
    }

    #[test]
    fn test_encode_is_single_line() {
        let bytes = JsonCodec.encode(&Reply::ok("Logged out successfully"));
        assert!(!bytes.contains(&b'\n'));
    }
}
