use crate::protocol::error::Result;
use crate::protocol::Envelope;

/// JSON text codec for envelopes.
///
/// Peers exchange one envelope per WebSocket text frame. Decoding here does
/// not apply the broker's validation rules; clients use it to read frames the
/// broker produced.
///
/// # Example
///
/// ```
/// use cmdrelay_common::transport::JsonCodec;
/// use cmdrelay_common::protocol::Envelope;
///
/// let text = JsonCodec::encode(&Envelope::ping()).unwrap();
/// let decoded = JsonCodec::decode(&text).unwrap();
/// assert_eq!(decoded.type_name(), "ping");
/// ```
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode(envelope: &Envelope) -> Result<String> {
        Ok(serde_json::to_string(envelope)?)
    }

    pub fn decode(text: &str) -> Result<Envelope> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RelayError;

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = JsonCodec::decode(r#"{"type":"bogus"}"#).unwrap_err();
        assert!(matches!(err, RelayError::JsonSerialization(_)));
    }

    #[test]
    fn test_encode_produces_single_line() {
        let text = JsonCodec::encode(&Envelope::ping()).unwrap();
        assert!(!text.contains('\n'));
        assert!(text.starts_with('{'));
    }
}
