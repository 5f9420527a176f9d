//! Typed message payload codec.
//!
//! Encodes a [`WireMessage`] into `[u16 name-len][name][i32 version][body]`
//! and decodes the reverse via the [`MessageRegistry`]. The codec does not
//! add the outer frame length prefix; that belongs to the frame layer.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::error::{ErrorCode, ErrorInfo, Result};
use crate::protocol::registry::{encode_body, Decoded, MessageRegistry, WireMessage};

/// Version stamped on every encoded payload.
pub const PROTOCOL_VERSION: i32 = 1;

/// Encoder/decoder bound to a message registry.
///
/// Decoding remembers the last version the peer sent
/// ([`peer_version`](Self::peer_version)), which lets an application branch
/// on protocol revisions without threading the value through every handler.
pub struct PackCodec {
    registry: Arc<MessageRegistry>,
    version: i32,
    peer_version: AtomicI32,
}

impl PackCodec {
    /// Create a codec stamping [`PROTOCOL_VERSION`] on outbound payloads.
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        Self::with_version(registry, PROTOCOL_VERSION)
    }

    /// Create a codec with an explicit outbound version.
    pub fn with_version(registry: Arc<MessageRegistry>, version: i32) -> Self {
        Self {
            registry,
            version,
            peer_version: AtomicI32::new(0),
        }
    }

    /// The registry this codec decodes against.
    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    /// Version observed on the most recently decoded payload, or 0 if
    /// nothing has been decoded yet.
    pub fn peer_version(&self) -> i32 {
        self.peer_version.load(Ordering::Relaxed)
    }

    /// Encode a message into a payload buffer.
    pub fn encode<M: WireMessage>(&self, message: &M) -> Result<Vec<u8>> {
        let name = M::TYPE_NAME;
        let name_len = u16::try_from(name.len()).map_err(|_| {
            ErrorInfo::new(ErrorCode::Parameter)
                .with_message("message type name too long")
                .add_pair("message_name", name)
        })?;

        let body = encode_body(message)?;

        let mut buf = Vec::with_capacity(2 + name.len() + 4 + body.len());
        buf.extend_from_slice(&name_len.to_be_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decode a payload into a dynamically-typed message.
    pub fn decode(&self, payload: &[u8]) -> Result<Decoded> {
        let truncated = || {
            ErrorInfo::new(ErrorCode::Parameter)
                .with_message("truncated message payload")
                .add_pair("payload_length", payload.len())
        };

        let (name_len_bytes, rest) = payload.split_at_checked(2).ok_or_else(truncated)?;
        let name_len = u16::from_be_bytes([name_len_bytes[0], name_len_bytes[1]]) as usize;

        let (name_bytes, rest) = rest.split_at_checked(name_len).ok_or_else(truncated)?;
        let name = std::str::from_utf8(name_bytes).map_err(|_| {
            ErrorInfo::new(ErrorCode::Parameter).with_message("message type name is not UTF-8")
        })?;

        let (version_bytes, body) = rest.split_at_checked(4).ok_or_else(truncated)?;
        let version = i32::from_be_bytes([
            version_bytes[0],
            version_bytes[1],
            version_bytes[2],
            version_bytes[3],
        ]);
        self.peer_version.store(version, Ordering::Relaxed);

        self.registry.decode(name, version, body)
    }
}

impl Clone for PackCodec {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            version: self.version,
            peer_version: AtomicI32::new(self.peer_version.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Hello {
        value: String,
    }

    impl WireMessage for Hello {
        const TYPE_NAME: &'static str = "codec.Hello";
    }

    fn codec() -> PackCodec {
        let mut registry = MessageRegistry::new();
        registry.register::<Hello>();
        PackCodec::new(Arc::new(registry))
    }

    #[test]
    fn test_roundtrip_preserves_type_and_fields() {
        let codec = codec();
        let original = Hello {
            value: "hello".into(),
        };

        let payload = codec.encode(&original).unwrap();
        let decoded = codec.decode(&payload).unwrap();

        assert_eq!(decoded.type_name, "codec.Hello");
        assert_eq!(decoded.version, PROTOCOL_VERSION);
        let hello = decoded.message.downcast::<Hello>().unwrap();
        assert_eq!(*hello, original);
    }

    #[test]
    fn test_payload_layout() {
        let codec = codec();
        let payload = codec.encode(&Hello { value: "x".into() }).unwrap();

        let name = "codec.Hello";
        assert_eq!(&payload[..2], &(name.len() as u16).to_be_bytes());
        assert_eq!(&payload[2..2 + name.len()], name.as_bytes());
        assert_eq!(
            &payload[2 + name.len()..6 + name.len()],
            &PROTOCOL_VERSION.to_be_bytes()
        );
        assert!(payload.len() > 6 + name.len());
    }

    #[test]
    fn test_decode_records_peer_version() {
        let registry = {
            let mut r = MessageRegistry::new();
            r.register::<Hello>();
            Arc::new(r)
        };
        let sender = PackCodec::with_version(registry.clone(), 7);
        let receiver = PackCodec::new(registry);

        let payload = sender.encode(&Hello { value: "v".into() }).unwrap();
        let decoded = receiver.decode(&payload).unwrap();

        assert_eq!(decoded.version, 7);
        assert_eq!(receiver.peer_version(), 7);
    }

    #[test]
    fn test_truncated_payload_is_parameter_error() {
        let codec = codec();

        for cut in [0usize, 1, 2, 5] {
            let payload = codec.encode(&Hello { value: "y".into() }).unwrap();
            let err = codec.decode(&payload[..cut]).unwrap_err();
            assert_eq!(err.code(), ErrorCode::Parameter, "cut at {cut}");
        }
    }

    #[test]
    fn test_unknown_type_name_reports_name_pair() {
        let codec = codec();

        // Hand-build a payload naming an unregistered type.
        let name = b"codec.Nobody";
        let mut payload = Vec::new();
        payload.extend_from_slice(&(name.len() as u16).to_be_bytes());
        payload.extend_from_slice(name);
        payload.extend_from_slice(&1i32.to_be_bytes());

        let err = codec.decode(&payload).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert_eq!(
            err.values("message_name").collect::<Vec<_>>(),
            vec!["codec.Nobody"]
        );
    }

    #[test]
    fn test_non_utf8_name_rejected() {
        let codec = codec();

        let mut payload = Vec::new();
        payload.extend_from_slice(&2u16.to_be_bytes());
        payload.extend_from_slice(&[0xFF, 0xFE]);
        payload.extend_from_slice(&1i32.to_be_bytes());

        let err = codec.decode(&payload).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Parameter);
    }
}
