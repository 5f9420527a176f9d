//! Message type registry.
//!
//! Maps wire type names to concrete Rust types so inbound payloads can be
//! decoded without reflection: each message-owning module registers its
//! types at startup, and the codec looks up `{TypeId, parser}` by name.
//!
//! Bodies are MessagePack, serialized with `to_vec_named` so structs travel
//! as maps with field names rather than positional arrays.
//!
//! # Example
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use wiremux::{MessageRegistry, WireMessage};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Ping {
//!     seq: u64,
//! }
//!
//! impl WireMessage for Ping {
//!     const TYPE_NAME: &'static str = "demo.Ping";
//! }
//!
//! let mut registry = MessageRegistry::new();
//! registry.register::<Ping>();
//! assert!(registry.contains("demo.Ping"));
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::error::{ErrorCode, ErrorInfo, Result};

/// A typed message that can travel through the dispatch layer.
///
/// `TYPE_NAME` must be globally unique; dotted fully-qualified names
/// (`"myapp.HelloRequest"`) keep separate modules from colliding.
pub trait WireMessage:
    serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static
{
    /// Globally unique wire name of this message type.
    const TYPE_NAME: &'static str;
}

/// A decoded message whose concrete type is recovered by downcast.
pub type DynMessage = Box<dyn Any + Send + Sync>;

/// Result of decoding one inbound payload.
pub struct Decoded {
    /// Stable identifier of the registered Rust type.
    pub type_id: TypeId,
    /// The registered wire name.
    pub type_name: &'static str,
    /// Protocol version the peer stamped on this payload.
    pub version: i32,
    /// The message itself.
    pub message: DynMessage,
}

impl std::fmt::Debug for Decoded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoded")
            .field("type_id", &self.type_id)
            .field("type_name", &self.type_name)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

struct RegistryEntry {
    type_id: TypeId,
    type_name: &'static str,
    decode: fn(&[u8]) -> Result<DynMessage>,
}

fn decode_body<M: WireMessage>(body: &[u8]) -> Result<DynMessage> {
    let message: M = rmp_serde::from_slice(body).map_err(|e| {
        ErrorInfo::new(ErrorCode::ThirdParty)
            .with_message(e.to_string())
            .add_pair("message_name", M::TYPE_NAME)
    })?;
    Ok(Box::new(message))
}

/// Serialize a message body. Named-map format, so field renames break the
/// wire loudly instead of silently shifting positions.
pub(crate) fn encode_body<M: WireMessage>(message: &M) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(message).map_err(|e| {
        ErrorInfo::new(ErrorCode::ThirdParty)
            .with_message(e.to_string())
            .add_pair("message_name", M::TYPE_NAME)
    })
}

/// Registry of every message type a connection can decode.
#[derive(Default)]
pub struct MessageRegistry {
    entries: HashMap<&'static str, RegistryEntry>,
}

impl MessageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `M` under its `TYPE_NAME`.
    ///
    /// Registering a second type under a name that is already taken is a
    /// logic error; it is logged and the later registration wins.
    pub fn register<M: WireMessage>(&mut self) {
        if self.entries.contains_key(M::TYPE_NAME) {
            tracing::error!(
                message_name = M::TYPE_NAME,
                "duplicate message registration, replacing earlier entry"
            );
        }
        self.entries.insert(
            M::TYPE_NAME,
            RegistryEntry {
                type_id: TypeId::of::<M>(),
                type_name: M::TYPE_NAME,
                decode: decode_body::<M>,
            },
        );
    }

    /// Whether `name` has a registered type.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode a body for the type registered under `name`.
    pub(crate) fn decode(&self, name: &str, version: i32, body: &[u8]) -> Result<Decoded> {
        let entry = self.entries.get(name).ok_or_else(|| {
            ErrorInfo::new(ErrorCode::Internal)
                .with_message("unregistered message type")
                .add_pair("message_name", name)
        })?;

        let message = (entry.decode)(body)?;
        Ok(Decoded {
            type_id: entry.type_id,
            type_name: entry.type_name,
            version,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Ping {
        seq: u64,
    }

    impl WireMessage for Ping {
        const TYPE_NAME: &'static str = "test.Ping";
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Pong {
        seq: u64,
        note: String,
    }

    impl WireMessage for Pong {
        const TYPE_NAME: &'static str = "test.Pong";
    }

    #[test]
    fn test_register_and_contains() {
        let mut registry = MessageRegistry::new();
        assert!(registry.is_empty());

        registry.register::<Ping>();
        registry.register::<Pong>();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("test.Ping"));
        assert!(registry.contains("test.Pong"));
        assert!(!registry.contains("test.Missing"));
    }

    #[test]
    fn test_decode_recovers_concrete_type() {
        let mut registry = MessageRegistry::new();
        registry.register::<Ping>();

        let body = encode_body(&Ping { seq: 9 }).unwrap();
        let decoded = registry.decode("test.Ping", 1, &body).unwrap();

        assert_eq!(decoded.type_id, TypeId::of::<Ping>());
        assert_eq!(decoded.type_name, "test.Ping");
        assert_eq!(decoded.version, 1);

        let ping = decoded.message.downcast::<Ping>().unwrap();
        assert_eq!(*ping, Ping { seq: 9 });
    }

    #[test]
    fn test_unknown_name_is_internal_error_with_pair() {
        let registry = MessageRegistry::new();
        let err = registry.decode("test.Unknown", 1, b"").unwrap_err();

        assert_eq!(err.code(), ErrorCode::Internal);
        assert_eq!(
            err.values("message_name").collect::<Vec<_>>(),
            vec!["test.Unknown"]
        );
    }

    #[test]
    fn test_unparseable_body_is_third_party_error() {
        let mut registry = MessageRegistry::new();
        registry.register::<Pong>();

        let err = registry
            .decode("test.Pong", 1, &[0xC1, 0xC1, 0xC1])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ThirdParty);
    }

    #[test]
    fn test_duplicate_registration_last_wins() {
        #[derive(Serialize, Deserialize)]
        struct Impostor {
            other: bool,
        }
        impl WireMessage for Impostor {
            const TYPE_NAME: &'static str = "test.Ping";
        }

        let mut registry = MessageRegistry::new();
        registry.register::<Ping>();
        registry.register::<Impostor>();
        assert_eq!(registry.len(), 1);

        let body = encode_body(&Impostor { other: true }).unwrap();
        let decoded = registry.decode("test.Ping", 1, &body).unwrap();
        assert_eq!(decoded.type_id, TypeId::of::<Impostor>());
    }

    #[test]
    fn test_body_roundtrip_uses_named_fields() {
        let body = encode_body(&Pong {
            seq: 3,
            note: "ok".into(),
        })
        .unwrap();
        // Named-map encoding carries field names on the wire.
        let as_text = String::from_utf8_lossy(&body);
        assert!(as_text.contains("seq"));
        assert!(as_text.contains("note"));
    }
}
