// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 bitrpc-team

//! Process-global type-handler registry.
//!
//! Two mappings keyed by (a) native type identity and (b) wire hash code.
//! Built-in handlers populate on first access; generated struct codecs
//! register themselves at startup via [`register_message`]. Lookups take a
//! short mutex hold and are off the per-byte hot path (object framing
//! only).

use super::message::{Message, Timestamp, Vec3};
use super::reader::StreamReader;
use super::writer::StreamWriter;
use super::{CodecError, Result, NULL_SENTINEL, RESERVED_HASH_MAX};
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

/// Codec for one user type, keyed by a 32-bit wire hash code.
pub trait TypeHandler: Send + Sync {
    /// Stable wire identifier persisted by `write_object`
    fn hash_code(&self) -> i32;

    /// Encode a value of the handled type
    ///
    /// # Errors
    ///
    /// `CodecError::HandlerMismatch` when `value` is not the handled type.
    fn write(&self, value: &dyn Any, writer: &mut StreamWriter) -> Result<()>;

    /// Decode a value of the handled type
    fn read(&self, reader: &mut StreamReader<'_>) -> Result<Box<dyn Any + Send>>;

    /// True when the type-erased value equals the type's default
    fn is_default(&self, value: &dyn Any) -> bool;
}

/// Generic handler adapting any [`Message`] into a [`TypeHandler`].
///
/// Built-in scalars and generated structs go through the same adapter;
/// the open table in the registry is the only polymorphism mechanism.
pub struct MessageHandler<T: Message> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: Message> MessageHandler<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: Message> Default for MessageHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Message> TypeHandler for MessageHandler<T> {
    fn hash_code(&self) -> i32 {
        T::type_hash()
    }

    fn write(&self, value: &dyn Any, writer: &mut StreamWriter) -> Result<()> {
        let typed = value
            .downcast_ref::<T>()
            .ok_or(CodecError::HandlerMismatch(std::any::type_name::<T>()))?;
        typed.encode(writer);
        Ok(())
    }

    fn read(&self, reader: &mut StreamReader<'_>) -> Result<Box<dyn Any + Send>> {
        Ok(Box::new(T::decode(reader)?))
    }

    fn is_default(&self, value: &dyn Any) -> bool {
        value.downcast_ref::<T>().is_some_and(Message::is_default)
    }
}

/// Registry state behind one mutex (both maps change together).
#[derive(Default)]
struct Tables {
    by_type: HashMap<TypeId, Arc<dyn TypeHandler>>,
    by_code: HashMap<i32, Arc<dyn TypeHandler>>,
    code_owner: HashMap<i32, TypeId>,
}

/// Process-global handler registry.
pub struct HandlerRegistry {
    tables: Mutex<Tables>,
}

impl HandlerRegistry {
    fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Register a handler for `T`.
    ///
    /// Re-registering the same type overwrites the previous handler and
    /// releases its old hash code. Registering a distinct type under an
    /// already-claimed code is `CodecError::DuplicateHashCode`.
    pub fn register<T: Any>(&self, handler: Arc<dyn TypeHandler>) -> Result<()> {
        self.register_keyed(TypeId::of::<T>(), handler)
    }

    fn register_keyed(&self, type_id: TypeId, handler: Arc<dyn TypeHandler>) -> Result<()> {
        let code = handler.hash_code();
        let mut tables = self.tables.lock();

        if let Some(owner) = tables.code_owner.get(&code) {
            if *owner != type_id {
                return Err(CodecError::DuplicateHashCode(code));
            }
        }

        // Re-registration of the same type releases its previous code.
        if let Some(old) = tables.by_type.insert(type_id, Arc::clone(&handler)) {
            let old_code = old.hash_code();
            if old_code != code {
                tables.by_code.remove(&old_code);
                tables.code_owner.remove(&old_code);
            }
        }
        tables.by_code.insert(code, handler);
        tables.code_owner.insert(code, type_id);
        Ok(())
    }

    /// Look up the handler for a native type
    ///
    /// # Errors
    ///
    /// `CodecError::HandlerMismatch` when no handler is registered for `T`.
    pub fn handler_for<T: Any>(&self) -> Result<Arc<dyn TypeHandler>> {
        self.tables
            .lock()
            .by_type
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or(CodecError::HandlerMismatch(std::any::type_name::<T>()))
    }

    /// Look up the handler for a wire hash code
    ///
    /// # Errors
    ///
    /// `CodecError::UnknownType` when no handler owns `code`.
    pub fn handler_for_code(&self, code: i32) -> Result<Arc<dyn TypeHandler>> {
        self.tables
            .lock()
            .by_code
            .get(&code)
            .cloned()
            .ok_or(CodecError::UnknownType(code))
    }

    /// True when a handler owns `code`
    #[must_use]
    pub fn has_code(&self, code: i32) -> bool {
        self.tables.lock().by_code.contains_key(&code)
    }

    fn register_builtin<T: Message>(&self) {
        // Built-ins own the reserved range; collisions here are a bug.
        self.register_keyed(TypeId::of::<T>(), Arc::new(MessageHandler::<T>::new()))
            .expect("built-in handler registration");
    }
}

/// The process-global registry with built-ins populated.
///
/// Initialization is idempotent and thread-safe; the first caller pays
/// for built-in registration.
pub fn registry() -> &'static HandlerRegistry {
    static REGISTRY: OnceLock<HandlerRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let reg = HandlerRegistry::new();
        reg.register_builtin::<i32>();
        reg.register_builtin::<i64>();
        reg.register_builtin::<f32>();
        reg.register_builtin::<f64>();
        reg.register_builtin::<bool>();
        reg.register_builtin::<String>();
        reg.register_builtin::<Vec<u8>>();
        reg.register_builtin::<Timestamp>();
        reg.register_builtin::<Vec3>();
        log::debug!("[CODEC] handler registry initialized with built-ins");
        reg
    })
}

/// Register a user message type in the global registry.
///
/// Generated struct codecs call this once at startup. Hash codes inside
/// the reserved built-in range 1..1000 are rejected.
///
/// # Errors
///
/// `CodecError::DuplicateHashCode` on a code collision or a reserved code.
pub fn register_message<T: Message>() -> Result<()> {
    let code = T::type_hash();
    if (1..RESERVED_HASH_MAX).contains(&code) {
        return Err(CodecError::DuplicateHashCode(code));
    }
    registry().register::<T>(Arc::new(MessageHandler::<T>::new()))
}

/// Encode a message body in the `[i32 hash][payload]` form used by
/// request and response bodies.
#[must_use]
pub fn encode_object<T: Message>(value: &T) -> Vec<u8> {
    let mut writer = StreamWriter::new();
    writer.write_message(value);
    writer.into_bytes()
}

/// Decode a `[i32 hash][payload]` body into a concrete message.
///
/// # Errors
///
/// `CodecError::HandlerMismatch` when the leading hash code is not `T`'s
/// (the "handler disagreement" case), plus any decode error from the
/// payload itself.
pub fn decode_object<T: Message>(bytes: &[u8]) -> Result<T> {
    let mut reader = StreamReader::new(bytes);
    let hash_code = reader.read_i32()?;
    if hash_code == NULL_SENTINEL {
        return Err(CodecError::Malformed("null object for typed decode".into()));
    }
    if hash_code != T::type_hash() {
        return Err(CodecError::HandlerMismatch(std::any::type_name::<T>()));
    }
    T::decode(&mut reader)
}

#[cfg(test)]
mod tests {
    use super::*;

    // A stand-in for a generated struct codec.
    #[derive(Debug, Clone, PartialEq, Default)]
    struct Ping {
        seq: i32,
        note: String,
    }

    impl Message for Ping {
        fn type_hash() -> i32 {
            5001
        }

        fn encode(&self, writer: &mut StreamWriter) {
            writer.write_i32(self.seq);
            writer.write_string(&self.note);
        }

        fn decode(reader: &mut StreamReader<'_>) -> Result<Self> {
            Ok(Self {
                seq: reader.read_i32()?,
                note: reader.read_string()?,
            })
        }

        fn is_default(&self) -> bool {
            self.seq == 0 && self.note.is_empty()
        }
    }

    // Distinct type claiming Ping's code, for collision tests.
    struct Imposter;

    impl Message for Imposter {
        fn type_hash() -> i32 {
            5001
        }

        fn encode(&self, _writer: &mut StreamWriter) {}

        fn decode(_reader: &mut StreamReader<'_>) -> Result<Self> {
            Ok(Self)
        }

        fn is_default(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_builtins_resolve_by_code() {
        let reg = registry();
        for code in [101, 102, 103, 104, 105, 106, 107, 201, 202] {
            assert!(reg.has_code(code), "missing built-in handler {code}");
        }
        assert!(!reg.has_code(999));
    }

    #[test]
    fn test_polymorphic_roundtrip_builtin() {
        let mut w = StreamWriter::new();
        w.write_object(Some(&42i32)).expect("write i32 object");
        w.write_object(Some(&"tag".to_string()))
            .expect("write string object");

        let bytes = w.into_bytes();
        let mut r = StreamReader::new(&bytes);

        let value = r.read_object().expect("read").expect("non-null");
        assert_eq!(*value.downcast::<i32>().expect("i32"), 42);

        let value = r.read_object().expect("read").expect("non-null");
        assert_eq!(*value.downcast::<String>().expect("string"), "tag");
    }

    #[test]
    fn test_polymorphic_absence() {
        let mut w = StreamWriter::new();
        w.write_object::<i32>(None).expect("write null");
        let bytes = w.into_bytes();
        assert_eq!(bytes, (-1i32).to_le_bytes());

        let mut r = StreamReader::new(&bytes);
        assert!(r.read_object().expect("read").is_none());
    }

    #[test]
    fn test_unknown_hash_code() {
        let bytes = 31337i32.to_le_bytes();
        let mut r = StreamReader::new(&bytes);
        assert!(matches!(r.read_object(), Err(CodecError::UnknownType(31337))));
    }

    #[test]
    fn test_user_message_roundtrip() {
        register_message::<Ping>().expect("register");

        let ping = Ping {
            seq: 7,
            note: "keepalive".into(),
        };
        let bytes = encode_object(&ping);
        assert_eq!(&bytes[..4], &5001i32.to_le_bytes());

        let decoded: Ping = decode_object(&bytes).expect("decode");
        assert_eq!(decoded, ping);

        // Dynamic path resolves the same handler.
        let mut r = StreamReader::new(&bytes);
        let value = r.read_object().expect("read").expect("non-null");
        assert_eq!(*value.downcast::<Ping>().expect("ping"), ping);
    }

    #[test]
    fn test_reregistration_is_idempotent() {
        register_message::<Ping>().expect("first");
        register_message::<Ping>().expect("second");
    }

    #[test]
    fn test_code_collision_rejected() {
        register_message::<Ping>().expect("ping");
        assert!(matches!(
            register_message::<Imposter>(),
            Err(CodecError::DuplicateHashCode(5001))
        ));
    }

    #[test]
    fn test_reserved_range_rejected() {
        struct Reserved;
        impl Message for Reserved {
            fn type_hash() -> i32 {
                150
            }
            fn encode(&self, _writer: &mut StreamWriter) {}
            fn decode(_reader: &mut StreamReader<'_>) -> Result<Self> {
                Ok(Self)
            }
            fn is_default(&self) -> bool {
                true
            }
        }
        assert!(matches!(
            register_message::<Reserved>(),
            Err(CodecError::DuplicateHashCode(150))
        ));
    }

    #[test]
    fn test_typed_decode_rejects_wrong_hash() {
        register_message::<Ping>().expect("register");
        let bytes = encode_object(&123i32);
        assert!(matches!(
            decode_object::<Ping>(&bytes),
            Err(CodecError::HandlerMismatch(_))
        ));
    }

    #[test]
    fn test_handler_is_default_type_erased() {
        let handler = MessageHandler::<i32>::new();
        assert!(handler.is_default(&0i32));
        assert!(!handler.is_default(&5i32));
        // Wrong type is never "default"
        assert!(!handler.is_default(&"nope"));
    }
}
