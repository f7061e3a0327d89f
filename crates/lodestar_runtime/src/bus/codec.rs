//! Message codecs.
//!
//! Every body type that travels over the [`EventBus`](super::EventBus) needs a
//! codec. Codecs are typed ([`MessageCodec<T>`]) at the API surface and erased
//! into a [`RegisteredCodec`] when stored on the bus.

use core::any::{Any, TypeId};
use core::marker::PhantomData;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::BusError;

/// Serializes a body type for the bus.
///
/// On local delivery the bus hands each consumer the result of
/// [`transform`](Self::transform), so consumers never share a body instance
/// with the sender.
pub trait MessageCodec<T>: Send + Sync + 'static {
    /// Returns the codec name. Names are unique per bus.
    fn name(&self) -> &str;

    /// Encodes a body to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Codec`] if the body cannot be encoded.
    fn encode(&self, body: &T) -> Result<Vec<u8>, BusError>;

    /// Decodes a body from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Codec`] if the bytes are not a valid body.
    fn decode(&self, bytes: &[u8]) -> Result<T, BusError>;

    /// Produces the copy delivered to a local consumer.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Codec`] if the copy cannot be produced.
    fn transform(&self, body: &T) -> Result<T, BusError> {
        self.decode(&self.encode(body)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JsonCodec
// ─────────────────────────────────────────────────────────────────────────────

/// Serde-based codec for any JSON-serializable body.
///
/// Local delivery clones the body instead of round-tripping through JSON.
pub struct JsonCodec<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Creates a codec with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

impl<T> core::fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JsonCodec").field("name", &self.name).finish()
    }
}

impl<T> MessageCodec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn encode(&self, body: &T) -> Result<Vec<u8>, BusError> {
        serde_json::to_vec(body).map_err(|err| BusError::Codec {
            codec: self.name.clone(),
            reason: err.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, BusError> {
        serde_json::from_slice(bytes).map_err(|err| BusError::Codec {
            codec: self.name.clone(),
            reason: err.to_string(),
        })
    }

    fn transform(&self, body: &T) -> Result<T, BusError> {
        Ok(body.clone())
    }
}

/// Codec for builtin body types that are copied by cloning.
struct CloneCodec<T> {
    name: &'static str,
    encode: fn(&T) -> Result<Vec<u8>, String>,
    decode: fn(&[u8]) -> Result<T, String>,
}

impl<T: Clone + Send + Sync + 'static> MessageCodec<T> for CloneCodec<T> {
    fn name(&self) -> &str {
        self.name
    }

    fn encode(&self, body: &T) -> Result<Vec<u8>, BusError> {
        (self.encode)(body).map_err(|reason| BusError::Codec {
            codec: self.name.to_string(),
            reason,
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, BusError> {
        (self.decode)(bytes).map_err(|reason| BusError::Codec {
            codec: self.name.to_string(),
            reason,
        })
    }

    fn transform(&self, body: &T) -> Result<T, BusError> {
        Ok(body.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RegisteredCodec
// ─────────────────────────────────────────────────────────────────────────────

trait ErasedCodec: Send + Sync {
    fn transform_any(&self, body: &(dyn Any + Send)) -> Result<Box<dyn Any + Send>, BusError>;
}

struct Typed<T, C> {
    codec: C,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C> ErasedCodec for Typed<T, C>
where
    T: Send + 'static,
    C: MessageCodec<T>,
{
    fn transform_any(&self, body: &(dyn Any + Send)) -> Result<Box<dyn Any + Send>, BusError> {
        let body = body
            .downcast_ref::<T>()
            .ok_or_else(|| BusError::Codec {
                codec: self.codec.name().to_string(),
                reason: format!("body is not a {}", core::any::type_name::<T>()),
            })?;
        Ok(Box::new(self.codec.transform(body)?))
    }
}

/// A codec bound to the body type it serializes, ready to be stored on a bus.
#[derive(Clone)]
pub struct RegisteredCodec {
    type_id: TypeId,
    type_name: &'static str,
    name: Arc<str>,
    codec: Arc<dyn ErasedCodec>,
}

impl core::fmt::Debug for RegisteredCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegisteredCodec")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .finish()
    }
}

impl RegisteredCodec {
    /// Binds `codec` to the body type `T`.
    #[must_use]
    pub fn of<T, C>(codec: C) -> Self
    where
        T: Send + 'static,
        C: MessageCodec<T>,
    {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: core::any::type_name::<T>(),
            name: codec.name().into(),
            codec: Arc::new(Typed {
                codec,
                _marker: PhantomData,
            }),
        }
    }

    /// Returns the codec name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the Rust type name of the body type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub(crate) fn transform(
        &self,
        body: &(dyn Any + Send),
    ) -> Result<Box<dyn Any + Send>, BusError> {
        self.codec.transform_any(body)
    }
}

pub(crate) fn builtin_codecs() -> Vec<RegisteredCodec> {
    vec![
        RegisteredCodec::of::<String, _>(CloneCodec::<String> {
            name: "string",
            encode: |body| Ok(body.as_bytes().to_vec()),
            decode: |bytes| String::from_utf8(bytes.to_vec()).map_err(|err| err.to_string()),
        }),
        RegisteredCodec::of::<Vec<u8>, _>(CloneCodec::<Vec<u8>> {
            name: "bytes",
            encode: |body| Ok(body.clone()),
            decode: |bytes| Ok(bytes.to_vec()),
        }),
        RegisteredCodec::of::<serde_json::Value, _>(CloneCodec::<serde_json::Value> {
            name: "json",
            encode: |body| serde_json::to_vec(body).map_err(|err| err.to_string()),
            decode: |bytes| serde_json::from_slice(bytes).map_err(|err| err.to_string()),
        }),
        RegisteredCodec::of::<(), _>(CloneCodec::<()> {
            name: "unit",
            encode: |_| Ok(Vec::new()),
            decode: |_| Ok(()),
        }),
    ]
}

// ─────────────────────────────────────────────────────────────────────────────
// CodecFactories
// ─────────────────────────────────────────────────────────────────────────────

struct CodecFactory {
    type_key: String,
    build: Arc<dyn Fn() -> RegisteredCodec + Send + Sync>,
}

/// Lookup table of codecs that configuration can refer to by name.
///
/// Each entry maps a codec name to the message type key it serializes and a
/// constructor. Configuration supplies `(type key, codec name)` pairs which
/// are resolved with [`resolve`](Self::resolve).
#[derive(Default)]
pub struct CodecFactories {
    factories: HashMap<String, CodecFactory>,
}

impl core::fmt::Debug for CodecFactories {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

impl CodecFactories {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a codec constructor under `codec_name` for the message type `type_key`.
    ///
    /// A later registration with the same codec name replaces the earlier one.
    pub fn register<T, C>(
        &mut self,
        codec_name: impl Into<String>,
        type_key: impl Into<String>,
        ctor: impl Fn() -> C + Send + Sync + 'static,
    ) -> &mut Self
    where
        T: Send + 'static,
        C: MessageCodec<T>,
    {
        self.factories.insert(
            codec_name.into(),
            CodecFactory {
                type_key: type_key.into(),
                build: Arc::new(move || RegisteredCodec::of::<T, C>(ctor())),
            },
        );
        self
    }

    /// Builds the codec named `codec_name`, checking it serializes `type_key`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownCodec`] if no codec has that name, or
    /// [`BusError::CodecMismatch`] if it serializes a different message type.
    pub fn resolve(&self, type_key: &str, codec_name: &str) -> Result<RegisteredCodec, BusError> {
        let factory = self
            .factories
            .get(codec_name)
            .ok_or_else(|| BusError::UnknownCodec(codec_name.to_string()))?;
        if factory.type_key != type_key {
            return Err(BusError::CodecMismatch {
                codec: codec_name.to_string(),
                expected: factory.type_key.clone(),
                actual: type_key.to_string(),
            });
        }
        Ok((factory.build)())
    }

    /// Returns true if a codec with this name is registered.
    #[must_use]
    pub fn contains(&self, codec_name: &str) -> bool {
        self.factories.contains_key(codec_name)
    }
}
