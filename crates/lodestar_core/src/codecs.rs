//! Default message types and codecs.
//!
//! Every node registers codecs for [`DataQuery`] and [`ImmutableJson`]. More
//! codecs can be named in [`Options::event_bus_codecs`](crate::options::Options::event_bus_codecs)
//! and are resolved through a [`CodecFactories`] table.

use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use lodestar_runtime::bus::{BusError, CodecFactories, EventBus, MessageCodec, RegisteredCodec};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type key of [`DataQuery`] in codec configuration.
pub const DATA_QUERY_TYPE: &str = "DataQuery";
/// Codec name of [`DataQueryCodec`].
pub const DATA_QUERY_CODEC: &str = "lodestar.dataQuery";
/// Type key of [`ImmutableJson`] in codec configuration.
pub const IMMUTABLE_JSON_TYPE: &str = "ImmutableJson";
/// Codec name of [`ImmutableJsonCodec`].
pub const IMMUTABLE_JSON_CODEC: &str = "lodestar.immutableJson";

// ─────────────────────────────────────────────────────────────────────────────
// DataQuery
// ─────────────────────────────────────────────────────────────────────────────

/// A request for data: a URI path, a raw query string and headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQuery {
    /// Path of the requested resource.
    pub uri_path: String,
    /// Raw query string without the leading `?`.
    pub query: String,
    /// Request headers, one name may carry several values.
    pub headers: BTreeMap<String, Vec<String>>,
}

impl DataQuery {
    /// Creates a query for `uri_path`.
    #[must_use]
    pub fn new(uri_path: impl Into<String>) -> Self {
        Self {
            uri_path: uri_path.into(),
            ..Self::default()
        }
    }

    /// Sets the raw query string.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Adds a header value.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(name.into()).or_default().push(value.into());
        self
    }

    /// Returns every value of query parameter `name`.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Vec<&str> {
        self.query
            .split('&')
            .filter_map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (key == name).then_some(value)
            })
            .collect()
    }

    /// Returns the first value of header `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// JSON codec of [`DataQuery`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DataQueryCodec;

impl MessageCodec<DataQuery> for DataQueryCodec {
    fn name(&self) -> &str {
        DATA_QUERY_CODEC
    }

    fn encode(&self, body: &DataQuery) -> Result<Vec<u8>, BusError> {
        serde_json::to_vec(body).map_err(|err| BusError::Codec {
            codec: DATA_QUERY_CODEC.to_string(),
            reason: err.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<DataQuery, BusError> {
        serde_json::from_slice(bytes).map_err(|err| BusError::Codec {
            codec: DATA_QUERY_CODEC.to_string(),
            reason: err.to_string(),
        })
    }

    fn transform(&self, body: &DataQuery) -> Result<DataQuery, BusError> {
        Ok(body.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ImmutableJson
// ─────────────────────────────────────────────────────────────────────────────

/// A JSON value that cannot change after creation.
///
/// Local delivery shares the value instead of copying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImmutableJson(Arc<Value>);

impl ImmutableJson {
    /// Freezes `value`.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(Arc::new(value))
    }

    /// Returns the value.
    #[must_use]
    pub fn get(&self) -> &Value {
        &self.0
    }

    /// Returns true if both share the same allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Value> for ImmutableJson {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

/// Codec of [`ImmutableJson`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmutableJsonCodec;

impl MessageCodec<ImmutableJson> for ImmutableJsonCodec {
    fn name(&self) -> &str {
        IMMUTABLE_JSON_CODEC
    }

    fn encode(&self, body: &ImmutableJson) -> Result<Vec<u8>, BusError> {
        serde_json::to_vec(body.get()).map_err(|err| BusError::Codec {
            codec: IMMUTABLE_JSON_CODEC.to_string(),
            reason: err.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<ImmutableJson, BusError> {
        serde_json::from_slice(bytes)
            .map(ImmutableJson::new)
            .map_err(|err| BusError::Codec {
                codec: IMMUTABLE_JSON_CODEC.to_string(),
                reason: err.to_string(),
            })
    }

    fn transform(&self, body: &ImmutableJson) -> Result<ImmutableJson, BusError> {
        Ok(body.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registration
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the built-in codecs every node registers.
#[must_use]
pub fn default_codecs() -> Vec<RegisteredCodec> {
    vec![
        RegisteredCodec::of::<DataQuery, _>(DataQueryCodec),
        RegisteredCodec::of::<ImmutableJson, _>(ImmutableJsonCodec),
    ]
}

/// Returns a codec table that knows the built-in codecs.
#[must_use]
pub fn default_codec_factories() -> CodecFactories {
    let mut factories = CodecFactories::new();
    factories
        .register::<DataQuery, _>(DATA_QUERY_CODEC, DATA_QUERY_TYPE, || DataQueryCodec)
        .register::<ImmutableJson, _>(IMMUTABLE_JSON_CODEC, IMMUTABLE_JSON_TYPE, || {
            ImmutableJsonCodec
        });
    factories
}

/// Registers `codecs` and the configured `(message type, codec name)` pairs on `bus`.
///
/// A codec that fails to resolve or register is logged and skipped. Returns the
/// number of codecs registered.
pub fn register_codecs(
    bus: &EventBus,
    codecs: Vec<RegisteredCodec>,
    factories: &CodecFactories,
    configured: &IndexMap<String, String>,
) -> usize {
    let resolved = configured.iter().map(|(message_type, codec_name)| {
        factories
            .resolve(message_type, codec_name)
            .map_err(|err| (codec_name.clone(), err))
    });
    let all = codecs.into_iter().map(Ok).chain(resolved);

    let mut registered = 0;
    for entry in all {
        let result = entry.and_then(|codec| {
            let name = codec.name().to_string();
            bus.register_codec(codec).map_err(|err| (name, err))
        });
        match result {
            Ok(()) => registered += 1,
            Err((codec, err)) => {
                tracing::warn!(codec = %codec, error = %err, label = err.as_label(), "skipping codec");
            }
        }
    }
    registered
}
