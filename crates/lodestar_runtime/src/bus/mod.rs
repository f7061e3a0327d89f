//! In-process event bus.
//!
//! The [`EventBus`] routes messages by address. Consumers register a handler
//! for an address; senders deliver to one consumer ([`send`](EventBus::send),
//! round-robin), to all consumers ([`publish`](EventBus::publish)) or to one
//! consumer while awaiting a reply ([`request`](EventBus::request)).
//!
//! # Codecs
//!
//! Bodies are arbitrary `Send + 'static` values. Each body type needs a
//! default codec registered with [`register_default_codec`](EventBus::register_default_codec);
//! `String`, `Vec<u8>`, `serde_json::Value` and `()` are registered on every bus.
//! Consumers receive the codec's [`transform`](MessageCodec::transform)ed copy
//! of the sender's body.
//!
//! # Handlers
//!
//! Handlers are invoked synchronously on the delivering task and must not
//! block. Handlers that need to await spawn a task and move the [`Message`]
//! into it.
//!
//! # Example
//!
//! ```
//! use lodestar_runtime::bus::EventBus;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bus = EventBus::new();
//! bus.consumer("greeter", |mut msg| {
//!     let name = msg.body::<String>().cloned().unwrap_or_default();
//!     msg.reply(format!("hello {name}"));
//! });
//!
//! let reply: String = bus.request("greeter", "world".to_string()).await.unwrap();
//! assert_eq!(reply, "hello world");
//! # }
//! ```

mod codec;
mod interceptor;

pub use codec::{CodecFactories, JsonCodec, MessageCodec, RegisteredCodec};
pub use interceptor::{DeliveryContext, DeliveryKind, Direction, Interceptor};

use core::any::{Any, TypeId};
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use parking_lot::RwLock;
use tokio::sync::oneshot;

/// How long [`EventBus::request`] waits for a reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised by the event bus.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    /// The body type has no registered codec.
    #[error("no codec registered for body type '{type_name}'")]
    NoCodec {
        /// Rust type name of the body.
        type_name: &'static str,
    },

    /// Nobody consumes the address.
    #[error("no handlers registered for address '{0}'")]
    NoHandlers(String),

    /// The body type already has a default codec.
    #[error("codec '{existing}' is already registered for body type '{type_name}'")]
    CodecAlreadyRegistered {
        /// Rust type name of the body.
        type_name: &'static str,
        /// Name of the codec already registered.
        existing: String,
    },

    /// Another body type already uses this codec name.
    #[error("codec name '{0}' is already in use")]
    CodecNameTaken(String),

    /// A codec failed to encode, decode or copy a body.
    #[error("codec '{codec}' failed: {reason}")]
    Codec {
        /// The failing codec.
        codec: String,
        /// What went wrong.
        reason: String,
    },

    /// No codec factory has this name.
    #[error("unknown codec '{0}'")]
    UnknownCodec(String),

    /// A codec factory serializes another message type than configured.
    #[error("codec '{codec}' serializes '{expected}', not '{actual}'")]
    CodecMismatch {
        /// The codec name.
        codec: String,
        /// The message type the codec serializes.
        expected: String,
        /// The message type it was configured for.
        actual: String,
    },

    /// The consumer failed the request or never answered it.
    #[error("request to '{address}' failed: {reason}")]
    ReplyFailure {
        /// Request address.
        address: String,
        /// Failure reason.
        reason: String,
    },

    /// No reply arrived in time.
    #[error("request to '{address}' timed out after {after:?}")]
    Timeout {
        /// Request address.
        address: String,
        /// The elapsed timeout.
        after: Duration,
    },

    /// The reply body has an unexpected type.
    #[error("reply from '{address}' is not a {expected}")]
    ReplyType {
        /// Request address.
        address: String,
        /// The type the requester expected.
        expected: &'static str,
    },
}

impl BusError {
    /// Returns a short label for logs.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::NoCodec { .. } => "no_codec",
            BusError::NoHandlers(_) => "no_handlers",
            BusError::CodecAlreadyRegistered { .. } => "codec_already_registered",
            BusError::CodecNameTaken(_) => "codec_name_taken",
            BusError::Codec { .. } => "codec",
            BusError::UnknownCodec(_) => "unknown_codec",
            BusError::CodecMismatch { .. } => "codec_mismatch",
            BusError::ReplyFailure { .. } => "reply_failure",
            BusError::Timeout { .. } => "timeout",
            BusError::ReplyType { .. } => "reply_type",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message
// ─────────────────────────────────────────────────────────────────────────────

type ReplySender = oneshot::Sender<Result<Box<dyn Any + Send>, String>>;

/// A message delivered to a consumer.
pub struct Message {
    address: String,
    headers: BTreeMap<String, String>,
    body: Box<dyn Any + Send>,
    body_type: &'static str,
    reply: Option<ReplySender>,
}

impl core::fmt::Debug for Message {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Message")
            .field("address", &self.address)
            .field("headers", &self.headers)
            .field("body_type", &self.body_type)
            .field("expects_reply", &self.reply.is_some())
            .finish()
    }
}

impl Message {
    /// Returns the address the message was sent to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns all headers.
    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Returns a single header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Returns the Rust type name of the body.
    #[must_use]
    pub fn body_type(&self) -> &'static str {
        self.body_type
    }

    /// Returns the body if it is a `T`.
    #[must_use]
    pub fn body<T: 'static>(&self) -> Option<&T> {
        self.body.downcast_ref::<T>()
    }

    /// Returns true if the sender awaits a reply that was not given yet.
    #[must_use]
    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Answers the request. Returns false if no requester is waiting.
    pub fn reply<R: Send + 'static>(&mut self, body: R) -> bool {
        match self.reply.take() {
            Some(tx) => tx.send(Ok(Box::new(body))).is_ok(),
            None => false,
        }
    }

    /// Fails the request. Returns false if no requester is waiting.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        match self.reply.take() {
            Some(tx) => tx.send(Err(reason.into())).is_ok(),
            None => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EventBus
// ─────────────────────────────────────────────────────────────────────────────

type Handler = Arc<dyn Fn(Message) + Send + Sync>;

#[derive(Default)]
struct Consumers {
    entries: Vec<(u64, Handler)>,
    cursor: usize,
}

struct BusInner {
    codecs: RwLock<HashMap<TypeId, RegisteredCodec>>,
    consumers: RwLock<HashMap<String, Consumers>>,
    inbound: RwLock<Vec<Arc<dyn Interceptor>>>,
    outbound: RwLock<Vec<Arc<dyn Interceptor>>>,
    next_consumer_id: AtomicU64,
}

impl core::fmt::Debug for BusInner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BusInner").finish_non_exhaustive()
    }
}

/// Address-based message bus of one runtime handle.
///
/// Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl core::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventBus")
            .field("codecs", &self.inner.codecs.read().len())
            .field("addresses", &self.inner.consumers.read().len())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus with the builtin codecs registered.
    #[must_use]
    pub fn new() -> Self {
        let codecs = codec::builtin_codecs()
            .into_iter()
            .map(|codec| (codec.type_id(), codec))
            .collect();
        Self {
            inner: Arc::new(BusInner {
                codecs: RwLock::new(codecs),
                consumers: RwLock::new(HashMap::new()),
                inbound: RwLock::new(Vec::new()),
                outbound: RwLock::new(Vec::new()),
                next_consumer_id: AtomicU64::new(0),
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Codecs
    // ─────────────────────────────────────────────────────────────────────

    /// Registers the default codec for body type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::CodecAlreadyRegistered`] if `T` already has a codec,
    /// or [`BusError::CodecNameTaken`] if the codec name is in use.
    pub fn register_default_codec<T: Send + 'static>(
        &self,
        codec: impl MessageCodec<T>,
    ) -> Result<(), BusError> {
        self.register_codec(RegisteredCodec::of::<T, _>(codec))
    }

    /// Registers an already type-bound codec.
    ///
    /// # Errors
    ///
    /// Same as [`register_default_codec`](Self::register_default_codec).
    pub fn register_codec(&self, codec: RegisteredCodec) -> Result<(), BusError> {
        let mut codecs = self.inner.codecs.write();
        if let Some(existing) = codecs.get(&codec.type_id()) {
            return Err(BusError::CodecAlreadyRegistered {
                type_name: codec.type_name(),
                existing: existing.name().to_string(),
            });
        }
        if codecs.values().any(|other| other.name() == codec.name()) {
            return Err(BusError::CodecNameTaken(codec.name().to_string()));
        }
        tracing::debug!(codec = codec.name(), body_type = codec.type_name(), "registered default codec");
        codecs.insert(codec.type_id(), codec);
        Ok(())
    }

    /// Returns true if body type `T` has a codec.
    #[must_use]
    pub fn has_codec<T: 'static>(&self) -> bool {
        self.inner.codecs.read().contains_key(&TypeId::of::<T>())
    }

    /// Returns the names of all registered codecs.
    #[must_use]
    pub fn codec_names(&self) -> Vec<String> {
        self.inner
            .codecs
            .read()
            .values()
            .map(|codec| codec.name().to_string())
            .collect()
    }

    fn codec_for<T: 'static>(&self) -> Result<RegisteredCodec, BusError> {
        self.inner
            .codecs
            .read()
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or(BusError::NoCodec {
                type_name: core::any::type_name::<T>(),
            })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Consumers
    // ─────────────────────────────────────────────────────────────────────

    /// Registers a handler for `address`.
    ///
    /// The handler stays registered until [`ConsumerRegistration::unregister`]
    /// is called; dropping the registration does not remove it.
    pub fn consumer<F>(&self, address: impl Into<String>, handler: F) -> ConsumerRegistration
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let address = address.into();
        let id = self.inner.next_consumer_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .consumers
            .write()
            .entry(address.clone())
            .or_default()
            .entries
            .push((id, Arc::new(handler)));

        ConsumerRegistration {
            address,
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Returns the number of handlers registered for `address`.
    #[must_use]
    pub fn consumer_count(&self, address: &str) -> usize {
        self.inner
            .consumers
            .read()
            .get(address)
            .map_or(0, |consumers| consumers.entries.len())
    }

    fn next_handler(&self, address: &str) -> Option<Handler> {
        let mut consumers = self.inner.consumers.write();
        let entry = consumers.get_mut(address)?;
        if entry.entries.is_empty() {
            return None;
        }
        let index = entry.cursor % entry.entries.len();
        entry.cursor = entry.cursor.wrapping_add(1);
        Some(Arc::clone(&entry.entries[index].1))
    }

    fn all_handlers(&self, address: &str) -> Vec<Handler> {
        self.inner
            .consumers
            .read()
            .get(address)
            .map(|consumers| {
                consumers
                    .entries
                    .iter()
                    .map(|(_, handler)| Arc::clone(handler))
                    .collect()
            })
            .unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Interceptors
    // ─────────────────────────────────────────────────────────────────────

    /// Adds an interceptor that runs before each handler invocation.
    pub fn add_inbound_interceptor(&self, interceptor: impl Interceptor) {
        self.inner.inbound.write().push(Arc::new(interceptor));
    }

    /// Adds an interceptor that runs on the sender's side before dispatch.
    pub fn add_outbound_interceptor(&self, interceptor: impl Interceptor) {
        self.inner.outbound.write().push(Arc::new(interceptor));
    }

    /// Returns the number of interceptors installed for `direction`.
    #[must_use]
    pub fn interceptor_count(&self, direction: Direction) -> usize {
        match direction {
            Direction::Inbound => self.inner.inbound.read().len(),
            Direction::Outbound => self.inner.outbound.read().len(),
        }
    }

    fn intercept(
        &self,
        direction: Direction,
        kind: DeliveryKind,
        address: &str,
        headers: &BTreeMap<String, String>,
        body_type: &'static str,
    ) {
        let interceptors = match direction {
            Direction::Inbound => self.inner.inbound.read().clone(),
            Direction::Outbound => self.inner.outbound.read().clone(),
        };
        if interceptors.is_empty() {
            return;
        }
        let ctx = DeliveryContext {
            direction,
            kind,
            address,
            headers,
            body_type,
        };
        for interceptor in &interceptors {
            interceptor.intercept(&ctx);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Delivery
    // ─────────────────────────────────────────────────────────────────────

    /// Delivers `body` to one consumer of `address`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NoCodec`] if `T` has no codec, or
    /// [`BusError::NoHandlers`] if nobody consumes the address.
    pub fn send<T: Send + 'static>(&self, address: &str, body: T) -> Result<(), BusError> {
        self.send_with(address, body, BTreeMap::new())
    }

    /// Like [`send`](Self::send), with headers.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub fn send_with<T: Send + 'static>(
        &self,
        address: &str,
        body: T,
        headers: BTreeMap<String, String>,
    ) -> Result<(), BusError> {
        self.deliver_one(address, body, headers, DeliveryKind::Send, None)
    }

    /// Delivers `body` to every consumer of `address` and returns how many received it.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NoCodec`] if `T` has no codec.
    pub fn publish<T: Send + 'static>(&self, address: &str, body: T) -> Result<usize, BusError> {
        let codec = self.codec_for::<T>()?;
        let body_type = core::any::type_name::<T>();
        let headers = BTreeMap::new();
        self.intercept(Direction::Outbound, DeliveryKind::Publish, address, &headers, body_type);

        let handlers = self.all_handlers(address);
        let body: &(dyn Any + Send) = &body;
        for handler in &handlers {
            let copy = codec.transform(body)?;
            self.intercept(Direction::Inbound, DeliveryKind::Publish, address, &headers, body_type);
            handler(Message {
                address: address.to_string(),
                headers: headers.clone(),
                body: copy,
                body_type,
                reply: None,
            });
        }
        Ok(handlers.len())
    }

    /// Delivers `body` to one consumer of `address` and awaits its reply.
    ///
    /// Waits at most [`DEFAULT_REQUEST_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Besides the [`send`](Self::send) errors, returns [`BusError::ReplyFailure`]
    /// if the consumer failed or dropped the request, [`BusError::Timeout`] if no
    /// reply arrived in time, or [`BusError::ReplyType`] if the reply is not an `R`.
    pub async fn request<T, R>(&self, address: &str, body: T) -> Result<R, BusError>
    where
        T: Send + 'static,
        R: 'static,
    {
        self.request_with_timeout(address, body, DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    /// Like [`request`](Self::request), with an explicit timeout.
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request).
    pub async fn request_with_timeout<T, R>(
        &self,
        address: &str,
        body: T,
        timeout: Duration,
    ) -> Result<R, BusError>
    where
        T: Send + 'static,
        R: 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.deliver_one(address, body, BTreeMap::new(), DeliveryKind::Request, Some(tx))?;

        let reply = tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| BusError::Timeout {
                address: address.to_string(),
                after: timeout,
            })?
            .map_err(|_| BusError::ReplyFailure {
                address: address.to_string(),
                reason: "the consumer dropped the request without replying".to_string(),
            })?;

        let body = reply.map_err(|reason| BusError::ReplyFailure {
            address: address.to_string(),
            reason,
        })?;
        body.downcast::<R>()
            .map(|body| *body)
            .map_err(|_| BusError::ReplyType {
                address: address.to_string(),
                expected: core::any::type_name::<R>(),
            })
    }

    fn deliver_one<T: Send + 'static>(
        &self,
        address: &str,
        body: T,
        headers: BTreeMap<String, String>,
        kind: DeliveryKind,
        reply: Option<ReplySender>,
    ) -> Result<(), BusError> {
        let codec = self.codec_for::<T>()?;
        let body_type = core::any::type_name::<T>();
        self.intercept(Direction::Outbound, kind, address, &headers, body_type);

        let handler = self
            .next_handler(address)
            .ok_or_else(|| BusError::NoHandlers(address.to_string()))?;
        let body: &(dyn Any + Send) = &body;
        let copy = codec.transform(body)?;

        self.intercept(Direction::Inbound, kind, address, &headers, body_type);
        handler(Message {
            address: address.to_string(),
            headers,
            body: copy,
            body_type,
            reply,
        });
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConsumerRegistration
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to a registered consumer.
#[derive(Debug)]
pub struct ConsumerRegistration {
    address: String,
    id: u64,
    bus: Weak<BusInner>,
}

impl ConsumerRegistration {
    /// Returns the consumed address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Removes the handler. Returns false if it was already gone.
    pub fn unregister(self) -> bool {
        let Some(bus) = self.bus.upgrade() else {
            return false;
        };
        let mut consumers = bus.consumers.write();
        let Some(entry) = consumers.get_mut(&self.address) else {
            return false;
        };
        let before = entry.entries.len();
        entry.entries.retain(|(id, _)| *id != self.id);
        let removed = entry.entries.len() != before;
        if entry.entries.is_empty() {
            consumers.remove(&self.address);
        }
        removed
    }
}
