//! Delivery interceptors.

use std::collections::BTreeMap;

/// Which side of a delivery an interceptor observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Runs before a consumer handler is invoked.
    Inbound,
    /// Runs on the sender's side before dispatch.
    Outbound,
}

impl Direction {
    /// Returns a short label for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// The kind of delivery being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryKind {
    /// Point-to-point delivery to one consumer.
    Send,
    /// Delivery to every consumer of an address.
    Publish,
    /// Point-to-point delivery expecting a reply.
    Request,
}

impl DeliveryKind {
    /// Returns a short label for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryKind::Send => "send",
            DeliveryKind::Publish => "publish",
            DeliveryKind::Request => "request",
        }
    }
}

/// What an interceptor sees of a delivery.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryContext<'a> {
    /// Which side of the delivery this is.
    pub direction: Direction,
    /// The kind of delivery.
    pub kind: DeliveryKind,
    /// Target address.
    pub address: &'a str,
    /// Message headers.
    pub headers: &'a BTreeMap<String, String>,
    /// Rust type name of the body.
    pub body_type: &'static str,
}

/// Observes deliveries on the bus.
///
/// Interceptors cannot alter or drop a message. They run synchronously on the
/// delivering task and must not block.
pub trait Interceptor: Send + Sync + 'static {
    /// Called once per delivery and direction.
    fn intercept(&self, ctx: &DeliveryContext<'_>);
}

impl<F> Interceptor for F
where
    F: Fn(&DeliveryContext<'_>) + Send + Sync + 'static,
{
    fn intercept(&self, ctx: &DeliveryContext<'_>) {
        self(ctx);
    }
}
