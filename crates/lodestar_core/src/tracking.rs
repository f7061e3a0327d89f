//! Message tracking.
//!
//! A [`TrackingStrategy`] observes every delivery on the event bus. The
//! strategy is chosen by name from a [`TrackingStrategies`] table; an unknown
//! name falls back to [`LoggingTrackingStrategy`].

use std::sync::Arc;
use std::time::SystemTime;

use hashbrown::HashMap;
use lodestar_runtime::bus::{DeliveryContext, DeliveryKind, Direction, EventBus, Interceptor};

/// Name of the default strategy.
pub const LOGGING_STRATEGY: &str = "logging";

/// Header carrying the correlation id of a message.
pub const CORRELATION_ID_HEADER: &str = "correlationId";

/// Errors raised while creating a tracking strategy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TrackingError {
    /// No strategy is registered under this name.
    #[error("unknown tracking strategy '{0}'")]
    UnknownStrategy(String),

    /// The strategy constructor failed.
    #[error("failed to create tracking strategy '{strategy}': {reason}")]
    Construction {
        /// The strategy name.
        strategy: String,
        /// Why construction failed.
        reason: String,
    },
}

impl TrackingError {
    /// Returns a short label for logs.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            TrackingError::UnknownStrategy(_) => "unknown_strategy",
            TrackingError::Construction { .. } => "construction",
        }
    }
}

/// What a strategy learns about one delivery.
#[derive(Debug, Clone)]
pub struct TrackingData {
    /// Which side of the delivery this is.
    pub direction: Direction,
    /// The kind of delivery.
    pub kind: DeliveryKind,
    /// Target address.
    pub address: String,
    /// Value of the [`CORRELATION_ID_HEADER`], if present.
    pub correlation_id: Option<String>,
    /// Rust type name of the body.
    pub body_type: &'static str,
    /// When the delivery was observed.
    pub observed_at: SystemTime,
}

impl TrackingData {
    /// Captures a delivery.
    #[must_use]
    pub fn from_delivery(ctx: &DeliveryContext<'_>) -> Self {
        Self {
            direction: ctx.direction,
            kind: ctx.kind,
            address: ctx.address.to_string(),
            correlation_id: ctx.headers.get(CORRELATION_ID_HEADER).cloned(),
            body_type: ctx.body_type,
            observed_at: SystemTime::now(),
        }
    }
}

/// Observes deliveries on the event bus.
pub trait TrackingStrategy: Send + Sync + 'static {
    /// Returns the strategy name.
    fn name(&self) -> &str;

    /// Called before a consumer receives a message.
    fn handle_inbound(&self, data: &TrackingData);

    /// Called when a message is sent, published or requested.
    fn handle_outbound(&self, data: &TrackingData);
}

/// Logs every delivery at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingTrackingStrategy;

impl TrackingStrategy for LoggingTrackingStrategy {
    fn name(&self) -> &str {
        LOGGING_STRATEGY
    }

    fn handle_inbound(&self, data: &TrackingData) {
        tracing::debug!(
            address = %data.address,
            kind = data.kind.as_str(),
            correlation_id = data.correlation_id.as_deref().unwrap_or("-"),
            body_type = data.body_type,
            "inbound message"
        );
    }

    fn handle_outbound(&self, data: &TrackingData) {
        tracing::debug!(
            address = %data.address,
            kind = data.kind.as_str(),
            correlation_id = data.correlation_id.as_deref().unwrap_or("-"),
            body_type = data.body_type,
            "outbound message"
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TrackingStrategies
// ─────────────────────────────────────────────────────────────────────────────

type StrategyFactory =
    Arc<dyn Fn() -> Result<Arc<dyn TrackingStrategy>, TrackingError> + Send + Sync>;

/// Lookup table of tracking strategies by name.
///
/// The table always knows [`LOGGING_STRATEGY`].
#[derive(Clone)]
pub struct TrackingStrategies {
    factories: HashMap<String, StrategyFactory>,
}

impl core::fmt::Debug for TrackingStrategies {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

impl Default for TrackingStrategies {
    fn default() -> Self {
        let mut strategies = Self {
            factories: HashMap::new(),
        };
        strategies.register(LOGGING_STRATEGY, || Ok(Arc::new(LoggingTrackingStrategy)));
        strategies
    }
}

impl TrackingStrategies {
    /// Creates a table holding only the logging strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a strategy constructor under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Result<Arc<dyn TrackingStrategy>, TrackingError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Creates the strategy registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`TrackingError::UnknownStrategy`] if nothing is registered
    /// under `name`, or the constructor's error.
    pub fn create(&self, name: &str) -> Result<Arc<dyn TrackingStrategy>, TrackingError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| TrackingError::UnknownStrategy(name.to_string()))?;
        factory()
    }

    /// Creates the strategy registered under `name`, or the logging strategy if that fails.
    #[must_use]
    pub fn create_or_default(&self, name: &str) -> Arc<dyn TrackingStrategy> {
        match self.create(name) {
            Ok(strategy) => strategy,
            Err(err) => {
                tracing::warn!(
                    strategy = name,
                    error = %err,
                    label = err.as_label(),
                    "falling back to the logging tracking strategy"
                );
                Arc::new(LoggingTrackingStrategy)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TrackingInterceptor
// ─────────────────────────────────────────────────────────────────────────────

/// Bus interceptor that feeds one direction of deliveries to a strategy.
pub struct TrackingInterceptor {
    direction: Direction,
    strategy: Arc<dyn TrackingStrategy>,
}

impl TrackingInterceptor {
    /// Creates an interceptor for `direction`.
    #[must_use]
    pub fn new(direction: Direction, strategy: Arc<dyn TrackingStrategy>) -> Self {
        Self {
            direction,
            strategy,
        }
    }

    /// Adds an inbound and an outbound interceptor for `strategy` to `bus`.
    pub fn install(bus: &EventBus, strategy: &Arc<dyn TrackingStrategy>) {
        bus.add_inbound_interceptor(Self::new(Direction::Inbound, Arc::clone(strategy)));
        bus.add_outbound_interceptor(Self::new(Direction::Outbound, Arc::clone(strategy)));
    }
}

impl Interceptor for TrackingInterceptor {
    fn intercept(&self, ctx: &DeliveryContext<'_>) {
        if ctx.direction != self.direction {
            return;
        }
        let data = TrackingData::from_delivery(ctx);
        match self.direction {
            Direction::Inbound => self.strategy.handle_inbound(&data),
            Direction::Outbound => self.strategy.handle_outbound(&data),
        }
    }
}
