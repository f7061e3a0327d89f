//! The web-serving unit.

use core::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use lodestar_hooks::context::{CorrelationId, HookContext};
use lodestar_hooks::phase::OncePerRequest;
use lodestar_hooks::registry::HookRegistry;
use lodestar_runtime::verticle::{Verticle, VerticleContext, VerticleError};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};

/// Local map in which a started server records its bound port under `"port"`.
pub const SERVER_MAP_NAME: &str = "lodestar.server";

/// What a connection handler and per-request hooks learn about a connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Remote address.
    pub peer: SocketAddr,
    /// Correlation id assigned to the connection.
    pub correlation_id: CorrelationId,
}

/// Serves one accepted connection.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Handles `stream` until the exchange is complete.
    async fn handle(&self, stream: TcpStream, info: ConnectionInfo) -> io::Result<()>;
}

/// Closes every connection immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosingConnectionHandler;

#[async_trait]
impl ConnectionHandler for ClosingConnectionHandler {
    async fn handle(&self, stream: TcpStream, _info: ConnectionInfo) -> io::Result<()> {
        drop(stream);
        Ok(())
    }
}

/// Accepts TCP connections and hands each to a [`ConnectionHandler`].
///
/// Before the handler runs, every [`OncePerRequest`] hook executes with the
/// [`ConnectionInfo`] as payload; a failing hook closes the connection.
pub struct ServerVerticle {
    port: u16,
    handler: Arc<dyn ConnectionHandler>,
    hooks: Option<Arc<HookRegistry>>,
}

impl fmt::Debug for ServerVerticle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerVerticle")
            .field("port", &self.port)
            .field("hooks", &self.hooks.is_some())
            .finish_non_exhaustive()
    }
}

impl ServerVerticle {
    /// Listens on `port` (`0` picks a free port).
    #[must_use]
    pub fn new(port: u16, handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            port,
            handler,
            hooks: None,
        }
    }

    /// Runs per-request hooks from `hooks`.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = Some(hooks);
        self
    }
}

async fn serve(
    stream: TcpStream,
    info: ConnectionInfo,
    handler: Arc<dyn ConnectionHandler>,
    hooks: Option<Arc<HookRegistry>>,
) {
    let started = Instant::now();
    if let Some(hooks) = hooks {
        let context = HookContext::of::<OncePerRequest>(info.correlation_id.clone())
            .with_payload(Arc::new(info.clone()));
        let outcome = hooks.execute_hooks(context).await;
        if !outcome.is_success() {
            for (hook, error) in outcome.failures() {
                tracing::warn!(correlation_id = %info.correlation_id, peer = %info.peer, hook, error = %error, "request hook failed, closing connection");
            }
            return;
        }
    }

    let correlation_id = info.correlation_id.clone();
    let peer = info.peer;
    let result = handler.handle(stream, info).await;
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match result {
        Ok(()) => tracing::info!(
            correlation_id = %correlation_id,
            peer = %peer,
            elapsed_ms,
            "served connection"
        ),
        Err(err) => tracing::warn!(
            correlation_id = %correlation_id,
            peer = %peer,
            elapsed_ms,
            error = %err,
            "connection failed"
        ),
    }
}

#[async_trait]
impl Verticle for ServerVerticle {
    fn name(&self) -> &str {
        "ServerVerticle"
    }

    async fn start(&self, ctx: &VerticleContext) -> Result<(), VerticleError> {
        let listener = TcpListener::bind(("0.0.0.0", self.port)).await.map_err(|err| VerticleError::Start {
            verticle: self.name().to_string(),
            reason: format!("cannot bind port {}: {err}", self.port),
        })?;
        let bound = listener.local_addr()?;
        ctx.runtime()
            .shared_data()
            .local_map(SERVER_MAP_NAME)
            .insert("port", json!(bound.port()));
        tracing::info!(port = bound.port(), deployment = %ctx.deployment_id(), "server listening");

        let handler = Arc::clone(&self.handler);
        let hooks = self.hooks.clone();
        let cancellation = ctx.cancellation().clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    () = cancellation.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        let info = ConnectionInfo {
                            peer,
                            correlation_id: CorrelationId::random(),
                        };
                        tokio::spawn(serve(stream, info, Arc::clone(&handler), hooks.clone()));
                    }
                    Err(err) => tracing::warn!(error = %err, "failed to accept connection"),
                }
            }
            tracing::debug!(port = bound.port(), "server stopped");
        });
        Ok(())
    }
}
