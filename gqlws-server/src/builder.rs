//! Builder and handle for the GraphQL WebSocket server.
//!
//! # Lifecycle
//!
//! ```text
//! GraphQlWsServerBuilder::new(executor)
//!   ├─ into_router()   → axum::Router to serve yourself
//!   └─ start().await   → bind, spawn axum::serve, return ServerHandle
//!        └─ ServerHandle::shutdown().await
//!             ├─ close every WebSocket with 1000 "Server shutting down"
//!             ├─ end every SSE stream
//!             └─ wait for axum's graceful shutdown
//! ```

use std::{
    net::{SocketAddr, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};

use axum::Router as AxumRouter;
use gqlws_executor::{DynExecutor, Executor};
use tokio::{
    net::TcpListener,
    sync::{oneshot, watch},
    task::JoinHandle,
};

use crate::{
    config::{OverflowPolicy, ProtocolConfig},
    connection_manager::ConnectionManager,
    error::{ServerError, ServerResult},
    init::{AcceptAll, ConnectionInitHandler, DynInitHandler},
    server::build_router,
    session::SessionContext,
};

// ════════════════════════════════════════════════════════════════════
// Builder
// ════════════════════════════════════════════════════════════════════

/// Builder for the GraphQL WebSocket server.
///
/// # Example
///
/// ```rust,ignore
/// use gqlws_server::GraphQlWsServer;
///
/// let handle = GraphQlWsServer::new(MyExecutor)
///     .bind("0.0.0.0:4000")
///     .path("/graphql")
///     .with_keep_alive(Some(Duration::from_secs(15)))
///     .start()
///     .await?;
///
/// // ...
/// handle.shutdown().await?;
/// ```
pub struct GraphQlWsServerBuilder {
    bind_addr: SocketAddr,
    ws_path: String,
    sse_path: String,
    executor: DynExecutor,
    init_handler: DynInitHandler,
    config: ProtocolConfig,
    additional_routes: Option<AxumRouter>,
    connections: ConnectionManager,
}

impl GraphQlWsServerBuilder {
    /// Create a new builder.
    ///
    /// Defaults:
    /// - bind address: `0.0.0.0:4000`
    /// - WebSocket path: `/graphql`
    /// - SSE path: `/graphql/stream`
    /// - init handler: accept all
    /// - protocol settings: [`ProtocolConfig::default`]
    pub fn new(executor: impl Executor) -> Self {
        Self::from_dyn(Arc::new(executor))
    }

    /// Create a builder around an already type-erased executor.
    pub fn from_dyn(executor: DynExecutor) -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 4000)),
            ws_path: "/graphql".to_string(),
            sse_path: "/graphql/stream".to_string(),
            executor,
            init_handler: Arc::new(AcceptAll),
            config: ProtocolConfig::default(),
            additional_routes: None,
            connections: ConnectionManager::new(),
        }
    }

    /// Set the TCP address to bind to.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// .bind("127.0.0.1:0")
    /// .bind(([127, 0, 0, 1], 4000))
    /// ```
    pub fn bind(mut self, addr: impl ToSocketAddrs) -> Self {
        if let Some(a) = addr.to_socket_addrs().ok().and_then(|mut i| i.next()) {
            self.bind_addr = a;
        }
        self
    }

    /// Set the URL path of the WebSocket endpoint (default: `"/graphql"`).
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    /// Set the URL path of the SSE endpoint (default: `"/graphql/stream"`).
    pub fn sse_path(mut self, path: impl Into<String>) -> Self {
        self.sse_path = path.into();
        self
    }

    /// Plug in a `connection_init` hook.
    pub fn with_init_handler(mut self, handler: impl ConnectionInitHandler) -> Self {
        self.init_handler = Arc::new(handler);
        self
    }

    /// Time allowed for `connection_init` (default 60 s, `None` = no limit).
    pub fn with_init_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config = self.config.init_timeout(timeout);
        self
    }

    /// Interval of server pings and SSE keep-alive events (default: off).
    pub fn with_keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.config = self.config.keep_alive(interval);
        self
    }

    /// Per-connection outbound buffer in frames (default: 256).
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.config = self.config.outbound_capacity(capacity);
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.config = self.config.overflow_policy(policy);
        self
    }

    /// Replace every protocol setting at once.
    pub fn with_config(mut self, config: ProtocolConfig) -> Self {
        self.config = config;
        self
    }

    /// Mount additional Axum routes (e.g. an HTTP GraphQL endpoint) on the
    /// same server.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use axum::{routing::get, Router};
    ///
    /// let rest = Router::new().route("/api/status", get(status_handler));
    /// let server = GraphQlWsServer::new(executor).with_additional_routes(rest);
    /// ```
    pub fn with_additional_routes(mut self, router: AxumRouter) -> Self {
        self.additional_routes = Some(router);
        self
    }

    /// Connection tracker shared with the router built from this builder.
    pub fn connections(&self) -> ConnectionManager {
        self.connections.clone()
    }

    fn session_ctx(&self, shutdown: watch::Receiver<bool>) -> SessionContext {
        SessionContext {
            executor: self.executor.clone(),
            init_handler: self.init_handler.clone(),
            config: self.config.clone(),
            connections: self.connections.clone(),
            shutdown,
        }
    }

    /// Build the Axum router without starting a listener.
    ///
    /// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` to
    /// expose peer addresses to the init handler.
    pub fn into_router(self) -> AxumRouter {
        // No shutdown source: connections end only on their own.
        let (_, shutdown) = watch::channel(false);
        let ctx = self.session_ctx(shutdown);
        build_router(&self.ws_path, &self.sse_path, ctx, self.additional_routes)
    }

    /// Bind the listener and serve in a background task.
    pub async fn start(self) -> ServerResult<ServerHandle> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.bind_addr,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::LocalAddr { source })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let ctx = self.session_ctx(shutdown_rx);
        let app = build_router(&self.ws_path, &self.sse_path, ctx, self.additional_routes);

        #[cfg(feature = "tracing")]
        tracing::info!("GraphQL WebSocket server listening on {}", local_addr);

        let task = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
        });

        Ok(ServerHandle {
            local_addr,
            connections: self.connections,
            shutdown: shutdown_tx,
            stop: Some(stop_tx),
            task,
        })
    }
}

// ════════════════════════════════════════════════════════════════════
// ServerHandle
// ════════════════════════════════════════════════════════════════════

/// Handle to a running server.
///
/// Dropping the handle leaves the server running in the background.
pub struct ServerHandle {
    local_addr: SocketAddr,
    connections: ConnectionManager,
    shutdown: watch::Sender<bool>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl ServerHandle {
    /// The bound address (useful with port `0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Close every connection and wait for the server to stop.
    pub async fn shutdown(mut self) -> ServerResult<()> {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "GraphQL WebSocket server on {} shutting down ({} connections)",
            self.local_addr,
            self.connections.connection_count()
        );

        self.shutdown.send_replace(true);
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        match (&mut self.task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ServerError::Serve {
                message: e.to_string(),
            }),
            Err(e) => Err(ServerError::Serve {
                message: e.to_string(),
            }),
        }
    }
}
