//! Async TCP server using Tokio.
//!
//! Accepts TCP connections, bounded by a semaphore, and serves HTTP/1.1
//! request cycles through the layer pipeline and router. Every connection
//! owns a private [`Arena`]; each cycle's allocations live under the
//! connection's tag and are released together when the cycle ends.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::arena::{Arena, Tag};
use crate::http::{Request, Response, StatusCode};
use crate::layers::{Pipeline, Stage};
use crate::router::Router;

mod config;

pub use config::ServerConfig;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Whether a finished cycle keeps the connection open.
enum Flow {
    KeepAlive,
    Close,
}

/// An unbound server: configuration plus the routes and layers to serve.
///
/// # Examples
///
/// ```rust,no_run
/// use taghttp::http::Method;
/// use taghttp::routes;
/// use taghttp::server::{HttpServer, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut server = HttpServer::new(ServerConfig::default());
///     server
///         .router_mut()
///         .add("/hello", Method::Get.into(), false, routes::hello);
///     server.bind().await?.run().await?;
///     Ok(())
/// }
/// ```
pub struct HttpServer {
    config: ServerConfig,
    router: Router,
    pipeline: Pipeline,
}

impl HttpServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            router: Router::new(),
            pipeline: Pipeline::new(),
        }
    }

    /// The route table, for registration before [`bind`](Self::bind).
    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    /// The layer pipeline, for registration before [`bind`](Self::bind).
    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    /// Binds the configured TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        let addr = self.config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind { addr, source: e })?;
        let local_addr = listener.local_addr()?;
        Ok(BoundServer {
            listener,
            local_addr,
            config: Arc::new(self.config),
            router: Arc::new(self.router),
            pipeline: Arc::new(self.pipeline),
        })
    }
}

/// A bound server, ready to accept connections.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Arc<ServerConfig>,
    router: Arc<Router>,
    pipeline: Arc<Pipeline>,
}

impl BoundServer {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until `ctrl_c`.
    ///
    /// Each accepted connection takes a semaphore permit and is served on
    /// its own task; at capacity the connection is rejected with a 503.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));
        let mut connections_served: u64 = 0;
        info!(address = %self.local_addr, "taghttp listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };

                    let permit = match Arc::clone(&semaphore).try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!(peer = %peer_addr, "at capacity, rejecting connection");
                            tokio::spawn(reject_busy(stream, peer_addr));
                            continue;
                        }
                    };

                    connections_served += 1;
                    let tag = Tag::from_raw(connections_served);
                    debug!(peer = %peer_addr, %tag, "connection accepted");

                    let config = Arc::clone(&self.config);
                    let router = Arc::clone(&self.router);
                    let pipeline = Arc::clone(&self.pipeline);
                    tokio::spawn(async move {
                        handle_connection(stream, peer_addr, tag, config, router, pipeline).await;
                        drop(permit);
                    });
                }
                _ = tokio::signal::ctrl_c() => {
                    info!(served = connections_served, "shutdown requested");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Replies 503 and closes; used when no connection permit is available.
async fn reject_busy(mut stream: TcpStream, peer_addr: SocketAddr) {
    let mut response = Response::new(Tag::from_raw(0));
    response.set_status(StatusCode::ServiceUnavailable);
    response.add_header("Connection", "close");
    response.add_header("Content-Length", "0");
    if let Err(e) = stream.write_all(&response.encode(&Arena::new())).await {
        debug!(peer = %peer_addr, error = %e, "failed to send 503");
    }
}

/// Serves a connection over its lifetime: one arena, one tag, a request
/// cycle per loop iteration until the peer leaves or asks to close.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    tag: Tag,
    config: Arc<ServerConfig>,
    router: Arc<Router>,
    pipeline: Arc<Pipeline>,
) {
    let mut arena = match config.arena_limit {
        Some(limit) => Arena::with_limit(limit),
        None => Arena::new(),
    };

    loop {
        match serve_cycle(&mut stream, &mut arena, tag, &config, &router, &pipeline).await {
            Ok(Flow::KeepAlive) => {}
            Ok(Flow::Close) => break,
            Err(e) => {
                debug!(peer = %peer_addr, error = %e, "connection I/O error");
                break;
            }
        }
    }

    if config.verbose {
        debug!(peer = %peer_addr, "{}", arena.dump_state());
    }
    debug!(peer = %peer_addr, %tag, "connection closed");
}

/// Runs `stage` unless the cycle is already halted; a halt skips every
/// later stage of the same cycle.
fn apply_stage(
    pipeline: &Pipeline,
    stage: Stage,
    request: &Request,
    response: &mut Response,
    arena: &mut Arena,
    halted: &mut bool,
) {
    if *halted {
        return;
    }
    if let Err(halt) = pipeline.apply(stage, request, response, arena) {
        error!(error = %halt, "cycle halted");
        *halted = true;
    }
}

/// One request cycle: receive, parse, run the staged pipeline around the
/// router, send. Allocations for the cycle live under `tag` and are
/// released by the scope guard on every exit path.
async fn serve_cycle(
    stream: &mut TcpStream,
    arena: &mut Arena,
    tag: Tag,
    config: &ServerConfig,
    router: &Router,
    pipeline: &Pipeline,
) -> Result<Flow, std::io::Error> {
    let mut scope = arena.scope(tag);

    let recv = match scope.alloc(config.read_buffer_size, tag) {
        Ok(id) => id,
        Err(e) => {
            error!(%tag, error = %e, "receive buffer allocation failed");
            return Ok(Flow::Close);
        }
    };

    let bytes_read = stream.read(scope.bytes_mut(recv)).await?;
    if bytes_read == 0 {
        debug!(%tag, "connection closed by peer");
        return Ok(Flow::Close);
    }

    let raw = String::from_utf8_lossy(&scope.bytes(recv)[..bytes_read]).into_owned();
    let request = match Request::parse(&raw, tag) {
        Ok(request) => request,
        Err(e) => {
            warn!(%tag, error = %e, "unparseable request, closing");
            let placeholder = Request::empty(tag);
            let mut response = Response::new(tag);
            let mut halted = false;
            apply_stage(pipeline, Stage::Cleanup, &placeholder, &mut response, &mut scope, &mut halted);
            return Ok(Flow::Close);
        }
    };

    let mut response = Response::new(tag);
    let mut halted = false;

    apply_stage(pipeline, Stage::Init, &request, &mut response, &mut scope, &mut halted);
    apply_stage(pipeline, Stage::PreRoute, &request, &mut response, &mut scope, &mut halted);

    if !halted && !router.dispatch(&request, &mut response, &mut scope) {
        debug!(target = %request.target(), "no route matched");
        response.set_status(StatusCode::NotFound);
    }

    apply_stage(pipeline, Stage::PostRoute, &request, &mut response, &mut scope, &mut halted);
    apply_stage(pipeline, Stage::PreResponse, &request, &mut response, &mut scope, &mut halted);

    if halted {
        response.set_status(StatusCode::InternalServerError);
    }

    let wire = response.encode(&scope);
    if let Err(e) = stream.write_all(&wire).await {
        warn!(%tag, error = %e, "send failed, closing");
        apply_stage(pipeline, Stage::Cleanup, &request, &mut response, &mut scope, &mut halted);
        return Ok(Flow::Close);
    }
    stream.flush().await?;

    apply_stage(pipeline, Stage::PostResponse, &request, &mut response, &mut scope, &mut halted);
    apply_stage(pipeline, Stage::Cleanup, &request, &mut response, &mut scope, &mut halted);

    if request.wants_close() {
        debug!(%tag, "Connection: close requested");
        Ok(Flow::Close)
    } else {
        Ok(Flow::KeepAlive)
    }
}
