//! # taghttp
//!
//! A small HTTP/1.1 server toolkit built around a tagged memory arena.
//!
//! Every connection owns a private [`arena::Arena`]; all allocations made
//! while serving one request cycle share the connection's tag and are
//! released together when the cycle ends. Requests flow through a staged
//! [`layers::Pipeline`] wrapped around a linear first-match
//! [`router::Router`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taghttp::http::Method;
//! use taghttp::layers::Stage;
//! use taghttp::routes;
//! use taghttp::layers::builtin;
//! use taghttp::server::{HttpServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = HttpServer::new(ServerConfig::default());
//!     server
//!         .router_mut()
//!         .add("/echo", Method::Get.into(), false, routes::echo);
//!     server
//!         .pipeline_mut()
//!         .add(Stage::PostRoute, "content-length", true, builtin::content_length);
//!     server.bind().await?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod arena;
pub mod http;
pub mod layers;
pub mod router;
pub mod routes;
pub mod server;

pub use arena::{AllocId, Arena, ArenaError, ArenaScope, Tag};
pub use http::{Headers, Method, MethodSet, Request, Response, StatusCode};
pub use layers::{Layer, LayerError, Pipeline, Stage};
pub use router::{RouteHandler, Router};
pub use server::{HttpServer, ServerConfig, ServerError};
