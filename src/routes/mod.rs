//! Built-in request handlers.
//!
//! Free functions for the simple endpoints and a [`FilesRoute`] handler that
//! serves a configured directory. All of them can be registered directly on a
//! [`Router`](crate::router::Router).

use std::fs;
use std::path::PathBuf;

use tracing::warn;

use crate::arena::Arena;
use crate::http::{Method, Request, Response, StatusCode};
use crate::router::RouteHandler;

/// `GET /` (exact match): empty 200.
pub fn index(_request: &Request, response: &mut Response, _arena: &mut Arena) {
    response.set_status(StatusCode::Ok);
}

/// `GET /hello`: fixed greeting.
pub fn hello(_request: &Request, response: &mut Response, _arena: &mut Arena) {
    response.add_header("Content-Type", "text/plain");
    response.set_body("Hello, World!");
}

/// `GET /echo/{text}`: echoes the remainder of the target.
pub fn echo(request: &Request, response: &mut Response, _arena: &mut Arena) {
    let text = request
        .target()
        .strip_prefix("/echo/")
        .unwrap_or_default();
    response.add_header("Content-Type", "text/plain");
    response.set_body(text);
}

/// `GET /user-agent`: echoes the request's `User-Agent` header.
pub fn user_agent(request: &Request, response: &mut Response, _arena: &mut Arena) {
    let agent = request.header("User-Agent").unwrap_or_default();
    response.add_header("Content-Type", "text/plain");
    response.set_body(agent);
}

/// `GET|POST /files/{name}`: serves and stores files under a configured
/// directory. `GET` reads the named file (404 when absent), `POST` writes the
/// request body to it (201 on success).
pub struct FilesRoute {
    directory: PathBuf,
}

impl FilesRoute {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn file_name<'a>(&self, request: &'a Request) -> Option<&'a str> {
        match request.target().strip_prefix("/files/") {
            Some("") | None => None,
            // `..` segments would climb out of the serving directory.
            Some(name) if name.contains("..") => None,
            Some(name) => Some(name),
        }
    }
}

impl RouteHandler for FilesRoute {
    fn handle(&self, request: &Request, response: &mut Response, _arena: &mut Arena) {
        let Some(name) = self.file_name(request) else {
            response.set_status(StatusCode::BadRequest);
            return;
        };
        let path = self.directory.join(name);

        match request.method() {
            Method::Get => match fs::read(&path) {
                Ok(contents) => {
                    response.add_header("Content-Type", "application/octet-stream");
                    response.set_body(contents);
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "file read failed");
                    response.set_status(StatusCode::NotFound);
                }
            },
            Method::Post => match fs::write(&path, request.body()) {
                Ok(()) => response.set_status(StatusCode::Created),
                Err(err) => {
                    warn!(path = %path.display(), %err, "file write failed");
                    response.set_status(StatusCode::InternalServerError);
                }
            },
            _ => response.set_status(StatusCode::MethodNotAllowed),
        }
    }
}
