//! Staged middleware pipeline.
//!
//! Layers are registered once at startup against a lifecycle [`Stage`] and
//! run in registration order whenever the connection handler reaches that
//! stage. A failing layer marked `can_fail` is logged and swallowed; one
//! that is not halts the pipeline, and the connection handler skips every
//! remaining stage of the cycle once a halt is surfaced.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, warn};

use crate::arena::{Arena, ArenaError};
use crate::http::{Request, Response};

pub mod builtin;

/// Lifecycle stages, in cycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// First stage of the cycle, right after a request is parsed.
    Init,
    /// Before the router runs.
    PreRoute,
    /// After the router (or the synthetic 404), before serialization.
    PostRoute,
    /// Immediately before the response is written.
    PreResponse,
    /// After a successful write.
    PostResponse,
    /// Cycle teardown, before the tag is released.
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::PreRoute => "pre-route",
            Self::PostRoute => "post-route",
            Self::PreResponse => "pre-response",
            Self::PostResponse => "post-response",
            Self::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Errors a layer can fail with. Whether a failure matters is decided by the
/// layer's `can_fail` registration flag, not by the variant.
#[derive(Debug, Error)]
pub enum LayerError {
    /// The layer had nothing to do for this request (e.g. the client did not
    /// offer a negotiable encoding).
    #[error("not applicable: {0}")]
    NotApplicable(&'static str),

    #[error(transparent)]
    Arena(#[from] ArenaError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Capability interface for middleware: process one request/response pair,
/// allocating cycle-scoped data through the arena.
///
/// Implemented automatically for matching closures.
pub trait Layer: Send + Sync {
    fn process(
        &self,
        request: &Request,
        response: &mut Response,
        arena: &mut Arena,
    ) -> Result<(), LayerError>;
}

impl<F> Layer for F
where
    F: Fn(&Request, &mut Response, &mut Arena) -> Result<(), LayerError> + Send + Sync,
{
    fn process(
        &self,
        request: &Request,
        response: &mut Response,
        arena: &mut Arena,
    ) -> Result<(), LayerError> {
        self(request, response, arena)
    }
}

struct Entry {
    name: String,
    stage: Stage,
    can_fail: bool,
    layer: Arc<dyn Layer>,
}

/// A halted pipeline: a `can_fail = false` layer failed. The connection
/// handler runs no further layer of any stage in the affected cycle.
#[derive(Debug, Error)]
#[error("layer {name:?} failed at {stage}: {source}")]
pub struct PipelineHalt {
    pub name: String,
    pub stage: Stage,
    #[source]
    pub source: LayerError,
}

/// Ordered, staged collection of layers. Built once at startup, then shared
/// read-only across connection workers.
#[derive(Default)]
pub struct Pipeline {
    entries: Vec<Entry>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a layer under `stage`. Layers of the same stage run in
    /// registration order.
    pub fn add(
        &mut self,
        stage: Stage,
        name: impl Into<String>,
        can_fail: bool,
        layer: impl Layer + 'static,
    ) {
        self.entries.push(Entry {
            name: name.into(),
            stage,
            can_fail,
            layer: Arc::new(layer),
        });
    }

    /// Number of registered layers across all stages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no layers are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs every layer registered for `stage`, in registration order.
    ///
    /// A failure from a `can_fail` layer is logged at `warn` and swallowed.
    /// A failure from any other layer stops execution immediately and is
    /// surfaced as a [`PipelineHalt`].
    pub fn apply(
        &self,
        stage: Stage,
        request: &Request,
        response: &mut Response,
        arena: &mut Arena,
    ) -> Result<(), PipelineHalt> {
        for entry in self.entries.iter().filter(|e| e.stage == stage) {
            match entry.layer.process(request, response, arena) {
                Ok(()) => {}
                Err(err) if entry.can_fail => {
                    warn!(layer = %entry.name, %stage, error = %err, "layer failed (ignored)");
                }
                Err(source) => {
                    error!(layer = %entry.name, %stage, error = %source, "layer failed, halting pipeline");
                    return Err(PipelineHalt {
                        name: entry.name.clone(),
                        stage,
                        source,
                    });
                }
            }
        }
        Ok(())
    }
}
