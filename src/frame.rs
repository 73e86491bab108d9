//! Execution frame contract.
//!
//! An execution frame is the isolated document/window pair a sketch runs in.
//! The host only ever talks to it through this trait: the browser build drives
//! an `<iframe>`, the native build an embedded script engine.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::script_list::ScriptRef;
use crate::sketch_diagnostics::ScriptDiagnostic;

#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame signalled an error event for a script.
    #[error("script {id} failed to load from {path}")]
    Load { id: String, path: String },

    /// No loader exists for the script's location.
    #[error("script {0} is not reachable from this frame")]
    Unreachable(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Script(ScriptDiagnostic),

    /// The drawing library does not expose a member the host relies on.
    #[error("frame does not provide `{0}`")]
    MissingCapability(&'static str),

    /// Browser-side failure (stringified JS exception).
    #[error("frame error: {0}")]
    Js(String),
}

/// Single-threaded handle to an execution frame.
///
/// Methods take `&self`: frames keep their document behind interior
/// mutability, because the host shares one handle with the surrounding
/// application for its whole lifetime.
pub trait ExecutionFrame: 'static {
    /// Media stream produced by canvas capture.
    type Stream;

    /// Reset default document styling (margins).
    fn prepare_document(&self);

    /// Add a script to the document. Resolves once the script's load or error
    /// event has fired.
    fn load_script(&self, script: &ScriptRef) -> impl Future<Output = Result<(), FrameError>>;

    /// Insert or replace the user-code block identified by `id` and run it.
    fn inject_user_code(&self, id: &str, code: &str) -> Result<(), FrameError>;

    /// Invoke the drawing library's `setup()` entry point.
    fn call_setup(&self) -> Result<(), FrameError>;

    /// Overwrite the drawing library's frame counter.
    fn set_frame_count(&self, count: u64) -> Result<(), FrameError>;

    /// Capture the frame's canvas, if one exists.
    fn capture_canvas(&self, frame_rate: u32) -> Option<Self::Stream>;

    /// Wait on the frame's timer.
    fn delay(&self, duration: Duration) -> impl Future<Output = ()>;
}
