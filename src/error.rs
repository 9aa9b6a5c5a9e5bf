//! Error types for the transport and the browser surface.
//!
//! Neither error ever reaches a page script directly: the provider turns a
//! [`TransportError`] into a settled failure, and the host logs a
//! [`SurfaceError`] and recovers (re-injection, or dropping a response whose
//! page is gone).

use thiserror::Error;

/// Failure to hand a call to the native interface.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The host side of the channel is gone.
    #[error("native bridge closed")]
    Closed,
    /// The call could not be encoded as JSON.
    #[error("failed to encode call: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure to evaluate a script in the page context.
#[derive(Debug, Error)]
pub enum SurfaceError {
    /// No page is loaded, or the webview was closed.
    #[error("browser surface is not available")]
    Unavailable,
    /// The script threw or the page refused it.
    #[error("script evaluation failed: {0}")]
    Script(String),
    /// The surface did not report a result in time.
    #[error("script evaluation timed out after {0} ms")]
    Timeout(u64),
    /// The surface process disconnected.
    #[error("browser surface disconnected")]
    Disconnected,
}
