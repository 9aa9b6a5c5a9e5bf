//! The page side of the bridge, modelled in Rust.
//!
//! [`Provider`] mirrors the injected JavaScript provider: it issues calls
//! through a [`PageTransport`](crate::transport::PageTransport), keeps them in
//! a [`CorrelationTable`] and settles each [`PendingReply`] from the single
//! intake entry point [`Provider::resolve_or_reject`]. [`PageContext`] hosts
//! one provider per document and plays the browser surface for headless
//! hosts and tests.

pub mod context;
pub mod provider;
pub mod reply;
pub mod table;

pub use context::{PageContext, PageProvider, PresenceFlags};
pub use provider::{Capabilities, FallbackProvider, Intake, ListenerId, Provider};
pub use reply::{PendingReply, ReplyStatus};
pub use table::{CorrelationTable, PendingCall};
