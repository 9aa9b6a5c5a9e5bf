//! The privileged side of the bridge.
//!
//! - [`dispatcher`] classifies calls by trust tier and produces one outcome
//!   per call.
//! - [`approval`] gates privileged actions on the user.
//! - [`lifecycle`] keeps a provider installed across navigations.
//! - [`bridge`] ties these to one browser surface.
//! - [`stdio`] runs all of it as a child process of a browser shell.

pub mod approval;
pub mod backend;
pub mod bridge;
pub mod dispatcher;
pub mod lifecycle;
pub mod origins;
pub mod stdio;

pub use approval::{
    ApprovalChannel, ApprovalDecision, ApprovalGate, ApprovalRequest, ApprovalUi, PendingApproval,
};
pub use backend::{BackendError, StaticWallet, WalletBackend, WalletState};
pub use bridge::{BridgeEvent, BridgeHost};
pub use dispatcher::Dispatcher;
pub use lifecycle::{InjectionController, InjectionStatus, PresenceState};
pub use origins::{origin_of, OriginRegistry};
