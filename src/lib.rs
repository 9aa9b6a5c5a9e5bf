//! # webview_bridge
//!
//! A trust-tiered message bridge between **untrusted page content** in an
//! embedded browser surface and a **privileged host**:
//!
//! - Inject a wallet-style provider (`window.sat20`) into every page and keep it
//!   there across navigations, reloads and flaky injections
//! - Correlate every page call with exactly one asynchronous outcome
//! - Answer read-only calls from local state; run privileged calls only after
//!   the user approves them
//!
//! ---
//!
//! ## How a call travels
//!
//! 1. A page script calls `sat20.getBalance()`. The provider allocates a call
//!    identifier, records a pending entry and posts
//!    `{"identifier", "trustTierClaimed", "action", "payload"}` as JSON text
//!    through the native interface.
//! 2. The host's [`Dispatcher`](host::Dispatcher) parses the payload, looks
//!    the action up in the closed [`Action`] table and routes it by the
//!    table's tier. The tier the page claims is ignored.
//! 3. The outcome goes back as a script invoking
//!    `sat20.handleResponse(identifier, result, error)`, rendered from a typed
//!    [`ResponseInvocation`] with JSON literals.
//! 4. The provider removes the entry and settles the page's promise. A second
//!    delivery for the same identifier finds nothing and is dropped.
//!
//! ### Things worth knowing first
//!
//! - **No timeouts on calls.** A call waits as long as the host takes, which
//!   for privileged actions includes the user thinking about it.
//! - **Navigation abandons calls.** A new document gets a new provider with an
//!   empty table. Calls issued by the old one never settle; they are not
//!   rejected.
//! - **A failed load degrades, it does not hang.** After a navigation error
//!   every provider method rejects at once with
//!   `"page failed to load properly"`.
//! - **stdout is the protocol** when running as [`host::stdio`]. Log to
//!   stderr.
//!
//! ---
//!
//! ## Crate layout
//!
//! - [`protocol`]: identifiers, tiers, the action table, wire records.
//! - [`script`]: the scripts the host evaluates in the page.
//! - [`page`]: the provider and correlation table, plus [`PageContext`],
//!   an in-process page for headless hosts and tests.
//! - [`host`]: dispatcher, approval gate, injection lifecycle, stdio host.
//! - [`surface`] / [`transport`]: the seams to the browser surface.
//! - [`config`]: TOML configuration.
//! - [`frame`]: length-prefixed JSON framing for stdio.
//!
//! ---
//!
//! ## Headless round trip
//!
//! ```no_run
//! use std::sync::Arc;
//! use webview_bridge::config::BridgeConfig;
//! use webview_bridge::host::{ApprovalChannel, BridgeHost, StaticWallet};
//! use webview_bridge::page::{Capabilities, PageContext};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = BridgeConfig::default();
//!     let (calls_tx, mut calls_rx) = tokio::sync::mpsc::unbounded_channel();
//!     let page = Arc::new(PageContext::new(config.provider.clone(), Arc::new(calls_tx)));
//!     let (ui, _prompts) = ApprovalChannel::new();
//!     let host = Arc::new(BridgeHost::from_config(
//!         &config,
//!         page.clone(),
//!         Arc::new(StaticWallet::new(config.wallet.clone())),
//!         Arc::new(ui),
//!     ));
//!
//!     host.handle_navigation(page.begin_navigation("https://dapp.example")).await;
//!     host.handle_navigation(page.finish_navigation()).await;
//!
//!     let provider = page.provider().unwrap();
//!     let reply = provider.get_balance();
//!     while let Ok(raw) = calls_rx.try_recv() {
//!         host.handle_message(&raw).await;
//!     }
//!     println!("{:?}", reply.await);
//! }
//! ```
//!
//! ---
//!
//! ## Feature flags
//!
//! - `config` (default): load and store [`config::BridgeConfig`] as TOML.
//! - `cli` (default): the `webview-bridge-host` binary.

pub mod config;
pub mod error;
pub mod frame;
pub mod host;
pub mod page;
pub mod protocol;
pub mod script;
pub mod surface;
pub mod transport;

#[doc(inline)]
pub use error::{SurfaceError, TransportError};
#[doc(inline)]
pub use page::{Capabilities, PageContext, PendingReply, Provider};
#[doc(inline)]
pub use protocol::{Action, CallId, Failure, Outcome, ResponseInvocation, TrustTier, WireCall};
#[doc(inline)]
pub use script::PageScript;
#[doc(inline)]
pub use surface::{BrowserSurface, NavigationEvent};
