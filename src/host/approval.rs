//! User approval for privileged actions.
//!
//! The dispatcher never decides on its own: every approval-tier call goes
//! through an [`ApprovalUi`]. [`ApprovalGate`] limits how many prompts are
//! visible at once; further requests wait in arrival order.

use crate::protocol::{Action, CallId};
use crate::surface::BrowserSurface;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRequest {
    pub identifier: CallId,
    pub action: Action,
    pub payload: Map<String, Value>,
    /// Origin of the page that issued the call, when known.
    pub origin: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalDecision {
    /// Proceed with these (possibly edited) parameters.
    Accepted(Map<String, Value>),
    Declined,
}

#[async_trait]
pub trait ApprovalUi: Send + Sync {
    async fn request_approval(&self, request: ApprovalRequest) -> ApprovalDecision;
}

/// FIFO admission to the approval UI.
pub struct ApprovalGate {
    ui: Arc<dyn ApprovalUi>,
    permits: Semaphore,
    waiting: AtomicUsize,
    showing: Arc<AtomicUsize>,
    surface: Option<Arc<dyn BrowserSurface>>,
}

impl ApprovalGate {
    /// At least one prompt is always allowed.
    pub fn new(ui: Arc<dyn ApprovalUi>, max_visible: usize) -> Self {
        Self {
            ui,
            permits: Semaphore::new(max_visible.max(1)),
            waiting: AtomicUsize::new(0),
            showing: Arc::new(AtomicUsize::new(0)),
            surface: None,
        }
    }

    /// Hides `surface` while any prompt is showing.
    pub fn with_surface(mut self, surface: Arc<dyn BrowserSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Requests waiting for a free prompt slot.
    pub fn queued(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn showing(&self) -> usize {
        self.showing.load(Ordering::SeqCst)
    }

    /// Waits for a slot, then for the user's decision.
    pub async fn submit(&self, request: ApprovalRequest) -> ApprovalDecision {
        let permit = {
            let _waiting = CountGuard::enter(&self.waiting);
            self.permits.acquire().await
        };
        let Ok(_permit) = permit else {
            return ApprovalDecision::Declined;
        };

        let _shown = ShowGuard::enter(Arc::clone(&self.showing), self.surface.clone());
        debug!(id = %request.identifier, action = %request.action, "showing approval prompt");
        self.ui.request_approval(request).await
    }
}

struct CountGuard<'a>(&'a AtomicUsize);

impl<'a> CountGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// The surface is hidden by the first prompt and restored by the last.
struct ShowGuard {
    showing: Arc<AtomicUsize>,
    surface: Option<Arc<dyn BrowserSurface>>,
}

impl ShowGuard {
    fn enter(showing: Arc<AtomicUsize>, surface: Option<Arc<dyn BrowserSurface>>) -> Self {
        if showing.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Some(surface) = &surface {
                surface.set_visible(false);
            }
        }
        Self { showing, surface }
    }
}

impl Drop for ShowGuard {
    fn drop(&mut self) {
        if self.showing.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Some(surface) = &self.surface {
                surface.set_visible(true);
            }
        }
    }
}

/// A prompt handed to the application through [`ApprovalChannel`].
#[derive(Debug)]
pub struct PendingApproval {
    pub request: ApprovalRequest,
    responder: oneshot::Sender<ApprovalDecision>,
}

impl PendingApproval {
    pub fn accept(self, params: Map<String, Value>) {
        let _ = self.responder.send(ApprovalDecision::Accepted(params));
    }

    /// Accepts with the parameters the page sent.
    pub fn accept_as_is(self) {
        let params = self.request.payload.clone();
        self.accept(params);
    }

    pub fn decline(self) {
        let _ = self.responder.send(ApprovalDecision::Declined);
    }
}

/// [`ApprovalUi`] that forwards prompts over a channel. Dropping a
/// [`PendingApproval`] unanswered, or the receiver, declines.
#[derive(Debug, Clone)]
pub struct ApprovalChannel {
    prompts: mpsc::UnboundedSender<PendingApproval>,
}

impl ApprovalChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingApproval>) {
        let (prompts, rx) = mpsc::unbounded_channel();
        (Self { prompts }, rx)
    }
}

#[async_trait]
impl ApprovalUi for ApprovalChannel {
    async fn request_approval(&self, request: ApprovalRequest) -> ApprovalDecision {
        let (responder, decision) = oneshot::channel();
        if self
            .prompts
            .send(PendingApproval { request, responder })
            .is_err()
        {
            return ApprovalDecision::Declined;
        }
        decision.await.unwrap_or(ApprovalDecision::Declined)
    }
}
