use crate::protocol::{CallId, Outcome};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot::{self, error::TryRecvError};

/// Settlement state of a [`PendingReply`], observed without awaiting.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyStatus {
    Pending,
    Settled(Outcome),
    /// The owning provider was discarded; the reply will never settle.
    Abandoned,
}

enum State {
    Waiting(oneshot::Receiver<Outcome>),
    Ready(Option<Outcome>),
    Abandoned,
}

/// Future returned by every provider call. Resolves exactly once with the
/// call's [`Outcome`]; has no timeout.
///
/// When the provider instance that issued the call is discarded, the future
/// stays pending forever rather than resolving with an error.
pub struct PendingReply {
    id: Option<CallId>,
    state: State,
}

impl PendingReply {
    pub(crate) fn waiting(id: CallId, rx: oneshot::Receiver<Outcome>) -> Self {
        Self {
            id: Some(id),
            state: State::Waiting(rx),
        }
    }

    /// A reply settled before anything was sent.
    pub(crate) fn settled(outcome: Outcome) -> Self {
        Self {
            id: None,
            state: State::Ready(Some(outcome)),
        }
    }

    /// Identifier of the call on the wire; `None` when the call never left
    /// the page.
    pub fn id(&self) -> Option<&CallId> {
        self.id.as_ref()
    }

    /// Checks for settlement without waiting. A settled outcome is kept and
    /// still yielded by awaiting afterwards.
    pub fn try_status(&mut self) -> ReplyStatus {
        match &mut self.state {
            State::Ready(Some(outcome)) => ReplyStatus::Settled(outcome.clone()),
            State::Ready(None) => ReplyStatus::Pending,
            State::Abandoned => ReplyStatus::Abandoned,
            State::Waiting(rx) => match rx.try_recv() {
                Ok(outcome) => {
                    self.state = State::Ready(Some(outcome.clone()));
                    ReplyStatus::Settled(outcome)
                }
                Err(TryRecvError::Empty) => ReplyStatus::Pending,
                Err(TryRecvError::Closed) => {
                    self.state = State::Abandoned;
                    ReplyStatus::Abandoned
                }
            },
        }
    }
}

impl Future for PendingReply {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Outcome> {
        let this = self.get_mut();
        match &mut this.state {
            State::Ready(outcome) => match outcome.take() {
                Some(outcome) => Poll::Ready(outcome),
                None => Poll::Pending,
            },
            State::Abandoned => Poll::Pending,
            State::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(outcome)) => {
                    this.state = State::Ready(None);
                    Poll::Ready(outcome)
                }
                Poll::Ready(Err(_)) => {
                    this.state = State::Abandoned;
                    Poll::Pending
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Waiting(_) => "waiting",
            State::Ready(Some(_)) => "ready",
            State::Ready(None) => "consumed",
            State::Abandoned => "abandoned",
        };
        f.debug_struct("PendingReply")
            .field("id", &self.id)
            .field("state", &state)
            .finish()
    }
}
