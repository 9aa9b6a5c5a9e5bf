use super::approval::{ApprovalDecision, ApprovalGate, ApprovalRequest};
use super::backend::{BackendError, WalletBackend};
use super::origins::OriginRegistry;
use crate::protocol::{Action, CallId, Failure, Outcome, TrustTier, WireCall};
use crate::transport::parse_payload;
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Turns each [`WireCall`] into exactly one [`Outcome`].
///
/// The tier comes from the action table, never from the call. Read-only
/// actions are answered from the backend's local state without prompting;
/// approval-tier actions run only after the [`ApprovalGate`] returns an
/// acceptance.
#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn WalletBackend>,
    gate: Arc<ApprovalGate>,
    origins: Arc<OriginRegistry>,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<dyn WalletBackend>,
        gate: Arc<ApprovalGate>,
        origins: Arc<OriginRegistry>,
    ) -> Self {
        Self {
            backend,
            gate,
            origins,
        }
    }

    pub fn gate(&self) -> &Arc<ApprovalGate> {
        &self.gate
    }

    pub fn origins(&self) -> &Arc<OriginRegistry> {
        &self.origins
    }

    /// Handles one call. Total: malformed input, unknown actions, backend
    /// errors and handler panics all come back as a [`Failure`].
    pub async fn dispatch(&self, call: WireCall, origin: Option<&str>) -> Outcome {
        let WireCall {
            identifier,
            trust_tier_claimed,
            action: action_name,
            payload,
        } = call;

        let payload = match parse_payload(payload) {
            Ok(payload) => payload,
            Err(failure) => {
                debug!(id = %identifier, action = %action_name, "payload is not an object");
                return failure.into();
            }
        };
        let Some(action) = Action::from_wire(&action_name) else {
            debug!(id = %identifier, action = %action_name, "unknown action");
            return Failure::unknown_action().into();
        };
        if let Some(claimed) = trust_tier_claimed.as_deref() {
            if TrustTier::from_wire(claimed) != Some(action.tier()) {
                warn!(
                    id = %identifier,
                    %action,
                    claimed,
                    actual = %action.tier(),
                    "claimed trust tier ignored"
                );
            }
        }
        if let Some(field) = action.missing_field(&payload) {
            return Failure::missing_field(field).into();
        }

        match action.tier() {
            TrustTier::ReadOnly => self.read(&identifier, action, &payload, origin),
            TrustTier::ApprovalRequired => {
                self.approve_and_execute(identifier, action, payload, origin)
                    .await
            }
        }
    }

    fn read(
        &self,
        id: &CallId,
        action: Action,
        payload: &Map<String, Value>,
        origin: Option<&str>,
    ) -> Outcome {
        if !self.origins.permits(origin) {
            info!(%id, %action, origin, "read from unauthorized origin");
            return Failure::unauthorized().into();
        }
        match catch_unwind(AssertUnwindSafe(|| self.backend.read(action, payload))) {
            Ok(Ok(value)) => Outcome::Success(value),
            Ok(Err(e)) => backend_failure(id, action, e),
            Err(_) => {
                error!(%id, %action, "read handler panicked");
                Failure::internal().into()
            }
        }
    }

    // Runs on its own task so a panic in the UI or the backend is contained.
    async fn approve_and_execute(
        &self,
        id: CallId,
        action: Action,
        payload: Map<String, Value>,
        origin: Option<&str>,
    ) -> Outcome {
        let gate = Arc::clone(&self.gate);
        let backend = Arc::clone(&self.backend);
        let origins = Arc::clone(&self.origins);
        let origin = origin.map(str::to_owned);
        let task_id = id.clone();

        let task = tokio::spawn(async move {
            let request = ApprovalRequest {
                identifier: task_id.clone(),
                action,
                payload,
                origin: origin.clone(),
            };
            let params = match gate.submit(request).await {
                ApprovalDecision::Accepted(params) => params,
                ApprovalDecision::Declined => {
                    info!(id = %task_id, %action, "user declined");
                    return Failure::user_declined().into();
                }
            };
            match backend.execute(action, params).await {
                Ok(value) => {
                    if action == Action::RequestAccounts {
                        if let Some(origin) = &origin {
                            origins.authorize(origin);
                        }
                    }
                    Outcome::Success(value)
                }
                Err(e) => backend_failure(&task_id, action, e),
            }
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(%id, %action, error = %e, "approval handler failed");
                Failure::internal().into()
            }
        }
    }
}

fn backend_failure(id: &CallId, action: Action, e: BackendError) -> Outcome {
    match &e {
        BackendError::Internal(detail) => error!(%id, %action, detail, "wallet backend fault"),
        other => debug!(%id, %action, error = %other, "wallet backend refused"),
    }
    e.into_failure().into()
}
