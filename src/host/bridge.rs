use super::approval::{ApprovalGate, ApprovalUi};
use super::backend::WalletBackend;
use super::dispatcher::Dispatcher;
use super::lifecycle::InjectionController;
use super::origins::OriginRegistry;
use crate::config::BridgeConfig;
use crate::error::SurfaceError;
use crate::protocol::{
    Action, CallId, EventInvocation, Failure, Outcome, PageLog, ResponseInvocation,
};
use crate::script::{results, PageScript};
use crate::surface::{BrowserSurface, NavigationEvent};
use crate::transport::{decode_page_message, PageMessage};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn, Level};

/// Input to [`BridgeHost::serve`].
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// JSON text the page posted through the native interface.
    Message(String),
    Navigation(NavigationEvent),
}

/// The host side of one browser surface: dispatches page calls, delivers
/// their outcomes and drives provider injection.
pub struct BridgeHost {
    surface: Arc<dyn BrowserSurface>,
    dispatcher: Dispatcher,
    controller: Arc<InjectionController>,
}

impl BridgeHost {
    pub fn new(
        surface: Arc<dyn BrowserSurface>,
        dispatcher: Dispatcher,
        controller: Arc<InjectionController>,
    ) -> Self {
        Self {
            surface,
            dispatcher,
            controller,
        }
    }

    pub fn from_config(
        config: &BridgeConfig,
        surface: Arc<dyn BrowserSurface>,
        backend: Arc<dyn WalletBackend>,
        ui: Arc<dyn ApprovalUi>,
    ) -> Self {
        let origins = OriginRegistry::new(
            config.security.require_origin_authorization,
            config.security.authorized_origins.iter().cloned(),
        );
        let gate = ApprovalGate::new(ui, config.approval.max_visible_prompts)
            .with_surface(Arc::clone(&surface));
        let dispatcher = Dispatcher::new(backend, Arc::new(gate), Arc::new(origins));
        let controller = Arc::new(InjectionController::new(
            Arc::clone(&surface),
            config.injection.verify_delay(),
        ));
        Self::new(surface, dispatcher, controller)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn controller(&self) -> &Arc<InjectionController> {
        &self.controller
    }

    /// Handles one page message to completion and returns the outcome sent
    /// back, or `None` when the message needed no response.
    pub async fn handle_message(&self, raw: &str) -> Option<Outcome> {
        match decode_page_message(raw) {
            PageMessage::Notification(notification) => {
                let detail = Value::Object(notification.detail);
                info!(
                    notification = %notification.notification,
                    %detail,
                    "provider notification"
                );
                None
            }
            PageMessage::Log(entry) => {
                log_from_page(&entry);
                None
            }
            PageMessage::Malformed {
                identifier: None,
                reason,
            } => {
                warn!(%reason, "discarding page message without identifier");
                None
            }
            PageMessage::Malformed {
                identifier: Some(id),
                reason,
            } => {
                debug!(%id, %reason, "malformed call");
                let outcome = Outcome::from(Failure::invalid_request());
                self.respond(id, outcome.clone()).await;
                Some(outcome)
            }
            PageMessage::Call(call) => {
                let id = call.identifier.clone();
                let action = Action::from_wire(&call.action);
                let origin = self.controller.current_origin();
                debug!(%id, action = %call.action, "dispatching call");
                let outcome = self.dispatcher.dispatch(call, origin.as_deref()).await;
                self.respond(id, outcome.clone()).await;
                if let (Some(action), Outcome::Success(value)) = (action, &outcome) {
                    self.announce(action, value).await;
                }
                Some(outcome)
            }
        }
    }

    /// Handles a page message on its own task.
    pub fn spawn_message(self: &Arc<Self>, raw: String) -> JoinHandle<Option<Outcome>> {
        let host = Arc::clone(self);
        tokio::spawn(async move { host.handle_message(&raw).await })
    }

    pub async fn handle_navigation(&self, event: NavigationEvent) -> Option<JoinHandle<()>> {
        self.controller.handle(event).await
    }

    /// Pushes `event` to the page's listeners. Returns whether a provider
    /// received it.
    pub async fn emit(&self, event: &str, args: Vec<Value>) -> Result<bool, SurfaceError> {
        let script = PageScript::Emit(EventInvocation {
            event: event.to_string(),
            args,
        });
        let reported = self.surface.evaluate(script).await?;
        Ok(reported.as_deref().map(unquote).as_deref() == Some(results::EMITTED))
    }

    /// Runs until `events` closes. Messages are handled concurrently;
    /// navigation events are applied in order.
    pub async fn serve(self: Arc<Self>, mut events: UnboundedReceiver<BridgeEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                BridgeEvent::Message(raw) => {
                    self.spawn_message(raw);
                }
                BridgeEvent::Navigation(navigation) => {
                    self.handle_navigation(navigation).await;
                }
            }
        }
        debug!("bridge event stream closed");
    }

    async fn respond(&self, id: CallId, outcome: Outcome) {
        let script = PageScript::Respond(ResponseInvocation::new(id.clone(), outcome));
        match self.surface.evaluate(script).await {
            Ok(reported) => debug!(%id, ?reported, "response delivered"),
            Err(e) => warn!(%id, error = %e, "could not deliver response"),
        }
    }

    // Wallet-state changes the page should hear about without polling.
    async fn announce(&self, action: Action, value: &Value) {
        let (event, field) = match action {
            Action::RequestAccounts => ("accountsChanged", "accounts"),
            Action::SwitchNetwork => ("networkChanged", "network"),
            _ => return,
        };
        let arg = value.get(field).cloned().unwrap_or_else(|| value.clone());
        if let Err(e) = self.emit(event, vec![arg]).await {
            debug!(event, error = %e, "could not emit provider event");
        }
    }
}

const PAGE_TARGET: &str = "webview_bridge::page";

fn log_from_page(entry: &PageLog) {
    let level = entry.level();
    if level == Level::ERROR {
        error!(target: PAGE_TARGET, "{}", entry.message);
    } else if level == Level::WARN {
        warn!(target: PAGE_TARGET, "{}", entry.message);
    } else if level == Level::DEBUG {
        debug!(target: PAGE_TARGET, "{}", entry.message);
    } else if level == Level::TRACE {
        trace!(target: PAGE_TARGET, "{}", entry.message);
    } else {
        info!(target: PAGE_TARGET, "{}", entry.message);
    }
}

fn unquote(raw: &str) -> String {
    serde_json::from_str::<String>(raw.trim()).unwrap_or_else(|_| raw.trim().to_string())
}
