//! The bridge host as a child process of the browser shell.
//!
//! The shell owns the webview and the approval dialogs; the host owns the
//! protocol. They exchange length-prefixed JSON frames ([`crate::frame`]):
//! the shell writes [`InboundMessage`]s to the host's stdin and reads
//! [`OutboundMessage`]s from its stdout. Requests that need an answer from
//! the shell carry a ticket that the answer echoes.
//!
//! Logging goes to stderr only.

use super::approval::{ApprovalDecision, ApprovalRequest, ApprovalUi};
use super::backend::{BackendError, StaticWallet, WalletBackend};
use super::bridge::{BridgeEvent, BridgeHost};
use crate::config::{BridgeConfig, ProviderSettings};
use crate::error::SurfaceError;
use crate::frame::{Frame, MAX_INBOUND};
use crate::protocol::{Action, CallId, Failure};
use crate::script::PageScript;
use crate::surface::{BrowserSurface, NavigationEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Frames from the shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Text the page posted through the native interface.
    PageMessage { message: String },
    NavigationStarted { url: String },
    NavigationFinished { url: String },
    NavigationFailed {
        url: String,
        code: i32,
        description: String,
    },
    ScriptResult {
        ticket: u64,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    ApprovalDecision {
        ticket: u64,
        approved: bool,
        /// Edited parameters; absent means as requested.
        #[serde(default)]
        params: Option<Map<String, Value>>,
    },
    ExecutionResult {
        ticket: u64,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<Failure>,
    },
    /// Asks the host to push a provider event into the page.
    Emit {
        event: String,
        #[serde(default)]
        args: Vec<Value>,
    },
}

/// Frames to the shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Evaluate {
        ticket: u64,
        kind: String,
        script: String,
    },
    SetVisible {
        visible: bool,
    },
    ApprovalRequest {
        ticket: u64,
        identifier: CallId,
        action: String,
        payload: Map<String, Value>,
        origin: Option<String>,
    },
    Execute {
        ticket: u64,
        action: String,
        params: Map<String, Value>,
    },
}

/// Outstanding requests to the shell, keyed by ticket.
pub struct Tickets<T> {
    next: AtomicU64,
    waiting: Mutex<HashMap<u64, oneshot::Sender<T>>>,
}

impl<T> Default for Tickets<T> {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
            waiting: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> Tickets<T> {
    pub fn open(&self) -> (u64, oneshot::Receiver<T>) {
        let ticket = self.next.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().insert(ticket, tx);
        (ticket, rx)
    }

    /// Answers `ticket`. Unknown or expired tickets return `false`.
    pub fn complete(&self, ticket: u64, value: T) -> bool {
        match self.waiting.lock().remove(&ticket) {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    pub fn cancel(&self, ticket: u64) {
        self.waiting.lock().remove(&ticket);
    }

    /// Fails every outstanding request.
    pub fn clear(&self) {
        self.waiting.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.waiting.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What the shell answered to an approval request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalReply {
    pub approved: bool,
    pub params: Option<Map<String, Value>>,
}

/// Shared state between the frame reader and the shell-backed collaborators.
pub struct StdioLink {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    pub scripts: Tickets<Result<Option<String>, String>>,
    pub approvals: Tickets<ApprovalReply>,
    pub executions: Tickets<Result<Value, Failure>>,
}

impl StdioLink {
    pub fn new(outbound: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self {
            outbound,
            scripts: Tickets::default(),
            approvals: Tickets::default(),
            executions: Tickets::default(),
        }
    }

    pub fn send(&self, message: OutboundMessage) -> bool {
        self.outbound.send(message).is_ok()
    }

    pub fn disconnect(&self) {
        self.scripts.clear();
        self.approvals.clear();
        self.executions.clear();
    }

    /// Routes a shell answer to its waiting request.
    pub fn complete(&self, message: InboundMessage) -> Option<InboundMessage> {
        let (kind, ticket, delivered) = match message {
            InboundMessage::ScriptResult {
                ticket,
                result,
                error,
            } => {
                let value = match error {
                    Some(error) => Err(error),
                    None => Ok(result),
                };
                ("script", ticket, self.scripts.complete(ticket, value))
            }
            InboundMessage::ApprovalDecision {
                ticket,
                approved,
                params,
            } => (
                "approval",
                ticket,
                self.approvals
                    .complete(ticket, ApprovalReply { approved, params }),
            ),
            InboundMessage::ExecutionResult {
                ticket,
                result,
                error,
            } => {
                let value = match error {
                    Some(failure) => Err(failure),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                ("execution", ticket, self.executions.complete(ticket, value))
            }
            other => return Some(other),
        };
        if !delivered {
            debug!(kind, ticket, "answer for a request nobody is waiting on");
        }
        None
    }
}

/// [`BrowserSurface`] backed by the shell's webview.
pub struct StdioSurface {
    link: Arc<StdioLink>,
    settings: ProviderSettings,
    timeout: Duration,
}

impl StdioSurface {
    pub fn new(link: Arc<StdioLink>, settings: ProviderSettings, timeout: Duration) -> Self {
        Self {
            link,
            settings,
            timeout,
        }
    }
}

#[async_trait]
impl BrowserSurface for StdioSurface {
    async fn evaluate(&self, script: PageScript) -> Result<Option<String>, SurfaceError> {
        let (ticket, answer) = self.link.scripts.open();
        let message = OutboundMessage::Evaluate {
            ticket,
            kind: script.kind().to_string(),
            script: script.render(&self.settings),
        };
        if !self.link.send(message) {
            self.link.scripts.cancel(ticket);
            return Err(SurfaceError::Disconnected);
        }
        match tokio::time::timeout(self.timeout, answer).await {
            Err(_) => {
                self.link.scripts.cancel(ticket);
                Err(SurfaceError::Timeout(self.timeout.as_millis() as u64))
            }
            Ok(Err(_)) => Err(SurfaceError::Disconnected),
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(message))) => Err(SurfaceError::Script(message)),
        }
    }

    fn set_visible(&self, visible: bool) {
        self.link.send(OutboundMessage::SetVisible { visible });
    }
}

/// [`ApprovalUi`] backed by the shell's dialogs. A lost shell declines.
pub struct StdioApproval {
    link: Arc<StdioLink>,
}

impl StdioApproval {
    pub fn new(link: Arc<StdioLink>) -> Self {
        Self { link }
    }
}

#[async_trait]
impl ApprovalUi for StdioApproval {
    async fn request_approval(&self, request: ApprovalRequest) -> ApprovalDecision {
        let (ticket, answer) = self.link.approvals.open();
        let sent = self.link.send(OutboundMessage::ApprovalRequest {
            ticket,
            identifier: request.identifier.clone(),
            action: request.action.wire_name().to_string(),
            payload: request.payload.clone(),
            origin: request.origin.clone(),
        });
        if !sent {
            self.link.approvals.cancel(ticket);
            return ApprovalDecision::Declined;
        }
        match answer.await {
            Ok(ApprovalReply {
                approved: true,
                params,
            }) => ApprovalDecision::Accepted(params.unwrap_or(request.payload)),
            Ok(_) | Err(_) => ApprovalDecision::Declined,
        }
    }
}

/// Reads from local state, executes in the shell.
pub struct StdioWallet {
    link: Arc<StdioLink>,
    local: StaticWallet,
}

impl StdioWallet {
    pub fn new(link: Arc<StdioLink>, local: StaticWallet) -> Self {
        Self { link, local }
    }

    // Keeps later reads consistent with what the shell just did.
    fn track(&self, action: Action, params: &Map<String, Value>, result: &Value) {
        match action {
            Action::SwitchNetwork => {
                let network = result
                    .get("network")
                    .or_else(|| params.get("network"))
                    .and_then(Value::as_str);
                if let Some(network) = network {
                    self.local.set_network(network);
                }
            }
            Action::RequestAccounts => {
                let accounts: Option<Vec<String>> = result
                    .get("accounts")
                    .and_then(|a| serde_json::from_value(a.clone()).ok());
                if let Some(accounts) = accounts {
                    self.local.set_accounts(accounts);
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl WalletBackend for StdioWallet {
    fn read(&self, action: Action, payload: &Map<String, Value>) -> Result<Value, BackendError> {
        self.local.read(action, payload)
    }

    async fn execute(
        &self,
        action: Action,
        params: Map<String, Value>,
    ) -> Result<Value, BackendError> {
        let (ticket, answer) = self.link.executions.open();
        let sent = self.link.send(OutboundMessage::Execute {
            ticket,
            action: action.wire_name().to_string(),
            params: params.clone(),
        });
        if !sent {
            self.link.executions.cancel(ticket);
            return Err(BackendError::Unavailable);
        }
        match answer.await {
            Ok(Ok(result)) => {
                self.track(action, &params, &result);
                Ok(result)
            }
            Ok(Err(failure)) => Err(BackendError::rejected(failure.message, failure.code)),
            Err(_) => Err(BackendError::Unavailable),
        }
    }
}

fn route(
    link: &StdioLink,
    host: &Arc<BridgeHost>,
    events: &mpsc::UnboundedSender<BridgeEvent>,
    message: InboundMessage,
) {
    let Some(message) = link.complete(message) else {
        return;
    };
    let event = match message {
        InboundMessage::PageMessage { message } => BridgeEvent::Message(message),
        InboundMessage::NavigationStarted { url } => {
            BridgeEvent::Navigation(NavigationEvent::Started { url })
        }
        InboundMessage::NavigationFinished { url } => {
            BridgeEvent::Navigation(NavigationEvent::Finished { url })
        }
        InboundMessage::NavigationFailed {
            url,
            code,
            description,
        } => BridgeEvent::Navigation(NavigationEvent::Failed {
            url,
            code,
            description,
        }),
        InboundMessage::Emit { event, args } => {
            let host = Arc::clone(host);
            tokio::spawn(async move {
                if let Err(e) = host.emit(&event, args).await {
                    warn!(%event, error = %e, "emit failed");
                }
            });
            return;
        }
        InboundMessage::ScriptResult { .. }
        | InboundMessage::ApprovalDecision { .. }
        | InboundMessage::ExecutionResult { .. } => return,
    };
    if events.send(event).is_err() {
        warn!("bridge host stopped, dropping shell frame");
    }
}

fn join_error(e: tokio::task::JoinError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

impl OutboundMessage {
    /// Frames and writes this message to stdout.
    pub async fn write_to_stdout(&self) -> io::Result<()> {
        let frame = Frame::encode(self)?;
        tokio::task::spawn_blocking(move || frame.write_to(&mut io::stdout().lock()))
            .await
            .map_err(join_error)?
    }
}

// `None` once the shell closes stdin between frames.
async fn next_stdin_frame() -> io::Result<Option<Frame>> {
    tokio::task::spawn_blocking(|| Frame::read_from(&mut io::stdin().lock(), MAX_INBOUND))
        .await
        .map_err(join_error)?
}

/// Serves the bridge over stdin/stdout until the shell closes stdin.
pub async fn run(config: BridgeConfig) -> io::Result<()> {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(e) = message.write_to_stdout().await {
                error!(error = %e, "failed to write frame to shell");
                break;
            }
        }
    });

    let link = Arc::new(StdioLink::new(outbound_tx));
    let surface: Arc<dyn BrowserSurface> = Arc::new(StdioSurface::new(
        Arc::clone(&link),
        config.provider.clone(),
        config.stdio.script_timeout(),
    ));
    let wallet = Arc::new(StdioWallet::new(
        Arc::clone(&link),
        StaticWallet::new(config.wallet.clone()),
    ));
    let ui = Arc::new(StdioApproval::new(Arc::clone(&link)));
    let host = Arc::new(BridgeHost::from_config(&config, surface, wallet, ui));

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let serving = tokio::spawn(Arc::clone(&host).serve(events_rx));
    info!(
        global = %config.provider.global_name,
        platform = %config.provider.platform,
        "bridge host ready"
    );

    let result = loop {
        let frame = match next_stdin_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("shell closed stdin, shutting down");
                break Ok(());
            }
            Err(e) => break Err(e),
        };
        match frame.parse::<InboundMessage>() {
            Ok(message) => route(&link, &host, &events_tx, message),
            Err(e) => warn!(error = %e, bytes = frame.len(), "ignoring unrecognized frame"),
        }
    };

    drop(events_tx);
    link.disconnect();
    if let Err(e) = serving.await {
        error!(error = %e, "bridge host task failed");
    }
    writer.abort();
    result
}
