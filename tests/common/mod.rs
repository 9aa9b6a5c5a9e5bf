#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::env;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;
use webview_bridge::config::BridgeConfig;
use webview_bridge::host::{
    ApprovalDecision, ApprovalRequest, ApprovalUi, BackendError, BridgeHost, StaticWallet,
    WalletBackend, WalletState,
};
use webview_bridge::page::{PageContext, Provider};
use webview_bridge::transport::{decode_page_message, PageMessage};
use webview_bridge::{Action, Outcome, WireCall};

/// Env guard that restores previous env vars on drop.
pub struct EnvGuard {
    old: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn set(vars: &[(&str, String)]) -> Self {
        let mut old = HashMap::new();
        for (k, v) in vars {
            old.insert((*k).to_string(), env::var(k).ok());
            env::set_var(k, v);
        }
        Self { old }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (k, prev) in self.old.drain() {
            match prev {
                Some(v) => env::set_var(k, v),
                None => env::remove_var(k),
            }
        }
    }
}

/// Temp sandbox with HOME/XDG/APPDATA/PROGRAMDATA pointing into it, so config
/// writes never touch the real profile.
pub fn sandbox_env() -> (TempDir, EnvGuard) {
    let td = TempDir::new().expect("tempdir");
    let root = td.path().to_path_buf();

    let home = root.join("home");
    let xdg = home.join(".config");
    let appdata = root.join("appdata_roaming");
    let programdata = root.join("programdata");
    for dir in [&home, &xdg, &appdata, &programdata] {
        std::fs::create_dir_all(dir).unwrap();
    }

    let guard = EnvGuard::set(&[
        ("HOME", home.to_string_lossy().to_string()),
        ("XDG_CONFIG_HOME", xdg.to_string_lossy().to_string()),
        ("APPDATA", appdata.to_string_lossy().to_string()),
        ("PROGRAMDATA", programdata.to_string_lossy().to_string()),
    ]);

    (td, guard)
}

/// Approval UI answering from a script of decisions; declines once the
/// script runs out. Every request is recorded.
#[derive(Default)]
pub struct ScriptedUi {
    decisions: Mutex<VecDeque<bool>>,
    accept_all: bool,
    pub requests: Mutex<Vec<ApprovalRequest>>,
}

impl ScriptedUi {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self {
            accept_all: true,
            ..Self::default()
        })
    }

    pub fn declining() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(decisions: &[bool]) -> Arc<Self> {
        Arc::new(Self {
            decisions: Mutex::new(decisions.iter().copied().collect()),
            ..Self::default()
        })
    }

    pub fn prompts(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ApprovalUi for ScriptedUi {
    async fn request_approval(&self, request: ApprovalRequest) -> ApprovalDecision {
        let payload = request.payload.clone();
        self.requests.lock().push(request);
        let accept = self.accept_all || self.decisions.lock().pop_front().unwrap_or(false);
        if accept {
            ApprovalDecision::Accepted(payload)
        } else {
            ApprovalDecision::Declined
        }
    }
}

/// Static wallet that records what reached it and can be told to panic.
pub struct RecordingWallet {
    inner: StaticWallet,
    pub reads: Mutex<Vec<Action>>,
    pub executed: Mutex<Vec<(Action, Map<String, Value>)>>,
    panic_on: Option<Action>,
}

impl RecordingWallet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: StaticWallet::new(WalletState::default()),
            reads: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            panic_on: None,
        })
    }

    pub fn panicking_on(action: Action) -> Arc<Self> {
        Arc::new(Self {
            inner: StaticWallet::new(WalletState::default()),
            reads: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            panic_on: Some(action),
        })
    }

    pub fn touched(&self) -> usize {
        self.reads.lock().len() + self.executed.lock().len()
    }
}

#[async_trait]
impl WalletBackend for RecordingWallet {
    fn read(&self, action: Action, payload: &Map<String, Value>) -> Result<Value, BackendError> {
        self.reads.lock().push(action);
        if self.panic_on == Some(action) {
            panic!("wallet state corrupted");
        }
        self.inner.read(action, payload)
    }

    async fn execute(
        &self,
        action: Action,
        params: Map<String, Value>,
    ) -> Result<Value, BackendError> {
        self.executed.lock().push((action, params.clone()));
        if self.panic_on == Some(action) {
            panic!("signer crashed");
        }
        match action {
            Action::RequestAccounts | Action::SwitchNetwork => {
                self.inner.execute(action, params).await
            }
            _ => Ok(serde_json::json!({ "txid": "f00d", "status": "approved" })),
        }
    }
}

/// An in-process page wired to a host.
pub struct Harness {
    pub page: Arc<PageContext>,
    pub host: Arc<BridgeHost>,
    pub wallet: Arc<RecordingWallet>,
    pub calls: mpsc::UnboundedReceiver<String>,
}

impl Harness {
    pub fn new(ui: Arc<dyn ApprovalUi>) -> Self {
        Self::with(BridgeConfig::default(), ui, RecordingWallet::new())
    }

    pub fn with(config: BridgeConfig, ui: Arc<dyn ApprovalUi>, wallet: Arc<RecordingWallet>) -> Self {
        let (tx, calls) = mpsc::unbounded_channel();
        let page = Arc::new(PageContext::new(config.provider.clone(), Arc::new(tx)));
        let host = Arc::new(BridgeHost::from_config(
            &config,
            page.clone(),
            wallet.clone(),
            ui,
        ));
        Self {
            page,
            host,
            wallet,
            calls,
        }
    }

    /// Navigates to `url` and lets the host inject the provider.
    pub async fn load(&mut self, url: &str) {
        self.host
            .handle_navigation(self.page.begin_navigation(url))
            .await;
        self.host.handle_navigation(self.page.finish_navigation()).await;
        self.drain_notifications();
    }

    pub fn provider(&self) -> Arc<Provider> {
        self.page.full_provider().expect("provider installed")
    }

    /// Next call the page posted, skipping provider notifications.
    pub fn next_call(&mut self) -> Option<WireCall> {
        while let Ok(raw) = self.calls.try_recv() {
            if let PageMessage::Call(call) = decode_page_message(&raw) {
                return Some(call);
            }
        }
        None
    }

    pub fn drain_notifications(&mut self) -> usize {
        let mut count = 0;
        while let Ok(_raw) = self.calls.try_recv() {
            count += 1;
        }
        count
    }

    /// Hands every posted message to the host, one after another.
    pub async fn pump(&mut self) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while let Ok(raw) = self.calls.try_recv() {
            if let Some(outcome) = self.host.handle_message(&raw).await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }
}
