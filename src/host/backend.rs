//! The wallet behind the dispatcher.
//!
//! Keys, signing and broadcast live outside the bridge; the dispatcher only
//! sees a [`WalletBackend`] and its success or failure.

use crate::protocol::{codes, Action, Failure};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    /// A business failure the page may see verbatim.
    #[error("{message} (code {code})")]
    Rejected { message: String, code: i64 },
    #[error("{0} is not supported by this wallet")]
    Unsupported(Action),
    /// The component executing privileged actions is gone.
    #[error("wallet backend unavailable")]
    Unavailable,
    /// An unexpected fault. The detail is logged, never shown to the page.
    #[error("internal wallet error: {0}")]
    Internal(String),
}

impl BackendError {
    pub fn rejected(message: impl Into<String>, code: i64) -> Self {
        BackendError::Rejected {
            message: message.into(),
            code,
        }
    }

    pub fn into_failure(self) -> Failure {
        match self {
            BackendError::Rejected { message, code } => Failure::new(message, code),
            BackendError::Unsupported(action) => Failure::new(
                format!("{action} is not supported by this wallet"),
                codes::UNSUPPORTED,
            ),
            BackendError::Unavailable => Failure::bridge_unavailable(),
            BackendError::Internal(_) => Failure::internal(),
        }
    }
}

#[async_trait]
pub trait WalletBackend: Send + Sync {
    /// Answers a read-only action from local state. Must not block or prompt.
    fn read(&self, action: Action, payload: &Map<String, Value>) -> Result<Value, BackendError>;

    /// Runs an approved privileged action with the parameters the user
    /// accepted.
    async fn execute(&self, action: Action, params: Map<String, Value>)
        -> Result<Value, BackendError>;
}

/// Wallet state served to read-only actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletState {
    pub accounts: Vec<String>,
    pub network: String,
    pub chain_id: String,
    pub balance: String,
    pub asset_balance: BTreeMap<String, String>,
    pub public_key: String,
    pub inscriptions: Vec<Value>,
    pub utxos: Vec<Value>,
    pub satsnet_utxos: Vec<Value>,
    /// Per-asset amounts for `getAssetAmount`; unknown assets report "0".
    pub asset_amounts: BTreeMap<String, String>,
    pub satsnet_asset_amounts: BTreeMap<String, String>,
    pub current_name: String,
    /// Locked outpoints by owning address.
    pub locked_utxos: BTreeMap<String, Vec<String>>,
}

impl Default for WalletState {
    fn default() -> Self {
        Self {
            accounts: vec!["bc1p...example".to_string()],
            network: "satsnet-test".to_string(),
            chain_id: "satsnet-test".to_string(),
            balance: "1000000".to_string(),
            asset_balance: BTreeMap::new(),
            public_key: String::new(),
            inscriptions: Vec::new(),
            utxos: Vec::new(),
            satsnet_utxos: Vec::new(),
            asset_amounts: BTreeMap::new(),
            satsnet_asset_amounts: BTreeMap::new(),
            current_name: String::new(),
            locked_utxos: BTreeMap::new(),
        }
    }
}

impl WalletState {
    /// The read-only answer for `action`, or `None` if it is not a read.
    pub fn answer(&self, action: Action, payload: &Map<String, Value>) -> Option<Value> {
        let value = match action {
            Action::GetAccounts => json!({ "accounts": self.accounts, "chainId": self.chain_id }),
            Action::GetNetwork => json!({ "network": self.network, "chainId": self.chain_id }),
            Action::GetBalance => {
                json!({ "balance": self.balance, "assetBalance": self.asset_balance })
            }
            Action::GetPublicKey => json!({ "publicKey": self.public_key }),
            Action::GetInscriptions => {
                json!({ "inscriptions": self.inscriptions, "total": self.inscriptions.len() })
            }
            Action::GetUtxos => json!({ "utxos": self.utxos }),
            Action::GetUtxosSatsNet => json!({ "utxos": self.satsnet_utxos }),
            Action::GetAssetAmount => amount_of(&self.asset_amounts, payload),
            Action::GetAssetAmountSatsNet => amount_of(&self.satsnet_asset_amounts, payload),
            Action::GetUtxosWithAsset | Action::GetUtxosWithAssetV2 => {
                json!({ "utxos": holding(&self.utxos, payload) })
            }
            Action::GetUtxosWithAssetSatsNet | Action::GetUtxosWithAssetV2SatsNet => {
                json!({ "utxos": holding(&self.satsnet_utxos, payload) })
            }
            Action::GetAllLockedUtxo => {
                let address = str_field(payload, "address");
                let locked = self.locked_utxos.get(address).cloned().unwrap_or_default();
                json!({ "address": address, "utxos": locked })
            }
            Action::GetCurrentName => json!({ "name": self.current_name }),
            _ => return None,
        };
        Some(value)
    }
}

fn str_field<'a>(payload: &'a Map<String, Value>, field: &str) -> &'a str {
    payload.get(field).and_then(Value::as_str).unwrap_or_default()
}

fn amount_of(amounts: &BTreeMap<String, String>, payload: &Map<String, Value>) -> Value {
    let asset_id = str_field(payload, "assetId");
    let amount = amounts.get(asset_id).map(String::as_str).unwrap_or("0");
    json!({ "assetId": asset_id, "amount": amount })
}

// Outputs tagged with the requested `assetName`.
fn holding(utxos: &[Value], payload: &Map<String, Value>) -> Vec<Value> {
    let asset = str_field(payload, "assetName");
    utxos
        .iter()
        .filter(|utxo| utxo.get("assetName").and_then(Value::as_str) == Some(asset))
        .cloned()
        .collect()
}

/// A backend answering from configured [`WalletState`].
///
/// It grants `requestAccounts` and `switchNetwork` and keeps UTXO locks in
/// memory. Broadcasts, fee estimates, PSBT utilities and every other
/// privileged action report [`BackendError::Unsupported`].
#[derive(Debug, Default)]
pub struct StaticWallet {
    state: RwLock<WalletState>,
}

impl StaticWallet {
    pub fn new(state: WalletState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn state(&self) -> WalletState {
        self.state.read().clone()
    }

    pub fn set_network(&self, network: &str) {
        let mut state = self.state.write();
        state.network = network.to_string();
        state.chain_id = network.to_string();
    }

    pub fn set_accounts(&self, accounts: Vec<String>) {
        self.state.write().accounts = accounts;
    }

    fn set_lock(&self, payload: &Map<String, Value>, locked: bool) -> Value {
        let address = str_field(payload, "address");
        let utxo = str_field(payload, "utxo");
        let mut state = self.state.write();
        let entries = state.locked_utxos.entry(address.to_string()).or_default();
        let changed = if locked {
            let fresh = !entries.iter().any(|e| e == utxo);
            if fresh {
                entries.push(utxo.to_string());
            }
            fresh
        } else {
            let before = entries.len();
            entries.retain(|e| e != utxo);
            before != entries.len()
        };
        if entries.is_empty() {
            state.locked_utxos.remove(address);
        }
        json!({ "utxo": utxo, "locked": locked, "changed": changed })
    }
}

#[async_trait]
impl WalletBackend for StaticWallet {
    fn read(&self, action: Action, payload: &Map<String, Value>) -> Result<Value, BackendError> {
        match action {
            Action::LockUtxo => Ok(self.set_lock(payload, true)),
            Action::UnlockUtxo => Ok(self.set_lock(payload, false)),
            _ => self
                .state
                .read()
                .answer(action, payload)
                .ok_or(BackendError::Unsupported(action)),
        }
    }

    async fn execute(
        &self,
        action: Action,
        params: Map<String, Value>,
    ) -> Result<Value, BackendError> {
        match action {
            Action::RequestAccounts => {
                let state = self.state.read();
                Ok(json!({ "accounts": state.accounts, "chainId": state.chain_id }))
            }
            Action::SwitchNetwork => {
                let network = params
                    .get("network")
                    .and_then(Value::as_str)
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| BackendError::rejected("network must be a non-empty string", codes::INVALID_REQUEST))?;
                self.set_network(network);
                Ok(json!({ "network": network }))
            }
            other => Err(BackendError::Unsupported(other)),
        }
    }
}
