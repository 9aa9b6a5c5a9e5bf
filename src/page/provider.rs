use super::reply::PendingReply;
use super::table::{CorrelationTable, PendingCall};
use crate::config::ProviderSettings;
use crate::error::TransportError;
use crate::protocol::{Action, CallId, Failure, Outcome, PageLog, ResponseInvocation, WireCall};
use crate::script::{results, FALLBACK_STATUS};
use crate::transport::PageTransport;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// The capability API page scripts see. Implementors supply [`call`]; every
/// named method builds its payload from positional arguments and forwards.
///
/// [`call`]: Capabilities::call
pub trait Capabilities {
    /// Issues `action` with `payload` (an object, or `null` for none).
    fn call(&self, action: Action, payload: Value) -> PendingReply;

    fn request_accounts(&self) -> PendingReply {
        self.call(Action::RequestAccounts, Value::Null)
    }

    fn get_accounts(&self) -> PendingReply {
        self.call(Action::GetAccounts, Value::Null)
    }

    fn get_network(&self) -> PendingReply {
        self.call(Action::GetNetwork, Value::Null)
    }

    fn switch_network(&self, network: &str) -> PendingReply {
        self.call(Action::SwitchNetwork, args(&[("network", Some(network.into()))]))
    }

    fn get_public_key(&self) -> PendingReply {
        self.call(Action::GetPublicKey, Value::Null)
    }

    fn get_balance(&self) -> PendingReply {
        self.call(Action::GetBalance, Value::Null)
    }

    fn send_bitcoin(&self, address: &str, amount: u64, options: Option<Value>) -> PendingReply {
        self.call(
            Action::SendBitcoin,
            args(&[
                ("address", Some(address.into())),
                ("amount", Some(amount.into())),
                ("options", options),
            ]),
        )
    }

    fn sign_message(&self, message: &str, kind: Option<&str>) -> PendingReply {
        self.call(
            Action::SignMessage,
            args(&[("message", Some(message.into())), ("type", kind.map(Value::from))]),
        )
    }

    fn sign_psbt(&self, psbt_hex: &str, options: Option<Value>) -> PendingReply {
        self.call(
            Action::SignPsbt,
            args(&[("psbtHex", Some(psbt_hex.into())), ("options", options)]),
        )
    }

    fn get_inscriptions(&self) -> PendingReply {
        self.call(Action::GetInscriptions, Value::Null)
    }

    fn send_inscription(
        &self,
        inscription_id: &str,
        address: &str,
        options: Option<Value>,
    ) -> PendingReply {
        self.call(
            Action::SendInscription,
            args(&[
                ("inscriptionId", Some(inscription_id.into())),
                ("address", Some(address.into())),
                ("options", options),
            ]),
        )
    }

    fn get_utxos(&self, options: Option<Value>) -> PendingReply {
        self.call(Action::GetUtxos, args(&[("options", options)]))
    }

    fn get_asset_amount(&self, asset_id: &str) -> PendingReply {
        self.call(Action::GetAssetAmount, args(&[("assetId", Some(asset_id.into()))]))
    }

    fn get_current_name(&self) -> PendingReply {
        self.call(Action::GetCurrentName, Value::Null)
    }

    fn invoke_contract(
        &self,
        contract: Value,
        method: &str,
        params: Option<Value>,
        options: Option<Value>,
    ) -> PendingReply {
        self.call(
            Action::InvokeContract,
            args(&[
                ("contract", Some(contract)),
                ("method", Some(method.into())),
                ("params", params),
                ("options", options),
            ]),
        )
    }

    fn deploy_contract(&self, bytecode: &str, options: Option<Value>) -> PendingReply {
        self.call(
            Action::DeployContract,
            args(&[("bytecode", Some(bytecode.into())), ("options", options)]),
        )
    }

    fn batch_send_assets(&self, assets: Value, options: Option<Value>) -> PendingReply {
        self.call(
            Action::BatchSendAssets,
            args(&[("assets", Some(assets)), ("options", options)]),
        )
    }

    fn sign_psbts(&self, psbt_hexs: &[&str], options: Option<Value>) -> PendingReply {
        self.call(
            Action::SignPsbts,
            args(&[("psbtHexs", Some(psbt_hexs.into())), ("options", options)]),
        )
    }

    fn push_tx(&self, rawtx: &str, options: Option<Value>) -> PendingReply {
        self.call(
            Action::PushTx,
            args(&[("rawtx", Some(rawtx.into())), ("options", options)]),
        )
    }

    fn push_psbt(&self, psbt_hex: &str, options: Option<Value>) -> PendingReply {
        self.call(
            Action::PushPsbt,
            args(&[("psbtHex", Some(psbt_hex.into())), ("options", options)]),
        )
    }

    fn get_utxos_satsnet(&self, options: Option<Value>) -> PendingReply {
        self.call(Action::GetUtxosSatsNet, args(&[("options", options)]))
    }

    fn get_asset_amount_satsnet(&self, asset_id: &str) -> PendingReply {
        self.call(
            Action::GetAssetAmountSatsNet,
            args(&[("assetId", Some(asset_id.into()))]),
        )
    }

    /// `action` picks the chain and selection variant, one of the four
    /// `GET_UTXOS_WITH_ASSET*` actions.
    fn get_utxos_with_asset(
        &self,
        action: Action,
        address: &str,
        asset_name: &str,
        amt: Option<Value>,
    ) -> PendingReply {
        self.call(
            action,
            args(&[
                ("address", Some(address.into())),
                ("amt", amt),
                ("assetName", Some(asset_name.into())),
            ]),
        )
    }

    fn lock_utxo(&self, address: &str, utxo: &str, reason: Option<&str>) -> PendingReply {
        self.call(
            Action::LockUtxo,
            args(&[
                ("address", Some(address.into())),
                ("utxo", Some(utxo.into())),
                ("reason", reason.map(Value::from)),
            ]),
        )
    }

    fn unlock_utxo(&self, address: &str, utxo: &str) -> PendingReply {
        self.call(
            Action::UnlockUtxo,
            args(&[("address", Some(address.into())), ("utxo", Some(utxo.into()))]),
        )
    }

    fn get_all_locked_utxo(&self, address: &str) -> PendingReply {
        self.call(Action::GetAllLockedUtxo, args(&[("address", Some(address.into()))]))
    }

    fn batch_send_assets_v2(
        &self,
        dest_addr: &str,
        asset_name: &str,
        amt_list: Value,
        options: Option<Value>,
    ) -> PendingReply {
        self.call(
            Action::BatchSendAssetsV2,
            args(&[
                ("destAddr", Some(dest_addr.into())),
                ("assetName", Some(asset_name.into())),
                ("amtList", Some(amt_list)),
                ("options", options),
            ]),
        )
    }

    fn send_assets_satsnet(
        &self,
        address: &str,
        asset_name: &str,
        amt: Value,
        memo: Option<&str>,
        options: Option<Value>,
    ) -> PendingReply {
        self.call(
            Action::SendAssetsSatsNet,
            args(&[
                ("address", Some(address.into())),
                ("assetName", Some(asset_name.into())),
                ("amt", Some(amt)),
                ("memo", memo.map(Value::from)),
                ("options", options),
            ]),
        )
    }

    fn split_asset(&self, asset_key: &str, amount: Value, options: Option<Value>) -> PendingReply {
        self.call(
            Action::SplitAsset,
            args(&[
                ("asset_key", Some(asset_key.into())),
                ("amount", Some(amount)),
                ("options", options),
            ]),
        )
    }

    fn invoke_contract_satsnet(
        &self,
        url: &str,
        invoke: Value,
        fee_rate: Option<Value>,
        options: Option<Value>,
    ) -> PendingReply {
        self.call(
            Action::InvokeContractSatsNet,
            args(&[
                ("url", Some(url.into())),
                ("invoke", Some(invoke)),
                ("feeRate", fee_rate),
                ("options", options),
            ]),
        )
    }

    fn get_fee_for_deploy_contract(
        &self,
        template_name: &str,
        content: Value,
        fee_rate: Option<Value>,
    ) -> PendingReply {
        self.call(
            Action::GetFeeForDeployContract,
            args(&[
                ("templateName", Some(template_name.into())),
                ("content", Some(content)),
                ("feeRate", fee_rate),
            ]),
        )
    }

    fn get_fee_for_invoke_contract(&self, url: &str, invoke: Value) -> PendingReply {
        self.call(
            Action::GetFeeForInvokeContract,
            args(&[("url", Some(url.into())), ("invoke", Some(invoke))]),
        )
    }

    fn query_param_for_invoke_contract(&self, template_name: &str, action: &str) -> PendingReply {
        self.call(
            Action::QueryParamForInvokeContract,
            args(&[
                ("templateName", Some(template_name.into())),
                ("action", Some(action.into())),
            ]),
        )
    }

    fn register_as_referrer(
        &self,
        name: &str,
        fee_rate: Option<Value>,
        options: Option<Value>,
    ) -> PendingReply {
        self.call(
            Action::RegisterAsReferrer,
            args(&[
                ("name", Some(name.into())),
                ("feeRate", fee_rate),
                ("options", options),
            ]),
        )
    }

    fn bind_referrer_for_server(
        &self,
        referrer_name: &str,
        server_pub_key: &str,
        options: Option<Value>,
    ) -> PendingReply {
        self.call(
            Action::BindReferrerForServer,
            args(&[
                ("referrerName", Some(referrer_name.into())),
                ("serverPubKey", Some(server_pub_key.into())),
                ("options", options),
            ]),
        )
    }

    fn extract_tx_from_psbt(&self, psbt_hex: &str, chain: Option<&str>) -> PendingReply {
        self.call(
            Action::ExtractTxFromPsbt,
            args(&[
                ("psbtHex", Some(psbt_hex.into())),
                ("chain", chain.map(Value::from)),
            ]),
        )
    }
}

fn args(pairs: &[(&str, Option<Value>)]) -> Value {
    let map: Map<String, Value> = pairs
        .iter()
        .filter_map(|(name, value)| value.clone().map(|v| ((*name).to_string(), v)))
        .collect();
    Value::Object(map)
}

/// Result of handing an outcome to [`Provider::resolve_or_reject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intake {
    /// The pending call was removed and settled.
    Settled,
    /// No pending call had that identifier.
    Dropped,
}

impl Intake {
    pub fn as_script_result(self) -> &'static str {
        match self {
            Intake::Settled => results::SETTLED,
            Intake::Dropped => results::DROPPED,
        }
    }
}

/// Handle returned by [`Provider::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// One injected provider instance with its own correlation table.
pub struct Provider {
    instance: u64,
    settings: ProviderSettings,
    sequence: AtomicU64,
    table: CorrelationTable,
    transport: Arc<dyn PageTransport>,
    listeners: Mutex<HashMap<String, Vec<(ListenerId, Listener)>>>,
    next_listener: AtomicU64,
    injected_at: Instant,
}

impl Provider {
    pub fn new(
        instance: u64,
        settings: ProviderSettings,
        transport: Arc<dyn PageTransport>,
    ) -> Self {
        Self {
            instance,
            settings,
            sequence: AtomicU64::new(0),
            table: CorrelationTable::new(),
            transport,
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(0),
            injected_at: Instant::now(),
        }
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn injected_at(&self) -> Instant {
        self.injected_at
    }

    pub fn version(&self) -> &str {
        &self.settings.version
    }

    pub fn platform(&self) -> &str {
        &self.settings.platform
    }

    pub fn pending_calls(&self) -> usize {
        self.table.len()
    }

    pub fn pending_ids(&self) -> Vec<CallId> {
        self.table.ids()
    }

    pub fn is_pending(&self, id: &CallId) -> bool {
        self.table.contains(id)
    }

    fn next_id(&self) -> CallId {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        CallId::generate(&self.settings.id_prefix, self.instance, sequence, now_ms)
    }

    /// The response intake entry point (`resolveOrReject` / `handleResponse`).
    ///
    /// Total over its inputs: an identifier that is unknown, already settled
    /// or issued by another instance is logged and dropped.
    pub fn resolve_or_reject(
        &self,
        id: &CallId,
        result: Option<Value>,
        error: Option<Failure>,
    ) -> Intake {
        let Some(entry) = self.table.take(id) else {
            debug!(%id, instance = self.instance, "dropping response for unknown call");
            return Intake::Dropped;
        };
        let outcome = Outcome::from_parts(result, error);
        debug!(
            %id,
            action = %entry.action,
            elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
            success = outcome.is_success(),
            "settling call"
        );
        if !entry.settle(outcome) {
            debug!(%id, "caller stopped waiting before settlement");
        }
        Intake::Settled
    }

    pub fn deliver(&self, invocation: &ResponseInvocation) -> Intake {
        self.resolve_or_reject(
            &invocation.identifier,
            invocation.result.clone(),
            invocation.error.clone(),
        )
    }

    /// Forwards a diagnostic line to the host log. Nothing comes back.
    pub fn log(&self, level: &str, message: &str) -> Result<(), TransportError> {
        let line = serde_json::to_string(&PageLog::new(level, message))?;
        self.transport.post(line)
    }

    pub fn on(&self, event: &str, listener: impl Fn(&[Value]) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(list) = listeners.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        before != list.len()
    }

    /// Removes the listeners of `event`, or of every event when `None`.
    pub fn remove_all_listeners(&self, event: Option<&str>) {
        let mut listeners = self.listeners.lock();
        match event {
            Some(event) => {
                listeners.remove(event);
            }
            None => listeners.clear(),
        }
    }

    /// Calls each listener of `event` in registration order. A panicking
    /// listener is logged and skipped. Returns whether any listener ran.
    pub fn emit(&self, event: &str, event_args: &[Value]) -> bool {
        let list: Vec<Listener> = self
            .listeners
            .lock()
            .get(event)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();
        for listener in &list {
            if catch_unwind(AssertUnwindSafe(|| listener(event_args))).is_err() {
                warn!(event, "provider event listener panicked");
            }
        }
        !list.is_empty()
    }
}

impl Capabilities for Provider {
    fn call(&self, action: Action, payload: Value) -> PendingReply {
        let payload = match payload {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            _ => return PendingReply::settled(Failure::invalid_request().into()),
        };
        if let Some(field) = action.missing_field(&payload) {
            return PendingReply::settled(Failure::missing_field(field).into());
        }

        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.table.insert(
            id.clone(),
            PendingCall {
                action,
                tier: action.tier(),
                created_at: Instant::now(),
                settle: tx,
            },
        );

        let posted = serde_json::to_string(&WireCall::new(id.clone(), action, payload))
            .map_err(TransportError::from)
            .and_then(|message| self.transport.post(message));
        if let Err(e) = posted {
            warn!(%id, %action, error = %e, "failed to post call to host");
            if let Some(entry) = self.table.take(&id) {
                entry.settle(Failure::bridge_unavailable().into());
            }
        } else {
            debug!(%id, %action, "posted call");
        }
        PendingReply::waiting(id, rx)
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("instance", &self.instance)
            .field("pending", &self.table.len())
            .finish()
    }
}

/// Provider installed after a failed page load: every call rejects at once
/// and nothing reaches the transport.
#[derive(Debug, Clone)]
pub struct FallbackProvider {
    description: String,
}

impl FallbackProvider {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }

    pub fn status(&self) -> &'static str {
        FALLBACK_STATUS
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl Capabilities for FallbackProvider {
    fn call(&self, _action: Action, _payload: Value) -> PendingReply {
        PendingReply::settled(Failure::page_load_failed().into())
    }
}
