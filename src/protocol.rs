//! Wire types shared by the page side and the host side of the bridge.
//!
//! Everything that crosses the transport is defined here: call identifiers,
//! trust tiers, the closed [`Action`] table, the page→host [`WireCall`]
//! record and the host→page [`ResponseInvocation`].

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Error codes carried in [`Failure::code`].
pub mod codes {
    /// Malformed request, unknown action or missing required field.
    pub const INVALID_REQUEST: i64 = -1;
    /// The user declined the approval prompt.
    pub const USER_DECLINED: i64 = 4001;
    /// The page origin has not been authorized through `requestAccounts`.
    pub const UNAUTHORIZED: i64 = 4100;
    /// The wallet backend does not implement the action.
    pub const UNSUPPORTED: i64 = 4200;
    /// The page failed to load; the fallback provider answered.
    pub const PAGE_LOAD_FAILED: i64 = 4900;
    /// The provider could not reach the native interface.
    pub const BRIDGE_UNAVAILABLE: i64 = 4901;
    /// Unexpected failure inside a handler.
    pub const INTERNAL: i64 = -32603;
}

/// Opaque identifier correlating one outgoing call with its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Builds `{prefix}_{instance}_{sequence}_{timestamp_ms}`.
    ///
    /// `instance` separates providers re-injected into the same page, so a
    /// late response for a discarded provider can never collide with an
    /// identifier issued by its successor.
    pub fn generate(prefix: &str, instance: u64, sequence: u64, timestamp_ms: u128) -> Self {
        Self(format!("{prefix}_{instance}_{sequence}_{timestamp_ms}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Access class of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrustTier {
    /// Answered from local state, never prompts the user.
    #[serde(rename = "REQUEST", alias = "READ_ONLY")]
    ReadOnly,
    /// Executes only after the user accepted an approval prompt.
    #[serde(rename = "APPROVE", alias = "APPROVAL_REQUIRED")]
    ApprovalRequired,
}

impl TrustTier {
    pub fn as_wire(self) -> &'static str {
        match self {
            TrustTier::ReadOnly => "REQUEST",
            TrustTier::ApprovalRequired => "APPROVE",
        }
    }

    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "REQUEST" | "READ_ONLY" => Some(TrustTier::ReadOnly),
            "APPROVE" | "APPROVAL_REQUIRED" => Some(TrustTier::ApprovalRequired),
            _ => None,
        }
    }
}

impl fmt::Display for TrustTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

// Every row must name its tier; there is no default.
macro_rules! action_table {
    ($(
        $variant:ident => $wire:literal, $method:literal, $tier:ident,
            params [$($param:literal),*], required [$($required:literal),*];
    )+) => {
        /// Every action the bridge understands.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Action {
            $($variant,)+
        }

        impl Action {
            pub const ALL: &'static [Action] = &[$(Action::$variant,)+];

            /// Name used in [`WireCall::action`].
            pub fn wire_name(self) -> &'static str {
                match self {
                    $(Action::$variant => $wire,)+
                }
            }

            /// Method name on the page-side provider object.
            pub fn method_name(self) -> &'static str {
                match self {
                    $(Action::$variant => $method,)+
                }
            }

            pub fn tier(self) -> TrustTier {
                match self {
                    $(Action::$variant => TrustTier::$tier,)+
                }
            }

            /// Positional parameters of the provider method, in order; each
            /// becomes a payload field of the same name.
            pub fn params(self) -> &'static [&'static str] {
                match self {
                    $(Action::$variant => &[$($param),*],)+
                }
            }

            /// Payload fields that must be present and non-null.
            pub fn required_fields(self) -> &'static [&'static str] {
                match self {
                    $(Action::$variant => &[$($required),*],)+
                }
            }
        }
    };
}

action_table! {
    // Accounts and network.
    RequestAccounts => "REQUEST_ACCOUNTS", "requestAccounts", ApprovalRequired,
        params [], required [];
    GetAccounts => "GET_ACCOUNTS", "getAccounts", ReadOnly,
        params [], required [];
    GetNetwork => "GET_NETWORK", "getNetwork", ReadOnly,
        params [], required [];
    SwitchNetwork => "SWITCH_NETWORK", "switchNetwork", ApprovalRequired,
        params ["network"], required ["network"];
    GetPublicKey => "GET_PUBLIC_KEY", "getPublicKey", ReadOnly,
        params [], required [];
    GetBalance => "GET_BALANCE", "getBalance", ReadOnly,
        params [], required [];
    GetCurrentName => "GET_CURRENT_NAME", "getCurrentName", ReadOnly,
        params [], required [];

    // Transactions.
    SendBitcoin => "SEND_BITCOIN", "sendBitcoin", ApprovalRequired,
        params ["address", "amount", "options"], required ["address", "amount"];
    SignMessage => "SIGN_MESSAGE", "signMessage", ApprovalRequired,
        params ["message", "type"], required ["message"];
    SignPsbt => "SIGN_PSBT", "signPsbt", ApprovalRequired,
        params ["psbtHex", "options"], required ["psbtHex"];
    SignPsbts => "SIGN_PSBTS", "signPsbts", ApprovalRequired,
        params ["psbtHexs", "options"], required ["psbtHexs"];
    PushTx => "PUSH_TX", "pushTx", ReadOnly,
        params ["rawtx", "options"], required ["rawtx"];
    PushPsbt => "PUSH_PSBT", "pushPsbt", ReadOnly,
        params ["psbtHex", "options"], required ["psbtHex"];
    GetInscriptions => "GET_INSCRIPTIONS", "getInscriptions", ReadOnly,
        params [], required [];
    SendInscription => "SEND_INSCRIPTION", "sendInscription", ApprovalRequired,
        params ["inscriptionId", "address", "options"], required ["inscriptionId", "address"];

    // UTXOs and assets.
    GetUtxos => "GET_UTXOS", "getUtxos", ReadOnly,
        params ["options"], required [];
    GetUtxosSatsNet => "GET_UTXOS_SATSNET", "getUtxosSatsNet", ReadOnly,
        params ["options"], required [];
    GetAssetAmount => "GET_ASSET_AMOUNT", "getAssetAmount", ReadOnly,
        params ["assetId"], required ["assetId"];
    GetAssetAmountSatsNet => "GET_ASSET_AMOUNT_SATSNET", "getAssetAmountSatsNet", ReadOnly,
        params ["assetId"], required ["assetId"];
    GetUtxosWithAsset => "GET_UTXOS_WITH_ASSET", "getUtxosWithAsset", ReadOnly,
        params ["address", "amt", "assetName"], required ["address", "assetName"];
    GetUtxosWithAssetSatsNet => "GET_UTXOS_WITH_ASSET_SATSNET", "getUtxosWithAssetSatsNet", ReadOnly,
        params ["address", "amt", "assetName"], required ["address", "assetName"];
    GetUtxosWithAssetV2 => "GET_UTXOS_WITH_ASSET_V2", "getUtxosWithAssetV2", ReadOnly,
        params ["address", "amt", "assetName"], required ["address", "assetName"];
    GetUtxosWithAssetV2SatsNet => "GET_UTXOS_WITH_ASSET_V2_SATSNET", "getUtxosWithAssetV2SatsNet", ReadOnly,
        params ["address", "amt", "assetName"], required ["address", "assetName"];
    LockUtxo => "LOCK_UTXO", "lockUtxo", ReadOnly,
        params ["address", "utxo", "reason"], required ["address", "utxo"];
    UnlockUtxo => "UNLOCK_UTXO", "unlockUtxo", ReadOnly,
        params ["address", "utxo"], required ["address", "utxo"];
    GetAllLockedUtxo => "GET_ALL_LOCKED_UTXO", "getAllLockedUtxo", ReadOnly,
        params ["address"], required ["address"];
    BatchSendAssets => "BATCH_SEND_ASSETS_SATSNET", "batchSendAssetsSatsNet", ApprovalRequired,
        params ["assets", "options"], required ["assets"];
    BatchSendAssetsV2 => "BATCH_SEND_ASSETS_V2_SATSNET", "batchSendAssetsV2SatsNet", ApprovalRequired,
        params ["destAddr", "assetName", "amtList", "options"], required ["destAddr", "assetName", "amtList"];
    SendAssetsSatsNet => "SEND_ASSETS_SATSNET", "sendAssetsSatsNet", ApprovalRequired,
        params ["address", "assetName", "amt", "memo", "options"], required ["address", "assetName", "amt"];
    SplitAsset => "SPLIT_ASSET", "splitAsset", ApprovalRequired,
        params ["asset_key", "amount", "options"], required ["asset_key", "amount"];

    // Contracts.
    InvokeContract => "INVOKE_CONTRACT_V2", "invokeContract", ApprovalRequired,
        params ["contract", "method", "params", "options"], required ["contract", "method"];
    InvokeContractSatsNet => "INVOKE_CONTRACT_SATSNET", "invokeContractSatsNet", ApprovalRequired,
        params ["url", "invoke", "feeRate", "options"], required ["url", "invoke"];
    InvokeContractV2SatsNet => "INVOKE_CONTRACT_V2_SATSNET", "invokeContractV2_SatsNet", ApprovalRequired,
        params ["url", "invoke", "assetName", "amt", "feeRate", "metadata", "options"], required ["url", "invoke"];
    DeployContract => "DEPLOY_CONTRACT_REMOTE", "deployContract", ApprovalRequired,
        params ["bytecode", "options"], required ["bytecode"];
    GetFeeForDeployContract => "GET_FEE_FOR_DEPLOY_CONTRACT", "getFeeForDeployContract", ReadOnly,
        params ["templateName", "content", "feeRate"], required ["templateName", "content"];
    GetFeeForInvokeContract => "GET_FEE_FOR_INVOKE_CONTRACT", "getFeeForInvokeContract", ReadOnly,
        params ["url", "invoke"], required ["url", "invoke"];
    QueryParamForInvokeContract => "QUERY_PARAM_FOR_INVOKE_CONTRACT", "queryParamForInvokeContract", ReadOnly,
        params ["templateName", "action"], required ["templateName", "action"];

    // Referrers.
    RegisterAsReferrer => "REGISTER_AS_REFERRER", "registerAsReferrer", ApprovalRequired,
        params ["name", "feeRate", "options"], required ["name"];
    BindReferrerForServer => "BIND_REFERRER_FOR_SERVER", "bindReferrerForServer", ApprovalRequired,
        params ["referrerName", "serverPubKey", "options"], required ["referrerName", "serverPubKey"];

    // PSBT utilities. They transform data the page already holds.
    BuildBatchSellOrder => "BUILD_BATCH_SELL_ORDER", "buildBatchSellOrder", ReadOnly,
        params ["utxos", "address", "network"], required ["utxos", "address"];
    SplitBatchSignedPsbtSatsNet => "SPLIT_BATCH_SIGNED_PSBT_SATSNET", "splitBatchSignedPsbtSatsNet", ReadOnly,
        params ["signedHex", "network"], required ["signedHex"];
    FinalizeSellOrder => "FINALIZE_SELL_ORDER", "finalizeSellOrder", ReadOnly,
        params ["psbtHex", "utxos", "buyerAddress", "serverAddress", "network", "serviceFee", "networkFee"],
        required ["psbtHex", "utxos", "buyerAddress", "serverAddress"];
    MergeBatchSignedPsbt => "MERGE_BATCH_SIGNED_PSBT", "mergeBatchSignedPsbt", ReadOnly,
        params ["psbts", "network"], required ["psbts"];
    AddInputsToPsbt => "ADD_INPUTS_TO_PSBT", "addInputsToPsbt", ReadOnly,
        params ["psbtHex", "utxos"], required ["psbtHex", "utxos"];
    AddOutputsToPsbt => "ADD_OUTPUTS_TO_PSBT", "addOutputsToPsbt", ReadOnly,
        params ["psbtHex", "utxos"], required ["psbtHex", "utxos"];
    ExtractTxFromPsbt => "EXTRACT_TX_FROM_PSBT", "extractTxFromPsbt", ReadOnly,
        params ["psbtHex", "chain"], required ["psbtHex"];
    ExtractTxFromPsbtSatsNet => "EXTRACT_TX_FROM_PSBT_SATSNET", "extractTxFromPsbtSatsNet", ReadOnly,
        params ["psbtHex"], required ["psbtHex"];
}

static BY_WIRE_NAME: Lazy<HashMap<&'static str, Action>> = Lazy::new(|| {
    let mut table = HashMap::with_capacity(Action::ALL.len());
    for &action in Action::ALL {
        let previous = table.insert(action.wire_name(), action);
        debug_assert!(previous.is_none(), "duplicate wire name {}", action.wire_name());
    }
    table
});

impl Action {
    /// Looks up an action by wire name. Unknown names yield `None`, never a
    /// default tier.
    pub fn from_wire(name: &str) -> Option<Action> {
        BY_WIRE_NAME.get(name).copied()
    }

    /// Checks `payload` against [`Action::required_fields`], returning the
    /// first missing field.
    pub fn missing_field(self, payload: &Map<String, Value>) -> Option<&'static str> {
        self.required_fields()
            .iter()
            .copied()
            .find(|field| payload.get(*field).map_or(true, Value::is_null))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Error half of an [`Outcome`], as seen by page scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub message: String,
    pub code: i64,
}

impl Failure {
    pub fn new(message: impl Into<String>, code: i64) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    pub fn invalid_request() -> Self {
        Self::new("invalid request data", codes::INVALID_REQUEST)
    }

    pub fn unknown_action() -> Self {
        Self::new("unknown action", codes::INVALID_REQUEST)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(format!("missing required field: {field}"), codes::INVALID_REQUEST)
    }

    pub fn user_declined() -> Self {
        Self::new("user declined", codes::USER_DECLINED)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            "origin not authorized, call requestAccounts first",
            codes::UNAUTHORIZED,
        )
    }

    pub fn page_load_failed() -> Self {
        Self::new("page failed to load properly", codes::PAGE_LOAD_FAILED)
    }

    pub fn bridge_unavailable() -> Self {
        Self::new("native bridge not available", codes::BRIDGE_UNAVAILABLE)
    }

    /// Generic message for handler faults; details stay in the host log.
    pub fn internal() -> Self {
        Self::new("internal error", codes::INTERNAL)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Result of one call. Exactly one is produced per [`CallId`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Failure(Failure),
}

impl Outcome {
    /// Reassembles an outcome from the `(result, error)` pair of the intake
    /// entry point. A present error wins; a missing result is `null`.
    pub fn from_parts(result: Option<Value>, error: Option<Failure>) -> Self {
        match error {
            Some(failure) => Outcome::Failure(failure),
            None => Outcome::Success(result.unwrap_or(Value::Null)),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Failure(failure) => Some(failure),
            Outcome::Success(_) => None,
        }
    }

    pub fn into_result(self) -> Result<Value, Failure> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(failure) => Err(failure),
        }
    }
}

impl From<Failure> for Outcome {
    fn from(failure: Failure) -> Self {
        Outcome::Failure(failure)
    }
}

/// Page→host call record, serialized as JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCall {
    pub identifier: CallId,
    /// Advisory only; the dispatch table decides the tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_tier_claimed: Option<String>,
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

impl WireCall {
    pub fn new(identifier: CallId, action: Action, payload: Map<String, Value>) -> Self {
        Self {
            identifier,
            trust_tier_claimed: Some(action.tier().as_wire().to_string()),
            action: action.wire_name().to_string(),
            payload: Value::Object(payload),
        }
    }
}

/// Informational page→host message that expects no response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderNotification {
    pub notification: String,
    #[serde(flatten)]
    pub detail: Map<String, Value>,
}

/// A diagnostic line the page asked the host to log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLog {
    #[serde(rename = "log")]
    pub level: String,
    #[serde(default)]
    pub message: String,
}

impl PageLog {
    pub fn new(level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            message: message.into(),
        }
    }

    /// Host log level for the page's label. Unknown labels log at info.
    pub fn level(&self) -> tracing::Level {
        match self.level.to_ascii_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" | "warning" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// Notification kinds posted by the injected provider.
pub mod notifications {
    pub const INJECTION_SUCCESS: &str = "INJECTION_SUCCESS";
    pub const ALREADY_EXISTS: &str = "ALREADY_EXISTS";
}

/// Host→page delivery of one outcome: the arguments of
/// `provider.handleResponse(identifier, result, error)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseInvocation {
    pub identifier: CallId,
    pub result: Option<Value>,
    pub error: Option<Failure>,
}

impl ResponseInvocation {
    pub fn new(identifier: CallId, outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success(value) => Self {
                identifier,
                result: Some(value),
                error: None,
            },
            Outcome::Failure(failure) => Self {
                identifier,
                result: None,
                error: Some(failure),
            },
        }
    }

    pub fn outcome(&self) -> Outcome {
        Outcome::from_parts(self.result.clone(), self.error.clone())
    }
}

/// Host→page event push: `provider.emit(event, ...args)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventInvocation {
    pub event: String,
    #[serde(default)]
    pub args: Vec<Value>,
}
