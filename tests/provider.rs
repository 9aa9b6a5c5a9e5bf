mod common;

use common::{Harness, ScriptedUi};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use webview_bridge::config::ProviderSettings;
use webview_bridge::page::{Capabilities, Intake, ReplyStatus};
use webview_bridge::protocol::codes;
use webview_bridge::script::results;
use webview_bridge::transport::{decode_page_message, PageMessage};
use webview_bridge::{
    Action, BrowserSurface, CallId, Failure, Outcome, PageScript, Provider, ResponseInvocation,
};

fn provider() -> (Provider, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Provider::new(1, ProviderSettings::default(), Arc::new(tx)), rx)
}

fn posted_call(rx: &mut mpsc::UnboundedReceiver<String>) -> webview_bridge::WireCall {
    match decode_page_message(&rx.try_recv().expect("message posted")) {
        PageMessage::Call(call) => call,
        other => panic!("expected a call, got {other:?}"),
    }
}

#[tokio::test]
async fn call_posts_wire_record_and_records_pending_entry() {
    let (provider, mut rx) = provider();

    let reply = provider.send_bitcoin("bc1qrecipient", 2_500, Some(json!({ "feeRate": 3 })));
    let call = posted_call(&mut rx);

    assert_eq!(reply.id(), Some(&call.identifier));
    assert!(call.identifier.as_str().starts_with("sat20_1_1_"));
    assert_eq!(call.action, "SEND_BITCOIN");
    assert_eq!(call.trust_tier_claimed.as_deref(), Some("APPROVE"));
    assert_eq!(
        call.payload,
        json!({ "address": "bc1qrecipient", "amount": 2500, "options": { "feeRate": 3 } })
    );
    assert_eq!(provider.pending_ids(), vec![call.identifier]);
}

#[tokio::test]
async fn identifiers_are_unique_within_an_instance() {
    let (provider, mut rx) = provider();

    let _a = provider.get_balance();
    let _b = provider.get_balance();
    let _c = provider.get_network();

    let ids: Vec<CallId> = (0..3).map(|_| posted_call(&mut rx).identifier).collect();
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
    assert_ne!(ids[0], ids[2]);
    assert_eq!(provider.pending_calls(), 3);
}

#[tokio::test]
async fn second_delivery_for_the_same_identifier_is_dropped() {
    let (provider, mut rx) = provider();
    let reply = provider.get_balance();
    let id = posted_call(&mut rx).identifier;

    let first = provider.deliver(&ResponseInvocation::new(
        id.clone(),
        Outcome::Success(json!({ "balance": "1" })),
    ));
    let second = provider.resolve_or_reject(&id, None, Some(Failure::internal()));

    assert_eq!(first, Intake::Settled);
    assert_eq!(second, Intake::Dropped);
    assert_eq!(reply.await, Outcome::Success(json!({ "balance": "1" })));
    assert_eq!(provider.pending_calls(), 0);
}

#[tokio::test]
async fn unknown_identifier_is_dropped_without_side_effects() {
    let (provider, mut rx) = provider();
    let mut reply = provider.get_accounts();
    let _ = posted_call(&mut rx);

    let intake = provider.resolve_or_reject(&CallId::new("sat20_9_9_9"), Some(json!(1)), None);

    assert_eq!(intake, Intake::Dropped);
    assert_eq!(reply.try_status(), ReplyStatus::Pending);
    assert_eq!(provider.pending_calls(), 1);
}

#[tokio::test]
async fn error_is_delivered_as_rejection() {
    let (provider, mut rx) = provider();
    let reply = provider.sign_psbt("70736274ff", None);
    let id = posted_call(&mut rx).identifier;

    provider.resolve_or_reject(&id, Some(json!("ignored")), Some(Failure::user_declined()));

    assert_eq!(reply.await, Outcome::Failure(Failure::user_declined()));
}

#[tokio::test]
async fn missing_required_field_rejects_without_posting() {
    let (provider, mut rx) = provider();

    let reply = provider.call(Action::SendBitcoin, json!({ "address": "bc1qrecipient" }));

    assert_eq!(reply.id(), None);
    assert_eq!(reply.await, Outcome::Failure(Failure::missing_field("amount")));
    assert!(rx.try_recv().is_err());
    assert_eq!(provider.pending_calls(), 0);
}

#[tokio::test]
async fn non_object_payload_rejects_without_posting() {
    let (provider, mut rx) = provider();

    let reply = provider.call(Action::GetBalance, json!([1, 2, 3]));

    assert_eq!(reply.await, Outcome::Failure(Failure::invalid_request()));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn closed_transport_rejects_immediately() {
    let (provider, rx) = provider();
    drop(rx);

    let reply = provider.get_balance();

    let failure = reply.await.into_result().unwrap_err();
    assert_eq!(failure.code, codes::BRIDGE_UNAVAILABLE);
    assert_eq!(provider.pending_calls(), 0);
}

#[tokio::test]
async fn navigation_abandons_pending_calls() {
    let mut harness = Harness::new(ScriptedUi::accepting());
    harness.load("https://dapp.example/one").await;

    let mut reply = harness.provider().get_balance();
    let old = harness.next_call().expect("posted call");
    assert_eq!(reply.try_status(), ReplyStatus::Pending);

    harness.load("https://dapp.example/two").await;

    assert_eq!(reply.try_status(), ReplyStatus::Abandoned);
    assert_eq!(harness.provider().pending_calls(), 0);

    // The host answering the stale call reaches the new provider, which
    // does not know the identifier.
    let reported = harness
        .page
        .evaluate(PageScript::Respond(ResponseInvocation::new(
            old.identifier,
            Outcome::Success(json!({ "balance": "1000000" })),
        )))
        .await
        .unwrap();
    assert_eq!(reported.as_deref(), Some(results::DROPPED));
}

#[tokio::test]
async fn abandoned_reply_never_resolves() {
    let mut harness = Harness::new(ScriptedUi::accepting());
    harness.load("https://dapp.example/").await;
    let reply = harness.provider().get_network();
    harness.load("https://dapp.example/next").await;

    let waited = tokio::time::timeout(std::time::Duration::from_millis(50), reply).await;
    assert!(waited.is_err(), "an abandoned call must not settle");
}

#[tokio::test]
async fn fallback_provider_rejects_every_method_without_posting() {
    let mut harness = Harness::new(ScriptedUi::accepting());
    harness
        .host
        .handle_navigation(harness.page.begin_navigation("https://broken.example/"))
        .await;
    harness
        .host
        .handle_navigation(harness.page.fail_navigation(-2, "net::ERR_NAME_NOT_RESOLVED"))
        .await;
    harness.drain_notifications();

    let provider = harness.page.provider().expect("fallback installed");
    assert!(provider.is_fallback());
    let flags = harness.page.flags();
    assert!(flags.error);
    assert!(!flags.provider_ready);

    let replies = vec![
        provider.get_balance(),
        provider.request_accounts(),
        provider.send_bitcoin("bc1qrecipient", 1, None),
        provider.batch_send_assets(json!([]), None),
    ];
    for reply in replies {
        let failure = reply.await.into_result().unwrap_err();
        assert!(failure.message.contains("failed to load"));
        assert_eq!(failure.code, codes::PAGE_LOAD_FAILED);
    }
    assert!(harness.calls.try_recv().is_err());
}

#[tokio::test]
async fn listeners_receive_events_in_registration_order() {
    let (provider, _rx) = provider();
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));

    let first = seen.clone();
    provider.on("accountsChanged", move |args: &[Value]| {
        first.lock().push(format!("first:{}", args[0]));
    });
    let second = seen.clone();
    let id = provider.on("accountsChanged", move |_: &[Value]| {
        second.lock().push("second".to_string());
    });

    assert!(provider.emit("accountsChanged", &[json!(["bc1p"])]));
    assert!(provider.remove_listener("accountsChanged", id));
    assert!(provider.emit("accountsChanged", &[json!([])]));
    provider.remove_all_listeners(None);
    assert!(!provider.emit("accountsChanged", &[json!([])]));

    assert_eq!(
        seen.lock().as_slice(),
        &["first:[\"bc1p\"]", "second", "first:[]"]
    );
}

#[tokio::test]
async fn panicking_listener_does_not_stop_the_others() {
    let (provider, _rx) = provider();
    let hits = Arc::new(Mutex::new(0));

    provider.on("networkChanged", |_: &[Value]| panic!("listener bug"));
    let counter = hits.clone();
    provider.on("networkChanged", move |_: &[Value]| *counter.lock() += 1);

    assert!(provider.emit("networkChanged", &[json!("mainnet")]));
    assert_eq!(*hits.lock(), 1);
}

#[tokio::test]
async fn chain_and_contract_methods_build_their_payloads() {
    let (provider, mut rx) = provider();

    let _split = provider.split_asset("ordx:f:pearl", json!(5), None);
    let call = posted_call(&mut rx);
    assert_eq!(call.action, "SPLIT_ASSET");
    assert_eq!(call.payload, json!({ "asset_key": "ordx:f:pearl", "amount": 5 }));

    let _utxos = provider.get_utxos_with_asset(
        Action::GetUtxosWithAssetV2SatsNet,
        "bc1qowner",
        "ordx:f:pearl",
        Some(json!("100")),
    );
    let call = posted_call(&mut rx);
    assert_eq!(call.action, "GET_UTXOS_WITH_ASSET_V2_SATSNET");
    assert_eq!(call.trust_tier_claimed.as_deref(), Some("REQUEST"));
    assert_eq!(
        call.payload,
        json!({ "address": "bc1qowner", "amt": "100", "assetName": "ordx:f:pearl" })
    );

    let _signed = provider.sign_psbts(&["70736274ff01", "70736274ff02"], None);
    let call = posted_call(&mut rx);
    assert_eq!(call.action, "SIGN_PSBTS");
    assert_eq!(call.payload, json!({ "psbtHexs": ["70736274ff01", "70736274ff02"] }));

    let _bound = provider.bind_referrer_for_server("alice", "02abcdef", None);
    let call = posted_call(&mut rx);
    assert_eq!(call.trust_tier_claimed.as_deref(), Some("APPROVE"));
    assert_eq!(call.payload, json!({ "referrerName": "alice", "serverPubKey": "02abcdef" }));
}

#[tokio::test]
async fn log_posts_a_diagnostic_line() {
    let (provider, mut rx) = provider();

    provider.log("debug", "hydrated").unwrap();

    let raw = rx.try_recv().expect("log posted");
    assert_eq!(
        decode_page_message(&raw),
        PageMessage::Log(webview_bridge::protocol::PageLog::new("debug", "hydrated"))
    );
    assert_eq!(provider.pending_calls(), 0);
}
