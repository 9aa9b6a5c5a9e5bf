//! The rendered scripts, run in an embedded JavaScript engine against a
//! stub native interface that records what the page posts.

use boa_engine::{Context, Source};
use serde_json::{json, Value};
use webview_bridge::config::ProviderSettings;
use webview_bridge::protocol::{codes, notifications, EventInvocation, PageLog};
use webview_bridge::script::{js_literal, results};
use webview_bridge::transport::{decode_page_message, PageMessage};
use webview_bridge::{Action, CallId, Outcome, PageScript, ResponseInvocation};

struct JsPage {
    ctx: Context,
    settings: ProviderSettings,
}

impl JsPage {
    fn new() -> Self {
        let settings = ProviderSettings::default();
        let native = js_literal(&settings.native_interface);
        let mut page = Self {
            ctx: Context::default(),
            settings,
        };
        page.eval(&format!(
            r#"var window = globalThis;
            window.__posted = [];
            window.__seen = [];
            window[{native}] = {{ postMessage: function (text) {{ window.__posted.push(text); }} }};
            'ready'"#
        ));
        page
    }

    fn eval(&mut self, code: &str) -> String {
        let value = self
            .ctx
            .eval(Source::from_bytes(code))
            .unwrap_or_else(|e| panic!("script threw: {e}"));
        value
            .to_string(&mut self.ctx)
            .unwrap_or_else(|e| panic!("result is not printable: {e}"))
            .to_std_string_escaped()
    }

    fn run(&mut self, script: PageScript) -> String {
        let text = script.render(&self.settings);
        self.eval(&text)
    }

    /// Runs queued promise reactions.
    fn settle(&mut self) {
        let _ = self.ctx.run_jobs();
    }

    fn posted(&mut self) -> Vec<String> {
        let text = self.eval("JSON.stringify(window.__posted)");
        serde_json::from_str(&text).expect("posted messages")
    }

    fn seen(&mut self) -> Vec<String> {
        let text = self.eval("JSON.stringify(window.__seen)");
        serde_json::from_str(&text).expect("recorded outcomes")
    }

    fn last_call_id(&mut self) -> CallId {
        let last = self.posted().pop().expect("something posted");
        match decode_page_message(&last) {
            PageMessage::Call(call) => call.identifier,
            other => panic!("expected a call, got {other:?}"),
        }
    }

    /// Calls a provider method and records how its promise ends.
    fn call(&mut self, invocation: &str) {
        self.eval(&format!(
            r#"window.sat20.{invocation}.then(
                function (value) {{ window.__seen.push('ok:' + JSON.stringify(value)); }},
                function (e) {{ window.__seen.push('err:' + e.code + ':' + e.message); }}
            ); 'called'"#
        ));
    }
}

fn respond(id: CallId, value: Value) -> PageScript {
    PageScript::Respond(ResponseInvocation::new(id, Outcome::Success(value)))
}

#[test]
fn second_response_for_an_identifier_is_dropped() {
    let mut page = JsPage::new();
    assert_eq!(page.run(PageScript::Provider), results::INJECTED);

    page.call("getBalance()");
    let id = page.last_call_id();
    assert!(id.as_str().starts_with("sat20_1_1_"));

    let first = respond(id.clone(), json!({ "balance": "1" }));
    assert_eq!(page.run(first), results::SETTLED);
    let second = respond(id, json!({ "balance": "2" }));
    assert_eq!(page.run(second), results::DROPPED);

    page.settle();
    assert_eq!(page.seen(), vec![r#"ok:{"balance":"1"}"#]);
    assert_eq!(page.eval("String(window.sat20.pendingCount())"), "0");
}

#[test]
fn error_response_rejects_with_code_and_message() {
    let mut page = JsPage::new();
    page.run(PageScript::Provider);
    page.call("signMessage('hello')");
    let id = page.last_call_id();

    let declined = PageScript::Respond(ResponseInvocation::new(
        id,
        Outcome::Failure(webview_bridge::Failure::user_declined()),
    ));
    assert_eq!(page.run(declined), results::SETTLED);

    page.settle();
    assert_eq!(page.seen(), vec![format!("err:{}:user declined", codes::USER_DECLINED)]);
}

#[test]
fn call_posts_the_wire_record() {
    let mut page = JsPage::new();
    page.run(PageScript::Provider);
    page.call("sendBitcoin('bc1qrecipient', 2500)");

    let last = page.posted().pop().unwrap();
    let PageMessage::Call(call) = decode_page_message(&last) else {
        panic!("expected a call");
    };
    assert_eq!(call.action, "SEND_BITCOIN");
    assert_eq!(call.trust_tier_claimed.as_deref(), Some("APPROVE"));
    assert_eq!(call.payload, json!({ "address": "bc1qrecipient", "amount": 2500 }));
}

#[test]
fn second_injection_keeps_the_existing_provider() {
    let mut page = JsPage::new();
    assert_eq!(page.run(PageScript::Provider), results::INJECTED);
    page.call("getNetwork()");

    assert_eq!(page.run(PageScript::Provider), results::ALREADY_EXISTS);

    assert_eq!(page.eval("String(window.sat20.pendingCount())"), "1");
    assert_eq!(page.eval("String(window.sat20._instance)"), "1");
    let last = page.posted().pop().unwrap();
    let PageMessage::Notification(notification) = decode_page_message(&last) else {
        panic!("expected a notification");
    };
    assert_eq!(notification.notification, notifications::ALREADY_EXISTS);
}

#[test]
fn verify_reports_a_clobbered_provider() {
    let mut page = JsPage::new();
    assert_eq!(page.run(PageScript::Verify), results::REINJECT_NEEDED);

    page.run(PageScript::Provider);
    assert_eq!(page.run(PageScript::Verify), results::INJECTION_OK);

    page.eval("window.sat20 = { requestAccounts: function () {} }; 'clobbered'");
    assert_eq!(page.run(PageScript::Verify), results::REINJECT_NEEDED);

    assert_eq!(page.run(PageScript::Provider), results::INJECTED);
    assert_eq!(page.run(PageScript::Verify), results::INJECTION_OK);
    assert_eq!(page.eval("String(window.sat20._instance)"), "2");
}

#[test]
fn every_action_has_a_provider_method() {
    let mut page = JsPage::new();
    page.run(PageScript::Provider);

    for &action in Action::ALL {
        let kind = page.eval(&format!("typeof window.sat20[{}]", js_literal(action.method_name())));
        assert_eq!(kind, "function", "{action}");
    }
}

#[test]
fn missing_required_field_rejects_without_posting() {
    let mut page = JsPage::new();
    page.run(PageScript::Provider);
    let before = page.posted().len();

    page.call("sendBitcoin('bc1qrecipient')");
    page.call("getUtxosWithAsset('bc1qowner', null, null)");
    page.settle();

    assert_eq!(page.posted().len(), before);
    assert_eq!(
        page.seen(),
        vec![
            format!("err:{}:missing required field: amount", codes::INVALID_REQUEST),
            format!("err:{}:missing required field: assetName", codes::INVALID_REQUEST),
        ]
    );
}

#[test]
fn missing_native_interface_rejects_as_unavailable() {
    let mut page = JsPage::new();
    page.run(PageScript::Provider);
    page.eval("delete window.Sat20Native; 'gone'");

    page.call("getBalance()");
    page.settle();

    assert_eq!(
        page.seen(),
        vec![format!("err:{}:native bridge not available", codes::BRIDGE_UNAVAILABLE)]
    );
    assert_eq!(page.eval("String(window.sat20.pendingCount())"), "0");
}

#[test]
fn fallback_rejects_every_method_without_posting() {
    let mut page = JsPage::new();
    let fallback = PageScript::Fallback {
        description: "net::ERR_NAME_NOT_RESOLVED".to_string(),
    };
    assert_eq!(page.run(fallback), results::FALLBACK);

    for &action in Action::ALL {
        page.call(&format!("{}('a', 'b', 'c')", action.method_name()));
    }
    page.settle();

    let seen = page.seen();
    assert_eq!(seen.len(), Action::ALL.len());
    for outcome in &seen {
        assert!(outcome.contains("failed to load"), "{outcome}");
        assert!(outcome.starts_with(&format!("err:{}:", codes::PAGE_LOAD_FAILED)));
    }
    assert!(page.posted().is_empty());
    assert_eq!(page.eval("String(window.sat20Error)"), "true");
    assert_eq!(page.eval("String(window.sat20ProviderReady)"), "false");
    assert_eq!(page.run(respond(CallId::new("sat20_1_1_0"), json!(1))), results::DROPPED);
}

#[test]
fn emit_reaches_listeners_in_order() {
    let mut page = JsPage::new();
    assert_eq!(
        page.run(PageScript::Emit(EventInvocation {
            event: "accountsChanged".to_string(),
            args: vec![json!(["bc1qfirst"])],
        })),
        results::NO_PROVIDER
    );

    page.run(PageScript::Provider);
    page.eval(
        r#"window.sat20.on('accountsChanged', function (a) { window.__seen.push('first:' + a[0]); });
        window.sat20.on('accountsChanged', function () { throw new Error('listener bug'); });
        window.sat20.on('accountsChanged', function (a, extra) { window.__seen.push('third:' + extra); });
        'listening'"#,
    );
    // A throwing listener reaches console.error, which a bare engine lacks.
    page.eval("window.console = { error: function () {} }; 'console'");

    let emitted = page.run(PageScript::Emit(EventInvocation {
        event: "accountsChanged".to_string(),
        args: vec![json!(["bc1qfirst"]), json!("extra")],
    }));

    assert_eq!(emitted, results::EMITTED);
    assert_eq!(page.seen(), vec!["first:bc1qfirst", "third:extra"]);
}

#[test]
fn marker_sets_presence_flags_only() {
    let mut page = JsPage::new();
    assert_eq!(page.run(PageScript::Marker), results::MARKED);
    assert_eq!(page.eval("String(window.sat20Loading)"), "true");
    assert_eq!(page.eval("String(window.sat20NativeBridge)"), "true");
    assert_eq!(page.eval("typeof window.sat20"), "undefined");
}

#[test]
fn log_is_posted_as_a_page_log() {
    let mut page = JsPage::new();
    page.run(PageScript::Provider);
    page.eval("window.sat20.log('warn', 'slow frame'); 'logged'");

    let last = page.posted().pop().unwrap();
    assert_eq!(
        decode_page_message(&last),
        PageMessage::Log(PageLog::new("warn", "slow frame"))
    );
}
