//! Scripts the host evaluates in the page context.
//!
//! Every host→page interaction is a [`PageScript`] value. A webview embedding
//! renders it to JavaScript with [`PageScript::render`]; the in-process
//! [`crate::page::PageContext`] interprets the same value directly. Values
//! that originate outside the script text (identifiers, results, errors,
//! event arguments, configured names) are embedded only as JSON literals, so
//! no payload can break out of its argument position.
//!
//! Each script evaluates to one of the strings in [`results`].

use crate::config::ProviderSettings;
use crate::protocol::{codes, notifications, Action, EventInvocation, ResponseInvocation};
use serde::Serialize;
use serde_json::{json, Value};

/// Completion values reported by the rendered scripts.
pub mod results {
    pub const MARKED: &str = "MARKED";
    pub const INJECTED: &str = "INJECTED";
    pub const ALREADY_EXISTS: &str = "ALREADY_EXISTS";
    pub const FALLBACK: &str = "FALLBACK";
    pub const INJECTION_OK: &str = "INJECTION_OK";
    pub const REINJECT_NEEDED: &str = "REINJECT_NEEDED";
    pub const VERIFICATION_ERROR: &str = "VERIFICATION_ERROR";
    pub const SETTLED: &str = "SETTLED";
    pub const DROPPED: &str = "DROPPED";
    pub const NO_PROVIDER: &str = "NO_PROVIDER";
    pub const EMITTED: &str = "EMITTED";
}

/// Status marker carried by the fallback provider.
pub const FALLBACK_STATUS: &str = "fallback_mode";
/// `_bridgeType` of a fully injected provider; the presence guard keys on it.
pub const BRIDGE_TYPE: &str = "native-webview";

#[derive(Debug, Clone, PartialEq)]
pub enum PageScript {
    /// Presence flags only, no capability methods.
    Marker,
    /// The full provider, guarded against double injection.
    Provider,
    /// Same method names as the provider, each rejecting immediately.
    Fallback { description: String },
    /// Health check answering [`results::INJECTION_OK`] or
    /// [`results::REINJECT_NEEDED`].
    Verify,
    /// `provider.handleResponse(identifier, result, error)`.
    Respond(ResponseInvocation),
    /// `provider.emit(event, ...args)`.
    Emit(EventInvocation),
}

impl PageScript {
    pub fn kind(&self) -> &'static str {
        match self {
            PageScript::Marker => "marker",
            PageScript::Provider => "provider",
            PageScript::Fallback { .. } => "fallback",
            PageScript::Verify => "verify",
            PageScript::Respond(_) => "respond",
            PageScript::Emit(_) => "emit",
        }
    }

    /// Renders the script as a self-invoking JavaScript expression.
    pub fn render(&self, settings: &ProviderSettings) -> String {
        let names = Names::new(settings);
        match self {
            PageScript::Marker => fill(MARKER_TEMPLATE, &names.bindings()),
            PageScript::Provider => {
                let mut bindings = names.bindings();
                bindings.push(("ACTIONS", action_table_literal()));
                bindings.push(("BRIDGE_TYPE", js_literal(BRIDGE_TYPE)));
                bindings.push(("NOTIFY_OK", js_literal(notifications::INJECTION_SUCCESS)));
                bindings.push(("NOTIFY_EXISTS", js_literal(notifications::ALREADY_EXISTS)));
                bindings.push(("CODE_UNAVAILABLE", codes::BRIDGE_UNAVAILABLE.to_string()));
                bindings.push(("CODE_INVALID", codes::INVALID_REQUEST.to_string()));
                fill(PROVIDER_TEMPLATE, &bindings)
            }
            PageScript::Fallback { description } => {
                let mut bindings = names.bindings();
                bindings.push(("ACTIONS", action_table_literal()));
                bindings.push(("STATUS", js_literal(FALLBACK_STATUS)));
                bindings.push(("DESCRIPTION", js_literal(description)));
                bindings.push(("CODE_FAILED", codes::PAGE_LOAD_FAILED.to_string()));
                fill(FALLBACK_TEMPLATE, &bindings)
            }
            PageScript::Verify => {
                let mut bindings = names.bindings();
                bindings.push(("BRIDGE_TYPE", js_literal(BRIDGE_TYPE)));
                fill(VERIFY_TEMPLATE, &bindings)
            }
            PageScript::Respond(invocation) => {
                let mut bindings = names.bindings();
                bindings.push(("ID", js_literal(&invocation.identifier)));
                bindings.push(("RESULT", js_literal(&invocation.result)));
                bindings.push(("ERROR", js_literal(&invocation.error)));
                fill(RESPOND_TEMPLATE, &bindings)
            }
            PageScript::Emit(invocation) => {
                let mut bindings = names.bindings();
                bindings.push(("EVENT", js_literal(&invocation.event)));
                bindings.push(("ARGS", js_literal(&invocation.args)));
                fill(EMIT_TEMPLATE, &bindings)
            }
        }
    }
}

/// Outcome of a [`PageScript::Verify`] evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Healthy,
    NeedsReinjection,
    /// The check threw, or reported something unrecognized.
    Error,
}

impl Verification {
    /// Interprets the string a surface reported for the health check. Webviews
    /// usually hand back the JSON encoding of the value (`"\"INJECTION_OK\""`),
    /// so one level of quoting is removed first.
    pub fn parse(reported: Option<&str>) -> Self {
        let Some(raw) = reported else {
            return Verification::Error;
        };
        let raw = raw.trim();
        let text = serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.to_string());
        match text.as_str() {
            results::INJECTION_OK => Verification::Healthy,
            results::REINJECT_NEEDED => Verification::NeedsReinjection,
            _ => Verification::Error,
        }
    }

    pub fn is_healthy(self) -> bool {
        self == Verification::Healthy
    }
}

/// Encodes `value` as a JavaScript literal. JSON is valid JavaScript except
/// for raw U+2028/U+2029 in strings, which are escaped here.
pub fn js_literal<T: Serialize + ?Sized>(value: &T) -> String {
    let text = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
    text.replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

fn action_table_literal() -> String {
    let rows: Vec<Value> = Action::ALL
        .iter()
        .map(|action| {
            json!({
                "method": action.method_name(),
                "action": action.wire_name(),
                "tier": action.tier().as_wire(),
                "params": action.params(),
                "required": action.required_fields(),
            })
        })
        .collect();
    js_literal(&rows)
}

struct Names<'a> {
    settings: &'a ProviderSettings,
}

impl<'a> Names<'a> {
    fn new(settings: &'a ProviderSettings) -> Self {
        Self { settings }
    }

    fn bindings(&self) -> Vec<(&'static str, String)> {
        vec![
            ("GLOBAL", js_literal(&self.settings.global_name)),
            ("NATIVE", js_literal(&self.settings.native_interface)),
            ("VERSION", js_literal(&self.settings.version)),
            ("PLATFORM", js_literal(&self.settings.platform)),
            ("PREFIX", js_literal(&self.settings.id_prefix)),
        ]
    }
}

// Placeholders are `@@NAME@@`; every bound value is already a JS literal.
// Single pass over the template, so bound text is never rescanned.
fn fill(template: &str, bindings: &[(&'static str, String)]) -> String {
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;
    while let Some(start) = rest.find("@@") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let bound = after.find("@@").and_then(|end| {
            let name = &after[..end];
            bindings
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, literal)| (literal, end))
        });
        match bound {
            Some((literal, end)) => {
                out.push_str(literal);
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("@@");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

const MARKER_TEMPLATE: &str = r#"(function () {
  var G = @@GLOBAL@@;
  window[G + 'NativeBridge'] = !!window[@@NATIVE@@];
  window[G + 'Loading'] = true;
  window[G + 'Version'] = @@VERSION@@;
  window[G + 'Platform'] = @@PLATFORM@@;
  window[G + 'Timestamp'] = Date.now();
  return 'MARKED';
})()"#;

const PROVIDER_TEMPLATE: &str = r#"(function () {
  'use strict';
  var G = @@GLOBAL@@, NATIVE = @@NATIVE@@, ACTIONS = @@ACTIONS@@;
  function post(message) {
    var native = window[NATIVE];
    if (!native || typeof native.postMessage !== 'function') {
      throw new Error('native bridge not available');
    }
    native.postMessage(JSON.stringify(message));
  }
  function notify(kind, detail) {
    try { post(Object.assign({ notification: kind }, detail || {})); } catch (e) {}
  }
  var existing = window[G];
  if (existing && existing._bridgeType === @@BRIDGE_TYPE@@ &&
      typeof existing.handleResponse === 'function' &&
      typeof existing.requestAccounts === 'function') {
    notify(@@NOTIFY_EXISTS@@, { instance: existing._instance });
    return 'ALREADY_EXISTS';
  }
  var instance = (window[G + 'Instances'] || 0) + 1;
  window[G + 'Instances'] = instance;
  var pending = new Map();
  var listeners = {};
  var counter = 0;
  function failure(error) {
    var e = new Error(error && error.message ? error.message : String(error));
    if (error && typeof error.code === 'number') { e.code = error.code; }
    return e;
  }
  var provider = {
    _bridgeType: @@BRIDGE_TYPE@@,
    _version: @@VERSION@@,
    _platform: @@PLATFORM@@,
    _instance: instance,
    _injectionTime: Date.now(),
    pendingCount: function () { return pending.size; },
    log: function (level, message) {
      try { post({ log: String(level), message: String(message) }); } catch (e) {}
    },
    send: function (tier, action, payload) {
      return new Promise(function (resolve, reject) {
        var id = @@PREFIX@@ + '_' + instance + '_' + (++counter) + '_' + Date.now();
        pending.set(id, { resolve: resolve, reject: reject, action: action, tier: tier, createdAt: Date.now() });
        try {
          post({ identifier: id, trustTierClaimed: tier, action: action, payload: payload || {} });
        } catch (e) {
          pending.delete(id);
          reject(failure({ message: 'native bridge not available', code: @@CODE_UNAVAILABLE@@ }));
        }
      });
    },
    handleResponse: function (id, result, error) {
      var entry = pending.get(id);
      if (!entry) { return 'DROPPED'; }
      pending.delete(id);
      if (error) { entry.reject(failure(error)); } else { entry.resolve(result === undefined ? null : result); }
      return 'SETTLED';
    },
    on: function (event, listener) {
      (listeners[event] = listeners[event] || []).push(listener);
      return provider;
    },
    removeListener: function (event, listener) {
      var list = listeners[event] || [];
      var at = list.indexOf(listener);
      if (at >= 0) { list.splice(at, 1); }
      return provider;
    },
    removeAllListeners: function (event) {
      if (event === undefined) { listeners = {}; } else { delete listeners[event]; }
      return provider;
    },
    emit: function (event) {
      var args = Array.prototype.slice.call(arguments, 1);
      var list = (listeners[event] || []).slice();
      list.forEach(function (listener) {
        try { listener.apply(provider, args); } catch (e) { console.error(e); }
      });
      return list.length > 0;
    }
  };
  provider.resolveOrReject = provider.handleResponse;
  ACTIONS.forEach(function (row) {
    provider[row.method] = function () {
      var payload = {};
      for (var i = 0; i < row.params.length; i++) {
        if (arguments[i] !== undefined) { payload[row.params[i]] = arguments[i]; }
      }
      for (var j = 0; j < row.required.length; j++) {
        var value = payload[row.required[j]];
        if (value === undefined || value === null) {
          return Promise.reject(failure({ message: 'missing required field: ' + row.required[j], code: @@CODE_INVALID@@ }));
        }
      }
      return provider.send(row.tier, row.action, payload);
    };
  });
  window[G] = provider;
  window[G + 'Ready'] = true;
  window[G + 'ProviderReady'] = true;
  window[G + 'NativeBridge'] = !!window[NATIVE];
  window[G + 'Version'] = @@VERSION@@;
  window[G + 'Platform'] = @@PLATFORM@@;
  window[G + 'Loading'] = false;
  window[G + 'Error'] = false;
  notify(@@NOTIFY_OK@@, { instance: instance, methods: ACTIONS.length });
  return 'INJECTED';
})()"#;

const FALLBACK_TEMPLATE: &str = r#"(function () {
  var G = @@GLOBAL@@, ACTIONS = @@ACTIONS@@;
  var message = 'page failed to load properly';
  var fallback = { _status: @@STATUS@@, _error: message, _description: @@DESCRIPTION@@ };
  ACTIONS.forEach(function (row) {
    fallback[row.method] = function () {
      var e = new Error(message);
      e.code = @@CODE_FAILED@@;
      return Promise.reject(e);
    };
  });
  fallback.handleResponse = function () { return 'DROPPED'; };
  fallback.resolveOrReject = fallback.handleResponse;
  window[G + 'Fallback'] = fallback;
  window[G] = fallback;
  window[G + 'Error'] = true;
  window[G + 'Ready'] = true;
  window[G + 'ProviderReady'] = false;
  window[G + 'Loading'] = false;
  return 'FALLBACK';
})()"#;

const VERIFY_TEMPLATE: &str = r#"(function () {
  try {
    var p = window[@@GLOBAL@@];
    if (!p || p._bridgeType !== @@BRIDGE_TYPE@@ ||
        typeof p.requestAccounts !== 'function' ||
        typeof p.handleResponse !== 'function') {
      return 'REINJECT_NEEDED';
    }
    return 'INJECTION_OK';
  } catch (e) {
    return 'VERIFICATION_ERROR';
  }
})()"#;

const RESPOND_TEMPLATE: &str = r#"(function () {
  var p = window[@@GLOBAL@@];
  if (!p || typeof p.handleResponse !== 'function') { return 'NO_PROVIDER'; }
  return p.handleResponse(@@ID@@, @@RESULT@@, @@ERROR@@) || 'SETTLED';
})()"#;

const EMIT_TEMPLATE: &str = r#"(function () {
  var p = window[@@GLOBAL@@];
  if (!p || typeof p.emit !== 'function') { return 'NO_PROVIDER'; }
  p.emit.apply(p, [@@EVENT@@].concat(@@ARGS@@));
  return 'EMITTED';
})()"#;
