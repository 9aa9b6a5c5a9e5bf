use super::provider::{Capabilities, FallbackProvider, Provider};
use super::reply::PendingReply;
use crate::config::ProviderSettings;
use crate::error::SurfaceError;
use crate::protocol::{notifications, Action, ProviderNotification};
use crate::script::{results, PageScript};
use crate::surface::{BrowserSurface, NavigationEvent};
use crate::transport::PageTransport;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Presence markers visible to page scripts (`window.sat20Ready` and so on).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceFlags {
    pub native_bridge: bool,
    pub ready: bool,
    pub provider_ready: bool,
    pub loading: bool,
    pub error: bool,
    pub version: Option<String>,
    pub platform: Option<String>,
}

/// Whatever currently answers to the provider's global name.
#[derive(Debug, Clone)]
pub enum PageProvider {
    Full(Arc<Provider>),
    Fallback(Arc<FallbackProvider>),
}

impl PageProvider {
    pub fn as_full(&self) -> Option<&Arc<Provider>> {
        match self {
            PageProvider::Full(provider) => Some(provider),
            PageProvider::Fallback(_) => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, PageProvider::Fallback(_))
    }
}

impl Capabilities for PageProvider {
    fn call(&self, action: Action, payload: Value) -> PendingReply {
        match self {
            PageProvider::Full(provider) => provider.call(action, payload),
            PageProvider::Fallback(fallback) => fallback.call(action, payload),
        }
    }
}

#[derive(Debug, Default)]
struct Document {
    url: Option<String>,
    flags: PresenceFlags,
    provider: Option<PageProvider>,
}

/// An in-process page context implementing [`BrowserSurface`].
///
/// It interprets each [`PageScript`] the way the rendered JavaScript behaves
/// in a real page, with the Rust [`Provider`] standing in for the injected
/// object. Each navigation starts a fresh document; whatever provider the old
/// document held is discarded with its pending calls.
pub struct PageContext {
    settings: ProviderSettings,
    transport: Arc<dyn PageTransport>,
    document: Mutex<Document>,
    next_instance: AtomicU64,
    injections: AtomicUsize,
    failing_injections: AtomicUsize,
    visible: AtomicBool,
}

impl PageContext {
    pub fn new(settings: ProviderSettings, transport: Arc<dyn PageTransport>) -> Self {
        Self {
            settings,
            transport,
            document: Mutex::new(Document::default()),
            next_instance: AtomicU64::new(0),
            injections: AtomicUsize::new(0),
            failing_injections: AtomicUsize::new(0),
            visible: AtomicBool::new(true),
        }
    }

    /// Starts loading `url` into a fresh document.
    pub fn begin_navigation(&self, url: impl Into<String>) -> NavigationEvent {
        let url = url.into();
        *self.document.lock() = Document {
            url: Some(url.clone()),
            ..Document::default()
        };
        NavigationEvent::Started { url }
    }

    pub fn finish_navigation(&self) -> NavigationEvent {
        NavigationEvent::Finished { url: self.url() }
    }

    pub fn fail_navigation(&self, code: i32, description: impl Into<String>) -> NavigationEvent {
        NavigationEvent::Failed {
            url: self.url(),
            code,
            description: description.into(),
        }
    }

    pub fn url(&self) -> String {
        self.document.lock().url.clone().unwrap_or_default()
    }

    pub fn provider(&self) -> Option<PageProvider> {
        self.document.lock().provider.clone()
    }

    /// The full provider, if one is installed.
    pub fn full_provider(&self) -> Option<Arc<Provider>> {
        self.provider().and_then(|p| p.as_full().cloned())
    }

    pub fn flags(&self) -> PresenceFlags {
        self.document.lock().flags.clone()
    }

    /// Simulates a page script overwriting the provider global.
    pub fn clobber_provider(&self) {
        let mut document = self.document.lock();
        document.provider = None;
        document.flags.provider_ready = false;
    }

    /// Makes the next `count` provider injections throw.
    pub fn fail_next_injections(&self, count: usize) {
        self.failing_injections.store(count, Ordering::SeqCst);
    }

    /// Provider instances created so far, across all documents.
    pub fn injections(&self) -> usize {
        self.injections.load(Ordering::SeqCst)
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    fn notify(&self, kind: &str, detail: Map<String, Value>) {
        let notification = ProviderNotification {
            notification: kind.to_string(),
            detail,
        };
        if let Ok(message) = serde_json::to_string(&notification) {
            let _ = self.transport.post(message);
        }
    }

    fn take_injection_failure(&self) -> bool {
        self.failing_injections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn inject_provider(&self) -> Result<&'static str, SurfaceError> {
        if self.take_injection_failure() {
            return Err(SurfaceError::Script("provider injection threw".to_string()));
        }
        let mut document = self.document.lock();
        let existing = document
            .provider
            .as_ref()
            .and_then(PageProvider::as_full)
            .map(|provider| provider.instance());
        if let Some(instance) = existing {
            drop(document);
            self.notify(notifications::ALREADY_EXISTS, detail(json!({ "instance": instance })));
            return Ok(results::ALREADY_EXISTS);
        }
        let instance = self.next_instance.fetch_add(1, Ordering::SeqCst) + 1;
        let provider = Provider::new(instance, self.settings.clone(), Arc::clone(&self.transport));
        document.provider = Some(PageProvider::Full(Arc::new(provider)));
        document.flags = PresenceFlags {
            native_bridge: true,
            ready: true,
            provider_ready: true,
            loading: false,
            error: false,
            version: Some(self.settings.version.clone()),
            platform: Some(self.settings.platform.clone()),
        };
        drop(document);
        self.injections.fetch_add(1, Ordering::SeqCst);
        self.notify(
            notifications::INJECTION_SUCCESS,
            detail(json!({ "instance": instance, "methods": Action::ALL.len() })),
        );
        Ok(results::INJECTED)
    }
}

fn detail(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[async_trait]
impl BrowserSurface for PageContext {
    async fn evaluate(&self, script: PageScript) -> Result<Option<String>, SurfaceError> {
        debug!(kind = script.kind(), "evaluating page script");
        let result = match script {
            PageScript::Marker => {
                let mut document = self.document.lock();
                document.flags.native_bridge = true;
                document.flags.loading = true;
                document.flags.version = Some(self.settings.version.clone());
                document.flags.platform = Some(self.settings.platform.clone());
                results::MARKED
            }
            PageScript::Provider => self.inject_provider()?,
            PageScript::Fallback { description } => {
                let mut document = self.document.lock();
                document.provider = Some(PageProvider::Fallback(Arc::new(FallbackProvider::new(
                    description,
                ))));
                document.flags.error = true;
                document.flags.ready = true;
                document.flags.provider_ready = false;
                document.flags.loading = false;
                results::FALLBACK
            }
            PageScript::Verify => match self.provider() {
                Some(PageProvider::Full(_)) => results::INJECTION_OK,
                _ => results::REINJECT_NEEDED,
            },
            PageScript::Respond(invocation) => match self.provider() {
                Some(PageProvider::Full(provider)) => provider.deliver(&invocation).as_script_result(),
                Some(PageProvider::Fallback(_)) => results::DROPPED,
                None => results::NO_PROVIDER,
            },
            PageScript::Emit(invocation) => match self.full_provider() {
                Some(provider) => {
                    provider.emit(&invocation.event, &invocation.args);
                    results::EMITTED
                }
                None => results::NO_PROVIDER,
            },
        };
        Ok(Some(result.to_string()))
    }

    fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }
}
