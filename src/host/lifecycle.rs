//! When the provider is (re-)installed into the page.
//!
//! ```text
//!             started            finished             verify (unhealthy)
//!   Absent ──────────▶ PreInjected ──────▶ FullyInjected ──────▶ re-inject
//!     ▲                   │  ▲                                       │
//!     │            failed │  └──────────── started ◀─────────────────┘
//!     │                   ▼
//!     └──────────────  Fallback
//! ```
//!
//! Every navigation start bumps a generation counter. A verification
//! scheduled for an older generation does nothing when it fires.

use super::origins::origin_of;
use crate::error::SurfaceError;
use crate::script::{PageScript, Verification};
use crate::surface::{BrowserSurface, NavigationEvent};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresenceState {
    Absent,
    PreInjected,
    FullyInjected,
    Fallback,
}

/// Snapshot of the controller's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InjectionStatus {
    pub presence: PresenceState,
    pub generation: u64,
    pub url: Option<String>,
    pub last_error: Option<String>,
    pub verifications: u64,
    pub reinjections: u64,
}

#[derive(Debug)]
struct State {
    presence: PresenceState,
    generation: u64,
    url: Option<String>,
    last_error: Option<String>,
    verifications: u64,
    reinjections: u64,
}

pub struct InjectionController {
    surface: Arc<dyn BrowserSurface>,
    verify_delay: Duration,
    state: Mutex<State>,
}

impl InjectionController {
    pub fn new(surface: Arc<dyn BrowserSurface>, verify_delay: Duration) -> Self {
        Self {
            surface,
            verify_delay,
            state: Mutex::new(State {
                presence: PresenceState::Absent,
                generation: 0,
                url: None,
                last_error: None,
                verifications: 0,
                reinjections: 0,
            }),
        }
    }

    pub fn verify_delay(&self) -> Duration {
        self.verify_delay
    }

    pub fn presence(&self) -> PresenceState {
        self.state.lock().presence
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Origin of the document currently loaded.
    pub fn current_origin(&self) -> Option<String> {
        self.state.lock().url.as_deref().and_then(origin_of)
    }

    pub fn status(&self) -> InjectionStatus {
        let state = self.state.lock();
        InjectionStatus {
            presence: state.presence,
            generation: state.generation,
            url: state.url.clone(),
            last_error: state.last_error.clone(),
            verifications: state.verifications,
            reinjections: state.reinjections,
        }
    }

    /// Applies one navigation event. A finish that installed the provider
    /// returns the handle of the scheduled verification.
    pub async fn handle(self: &Arc<Self>, event: NavigationEvent) -> Option<JoinHandle<()>> {
        match event {
            NavigationEvent::Started { url } => {
                self.on_navigation_started(url).await;
                None
            }
            NavigationEvent::Finished { url } => self.on_navigation_finished(url).await,
            NavigationEvent::Failed {
                url,
                code,
                description,
            } => {
                self.on_navigation_failed(url, code, description).await;
                None
            }
        }
    }

    pub async fn on_navigation_started(&self, url: String) {
        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.presence = PresenceState::PreInjected;
            state.url = Some(url.clone());
            state.last_error = None;
            state.generation
        };
        info!(generation, %url, "navigation started");
        match self.surface.evaluate(PageScript::Marker).await {
            Ok(result) => debug!(generation, ?result, "marker injected"),
            Err(e) => self.record_error(generation, "marker injection failed", &e),
        }
    }

    /// Injects the full provider and schedules the one verification of this
    /// navigation, even when the injection itself failed. A page already in
    /// fallback mode (the failure was reported before the finish) keeps its
    /// fallback provider.
    pub async fn on_navigation_finished(self: &Arc<Self>, url: String) -> Option<JoinHandle<()>> {
        let (generation, presence) = {
            let mut state = self.state.lock();
            if state.url.as_deref() != Some(url.as_str()) {
                debug!(%url, previous = ?state.url, "finished url differs from started url");
                state.url = Some(url.clone());
            }
            (state.generation, state.presence)
        };
        if presence == PresenceState::Fallback {
            info!(generation, %url, "navigation finished after failure, keeping fallback provider");
            return None;
        }
        info!(generation, %url, "navigation finished");
        if let Err(e) = self.inject_full(generation).await {
            debug!(generation, error = %e, "verification will retry injection");
        }

        let controller = Arc::clone(self);
        Some(tokio::spawn(async move {
            tokio::time::sleep(controller.verify_delay).await;
            controller.verify(generation).await;
        }))
    }

    pub async fn on_navigation_failed(&self, url: String, code: i32, description: String) {
        let generation = {
            let mut state = self.state.lock();
            state.presence = PresenceState::Fallback;
            state.last_error = Some(format!("navigation failed ({code}): {description}"));
            state.generation
        };
        warn!(generation, %url, code, %description, "navigation failed, installing fallback provider");
        let script = PageScript::Fallback { description };
        if let Err(e) = self.surface.evaluate(script).await {
            self.record_error(generation, "fallback injection failed", &e);
        }
    }

    /// Evaluates the full provider script for `generation`. The script's
    /// presence guard makes this a no-op on a page with a working provider.
    pub async fn inject_full(&self, generation: u64) -> Result<(), SurfaceError> {
        match self.surface.evaluate(PageScript::Provider).await {
            Ok(result) => {
                let mut state = self.state.lock();
                if state.generation == generation && state.presence != PresenceState::Fallback {
                    state.presence = PresenceState::FullyInjected;
                }
                debug!(generation, ?result, "provider injected");
                Ok(())
            }
            Err(e) => {
                self.record_error(generation, "provider injection failed", &e);
                Err(e)
            }
        }
    }

    /// Checks the page and re-injects unless the provider is healthy.
    /// Returns `None` when `generation` is stale or the page is in fallback
    /// mode.
    pub async fn verify(&self, generation: u64) -> Option<Verification> {
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                debug!(generation, current = state.generation, "skipping stale verification");
                return None;
            }
            if state.presence == PresenceState::Fallback {
                return None;
            }
            state.verifications += 1;
        }

        let verdict = match self.surface.evaluate(PageScript::Verify).await {
            Ok(reported) => Verification::parse(reported.as_deref()),
            Err(e) => {
                self.record_error(generation, "verification failed", &e);
                Verification::Error
            }
        };
        if verdict.is_healthy() {
            debug!(generation, "provider verified");
            return Some(verdict);
        }

        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return Some(verdict);
            }
            state.reinjections += 1;
        }
        info!(generation, ?verdict, "provider missing after load, re-injecting");
        if let Err(e) = self.inject_full(generation).await {
            warn!(generation, error = %e, "re-injection failed");
        }
        Some(verdict)
    }

    fn record_error(&self, generation: u64, context: &str, e: &SurfaceError) {
        warn!(generation, error = %e, "{context}");
        let mut state = self.state.lock();
        if state.generation == generation {
            state.last_error = Some(format!("{context}: {e}"));
        }
    }
}
