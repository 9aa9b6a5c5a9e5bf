//! The embedded browser surface, seen from the host.
//!
//! A surface runs scripts in the page context and reports navigation
//! lifecycle events. [`crate::page::PageContext`] is the in-process
//! implementation; [`crate::host::stdio::StdioSurface`] forwards to a browser
//! shell over stdin/stdout. A real webview embedding implements the trait by
//! calling [`PageScript::render`] and its own `evaluateJavascript`.

use crate::error::SurfaceError;
use crate::script::PageScript;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait BrowserSurface: Send + Sync {
    /// Runs `script` in the current page context, returning its string result
    /// when the surface reports one.
    async fn evaluate(&self, script: PageScript) -> Result<Option<String>, SurfaceError>;

    /// Shows or hides the surface, e.g. while an approval prompt is up.
    fn set_visible(&self, _visible: bool) {}
}

/// Navigation lifecycle callbacks of the surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NavigationEvent {
    Started {
        url: String,
    },
    Finished {
        url: String,
    },
    Failed {
        url: String,
        code: i32,
        description: String,
    },
}

impl NavigationEvent {
    pub fn url(&self) -> &str {
        match self {
            NavigationEvent::Started { url }
            | NavigationEvent::Finished { url }
            | NavigationEvent::Failed { url, .. } => url,
        }
    }
}
