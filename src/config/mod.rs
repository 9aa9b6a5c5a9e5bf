//! Bridge configuration.
//!
//! [`BridgeConfig`] is plain serde data with defaults matching the design
//! values (2 s verification delay, one visible approval prompt, origin
//! authorization off). With the `config` feature it loads from and stores to
//! TOML at per-OS locations (see [`paths`]).
//!
//! ```toml
//! [provider]
//! global_name = "sat20"
//! platform = "android"
//!
//! [injection]
//! verify_delay_ms = 2000
//!
//! [security]
//! require_origin_authorization = true
//! authorized_origins = ["https://app.example"]
//! ```

pub mod paths;
#[cfg(feature = "config")]
pub mod store;

use crate::host::backend::WalletState;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub use paths::Scope;

/// Environment variable overriding [`InjectionSettings::verify_delay_ms`].
pub const ENV_VERIFY_DELAY_MS: &str = "WEBVIEW_BRIDGE_VERIFY_DELAY_MS";
/// Environment variable overriding [`SecuritySettings::require_origin_authorization`].
pub const ENV_REQUIRE_ORIGIN_AUTH: &str = "WEBVIEW_BRIDGE_REQUIRE_ORIGIN_AUTH";
/// Environment variable overriding [`ProviderSettings::platform`].
pub const ENV_PLATFORM: &str = "WEBVIEW_BRIDGE_PLATFORM";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read or write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[cfg(feature = "config")]
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[cfg(feature = "config")]
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
    #[error("{0} already exists")]
    AlreadyExists(PathBuf),
    #[error("config locations are not defined for this platform")]
    UnsupportedPlatform,
}

/// Names and markers of the injected provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Property on `window` holding the provider (`window.sat20`).
    pub global_name: String,
    /// Property on `window` holding the native call interface.
    pub native_interface: String,
    pub version: String,
    pub platform: String,
    /// Leading component of every call identifier.
    pub id_prefix: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            global_name: "sat20".to_string(),
            native_interface: "Sat20Native".to_string(),
            version: "2.0.0".to_string(),
            platform: "android".to_string(),
            id_prefix: "sat20".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionSettings {
    /// Delay between full injection and the health check.
    pub verify_delay_ms: u64,
}

impl Default for InjectionSettings {
    fn default() -> Self {
        Self {
            verify_delay_ms: 2_000,
        }
    }
}

impl InjectionSettings {
    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSettings {
    /// Prompts shown at once; further requests queue in arrival order.
    pub max_visible_prompts: usize,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            max_visible_prompts: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Gate read-only actions on an authorized page origin.
    pub require_origin_authorization: bool,
    /// Origins authorized before any `requestAccounts` approval.
    pub authorized_origins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StdioSettings {
    /// How long the stdio host waits for the shell to report a script result.
    pub script_timeout_ms: u64,
}

impl Default for StdioSettings {
    fn default() -> Self {
        Self {
            script_timeout_ms: 5_000,
        }
    }
}

impl StdioSettings {
    pub fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub provider: ProviderSettings,
    pub injection: InjectionSettings,
    pub approval: ApprovalSettings,
    pub security: SecuritySettings,
    pub wallet: WalletState,
    pub stdio: StdioSettings,
}

impl BridgeConfig {
    #[cfg(feature = "config")]
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    #[cfg(feature = "config")]
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reads a config file.
    #[cfg(feature = "config")]
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reads the config for `scope`, falling back to defaults when no file
    /// exists there. Environment overrides are applied either way.
    #[cfg(feature = "config")]
    pub fn load_for_scope(scope: Scope) -> Result<Self, ConfigError> {
        let path = paths::config_path(scope)?;
        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Applies `WEBVIEW_BRIDGE_*` overrides. Unparsable values are logged and
    /// ignored.
    pub fn apply_env(&mut self) {
        if let Ok(raw) = env::var(ENV_VERIFY_DELAY_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.injection.verify_delay_ms = ms,
                Err(_) => warn!(var = ENV_VERIFY_DELAY_MS, value = %raw, "ignoring invalid override"),
            }
        }
        if let Ok(raw) = env::var(ENV_REQUIRE_ORIGIN_AUTH) {
            match parse_flag(&raw) {
                Some(flag) => self.security.require_origin_authorization = flag,
                None => warn!(var = ENV_REQUIRE_ORIGIN_AUTH, value = %raw, "ignoring invalid override"),
            }
        }
        if let Ok(raw) = env::var(ENV_PLATFORM) {
            if !raw.trim().is_empty() {
                self.provider.platform = raw.trim().to_string();
            }
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_flag_accepts_common_spellings() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" off "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[cfg(feature = "config")]
    #[test]
    fn partial_toml_keeps_defaults_for_missing_sections() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [injection]
            verify_delay_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.injection.verify_delay(), Duration::from_millis(250));
        assert_eq!(config.approval.max_visible_prompts, 1);
        assert_eq!(config.provider.global_name, "sat20");
        assert!(!config.security.require_origin_authorization);
    }
}
