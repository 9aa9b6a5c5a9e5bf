use super::ConfigError;
use std::path::PathBuf;

/// File name of the bridge config in every location.
pub const CONFIG_FILE: &str = "webview-bridge.toml";

/// Where a config file lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    User,
    System,
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn unix_home_dir() -> Result<PathBuf, ConfigError> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
        .ok_or(ConfigError::MissingEnv("HOME"))
}

/// Directory holding the config for `scope`.
pub fn config_dir(scope: Scope) -> Result<PathBuf, ConfigError> {
    #[cfg(target_os = "macos")]
    {
        match scope {
            Scope::User => Ok(unix_home_dir()?.join("Library/Application Support/webview-bridge")),
            Scope::System => Ok(PathBuf::from("/Library/Application Support/webview-bridge")),
        }
    }
    #[cfg(target_os = "linux")]
    {
        match scope {
            Scope::User => match std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
                Some(xdg) => Ok(PathBuf::from(xdg).join("webview-bridge")),
                None => Ok(unix_home_dir()?.join(".config/webview-bridge")),
            },
            Scope::System => Ok(PathBuf::from("/etc/webview-bridge")),
        }
    }
    #[cfg(target_os = "windows")]
    {
        match scope {
            Scope::User => std::env::var_os("APPDATA")
                .map(PathBuf::from)
                .map(|dir| dir.join("webview-bridge"))
                .ok_or(ConfigError::MissingEnv("APPDATA")),
            Scope::System => Ok(std::env::var_os("PROGRAMDATA")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"))
                .join("webview-bridge")),
        }
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        let _ = scope;
        Err(ConfigError::UnsupportedPlatform)
    }
}

/// Full path of the config file for `scope`.
pub fn config_path(scope: Scope) -> Result<PathBuf, ConfigError> {
    Ok(config_dir(scope)?.join(CONFIG_FILE))
}
