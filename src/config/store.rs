//! Writing and removing config files.

use super::{paths, BridgeConfig, ConfigError, Scope};
use std::fs;
use std::path::{Path, PathBuf};

/// Writes `config` to `path`, creating parent directories.
pub fn write(config: &BridgeConfig, path: &Path) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let body = config.to_toml_string()?;
    fs::write(path, body).map_err(io_err)
}

/// Writes a default config for `scope`. An existing file is kept unless
/// `force` is set.
pub fn write_default(scope: Scope, force: bool) -> Result<PathBuf, ConfigError> {
    let path = paths::config_path(scope)?;
    if path.exists() && !force {
        return Err(ConfigError::AlreadyExists(path));
    }
    write(&BridgeConfig::default(), &path)?;
    tracing::info!(path = %path.display(), "wrote default config");
    Ok(path)
}

pub fn exists(scope: Scope) -> Result<bool, ConfigError> {
    Ok(paths::config_path(scope)?.exists())
}

/// Removes the config for `scope`. A missing file is not an error.
pub fn remove(scope: Scope) -> Result<(), ConfigError> {
    let path = paths::config_path(scope)?;
    if path.exists() {
        fs::remove_file(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), "removed config");
    }
    Ok(())
}
