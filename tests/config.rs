mod common;

use serial_test::serial;
use std::fs;
use webview_bridge::config::{paths, store, BridgeConfig, ConfigError, Scope};

#[test]
#[serial]
#[cfg(target_os = "linux")]
fn user_config_lives_under_xdg_config_home() {
    let (td, _env) = common::sandbox_env();

    let path = paths::config_path(Scope::User).expect("path");
    assert_eq!(
        path,
        td.path()
            .join("home/.config/webview-bridge")
            .join(paths::CONFIG_FILE)
    );
}

#[test]
#[serial]
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn write_default_then_remove_user_scope() {
    let (_td, _env) = common::sandbox_env();

    assert!(!store::exists(Scope::User).unwrap());
    let path = store::write_default(Scope::User, false).expect("write");
    assert!(path.is_file());
    assert!(store::exists(Scope::User).unwrap());

    let written = BridgeConfig::load(&path).expect("load");
    assert_eq!(written, BridgeConfig::default());

    store::remove(Scope::User).expect("remove");
    assert!(!store::exists(Scope::User).unwrap());
    store::remove(Scope::User).expect("removing twice is fine");
}

#[test]
#[serial]
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn write_default_keeps_existing_file_unless_forced() {
    let (_td, _env) = common::sandbox_env();

    let path = store::write_default(Scope::User, false).unwrap();
    fs::write(&path, "[injection]\nverify_delay_ms = 10\n").unwrap();

    let err = store::write_default(Scope::User, false).expect_err("file exists");
    assert!(matches!(err, ConfigError::AlreadyExists(ref p) if *p == path));
    assert_eq!(BridgeConfig::load(&path).unwrap().injection.verify_delay_ms, 10);

    store::write_default(Scope::User, true).expect("forced");
    assert_eq!(BridgeConfig::load(&path).unwrap().injection.verify_delay_ms, 2_000);
}

#[test]
#[serial]
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn load_for_scope_falls_back_to_defaults() {
    let (_td, _env) = common::sandbox_env();

    let config = BridgeConfig::load_for_scope(Scope::User).expect("defaults");
    assert_eq!(config, BridgeConfig::default());
}

#[test]
#[serial]
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn environment_overrides_file_values() {
    let (_td, _env) = common::sandbox_env();

    let path = paths::config_path(Scope::User).unwrap();
    let mut config = BridgeConfig::default();
    config.injection.verify_delay_ms = 500;
    config.provider.platform = "ios".to_string();
    store::write(&config, &path).unwrap();

    let _overrides = common::EnvGuard::set(&[
        ("WEBVIEW_BRIDGE_VERIFY_DELAY_MS", "750".to_string()),
        ("WEBVIEW_BRIDGE_REQUIRE_ORIGIN_AUTH", "yes".to_string()),
        ("WEBVIEW_BRIDGE_PLATFORM", "   ".to_string()),
    ]);
    let loaded = BridgeConfig::load_for_scope(Scope::User).unwrap();

    assert_eq!(loaded.injection.verify_delay_ms, 750);
    assert!(loaded.security.require_origin_authorization);
    assert_eq!(loaded.provider.platform, "ios");
}

#[test]
#[serial]
fn invalid_overrides_are_ignored() {
    let _overrides = common::EnvGuard::set(&[
        ("WEBVIEW_BRIDGE_VERIFY_DELAY_MS", "soon".to_string()),
        ("WEBVIEW_BRIDGE_REQUIRE_ORIGIN_AUTH", "perhaps".to_string()),
    ]);
    let mut config = BridgeConfig::default();
    config.apply_env();

    assert_eq!(config.injection.verify_delay_ms, 2_000);
    assert!(!config.security.require_origin_authorization);
}

#[test]
fn toml_sections_map_onto_settings() {
    let config = BridgeConfig::from_toml_str(
        r#"
        [provider]
        global_name = "wallet"
        native_interface = "WalletNative"

        [approval]
        max_visible_prompts = 3

        [security]
        require_origin_authorization = true
        authorized_origins = ["https://app.example"]

        [wallet]
        balance = "42"
        accounts = ["bc1qfirst", "bc1qsecond"]

        [wallet.asset_amounts]
        "ordx:f:pearl" = "7"
        "#,
    )
    .expect("parse");

    assert_eq!(config.provider.global_name, "wallet");
    assert_eq!(config.provider.native_interface, "WalletNative");
    assert_eq!(config.provider.version, "2.0.0");
    assert_eq!(config.approval.max_visible_prompts, 3);
    assert_eq!(config.security.authorized_origins, vec!["https://app.example"]);
    assert_eq!(config.wallet.balance, "42");
    assert_eq!(config.wallet.accounts.len(), 2);
    assert_eq!(config.wallet.asset_amounts["ordx:f:pearl"], "7");
    assert_eq!(config.wallet.network, "satsnet-test");
    assert_eq!(config.stdio.script_timeout_ms, 5_000);
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let err = BridgeConfig::from_toml_str("[injection]\nverify_delay_ms = \"soon\"\n")
        .expect_err("wrong type");
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn missing_file_reports_its_path() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("absent.toml");

    let err = BridgeConfig::load(&path).expect_err("missing");
    assert!(matches!(err, ConfigError::Io { path: ref p, .. } if *p == path));
}
