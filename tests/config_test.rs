// Config loading, environment overrides and persistence.
//
// Every test points TRANSPORT_CONFIG_DIR at its own temp dir and holds
// ENV_LOCK while env vars are set, so the tests can run in parallel.

use std::env;
use std::sync::{Mutex, MutexGuard};

use backend_transport::push::ReconnectPolicy;
use backend_transport::Config;
use tempfile::TempDir;

static ENV_LOCK: Mutex<()> = Mutex::new(());

const VARS: &[&str] = &[
    "TRANSPORT_CONFIG_DIR",
    "TRANSPORT_ENV",
    "TRANSPORT_BACKEND_URL",
    "TRANSPORT_BACKEND_WS_URL",
    "TRANSPORT_KEEPALIVE_SECS",
    "TRANSPORT_PROXY",
];

/// Holds the env lock and a fresh config dir; clears every transport
/// variable on entry and exit.
struct EnvGuard {
    dir: TempDir,
    _lock: MutexGuard<'static, ()>,
}

impl EnvGuard {
    fn new() -> Self {
        let lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        for var in VARS {
            env::remove_var(var);
        }
        let dir = TempDir::new().unwrap();
        env::set_var("TRANSPORT_CONFIG_DIR", dir.path());
        Self { dir, _lock: lock }
    }

    fn set(&self, key: &str, value: &str) {
        env::set_var(key, value);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for var in VARS {
            env::remove_var(var);
        }
    }
}

#[test]
fn test_missing_file_yields_defaults() {
    let guard = EnvGuard::new();

    let config = Config::load().unwrap();

    assert_eq!(config, Config::default());
    assert_eq!(Config::config_dir().unwrap(), guard.dir.path());
}

#[test]
fn test_save_then_load() {
    let _guard = EnvGuard::new();

    let mut config = Config::default();
    config.backend.title = "Staging".to_string();
    config.keepalive_secs = 45;
    config.reconnect = ReconnectPolicy::ExponentialBackoff {
        initial_secs: 2,
        max_secs: 30,
    };
    config.save().unwrap();

    let loaded = Config::load().unwrap();
    assert_eq!(loaded, config);
}

#[cfg(unix)]
#[test]
fn test_saved_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;
    let _guard = EnvGuard::new();

    Config::default().save().unwrap();

    let mode = std::fs::metadata(Config::path().unwrap())
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn test_env_overrides() {
    let guard = EnvGuard::new();
    guard.set("TRANSPORT_BACKEND_URL", "https://staging.example.com");
    guard.set("TRANSPORT_BACKEND_WS_URL", "wss://push.staging.example.com");
    guard.set("TRANSPORT_KEEPALIVE_SECS", "10");
    guard.set("TRANSPORT_PROXY", "proxy.local:1080");

    let config = Config::load().unwrap();

    assert_eq!(
        config.backend.endpoints.backend_url.as_str(),
        "https://staging.example.com/"
    );
    assert_eq!(
        config.push_base_url().unwrap().as_str(),
        "wss://push.staging.example.com/"
    );
    assert_eq!(config.keepalive_secs, 10);
    let proxy = config.proxy.unwrap();
    assert_eq!(proxy.host, "proxy.local");
    assert_eq!(proxy.port, 1080);
}

#[test]
fn test_invalid_env_overrides_are_ignored() {
    let guard = EnvGuard::new();
    guard.set("TRANSPORT_BACKEND_URL", "not a url");
    guard.set("TRANSPORT_KEEPALIVE_SECS", "0");
    guard.set("TRANSPORT_PROXY", "no-port");

    let config = Config::load().unwrap();
    let defaults = Config::default();

    assert_eq!(
        config.backend.endpoints.backend_url,
        defaults.backend.endpoints.backend_url
    );
    assert_eq!(config.keepalive_secs, 30);
    assert!(config.proxy.is_none());
}

#[test]
fn test_env_overrides_apply_over_file() {
    let guard = EnvGuard::new();
    let mut config = Config::default();
    config.keepalive_secs = 60;
    config.save().unwrap();

    guard.set("TRANSPORT_KEEPALIVE_SECS", "5");
    assert_eq!(Config::load().unwrap().keepalive_secs, 5);
}

#[test]
fn test_corrupt_file_is_an_error() {
    let _guard = EnvGuard::new();
    std::fs::write(Config::path().unwrap(), "{ not json").unwrap();

    let err = Config::load().unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse"));
}

#[test]
fn test_pinned_keys_load_from_file() {
    let _guard = EnvGuard::new();
    let key = rcgen::KeyPair::generate().unwrap();
    let pem = key.public_key_pem();

    let mut json = serde_json::to_value(Config::default()).unwrap();
    json["backend"]["pinned_keys"] = serde_json::json!([
        { "host": "*.wire.com", "public_key": pem }
    ]);
    std::fs::write(Config::path().unwrap(), json.to_string()).unwrap();

    let config = Config::load().unwrap();
    assert_eq!(config.backend.pinned_keys.len(), 1);
    let entry = &config.backend.pinned_keys[0];
    assert!(entry.host_pattern.matches("prod-nginz-https.wire.com"));
    assert_eq!(entry.public_key.as_der(), key.public_key_der().as_slice());
}
