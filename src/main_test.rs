use super::*;

use uuid::Uuid;

static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// # Safety
/// Callers hold `ENV_LOCK`.
unsafe fn clear_env() {
    unsafe {
        for var in ["SESSION_API_URL", "SESSION_APP", "SESSION_STORE_DIR", "RUST_LOG"] {
            std::env::remove_var(var);
        }
    }
}

// =============================================================================
// flags
// =============================================================================

#[test]
fn flags_fall_back_to_session_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_env();
        std::env::set_var("SESSION_API_URL", "https://id.example.test/");
        std::env::set_var("SESSION_APP", "extension");
        std::env::set_var("SESSION_STORE_DIR", "/tmp/watch-snap");
    }

    let cli = Cli::try_parse_from(["session-watch"]).unwrap();
    assert_eq!(cli.api_url.as_deref(), Some("https://id.example.test/"));
    assert_eq!(cli.app.as_deref(), Some("extension"));

    let config = apply_flags(SessionConfig::default(), &cli).unwrap();
    assert_eq!(config.api_url, "https://id.example.test");
    assert_eq!(config.app, "extension");
    assert_eq!(config.store_dir, PathBuf::from("/tmp/watch-snap"));

    unsafe { clear_env() };
}

#[test]
fn explicit_flags_beat_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_env();
        std::env::set_var("SESSION_APP", "extension");
    }

    let cli = Cli::try_parse_from(["session-watch", "--app", "mobile", "--once"]).unwrap();
    let config = apply_flags(SessionConfig::default(), &cli).unwrap();
    assert_eq!(config.app, "mobile");
    assert!(cli.once);

    unsafe { clear_env() };
}

#[test]
fn no_flags_keep_config() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe { clear_env() };

    let cli = Cli::try_parse_from(["session-watch"]).unwrap();
    assert_eq!(apply_flags(SessionConfig::default(), &cli).unwrap(), SessionConfig::default());
}

#[test]
fn bad_api_url_flag_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe { clear_env() };

    let cli = Cli::try_parse_from(["session-watch", "--api-url", "ftp://id.example.test"]).unwrap();
    let err = apply_flags(SessionConfig::default(), &cli).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { var: "SESSION_API_URL", .. }));
}

// =============================================================================
// logging
// =============================================================================

#[test]
fn rust_log_from_env_file_reaches_filter() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe { clear_env() };

    let path = std::env::temp_dir().join(format!("session-watch-{}.env", Uuid::new_v4()));
    std::fs::write(&path, "RUST_LOG=logged_user=debug\n").unwrap();
    dotenvy::from_path(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert!(log_filter().to_string().contains("logged_user=debug"));

    unsafe { clear_env() };
}

#[test]
fn filter_defaults_to_info_without_rust_log() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe { clear_env() };

    let filter = log_filter().to_string();
    assert!(filter.contains("logged_user=info"));
}
