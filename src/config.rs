use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;
use vstream_streamer::StreamerConfig;

const DEFAULT_BIND: &str = "0.0.0.0:8787";

/// Service configuration, resolved once at startup from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind: SocketAddr,
    /// Ring capacity per session.
    pub event_buffer_size: usize,
    /// Per-client backpressure threshold.
    pub client_write_queue: usize,
    /// Control-channel rate limit (valid messages per rolling second).
    pub control_rate_per_sec: u32,
    /// Control-channel connection cap.
    pub control_max_duration: Duration,
    /// Max age of a verified storage-state record.
    pub cookie_verify_ttl_hours: u32,
    /// Auto-save storage state when a session ends.
    pub auto_save_session_state: bool,
    /// Gate loading of prior storage state before a workflow run.
    pub feature_use_cookies: bool,
    /// How long `client_ready` waits for a buffered snapshot.
    pub snapshot_wait: Duration,
    /// How long the session manager waits for the first full snapshot before
    /// degrading into streaming anyway.
    pub recorder_ready_timeout: Duration,
    pub cookie_kid: Option<String>,
    pub cookie_public_key_pem: Option<String>,
    pub cookie_private_key_pem: Option<String>,
    pub user_state_dir: Option<PathBuf>,
    pub shared_state_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.parse().expect("default bind address"),
            event_buffer_size: 1000,
            client_write_queue: 256,
            control_rate_per_sec: 100,
            control_max_duration: Duration::from_secs(300),
            cookie_verify_ttl_hours: 24,
            auto_save_session_state: true,
            feature_use_cookies: false,
            snapshot_wait: Duration::from_secs(30),
            recorder_ready_timeout: Duration::from_secs(10),
            cookie_kid: None,
            cookie_public_key_pem: None,
            cookie_private_key_pem: None,
            user_state_dir: None,
            shared_state_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind: env_parse("VSTREAM_BIND", defaults.bind),
            event_buffer_size: env_parse("EVENT_BUFFER_SIZE", defaults.event_buffer_size),
            client_write_queue: env_parse("CLIENT_WRITE_QUEUE", defaults.client_write_queue),
            control_rate_per_sec: env_parse("CONTROL_RATE_PER_SEC", defaults.control_rate_per_sec),
            control_max_duration: Duration::from_secs(env_parse(
                "CONTROL_MAX_DURATION_S",
                defaults.control_max_duration.as_secs(),
            )),
            cookie_verify_ttl_hours: env_parse(
                "COOKIE_VERIFY_TTL_HOURS",
                defaults.cookie_verify_ttl_hours,
            ),
            auto_save_session_state: env_truthy(
                "AUTO_SAVE_SESSION_STATE",
                defaults.auto_save_session_state,
            ),
            feature_use_cookies: env_truthy("FEATURE_USE_COOKIES", defaults.feature_use_cookies),
            snapshot_wait: Duration::from_secs(env_parse(
                "SNAPSHOT_WAIT_S",
                defaults.snapshot_wait.as_secs(),
            )),
            recorder_ready_timeout: Duration::from_secs(env_parse(
                "RECORDER_READY_TIMEOUT_S",
                defaults.recorder_ready_timeout.as_secs(),
            )),
            cookie_kid: env_opt("COOKIE_KID"),
            cookie_public_key_pem: pem_from_env("COOKIE_PUBLIC_KEY"),
            cookie_private_key_pem: pem_from_env("COOKIE_PRIVATE_KEY"),
            user_state_dir: env_opt("USER_STORAGE_STATE_DIR").map(PathBuf::from),
            shared_state_file: env_opt("SHARED_STORAGE_STATE_FILE").map(PathBuf::from),
        }
    }

    pub fn streamer_config(&self) -> StreamerConfig {
        StreamerConfig {
            buffer_size: self.event_buffer_size,
            client_queue: self.client_write_queue,
            snapshot_wait: self.snapshot_wait,
            ..StreamerConfig::default()
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Err(_) => None,
    }
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env_opt(key) {
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(target: "config", key, raw = %raw, "unparseable value; using default");
                default
            }
        },
        None => default,
    }
}

fn env_truthy(key: &str, default: bool) -> bool {
    match env_opt(key) {
        Some(value) => matches!(
            value.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        None => default,
    }
}

/// Key material may be inlined (`KEY`) or referenced by path (`KEY_FILE`).
fn pem_from_env(key: &str) -> Option<String> {
    if let Some(inline) = env_opt(key) {
        return Some(inline);
    }
    let path = env_opt(&format!("{key}_FILE"))?;
    match std::fs::read_to_string(&path) {
        Ok(pem) => Some(pem),
        Err(err) => {
            warn!(target: "config", key, path = %path, %err, "failed to read key file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn with_env<F: FnOnce()>(vars: &[(&str, &str)], body: F) {
        for (key, value) in vars {
            env::set_var(key, value);
        }
        body();
        for (key, _) in vars {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn defaults_match_contract() {
        let config = Config::default();
        assert_eq!(config.event_buffer_size, 1000);
        assert_eq!(config.client_write_queue, 256);
        assert_eq!(config.control_rate_per_sec, 100);
        assert_eq!(config.control_max_duration, Duration::from_secs(300));
        assert_eq!(config.cookie_verify_ttl_hours, 24);
        assert!(config.auto_save_session_state);
        assert!(!config.feature_use_cookies);
    }

    #[test]
    #[serial]
    fn env_overrides_apply() {
        with_env(
            &[
                ("EVENT_BUFFER_SIZE", "50"),
                ("CONTROL_RATE_PER_SEC", "10"),
                ("FEATURE_USE_COOKIES", "true"),
                ("AUTO_SAVE_SESSION_STATE", "off"),
            ],
            || {
                let config = Config::from_env();
                assert_eq!(config.event_buffer_size, 50);
                assert_eq!(config.control_rate_per_sec, 10);
                assert!(config.feature_use_cookies);
                assert!(!config.auto_save_session_state);
            },
        );
    }

    #[test]
    #[serial]
    fn garbage_values_fall_back_to_defaults() {
        with_env(&[("EVENT_BUFFER_SIZE", "lots")], || {
            let config = Config::from_env();
            assert_eq!(config.event_buffer_size, 1000);
        });
    }
}
