use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use vstream_core_types::{Cookie, EnvMetadata, OriginState};

use crate::errors::BrowserError;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl MouseButton {
    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Middle => "middle",
            MouseButton::Right => "right",
        }
    }
}

/// Emitted whenever the main frame commits a navigation.
#[derive(Clone, Debug)]
pub struct NavigationEvent {
    pub url: String,
    pub ts_ms: u64,
}

/// Host function callable from the page. The payload is the page-supplied
/// string argument, delivered synchronously from the bridge binding.
pub type BridgeHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Capability surface the core requires from a controlled browser.
///
/// Implementations serialize their own protocol commands; callers that share
/// a handle must go through [`crate::SerialSession`] so workflow steps and
/// injected input cannot interleave mid-command.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;
    async fn current_url(&self) -> Result<String, BrowserError>;
    /// Subscribe to main-frame navigation commits.
    fn navigations(&self) -> broadcast::Receiver<NavigationEvent>;

    async fn evaluate(&self, script: &str, args: Value) -> Result<Value, BrowserError>;
    /// Bind a host function callable from the page under `name`.
    async fn expose_bridge(&self, name: &str, handler: BridgeHandler) -> Result<(), BrowserError>;

    async fn cookies(&self) -> Result<Vec<Cookie>, BrowserError>;
    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<(), BrowserError>;
    /// Local storage for the current origin only; cross-origin storage is not
    /// reachable from an in-page evaluation.
    async fn extract_local_storage(&self) -> Result<Vec<OriginState>, BrowserError>;
    async fn restore_local_storage(&self, origins: &[OriginState]) -> Result<(), BrowserError>;
    async fn env_metadata(&self) -> Result<EnvMetadata, BrowserError>;

    async fn mouse_move(&self, x: f64, y: f64) -> Result<(), BrowserError>;
    async fn mouse_down(&self, x: f64, y: f64, button: MouseButton) -> Result<(), BrowserError>;
    async fn mouse_up(&self, button: MouseButton) -> Result<(), BrowserError>;
    async fn click(&self, x: f64, y: f64, button: MouseButton) -> Result<(), BrowserError>;
    async fn dblclick(&self, x: f64, y: f64) -> Result<(), BrowserError>;
    async fn wheel(&self, delta_x: f64, delta_y: f64, x: f64, y: f64) -> Result<(), BrowserError>;

    async fn key_press(&self, key: &str) -> Result<(), BrowserError>;
    async fn key_down(&self, key: &str, code: Option<&str>) -> Result<(), BrowserError>;
    async fn key_up(&self, key: &str) -> Result<(), BrowserError>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BrowserVariant {
    Headless,
    Headed,
}

impl BrowserVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserVariant::Headless => "headless",
            BrowserVariant::Headed => "headed",
        }
    }
}

/// Environment-driven variant selection: production deployments are always
/// headless; elsewhere `VSTREAM_HEADED` opts into a visible browser.
pub fn variant_from_env() -> BrowserVariant {
    let environment = env::var("ENVIRONMENT").unwrap_or_default();
    if environment.eq_ignore_ascii_case("production") {
        return BrowserVariant::Headless;
    }
    match env::var("VSTREAM_HEADED") {
        Ok(value) => {
            let lower = value.to_ascii_lowercase();
            if matches!(lower.as_str(), "1" | "true" | "yes" | "on") {
                BrowserVariant::Headed
            } else {
                BrowserVariant::Headless
            }
        }
        Err(_) => BrowserVariant::Headless,
    }
}
