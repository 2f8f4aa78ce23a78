use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use vstream_core_types::{Cookie, EnvMetadata, OriginState};

use crate::errors::BrowserError;
use crate::session::{BridgeHandler, BrowserSession, MouseButton, NavigationEvent};

/// Serializing wrapper around a shared browser handle.
///
/// The workflow runner and the control channel both submit commands through
/// the same handle; this wrapper funnels every command through one async
/// queue so two callers can never interleave mid-command. Navigation
/// subscription stays lock-free since it only clones a broadcast receiver.
pub struct SerialSession {
    inner: Arc<dyn BrowserSession>,
    gate: Mutex<()>,
}

impl SerialSession {
    pub fn new(inner: Arc<dyn BrowserSession>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            gate: Mutex::new(()),
        })
    }
}

#[async_trait]
impl BrowserSession for SerialSession {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let _slot = self.gate.lock().await;
        self.inner.navigate(url).await
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        let _slot = self.gate.lock().await;
        self.inner.current_url().await
    }

    fn navigations(&self) -> broadcast::Receiver<NavigationEvent> {
        self.inner.navigations()
    }

    async fn evaluate(&self, script: &str, args: Value) -> Result<Value, BrowserError> {
        let _slot = self.gate.lock().await;
        self.inner.evaluate(script, args).await
    }

    async fn expose_bridge(&self, name: &str, handler: BridgeHandler) -> Result<(), BrowserError> {
        let _slot = self.gate.lock().await;
        self.inner.expose_bridge(name, handler).await
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, BrowserError> {
        let _slot = self.gate.lock().await;
        self.inner.cookies().await
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<(), BrowserError> {
        let _slot = self.gate.lock().await;
        self.inner.set_cookies(cookies).await
    }

    async fn extract_local_storage(&self) -> Result<Vec<OriginState>, BrowserError> {
        let _slot = self.gate.lock().await;
        self.inner.extract_local_storage().await
    }

    async fn restore_local_storage(&self, origins: &[OriginState]) -> Result<(), BrowserError> {
        let _slot = self.gate.lock().await;
        self.inner.restore_local_storage(origins).await
    }

    async fn env_metadata(&self) -> Result<EnvMetadata, BrowserError> {
        let _slot = self.gate.lock().await;
        self.inner.env_metadata().await
    }

    async fn mouse_move(&self, x: f64, y: f64) -> Result<(), BrowserError> {
        let _slot = self.gate.lock().await;
        self.inner.mouse_move(x, y).await
    }

    async fn mouse_down(&self, x: f64, y: f64, button: MouseButton) -> Result<(), BrowserError> {
        let _slot = self.gate.lock().await;
        self.inner.mouse_down(x, y, button).await
    }

    async fn mouse_up(&self, button: MouseButton) -> Result<(), BrowserError> {
        let _slot = self.gate.lock().await;
        self.inner.mouse_up(button).await
    }

    async fn click(&self, x: f64, y: f64, button: MouseButton) -> Result<(), BrowserError> {
        let _slot = self.gate.lock().await;
        self.inner.click(x, y, button).await
    }

    async fn dblclick(&self, x: f64, y: f64) -> Result<(), BrowserError> {
        let _slot = self.gate.lock().await;
        self.inner.dblclick(x, y).await
    }

    async fn wheel(&self, delta_x: f64, delta_y: f64, x: f64, y: f64) -> Result<(), BrowserError> {
        let _slot = self.gate.lock().await;
        self.inner.wheel(delta_x, delta_y, x, y).await
    }

    async fn key_press(&self, key: &str) -> Result<(), BrowserError> {
        let _slot = self.gate.lock().await;
        self.inner.key_press(key).await
    }

    async fn key_down(&self, key: &str, code: Option<&str>) -> Result<(), BrowserError> {
        let _slot = self.gate.lock().await;
        self.inner.key_down(key, code).await
    }

    async fn key_up(&self, key: &str) -> Result<(), BrowserError> {
        let _slot = self.gate.lock().await;
        self.inner.key_up(key).await
    }
}
