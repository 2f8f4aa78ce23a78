use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::broadcast;
use url::Url;
use vstream_core_types::util::epoch_millis;
use vstream_core_types::{Cookie, EnvMetadata, OriginState, StorageItem, Viewport};

use crate::errors::{BrowserError, BrowserErrorKind};
use crate::session::{BridgeHandler, BrowserSession, MouseButton, NavigationEvent};

/// Scripted in-memory browser used by unit and integration tests.
///
/// Records every command it receives, keeps a real cookie jar and per-origin
/// local storage, and lets tests drive the page side: queue evaluation
/// results, trigger page-initiated navigations, and invoke exposed bridge
/// functions as if the page called them.
pub struct StubBrowser {
    url: RwLock<String>,
    nav_tx: broadcast::Sender<NavigationEvent>,
    cookies: RwLock<Vec<Cookie>>,
    storage: RwLock<BTreeMap<String, Vec<StorageItem>>>,
    bridges: DashMap<String, BridgeHandler>,
    commands: Mutex<Vec<String>>,
    eval_results: Mutex<VecDeque<Value>>,
    fail_evals: AtomicU32,
}

impl StubBrowser {
    pub fn new() -> Arc<Self> {
        let (nav_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            url: RwLock::new("about:blank".to_string()),
            nav_tx,
            cookies: RwLock::new(Vec::new()),
            storage: RwLock::new(BTreeMap::new()),
            bridges: DashMap::new(),
            commands: Mutex::new(Vec::new()),
            eval_results: Mutex::new(VecDeque::new()),
            fail_evals: AtomicU32::new(0),
        })
    }

    /// Commands recorded so far, oldest first.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    fn log(&self, command: impl Into<String>) {
        self.commands.lock().push(command.into());
    }

    /// Queue the result of the next scripted evaluation.
    pub fn push_eval_result(&self, value: Value) {
        self.eval_results.lock().push_back(value);
    }

    /// Make the next `n` evaluations fail with `ExecutionFailed`.
    pub fn fail_next_evals(&self, n: u32) {
        self.fail_evals.store(n, Ordering::SeqCst);
    }

    /// Simulate a page-initiated navigation (link click, redirect).
    pub fn trigger_navigation(&self, url: &str) {
        *self.url.write() = url.to_string();
        let _ = self.nav_tx.send(NavigationEvent {
            url: url.to_string(),
            ts_ms: epoch_millis(),
        });
    }

    /// Invoke an exposed bridge function as the page would.
    pub fn emit_from_page(&self, name: &str, payload: &str) -> bool {
        match self.bridges.get(name) {
            Some(handler) => {
                handler.value()(payload.to_string());
                true
            }
            None => false,
        }
    }

    pub fn seed_cookies(&self, cookies: Vec<Cookie>) {
        *self.cookies.write() = cookies;
    }

    pub fn seed_local_storage(&self, origin: &str, items: Vec<StorageItem>) {
        self.storage.write().insert(origin.to_string(), items);
    }

    fn current_origin(&self) -> Option<String> {
        let url = self.url.read().clone();
        let parsed = Url::parse(&url).ok()?;
        let origin = parsed.origin();
        origin.is_tuple().then(|| origin.ascii_serialization())
    }
}

#[async_trait]
impl BrowserSession for StubBrowser {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.log(format!("navigate {url}"));
        self.trigger_navigation(url);
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.url.read().clone())
    }

    fn navigations(&self) -> broadcast::Receiver<NavigationEvent> {
        self.nav_tx.subscribe()
    }

    async fn evaluate(&self, script: &str, _args: Value) -> Result<Value, BrowserError> {
        let preview: String = script.chars().take(96).collect();
        self.log(format!("evaluate {preview}"));

        let remaining = self.fail_evals.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_evals.store(remaining - 1, Ordering::SeqCst);
            return Err(BrowserError::new(BrowserErrorKind::ExecutionFailed)
                .with_hint("scripted evaluation failure"));
        }

        if let Some(queued) = self.eval_results.lock().pop_front() {
            return Ok(queued);
        }
        if script.contains("readyState") {
            return Ok(Value::String("complete".to_string()));
        }
        Ok(Value::Null)
    }

    async fn expose_bridge(&self, name: &str, handler: BridgeHandler) -> Result<(), BrowserError> {
        self.log(format!("expose_bridge {name}"));
        self.bridges.insert(name.to_string(), handler);
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, BrowserError> {
        Ok(self.cookies.read().clone())
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<(), BrowserError> {
        self.log(format!("set_cookies {}", cookies.len()));
        let mut jar = self.cookies.write();
        for cookie in cookies {
            jar.retain(|c| !(c.name == cookie.name && c.domain == cookie.domain));
            jar.push(cookie.clone());
        }
        Ok(())
    }

    async fn extract_local_storage(&self) -> Result<Vec<OriginState>, BrowserError> {
        let Some(origin) = self.current_origin() else {
            return Ok(Vec::new());
        };
        let storage = self.storage.read();
        Ok(storage
            .get(&origin)
            .map(|items| {
                vec![OriginState {
                    origin,
                    local_storage: items.clone(),
                }]
            })
            .unwrap_or_default())
    }

    async fn restore_local_storage(&self, origins: &[OriginState]) -> Result<(), BrowserError> {
        self.log(format!("restore_local_storage {}", origins.len()));
        let mut storage = self.storage.write();
        for origin in origins {
            storage.insert(origin.origin.clone(), origin.local_storage.clone());
        }
        Ok(())
    }

    async fn env_metadata(&self) -> Result<EnvMetadata, BrowserError> {
        Ok(EnvMetadata {
            user_agent: "vstream-stub/1.0".to_string(),
            timezone: "UTC".to_string(),
            viewport: Viewport {
                width: 1280,
                height: 720,
            },
            languages: vec!["en-US".to_string()],
            device_pixel_ratio: 1.0,
        })
    }

    async fn mouse_move(&self, x: f64, y: f64) -> Result<(), BrowserError> {
        self.log(format!("mouse_move {x} {y}"));
        Ok(())
    }

    async fn mouse_down(&self, x: f64, y: f64, button: MouseButton) -> Result<(), BrowserError> {
        self.log(format!("mouse_down {x} {y} {}", button.as_str()));
        Ok(())
    }

    async fn mouse_up(&self, button: MouseButton) -> Result<(), BrowserError> {
        self.log(format!("mouse_up {}", button.as_str()));
        Ok(())
    }

    async fn click(&self, x: f64, y: f64, button: MouseButton) -> Result<(), BrowserError> {
        self.log(format!("click {x} {y} {}", button.as_str()));
        Ok(())
    }

    async fn dblclick(&self, x: f64, y: f64) -> Result<(), BrowserError> {
        self.log(format!("dblclick {x} {y}"));
        Ok(())
    }

    async fn wheel(&self, delta_x: f64, delta_y: f64, x: f64, y: f64) -> Result<(), BrowserError> {
        self.log(format!("wheel {delta_x} {delta_y} {x} {y}"));
        Ok(())
    }

    async fn key_press(&self, key: &str) -> Result<(), BrowserError> {
        self.log(format!("key_press {key}"));
        Ok(())
    }

    async fn key_down(&self, key: &str, code: Option<&str>) -> Result<(), BrowserError> {
        self.log(format!("key_down {key} {}", code.unwrap_or("-")));
        Ok(())
    }

    async fn key_up(&self, key: &str) -> Result<(), BrowserError> {
        self.log(format!("key_up {key}"));
        Ok(())
    }
}
