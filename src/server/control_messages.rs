use serde::Deserialize;
use serde_json::Value;
use vstream_browser::{BrowserError, BrowserSession, MouseButton};

/// Inclusive bound for viewer-supplied coordinates.
pub const COORD_MAX: f64 = 10_000.0;

/// Wrapper shared by every control-channel message.
#[derive(Debug, Deserialize)]
pub struct ControlEnvelope {
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: Value,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseAction {
    Click,
    Move,
    Down,
    Up,
    Dblclick,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAction {
    Down,
    Up,
}

/// Parsed control message, pre-validation.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Mouse {
        action: MouseAction,
        x: Option<f64>,
        y: Option<f64>,
        button: Option<MouseButton>,
        #[serde(rename = "clickCount")]
        click_count: Option<u32>,
    },
    Wheel {
        #[serde(rename = "deltaX")]
        delta_x: f64,
        #[serde(rename = "deltaY")]
        delta_y: f64,
        x: f64,
        y: f64,
    },
    Keyboard {
        action: KeyAction,
        key: String,
        code: Option<String>,
    },
}

impl ControlMessage {
    /// Short action label safe for logs; never includes key values.
    pub fn describe(&self) -> String {
        match self {
            ControlMessage::Mouse { action, .. } => format!("mouse:{action:?}").to_lowercase(),
            ControlMessage::Wheel { .. } => "wheel".to_string(),
            ControlMessage::Keyboard { action, key, .. } => {
                format!("keyboard:{action:?}:{}", key_category(key)).to_lowercase()
            }
        }
    }

    /// Field-presence and bounds checks per message type.
    pub fn validate(&self) -> Result<(), &'static str> {
        match self {
            ControlMessage::Mouse {
                action,
                x,
                y,
                button,
                click_count,
            } => {
                match action {
                    MouseAction::Click => {
                        require_coords(*x, *y)?;
                        if button.is_none() {
                            return Err("mouse click requires button");
                        }
                        if click_count.is_none() {
                            return Err("mouse click requires clickCount");
                        }
                    }
                    MouseAction::Move | MouseAction::Dblclick => require_coords(*x, *y)?,
                    MouseAction::Down => {
                        require_coords(*x, *y)?;
                        if button.is_none() {
                            return Err("mouse down requires button");
                        }
                    }
                    MouseAction::Up => {
                        if button.is_none() {
                            return Err("mouse up requires button");
                        }
                    }
                }
                Ok(())
            }
            ControlMessage::Wheel { x, y, .. } => require_coords(Some(*x), Some(*y)),
            ControlMessage::Keyboard { key, .. } => {
                if key.is_empty() {
                    return Err("keyboard message requires key");
                }
                Ok(())
            }
        }
    }

    /// Translate into browser input commands. Callers wrap this in the
    /// per-command execution timeout.
    pub async fn execute(&self, browser: &dyn BrowserSession) -> Result<(), BrowserError> {
        match self {
            ControlMessage::Mouse {
                action,
                x,
                y,
                button,
                click_count,
            } => {
                let x = x.unwrap_or_default();
                let y = y.unwrap_or_default();
                let button = button.unwrap_or(MouseButton::Left);
                match action {
                    MouseAction::Click => {
                        if click_count.unwrap_or(1) >= 2 {
                            browser.dblclick(x, y).await
                        } else {
                            browser.click(x, y, button).await
                        }
                    }
                    MouseAction::Move => browser.mouse_move(x, y).await,
                    MouseAction::Down => {
                        browser.mouse_move(x, y).await?;
                        browser.mouse_down(x, y, button).await
                    }
                    MouseAction::Up => browser.mouse_up(button).await,
                    MouseAction::Dblclick => browser.dblclick(x, y).await,
                }
            }
            ControlMessage::Wheel {
                delta_x,
                delta_y,
                x,
                y,
            } => browser.wheel(*delta_x, *delta_y, *x, *y).await,
            ControlMessage::Keyboard { action, key, code } => match action {
                KeyAction::Down => {
                    if key.chars().count() == 1 {
                        browser.key_press(key).await
                    } else {
                        browser.key_down(key, code.as_deref()).await
                    }
                }
                KeyAction::Up => browser.key_up(key).await,
            },
        }
    }
}

fn require_coords(x: Option<f64>, y: Option<f64>) -> Result<(), &'static str> {
    let (Some(x), Some(y)) = (x, y) else {
        return Err("message requires x and y");
    };
    if !(0.0..=COORD_MAX).contains(&x) || !(0.0..=COORD_MAX).contains(&y) {
        return Err("coordinates out of bounds");
    }
    Ok(())
}

/// Keystrokes are never logged in cleartext; only the category is recorded.
pub fn key_category(key: &str) -> &'static str {
    if key.chars().count() == 1 {
        "single_char"
    } else {
        "named"
    }
}
