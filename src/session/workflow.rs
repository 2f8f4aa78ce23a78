use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vstream_browser::BrowserSession;
use vstream_registry::SessionControls;

const CONDITION_TIMEOUT: Duration = Duration::from_secs(10);
const CONDITION_POLL: Duration = Duration::from_millis(100);
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// One scripted browser action.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WorkflowStep {
    Navigate { url: String },
    Click { selector: String },
    Input { selector: String, value: String },
    Wait {
        #[serde(flatten)]
        condition: WaitCondition,
    },
}

impl WorkflowStep {
    pub fn action_name(&self) -> &'static str {
        match self {
            WorkflowStep::Navigate { .. } => "navigate",
            WorkflowStep::Click { .. } => "click",
            WorkflowStep::Input { .. } => "input",
            WorkflowStep::Wait { .. } => "wait",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "until", rename_all = "snake_case")]
pub enum WaitCondition {
    DomReady,
    Selector { selector: String },
    Millis { ms: u64 },
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct WorkflowProgress {
    pub step: usize,
    pub total: usize,
    pub action: &'static str,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WorkflowOutcome {
    pub steps_completed: usize,
    pub error: Option<String>,
}

impl WorkflowOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Execute a scripted workflow against the shared browser handle.
///
/// Runs concurrently with any attached control channel; `input` steps wait
/// while the channel holds the pause flag (interactive password entry).
/// Step values are never logged.
pub async fn run_workflow(
    browser: &dyn BrowserSession,
    controls: &SessionControls,
    steps: &[WorkflowStep],
    cancel: &CancellationToken,
    progress: &watch::Sender<WorkflowProgress>,
) -> WorkflowOutcome {
    for (index, step) in steps.iter().enumerate() {
        if cancel.is_cancelled() {
            return WorkflowOutcome {
                steps_completed: index,
                error: Some("cancelled".to_string()),
            };
        }
        let _ = progress.send(WorkflowProgress {
            step: index + 1,
            total: steps.len(),
            action: step.action_name(),
        });
        info!(
            target: "workflow",
            step = index + 1,
            total = steps.len(),
            action = step.action_name(),
            "executing workflow step"
        );

        let result = match step {
            WorkflowStep::Navigate { url } => browser.navigate(url).await.map_err(|e| e.to_string()),
            WorkflowStep::Click { selector } => click(browser, selector).await,
            WorkflowStep::Input { selector, value } => {
                wait_while_paused(controls, cancel).await;
                if cancel.is_cancelled() {
                    return WorkflowOutcome {
                        steps_completed: index,
                        error: Some("cancelled".to_string()),
                    };
                }
                input(browser, selector, value).await
            }
            WorkflowStep::Wait { condition } => wait_for(browser, condition).await,
        };

        if let Err(error) = result {
            warn!(
                target: "workflow",
                step = index + 1,
                action = step.action_name(),
                error = %error,
                "workflow step failed"
            );
            return WorkflowOutcome {
                steps_completed: index,
                error: Some(error),
            };
        }
    }
    WorkflowOutcome {
        steps_completed: steps.len(),
        error: None,
    }
}

async fn wait_while_paused(controls: &SessionControls, cancel: &CancellationToken) {
    while controls.is_paused() && !cancel.is_cancelled() {
        sleep(PAUSE_POLL).await;
    }
}

async fn click(browser: &dyn BrowserSession, selector: &str) -> Result<(), String> {
    let script = selector_script(
        selector,
        "el.click(); return true;",
    );
    match browser.evaluate(&script, Value::Null).await {
        Ok(Value::Bool(false)) => Err("no element matched click selector".to_string()),
        Ok(_) => Ok(()),
        Err(err) => Err(err.to_string()),
    }
}

async fn input(browser: &dyn BrowserSession, selector: &str, value: &str) -> Result<(), String> {
    let value_literal = serde_json::to_string(value).map_err(|err| err.to_string())?;
    let body = format!(
        "el.value = {value_literal}; el.dispatchEvent(new Event('input', {{bubbles: true}})); el.dispatchEvent(new Event('change', {{bubbles: true}})); return true;"
    );
    let script = selector_script(selector, &body);
    match browser.evaluate(&script, Value::Null).await {
        Ok(Value::Bool(false)) => Err("no element matched input selector".to_string()),
        Ok(_) => Ok(()),
        Err(err) => Err(err.to_string()),
    }
}

fn selector_script(selector: &str, body: &str) -> String {
    let selector_literal =
        serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "(() => {{ const el = document.querySelector({selector_literal}); if (!el) {{ return false; }} {body} }})()"
    )
}

async fn wait_for(browser: &dyn BrowserSession, condition: &WaitCondition) -> Result<(), String> {
    match condition {
        WaitCondition::Millis { ms } => {
            sleep(Duration::from_millis(*ms)).await;
            Ok(())
        }
        WaitCondition::DomReady => {
            poll_until(browser, "document.readyState", |value| {
                value
                    .as_str()
                    .map(|state| matches!(state, "interactive" | "complete"))
                    .unwrap_or(false)
            })
            .await
        }
        WaitCondition::Selector { selector } => {
            let selector_literal =
                serde_json::to_string(selector).map_err(|err| err.to_string())?;
            let script = format!("document.querySelector({selector_literal}) !== null");
            poll_until(browser, &script, |value| value.as_bool().unwrap_or(false)).await
        }
    }
}

async fn poll_until(
    browser: &dyn BrowserSession,
    script: &str,
    ready: impl Fn(&Value) -> bool,
) -> Result<(), String> {
    let deadline = Instant::now() + CONDITION_TIMEOUT;
    loop {
        match browser.evaluate(script, Value::Null).await {
            Ok(value) => {
                // engines without a scripted answer return null; treat that
                // as satisfied rather than spinning until timeout
                if value.is_null() || ready(&value) {
                    return Ok(());
                }
            }
            Err(err) => return Err(err.to_string()),
        }
        if Instant::now() >= deadline {
            return Err("wait condition timed out".to_string());
        }
        sleep(CONDITION_POLL).await;
    }
}
