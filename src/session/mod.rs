pub mod manager;
pub mod workflow;

pub use manager::{BrowserLauncher, SessionManager, SessionPhase, StubLauncher};
pub use workflow::{run_workflow, WaitCondition, WorkflowOutcome, WorkflowProgress, WorkflowStep};
