//! [`ActionHandle`] – completion future for long-running device actions.
//!
//! Device calls such as `drive_straight` return immediately with a handle
//! whose status moves from pending/running to a terminal state. The driver
//! side keeps the matching [`ActionCompleter`] and resolves it when the
//! hardware reports completion.

use std::time::Duration;

use botlink_types::BridgeError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::watch;

/// Lifecycle state of a device action. Serialized as `"action_running"` etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    ActionPending,
    ActionRunning,
    ActionSucceeded,
    ActionFailed,
    ActionAborting,
}

impl ActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActionPending => "action_pending",
            Self::ActionRunning => "action_running",
            Self::ActionSucceeded => "action_succeeded",
            Self::ActionFailed => "action_failed",
            Self::ActionAborting => "action_aborting",
        }
    }
}

/// Status snapshot of an action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionStatus {
    pub state: ActionState,
    pub failure_reason: Option<String>,
    pub failure_code: Option<Value>,
}

impl ActionStatus {
    pub fn running() -> Self {
        Self {
            state: ActionState::ActionRunning,
            failure_reason: None,
            failure_code: None,
        }
    }

    pub fn succeeded() -> Self {
        Self {
            state: ActionState::ActionSucceeded,
            failure_reason: None,
            failure_code: None,
        }
    }

    pub fn failed(reason: impl Into<String>, code: Option<Value>) -> Self {
        Self {
            state: ActionState::ActionFailed,
            failure_reason: Some(reason.into()),
            failure_code: code,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, ActionState::ActionSucceeded | ActionState::ActionFailed)
    }

    pub fn is_failed(&self) -> bool {
        self.state == ActionState::ActionFailed
    }
}

/// Caller-side view of a running action.
#[derive(Debug, Clone)]
pub struct ActionHandle {
    name: String,
    status: watch::Receiver<ActionStatus>,
}

/// Driver-side half that resolves an [`ActionHandle`].
#[derive(Debug)]
pub struct ActionCompleter {
    tx: watch::Sender<ActionStatus>,
}

impl ActionHandle {
    /// Create a running action and the completer that resolves it.
    pub fn pending(name: impl Into<String>) -> (Self, ActionCompleter) {
        let (tx, status) = watch::channel(ActionStatus::running());
        (
            Self {
                name: name.into(),
                status,
            },
            ActionCompleter { tx },
        )
    }

    /// Create an action that is already in its final `status`.
    pub fn completed(name: impl Into<String>, status: ActionStatus) -> Self {
        let (_tx, status) = watch::channel(status);
        Self {
            name: name.into(),
            status,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status without waiting.
    pub fn status(&self) -> ActionStatus {
        self.status.borrow().clone()
    }

    /// Wait until the action reaches a terminal state, at most `timeout`.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Timeout`] – the action was still running at the deadline.
    /// - [`BridgeError::HardwareFault`] – the driver dropped the completer
    ///   without resolving the action.
    pub async fn wait_for_completed(&self, timeout: Duration) -> Result<ActionStatus, BridgeError> {
        let mut rx = self.status.clone();
        match tokio::time::timeout(timeout, rx.wait_for(ActionStatus::is_terminal)).await {
            Ok(Ok(status)) => Ok((*status).clone()),
            Ok(Err(_)) => Err(BridgeError::HardwareFault {
                component: self.name.clone(),
                details: "action abandoned before completion".to_string(),
            }),
            Err(_) => Err(BridgeError::Timeout {
                path: self.name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// JSON description used as the `result` of a call.
    pub fn describe(&self) -> Value {
        let status = self.status();
        json!({ "action": self.name, "state": status.state.as_str() })
    }
}

impl ActionCompleter {
    pub fn succeed(self) {
        self.tx.send_replace(ActionStatus::succeeded());
    }

    pub fn fail(self, reason: impl Into<String>, code: Option<Value>) {
        self.tx.send_replace(ActionStatus::failed(reason, code));
    }
}
