//! Session record and lifecycle transitions
//!
//! ```text
//! Pending ──► Provisioning ──► Ready ◄──► Running
//!                  │             │           │
//!                  ▼             ▼           ▼
//!               Failed ──────► Stopping ◄────┘
//!                                │
//!                      ┌─────────┴─────────┐
//!                      ▼                   ▼
//!                   Stopped             Failed
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::ConversationTurn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Provisioning,
    Ready,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 7] = [
        SessionStatus::Pending,
        SessionStatus::Provisioning,
        SessionStatus::Ready,
        SessionStatus::Running,
        SessionStatus::Stopping,
        SessionStatus::Stopped,
        SessionStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Provisioning => "provisioning",
            SessionStatus::Ready => "ready",
            SessionStatus::Running => "running",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Failed => "failed",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Provisioning)
                | (Provisioning, Ready)
                | (Provisioning, Failed)
                | (Ready, Running)
                | (Running, Ready)
                | (Ready, Stopping)
                | (Running, Stopping)
                | (Failed, Stopping)
                | (Stopping, Stopped)
                | (Stopping, Failed)
        )
    }

    /// Stopped and Failed sessions hold no live environment
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Stopped | SessionStatus::Failed)
    }

    /// Sessions whose environment is up
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Ready | SessionStatus::Running)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown session status: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid session transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SessionStatus,
    pub to: SessionStatus,
}

/// A unit of isolation: one environment, one linear history
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub name: Option<String>,
    pub status: SessionStatus,
    pub environment_endpoint: Option<String>,
    pub history: Vec<ConversationTurn>,
    /// Individual tool calls across all task runs; never decreases
    pub tool_call_count: u64,
    /// Task runs that produced an outcome
    pub task_count: u64,
    /// Index assigned to the next appended turn
    pub next_turn_index: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Reason the session entered Failed
    pub failure: Option<String>,
}

impl Session {
    pub fn new(name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            name,
            status: SessionStatus::Pending,
            environment_endpoint: None,
            history: Vec::new(),
            tool_call_count: 0,
            task_count: 0,
            next_turn_index: 0,
            created_at: now,
            last_activity: now,
            failure: None,
        }
    }

    /// Move to `next` if the lifecycle allows it
    pub fn transition(&mut self, next: SessionStatus) -> Result<SessionStatus, InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let previous = self.status;
        self.status = next;
        self.touch();
        Ok(previous)
    }

    /// Append the turns of a finished task run
    pub fn record_run(&mut self, turns: Vec<ConversationTurn>, tool_calls: u64) {
        self.append_turns(turns, tool_calls);
        self.task_count += 1;
    }

    /// Append turns that completed before a run failed
    ///
    /// Their tools already ran, so they count even though the task did not
    /// finish.
    pub fn append_turns(&mut self, turns: Vec<ConversationTurn>, tool_calls: u64) {
        self.next_turn_index += turns.len();
        self.history.extend(turns);
        self.tool_call_count += tool_calls;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status,
            environment_endpoint: self.environment_endpoint.clone(),
            turns: self.history.len(),
            tool_call_count: self.tool_call_count,
            task_count: self.task_count,
            created_at: self.created_at,
            last_activity: self.last_activity,
            failure: self.failure.clone(),
        }
    }
}

/// Session without its history, for listings
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub name: Option<String>,
    pub status: SessionStatus,
    pub environment_endpoint: Option<String>,
    pub turns: usize,
    pub tool_call_count: u64,
    pub task_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub failure: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelOutput;

    #[test]
    fn test_session_creation() {
        let session = Session::new(Some("demo".to_string()));
        assert_eq!(session.status, SessionStatus::Pending);
        assert!(!session.id.is_empty());
        assert!(session.history.is_empty());
        assert_eq!(session.tool_call_count, 0);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut session = Session::new(None);
        session.transition(SessionStatus::Provisioning).unwrap();
        session.transition(SessionStatus::Ready).unwrap();
        session.transition(SessionStatus::Running).unwrap();
        session.transition(SessionStatus::Ready).unwrap();
        session.transition(SessionStatus::Stopping).unwrap();
        session.transition(SessionStatus::Stopped).unwrap();

        let err = session.transition(SessionStatus::Running).unwrap_err();
        assert_eq!(err.from, SessionStatus::Stopped);
        assert_eq!(err.to, SessionStatus::Running);
    }

    #[test]
    fn test_pending_cannot_run() {
        assert!(!SessionStatus::Pending.can_transition_to(SessionStatus::Running));
        assert!(!SessionStatus::Provisioning.can_transition_to(SessionStatus::Running));
    }

    #[test]
    fn test_record_run_accumulates() {
        let mut session = Session::new(None);
        let turn = ConversationTurn {
            index: 0,
            prompt: Some("hi".to_string()),
            model_output: ModelOutput::final_answer("hello"),
            tool_results: Vec::new(),
        };
        session.record_run(vec![turn.clone()], 2);
        session.record_run(vec![ConversationTurn { index: 1, ..turn }], 3);

        assert_eq!(session.tool_call_count, 5);
        assert_eq!(session.task_count, 2);
        assert_eq!(session.next_turn_index, 2);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("Ready".parse::<SessionStatus>().unwrap(), SessionStatus::Ready);
        assert!("bogus".parse::<SessionStatus>().is_err());
        assert_eq!(serde_json::to_value(SessionStatus::Stopped).unwrap(), "stopped");
    }
}
