//! Conversation orchestrator - the turn loop for one task run
//!
//! The loop is an explicit state machine. Tool errors never end a run: they
//! are returned to the model as error results. Only a model failure aborts
//! with an error; every other ending is a [`TaskOutcome`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::{Agent, ConversationTurn};
use crate::metrics::{AGENT_TASKS, AGENT_TURNS, MODEL_CALL_DURATION};
use crate::model::{ModelError, ModelOutput, ModelRequest};
use crate::tools::{ToolCallRequest, ToolCallResult, ToolRouter};

/// Answer reported when a run ends without any model text
pub const INCOMPLETE_MESSAGE: &str = "Task incomplete - max turns reached";

/// How a task run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    MaxTurnsReached,
    UnexpectedStop,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Completed => "completed",
            TaskStatus::MaxTurnsReached => "max_turns_reached",
            TaskStatus::UnexpectedStop => "unexpected_stop",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Why the loop left without a final answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    MaxTurnsReached,
    UnexpectedStop,
    Cancelled,
}

impl From<AbortReason> for TaskStatus {
    fn from(reason: AbortReason) -> Self {
        match reason {
            AbortReason::MaxTurnsReached => TaskStatus::MaxTurnsReached,
            AbortReason::UnexpectedStop => TaskStatus::UnexpectedStop,
            AbortReason::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// Result of a task run
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    /// Final answer, or the best partial answer for aborted runs
    pub result: String,
    /// Model calls made
    pub turns: usize,
    /// Individual tool calls dispatched
    pub tool_calls: u64,
    /// Turns to append to the session history
    pub new_turns: Vec<ConversationTurn>,
    pub trace_id: String,
}

/// A run that could not finish
///
/// Turns completed before the failure are carried along: their tool calls
/// already ran and belong in the session history.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("model call failed: {source}")]
    Model {
        #[source]
        source: ModelError,
        new_turns: Vec<ConversationTurn>,
        tool_calls: u64,
    },
}

impl AgentError {
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Model { source, .. } => source.code(),
        }
    }

    /// Take the turns completed before the failure, with their tool call count
    pub fn take_completed(&mut self) -> (Vec<ConversationTurn>, u64) {
        match self {
            AgentError::Model {
                new_turns,
                tool_calls,
                ..
            } => (std::mem::take(new_turns), std::mem::replace(tool_calls, 0)),
        }
    }
}

enum LoopState {
    AwaitingModel,
    ProcessingToolCalls {
        prompt: Option<String>,
        output: ModelOutput,
    },
    Done(String),
    Aborted(AbortReason),
}

/// Drives one task run against a session's history and tool router
pub struct Orchestrator {
    agent: Arc<Agent>,
    router: Arc<ToolRouter>,
}

impl Orchestrator {
    pub fn new(agent: Arc<Agent>, router: Arc<ToolRouter>) -> Self {
        Self { agent, router }
    }

    /// Run the turn loop for a task
    ///
    /// # Arguments
    /// * `task` - The user's task text
    /// * `history` - Prior turns of the session (read-only)
    /// * `next_index` - Index assigned to the first new turn
    /// * `cancel` - Flips to `true` when the run should stop
    ///
    /// # Returns
    /// TaskOutcome with the answer and the new turns, or an error when the
    /// model could not be reached
    pub async fn run(
        &self,
        task: &str,
        history: &[ConversationTurn],
        next_index: usize,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<TaskOutcome, AgentError> {
        let trace_id = Uuid::now_v7().to_string();
        let config = self.agent.config();
        let model = self.agent.model();

        let root_span = info_span!(
            "agent_task",
            trace_id = %trace_id,
            session_id = %self.router.session_id(),
            model = %model.model(),
            otel.name = "agent_task"
        );

        async {
            info!(task_len = task.len(), history = history.len(), "Starting agent task");

            let tools = self.agent.catalog().tool_definitions();
            let mut transcript: Vec<ConversationTurn> = history.to_vec();
            let mut pending_prompt = Some(task.to_string());
            let mut model_calls = 0usize;
            let mut tool_calls = 0u64;
            let mut best_answer = String::new();
            let mut state = LoopState::AwaitingModel;

            let ending = loop {
                state = match state {
                    LoopState::AwaitingModel => {
                        if *cancel.borrow() {
                            LoopState::Aborted(AbortReason::Cancelled)
                        } else if model_calls >= config.max_turns {
                            warn!(turns = model_calls, "Max turns reached");
                            LoopState::Aborted(AbortReason::MaxTurnsReached)
                        } else {
                            model_calls += 1;
                            let request = ModelRequest {
                                system: self.agent.system_prompt(),
                                tools: &tools,
                                history: &transcript,
                                prompt: pending_prompt.as_deref(),
                                max_tokens: config.max_tokens,
                            };

                            let model_span = info_span!(
                                "model_call",
                                turn = model_calls,
                                otel.name = "model_call"
                            );
                            let start = Instant::now();

                            let response = tokio::select! {
                                response = model.complete(request).instrument(model_span) => Some(response),
                                _ = cancelled(&mut cancel) => None,
                            };

                            MODEL_CALL_DURATION
                                .with_label_values(&[model.model()])
                                .observe(start.elapsed().as_secs_f64());

                            let output = match response {
                                None => {
                                    info!(turn = model_calls, "Task cancelled during model call");
                                    state = LoopState::Aborted(AbortReason::Cancelled);
                                    continue;
                                }
                                Some(Ok(output)) => output,
                                Some(Err(e)) => {
                                    warn!(
                                        turn = model_calls,
                                        completed_turns = transcript.len() - history.len(),
                                        error = %e,
                                        "Model call failed"
                                    );
                                    AGENT_TASKS.with_label_values(&["error"]).inc();
                                    return Err(AgentError::Model {
                                        source: e,
                                        new_turns: transcript.split_off(history.len()),
                                        tool_calls,
                                    });
                                }
                            };

                            debug!(
                                turn = model_calls,
                                tool_calls = output.tool_calls.len(),
                                stop_reason = ?output.stop_reason,
                                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                                "Model call completed"
                            );

                            if !output.text.trim().is_empty() {
                                best_answer = output.text.clone();
                            }

                            let prompt = pending_prompt.take();
                            if output.tool_calls.is_empty() {
                                let terminal = output.stop_reason.is_terminal();
                                let text = output.text.clone();
                                transcript.push(ConversationTurn {
                                    index: next_index + transcript.len() - history.len(),
                                    prompt,
                                    model_output: output,
                                    tool_results: Vec::new(),
                                });
                                if terminal {
                                    LoopState::Done(text)
                                } else {
                                    LoopState::Aborted(AbortReason::UnexpectedStop)
                                }
                            } else {
                                LoopState::ProcessingToolCalls { prompt, output }
                            }
                        }
                    }

                    LoopState::ProcessingToolCalls { prompt, mut output } => {
                        let turn_index = next_index + transcript.len() - history.len();
                        assign_unique_call_ids(&mut output.tool_calls, turn_index);

                        let results = tokio::select! {
                            results = self.dispatch_all(&output.tool_calls) => Some(results),
                            _ = cancelled(&mut cancel) => None,
                        };

                        match results {
                            Some(results) => {
                                tool_calls += output.tool_calls.len() as u64;
                                transcript.push(ConversationTurn {
                                    index: turn_index,
                                    prompt,
                                    model_output: output,
                                    tool_results: results,
                                });
                                LoopState::AwaitingModel
                            }
                            None => {
                                info!(
                                    turn = turn_index,
                                    in_flight = output.tool_calls.len(),
                                    "Task cancelled while tools were running; results will be discarded"
                                );
                                LoopState::Aborted(AbortReason::Cancelled)
                            }
                        }
                    }

                    LoopState::Done(text) => break Ok(text),
                    LoopState::Aborted(reason) => break Err(reason),
                };
            };

            let new_turns = transcript.split_off(history.len());
            let (status, result) = match ending {
                Ok(text) => (TaskStatus::Completed, text),
                Err(reason) => {
                    let result = if !best_answer.is_empty() {
                        best_answer
                    } else if reason == AbortReason::Cancelled {
                        "Task cancelled".to_string()
                    } else {
                        INCOMPLETE_MESSAGE.to_string()
                    };
                    (TaskStatus::from(reason), result)
                }
            };

            AGENT_TASKS.with_label_values(&[status.as_str()]).inc();
            AGENT_TURNS.observe(model_calls as f64);
            info!(
                status = status.as_str(),
                turns = model_calls,
                tool_calls,
                "Agent task finished"
            );

            Ok(TaskOutcome {
                status,
                result,
                turns: model_calls,
                tool_calls,
                new_turns,
                trace_id: trace_id.clone(),
            })
        }
        .instrument(root_span)
        .await
    }

    /// Dispatch every request concurrently; results come back in request order
    async fn dispatch_all(&self, requests: &[ToolCallRequest]) -> Vec<ToolCallResult> {
        let handles: Vec<_> = requests
            .iter()
            .cloned()
            .map(|request| {
                let router = self.router.clone();
                tokio::spawn(
                    async move {
                        let result = router.dispatch(&request).await;
                        debug!(call_id = %request.call_id, is_error = result.is_error, "Tool dispatch finished");
                        result
                    }
                    .in_current_span(),
                )
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(requests)
            .map(|(joined, request)| match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(call_id = %request.call_id, error = %e, "Tool dispatch task failed");
                    ToolCallResult::error(&request.call_id, format!("tool dispatch failed: {}", e))
                }
            })
            .collect()
    }
}

/// Make call ids unique within one model response
///
/// Empty ids are synthesized as `call_<turn>_<n>`; repeated ids get a
/// `#<n>` suffix.
pub fn assign_unique_call_ids(calls: &mut [ToolCallRequest], turn_index: usize) {
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (i, call) in calls.iter_mut().enumerate() {
        if call.call_id.is_empty() {
            call.call_id = format!("call_{}_{}", turn_index, i);
        }

        let count = seen.entry(call.call_id.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            let renamed = format!("{}#{}", call.call_id, *count - 1);
            warn!(call_id = %call.call_id, renamed = %renamed, "Duplicate tool call id in model response");
            call.call_id = renamed;
        }
    }
}

/// Resolves once the cancel flag is set; never resolves if the sender is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
