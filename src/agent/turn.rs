use serde::{Deserialize, Serialize};

use crate::model::ModelOutput;
use crate::tools::ToolCallResult;

/// One model response together with the results of the tools it requested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Position in the session's history; never reused
    pub index: usize,
    /// Task text that opened this turn (first turn of each task run only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub model_output: ModelOutput,
    /// One result per tool request, keyed by `call_id`
    #[serde(default)]
    pub tool_results: Vec<ToolCallResult>,
}

impl ConversationTurn {
    /// Result for a given call id
    pub fn result_for(&self, call_id: &str) -> Option<&ToolCallResult> {
        self.tool_results.iter().find(|r| r.call_id == call_id)
    }
}
