//! Agent module for model-driven tool orchestration
//!
//! This module provides the conversation loop that orchestrates:
//! - The model backend with tool definitions from the catalog
//! - Concurrent tool dispatch through the session's router
//! - Linear history bookkeeping and turn limits
//!
//! # Architecture
//!
//! ```text
//! Task → Orchestrator ──► AwaitingModel ── model.complete(system, tools, history)
//!                              │
//!               ┌──────────────┼──────────────────────┐
//!               ▼              ▼                      ▼
//!         no tools +      no tools +            tool requests
//!         end_turn        other stop                  │
//!               │              │                      ▼
//!               ▼              ▼             ProcessingToolCalls
//!             Done     Aborted(unexpected)   (dispatch concurrently,
//!                                             append turn)
//!                                                     │
//!                                 max_turns? ◄────────┘
//!                                  │      │
//!                       Aborted(max_turns) └──► AwaitingModel
//! ```

pub mod orchestrator;
pub mod prompt;
pub mod runtime;
pub mod turn;

pub use orchestrator::{AbortReason, AgentError, Orchestrator, TaskOutcome, TaskStatus};
pub use prompt::build_system_prompt;
pub use runtime::Agent;
pub use turn::ConversationTurn;
