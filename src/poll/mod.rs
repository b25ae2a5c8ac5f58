//! Poll decision for a phase against a fabric snapshot: pluggable between a
//! declarative contract check and an LLM judgment. The scheduler treats
//! every implementation identically.

mod contract;
mod llm;
mod types;

pub use contract::{ContractPoller, PhaseRequirement};
pub use llm::{LlmPoller, PromptRunner};
pub use types::{PollResult, Poller};
