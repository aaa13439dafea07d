pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod escalation;
pub mod feedback;
pub mod render;
pub mod search;
pub mod session;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use api::{AssistantApi, HttpAssistantApi};
pub use config::AssistantConfig;
pub use error::{AssistantError, Result};
pub use escalation::{EscalationPhase, EscalationWorkflow};
pub use feedback::SatisfactionSurvey;
pub use search::SmartSearch;
pub use session::SessionIdentity;
pub use store::ConversationStore;
