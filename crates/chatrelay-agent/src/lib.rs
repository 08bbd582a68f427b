pub mod backends;
pub mod config;
pub mod gateway;
pub mod service;
pub mod view;

pub use backends::gateway_for;
pub use backends::openai::OpenAiGateway;
pub use config::{LlmProvider, ModelConfig, ServiceConfig, API_KEY_ENV, MAX_EXPIRY_HOURS};
pub use gateway::CompletionGateway;
pub use service::{ChatService, CAUSE_TIMEOUT};
pub use view::{ExchangeView, PendingPrompt, SessionView};
