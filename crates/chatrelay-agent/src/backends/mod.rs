pub mod openai;

use crate::config::ModelConfig;
use crate::gateway::CompletionGateway;
use std::sync::Arc;

/// Builds the gateway for the configured provider.
///
/// Every supported provider speaks the OpenAI chat completions API; they
/// differ only in base URL and extra headers.
pub fn gateway_for(config: ModelConfig) -> Arc<dyn CompletionGateway> {
    Arc::new(openai::OpenAiGateway::new(config))
}
