use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::GatewayError;
use crate::messages::ChatTurn;
use crate::stream::StreamEvent;

pub type ProviderStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// One streaming chat-completion call.
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub messages: Vec<ChatTurn>,
}

/// Trait implemented by each language-model provider.
///
/// Dropping the returned stream must abort the upstream call; the pipeline
/// relies on that to stop paying for output nobody will read.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn stream(&self, request: &CompletionRequest) -> Result<ProviderStream, GatewayError>;
}
