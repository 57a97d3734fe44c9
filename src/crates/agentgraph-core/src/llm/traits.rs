//! The chat model trait

use crate::error::Result;
use crate::llm::config::ChatRequest;
use crate::llm::response::{ChatChunk, ChatResponse};
use crate::messages::Message;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Incremental answer of [`ChatModel::stream`]
pub type ChatStream = BoxStream<'static, Result<ChatChunk>>;

/// A chat completion provider
///
/// Nodes receive models as `Arc<dyn ChatModel>` built once at startup and
/// passed into the graph constructors. Provider clients live in the `llm`
/// crate; tests use [`ScriptedChatModel`](super::fake::ScriptedChatModel).
///
/// # Errors
///
/// Transport, authentication and rate-limit failures are returned as
/// [`GraphError::Model`](crate::GraphError::Model). Implementations retry
/// transient failures themselves before giving up.
///
/// ```rust,ignore
/// let reply = model
///     .chat(ChatRequest::new(vec![Message::human("What is 2 + 2?")]))
///     .await?;
/// println!("{}", reply.text());
/// ```
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Produce one complete assistant message
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Stream the answer
    ///
    /// The default yields the result of [`chat`](Self::chat) as a single
    /// chunk.
    async fn stream(&self, request: ChatRequest) -> Result<ChatStream> {
        let response = self.chat(request).await?;
        let chunk = ChatChunk {
            delta: response.message.content,
            tool_calls: response.message.tool_calls,
            usage: response.usage,
        };
        Ok(Box::pin(futures::stream::once(async move { Ok(chunk) })))
    }

    /// Shorthand for a request with default options, returning the message
    async fn invoke(&self, messages: Vec<Message>) -> Result<Message> {
        Ok(self.chat(ChatRequest::new(messages)).await?.message)
    }

    /// Model identifier, for logs
    fn model_name(&self) -> &str {
        "unknown"
    }

    fn clone_box(&self) -> Box<dyn ChatModel>;
}

impl Clone for Box<dyn ChatModel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::fake::ScriptedChatModel;
    use futures::StreamExt;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_default_stream_is_single_chunk() {
        let model: Arc<dyn ChatModel> = Arc::new(ScriptedChatModel::new([Message::ai("Hello!")]));
        let chunks: Vec<_> = model
            .stream(ChatRequest::new(vec![Message::human("Hi")]))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().delta, "Hello!");
    }

    #[tokio::test]
    async fn test_boxed_clone_shares_script() {
        let model: Box<dyn ChatModel> = Box::new(ScriptedChatModel::new([
            Message::ai("one"),
            Message::ai("two"),
        ]));
        let copy = model.clone();
        assert_eq!(model.invoke(vec![]).await.unwrap().content, "one");
        assert_eq!(copy.invoke(vec![]).await.unwrap().content, "two");
    }
}
