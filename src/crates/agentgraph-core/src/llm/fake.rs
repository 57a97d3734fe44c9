//! Deterministic chat models for tests and offline runs

use crate::error::{GraphError, Result};
use crate::llm::config::ChatRequest;
use crate::llm::response::ChatResponse;
use crate::llm::traits::ChatModel;
use crate::messages::Message;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

type Responder = Arc<dyn Fn(&ChatRequest) -> Result<Message> + Send + Sync>;

/// A chat model that answers from a script
///
/// Either replays a fixed queue of messages ([`new`](Self::new)) or asks a
/// closure for every answer ([`from_fn`](Self::from_fn)). Every request is
/// recorded. Clones share the script and the recording.
///
/// ```rust
/// use agentgraph_core::llm::{ChatModel, ScriptedChatModel};
/// use agentgraph_core::Message;
///
/// # tokio_test_block(async {
/// let model = ScriptedChatModel::new([Message::ai("yes")]);
/// let reply = model.invoke(vec![Message::human("relevant?")]).await.unwrap();
/// assert_eq!(reply.content, "yes");
/// assert_eq!(model.calls(), 1);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f);
/// # }
/// ```
#[derive(Clone)]
pub struct ScriptedChatModel {
    responder: Responder,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedChatModel {
    /// Replay `replies` in order; fails once they run out
    pub fn new(replies: impl IntoIterator<Item = Message>) -> Self {
        let queue: Mutex<VecDeque<Message>> = Mutex::new(replies.into_iter().collect());
        Self::from_fn(move |_| {
            queue
                .lock()
                .pop_front()
                .ok_or_else(|| GraphError::Model("scripted model has no replies left".to_string()))
        })
    }

    /// Answer every request with `f`
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&ChatRequest) -> Result<Message> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(f),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of requests answered or attempted
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Copy of every request received
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

impl std::fmt::Debug for ScriptedChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedChatModel")
            .field("calls", &self.calls())
            .finish()
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let reply = (self.responder)(&request);
        self.requests.lock().push(request);
        Ok(ChatResponse::new(reply?))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn clone_box(&self) -> Box<dyn ChatModel> {
        Box::new(self.clone())
    }
}
