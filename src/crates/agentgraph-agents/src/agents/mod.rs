//! The agents, each a compiled graph built from a chat model and its
//! collaborators
//!
//! | Agent | Builder | Needs |
//! |-------|---------|-------|
//! | ReAct | [`create_react_agent`] | tools |
//! | SQL | [`SqlAgent`] | [`SqlDatabase`](crate::sql::SqlDatabase) |
//! | Simple RAG | [`rag::create_simple_rag`] | [`Retriever`](crate::retrieval::Retriever) |
//! | Corrective RAG | [`rag::CorrectiveRag`] | retriever |
//! | Query-expansion RAG | [`rag::QueryExpansionRag`] | retriever, checkpointer |
//! | Memory HIL RAG | [`rag::MemoryHilRag`] | retriever, checkpointer |
//! | Music store | [`MusicStore`] | database, store, checkpointer |
//! | Email triage | [`EmailAssistant`] | checkpointer |
//! | Deep researcher | [`DeepResearcher`] | [`WebSearch`](crate::search::WebSearch), checkpointer |
//! | Music store swarm | [`swarm::create_music_store_swarm`] | database |
//! | Deep agent | [`DeepAgent`] | web search, checkpointer, store for `/memories/` |
//!
//! Agents that stop for a human need a checkpointer in their compile
//! options; runs are then addressed by thread id.

pub mod deep_agent;
pub mod email;
pub mod music_store;
pub mod rag;
pub mod react;
pub mod researcher;
pub mod sql_agent;
pub mod swarm;

pub use deep_agent::{DeepAgent, DeepAgentState, DeepAgentUpdate, Todo, TodoStatus};
pub use email::{EmailAssistant, EmailInput, EmailState, EmailUpdate, ReviewResponse};
pub use music_store::{MusicStore, MusicStoreState, MusicStoreUpdate};
pub use react::{ask, create_react_agent, ReactAgentConfig, ReactState, ReactUpdate};
pub use researcher::{DeepResearcher, ResearchOptions, ResearchState, ResearchUpdate};
pub use sql_agent::{create_sql_agent, SqlAgent, SqlAgentState, SqlAgentUpdate};
pub use swarm::{
    create_handoff_tool, create_music_store_swarm, create_swarm, SwarmAgent, SwarmOptions, SwarmState, SwarmUpdate,
};

use serde_json::Value;

/// Text of a resume value: strings as is, `null` as empty, anything else as JSON
pub(crate) fn resume_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
