//! # agentgraph-cli
//!
//! The `agentgraph` binary and the pieces it is made of, exposed so they
//! can be tested without a terminal:
//!
//! - [`config`]: [`AppConfig`](config::AppConfig), layered from defaults, a
//!   YAML or JSON file and `AGENTGRAPH_*` variables
//! - [`session`]: compiles agents and drives questions through their
//!   interrupts
//! - [`terminal`]: the stdin/stdout [`Human`](session::Human)

pub mod config;
pub mod session;
pub mod terminal;

pub use config::AppConfig;
pub use session::{Agent, AgentKind, Deps, Human, Session};
pub use terminal::Terminal;
