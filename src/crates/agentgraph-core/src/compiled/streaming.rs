//! Streaming runs

use super::CompiledGraph;
use crate::error::Result;
use crate::interrupt::Command;
use crate::runtime::RunConfig;
use crate::state::GraphState;
use crate::stream::{StreamEvent, StreamMode};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Events of a running graph; ends after `Done`, the last `Interrupt`, or
/// an `Err`
pub type EventStream<S> = Pin<Box<dyn Stream<Item = Result<StreamEvent<S>>> + Send>>;

impl<S: GraphState> CompiledGraph<S> {
    /// Run in the background and stream every event
    ///
    /// The run continues when the stream is dropped; only event delivery
    /// stops.
    pub fn stream(&self, input: S::Update, config: RunConfig) -> EventStream<S> {
        let (tx, rx) = mpsc::unbounded_channel();
        let graph = self.clone();
        tokio::spawn(async move {
            if let Err(err) = graph.execute_run(input, &config, Some(tx.clone())).await {
                tracing::error!(graph = %graph.name, error = %err, "streamed run failed");
                let _ = tx.send(Err(err));
            }
        });
        Box::pin(UnboundedReceiverStream::new(rx))
    }

    /// [`stream`](Self::stream) restricted to the given modes
    pub fn stream_modes(&self, input: S::Update, config: RunConfig, modes: &[StreamMode]) -> EventStream<S> {
        let modes = modes.to_vec();
        Box::pin(self.stream(input, config).filter(move |event| {
            let keep = match event {
                Ok(event) => event.is_selected(&modes),
                Err(_) => true,
            };
            futures::future::ready(keep)
        }))
    }

    /// Resume a suspended run and stream its events
    pub fn stream_resume(&self, config: RunConfig, command: Command<S::Update>) -> EventStream<S> {
        let (tx, rx) = mpsc::unbounded_channel();
        let graph = self.clone();
        tokio::spawn(async move {
            if let Err(err) = graph.execute_resume(&config, command, Some(tx.clone())).await {
                tracing::error!(graph = %graph.name, error = %err, "streamed resume failed");
                let _ = tx.send(Err(err));
            }
        });
        Box::pin(UnboundedReceiverStream::new(rx))
    }
}
