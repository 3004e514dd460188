//! Query dispatch
//!
//! [`Dispatcher::submit_query`] is the single caller-facing entry point: it routes the
//! query, starts a task on the chosen agent and streams the aggregated output back.

use std::{
    collections::VecDeque,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{
    stream::{self, BoxStream},
    Stream, StreamExt,
};

use crate::{
    aggregate::{Coalescer, OutputChunk, ResponseAggregator},
    protocol::{
        error::{A2AError, ErrorKind},
        message::Message,
    },
    registry::AgentCardRegistry,
    router::{ConversationContext, Router},
    task::{CancelHandle, TaskHandle, TaskManager},
    transport::Transport,
};

/// Output of one query, plus the means to cancel it
///
/// The stream is lazy: routing starts on the first poll. Dropping it cancels the
/// query and any task it started.
pub struct ResponseStream {
    cancel: CancelHandle,
    chunks: BoxStream<'static, OutputChunk>,
}

impl ResponseStream {
    /// Cancel the query; the stream then ends with a `Cancelled` failure
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Handle for cancelling the query from elsewhere
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

impl Stream for ResponseStream {
    type Item = OutputChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.chunks.poll_next_unpin(cx)
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Routes queries to agents and relays their responses
pub struct Dispatcher<T: Transport> {
    registry: AgentCardRegistry<T>,
    router: Router<T>,
    tasks: TaskManager<T>,
}

impl<T: Transport> Dispatcher<T> {
    /// Assemble a dispatcher from its parts
    pub fn new(router: Router<T>, tasks: TaskManager<T>) -> Self {
        Self {
            registry: router.registry().clone(),
            router,
            tasks,
        }
    }

    /// The agent card registry
    pub fn registry(&self) -> &AgentCardRegistry<T> {
        &self.registry
    }

    /// The task manager
    pub fn tasks(&self) -> &TaskManager<T> {
        &self.tasks
    }

    /// Submit a query and stream the response
    ///
    /// The first chunk announces the chosen agent. If that agent turns out to be
    /// unreachable when the task is created, its card is invalidated and the next
    /// alternative is tried. Every response ends with one terminal chunk; failures
    /// never affect later queries.
    pub fn submit_query(
        &self,
        text: impl Into<String>,
        context: ConversationContext,
    ) -> ResponseStream {
        let cancel = CancelHandle::new();
        let run = QueryRun {
            registry: self.registry.clone(),
            router: self.router.clone(),
            tasks: self.tasks.clone(),
            cancel: cancel.clone(),
            query: text.into(),
            context,
            coalescer: Coalescer::new(),
            stage: Stage::Route,
        };

        let chunks = stream::unfold(run, |mut run| async move {
            let chunk = run.next_chunk().await?;
            Some((chunk, run))
        })
        .boxed();

        ResponseStream { cancel, chunks }
    }
}

impl<T: Transport> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            router: self.router.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

impl<T: Transport> std::fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("tasks", &self.tasks)
            .finish()
    }
}

enum Stage {
    Route,
    Launch {
        agent_id: String,
        fallbacks: VecDeque<String>,
    },
    Stream {
        chunks: BoxStream<'static, OutputChunk>,
        task: CancelHandle,
        cancel_forwarded: bool,
    },
    Done,
}

/// State of one submitted query
struct QueryRun<T: Transport> {
    registry: AgentCardRegistry<T>,
    router: Router<T>,
    tasks: TaskManager<T>,
    cancel: CancelHandle,
    query: String,
    context: ConversationContext,
    coalescer: Coalescer,
    stage: Stage,
}

impl<T: Transport> QueryRun<T> {
    fn message(query: &str, context: &ConversationContext) -> Message {
        let message = Message::user(query.to_owned()).with_generated_id();
        match &context.context_id {
            Some(context_id) => message.with_context_id(context_id.clone()),
            None => message,
        }
    }

    fn fail(&mut self, error: &A2AError) -> Option<OutputChunk> {
        self.stage = Stage::Done;
        self.coalescer.fail(error.kind(), error.to_string())
    }

    fn cancelled(&mut self) -> Option<OutputChunk> {
        self.fail(&A2AError::Cancelled)
    }

    async fn start(
        registry: &AgentCardRegistry<T>,
        tasks: &TaskManager<T>,
        query: &str,
        context: &ConversationContext,
        agent_id: &str,
    ) -> Result<TaskHandle, A2AError> {
        let base = registry
            .endpoint(agent_id)
            .cloned()
            .ok_or_else(|| A2AError::Config(format!("agent '{}' is not configured", agent_id)))?;
        let card = registry.fetch(agent_id).await?;
        let endpoint = card.task_endpoint(&base);

        tasks.start(agent_id, endpoint, Self::message(query, context)).await
    }

    async fn next_chunk(&mut self) -> Option<OutputChunk> {
        loop {
            match std::mem::replace(&mut self.stage, Stage::Done) {
                Stage::Route => {
                    let routed = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return self.cancelled(),
                        routed = self.router.route(&self.query, &self.context) => routed,
                    };

                    let decision = match routed {
                        Ok(decision) => decision,
                        Err(error) => {
                            tracing::warn!(error = %error, "query could not be routed");
                            return self.fail(&error);
                        }
                    };

                    self.stage = Stage::Launch {
                        agent_id: decision.target_agent_id.clone(),
                        fallbacks: decision.alternatives.into_iter().collect(),
                    };
                    return self
                        .coalescer
                        .routed(decision.target_agent_id, decision.rationale);
                }

                Stage::Launch {
                    agent_id,
                    mut fallbacks,
                } => {
                    let started = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return self.cancelled(),
                        started = Self::start(&self.registry, &self.tasks, &self.query, &self.context, &agent_id) => started,
                    };

                    match started {
                        Ok(handle) => {
                            let task = handle.cancel_handle();
                            let coalescer = std::mem::take(&mut self.coalescer);
                            self.stage = Stage::Stream {
                                chunks: ResponseAggregator::attach_with(handle, coalescer),
                                task,
                                cancel_forwarded: false,
                            };
                        }
                        Err(error) if error.kind() == ErrorKind::Unreachable => {
                            self.registry.invalidate(&agent_id).await;
                            let Some(next) = fallbacks.pop_front() else {
                                return self.fail(&A2AError::NoCapableAgent(format!(
                                    "every candidate agent is unreachable (last: {}: {})",
                                    agent_id, error
                                )));
                            };

                            tracing::warn!(
                                agent_id = %agent_id,
                                fallback = %next,
                                error = %error,
                                "agent unreachable; falling back"
                            );
                            let rationale = format!("fallback after {} was unreachable", agent_id);
                            self.stage = Stage::Launch {
                                agent_id: next.clone(),
                                fallbacks,
                            };
                            return self.coalescer.routed(next, rationale);
                        }
                        Err(error) => return self.fail(&error),
                    }
                }

                Stage::Stream {
                    mut chunks,
                    task,
                    cancel_forwarded,
                } => {
                    let next = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled(), if !cancel_forwarded => {
                            // the task reports its own cancellation as the terminal chunk
                            task.cancel();
                            self.stage = Stage::Stream {
                                chunks,
                                task,
                                cancel_forwarded: true,
                            };
                            continue;
                        }
                        next = chunks.next() => next,
                    };

                    if next.is_some() {
                        self.stage = Stage::Stream {
                            chunks,
                            task,
                            cancel_forwarded,
                        };
                    }
                    return next;
                }

                Stage::Done => return None,
            }
        }
    }
}
