//! Caller-facing response assembly
//!
//! Turns a task's events into the ordered [`OutputChunk`] sequence callers consume.
//! Every sequence ends with exactly one terminal chunk, [`ChunkBody::Done`] or
//! [`ChunkBody::Failed`], and nothing follows it.

use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;

use crate::{
    protocol::{
        error::ErrorKind,
        event::Event,
        message::{Message, MessagePart, Role},
    },
    task::TaskHandle,
};

/// One piece of output
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputChunk {
    /// Position in the response, starting at zero; callers resume after the last one seen
    pub index: u64,

    /// Task that produced the chunk, once there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// What the chunk carries
    #[serde(flatten)]
    pub body: ChunkBody,
}

impl OutputChunk {
    /// Whether nothing follows this chunk
    pub fn is_terminal(&self) -> bool {
        self.body.is_terminal()
    }
}

/// Payload of an [`OutputChunk`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChunkBody {
    /// The query was routed to an agent
    #[serde(rename_all = "camelCase")]
    Routed {
        /// Chosen agent
        agent_id: String,

        /// Why it was chosen
        rationale: String,
    },

    /// Partial content of the message being produced
    #[serde(rename_all = "camelCase")]
    Delta {
        /// Message the fragment belongs to
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,

        /// The fragment as received
        part: MessagePart,

        /// The part with every fragment so far folded in
        accumulated: MessagePart,
    },

    /// A complete message
    Message {
        /// The message
        message: Message,
    },

    /// The task finished
    Done {
        /// Last complete message, or whatever was streamed if none completed
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<Message>,
    },

    /// The task or the query failed
    Failed {
        /// Failure classification
        kind: ErrorKind,

        /// Human-readable detail
        detail: String,
    },
}

impl ChunkBody {
    /// Whether this body ends a response
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkBody::Done { .. } | ChunkBody::Failed { .. })
    }
}

#[derive(Debug, Default)]
struct InProgress {
    message_id: Option<String>,
    parts: Vec<MessagePart>,
}

impl InProgress {
    fn into_message(self) -> Option<Message> {
        if self.parts.is_empty() {
            return None;
        }
        let mut message = Message::from_parts(Role::Agent, self.parts);
        message.message_id = self.message_id;
        Some(message)
    }
}

/// Event-to-chunk state machine
///
/// Pure and synchronous; [`ResponseAggregator`] drives it from a task's channel.
#[derive(Debug, Default)]
pub struct Coalescer {
    next_index: u64,
    task_id: Option<String>,
    in_progress: Option<InProgress>,
    last_complete: Option<Message>,
    finished: bool,
}

impl Coalescer {
    /// Start at index zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue numbering after chunks that were already emitted
    pub fn starting_at(index: u64) -> Self {
        Self {
            next_index: index,
            ..Self::default()
        }
    }

    /// Label later chunks with a task id
    pub fn set_task_id(&mut self, task_id: impl Into<String>) {
        self.task_id = Some(task_id.into());
    }

    /// Index the next chunk will get
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Whether the terminal chunk was emitted
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn emit(&mut self, body: ChunkBody) -> Option<OutputChunk> {
        if self.finished {
            return None;
        }
        self.finished = body.is_terminal();
        let chunk = OutputChunk {
            index: self.next_index,
            task_id: self.task_id.clone(),
            body,
        };
        self.next_index += 1;
        Some(chunk)
    }

    /// Announce the agent a query was routed to
    pub fn routed(
        &mut self,
        agent_id: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Option<OutputChunk> {
        self.emit(ChunkBody::Routed {
            agent_id: agent_id.into(),
            rationale: rationale.into(),
        })
    }

    /// End the response with a failure
    pub fn fail(&mut self, kind: ErrorKind, detail: impl Into<String>) -> Option<OutputChunk> {
        self.emit(ChunkBody::Failed {
            kind,
            detail: detail.into(),
        })
    }

    /// The event source closed; fail unless a terminal chunk was already emitted
    pub fn close(&mut self) -> Option<OutputChunk> {
        self.fail(
            ErrorKind::Unreachable,
            "event stream closed without a terminal event",
        )
    }

    /// Feed one event; returns the chunk it produces, if any
    pub fn push(&mut self, event: Event) -> Option<OutputChunk> {
        if self.finished {
            return None;
        }

        match event {
            Event::MessageDelta { message_id, part } => {
                let accumulated = self.accumulate(message_id.clone(), part.clone());
                self.emit(ChunkBody::Delta {
                    message_id,
                    part,
                    accumulated,
                })
            }
            Event::MessageComplete { message } => {
                self.in_progress = None;
                self.last_complete = Some(message.clone());
                self.emit(ChunkBody::Message { message })
            }
            Event::TaskStateChanged { .. } => None,
            Event::TaskEnded => {
                let streamed = self.in_progress.take().and_then(InProgress::into_message);
                // anything still buffered started after the last complete message
                let message = streamed.or_else(|| self.last_complete.take());
                self.emit(ChunkBody::Done { message })
            }
            Event::TaskFailed { error, detail } => self.fail(error, detail),
        }
    }

    fn accumulate(&mut self, message_id: Option<String>, delta: MessagePart) -> MessagePart {
        let switched = match (&self.in_progress, &message_id) {
            (Some(current), Some(id)) => current.message_id.as_deref().is_some_and(|c| c != id),
            _ => false,
        };
        if switched {
            self.in_progress = None;
        }

        let buffer = self.in_progress.get_or_insert_with(InProgress::default);
        if buffer.message_id.is_none() {
            buffer.message_id = message_id;
        }

        match buffer.parts.last_mut() {
            Some(last) => {
                if let Err(delta) = last.merge(delta) {
                    buffer.parts.push(delta);
                }
            }
            None => buffer.parts.push(delta),
        }

        buffer
            .parts
            .last()
            .cloned()
            .unwrap_or_else(|| MessagePart::text(""))
    }
}

/// Attaches to a running task and yields its output
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseAggregator;

impl ResponseAggregator {
    /// Stream a task's output, numbering chunks from zero
    pub fn attach(handle: TaskHandle) -> BoxStream<'static, OutputChunk> {
        Self::attach_with(handle, Coalescer::new())
    }

    /// Stream a task's output through an existing coalescer
    ///
    /// Dropping the stream drops the handle, which cancels the task.
    pub fn attach_with(handle: TaskHandle, mut coalescer: Coalescer) -> BoxStream<'static, OutputChunk> {
        coalescer.set_task_id(handle.task_id());

        stream::unfold((handle, coalescer), |(mut handle, mut coalescer)| async move {
            loop {
                if coalescer.is_finished() {
                    return None;
                }
                let chunk = match handle.recv().await {
                    Some(event) => coalescer.push(event),
                    None => coalescer.close(),
                };
                if let Some(chunk) = chunk {
                    return Some((chunk, (handle, coalescer)));
                }
            }
        })
        .boxed()
    }
}
