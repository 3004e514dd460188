//! Per-task driver loop

use std::time::Duration;

use futures::{future::BoxFuture, stream::FuturesUnordered, StreamExt};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::Instant,
};

use crate::{
    client::ProtocolClient,
    protocol::{
        error::{A2AError, ErrorKind},
        event::Event,
        message::Message,
        task::{Task, TaskState},
    },
    transport::Transport,
};

/// A follow-up message to deliver to the running task
pub(crate) struct Command {
    pub(crate) message: Message,
    pub(crate) reply: oneshot::Sender<Result<(), A2AError>>,
}

/// Outcome of a follow-up send, handed back to the loop that owns the task record
type Sent = (Message, oneshot::Sender<Result<(), A2AError>>, Result<(), A2AError>);

enum Flow {
    Continue,
    End(Event),
    /// Nobody is listening any more
    Abandoned,
}

/// Owns one task from submission until its terminal event
pub(crate) struct Driver<T: Transport> {
    pub(crate) client: ProtocolClient<T>,
    pub(crate) task: Task,
    pub(crate) deadline: Instant,
    pub(crate) timeout: Duration,
    pub(crate) events: mpsc::Sender<Event>,
    pub(crate) state: watch::Sender<TaskState>,
    pub(crate) cancel: watch::Receiver<bool>,
    pub(crate) commands: mpsc::Receiver<Command>,
}

impl<T: Transport> Driver<T> {
    pub(crate) async fn run(mut self) -> Task {
        let mut stream = self.client.subscribe(&self.task.id);
        let sleep = tokio::time::sleep_until(self.deadline);
        tokio::pin!(sleep);
        // follow-ups retry on their own; the deadline and cancel arms stay live meanwhile
        let mut sends: FuturesUnordered<BoxFuture<'static, Sent>> = FuturesUnordered::new();

        let mut remote_cancel = false;
        let terminal = loop {
            tokio::select! {
                biased;

                changed = self.cancel.changed() => {
                    if changed.is_err() || *self.cancel.borrow() {
                        remote_cancel = true;
                        break self.cancelled();
                    }
                }
                _ = &mut sleep => {
                    remote_cancel = true;
                    break self.timed_out();
                }
                Some(command) = self.commands.recv() => sends.push(self.forward_message(command)),
                Some((message, reply, result)) = sends.next(), if !sends.is_empty() => {
                    if result.is_ok() {
                        self.task.push_message(message);
                    }
                    let _ = reply.send(result);
                }
                next = stream.next() => {
                    let flow = match next {
                        Some(Ok(event)) => self.on_event(event).await,
                        Some(Err(error)) => Flow::End(self.failed(error)),
                        None => Flow::End(self.failed(A2AError::Unreachable(
                            "event stream ended without a terminal event".into(),
                        ))),
                    };
                    match flow {
                        Flow::Continue => {}
                        Flow::End(event) => break event,
                        Flow::Abandoned => {
                            remote_cancel = true;
                            break self.cancelled();
                        }
                    }
                }
            }
        };
        drop(stream);
        // pending replies are dropped, so their senders see the task as gone
        drop(sends);

        tracing::info!(
            task_id = %self.task.id,
            agent_id = %self.task.target_agent_id,
            state = ?self.task.state,
            "task finished"
        );

        if self.events.send(terminal).await.is_err() {
            tracing::debug!(task_id = %self.task.id, "task consumer went away before the end");
        }

        let client = self.client.clone();
        let task_id = self.task.id.clone();
        if remote_cancel {
            tokio::spawn(async move {
                if let Err(error) = client.cancel(&task_id).await {
                    tracing::warn!(task_id = %task_id, error = %error, "remote cancel failed");
                }
                client.forget(&task_id).await;
            });
        } else {
            client.forget(&task_id).await;
        }

        self.task
    }

    fn advance(&mut self, next: TaskState) {
        if let Err(error) = self.task.transition(next) {
            tracing::debug!(task_id = %self.task.id, error = %error, "ignoring state change");
            return;
        }
        self.state.send_replace(self.task.state);
    }

    async fn on_event(&mut self, event: Event) -> Flow {
        if self.task.state == TaskState::Submitted {
            self.advance(TaskState::Streaming);
        }

        let end = match &event {
            Event::TaskStateChanged { state } => {
                if state.is_terminal() || !self.task.state.can_transition_to(*state) {
                    tracing::debug!(
                        task_id = %self.task.id,
                        current = ?self.task.state,
                        reported = ?state,
                        "dropping state change that does not move forward"
                    );
                    return Flow::Continue;
                }
                self.advance(*state);
                false
            }
            Event::MessageComplete { message } => {
                self.task.push_message(message.clone());
                false
            }
            Event::MessageDelta { .. } => false,
            Event::TaskEnded => {
                self.advance(TaskState::Completed);
                true
            }
            Event::TaskFailed { error, detail } => {
                tracing::warn!(task_id = %self.task.id, error = %error, detail = %detail, "agent reported failure");
                self.advance(TaskState::Failed);
                true
            }
        };

        if end {
            return Flow::End(event);
        }

        if self.events.send(event).await.is_err() {
            return Flow::Abandoned;
        }
        Flow::Continue
    }

    fn cancelled(&mut self) -> Event {
        tracing::info!(task_id = %self.task.id, "task cancelled");
        self.advance(TaskState::Cancelled);
        Event::failed(ErrorKind::Cancelled, "task cancelled by caller")
    }

    fn timed_out(&mut self) -> Event {
        tracing::warn!(
            task_id = %self.task.id,
            timeout_ms = self.timeout.as_millis() as u64,
            "task timed out"
        );
        self.advance(TaskState::Failed);
        Event::failed(
            ErrorKind::Timeout,
            format!("no terminal event within {} ms", self.timeout.as_millis()),
        )
    }

    fn failed(&mut self, error: A2AError) -> Event {
        tracing::warn!(task_id = %self.task.id, error = %error, "task failed");
        self.advance(TaskState::Failed);
        Event::failed(error.kind(), error.to_string())
    }

    fn forward_message(&self, command: Command) -> BoxFuture<'static, Sent> {
        let client = self.client.clone();
        let task_id = self.task.id.clone();
        Box::pin(async move {
            let Command { message, reply } = command;
            let result = client.send_message(&task_id, message.clone()).await;
            (message, reply, result)
        })
    }
}
