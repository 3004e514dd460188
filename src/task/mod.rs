//! Task lifecycle management
//!
//! [`TaskManager::start`] creates a task on the chosen agent and hands it to a driver
//! running on its own tokio task. The driver subscribes to the task's events, applies
//! them to the local state machine and forwards them over a channel; the caller keeps
//! a [`TaskHandle`] for receiving events, sending follow-ups and cancelling.
//!
//! Every task ends with exactly one terminal event: [`Event::TaskEnded`] or
//! [`Event::TaskFailed`] with the kind that stopped it.

mod driver;

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, oneshot, watch, Mutex},
    task::JoinHandle,
    time::Instant,
};
use url::Url;

use crate::{
    client::ProtocolClient,
    protocol::{
        error::A2AError,
        event::Event,
        message::Message,
        task::{Task, TaskState},
    },
    transport::Transport,
};

use driver::{Command, Driver};

const EVENT_BUFFER: usize = 64;
const COMMAND_BUFFER: usize = 8;

/// Requests cancellation of a task
///
/// Clones share the same flag. Cancelling more than once has no further effect.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// A fresh, not yet cancelled handle
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    fn receiver(&self) -> watch::Receiver<bool> {
        self.flag.subscribe()
    }

    /// Ask the task to stop
    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolve once cancellation was requested
    pub async fn cancelled(&self) {
        let mut flag = self.receiver();
        // the sender lives in `self`, so waiting cannot fail
        let _ = flag.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

struct ActiveTask {
    cancel: CancelHandle,
    commands: mpsc::Sender<Command>,
}

/// Caller's side of a running task
///
/// Dropping the handle cancels the task if it has not finished yet.
pub struct TaskHandle {
    task_id: String,
    agent_id: String,
    events: mpsc::Receiver<Event>,
    state: watch::Receiver<TaskState>,
    cancel: CancelHandle,
    commands: mpsc::Sender<Command>,
    join: Option<JoinHandle<Task>>,
}

impl TaskHandle {
    /// Id the agent assigned to the task
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Agent serving the task
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Handle for cancelling the task from elsewhere
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancel the task; repeated calls are no-ops
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next event, or `None` once the terminal event was received
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Send a follow-up message to the task
    ///
    /// # Errors
    ///
    /// [`A2AError::TaskNotFound`] once the task has finished, otherwise whatever the
    /// agent answered.
    pub async fn send_message(&self, message: Message) -> Result<(), A2AError> {
        send_command(&self.commands, &self.task_id, message).await
    }

    /// Wait until the task finished and return its final record
    ///
    /// Events not received yet are discarded.
    pub async fn join(mut self) -> Result<Task, A2AError> {
        while self.events.recv().await.is_some() {}
        let join = self.join.take().ok_or_else(|| A2AError::TaskNotFound {
            task_id: self.task_id.clone(),
        })?;
        join.await
            .map_err(|e| A2AError::Protocol(format!("task driver stopped: {}", e)))
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task_id)
            .field("agent_id", &self.agent_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn send_command(
    commands: &mpsc::Sender<Command>,
    task_id: &str,
    message: Message,
) -> Result<(), A2AError> {
    let not_found = || A2AError::TaskNotFound {
        task_id: task_id.to_string(),
    };
    let (reply, answer) = oneshot::channel();
    commands
        .send(Command { message, reply })
        .await
        .map_err(|_| not_found())?;
    answer.await.map_err(|_| not_found())?
}

/// Starts tasks and tracks the ones still running
pub struct TaskManager<T: Transport> {
    client: ProtocolClient<T>,
    timeout: Duration,
    active: Arc<Mutex<HashMap<String, ActiveTask>>>,
}

impl<T: Transport> TaskManager<T> {
    /// Create a manager whose tasks must finish within `timeout`
    pub fn new(client: ProtocolClient<T>, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Task timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create a task on an agent and start driving it
    ///
    /// The timeout is measured from this call, so task creation counts against it.
    ///
    /// # Errors
    ///
    /// Whatever task creation failed with, or [`A2AError::Timeout`] if creation alone
    /// used up the budget.
    pub async fn start(
        &self,
        agent_id: &str,
        endpoint: &Url,
        message: Message,
    ) -> Result<TaskHandle, A2AError> {
        let deadline = Instant::now() + self.timeout;
        let mut task = Task::new(agent_id, message.clone());

        let created = tokio::time::timeout_at(
            deadline,
            self.client.create_task(agent_id, endpoint, message),
        )
        .await;
        let task_id = match created {
            Ok(result) => result?,
            Err(_) => return Err(A2AError::Timeout(self.timeout)),
        };
        task.submitted(task_id.clone())?;

        tracing::info!(task_id = %task_id, agent_id, "task submitted");

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(task.state);
        let cancel = CancelHandle::new();
        let cancel_rx = cancel.receiver();

        self.active.lock().await.insert(
            task_id.clone(),
            ActiveTask {
                cancel: cancel.clone(),
                commands: commands_tx.clone(),
            },
        );

        let driver = Driver {
            client: self.client.clone(),
            task,
            deadline,
            timeout: self.timeout,
            events: events_tx,
            state: state_tx,
            cancel: cancel_rx,
            commands: commands_rx,
        };

        let active = self.active.clone();
        let id = task_id.clone();
        let join = tokio::spawn(async move {
            let task = driver.run().await;
            active.lock().await.remove(&id);
            task
        });

        Ok(TaskHandle {
            task_id,
            agent_id: agent_id.to_string(),
            events: events_rx,
            state: state_rx,
            cancel,
            commands: commands_tx,
            join: Some(join),
        })
    }

    /// Cancel a running task; cancelling twice is fine
    ///
    /// # Errors
    ///
    /// [`A2AError::TaskNotFound`] if no task with this id is running
    pub async fn cancel(&self, task_id: &str) -> Result<(), A2AError> {
        let active = self.active.lock().await;
        let entry = active.get(task_id).ok_or_else(|| A2AError::TaskNotFound {
            task_id: task_id.to_string(),
        })?;
        entry.cancel.cancel();
        Ok(())
    }

    /// Send a follow-up message to a running task
    pub async fn send_message(&self, task_id: &str, message: Message) -> Result<(), A2AError> {
        let commands = self
            .active
            .lock()
            .await
            .get(task_id)
            .map(|entry| entry.commands.clone())
            .ok_or_else(|| A2AError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        send_command(&commands, task_id, message).await
    }

    /// Ids of tasks that have not finished yet
    pub async fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl<T: Transport> Clone for TaskManager<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            timeout: self.timeout,
            active: self.active.clone(),
        }
    }
}

impl<T: Transport> std::fmt::Debug for TaskManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::json;

    use super::*;
    use crate::{
        protocol::{error::ErrorKind, event::EventFrame, message::MessagePart},
        transport::{
            mock::{json_response, ndjson_stream, ndjson_then_hang, MockTransport},
            BackoffPolicy,
        },
    };

    fn endpoint() -> Url {
        Url::parse("http://sql.local").unwrap()
    }

    fn transport() -> MockTransport {
        MockTransport::new(|req| {
            if req.path() == "/tasks" {
                Ok(json_response(201, json!({"taskId": "t-1"})))
            } else {
                Ok(json_response(200, json!({})))
            }
        })
    }

    fn manager(transport: MockTransport, timeout: Duration) -> TaskManager<MockTransport> {
        let client = ProtocolClient::new(transport, HashMap::new(), BackoffPolicy::none());
        TaskManager::new(client, timeout)
    }

    fn delta(seq: u64, text: &str) -> EventFrame {
        EventFrame::sequenced(
            seq,
            Event::MessageDelta {
                message_id: None,
                part: MessagePart::text(text),
            },
        )
    }

    async fn drain(handle: &mut TaskHandle) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = handle.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_task_completes() {
        let transport = transport().with_stream(|_| {
            Ok(ndjson_stream(vec![
                delta(1, "SELECT"),
                EventFrame::sequenced(
                    2,
                    Event::MessageComplete {
                        message: Message::agent("SELECT 1"),
                    },
                ),
                EventFrame::sequenced(3, Event::TaskEnded),
            ]))
        });
        let manager = manager(transport, Duration::from_secs(5));

        let mut handle = manager
            .start("sql-agent", &endpoint(), Message::user("q"))
            .await
            .unwrap();
        assert_eq!(handle.task_id(), "t-1");

        let events = drain(&mut handle).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events.last(), Some(&Event::TaskEnded));

        let task = handle.join().await.unwrap();
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.messages.len(), 2);
        assert!(manager.active().await.is_empty());
    }

    #[tokio::test]
    async fn test_server_state_changes_only_move_forward() {
        let transport = transport().with_stream(|_| {
            Ok(ndjson_stream(vec![
                EventFrame::new(Event::TaskStateChanged {
                    state: TaskState::Submitted,
                }),
                EventFrame::new(Event::TaskStateChanged {
                    state: TaskState::Completed,
                }),
                EventFrame::new(Event::failed(ErrorKind::Rejected, "quota exceeded")),
            ]))
        });
        let manager = manager(transport, Duration::from_secs(5));
        let mut handle = manager
            .start("sql-agent", &endpoint(), Message::user("q"))
            .await
            .unwrap();

        let events = drain(&mut handle).await;
        assert_eq!(events, vec![Event::failed(ErrorKind::Rejected, "quota exceeded")]);
        assert_eq!(handle.state(), TaskState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_terminal() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let seen = cancelled.clone();
        let transport = MockTransport::new(move |req| {
            if req.path().ends_with("/cancel") {
                seen.store(true, Ordering::SeqCst);
            }
            if req.path() == "/tasks" {
                Ok(json_response(201, json!({"taskId": "t-1"})))
            } else {
                Ok(json_response(200, json!({})))
            }
        })
        .with_stream(|_| Ok(ndjson_then_hang(vec![delta(1, "thinking")])));
        let manager = manager(transport, Duration::from_millis(200));

        let mut handle = manager
            .start("sql-agent", &endpoint(), Message::user("q"))
            .await
            .unwrap();
        let events = drain(&mut handle).await;

        assert_eq!(events.len(), 2);
        match &events[1] {
            Event::TaskFailed { error, .. } => assert_eq!(*error, ErrorKind::Timeout),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(handle.state(), TaskState::Failed);

        handle.join().await.unwrap();
        for _ in 0..20 {
            if cancelled.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_twice_yields_one_terminal_event() {
        let transport = transport().with_stream(|_| Ok(ndjson_then_hang(vec![delta(1, "SEL")])));
        let manager = manager(transport, Duration::from_secs(30));
        let mut handle = manager
            .start("sql-agent", &endpoint(), Message::user("q"))
            .await
            .unwrap();

        assert!(matches!(handle.recv().await, Some(Event::MessageDelta { .. })));
        handle.cancel();
        manager.cancel("t-1").await.unwrap();
        handle.cancel();

        let events = drain(&mut handle).await;
        assert_eq!(events, vec![Event::failed(ErrorKind::Cancelled, "task cancelled by caller")]);
        assert_eq!(handle.state(), TaskState::Cancelled);

        let task = handle.join().await.unwrap();
        assert!(task.cancel_requested);
        assert_eq!(
            manager.cancel("t-1").await.unwrap_err().kind(),
            ErrorKind::TaskNotFound
        );
    }

    #[tokio::test]
    async fn test_follow_up_messages_are_logged() {
        let transport = transport().with_stream(|_| Ok(ndjson_then_hang(vec![])));
        let manager = manager(transport.clone(), Duration::from_secs(30));
        let handle = manager
            .start("sql-agent", &endpoint(), Message::user("q"))
            .await
            .unwrap();

        handle.send_message(Message::user("only 2024")).await.unwrap();
        manager
            .send_message("t-1", Message::user("group by month"))
            .await
            .unwrap();
        assert!(transport
            .calls()
            .contains(&"POST /tasks/t-1/messages".to_string()));

        handle.cancel();
        let task = handle.join().await.unwrap();
        assert_eq!(task.messages.len(), 3);
        assert_eq!(task.state, TaskState::Cancelled);
    }

    fn refusing_messages() -> MockTransport {
        MockTransport::new(|req| {
            if req.path() == "/tasks" {
                Ok(json_response(201, json!({"taskId": "t-1"})))
            } else if req.path().ends_with("/messages") {
                Err(A2AError::Transport("connection refused".into()))
            } else {
                Ok(json_response(200, json!({})))
            }
        })
        .with_stream(|_| Ok(ndjson_then_hang(vec![])))
    }

    fn retrying_manager(transport: MockTransport, timeout: Duration) -> TaskManager<MockTransport> {
        let client = ProtocolClient::new(transport, HashMap::new(), BackoffPolicy::default());
        TaskManager::new(client, timeout)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_follow_up_does_not_hold_back_the_timeout() {
        let manager = retrying_manager(refusing_messages(), Duration::from_secs(1));
        let started = Instant::now();
        let mut handle = manager
            .start("sql-agent", &endpoint(), Message::user("q"))
            .await
            .unwrap();

        let sender = manager.clone();
        let follow_up = tokio::spawn(async move {
            sender.send_message("t-1", Message::user("only 2024")).await
        });

        let events = drain(&mut handle).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        match events.last() {
            Some(Event::TaskFailed { error, .. }) => assert_eq!(*error, ErrorKind::Timeout),
            other => panic!("unexpected terminal {:?}", other),
        }

        let sent = follow_up.await.unwrap();
        assert_eq!(sent.unwrap_err().kind(), ErrorKind::TaskNotFound);
        let task = handle.join().await.unwrap();
        assert_eq!(task.messages.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_retrying_follow_up_is_prompt() {
        let transport = refusing_messages();
        let manager = retrying_manager(transport.clone(), Duration::from_secs(60));
        let mut handle = manager
            .start("sql-agent", &endpoint(), Message::user("q"))
            .await
            .unwrap();

        let sender = manager.clone();
        let follow_up = tokio::spawn(async move {
            sender.send_message("t-1", Message::user("only 2024")).await
        });
        while !transport
            .calls()
            .contains(&"POST /tasks/t-1/messages".to_string())
        {
            tokio::task::yield_now().await;
        }

        let cancelled_at = Instant::now();
        handle.cancel();
        let events = drain(&mut handle).await;
        assert!(cancelled_at.elapsed() < Duration::from_millis(500));
        assert_eq!(events, vec![Event::failed(ErrorKind::Cancelled, "task cancelled by caller")]);
        assert!(follow_up.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_creation_failure_is_returned() {
        let transport = MockTransport::new(|_| Ok(json_response(400, json!({"error": "bad"}))));
        let manager = manager(transport, Duration::from_secs(5));

        let err = manager
            .start("sql-agent", &endpoint(), Message::user("q"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rejected);
        assert!(manager.active().await.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_the_handle_cancels() {
        let transport = transport().with_stream(|_| Ok(ndjson_then_hang(vec![])));
        let manager = manager(transport.clone(), Duration::from_secs(30));
        let handle = manager
            .start("sql-agent", &endpoint(), Message::user("q"))
            .await
            .unwrap();
        drop(handle);

        for _ in 0..50 {
            if manager.active().await.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(manager.active().await.is_empty());
    }
}
