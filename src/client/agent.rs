//! Protocol client for remote A2A agents

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::RwLock;
use tower::{ServiceBuilder, ServiceExt};
use url::Url;

use crate::{
    codec::{EventStreamCodec, Framing, JsonCodec},
    layer::{A2AValidationLayer, A2AValidationService, AuthCredentials, AuthLayer, AuthService},
    protocol::{
        agent::AgentCard,
        error::A2AError,
        event::{Event, EventFrame},
        message::Message,
        operation::A2AOperation,
        task::{TaskState, TaskStatus},
    },
    service::{A2AProtocolService, A2ARequest, A2AResponse, RequestContext},
    transport::{backoff::retry_transient, BackoffPolicy, Transport},
};

/// The request pipeline every call goes through
pub type ServiceStack<T> = AuthService<A2AValidationService<A2AProtocolService<T>>>;

/// Where a task lives
#[derive(Debug, Clone)]
struct TaskRoute {
    agent_id: String,
    endpoint: Url,
}

/// Typed client for the task protocol
///
/// Each call is a [`A2ARequest`] sent through the Tower pipeline. The client remembers
/// which agent created each task so later calls only need the task id; ids it has
/// never seen fail locally with [`A2AError::TaskNotFound`].
///
/// Cloning is cheap and clones share the task table.
///
/// # Example
///
/// ```rust,no_run
/// use a2a_dispatch::prelude::*;
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), A2AError> {
/// let base: url::Url = "http://localhost:10002".parse().unwrap();
/// let client = ProtocolClient::new(HttpTransport::new(), Default::default(), BackoffPolicy::default());
///
/// let card = client.discover("sql-agent", &base).await?;
/// let task_id = client
///     .create_task("sql-agent", card.task_endpoint(&base), Message::user("total sales?"))
///     .await?;
///
/// let mut events = client.subscribe(&task_id);
/// while let Some(event) = events.next().await {
///     println!("{:?}", event?);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ProtocolClient<T: Transport> {
    service: ServiceStack<T>,
    events: EventStreamCodec,
    backoff: BackoffPolicy,
    routes: Arc<RwLock<HashMap<String, TaskRoute>>>,
}

impl<T: Transport> ProtocolClient<T> {
    /// Create a client over a transport
    ///
    /// # Arguments
    ///
    /// * `transport` - Byte-level transport
    /// * `credentials` - Credentials keyed by logical agent name
    /// * `backoff` - Retry policy for transient failures
    pub fn new(
        transport: T,
        credentials: HashMap<String, AuthCredentials>,
        backoff: BackoffPolicy,
    ) -> Self {
        let service = ServiceBuilder::new()
            .layer(AuthLayer::new(credentials))
            .layer(A2AValidationLayer::new())
            .service(A2AProtocolService::new(transport, Arc::new(JsonCodec::new())));

        Self {
            service,
            events: EventStreamCodec::new(),
            backoff,
            routes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Retry policy in use
    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    async fn call(
        &self,
        operation: A2AOperation,
        agent_id: &str,
        endpoint: &Url,
    ) -> Result<A2AResponse, A2AError> {
        let request = A2ARequest::new(operation, RequestContext::new(agent_id, endpoint.clone()));
        self.service.clone().oneshot(request).await
    }

    async fn route(&self, task_id: &str) -> Result<TaskRoute, A2AError> {
        self.routes
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| A2AError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Fetch an agent card from `base/.well-known/agent-card`
    ///
    /// # Errors
    ///
    /// [`A2AError::InvalidCard`] for non-2xx or malformed cards, [`A2AError::Unreachable`]
    /// once connection failures exhaust the retry budget.
    pub async fn discover(&self, agent_id: &str, base: &Url) -> Result<AgentCard, A2AError> {
        let response = retry_transient(&self.backoff, "discover", || {
            self.call(A2AOperation::DiscoverAgent, agent_id, base)
        })
        .await?;

        response
            .into_agent_card()
            .ok_or_else(|| A2AError::Protocol("Expected agent card from discovery".into()))
    }

    /// Create a task on an agent and return the id the agent assigned
    ///
    /// # Arguments
    ///
    /// * `agent_id` - Logical agent name (selects credentials)
    /// * `endpoint` - Task endpoint of the agent
    /// * `initial_message` - First message of the task
    pub async fn create_task(
        &self,
        agent_id: &str,
        endpoint: &Url,
        initial_message: Message,
    ) -> Result<String, A2AError> {
        let response = retry_transient(&self.backoff, "create_task", || {
            self.call(
                A2AOperation::CreateTask {
                    initial_message: initial_message.clone(),
                },
                agent_id,
                endpoint,
            )
        })
        .await?;

        let task_id = response
            .into_task_id()
            .ok_or_else(|| A2AError::Protocol("Expected task id from task creation".into()))?;

        self.routes.write().await.insert(
            task_id.clone(),
            TaskRoute {
                agent_id: agent_id.to_string(),
                endpoint: endpoint.clone(),
            },
        );
        tracing::debug!(task_id = %task_id, agent_id, "task created");

        Ok(task_id)
    }

    /// Send a follow-up message to a task
    pub async fn send_message(&self, task_id: &str, message: Message) -> Result<(), A2AError> {
        let route = self.route(task_id).await?;
        retry_transient(&self.backoff, "send_message", || {
            self.call(
                A2AOperation::SendMessage {
                    task_id: task_id.to_string(),
                    message: message.clone(),
                },
                &route.agent_id,
                &route.endpoint,
            )
        })
        .await?;
        Ok(())
    }

    /// Read a task's status from its agent
    pub async fn get_task(&self, task_id: &str) -> Result<TaskStatus, A2AError> {
        let route = self.route(task_id).await?;
        let response = retry_transient(&self.backoff, "get_task", || {
            self.call(
                A2AOperation::GetTask {
                    task_id: task_id.to_string(),
                },
                &route.agent_id,
                &route.endpoint,
            )
        })
        .await?;

        response
            .into_task_status()
            .ok_or_else(|| A2AError::Protocol("Expected task status from get_task".into()))
    }

    /// Ask the agent to cancel a task
    pub async fn cancel(&self, task_id: &str) -> Result<(), A2AError> {
        let route = self.route(task_id).await?;
        retry_transient(&self.backoff, "cancel", || {
            self.call(
                A2AOperation::CancelTask {
                    task_id: task_id.to_string(),
                },
                &route.agent_id,
                &route.endpoint,
            )
        })
        .await?;
        Ok(())
    }

    /// Drop the routing entry of a finished task
    pub async fn forget(&self, task_id: &str) {
        self.routes.write().await.remove(task_id);
    }

    async fn open_events(
        &self,
        task_id: &str,
        after: Option<u64>,
    ) -> Result<BoxStream<'static, Result<EventFrame, A2AError>>, A2AError> {
        let route = self.route(task_id).await?;
        let operation = A2AOperation::SubscribeTask {
            task_id: task_id.to_string(),
            after,
        };

        tracing::debug!(
            task_id,
            agent_id = %route.agent_id,
            after = ?after,
            "opening event stream"
        );

        let response = self.call(operation, &route.agent_id, &route.endpoint).await?;
        let stream = response
            .into_stream()
            .ok_or_else(|| A2AError::Protocol("Expected event stream".into()))?;

        let framing = Framing::from_content_type(stream.content_type.as_deref());
        Ok(self.events.decode(framing, stream.body))
    }

    /// Subscribe to a task's events
    ///
    /// The stream is lazy: nothing is sent until it is first polled. It ends after
    /// [`Event::TaskEnded`] or [`Event::TaskFailed`], or after yielding one error.
    /// Disconnects are retried with backoff and resumed after the last sequence
    /// number seen; frames at or below it are dropped.
    ///
    /// Agents that refuse the event stream outright (HTTP 405, 406 or 501) are polled
    /// with [`ProtocolClient::get_task`] every backoff base interval instead. Polling
    /// yields each agent reply as [`Event::MessageComplete`] and ends with the task's
    /// terminal event.
    pub fn subscribe(&self, task_id: &str) -> BoxStream<'static, Result<Event, A2AError>> {
        let subscription = Subscription {
            client: self.clone(),
            task_id: task_id.to_string(),
            frames: None,
            last_seq: None,
            delivered: false,
            attempt: 0,
            done: false,
            polling: None,
            pending: VecDeque::new(),
        };

        stream::unfold(subscription, |mut subscription| async move {
            let item = subscription.next_event().await?;
            Some((item, subscription))
        })
        .boxed()
    }
}

impl<T: Transport> Clone for ProtocolClient<T> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            events: self.events,
            backoff: self.backoff,
            routes: self.routes.clone(),
        }
    }
}

impl<T: Transport> std::fmt::Debug for ProtocolClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

/// State of one event subscription across reconnects
struct Subscription<T: Transport> {
    client: ProtocolClient<T>,
    task_id: String,
    frames: Option<BoxStream<'static, Result<EventFrame, A2AError>>>,
    last_seq: Option<u64>,
    delivered: bool,
    attempt: u32,
    done: bool,
    polling: Option<Polling>,
    pending: VecDeque<Event>,
}

/// Status polling for agents without an event stream
#[derive(Debug)]
struct Polling {
    interval: Duration,
    state: TaskState,
    replies: usize,
    polled: bool,
}

impl Polling {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: TaskState::Submitted,
            replies: 0,
            polled: false,
        }
    }

    /// Events for whatever changed since the previous status
    fn advance(&mut self, status: TaskStatus) -> Vec<Event> {
        let mut events = Vec::new();

        if !status.state.is_terminal() && self.state.can_transition_to(status.state) {
            self.state = status.state;
            events.push(Event::TaskStateChanged {
                state: status.state,
            });
        }

        let replies: Vec<&Message> = status.replies().collect();
        events.extend(
            replies
                .iter()
                .skip(self.replies)
                .map(|message| Event::MessageComplete {
                    message: (*message).clone(),
                }),
        );
        self.replies = self.replies.max(replies.len());

        events.extend(status.terminal_event());
        events
    }
}

impl<T: Transport> Subscription<T> {
    /// Fetch the task status once, waiting out the interval between polls
    async fn poll(&mut self) -> Result<(), A2AError> {
        let Some(polling) = self.polling.as_mut() else {
            return Ok(());
        };
        if polling.polled {
            tokio::time::sleep(polling.interval).await;
        }
        polling.polled = true;

        let status = self.client.get_task(&self.task_id).await?;
        self.pending.extend(polling.advance(status));
        Ok(())
    }

    /// Wait before the next reconnect, or fail if the stream cannot be resumed
    async fn back_off(&mut self, error: A2AError) -> Result<(), A2AError> {
        if self.delivered && self.last_seq.is_none() {
            return Err(A2AError::Unreachable(format!(
                "event stream of task {} dropped and cannot be resumed: {}",
                self.task_id, error
            )));
        }

        let policy = self.client.backoff;
        if self.attempt >= policy.max_retries {
            return Err(error.into_unreachable());
        }

        let delay = policy.delay(self.attempt);
        self.attempt += 1;
        tracing::warn!(
            task_id = %self.task_id,
            attempt = self.attempt,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "event stream interrupted; resubscribing"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<Result<Event, A2AError>> {
        loop {
            if self.done {
                return None;
            }

            if let Some(event) = self.pending.pop_front() {
                if event.is_terminal() {
                    self.done = true;
                }
                return Some(Ok(event));
            }

            if self.polling.is_some() {
                if let Err(error) = self.poll().await {
                    self.done = true;
                    return Some(Err(error));
                }
                continue;
            }

            if self.frames.is_none() {
                let opened = self
                    .client
                    .open_events(&self.task_id, self.last_seq)
                    .await;
                match opened {
                    Ok(frames) => self.frames = Some(frames),
                    Err(A2AError::StreamingUnavailable(detail)) if !self.delivered => {
                        tracing::info!(
                            task_id = %self.task_id,
                            detail = %detail,
                            "event stream unavailable; polling task status"
                        );
                        self.polling = Some(Polling::new(self.client.backoff.base));
                    }
                    Err(error) if error.is_transient() => {
                        if let Err(error) = self.back_off(error).await {
                            self.done = true;
                            return Some(Err(error));
                        }
                    }
                    Err(error) => {
                        self.done = true;
                        return Some(Err(error));
                    }
                }
                continue;
            }

            let Some(frames) = self.frames.as_mut() else {
                continue;
            };
            let next = frames.next().await;

            let interruption = match next {
                Some(Ok(frame)) => {
                    if let (Some(seq), Some(last)) = (frame.seq, self.last_seq) {
                        if seq <= last {
                            tracing::debug!(task_id = %self.task_id, seq, "dropping replayed event");
                            continue;
                        }
                    }
                    if frame.seq.is_some() {
                        self.last_seq = frame.seq;
                    }
                    self.delivered = true;
                    self.attempt = 0;
                    if frame.event.is_terminal() {
                        self.done = true;
                        self.frames = None;
                    }
                    return Some(Ok(frame.event));
                }
                Some(Err(error)) if error.is_transient() => error,
                Some(Err(error)) => {
                    self.done = true;
                    return Some(Err(error));
                }
                None => A2AError::Transport("event stream closed before the task ended".into()),
            };

            self.frames = None;
            if let Err(error) = self.back_off(interruption).await {
                self.done = true;
                return Some(Err(error));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use serde_json::json;

    use super::*;
    use crate::{
        protocol::{error::ErrorKind, message::MessagePart},
        transport::{
            mock::{json_response, ndjson_stream, MockTransport},
            StreamResponse,
        },
    };

    fn base() -> Url {
        Url::parse("http://localhost:10002").unwrap()
    }

    fn policy(max_retries: u32) -> BackoffPolicy {
        BackoffPolicy::new(Duration::ZERO, Duration::ZERO, max_retries)
    }

    fn creating(task_id: &'static str) -> MockTransport {
        MockTransport::new(move |req| {
            if req.method == "POST" && req.path().ends_with("/tasks") {
                Ok(json_response(201, json!({"taskId": task_id})))
            } else {
                Ok(json_response(200, json!({})))
            }
        })
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

    async fn collect(client: &ProtocolClient<MockTransport>, task_id: &str) -> Vec<Result<Event, A2AError>> {
        client.subscribe(task_id).collect().await
    }

    #[tokio::test]
    async fn test_discover() {
        let transport = MockTransport::new(|_| {
            Ok(json_response(
                200,
                json!({"agentId": "sql-agent", "capabilities": ["sql"]}),
            ))
        });
        let client = ProtocolClient::new(transport.clone(), HashMap::new(), policy(0));

        let card = client.discover("sql-agent", &base()).await.unwrap();
        assert!(card.has_capability("SQL"));
        assert_eq!(transport.calls(), vec!["GET /.well-known/agent-card"]);
    }

    #[tokio::test]
    async fn test_task_calls_follow_the_creating_agent() {
        let transport = creating("t-1");
        let client = ProtocolClient::new(transport.clone(), HashMap::new(), policy(0));
        let endpoint = Url::parse("http://sql.internal:9000/a2a/").unwrap();

        let task_id = client
            .create_task("sql-agent", &endpoint, Message::user("total sales"))
            .await
            .unwrap();
        client.send_message(&task_id, Message::user("by region")).await.unwrap();
        client.cancel(&task_id).await.unwrap();

        let urls: Vec<String> = transport
            .requests()
            .iter()
            .map(|r| r.url.to_string())
            .collect();
        assert_eq!(
            urls,
            vec![
                "http://sql.internal:9000/a2a/tasks",
                "http://sql.internal:9000/a2a/tasks/t-1/messages",
                "http://sql.internal:9000/a2a/tasks/t-1/cancel",
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_task_fails_locally() {
        let transport = MockTransport::ok();
        let client = ProtocolClient::new(transport.clone(), HashMap::new(), policy(0));

        let err = client.cancel("nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TaskNotFound);

        let events = collect(&client, "nope").await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(A2AError::TaskNotFound { .. })));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_task_retries_server_errors() {
        let failures = Arc::new(AtomicU32::new(0));
        let seen = failures.clone();
        let transport = MockTransport::new(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(json_response(503, json!({"message": "warming up"})))
            } else {
                Ok(json_response(201, json!({"taskId": "t-9"})))
            }
        });
        let client = ProtocolClient::new(transport, HashMap::new(), policy(2));

        let task_id = client
            .create_task("rag-agent", &base(), Message::user("summarize"))
            .await
            .unwrap();
        assert_eq!(task_id, "t-9");
        assert_eq!(failures.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_create_task_unreachable_after_budget() {
        let transport = MockTransport::new(|_| Err(A2AError::Transport("connection refused".into())));
        let client = ProtocolClient::new(transport.clone(), HashMap::new(), policy(2));

        let err = client
            .create_task("rag-agent", &base(), Message::user("summarize"))
            .await
            .unwrap_err();
        assert!(matches!(err, A2AError::Unreachable(_)));
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_create_task_rejected_is_not_retried() {
        let transport = MockTransport::new(|_| Ok(json_response(422, json!({"error": "bad input"}))));
        let client = ProtocolClient::new(transport.clone(), HashMap::new(), policy(3));

        let err = client
            .create_task("rag-agent", &base(), Message::user("summarize"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rejected);
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_until_terminal() {
        let transport = creating("t-1").with_stream(|_| {
            Ok(ndjson_stream(vec![
                EventFrame::new(Event::TaskStateChanged {
                    state: crate::protocol::task::TaskState::Streaming,
                }),
                EventFrame::new(Event::TaskEnded),
                EventFrame::new(Event::MessageDelta {
                    message_id: None,
                    part: MessagePart::text("late"),
                }),
            ]))
        });
        let client = ProtocolClient::new(transport, HashMap::new(), policy(0));
        let task_id = client
            .create_task("sql-agent", &base(), Message::user("q"))
            .await
            .unwrap();

        let events: Vec<Event> = collect(&client, &task_id)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], Event::TaskEnded);
    }

    #[tokio::test]
    async fn test_subscribe_resumes_without_duplicates() {
        let opened = Arc::new(AtomicU32::new(0));
        let count = opened.clone();
        let transport = creating("t-1").with_stream(move |req| {
            match count.fetch_add(1, Ordering::SeqCst) {
                0 => {
                    assert_eq!(req.path(), "/tasks/t-1/events");
                    Ok(ndjson_stream(vec![delta(1, "SEL"), delta(2, "ECT")]))
                }
                1 => Err(A2AError::Transport("connection reset".into())),
                _ => {
                    assert_eq!(req.path(), "/tasks/t-1/events?after=2");
                    // the server replays one frame it already sent
                    Ok(ndjson_stream(vec![
                        delta(2, "ECT"),
                        delta(3, " 1"),
                        EventFrame::sequenced(4, Event::TaskEnded),
                    ]))
                }
            }
        });
        let client = ProtocolClient::new(transport, HashMap::new(), policy(2));
        let task_id = client
            .create_task("sql-agent", &base(), Message::user("q"))
            .await
            .unwrap();

        let events: Vec<Event> = collect(&client, &task_id)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                Event::MessageDelta { part, .. } => part.as_text().map(str::to_string),
                _ => None,
            })
            .collect();
        assert_eq!(text, "SELECT 1");
        assert_eq!(events.last(), Some(&Event::TaskEnded));
        assert_eq!(opened.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_subscribe_without_sequence_is_not_resumable() {
        let transport = creating("t-1").with_stream(|_| {
            Ok(ndjson_stream(vec![EventFrame::new(Event::MessageDelta {
                message_id: None,
                part: MessagePart::text("partial"),
            })]))
        });
        let client = ProtocolClient::new(transport.clone(), HashMap::new(), policy(5));
        let task_id = client
            .create_task("sql-agent", &base(), Message::user("q"))
            .await
            .unwrap();

        let events = collect(&client, &task_id).await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(A2AError::Unreachable(_))));
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_subscribe_gives_up_after_budget() {
        let transport = creating("t-1")
            .with_stream(|_| Ok(StreamResponse::new(503, None, stream::empty().boxed())));
        let client = ProtocolClient::new(transport.clone(), HashMap::new(), policy(3));
        let task_id = client
            .create_task("sql-agent", &base(), Message::user("q"))
            .await
            .unwrap();

        let events = collect(&client, &task_id).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap_err().kind(), ErrorKind::Unreachable);
        // one create plus the first attempt and three retries
        assert_eq!(transport.calls().len(), 5);
    }

    #[tokio::test]
    async fn test_subscribe_task_gone() {
        let transport = creating("t-1")
            .with_stream(|_| Ok(StreamResponse::new(404, None, stream::empty().boxed())));
        let client = ProtocolClient::new(transport.clone(), HashMap::new(), policy(3));
        let task_id = client
            .create_task("sql-agent", &base(), Message::user("q"))
            .await
            .unwrap();

        let events = collect(&client, &task_id).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap_err().kind(), ErrorKind::TaskNotFound);
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_polls_when_streaming_is_refused() {
        let polls = Arc::new(AtomicU32::new(0));
        let seen = polls.clone();
        let transport = MockTransport::new(move |req| {
            if req.method == "POST" {
                return Ok(json_response(201, json!({"taskId": "t-1"})));
            }
            let user = json!({"role": "user", "parts": [{"text": "total sales"}]});
            let reply = json!({"role": "agent", "parts": [{"text": "SELECT SUM(amount) FROM sales"}]});
            let status = match seen.fetch_add(1, Ordering::SeqCst) {
                0 => json!({"state": "submitted", "messages": [user]}),
                1 => json!({"state": "working", "messages": [user, reply]}),
                _ => json!({"state": "completed", "messages": [user, reply]}),
            };
            Ok(json_response(200, status))
        })
        .with_stream(|_| Ok(StreamResponse::new(405, None, stream::empty().boxed())));
        let client = ProtocolClient::new(transport.clone(), HashMap::new(), BackoffPolicy::default());
        let task_id = client
            .create_task("sql-agent", &base(), Message::user("total sales"))
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let events: Vec<Event> = collect(&client, &task_id)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(
            events,
            vec![
                Event::TaskStateChanged {
                    state: TaskState::Streaming
                },
                Event::MessageComplete {
                    message: Message::agent("SELECT SUM(amount) FROM sales")
                },
                Event::TaskEnded,
            ]
        );
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_millis(1500));
        assert_eq!(
            transport.calls(),
            vec![
                "POST /tasks",
                "GET /tasks/t-1/events",
                "GET /tasks/t-1",
                "GET /tasks/t-1",
                "GET /tasks/t-1",
            ]
        );
    }

    #[tokio::test]
    async fn test_polled_failure_is_terminal() {
        let transport = MockTransport::new(|req| {
            if req.method == "POST" {
                Ok(json_response(201, json!({"taskId": "t-1"})))
            } else {
                Ok(json_response(
                    200,
                    json!({"state": "failed", "error": "rejected", "detail": "no such table"}),
                ))
            }
        })
        .with_stream(|_| Ok(StreamResponse::new(501, None, stream::empty().boxed())));
        let client = ProtocolClient::new(transport, HashMap::new(), policy(0));
        let task_id = client
            .create_task("sql-agent", &base(), Message::user("q"))
            .await
            .unwrap();

        let events = collect(&client, &task_id).await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &Event::failed(ErrorKind::Rejected, "no such table")
        );
    }

    #[test]
    fn test_polling_reports_only_new_replies() {
        let mut polling = Polling::new(Duration::from_millis(500));
        let status = |state: &str, replies: &[&str]| -> TaskStatus {
            let messages: Vec<Message> = replies.iter().map(|r| Message::agent(*r)).collect();
            serde_json::from_value(json!({"state": state, "messages": messages})).unwrap()
        };

        assert_eq!(polling.advance(status("submitted", &[])), vec![]);
        assert_eq!(polling.advance(status("working", &["a"])).len(), 2);
        assert_eq!(polling.advance(status("working", &["a"])), vec![]);
        assert_eq!(
            polling.advance(status("completed", &["a", "b"])),
            vec![
                Event::MessageComplete {
                    message: Message::agent("b")
                },
                Event::TaskEnded,
            ]
        );
    }
}
