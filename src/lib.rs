//! # A2A Dispatch
//!
//! A Tower-based query dispatcher over the Agent2Agent (A2A) protocol.
//!
//! A dispatcher sits between a conversational front end and a set of remote agents.
//! Each incoming query is routed to the agent whose advertised capabilities fit it,
//! a task is created on that agent, and the agent's streamed output is relayed back
//! as an ordered sequence of output chunks.
//!
//! ## Features
//!
//! - **Agent card registry**: Discovers and caches agent cards per configured endpoint
//! - **Pluggable routing**: Any [`router::DecisionFunction`] can pick the agent; a keyword
//!   based [`router::CapabilityMatcher`] is built in
//! - **Resilient streaming**: Transient transport faults are retried with capped
//!   exponential backoff and the event stream resumes without duplicates
//! - **Composable middleware**: Auth and validation as Tower layers over any transport
//!
//! ## Example
//!
//! ```rust,no_run
//! use a2a_dispatch::prelude::*;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DispatchConfig::new()
//!         .with_agent("sql-agent", "http://localhost:10002".parse()?)
//!         .with_agent("rag-agent", "http://localhost:10001".parse()?);
//!
//!     let dispatcher = DispatcherBuilder::new_http(config).build()?;
//!
//!     let mut response = dispatcher.submit_query(
//!         "How many orders shipped last week?",
//!         ConversationContext::new(),
//!     );
//!     while let Some(chunk) = response.next().await {
//!         println!("{}", serde_json::to_string(&chunk)?);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod client;
pub mod codec;
pub mod dispatch;
pub mod layer;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod service;
pub mod task;
pub mod transport;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        aggregate::{ChunkBody, OutputChunk},
        client::{DispatchConfig, DispatcherBuilder, ProtocolClient},
        dispatch::{Dispatcher, ResponseStream},
        layer::AuthCredentials,
        protocol::error::{A2AError, ErrorKind},
        protocol::{AgentCard, Capability, Event, Message, MessagePart, Role, Task, TaskState},
        router::{CapabilityMatcher, ConversationContext, DecisionFunction, Verdict},
        task::{CancelHandle, TaskHandle},
        transport::{BackoffPolicy, HttpTransport, Transport},
    };
}
