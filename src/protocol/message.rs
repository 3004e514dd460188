//! A2A message types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::error::A2AError;

/// A message in the A2A protocol
///
/// Messages are the unit of exchange between the dispatcher and a remote agent.
/// Each message has a role (user or agent) and one or more parts (text, data or file).
/// Within a task, messages are append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,

    /// Message content parts (at least one required)
    pub parts: Vec<MessagePart>,

    /// Optional message identifier
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Optional task identifier (for associating message with a task)
    #[serde(rename = "taskId", skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// Optional context identifier (for multi-turn conversations)
    #[serde(rename = "contextId", skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,

    /// Optional metadata for the message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

impl Message {
    /// Create a new message with text content
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self::from_parts(role, vec![MessagePart::text(text)])
    }

    /// Create a message from already-built parts
    pub fn from_parts(role: Role, parts: Vec<MessagePart>) -> Self {
        Self {
            role,
            parts,
            message_id: None,
            task_id: None,
            context_id: None,
            metadata: None,
        }
    }

    /// Create a user message with text content
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create an agent message with text content
    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(Role::Agent, text)
    }

    /// Create a new message builder
    pub fn builder() -> MessageBuilder {
        MessageBuilder::new()
    }

    /// Assign a fresh time-ordered message id
    pub fn with_generated_id(mut self) -> Self {
        self.message_id = Some(Uuid::now_v7().to_string());
        self
    }

    /// Set the context ID
    pub fn with_context_id(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    /// Add a metadata field to the message
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    /// Add a message part
    pub fn with_part(mut self, part: MessagePart) -> Self {
        self.parts.push(part);
        self
    }

    /// Concatenation of all text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(MessagePart::as_text)
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Builder for constructing Message instances
#[derive(Debug, Default)]
pub struct MessageBuilder {
    role: Option<Role>,
    parts: Vec<MessagePart>,
    message_id: Option<String>,
    task_id: Option<String>,
    context_id: Option<String>,
    metadata: Option<HashMap<String, Value>>,
}

impl MessageBuilder {
    /// Create a new message builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the role of the message
    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Set the message parts
    pub fn parts(mut self, parts: Vec<MessagePart>) -> Self {
        self.parts = parts;
        self
    }

    /// Add a single part to the message
    pub fn part(mut self, part: MessagePart) -> Self {
        self.parts.push(part);
        self
    }

    /// Set the message ID
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Set the task ID
    pub fn task_id(mut self, id: impl Into<String>) -> Self {
        self.task_id = Some(id.into());
        self
    }

    /// Set the context ID
    pub fn context_id(mut self, id: impl Into<String>) -> Self {
        self.context_id = Some(id.into());
        self
    }

    /// Add a metadata field
    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    /// Build the message
    ///
    /// # Errors
    ///
    /// Returns [`A2AError::Validation`] if the role is not set or there are no parts
    pub fn build(self) -> Result<Message, A2AError> {
        let role = self
            .role
            .ok_or_else(|| A2AError::Validation("Message role is required".into()))?;
        if self.parts.is_empty() {
            return Err(A2AError::Validation(
                "Message must have at least one part".into(),
            ));
        }

        Ok(Message {
            role,
            parts: self.parts,
            message_id: self.message_id,
            task_id: self.task_id,
            context_id: self.context_id,
            metadata: self.metadata,
        })
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message from a user
    User,

    /// Message from a remote agent
    Agent,
}

/// File content for file parts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    /// MIME type of the file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    /// Name of the file
    pub name: String,

    /// URI reference to the file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_with_uri: Option<String>,

    /// Base64-encoded file content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_with_bytes: Option<String>,
}

/// A part of a message
///
/// Exactly one of `text`, `data` or `file` is present; the field name is the tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessagePart {
    /// Text content
    Text {
        /// The text content
        text: String,
    },

    /// File reference
    File {
        /// File content
        file: FileContent,
    },

    /// Structured key-value data
    Data {
        /// The structured data
        data: Map<String, Value>,
    },
}

impl MessagePart {
    /// Create a text part
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a file part with URI reference
    pub fn file(name: impl Into<String>, file_uri: impl Into<String>) -> Self {
        Self::File {
            file: FileContent {
                media_type: None,
                name: name.into(),
                file_with_uri: Some(file_uri.into()),
                file_with_bytes: None,
            },
        }
    }

    /// Create a file part with URI and media type
    pub fn file_with_type(
        name: impl Into<String>,
        file_uri: impl Into<String>,
        media_type: impl Into<String>,
    ) -> Self {
        Self::File {
            file: FileContent {
                media_type: Some(media_type.into()),
                name: name.into(),
                file_with_uri: Some(file_uri.into()),
                file_with_bytes: None,
            },
        }
    }

    /// Create a file part with base64-encoded bytes
    pub fn file_with_bytes(
        name: impl Into<String>,
        file_bytes: impl Into<String>,
        media_type: Option<String>,
    ) -> Self {
        Self::File {
            file: FileContent {
                media_type,
                name: name.into(),
                file_with_uri: None,
                file_with_bytes: Some(file_bytes.into()),
            },
        }
    }

    /// Create a data part
    pub fn data(data: Map<String, Value>) -> Self {
        Self::Data { data }
    }

    /// Text content, if this is a text part
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessagePart::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Whether the part carries no content at all
    pub fn is_empty(&self) -> bool {
        match self {
            MessagePart::Text { text } => text.is_empty(),
            MessagePart::Data { data } => data.is_empty(),
            MessagePart::File { file } => {
                file.file_with_uri.is_none() && file.file_with_bytes.is_none()
            }
        }
    }

    /// Fold a streamed delta into this part.
    ///
    /// Text is appended and data keys are merged (later keys win). Returns the
    /// delta back when the two parts cannot be coalesced.
    pub fn merge(&mut self, delta: MessagePart) -> Result<(), MessagePart> {
        match (self, delta) {
            (MessagePart::Text { text }, MessagePart::Text { text: more }) => {
                text.push_str(&more);
                Ok(())
            }
            (MessagePart::Data { data }, MessagePart::Data { data: more }) => {
                data.extend(more);
                Ok(())
            }
            (_, delta) => Err(delta),
        }
    }
}
