use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MessageResponse;

/// Events pushed FROM server TO client over the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Server confirms the connection is identified
    Ready { user_id: Uuid, username: String },

    /// Full list of online user ids, broadcast on every presence change
    #[serde(rename = "getOnlineUsers")]
    OnlineUsers { user_ids: Vec<Uuid> },

    /// A message addressed to this user was persisted
    NewMessage { message: MessageResponse },

    /// The other participant has seen every message in the conversation
    MessagesSeen { conversation_id: Uuid },

    Writing { writing_user_id: Uuid },

    NotWriting,

    UserRecording { recording_user_id: Uuid },

    UserNotRecording,

    /// Arrival acknowledgment relayed back to the original sender
    MessageSent {
        message_id: Uuid,
        receiver_id: Uuid,
        message: serde_json::Value,
    },
}

impl ServerEvent {
    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::OnlineUsers { .. } => "getOnlineUsers",
            Self::NewMessage { .. } => "newMessage",
            Self::MessagesSeen { .. } => "messagesSeen",
            Self::Writing { .. } => "writing",
            Self::NotWriting => "notWriting",
            Self::UserRecording { .. } => "userRecording",
            Self::UserNotRecording => "userNotRecording",
            Self::MessageSent { .. } => "messageSent",
        }
    }
}

/// Commands sent FROM client TO server over the live channel.
///
/// User ids carried in payloads are informational; the server acts as the
/// authenticated connection's user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientCommand {
    /// Authenticate the connection with a JWT
    Identify { token: String },

    MarkMessagesAsSeen {
        conversation_id: Uuid,
        #[serde(default)]
        user_id: Option<Uuid>,
    },

    UserWriting {
        #[serde(default)]
        writing_user_id: Option<Uuid>,
        recipient_id: Uuid,
    },

    UserNotWriting { recipient_id: Uuid },

    UserStartedRecording {
        #[serde(default)]
        recording_user_id: Option<Uuid>,
        recipient_id: Uuid,
    },

    UserStoppedRecording { recipient_id: Uuid },

    MessageArrived {
        sender_id: Uuid,
        message_id: Uuid,
        #[serde(default)]
        receiver_id: Option<Uuid>,
        conversation_id: Uuid,
        #[serde(default)]
        message: serde_json::Value,
    },
}
