use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Attachments, LastMessage, MediaRef, Message, UserSummary};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway `identify` handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Conversations --

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveConversationResponse {
    pub conversation_id: Uuid,
}

/// A conversation as seen by one participant: the requester is left out of `participants`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub participants: Vec<UserSummary>,
    pub last_message: LastMessage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Messages --

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub image: Option<MediaRef>,
    #[serde(default)]
    pub video: Option<MediaRef>,
    #[serde(default)]
    pub audio: Option<MediaRef>,
}

impl SendMessageRequest {
    pub fn into_content(self) -> MessageContent {
        MessageContent {
            text: self.text,
            attachments: Attachments {
                image: self.image,
                video: self.video,
                audio: self.audio,
            },
        }
    }
}

/// What a sender supplies for a new message.
#[derive(Debug, Clone, Default)]
pub struct MessageContent {
    pub text: String,
    pub attachments: Attachments,
}

/// A message with its sender populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(flatten)]
    pub message: Message,
    pub sender: UserSummary,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
