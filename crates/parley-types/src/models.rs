use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public profile data used to "populate" a sender or participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
}

/// A media object already uploaded to the storage provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub asset_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachments {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<MediaRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<MediaRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<MediaRef>,
}

impl Attachments {
    pub fn is_empty(&self) -> bool {
        self.image.is_none() && self.video.is_none() && self.audio.is_none()
    }
}

/// A direct message between the two participants of a conversation.
///
/// `seen` and `arrived` only ever move from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    /// Recipient username at send time. Not kept in sync with renames.
    pub receiver: String,
    pub text: String,
    #[serde(flatten)]
    pub attachments: Attachments,
    pub seen: bool,
    pub arrived: bool,
    pub created_at: DateTime<Utc>,
}

/// Summary of the most recent message in a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub message_id: Option<Uuid>,
    pub text: String,
    pub sender_id: Option<Uuid>,
    pub is_video: bool,
    pub is_audio: bool,
    pub seen: bool,
    pub arrived: bool,
}

impl LastMessage {
    pub fn from_message(message: &Message) -> Self {
        Self {
            message_id: Some(message.id),
            text: message.text.clone(),
            sender_id: Some(message.sender_id),
            is_video: message.attachments.video.is_some(),
            is_audio: message.attachments.audio.is_some(),
            seen: message.seen,
            arrived: message.arrived,
        }
    }
}

/// A conversation between exactly two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub participants: [Uuid; 2],
    pub last_message: LastMessage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn includes(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }

    /// The participant that is not `user_id`, if `user_id` is a participant at all.
    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        match self.participants {
            [a, b] if a == user_id => Some(b),
            [a, b] if b == user_id => Some(a),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(video: bool) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            receiver: "bob".into(),
            text: "hello".into(),
            attachments: Attachments {
                video: video.then(|| MediaRef {
                    url: "https://cdn.example/v.mp4".into(),
                    asset_id: "v1".into(),
                }),
                ..Default::default()
            },
            seen: false,
            arrived: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn last_message_reflects_media_kind() {
        let m = message(true);
        let last = LastMessage::from_message(&m);
        assert_eq!(last.message_id, Some(m.id));
        assert_eq!(last.sender_id, Some(m.sender_id));
        assert!(last.is_video);
        assert!(!last.is_audio);
        assert!(!last.seen && !last.arrived);
    }

    #[test]
    fn other_participant_requires_membership() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = Conversation {
            id: Uuid::new_v4(),
            participants: [a, b],
            last_message: LastMessage::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(conv.other_participant(a), Some(b));
        assert_eq!(conv.other_participant(b), Some(a));
        assert_eq!(conv.other_participant(Uuid::new_v4()), None);
    }

    #[test]
    fn message_without_media_omits_media_keys() {
        let json = serde_json::to_value(message(false)).unwrap();
        assert!(json.get("video").is_none());
        assert_eq!(json["text"], "hello");
    }
}
