use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parley_db::{Database, Upsert};
use parley_gateway::{CommandHandler, Delivery, EventChannel, PresenceRegistry};
use parley_types::api::{ConversationResponse, MessageContent, MessageResponse};
use parley_types::events::{ClientCommand, ServerEvent};
use parley_types::models::{LastMessage, Message, UserSummary};

use crate::error::{DeliveryError, DeliveryResult, PolicyViolation};
use crate::notify::{LogNotifier, PushNotification, PushNotifier};
use crate::policy::{AccountPolicy, DbAccountPolicy};

/// Coordinates durable conversation/message state with live delivery.
///
/// Every write to conversations and messages goes through here. Persistence
/// is the contract; pushes to live connections are best-effort and their
/// failures are only logged.
#[derive(Clone)]
pub struct DeliveryCoordinator {
    db: Arc<Database>,
    presence: Arc<dyn PresenceRegistry>,
    events: Arc<dyn EventChannel>,
    accounts: Arc<dyn AccountPolicy>,
    notifier: Arc<dyn PushNotifier>,
}

impl DeliveryCoordinator {
    /// Frozen checks read the users table and offline notifications are only logged
    /// until replaced with [`Self::with_account_policy`] / [`Self::with_notifier`].
    pub fn new(
        db: Arc<Database>,
        presence: Arc<dyn PresenceRegistry>,
        events: Arc<dyn EventChannel>,
    ) -> Self {
        Self {
            accounts: Arc::new(DbAccountPolicy::new(db.clone())),
            notifier: Arc::new(LogNotifier),
            db,
            presence,
            events,
        }
    }

    pub fn with_account_policy(mut self, accounts: Arc<dyn AccountPolicy>) -> Self {
        self.accounts = accounts;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn PushNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    // -- Sends --

    /// Persist a message from `sender_id` to `recipient_id`, creating their
    /// conversation on first contact, then push it live if the recipient is online.
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        content: MessageContent,
    ) -> DeliveryResult<MessageResponse> {
        if content.text.trim().is_empty() && content.attachments.is_empty() {
            return Err(DeliveryError::Validation("message needs text or media".into()));
        }
        if sender_id == recipient_id {
            return Err(PolicyViolation::SelfAction.into());
        }

        let accounts = self.accounts.clone();
        let response = self
            .blocking(move |db| {
                let recipient = db
                    .get_user_by_id(recipient_id)?
                    .ok_or(DeliveryError::NotFound("recipient"))?;
                if accounts.is_frozen(recipient_id)? {
                    return Err(PolicyViolation::AccountFrozen.into());
                }
                let sender = db
                    .get_user_by_id(sender_id)?
                    .ok_or(DeliveryError::NotFound("sender"))?;

                let conversation = db
                    .create_conversation_if_absent(
                        Uuid::new_v4(),
                        sender_id,
                        recipient_id,
                        &LastMessage::default(),
                    )?
                    .into_inner();

                let message = Message {
                    id: Uuid::new_v4(),
                    conversation_id: conversation.id,
                    sender_id,
                    receiver: recipient.username,
                    text: content.text,
                    attachments: content.attachments,
                    seen: false,
                    arrived: false,
                    created_at: Utc::now(),
                };
                if !db.insert_message(&message)? {
                    debug!(
                        "Conversation {} already summarizes a message newer than {}",
                        conversation.id, message.id
                    );
                }

                Ok(MessageResponse {
                    message,
                    sender: sender.summary(),
                })
            })
            .await?;

        if self.presence.lookup(recipient_id).is_some() {
            let event = ServerEvent::NewMessage {
                message: response.clone(),
            };
            if self.push(recipient_id, event) == Delivery::Delivered {
                return Ok(response);
            }
        }

        self.notifier.notify(PushNotification {
            user_id: recipient_id,
            payload: serde_json::json!({
                "type": "newMessage",
                "conversation_id": response.message.conversation_id,
                "message_id": response.message.id,
                "sender": response.sender.display_name,
                "text": response.message.text,
            }),
        });

        Ok(response)
    }

    /// Create an empty conversation with `other_user_id`. Fails if one already exists.
    pub async fn save_conversation_only(
        &self,
        user_id: Uuid,
        other_user_id: Uuid,
    ) -> DeliveryResult<Uuid> {
        if user_id == other_user_id {
            return Err(PolicyViolation::SelfAction.into());
        }

        let accounts = self.accounts.clone();
        self.blocking(move |db| {
            db.get_user_by_id(other_user_id)?
                .ok_or(DeliveryError::NotFound("user"))?;
            if accounts.is_frozen(other_user_id)? {
                return Err(PolicyViolation::AccountFrozen.into());
            }

            match db.create_conversation_if_absent(
                Uuid::new_v4(),
                user_id,
                other_user_id,
                &LastMessage::default(),
            )? {
                Upsert::Created(conversation) => {
                    info!("{} started conversation {} with {}", user_id, conversation.id, other_user_id);
                    Ok(conversation.id)
                }
                Upsert::Existing(_) => Err(PolicyViolation::ConversationExists.into()),
            }
        })
        .await
    }

    // -- Acknowledgments --

    /// Mark every unseen message of the conversation as seen and tell the
    /// other participant. Returns how many messages changed.
    pub async fn mark_messages_seen(
        &self,
        conversation_id: Uuid,
        viewing_user_id: Uuid,
    ) -> DeliveryResult<usize> {
        let (other, changed) = self
            .blocking(move |db| {
                let conversation = db
                    .get_conversation(conversation_id)?
                    .ok_or(DeliveryError::NotFound("conversation"))?;
                let other = conversation
                    .other_participant(viewing_user_id)
                    .ok_or(PolicyViolation::NotParticipant)?;

                let changed = db.mark_conversation_seen(conversation_id)?;
                Ok((other, changed))
            })
            .await?;

        if self.presence.lookup(other).is_some() {
            self.push(other, ServerEvent::MessagesSeen { conversation_id });
        }

        Ok(changed)
    }

    /// Record that `receiver_id`'s client got the message, and echo an
    /// acknowledgment back to the original sender.
    pub async fn acknowledge_arrival(
        &self,
        receiver_id: Uuid,
        message_id: Uuid,
        conversation_id: Uuid,
        sender_id: Uuid,
        payload: serde_json::Value,
    ) -> DeliveryResult<()> {
        self.blocking(move |db| {
            let message = db
                .get_message(message_id)?
                .filter(|m| m.conversation_id == conversation_id && m.sender_id == sender_id)
                .ok_or(DeliveryError::NotFound("message"))?;
            let conversation = db
                .get_conversation(message.conversation_id)?
                .ok_or(DeliveryError::NotFound("conversation"))?;
            if conversation.other_participant(receiver_id) != Some(sender_id) {
                return Err(PolicyViolation::NotParticipant.into());
            }

            db.mark_message_arrived(message_id)?;
            db.mark_last_message_arrived(conversation_id, message_id)?;
            Ok(())
        })
        .await?;

        if self.presence.lookup(sender_id).is_some() {
            self.push(
                sender_id,
                ServerEvent::MessageSent {
                    message_id,
                    receiver_id,
                    message: payload,
                },
            );
        }

        Ok(())
    }

    // -- Relays (no persistence) --

    pub fn relay_typing(&self, writing_user_id: Uuid, recipient_id: Uuid) -> Delivery {
        self.push(recipient_id, ServerEvent::Writing { writing_user_id })
    }

    pub fn relay_stopped_typing(&self, recipient_id: Uuid) -> Delivery {
        self.push(recipient_id, ServerEvent::NotWriting)
    }

    pub fn relay_recording_started(&self, recording_user_id: Uuid, recipient_id: Uuid) -> Delivery {
        self.push(recipient_id, ServerEvent::UserRecording { recording_user_id })
    }

    pub fn relay_recording_stopped(&self, recipient_id: Uuid) -> Delivery {
        self.push(recipient_id, ServerEvent::UserNotRecording)
    }

    // -- Reads --

    /// All messages between `user_id` and `other_user_id`, oldest first.
    pub async fn conversation_history(
        &self,
        user_id: Uuid,
        other_user_id: Uuid,
    ) -> DeliveryResult<Vec<MessageResponse>> {
        self.blocking(move |db| {
            let conversation = db
                .find_conversation_by_pair(user_id, other_user_id)?
                .ok_or(DeliveryError::NotFound("conversation"))?;
            let messages = db.list_messages(conversation.id)?;
            let senders = db.get_user_summaries(&conversation.participants)?;
            Ok(populate(messages, &senders))
        })
        .await
    }

    /// Every unseen message addressed to `user_id`, across conversations.
    pub async fn unseen_messages(&self, user_id: Uuid) -> DeliveryResult<Vec<MessageResponse>> {
        self.blocking(move |db| {
            let user = db
                .get_user_by_id(user_id)?
                .ok_or(DeliveryError::NotFound("user"))?;
            let messages = db.list_unseen_for_receiver(&user.username)?;

            let mut sender_ids: Vec<Uuid> = messages.iter().map(|m| m.sender_id).collect();
            sender_ids.sort();
            sender_ids.dedup();
            let senders = db.get_user_summaries(&sender_ids)?;
            Ok(populate(messages, &senders))
        })
        .await
    }

    /// Conversations of `user_id`, most recent first, with `user_id` left out of `participants`.
    pub async fn conversations(&self, user_id: Uuid) -> DeliveryResult<Vec<ConversationResponse>> {
        self.blocking(move |db| {
            let conversations = db.list_conversations_for_user(user_id)?;
            let others: Vec<Uuid> = conversations
                .iter()
                .filter_map(|c| c.other_participant(user_id))
                .collect();
            let profiles = db.get_user_summaries(&others)?;

            Ok(conversations
                .into_iter()
                .map(|c| ConversationResponse {
                    id: c.id,
                    participants: c
                        .participants
                        .iter()
                        .filter(|&&p| p != user_id)
                        .map(|p| profile_or_unknown(&profiles, *p))
                        .collect(),
                    last_message: c.last_message,
                    created_at: c.created_at,
                    updated_at: c.updated_at,
                })
                .collect())
        })
        .await
    }

    fn push(&self, user_id: Uuid, event: ServerEvent) -> Delivery {
        let name = event.name();
        let outcome = self.events.push_to_user(user_id, event);
        if outcome == Delivery::Dropped {
            warn!("Live push of {} to {} dropped", name, user_id);
        }
        outcome
    }

    /// Run blocking store work off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> DeliveryResult<T>
    where
        F: FnOnce(&Database) -> DeliveryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                DeliveryError::Persistence(anyhow!("store task failed: {}", e))
            })?
    }
}

impl CommandHandler for DeliveryCoordinator {
    async fn handle(&self, user_id: Uuid, command: ClientCommand) {
        match command {
            ClientCommand::Identify { .. } => {}

            ClientCommand::MarkMessagesAsSeen { conversation_id, user_id: claimed } => {
                warn_if_impersonating(user_id, claimed);
                if let Err(e) = self.mark_messages_seen(conversation_id, user_id).await {
                    warn!("{} markMessagesAsSeen {} failed: {}", user_id, conversation_id, e);
                }
            }

            ClientCommand::UserWriting { writing_user_id, recipient_id } => {
                warn_if_impersonating(user_id, writing_user_id);
                self.relay_typing(user_id, recipient_id);
            }

            ClientCommand::UserNotWriting { recipient_id } => {
                self.relay_stopped_typing(recipient_id);
            }

            ClientCommand::UserStartedRecording { recording_user_id, recipient_id } => {
                warn_if_impersonating(user_id, recording_user_id);
                self.relay_recording_started(user_id, recipient_id);
            }

            ClientCommand::UserStoppedRecording { recipient_id } => {
                self.relay_recording_stopped(recipient_id);
            }

            ClientCommand::MessageArrived {
                sender_id,
                message_id,
                receiver_id,
                conversation_id,
                message,
            } => {
                warn_if_impersonating(user_id, receiver_id);
                if let Err(e) = self
                    .acknowledge_arrival(user_id, message_id, conversation_id, sender_id, message)
                    .await
                {
                    warn!("{} messageArrived {} failed: {}", user_id, message_id, e);
                }
            }
        }
    }
}

fn warn_if_impersonating(user_id: Uuid, claimed: Option<Uuid>) {
    if let Some(claimed) = claimed.filter(|c| *c != user_id) {
        warn!("{} sent a command claiming to be {}; using the connection's identity", user_id, claimed);
    }
}

fn populate(messages: Vec<Message>, senders: &HashMap<Uuid, UserSummary>) -> Vec<MessageResponse> {
    messages
        .into_iter()
        .map(|message| MessageResponse {
            sender: profile_or_unknown(senders, message.sender_id),
            message,
        })
        .collect()
}

fn profile_or_unknown(profiles: &HashMap<Uuid, UserSummary>, id: Uuid) -> UserSummary {
    profiles.get(&id).cloned().unwrap_or_else(|| {
        warn!("Missing profile for user {}", id);
        UserSummary {
            id,
            username: "unknown".to_string(),
            display_name: "unknown".to_string(),
        }
    })
}
