use std::collections::HashMap;

use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use tracing::error;
use uuid::Uuid;

use parley_types::models::{Attachments, Conversation, LastMessage, MediaRef, Message, UserSummary};

use crate::Database;
use crate::models::UserRow;

/// Outcome of a find-or-create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert<T> {
    Created(T),
    Existing(T),
}

impl<T> Upsert<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Created(v) | Self::Existing(v) => v,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

const USER_COLUMNS: &str = "id, username, display_name, password, frozen, created_at";

const CONVERSATION_COLUMNS: &str = "id, user_low, user_high, last_message_id, last_text, last_sender_id, \
     last_is_video, last_is_audio, last_seen, last_arrived, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, receiver, text, \
     image_url, image_asset_id, video_url, video_asset_id, audio_url, audio_asset_id, \
     seen, arrived, created_at";

impl Database {
    // -- Users --

    /// Returns false if `username` is already taken.
    pub fn create_user(
        &self,
        id: Uuid,
        username: &str,
        display_name: &str,
        password_hash: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, username, display_name, password, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (username) DO NOTHING",
                params![id.to_string(), username, display_name, password_hash, now()],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                [username],
                user_from_row,
            )
            .optional()
        })
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id.to_string()],
                user_from_row,
            )
            .optional()
        })
    }

    /// Freeze or unfreeze an account. Returns false if the user does not exist.
    pub fn set_frozen(&self, id: Uuid, frozen: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET frozen = ?1 WHERE id = ?2",
                params![frozen, id.to_string()],
            )?;
            Ok(changed == 1)
        })
    }

    /// Batch-fetch public profiles for a set of user ids.
    pub fn get_user_summaries(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, UserSummary>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
            let rows = stmt
                .query_map(rusqlite::params_from_iter(ids.iter()), user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows.into_iter().map(|u| (u.id, u.summary())).collect())
        })
    }

    // -- Conversations --

    pub fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                [id.to_string()],
                conversation_from_row,
            )
            .optional()
        })
    }

    pub fn find_conversation_by_pair(&self, a: Uuid, b: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_conversation_by_pair(conn, a, b))
    }

    /// Atomically find the conversation for the unordered pair `(a, b)` or create it.
    ///
    /// Relies on the `UNIQUE (user_low, user_high)` constraint: a losing
    /// concurrent insert turns into a lookup of the winner's row.
    pub fn create_conversation_if_absent(
        &self,
        id: Uuid,
        a: Uuid,
        b: Uuid,
        initial: &LastMessage,
    ) -> Result<Upsert<Conversation>> {
        if a == b {
            return Err(anyhow!("A conversation needs two distinct participants"));
        }
        let (low, high) = pair_key(a, b);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let ts = now();
            let inserted = tx.execute(
                "INSERT INTO conversations (id, user_low, user_high, last_message_id, last_text, last_sender_id,
                                            last_is_video, last_is_audio, last_seen, last_arrived, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                 ON CONFLICT (user_low, user_high) DO NOTHING",
                params![
                    id.to_string(),
                    low,
                    high,
                    initial.message_id.map(|m| m.to_string()),
                    initial.text,
                    initial.sender_id.map(|s| s.to_string()),
                    initial.is_video,
                    initial.is_audio,
                    initial.seen,
                    initial.arrived,
                    ts,
                ],
            )?;

            let conversation = query_conversation_by_pair(&tx, a, b)?
                .ok_or_else(|| anyhow!("Conversation for pair vanished during upsert"))?;
            tx.commit()?;

            Ok(if inserted == 1 {
                Upsert::Created(conversation)
            } else {
                Upsert::Existing(conversation)
            })
        })
    }

    /// Raise `last_arrived`, but only while `message_id` is still the last message.
    pub fn mark_last_message_arrived(&self, conversation_id: Uuid, message_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversations SET last_arrived = 1 WHERE id = ?1 AND last_message_id = ?2",
                [conversation_id.to_string(), message_id.to_string()],
            )?;
            Ok(changed == 1)
        })
    }

    /// Conversations that include `user_id`, most recently active first.
    pub fn list_conversations_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE user_low = ?1 OR user_high = ?1
                 ORDER BY updated_at DESC, rowid DESC"
            ))?;
            let rows = stmt
                .query_map([user_id.to_string()], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Insert `message` and advance its conversation's last-message snapshot in one
    /// transaction. Returns whether the snapshot moved.
    ///
    /// The snapshot only moves forward in `created_at`, so a slower concurrent send never
    /// replaces a newer summary. A failed snapshot update is logged and the message still
    /// commits.
    pub fn insert_message(&self, message: &Message) -> Result<bool> {
        let media = |m: &Option<MediaRef>| {
            m.as_ref()
                .map(|m| (m.url.clone(), m.asset_id.clone()))
                .unzip()
        };
        let (image_url, image_asset) = media(&message.attachments.image);
        let (video_url, video_asset) = media(&message.attachments.video);
        let (audio_url, audio_asset) = media(&message.attachments.audio);
        let created_at = format_ts(&message.created_at);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                &format!(
                    "INSERT INTO messages ({MESSAGE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    message.id.to_string(),
                    message.conversation_id.to_string(),
                    message.sender_id.to_string(),
                    message.receiver,
                    message.text,
                    image_url,
                    image_asset,
                    video_url,
                    video_asset,
                    audio_url,
                    audio_asset,
                    message.seen,
                    message.arrived,
                    created_at,
                ],
            )?;

            let snapshot = LastMessage::from_message(message);
            let advanced = match tx.execute(
                "UPDATE conversations
                 SET last_message_id = ?1, last_text = ?2, last_sender_id = ?3, last_is_video = ?4,
                     last_is_audio = ?5, last_seen = ?6, last_arrived = ?7, updated_at = ?8
                 WHERE id = ?9
                   AND (last_message_id IS NULL
                        OR ?8 >= COALESCE((SELECT created_at FROM messages WHERE id = last_message_id), ''))",
                params![
                    message.id.to_string(),
                    snapshot.text,
                    message.sender_id.to_string(),
                    snapshot.is_video,
                    snapshot.is_audio,
                    snapshot.seen,
                    snapshot.arrived,
                    created_at,
                    message.conversation_id.to_string(),
                ],
            ) {
                Ok(changed) => changed == 1,
                Err(e) => {
                    error!(
                        "Summary of conversation {} left stale after message {}: {}",
                        message.conversation_id, message.id, e
                    );
                    false
                }
            };

            tx.commit()?;
            Ok(advanced)
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id.to_string()],
                message_from_row,
            )
            .optional()
        })
    }

    /// All messages of a conversation in creation order.
    pub fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt
                .query_map([conversation_id.to_string()], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_unseen_for_receiver(&self, username: &str) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE receiver = ?1 AND seen = 0
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt
                .query_map([username], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Set `seen` on every unseen message of the conversation and raise the snapshot's
    /// `last_seen` in the same transaction. Returns how many messages changed.
    pub fn mark_conversation_seen(&self, conversation_id: Uuid) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE messages SET seen = 1 WHERE conversation_id = ?1 AND seen = 0",
                [conversation_id.to_string()],
            )?;
            tx.execute(
                "UPDATE conversations SET last_seen = 1
                 WHERE id = ?1 AND last_message_id IN (SELECT id FROM messages WHERE seen = 1)",
                [conversation_id.to_string()],
            )?;
            tx.commit()?;
            Ok(changed)
        })
    }

    /// Set `arrived` on one message. Returns false if the message does not exist.
    pub fn mark_message_arrived(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET arrived = 1 WHERE id = ?1",
                [id.to_string()],
            )?;
            Ok(changed == 1)
        })
    }
}

fn query_conversation_by_pair(conn: &Connection, a: Uuid, b: Uuid) -> Result<Option<Conversation>> {
    let (low, high) = pair_key(a, b);
    conn.query_row(
        &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE user_low = ?1 AND user_high = ?2"),
        [low, high],
        conversation_from_row,
    )
    .optional()
}

/// Canonical ordering of an unordered pair, matching the `user_low < user_high` check.
fn pair_key(a: Uuid, b: Uuid) -> (String, String) {
    let (a, b) = (a.to_string(), b.to_string());
    if a < b { (a, b) } else { (b, a) }
}

fn now() -> String {
    format_ts(&Utc::now())
}

// Fixed-width so that text ordering matches time ordering.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn uuid_at(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_uuid_at(row: &Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

fn ts_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn media_at(row: &Row, url_idx: usize) -> rusqlite::Result<Option<MediaRef>> {
    let url: Option<String> = row.get(url_idx)?;
    let asset_id: Option<String> = row.get(url_idx + 1)?;
    Ok(url.zip(asset_id).map(|(url, asset_id)| MediaRef { url, asset_id }))
}

fn user_from_row(row: &Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: uuid_at(row, 0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        password: row.get(3)?,
        frozen: row.get(4)?,
        created_at: ts_at(row, 5)?,
    })
}

fn conversation_from_row(row: &Row) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: uuid_at(row, 0)?,
        participants: [uuid_at(row, 1)?, uuid_at(row, 2)?],
        last_message: LastMessage {
            message_id: opt_uuid_at(row, 3)?,
            text: row.get(4)?,
            sender_id: opt_uuid_at(row, 5)?,
            is_video: row.get(6)?,
            is_audio: row.get(7)?,
            seen: row.get(8)?,
            arrived: row.get(9)?,
        },
        created_at: ts_at(row, 10)?,
        updated_at: ts_at(row, 11)?,
    })
}

fn message_from_row(row: &Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_at(row, 0)?,
        conversation_id: uuid_at(row, 1)?,
        sender_id: uuid_at(row, 2)?,
        receiver: row.get(3)?,
        text: row.get(4)?,
        attachments: Attachments {
            image: media_at(row, 5)?,
            video: media_at(row, 7)?,
            audio: media_at(row, 9)?,
        },
        seen: row.get(11)?,
        arrived: row.get(12)?,
        created_at: ts_at(row, 13)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
