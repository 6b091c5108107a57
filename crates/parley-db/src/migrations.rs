use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            username      TEXT NOT NULL UNIQUE,
            display_name  TEXT NOT NULL,
            password      TEXT NOT NULL,
            frozen        INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL
        );

        -- One row per unordered pair: user_low < user_high.
        CREATE TABLE IF NOT EXISTS conversations (
            id               TEXT PRIMARY KEY,
            user_low         TEXT NOT NULL REFERENCES users(id),
            user_high        TEXT NOT NULL REFERENCES users(id),
            last_message_id  TEXT,
            last_text        TEXT NOT NULL DEFAULT '',
            last_sender_id   TEXT,
            last_is_video    INTEGER NOT NULL DEFAULT 0,
            last_is_audio    INTEGER NOT NULL DEFAULT 0,
            last_seen        INTEGER NOT NULL DEFAULT 0,
            last_arrived     INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL,
            CHECK (user_low < user_high),
            UNIQUE (user_low, user_high)
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_high
            ON conversations(user_high);

        CREATE TABLE IF NOT EXISTS messages (
            id                TEXT PRIMARY KEY,
            conversation_id   TEXT NOT NULL REFERENCES conversations(id),
            sender_id         TEXT NOT NULL REFERENCES users(id),
            receiver          TEXT NOT NULL,
            text              TEXT NOT NULL,
            image_url         TEXT,
            image_asset_id    TEXT,
            video_url         TEXT,
            video_asset_id    TEXT,
            audio_url         TEXT,
            audio_asset_id    TEXT,
            seen              INTEGER NOT NULL DEFAULT 0,
            arrived           INTEGER NOT NULL DEFAULT 0,
            created_at        TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_unseen
            ON messages(receiver, seen);

        CREATE TRIGGER IF NOT EXISTS messages_flags_monotonic
            BEFORE UPDATE OF seen, arrived ON messages
            WHEN (OLD.seen = 1 AND NEW.seen = 0) OR (OLD.arrived = 1 AND NEW.arrived = 0)
        BEGIN
            SELECT RAISE(ABORT, 'seen/arrived cannot be cleared');
        END;
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
