use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_types::models::UserSummary;

/// A `users` row. Carries the password hash, so it never leaves the server.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub password: String,
    pub frozen: bool,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
        }
    }
}
