use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use parley_db::Database;

/// Account-freeze lookup. Called from blocking context.
pub trait AccountPolicy: Send + Sync {
    fn is_frozen(&self, user_id: Uuid) -> Result<bool>;
}

/// Reads the `frozen` flag from the users table. Unknown users are not frozen.
pub struct DbAccountPolicy {
    db: Arc<Database>,
}

impl DbAccountPolicy {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl AccountPolicy for DbAccountPolicy {
    fn is_frozen(&self, user_id: Uuid) -> Result<bool> {
        Ok(self
            .db
            .get_user_by_id(user_id)?
            .is_some_and(|user| user.frozen))
    }
}
