use thiserror::Error;

pub type DeliveryResult<T> = Result<T, DeliveryError>;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Request is missing something it needs; nothing was read or written.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    #[error("persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),
}

/// Reasons a well-formed request is refused.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("account is frozen")]
    AccountFrozen,

    #[error("cannot do this with yourself")]
    SelfAction,

    #[error("conversation already exists")]
    ConversationExists,

    #[error("not a participant of this conversation")]
    NotParticipant,
}

impl DeliveryError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Policy(_) => 400,
            Self::NotFound(_) => 404,
            Self::Persistence(_) => 500,
        }
    }

    pub fn policy(&self) -> Option<PolicyViolation> {
        match self {
            Self::Policy(p) => Some(*p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_to_http_status() {
        assert_eq!(DeliveryError::Validation("x".into()).status_code(), 400);
        assert_eq!(DeliveryError::from(PolicyViolation::AccountFrozen).status_code(), 400);
        assert_eq!(DeliveryError::NotFound("conversation").status_code(), 404);
        assert_eq!(DeliveryError::from(anyhow::anyhow!("disk full")).status_code(), 500);
    }

    #[test]
    fn policy_message_is_transparent() {
        let err = DeliveryError::from(PolicyViolation::ConversationExists);
        assert_eq!(err.to_string(), "conversation already exists");
        assert_eq!(err.policy(), Some(PolicyViolation::ConversationExists));
    }
}
