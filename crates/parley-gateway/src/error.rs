use parley_types::events::EventKind;
use thiserror::Error;

/// Handler error taxonomy. Every variant ends up as a failure envelope sent
/// back to the originating caller; nothing here crashes the channel or the
/// process.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No valid identity bound to the channel.
    #[error("Unauthorised")]
    Unauthenticated,

    /// Authenticated, but not permitted for this resource.
    #[error("Not allowed")]
    NotAuthorized,

    /// Referenced conversation/message/user is absent.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Malformed or inconsistent payload.
    #[error("{0}")]
    Validation(String),

    /// Underlying persistence operation failed.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl GatewayError {
    /// Short caller-facing message. Store failures report a fixed per-event
    /// message and never leak internals; the cause goes to the log instead.
    pub fn envelope_msg(&self, kind: EventKind) -> String {
        match self {
            Self::Store(_) => store_failure_msg(kind).to_string(),
            other => other.to_string(),
        }
    }
}

fn store_failure_msg(kind: EventKind) -> &'static str {
    match kind {
        EventKind::GetConversations => "Failed to fetch conversations",
        EventKind::NewConversation => "Failed to create conversation",
        EventKind::NewMessage => "Failed to send the message",
        EventKind::GetMessages => "Failed to get the messages",
        EventKind::DeleteConversation => "Failed to delete conversation",
        EventKind::DeleteMessage => "Failed to delete message",
        EventKind::UpdateProfile => "Error updating profile",
        EventKind::GetContacts => "Failed to fetch contacts",
    }
}
