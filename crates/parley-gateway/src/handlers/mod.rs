pub mod chat;
pub mod user;

use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use parley_store::Database;
use parley_store::models::{ConversationRow, MessageRow, ParticipantRow};
use parley_types::events::{ClientEvent, ServerEvent};
use parley_types::models::{Contact, ConversationView, LastMessage, MessageView, Sender};
use parley_types::token::Claims;

use crate::error::GatewayError;
use crate::registry::{ConnId, Registry, RoomId};

/// Everything a handler gets to work with: store handle, connection
/// registry, the identity bound at connect time, and the channel the event
/// arrived on. Passed explicitly — handlers never reach for ambient state.
pub struct EventContext {
    pub db: Arc<Database>,
    pub registry: Registry,
    pub identity: Claims,
    pub conn_id: ConnId,
    pub jwt_secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// The channel the inbound event arrived on.
    Caller,
    /// One specific channel.
    Conn(ConnId),
    /// Every live channel of a user.
    User(Uuid),
    /// Every channel currently joined to a room.
    Room(RoomId),
}

/// One outbound event plus where to send it. Handlers return these instead
/// of writing to sockets themselves.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: Recipient,
    pub event: ServerEvent,
}

impl Outbound {
    pub fn caller(event: ServerEvent) -> Self {
        Self {
            to: Recipient::Caller,
            event,
        }
    }

    pub fn conn(conn_id: ConnId, event: ServerEvent) -> Self {
        Self {
            to: Recipient::Conn(conn_id),
            event,
        }
    }

    pub fn user(user_id: Uuid, event: ServerEvent) -> Self {
        Self {
            to: Recipient::User(user_id),
            event,
        }
    }

    pub fn room(room: RoomId, event: ServerEvent) -> Self {
        Self {
            to: Recipient::Room(room),
            event,
        }
    }
}

pub type HandlerResult = Result<Vec<Outbound>, GatewayError>;

/// Route one inbound event to its handler. Any handler error becomes a
/// single failure envelope addressed back to the caller, so the caller
/// always receives a response for the event it sent.
pub async fn dispatch(ctx: &EventContext, event: ClientEvent) -> Vec<Outbound> {
    let kind = event.kind();
    match route(ctx, event).await {
        Ok(out) => out,
        Err(err) => {
            warn!("{} failed for {}: {}", kind.name(), ctx.identity.sub, err);
            vec![Outbound::caller(ServerEvent::failure(
                kind,
                err.envelope_msg(kind),
            ))]
        }
    }
}

async fn route(ctx: &EventContext, event: ClientEvent) -> HandlerResult {
    match event {
        ClientEvent::GetConversations => chat::get_conversations(ctx).await,
        ClientEvent::NewConversation(p) => chat::new_conversation(ctx, p).await,
        ClientEvent::NewMessage(p) => chat::new_message(ctx, p).await,
        ClientEvent::GetMessages(p) => chat::get_messages(ctx, p).await,
        ClientEvent::DeleteConversation(p) => chat::delete_conversation(ctx, p).await,
        ClientEvent::DeleteMessage(p) => chat::delete_message(ctx, p).await,
        ClientEvent::UpdateProfile(p) => user::update_profile(ctx, p).await,
        ClientEvent::GetContacts => user::get_contacts(ctx).await,
    }
}

// -- Row-to-view helpers --
//
// Store rows carry TEXT ids and timestamps; a row that fails to parse is
// treated as a store failure, not a caller mistake.

pub(crate) fn parse_id(raw: &str) -> Result<Uuid, GatewayError> {
    raw.parse()
        .map_err(|e| GatewayError::Store(anyhow!("corrupt id '{}': {}", raw, e)))
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, GatewayError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| GatewayError::Store(anyhow!("corrupt timestamp '{}': {}", raw, e)))
}

pub(crate) fn contact_from(row: ParticipantRow) -> Result<Contact, GatewayError> {
    Ok(Contact {
        id: parse_id(&row.user_id)?,
        name: row.name,
        email: row.email,
        avatar: row.avatar,
    })
}

pub(crate) fn conversation_view(
    row: ConversationRow,
    participants: Vec<Contact>,
    is_new: Option<bool>,
) -> Result<ConversationView, GatewayError> {
    let last_message = row
        .last_message
        .map(|m| -> Result<LastMessage, GatewayError> {
            Ok(LastMessage {
                id: parse_id(&m.id)?,
                sender_id: parse_id(&m.sender_id)?,
                content: m.content,
                attachment: m.attachment,
                created_at: parse_timestamp(&m.created_at)?,
            })
        })
        .transpose()?;

    Ok(ConversationView {
        id: parse_id(&row.id)?,
        kind: row
            .kind
            .parse()
            .map_err(|e: String| GatewayError::Store(anyhow!(e)))?,
        name: row.name,
        avatar: row.avatar,
        created_by: row.created_by.as_deref().map(parse_id).transpose()?,
        participants,
        last_message,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
        is_new,
    })
}

pub(crate) fn message_view(row: MessageRow) -> Result<MessageView, GatewayError> {
    Ok(MessageView {
        id: parse_id(&row.id)?,
        conversation_id: parse_id(&row.conversation_id)?,
        sender: Sender {
            id: parse_id(&row.sender_id)?,
            name: row.sender_name,
            avatar: row.sender_avatar,
        },
        content: row.content,
        attachment: row.attachment,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

pub(crate) fn join_err(e: tokio::task::JoinError) -> GatewayError {
    GatewayError::Store(anyhow!("blocking task join error: {}", e))
}
