use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    Contact, ConversationDeleted, ConversationKind, ConversationView, MessageDeleted, MessageView,
    ProfileUpdated,
};

/// Response envelope carried in every outbound payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            msg: None,
        }
    }

    pub fn ok_with_msg(data: T, msg: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            msg: Some(msg.into()),
        }
    }

    pub fn fail(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            msg: Some(msg.into()),
        }
    }
}

/// Events sent FROM client TO server: `{"event": <name>, "payload": {...}}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum ClientEvent {
    GetConversations,
    NewConversation(NewConversationPayload),
    NewMessage(NewMessagePayload),
    GetMessages(ConversationRef),
    DeleteConversation(ConversationRef),
    DeleteMessage(DeleteMessagePayload),
    UpdateProfile(UpdateProfilePayload),
    GetContacts,
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::GetConversations => EventKind::GetConversations,
            Self::NewConversation(_) => EventKind::NewConversation,
            Self::NewMessage(_) => EventKind::NewMessage,
            Self::GetMessages(_) => EventKind::GetMessages,
            Self::DeleteConversation(_) => EventKind::DeleteConversation,
            Self::DeleteMessage(_) => EventKind::DeleteMessage,
            Self::UpdateProfile(_) => EventKind::UpdateProfile,
            Self::GetContacts => EventKind::GetContacts,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversationPayload {
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub participants: Vec<Uuid>,
    pub name: Option<String>,
    pub avatar: Option<String>,
}

/// Sender identity is resolved server-side from the authenticated
/// connection; any sender fields in the raw payload are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub conversation_id: Uuid,
    pub content: Option<String>,
    pub attachment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessagePayload {
    pub conversation_id: Uuid,
    pub message_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateProfilePayload {
    pub name: Option<String>,
    pub avatar: Option<String>,
}

/// Event identifier, decoupled from any payload. Used to address the
/// failure envelope back to the caller when a payload fails to parse or a
/// handler errors out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    GetConversations,
    NewConversation,
    NewMessage,
    GetMessages,
    DeleteConversation,
    DeleteMessage,
    UpdateProfile,
    GetContacts,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::GetConversations => "getConversations",
            Self::NewConversation => "newConversation",
            Self::NewMessage => "newMessage",
            Self::GetMessages => "getMessages",
            Self::DeleteConversation => "deleteConversation",
            Self::DeleteMessage => "deleteMessage",
            Self::UpdateProfile => "updateProfile",
            Self::GetContacts => "getContacts",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "getConversations" => Ok(Self::GetConversations),
            "newConversation" => Ok(Self::NewConversation),
            "newMessage" => Ok(Self::NewMessage),
            "getMessages" => Ok(Self::GetMessages),
            "deleteConversation" => Ok(Self::DeleteConversation),
            "deleteMessage" => Ok(Self::DeleteMessage),
            "updateProfile" => Ok(Self::UpdateProfile),
            "getContacts" => Ok(Self::GetContacts),
            _ => Err(()),
        }
    }
}

/// Events sent FROM server TO client. Every payload is an envelope, so the
/// caller always gets a `{success, data|msg}` shape for the event it sent.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum ServerEvent {
    GetConversations(Envelope<Vec<ConversationView>>),
    NewConversation(Envelope<ConversationView>),
    NewMessage(Envelope<MessageView>),
    GetMessages(Envelope<Vec<MessageView>>),
    DeleteConversation(Envelope<ConversationDeleted>),
    DeleteMessage(Envelope<MessageDeleted>),
    UpdateProfile(Envelope<ProfileUpdated>),
    GetContacts(Envelope<Vec<Contact>>),
}

impl ServerEvent {
    /// Failure envelope addressed to the same event name the caller sent.
    pub fn failure(kind: EventKind, msg: impl Into<String>) -> Self {
        match kind {
            EventKind::GetConversations => Self::GetConversations(Envelope::fail(msg)),
            EventKind::NewConversation => Self::NewConversation(Envelope::fail(msg)),
            EventKind::NewMessage => Self::NewMessage(Envelope::fail(msg)),
            EventKind::GetMessages => Self::GetMessages(Envelope::fail(msg)),
            EventKind::DeleteConversation => Self::DeleteConversation(Envelope::fail(msg)),
            EventKind::DeleteMessage => Self::DeleteMessage(Envelope::fail(msg)),
            EventKind::UpdateProfile => Self::UpdateProfile(Envelope::fail(msg)),
            EventKind::GetContacts => Self::GetContacts(Envelope::fail(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_parses_unit_variant_without_payload() {
        let event: ClientEvent = serde_json::from_str(r#"{"event":"getConversations"}"#).unwrap();
        assert_eq!(event.kind(), EventKind::GetConversations);
    }

    #[test]
    fn client_event_ignores_client_supplied_sender() {
        let raw = r#"{
            "event": "newMessage",
            "payload": {
                "conversationId": "7f3b2a90-1234-4cde-9f00-aaaaaaaaaaaa",
                "content": "hi",
                "sender": {"id": "00000000-0000-0000-0000-000000000000", "name": "spoof", "avatar": ""}
            }
        }"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::NewMessage(p) => assert_eq!(p.content.as_deref(), Some("hi")),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn server_event_wraps_payload_in_envelope() {
        let event = ServerEvent::failure(EventKind::NewMessage, "Failed to send the message");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "newMessage");
        assert_eq!(json["payload"]["success"], false);
        assert_eq!(json["payload"]["msg"], "Failed to send the message");
        assert!(json["payload"].get("data").is_none());
    }

    #[test]
    fn event_kind_round_trips_through_name() {
        for kind in [
            EventKind::GetConversations,
            EventKind::NewConversation,
            EventKind::NewMessage,
            EventKind::GetMessages,
            EventKind::DeleteConversation,
            EventKind::DeleteMessage,
            EventKind::UpdateProfile,
            EventKind::GetContacts,
        ] {
            assert_eq!(kind.name().parse::<EventKind>().unwrap(), kind);
        }
    }
}
