//! Database row types, mapping directly to SQLite rows. Distinct from the
//! parley-types wire models to keep the store layer independent of
//! serialization concerns.

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub name: String,
    pub avatar: String,
    pub created_at: String,
}

pub struct ContactRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar: String,
}

pub struct ConversationRow {
    pub id: String,
    pub kind: String,
    pub name: String,
    pub avatar: String,
    pub created_by: Option<String>,
    pub last_message: Option<LastMessageRow>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct LastMessageRow {
    pub id: String,
    pub sender_id: String,
    pub content: Option<String>,
    pub attachment: Option<String>,
    pub created_at: String,
}

pub struct ParticipantRow {
    pub conversation_id: String,
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub avatar: String,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_avatar: String,
    pub content: Option<String>,
    pub attachment: Option<String>,
    pub created_at: String,
}
