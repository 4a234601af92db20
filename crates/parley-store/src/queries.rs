use crate::Database;
use crate::models::{
    ContactRow, ConversationRow, LastMessageRow, MessageRow, ParticipantRow, UserRow,
};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        password_hash: &str,
        name: &str,
        avatar: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, password, name, avatar, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, email, password_hash, name, avatar, now()],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Apply the provided profile fields, leaving omitted ones untouched.
    /// Returns the updated row, or None when the user does not exist.
    pub fn update_profile(
        &self,
        id: &str,
        name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users
                 SET name = COALESCE(?2, name), avatar = COALESCE(?3, avatar)
                 WHERE id = ?1",
                rusqlite::params![id, name, avatar],
            )?;
            query_user(conn, "id", id)
        })
    }

    /// Every other user's public profile. Deliberately unscoped by any
    /// relationship filter.
    pub fn list_contacts(&self, excluding_id: &str) -> Result<Vec<ContactRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, email, avatar FROM users WHERE id != ?1 ORDER BY name",
            )?;

            let rows = stmt
                .query_map([excluding_id], |row| {
                    Ok(ContactRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        avatar: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Conversations --

    pub fn create_conversation(
        &self,
        id: &str,
        kind: &str,
        name: &str,
        avatar: &str,
        created_by: &str,
        participants: &[String],
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let ts = now();

            tx.execute(
                "INSERT INTO conversations (id, kind, name, avatar, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![id, kind, name, avatar, created_by, ts],
            )?;

            for (position, user_id) in participants.iter().enumerate() {
                tx.execute(
                    "INSERT INTO conversation_participants (conversation_id, user_id, position)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![id, user_id, position as i64],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    /// The direct conversation whose participant set is exactly {a, b}.
    pub fn find_direct_conversation(&self, a: &str, b: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT c.id FROM conversations c
                 WHERE c.kind = 'direct'
                   AND EXISTS (SELECT 1 FROM conversation_participants
                               WHERE conversation_id = c.id AND user_id = ?1)
                   AND EXISTS (SELECT 1 FROM conversation_participants
                               WHERE conversation_id = c.id AND user_id = ?2)
                   AND (SELECT COUNT(*) FROM conversation_participants
                        WHERE conversation_id = c.id) = 2",
                [a, b],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{} WHERE c.id = ?1", CONVERSATION_SELECT))?;
            stmt.query_row([id], map_conversation).optional()
        })
    }

    /// Conversations where the user is a participant and not soft-deleted,
    /// newest activity first, each joined with its last message.
    pub fn conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{}
                 JOIN conversation_participants p
                   ON p.conversation_id = c.id AND p.user_id = ?1
                 LEFT JOIN conversation_deleted_for d
                   ON d.conversation_id = c.id AND d.user_id = ?1
                 WHERE d.user_id IS NULL
                 ORDER BY c.updated_at DESC",
                CONVERSATION_SELECT
            ))?;

            let rows = stmt
                .query_map([user_id], map_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Conversation ids for room joins at connect time (non-deleted only).
    pub fn conversation_ids_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.conversation_id
                 FROM conversation_participants p
                 LEFT JOIN conversation_deleted_for d
                   ON d.conversation_id = p.conversation_id AND d.user_id = ?1
                 WHERE p.user_id = ?1 AND d.user_id IS NULL",
            )?;

            let rows = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Batch-fetch participant profiles for a set of conversation ids,
    /// ordered by stored participant position.
    pub fn participants_for_conversations(
        &self,
        conversation_ids: &[String],
    ) -> Result<Vec<ParticipantRow>> {
        if conversation_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=conversation_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT p.conversation_id, u.id, u.name, u.email, u.avatar
                 FROM conversation_participants p
                 JOIN users u ON u.id = p.user_id
                 WHERE p.conversation_id IN ({})
                 ORDER BY p.conversation_id, p.position",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = conversation_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ParticipantRow {
                        conversation_id: row.get(0)?,
                        user_id: row.get(1)?,
                        name: row.get(2)?,
                        email: row.get(3)?,
                        avatar: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn participant_ids(&self, conversation_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM conversation_participants
                 WHERE conversation_id = ?1 ORDER BY position",
            )?;

            let rows = stmt
                .query_map([conversation_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn is_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM conversation_participants
                     WHERE conversation_id = ?1 AND user_id = ?2",
                    [conversation_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Remove the given users from the conversation's deleted-for set.
    pub fn revive_for(&self, conversation_id: &str, user_ids: &[String]) -> Result<()> {
        if user_ids.is_empty() {
            return Ok(());
        }

        self.with_conn_mut(|conn| {
            let placeholders: Vec<String> =
                (2..=user_ids.len() + 1).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "DELETE FROM conversation_deleted_for
                 WHERE conversation_id = ?1 AND user_id IN ({})",
                placeholders.join(", ")
            );

            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&conversation_id];
            params.extend(user_ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));

            conn.execute(&sql, params.as_slice())?;
            Ok(())
        })
    }

    /// Add the user to the conversation's deleted-for set (soft delete).
    pub fn soft_delete_for(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO conversation_deleted_for (conversation_id, user_id)
                 VALUES (?1, ?2)",
                [conversation_id, user_id],
            )?;
            Ok(())
        })
    }

    /// Point the conversation at its newest message and bump activity time.
    pub fn set_last_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE conversations SET last_message_id = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![conversation_id, message_id, now()],
            )?;
            Ok(())
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        content: Option<&str>,
        attachment: Option<&str>,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, attachment, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, conversation_id, sender_id, content, attachment, created_at],
            )?;
            Ok(())
        })
    }

    /// All messages of a conversation, newest first, sender profile joined
    /// in a single query.
    pub fn messages_for_conversation(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE m.conversation_id = ?1
                 ORDER BY m.created_at DESC, m.rowid DESC",
                MESSAGE_SELECT
            ))?;

            let rows = stmt
                .query_map([conversation_id], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{} WHERE m.id = ?1", MESSAGE_SELECT))?;
            stmt.query_row([id], map_message).optional()
        })
    }

    pub fn delete_message(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    /// Hard-delete every message of a conversation. Also clears the
    /// last-message pointer so it never dangles.
    pub fn delete_conversation_messages(&self, conversation_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM messages WHERE conversation_id = ?1",
                [conversation_id],
            )?;
            tx.execute(
                "UPDATE conversations SET last_message_id = NULL WHERE id = ?1",
                [conversation_id],
            )?;
            tx.commit()?;
            Ok(())
        })
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

const CONVERSATION_SELECT: &str =
    "SELECT c.id, c.kind, c.name, c.avatar, c.created_by, c.created_at, c.updated_at,
            m.id, m.sender_id, m.content, m.attachment, m.created_at
     FROM conversations c
     LEFT JOIN messages m ON m.id = c.last_message_id";

fn map_conversation(row: &rusqlite::Row) -> rusqlite::Result<ConversationRow> {
    let last_message_id: Option<String> = row.get(7)?;
    let last_message = match last_message_id {
        Some(id) => Some(LastMessageRow {
            id,
            sender_id: row.get(8)?,
            content: row.get(9)?,
            attachment: row.get(10)?,
            created_at: row.get(11)?,
        }),
        None => None,
    };

    Ok(ConversationRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        name: row.get(2)?,
        avatar: row.get(3)?,
        created_by: row.get(4)?,
        last_message,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const MESSAGE_SELECT: &str =
    "SELECT m.id, m.conversation_id, m.sender_id, u.name, u.avatar,
            m.content, m.attachment, m.created_at
     FROM messages m
     LEFT JOIN users u ON u.id = m.sender_id";

fn map_message(row: &rusqlite::Row) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row
            .get::<_, Option<String>>(3)?
            .unwrap_or_else(|| "unknown".to_string()),
        sender_avatar: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        content: row.get(5)?,
        attachment: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, email, password, name, avatar, created_at FROM users WHERE {} = ?1",
        column
    ))?;

    stmt.query_row([value], |row| {
        Ok(UserRow {
            id: row.get(0)?,
            email: row.get(1)?,
            password: row.get(2)?,
            name: row.get(3)?,
            avatar: row.get(4)?,
            created_at: row.get(5)?,
        })
    })
    .optional()
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

#[cfg(test)]
mod tests {
    use crate::Database;

    fn seed_user(db: &Database, id: &str, name: &str) {
        db.create_user(id, &format!("{}@example.com", name), "hash", name, "")
            .unwrap();
    }

    fn seed_direct(db: &Database, id: &str, a: &str, b: &str) {
        db.create_conversation(id, "direct", "", "", a, &[a.to_string(), b.to_string()])
            .unwrap();
    }

    #[test]
    fn soft_delete_hides_conversation_per_user() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1", "ada");
        seed_user(&db, "u2", "brendan");
        seed_direct(&db, "c1", "u1", "u2");

        assert_eq!(db.conversations_for_user("u1").unwrap().len(), 1);
        assert_eq!(db.conversations_for_user("u2").unwrap().len(), 1);

        db.soft_delete_for("c1", "u2").unwrap();
        assert_eq!(db.conversations_for_user("u1").unwrap().len(), 1);
        assert!(db.conversations_for_user("u2").unwrap().is_empty());
        assert!(db.conversation_ids_for_user("u2").unwrap().is_empty());

        // Revival brings it back
        db.revive_for("c1", &["u1".to_string(), "u2".to_string()])
            .unwrap();
        assert_eq!(db.conversations_for_user("u2").unwrap().len(), 1);
    }

    #[test]
    fn direct_lookup_matches_exact_pair_only() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1", "ada");
        seed_user(&db, "u2", "brendan");
        seed_user(&db, "u3", "carol");
        seed_direct(&db, "c1", "u1", "u2");
        db.create_conversation(
            "c2",
            "group",
            "team",
            "",
            "u1",
            &["u1".into(), "u2".into(), "u3".into()],
        )
        .unwrap();

        assert_eq!(
            db.find_direct_conversation("u1", "u2").unwrap(),
            Some("c1".to_string())
        );
        // Order of the pair does not matter
        assert_eq!(
            db.find_direct_conversation("u2", "u1").unwrap(),
            Some("c1".to_string())
        );
        // The group containing both users is not a direct match
        assert_eq!(db.find_direct_conversation("u1", "u3").unwrap(), None);
    }

    #[test]
    fn last_message_pointer_and_activity_ordering() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1", "ada");
        seed_user(&db, "u2", "brendan");
        seed_user(&db, "u3", "carol");
        seed_direct(&db, "c1", "u1", "u2");
        seed_direct(&db, "c2", "u1", "u3");

        // c2 is newer, so it lists first
        let listed = db.conversations_for_user("u1").unwrap();
        assert_eq!(listed[0].id, "c2");

        // A message in c1 makes it the most recently active
        db.insert_message(
            "m1",
            "c1",
            "u1",
            Some("hi"),
            None,
            &chrono::Utc::now().to_rfc3339(),
        )
        .unwrap();
        db.set_last_message("c1", "m1").unwrap();

        let listed = db.conversations_for_user("u1").unwrap();
        assert_eq!(listed[0].id, "c1");
        let last = listed[0].last_message.as_ref().unwrap();
        assert_eq!(last.id, "m1");
        assert_eq!(last.content.as_deref(), Some("hi"));
    }

    #[test]
    fn conversation_message_purge_is_scoped() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1", "ada");
        seed_user(&db, "u2", "brendan");
        seed_direct(&db, "c1", "u1", "u2");
        db.create_conversation("c2", "group", "team", "", "u1", &["u1".into(), "u2".into()])
            .unwrap();
        let ts = chrono::Utc::now().to_rfc3339();
        db.insert_message("m1", "c1", "u1", Some("a"), None, &ts).unwrap();
        db.insert_message("m2", "c1", "u2", Some("b"), None, &ts).unwrap();
        db.insert_message("m3", "c2", "u1", Some("c"), None, &ts).unwrap();
        db.set_last_message("c1", "m2").unwrap();

        db.delete_conversation_messages("c1").unwrap();

        assert!(db.messages_for_conversation("c1").unwrap().is_empty());
        assert_eq!(db.messages_for_conversation("c2").unwrap().len(), 1);
        // Pointer no longer dangles
        assert!(db.get_conversation("c1").unwrap().unwrap().last_message.is_none());
    }

    #[test]
    fn messages_list_newest_first_with_sender_profile() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1", "ada");
        seed_user(&db, "u2", "brendan");
        seed_direct(&db, "c1", "u1", "u2");
        db.insert_message("m1", "c1", "u1", Some("first"), None, "2026-01-01T00:00:00+00:00")
            .unwrap();
        db.insert_message("m2", "c1", "u2", Some("second"), None, "2026-01-01T00:00:05+00:00")
            .unwrap();

        let messages = db.messages_for_conversation("c1").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "m2");
        assert_eq!(messages[0].sender_name, "brendan");
        assert_eq!(messages[1].id, "m1");
        assert_eq!(messages[1].sender_name, "ada");
    }

    #[test]
    fn profile_update_applies_only_provided_fields() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1", "ada");

        let updated = db
            .update_profile("u1", None, Some("https://cdn/avatar.png"))
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "ada");
        assert_eq!(updated.avatar, "https://cdn/avatar.png");

        assert!(db.update_profile("missing", Some("x"), None).unwrap().is_none());
    }

    #[test]
    fn contacts_exclude_the_caller() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1", "ada");
        seed_user(&db, "u2", "brendan");
        seed_user(&db, "u3", "carol");

        let contacts = db.list_contacts("u1").unwrap();
        let ids: Vec<&str> = contacts.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["u2", "u3"]);
    }
}
