use std::collections::HashMap;

use tokio::task;
use uuid::Uuid;

use parley_types::events::{
    ConversationRef, DeleteMessagePayload, Envelope, NewConversationPayload, NewMessagePayload,
    ServerEvent,
};
use parley_types::models::{
    Contact, ConversationDeleted, ConversationKind, MessageDeleted, MessageView, Sender,
};

use crate::error::GatewayError;
use crate::handlers::{
    EventContext, HandlerResult, Outbound, contact_from, conversation_view, join_err, message_view,
    parse_id,
};

/// All conversations where the bound user participates and has not
/// soft-deleted, newest activity first, with last message and participant
/// profiles.
pub(crate) async fn get_conversations(ctx: &EventContext) -> HandlerResult {
    let db = ctx.db.clone();
    let uid = ctx.identity.sub.to_string();

    let (rows, participant_rows) = task::spawn_blocking(move || -> Result<_, GatewayError> {
        let rows = db.conversations_for_user(&uid)?;
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let participant_rows = db.participants_for_conversations(&ids)?;
        Ok((rows, participant_rows))
    })
    .await
    .map_err(join_err)??;

    let mut by_conversation: HashMap<String, Vec<Contact>> = HashMap::new();
    for row in participant_rows {
        let conversation_id = row.conversation_id.clone();
        by_conversation
            .entry(conversation_id)
            .or_default()
            .push(contact_from(row)?);
    }

    let views = rows
        .into_iter()
        .map(|row| {
            let participants = by_conversation.remove(&row.id).unwrap_or_default();
            conversation_view(row, participants, None)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(vec![Outbound::caller(ServerEvent::GetConversations(
        Envelope::ok(views),
    ))])
}

pub(crate) async fn new_conversation(
    ctx: &EventContext,
    payload: NewConversationPayload,
) -> HandlerResult {
    match payload.kind {
        ConversationKind::Direct => {
            if payload.participants.len() != 2 || payload.participants[0] == payload.participants[1]
            {
                return Err(GatewayError::Validation(
                    "A direct conversation takes exactly 2 distinct participants".into(),
                ));
            }
        }
        ConversationKind::Group => {
            if payload.participants.is_empty() {
                return Err(GatewayError::Validation(
                    "A group conversation needs at least one participant".into(),
                ));
            }
        }
    }

    // At most one direct conversation per pair: lookup before create.
    if payload.kind == ConversationKind::Direct {
        let db = ctx.db.clone();
        let a = payload.participants[0].to_string();
        let b = payload.participants[1].to_string();

        let existing = task::spawn_blocking(move || -> Result<_, GatewayError> {
            Ok(db.find_direct_conversation(&a, &b)?)
        })
        .await
        .map_err(join_err)??;

        if let Some(conversation_id) = existing {
            return revive_direct(ctx, conversation_id, &payload.participants).await;
        }
    }

    let conversation_id = Uuid::new_v4();
    let db = ctx.db.clone();
    let cid = conversation_id.to_string();
    let kind = payload.kind.as_str();
    let name = payload.name.clone().unwrap_or_default();
    let avatar = payload.avatar.clone().unwrap_or_default();
    let creator = ctx.identity.sub.to_string();
    let participant_ids: Vec<String> = payload.participants.iter().map(|p| p.to_string()).collect();

    let (row, participant_rows) = task::spawn_blocking(move || -> Result<_, GatewayError> {
        db.create_conversation(&cid, kind, &name, &avatar, &creator, &participant_ids)?;
        let row = db
            .get_conversation(&cid)?
            .ok_or(GatewayError::NotFound("Conversation"))?;
        let participant_rows = db.participants_for_conversations(&[cid.clone()])?;
        Ok((row, participant_rows))
    })
    .await
    .map_err(join_err)??;

    let participants = participant_rows
        .into_iter()
        .map(contact_from)
        .collect::<Result<Vec<_>, _>>()?;
    let view = conversation_view(row, participants, Some(true))?;

    // Every currently connected channel of each participant joins the new
    // room, then the populated conversation goes out to the room.
    for user_id in &payload.participants {
        for conn in ctx.registry.channels_for_user(*user_id).await {
            ctx.registry.join(conn, conversation_id).await;
        }
    }

    Ok(vec![Outbound::room(
        conversation_id,
        ServerEvent::NewConversation(Envelope::ok(view)),
    )])
}

/// Revival clears the deleted-for flag for BOTH participants even though
/// only one of them initiated the new direct conversation: a pair has at
/// most one direct conversation, and a new message must surface it on both
/// sides.
async fn revive_direct(
    ctx: &EventContext,
    conversation_id: String,
    participants: &[Uuid],
) -> HandlerResult {
    let db = ctx.db.clone();
    let cid = conversation_id.clone();
    let ids: Vec<String> = participants.iter().map(|p| p.to_string()).collect();

    let (row, participant_rows) = task::spawn_blocking(move || -> Result<_, GatewayError> {
        db.revive_for(&cid, &ids)?;
        let row = db
            .get_conversation(&cid)?
            .ok_or(GatewayError::NotFound("Conversation"))?;
        let participant_rows = db.participants_for_conversations(&[cid.clone()])?;
        Ok((row, participant_rows))
    })
    .await
    .map_err(join_err)??;

    let contacts = participant_rows
        .into_iter()
        .map(contact_from)
        .collect::<Result<Vec<_>, _>>()?;
    let view = conversation_view(row, contacts, Some(true))?;
    let room = view.id;

    // The participants' channels may have left the room's lifetime long ago
    // (revived conversation), so each connected channel is joined and
    // addressed directly instead of going through a room broadcast.
    let event = ServerEvent::NewConversation(Envelope::ok(view));
    let mut out = vec![Outbound::caller(event.clone())];
    for user_id in participants {
        for conn in ctx.registry.channels_for_user(*user_id).await {
            ctx.registry.join(conn, room).await;
            if conn != ctx.conn_id {
                out.push(Outbound::conn(conn, event.clone()));
            }
        }
    }

    Ok(out)
}

pub(crate) async fn new_message(ctx: &EventContext, payload: NewMessagePayload) -> HandlerResult {
    let message_id = Uuid::new_v4();
    let created_at = chrono::Utc::now();

    let db = ctx.db.clone();
    let cid = payload.conversation_id.to_string();
    let sender_id = ctx.identity.sub.to_string();
    let mid = message_id.to_string();
    let content = payload.content.clone();
    let attachment = payload.attachment.clone();
    let ts = created_at.to_rfc3339();

    task::spawn_blocking(move || -> Result<(), GatewayError> {
        if db.get_conversation(&cid)?.is_none() {
            return Err(GatewayError::NotFound("Conversation"));
        }
        if !db.is_participant(&cid, &sender_id)? {
            return Err(GatewayError::NotAuthorized);
        }
        db.insert_message(
            &mid,
            &cid,
            &sender_id,
            content.as_deref(),
            attachment.as_deref(),
            &ts,
        )?;
        db.set_last_message(&cid, &mid)?;
        Ok(())
    })
    .await
    .map_err(join_err)??;

    // Sender identity always comes from the bound connection, never from
    // payload fields.
    let view = MessageView {
        id: message_id,
        conversation_id: payload.conversation_id,
        sender: Sender {
            id: ctx.identity.sub,
            name: ctx.identity.name.clone(),
            avatar: ctx.identity.avatar.clone(),
        },
        content: payload.content,
        attachment: payload.attachment,
        created_at,
    };

    Ok(vec![Outbound::room(
        payload.conversation_id,
        ServerEvent::NewMessage(Envelope::ok(view)),
    )])
}

pub(crate) async fn get_messages(ctx: &EventContext, payload: ConversationRef) -> HandlerResult {
    let db = ctx.db.clone();
    let cid = payload.conversation_id.to_string();

    let rows = task::spawn_blocking(move || -> Result<_, GatewayError> {
        Ok(db.messages_for_conversation(&cid)?)
    })
    .await
    .map_err(join_err)??;

    let views = rows
        .into_iter()
        .map(message_view)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(vec![Outbound::caller(ServerEvent::GetMessages(
        Envelope::ok(views),
    ))])
}

pub(crate) async fn delete_conversation(
    ctx: &EventContext,
    payload: ConversationRef,
) -> HandlerResult {
    let db = ctx.db.clone();
    let cid = payload.conversation_id.to_string();
    let uid = ctx.identity.sub.to_string();

    let participant_ids = task::spawn_blocking(move || -> Result<Vec<String>, GatewayError> {
        if db.get_conversation(&cid)?.is_none() {
            return Err(GatewayError::NotFound("Conversation"));
        }
        let participant_ids = db.participant_ids(&cid)?;
        if !participant_ids.iter().any(|id| id == &uid) {
            return Err(GatewayError::NotAuthorized);
        }
        // Messages are gone for everyone; the conversation record is only
        // hidden for the requester.
        db.delete_conversation_messages(&cid)?;
        db.soft_delete_for(&cid, &uid)?;
        Ok(participant_ids)
    })
    .await
    .map_err(join_err)??;

    let deleted = ConversationDeleted {
        conversation_id: payload.conversation_id,
    };
    let mut out = vec![Outbound::caller(ServerEvent::DeleteConversation(
        Envelope::ok(deleted.clone()),
    ))];

    // Best-effort: one connected channel per other participant.
    for raw in participant_ids {
        let user_id = parse_id(&raw)?;
        if user_id == ctx.identity.sub {
            continue;
        }
        if let Some(conn) = ctx.registry.channels_for_user(user_id).await.into_iter().next() {
            out.push(Outbound::conn(
                conn,
                ServerEvent::DeleteConversation(Envelope::ok(deleted.clone())),
            ));
        }
    }

    Ok(out)
}

pub(crate) async fn delete_message(
    ctx: &EventContext,
    payload: DeleteMessagePayload,
) -> HandlerResult {
    let db = ctx.db.clone();
    let mid = payload.message_id.to_string();
    let uid = ctx.identity.sub.to_string();

    let row = task::spawn_blocking(move || -> Result<_, GatewayError> {
        let row = db
            .get_message(&mid)?
            .ok_or(GatewayError::NotFound("Message"))?;
        if row.sender_id != uid {
            return Err(GatewayError::NotAuthorized);
        }
        db.delete_message(&mid)?;
        Ok(row)
    })
    .await
    .map_err(join_err)??;

    // Broadcast to the room of the conversation the message actually belongs
    // to, not whatever the payload claims.
    let conversation_id = parse_id(&row.conversation_id)?;
    let deleted = MessageDeleted {
        conversation_id,
        message_id: payload.message_id,
    };

    Ok(vec![Outbound::room(
        conversation_id,
        ServerEvent::DeleteMessage(Envelope::ok(deleted)),
    )])
}
