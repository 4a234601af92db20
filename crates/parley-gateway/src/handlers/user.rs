use tokio::task;

use parley_types::events::{Envelope, ServerEvent, UpdateProfilePayload};
use parley_types::models::{Contact, ProfileUpdated};
use parley_types::token::issue_token;

use crate::error::GatewayError;
use crate::handlers::{EventContext, HandlerResult, Outbound, join_err, parse_id};

/// Updates the identity record and reissues a credential token carrying the
/// new profile fields, so the client's cached identity stays consistent with
/// its token.
pub(crate) async fn update_profile(
    ctx: &EventContext,
    payload: UpdateProfilePayload,
) -> HandlerResult {
    let db = ctx.db.clone();
    let uid = ctx.identity.sub.to_string();
    let name = payload.name.clone();
    let avatar = payload.avatar.clone();

    let row = task::spawn_blocking(move || -> Result<_, GatewayError> {
        Ok(db.update_profile(&uid, name.as_deref(), avatar.as_deref())?)
    })
    .await
    .map_err(join_err)??
    .ok_or(GatewayError::NotFound("User"))?;

    let user_id = parse_id(&row.id)?;
    let token = issue_token(&ctx.jwt_secret, user_id, &row.email, &row.name, &row.avatar)?;

    Ok(vec![Outbound::caller(ServerEvent::UpdateProfile(
        Envelope::ok_with_msg(ProfileUpdated { token }, "Profile updated successfully"),
    ))])
}

/// Every other user's public profile fields. Deliberately unscoped by any
/// relationship filter.
pub(crate) async fn get_contacts(ctx: &EventContext) -> HandlerResult {
    let db = ctx.db.clone();
    let uid = ctx.identity.sub.to_string();

    let rows = task::spawn_blocking(move || -> Result<_, GatewayError> {
        Ok(db.list_contacts(&uid)?)
    })
    .await
    .map_err(join_err)??;

    let contacts = rows
        .into_iter()
        .map(|row| {
            Ok(Contact {
                id: parse_id(&row.id)?,
                name: row.name,
                email: row.email,
                avatar: row.avatar,
            })
        })
        .collect::<Result<Vec<_>, GatewayError>>()?;

    Ok(vec![Outbound::caller(ServerEvent::GetContacts(
        Envelope::ok(contacts),
    ))])
}
