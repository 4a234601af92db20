use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims shared across parley-api (HTTP auth) and parley-gateway
/// (WebSocket handshake + profile-update token refresh). Canonical
/// definition lives here in parley-types to eliminate duplication.
///
/// The token carries the public profile so a client can render its own
/// identity without a round trip, and so the gateway can denormalize the
/// sender onto outgoing messages without re-fetching the user row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub name: String,
    pub avatar: String,
    pub exp: usize,
}

/// Tokens are valid for 30 days.
const TOKEN_TTL_DAYS: i64 = 30;

pub fn issue_token(
    secret: &str,
    user_id: Uuid,
    email: &str,
    name: &str,
    avatar: &str,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        name: name.to_string(),
        avatar: avatar.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

pub fn verify_token(secret: &str, token: &str) -> anyhow::Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_and_carries_profile() {
        let id = Uuid::new_v4();
        let token = issue_token("test-secret", id, "a@example.com", "Ada", "").unwrap();
        let claims = verify_token("test-secret", &token).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.email, "a@example.com");
        assert_eq!(claims.name, "Ada");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token("secret-a", Uuid::new_v4(), "a@example.com", "Ada", "").unwrap();
        assert!(verify_token("secret-b", &token).is_err());
    }
}
