use chrono::{Duration as ChronoDuration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use super::epoch::{self, SessionError};
use super::rotation::{generate_token, hash_token};
use crate::models::NewPasswordResetToken;
use crate::schema::{password_reset_tokens, users};

pub const RESET_TOKEN_TTL_MINUTES: i64 = 60;

pub fn issue(conn: &mut PgConnection, user_id: Uuid) -> Result<String, SessionError> {
    let token = generate_token();
    let row = NewPasswordResetToken {
        id: Uuid::new_v4(),
        user_id,
        token_hash: hash_token(&token),
        expires_at: Utc::now().naive_utc() + ChronoDuration::minutes(RESET_TOKEN_TTL_MINUTES),
    };

    diesel::insert_into(password_reset_tokens::table)
        .values(&row)
        .execute(conn)?;

    tracing::info!(user_id = %user_id, "issued password reset token");
    Ok(token)
}

/// Claims the token with one conditional update, then stores the new hash and
/// bumps the owner's epoch so every existing session ends.
pub fn redeem(
    conn: &mut PgConnection,
    raw_token: &str,
    new_password_hash: &str,
) -> Result<Uuid, SessionError> {
    conn.transaction::<_, SessionError, _>(|conn| {
        let now = Utc::now().naive_utc();
        let user_id = diesel::update(
            password_reset_tokens::table
                .filter(password_reset_tokens::token_hash.eq(hash_token(raw_token)))
                .filter(password_reset_tokens::used.eq(false))
                .filter(password_reset_tokens::expires_at.gt(now)),
        )
        .set((
            password_reset_tokens::used.eq(true),
            password_reset_tokens::used_at.eq(now),
        ))
        .returning(password_reset_tokens::user_id)
        .get_result::<Uuid>(conn)
        .optional()?
        .ok_or(SessionError::Invalid)?;

        diesel::update(users::table.find(user_id))
            .set((
                users::password_hash.eq(new_password_hash),
                users::updated_at.eq(now),
            ))
            .execute(conn)?;
        epoch::bump(conn, user_id)?;

        Ok(user_id)
    })
}

pub fn sweep_expired(
    conn: &mut PgConnection,
    now: chrono::NaiveDateTime,
) -> Result<usize, SessionError> {
    let removed = diesel::delete(
        password_reset_tokens::table.filter(password_reset_tokens::expires_at.le(now)),
    )
    .execute(conn)?;
    Ok(removed)
}
