use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use thiserror::Error;
use uuid::Uuid;

use crate::models::User;
use crate::schema::users;

/// Every credential failure collapses into `Invalid`; callers cannot tell an
/// unknown credential from a reused or revoked one.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session invalid, re-authenticate")]
    Invalid,
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

/// A credential minted at `epoch_at_issue` is live while the owner's stored
/// epoch has not moved past it.
pub fn is_current(epoch_at_issue: i64, stored_epoch: i64) -> bool {
    epoch_at_issue >= stored_epoch
}

pub fn current(conn: &mut PgConnection, user_id: Uuid) -> Result<i64, SessionError> {
    users::table
        .find(user_id)
        .select(users::token_version)
        .first::<i64>(conn)
        .optional()?
        .ok_or(SessionError::Invalid)
}

/// Single atomic increment; every credential issued before it stops validating.
pub fn bump(conn: &mut PgConnection, user_id: Uuid) -> Result<i64, SessionError> {
    let epoch = diesel::update(users::table.find(user_id))
        .set((
            users::token_version.eq(users::token_version + 1),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .returning(users::token_version)
        .get_result::<i64>(conn)
        .optional()?
        .ok_or(SessionError::Invalid)?;

    tracing::info!(user_id = %user_id, epoch, "session epoch bumped");
    Ok(epoch)
}

/// Loads the owner of a credential and checks it is approved and that the
/// credential's epoch is still current.
pub fn require_current(
    conn: &mut PgConnection,
    user_id: Uuid,
    epoch_at_issue: i64,
) -> Result<User, SessionError> {
    let user = users::table
        .find(user_id)
        .first::<User>(conn)
        .optional()?
        .ok_or(SessionError::Invalid)?;

    if !user.is_approved() {
        tracing::debug!(user_id = %user_id, "credential presented for unapproved user");
        return Err(SessionError::Invalid);
    }
    if !is_current(epoch_at_issue, user.token_version) {
        tracing::debug!(
            user_id = %user_id,
            epoch_at_issue,
            stored_epoch = user.token_version,
            "credential predates session epoch"
        );
        return Err(SessionError::Invalid);
    }
    Ok(user)
}
