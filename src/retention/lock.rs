use std::time::Duration;

use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{Double, Varchar};
use thiserror::Error;

use crate::models::RetentionLockRow;
use crate::schema::retention_locks;

pub const RETENTION_LOCK_NAME: &str = "retention_job";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

/// Claims the named lock for `owner_token` when it is free or its previous
/// holder let it expire. One conditional upsert; expiry is judged against the
/// database clock so replicas with skewed clocks agree. Never waits.
pub fn try_acquire(
    conn: &mut PgConnection,
    name: &str,
    owner_token: &str,
    ttl: Duration,
) -> Result<bool, LockError> {
    let claimed = diesel::sql_query(
        "INSERT INTO retention_locks (name, held, holder, acquired_at, expires_at) \
         VALUES ($1, TRUE, $2, NOW(), NOW() + make_interval(secs => $3)) \
         ON CONFLICT (name) DO UPDATE \
         SET held = TRUE, \
             holder = EXCLUDED.holder, \
             acquired_at = EXCLUDED.acquired_at, \
             expires_at = EXCLUDED.expires_at \
         WHERE retention_locks.held = FALSE \
            OR retention_locks.expires_at IS NULL \
            OR retention_locks.expires_at <= NOW()",
    )
    .bind::<Varchar, _>(name)
    .bind::<Varchar, _>(owner_token)
    .bind::<Double, _>(ttl.as_secs_f64())
    .execute(conn)?;

    Ok(claimed == 1)
}

/// Gives the lock up if `owner_token` still holds it. A holder whose lease
/// already passed to someone else releases nothing.
pub fn release(conn: &mut PgConnection, name: &str, owner_token: &str) -> Result<bool, LockError> {
    let released = diesel::update(
        retention_locks::table
            .filter(retention_locks::name.eq(name))
            .filter(retention_locks::holder.eq(owner_token))
            .filter(retention_locks::held.eq(true)),
    )
    .set((
        retention_locks::held.eq(false),
        retention_locks::holder.eq(None::<String>),
        retention_locks::expires_at.eq(None::<chrono::NaiveDateTime>),
    ))
    .execute(conn)?;

    Ok(released == 1)
}

pub fn inspect(conn: &mut PgConnection, name: &str) -> Result<Option<RetentionLockRow>, LockError> {
    let row = retention_locks::table
        .find(name)
        .first::<RetentionLockRow>(conn)
        .optional()?;
    Ok(row)
}
