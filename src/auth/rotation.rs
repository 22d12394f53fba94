use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::epoch::{self, SessionError};
use crate::models::{NewRefreshToken, RefreshToken, User};
use crate::schema::refresh_tokens;

/// Upper bound when walking `replaced_by` pointers.
const MAX_CHAIN_LENGTH: usize = 1024;

/// A freshly minted credential. `token` is only ever returned to the client;
/// the store keeps its hash.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub id: Uuid,
    pub token: String,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug)]
pub struct Rotation {
    pub user: User,
    pub credential: IssuedCredential,
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn issue(
    conn: &mut PgConnection,
    user_id: Uuid,
    epoch_at_issue: i64,
    ttl: ChronoDuration,
) -> Result<IssuedCredential, SessionError> {
    let now = Utc::now().naive_utc();
    let token = generate_token();
    let row = NewRefreshToken {
        id: Uuid::new_v4(),
        user_id,
        token_hash: hash_token(&token),
        epoch_at_issue,
        issued_at: now,
        expires_at: now + ttl,
    };

    diesel::insert_into(refresh_tokens::table)
        .values(&row)
        .execute(conn)?;

    Ok(IssuedCredential {
        id: row.id,
        token,
        expires_at: row.expires_at,
    })
}

/// One-time use: the presented credential is claimed by a single conditional
/// update, so of two concurrent rotations with the same token only one
/// matches. The claim commits on its own; a later epoch failure still leaves
/// the credential spent.
pub fn rotate(
    conn: &mut PgConnection,
    raw_token: &str,
    ttl: ChronoDuration,
) -> Result<Rotation, SessionError> {
    let now = Utc::now().naive_utc();
    let hashed = hash_token(raw_token);

    let claimed = diesel::update(
        refresh_tokens::table
            .filter(refresh_tokens::token_hash.eq(&hashed))
            .filter(refresh_tokens::revoked.eq(false))
            .filter(refresh_tokens::expires_at.gt(now)),
    )
    .set((
        refresh_tokens::revoked.eq(true),
        refresh_tokens::revoked_at.eq(now),
    ))
    .get_result::<RefreshToken>(conn)
    .optional()?;

    let Some(claimed) = claimed else {
        note_rejected_claim(conn, &hashed)?;
        return Err(SessionError::Invalid);
    };

    let user = epoch::require_current(conn, claimed.user_id, claimed.epoch_at_issue)?;

    let credential = conn.transaction::<_, SessionError, _>(|conn| {
        let credential = issue(conn, user.id, user.token_version, ttl)?;
        diesel::update(refresh_tokens::table.find(claimed.id))
            .set(refresh_tokens::replaced_by.eq(credential.id))
            .execute(conn)?;
        Ok(credential)
    })?;

    tracing::debug!(
        user_id = %user.id,
        previous = %claimed.id,
        next = %credential.id,
        "rotated refresh credential"
    );

    Ok(Rotation { user, credential })
}

/// Revokes a credential outright, e.g. on logout. Unknown or spent tokens are
/// a no-op.
pub fn revoke(conn: &mut PgConnection, raw_token: &str) -> Result<bool, SessionError> {
    let now = Utc::now().naive_utc();
    let updated = diesel::update(
        refresh_tokens::table
            .filter(refresh_tokens::token_hash.eq(hash_token(raw_token)))
            .filter(refresh_tokens::revoked.eq(false)),
    )
    .set((
        refresh_tokens::revoked.eq(true),
        refresh_tokens::revoked_at.eq(now),
    ))
    .execute(conn)?;
    Ok(updated == 1)
}

/// Follows `replaced_by` from `start` for forensic reconstruction.
pub fn chain(conn: &mut PgConnection, start: Uuid) -> Result<Vec<RefreshToken>, SessionError> {
    let mut links = Vec::new();
    let mut next = Some(start);

    while let Some(id) = next {
        if links.len() >= MAX_CHAIN_LENGTH {
            break;
        }
        let Some(link) = refresh_tokens::table
            .find(id)
            .first::<RefreshToken>(conn)
            .optional()?
        else {
            break;
        };
        next = link.replaced_by;
        links.push(link);
    }

    Ok(links)
}

pub fn sweep_expired(conn: &mut PgConnection, now: NaiveDateTime) -> Result<usize, SessionError> {
    let removed = diesel::delete(refresh_tokens::table.filter(refresh_tokens::expires_at.le(now)))
        .execute(conn)?;
    Ok(removed)
}

/// A failed claim is always reported as invalid. Reuse of a spent credential
/// is still worth a warning in the logs.
fn note_rejected_claim(conn: &mut PgConnection, hashed: &str) -> Result<(), SessionError> {
    let spent = refresh_tokens::table
        .filter(refresh_tokens::token_hash.eq(hashed))
        .filter(refresh_tokens::revoked.eq(true))
        .select((refresh_tokens::id, refresh_tokens::user_id))
        .first::<(Uuid, Uuid)>(conn)
        .optional()?;

    if let Some((id, user_id)) = spent {
        tracing::warn!(credential_id = %id, user_id = %user_id, "refresh credential replay rejected");
    }
    Ok(())
}
