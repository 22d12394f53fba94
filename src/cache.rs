use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::upsert::excluded;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{LifecycleStatus, NewPdfCacheEntry};
use crate::schema::pdf_cache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

/// Identity of a cached rendering. A new template version or a status change
/// is a different key, never a new revision of the same entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub sheet_id: Uuid,
    pub template_version: i32,
    pub status: LifecycleStatus,
}

impl ArtifactKey {
    pub fn new(sheet_id: Uuid, template_version: i32, status: LifecycleStatus) -> Self {
        Self {
            sheet_id,
            template_version,
            status,
        }
    }
}

/// Rendered PDF bytes in the shared store. Purely an optimization: every
/// entry can be regenerated from the sheet and the current template.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactCache {
    ttl: ChronoDuration,
}

impl ArtifactCache {
    pub fn new(ttl_days: i64) -> Self {
        Self {
            ttl: ChronoDuration::days(ttl_days.max(1)),
        }
    }

    pub fn get(&self, conn: &mut PgConnection, key: ArtifactKey) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Utc::now().naive_utc();
        let bytes = pdf_cache::table
            .find((key.sheet_id, key.template_version, key.status.as_str()))
            .filter(pdf_cache::expires_at.gt(now))
            .select(pdf_cache::bytes)
            .first::<Vec<u8>>(conn)
            .optional()?;
        Ok(bytes)
    }

    /// Upsert on the full key; a concurrent writer of the same key simply
    /// overwrites with an identical rendering.
    pub fn put(&self, conn: &mut PgConnection, key: ArtifactKey, bytes: &[u8]) -> Result<(), CacheError> {
        let now = Utc::now().naive_utc();
        let entry = NewPdfCacheEntry {
            sheet_id: key.sheet_id,
            template_version: key.template_version,
            status: key.status.as_str(),
            bytes,
            created_at: now,
            expires_at: now + self.ttl,
        };

        diesel::insert_into(pdf_cache::table)
            .values(&entry)
            .on_conflict((pdf_cache::sheet_id, pdf_cache::template_version, pdf_cache::status))
            .do_update()
            .set((
                pdf_cache::bytes.eq(excluded(pdf_cache::bytes)),
                pdf_cache::created_at.eq(excluded(pdf_cache::created_at)),
                pdf_cache::expires_at.eq(excluded(pdf_cache::expires_at)),
            ))
            .execute(conn)?;
        Ok(())
    }

    /// Drops cached renderings of a sheet across all template versions,
    /// limited to one status when given.
    pub fn invalidate(
        &self,
        conn: &mut PgConnection,
        sheet_id: Uuid,
        status: Option<LifecycleStatus>,
    ) -> Result<usize, CacheError> {
        let removed = match status {
            Some(status) => diesel::delete(
                pdf_cache::table
                    .filter(pdf_cache::sheet_id.eq(sheet_id))
                    .filter(pdf_cache::status.eq(status.as_str())),
            )
            .execute(conn)?,
            None => diesel::delete(pdf_cache::table.filter(pdf_cache::sheet_id.eq(sheet_id)))
                .execute(conn)?,
        };
        Ok(removed)
    }

    pub fn expires_at(&self, created_at: NaiveDateTime) -> NaiveDateTime {
        created_at + self.ttl
    }
}

pub fn sweep_expired(conn: &mut PgConnection, now: NaiveDateTime) -> Result<usize, CacheError> {
    let removed = diesel::delete(pdf_cache::table.filter(pdf_cache::expires_at.le(now)))
        .execute(conn)?;
    Ok(removed)
}
