use diesel::pg::PgConnection;
use diesel::prelude::*;
use thiserror::Error;
use uuid::Uuid;

use crate::schema::sheet_counters;

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

/// Hands out the next route-sheet number for `(owner, year)`.
///
/// One `INSERT .. ON CONFLICT DO UPDATE SET seq = seq + 1 RETURNING seq`
/// statement: the counter row is created with 1 on first use and incremented
/// in place afterwards, so concurrent callers always observe distinct values.
/// A number handed out here stays consumed even if the caller later fails to
/// persist its sheet.
pub fn allocate(conn: &mut PgConnection, owner_id: Uuid, year: i32) -> Result<i64, SequenceError> {
    let seq = diesel::insert_into(sheet_counters::table)
        .values((
            sheet_counters::user_id.eq(owner_id),
            sheet_counters::year.eq(year),
            sheet_counters::seq.eq(1_i64),
        ))
        .on_conflict((sheet_counters::user_id, sheet_counters::year))
        .do_update()
        .set(sheet_counters::seq.eq(sheet_counters::seq + 1_i64))
        .returning(sheet_counters::seq)
        .get_result::<i64>(conn)?;

    Ok(seq)
}

/// Last value handed out for `(owner, year)`, `0` when nothing was allocated.
pub fn current(conn: &mut PgConnection, owner_id: Uuid, year: i32) -> Result<i64, SequenceError> {
    let seq = sheet_counters::table
        .find((owner_id, year))
        .select(sheet_counters::seq)
        .first::<i64>(conn)
        .optional()?;
    Ok(seq.unwrap_or(0))
}
