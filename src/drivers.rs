use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Driver, NewDriver};
use crate::schema::drivers;

pub const MAX_DRIVERS_PER_USER: i64 = 100;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver not found")]
    NotFound,
    #[error("{0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriverInput {
    pub full_name: String,
    pub dni: String,
}

impl DriverInput {
    /// Trims both fields and upper-cases the identity document.
    pub fn normalized(&self) -> Result<(String, String), DriverError> {
        let full_name = self.full_name.trim().to_string();
        let dni = self.dni.trim().to_ascii_uppercase();
        if full_name.is_empty() {
            return Err(DriverError::Validation("full_name is required".into()));
        }
        if dni.is_empty() {
            return Err(DriverError::Validation("dni is required".into()));
        }
        Ok((full_name, dni))
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = drivers)]
struct DriverChangeset<'a> {
    full_name: &'a str,
    dni: &'a str,
}

pub fn list(conn: &mut PgConnection, owner_id: Uuid) -> Result<Vec<Driver>, DriverError> {
    let rows = drivers::table
        .filter(drivers::user_id.eq(owner_id))
        .order((drivers::created_at.asc(), drivers::id.asc()))
        .limit(MAX_DRIVERS_PER_USER)
        .load::<Driver>(conn)?;
    Ok(rows)
}

pub fn create(
    conn: &mut PgConnection,
    owner_id: Uuid,
    input: &DriverInput,
) -> Result<Driver, DriverError> {
    let (full_name, dni) = input.normalized()?;
    let driver = diesel::insert_into(drivers::table)
        .values(&NewDriver {
            id: Uuid::new_v4(),
            user_id: owner_id,
            full_name,
            dni,
        })
        .get_result::<Driver>(conn)?;
    tracing::info!(user_id = %owner_id, driver_id = %driver.id, "driver added");
    Ok(driver)
}

pub fn update(
    conn: &mut PgConnection,
    owner_id: Uuid,
    driver_id: Uuid,
    input: &DriverInput,
) -> Result<Driver, DriverError> {
    let (full_name, dni) = input.normalized()?;
    diesel::update(
        drivers::table
            .filter(drivers::id.eq(driver_id))
            .filter(drivers::user_id.eq(owner_id)),
    )
    .set(&DriverChangeset {
        full_name: &full_name,
        dni: &dni,
    })
    .get_result::<Driver>(conn)
    .optional()?
    .ok_or(DriverError::NotFound)
}

pub fn delete(conn: &mut PgConnection, owner_id: Uuid, driver_id: Uuid) -> Result<(), DriverError> {
    let removed = diesel::delete(
        drivers::table
            .filter(drivers::id.eq(driver_id))
            .filter(drivers::user_id.eq(owner_id)),
    )
    .execute(conn)?;
    if removed == 0 {
        return Err(DriverError::NotFound);
    }
    tracing::info!(user_id = %owner_id, driver_id = %driver_id, "driver removed");
    Ok(())
}

/// The owner's driver with this id, if it still exists.
pub fn find_owned(
    conn: &mut PgConnection,
    owner_id: Uuid,
    driver_id: Uuid,
) -> Result<Option<Driver>, DriverError> {
    let driver = drivers::table
        .filter(drivers::id.eq(driver_id))
        .filter(drivers::user_id.eq(owner_id))
        .first::<Driver>(conn)
        .optional()?;
    Ok(driver)
}
