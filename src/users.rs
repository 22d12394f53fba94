use chrono::{NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::epoch::{self, SessionError};
use crate::auth::password::hash_password;
use crate::drivers::{self, DriverError, DriverInput};
use crate::models::{Driver, NewUser, User, USER_STATUS_APPROVED, USER_STATUS_PENDING};
use crate::pagination::{Cursor, InvalidCursor, Page};
use crate::schema::users;

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("email already registered")]
    EmailTaken,
    #[error("user not found")]
    NotFound,
    #[error("user already approved")]
    AlreadyApproved,
    #[error("{0}")]
    Validation(String),
    #[error("password hashing failed: {0}")]
    Hash(anyhow::Error),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Cursor(#[from] InvalidCursor),
    #[error("database error: {0}")]
    Database(#[from] DieselError),
}

pub const MAX_PASSWORD_LEN: usize = 128;

#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub dni_cif: String,
    pub license_number: String,
    pub license_council: String,
    pub phone: String,
    pub vehicle_brand: String,
    pub vehicle_model: String,
    pub vehicle_plate: String,
    pub vehicle_license_number: Option<String>,
    #[serde(default)]
    pub drivers: Vec<DriverInput>,
}

/// Account view without password material.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub dni_cif: String,
    pub license_number: String,
    pub license_council: String,
    pub phone: String,
    pub vehicle_brand: String,
    pub vehicle_model: String,
    pub vehicle_plate: String,
    pub vehicle_license_number: Option<String>,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            dni_cif: user.dni_cif.clone(),
            license_number: user.license_number.clone(),
            license_council: user.license_council.clone(),
            phone: user.phone.clone(),
            vehicle_brand: user.vehicle_brand.clone(),
            vehicle_model: user.vehicle_model.clone(),
            vehicle_plate: user.vehicle_plate.clone(),
            vehicle_license_number: user.vehicle_license_number.clone(),
            status: user.status.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Administrator view of one account with its drivers.
#[derive(Debug, Clone, Serialize)]
pub struct UserDetail {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub drivers: Vec<Driver>,
}

/// Partial profile edit. Absent or blank fields keep their stored value;
/// email, status and password are not editable here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub dni_cif: Option<String>,
    pub license_number: Option<String>,
    pub license_council: Option<String>,
    pub phone: Option<String>,
    pub vehicle_brand: Option<String>,
    pub vehicle_model: Option<String>,
    pub vehicle_plate: Option<String>,
    pub vehicle_license_number: Option<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct ProfileChangeset {
    full_name: Option<String>,
    dni_cif: Option<String>,
    license_number: Option<String>,
    license_council: Option<String>,
    phone: Option<String>,
    vehicle_brand: Option<String>,
    vehicle_model: Option<String>,
    vehicle_plate: Option<String>,
    vehicle_license_number: Option<String>,
    updated_at: NaiveDateTime,
}

impl ProfileUpdate {
    fn changeset(&self) -> ProfileChangeset {
        ProfileChangeset {
            full_name: present(&self.full_name),
            dni_cif: present(&self.dni_cif).map(|v| v.to_ascii_uppercase()),
            license_number: present(&self.license_number),
            license_council: present(&self.license_council),
            phone: present(&self.phone),
            vehicle_brand: present(&self.vehicle_brand),
            vehicle_model: present(&self.vehicle_model),
            vehicle_plate: present(&self.vehicle_plate).map(|v| v.to_ascii_uppercase()),
            vehicle_license_number: present(&self.vehicle_license_number),
            updated_at: Utc::now().naive_utc(),
        }
    }
}

fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

pub fn check_password_strength(password: &str) -> Result<(), UserError> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LEN {
        return Err(UserError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if length > MAX_PASSWORD_LEN {
        return Err(UserError::Validation(format!(
            "password must be at most {MAX_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Creates the account and any drivers listed with it in one transaction.
pub fn register(
    conn: &mut PgConnection,
    registration: &Registration,
    status: &str,
) -> Result<User, UserError> {
    let email = normalize_email(&registration.email);
    if !email.contains('@') {
        return Err(UserError::Validation("a valid email is required".into()));
    }
    for (field, value) in [
        ("full_name", &registration.full_name),
        ("dni_cif", &registration.dni_cif),
        ("license_number", &registration.license_number),
        ("license_council", &registration.license_council),
        ("phone", &registration.phone),
        ("vehicle_brand", &registration.vehicle_brand),
        ("vehicle_model", &registration.vehicle_model),
        ("vehicle_plate", &registration.vehicle_plate),
    ] {
        if value.trim().is_empty() {
            return Err(UserError::Validation(format!("{field} is required")));
        }
    }
    check_password_strength(&registration.password)?;
    for driver in &registration.drivers {
        driver.normalized()?;
    }

    let row = NewUser {
        id: Uuid::new_v4(),
        email,
        password_hash: hash_password(&registration.password).map_err(UserError::Hash)?,
        full_name: registration.full_name.trim().to_string(),
        license_number: registration.license_number.trim().to_string(),
        vehicle_plate: registration.vehicle_plate.trim().to_ascii_uppercase(),
        status: status.to_string(),
        dni_cif: registration.dni_cif.trim().to_ascii_uppercase(),
        license_council: registration.license_council.trim().to_string(),
        phone: registration.phone.trim().to_string(),
        vehicle_brand: registration.vehicle_brand.trim().to_string(),
        vehicle_model: registration.vehicle_model.trim().to_string(),
        vehicle_license_number: present(&registration.vehicle_license_number),
    };

    let inserted = conn.transaction::<_, UserError, _>(|conn| {
        let user = diesel::insert_into(users::table)
            .values(&row)
            .get_result::<User>(conn)?;
        for driver in &registration.drivers {
            drivers::create(conn, user.id, driver)?;
        }
        Ok(user)
    });

    match inserted {
        Ok(user) => {
            tracing::info!(
                user_id = %user.id,
                status = %user.status,
                drivers = registration.drivers.len(),
                "user registered"
            );
            Ok(user)
        }
        Err(UserError::Database(DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            _,
        ))) => Err(UserError::EmailTaken),
        Err(err) => Err(err),
    }
}

pub fn find_by_email(conn: &mut PgConnection, email: &str) -> Result<Option<User>, UserError> {
    let user = users::table
        .filter(users::email.eq(normalize_email(email)))
        .first::<User>(conn)
        .optional()?;
    Ok(user)
}

pub fn find(conn: &mut PgConnection, user_id: Uuid) -> Result<User, UserError> {
    users::table
        .find(user_id)
        .first::<User>(conn)
        .optional()?
        .ok_or(UserError::NotFound)
}

/// `PENDING -> APPROVED` as one conditional update.
pub fn approve(conn: &mut PgConnection, user_id: Uuid) -> Result<User, UserError> {
    let approved = diesel::update(
        users::table
            .filter(users::id.eq(user_id))
            .filter(users::status.eq(USER_STATUS_PENDING)),
    )
    .set((
        users::status.eq(USER_STATUS_APPROVED),
        users::updated_at.eq(Utc::now().naive_utc()),
    ))
    .get_result::<User>(conn)
    .optional()?;

    match approved {
        Some(user) => {
            tracing::info!(user_id = %user.id, "user approved");
            Ok(user)
        }
        None => {
            find(conn, user_id)?;
            Err(UserError::AlreadyApproved)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserListFilter {
    pub status: Option<String>,
    /// Case-insensitive substring of name, email or DNI/CIF.
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

/// Newest accounts first, paged by `(created_at, id)`.
pub fn list(conn: &mut PgConnection, filter: &UserListFilter) -> Result<Page<UserProfile>, UserError> {
    let cursor = Cursor::parse_optional(filter.cursor.as_deref())?;
    let limit = filter.limit.unwrap_or(50).clamp(1, 200);
    let mut query = users::table.into_boxed();

    if let Some(status) = filter.status.as_deref() {
        query = query.filter(users::status.eq(status.to_ascii_uppercase()));
    }
    if let Some(search) = present(&filter.search) {
        let pattern = format!("%{}%", escape_like(&search));
        query = query.filter(
            users::full_name
                .ilike(pattern.clone())
                .or(users::email.ilike(pattern.clone()))
                .or(users::dni_cif.ilike(pattern)),
        );
    }
    if let Some(cursor) = cursor {
        query = query.filter(
            users::created_at
                .lt(cursor.at)
                .or(users::created_at.eq(cursor.at).and(users::id.lt(cursor.id))),
        );
    }

    let rows = query
        .order((users::created_at.desc(), users::id.desc()))
        .limit(limit)
        .load::<User>(conn)?;
    Ok(Page::from_rows(rows, limit, |user| Cursor::new(user.created_at, user.id))
        .map(|user| UserProfile::from(&user)))
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

pub fn detail(conn: &mut PgConnection, user_id: Uuid) -> Result<UserDetail, UserError> {
    let user = find(conn, user_id)?;
    let drivers = drivers::list(conn, user.id)?;
    Ok(UserDetail {
        profile: UserProfile::from(&user),
        drivers,
    })
}

pub fn update_profile(
    conn: &mut PgConnection,
    user_id: Uuid,
    update: &ProfileUpdate,
) -> Result<User, UserError> {
    diesel::update(users::table.find(user_id))
        .set(&update.changeset())
        .get_result::<User>(conn)
        .optional()?
        .ok_or(UserError::NotFound)
}

/// Stores a new password hash. Callers bump the session epoch alongside.
pub fn set_password(
    conn: &mut PgConnection,
    user_id: Uuid,
    password_hash: &str,
) -> Result<(), UserError> {
    let updated = diesel::update(users::table.find(user_id))
        .set((
            users::password_hash.eq(password_hash),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    if updated == 0 {
        return Err(UserError::NotFound);
    }
    Ok(())
}

/// Stores the new hash and moves the session epoch in one transaction, so a
/// changed password never leaves earlier sessions alive.
pub fn replace_password(
    conn: &mut PgConnection,
    user_id: Uuid,
    password_hash: &str,
) -> Result<i64, UserError> {
    conn.transaction::<_, UserError, _>(|conn| {
        set_password(conn, user_id, password_hash)?;
        Ok(epoch::bump(conn, user_id)?)
    })
}
