use chrono::{DateTime, Datelike, NaiveDate, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::cache::{ArtifactCache, ArtifactKey, CacheError};
use crate::drivers::{self, DriverError};
use crate::localtime::{self, day_bounds_utc};
use crate::models::{
    format_sheet_number, Driver, LifecycleStatus, NewRouteSheet, PickupType, RouteSheet, User,
    Visibility,
};
use crate::pagination::{Cursor, InvalidCursor, Page};
use crate::policy::{self, PolicyError, TemplateConfig};
use crate::render::SheetRenderer;
use crate::retention::retention_dates;
use crate::schema::{drivers as drivers_table, route_sheets, users};
use crate::sequence::{self, SequenceError};

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 200;
pub const MAX_RANGE_SHEETS: i64 = 1000;
const MAX_REASON_LEN: usize = 500;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("route sheet not found")]
    NotFound,
    #[error("route sheet already annulled")]
    AlreadyAnnulled,
    #[error("sheet number {0} already taken")]
    NumberingConflict(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Cursor(#[from] InvalidCursor),
    #[error("render failed: {0}")]
    Render(anyhow::Error),
    #[error("database error: {0}")]
    Database(#[from] DieselError),
}

/// Trip details supplied by the driver. The sheet is closed on save.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewTrip {
    pub conductor_driver_id: Option<Uuid>,
    pub contractor_phone: Option<String>,
    pub contractor_email: Option<String>,
    pub prebooked_date: String,
    pub prebooked_locality: String,
    pub pickup_type: PickupType,
    pub flight_number: Option<String>,
    pub pickup_address: Option<String>,
    /// Offset-qualified, or naive and read as local time.
    #[serde(deserialize_with = "localtime::deserialize_pickup")]
    pub pickup_datetime: DateTime<Utc>,
    pub destination: String,
    pub passenger_info: String,
}

impl NewTrip {
    pub fn validate(self) -> Result<NewTrip, SheetError> {
        let trip = NewTrip {
            conductor_driver_id: self.conductor_driver_id,
            contractor_phone: trimmed(self.contractor_phone),
            contractor_email: trimmed(self.contractor_email),
            prebooked_date: self.prebooked_date.trim().to_string(),
            prebooked_locality: self.prebooked_locality.trim().to_string(),
            pickup_type: self.pickup_type,
            flight_number: trimmed(self.flight_number).map(|v| v.to_ascii_uppercase()),
            pickup_address: trimmed(self.pickup_address),
            pickup_datetime: self.pickup_datetime,
            destination: self.destination.trim().to_string(),
            passenger_info: self.passenger_info.trim().to_string(),
        };

        if trip.contractor_phone.is_none() && trip.contractor_email.is_none() {
            return Err(invalid("contractor phone or email is required"));
        }
        for (field, value) in [
            ("prebooked_date", &trip.prebooked_date),
            ("prebooked_locality", &trip.prebooked_locality),
            ("destination", &trip.destination),
            ("passenger_info", &trip.passenger_info),
        ] {
            if value.is_empty() {
                return Err(invalid(format!("{field} is required")));
            }
        }

        match trip.pickup_type {
            PickupType::Airport => match trip.flight_number.as_deref() {
                None => return Err(invalid("flight number is required for airport pickups")),
                Some(flight) if !is_flight_number(flight) => {
                    return Err(invalid("invalid flight number, expected e.g. VY1234"))
                }
                Some(_) => {}
            },
            PickupType::Other => {
                if trip.pickup_address.is_none() {
                    return Err(invalid("pickup address is required outside the airport"));
                }
            }
        }

        Ok(trip)
    }
}

/// Two letters followed by three or four digits.
fn is_flight_number(value: &str) -> bool {
    let bytes = value.as_bytes();
    (5..=6).contains(&bytes.len())
        && bytes[..2].iter().all(u8::is_ascii_uppercase)
        && bytes[2..].iter().all(u8::is_ascii_digit)
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn invalid(message: impl Into<String>) -> SheetError {
    SheetError::Validation(message.into())
}

/// Allocates the next number for the owner's current year, stamps retention
/// dates from the active policy and inserts the sheet.
pub fn create_sheet(
    conn: &mut PgConnection,
    owner_id: Uuid,
    trip: NewTrip,
) -> Result<RouteSheet, SheetError> {
    let trip = trip.validate()?;
    if let Some(driver_id) = trip.conductor_driver_id {
        if drivers::find_owned(conn, owner_id, driver_id)?.is_none() {
            return Err(invalid("conductor driver does not belong to this account"));
        }
    }
    let created_at = Utc::now();
    let year = created_at.year();

    let seq = sequence::allocate(conn, owner_id, year)?;
    let policy = policy::load_settings(conn)?.retention_policy()?;
    let dates = retention_dates(created_at, policy);

    let row = NewRouteSheet {
        id: Uuid::new_v4(),
        user_id: owner_id,
        year,
        seq,
        contractor_phone: trip.contractor_phone,
        contractor_email: trip.contractor_email,
        prebooked_date: trip.prebooked_date,
        prebooked_locality: trip.prebooked_locality,
        pickup_type: trip.pickup_type.as_str().to_string(),
        flight_number: trip.flight_number,
        pickup_address: trip.pickup_address,
        pickup_datetime: trip.pickup_datetime.naive_utc(),
        destination: trip.destination,
        passenger_info: trip.passenger_info,
        status: LifecycleStatus::Active.as_str().to_string(),
        visibility: Visibility::Visible.as_str().to_string(),
        created_at: created_at.naive_utc(),
        hide_at: dates.hide_at,
        purge_at: dates.purge_at,
        conductor_driver_id: trip.conductor_driver_id,
    };

    let sheet = match diesel::insert_into(route_sheets::table)
        .values(&row)
        .get_result::<RouteSheet>(conn)
    {
        Ok(sheet) => sheet,
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info)) => {
            let number = format_sheet_number(seq, year);
            tracing::error!(
                user_id = %owner_id,
                sheet_number = %number,
                constraint = info.constraint_name().unwrap_or("unknown"),
                "duplicate sheet number, counter atomicity violated"
            );
            return Err(SheetError::NumberingConflict(number));
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!(
        user_id = %owner_id,
        sheet_number = %sheet.sheet_number(),
        "route sheet created"
    );
    Ok(sheet)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SheetFilter {
    #[serde(default)]
    pub include_annulled: bool,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

impl SheetFilter {
    pub fn effective_limit(&self) -> i64 {
        clamp_limit(self.limit)
    }
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

/// Owner's visible sheets, newest pickup first. Hidden sheets never appear.
/// Calendar dates are local days.
pub fn list_visible(
    conn: &mut PgConnection,
    owner_id: Uuid,
    filter: &SheetFilter,
) -> Result<Page<RouteSheet>, SheetError> {
    let cursor = Cursor::parse_optional(filter.cursor.as_deref())?;
    let limit = filter.effective_limit();
    let mut query = route_sheets::table
        .filter(route_sheets::user_id.eq(owner_id))
        .filter(route_sheets::visibility.eq(Visibility::Visible.as_str()))
        .into_boxed();

    if !filter.include_annulled {
        query = query.filter(route_sheets::status.eq(LifecycleStatus::Active.as_str()));
    }
    if let Some(from) = filter.from_date {
        query = query.filter(route_sheets::pickup_datetime.ge(day_bounds_utc(from).0));
    }
    if let Some(to) = filter.to_date {
        query = query.filter(route_sheets::pickup_datetime.lt(day_bounds_utc(to).1));
    }
    if let Some(cursor) = cursor {
        query = query.filter(
            route_sheets::pickup_datetime.lt(cursor.at).or(route_sheets::pickup_datetime
                .eq(cursor.at)
                .and(route_sheets::id.lt(cursor.id))),
        );
    }

    let sheets = query
        .order((route_sheets::pickup_datetime.desc(), route_sheets::id.desc()))
        .limit(limit)
        .load::<RouteSheet>(conn)?;
    Ok(Page::from_rows(sheets, limit, |sheet| {
        Cursor::new(sheet.pickup_datetime, sheet.id)
    }))
}

pub fn get_visible(
    conn: &mut PgConnection,
    owner_id: Uuid,
    sheet_id: Uuid,
) -> Result<RouteSheet, SheetError> {
    route_sheets::table
        .find(sheet_id)
        .filter(route_sheets::user_id.eq(owner_id))
        .filter(route_sheets::visibility.eq(Visibility::Visible.as_str()))
        .first::<RouteSheet>(conn)
        .optional()?
        .ok_or(SheetError::NotFound)
}

/// Active, visible sheets whose pickup falls in `[from, to]`, in creation
/// order. Annulled sheets are never part of a range document.
pub fn list_for_range(
    conn: &mut PgConnection,
    owner_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<RouteSheet>, SheetError> {
    if to < from {
        return Err(invalid("to_date must not be before from_date"));
    }
    let sheets = route_sheets::table
        .filter(route_sheets::user_id.eq(owner_id))
        .filter(route_sheets::visibility.eq(Visibility::Visible.as_str()))
        .filter(route_sheets::status.eq(LifecycleStatus::Active.as_str()))
        .filter(route_sheets::pickup_datetime.ge(day_bounds_utc(from).0))
        .filter(route_sheets::pickup_datetime.lt(day_bounds_utc(to).1))
        .order(route_sheets::created_at.asc())
        .limit(MAX_RANGE_SHEETS)
        .load::<RouteSheet>(conn)?;
    Ok(sheets)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminSheetFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<LifecycleStatus>,
    pub visibility: Option<Visibility>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

/// A sheet with the holder it belongs to, for administrator listings.
#[derive(Debug, Clone)]
pub struct OwnedSheet {
    pub sheet: RouteSheet,
    pub user_email: String,
    pub user_name: String,
}

/// Every sheet regardless of visibility, newest first. Dates filter on the
/// local creation day.
pub fn list_all(
    conn: &mut PgConnection,
    filter: &AdminSheetFilter,
) -> Result<Page<OwnedSheet>, SheetError> {
    let cursor = Cursor::parse_optional(filter.cursor.as_deref())?;
    let limit = clamp_limit(filter.limit);
    let mut query = route_sheets::table
        .inner_join(users::table)
        .select((route_sheets::all_columns, users::email, users::full_name))
        .into_boxed();

    if let Some(user_id) = filter.user_id {
        query = query.filter(route_sheets::user_id.eq(user_id));
    }
    if let Some(status) = filter.status {
        query = query.filter(route_sheets::status.eq(status.as_str()));
    }
    if let Some(visibility) = filter.visibility {
        query = query.filter(route_sheets::visibility.eq(visibility.as_str()));
    }
    if let Some(from) = filter.from_date {
        query = query.filter(route_sheets::created_at.ge(day_bounds_utc(from).0));
    }
    if let Some(to) = filter.to_date {
        query = query.filter(route_sheets::created_at.lt(day_bounds_utc(to).1));
    }
    if let Some(cursor) = cursor {
        query = query.filter(
            route_sheets::created_at.lt(cursor.at).or(route_sheets::created_at
                .eq(cursor.at)
                .and(route_sheets::id.lt(cursor.id))),
        );
    }

    let rows = query
        .order((route_sheets::created_at.desc(), route_sheets::id.desc()))
        .limit(limit)
        .load::<(RouteSheet, String, String)>(conn)?;
    let rows = rows
        .into_iter()
        .map(|(sheet, user_email, user_name)| OwnedSheet {
            sheet,
            user_email,
            user_name,
        })
        .collect();
    Ok(Page::from_rows(rows, limit, |row: &OwnedSheet| {
        Cursor::new(row.sheet.created_at, row.sheet.id)
    }))
}

/// `Active -> Annulled` as one conditional update. The stale ACTIVE rendering
/// is dropped afterwards; the ANNULLED key is distinct so it cannot collide.
pub fn annul_sheet(
    conn: &mut PgConnection,
    cache: &ArtifactCache,
    owner_id: Uuid,
    sheet_id: Uuid,
    reason: Option<String>,
) -> Result<RouteSheet, SheetError> {
    let reason = trimmed(reason);
    if reason.as_ref().is_some_and(|r| r.chars().count() > MAX_REASON_LEN) {
        return Err(invalid(format!(
            "reason must be at most {MAX_REASON_LEN} characters"
        )));
    }

    let now = Utc::now().naive_utc();
    let annulled = diesel::update(
        route_sheets::table
            .filter(route_sheets::id.eq(sheet_id))
            .filter(route_sheets::user_id.eq(owner_id))
            .filter(route_sheets::status.eq(LifecycleStatus::Active.as_str())),
    )
    .set((
        route_sheets::status.eq(LifecycleStatus::Annulled.as_str()),
        route_sheets::annulled_at.eq(now),
        route_sheets::annul_reason.eq(reason),
    ))
    .get_result::<RouteSheet>(conn)
    .optional()?;

    let Some(sheet) = annulled else {
        let exists = route_sheets::table
            .find(sheet_id)
            .filter(route_sheets::user_id.eq(owner_id))
            .select(route_sheets::id)
            .first::<Uuid>(conn)
            .optional()?
            .is_some();
        return Err(if exists {
            SheetError::AlreadyAnnulled
        } else {
            SheetError::NotFound
        });
    };

    cache.invalidate(conn, sheet.id, Some(LifecycleStatus::Active))?;
    tracing::info!(
        user_id = %owner_id,
        sheet_number = %sheet.sheet_number(),
        "route sheet annulled"
    );
    Ok(sheet)
}

pub fn load_owner(conn: &mut PgConnection, owner_id: Uuid) -> Result<User, SheetError> {
    users::table
        .find(owner_id)
        .first::<User>(conn)
        .optional()?
        .ok_or(SheetError::NotFound)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

impl CacheOutcome {
    pub fn as_header(self) -> &'static str {
        match self {
            CacheOutcome::Hit => "HIT",
            CacheOutcome::Miss => "MISS",
        }
    }
}

#[derive(Debug)]
pub struct SheetDocument {
    pub bytes: Vec<u8>,
    pub outcome: CacheOutcome,
    pub filename: String,
}

/// Cached rendering of one sheet under the current template. On a miss the
/// renderer runs and the result is stored under the sheet's present status.
pub fn sheet_document(
    conn: &mut PgConnection,
    cache: &ArtifactCache,
    renderer: &dyn SheetRenderer,
    owner: &User,
    sheet: &RouteSheet,
) -> Result<SheetDocument, SheetError> {
    let template = policy::load_settings(conn)?.template();
    let key = ArtifactKey::new(sheet.id, template.version, sheet.lifecycle());
    let filename = format!("hoja_ruta_{:03}_{}.pdf", sheet.seq, sheet.year);

    if let Some(bytes) = cache.get(conn, key)? {
        return Ok(SheetDocument {
            bytes,
            outcome: CacheOutcome::Hit,
            filename,
        });
    }

    let driver = match sheet.conductor_driver_id {
        Some(driver_id) => drivers::find_owned(conn, owner.id, driver_id)?,
        None => None,
    };
    let bytes = renderer
        .render(sheet, owner, driver.as_ref(), &template)
        .map_err(SheetError::Render)?;
    cache.put(conn, key, &bytes)?;

    Ok(SheetDocument {
        bytes,
        outcome: CacheOutcome::Miss,
        filename,
    })
}

/// Every driver the owner has on file, to name the conductor of each sheet
/// in a range document.
pub fn load_drivers(conn: &mut PgConnection, owner_id: Uuid) -> Result<Vec<Driver>, SheetError> {
    let rows = drivers_table::table
        .filter(drivers_table::user_id.eq(owner_id))
        .load::<Driver>(conn)?;
    Ok(rows)
}

/// Range documents are rendered fresh every time and never cached.
pub fn range_document(
    renderer: &dyn SheetRenderer,
    owner: &User,
    drivers: &[Driver],
    sheets: &[RouteSheet],
    template: &TemplateConfig,
) -> Result<Vec<u8>, SheetError> {
    renderer
        .render_range(sheets, owner, drivers, template)
        .map_err(SheetError::Render)
}
