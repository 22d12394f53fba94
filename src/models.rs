use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::*;

pub const USER_STATUS_PENDING: &str = "PENDING";
pub const USER_STATUS_APPROVED: &str = "APPROVED";

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub license_number: String,
    pub vehicle_plate: String,
    pub status: String,
    pub token_version: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub dni_cif: String,
    pub license_council: String,
    pub phone: String,
    pub vehicle_brand: String,
    pub vehicle_model: String,
    pub vehicle_license_number: Option<String>,
}

impl User {
    pub fn is_approved(&self) -> bool {
        self.status == USER_STATUS_APPROVED
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub license_number: String,
    pub vehicle_plate: String,
    pub status: String,
    pub dni_cif: String,
    pub license_council: String,
    pub phone: String,
    pub vehicle_brand: String,
    pub vehicle_model: String,
    pub vehicle_license_number: Option<String>,
}

/// Additional person allowed to drive under a holder's licence.
#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(table_name = drivers)]
#[diesel(belongs_to(User))]
pub struct Driver {
    pub id: Uuid,
    pub user_id: Uuid,
    pub full_name: String,
    pub dni: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = drivers)]
pub struct NewDriver {
    pub id: Uuid,
    pub user_id: Uuid,
    pub full_name: String,
    pub dni: String,
}

/// User-driven axis of a route sheet. Only ever moves `Active -> Annulled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LifecycleStatus {
    Active,
    Annulled,
}

impl LifecycleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleStatus::Active => "ACTIVE",
            LifecycleStatus::Annulled => "ANNULLED",
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ACTIVE" => Ok(LifecycleStatus::Active),
            "ANNULLED" => Ok(LifecycleStatus::Annulled),
            other => Err(format!("unknown lifecycle status {other}")),
        }
    }
}

/// Time-driven axis of a route sheet. Only ever moves `Visible -> Hidden`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Visibility {
    Visible,
    Hidden,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Visible => "VISIBLE",
            Visibility::Hidden => "HIDDEN",
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "VISIBLE" => Ok(Visibility::Visible),
            "HIDDEN" => Ok(Visibility::Hidden),
            other => Err(format!("unknown visibility {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PickupType {
    Airport,
    Other,
}

impl PickupType {
    pub fn as_str(self) -> &'static str {
        match self {
            PickupType::Airport => "AIRPORT",
            PickupType::Other => "OTHER",
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(table_name = route_sheets)]
#[diesel(belongs_to(User))]
pub struct RouteSheet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub year: i32,
    pub seq: i64,
    pub contractor_phone: Option<String>,
    pub contractor_email: Option<String>,
    pub prebooked_date: String,
    pub prebooked_locality: String,
    pub pickup_type: String,
    pub flight_number: Option<String>,
    pub pickup_address: Option<String>,
    pub pickup_datetime: NaiveDateTime,
    pub destination: String,
    pub passenger_info: String,
    pub status: String,
    pub annulled_at: Option<NaiveDateTime>,
    pub annul_reason: Option<String>,
    pub visibility: String,
    pub created_at: NaiveDateTime,
    pub hide_at: NaiveDateTime,
    pub purge_at: NaiveDateTime,
    pub conductor_driver_id: Option<Uuid>,
}

impl RouteSheet {
    pub fn lifecycle(&self) -> LifecycleStatus {
        self.status.parse().unwrap_or(LifecycleStatus::Active)
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility.parse().unwrap_or(Visibility::Visible)
    }

    pub fn sheet_number(&self) -> String {
        format_sheet_number(self.seq, self.year)
    }
}

/// Human-facing number, zero padded to three digits and growing past 999.
pub fn format_sheet_number(seq: i64, year: i32) -> String {
    format!("{seq:03}/{year}")
}

#[derive(Debug, Insertable)]
#[diesel(table_name = route_sheets)]
pub struct NewRouteSheet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub year: i32,
    pub seq: i64,
    pub contractor_phone: Option<String>,
    pub contractor_email: Option<String>,
    pub prebooked_date: String,
    pub prebooked_locality: String,
    pub pickup_type: String,
    pub flight_number: Option<String>,
    pub pickup_address: Option<String>,
    pub pickup_datetime: NaiveDateTime,
    pub destination: String,
    pub passenger_info: String,
    pub status: String,
    pub visibility: String,
    pub created_at: NaiveDateTime,
    pub hide_at: NaiveDateTime,
    pub purge_at: NaiveDateTime,
    pub conductor_driver_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = retention_locks)]
#[diesel(primary_key(name))]
pub struct RetentionLockRow {
    pub name: String,
    pub held: bool,
    pub holder: Option<String>,
    pub acquired_at: Option<NaiveDateTime>,
    pub expires_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = retention_runs)]
pub struct RetentionRun {
    pub id: Uuid,
    pub run_at: NaiveDateTime,
    pub trigger_source: String,
    pub hidden_count: i64,
    pub purged_count: i64,
    pub duration_ms: i64,
    pub stats_before: serde_json::Value,
    pub stats_after: serde_json::Value,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = retention_runs)]
pub struct NewRetentionRun {
    pub id: Uuid,
    pub run_at: NaiveDateTime,
    pub trigger_source: String,
    pub hidden_count: i64,
    pub purged_count: i64,
    pub duration_ms: i64,
    pub stats_before: serde_json::Value,
    pub stats_after: serde_json::Value,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = pdf_cache)]
pub struct NewPdfCacheEntry<'a> {
    pub sheet_id: Uuid,
    pub template_version: i32,
    pub status: &'a str,
    pub bytes: &'a [u8],
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub epoch_at_issue: i64,
    pub revoked: bool,
    pub revoked_at: Option<NaiveDateTime>,
    pub replaced_by: Option<Uuid>,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub epoch_at_issue: i64,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = rate_limit_events)]
pub struct NewRateLimitEvent<'a> {
    pub id: Uuid,
    pub owner_key: &'a str,
    pub action: &'a str,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = app_settings)]
pub struct AppSettings {
    #[serde(skip)]
    pub id: String,
    pub header_title: String,
    pub header_line1: String,
    pub header_line2: String,
    pub legend_text: String,
    pub hide_after_months: i32,
    pub purge_after_months: i32,
    pub template_version: i32,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = password_reset_tokens)]
#[diesel(belongs_to(User))]
pub struct PasswordResetToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: NaiveDateTime,
    pub used: bool,
    pub used_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = password_reset_tokens)]
pub struct NewPasswordResetToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: NaiveDateTime,
}
