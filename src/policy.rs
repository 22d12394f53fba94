use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Deserialize;
use thiserror::Error;

use crate::models::AppSettings;
use crate::schema::app_settings;

pub const SETTINGS_ID: &str = "global";

const HIDE_MONTHS_RANGE: (u32, u32) = (1, 36);
const PURGE_MONTHS_RANGE: (u32, u32) = (2, 60);

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("purge_after_months ({purge}) must be greater than hide_after_months ({hide})")]
    InvalidRetentionWindow { hide: u32, purge: u32 },
    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        min: u32,
        max: u32,
    },
    #[error("settings row missing")]
    Missing,
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

/// Hide/purge offsets in calendar months. Construction guarantees
/// `hide_after_months < purge_after_months`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    hide_after_months: u32,
    purge_after_months: u32,
}

impl RetentionPolicy {
    pub fn new(hide_after_months: u32, purge_after_months: u32) -> Result<Self, PolicyError> {
        if purge_after_months <= hide_after_months {
            return Err(PolicyError::InvalidRetentionWindow {
                hide: hide_after_months,
                purge: purge_after_months,
            });
        }
        Ok(Self {
            hide_after_months,
            purge_after_months,
        })
    }

    pub fn hide_after_months(&self) -> u32 {
        self.hide_after_months
    }

    pub fn purge_after_months(&self) -> u32 {
        self.purge_after_months
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            hide_after_months: 14,
            purge_after_months: 24,
        }
    }
}

/// Everything the renderer reads from settings. `version` is part of the
/// artifact cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateConfig {
    pub version: i32,
    pub header_title: String,
    pub header_line1: String,
    pub header_line2: String,
    pub legend_text: String,
}

impl AppSettings {
    pub fn retention_policy(&self) -> Result<RetentionPolicy, PolicyError> {
        RetentionPolicy::new(
            self.hide_after_months.max(0) as u32,
            self.purge_after_months.max(0) as u32,
        )
    }

    pub fn template(&self) -> TemplateConfig {
        TemplateConfig {
            version: self.template_version,
            header_title: self.header_title.clone(),
            header_line1: self.header_line1.clone(),
            header_line2: self.header_line2.clone(),
            legend_text: self.legend_text.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyUpdate {
    pub header_title: Option<String>,
    pub header_line1: Option<String>,
    pub header_line2: Option<String>,
    pub legend_text: Option<String>,
    pub hide_after_months: Option<u32>,
    pub purge_after_months: Option<u32>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = app_settings)]
struct SettingsChangeset {
    header_title: Option<String>,
    header_line1: Option<String>,
    header_line2: Option<String>,
    legend_text: Option<String>,
    hide_after_months: Option<i32>,
    purge_after_months: Option<i32>,
    template_version: Option<i32>,
    updated_at: Option<chrono::NaiveDateTime>,
}

impl PolicyUpdate {
    fn normalized(&self) -> PolicyUpdate {
        PolicyUpdate {
            header_title: normalize_text(&self.header_title),
            header_line1: normalize_text(&self.header_line1),
            header_line2: normalize_text(&self.header_line2),
            legend_text: normalize_text(&self.legend_text),
            hide_after_months: self.hide_after_months,
            purge_after_months: self.purge_after_months,
        }
    }

    /// Range checks on the supplied values plus the window check on the
    /// values that will be in effect once merged with `current`.
    pub fn validate_against(&self, current: &AppSettings) -> Result<RetentionPolicy, PolicyError> {
        if let Some(hide) = self.hide_after_months {
            check_range("hide_after_months", hide, HIDE_MONTHS_RANGE)?;
        }
        if let Some(purge) = self.purge_after_months {
            check_range("purge_after_months", purge, PURGE_MONTHS_RANGE)?;
        }

        let hide = self
            .hide_after_months
            .unwrap_or(current.hide_after_months.max(0) as u32);
        let purge = self
            .purge_after_months
            .unwrap_or(current.purge_after_months.max(0) as u32);
        RetentionPolicy::new(hide, purge)
    }

    /// Whether applying this update changes any rendered text.
    pub fn changes_template(&self, current: &AppSettings) -> bool {
        let differs = |candidate: &Option<String>, existing: &str| {
            candidate.as_deref().is_some_and(|value| value != existing)
        };
        differs(&self.header_title, &current.header_title)
            || differs(&self.header_line1, &current.header_line1)
            || differs(&self.header_line2, &current.header_line2)
            || differs(&self.legend_text, &current.legend_text)
    }
}

fn normalize_text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn check_range(field: &'static str, value: u32, (min, max): (u32, u32)) -> Result<(), PolicyError> {
    if value < min || value > max {
        return Err(PolicyError::OutOfRange { field, min, max });
    }
    Ok(())
}

pub fn load_settings(conn: &mut PgConnection) -> Result<AppSettings, PolicyError> {
    app_settings::table
        .find(SETTINGS_ID)
        .first::<AppSettings>(conn)
        .optional()?
        .ok_or(PolicyError::Missing)
}

/// Applies an admin edit. Runs under a row lock so that concurrent edits
/// serialize; the template version bumps only when rendered text changes.
pub fn update_settings(
    conn: &mut PgConnection,
    update: &PolicyUpdate,
) -> Result<AppSettings, PolicyError> {
    let update = update.normalized();

    conn.transaction::<_, PolicyError, _>(|conn| {
        let current: AppSettings = app_settings::table
            .find(SETTINGS_ID)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(PolicyError::Missing)?;

        update.validate_against(&current)?;
        let bump = update.changes_template(&current);

        let changeset = SettingsChangeset {
            header_title: update.header_title.clone(),
            header_line1: update.header_line1.clone(),
            header_line2: update.header_line2.clone(),
            legend_text: update.legend_text.clone(),
            hide_after_months: update.hide_after_months.map(|v| v as i32),
            purge_after_months: update.purge_after_months.map(|v| v as i32),
            template_version: bump.then_some(current.template_version + 1),
            updated_at: Some(Utc::now().naive_utc()),
        };

        let updated = diesel::update(app_settings::table.find(SETTINGS_ID))
            .set(&changeset)
            .get_result::<AppSettings>(conn)?;

        if bump {
            tracing::info!(
                template_version = updated.template_version,
                "template text changed, cached artifacts superseded"
            );
        }

        Ok(updated)
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;

    use super::*;

    fn settings() -> AppSettings {
        AppSettings {
            id: SETTINGS_ID.to_string(),
            header_title: "HOJA DE RUTA".into(),
            header_line1: "line one".into(),
            header_line2: "line two".into(),
            legend_text: "legend".into(),
            hide_after_months: 14,
            purge_after_months: 24,
            template_version: 3,
            updated_at: NaiveDateTime::default(),
        }
    }

    #[test]
    fn rejects_purge_not_after_hide() {
        assert!(matches!(
            RetentionPolicy::new(12, 12),
            Err(PolicyError::InvalidRetentionWindow { hide: 12, purge: 12 })
        ));
        assert!(RetentionPolicy::new(12, 13).is_ok());
    }

    #[test]
    fn validates_against_merged_values() {
        let current = settings();
        let update = PolicyUpdate {
            hide_after_months: Some(30),
            ..Default::default()
        };
        assert!(matches!(
            update.validate_against(&current),
            Err(PolicyError::InvalidRetentionWindow { hide: 30, purge: 24 })
        ));

        let update = PolicyUpdate {
            purge_after_months: Some(12),
            ..Default::default()
        };
        assert!(update.validate_against(&current).is_err());
    }

    #[test]
    fn enforces_ranges() {
        let update = PolicyUpdate {
            hide_after_months: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            update.validate_against(&settings()),
            Err(PolicyError::OutOfRange {
                field: "hide_after_months",
                ..
            })
        ));

        let update = PolicyUpdate {
            purge_after_months: Some(61),
            ..Default::default()
        };
        assert!(update.validate_against(&settings()).is_err());
    }

    #[test]
    fn only_text_changes_bump_template() {
        let current = settings();

        let retention_only = PolicyUpdate {
            hide_after_months: Some(6),
            ..Default::default()
        };
        assert!(!retention_only.changes_template(&current));

        let same_text = PolicyUpdate {
            header_title: Some("HOJA DE RUTA".into()),
            ..Default::default()
        };
        assert!(!same_text.changes_template(&current));

        let new_legend = PolicyUpdate {
            legend_text: Some("updated legend".into()),
            ..Default::default()
        };
        assert!(new_legend.changes_template(&current));
    }

    #[test]
    fn blank_text_is_ignored() {
        let update = PolicyUpdate {
            header_line1: Some("   ".into()),
            ..Default::default()
        }
        .normalized();
        assert!(update.header_line1.is_none());
        assert!(!update.changes_template(&settings()));
    }
}
