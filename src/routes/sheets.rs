use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE},
        StatusCode,
    },
    response::Response,
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::RouteSheet,
    policy,
    rate_limit::{ACTION_PDF_RANGE, ACTION_PDF_SINGLE},
    sheets::{self, CacheOutcome, NewTrip, SheetFilter},
    state::AppState,
};

/// A sheet as returned to clients, with its formatted number.
#[derive(Serialize)]
pub struct SheetView {
    #[serde(flatten)]
    pub sheet: RouteSheet,
    pub sheet_number: String,
}

impl From<RouteSheet> for SheetView {
    fn from(sheet: RouteSheet) -> Self {
        let sheet_number = sheet.sheet_number();
        Self {
            sheet,
            sheet_number,
        }
    }
}

#[derive(Serialize)]
pub struct SheetList {
    pub sheets: Vec<SheetView>,
    pub count: usize,
    pub next_cursor: Option<String>,
}

pub fn owner_key(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

pub async fn create_sheet(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<NewTrip>,
) -> AppResult<(StatusCode, Json<SheetView>)> {
    let mut conn = state.db()?;
    let sheet = sheets::create_sheet(&mut conn, user.user_id, payload)?;
    Ok((StatusCode::CREATED, Json(sheet.into())))
}

pub async fn list_sheets(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(filter): Query<SheetFilter>,
) -> AppResult<Json<SheetList>> {
    let mut conn = state.db()?;
    let page = sheets::list_visible(&mut conn, user.user_id, &filter)?.map(SheetView::from);
    Ok(Json(SheetList {
        count: page.count,
        sheets: page.items,
        next_cursor: page.next_cursor,
    }))
}

pub async fn get_sheet(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SheetView>> {
    let mut conn = state.db()?;
    let sheet = sheets::get_visible(&mut conn, user.user_id, id)?;
    Ok(Json(sheet.into()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnnulRequest {
    pub reason: Option<String>,
}

pub async fn annul_sheet(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    payload: Option<Json<AnnulRequest>>,
) -> AppResult<Json<SheetView>> {
    let reason = payload.and_then(|Json(request)| request.reason);
    let mut conn = state.db()?;
    let sheet = sheets::annul_sheet(&mut conn, &state.cache, user.user_id, id, reason)?;
    Ok(Json(sheet.into()))
}

pub async fn sheet_pdf(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let mut conn = state.db()?;
    state
        .limits
        .pdf_single
        .enforce(&mut conn, &owner_key(user.user_id), ACTION_PDF_SINGLE)?;
    let sheet = sheets::get_visible(&mut conn, user.user_id, id)?;
    let owner = sheets::load_owner(&mut conn, user.user_id)?;
    drop(conn);

    let worker_state = state.clone();
    let document = tokio::task::spawn_blocking(move || -> AppResult<sheets::SheetDocument> {
        let mut conn = worker_state.db()?;
        Ok(sheets::sheet_document(
            &mut conn,
            &worker_state.cache,
            worker_state.renderer.as_ref(),
            &owner,
            &sheet,
        )?)
    })
    .await
    .map_err(AppError::internal)??;

    pdf_response(document.bytes, &document.filename, Some(document.outcome))
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
}

pub async fn range_pdf(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(range): Query<RangeQuery>,
) -> AppResult<Response> {
    let mut conn = state.db()?;
    state
        .limits
        .pdf_range
        .enforce(&mut conn, &owner_key(user.user_id), ACTION_PDF_RANGE)?;
    let rows = sheets::list_for_range(&mut conn, user.user_id, range.from_date, range.to_date)?;
    if rows.is_empty() {
        return Err(AppError::new(
            StatusCode::NOT_FOUND,
            "no route sheets in the selected range",
        ));
    }
    let owner = sheets::load_owner(&mut conn, user.user_id)?;
    let drivers = sheets::load_drivers(&mut conn, user.user_id)?;
    let template = policy::load_settings(&mut conn)?.template();
    drop(conn);

    let renderer = state.renderer.clone();
    let bytes = tokio::task::spawn_blocking(move || {
        sheets::range_document(renderer.as_ref(), &owner, &drivers, &rows, &template)
    })
    .await
    .map_err(AppError::internal)??;

    let filename = format!("hojas_ruta_{}_a_{}.pdf", range.from_date, range.to_date);
    pdf_response(bytes, &filename, None)
}

fn pdf_response(bytes: Vec<u8>, filename: &str, cache: Option<CacheOutcome>) -> AppResult<Response> {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/pdf")
        .header(CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\""))
        .header("x-content-type-options", "nosniff")
        .header(CACHE_CONTROL, "private, no-store");
    if let Some(outcome) = cache {
        builder = builder.header("x-cache", outcome.as_header());
    }
    builder.body(Body::from(bytes)).map_err(AppError::internal)
}
