use std::panic;

use anyhow::{anyhow, Result};
use pdfium_render::prelude::*;

use crate::localtime::format_local;
use crate::models::{Driver, LifecycleStatus, PickupType, RouteSheet, User};
use crate::policy::TemplateConfig;

const PAGE_MARGIN: f32 = 50.0;
const PAGE_TOP: f32 = 790.0;
const LINE_HEIGHT: f32 = 16.0;
const BODY_FONT_SIZE: f32 = 10.0;
const TITLE_FONT_SIZE: f32 = 14.0;

/// Turns a sheet into document bytes. Output must depend only on the sheet,
/// its owner, its conductor and the template, since renderings are cached on
/// `(sheet, template version, status)`.
pub trait SheetRenderer: Send + Sync + 'static {
    fn render(
        &self,
        sheet: &RouteSheet,
        owner: &User,
        driver: Option<&Driver>,
        template: &TemplateConfig,
    ) -> Result<Vec<u8>>;

    /// `drivers` holds the owner's drivers; sheets naming one that is gone
    /// render as driven by the holder.
    fn render_range(
        &self,
        sheets: &[RouteSheet],
        owner: &User,
        drivers: &[Driver],
        template: &TemplateConfig,
    ) -> Result<Vec<u8>>;
}

/// The driver named on the sheet, looked up among the owner's drivers.
pub fn conductor_of<'a>(sheet: &RouteSheet, drivers: &'a [Driver]) -> Option<&'a Driver> {
    let id = sheet.conductor_driver_id?;
    drivers.iter().find(|driver| driver.id == id)
}

/// A single rendered page: title lines, then body lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub title: Vec<String>,
    pub body: Vec<String>,
}

pub fn page_text(
    sheet: &RouteSheet,
    owner: &User,
    driver: Option<&Driver>,
    template: &TemplateConfig,
) -> PageText {
    let title = vec![
        template.header_title.clone(),
        template.header_line1.clone(),
        template.header_line2.clone(),
        format!("Hoja n.º {}", sheet.sheet_number()),
    ];

    let mut body = Vec::new();
    if sheet.lifecycle() == LifecycleStatus::Annulled {
        body.push("*** HOJA ANULADA ***".to_string());
        if let Some(reason) = sheet.annul_reason.as_deref() {
            body.push(format!("Motivo: {reason}"));
        }
        if let Some(at) = sheet.annulled_at {
            body.push(format!("Anulada el {}", format_local(at, "%d/%m/%Y %H:%M")));
        }
    }

    body.push(format!("Titular: {} ({})", owner.full_name, owner.dni_cif));
    body.push(format!(
        "Licencia: {} - {}",
        owner.license_number, owner.license_council
    ));
    body.push(format!(
        "Vehiculo: {} {} - {}",
        owner.vehicle_brand, owner.vehicle_model, owner.vehicle_plate
    ));
    if let Some(driver) = driver {
        body.push(format!("Conductor: {} ({})", driver.full_name, driver.dni));
    }
    body.push(format!(
        "Contratante: {}",
        [sheet.contractor_phone.as_deref(), sheet.contractor_email.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" / ")
    ));
    body.push(format!(
        "Precontratado: {} en {}",
        sheet.prebooked_date, sheet.prebooked_locality
    ));
    if sheet.pickup_type == PickupType::Airport.as_str() {
        body.push(format!(
            "Recogida: aeropuerto, vuelo {}",
            sheet.flight_number.as_deref().unwrap_or("-")
        ));
    } else {
        body.push(format!(
            "Recogida: {}",
            sheet.pickup_address.as_deref().unwrap_or("-")
        ));
    }
    body.push(format!(
        "Fecha y hora de recogida: {}",
        format_local(sheet.pickup_datetime, "%d/%m/%Y %H:%M")
    ));
    body.push(format!("Destino: {}", sheet.destination));
    body.push(format!("Pasajeros: {}", sheet.passenger_info));
    body.push(String::new());
    body.push(template.legend_text.clone());

    PageText { title, body }
}

/// Production renderer backed by the PDFium library.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumRenderer;

impl PdfiumRenderer {
    pub fn new() -> Self {
        Self
    }

    fn render_pages(&self, pages: &[PageText]) -> Result<Vec<u8>> {
        let pdfium = panic::catch_unwind(Pdfium::default)
            .map_err(|_| anyhow!("failed to initialize PDFium"))?;

        let mut document = pdfium.create_new_pdf()?;
        let font = document.fonts_mut().helvetica();
        let bold = document.fonts_mut().helvetica_bold();

        for text in pages {
            let mut page = document
                .pages_mut()
                .create_page_at_end(PdfPagePaperSize::a4())?;
            let mut y = PAGE_TOP;

            for line in &text.title {
                page.objects_mut().create_text_object(
                    PdfPoints::new(PAGE_MARGIN),
                    PdfPoints::new(y),
                    line,
                    bold,
                    PdfPoints::new(TITLE_FONT_SIZE),
                )?;
                y -= LINE_HEIGHT + 4.0;
            }

            y -= LINE_HEIGHT;
            for line in &text.body {
                if !line.is_empty() {
                    page.objects_mut().create_text_object(
                        PdfPoints::new(PAGE_MARGIN),
                        PdfPoints::new(y),
                        line,
                        font,
                        PdfPoints::new(BODY_FONT_SIZE),
                    )?;
                }
                y -= LINE_HEIGHT;
            }
        }

        Ok(document.save_to_bytes()?)
    }
}

impl SheetRenderer for PdfiumRenderer {
    fn render(
        &self,
        sheet: &RouteSheet,
        owner: &User,
        driver: Option<&Driver>,
        template: &TemplateConfig,
    ) -> Result<Vec<u8>> {
        self.render_pages(&[page_text(sheet, owner, driver, template)])
    }

    fn render_range(
        &self,
        sheets: &[RouteSheet],
        owner: &User,
        drivers: &[Driver],
        template: &TemplateConfig,
    ) -> Result<Vec<u8>> {
        let pages: Vec<PageText> = sheets
            .iter()
            .map(|sheet| page_text(sheet, owner, conductor_of(sheet, drivers), template))
            .collect();
        self.render_pages(&pages)
    }
}
