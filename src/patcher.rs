use crate::error::ConvertError;
use crate::sheet::{CellValue, Formula, Worksheet};
use crate::srt::Subtitle;
use crate::workbook::Workbook;

use anyhow::{Context, Result};
use tracing::debug;

pub const RAW_SHEET: &str = "raw";
pub const CANVAS_SHEET: &str = "canvas";

const FIRST_DATA_ROW: u32 = 2;

const COL_KEY: u32 = 1; // A
const COL_START: u32 = 2; // B
const COL_END: u32 = 3; // C
const COL_TEXT: u32 = 4; // D
const COL_START_SCRATCH: u32 = 7; // G
const COL_END_SCRATCH: u32 = 8; // H

/// Fills the `raw` sheet with `subs` and points the `canvas` sheet's start
/// and end columns at it.
pub fn patch(mut workbook: Workbook, subs: &[Subtitle]) -> Result<Workbook> {
    for name in [RAW_SHEET, CANVAS_SHEET] {
        if !workbook.has_sheet(name) {
            return Err(ConvertError::Template(format!("missing sheet '{}'", name)))
                .context("Failed to patch template");
        }
    }

    let labels = header(&mut workbook, RAW_SHEET)?;
    debug!(header = ?labels, "Found raw sheet");
    fill_raw(workbook.sheet_mut(RAW_SHEET)?, subs);
    link_canvas(workbook.sheet_mut(CANVAS_SHEET)?);

    Ok(workbook)
}

/// Labels in the first row of the record columns, as a reader would see them.
fn header(workbook: &mut Workbook, name: &str) -> Result<Vec<String>> {
    let sheet = workbook.sheet_mut(name)?;
    let values: Vec<CellValue> = (COL_KEY..=COL_TEXT)
        .filter_map(|col| sheet.cell(1, col).cloned())
        .collect();
    Ok(values.iter().filter_map(|v| workbook.display(v)).collect())
}

fn fill_raw(sheet: &mut Worksheet, subs: &[Subtitle]) {
    sheet.clear_rows_from(FIRST_DATA_ROW);
    for (row, sub) in (FIRST_DATA_ROW..).zip(subs) {
        sheet.set_cell(row, COL_KEY, CellValue::Number(sub.id as f64));
        sheet.set_cell(row, COL_START, CellValue::Text(sub.start.to_string()));
        sheet.set_cell(row, COL_END, CellValue::Text(sub.end.to_string()));
        sheet.set_cell(row, COL_TEXT, CellValue::Text(sub.text.clone()));
    }
    debug!(rows = subs.len(), "Filled raw sheet");
}

/// Only the canvas rows that already exist are touched; the sheet is not
/// grown or shrunk to the number of subtitles.
fn link_canvas(sheet: &mut Worksheet) {
    let last_row = sheet.last_row();
    for row in FIRST_DATA_ROW..=last_row {
        sheet.clear_cell(row, COL_START_SCRATCH);
        sheet.clear_cell(row, COL_END_SCRATCH);
        sheet.set_cell(row, COL_START, lookup(row, COL_START));
        sheet.set_cell(row, COL_END, lookup(row, COL_END));
    }
    debug!(last_row, "Linked canvas sheet");
}

fn lookup(row: u32, column: u32) -> CellValue {
    CellValue::Formula(Formula::new(&format!(
        "=VLOOKUP(A{}, {}!A:D, {}, FALSE)",
        row, RAW_SHEET, column
    )))
}
