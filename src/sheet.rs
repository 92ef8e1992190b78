// src/sheet.rs

use calamine::{Data, Reader, open_workbook_auto_from_rs};
use rust_xlsxwriter::{Workbook, XlsxError};
use std::io::Cursor;
use std::path::Path;

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Header row plus data rows, every cell already coerced to text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Xlsx,
    Csv,
}

impl SheetFormat {
    /// Anything that is not `.csv` is handed to the workbook reader, which
    /// sniffs xlsx/xls/ods on its own.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => SheetFormat::Csv,
            _ => SheetFormat::Xlsx,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SheetError {
    #[error("workbook could not be read: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("csv could not be read: {0}")]
    Csv(#[from] csv::Error),

    #[error("workbook could not be written: {0}")]
    Write(#[from] XlsxError),

    #[error("spreadsheet has no header row")]
    Empty,
}

/// Parse the first worksheet (or the csv body) into a `RawSheet`.
pub fn read(bytes: &[u8], format: SheetFormat) -> Result<RawSheet, SheetError> {
    let mut sheet = match format {
        SheetFormat::Xlsx => read_workbook(bytes)?,
        SheetFormat::Csv => read_csv(bytes)?,
    };

    let width = sheet.headers.len();
    for (idx, header) in sheet.headers.iter_mut().enumerate() {
        if header.trim().is_empty() {
            *header = format!("unnamed: {idx}");
        }
    }
    sheet.rows.retain(|row| row.iter().any(|c| !c.trim().is_empty()));
    for row in &mut sheet.rows {
        row.resize(width, String::new());
    }
    Ok(sheet)
}

fn read_workbook(bytes: &[u8]) -> Result<RawSheet, SheetError> {
    let mut book = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = book.worksheet_range_at(0).ok_or(SheetError::Empty)??;

    let mut rows = range.rows();
    let headers = rows
        .next()
        .ok_or(SheetError::Empty)?
        .iter()
        .map(cell_text)
        .collect();
    let rows = rows.map(|r| r.iter().map(cell_text).collect()).collect();

    Ok(RawSheet { headers, rows })
}

fn read_csv(bytes: &[u8]) -> Result<RawSheet, SheetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.is_empty() {
        return Err(SheetError::Empty);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(str::to_string).collect());
    }
    Ok(RawSheet { headers, rows })
}

/// Coerce a cell to the text a clerk would read in the sheet.
/// Whole floats drop their fraction so `101.0` compares equal to `"101"`.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
            format!("{}", *f as i64)
        }
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Encode headers and rows as a single-sheet xlsx workbook.
///
/// Canonical integers are written as numbers so the sheet sorts and sums
/// like the one the clerk uploaded; everything else stays text.
pub fn write_xlsx<'a, I>(headers: &[String], rows: I) -> Result<Vec<u8>, SheetError>
where
    I: IntoIterator<Item = &'a [String]>,
{
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    for (col, header) in headers.iter().enumerate() {
        worksheet.write_string(0, col as u16, header.as_str())?;
    }

    for (r, row) in rows.into_iter().enumerate() {
        let r = (r + 1) as u32;
        for (col, cell) in row.iter().enumerate() {
            match as_canonical_int(cell) {
                Some(n) => worksheet.write_number(r, col as u16, n as f64)?,
                None => worksheet.write_string(r, col as u16, cell.as_str())?,
            };
        }
    }

    Ok(workbook.save_to_buffer()?)
}

fn as_canonical_int(cell: &str) -> Option<i64> {
    let n = cell.parse::<i64>().ok()?;
    (n.to_string() == cell && n.abs() < 1_000_000_000_000_000).then_some(n)
}
