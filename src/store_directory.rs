// src/store_directory.rs

use crate::sheet::{self, RawSheet, SheetError, SheetFormat};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const STORE_NUMBER: &str = "store number";
pub const REGION_CODE: &str = "region code";

/// One store-list row after the load-time mapping step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRow {
    pub store_number: String,
    pub region_code: Option<String>,
    /// Every cell of the row, in header order, for exporting.
    cells: Vec<String>,
}

impl StoreRow {
    pub fn cells(&self) -> &[String] {
        &self.cells
    }
}

/// A subset (or all) of the directory, ready to be shown or exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreTable {
    pub headers: Vec<String>,
    pub rows: Vec<StoreRow>,
}

impl StoreTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn store_numbers(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.store_number.as_str()).collect()
    }

    pub fn to_xlsx(&self) -> Result<Vec<u8>, SheetError> {
        sheet::write_xlsx(&self.headers, self.rows.iter().map(StoreRow::cells))
    }
}

impl fmt::Display for StoreTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (w, cell) in widths.iter_mut().zip(row.cells()) {
                *w = (*w).max(cell.chars().count());
            }
        }

        let line = |f: &mut fmt::Formatter<'_>, cells: &[String]| -> fmt::Result {
            let parts: Vec<String> = cells
                .iter()
                .zip(&widths)
                .map(|(c, &w)| format!("{c:<w$}"))
                .collect();
            writeln!(f, "{}", parts.join("  ").trim_end())
        };

        line(f, &self.headers)?;
        for row in &self.rows {
            line(f, row.cells())?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Error reading file: {0}")]
    Parse(SheetError),

    #[error("The store list does not contain a '{0}' column.")]
    MissingColumn(&'static str),

    #[error("store list could not be written: {0}")]
    Write(SheetError),

    #[error("store list io: {0}")]
    Io(#[from] std::io::Error),
}

/// The active store list. Exactly one is live at a time; an upload replaces
/// it wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDirectory {
    headers: Vec<String>,
    rows: Vec<StoreRow>,
    store_col: Option<usize>,
    region_col: Option<usize>,
    flagged: usize,
}

impl StoreDirectory {
    /// Parse an uploaded spreadsheet into a directory.
    pub fn load(bytes: &[u8], format: SheetFormat) -> Result<Self, DirectoryError> {
        let raw = sheet::read(bytes, format).map_err(DirectoryError::Parse)?;
        Ok(Self::from_sheet(raw))
    }

    /// Read the persisted directory, if one has been saved yet.
    ///
    /// `persist` always writes a workbook, so the slot is read as one
    /// whatever its file name says.
    pub fn open(path: impl AsRef<Path>) -> Result<Option<Self>, DirectoryError> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No persisted store list");
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        Self::load(&bytes, SheetFormat::Xlsx).map(Some)
    }

    /// Header normalisation and row typing. Rows with a blank store number
    /// are flagged and dropped.
    pub fn from_sheet(raw: RawSheet) -> Self {
        let headers: Vec<String> = raw.headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let store_col = headers.iter().position(|h| h == STORE_NUMBER);
        let region_col = headers.iter().position(|h| h == REGION_CODE);

        if store_col.is_none() {
            warn!(columns = ?headers, "Store list has no '{STORE_NUMBER}' column");
        }

        let mut rows = Vec::with_capacity(raw.rows.len());
        let mut flagged = 0;
        let mut seen = HashSet::new();

        for cells in raw.rows {
            let store_number = match store_col {
                Some(idx) => {
                    let value = cells.get(idx).map_or("", |c| c.trim()).to_string();
                    if value.is_empty() {
                        flagged += 1;
                        continue;
                    }
                    if !seen.insert(value.clone()) {
                        warn!(store = %value, "Duplicate store number; first row wins");
                    }
                    value
                }
                None => String::new(),
            };
            let region_code =
                region_col.map(|idx| cells.get(idx).map_or("", |c| c.trim()).to_string());
            rows.push(StoreRow {
                store_number,
                region_code,
                cells,
            });
        }

        if flagged > 0 {
            warn!(flagged, "Rows without a store number were skipped");
        }
        info!(rows = rows.len(), columns = headers.len(), "Store list loaded");

        Self {
            headers,
            rows,
            store_col,
            region_col,
            flagged,
        }
    }

    /// Overwrite the canonical slot with this directory.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<(), DirectoryError> {
        let path = path.as_ref();
        let bytes = self.all_rows().to_xlsx().map_err(DirectoryError::Write)?;

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, &bytes)?;
        tmp.persist(path).map_err(|e| DirectoryError::Io(e.error))?;

        info!(path = %path.display(), rows = self.rows.len(), "Store list saved");
        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows dropped at load because their store number was blank.
    pub fn flagged(&self) -> usize {
        self.flagged
    }

    pub fn has_store_column(&self) -> bool {
        self.store_col.is_some()
    }

    pub fn require_store_column(&self) -> Result<(), DirectoryError> {
        match self.store_col {
            Some(_) => Ok(()),
            None => Err(DirectoryError::MissingColumn(STORE_NUMBER)),
        }
    }

    /// Region code of the first row whose store number matches exactly.
    /// A matching row with a blank region code counts as no match.
    pub fn lookup_one(&self, store_number: &str) -> Result<Option<&str>, DirectoryError> {
        self.require_store_column()?;
        if self.region_col.is_none() {
            return Err(DirectoryError::MissingColumn(REGION_CODE));
        }
        Ok(self
            .rows
            .iter()
            .find(|r| r.store_number == store_number)
            .and_then(|r| r.region_code.as_deref())
            .filter(|code| !code.is_empty()))
    }

    /// Rows whose store number is one of `store_numbers`, in directory order.
    pub fn lookup_many<S: AsRef<str>>(
        &self,
        store_numbers: &[S],
    ) -> Result<StoreTable, DirectoryError> {
        self.require_store_column()?;
        let wanted: HashSet<&str> = store_numbers.iter().map(AsRef::as_ref).collect();
        Ok(StoreTable {
            headers: self.headers.clone(),
            rows: self
                .rows
                .iter()
                .filter(|r| wanted.contains(r.store_number.as_str()))
                .cloned()
                .collect(),
        })
    }

    pub fn all_rows(&self) -> StoreTable {
        StoreTable {
            headers: self.headers.clone(),
            rows: self.rows.clone(),
        }
    }

    pub fn head(&self, n: usize) -> StoreTable {
        StoreTable {
            headers: self.headers.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }
}

#[cfg(test)]
pub(crate) fn directory_from(headers: &[&str], rows: &[&[&str]]) -> StoreDirectory {
    StoreDirectory::from_sheet(RawSheet {
        headers: headers.iter().map(|h| h.to_string()).collect(),
        rows: rows
            .iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StoreDirectory {
        directory_from(
            &[" Store Number ", "REGION CODE", "City"],
            &[
                &["101", "R5", "Dallas"],
                &["102", "R9", "Austin"],
                &["103", "R2", "Reno"],
            ],
        )
    }

    #[test]
    fn test_headers_normalized() {
        let dir = sample();
        assert_eq!(dir.headers(), &["store number", "region code", "city"]);
        assert!(dir.has_store_column());
    }

    #[test]
    fn test_lookup_one_hit_and_miss() {
        let dir = sample();
        assert_eq!(dir.lookup_one("102").unwrap(), Some("R9"));
        assert_eq!(dir.lookup_one("999").unwrap(), None);
    }

    #[test]
    fn test_lookup_one_first_match_wins() {
        let dir = directory_from(
            &["store number", "region code"],
            &[&["7", "A"], &["7", "B"]],
        );
        assert_eq!(dir.lookup_one("7").unwrap(), Some("A"));
    }

    #[test]
    fn test_lookup_one_blank_region_code() {
        let dir = directory_from(
            &["store number", "region code"],
            &[&["101", "  "], &["102", "R9"]],
        );
        assert_eq!(dir.lookup_one("101").unwrap(), None);
        assert_eq!(dir.lookup_one("102").unwrap(), Some("R9"));
    }

    #[test]
    fn test_lookup_one_without_region_column() {
        let dir = directory_from(&["store number"], &[&["101"]]);
        assert!(matches!(
            dir.lookup_one("101"),
            Err(DirectoryError::MissingColumn(REGION_CODE))
        ));
    }

    #[test]
    fn test_lookup_many_keeps_directory_order() {
        let dir = sample();
        let table = dir.lookup_many(&["103", "101", "555"][..]).unwrap();
        assert_eq!(table.store_numbers(), vec!["101", "103"]);
        assert_eq!(table.headers, dir.headers());
    }

    #[test]
    fn test_missing_store_column() {
        let dir = directory_from(&["shop", "region code"], &[&["5", "R1"]]);
        assert!(!dir.has_store_column());
        assert!(matches!(
            dir.lookup_one("5"),
            Err(DirectoryError::MissingColumn(STORE_NUMBER))
        ));
        assert!(matches!(
            dir.lookup_many(&["5", "6"][..]),
            Err(DirectoryError::MissingColumn(STORE_NUMBER))
        ));
    }

    #[test]
    fn test_blank_store_numbers_flagged() {
        let dir = directory_from(
            &["store number", "region code"],
            &[&["101", "R5"], &["  ", "R7"]],
        );
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.flagged(), 1);
    }

    #[test]
    fn test_persist_and_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data").join("store_list.xlsx");

        assert!(StoreDirectory::open(&path).unwrap().is_none());

        let dir = sample();
        dir.persist(&path).unwrap();
        let reopened = StoreDirectory::open(&path).unwrap().unwrap();
        assert_eq!(reopened.all_rows(), dir.all_rows());

        let replacement = directory_from(&["store number", "region code"], &[&["1", "X"]]);
        replacement.persist(&path).unwrap();
        let reopened = StoreDirectory::open(&path).unwrap().unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_slot_named_csv_reopens() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stores.csv");

        sample().persist(&path).unwrap();
        let reopened = StoreDirectory::open(&path).unwrap().unwrap();
        assert_eq!(reopened.lookup_one("103").unwrap(), Some("R2"));
    }

    #[test]
    fn test_display_aligns_columns() {
        let text = sample().head(1).to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("store number  region code"));
        assert!(lines[1].starts_with("101"));
    }
}
