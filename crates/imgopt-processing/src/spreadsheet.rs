//! In-memory workbook model.
//!
//! Only cell values are carried over from the uploaded file; styles, formulas and
//! merged ranges are not. Coordinates are zero-based and absolute, so `(0, 0)` is
//! cell A1 whatever range the source sheet actually used.

use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
use std::collections::BTreeMap;
use std::io::Cursor;
use thiserror::Error;

/// Largest column index an xlsx sheet can hold (XFD).
const MAX_COLUMN: u32 = 16_383;

#[derive(Debug, Error)]
pub enum SpreadsheetError {
    #[error("Not a readable xlsx workbook: {0}")]
    Read(String),

    #[error("Workbook has no worksheet")]
    NoWorksheet,

    #[error("Failed to write workbook: {0}")]
    Write(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Dates, durations and error cells are kept as their display text.
fn cell_value(value: &Data) -> Option<CellValue> {
    match value {
        Data::Empty => None,
        Data::String(s) => Some(CellValue::Text(s.clone())),
        Data::Float(f) => Some(CellValue::Number(*f)),
        Data::Int(i) => Some(CellValue::Number(*i as f64)),
        Data::Bool(b) => Some(CellValue::Bool(*b)),
        other => Some(CellValue::Text(other.to_string())),
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub name: String,
    cells: BTreeMap<(u32, u32), CellValue>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: BTreeMap::new(),
        }
    }

    pub fn get(&self, row: u32, col: u32) -> Option<&CellValue> {
        self.cells.get(&(row, col))
    }

    pub fn set(&mut self, row: u32, col: u32, value: CellValue) {
        self.cells.insert((row, col), value);
    }

    /// Index of the last row holding a value, if any.
    pub fn last_row(&self) -> Option<u32> {
        self.cells.keys().map(|(row, _)| *row).max()
    }

    /// Non-empty cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (u32, u32, &CellValue)> {
        self.cells.iter().map(|((row, col), value)| (*row, *col, value))
    }

    /// Non-empty cells of one row, left to right.
    pub fn row(&self, row: u32) -> impl Iterator<Item = (u32, &CellValue)> {
        self.cells
            .range((row, 0)..=(row, u32::MAX))
            .map(|((_, col), value)| (*col, value))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Workbook {
    sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new(sheets: Vec<Sheet>) -> Self {
        Self { sheets }
    }

    /// Parse an xlsx file. Fails if the bytes are not a workbook or it has no sheet.
    pub fn from_xlsx_bytes(bytes: &[u8]) -> Result<Self, SpreadsheetError> {
        let mut source: Xlsx<Cursor<&[u8]>> = open_workbook_from_rs(Cursor::new(bytes))
            .map_err(|e: calamine::XlsxError| SpreadsheetError::Read(e.to_string()))?;

        let names = source.sheet_names().to_vec();
        if names.is_empty() {
            return Err(SpreadsheetError::NoWorksheet);
        }

        let mut sheets = Vec::with_capacity(names.len());
        for name in names {
            let range = source
                .worksheet_range(&name)
                .map_err(|e| SpreadsheetError::Read(e.to_string()))?;
            let mut sheet = Sheet::new(name);
            if let Some((start_row, start_col)) = range.start() {
                for (row, col, value) in range.used_cells() {
                    if let Some(value) = cell_value(value) {
                        sheet.set(start_row + row as u32, start_col + col as u32, value);
                    }
                }
            }
            sheets.push(sheet);
        }

        Ok(Self { sheets })
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn first_sheet(&self) -> Option<&Sheet> {
        self.sheets.first()
    }

    pub fn first_sheet_mut(&mut self) -> Option<&mut Sheet> {
        self.sheets.first_mut()
    }

    /// Serialize every sheet back to xlsx.
    pub fn to_xlsx_bytes(&self) -> Result<Vec<u8>, SpreadsheetError> {
        let write_err = |e: rust_xlsxwriter::XlsxError| SpreadsheetError::Write(e.to_string());

        let mut out = rust_xlsxwriter::Workbook::new();
        for sheet in &self.sheets {
            let worksheet = out.add_worksheet();
            if !sheet.name.is_empty() {
                worksheet.set_name(&sheet.name).map_err(write_err)?;
            }
            for (row, col, value) in sheet.cells() {
                if col > MAX_COLUMN {
                    return Err(SpreadsheetError::Write(format!(
                        "Column {} is out of range",
                        col
                    )));
                }
                let col = col as u16;
                match value {
                    CellValue::Text(s) => worksheet.write_string(row, col, s.as_str()),
                    CellValue::Number(n) => worksheet.write_number(row, col, *n),
                    CellValue::Bool(b) => worksheet.write_boolean(row, col, *b),
                }
                .map_err(write_err)?;
            }
        }

        out.save_to_buffer().map_err(write_err)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build an xlsx file whose first sheet holds `rows` starting at A1.
    pub(crate) fn xlsx_from_rows(rows: &[&[&str]]) -> Vec<u8> {
        let mut sheet = Sheet::new("Sheet1");
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                if !value.is_empty() {
                    sheet.set(r as u32, c as u32, CellValue::Text(value.to_string()));
                }
            }
        }
        Workbook::new(vec![sheet]).to_xlsx_bytes().unwrap()
    }

    #[test]
    fn test_write_then_read_keeps_values_and_positions() {
        let mut first = Sheet::new("Products");
        first.set(0, 0, CellValue::Text("URL".into()));
        first.set(1, 0, CellValue::Text("http://example.com/a.png".into()));
        first.set(1, 2, CellValue::Number(42.5));
        first.set(3, 1, CellValue::Bool(true));
        let mut second = Sheet::new("Notes");
        second.set(2, 3, CellValue::Text("kept".into()));

        let bytes = Workbook::new(vec![first, second]).to_xlsx_bytes().unwrap();
        let book = Workbook::from_xlsx_bytes(&bytes).unwrap();

        assert_eq!(book.sheets().len(), 2);
        let sheet = book.first_sheet().unwrap();
        assert_eq!(sheet.name, "Products");
        assert_eq!(sheet.get(1, 0).and_then(|v| v.as_text()), Some("http://example.com/a.png"));
        assert_eq!(sheet.get(1, 2), Some(&CellValue::Number(42.5)));
        assert_eq!(sheet.get(3, 1), Some(&CellValue::Bool(true)));
        assert_eq!(sheet.last_row(), Some(3));
        assert_eq!(
            book.sheets()[1].get(2, 3).and_then(|v| v.as_text()),
            Some("kept")
        );
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            Workbook::from_xlsx_bytes(b"definitely not a zip archive"),
            Err(SpreadsheetError::Read(_))
        ));
    }

    #[test]
    fn test_row_iteration_is_left_to_right() {
        let mut sheet = Sheet::new("S");
        sheet.set(0, 5, CellValue::Text("f".into()));
        sheet.set(0, 1, CellValue::Text("b".into()));
        sheet.set(1, 0, CellValue::Text("next row".into()));
        let cols: Vec<u32> = sheet.row(0).map(|(c, _)| c).collect();
        assert_eq!(cols, vec![1, 5]);
    }
}
