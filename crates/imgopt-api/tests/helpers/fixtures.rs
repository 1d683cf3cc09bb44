//! Test fixtures: workbooks and images.

use imgopt_processing::{CellValue, Sheet, Workbook};
use std::io::Cursor;

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// An xlsx file whose first sheet holds `rows` from A1.
pub fn workbook(rows: &[Vec<String>]) -> Vec<u8> {
    let mut sheet = Sheet::new("Products");
    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            if !value.is_empty() {
                sheet.set(r as u32, c as u32, CellValue::Text(value.clone()));
            }
        }
    }
    Workbook::new(vec![sheet])
        .to_xlsx_bytes()
        .expect("Failed to write workbook")
}

/// Column A holds a header and then one URL per row.
pub fn single_column_workbook(urls: &[String]) -> Vec<u8> {
    let mut rows = vec![vec!["Image URL".to_string(), "Name".to_string()]];
    for (i, url) in urls.iter().enumerate() {
        rows.push(vec![url.clone(), format!("Product {}", i + 1)]);
    }
    workbook(&rows)
}

/// A solid PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 30, 30]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("Failed to encode PNG");
    out.into_inner()
}
