use imgopt_core::ProcessingMode;
use regex::Regex;
use std::sync::LazyLock;

use crate::spreadsheet::Sheet;

static PICTURE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^PICTURE_\d{1,2}$").expect("valid regex"));

/// One image URL found in the sheet, with the zero-based cell it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCell {
    pub row: u32,
    pub col: u32,
    pub url: String,
}

fn image_url(sheet: &Sheet, row: u32, col: u32) -> Option<String> {
    let text = sheet.get(row, col)?.as_text()?.trim();
    if text.to_lowercase().starts_with("http") {
        Some(text.to_string())
    } else {
        None
    }
}

/// Locate the image URLs of the sheet, in row-major order. Row 0 is a header and
/// never yields items.
pub fn extract_urls(sheet: &Sheet, mode: ProcessingMode) -> Vec<ImageCell> {
    let columns: Vec<u32> = match mode {
        ProcessingMode::SingleColumn => vec![0],
        ProcessingMode::PictureColumns => sheet
            .row(0)
            .filter(|(_, header)| {
                header
                    .as_text()
                    .is_some_and(|h| PICTURE_HEADER.is_match(h.trim()))
            })
            .map(|(col, _)| col)
            .collect(),
    };

    let Some(last_row) = sheet.last_row() else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for row in 1..=last_row {
        for &col in &columns {
            if let Some(url) = image_url(sheet, row, col) {
                out.push(ImageCell { row, col, url });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::CellValue;

    fn sheet(rows: &[&[&str]]) -> Sheet {
        let mut sheet = Sheet::new("S");
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                if !value.is_empty() {
                    sheet.set(r as u32, c as u32, CellValue::Text(value.to_string()));
                }
            }
        }
        sheet
    }

    #[test]
    fn test_single_column_skips_header_and_non_urls() {
        let s = sheet(&[
            &["http://example.com/header.png"],
            &["  HTTP://example.com/a.png  "],
            &["not a url"],
            &[""],
            &["https://example.com/b.jpg", "http://ignored.com/c.png"],
        ]);
        let urls = extract_urls(&s, ProcessingMode::SingleColumn);
        assert_eq!(
            urls,
            vec![
                ImageCell { row: 1, col: 0, url: "HTTP://example.com/a.png".into() },
                ImageCell { row: 4, col: 0, url: "https://example.com/b.jpg".into() },
            ]
        );
    }

    #[test]
    fn test_numbers_are_not_urls() {
        let mut s = sheet(&[&["URL"]]);
        s.set(1, 0, CellValue::Number(12.0));
        assert!(extract_urls(&s, ProcessingMode::SingleColumn).is_empty());
    }

    #[test]
    fn test_picture_columns_match_headers_case_insensitively() {
        let s = sheet(&[
            &["SKU", "picture_1", "PICTURE_12", "PICTURE_123", "PICTURE_"],
            &["1", "http://x/1.png", "http://x/2.png", "http://x/3.png", "http://x/4.png"],
            &["2", "", "https://x/5.png", "", ""],
        ]);
        let urls = extract_urls(&s, ProcessingMode::PictureColumns);
        let coords: Vec<(u32, u32)> = urls.iter().map(|c| (c.row, c.col)).collect();
        assert_eq!(coords, vec![(1, 1), (1, 2), (2, 2)]);
    }

    #[test]
    fn test_picture_mode_without_matching_headers_yields_nothing() {
        let s = sheet(&[&["URL"], &["http://x/1.png"]]);
        assert!(extract_urls(&s, ProcessingMode::PictureColumns).is_empty());
    }

    #[test]
    fn test_empty_sheet() {
        assert!(extract_urls(&Sheet::new("empty"), ProcessingMode::SingleColumn).is_empty());
    }
}
