//! Multipart helpers for the batch upload and the login form.

use axum::extract::multipart::MultipartError;
use axum::extract::Multipart;
use axum::http::StatusCode;
use imgopt_core::AppError;

/// Fields of a batch upload form.
#[derive(Debug)]
pub struct BatchUpload {
    pub data: Vec<u8>,
    pub filename: String,
    pub mode: Option<String>,
}

fn multipart_error(context: &str, err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("Upload exceeds the maximum allowed size".to_string())
    } else {
        AppError::InvalidInput(format!("{}: {}", context, err.body_text()))
    }
}

/// Read the `file` and optional `mode` fields. Exactly one `file` field is accepted;
/// unknown fields are ignored.
pub async fn extract_batch_upload(mut multipart: Multipart) -> Result<BatchUpload, AppError> {
    let mut file: Option<(Vec<u8>, String)> = None;
    let mut mode: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("Failed to read multipart", e))?
    {
        let field_name = field.name().map(|s| s.to_string()).unwrap_or_default();
        match field_name.as_str() {
            "file" => {
                if file.is_some() {
                    return Err(AppError::InvalidInput(
                        "Multiple file fields are not allowed; send exactly one field named 'file'"
                            .to_string(),
                    ));
                }
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error("Failed to read file data", e))?;
                file = Some((data.to_vec(), filename));
            }
            "mode" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| multipart_error("Failed to read mode", e))?;
                mode = Some(value);
            }
            _ => {}
        }
    }

    let (data, filename) =
        file.ok_or_else(|| AppError::InvalidInput("No file provided".to_string()))?;
    Ok(BatchUpload {
        data,
        filename,
        mode,
    })
}

/// Read one text field from a multipart form.
pub async fn extract_text_field(
    mut multipart: Multipart,
    name: &str,
) -> Result<Option<String>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("Failed to read multipart", e))?
    {
        let field_name = field.name().map(|s| s.to_string()).unwrap_or_default();
        if field_name == name {
            let value = field
                .text()
                .await
                .map_err(|e| multipart_error("Failed to read form field", e))?;
            return Ok(Some(value));
        }
    }
    Ok(None)
}

pub fn validate_file_size(file_size: usize, max_size: usize) -> Result<(), AppError> {
    if file_size == 0 {
        return Err(AppError::InvalidInput("Uploaded file is empty".to_string()));
    }
    if file_size > max_size {
        return Err(AppError::PayloadTooLarge(format!(
            "File size exceeds maximum allowed size of {} MB",
            max_size / 1024 / 1024
        )));
    }
    Ok(())
}

pub fn validate_xlsx_filename(filename: &str) -> Result<(), AppError> {
    if !filename.to_lowercase().ends_with(".xlsx") {
        return Err(AppError::InvalidInput(
            "Only .xlsx workbooks are accepted".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_file_size() {
        assert!(validate_file_size(10, 100).is_ok());
        assert!(matches!(validate_file_size(0, 100), Err(AppError::InvalidInput(_))));
        assert!(matches!(
            validate_file_size(101, 100),
            Err(AppError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_validate_xlsx_filename() {
        assert!(validate_xlsx_filename("Products.XLSX").is_ok());
        assert!(validate_xlsx_filename("products.xlsx").is_ok());
        assert!(validate_xlsx_filename("products.xls").is_err());
        assert!(validate_xlsx_filename("products.csv").is_err());
        assert!(validate_xlsx_filename("").is_err());
    }
}
