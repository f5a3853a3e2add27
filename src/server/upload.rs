//! Multipart upload extraction.
//!
//! The whole form is read before anything touches the disk, so a request
//! that fails validation leaves no file behind.

use crate::config::ConvertOptions;
use crate::server::error::ApiError;
use crate::storage::sanitize_file_name;
use axum::body::Bytes;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::Multipart;
use axum::http::StatusCode;
use tracing::debug;

/// A validated upload.
#[derive(Debug)]
pub struct Upload {
    /// Final path component of the client's filename.
    pub file_name: String,
    pub bytes: Bytes,
    pub options: ConvertOptions,
}

/// Read the form: one `file` field plus the optional `password`, `pages`
/// and `dpi` text fields. Other fields are ignored.
pub async fn read_upload(mut multipart: Multipart, limit: usize) -> Result<Upload, ApiError> {
    let mut file: Option<(Option<String>, Bytes)> = None;
    let mut options = ConvertOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                if file.is_some() {
                    return Err(ApiError::InvalidRequest(
                        "Only one file may be uploaded per request".into(),
                    ));
                }
                let raw_name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
                file = Some((raw_name, bytes));
            }
            "password" => {
                let value = text(field, limit).await?;
                if !value.is_empty() {
                    options.password = Some(value);
                }
            }
            "pages" => {
                options.pages = text(field, limit)
                    .await?
                    .parse()
                    .map_err(|e: crate::config::PageSelectionError| {
                        ApiError::InvalidRequest(e.to_string())
                    })?;
            }
            "dpi" => {
                let value = text(field, limit).await?;
                if !value.trim().is_empty() {
                    options.dpi = Some(parse_dpi(&value)?);
                }
            }
            other => debug!("Ignoring multipart field '{}'", other),
        }
    }

    let (raw_name, bytes) = file.ok_or_else(|| ApiError::MissingFile("No file provided".into()))?;
    let raw_name = raw_name.unwrap_or_default();
    if raw_name.trim().is_empty() {
        return Err(ApiError::MissingFile("No file selected".into()));
    }
    let file_name = sanitize_file_name(&raw_name)
        .ok_or_else(|| ApiError::MissingFile(format!("Invalid filename '{}'", raw_name.escape_debug())))?;

    debug!("Received upload '{}' ({} bytes)", file_name, bytes.len());
    Ok(Upload {
        file_name,
        bytes,
        options,
    })
}

async fn text(field: Field<'_>, limit: usize) -> Result<String, ApiError> {
    field.text().await.map_err(|e| multipart_error(e, limit))
}

fn parse_dpi(value: &str) -> Result<u32, ApiError> {
    let dpi: u32 = value
        .trim()
        .parse()
        .map_err(|_| ApiError::InvalidRequest(format!("dpi '{}' is not a number", value.trim())))?;
    if !(72..=400).contains(&dpi) {
        return Err(ApiError::InvalidRequest(format!(
            "dpi {dpi} is out of range (72-400)"
        )));
    }
    Ok(dpi)
}

fn multipart_error(e: MultipartError, limit: usize) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge { limit }
    } else {
        ApiError::InvalidRequest(format!("Malformed multipart body: {}", e.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dpi_bounds() {
        assert_eq!(parse_dpi(" 150 ").unwrap(), 150);
        assert!(parse_dpi("71").is_err());
        assert!(parse_dpi("401").is_err());
        assert!(parse_dpi("high").is_err());
    }
}
