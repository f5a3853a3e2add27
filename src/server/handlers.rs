//! Route handlers.

use crate::convert::{content_type, ConversionKind};
use crate::server::error::ApiError;
use crate::server::upload::read_upload;
use crate::server::AppState;
use crate::storage::{Handle, Job};
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::info;

/// Response header naming the stored artifact.
pub const HANDLE_HEADER: HeaderName = HeaderName::from_static("x-docconv-handle");

#[derive(Serialize)]
pub struct Banner {
    message: &'static str,
    endpoints: Vec<String>,
}

/// `GET /`
pub async fn root() -> Json<Banner> {
    Json(Banner {
        message: "Welcome to the Document Converter API",
        endpoints: ConversionKind::ALL
            .iter()
            .map(|k| format!("/convert/{}", k.route_name()))
            .collect(),
    })
}

#[derive(Serialize)]
pub struct FoldersExist {
    uploads: bool,
    converted: bool,
}

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    upload_folder: String,
    converted_folder: String,
    folders_exist: FoldersExist,
    version: &'static str,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "healthy",
        upload_folder: state.incoming.root().display().to_string(),
        converted_folder: state.converted.root().display().to_string(),
        folders_exist: FoldersExist {
            uploads: state.incoming.is_available().await,
            converted: state.converted.is_available().await,
        },
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct PageImages {
    message: String,
    converted_images: Vec<String>,
    total_pages: usize,
}

/// `POST /convert/:kind`
pub async fn convert(
    State(state): State<AppState>,
    Path(route): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let kind: ConversionKind = route
        .parse()
        .map_err(|_| ApiError::NotFound(format!("No conversion named '{route}'")))?;
    let multipart = multipart.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;

    let upload = read_upload(multipart, state.config.max_upload_bytes).await?;
    if !kind.accepts(&upload.file_name) {
        return Err(ApiError::UnsupportedFormat {
            kind,
            file_name: upload.file_name,
            expected: kind.accepted_inputs(),
        });
    }

    let job = Job::new(state.config.layout);
    let input_handle = job
        .handle(&upload.file_name)
        .ok_or_else(|| ApiError::MissingFile(format!("Invalid filename '{}'", upload.file_name)))?;
    let input_path = state.incoming.put(&input_handle, &upload.bytes).await?;
    let out_dir = state.converted.job_dir(&job).await?;
    info!(job = %job.id(), "Converting {} via {}", input_handle, kind);

    let output = state
        .pool
        .convert(kind, input_path, out_dir, upload.options)
        .await?;

    let handles = output
        .files
        .iter()
        .map(|path| {
            path.file_name()
                .and_then(|n| job.handle(&n.to_string_lossy()))
                .ok_or_else(|| {
                    ApiError::from(crate::error::ConvertError::Internal(format!(
                        "converter produced an unnamed file: {}",
                        path.display()
                    )))
                })
        })
        .collect::<Result<Vec<Handle>, ApiError>>()?;

    if kind == ConversionKind::PdfToImage {
        return Ok(Json(PageImages {
            message: format!("PDF converted to {} images", handles.len()),
            total_pages: handles.len(),
            converted_images: handles.iter().map(|h| h.to_string()).collect(),
        })
        .into_response());
    }

    let handle = handles.into_iter().next().ok_or_else(|| {
        ApiError::from(crate::error::ConvertError::Internal(
            "converter produced no file".into(),
        ))
    })?;
    attachment(&state, &handle).await
}

/// `GET /download/*handle`
pub async fn download(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let handle = Handle::parse(&raw, state.config.layout)
        .ok_or_else(|| ApiError::InvalidRequest(format!("Malformed handle '{}'", raw.escape_debug())))?;
    if !state.converted.exists(&handle).await {
        return Err(ApiError::NotFound(format!("No converted file '{handle}'")));
    }
    attachment(&state, &handle).await
}

/// The stored artifact as a download.
async fn attachment(state: &AppState, handle: &Handle) -> Result<Response, ApiError> {
    let bytes = state.converted.get(handle).await?;
    let name = handle.file_name();

    let header_err = |e: axum::http::header::InvalidHeaderValue| {
        ApiError::from(crate::error::ConvertError::Internal(format!(
            "cannot build headers for '{handle}': {e}"
        )))
    };
    let disposition = HeaderValue::from_bytes(
        format!("attachment; filename=\"{}\"", name.replace(['"', '\\'], "_")).as_bytes(),
    )
    .map_err(header_err)?;
    let handle_value = HeaderValue::from_bytes(handle.as_str().as_bytes()).map_err(header_err)?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type(name))),
            (header::CONTENT_DISPOSITION, disposition),
            (HANDLE_HEADER, handle_value),
        ],
        bytes,
    )
        .into_response())
}

/// Fallback for unknown routes.
pub async fn not_found() -> ApiError {
    ApiError::NotFound("No such endpoint".into())
}
