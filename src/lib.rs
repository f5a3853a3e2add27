//! # docconv
//!
//! Convert documents between PDF, Word, spreadsheet and image formats, as a
//! library, a command-line tool or an HTTP service.
//!
//! ## Conversions
//!
//! | Route            | Input                         | Output                  |
//! |------------------|-------------------------------|-------------------------|
//! | `pdf-to-word`    | `.pdf`                        | `.docx`                 |
//! | `word-to-pdf`    | `.docx`                       | `.pdf`                  |
//! | `excel-to-pdf`   | `.xlsx .xlsm .xlsb .xls .ods` | `.pdf`                  |
//! | `image-to-pdf`   | `.png .jpg .jpeg .gif .bmp …` | `.pdf` (one page)       |
//! | `pdf-to-image`   | `.pdf`                        | one `.png` per page     |
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload ─► store (uploads/) ─► ConversionPool ─► Converter ─► store (converted/)
//!                                 │ semaphore       │ pdfium / docx / sheet
//!                                 │ timeout         │ markup → lopdf
//!                                 └ spawn_blocking  └ image
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docconv::{ConversionKind, ConversionPool, ConvertOptions, ServiceConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = ConversionPool::new(Arc::new(ServiceConfig::default()));
//!     let output = pool
//!         .convert(
//!             ConversionKind::WordToPdf,
//!             "report.docx".into(),
//!             "out".into(),
//!             ConvertOptions::default(),
//!         )
//!         .await?;
//!     println!("wrote {:?} in {}ms", output.files, output.duration_ms);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | HTTP gateway and the `docconv` binary (axum + tower-http + clap + anyhow + tracing-subscriber) |
//!
//! Disable `server` when using only the conversion library:
//! ```toml
//! docconv = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod pipeline;
#[cfg(feature = "server")]
pub mod server;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConvertOptions, PageSelection, ServiceConfig, ServiceConfigBuilder, StorageLayout};
pub use convert::{ConversionKind, ConversionOutput, ConversionPool, Converter};
pub use error::{ConvertError, ErrorKind};
pub use storage::{ArtifactStore, Handle, Job, LocalStore};
