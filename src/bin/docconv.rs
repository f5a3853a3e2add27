//! CLI binary for docconv.
//!
//! `docconv serve` runs the HTTP gateway; `docconv convert` runs a single
//! conversion locally and prints the produced paths.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docconv::server::{self, AppState};
use docconv::{ConversionKind, ConversionPool, ConvertOptions, PageSelection, ServiceConfig, StorageLayout};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service on port 5000
  docconv serve --port 5000

  # Convert a Word file to PDF without the server
  docconv convert word-to-pdf report.docx -o out/

  # Render pages 2-4 of a PDF at 300 DPI
  docconv convert pdf-to-image slides.pdf --pages 2-4 --dpi 300

CONVERSIONS:
  pdf-to-word     .pdf  → .docx
  word-to-pdf     .docx → .pdf
  excel-to-pdf    .xlsx .xlsm .xlsb .xls .ods → .pdf
  image-to-pdf    png, jpeg, gif, bmp, tiff, webp, ico → .pdf
  pdf-to-image    .pdf  → one .png per page

ENVIRONMENT VARIABLES:
  RUST_LOG                 Log filter (overrides -v)
  DOCCONV_PDFIUM_LIB       Path to libpdfium, if not installed system-wide
"#;

/// Convert documents between PDF, Word, spreadsheet and image formats.
#[derive(Parser, Debug)]
#[command(
    name = "docconv",
    version,
    about = "Convert documents between PDF, Word, spreadsheet and image formats",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCCONV_VERBOSE")]
    verbose: bool,

    /// Path to libpdfium. Default: the system library.
    #[arg(long, global = true, env = "DOCCONV_PDFIUM_LIB")]
    pdfium_lib: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP conversion service.
    Serve(ServeArgs),
    /// Convert one file locally.
    Convert(ConvertArgs),
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Address to bind.
    #[arg(long, env = "DOCCONV_HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on.
    #[arg(short, long, env = "DOCCONV_PORT", default_value_t = 5000)]
    port: u16,

    /// Directory for uploaded files.
    #[arg(long, env = "DOCCONV_UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// Directory for converted files.
    #[arg(long, env = "DOCCONV_CONVERTED_DIR", default_value = "converted")]
    converted_dir: PathBuf,

    /// Storage layout: per-job keeps every request apart, flat keys by filename.
    #[arg(long, env = "DOCCONV_LAYOUT", value_enum, default_value = "per-job")]
    layout: LayoutArg,

    /// Maximum conversions running at once. Default: CPU count.
    #[arg(long, env = "DOCCONV_MAX_CONCURRENT")]
    max_concurrent: Option<usize>,

    /// Per-conversion time budget in seconds.
    #[arg(long, env = "DOCCONV_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Largest accepted upload in MiB.
    #[arg(long, env = "DOCCONV_MAX_UPLOAD_MB", default_value_t = 50)]
    max_upload_mb: usize,

    /// Default rendering DPI for pdf-to-image (72–400).
    #[arg(long, env = "DOCCONV_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Keep the intermediate markup written by word-to-pdf and excel-to-pdf.
    #[arg(long, env = "DOCCONV_KEEP_INTERMEDIATE")]
    keep_intermediate: bool,
}

#[derive(clap::Args, Debug)]
struct ConvertArgs {
    /// Conversion to run, e.g. word-to-pdf.
    kind: ConversionKind,

    /// Input file.
    input: PathBuf,

    /// Directory for the output. Default: the input's directory.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Page selection for PDF input: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, default_value = "all")]
    pages: PageSelection,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "DOCCONV_PASSWORD")]
    password: Option<String>,

    /// Rendering DPI for pdf-to-image (72–400).
    #[arg(long, value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: Option<u32>,

    /// Per-conversion time budget in seconds.
    #[arg(long, default_value_t = 120)]
    timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LayoutArg {
    PerJob,
    Flat,
}

impl From<LayoutArg> for StorageLayout {
    fn from(v: LayoutArg) -> Self {
        match v {
            LayoutArg::PerJob => StorageLayout::PerJob,
            LayoutArg::Flat => StorageLayout::Flat,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => serve(args, cli.pdfium_lib).await,
        Command::Convert(args) => convert(args, cli.pdfium_lib).await,
    }
}

async fn serve(args: ServeArgs, pdfium_lib: Option<PathBuf>) -> Result<()> {
    let mut builder = ServiceConfig::builder()
        .upload_dir(args.upload_dir)
        .converted_dir(args.converted_dir)
        .layout(args.layout.into())
        .dpi(args.dpi)
        .conversion_timeout_secs(args.timeout)
        .max_upload_bytes(args.max_upload_mb.saturating_mul(1024 * 1024))
        .keep_intermediate_markup(args.keep_intermediate);
    if let Some(n) = args.max_concurrent {
        builder = builder.max_concurrent_conversions(n);
    }
    if let Some(path) = pdfium_lib {
        builder = builder.pdfium_lib_path(path);
    }
    let config = builder.build().context("Invalid service configuration")?;

    let state = AppState::open(config)
        .await
        .context("Failed to open the upload and converted stores")?;
    server::serve(state, SocketAddr::new(args.host, args.port))
        .await
        .context("Server failed")?;
    Ok(())
}

async fn convert(args: ConvertArgs, pdfium_lib: Option<PathBuf>) -> Result<()> {
    let file_name = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("'{}' does not name a file", args.input.display()))?;
    if !args.kind.accepts(&file_name) {
        anyhow::bail!(
            "'{}' is not accepted by {}; expected {}",
            file_name,
            args.kind,
            args.kind.accepted_inputs()
        );
    }

    let out_dir = match args.output {
        Some(dir) => dir,
        None => args
            .input
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("Cannot create '{}'", out_dir.display()))?;

    let mut builder = ServiceConfig::builder()
        .conversion_timeout_secs(args.timeout)
        .max_concurrent_conversions(1);
    if let Some(path) = pdfium_lib {
        builder = builder.pdfium_lib_path(path);
    }
    let pool = ConversionPool::new(Arc::new(builder.build()?));

    let options = ConvertOptions {
        pages: args.pages,
        password: args.password,
        dpi: args.dpi,
    };
    let output = pool
        .convert(args.kind, args.input.clone(), out_dir, options)
        .await
        .with_context(|| format!("Failed to convert '{}'", args.input.display()))?;

    for file in &output.files {
        println!("{}", file.display());
    }
    eprintln!(
        "{} page(s) in {}ms",
        output.pages, output.duration_ms
    );
    Ok(())
}
