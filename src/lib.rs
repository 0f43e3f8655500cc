//! # edgequake-convert
//!
//! Document and image conversion with fallback strategy chains and a timed
//! storage cleanup task.
//!
//! A request names a conversion kind (`merge-pdf`, `pdf-to-word`,
//! `word-to-pdf`, `jpg-to-pdf`, `png-to-pdf`, `image-convert`,
//! `compress-image`, `crop-image`) and carries one or more uploaded files.
//! The Dispatcher runs the kind's strategy chain: native office automation
//! first when the host has it, then progressively plainer pure-Rust
//! renderers. The first strategy that succeeds wins; its output is renamed
//! into the Storage Area under a request-unique name.
//!
//! ## Pipeline Overview
//!
//! ```text
//! uploads
//!  │
//!  ├─ 1. Submit    parse kind + params, size limit, persist as {id}_{name}
//!  ├─ 2. Validate  arity, parameters, magic bytes
//!  ├─ 3. Chain     skip unavailable → run (lane, timeout) → fall through
//!  ├─ 4. Commit    atomic rename of the winning attempt's file
//!  └─ 5. Sweep     background task deletes files older than 10 minutes
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_convert::{Converter, ConverterConfig, RawParams, Upload};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let converter = Converter::new(ConverterConfig::default())?;
//!     let sweeper = converter.spawn_sweeper(CancellationToken::new());
//!
//!     let upload = Upload::from_path("photo.jpg".as_ref()).await?;
//!     let raw = RawParams {
//!         format: Some("png".into()),
//!         ..RawParams::default()
//!     };
//!     let result = converter.submit("image-convert", vec![upload], &raw).await;
//!     let response = converter.response(&result);
//!     println!("{} {}", response.http_status(), response.to_json());
//!
//!     sweeper.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `fileconv` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-convert = { version = "0.1", default-features = false }
//! ```
//!
//! ## Backends
//!
//! | Backend | Used by | Found via |
//! |---------|---------|-----------|
//! | LibreOffice `soffice` | pdf-to-word, word-to-pdf | `FILECONV_SOFFICE_PATH`, `PATH`, standard install dirs |
//! | `unoconv` | word-to-pdf | `FILECONV_UNOCONV_PATH`, `PATH` |
//! | pdfium | pdf-to-word | `PDFIUM_LIB_PATH`, pdfium cache, system library dirs |
//!
//! Everything else is pure Rust and always available.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod chain;
pub mod config;
pub mod convert;
pub mod error;
pub mod kind;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod request;
pub mod storage;
pub mod sweeper;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use chain::{
    Capabilities, ChainRegistry, CustomStrategy, Strategy, StrategyChain, StrategyJob,
};
pub use config::{ConverterConfig, ConverterConfigBuilder, PageSelection};
pub use convert::{output_file_name, Converter};
pub use error::{ConvertError, StatusClass, StrategyError};
pub use kind::{ConversionKind, TargetFormat};
pub use output::{
    AttemptStatus, ConversionOutcome, ConversionResponse, ResponseBody, StrategyAttempt,
};
pub use progress::{ConversionObserver, NoopObserver, ObserverRef};
pub use request::{ConversionParams, ConversionRequest, CropBox, RawParams, Upload};
pub use storage::{secure_filename, RequestId, StorageArea, StoredFile};
pub use sweeper::{RetentionPolicy, SweepReport, Sweeper, SweeperHandle};
