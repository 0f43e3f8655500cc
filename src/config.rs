//! Configuration types for the converter.
//!
//! All service behaviour is controlled through [`ConverterConfig`], built via
//! its [`ConverterConfigBuilder`]. One struct can be shared across request
//! tasks and the Sweeper, and printed for logging.

use crate::error::ConvertError;
use crate::progress::ObserverRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for a [`crate::Converter`].
///
/// Built via [`ConverterConfig::builder()`] or using
/// [`ConverterConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_convert::ConverterConfig;
///
/// let config = ConverterConfig::builder()
///     .storage_dir("/tmp/uploads")
///     .max_file_age_secs(300)
///     .native_automation(false)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConverterConfig {
    /// Storage Area directory. Created on first use. Default: `uploads`.
    pub storage_dir: PathBuf,

    /// Retention window in seconds. Default: 600.
    ///
    /// Files whose last modification is older than this are deleted by the
    /// next Sweeper pass. Inputs and outputs are treated alike.
    pub max_file_age_secs: u64,

    /// Sleep between Sweeper passes in seconds. Default: 60.
    pub sweep_interval_secs: u64,

    /// Quality used by `compress-image` when the request gives none. Range: 1–100. Default: 50.
    pub default_quality: u8,

    /// JPEG quality for `image-convert` and image→PDF embedding. Default: 95.
    pub convert_quality: u8,

    /// Upper bound on a single strategy attempt in seconds. Default: 120.
    ///
    /// A timed-out attempt counts as a failure and the chain advances.
    /// Time spent waiting for an automation lane is not counted.
    pub strategy_timeout_secs: u64,

    /// Total upload size ceiling per request in bytes. Default: 50 MiB.
    pub max_upload_bytes: u64,

    /// Allow office-automation strategies (LibreOffice, unoconv). Default: true.
    ///
    /// When false they report themselves unavailable and chains fall through
    /// to the software strategies.
    pub native_automation: bool,

    /// Explicit `soffice` path. `None` → probed.
    pub soffice_path: Option<PathBuf>,

    /// Explicit `unoconv` path. `None` → probed.
    pub unoconv_path: Option<PathBuf>,

    /// Explicit pdfium shared library. `None` → probed.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Prefix of download URLs handed back to clients. Default: `http://localhost:5000`.
    pub public_base_url: String,

    /// Optional dispatch observer.
    pub observer: Option<ObserverRef>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("uploads"),
            max_file_age_secs: 600,
            sweep_interval_secs: 60,
            default_quality: 50,
            convert_quality: 95,
            strategy_timeout_secs: 120,
            max_upload_bytes: 50 * 1024 * 1024,
            native_automation: true,
            soffice_path: None,
            unoconv_path: None,
            pdfium_lib_path: None,
            public_base_url: "http://localhost:5000".to_string(),
            observer: None,
        }
    }
}

impl fmt::Debug for ConverterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterConfig")
            .field("storage_dir", &self.storage_dir)
            .field("max_file_age_secs", &self.max_file_age_secs)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("default_quality", &self.default_quality)
            .field("convert_quality", &self.convert_quality)
            .field("strategy_timeout_secs", &self.strategy_timeout_secs)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("native_automation", &self.native_automation)
            .field("soffice_path", &self.soffice_path)
            .field("unoconv_path", &self.unoconv_path)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field("public_base_url", &self.public_base_url)
            .field(
                "observer",
                &self.observer.as_ref().map(|_| "<dyn ConversionObserver>"),
            )
            .finish()
    }
}

impl ConverterConfig {
    /// Create a new builder for `ConverterConfig`.
    pub fn builder() -> ConverterConfigBuilder {
        ConverterConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn max_file_age(&self) -> Duration {
        Duration::from_secs(self.max_file_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn strategy_timeout(&self) -> Duration {
        Duration::from_secs(self.strategy_timeout_secs)
    }
}

/// Builder for [`ConverterConfig`].
#[derive(Debug)]
pub struct ConverterConfigBuilder {
    config: ConverterConfig,
}

impl ConverterConfigBuilder {
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage_dir = dir.into();
        self
    }

    pub fn max_file_age_secs(mut self, secs: u64) -> Self {
        self.config.max_file_age_secs = secs;
        self
    }

    pub fn sweep_interval_secs(mut self, secs: u64) -> Self {
        self.config.sweep_interval_secs = secs.max(1);
        self
    }

    pub fn default_quality(mut self, q: u8) -> Self {
        self.config.default_quality = q;
        self
    }

    pub fn convert_quality(mut self, q: u8) -> Self {
        self.config.convert_quality = q;
        self
    }

    pub fn strategy_timeout_secs(mut self, secs: u64) -> Self {
        self.config.strategy_timeout_secs = secs;
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn native_automation(mut self, v: bool) -> Self {
        self.config.native_automation = v;
        self
    }

    pub fn soffice_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.soffice_path = Some(path.into());
        self
    }

    pub fn unoconv_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.unoconv_path = Some(path.into());
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn public_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.public_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn observer(mut self, observer: ObserverRef) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConverterConfig, ConvertError> {
        let c = &self.config;
        for (name, q) in [
            ("default_quality", c.default_quality),
            ("convert_quality", c.convert_quality),
        ] {
            if !(1..=100).contains(&q) {
                return Err(ConvertError::InvalidConfig(format!(
                    "{name} must be 1–100, got {q}"
                )));
            }
        }
        if c.strategy_timeout_secs == 0 {
            return Err(ConvertError::InvalidConfig(
                "Strategy timeout must be ≥ 1 second".into(),
            ));
        }
        if c.max_upload_bytes == 0 {
            return Err(ConvertError::InvalidConfig(
                "Upload ceiling must be ≥ 1 byte".into(),
            ));
        }
        if c.storage_dir.as_os_str().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "Storage directory must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Specifies which pages of a PDF input to convert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Convert all pages (default).
    #[default]
    All,
    /// Convert a single page (1-indexed).
    Single(usize),
    /// Convert a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Convert specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    pub fn is_all(&self) -> bool {
        matches!(self, PageSelection::All)
    }
}

impl FromStr for PageSelection {
    type Err = ConvertError;

    /// Parse `all`, `5`, `3-15` or `1,3,5,7`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s;
        let s = s.trim().to_lowercase();
        let invalid = |reason: String| ConvertError::InvalidParameter {
            name: "pages",
            value: raw.to_string(),
            reason,
        };
        let page = |p: &str| -> Result<usize, ConvertError> {
            let n: usize = p
                .trim()
                .parse()
                .map_err(|_| invalid(format!("'{}' is not a page number", p.trim())))?;
            if n < 1 {
                return Err(invalid("pages are 1-indexed".into()));
            }
            Ok(n)
        };

        if s.is_empty() || s == "all" {
            return Ok(PageSelection::All);
        }

        if let Some((start, end)) = s.split_once('-') {
            let (start, end) = (page(start)?, page(end)?);
            if start > end {
                return Err(invalid(format!(
                    "range {start}-{end}: start must be <= end"
                )));
            }
            return Ok(PageSelection::Range(start, end));
        }

        if s.contains(',') {
            let pages = s.split(',').map(page).collect::<Result<Vec<_>, _>>()?;
            return Ok(PageSelection::Set(pages));
        }

        Ok(PageSelection::Single(page(&s)?))
    }
}
