//! # backend-probe
//!
//! Locate the external programs and shared libraries that document
//! conversion strategies depend on, without starting or loading any of them.
//!
//! ## What is probed
//!
//! | Backend   | Kind               | Lookup order |
//! |-----------|--------------------|--------------|
//! | `soffice` | LibreOffice binary | explicit path → `FILECONV_SOFFICE_PATH` → `PATH` → well-known install dirs |
//! | `unoconv` | UNO wrapper script | explicit path → `FILECONV_UNOCONV_PATH` → `PATH` |
//! | pdfium    | shared library     | explicit path → `PDFIUM_LIB_PATH` → fileconv cache dir → system lib dirs |
//!
//! A missing backend is not an error: callers treat `None` as "this
//! strategy cannot run on this host" and move on to the next one.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use backend_probe::{HostBackends, ProbeOverrides};
//!
//! let host = HostBackends::probe(&ProbeOverrides::default());
//! if let Some(soffice) = &host.soffice {
//!     println!("LibreOffice at {}", soffice.display());
//! }
//! ```
//!
//! ## Environment variable overrides
//!
//! - `FILECONV_SOFFICE_PATH`: path to the `soffice` executable.
//! - `FILECONV_UNOCONV_PATH`: path to the `unoconv` script.
//! - `PDFIUM_LIB_PATH`: path to an existing pdfium library.
//! - `FILECONV_PDFIUM_CACHE_DIR`: override the pdfium cache directory.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use pdfium_render::prelude::Pdfium;
use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// The pdfium-binaries release tag whose cache directory is searched.
pub const PDFIUM_VERSION: &str = "7690";

pub const SOFFICE_ENV: &str = "FILECONV_SOFFICE_PATH";
pub const UNOCONV_ENV: &str = "FILECONV_UNOCONV_PATH";
pub const PDFIUM_ENV: &str = "PDFIUM_LIB_PATH";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned when a located backend cannot actually be used.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The current OS has no known pdfium library name.
    #[error("Unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// `libloading` / `pdfium-render` could not load the library.
    #[error("Failed to bind PDFium from '{path}': {reason}")]
    Bind { path: PathBuf, reason: String },
}

// ── Probe inputs / outputs ───────────────────────────────────────────────────

/// Explicit locations that take precedence over environment and `PATH`.
///
/// An override that points at a missing file is ignored (and the normal
/// lookup continues) rather than treated as fatal.
#[derive(Debug, Clone, Default)]
pub struct ProbeOverrides {
    pub soffice: Option<PathBuf>,
    pub unoconv: Option<PathBuf>,
    pub pdfium: Option<PathBuf>,
}

/// Backends found on this host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostBackends {
    pub soffice: Option<PathBuf>,
    pub unoconv: Option<PathBuf>,
    pub pdfium: Option<PathBuf>,
}

impl HostBackends {
    /// Probe every backend, honouring `overrides` first.
    pub fn probe(overrides: &ProbeOverrides) -> Self {
        Self {
            soffice: find_soffice(overrides.soffice.as_deref()),
            unoconv: find_unoconv(overrides.unoconv.as_deref()),
            pdfium: find_pdfium(overrides.pdfium.as_deref()),
        }
    }

    /// Probe with no overrides, caching the result for the process lifetime.
    pub fn detect() -> &'static HostBackends {
        static DETECTED: OnceLock<HostBackends> = OnceLock::new();
        DETECTED.get_or_init(|| HostBackends::probe(&ProbeOverrides::default()))
    }

    /// A value with nothing available; software-only hosts and tests.
    pub fn none() -> Self {
        Self::default()
    }
}

// ── Executables ──────────────────────────────────────────────────────────────

/// Locate the LibreOffice `soffice` executable.
pub fn find_soffice(explicit: Option<&Path>) -> Option<PathBuf> {
    find_executable(explicit, SOFFICE_ENV, &["soffice", "libreoffice"])
        .or_else(|| existing(soffice_install_dirs()))
}

/// Locate the `unoconv` wrapper.
pub fn find_unoconv(explicit: Option<&Path>) -> Option<PathBuf> {
    find_executable(explicit, UNOCONV_ENV, &["unoconv"])
}

fn find_executable(explicit: Option<&Path>, env_var: &str, names: &[&str]) -> Option<PathBuf> {
    if let Some(p) = explicit {
        if p.is_file() {
            return Some(p.to_path_buf());
        }
    }

    if let Ok(p) = std::env::var(env_var) {
        let pb = PathBuf::from(p);
        if pb.is_file() {
            return Some(pb);
        }
    }

    names.iter().find_map(|name| which::which(name).ok())
}

fn soffice_install_dirs() -> Vec<PathBuf> {
    match std::env::consts::OS {
        "macos" => vec![PathBuf::from(
            "/Applications/LibreOffice.app/Contents/MacOS/soffice",
        )],
        "windows" => vec![
            PathBuf::from(r"C:\Program Files\LibreOffice\program\soffice.exe"),
            PathBuf::from(r"C:\Program Files (x86)\LibreOffice\program\soffice.exe"),
        ],
        _ => vec![
            PathBuf::from("/usr/lib/libreoffice/program/soffice"),
            PathBuf::from("/opt/libreoffice/program/soffice"),
        ],
    }
}

fn existing(candidates: Vec<PathBuf>) -> Option<PathBuf> {
    candidates.into_iter().find(|p| p.is_file())
}

// ── pdfium ───────────────────────────────────────────────────────────────────

/// Platform file name of the pdfium shared library.
pub fn pdfium_library_name() -> Result<&'static str, ProbeError> {
    match std::env::consts::OS {
        "macos" => Ok("libpdfium.dylib"),
        "linux" | "freebsd" => Ok("libpdfium.so"),
        "windows" => Ok("pdfium.dll"),
        os => Err(ProbeError::UnsupportedPlatform {
            os: os.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }),
    }
}

/// Returns the per-version directory a pdfium download is expected in.
///
/// Default locations:
/// - **macOS**: `~/Library/Caches/fileconv/pdfium-{VERSION}/`
/// - **Linux**: `~/.cache/fileconv/pdfium-{VERSION}/`
/// - **Windows**: `%LOCALAPPDATA%\fileconv\pdfium-{VERSION}\`
///
/// Override by setting `FILECONV_PDFIUM_CACHE_DIR`.
pub fn pdfium_cache_dir() -> PathBuf {
    if let Ok(override_dir) = std::env::var("FILECONV_PDFIUM_CACHE_DIR") {
        return PathBuf::from(override_dir).join(format!("pdfium-{PDFIUM_VERSION}"));
    }

    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);

    base.join("fileconv").join(format!("pdfium-{PDFIUM_VERSION}"))
}

/// Locate a pdfium shared library without loading it.
pub fn find_pdfium(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        if p.is_file() {
            return Some(p.to_path_buf());
        }
    }

    if let Ok(p) = std::env::var(PDFIUM_ENV) {
        let pb = PathBuf::from(p);
        if pb.is_file() {
            return Some(pb);
        }
    }

    let lib_name = pdfium_library_name().ok()?;
    let mut candidates = vec![pdfium_cache_dir().join(lib_name)];
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join(lib_name));
        }
    }
    if !cfg!(windows) {
        candidates.push(Path::new("/usr/local/lib").join(lib_name));
        candidates.push(Path::new("/usr/lib").join(lib_name));
    }

    existing(candidates)
}

/// Binds to a PDFium library at an explicit `path`.
pub fn bind_pdfium(path: &Path) -> Result<Pdfium, ProbeError> {
    Pdfium::bind_to_library(path)
        .map(Pdfium::new)
        .map_err(|e| ProbeError::Bind {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
