//! CLI binary for edgequake-convert.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConverterConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_convert::{
    ConversionKind, ConversionObserver, ConvertError, Converter, ConverterConfig, RawParams,
    Upload,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Terminal observer: a spinner while a strategy runs, and one log line per
/// skipped, failed or successful strategy.
struct CliObserver {
    bar: ProgressBar,
    /// Start time of the running strategy, per request.
    started: Mutex<HashMap<String, Instant>>,
    failures: AtomicUsize,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Storing uploads…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: Mutex::new(HashMap::new()),
            failures: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, request_id: &str) -> f64 {
        self.started
            .lock()
            .ok()
            .and_then(|mut m| m.remove(request_id))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionObserver for CliObserver {
    fn on_dispatch_start(&self, _request_id: &str, kind: ConversionKind, chain_len: usize) {
        self.bar.set_prefix("Converting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{kind}: {chain_len} candidate strategies"))
        ));
    }

    fn on_strategy_skipped(&self, _request_id: &str, strategy: &str, reason: &str) {
        self.bar.println(format!(
            "  {} {:<16} {}",
            dim("–"),
            strategy,
            dim(&format!("skipped: {reason}"))
        ));
    }

    fn on_strategy_start(&self, request_id: &str, strategy: &str, position: usize) {
        if let Ok(mut m) = self.started.lock() {
            m.insert(request_id.to_string(), Instant::now());
        }
        self.bar.set_message(format!("#{position} {strategy}"));
    }

    fn on_strategy_failed(&self, request_id: &str, strategy: &str, error: &str) {
        let secs = self.elapsed_secs(request_id);
        self.failures.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:<16} {}  {}",
            red("✗"),
            strategy,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
    }

    fn on_strategy_succeeded(&self, request_id: &str, strategy: &str, duration_ms: u64) {
        if let Ok(mut m) = self.started.lock() {
            m.remove(request_id);
        }
        self.bar.println(format!(
            "  {} {:<16} {}",
            green("✓"),
            strategy,
            dim(&format!("{:.1}s", duration_ms as f64 / 1000.0)),
        ));
    }

    fn on_dispatch_complete(&self, _request_id: &str, success: bool, _output: Option<&str>) {
        self.bar.finish_and_clear();
        if !success {
            eprintln!(
                "{} all strategies exhausted ({} failed)",
                red("✘"),
                self.failures.load(Ordering::SeqCst)
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Merge PDFs in order
  fileconv convert --kind merge-pdf a.pdf b.pdf c.pdf

  # Word → PDF, pure-Rust renderer only
  fileconv --no-native convert --kind word-to-pdf report.docx

  # Selected pages of a PDF into an editable document
  fileconv convert --kind pdf-to-word --pages 3-15 paper.pdf

  # Image conversion and compression
  fileconv convert --kind image-convert --format png photo.jpg
  fileconv convert --kind compress-image --quality 40 photo.jpg
  fileconv convert --kind crop-image --crop 10,10,410,310 shot.png

  # JSON response body, as a web front end would send it
  fileconv convert --kind jpg-to-pdf --json scan.jpg

  # Clean the storage directory once, or keep sweeping until Ctrl-C
  fileconv sweep --once
  fileconv sweep

  # Show which conversion backends this host has
  fileconv probe

CONVERSION KINDS:
  merge-pdf       N PDFs → {id}_merged.pdf
  pdf-to-word     PDF → DOCX     (LibreOffice → pdfium text → lopdf text)
  word-to-pdf     DOCX → PDF     (LibreOffice → unoconv → HTML renderer)
  jpg-to-pdf      JPEG → PDF
  png-to-pdf      PNG → PDF
  image-convert   image → JPG | PNG | WEBP | BMP | GIF | TIFF | PDF (--format)
  compress-image  re-encode at --quality (default 50)
  crop-image      crop to --crop LEFT,TOP,RIGHT,BOTTOM

ENVIRONMENT VARIABLES:
  FILECONV_STORAGE_DIR      Storage directory (default: uploads)
  FILECONV_SOFFICE_PATH     Path to the LibreOffice soffice executable
  FILECONV_UNOCONV_PATH     Path to the unoconv script
  PDFIUM_LIB_PATH           Path to an existing libpdfium
  FILECONV_PDFIUM_CACHE_DIR Override the pdfium cache directory
  RENDER_EXTERNAL_URL       Public base URL used in download links
"#;

/// Convert documents and images with fallback strategy chains.
#[derive(Parser, Debug)]
#[command(
    name = "fileconv",
    version,
    about = "Convert documents and images with fallback strategy chains",
    long_about = "Convert PDFs, Word documents and images. Each conversion kind runs a chain of \
strategies: native office automation when the host has it, then pure-Rust renderers. Outputs \
land in a storage directory under request-unique names and expire after a retention window.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Storage directory for uploads and outputs.
    #[arg(long, global = true, env = "FILECONV_STORAGE_DIR", default_value = "uploads")]
    storage_dir: PathBuf,

    /// Per-strategy attempt timeout in seconds.
    #[arg(long, global = true, env = "FILECONV_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Never use LibreOffice / unoconv, even when installed.
    #[arg(long, global = true, env = "FILECONV_NO_NATIVE")]
    no_native: bool,

    /// Retention window in seconds.
    #[arg(long, global = true, env = "FILECONV_MAX_AGE", default_value_t = 600)]
    max_age: u64,

    /// Public base URL for download links.
    #[arg(
        long,
        global = true,
        env = "RENDER_EXTERNAL_URL",
        default_value = "http://localhost:5000"
    )]
    public_url: String,

    /// Path to the LibreOffice soffice executable.
    #[arg(long, global = true, env = "FILECONV_SOFFICE_PATH")]
    soffice: Option<PathBuf>,

    /// Path to the unoconv script.
    #[arg(long, global = true, env = "FILECONV_UNOCONV_PATH")]
    unoconv: Option<PathBuf>,

    /// Path to the pdfium shared library.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "FILECONV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "FILECONV_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store FILE(s) and run one conversion.
    Convert(ConvertArgs),
    /// Delete expired files from the storage directory.
    Sweep {
        /// Run a single pass and exit.
        #[arg(long)]
        once: bool,

        /// Seconds between passes.
        #[arg(long, env = "FILECONV_SWEEP_INTERVAL", default_value_t = 60)]
        interval: u64,

        /// Print the pass report as JSON (with --once).
        #[arg(long)]
        json: bool,
    },
    /// Show detected conversion backends and strategy chains.
    Probe {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Conversion kind, e.g. merge-pdf, word-to-pdf, image-convert.
    #[arg(short, long)]
    kind: String,

    /// Target format for image-convert.
    #[arg(short, long)]
    format: Option<String>,

    /// Quality 1–100 for compress-image.
    #[arg(long)]
    quality: Option<String>,

    /// Page selection for pdf-to-word: all, 5, 3-15, or 1,3,5.
    #[arg(long)]
    pages: Option<String>,

    /// Crop rectangle for crop-image: LEFT,TOP,RIGHT,BOTTOM.
    #[arg(long)]
    crop: Option<String>,

    /// Print the JSON response body instead of a summary.
    #[arg(long)]
    json: bool,

    /// Input files, in order.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives all the feedback that matters during `convert`,
    // so library INFO logs are only shown in verbose mode there.
    let show_progress = match &cli.command {
        Command::Convert(args) => !cli.common.quiet && !args.json,
        _ => false,
    };
    let filter = if cli.common.verbose {
        "debug"
    } else if cli.common.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Convert(args) => run_convert(&cli.common, args, show_progress).await,
        Command::Sweep {
            once,
            interval,
            json,
        } => run_sweep(&cli.common, *once, *interval, *json).await,
        Command::Probe { json } => run_probe(&cli.common, *json),
    }
}

async fn run_convert(common: &CommonArgs, args: &ConvertArgs, show_progress: bool) -> Result<()> {
    let observer = show_progress.then(CliObserver::new);
    let mut builder = config_builder(common);
    if let Some(obs) = &observer {
        builder = builder.observer(Arc::clone(obs) as Arc<dyn ConversionObserver>);
    }
    let config = builder.build().context("Invalid configuration")?;
    let converter = Converter::new(config).context("Failed to open storage directory")?;

    let mut uploads = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let upload = Upload::from_path(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        uploads.push(upload);
    }

    let raw = RawParams {
        format: args.format.clone(),
        quality: args.quality.clone(),
        pages: args.pages.clone(),
        crop: args.crop.clone(),
    };
    let result = converter.submit(&args.kind, uploads, &raw).await;
    if let Some(obs) = &observer {
        // Client errors fail before dispatch starts; clear the spinner anyway.
        obs.bar.finish_and_clear();
    }

    if args.json {
        let response = converter.response(&result);
        println!("{}", response.to_json());
        return match result {
            Ok(_) => Ok(()),
            Err(e) => Err(anyhow::Error::new(e).context(format!("HTTP {}", response.http_status()))),
        };
    }

    let outcome = result.map_err(describe).context("Conversion failed")?;
    let response = converter.response(&Ok(outcome.clone()));
    if !common.quiet {
        eprintln!(
            "{}  {} via {}  {}ms",
            green("✔"),
            outcome.kind,
            bold(&outcome.strategy),
            outcome.duration_ms,
        );
        if let edgequake_convert::ResponseBody::Success { download_url, .. } = &response.body {
            eprintln!("   {}", dim(download_url));
        }
    }
    println!("{}", outcome.output.path.display());
    Ok(())
}

/// Attach the client/server distinction to the error chain.
fn describe(e: ConvertError) -> anyhow::Error {
    let class = if e.is_client_error() {
        "rejected"
    } else {
        "server error"
    };
    anyhow::Error::new(e).context(class)
}

async fn run_sweep(common: &CommonArgs, once: bool, interval: u64, json: bool) -> Result<()> {
    let config = config_builder(common)
        .sweep_interval_secs(interval)
        .build()
        .context("Invalid configuration")?;
    let converter = Converter::new(config).context("Failed to open storage directory")?;

    if once {
        let sweeper = converter.sweeper();
        let report = tokio::task::spawn_blocking(move || sweeper.sweep())
            .await
            .context("Sweep pass panicked")?;
        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
        } else if !common.quiet {
            eprintln!(
                "{} scanned {}, deleted {}, failed {}",
                if report.failed == 0 { green("✔") } else { cyan("⚠") },
                report.scanned,
                report.deleted,
                report.failed
            );
        }
        return Ok(());
    }

    let token = CancellationToken::new();
    let handle = converter.spawn_sweeper(token);
    if !common.quiet {
        eprintln!(
            "{} sweeping {} every {}s (max age {}s), Ctrl-C to stop",
            cyan("◆"),
            converter.storage().root().display(),
            interval,
            common.max_age
        );
    }
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    handle.shutdown().await;
    Ok(())
}

fn run_probe(common: &CommonArgs, json: bool) -> Result<()> {
    let config = config_builder(common)
        .build()
        .context("Invalid configuration")?;
    let converter = Converter::new(config).context("Failed to open storage directory")?;
    let caps = converter.capabilities();

    let chains: Vec<(String, Vec<String>)> = ConversionKind::ALL
        .iter()
        .map(|kind| {
            let names = converter
                .registry()
                .get(*kind)
                .map(|c| c.names().into_iter().map(str::to_string).collect())
                .unwrap_or_default();
            (kind.to_string(), names)
        })
        .collect();

    if json {
        let value = serde_json::json!({
            "native_automation": caps.native_automation,
            "soffice": caps.soffice,
            "unoconv": caps.unoconv,
            "pdfium": caps.pdfium,
            "chains": chains.iter().cloned().collect::<HashMap<_, _>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&value).context("Failed to serialise probe")?
        );
        return Ok(());
    }

    let show = |p: &Option<PathBuf>| match p {
        Some(p) => green(&p.display().to_string()),
        None => dim("not found"),
    };
    println!("Native automation: {}", caps.native_automation);
    println!("soffice:           {}", show(&caps.soffice));
    println!("unoconv:           {}", show(&caps.unoconv));
    println!("pdfium:            {}", show(&caps.pdfium));
    println!();
    for (kind, names) in chains {
        println!("{:<16} {}", kind, names.join(" → "));
    }
    Ok(())
}

/// Map common CLI args onto the config builder.
fn config_builder(common: &CommonArgs) -> edgequake_convert::ConverterConfigBuilder {
    let mut builder = ConverterConfig::builder()
        .storage_dir(&common.storage_dir)
        .strategy_timeout_secs(common.timeout)
        .max_file_age_secs(common.max_age)
        .native_automation(!common.no_native)
        .public_base_url(common.public_url.clone());
    if let Some(p) = &common.soffice {
        builder = builder.soffice_path(p);
    }
    if let Some(p) = &common.unoconv {
        builder = builder.unoconv_path(p);
    }
    if let Some(p) = &common.pdfium {
        builder = builder.pdfium_lib_path(p);
    }
    builder
}
