//! Strategy chains: "try the best available method, then degrade".
//!
//! A [`StrategyChain`] is an ordered, non-empty list of [`Strategy`]
//! variants for one [`ConversionKind`]. Each variant carries its own
//! availability predicate ([`Strategy::availability`]) and execute function
//! ([`Strategy::run`]), so adding, removing or reordering strategies is a
//! data change in [`ChainRegistry`] and never a control-flow change.
//!
//! ## Execution
//!
//! ```text
//! for each candidate, in declared order:
//!   precondition unmet?  → record Skipped, next
//!   automation backend?  → wait for its lane (FIFO)
//!   run with timeout     → success: return immediately
//!                        → failure/timeout: record, next
//! exhausted              → last error (or last skip if nothing ran)
//! ```
//!
//! Every attempt writes into its own fresh directory, so a failed attempt
//! can never leave a partial file where a later attempt (or the final
//! rename) would pick it up.

use crate::config::PageSelection;
use crate::error::{ConvertError, StrategyError};
use crate::kind::{ConversionKind, TargetFormat};
use crate::output::{AttemptStatus, StrategyAttempt};
use crate::pipeline::office::{self, OfficeBackend, OfficeTarget};
use crate::pipeline::{docx, html, image, pdf, pdfium};
use crate::progress::ConversionObserver;
use crate::request::ConversionParams;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ── Host capabilities ────────────────────────────────────────────────────

/// What the host can run, resolved once per [`crate::Converter`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Office automation is allowed by configuration.
    pub native_automation: bool,
    pub soffice: Option<PathBuf>,
    pub unoconv: Option<PathBuf>,
    pub pdfium: Option<PathBuf>,
}

impl Capabilities {
    /// Probe the host, honouring explicit overrides.
    pub fn probe(config: &crate::config::ConverterConfig) -> Self {
        let host = backend_probe::HostBackends::probe(&backend_probe::ProbeOverrides {
            soffice: config.soffice_path.clone(),
            unoconv: config.unoconv_path.clone(),
            pdfium: config.pdfium_lib_path.clone(),
        });
        Self {
            native_automation: config.native_automation,
            soffice: host.soffice,
            unoconv: host.unoconv,
            pdfium: host.pdfium,
        }
    }

    /// Software strategies only.
    pub fn software_only() -> Self {
        Self::default()
    }

    fn office_program(&self, backend: OfficeBackend) -> Option<&Path> {
        match backend {
            OfficeBackend::LibreOffice => self.soffice.as_deref(),
            OfficeBackend::Unoconv => self.unoconv.as_deref(),
        }
    }
}

// ── Jobs ─────────────────────────────────────────────────────────────────

/// Everything one strategy attempt needs. Paths are absolute.
#[derive(Debug, Clone)]
pub struct StrategyJob {
    pub kind: ConversionKind,
    pub inputs: Vec<PathBuf>,
    /// Where the attempt must write its single output file.
    pub output: PathBuf,
    /// Private scratch directory of this attempt; `output` lives inside it.
    pub workdir: PathBuf,
    pub params: ConversionParams,
    /// Effective `compress-image` quality.
    pub quality: u8,
    /// JPEG quality for conversions.
    pub convert_quality: u8,
}

impl StrategyJob {
    fn single_input(&self, strategy: &str) -> Result<&Path, StrategyError> {
        match self.inputs.as_slice() {
            [one] => Ok(one),
            other => Err(StrategyError::failed(
                strategy,
                format!("expected one input, got {}", other.len()),
            )),
        }
    }

    fn target_format(&self, strategy: &str) -> Result<TargetFormat, StrategyError> {
        self.params
            .format
            .ok_or_else(|| StrategyError::failed(strategy, "no target format"))
    }
}

/// A host-supplied strategy plugged into a chain via [`Strategy::Custom`].
///
/// `run` is blocking and executes on the blocking pool.
pub trait CustomStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// `Err(reason)` when this strategy cannot run on this host.
    fn availability(&self, caps: &Capabilities) -> Result<(), String> {
        let _ = caps;
        Ok(())
    }

    fn run(&self, job: &StrategyJob) -> Result<(), StrategyError>;

    /// Name of an exclusive lane; invocations sharing a lane never overlap.
    fn lane(&self) -> Option<&str> {
        None
    }
}

// ── Strategies ───────────────────────────────────────────────────────────

/// One concrete method of performing a conversion.
#[derive(Clone)]
pub enum Strategy {
    /// Native office automation. Serialised per backend.
    Office {
        backend: OfficeBackend,
        target: OfficeTarget,
    },
    /// pdfium text extraction (+ renders of textless pages) → DOCX.
    PdfiumText,
    /// lopdf text extraction → DOCX.
    PdfText,
    /// DOCX → XHTML → PDF. Degraded fidelity.
    HtmlRender,
    /// lopdf page-tree merge.
    MergePdf,
    /// Image → one-page PDF.
    ImageToPdf,
    /// Image → `format` parameter.
    ImageTranscode,
    ImageCompress,
    ImageCrop,
    Custom(Arc<dyn CustomStrategy>),
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Office { backend, target } => f
                .debug_struct("Office")
                .field("backend", backend)
                .field("target", target)
                .finish(),
            Strategy::Custom(c) => f.debug_tuple("Custom").field(&c.name()).finish(),
            other => f.write_str(other.name()),
        }
    }
}

impl Strategy {
    pub fn name(&self) -> &str {
        match self {
            Strategy::Office { backend, .. } => backend.name(),
            Strategy::PdfiumText => "pdfium-text",
            Strategy::PdfText => "lopdf-text",
            Strategy::HtmlRender => "html-render",
            Strategy::MergePdf => "lopdf-merge",
            Strategy::ImageToPdf => "image-pdf",
            Strategy::ImageTranscode => "image-transcode",
            Strategy::ImageCompress => "image-compress",
            Strategy::ImageCrop => "image-crop",
            Strategy::Custom(c) => c.name(),
        }
    }

    /// The environment precondition. `Err(reason)` means skip.
    pub fn availability(&self, caps: &Capabilities, job: &StrategyJob) -> Result<(), String> {
        match self {
            Strategy::Office { backend, target } => {
                if !caps.native_automation {
                    return Err("native automation disabled".into());
                }
                if caps.office_program(*backend).is_none() {
                    return Err(format!("{} not installed", backend.name()));
                }
                if *target == OfficeTarget::PdfToDocx && job.params.pages != PageSelection::All {
                    return Err("page subsets are not supported".into());
                }
                Ok(())
            }
            Strategy::PdfiumText => caps
                .pdfium
                .as_ref()
                .map(|_| ())
                .ok_or_else(|| "pdfium library not found".to_string()),
            Strategy::Custom(c) => c.availability(caps),
            _ => Ok(()),
        }
    }

    /// Lane key for strategies that must not run concurrently.
    fn lane(&self) -> Option<String> {
        match self {
            Strategy::Office { backend, .. } => Some(backend.name().to_string()),
            Strategy::Custom(c) => c.lane().map(str::to_string),
            _ => None,
        }
    }

    /// Execute one attempt. Blocking work runs on the blocking pool.
    pub async fn run(&self, caps: &Capabilities, job: &StrategyJob) -> Result<(), StrategyError> {
        self.run_in_lane(caps, job, None).await
    }

    /// Execute one attempt while holding `lane`.
    ///
    /// The guard is released only when the work has really stopped: blocking
    /// work keeps it until the closure returns, even if the caller gave up on
    /// the attempt; office sessions keep it until their processes are killed.
    async fn run_in_lane(
        &self,
        caps: &Capabilities,
        job: &StrategyJob,
        lane: Option<LaneGuard>,
    ) -> Result<(), StrategyError> {
        let name = self.name().to_string();
        match self {
            Strategy::Office { backend, target } => {
                let _lane = lane;
                let program = caps
                    .office_program(*backend)
                    .ok_or_else(|| StrategyError::unavailable(&name, "not installed"))?;
                let input = job.single_input(&name)?;
                office::convert(*backend, program, *target, input, &job.output, &job.workdir)
                    .await
            }
            Strategy::PdfiumText => {
                let library = caps
                    .pdfium
                    .clone()
                    .ok_or_else(|| StrategyError::unavailable(&name, "pdfium library not found"))?;
                let job = job.clone();
                blocking(name, lane, move || {
                    let input = job.single_input("pdfium-text")?;
                    pdfium::pdf_to_docx(&library, input, &job.output, &job.params.pages)
                })
                .await
            }
            Strategy::PdfText => {
                let job = job.clone();
                blocking(name, lane, move || {
                    const NAME: &str = "lopdf-text";
                    let input = job.single_input(NAME)?;
                    let pages: Vec<docx::DocxPage> =
                        pdf::extract_page_texts(input, &job.params.pages)?
                            .iter()
                            .map(|t| docx::DocxPage::from_text(t))
                            .collect();
                    docx::write_docx(&pages, &job.output, NAME)
                })
                .await
            }
            Strategy::HtmlRender => {
                let job = job.clone();
                blocking(name, lane, move || {
                    let input = job.single_input("html-render")?;
                    let xhtml = docx::docx_to_xhtml(input)?;
                    html::render_xhtml_pdf(&xhtml, &job.output).map(|_| ())
                })
                .await
            }
            Strategy::MergePdf => {
                let job = job.clone();
                blocking(name, lane, move || {
                    pdf::merge_documents(&job.inputs, &job.output).map(|_| ())
                })
                .await
            }
            Strategy::ImageToPdf => {
                let job = job.clone();
                blocking(name, lane, move || {
                    let input = job.single_input("image-pdf")?;
                    image::image_to_pdf(input, &job.output, job.convert_quality)
                })
                .await
            }
            Strategy::ImageTranscode => {
                let job = job.clone();
                blocking(name, lane, move || {
                    let input = job.single_input("image-transcode")?;
                    let target = job.target_format("image-transcode")?;
                    image::transcode(input, &job.output, target, job.convert_quality)
                })
                .await
            }
            Strategy::ImageCompress => {
                let job = job.clone();
                blocking(name, lane, move || {
                    let input = job.single_input("image-compress")?;
                    image::compress(input, &job.output, job.quality)
                })
                .await
            }
            Strategy::ImageCrop => {
                let job = job.clone();
                blocking(name, lane, move || {
                    let input = job.single_input("image-crop")?;
                    let crop = job
                        .params
                        .crop
                        .ok_or_else(|| StrategyError::failed("image-crop", "no crop box"))?;
                    image::crop(input, &job.output, crop, job.convert_quality)
                })
                .await
            }
            Strategy::Custom(custom) => {
                let custom = Arc::clone(custom);
                let job = job.clone();
                blocking(name, lane, move || custom.run(&job)).await
            }
        }
    }
}

type LaneGuard = tokio::sync::OwnedMutexGuard<()>;

async fn blocking<F>(strategy: String, lane: Option<LaneGuard>, f: F) -> Result<(), StrategyError>
where
    F: FnOnce() -> Result<(), StrategyError> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(move || {
        let _lane = lane;
        f()
    });
    task.await
        .map_err(|e| StrategyError::failed(strategy, format!("task panicked: {e}")))?
}

// ── Chains ───────────────────────────────────────────────────────────────

/// Ordered fallback list for one kind. Never empty.
#[derive(Debug, Clone)]
pub struct StrategyChain {
    strategies: Vec<Strategy>,
}

impl StrategyChain {
    pub fn new(strategies: Vec<Strategy>) -> Result<Self, ConvertError> {
        if strategies.is_empty() {
            return Err(ConvertError::InvalidConfig(
                "a strategy chain needs at least one strategy".into(),
            ));
        }
        Ok(Self { strategies })
    }

    /// Single-entry chain.
    pub fn single(strategy: Strategy) -> Self {
        Self {
            strategies: vec![strategy],
        }
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(Strategy::name).collect()
    }
}

/// Chains keyed by conversion kind; shared read-only across requests.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: HashMap<ConversionKind, StrategyChain>,
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::defaults()
    }
}

impl ChainRegistry {
    /// The built-in chain for every kind.
    pub fn defaults() -> Self {
        use Strategy::*;
        let office = |backend, target| Office { backend, target };
        let chains = HashMap::from([
            (
                ConversionKind::PdfToWord,
                StrategyChain {
                    strategies: vec![
                        office(OfficeBackend::LibreOffice, OfficeTarget::PdfToDocx),
                        PdfiumText,
                        PdfText,
                    ],
                },
            ),
            (
                ConversionKind::WordToPdf,
                StrategyChain {
                    strategies: vec![
                        office(OfficeBackend::LibreOffice, OfficeTarget::DocxToPdf),
                        office(OfficeBackend::Unoconv, OfficeTarget::DocxToPdf),
                        HtmlRender,
                    ],
                },
            ),
            (ConversionKind::MergePdf, StrategyChain::single(MergePdf)),
            (ConversionKind::JpgToPdf, StrategyChain::single(ImageToPdf)),
            (ConversionKind::PngToPdf, StrategyChain::single(ImageToPdf)),
            (ConversionKind::ImageConvert, StrategyChain::single(ImageTranscode)),
            (ConversionKind::CompressImage, StrategyChain::single(ImageCompress)),
            (ConversionKind::CropImage, StrategyChain::single(ImageCrop)),
        ]);
        Self { chains }
    }

    /// Replace the chain for `kind`.
    pub fn set(&mut self, kind: ConversionKind, chain: StrategyChain) {
        self.chains.insert(kind, chain);
    }

    pub fn with_chain(mut self, kind: ConversionKind, chain: StrategyChain) -> Self {
        self.set(kind, chain);
        self
    }

    pub fn get(&self, kind: ConversionKind) -> Result<&StrategyChain, ConvertError> {
        self.chains
            .get(&kind)
            .ok_or_else(|| ConvertError::Internal(format!("no strategy chain for '{kind}'")))
    }
}

// ── Automation lanes ─────────────────────────────────────────────────────

/// One FIFO mutual-exclusion lane per automation backend.
///
/// `tokio::sync::Mutex` is fair: waiters acquire in arrival order, which
/// makes each lane a single-worker queue.
#[derive(Debug, Default)]
pub struct AutomationLanes {
    lanes: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AutomationLanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lane for `key`, created on first use.
    pub fn lane(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut lanes = match self.lanes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(lanes.entry(key.to_string()).or_default())
    }
}

// ── Execution ────────────────────────────────────────────────────────────

/// Shared state a chain run needs.
pub struct ChainContext<'a> {
    pub caps: &'a Capabilities,
    pub lanes: &'a AutomationLanes,
    pub timeout: Duration,
    pub observer: &'a dyn ConversionObserver,
    pub request_id: &'a str,
}

/// What a chain needs to build per-attempt jobs.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub kind: ConversionKind,
    pub inputs: Vec<PathBuf>,
    /// File name the output will have inside each attempt directory.
    pub output_name: String,
    pub params: ConversionParams,
    pub quality: u8,
    pub convert_quality: u8,
}

impl JobSpec {
    fn for_attempt(&self, workdir: PathBuf) -> StrategyJob {
        StrategyJob {
            kind: self.kind,
            inputs: self.inputs.clone(),
            output: workdir.join(&self.output_name),
            workdir,
            params: self.params.clone(),
            quality: self.quality,
            convert_quality: self.convert_quality,
        }
    }
}

#[derive(Debug)]
pub struct ChainSuccess {
    pub strategy: String,
    /// The finished file, inside the winning attempt's directory.
    pub output: PathBuf,
    pub attempts: Vec<StrategyAttempt>,
}

#[derive(Debug)]
pub struct ChainFailure {
    /// Candidates that actually ran.
    pub attempted: usize,
    pub last_error: StrategyError,
    pub attempts: Vec<StrategyAttempt>,
}

impl StrategyChain {
    /// Try every candidate in order inside `workdir` until one succeeds.
    pub async fn execute(
        &self,
        ctx: &ChainContext<'_>,
        spec: &JobSpec,
        workdir: &Path,
    ) -> Result<ChainSuccess, ChainFailure> {
        let mut attempts = Vec::with_capacity(self.strategies.len());
        let mut last_error: Option<StrategyError> = None;
        let mut last_skip: Option<StrategyError> = None;
        let mut attempted = 0usize;

        for (i, strategy) in self.strategies.iter().enumerate() {
            let name = strategy.name().to_string();
            let attempt_dir = workdir.join(format!("attempt-{}", i + 1));
            if let Err(e) = std::fs::create_dir_all(&attempt_dir) {
                let err = StrategyError::failed(&name, format!("create attempt dir: {e}"));
                warn!("[{}] {}", ctx.request_id, err);
                attempts.push(StrategyAttempt {
                    strategy: name,
                    status: AttemptStatus::Failed { error: err.clone() },
                    duration_ms: 0,
                });
                attempted += 1;
                last_error = Some(err);
                continue;
            }
            let job = spec.for_attempt(attempt_dir);

            if let Err(reason) = strategy.availability(ctx.caps, &job) {
                debug!("[{}] skipping {}: {}", ctx.request_id, name, reason);
                ctx.observer.on_strategy_skipped(ctx.request_id, &name, &reason);
                last_skip = Some(StrategyError::unavailable(&name, reason.clone()));
                attempts.push(StrategyAttempt {
                    strategy: name,
                    status: AttemptStatus::Skipped { reason },
                    duration_ms: 0,
                });
                continue;
            }

            // Lane wait is not part of the attempt timeout.
            let lane = match strategy.lane() {
                Some(key) => Some(ctx.lanes.lane(&key).lock_owned().await),
                None => None,
            };

            ctx.observer.on_strategy_start(ctx.request_id, &name, i + 1);
            attempted += 1;
            let started = Instant::now();
            let attempt = strategy.run_in_lane(ctx.caps, &job, lane);
            let result = match tokio::time::timeout(ctx.timeout, attempt).await {
                Ok(result) => result,
                Err(_) => Err(StrategyError::Timeout {
                    strategy: name.clone(),
                    secs: ctx.timeout.as_secs(),
                }),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let result = result.and_then(|()| {
                if job.output.is_file() {
                    Ok(())
                } else {
                    Err(StrategyError::failed(&name, "reported success but wrote no output"))
                }
            });

            match result {
                Ok(()) => {
                    info!("[{}] {} succeeded in {}ms", ctx.request_id, name, duration_ms);
                    ctx.observer
                        .on_strategy_succeeded(ctx.request_id, &name, duration_ms);
                    attempts.push(StrategyAttempt {
                        strategy: name.clone(),
                        status: AttemptStatus::Succeeded,
                        duration_ms,
                    });
                    return Ok(ChainSuccess {
                        strategy: name,
                        output: job.output,
                        attempts,
                    });
                }
                Err(StrategyError::Unavailable { reason, .. }) => {
                    // Discovered only at run time (e.g. library failed to bind).
                    attempted -= 1;
                    debug!("[{}] {} unavailable: {}", ctx.request_id, name, reason);
                    ctx.observer.on_strategy_skipped(ctx.request_id, &name, &reason);
                    last_skip = Some(StrategyError::unavailable(&name, reason.clone()));
                    attempts.push(StrategyAttempt {
                        strategy: name,
                        status: AttemptStatus::Skipped { reason },
                        duration_ms,
                    });
                }
                Err(err) => {
                    warn!("[{}] {} failed: {}", ctx.request_id, name, err);
                    ctx.observer
                        .on_strategy_failed(ctx.request_id, &name, &err.to_string());
                    attempts.push(StrategyAttempt {
                        strategy: name,
                        status: AttemptStatus::Failed { error: err.clone() },
                        duration_ms,
                    });
                    last_error = Some(err);
                }
            }
        }

        let last_error = last_error
            .or(last_skip)
            .unwrap_or_else(|| StrategyError::unavailable("chain", "no strategies"));
        warn!(
            "[{}] chain exhausted after {} attempt(s): {}",
            ctx.request_id, attempted, last_error
        );
        Err(ChainFailure {
            attempted,
            last_error,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopObserver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        available: bool,
        result: Result<&'static str, &'static str>,
    }

    impl CustomStrategy for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn availability(&self, _caps: &Capabilities) -> Result<(), String> {
            if self.available {
                Ok(())
            } else {
                Err("missing".into())
            }
        }

        fn run(&self, job: &StrategyJob) -> Result<(), StrategyError> {
            match self.result {
                Ok(bytes) => std::fs::write(&job.output, bytes)
                    .map_err(|e| StrategyError::failed(self.name, e)),
                Err(msg) => {
                    // A failed attempt may leave junk behind; it must never surface.
                    let _ = std::fs::write(&job.output, b"partial");
                    Err(StrategyError::failed(self.name, msg))
                }
            }
        }
    }

    fn custom(name: &'static str, available: bool, result: Result<&'static str, &'static str>) -> Strategy {
        Strategy::Custom(Arc::new(Fixed {
            name,
            available,
            result,
        }))
    }

    fn spec() -> JobSpec {
        JobSpec {
            kind: ConversionKind::ImageConvert,
            inputs: vec![],
            output_name: "out.bin".into(),
            params: ConversionParams::default(),
            quality: 50,
            convert_quality: 95,
        }
    }

    async fn run(chain: &StrategyChain, dir: &Path) -> Result<ChainSuccess, ChainFailure> {
        let caps = Capabilities::software_only();
        let lanes = AutomationLanes::new();
        let ctx = ChainContext {
            caps: &caps,
            lanes: &lanes,
            timeout: Duration::from_secs(5),
            observer: &NoopObserver,
            request_id: "test",
        };
        chain.execute(&ctx, &spec(), dir).await
    }

    #[test]
    fn empty_chain_rejected() {
        assert!(matches!(
            StrategyChain::new(vec![]),
            Err(ConvertError::InvalidConfig(_))
        ));
    }

    #[test]
    fn every_kind_has_a_default_chain() {
        let registry = ChainRegistry::defaults();
        for kind in ConversionKind::ALL {
            assert!(registry.get(kind).unwrap().len() >= 1, "{kind}");
        }
        assert_eq!(
            registry.get(ConversionKind::WordToPdf).unwrap().names(),
            vec!["libreoffice", "unoconv", "html-render"]
        );
        assert_eq!(
            registry.get(ConversionKind::PdfToWord).unwrap().names(),
            vec!["libreoffice", "pdfium-text", "lopdf-text"]
        );
    }

    #[tokio::test]
    async fn first_success_wins_and_later_candidates_do_not_run() {
        let dir = tempfile::tempdir().unwrap();
        let chain = StrategyChain::new(vec![
            custom("a", true, Ok("from-a")),
            custom("b", true, Err("should not run")),
        ])
        .unwrap();

        let ok = run(&chain, dir.path()).await.unwrap();
        assert_eq!(ok.strategy, "a");
        assert_eq!(ok.attempts.len(), 1);
        assert_eq!(std::fs::read(&ok.output).unwrap(), b"from-a");
    }

    #[tokio::test]
    async fn failure_falls_through_with_fresh_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let chain = StrategyChain::new(vec![
            custom("broken", true, Err("boom")),
            custom("good", true, Ok("clean")),
        ])
        .unwrap();

        let ok = run(&chain, dir.path()).await.unwrap();
        assert_eq!(ok.strategy, "good");
        assert_eq!(std::fs::read(&ok.output).unwrap(), b"clean");
        assert!(matches!(ok.attempts[0].status, AttemptStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn skipped_candidates_do_not_change_the_result() {
        let with_skip = StrategyChain::new(vec![
            custom("native", false, Err("never")),
            custom("software", true, Ok("same bytes")),
        ])
        .unwrap();
        let without = StrategyChain::single(custom("software", true, Ok("same bytes")));

        let d1 = tempfile::tempdir().unwrap();
        let d2 = tempfile::tempdir().unwrap();
        let a = run(&with_skip, d1.path()).await.unwrap();
        let b = run(&without, d2.path()).await.unwrap();

        assert_eq!(a.strategy, b.strategy);
        assert_eq!(
            std::fs::read(&a.output).unwrap(),
            std::fs::read(&b.output).unwrap()
        );
        assert!(!a.attempts[0].was_attempted());
    }

    #[tokio::test]
    async fn exhaustion_reports_last_attempted_error() {
        let dir = tempfile::tempdir().unwrap();
        let chain = StrategyChain::new(vec![
            custom("first", true, Err("first failure")),
            custom("second", true, Err("second failure")),
            custom("third", false, Err("never")),
        ])
        .unwrap();

        let err = run(&chain, dir.path()).await.unwrap_err();
        assert_eq!(err.attempted, 2);
        assert_eq!(err.last_error, StrategyError::failed("second", "second failure"));
        assert_eq!(err.attempts.len(), 3);
    }

    #[tokio::test]
    async fn all_skipped_reports_skip() {
        let dir = tempfile::tempdir().unwrap();
        let chain = StrategyChain::single(custom("native", false, Err("never")));
        let err = run(&chain, dir.path()).await.unwrap_err();
        assert_eq!(err.attempted, 0);
        assert!(err.last_error.is_skip());
    }

    #[test]
    fn office_skipped_without_backend_or_for_page_subsets() {
        let office = Strategy::Office {
            backend: OfficeBackend::LibreOffice,
            target: OfficeTarget::PdfToDocx,
        };
        let mut job = spec().for_attempt(PathBuf::from("/tmp"));

        let none = Capabilities::software_only();
        assert!(office.availability(&none, &job).is_err());

        let caps = Capabilities {
            native_automation: true,
            soffice: Some(PathBuf::from("/usr/bin/soffice")),
            ..Capabilities::default()
        };
        assert!(office.availability(&caps, &job).is_ok());

        job.params.pages = PageSelection::Range(1, 2);
        let reason = office.availability(&caps, &job).unwrap_err();
        assert!(reason.contains("page subsets"));

        let disabled = Capabilities {
            native_automation: false,
            ..caps
        };
        job.params.pages = PageSelection::All;
        assert!(office.availability(&disabled, &job).is_err());
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        struct Slow;
        impl CustomStrategy for Slow {
            fn name(&self) -> &str {
                "slow"
            }
            fn run(&self, _job: &StrategyJob) -> Result<(), StrategyError> {
                std::thread::sleep(Duration::from_millis(500));
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let chain = StrategyChain::new(vec![
            Strategy::Custom(Arc::new(Slow)),
            custom("fallback", true, Ok("ok")),
        ])
        .unwrap();
        let caps = Capabilities::software_only();
        let lanes = AutomationLanes::new();
        let ctx = ChainContext {
            caps: &caps,
            lanes: &lanes,
            timeout: Duration::from_millis(50),
            observer: &NoopObserver,
            request_id: "t",
        };

        let ok = chain.execute(&ctx, &spec(), dir.path()).await.unwrap();
        assert_eq!(ok.strategy, "fallback");
        assert!(matches!(
            ok.attempts[0].status,
            AttemptStatus::Failed {
                error: StrategyError::Timeout { .. }
            }
        ));
    }

    /// Records how many invocations are inside the lane at once.
    #[derive(Default)]
    struct Occupancy {
        active: AtomicUsize,
        peak: AtomicUsize,
        finished: AtomicUsize,
    }

    struct Laned {
        work: Duration,
        occupancy: Arc<Occupancy>,
    }

    impl CustomStrategy for Laned {
        fn name(&self) -> &str {
            "laned"
        }

        fn run(&self, job: &StrategyJob) -> Result<(), StrategyError> {
            let now = self.occupancy.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.occupancy.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.work);
            self.occupancy.active.fetch_sub(1, Ordering::SeqCst);
            self.occupancy.finished.fetch_add(1, Ordering::SeqCst);
            std::fs::write(&job.output, b"laned").map_err(|e| StrategyError::failed("laned", e))
        }

        fn lane(&self) -> Option<&str> {
            Some("native")
        }
    }

    async fn run_twice_in_lane(work: Duration, timeout: Duration) -> (Arc<Occupancy>, usize) {
        let occupancy = Arc::new(Occupancy::default());
        let chain = StrategyChain::single(Strategy::Custom(Arc::new(Laned {
            work,
            occupancy: Arc::clone(&occupancy),
        })));
        let caps = Capabilities::software_only();
        let lanes = AutomationLanes::new();
        let ctx = ChainContext {
            caps: &caps,
            lanes: &lanes,
            timeout,
            observer: &NoopObserver,
            request_id: "lane",
        };
        let (d1, d2) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());

        let (s1, s2) = (spec(), spec());
        let (a, b) = tokio::join!(
            chain.execute(&ctx, &s1, d1.path()),
            chain.execute(&ctx, &s2, d2.path()),
        );
        let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        (occupancy, successes)
    }

    #[tokio::test]
    async fn concurrent_executions_never_share_a_lane() {
        let (occupancy, successes) =
            run_twice_in_lane(Duration::from_millis(100), Duration::from_secs(5)).await;
        assert_eq!(successes, 2);
        assert_eq!(occupancy.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timed_out_attempt_keeps_its_lane_until_it_returns() {
        let (occupancy, successes) =
            run_twice_in_lane(Duration::from_millis(400), Duration::from_millis(50)).await;
        assert_eq!(successes, 0);

        // Let both abandoned invocations run to completion.
        let deadline = Instant::now() + Duration::from_secs(5);
        while occupancy.finished.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(occupancy.finished.load(Ordering::SeqCst), 2);
        assert_eq!(occupancy.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lanes_are_shared_per_key() {
        let lanes = AutomationLanes::new();
        let a = lanes.lane("libreoffice");
        let b = lanes.lane("libreoffice");
        let c = lanes.lane("unoconv");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn lane_blocks_second_holder() {
        let lanes = AutomationLanes::new();
        let lane = lanes.lane("libreoffice");
        tokio_test::block_on(async {
            let held = lane.lock().await;
            assert!(lane.try_lock().is_err());
            drop(held);
            assert!(lane.try_lock().is_ok());
        });
    }
}
