//! The Conversion Dispatcher and the request-handler facade around it.
//!
//! [`Converter::convert`] takes an already-stored [`ConversionRequest`],
//! runs the strategy chain registered for its kind, and renames the winning
//! output into the Storage Area. [`Converter::submit`] is the layer in
//! front: it parses a raw kind token and form fields, rejects bad requests
//! before touching the disk, persists the uploads and then dispatches.
//!
//! A `Converter` is `Send + Sync`; share it behind an `Arc` and dispatch
//! requests concurrently. Outputs never collide because every file name
//! carries its request id.

use crate::chain::{
    AutomationLanes, Capabilities, ChainContext, ChainRegistry, JobSpec, StrategyChain,
};
use crate::config::ConverterConfig;
use crate::error::ConvertError;
use crate::kind::ConversionKind;
use crate::output::{ConversionOutcome, ConversionResponse};
use crate::pipeline::input;
use crate::progress::{NoopObserver, ObserverRef};
use crate::request::{ConversionParams, ConversionRequest, RawParams, Upload};
use crate::storage::{secure_filename, RequestId, StorageArea, StoredFile};
use crate::sweeper::{RetentionPolicy, Sweeper, SweeperHandle};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Dispatcher plus the resources every request shares.
pub struct Converter {
    config: ConverterConfig,
    storage: StorageArea,
    registry: ChainRegistry,
    caps: Capabilities,
    lanes: AutomationLanes,
    observer: ObserverRef,
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("storage", &self.storage.root())
            .field("caps", &self.caps)
            .finish_non_exhaustive()
    }
}

impl Converter {
    /// Open the Storage Area and probe the host for conversion backends.
    pub fn new(config: ConverterConfig) -> Result<Self, ConvertError> {
        let caps = Capabilities::probe(&config);
        Self::with_capabilities(config, caps)
    }

    /// Like [`Converter::new`] but with explicit capabilities instead of a probe.
    pub fn with_capabilities(
        config: ConverterConfig,
        caps: Capabilities,
    ) -> Result<Self, ConvertError> {
        let storage = StorageArea::open(&config.storage_dir)?;
        let observer = config
            .observer
            .clone()
            .unwrap_or_else(|| Arc::new(NoopObserver) as ObserverRef);
        info!(
            "Converter ready: storage={} native={} soffice={} unoconv={} pdfium={}",
            storage.root().display(),
            caps.native_automation,
            caps.soffice.is_some(),
            caps.unoconv.is_some(),
            caps.pdfium.is_some()
        );
        Ok(Self {
            config,
            storage,
            registry: ChainRegistry::defaults(),
            caps,
            lanes: AutomationLanes::new(),
            observer,
        })
    }

    /// Replace the chain registry.
    pub fn with_registry(mut self, registry: ChainRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the chain of one kind.
    pub fn with_chain(mut self, kind: ConversionKind, chain: StrategyChain) -> Self {
        self.registry.set(kind, chain);
        self
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn storage(&self) -> &StorageArea {
        &self.storage
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    // ── Request handler facade ───────────────────────────────────────────

    /// Validate, persist and dispatch one upload request.
    ///
    /// # Errors
    /// Client errors (`UnsupportedConversionKind`, `MissingInput`,
    /// `TooManyInputs`, `PayloadTooLarge`, `MissingParameter`,
    /// `InvalidParameter`) are returned before anything is written to the
    /// Storage Area.
    pub async fn submit(
        &self,
        token: &str,
        mut uploads: Vec<Upload>,
        raw: &RawParams,
    ) -> Result<ConversionOutcome, ConvertError> {
        let kind: ConversionKind = token.parse()?;

        if uploads.is_empty() || uploads.iter().any(|u| u.filename.trim().is_empty()) {
            return Err(ConvertError::MissingInput { kind });
        }
        if !kind.accepts_multiple() && uploads.len() > 1 {
            return Err(ConvertError::TooManyInputs {
                kind,
                count: uploads.len(),
            });
        }
        let size: u64 = uploads.iter().map(Upload::len).sum();
        if size > self.config.max_upload_bytes {
            return Err(ConvertError::PayloadTooLarge {
                size,
                limit: self.config.max_upload_bytes,
            });
        }
        let params = ConversionParams::parse(kind, raw)?;

        let id = RequestId::generate();
        dedupe_names(&mut uploads);
        debug!(
            "[{}] Persisting {} upload(s), {} bytes",
            id,
            uploads.len(),
            size
        );

        let saves = uploads.into_iter().map(|upload| {
            let storage = self.storage.clone();
            let id = id.clone();
            async move {
                tokio::task::spawn_blocking(move || storage.save_upload(&id, &upload))
                    .await
                    .map_err(|e| ConvertError::Internal(format!("upload task: {e}")))?
            }
        });
        let inputs = futures::future::try_join_all(saves).await?;

        self.convert(ConversionRequest::new(id, kind, inputs, params))
            .await
    }

    /// Blocking wrapper around [`Converter::submit`].
    ///
    /// Creates a temporary tokio runtime internally; do not call from async code.
    pub fn submit_blocking(
        &self,
        token: &str,
        uploads: Vec<Upload>,
        raw: &RawParams,
    ) -> Result<ConversionOutcome, ConvertError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| ConvertError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.submit(token, uploads, raw))
    }

    /// Path of a stored file for download.
    pub fn resolve(&self, file_name: &str) -> Result<PathBuf, ConvertError> {
        self.storage.resolve(file_name)
    }

    /// Collaborator response body for a dispatch result.
    pub fn response(&self, result: &Result<ConversionOutcome, ConvertError>) -> ConversionResponse {
        ConversionResponse::from_result(result, &self.config.public_base_url)
    }

    /// Start the Retention Sweeper on this converter's Storage Area.
    pub fn spawn_sweeper(&self, token: CancellationToken) -> SweeperHandle {
        self.sweeper().spawn(token)
    }

    /// A Sweeper configured from this converter's retention settings.
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            &self.storage,
            RetentionPolicy {
                max_age: self.config.max_file_age(),
                interval: self.config.sweep_interval(),
            },
        )
    }

    // ── Dispatcher ───────────────────────────────────────────────────────

    /// Run the strategy chain for `request` and commit its single output.
    ///
    /// Inputs are never deleted here; the Sweeper removes them later.
    ///
    /// # Errors
    /// - `MissingInput` / `TooManyInputs` / parameter errors for malformed requests
    /// - `InvalidInput` when an input's signature does not match the kind
    /// - `ConversionFailed` when every strategy was skipped or failed
    pub async fn convert(
        &self,
        request: ConversionRequest,
    ) -> Result<ConversionOutcome, ConvertError> {
        let started = Instant::now();
        let id = request.id().clone();
        let kind = request.kind();

        check_arity(kind, request.inputs())?;
        request.params().validate_for(kind)?;
        input::validate_inputs(kind, request.inputs())?;

        let chain = self.registry.get(kind)?;
        let file_name = output_file_name(&id, kind, request.params(), request.inputs())?;
        info!(
            "[{}] Dispatching {} ({} input(s)) → {}",
            id,
            kind,
            request.inputs().len(),
            file_name
        );
        self.observer
            .on_dispatch_start(id.as_str(), kind, chain.len());

        let result = self
            .run_chain(&id, chain, &request, &file_name, started)
            .await;

        match &result {
            Ok(outcome) => {
                info!(
                    "[{}] {} complete via {} in {}ms",
                    id, kind, outcome.strategy, outcome.duration_ms
                );
                let name = outcome.file_name();
                self.observer
                    .on_dispatch_complete(id.as_str(), true, Some(&name));
            }
            Err(e) => {
                warn!("[{}] {} failed: {}", id, kind, e);
                self.observer.on_dispatch_complete(id.as_str(), false, None);
            }
        }
        result
    }

    async fn run_chain(
        &self,
        id: &RequestId,
        chain: &StrategyChain,
        request: &ConversionRequest,
        file_name: &str,
        started: Instant,
    ) -> Result<ConversionOutcome, ConvertError> {
        let kind = request.kind();
        let params = request.params().clone();
        let spec = JobSpec {
            kind,
            inputs: request.inputs().iter().map(|f| f.path.clone()).collect(),
            output_name: file_name.to_string(),
            quality: params.quality.unwrap_or(self.config.default_quality),
            convert_quality: self.config.convert_quality,
            params,
        };
        let ctx = ChainContext {
            caps: &self.caps,
            lanes: &self.lanes,
            timeout: self.config.strategy_timeout(),
            observer: &*self.observer,
            request_id: id.as_str(),
        };

        let work = self.storage.work_dir(id)?;
        let result = match chain.execute(&ctx, &spec, work.path()).await {
            Ok(success) => self
                .storage
                .commit(&success.output, id, file_name)
                .map(|output| ConversionOutcome {
                    request_id: id.clone(),
                    kind,
                    output,
                    strategy: success.strategy,
                    attempts: success.attempts,
                    duration_ms: started.elapsed().as_millis() as u64,
                }),
            Err(failure) => Err(ConvertError::ConversionFailed {
                kind,
                attempted: failure.attempted,
                last_error: failure.last_error,
            }),
        };

        let work_path = work.path().to_path_buf();
        if let Err(e) = work.close() {
            // The Sweeper removes stale staging directories.
            warn!("[{}] Could not remove {}: {}", id, work_path.display(), e);
        }
        result
    }
}

fn check_arity(kind: ConversionKind, inputs: &[StoredFile]) -> Result<(), ConvertError> {
    match inputs.len() {
        0 => Err(ConvertError::MissingInput { kind }),
        1 => Ok(()),
        n if kind.accepts_multiple() => {
            debug!("{} with {} inputs", kind, n);
            Ok(())
        }
        n => Err(ConvertError::TooManyInputs { kind, count: n }),
    }
}

/// Final Storage Area name of a request's output.
///
/// `{id}_merged.pdf` for merges, `{id}_{base}.{ext}` for single-file
/// conversions, `{id}_compressed_{base}{ext}` and `{id}_cropped_{base}{ext}`
/// for in-format rewrites. `converted_` is inserted after the id when the
/// name would equal one of the inputs.
pub fn output_file_name(
    id: &RequestId,
    kind: ConversionKind,
    params: &ConversionParams,
    inputs: &[StoredFile],
) -> Result<String, ConvertError> {
    let first = inputs
        .first()
        .ok_or(ConvertError::MissingInput { kind })?;
    let base = first.stem();

    let name = match kind {
        ConversionKind::MergePdf => "merged.pdf".to_string(),
        ConversionKind::CompressImage => format!("compressed_{}{}", base, first.extension()),
        ConversionKind::CropImage => format!("cropped_{}{}", base, first.extension()),
        ConversionKind::ImageConvert => {
            let format = params.format.ok_or(ConvertError::MissingParameter {
                kind,
                name: "format",
            })?;
            format!("{}.{}", base, format.extension())
        }
        other => {
            let ext = other.fixed_extension().ok_or_else(|| {
                ConvertError::Internal(format!("no output extension for '{other}'"))
            })?;
            format!("{}.{}", base, ext)
        }
    };

    let candidate = format!("{id}_{name}");
    if inputs.iter().any(|f| f.file_name() == candidate) {
        return Ok(format!("{id}_converted_{name}"));
    }
    Ok(candidate)
}

/// Give uploads that sanitise to the same name distinct names (`a.pdf`,
/// `a_2.pdf`, ...) so one request never overwrites its own inputs.
fn dedupe_names(uploads: &mut [Upload]) {
    let mut seen = HashSet::new();
    for upload in uploads.iter_mut() {
        let safe = secure_filename(&upload.filename);
        let mut name = safe.clone();
        let mut n = 2;
        while !seen.insert(name.clone()) {
            let path = Path::new(&safe);
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(&safe);
            name = match path.extension().and_then(|e| e.to_str()) {
                Some(ext) => format!("{stem}_{n}.{ext}"),
                None => format!("{stem}_{n}"),
            };
            n += 1;
        }
        upload.filename = name;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::TargetFormat;
    use chrono::Utc;

    fn stored(id: &RequestId, name: &str) -> StoredFile {
        StoredFile {
            id: id.clone(),
            original_name: name.to_string(),
            path: PathBuf::from(format!("/uploads/{id}_{name}")),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn output_names_per_kind() {
        let id = RequestId::generate();
        let params = ConversionParams::default();

        let merge = output_file_name(
            &id,
            ConversionKind::MergePdf,
            &params,
            &[stored(&id, "a.pdf"), stored(&id, "b.pdf")],
        )
        .unwrap();
        assert_eq!(merge, format!("{id}_merged.pdf"));

        let docx = output_file_name(
            &id,
            ConversionKind::PdfToWord,
            &params,
            &[stored(&id, "report.pdf")],
        )
        .unwrap();
        assert_eq!(docx, format!("{id}_report.docx"));

        let png = output_file_name(
            &id,
            ConversionKind::ImageConvert,
            &params.clone().with_format(TargetFormat::Png),
            &[stored(&id, "photo.jpg")],
        )
        .unwrap();
        assert_eq!(png, format!("{id}_photo.png"));

        let compressed = output_file_name(
            &id,
            ConversionKind::CompressImage,
            &params,
            &[stored(&id, "photo.JPG")],
        )
        .unwrap();
        assert_eq!(compressed, format!("{id}_compressed_photo.JPG"));

        let cropped = output_file_name(
            &id,
            ConversionKind::CropImage,
            &params,
            &[stored(&id, "shot.png")],
        )
        .unwrap();
        assert_eq!(cropped, format!("{id}_cropped_shot.png"));
    }

    #[test]
    fn output_never_overwrites_an_input() {
        let id = RequestId::generate();
        let params = ConversionParams::default();

        let merge = output_file_name(
            &id,
            ConversionKind::MergePdf,
            &params,
            &[stored(&id, "merged.pdf")],
        )
        .unwrap();
        assert_eq!(merge, format!("{id}_converted_merged.pdf"));

        let same_format = output_file_name(
            &id,
            ConversionKind::ImageConvert,
            &params.with_format(TargetFormat::Png),
            &[stored(&id, "a.png")],
        )
        .unwrap();
        assert_eq!(same_format, format!("{id}_converted_a.png"));
    }

    #[test]
    fn duplicate_upload_names_are_made_distinct() {
        let mut uploads = vec![
            Upload::new("a.pdf", b"%PDF".to_vec()),
            Upload::new("a.pdf", b"%PDF".to_vec()),
            Upload::new("dir/a.pdf", b"%PDF".to_vec()),
            Upload::new("notes", b"x".to_vec()),
            Upload::new("notes", b"x".to_vec()),
        ];
        dedupe_names(&mut uploads);
        let names: Vec<&str> = uploads.iter().map(|u| u.filename.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "a_2.pdf", "dir_a.pdf", "notes", "notes_2"]);
    }

    #[test]
    fn arity() {
        assert!(matches!(
            check_arity(ConversionKind::MergePdf, &[]),
            Err(ConvertError::MissingInput { .. })
        ));
        let id = RequestId::generate();
        let two = [stored(&id, "a.png"), stored(&id, "b.png")];
        assert!(check_arity(ConversionKind::MergePdf, &two).is_ok());
        assert!(matches!(
            check_arity(ConversionKind::CompressImage, &two),
            Err(ConvertError::TooManyInputs { count: 2, .. })
        ));
    }

    #[test]
    fn submit_blocking_rejects_unknown_kind_without_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConverterConfig::builder()
            .storage_dir(dir.path())
            .build()
            .unwrap();
        let converter =
            Converter::with_capabilities(config, Capabilities::software_only()).unwrap();

        let err = converter
            .submit_blocking(
                "pdf-to-excel",
                vec![Upload::new("a.pdf", b"%PDF-1.4".to_vec())],
                &RawParams::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedConversionKind { .. }));
        assert!(converter.storage().list().unwrap().is_empty());
    }
}
