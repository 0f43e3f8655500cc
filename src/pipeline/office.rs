//! Native office automation: LibreOffice (`soffice --headless`) and the
//! `unoconv` wrapper.
//!
//! Each attempt runs inside an [`AutomationSession`], which owns the child
//! process and its throw-away LibreOffice profile. Dropping the session
//! kills the process if it is still running and deletes the profile, on
//! every exit path: success, failure, timeout (the attempt future is
//! dropped) or panic.
//!
//! On Unix the child leads its own process group. `soffice` is a launcher
//! that forks the real `soffice.bin`, so the whole group is killed, not
//! just the direct child.
//!
//! Neither backend is reentrant. Callers hold the backend's automation
//! lane (see [`crate::chain::AutomationLanes`]) for the whole session.

use crate::error::StrategyError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Which automation backend runs the conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OfficeBackend {
    LibreOffice,
    Unoconv,
}

impl OfficeBackend {
    pub fn name(self) -> &'static str {
        match self {
            OfficeBackend::LibreOffice => "libreoffice",
            OfficeBackend::Unoconv => "unoconv",
        }
    }
}

/// Direction of an office conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OfficeTarget {
    /// Import a PDF into Writer and save as DOCX.
    PdfToDocx,
    /// Export a DOCX as PDF.
    DocxToPdf,
}

impl OfficeTarget {
    fn extension(self) -> &'static str {
        match self {
            OfficeTarget::PdfToDocx => "docx",
            OfficeTarget::DocxToPdf => "pdf",
        }
    }
}

/// Keep at most this many bytes of stderr in error messages.
const STDERR_TAIL: usize = 400;

/// A running automation process plus the resources it owns.
pub struct AutomationSession {
    backend: OfficeBackend,
    child: Option<Child>,
    /// Process group of the child and everything it forked.
    #[cfg(unix)]
    group: Option<u32>,
    _profile: Option<TempDir>,
}

impl AutomationSession {
    /// Spawn `command`. The profile directory, if any, lives as long as the session.
    fn start(
        backend: OfficeBackend,
        mut command: Command,
        profile: Option<TempDir>,
    ) -> Result<Self, StrategyError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        let child = command
            .spawn()
            .map_err(|e| StrategyError::failed(backend.name(), format!("spawn: {e}")))?;
        debug!("{} started (pid {:?})", backend.name(), child.id());
        Ok(Self {
            backend,
            #[cfg(unix)]
            group: child.id(),
            child: Some(child),
            _profile: profile,
        })
    }

    /// Wait for the process to exit and check its status.
    async fn finish(mut self) -> Result<(), StrategyError> {
        let name = self.backend.name();
        let Some(child) = self.child.take() else {
            return Err(StrategyError::failed(name, "session already finished"));
        };
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| StrategyError::failed(name, format!("wait: {e}")))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr
            .chars()
            .rev()
            .take(STDERR_TAIL)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        Err(StrategyError::failed(
            name,
            format!("{}: {}", output.status, tail.trim()),
        ))
    }
}

impl Drop for AutomationSession {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Ok(None) = child.try_wait() {
                warn!("Killing unfinished {} process", self.backend.name());
                let _ = child.start_kill();
            }
        }
        // Also reached when the attempt is dropped inside `finish`, where
        // the child handle has already been moved out.
        #[cfg(unix)]
        if let Some(group) = self.group.take() {
            kill_group(self.backend, group);
        }
    }
}

/// SIGKILL every process left in `group`. An empty group is not an error.
#[cfg(unix)]
fn kill_group(backend: OfficeBackend, group: u32) {
    let Ok(pgid) = libc::pid_t::try_from(group) else {
        return;
    };
    // SAFETY: killpg only sends a signal; it touches no memory of ours.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc == 0 {
        debug!("{}: killed process group {}", backend.name(), pgid);
    } else {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("{}: could not kill process group {}: {}", backend.name(), pgid, err);
        }
    }
}

/// Run one office conversion of `input` into `output`.
///
/// `scratch` is a private directory for this attempt.
pub async fn convert(
    backend: OfficeBackend,
    program: &Path,
    target: OfficeTarget,
    input: &Path,
    output: &Path,
    scratch: &Path,
) -> Result<(), StrategyError> {
    let name = backend.name();
    let produced = match backend {
        OfficeBackend::LibreOffice => {
            run_libreoffice(program, target, input, scratch).await?
        }
        OfficeBackend::Unoconv => {
            let produced = scratch.join(format!("unoconv-out.{}", target.extension()));
            let mut cmd = Command::new(program);
            cmd.arg("-f")
                .arg(target.extension())
                .arg("-o")
                .arg(&produced)
                .arg(input);
            AutomationSession::start(backend, cmd, None)?.finish().await?;
            produced
        }
    };

    let len = std::fs::metadata(&produced).map(|m| m.len()).unwrap_or(0);
    if len == 0 {
        return Err(StrategyError::failed(
            name,
            format!("no output produced at {}", produced.display()),
        ));
    }
    std::fs::rename(&produced, output).map_err(|e| StrategyError::failed(name, e))?;
    debug!("{} produced {} bytes", name, len);
    Ok(())
}

async fn run_libreoffice(
    program: &Path,
    target: OfficeTarget,
    input: &Path,
    scratch: &Path,
) -> Result<PathBuf, StrategyError> {
    const NAME: &str = "libreoffice";

    let profile = tempfile::Builder::new()
        .prefix("lo-profile-")
        .tempdir_in(scratch)
        .map_err(|e| StrategyError::failed(NAME, e))?;
    let profile_url = url::Url::from_directory_path(profile.path())
        .map_err(|_| StrategyError::failed(NAME, "profile path is not absolute"))?;
    let outdir = scratch.join("lo-out");
    std::fs::create_dir_all(&outdir).map_err(|e| StrategyError::failed(NAME, e))?;

    let mut cmd = Command::new(program);
    cmd.arg(format!("-env:UserInstallation={profile_url}"))
        .args(["--headless", "--norestore", "--nolockcheck", "--nodefault"]);
    match target {
        OfficeTarget::PdfToDocx => {
            cmd.arg("--infilter=writer_pdf_import")
                .args(["--convert-to", "docx:MS Word 2007 XML"]);
        }
        OfficeTarget::DocxToPdf => {
            cmd.args(["--convert-to", "pdf:writer_pdf_Export"]);
        }
    }
    cmd.arg("--outdir").arg(&outdir).arg(input);

    AutomationSession::start(OfficeBackend::LibreOffice, cmd, Some(profile))?
        .finish()
        .await?;

    let stem = input
        .file_stem()
        .ok_or_else(|| StrategyError::failed(NAME, "input has no file name"))?;
    let mut produced = outdir.join(stem);
    produced.set_extension(target.extension());
    Ok(produced)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn unoconv_success_moves_output() {
        let dir = tempfile::tempdir().unwrap();
        // Args: -f pdf -o OUT IN
        let fake = script(dir.path(), "unoconv", r#"cp "$5" "$4""#);
        let input = dir.path().join("in.docx");
        std::fs::write(&input, b"PK\x03\x04docx").unwrap();
        let output = dir.path().join("out.pdf");

        convert(
            OfficeBackend::Unoconv,
            &fake,
            OfficeTarget::DocxToPdf,
            &input,
            &output,
            dir.path(),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"PK\x03\x04docx");
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure_with_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let fake = script(dir.path(), "soffice", "echo 'source file could not be loaded' >&2; exit 1");
        let input = dir.path().join("in.pdf");
        std::fs::write(&input, b"%PDF").unwrap();

        let err = convert(
            OfficeBackend::LibreOffice,
            &fake,
            OfficeTarget::PdfToDocx,
            &input,
            &dir.path().join("out.docx"),
            dir.path(),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("could not be loaded"), "{err}");
        assert!(!err.is_skip());
    }

    #[tokio::test]
    async fn exit_zero_without_output_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fake = script(dir.path(), "soffice", "exit 0");
        let input = dir.path().join("in.docx");
        std::fs::write(&input, b"PK\x03\x04").unwrap();

        let err = convert(
            OfficeBackend::LibreOffice,
            &fake,
            OfficeTarget::DocxToPdf,
            &input,
            &dir.path().join("out.pdf"),
            dir.path(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("no output"), "{err}");
    }

    #[tokio::test]
    async fn dropped_session_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("still-running");
        let fake = script(
            dir.path(),
            "soffice",
            &format!("sleep 2; touch '{}'", marker.display()),
        );
        let input = dir.path().join("in.docx");
        std::fs::write(&input, b"PK\x03\x04").unwrap();

        let output = dir.path().join("out.pdf");

        let attempt = convert(
            OfficeBackend::LibreOffice,
            &fake,
            OfficeTarget::DocxToPdf,
            &input,
            &output,
            dir.path(),
        );
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(200), attempt).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn dropped_session_kills_forked_worker() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("worker-survived");
        // Like the real launcher: fork the worker, then wait on it.
        let fake = script(
            dir.path(),
            "soffice",
            &format!("(sleep 1; touch '{}') >/dev/null 2>&1 &\nwait", marker.display()),
        );
        let input = dir.path().join("in.docx");
        std::fs::write(&input, b"PK\x03\x04").unwrap();
        let output = dir.path().join("out.pdf");

        let attempt = convert(
            OfficeBackend::LibreOffice,
            &fake,
            OfficeTarget::DocxToPdf,
            &input,
            &output,
            dir.path(),
        );
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(200), attempt).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn worker_left_behind_by_finished_launcher_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("orphan-survived");
        // Launcher exits with an error while its worker is still running.
        let fake = script(
            dir.path(),
            "soffice",
            &format!("(sleep 1; touch '{}') >/dev/null 2>&1 &\nexit 1", marker.display()),
        );
        let input = dir.path().join("in.docx");
        std::fs::write(&input, b"PK\x03\x04").unwrap();
        let output = dir.path().join("out.pdf");

        let result = convert(
            OfficeBackend::LibreOffice,
            &fake,
            OfficeTarget::DocxToPdf,
            &input,
            &output,
            dir.path(),
        )
        .await;
        assert!(result.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }
}
