//! The Storage Area: a flat directory of identifier-prefixed files.
//!
//! Every file is named `{request_id}_{name}`, so concurrent requests never
//! collide and no index is needed; existence is a directory lookup. Partial
//! writes never appear under a final name. Bytes go to a `.work-*` entry
//! first and are renamed into place, which is atomic because the staging
//! entry lives in the same directory.

use crate::error::ConvertError;
use crate::request::Upload;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Prefix of staging entries. Hidden from listings and downloads.
pub const WORK_PREFIX: &str = ".work-";

/// Per-request identifier: the first 12 hex digits of a v4 UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        let mut hex = uuid::Uuid::new_v4().simple().to_string();
        hex.truncate(12);
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file's identity and location within the Storage Area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Request that created the file.
    pub id: RequestId,
    /// Sanitised base name, without the id prefix.
    pub original_name: String,
    /// Absolute path inside the Storage Area.
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl StoredFile {
    /// Name of the file inside the Storage Area (`{id}_{original_name}`).
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// `original_name` without its extension.
    pub fn stem(&self) -> &str {
        Path::new(&self.original_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.original_name)
    }

    /// Extension of `original_name` as uploaded, with the leading dot, or `""`.
    pub fn extension(&self) -> String {
        Path::new(&self.original_name)
            .extension()
            .and_then(|s| s.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default()
    }
}

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.-]").unwrap());

/// Reduce a client-supplied file name to a safe flat name.
///
/// Non-ASCII characters are dropped, path separators and whitespace runs
/// become `_`, anything outside `[A-Za-z0-9_.-]` is removed and leading or
/// trailing `.`/`_` are stripped. An empty result becomes `upload`.
pub fn secure_filename(name: &str) -> String {
    let ascii: String = name
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned = UNSAFE_CHARS.replace_all(&joined, "");
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Handle on the Storage Area directory. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StorageArea {
    root: PathBuf,
}

impl StorageArea {
    /// Open (creating if needed) the Storage Area at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ConvertError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| ConvertError::storage(dir, e))?;
        let root = dir
            .canonicalize()
            .map_err(|e| ConvertError::storage(dir, e))?;
        debug!("Storage area at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path of a name inside the Storage Area.
    pub fn path_of(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// Persist an upload as `{id}_{secure name}`.
    pub fn save_upload(&self, id: &RequestId, upload: &Upload) -> Result<StoredFile, ConvertError> {
        let name = secure_filename(&upload.filename);
        let mut staged = tempfile::Builder::new()
            .prefix(WORK_PREFIX)
            .tempfile_in(&self.root)
            .map_err(|e| ConvertError::storage(&self.root, e))?;
        staged
            .write_all(&upload.bytes)
            .and_then(|_| staged.flush())
            .map_err(|e| ConvertError::storage(staged.path(), e))?;

        let final_path = self.path_of(&format!("{id}_{name}"));
        staged
            .persist(&final_path)
            .map_err(|e| ConvertError::storage(&final_path, e.error))?;

        debug!(
            "Stored upload '{}' ({} bytes) as {}",
            upload.filename,
            upload.bytes.len(),
            final_path.display()
        );
        Ok(StoredFile {
            id: id.clone(),
            original_name: name,
            path: final_path,
            created_at: Utc::now(),
        })
    }

    /// Create a staging directory for one dispatch. Removed when dropped.
    pub fn work_dir(&self, id: &RequestId) -> Result<TempDir, ConvertError> {
        tempfile::Builder::new()
            .prefix(&format!("{WORK_PREFIX}{id}-"))
            .tempdir_in(&self.root)
            .map_err(|e| ConvertError::storage(&self.root, e))
    }

    /// Move a finished file into place under `file_name`.
    pub fn commit(
        &self,
        staged: &Path,
        id: &RequestId,
        file_name: &str,
    ) -> Result<StoredFile, ConvertError> {
        let final_path = self.path_of(file_name);
        std::fs::rename(staged, &final_path).map_err(|e| ConvertError::storage(&final_path, e))?;
        let original_name = file_name
            .strip_prefix(&format!("{id}_"))
            .unwrap_or(file_name)
            .to_string();
        Ok(StoredFile {
            id: id.clone(),
            original_name,
            path: final_path,
            created_at: Utc::now(),
        })
    }

    /// Look up a stored file for download.
    ///
    /// Names that could escape the directory or address a staging entry are
    /// reported as not found, as are missing files.
    pub fn resolve(&self, file_name: &str) -> Result<PathBuf, ConvertError> {
        let not_found = || ConvertError::NotFound {
            name: file_name.to_string(),
        };
        if file_name.is_empty()
            || file_name.contains(['/', '\\'])
            || file_name.contains("..")
            || file_name.starts_with('.')
        {
            return Err(not_found());
        }
        let path = self.path_of(file_name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(not_found())
        }
    }

    /// Names of all visible stored files, sorted.
    pub fn list(&self) -> Result<Vec<String>, ConvertError> {
        let entries =
            std::fs::read_dir(&self.root).map_err(|e| ConvertError::storage(&self.root, e))?;
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| !n.starts_with(WORK_PREFIX))
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_12_hex_and_distinct() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_eq!(a.as_str().len(), 12);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn secure_filename_cases() {
        assert_eq!(secure_filename("My cool movie.mov"), "My_cool_movie.mov");
        assert_eq!(secure_filename("../../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("résumé.pdf"), "rsum.pdf");
        assert_eq!(secure_filename("..."), "upload");
        assert_eq!(secure_filename(""), "upload");
        assert_eq!(secure_filename("a\\b\\c.docx"), "a_b_c.docx");
        assert_eq!(secure_filename("  report (final).pdf "), "report_final.pdf");
    }

    #[test]
    fn save_upload_uses_id_prefix_and_leaves_no_staging() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageArea::open(dir.path()).unwrap();
        let id = RequestId::generate();

        let stored = storage
            .save_upload(&id, &Upload::new("Quarterly Report.pdf", b"%PDF-1.4".to_vec()))
            .unwrap();

        assert_eq!(stored.file_name(), format!("{id}_Quarterly_Report.pdf"));
        assert_eq!(stored.stem(), "Quarterly_Report");
        assert_eq!(stored.extension(), ".pdf");
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"%PDF-1.4");
        assert_eq!(storage.list().unwrap(), vec![stored.file_name()]);

        let upper = storage
            .save_upload(&id, &Upload::new("Scan.JPG", b"\xFF\xD8".to_vec()))
            .unwrap();
        assert_eq!(upper.stem(), "Scan");
        assert_eq!(upper.extension(), ".JPG");
    }

    #[test]
    fn work_dir_is_hidden_and_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageArea::open(dir.path()).unwrap();
        let id = RequestId::generate();

        let work = storage.work_dir(&id).unwrap();
        let staged = work.path().join("out.pdf");
        std::fs::write(&staged, b"x").unwrap();
        assert!(storage.list().unwrap().is_empty());

        let stored = storage.commit(&staged, &id, &format!("{id}_out.pdf")).unwrap();
        assert_eq!(stored.original_name, "out.pdf");

        let work_path = work.path().to_path_buf();
        drop(work);
        assert!(!work_path.exists());
        assert_eq!(storage.list().unwrap(), vec![format!("{id}_out.pdf")]);
    }

    #[test]
    fn resolve_rejects_traversal_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageArea::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("abc_x.pdf"), b"x").unwrap();

        assert!(storage.resolve("abc_x.pdf").is_ok());
        for bad in ["../abc_x.pdf", "a/b", ".work-123", "", "missing.pdf"] {
            let err = storage.resolve(bad).unwrap_err();
            assert!(matches!(err, ConvertError::NotFound { .. }), "{bad}");
        }
    }
}
