//! アップロード画像の保存
//!
//! 元のファイル名は拡張子だけを使い、本体は UUID v4 で衝突しない名前にする。

use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

const DEFAULT_EXTENSION: &str = "jpg";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("ファイルが指定されていません")]
    Missing,

    #[error("failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

/// 保存済みアップロード
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    /// `<uuid>.<ext>`
    pub file_name: String,
    pub path: PathBuf,
}

/// 元のファイル名から安全な拡張子を取り出す（小文字、英数字のみ）
pub fn upload_extension(original_filename: &str) -> String {
    let base = original_filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext: String = ext
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .collect::<String>()
                .to_ascii_lowercase();
            if ext.is_empty() {
                DEFAULT_EXTENSION.to_string()
            } else {
                ext
            }
        }
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

/// アップロードを保存する
///
/// ファイル名が無い、または中身が空の場合は `Missing`。
pub fn save_upload(
    upload_dir: &Path,
    original_filename: Option<&str>,
    bytes: &[u8],
) -> Result<StoredUpload, UploadError> {
    let original_filename = original_filename
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or(UploadError::Missing)?;
    if bytes.is_empty() {
        return Err(UploadError::Missing);
    }

    std::fs::create_dir_all(upload_dir)?;

    let file_name = format!("{}.{}", Uuid::new_v4(), upload_extension(original_filename));
    let path = upload_dir.join(&file_name);
    std::fs::write(&path, bytes)?;

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "アップロードを保存しました");
    Ok(StoredUpload { file_name, path })
}

/// 保存済みファイル名として妥当か（ディレクトリ移動を含まない）
pub fn is_stored_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        && !name.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_is_lowercased_and_sanitized() {
        assert_eq!(upload_extension("Photo.JPEG"), "jpeg");
        assert_eq!(upload_extension("../../evil.p*n#g"), "png");
        assert_eq!(upload_extension("archive.tar.gz"), "gz");
        assert_eq!(upload_extension("C:\\Users\\me\\shot.PNG"), "png");
    }

    #[test]
    fn test_missing_extension_defaults_to_jpg() {
        assert_eq!(upload_extension("camera"), "jpg");
        assert_eq!(upload_extension(".hidden"), "jpg");
        assert_eq!(upload_extension("trailing."), "jpg");
    }

    #[test]
    fn test_save_upload_uses_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("static/uploads");

        let a = save_upload(&uploads, Some("bottle.PNG"), b"data").unwrap();
        let b = save_upload(&uploads, Some("bottle.PNG"), b"data").unwrap();

        assert_ne!(a.file_name, b.file_name);
        assert!(a.file_name.ends_with(".png"));
        assert!(is_stored_name(&a.file_name));
        assert_eq!(std::fs::read(&a.path).unwrap(), b"data");
    }

    #[test]
    fn test_empty_or_unnamed_upload_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            save_upload(dir.path(), None, b"data"),
            Err(UploadError::Missing)
        ));
        assert!(matches!(
            save_upload(dir.path(), Some(""), b"data"),
            Err(UploadError::Missing)
        ));
        assert!(matches!(
            save_upload(dir.path(), Some("a.jpg"), b""),
            Err(UploadError::Missing)
        ));
    }

    #[test]
    fn test_stored_name_rejects_traversal() {
        assert!(is_stored_name("0b6f2d1e-aaaa-4bbb-8ccc-123456789abc.jpg"));
        assert!(!is_stored_name("../secret.jpg"));
        assert!(!is_stored_name("a/b.jpg"));
        assert!(!is_stored_name(".env"));
        assert!(!is_stored_name(""));
    }
}
