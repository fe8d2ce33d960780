//! Local attachment storage.
//!
//! Path generation, digests and the hashing write path used when files
//! are stored outside the per-model materialization layout.

mod digest;

pub use digest::{
    compute_digest, compute_digest_stream, compute_file_digest, compute_file_digests,
    verify_checksum, DigestAlgorithm, FileDigests,
};

use crate::config::StorageConfig;
use crate::error::{Result, VaultError};
use chrono::Utc;
use digest::MultiHasher;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Name used when sanitization leaves nothing usable.
const FALLBACK_FILENAME: &str = "file";

/// Metadata of a file written by [`save_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    pub path: PathBuf,
    pub size: u64,
    /// Legacy digest, comparable with most remote checksums.
    pub md5: String,
    pub sha256: String,
    pub blake3: String,
}

/// Reduce a caller-supplied filename to its final component.
///
/// Both `/` and `\` are treated as separators so traversal attempts from
/// either platform are stripped.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    match base {
        "" | "." | ".." => FALLBACK_FILENAME.to_string(),
        name => name.to_string(),
    }
}

/// Generate a unique path for `filename` under `base_dir`.
///
/// Layout: `<base>/<YYYY>/<MM>/<DD>/<random-hex>_<basename>` using the UTC
/// date.
pub fn generate_storage_path(base_dir: impl AsRef<Path>, filename: &str) -> PathBuf {
    let date = Utc::now().format("%Y/%m/%d").to_string();
    let unique = random_hex(StorageConfig::UNIQUE_SUFFIX_BYTES);
    let mut path = base_dir.as_ref().to_path_buf();
    for part in date.split('/') {
        path.push(part);
    }
    path.push(format!("{}_{}", unique, sanitize_filename(filename)));
    path
}

/// Materialization path of an attachment: `<root>/<model_id>/<filename-or-id>`.
pub fn attachment_path(
    storage_root: impl AsRef<Path>,
    model_id: &str,
    filename: Option<&str>,
    attachment_id: &str,
) -> PathBuf {
    let name = filename
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .unwrap_or(attachment_id);
    storage_root
        .as_ref()
        .join(sanitize_filename(model_id))
        .join(sanitize_filename(name))
}

/// Stream `source` into a generated path under `destination_dir`.
///
/// MD5, SHA-256 and BLAKE3 are computed in the same pass. The source is rewound
/// before reading and again afterwards. Without a filename a random one is
/// used.
pub fn save_file<R: Read + Seek>(
    source: &mut R,
    destination_dir: impl AsRef<Path>,
    filename: Option<&str>,
) -> Result<SavedFile> {
    let filename = filename
        .map(str::to_string)
        .unwrap_or_else(|| random_hex(4));
    let path = generate_storage_path(destination_dir, &filename);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| VaultError::io_with_path(e, parent))?;
    }

    source.seek(SeekFrom::Start(0))?;
    let written = write_hashed(source, &path);
    source.seek(SeekFrom::Start(0))?;

    let (size, digests) = match written {
        Ok(result) => result,
        Err(e) => {
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }
    };

    Ok(SavedFile {
        path,
        size,
        md5: digests.md5,
        sha256: digests.sha256,
        blake3: digests.blake3,
    })
}

fn write_hashed<R: Read>(source: &mut R, path: &Path) -> Result<(u64, FileDigests)> {
    let mut target = std::fs::File::create(path).map_err(|e| VaultError::io_with_path(e, path))?;
    let mut hasher = MultiHasher::new();
    let mut buffer = vec![0u8; StorageConfig::HASH_CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        let bytes_read = source.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        let chunk = &buffer[..bytes_read];
        target
            .write_all(chunk)
            .map_err(|e| VaultError::io_with_path(e, path))?;
        hasher.update(chunk);
        total += bytes_read as u64;
    }

    target.flush().map_err(|e| VaultError::io_with_path(e, path))?;
    Ok((total, hasher.finalize()))
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::fill(buf.as_mut_slice());
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("..\\..\\boot.ini"), "boot.ini");
        assert_eq!(sanitize_filename("plain.stl"), "plain.stl");
        assert_eq!(sanitize_filename("dir/"), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename(".."), FALLBACK_FILENAME);
    }

    #[test]
    fn test_generate_storage_path_layout() {
        let base = Path::new("/srv/files");
        let path = generate_storage_path(base, "../secret/model.3mf");

        let relative = path.strip_prefix(base).unwrap();
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], Utc::now().format("%Y").to_string());
        assert_eq!(parts[1].len(), 2);
        assert_eq!(parts[2].len(), 2);

        let (prefix, name) = parts[3].split_once('_').unwrap();
        assert_eq!(prefix.len(), StorageConfig::UNIQUE_SUFFIX_BYTES * 2);
        assert!(prefix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(name, "model.3mf");
    }

    #[test]
    fn test_generated_paths_are_unique() {
        let a = generate_storage_path("/x", "f.stl");
        let b = generate_storage_path("/x", "f.stl");
        assert_ne!(a, b);
    }

    #[test]
    fn test_attachment_path_falls_back_to_id() {
        let root = Path::new("/data");
        assert_eq!(
            attachment_path(root, "m1", Some("part.stl"), "a1"),
            PathBuf::from("/data/m1/part.stl")
        );
        assert_eq!(
            attachment_path(root, "m1", Some(""), "a1"),
            PathBuf::from("/data/m1/a1")
        );
        assert_eq!(
            attachment_path(root, "m1", Some("../../escape.stl"), "a1"),
            PathBuf::from("/data/m1/escape.stl")
        );
    }

    #[test]
    fn test_save_file_reports_digests_and_rewinds() {
        let tmp = TempDir::new().unwrap();
        let mut source = Cursor::new(b"abc".to_vec());
        source.set_position(1);

        let saved = save_file(&mut source, tmp.path(), Some("nested/name.txt")).unwrap();

        assert!(saved.path.starts_with(tmp.path()));
        assert!(saved.path.to_string_lossy().ends_with("_name.txt"));
        assert_eq!(saved.size, 3);
        assert_eq!(saved.md5, "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(
            saved.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(saved.blake3, blake3::hash(b"abc").to_hex().to_string());
        assert_eq!(std::fs::read(&saved.path).unwrap(), b"abc");
        assert_eq!(source.position(), 0);
    }

    #[test]
    fn test_save_file_without_name() {
        let tmp = TempDir::new().unwrap();
        let mut source = Cursor::new(Vec::new());
        let saved = save_file(&mut source, tmp.path(), None).unwrap();
        assert_eq!(saved.size, 0);
        assert!(saved.path.exists());
    }
}
